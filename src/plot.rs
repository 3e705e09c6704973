//! Plotting interface: the process only draws through a [`Plotter`].
use crate::errors::{Result, TgpError};
use crate::hypers::Hypers;
use crate::predict::Request;
use crate::process::StochasticProcess;
use log::warn;
use ndarray::{Array1, ArrayView1, Axis};

/// Drawing surface
pub trait Plotter {
    /// Draw the line or markers `(x, y)` with a matplotlib-like `style`
    fn plot(&mut self, x: &ArrayView1<f64>, y: &ArrayView1<f64>, style: &str, label: Option<&str>);

    /// Fill the band between `lo` and `hi`
    fn fill_between(
        &mut self,
        x: &ArrayView1<f64>,
        lo: &ArrayView1<f64>,
        hi: &ArrayView1<f64>,
        label: Option<&str>,
    );

    /// Set title and axis labels, show the legend when `legend`
    fn annotate(&mut self, title: &str, x_label: &str, y_label: &str, legend: bool);
}

/// Number of standard deviations of the mean band
const STD_BAND: f64 = 2.;

impl StochasticProcess {
    /// Draw the observations, the hidden process and the requested
    /// predictions over the query domain
    pub fn plot(
        &self,
        plotter: &mut dyn Plotter,
        hypers: Option<&Hypers>,
        request: &Request,
    ) -> Result<()> {
        let x: Array1<f64> = self
            .space
            .index
            .as_ref()
            .map(|index| index.to_values())
            .ok_or_else(|| TgpError::InvalidValue("the domain has no sample points".to_string()))?;
        let res = self.predict(hypers, None, request)?;

        if let Some(record) = &self.record {
            if record.inputs.ncols() == 1 {
                plotter.plot(
                    &record.inputs.column(0),
                    &record.outputs.column(0),
                    ".k",
                    Some("observations"),
                );
            }
        }
        match &self.hidden {
            Some(hidden) if hidden.len() >= x.len() => {
                plotter.plot(
                    &x.view(),
                    &hidden.slice(ndarray::s![..x.len()]),
                    "-r",
                    Some("hidden"),
                );
            }
            Some(hidden) => warn!(
                "{} hidden values for {} query points, hidden process not drawn",
                hidden.len(),
                x.len()
            ),
            None => (),
        }
        if let Some(mean) = &res.mean {
            plotter.plot(&x.view(), &mean.view(), "-b", Some("mean"));
            if let Some(std) = &res.std {
                let up = mean + &(std * STD_BAND);
                let down = mean - &(std * STD_BAND);
                plotter.plot(&x.view(), &up.view(), "--k", None);
                plotter.plot(&x.view(), &down.view(), "--k", None);
            }
        }
        if let Some(median) = &res.median {
            plotter.plot(&x.view(), &median.view(), "-g", Some("median"));
        }
        if let (Some(up), Some(down)) = (&res.quantile_up, &res.quantile_down) {
            plotter.fill_between(&x.view(), &down.view(), &up.view(), Some("95%"));
        }
        if let (Some(up), Some(down)) = (&res.noise_up, &res.noise_down) {
            plotter.fill_between(&x.view(), &down.view(), &up.view(), Some("noise"));
        }
        if let Some(samples) = &res.samples {
            for sample in samples.axis_iter(Axis(1)) {
                plotter.plot(&x.view(), &sample, "-", None);
            }
        }

        let d = &self.description;
        plotter.annotate(&d.title, &d.x, &d.y, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::KernelSpec;
    use crate::mean_models::MeanSpec;
    use crate::parameters::ProcessParams;
    use ndarray::array;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<(String, Option<String>, usize)>,
        bands: Vec<Option<String>>,
        title: Option<String>,
    }

    impl Plotter for Recorder {
        fn plot(
            &mut self,
            x: &ArrayView1<f64>,
            y: &ArrayView1<f64>,
            style: &str,
            label: Option<&str>,
        ) {
            assert_eq!(x.len(), y.len());
            self.lines
                .push((style.to_string(), label.map(String::from), x.len()));
        }

        fn fill_between(
            &mut self,
            x: &ArrayView1<f64>,
            lo: &ArrayView1<f64>,
            hi: &ArrayView1<f64>,
            label: Option<&str>,
        ) {
            assert_eq!(x.len(), lo.len());
            assert_eq!(x.len(), hi.len());
            self.bands.push(label.map(String::from));
        }

        fn annotate(&mut self, title: &str, _x_label: &str, _y_label: &str, _legend: bool) {
            self.title = Some(title.to_string());
        }
    }

    #[test]
    fn test_plot_draws_requested_quantities() {
        let mut gp = ProcessParams::new(
            MeanSpec::Zero,
            KernelSpec::SquaredExponential { dim: 1, ard: false },
        )
        .space(Array1::linspace(0., 4., 9))
        .seed(42)
        .build()
        .unwrap();
        gp.observed(array![1., 3.], array![0.5, -0.5]).unwrap();
        gp.set_hidden(Some(Array1::zeros(9))).unwrap();
        gp.describe(Some("demo"), None, None, None);

        let mut recorder = Recorder::default();
        let request = Request::new().quantiles(true).noise(true).samples(3);
        gp.plot(&mut recorder, None, &request).unwrap();

        let styles: Vec<&str> = recorder.lines.iter().map(|l| l.0.as_str()).collect();
        assert_eq!(styles, vec![".k", "-r", "-b", "--k", "--k", "-", "-", "-"]);
        assert_eq!(recorder.lines[0].2, 2);
        assert!(recorder.lines[1..].iter().all(|l| l.2 == 9));
        assert_eq!(
            recorder.bands,
            vec![Some("95%".to_string()), Some("noise".to_string())]
        );
        assert_eq!(recorder.title.as_deref(), Some("demo"));
    }

    #[test]
    fn test_plot_after_domain_growth() {
        let mut gp = ProcessParams::new(
            MeanSpec::Zero,
            KernelSpec::SquaredExponential { dim: 1, ard: false },
        )
        .space(Array1::linspace(0., 4., 5))
        .build()
        .unwrap();
        gp.set_hidden(Some(Array1::zeros(5))).unwrap();
        gp.set_space(Array1::linspace(0., 4., 9)).unwrap();

        let mut recorder = Recorder::default();
        gp.plot(&mut recorder, None, &Request::new()).unwrap();
        let styles: Vec<&str> = recorder.lines.iter().map(|l| l.0.as_str()).collect();
        assert_eq!(styles, vec!["-b", "--k", "--k"]);

        gp.hidden = Some(Array1::zeros(3));
        let mut recorder = Recorder::default();
        gp.plot(&mut recorder, None, &Request::new()).unwrap();
        assert!(recorder.lines.iter().all(|l| l.0 != "-r" && l.2 == 9));
    }
}
