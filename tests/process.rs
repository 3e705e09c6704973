use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tgp::kernels::KernelSpec;
use tgp::mappings::MappingSpec;
use tgp::mean_models::MeanSpec;
use tgp::tgp_symbolic::{Backend, Expr, Function, Signature, TapeBackend};
use tgp::{Hypers, ProcessParams, Request, StochasticProcess};

/// Tape backend counting every compilation request
#[derive(Default)]
struct CountingBackend {
    inner: TapeBackend,
    count: AtomicUsize,
}

impl Backend for CountingBackend {
    fn compile(
        &self,
        signature: &Signature,
        output: &Expr,
    ) -> tgp::tgp_symbolic::Result<Box<dyn Function>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(signature, output)
    }

    fn compilations(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

fn params() -> ProcessParams {
    ProcessParams::new(
        MeanSpec::Constant,
        KernelSpec::SquaredExponential { dim: 1, ard: false },
    )
    .space(Array1::range(0., 6., 1.))
    .seed(42)
}

fn hypers() -> Hypers {
    Hypers::new()
        .with("gp_mean_constant", 0.)
        .with("gp_se_var", 1.)
        .with("gp_se_ls", 1.)
        .with("gp_noise_var", 0.01)
}

fn scenario() -> StochasticProcess {
    let mut gp = params().build().unwrap();
    gp.observed(array![1., 3.], array![2., -1.]).unwrap();
    gp.set_params(&hypers()).unwrap();
    gp
}

#[test]
fn test_end_to_end_scenario() {
    let gp = scenario();
    let res = gp.predict(None, None, &Request::all().samples(1)).unwrap();

    let mean = res.mean.unwrap();
    assert_abs_diff_eq!(mean[1], 2., epsilon = 0.1);
    assert_abs_diff_eq!(mean[3], -1., epsilon = 0.1);
    let var = res.variance.unwrap();
    assert!(var[1] < 0.02 && var[3] < 0.02);
    assert!(var[5] > var[1]);
    assert_abs_diff_eq!(
        res.std.unwrap(),
        var.mapv(f64::sqrt),
        epsilon = 1e-12
    );
    assert_eq!(res.covariance.unwrap().dim(), (6, 6));
    let (up, down) = (res.quantile_up.unwrap(), res.quantile_down.unwrap());
    assert!(up.iter().zip(down.iter()).all(|(u, d)| u > d));
    let (noise_up, noise_down) = (res.noise_up.unwrap(), res.noise_down.unwrap());
    assert!(noise_up.iter().zip(up.iter()).all(|(n, u)| n >= u));
    assert!(noise_down.iter().zip(down.iter()).all(|(n, d)| n <= d));
    assert_eq!(res.samples.unwrap().dim(), (6, 1));
}

#[test]
fn test_predict_without_observations_is_prior() {
    let mut gp = params().build().unwrap();
    let request = Request::new().median(true).quantiles(true);
    let prior = gp.prior(None, None, &request).unwrap();
    assert_eq!(gp.predict(None, None, &request).unwrap(), prior);

    gp.observed(array![1., 3.], array![2., -1.]).unwrap();
    assert_ne!(gp.predict(None, None, &request).unwrap(), prior);
    gp.observed(Array1::<f64>::zeros(0), Array1::<f64>::zeros(0))
        .unwrap();
    let cleared = gp.predict(None, None, &request).unwrap();
    let prior = gp.prior(None, None, &request).unwrap();
    assert_eq!(cleared, prior);
}

#[test]
fn test_noiseless_conditioning_is_exact() {
    let mut gp = params().noise(false).build().unwrap();
    gp.observed(array![1., 3.], array![2., -1.]).unwrap();
    let res = gp.predict(None, None, &Request::new()).unwrap();
    let mean = res.mean.unwrap();
    let var = res.variance.unwrap();
    assert_abs_diff_eq!(mean[1], 2., epsilon = 1e-3);
    assert_abs_diff_eq!(mean[3], -1., epsilon = 1e-3);
    assert!(var[1] < 1e-3 && var[3] < 1e-3);
    assert!(var[5] > 0.1);
}

#[test]
fn test_compiled_once_evaluated_many() {
    let backend = Arc::new(CountingBackend::default());
    let mut gp = params().build_with_backend(backend.clone()).unwrap();
    let defined = backend.compilations();
    assert!(defined > 0);

    gp.observed(array![1., 3.], array![2., -1.]).unwrap();
    let with_likelihood = backend.compilations();
    assert_eq!(with_likelihood, defined + 1);

    for (i, ls) in [0.5, 1., 2.].iter().enumerate() {
        let h = hypers().with("gp_se_ls", *ls);
        gp.predict(Some(&h), None, &Request::all()).unwrap();
        gp.logp(Some(&h)).unwrap();
        gp.observed(array![1., 3., 4.], array![2., -1., i as f64])
            .unwrap();
        gp.set_space(Array1::linspace(0., 5., 11 + i)).unwrap();
    }
    gp.find_point_estimate(None, 1, None).unwrap();
    assert_eq!(backend.compilations(), with_likelihood);
}

#[test]
fn test_fixed_hypers_are_kept() {
    let mut gp = scenario();
    gp.fix_params(&Hypers::new().with("gp_se_var", 1.)).unwrap();

    let estimate = gp.find_point_estimate(None, 3, None).unwrap();
    assert_eq!(estimate.scalar("gp_se_var"), Some(1.));
    assert!(gp.logp(Some(&estimate)).unwrap() >= gp.logp(None).unwrap() - 1e-9);

    let trace = gp.sample_hyperparameters(None, 20, true, None).unwrap();
    assert_eq!(trace.len(), 20);
    let var = trace.values("gp_se_var").unwrap();
    assert!(var.iter().all(|&v| v == 1.));
    let ls = trace.values("gp_se_ls").unwrap();
    assert!(ls.iter().all(|&v| v > 0.));
}

#[test]
fn test_student_t_boxcox_process() {
    let mut gp = params()
        .mapping(MappingSpec::BoxCox)
        .freedom(Some(5.))
        .build()
        .unwrap();
    gp.observed(array![0.5, 1.5, 2.5, 4.], array![1.2, 2.5, 1.8, 3.1])
        .unwrap();
    let res = gp
        .predict(None, None, &Request::new().median(true).quantiles(true).samples(4))
        .unwrap();
    let median = res.median.unwrap();
    let up = res.quantile_up.unwrap();
    let down = res.quantile_down.unwrap();
    assert!(median.iter().all(|m| m.is_finite()));
    for i in 0..median.len() {
        assert!(down[i] <= median[i] && median[i] <= up[i]);
    }
    let samples = res.samples.unwrap();
    assert_eq!(samples.dim(), (6, 4));
    assert!(gp.logp(None).unwrap().is_finite());
}

#[test]
fn test_prior_samples_spread() {
    let gp = params().noise(false).build().unwrap();
    let samples: Array2<f64> = gp.sample(None, None, 500, true).unwrap();
    let var = samples.var_axis(Axis(1), 1.);
    assert!(var.iter().all(|v| (v - 1.).abs() < 0.3));
}
