use ndarray::{Array1, ArrayView1};

/// An unnormalized log-density over an unconstrained real vector
pub trait LogDensity {
    /// Dimension of the parameter vector
    fn dim(&self) -> usize;

    /// Log-density at `x`, non finite values are read as zero density
    fn logp(&self, x: &ArrayView1<f64>) -> f64;
}

/// Log-density given by a closure
pub struct FnDensity<F> {
    dim: usize,
    f: F,
}

impl<F> FnDensity<F>
where
    F: Fn(&ArrayView1<f64>) -> f64,
{
    /// Constructor
    pub fn new(dim: usize, f: F) -> Self {
        FnDensity { dim, f }
    }
}

impl<F> LogDensity for FnDensity<F>
where
    F: Fn(&ArrayView1<f64>) -> f64,
{
    fn dim(&self) -> usize {
        self.dim
    }

    fn logp(&self, x: &ArrayView1<f64>) -> f64 {
        (self.f)(x)
    }
}

/// Log-density with NaN and infinities mapped to `-inf`
pub(crate) fn robust_logp(density: &dyn LogDensity, x: &ArrayView1<f64>) -> f64 {
    let v = density.logp(x);
    if v.is_finite() {
        v
    } else {
        f64::NEG_INFINITY
    }
}

/// Partition of a parameter vector into fixed and free coordinates
///
/// Fixed coordinates keep the value of `base`, free ones are driven by the
/// optimizer or sampler.
#[derive(Clone, Debug)]
pub struct Mask {
    base: Array1<f64>,
    free: Vec<usize>,
}

impl Mask {
    /// Constructor from a full point and a `fixed` flag per coordinate
    pub fn new(base: Array1<f64>, fixed: &[bool]) -> Self {
        let free = (0..base.len())
            .filter(|&i| !fixed.get(i).copied().unwrap_or(false))
            .collect();
        Mask { base, free }
    }

    /// Every coordinate free
    pub fn all_free(base: Array1<f64>) -> Self {
        let n = base.len();
        Self::new(base, &vec![false; n])
    }

    /// Number of free coordinates
    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// Indices of free coordinates
    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    /// Full point from free coordinate values
    pub fn expand(&self, free: &[f64]) -> Array1<f64> {
        let mut full = self.base.clone();
        self.free
            .iter()
            .zip(free.iter())
            .for_each(|(&i, &v)| full[i] = v);
        full
    }

    /// Free coordinate values of a full point
    pub fn restrict(&self, full: &ArrayView1<f64>) -> Array1<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }

    /// Free coordinate values of the base point
    pub fn free_values(&self) -> Array1<f64> {
        self.restrict(&self.base.view())
    }
}
