//! Normalization of user supplied domains into a symbolic placeholder,
//! a `(n, d)` array of sample points and a display index.
use crate::errors::{Result, TgpError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tgp_symbolic::Expr;

/// Labels used to present sample points
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DisplayIndex {
    /// Float coordinates, used for 1-D domains
    Values(Array1<f64>),
    /// Integer labels (positions or user supplied)
    Labels(Vec<i64>),
}

impl DisplayIndex {
    /// Number of labels
    pub fn len(&self) -> usize {
        match self {
            DisplayIndex::Values(v) => v.len(),
            DisplayIndex::Labels(l) => l.len(),
        }
    }

    /// Whether there is no label
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels as floats, suitable for plotting
    pub fn to_values(&self) -> Array1<f64> {
        match self {
            DisplayIndex::Values(v) => v.clone(),
            DisplayIndex::Labels(l) => l.iter().map(|&v| v as f64).collect(),
        }
    }
}

/// User supplied domain
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum SpaceInput {
    /// Default evenly spaced 1-D domain `[0, 1]`
    #[default]
    Default,
    /// Deferred 1-D domain of the given size: placeholder only
    Count(usize),
    /// 1-D sample points
    Vector(Array1<f64>),
    /// `(n, d)` sample points
    Matrix(Array2<f64>),
    /// Sample points carrying their own integer index
    Series {
        /// `(n, d)` sample points
        values: Array2<f64>,
        /// one label per sample point
        index: Vec<i64>,
    },
}

impl SpaceInput {
    /// Build a matrix input from rows, fails on ragged rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let d = rows.first().map_or(0, |r| r.len());
        if let Some(row) = rows.iter().find(|r| r.len() != d) {
            return Err(TgpError::InvalidValue(format!(
                "ragged space: row of length {} where {} expected",
                row.len(),
                d
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), d), flat)
            .map(SpaceInput::Matrix)
            .map_err(|e| TgpError::InvalidValue(e.to_string()))
    }
}

impl From<Array1<f64>> for SpaceInput {
    fn from(values: Array1<f64>) -> Self {
        SpaceInput::Vector(values)
    }
}

impl From<Array2<f64>> for SpaceInput {
    fn from(values: Array2<f64>) -> Self {
        SpaceInput::Matrix(values)
    }
}

impl From<Vec<f64>> for SpaceInput {
    fn from(values: Vec<f64>) -> Self {
        SpaceInput::Vector(Array1::from(values))
    }
}

impl From<usize> for SpaceInput {
    fn from(n: usize) -> Self {
        SpaceInput::Count(n)
    }
}

/// Normalized domain
#[derive(Clone, Debug)]
pub struct NormalizedSpace {
    /// Symbolic placeholder standing for the sample points in expressions
    pub placeholder: Expr,
    /// Sample points `(n, d)`, absent for deferred domains
    pub values: Option<Array2<f64>>,
    /// Display index, absent for deferred domains
    pub index: Option<DisplayIndex>,
    dim: usize,
}

impl NormalizedSpace {
    /// Dimension of sample points, 1 for deferred domains
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Sample points, or no point of the domain dimension when deferred
    pub fn sample(&self) -> Array2<f64> {
        self.values
            .clone()
            .unwrap_or_else(|| Array2::zeros((0, self.dim)))
    }
}

fn index_from_values(values: &Array2<f64>) -> DisplayIndex {
    if values.ncols() == 1 {
        DisplayIndex::Values(values.column(0).to_owned())
    } else {
        DisplayIndex::Labels((0..values.nrows() as i64).collect())
    }
}

/// Normalize `raw` into a placeholder named `name`, sample points and display index
///
/// With `squeeze`, the domain is output-like: sample points must be scalars
/// and are returned as a `(n, 1)` column.
pub fn normalize_space(raw: SpaceInput, name: &str, squeeze: bool) -> Result<NormalizedSpace> {
    let placeholder = Expr::input(name);
    let (values, index) = match raw {
        SpaceInput::Default => {
            let values = Array1::range(0., 2., 1.).insert_axis(Axis(1));
            let index = index_from_values(&values);
            (values, index)
        }
        SpaceInput::Count(_) => {
            return Ok(NormalizedSpace {
                placeholder,
                values: None,
                index: None,
                dim: 1,
            })
        }
        SpaceInput::Vector(v) => {
            let values = v.insert_axis(Axis(1));
            let index = index_from_values(&values);
            (values, index)
        }
        SpaceInput::Matrix(m) => {
            let index = index_from_values(&m);
            (m, index)
        }
        SpaceInput::Series { values, index } => {
            if index.len() != values.nrows() {
                return Err(TgpError::InvalidValue(format!(
                    "index of length {} for {} sample points",
                    index.len(),
                    values.nrows()
                )));
            }
            (values, DisplayIndex::Labels(index))
        }
    };
    if squeeze && values.ncols() != 1 {
        return Err(TgpError::DimensionMismatch(format!(
            "output-like space `{}` must be 1-D, got {} columns",
            name,
            values.ncols()
        )));
    }
    Ok(NormalizedSpace {
        placeholder,
        dim: values.ncols(),
        values: Some(values),
        index: Some(index),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_vector_round_trip() {
        let a = array![0.5, 1.5, -2.];
        let space = normalize_space(a.clone().into(), "space", false).unwrap();
        let values = space.values.unwrap();
        assert_eq!(values.dim(), (3, 1));
        assert_abs_diff_eq!(values.column(0).to_owned(), a);
        assert_eq!(space.index, Some(DisplayIndex::Values(a)));
    }

    #[test]
    fn test_default_space() {
        let space = normalize_space(SpaceInput::Default, "space", false).unwrap();
        assert_eq!(space.values, Some(array![[0.], [1.]]));
        assert_eq!(space.index.map(|i| i.len()), Some(2));
    }

    #[test]
    fn test_deferred_space() {
        let space = normalize_space(SpaceInput::Count(10), "space", false).unwrap();
        assert!(space.values.is_none());
        assert!(space.index.is_none());
        assert_eq!(space.dim(), 1);
        assert_eq!(space.sample().dim(), (0, 1));
        assert_eq!(space.placeholder.free_inputs().len(), 1);
    }

    #[test]
    fn test_matrix_positions() {
        let m = array![[0., 1.], [2., 3.], [4., 5.]];
        let space = normalize_space(m.into(), "space", false).unwrap();
        assert_eq!(space.index, Some(DisplayIndex::Labels(vec![0, 1, 2])));
        assert_eq!(space.dim(), 2);
    }

    #[test]
    fn test_series_index() {
        let raw = SpaceInput::Series {
            values: array![[1.], [2.]],
            index: vec![2020, 2021],
        };
        let space = normalize_space(raw, "space", false).unwrap();
        assert_eq!(space.index, Some(DisplayIndex::Labels(vec![2020, 2021])));

        let raw = SpaceInput::Series {
            values: array![[1.], [2.]],
            index: vec![2020],
        };
        assert!(matches!(
            normalize_space(raw, "space", false),
            Err(TgpError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_ragged_and_squeeze() {
        assert!(SpaceInput::from_rows(&[vec![1., 2.], vec![3.]]).is_err());
        let raw = SpaceInput::from_rows(&[vec![1., 2.], vec![3., 4.]]).unwrap();
        assert!(matches!(
            normalize_space(raw, "outputs", true),
            Err(TgpError::DimensionMismatch(_))
        ));
    }
}
