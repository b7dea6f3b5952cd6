//! Validated in-memory sample matrix handed to the engine.

use crate::error::DatasetError;

/// A dense, row-major matrix of samples with a uniform feature count.
///
/// `NaN` cells are accepted because the engine reads them as missing values;
/// infinite cells are rejected.
///
/// # Examples
/// ```
/// use gravity_core::Dataset;
///
/// let dataset = Dataset::try_from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]])?;
/// assert_eq!(dataset.len(), 2);
/// assert_eq!(dataset.dimension(), 2);
/// # Ok::<(), gravity_core::DatasetError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    values: Vec<f64>,
    dimension: usize,
}

impl Dataset {
    /// Builds a dataset from owned rows.
    ///
    /// # Errors
    /// Returns [`DatasetError::Empty`] when `rows` is empty,
    /// [`DatasetError::ZeroDimension`] when the first row has no features,
    /// [`DatasetError::Ragged`] when a row's width differs from the first
    /// row's, and [`DatasetError::NonFinite`] when a cell is infinite.
    pub fn try_from_rows(rows: Vec<Vec<f64>>) -> Result<Self, DatasetError> {
        let dimension = rows.first().ok_or(DatasetError::Empty)?.len();
        if dimension == 0 {
            return Err(DatasetError::ZeroDimension);
        }

        let mut values = Vec::with_capacity(rows.len().saturating_mul(dimension));
        for (row, sample) in rows.into_iter().enumerate() {
            if sample.len() != dimension {
                return Err(DatasetError::Ragged {
                    row,
                    expected: dimension,
                    found: sample.len(),
                });
            }
            if let Some(column) = sample.iter().position(|value| value.is_infinite()) {
                return Err(DatasetError::NonFinite { row, column });
            }
            values.extend(sample);
        }

        Ok(Self { values, dimension })
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len() / self.dimension
    }

    /// Always `false`: construction rejects empty datasets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of features per sample.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Iterates over the samples in order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.dimension)
    }
}

impl TryFrom<Vec<Vec<f64>>> for Dataset {
    type Error = DatasetError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Self::try_from_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], DatasetError::Empty)]
    #[case::zero_width(vec![vec![], vec![]], DatasetError::ZeroDimension)]
    #[case::ragged(
        vec![vec![1.0, 2.0], vec![3.0]],
        DatasetError::Ragged { row: 1, expected: 2, found: 1 }
    )]
    #[case::infinite(
        vec![vec![1.0, 2.0], vec![3.0, f64::NEG_INFINITY]],
        DatasetError::NonFinite { row: 1, column: 1 }
    )]
    fn invalid_rows_are_rejected(#[case] rows: Vec<Vec<f64>>, #[case] expected: DatasetError) {
        let err = Dataset::try_from_rows(rows).expect_err("rows must be rejected");
        assert_eq!(err, expected);
    }

    #[test]
    fn nan_cells_are_accepted_as_missing_values() {
        let dataset =
            Dataset::try_from_rows(vec![vec![f64::NAN, 1.0]]).expect("NaN must be accepted");
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn rows_preserve_sample_order() {
        let dataset = Dataset::try_from_rows(vec![vec![1.0], vec![2.0], vec![3.0]])
            .expect("rows must be valid");
        let firsts: Vec<f64> = dataset
            .rows()
            .filter_map(|row| row.first().copied())
            .collect();
        assert_eq!(firsts, [1.0, 2.0, 3.0]);
        assert!(!dataset.is_empty());
    }
}
