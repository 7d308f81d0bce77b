//! Where recorded samples go.
//!
//! Two shapes are provided: a plain `Vec<DVector<f64>>` that grows as samples arrive, and
//! [`ColumnSink`], a `d x n` matrix allocated up front whose i-th column receives the
//! i-th sample. The columnar layout is what [`crate::stats`] consumes.

use nalgebra::DVector;
use ndarray::{s, Array2, ArrayView2};

use crate::error::{Result, SamplingError};

pub trait CollectionSink {
    /// Records one sample. Samples arrive in generation order.
    fn push(&mut self, point: &DVector<f64>) -> Result<()>;

    /// Number of samples recorded so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CollectionSink for Vec<DVector<f64>> {
    fn push(&mut self, point: &DVector<f64>) -> Result<()> {
        Vec::push(self, point.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Fixed-capacity columnar storage: column `i` holds the `i`-th recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSink {
    samples: Array2<f64>,
    filled: usize,
}

impl ColumnSink {
    pub fn new(dim: usize, capacity: usize) -> Self {
        Self {
            samples: Array2::zeros((dim, capacity)),
            filled: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.samples.nrows()
    }

    pub fn capacity(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }

    /// The recorded columns, shape `(dim, len)`.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.samples.slice(s![.., ..self.filled])
    }

    /// The underlying buffer including unwritten (zero) columns.
    pub fn into_array(self) -> Array2<f64> {
        self.samples
    }
}

impl CollectionSink for ColumnSink {
    fn push(&mut self, point: &DVector<f64>) -> Result<()> {
        if self.filled == self.capacity() {
            return Err(SamplingError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }
        if point.len() != self.dim() {
            return Err(SamplingError::DimensionMismatch {
                expected: self.dim(),
                found: point.len(),
            });
        }
        self.samples
            .column_mut(self.filled)
            .iter_mut()
            .zip(point.iter())
            .for_each(|(dst, src)| *dst = *src);
        self.filled += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn vec_sink_appends_in_order() {
        let mut sink: Vec<DVector<f64>> = Vec::new();
        CollectionSink::push(&mut sink, &DVector::from_vec(vec![1.0, 2.0])).unwrap();
        CollectionSink::push(&mut sink, &DVector::from_vec(vec![3.0, 4.0])).unwrap();
        assert_eq!(CollectionSink::len(&sink), 2);
        assert_eq!(sink[1][0], 3.0);
    }

    #[test]
    fn column_sink_writes_columns() {
        let mut sink = ColumnSink::new(2, 3);
        assert!(sink.is_empty());
        sink.push(&DVector::from_vec(vec![1.0, 2.0])).unwrap();
        sink.push(&DVector::from_vec(vec![3.0, 4.0])).unwrap();
        assert_eq!(sink.view(), arr2(&[[1.0, 3.0], [2.0, 4.0]]));
        assert!(!sink.is_full());
    }

    #[test]
    fn column_sink_rejects_overflow() {
        let mut sink = ColumnSink::new(1, 1);
        sink.push(&DVector::from_vec(vec![0.5])).unwrap();
        assert!(sink.is_full());
        let err = sink.push(&DVector::from_vec(vec![0.7])).unwrap_err();
        assert_eq!(err, SamplingError::CapacityExceeded { capacity: 1 });
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn column_sink_rejects_wrong_dimension() {
        let mut sink = ColumnSink::new(3, 2);
        let err = sink.push(&DVector::from_vec(vec![0.5])).unwrap_err();
        assert_eq!(
            err,
            SamplingError::DimensionMismatch {
                expected: 3,
                found: 1
            }
        );
    }
}
