//! The random source consumed by every walk.
//!
//! The walks never create generators themselves. Each sampling session owns one
//! source and threads it through the kernel explicitly, so independent chains can run
//! on separate threads without sharing generator state. Every [`rand::Rng`] is a
//! [`RandomSource`]; a seeded `SmallRng` is the usual choice.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};

pub trait RandomSource {
    /// Uniform draw from `[lo, hi)`. Returns `lo` when the interval is empty.
    fn uniform_real(&mut self, lo: f64, hi: f64) -> f64;

    /// Uniform draw from the integers in `[lo, hi)`. Returns `lo` when the range is empty.
    fn uniform_int(&mut self, lo: usize, hi: usize) -> usize;

    /// Draw from N(0, 1).
    fn standard_normal(&mut self) -> f64;

    /// Draw from Exp(1).
    fn standard_exponential(&mut self) -> f64 {
        // 1 - u lies in (0, 1], so the log is finite.
        -(1.0 - self.uniform_real(0.0, 1.0)).ln()
    }

    /// A vector of `dim` independent N(0, 1) draws.
    fn standard_normal_vector(&mut self, dim: usize) -> DVector<f64> {
        DVector::from_fn(dim, |_, _| self.standard_normal())
    }

    /// A direction drawn uniformly from the unit sphere in `dim` dimensions.
    fn unit_direction(&mut self, dim: usize) -> DVector<f64> {
        for _ in 0..8 {
            let v = self.standard_normal_vector(dim);
            let norm = v.norm();
            if norm > f64::EPSILON {
                return v / norm;
            }
        }
        // Eight zero-norm Gaussian vectors in a row do not happen in practice.
        let mut e = DVector::zeros(dim);
        if dim > 0 {
            e[0] = 1.0;
        }
        e
    }
}

impl<R: Rng> RandomSource for R {
    fn uniform_real(&mut self, lo: f64, hi: f64) -> f64 {
        if hi > lo {
            self.gen_range(lo..hi)
        } else {
            lo
        }
    }

    fn uniform_int(&mut self, lo: usize, hi: usize) -> usize {
        if hi > lo {
            self.gen_range(lo..hi)
        } else {
            lo
        }
    }

    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(self)
    }

    fn standard_exponential(&mut self) -> f64 {
        Exp1.sample(self)
    }
}
