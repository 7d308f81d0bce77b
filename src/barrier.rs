/*!
Interior-point barrier walks: Dikin, Vaidya and John.

All three propose `y ~ N(x, (r^2 / c) H(x)^{-1})` where `H(x) = A^T diag(w / s^2) A` is a
weighted Hessian of the logarithmic barrier at `x` (`s = b - Ax` are the slacks) and
differ only in the weights `w`:

- Dikin: `w_i = 1`,
- Vaidya: `w_i = sigma_i + d / m`, with `sigma` the leverage scores of `S^{-1} A`,
- John: the fixed point of `w_i = sigma_i(W^{alpha} S^{-1} A) + beta`, found by a few
  averaging iterations.

The proposal is not symmetric, so acceptance uses both densities,
`log q(x -> y) = log det H(x) / 2 - c / (2 r^2) (y - x)^T H(x) (y - x)`.
*/

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

/// Averaging iterations for the John weights.
const JOHN_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    Dikin,
    Vaidya,
    John,
}

impl BarrierKind {
    pub fn name(&self) -> &'static str {
        match self {
            BarrierKind::Dikin => "Dikin",
            BarrierKind::Vaidya => "Vaidya",
            BarrierKind::John => "John",
        }
    }

    /// Default radius of the proposal ellipsoid.
    pub fn default_radius(&self) -> f64 {
        match self {
            BarrierKind::Dikin => 0.75,
            BarrierKind::Vaidya | BarrierKind::John => 0.5,
        }
    }

    /// Divisor `c` of the proposal covariance `(r^2 / c) H^{-1}`.
    fn scale(&self, dim: usize, constraints: usize) -> f64 {
        let d = dim as f64;
        match self {
            BarrierKind::Dikin => d,
            BarrierKind::Vaidya => (d * constraints as f64).sqrt(),
            BarrierKind::John => d.powf(1.5),
        }
    }
}

/// Local metric at a strictly interior point.
struct Metric {
    hessian: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
    log_det: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarrierWalk {
    point: DVector<f64>,
    kind: BarrierKind,
    radius: f64,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl BarrierWalk {
    pub fn new(
        start: DVector<f64>,
        kind: BarrierKind,
        radius: f64,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> Self {
        Self {
            point: start,
            kind,
            radius,
            a: a.clone(),
            b: b.clone(),
        }
    }

    pub fn kind(&self) -> BarrierKind {
        self.kind
    }

    /// Slacks `b - Ax`, `None` unless all are strictly positive.
    fn slacks(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let s = &self.b - &self.a * x;
        s.iter().all(|v| *v > 0.0).then_some(s)
    }

    fn weights(&self, slacks: &DVector<f64>) -> Option<DVector<f64>> {
        let m = self.a.nrows();
        let d = self.a.ncols() as f64;
        match self.kind {
            BarrierKind::Dikin => Some(DVector::from_element(m, 1.0)),
            BarrierKind::Vaidya => {
                let ones = DVector::from_element(m, 1.0);
                let sigma = self.leverage(slacks, &ones)?;
                Some(sigma.add_scalar(d / m as f64))
            }
            BarrierKind::John => {
                let m_f = m as f64;
                let alpha = 1.0 - 1.0 / (2.0 * m_f / d).log2();
                let beta = d / (2.0 * m_f);
                let mut w = DVector::from_element(m, d / m_f);
                for _ in 0..JOHN_ITERATIONS {
                    let scaled = w.map(|wi| wi.powf(alpha));
                    let sigma = self.leverage(slacks, &scaled)?;
                    w = w.zip_map(&sigma, |wi, si| (wi * (si + beta)).sqrt());
                }
                Some(w)
            }
        }
    }

    /// Leverage scores of the rows of `diag(sqrt(w) / s) A`.
    fn leverage(&self, slacks: &DVector<f64>, w: &DVector<f64>) -> Option<DVector<f64>> {
        let mut scaled = self.a.clone();
        for (i, mut row) in scaled.row_iter_mut().enumerate() {
            row *= w[i].sqrt() / slacks[i];
        }
        let gram = scaled.transpose() * &scaled;
        let solved = Cholesky::new(gram)?.solve(&scaled.transpose());
        Some(DVector::from_fn(scaled.nrows(), |i, _| {
            scaled.row(i).dot(&solved.column(i).transpose())
        }))
    }

    fn metric(&self, x: &DVector<f64>) -> Option<Metric> {
        let slacks = self.slacks(x)?;
        let w = self.weights(&slacks)?;
        let mut scaled = self.a.clone();
        for (i, mut row) in scaled.row_iter_mut().enumerate() {
            row *= w[i].sqrt() / slacks[i];
        }
        let hessian = scaled.transpose() * scaled;
        let chol = Cholesky::new(hessian.clone())?;
        let log_det = 2.0 * chol.l_dirty().diagonal().iter().map(|v| v.ln()).sum::<f64>();
        Some(Metric {
            hessian,
            chol,
            log_det,
        })
    }

    /// `log q(from -> to)` up to a constant shared by all proposals.
    fn log_proposal_density(&self, metric: &Metric, from: &DVector<f64>, to: &DVector<f64>) -> f64 {
        let c = self.kind.scale(self.a.ncols(), self.a.nrows());
        let diff = to - from;
        0.5 * metric.log_det
            - c / (2.0 * self.radius * self.radius) * diff.dot(&(&metric.hessian * &diff))
    }
}

impl RandomWalk for BarrierWalk {
    fn step<B, R>(&mut self, _body: &B, _target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        // The metric at the current point cannot be factorised.
        let failure = || SamplingError::ConvergenceFailure {
            walk: self.name(),
            budget: 1,
        };
        let here = self.metric(&self.point).ok_or_else(failure)?;
        let dim = self.point.len();
        let c = self.kind.scale(dim, self.a.nrows());

        // y = x + (r / sqrt(c)) L^{-T} z has covariance (r^2 / c) H^{-1} for H = L L^T.
        let z = rng.standard_normal_vector(dim);
        let u = rng.uniform_real(0.0, 1.0);
        let offset = here
            .chol
            .l()
            .transpose()
            .solve_upper_triangular(&z)
            .ok_or_else(failure)?;
        let y = &self.point + offset * (self.radius / c.sqrt());

        // Proposals outside the body are rejected.
        let Some(there) = self.metric(&y) else {
            return Ok(());
        };
        let log_accept = self.log_proposal_density(&there, &y, &self.point)
            - self.log_proposal_density(&here, &self.point, &y);
        if u.ln() < log_accept {
            self.point = y;
        }
        Ok(())
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::HPolytope;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn walk(kind: BarrierKind, body: &HPolytope) -> BarrierWalk {
        BarrierWalk::new(
            body.inner_ball().center.clone(),
            kind,
            kind.default_radius(),
            body.a(),
            body.b(),
        )
    }

    #[test]
    fn dikin_metric_at_cube_centre() {
        let cube = HPolytope::cube(2, 1.0);
        let w = walk(BarrierKind::Dikin, &cube);
        let metric = w.metric(&DVector::zeros(2)).unwrap();
        // Two facets per axis, each at slack 1.
        assert_abs_diff_eq!(metric.hessian[(0, 0)], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metric.hessian[(0, 1)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metric.log_det, 4f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn leverage_scores_sum_to_dimension() {
        let simplex = HPolytope::simplex(3);
        let w = walk(BarrierKind::Vaidya, &simplex);
        let x = simplex.inner_ball().center.clone();
        let s = w.slacks(&x).unwrap();
        let sigma = w.leverage(&s, &DVector::from_element(4, 1.0)).unwrap();
        assert_abs_diff_eq!(sigma.sum(), 3.0, epsilon = 1e-10);
    }

    #[test]
    fn metric_rejects_boundary_points() {
        let cube = HPolytope::cube(2, 1.0);
        let w = walk(BarrierKind::John, &cube);
        assert!(w.metric(&DVector::from_vec(vec![1.0, 0.0])).is_none());
    }

    #[test]
    fn degenerate_metric_fails_and_keeps_point() {
        // A slab in the plane: the second coordinate is unconstrained.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, -1.0, 0.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let start = DVector::from_vec(vec![0.2, 3.0]);
        let mut w = BarrierWalk::new(start.clone(), BarrierKind::Dikin, 0.75, &a, &b);
        assert!(w.metric(&start).is_none());
        let slab = HPolytope::cube(2, 5.0);
        let mut rng = SmallRng::seed_from_u64(3);
        let err = w.step(&slab, &TargetDistribution::Uniform, &mut rng)
            .unwrap_err();
        assert_eq!(
            err,
            SamplingError::ConvergenceFailure {
                walk: "Dikin",
                budget: 1
            }
        );
        assert_eq!(w.current_point(), &start);
    }

    #[test]
    fn every_barrier_walk_samples_uniform_cube() {
        let cube = HPolytope::cube(2, 1.0);
        for kind in [BarrierKind::Dikin, BarrierKind::Vaidya, BarrierKind::John] {
            let mut w = walk(kind, &cube);
            let mut rng = SmallRng::seed_from_u64(101);
            let n = 20_000;
            let mut sum = DVector::zeros(2);
            for _ in 0..n {
                w.step(&cube, &TargetDistribution::Uniform, &mut rng).unwrap();
                assert!(cube.is_feasible(w.current_point()));
                sum += w.current_point();
            }
            let mean = sum / n as f64;
            assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.1);
            assert_abs_diff_eq!(mean[1], 0.0, epsilon = 0.1);
        }
    }
}
