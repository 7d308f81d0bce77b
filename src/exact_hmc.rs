/*!
Hamiltonian walks whose trajectories are solved in closed form.

For a Gaussian potential the motion is harmonic and for an exponential potential it is a
parabola, so the time of the next facet hit is the root of a trigonometric or quadratic
equation. The particle reflects off the facet it hits and keeps going until the travel
time is used up. No Metropolis correction is needed: the flow is exact.

Gaussian targets are first whitened, `y = L^T (x - mode)`, after which the potential is
`|y|^2 / 2` and the trajectory is `y(t) = y0 cos t + w0 sin t`. The constraints are
carried into whitened space as `(A T) y <= b - A mode` with `T = L^{-T}`.
*/

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{DMatrix, DVector};

use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

/// Default travel time for the whitened Gaussian: a quarter period, where an
/// unconstrained trajectory lands on an independent draw.
pub const GAUSSIAN_TRAVEL_TIME: f64 = FRAC_PI_2;

pub const EXPONENTIAL_TRAVEL_TIME: f64 = 1.0;

/// Roots closer than this to zero on the facet just reflected off are the reflection
/// point itself.
const REFLECTION_EPS: f64 = 1e-10;

/**
Position and velocity after time `t` under the constant `force`, ignoring the boundary.

# Examples

```rust
use convex_walks::exact_hmc::parabolic_trajectory;
use nalgebra::DVector;

let x0 = DVector::from_vec(vec![0.0, 1.0]);
let v0 = DVector::from_vec(vec![1.0, 0.0]);
let force = DVector::from_vec(vec![0.0, -2.0]);
let (x, v) = parabolic_trajectory(&x0, &v0, &force, 0.5);
assert!((x[0] - 0.5).abs() < 1e-12);
assert!((x[1] - 0.75).abs() < 1e-12);
assert!((v[1] + 1.0).abs() < 1e-12);
```
*/
pub fn parabolic_trajectory(
    x0: &DVector<f64>,
    v0: &DVector<f64>,
    force: &DVector<f64>,
    t: f64,
) -> (DVector<f64>, DVector<f64>) {
    let x = x0 + v0 * t + force * (0.5 * t * t);
    let v = v0 + force * t;
    (x, v)
}

/// First time `p cos t + q sin t` rises through `bound`, if ever.
fn harmonic_hit_time(p: f64, q: f64, bound: f64, just_hit: bool) -> Option<f64> {
    let amplitude = p.hypot(q);
    if amplitude <= bound {
        return None;
    }
    let psi = (bound / amplitude).clamp(-1.0, 1.0).acos();
    let phi = q.atan2(p);
    let t = (phi - psi).rem_euclid(TAU);
    if just_hit && t < REFLECTION_EPS {
        None
    } else {
        Some(t)
    }
}

/// Smallest positive root of `alpha t^2 + beta t + gamma = 0`, skipping roots at the
/// reflection point.
fn parabolic_hit_time(alpha: f64, beta: f64, gamma: f64, just_hit: bool) -> Option<f64> {
    let floor = if just_hit { REFLECTION_EPS } else { 0.0 };
    let admissible = |t: f64| (t.is_finite() && t > floor).then_some(t);
    if alpha == 0.0 {
        return if beta > 0.0 { admissible(-gamma / beta) } else { None };
    }
    let disc = beta * beta - 4.0 * alpha * gamma;
    if disc < 0.0 {
        return None;
    }
    let q = -0.5 * (beta + beta.signum() * disc.sqrt());
    let r1 = admissible(q / alpha);
    let r2 = if q != 0.0 { admissible(gamma / q) } else { None };
    match (r1, r2) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Exact reflective HMC for spherical and general Gaussian targets.
///
/// The plain variant recomputes `A T w` after every bounce; the accelerated one updates
/// it in O(m) with the Gram matrix of the whitened constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianExactWalk {
    point: DVector<f64>,
    /// Whitened position.
    y: DVector<f64>,
    mode: DVector<f64>,
    /// `T` with `x = mode + T y`.
    unwhiten: DMatrix<f64>,
    a: DMatrix<f64>,
    b: DVector<f64>,
    gram: Option<DMatrix<f64>>,
    travel_time: f64,
    max_reflections: usize,
}

impl GaussianExactWalk {
    pub fn new(
        start: DVector<f64>,
        target: &TargetDistribution,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        travel_time: f64,
        max_reflections: usize,
        accelerated: bool,
    ) -> Result<Self> {
        let (mode, unwhiten) = match target {
            TargetDistribution::SphericalGaussian(g) => (
                g.mode.clone(),
                DMatrix::identity(start.len(), start.len()) * g.variance.sqrt(),
            ),
            TargetDistribution::GeneralGaussian(g) => {
                let t = g
                    .whitening()
                    .transpose()
                    .solve_upper_triangular(&DMatrix::identity(start.len(), start.len()))
                    .ok_or_else(|| {
                        SamplingError::InvalidParameter("singular whitening factor".into())
                    })?;
                (g.mode().clone(), t)
            }
            other => {
                return Err(SamplingError::IncompatibleConfiguration {
                    walk: "exact Gaussian HMC",
                    distribution: other.kind().name(),
                    reason: "needs a Gaussian target",
                })
            }
        };
        let y = match target {
            TargetDistribution::GeneralGaussian(g) => g.whitening().transpose() * (&start - &mode),
            _ => (&start - &mode) / unwhiten[(0, 0)],
        };
        let a_white = a * &unwhiten;
        let b_white = b - a * &mode;
        let gram = accelerated.then(|| &a_white * a_white.transpose());
        Ok(Self {
            point: start,
            y,
            mode,
            unwhiten,
            a: a_white,
            b: b_white,
            gram,
            travel_time,
            max_reflections,
        })
    }
}

impl RandomWalk for GaussianExactWalk {
    fn step<B, R>(&mut self, _body: &B, _target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let mut y = self.y.clone();
        let mut w = rng.standard_normal_vector(y.len());
        let mut ay = &self.a * &y;
        let mut aw = &self.a * &w;
        let mut remaining = self.travel_time;
        let mut last = None;

        for _ in 0..=self.max_reflections {
            let hit = (0..self.b.len())
                .filter_map(|i| {
                    harmonic_hit_time(ay[i], aw[i], self.b[i], last == Some(i)).map(|t| (t, i))
                })
                .min_by(|l, r| l.0.total_cmp(&r.0));
            let t = match hit {
                Some((t, _)) if t < remaining => t,
                _ => remaining,
            };
            let (s, c) = t.sin_cos();
            let y_next = &y * c + &w * s;
            w = &w * c - &y * s;
            y = y_next;
            let ay_next = &ay * c + &aw * s;
            aw = &aw * c - &ay * s;
            ay = ay_next;

            match hit {
                Some((t_hit, facet)) if t_hit < remaining => {
                    remaining -= t_hit;
                    let row = self.a.row(facet).transpose();
                    let coeff = 2.0 * aw[facet] / row.norm_squared();
                    w.axpy(-coeff, &row, 1.0);
                    match &self.gram {
                        Some(gram) => aw.axpy(-coeff, &gram.column(facet), 1.0),
                        None => aw = &self.a * &w,
                    }
                    last = Some(facet);
                }
                _ => {
                    self.point = &self.mode + &self.unwhiten * &y;
                    self.y = y;
                    return Ok(());
                }
            }
        }
        Err(SamplingError::ConvergenceFailure {
            walk: self.name(),
            budget: self.max_reflections,
        })
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        if self.gram.is_some() {
            "Gaussian accelerated billiard"
        } else {
            "exact Gaussian HMC"
        }
    }
}

/// Exact reflective HMC for the exponential target: constant force, parabolic flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialExactWalk {
    point: DVector<f64>,
    force: DVector<f64>,
    a: DMatrix<f64>,
    b: DVector<f64>,
    /// `A F`, constant over the run.
    a_force: DVector<f64>,
    travel_time: f64,
    max_reflections: usize,
}

impl ExponentialExactWalk {
    pub fn new(
        start: DVector<f64>,
        target: &TargetDistribution,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        travel_time: f64,
        max_reflections: usize,
    ) -> Result<Self> {
        let TargetDistribution::Exponential(e) = target else {
            return Err(SamplingError::IncompatibleConfiguration {
                walk: "exact exponential HMC",
                distribution: target.kind().name(),
                reason: "needs an exponential target",
            });
        };
        let force = e.force();
        Ok(Self {
            point: start,
            a_force: a * &force,
            force,
            a: a.clone(),
            b: b.clone(),
            travel_time,
            max_reflections,
        })
    }

    /// Flies from `x` with velocity `v` for `time`, reflecting at facets.
    /// `None` when more than `max_reflections` bounces would be needed.
    pub fn flight(&self, x: &DVector<f64>, v: &DVector<f64>, time: f64) -> Option<DVector<f64>> {
        let mut x = x.clone();
        let mut v = v.clone();
        let mut ax = &self.a * &x;
        let mut av = &self.a * &v;
        let mut remaining = time;
        let mut last = None;
        for _ in 0..=self.max_reflections {
            let hit = (0..self.b.len())
                .filter_map(|i| {
                    parabolic_hit_time(
                        0.5 * self.a_force[i],
                        av[i],
                        ax[i] - self.b[i],
                        last == Some(i),
                    )
                    .map(|t| (t, i))
                })
                .min_by(|l, r| l.0.total_cmp(&r.0));
            match hit {
                Some((t, facet)) if t < remaining => {
                    (x, v) = parabolic_trajectory(&x, &v, &self.force, t);
                    ax += &av * t + &self.a_force * (0.5 * t * t);
                    remaining -= t;
                    let row = self.a.row(facet).transpose();
                    let coeff = 2.0 * row.dot(&v) / row.norm_squared();
                    v.axpy(-coeff, &row, 1.0);
                    av = &self.a * &v;
                    last = Some(facet);
                }
                _ => {
                    return Some(parabolic_trajectory(&x, &v, &self.force, remaining).0);
                }
            }
        }
        None
    }
}

impl RandomWalk for ExponentialExactWalk {
    fn step<B, R>(&mut self, _body: &B, _target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let v = rng.standard_normal_vector(self.point.len());
        match self.flight(&self.point, &v, self.travel_time) {
            Some(x) => {
                self.point = x;
                Ok(())
            }
            None => Err(SamplingError::ConvergenceFailure {
                walk: self.name(),
                budget: self.max_reflections,
            }),
        }
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "exact exponential HMC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Exponential, GeneralGaussian, SphericalGaussian};
    use crate::geometry::HPolytope;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn harmonic_hit_on_unit_circle() {
        // sin t first reaches 0.5 at pi / 6.
        let t = harmonic_hit_time(0.0, 1.0, 0.5, false).unwrap();
        assert_abs_diff_eq!(t, std::f64::consts::FRAC_PI_6, epsilon = 1e-12);
        assert!(harmonic_hit_time(0.1, 0.1, 0.5, false).is_none());
    }

    #[test]
    fn parabolic_hit_roots() {
        // t^2 - 1 = 0.
        assert_abs_diff_eq!(
            parabolic_hit_time(1.0, 0.0, -1.0, false).unwrap(),
            1.0,
            epsilon = 1e-12
        );
        // Linear: 2 t - 1 = 0.
        assert_abs_diff_eq!(
            parabolic_hit_time(0.0, 2.0, -1.0, false).unwrap(),
            0.5,
            epsilon = 1e-12
        );
        // Moving away with no pull back.
        assert!(parabolic_hit_time(0.0, -1.0, -1.0, false).is_none());
        // On the facet, moving inward, pulled back out: root at 0 is skipped.
        assert_abs_diff_eq!(
            parabolic_hit_time(1.0, -2.0, 0.0, true).unwrap(),
            2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn exponential_free_flight_matches_closed_form() {
        let cube = HPolytope::cube(3, 100.0);
        let direction = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let rate = 1.5;
        let target = TargetDistribution::from(Exponential::new(direction.clone(), rate).unwrap());
        let walk =
            ExponentialExactWalk::new(DVector::zeros(3), &target, cube.a(), cube.b(), 1.0, 10)
                .unwrap();
        let x0 = DVector::from_vec(vec![0.5, 0.25, -1.0]);
        let v0 = DVector::from_vec(vec![-1.0, 0.3, 2.0]);
        let t = 0.8;
        let x = walk.flight(&x0, &v0, t).unwrap();
        let expected = &x0 + &v0 * t - &direction * (rate / 2.0 * t * t);
        for i in 0..3 {
            assert_abs_diff_eq!(x[i], expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn exponential_flight_reflects_off_floor() {
        // Drop from height 1 onto x = -1 under unit force, zero initial velocity. Falling 2
        // takes t = 2, then the ball bounces back up elastically.
        let cube = HPolytope::cube(1, 1.0);
        let target = TargetDistribution::from(
            Exponential::new(DVector::from_vec(vec![1.0]), 1.0).unwrap(),
        );
        let walk =
            ExponentialExactWalk::new(DVector::zeros(1), &target, cube.a(), cube.b(), 1.0, 10)
                .unwrap();
        let x = walk
            .flight(&DVector::from_vec(vec![1.0]), &DVector::zeros(1), 3.0)
            .unwrap();
        // After the bounce at t = 2 with speed 2, one more unit of time: -1 + 2 - 0.5.
        assert_abs_diff_eq!(x[0], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn exponential_exact_mean() {
        let cube = HPolytope::cube(2, 1.0);
        let target = TargetDistribution::from(
            Exponential::new(DVector::from_vec(vec![1.0, 0.0]), 3.0).unwrap(),
        );
        let mut walk =
            ExponentialExactWalk::new(DVector::zeros(2), &target, cube.a(), cube.b(), 1.0, 200)
                .unwrap();
        let mut rng = SmallRng::seed_from_u64(77);
        let n = 10_000;
        let mut sum = DVector::zeros(2);
        for _ in 0..n {
            walk.step(&cube, &target, &mut rng).unwrap();
            assert!(cube.is_feasible(walk.current_point()));
            sum += walk.current_point();
        }
        let mean = sum / n as f64;
        assert_abs_diff_eq!(mean[0], -0.672, epsilon = 0.05);
        assert_abs_diff_eq!(mean[1], 0.0, epsilon = 0.05);
    }

    #[test]
    fn truncated_standard_gaussian_variance() {
        let cube = HPolytope::cube(2, 1.0);
        let target = TargetDistribution::from(SphericalGaussian::standard(2));
        for accelerated in [false, true] {
            let mut walk = GaussianExactWalk::new(
                DVector::zeros(2),
                &target,
                cube.a(),
                cube.b(),
                GAUSSIAN_TRAVEL_TIME,
                200,
                accelerated,
            )
            .unwrap();
            let mut rng = SmallRng::seed_from_u64(5);
            let n = 10_000;
            let mut sum_sq = 0.0;
            for _ in 0..n {
                walk.step(&cube, &target, &mut rng).unwrap();
                sum_sq += walk.current_point()[0].powi(2);
            }
            // Variance of N(0, 1) truncated to [-1, 1].
            assert_abs_diff_eq!(sum_sq / n as f64, 0.2911, epsilon = 0.03);
        }
    }

    #[test]
    fn correlated_gaussian_covariance() {
        let cube = HPolytope::cube(2, 50.0);
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]);
        let target =
            TargetDistribution::from(GeneralGaussian::new(DVector::zeros(2), cov).unwrap());
        let mut walk = GaussianExactWalk::new(
            DVector::zeros(2),
            &target,
            cube.a(),
            cube.b(),
            GAUSSIAN_TRAVEL_TIME,
            50,
            true,
        )
        .unwrap();
        let mut rng = SmallRng::seed_from_u64(12);
        let n = 10_000;
        let mut cross = 0.0;
        for _ in 0..n {
            walk.step(&cube, &target, &mut rng).unwrap();
            cross += walk.current_point()[0] * walk.current_point()[1];
        }
        assert_abs_diff_eq!(cross / n as f64, 0.8, epsilon = 0.05);
    }
}
