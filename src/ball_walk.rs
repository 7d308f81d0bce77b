//! Ball walk: propose a point uniformly from a ball around the current one.
//!
//! Infeasible proposals are retried up to `max_attempts` times, after which the step
//! leaves the point where it is. For a non-uniform target a feasible proposal is accepted
//! with the Metropolis probability `min(1, p(y) / p(x))`.

use nalgebra::DVector;

use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::Result;
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

#[derive(Debug, Clone, PartialEq)]
pub struct BallWalk {
    point: DVector<f64>,
    radius: f64,
    max_attempts: usize,
}

impl BallWalk {
    pub fn new(start: DVector<f64>, radius: f64, max_attempts: usize) -> Self {
        Self {
            point: start,
            radius,
            max_attempts,
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Uniform point of the ball of `self.radius` around the current point.
    fn propose<R: RandomSource + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let dim = self.point.len();
        let direction = rng.unit_direction(dim);
        let r = self.radius * rng.uniform_real(0.0, 1.0).powf(1.0 / dim as f64);
        &self.point + direction * r
    }
}

impl RandomWalk for BallWalk {
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        for _ in 0..self.max_attempts {
            let y = self.propose(rng);
            if !body.is_feasible(&y) {
                continue;
            }
            let accept = match target {
                TargetDistribution::Uniform => true,
                _ => {
                    let log_ratio = target.log_density(&y) - target.log_density(&self.point);
                    rng.uniform_real(0.0, 1.0).ln() < log_ratio
                }
            };
            if accept {
                self.point = y;
            }
            return Ok(());
        }
        Ok(())
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "ball"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::LogConcave;
    use crate::geometry::HPolytope;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn proposals_stay_within_radius() {
        let walk = BallWalk::new(DVector::zeros(3), 0.3, 1);
        let mut rng = SmallRng::seed_from_u64(2);
        for _ in 0..200 {
            assert!(walk.propose(&mut rng).norm() <= 0.3 + 1e-12);
        }
    }

    #[test]
    fn exhausted_attempts_leave_point() {
        // Start in a corner with a radius much larger than the body: almost every proposal
        // lands outside.
        let cube = HPolytope::cube(5, 0.01);
        let start = DVector::from_element(5, 0.01);
        let mut walk = BallWalk::new(start.clone(), 10.0, 1);
        let mut rng = SmallRng::seed_from_u64(8);
        walk.step(&cube, &TargetDistribution::Uniform, &mut rng)
            .unwrap();
        assert_eq!(walk.current_point(), &start);
    }

    #[test]
    fn log_concave_mean() {
        // Potential |x - 0.3|^2 / 2 per coordinate, essentially untruncated by the cube.
        let shift = DVector::from_element(2, 0.3);
        let s1 = shift.clone();
        let target = TargetDistribution::from(LogConcave::from_fns(
            move |x: &DVector<f64>| 0.5 * (x - &shift).norm_squared(),
            move |x: &DVector<f64>| x - &s1,
            1.0,
            1.0,
        ));
        let cube = HPolytope::cube(2, 6.0);
        let mut walk = BallWalk::new(DVector::zeros(2), 1.0, 1);
        let mut rng = SmallRng::seed_from_u64(31);
        let n = 20_000;
        let mut sum = DVector::zeros(2);
        for _ in 0..n {
            walk.step(&cube, &target, &mut rng).unwrap();
            sum += walk.current_point();
        }
        let mean = sum / n as f64;
        assert_abs_diff_eq!(mean[0], 0.3, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], 0.3, epsilon = 0.1);
    }
}
