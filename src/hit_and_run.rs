//! Hit-and-run: pick a line through the current point, move to a point of the chord
//! drawn from the target restricted to that line.
//!
//! The coordinate-directions variant (CDHR) uses a random axis, the random-directions
//! variant (RDHR) a direction uniform on the sphere. The one-dimensional law along the
//! chord is exact for every target with a closed form (see
//! [`TargetDistribution::chord_law`]).

use nalgebra::DVector;

use crate::core::RandomWalk;
use crate::distributions::{TargetDistribution, MAX_CHORD_ATTEMPTS};
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionRule {
    Coordinate,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitAndRunWalk {
    point: DVector<f64>,
    rule: DirectionRule,
}

impl HitAndRunWalk {
    pub fn new(start: DVector<f64>, rule: DirectionRule) -> Self {
        Self { point: start, rule }
    }

    pub fn rule(&self) -> DirectionRule {
        self.rule
    }

    fn direction<R: RandomSource + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let dim = self.point.len();
        match self.rule {
            DirectionRule::Coordinate => {
                let mut e = DVector::zeros(dim);
                e[rng.uniform_int(0, dim)] = 1.0;
                e
            }
            DirectionRule::Random => rng.unit_direction(dim),
        }
    }
}

impl RandomWalk for HitAndRunWalk {
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let theta = self.direction(rng);
        let hit = body.ray_intersection(&self.point, &theta)?;
        let law = target.chord_law(&self.point, &theta).ok_or(
            SamplingError::IncompatibleConfiguration {
                walk: self.name(),
                distribution: target.kind().name(),
                reason: "no closed-form law along a chord",
            },
        )?;
        let t = law
            .sample(-hit.backward, hit.forward, rng)
            .ok_or(SamplingError::ConvergenceFailure {
                walk: self.name(),
                budget: MAX_CHORD_ATTEMPTS,
            })?;
        self.point.axpy(t, &theta, 1.0);
        Ok(())
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        match self.rule {
            DirectionRule::Coordinate => "coordinate hit-and-run",
            DirectionRule::Random => "random-direction hit-and-run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Exponential, SphericalGaussian};
    use crate::geometry::HPolytope;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn coordinate_step_changes_one_coordinate() {
        let cube = HPolytope::cube(4, 1.0);
        let mut walk = HitAndRunWalk::new(DVector::zeros(4), DirectionRule::Coordinate);
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..50 {
            let before = walk.current_point().clone();
            walk.step(&cube, &TargetDistribution::Uniform, &mut rng)
                .unwrap();
            let changed = (walk.current_point() - &before)
                .iter()
                .filter(|d| **d != 0.0)
                .count();
            assert!(changed <= 1);
            assert!(cube.is_feasible(walk.current_point()));
        }
    }

    #[test]
    fn rdhr_gaussian_mean_near_mode() {
        let cube = HPolytope::cube(2, 5.0);
        let mode = DVector::from_vec(vec![0.5, -0.5]);
        let target = TargetDistribution::from(SphericalGaussian::new(mode, 0.25).unwrap());
        let mut walk = HitAndRunWalk::new(DVector::zeros(2), DirectionRule::Random);
        let mut rng = SmallRng::seed_from_u64(17);
        let n = 5000;
        let mut sum = DVector::zeros(2);
        for _ in 0..n {
            walk.step(&cube, &target, &mut rng).unwrap();
            sum += walk.current_point();
        }
        let mean = sum / n as f64;
        assert_abs_diff_eq!(mean[0], 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], -0.5, epsilon = 0.1);
    }

    #[test]
    fn exponential_target_leans_against_force() {
        // Density exp(-3 x_0) on the unit cube piles up at x_0 = -1.
        let cube = HPolytope::cube(2, 1.0);
        let target = TargetDistribution::from(
            Exponential::new(DVector::from_vec(vec![1.0, 0.0]), 3.0).unwrap(),
        );
        let mut walk = HitAndRunWalk::new(DVector::zeros(2), DirectionRule::Coordinate);
        let mut rng = SmallRng::seed_from_u64(23);
        let n = 5000;
        let mean: f64 = (0..n)
            .map(|_| {
                walk.step(&cube, &target, &mut rng).unwrap();
                walk.current_point()[0]
            })
            .sum::<f64>()
            / n as f64;
        // E[x] = 1/3 - 2 e^{-6} / (1 - e^{-6}) - 1, about -0.67.
        assert!(mean < -0.5, "mean {mean}");
    }
}
