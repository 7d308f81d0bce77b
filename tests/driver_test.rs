//! Error reporting and failure handling of the sampling driver.

use convex_walks::core::{sample_points, FailurePolicy, SamplingDriver};
use convex_walks::distributions::{SphericalGaussian, TargetDistribution};
use convex_walks::error::SamplingError;
use convex_walks::geometry::HPolytope;
use convex_walks::kernel::{BilliardParams, HmcParams, WalkConfig, WalkKernel};
use convex_walks::sink::ColumnSink;
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor() -> HPolytope {
        HPolytope::boxed(&[-1.0, -1e-3], &[1.0, 1e-3]).unwrap()
    }

    #[test]
    fn billiard_exhausting_reflections_aborts() {
        let body = corridor();
        let config = WalkConfig::Billiard(
            BilliardParams::default()
                .with_trajectory_length(50.0)
                .with_max_reflections(2),
        );
        let mut rng = SmallRng::seed_from_u64(1);
        let mut sink = ColumnSink::new(2, 10);
        let err = sample_points(
            &body,
            None,
            &config,
            &TargetDistribution::Uniform,
            &mut rng,
            1,
            10,
            0,
            &mut sink,
        )
        .unwrap_err();
        assert!(matches!(err, SamplingError::ConvergenceFailure { budget: 2, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn flagged_failures_keep_the_run_going() {
        let body = corridor();
        let target = TargetDistribution::Uniform;
        let config = WalkConfig::Billiard(
            BilliardParams::default()
                .with_trajectory_length(50.0)
                .with_max_reflections(2),
        );
        let mut walk = WalkKernel::new(&config, &body, &target, None).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut sink = ColumnSink::new(2, 20);
        let report = SamplingDriver::new(1, 20, 0)
            .with_failure_policy(FailurePolicy::Flag)
            .run(&body, &mut walk, &target, &mut rng, &mut sink)
            .unwrap();
        assert_eq!(report.steps, 20);
        assert!(report.failures > 0);
        assert_eq!(report.unreliable.len(), report.failures);
        assert!(sink.is_full());
    }

    #[test]
    fn sink_overflow_is_reported() {
        let square = HPolytope::cube(2, 1.0);
        let mut rng = SmallRng::seed_from_u64(2);
        let mut sink = ColumnSink::new(2, 5);
        let err = sample_points(
            &square,
            None,
            &WalkConfig::Cdhr,
            &TargetDistribution::Uniform,
            &mut rng,
            1,
            6,
            0,
            &mut sink,
        )
        .unwrap_err();
        assert!(matches!(err, SamplingError::CapacityExceeded { capacity: 5 }));
    }

    #[test]
    fn incompatible_and_invalid_configurations() {
        let square = HPolytope::cube(2, 1.0);
        let gaussian = TargetDistribution::from(SphericalGaussian::standard(2));

        let billiard = WalkConfig::Billiard(BilliardParams::default());
        let err = WalkKernel::new(&billiard, &square, &gaussian, None).unwrap_err();
        assert!(matches!(err, SamplingError::IncompatibleConfiguration { .. }));

        let err = WalkKernel::new(
            &WalkConfig::Hmc(HmcParams::default()),
            &square,
            &TargetDistribution::Uniform,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SamplingError::IncompatibleConfiguration { .. }));

        let outside = DVector::from_vec(vec![2.0, 0.0]);
        let err =
            WalkKernel::new(&WalkConfig::Cdhr, &square, &gaussian, Some(outside)).unwrap_err();
        assert!(matches!(err, SamplingError::InfeasibleStart));

        let wrong = TargetDistribution::from(SphericalGaussian::standard(3));
        let err = WalkKernel::new(&WalkConfig::Cdhr, &square, &wrong, None).unwrap_err();
        assert!(matches!(
            err,
            SamplingError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));

        let err = WalkKernel::new(
            &WalkConfig::Hmc(HmcParams::default().with_step_size(-1.0)),
            &square,
            &gaussian,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SamplingError::InvalidParameter(_)));
    }
}
