/*!
Walk selection: per-variant parameters, the walk/target compatibility table and the
[`WalkKernel`] sum type the driver runs.

| Walk | Uniform | Spherical Gaussian | General Gaussian | Exponential | Log-concave |
|---|---|---|---|---|---|
| CDHR, RDHR | yes | yes | yes | yes | no |
| Ball | yes | yes | yes | yes | yes |
| Billiard, accelerated billiard | yes | no | no | no | no |
| Dikin, Vaidya, John | yes | no | no | no | no |
| Exact Gaussian HMC | no | yes | no | no | no |
| Gaussian accelerated billiard | no | yes | yes | no | no |
| Exact exponential HMC | no | no | no | yes | no |
| HMC, NUTS | no | yes | yes | yes | yes |

# Examples

```rust
use convex_walks::distributions::TargetDistribution;
use convex_walks::error::SamplingError;
use convex_walks::geometry::HPolytope;
use convex_walks::kernel::{BilliardParams, WalkConfig, WalkKernel};

let cube = HPolytope::cube(2, 1.0);
let config = WalkConfig::Billiard(BilliardParams::default().with_max_reflections(50));
assert!(WalkKernel::new(&config, &cube, &TargetDistribution::Uniform, None).is_ok());

let err = WalkKernel::new(
    &WalkConfig::Hmc(Default::default()),
    &cube,
    &TargetDistribution::Uniform,
    None,
)
.unwrap_err();
assert!(matches!(err, SamplingError::IncompatibleConfiguration { .. }));
```
*/

use log::debug;
use nalgebra::DVector;

use crate::ball_walk::BallWalk;
use crate::barrier::{BarrierKind, BarrierWalk};
use crate::billiard::{AcceleratedBilliardWalk, BilliardWalk};
use crate::core::RandomWalk;
use crate::distributions::{DistributionKind, TargetDistribution};
use crate::error::{Result, SamplingError};
use crate::exact_hmc::{
    ExponentialExactWalk, GaussianExactWalk, EXPONENTIAL_TRAVEL_TIME, GAUSSIAN_TRAVEL_TIME,
};
use crate::geometry::{ConvexBody, LinearConstraints};
use crate::hit_and_run::{DirectionRule, HitAndRunWalk};
use crate::hmc::{default_step_size, HamiltonianWalk};
use crate::nuts::NutsWalk;
use crate::random::RandomSource;

/// Reflections allowed per step and dimension when no cap is given.
const REFLECTIONS_PER_DIMENSION: usize = 100;

fn default_reflections(dim: usize) -> usize {
    REFLECTIONS_PER_DIMENSION * dim.max(1)
}

fn check_positive(name: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(v > 0.0 && v.is_finite()) => Err(SamplingError::InvalidParameter(format!(
            "{name} must be positive and finite, got {v}"
        ))),
        _ => Ok(()),
    }
}

/// Ball walk parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BallParams {
    /// Proposal radius; defaults to `4 r / d` for inner radius `r`.
    pub radius: Option<f64>,
    /// Proposals tried per step before giving up and staying put.
    pub max_attempts: usize,
}

impl Default for BallParams {
    fn default() -> Self {
        Self {
            radius: None,
            max_attempts: 1,
        }
    }
}

impl BallParams {
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Billiard walk parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BilliardParams {
    /// Mean flight length; defaults to the body's diameter hint.
    pub trajectory_length: Option<f64>,
    /// Bounces per step; defaults to `100 d`.
    pub max_reflections: Option<usize>,
}

impl BilliardParams {
    pub fn with_trajectory_length(mut self, length: f64) -> Self {
        self.trajectory_length = Some(length);
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: usize) -> Self {
        self.max_reflections = Some(max_reflections);
        self
    }
}

/// Barrier walk parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BarrierParams {
    /// Radius of the proposal ellipsoid; defaults to 0.75 (Dikin) or 0.5 (Vaidya, John).
    pub radius: Option<f64>,
}

impl BarrierParams {
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }
}

/// Parameters of the closed-form Hamiltonian walks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExactHmcParams {
    /// Time each trajectory runs; defaults to pi/2 (Gaussian, whitened time) or 1
    /// (exponential).
    pub travel_time: Option<f64>,
    /// Bounces per step; defaults to `100 d`.
    pub max_reflections: Option<usize>,
}

impl ExactHmcParams {
    pub fn with_travel_time(mut self, travel_time: f64) -> Self {
        self.travel_time = Some(travel_time);
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: usize) -> Self {
        self.max_reflections = Some(max_reflections);
        self
    }
}

/// Reflective HMC parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HmcParams {
    /// Leapfrog step; defaults to `r / d` capped by `1 / sqrt(L)`.
    pub step_size: Option<f64>,
    pub n_leapfrog: usize,
    /// Bounces per leapfrog step; defaults to `100 d`.
    pub max_reflections: Option<usize>,
}

impl Default for HmcParams {
    fn default() -> Self {
        Self {
            step_size: None,
            n_leapfrog: 10,
            max_reflections: None,
        }
    }
}

impl HmcParams {
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = Some(step_size);
        self
    }

    pub fn with_n_leapfrog(mut self, n_leapfrog: usize) -> Self {
        self.n_leapfrog = n_leapfrog;
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: usize) -> Self {
        self.max_reflections = Some(max_reflections);
        self
    }
}

/// NUTS parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NutsParams {
    /// Starting step size; searched for on the first step when absent.
    pub step_size: Option<f64>,
    pub max_tree_depth: usize,
    /// Steps during which the step size is tuned by dual averaging.
    pub adapt_steps: usize,
    /// Acceptance statistic the tuning aims for, in `(0, 1)`.
    pub target_accept: f64,
    /// Bounces per leapfrog step; defaults to `100 d`.
    pub max_reflections: Option<usize>,
}

impl Default for NutsParams {
    fn default() -> Self {
        Self {
            step_size: None,
            max_tree_depth: 10,
            adapt_steps: 100,
            target_accept: 0.8,
            max_reflections: None,
        }
    }
}

impl NutsParams {
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = Some(step_size);
        self
    }

    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    pub fn with_adapt_steps(mut self, adapt_steps: usize) -> Self {
        self.adapt_steps = adapt_steps;
        self
    }

    pub fn with_target_accept(mut self, target_accept: f64) -> Self {
        self.target_accept = target_accept;
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: usize) -> Self {
        self.max_reflections = Some(max_reflections);
        self
    }
}

/// Which walk to build, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkConfig {
    Cdhr,
    Rdhr,
    Ball(BallParams),
    Billiard(BilliardParams),
    AcceleratedBilliard(BilliardParams),
    Dikin(BarrierParams),
    Vaidya(BarrierParams),
    John(BarrierParams),
    GaussianHmcExact(ExactHmcParams),
    GaussianAcceleratedBilliard(ExactHmcParams),
    ExponentialHmcExact(ExactHmcParams),
    Hmc(HmcParams),
    Nuts(NutsParams),
}

impl WalkConfig {
    pub fn name(&self) -> &'static str {
        match self {
            WalkConfig::Cdhr => "coordinate hit-and-run",
            WalkConfig::Rdhr => "random-direction hit-and-run",
            WalkConfig::Ball(_) => "ball",
            WalkConfig::Billiard(_) => "billiard",
            WalkConfig::AcceleratedBilliard(_) => "accelerated billiard",
            WalkConfig::Dikin(_) => "Dikin",
            WalkConfig::Vaidya(_) => "Vaidya",
            WalkConfig::John(_) => "John",
            WalkConfig::GaussianHmcExact(_) => "exact Gaussian HMC",
            WalkConfig::GaussianAcceleratedBilliard(_) => "Gaussian accelerated billiard",
            WalkConfig::ExponentialHmcExact(_) => "exact exponential HMC",
            WalkConfig::Hmc(_) => "HMC",
            WalkConfig::Nuts(_) => "NUTS",
        }
    }

    /// Whether this walk can sample `kind`. See the table in the module docs.
    pub fn supports(&self, kind: DistributionKind) -> bool {
        use DistributionKind as K;
        match self {
            WalkConfig::Cdhr | WalkConfig::Rdhr => kind != K::LogConcave,
            WalkConfig::Ball(_) => true,
            WalkConfig::Billiard(_)
            | WalkConfig::AcceleratedBilliard(_)
            | WalkConfig::Dikin(_)
            | WalkConfig::Vaidya(_)
            | WalkConfig::John(_) => kind == K::Uniform,
            WalkConfig::GaussianHmcExact(_) => kind == K::SphericalGaussian,
            WalkConfig::GaussianAcceleratedBilliard(_) => {
                matches!(kind, K::SphericalGaussian | K::GeneralGaussian)
            }
            WalkConfig::ExponentialHmcExact(_) => kind == K::Exponential,
            WalkConfig::Hmc(_) | WalkConfig::Nuts(_) => kind != K::Uniform,
        }
    }

    /// Whether the walk works on `Ax <= b` directly.
    pub fn needs_constraints(&self) -> bool {
        matches!(
            self,
            WalkConfig::AcceleratedBilliard(_)
                | WalkConfig::Dikin(_)
                | WalkConfig::Vaidya(_)
                | WalkConfig::John(_)
                | WalkConfig::GaussianHmcExact(_)
                | WalkConfig::GaussianAcceleratedBilliard(_)
                | WalkConfig::ExponentialHmcExact(_)
        )
    }
}

/// A ready-to-run walk. Each variant owns only the state its algorithm needs.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkKernel {
    HitAndRun(HitAndRunWalk),
    Ball(BallWalk),
    Billiard(BilliardWalk),
    AcceleratedBilliard(AcceleratedBilliardWalk),
    Barrier(BarrierWalk),
    GaussianExact(GaussianExactWalk),
    ExponentialExact(ExponentialExactWalk),
    Hmc(HamiltonianWalk),
    Nuts(NutsWalk),
}

impl WalkKernel {
    /**
    Validates the configuration and builds the walk.

    # Arguments

    * `config` - Walk and parameters.
    * `body` - Body to sample from.
    * `target` - Target density.
    * `start` - Starting point; the centre of the body's inner ball when `None`.

    # Errors

    * [`SamplingError::IncompatibleConfiguration`] when the walk cannot serve the target
      or needs linear constraints the body does not expose.
    * [`SamplingError::DimensionMismatch`] when the target or start disagree with the body.
    * [`SamplingError::InfeasibleStart`] when the start lies outside the body (strictly
      inside, for the barrier walks).
    * [`SamplingError::InvalidParameter`] for non-positive sizes or an out-of-range
      acceptance target.
    */
    pub fn new<B: ConvexBody + ?Sized>(
        config: &WalkConfig,
        body: &B,
        target: &TargetDistribution,
        start: Option<DVector<f64>>,
    ) -> Result<Self> {
        let kind = target.kind();
        if !config.supports(kind) {
            return Err(SamplingError::IncompatibleConfiguration {
                walk: config.name(),
                distribution: kind.name(),
                reason: "no sampler for this walk and target",
            });
        }
        let constraints = body.linear_constraints();
        if config.needs_constraints() && constraints.is_none() {
            return Err(SamplingError::IncompatibleConfiguration {
                walk: config.name(),
                distribution: kind.name(),
                reason: "walk needs the body's linear constraints",
            });
        }

        let dim = body.dimension();
        if let Some(found) = target.dimension() {
            if found != dim {
                return Err(SamplingError::DimensionMismatch {
                    expected: dim,
                    found,
                });
            }
        }
        let start = start.unwrap_or_else(|| body.inner_ball().center.clone());
        if start.len() != dim {
            return Err(SamplingError::DimensionMismatch {
                expected: dim,
                found: start.len(),
            });
        }
        if !body.is_feasible(&start) {
            return Err(SamplingError::InfeasibleStart);
        }

        let kernel = match (config, constraints) {
            (WalkConfig::Cdhr, _) => {
                WalkKernel::HitAndRun(HitAndRunWalk::new(start, DirectionRule::Coordinate))
            }
            (WalkConfig::Rdhr, _) => {
                WalkKernel::HitAndRun(HitAndRunWalk::new(start, DirectionRule::Random))
            }
            (WalkConfig::Ball(p), _) => {
                check_positive("ball radius", p.radius)?;
                let radius = p
                    .radius
                    .unwrap_or(4.0 * body.inner_ball().radius / dim.max(1) as f64);
                WalkKernel::Ball(BallWalk::new(start, radius, p.max_attempts))
            }
            (WalkConfig::Billiard(p), _) => {
                check_positive("trajectory length", p.trajectory_length)?;
                WalkKernel::Billiard(BilliardWalk::new(
                    start,
                    p.trajectory_length.unwrap_or_else(|| body.diameter_hint()),
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                ))
            }
            (WalkConfig::AcceleratedBilliard(p), Some(LinearConstraints { a, b })) => {
                check_positive("trajectory length", p.trajectory_length)?;
                WalkKernel::AcceleratedBilliard(AcceleratedBilliardWalk::new(
                    start,
                    a,
                    b,
                    p.trajectory_length.unwrap_or_else(|| body.diameter_hint()),
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                ))
            }
            (WalkConfig::Dikin(p), Some(c)) => barrier(BarrierKind::Dikin, p, start, c)?,
            (WalkConfig::Vaidya(p), Some(c)) => barrier(BarrierKind::Vaidya, p, start, c)?,
            (WalkConfig::John(p), Some(c)) => barrier(BarrierKind::John, p, start, c)?,
            (WalkConfig::GaussianHmcExact(p), Some(LinearConstraints { a, b }))
            | (WalkConfig::GaussianAcceleratedBilliard(p), Some(LinearConstraints { a, b })) => {
                check_positive("travel time", p.travel_time)?;
                let accelerated = matches!(config, WalkConfig::GaussianAcceleratedBilliard(_));
                WalkKernel::GaussianExact(GaussianExactWalk::new(
                    start,
                    target,
                    a,
                    b,
                    p.travel_time.unwrap_or(GAUSSIAN_TRAVEL_TIME),
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                    accelerated,
                )?)
            }
            (WalkConfig::ExponentialHmcExact(p), Some(LinearConstraints { a, b })) => {
                check_positive("travel time", p.travel_time)?;
                WalkKernel::ExponentialExact(ExponentialExactWalk::new(
                    start,
                    target,
                    a,
                    b,
                    p.travel_time.unwrap_or(EXPONENTIAL_TRAVEL_TIME),
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                )?)
            }
            (WalkConfig::Hmc(p), _) => {
                check_positive("step size", p.step_size)?;
                WalkKernel::Hmc(HamiltonianWalk::new(
                    start,
                    p.step_size
                        .unwrap_or_else(|| default_step_size(body, target)),
                    p.n_leapfrog,
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                ))
            }
            (WalkConfig::Nuts(p), _) => {
                check_positive("step size", p.step_size)?;
                if !(p.target_accept > 0.0 && p.target_accept < 1.0) {
                    return Err(SamplingError::InvalidParameter(format!(
                        "target acceptance must lie in (0, 1), got {}",
                        p.target_accept
                    )));
                }
                WalkKernel::Nuts(NutsWalk::new(
                    start,
                    p.step_size,
                    default_step_size(body, target),
                    p.max_tree_depth,
                    p.adapt_steps,
                    p.target_accept,
                    p.max_reflections.unwrap_or(default_reflections(dim)),
                ))
            }
            // Constraint availability was checked above.
            (_, None) => {
                return Err(SamplingError::IncompatibleConfiguration {
                    walk: config.name(),
                    distribution: kind.name(),
                    reason: "walk needs the body's linear constraints",
                })
            }
        };
        debug!("built {} walk in dimension {}", kernel.name(), dim);
        Ok(kernel)
    }
}

fn barrier(
    kind: BarrierKind,
    params: &BarrierParams,
    start: DVector<f64>,
    constraints: LinearConstraints<'_>,
) -> Result<WalkKernel> {
    check_positive("barrier radius", params.radius)?;
    if constraints.slacks(&start).iter().any(|s| *s <= 0.0) {
        return Err(SamplingError::InfeasibleStart);
    }
    Ok(WalkKernel::Barrier(BarrierWalk::new(
        start,
        kind,
        params.radius.unwrap_or(kind.default_radius()),
        constraints.a,
        constraints.b,
    )))
}

impl RandomWalk for WalkKernel {
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        match self {
            WalkKernel::HitAndRun(w) => w.step(body, target, rng),
            WalkKernel::Ball(w) => w.step(body, target, rng),
            WalkKernel::Billiard(w) => w.step(body, target, rng),
            WalkKernel::AcceleratedBilliard(w) => w.step(body, target, rng),
            WalkKernel::Barrier(w) => w.step(body, target, rng),
            WalkKernel::GaussianExact(w) => w.step(body, target, rng),
            WalkKernel::ExponentialExact(w) => w.step(body, target, rng),
            WalkKernel::Hmc(w) => w.step(body, target, rng),
            WalkKernel::Nuts(w) => w.step(body, target, rng),
        }
    }

    fn current_point(&self) -> &DVector<f64> {
        match self {
            WalkKernel::HitAndRun(w) => w.current_point(),
            WalkKernel::Ball(w) => w.current_point(),
            WalkKernel::Billiard(w) => w.current_point(),
            WalkKernel::AcceleratedBilliard(w) => w.current_point(),
            WalkKernel::Barrier(w) => w.current_point(),
            WalkKernel::GaussianExact(w) => w.current_point(),
            WalkKernel::ExponentialExact(w) => w.current_point(),
            WalkKernel::Hmc(w) => w.current_point(),
            WalkKernel::Nuts(w) => w.current_point(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            WalkKernel::HitAndRun(w) => w.name(),
            WalkKernel::Ball(w) => w.name(),
            WalkKernel::Billiard(w) => w.name(),
            WalkKernel::AcceleratedBilliard(w) => w.name(),
            WalkKernel::Barrier(w) => w.name(),
            WalkKernel::GaussianExact(w) => w.name(),
            WalkKernel::ExponentialExact(w) => w.name(),
            WalkKernel::Hmc(w) => w.name(),
            WalkKernel::Nuts(w) => w.name(),
        }
    }
}
