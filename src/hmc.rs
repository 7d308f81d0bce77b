//! Hamiltonian Monte Carlo with a reflective leapfrog integrator.
//!
//! Each step draws a fresh momentum, runs `n_leapfrog` leapfrog steps and accepts the end
//! point with probability `min(1, exp(H_start - H_end))`. The position update of every
//! leapfrog step is a billiard flight: when the particle meets the boundary its momentum
//! is mirrored at the facet, which keeps the integrator volume preserving and reversible.
//!
//! The gradient comes from the target itself (closed form for the Gaussians and the
//! exponential, the user's oracle for [`LogConcave`](crate::distributions::LogConcave)).

use nalgebra::DVector;

use crate::billiard::reflective_flight;
use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

/// A point in phase space with the potential and its gradient cached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Phase {
    pub position: DVector<f64>,
    pub momentum: DVector<f64>,
    pub gradient: DVector<f64>,
    pub potential: f64,
}

impl Phase {
    pub fn new(
        position: DVector<f64>,
        momentum: DVector<f64>,
        target: &TargetDistribution,
    ) -> Self {
        Self {
            gradient: target.potential_gradient(&position),
            potential: target.potential(&position),
            position,
            momentum,
        }
    }

    /// `U(x) + |p|^2 / 2`.
    pub fn hamiltonian(&self) -> f64 {
        self.potential + 0.5 * self.momentum.norm_squared()
    }
}

/// One leapfrog step of signed size `step_size` with reflections at the boundary.
///
/// # Parameters
///
/// * `phase`: Start of the step.
/// * `step_size`: Integration step, negative to integrate backwards in time.
/// * `max_reflections`: Bounce budget of the position update.
///
/// # Returns
///
/// The phase after the step, or `None` when the position update ran out of bounces.
pub(crate) fn reflective_leapfrog<B: ConvexBody + ?Sized>(
    body: &B,
    target: &TargetDistribution,
    phase: &Phase,
    step_size: f64,
    max_reflections: usize,
) -> Result<Option<Phase>> {
    let half = 0.5 * step_size;
    let p_half = &phase.momentum - &phase.gradient * half;
    let direction = step_size.signum();
    let velocity = &p_half * direction;
    let Some(flight) = reflective_flight(
        body,
        &phase.position,
        &velocity,
        step_size.abs(),
        max_reflections,
    )?
    else {
        return Ok(None);
    };
    let position = flight.position;
    let gradient = target.potential_gradient(&position);
    let momentum = flight.direction * direction - &gradient * half;
    Ok(Some(Phase {
        potential: target.potential(&position),
        position,
        momentum,
        gradient,
    }))
}

/// Lipschitz constant of the potential's gradient, 0 when it is constant.
fn gradient_lipschitz(target: &TargetDistribution) -> f64 {
    match target {
        TargetDistribution::Uniform | TargetDistribution::Exponential(_) => 0.0,
        TargetDistribution::SphericalGaussian(g) => g.variance.recip(),
        TargetDistribution::GeneralGaussian(g) => g
            .precision()
            .symmetric_eigenvalues()
            .iter()
            .cloned()
            .fold(0.0, f64::max),
        TargetDistribution::LogConcave(l) => l.lipschitz,
    }
}

/// `r / d` for inner radius `r`, capped by `1 / sqrt(L)` for a gradient with Lipschitz
/// constant `L`.
pub fn default_step_size<B: ConvexBody + ?Sized>(body: &B, target: &TargetDistribution) -> f64 {
    let geometric = body.inner_ball().radius / body.dimension().max(1) as f64;
    let lipschitz = gradient_lipschitz(target);
    if lipschitz > 0.0 {
        geometric.min(lipschitz.sqrt().recip())
    } else {
        geometric
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HamiltonianWalk {
    point: DVector<f64>,
    step_size: f64,
    n_leapfrog: usize,
    max_reflections: usize,
    proposals: usize,
    accepted: usize,
}

impl HamiltonianWalk {
    pub fn new(
        start: DVector<f64>,
        step_size: f64,
        n_leapfrog: usize,
        max_reflections: usize,
    ) -> Self {
        Self {
            point: start,
            step_size,
            n_leapfrog,
            max_reflections,
            proposals: 0,
            accepted: 0,
        }
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Fraction of accepted trajectories so far.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposals == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposals as f64
        }
    }
}

impl RandomWalk for HamiltonianWalk {
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let momentum = rng.standard_normal_vector(self.point.len());
        let start = Phase::new(self.point.clone(), momentum, target);
        let mut phase = start.clone();
        for _ in 0..self.n_leapfrog {
            phase = reflective_leapfrog(body, target, &phase, self.step_size, self.max_reflections)?
                .ok_or(SamplingError::ConvergenceFailure {
                    walk: self.name(),
                    budget: self.max_reflections,
                })?;
        }
        self.proposals += 1;
        // NaN energies compare false and reject.
        if rng.uniform_real(0.0, 1.0).ln() < start.hamiltonian() - phase.hamiltonian() {
            self.point = phase.position;
            self.accepted += 1;
        }
        Ok(())
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "HMC"
    }
}
