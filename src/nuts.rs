/*!
No-U-Turn sampler with reflective leapfrog steps.

The trajectory is grown by repeated doubling in a random time direction until it starts
to turn back on itself, the depth cap is reached or the energy error explodes. A point
is drawn from the trajectory using the slice variable of Hoffman and Gelman. During the
first `adapt_steps` steps the leapfrog step size is tuned by dual averaging towards the
target acceptance statistic, after which it is frozen at the averaged value.

Position updates are billiard flights as in [`crate::hmc`], so trajectories never leave
the body.
*/

use log::debug;
use nalgebra::DVector;

use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::hmc::{reflective_leapfrog, Phase};
use crate::random::RandomSource;

/// Energy error beyond which a trajectory is considered divergent.
const MAX_ENERGY_ERROR: f64 = 1000.0;

/// Doubling/halving rounds in [`find_reasonable_epsilon`].
const MAX_EPSILON_SEARCH: usize = 50;

/// Dual-averaging state (Hoffman and Gelman, algorithm 5).
#[derive(Debug, Clone, PartialEq)]
struct DualAveraging {
    mu: f64,
    log_eps_bar: f64,
    h_bar: f64,
    m: usize,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step_size: f64) -> Self {
        Self {
            mu: (10.0 * step_size).ln(),
            log_eps_bar: 0.0,
            h_bar: 0.0,
            m: 0,
        }
    }

    /// Feeds the acceptance statistic of one step, returns the next step size.
    fn update(&mut self, accept_stat: f64, target_accept: f64) -> f64 {
        self.m += 1;
        let m = self.m as f64;
        let w = 1.0 / (m + Self::T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (target_accept - accept_stat);
        let log_eps = self.mu - m.sqrt() / Self::GAMMA * self.h_bar;
        let eta = m.powf(-Self::KAPPA);
        self.log_eps_bar = eta * log_eps + (1.0 - eta) * self.log_eps_bar;
        log_eps.exp()
    }

    fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// Result of [`NutsWalk::build_tree`].
struct Subtree {
    minus: Phase,
    plus: Phase,
    proposal: Phase,
    n_valid: f64,
    keep_going: bool,
    alpha_sum: f64,
    n_alpha: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NutsWalk {
    point: DVector<f64>,
    /// `None` until the first step has searched for a starting value.
    step_size: Option<f64>,
    initial_step_size: f64,
    max_tree_depth: usize,
    adapt_steps: usize,
    target_accept: f64,
    max_reflections: usize,
    adaptation: Option<DualAveraging>,
    steps_taken: usize,
}

impl NutsWalk {
    /**
    Creates the walk.

    # Arguments

    * `step_size` - Fixed starting step size; `None` searches for one on the first step,
      starting from `fallback_step_size`.
    * `max_tree_depth` - Cap on the number of trajectory doublings.
    * `adapt_steps` - Steps during which the step size is tuned.
    * `target_accept` - Acceptance statistic aimed at by the tuning.
    */
    pub fn new(
        start: DVector<f64>,
        step_size: Option<f64>,
        fallback_step_size: f64,
        max_tree_depth: usize,
        adapt_steps: usize,
        target_accept: f64,
        max_reflections: usize,
    ) -> Self {
        Self {
            point: start,
            step_size,
            initial_step_size: step_size.unwrap_or(fallback_step_size),
            max_tree_depth,
            adapt_steps,
            target_accept,
            max_reflections,
            adaptation: step_size.map(DualAveraging::new),
            steps_taken: 0,
        }
    }

    /// Current leapfrog step size, if already chosen.
    pub fn step_size(&self) -> Option<f64> {
        self.step_size
    }

    fn failure(&self) -> SamplingError {
        SamplingError::ConvergenceFailure {
            walk: self.name(),
            budget: self.max_reflections,
        }
    }

    fn leapfrog<B: ConvexBody + ?Sized>(
        &self,
        body: &B,
        target: &TargetDistribution,
        phase: &Phase,
        step_size: f64,
    ) -> Result<Phase> {
        reflective_leapfrog(body, target, phase, step_size, self.max_reflections)?
            .ok_or_else(|| self.failure())
    }

    /// Builds a subtree of `2^depth` leapfrog steps in `direction` from `phase`.
    #[allow(clippy::too_many_arguments)]
    fn build_tree<B, R>(
        &self,
        body: &B,
        target: &TargetDistribution,
        rng: &mut R,
        phase: &Phase,
        log_u: f64,
        direction: f64,
        depth: usize,
        step_size: f64,
        h0: f64,
    ) -> Result<Subtree>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        if depth == 0 {
            let next = self.leapfrog(body, target, phase, direction * step_size)?;
            let joint = -next.hamiltonian();
            let n_valid = if log_u <= joint { 1.0 } else { 0.0 };
            let keep_going = log_u < MAX_ENERGY_ERROR + joint;
            let alpha = (h0 - next.hamiltonian()).exp().min(1.0);
            let alpha = if alpha.is_finite() { alpha } else { 0.0 };
            return Ok(Subtree {
                minus: next.clone(),
                plus: next.clone(),
                proposal: next,
                n_valid,
                keep_going,
                alpha_sum: alpha,
                n_alpha: 1,
            });
        }

        let mut tree = self.build_tree(
            body, target, rng, phase, log_u, direction, depth - 1, step_size, h0,
        )?;
        if !tree.keep_going {
            return Ok(tree);
        }
        let edge = if direction < 0.0 { &tree.minus } else { &tree.plus };
        let other = self.build_tree(
            body, target, rng, edge, log_u, direction, depth - 1, step_size, h0,
        )?;
        let total = tree.n_valid + other.n_valid;
        if total > 0.0 && rng.uniform_real(0.0, 1.0) < other.n_valid / total {
            tree.proposal = other.proposal.clone();
        }
        if direction < 0.0 {
            tree.minus = other.minus;
        } else {
            tree.plus = other.plus;
        }
        tree.alpha_sum += other.alpha_sum;
        tree.n_alpha += other.n_alpha;
        tree.n_valid = total;
        tree.keep_going = other.keep_going && no_u_turn(&tree.minus, &tree.plus);
        Ok(tree)
    }
}

/// Neither end of the trajectory is moving back towards the other.
fn no_u_turn(minus: &Phase, plus: &Phase) -> bool {
    let span = &plus.position - &minus.position;
    span.dot(&minus.momentum) >= 0.0 && span.dot(&plus.momentum) >= 0.0
}

/// Heuristic initial step size: doubles or halves `start` until the one-step acceptance
/// probability crosses 1/2 (Hoffman and Gelman, algorithm 4). Steps that run out of
/// reflections count as rejections.
pub(crate) fn find_reasonable_epsilon<B, R>(
    body: &B,
    target: &TargetDistribution,
    rng: &mut R,
    position: &DVector<f64>,
    start: f64,
    max_reflections: usize,
) -> Result<f64>
where
    B: ConvexBody + ?Sized,
    R: RandomSource + ?Sized,
{
    let phase = Phase::new(
        position.clone(),
        rng.standard_normal_vector(position.len()),
        target,
    );
    let h0 = phase.hamiltonian();
    let log_accept = |eps: f64| -> Result<f64> {
        Ok(
            match reflective_leapfrog(body, target, &phase, eps, max_reflections)? {
                Some(next) => {
                    let delta = h0 - next.hamiltonian();
                    if delta.is_nan() {
                        f64::NEG_INFINITY
                    } else {
                        delta
                    }
                }
                None => f64::NEG_INFINITY,
            },
        )
    };

    let mut eps = start;
    let grow = log_accept(eps)? > 0.5f64.ln();
    for _ in 0..MAX_EPSILON_SEARCH {
        let la = log_accept(eps)?;
        if (grow && la <= 0.5f64.ln()) || (!grow && la > 0.5f64.ln()) {
            break;
        }
        eps = if grow { eps * 2.0 } else { eps * 0.5 };
    }
    Ok(eps)
}

impl RandomWalk for NutsWalk {
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let step_size = match self.step_size {
            Some(eps) => eps,
            None => {
                let eps = find_reasonable_epsilon(
                    body,
                    target,
                    rng,
                    &self.point,
                    self.initial_step_size,
                    self.max_reflections,
                )?;
                debug!("NUTS: starting step size {eps:.4e}");
                self.step_size = Some(eps);
                self.adaptation = Some(DualAveraging::new(eps));
                eps
            }
        };

        let start = Phase::new(
            self.point.clone(),
            rng.standard_normal_vector(self.point.len()),
            target,
        );
        let h0 = start.hamiltonian();
        // Slice variable: log u = -H0 - Exp(1).
        let log_u = -h0 - rng.standard_exponential();

        let mut minus = start.clone();
        let mut plus = start.clone();
        let mut proposal = self.point.clone();
        let mut n_valid = 1.0;
        let mut alpha_sum = 0.0;
        let mut n_alpha = 0;

        for depth in 0..self.max_tree_depth {
            let direction = if rng.uniform_real(0.0, 1.0) < 0.5 {
                -1.0
            } else {
                1.0
            };
            let edge = if direction < 0.0 { &minus } else { &plus };
            let tree =
                self.build_tree(body, target, rng, edge, log_u, direction, depth, step_size, h0)?;
            if direction < 0.0 {
                minus = tree.minus;
            } else {
                plus = tree.plus;
            }
            alpha_sum += tree.alpha_sum;
            n_alpha += tree.n_alpha;
            if tree.keep_going && rng.uniform_real(0.0, 1.0) < tree.n_valid / n_valid {
                proposal = tree.proposal.position;
            }
            n_valid += tree.n_valid;
            if !(tree.keep_going && no_u_turn(&minus, &plus)) {
                break;
            }
        }
        self.point = proposal;
        self.steps_taken += 1;

        if let Some(adaptation) = self.adaptation.as_mut() {
            if self.steps_taken <= self.adapt_steps {
                let accept_stat = if n_alpha > 0 {
                    alpha_sum / n_alpha as f64
                } else {
                    0.0
                };
                self.step_size = Some(adaptation.update(accept_stat, self.target_accept));
            } else if self.steps_taken == self.adapt_steps + 1 && adaptation.m > 0 {
                let eps = adaptation.final_step_size();
                debug!("NUTS: adaptation finished, step size {eps:.4e}");
                self.step_size = Some(eps);
            }
        }
        Ok(())
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "NUTS"
    }
}
