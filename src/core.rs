/*!
The random-walk capability and the driver loop shared by every walk.

A [`RandomWalk`] performs one elementary move per [`RandomWalk::step`]. The
[`SamplingDriver`] turns a walk into a batch of samples: it discards `burn_in` steps,
then records one point every `walk_length` steps until `sample_count` points are in the
sink. [`run_chains`] does the same for several independent chains on the rayon pool.

# Examples

```rust
use convex_walks::core::SamplingDriver;
use convex_walks::distributions::TargetDistribution;
use convex_walks::geometry::HPolytope;
use convex_walks::kernel::{WalkConfig, WalkKernel};
use convex_walks::sink::ColumnSink;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let square = HPolytope::cube(2, 1.0);
let target = TargetDistribution::Uniform;
let mut walk = WalkKernel::new(&WalkConfig::Cdhr, &square, &target, None).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let mut sink = ColumnSink::new(2, 100);

let report = SamplingDriver::new(1, 100, 10)
    .run(&square, &mut walk, &target, &mut rng, &mut sink)
    .unwrap();
assert_eq!(report.steps, 110);
assert_eq!(sink.view().ncols(), 100);
```
*/

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use nalgebra::DVector;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::kernel::{WalkConfig, WalkKernel};
use crate::random::RandomSource;
use crate::sink::{CollectionSink, ColumnSink};

/// One elementary move of a Markov chain whose stationary law is the target restricted
/// to the body.
pub trait RandomWalk {
    /// Performs exactly one move with bounded work.
    ///
    /// On [`SamplingError::ConvergenceFailure`] the walk keeps the point it held before
    /// the call.
    fn step<B, R>(&mut self, body: &B, target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized;

    fn current_point(&self) -> &DVector<f64>;

    fn name(&self) -> &'static str;
}

/// What the driver does when a step exhausts its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run and return the error.
    #[default]
    Abort,
    /// Keep the old point, count the failure and mark the affected sample as unreliable.
    Flag,
}

/// Bookkeeping of one driver run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
    /// Elementary steps performed, burn-in included.
    pub steps: usize,
    /// Steps after which the point differed from the one before.
    pub moved: usize,
    /// Flagged step failures, burn-in included.
    pub failures: usize,
    /// Flagged step failures during burn-in.
    pub burn_in_failures: usize,
    /// Indices of recorded samples whose thinning window contained a failure.
    pub unreliable: Vec<usize>,
}

impl RunReport {
    /// Fraction of steps that moved the point, 0 when no step ran.
    pub fn move_rate(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.moved as f64 / self.steps as f64
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, {:.1}% moved, {} failures ({} in burn-in), {} unreliable samples",
            self.steps,
            100.0 * self.move_rate(),
            self.failures,
            self.burn_in_failures,
            self.unreliable.len()
        )
    }
}

/// Burn-in, thinning and collection around any [`RandomWalk`].
#[derive(Debug, Clone, Default)]
pub struct SamplingDriver {
    pub walk_length: usize,
    pub sample_count: usize,
    pub burn_in: usize,
    pub failure_policy: FailurePolicy,
    cancel: Option<Arc<AtomicBool>>,
}

impl SamplingDriver {
    /**
    Creates a driver.

    # Arguments

    * `walk_length` - Steps between two recorded samples. Zero records the current point
      repeatedly without moving.
    * `sample_count` - Number of samples to record.
    * `burn_in` - Steps to discard before the first recorded sample.
    */
    pub fn new(walk_length: usize, sample_count: usize, burn_in: usize) -> Self {
        Self {
            walk_length,
            sample_count,
            burn_in,
            failure_policy: FailurePolicy::Abort,
            cancel: None,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Polls `flag` before every elementary step; once it reads `true` the run stops with
    /// [`SamplingError::Cancelled`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// `burn_in + sample_count * walk_length`.
    pub fn total_steps(&self) -> usize {
        self.burn_in + self.sample_count * self.walk_length
    }

    /// Runs the walk and records `sample_count` points into `sink`.
    pub fn run<B, W, R, S>(
        &self,
        body: &B,
        walk: &mut W,
        target: &TargetDistribution,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<RunReport>
    where
        B: ConvexBody + ?Sized,
        W: RandomWalk + ?Sized,
        R: RandomSource + ?Sized,
        S: CollectionSink + ?Sized,
    {
        self.drive(body, walk, target, rng, sink, || {})
    }

    /// Like [`run`](Self::run) with a progress bar on stderr.
    pub fn run_progress<B, W, R, S>(
        &self,
        body: &B,
        walk: &mut W,
        target: &TargetDistribution,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<RunReport>
    where
        B: ConvexBody + ?Sized,
        W: RandomWalk + ?Sized,
        R: RandomSource + ?Sized,
        S: CollectionSink + ?Sized,
    {
        let pb = ProgressBar::new(self.total_steps() as u64);
        pb.set_style(progress_style());
        pb.set_prefix(walk.name());
        let report = self.drive(body, walk, target, rng, sink, || pb.inc(1));
        match &report {
            Ok(r) => pb.finish_with_message(format!("{:.1}% moved", 100.0 * r.move_rate())),
            Err(e) => pb.abandon_with_message(e.to_string()),
        }
        report
    }

    fn drive<B, W, R, S, F>(
        &self,
        body: &B,
        walk: &mut W,
        target: &TargetDistribution,
        rng: &mut R,
        sink: &mut S,
        mut on_step: F,
    ) -> Result<RunReport>
    where
        B: ConvexBody + ?Sized,
        W: RandomWalk + ?Sized,
        R: RandomSource + ?Sized,
        S: CollectionSink + ?Sized,
        F: FnMut(),
    {
        let mut report = RunReport::default();

        for _ in 0..self.burn_in {
            if self.step_once(body, walk, target, rng, &mut report)? {
                report.burn_in_failures += 1;
            }
            on_step();
        }
        debug!(
            "{}: burn-in of {} steps done, collecting {} samples",
            walk.name(),
            self.burn_in,
            self.sample_count
        );

        for i in 0..self.sample_count {
            let mut window_failed = false;
            for _ in 0..self.walk_length {
                window_failed |= self.step_once(body, walk, target, rng, &mut report)?;
                on_step();
            }
            sink.push(walk.current_point())?;
            if window_failed {
                report.unreliable.push(i);
            }
        }

        info!("{}: {}", walk.name(), report);
        Ok(report)
    }

    /// One elementary step. `Ok(true)` when a failure was flagged instead of propagated.
    fn step_once<B, W, R>(
        &self,
        body: &B,
        walk: &mut W,
        target: &TargetDistribution,
        rng: &mut R,
        report: &mut RunReport,
    ) -> Result<bool>
    where
        B: ConvexBody + ?Sized,
        W: RandomWalk + ?Sized,
        R: RandomSource + ?Sized,
    {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(SamplingError::Cancelled {
                    steps: report.steps,
                });
            }
        }
        let before = walk.current_point().clone();
        match walk.step(body, target, rng) {
            Ok(()) => {
                report.steps += 1;
                if walk.current_point() != &before {
                    report.moved += 1;
                }
                Ok(false)
            }
            Err(e) if e.is_recoverable() && self.failure_policy == FailurePolicy::Flag => {
                report.steps += 1;
                report.failures += 1;
                warn!("{}: step {} flagged: {}", walk.name(), report.steps, e);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|style| style.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/**
Builds the walk described by `config` and runs one sampling session.

`start` defaults to the centre of the body's inner ball.

# Examples

```rust
use convex_walks::core::sample_points;
use convex_walks::distributions::{SphericalGaussian, TargetDistribution};
use convex_walks::geometry::HPolytope;
use convex_walks::kernel::WalkConfig;
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let cube = HPolytope::cube(3, 1.0);
let target = TargetDistribution::from(SphericalGaussian::standard(3));
let mut rng = SmallRng::seed_from_u64(7);
let mut points: Vec<DVector<f64>> = Vec::new();
sample_points(&cube, None, &WalkConfig::Rdhr, &target, &mut rng, 5, 50, 100, &mut points).unwrap();
assert_eq!(points.len(), 50);
```
*/
#[allow(clippy::too_many_arguments)]
pub fn sample_points<B, R, S>(
    body: &B,
    start: Option<DVector<f64>>,
    config: &WalkConfig,
    target: &TargetDistribution,
    rng: &mut R,
    walk_length: usize,
    sample_count: usize,
    burn_in: usize,
    sink: &mut S,
) -> Result<RunReport>
where
    B: ConvexBody + ?Sized,
    R: RandomSource + ?Sized,
    S: CollectionSink + ?Sized,
{
    let mut walk = WalkKernel::new(config, body, target, start)?;
    SamplingDriver::new(walk_length, sample_count, burn_in).run(body, &mut walk, target, rng, sink)
}

/// Samples and bookkeeping of one chain from [`run_chains`].
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Shape `(dim, sample_count)`, column `i` is the `i`-th sample.
    pub samples: Array2<f64>,
    pub report: RunReport,
}

/**
Runs `n_chains` independent chains in parallel, all starting from `start` (the inner-ball
centre when `None`). Chain `i` draws from a `SmallRng` seeded with `seed + i`, so the
output depends only on the arguments and not on thread scheduling.

With `progress` set, one progress bar per chain is drawn.
*/
#[allow(clippy::too_many_arguments)]
pub fn run_chains<B>(
    body: &B,
    config: &WalkConfig,
    target: &TargetDistribution,
    start: Option<DVector<f64>>,
    driver: &SamplingDriver,
    n_chains: usize,
    seed: u64,
    progress: bool,
) -> Result<Vec<ChainOutput>>
where
    B: ConvexBody + ?Sized,
{
    let multi = MultiProgress::new();
    let style = progress_style();
    (0..n_chains)
        .into_par_iter()
        .map(|i| {
            let mut rng = SmallRng::seed_from_u64(seed + i as u64);
            let mut walk = WalkKernel::new(config, body, target, start.clone())?;
            let mut sink = ColumnSink::new(body.dimension(), driver.sample_count);
            let report = if progress {
                let pb = multi.add(ProgressBar::new(driver.total_steps() as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(style.clone());
                let report = driver.drive(body, &mut walk, target, &mut rng, &mut sink, || {
                    pb.inc(1)
                });
                pb.finish_with_message("Done!");
                report?
            } else {
                driver.run(body, &mut walk, target, &mut rng, &mut sink)?
            };
            Ok(ChainOutput {
                samples: sink.into_array(),
                report,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::HPolytope;

    /// Walk that moves by +1 on the first coordinate and counts its steps.
    struct Counter {
        point: DVector<f64>,
        steps: usize,
        fail_every: Option<usize>,
    }

    impl Counter {
        fn new(dim: usize) -> Self {
            Self {
                point: DVector::zeros(dim),
                steps: 0,
                fail_every: None,
            }
        }
    }

    impl RandomWalk for Counter {
        fn step<B, R>(&mut self, _: &B, _: &TargetDistribution, _: &mut R) -> Result<()>
        where
            B: ConvexBody + ?Sized,
            R: RandomSource + ?Sized,
        {
            self.steps += 1;
            if let Some(k) = self.fail_every {
                if self.steps % k == 0 {
                    return Err(SamplingError::ConvergenceFailure {
                        walk: "counter",
                        budget: 0,
                    });
                }
            }
            self.point[0] += 1.0;
            Ok(())
        }

        fn current_point(&self) -> &DVector<f64> {
            &self.point
        }

        fn name(&self) -> &'static str {
            "counter"
        }
    }

    #[test]
    fn zero_samples_runs_only_burn_in() {
        let body = HPolytope::cube(2, 1.0);
        let mut walk = Counter::new(2);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        let report = SamplingDriver::new(3, 0, 17)
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap();
        assert!(sink.is_empty());
        assert_eq!(walk.steps, 17);
        assert_eq!(report.steps, 17);
    }

    #[test]
    fn step_count_and_thinning() {
        let body = HPolytope::cube(1, 1.0);
        let mut walk = Counter::new(1);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        let driver = SamplingDriver::new(3, 4, 2);
        let report = driver
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap();
        assert_eq!(report.steps, driver.total_steps());
        assert_eq!(walk.steps, 14);
        let recorded: Vec<f64> = sink.iter().map(|p| p[0]).collect();
        assert_eq!(recorded, vec![5.0, 8.0, 11.0, 14.0]);
        assert_eq!(report.moved, 14);
    }

    #[test]
    fn zero_walk_length_repeats_point() {
        let body = HPolytope::cube(1, 1.0);
        let mut walk = Counter::new(1);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        SamplingDriver::new(0, 5, 0)
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap();
        assert_eq!(walk.steps, 0);
        assert!(sink.iter().all(|p| p[0] == 0.0));
    }

    #[test]
    fn abort_propagates_failure() {
        let body = HPolytope::cube(1, 1.0);
        let mut walk = Counter::new(1);
        walk.fail_every = Some(4);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        let err = SamplingDriver::new(2, 10, 0)
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap_err();
        assert!(matches!(err, SamplingError::ConvergenceFailure { .. }));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn flag_marks_unreliable_samples() {
        let body = HPolytope::cube(1, 1.0);
        let mut walk = Counter::new(1);
        walk.fail_every = Some(4);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        let report = SamplingDriver::new(2, 5, 2)
            .with_failure_policy(FailurePolicy::Flag)
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap();
        // Steps 4, 8 and 12 fail; step 4 falls in the window of sample 0.
        assert_eq!(report.steps, 12);
        assert_eq!(report.failures, 3);
        assert_eq!(report.burn_in_failures, 0);
        assert_eq!(report.unreliable, vec![0, 2, 4]);
        assert_eq!(report.moved, 9);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn cancellation_stops_before_next_step() {
        let body = HPolytope::cube(1, 1.0);
        let mut walk = Counter::new(1);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut sink: Vec<DVector<f64>> = Vec::new();
        let flag = Arc::new(AtomicBool::new(true));
        let err = SamplingDriver::new(1, 10, 0)
            .with_cancel_flag(flag)
            .run(&body, &mut walk, &TargetDistribution::Uniform, &mut rng, &mut sink)
            .unwrap_err();
        assert_eq!(err, SamplingError::Cancelled { steps: 0 });
        assert_eq!(walk.steps, 0);
    }

    #[test]
    fn chains_are_reproducible() {
        let body = HPolytope::cube(2, 1.0);
        let driver = SamplingDriver::new(2, 20, 10);
        let run = || {
            run_chains(
                &body,
                &WalkConfig::Rdhr,
                &TargetDistribution::Uniform,
                None,
                &driver,
                3,
                42,
                false,
            )
            .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.samples, b.samples);
        }
        assert_ne!(first[0].samples, first[1].samples);
    }
}
