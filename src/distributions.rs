/*!
Target distributions for the walks, each known up to its normalizing constant and
restricted to the convex body being sampled.

[`TargetDistribution`] is a closed set of variants. Besides evaluating the unnormalized
log-density every variant can describe itself to the walks that need more than a value
oracle:

- the Hamiltonian walks ask for the gradient of the potential `-log p`,
- the hit-and-run walks ask for the one-dimensional law of the target along a chord,
  which is closed-form for every variant except [`LogConcave`].

# Examples

```rust
use convex_walks::distributions::{SphericalGaussian, TargetDistribution};
use nalgebra::DVector;

let target = TargetDistribution::from(SphericalGaussian::standard(2));
let at_mode = target.log_density(&DVector::zeros(2));
let off_mode = target.log_density(&DVector::from_vec(vec![1.0, 0.0]));
assert!((at_mode - off_mode - 0.5).abs() < 1e-12);
```

A custom log-concave density is supplied as a potential and its gradient:

```rust
use convex_walks::distributions::{LogConcave, TargetDistribution};
use nalgebra::DVector;

// Potential 0.5 * |x - x0|^2 with x0 = (1, 1).
let x0 = DVector::from_vec(vec![1.0, 1.0]);
let x1 = x0.clone();
let target = TargetDistribution::from(LogConcave::from_fns(
    move |x: &DVector<f64>| 0.5 * (x - &x0).norm_squared(),
    move |x: &DVector<f64>| x - &x1,
    1.0,
    1.0,
));
assert!(target.log_density(&DVector::from_vec(vec![1.0, 1.0])).abs() < 1e-12);
```
*/

use std::fmt;
use std::sync::Arc;

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::{Result, SamplingError};
use crate::random::RandomSource;

/// Potential `f = -log p` of a log-concave density and its gradient.
///
/// The two methods must agree (`potential_gradient` is the derivative of `potential`).
/// That cannot be checked mechanically and is left to the implementor.
pub trait LogConcaveOracle: Send + Sync {
    fn potential(&self, x: &DVector<f64>) -> f64;

    fn potential_gradient(&self, x: &DVector<f64>) -> DVector<f64>;
}

/// Adapter turning a pair of closures into a [`LogConcaveOracle`].
pub struct FnOracle<F, G> {
    potential: F,
    gradient: G,
}

impl<F, G> LogConcaveOracle for FnOracle<F, G>
where
    F: Fn(&DVector<f64>) -> f64 + Send + Sync,
    G: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync,
{
    fn potential(&self, x: &DVector<f64>) -> f64 {
        (self.potential)(x)
    }

    fn potential_gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.gradient)(x)
    }
}

/// Isotropic Gaussian `exp(-|x - mode|^2 / (2 variance))`.
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalGaussian {
    pub mode: DVector<f64>,
    pub variance: f64,
}

impl SphericalGaussian {
    pub fn new(mode: DVector<f64>, variance: f64) -> Result<Self> {
        if !(variance > 0.0 && variance.is_finite()) {
            return Err(SamplingError::InvalidParameter(format!(
                "variance must be positive, got {variance}"
            )));
        }
        Ok(Self { mode, variance })
    }

    /// Unit variance, centred at the origin.
    pub fn standard(dim: usize) -> Self {
        Self {
            mode: DVector::zeros(dim),
            variance: 1.0,
        }
    }
}

/// Gaussian with an arbitrary (not necessarily axis-aligned) shape,
/// `exp(-(x - mode)^T P (x - mode) / 2)` with precision `P`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralGaussian {
    mode: DVector<f64>,
    precision: DMatrix<f64>,
    /// Lower Cholesky factor `L` of the precision, `P = L L^T`.
    whitening: DMatrix<f64>,
}

impl GeneralGaussian {
    /// Builds the Gaussian from its covariance matrix, which must be symmetric positive
    /// definite.
    pub fn new(mode: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        check_square(&covariance, mode.len())?;
        let chol = Cholesky::new(covariance).ok_or_else(|| {
            SamplingError::InvalidParameter("covariance must be positive definite".into())
        })?;
        Self::from_precision(mode, chol.inverse())
    }

    /// Builds the Gaussian from its precision (inverse covariance) matrix.
    pub fn from_precision(mode: DVector<f64>, precision: DMatrix<f64>) -> Result<Self> {
        check_square(&precision, mode.len())?;
        let precision = (&precision + precision.transpose()) * 0.5;
        let whitening = Cholesky::new(precision.clone())
            .ok_or_else(|| {
                SamplingError::InvalidParameter("precision must be positive definite".into())
            })?
            .l();
        Ok(Self {
            mode,
            precision,
            whitening,
        })
    }

    pub fn mode(&self) -> &DVector<f64> {
        &self.mode
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    /// Lower-triangular `L` with `L L^T` equal to the precision. `y = L^T (x - mode)` maps
    /// this Gaussian onto the standard one.
    pub fn whitening(&self) -> &DMatrix<f64> {
        &self.whitening
    }
}

fn check_square(m: &DMatrix<f64>, dim: usize) -> Result<()> {
    if m.nrows() != dim || m.ncols() != dim {
        return Err(SamplingError::DimensionMismatch {
            expected: dim,
            found: m.nrows().max(m.ncols()),
        });
    }
    Ok(())
}

/// Exponential density `exp(-rate * c.x)` along the direction `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Exponential {
    pub direction: DVector<f64>,
    pub rate: f64,
}

impl Exponential {
    pub fn new(direction: DVector<f64>, rate: f64) -> Result<Self> {
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(SamplingError::InvalidParameter(format!(
                "rate must be positive, got {rate}"
            )));
        }
        Ok(Self { direction, rate })
    }

    /// The constant force `-rate * c` felt by a particle in this potential.
    pub fn force(&self) -> DVector<f64> {
        &self.direction * -self.rate
    }
}

/// Arbitrary log-concave density given through its potential and gradient.
#[derive(Clone)]
pub struct LogConcave {
    oracle: Arc<dyn LogConcaveOracle>,
    /// Lipschitz constant of the gradient.
    pub lipschitz: f64,
    /// Strong convexity constant of the potential.
    pub strong_convexity: f64,
}

impl LogConcave {
    pub fn new(oracle: Arc<dyn LogConcaveOracle>, lipschitz: f64, strong_convexity: f64) -> Self {
        Self {
            oracle,
            lipschitz,
            strong_convexity,
        }
    }

    pub fn from_fns<F, G>(potential: F, gradient: G, lipschitz: f64, strong_convexity: f64) -> Self
    where
        F: Fn(&DVector<f64>) -> f64 + Send + Sync + 'static,
        G: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        Self::new(
            Arc::new(FnOracle {
                potential,
                gradient,
            }),
            lipschitz,
            strong_convexity,
        )
    }

    pub fn oracle(&self) -> &dyn LogConcaveOracle {
        self.oracle.as_ref()
    }
}

impl fmt::Debug for LogConcave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConcave")
            .field("lipschitz", &self.lipschitz)
            .field("strong_convexity", &self.strong_convexity)
            .finish_non_exhaustive()
    }
}

/// Discriminant of [`TargetDistribution`], used by the walk/target compatibility table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionKind {
    Uniform,
    SphericalGaussian,
    GeneralGaussian,
    Exponential,
    LogConcave,
}

impl DistributionKind {
    pub fn name(&self) -> &'static str {
        match self {
            DistributionKind::Uniform => "uniform",
            DistributionKind::SphericalGaussian => "spherical Gaussian",
            DistributionKind::GeneralGaussian => "general Gaussian",
            DistributionKind::Exponential => "exponential",
            DistributionKind::LogConcave => "log-concave",
        }
    }
}

/// The density to sample, restricted to the body.
#[derive(Debug, Clone)]
pub enum TargetDistribution {
    Uniform,
    SphericalGaussian(SphericalGaussian),
    GeneralGaussian(GeneralGaussian),
    Exponential(Exponential),
    LogConcave(LogConcave),
}

impl From<SphericalGaussian> for TargetDistribution {
    fn from(d: SphericalGaussian) -> Self {
        TargetDistribution::SphericalGaussian(d)
    }
}

impl From<GeneralGaussian> for TargetDistribution {
    fn from(d: GeneralGaussian) -> Self {
        TargetDistribution::GeneralGaussian(d)
    }
}

impl From<Exponential> for TargetDistribution {
    fn from(d: Exponential) -> Self {
        TargetDistribution::Exponential(d)
    }
}

impl From<LogConcave> for TargetDistribution {
    fn from(d: LogConcave) -> Self {
        TargetDistribution::LogConcave(d)
    }
}

impl TargetDistribution {
    pub fn kind(&self) -> DistributionKind {
        match self {
            TargetDistribution::Uniform => DistributionKind::Uniform,
            TargetDistribution::SphericalGaussian(_) => DistributionKind::SphericalGaussian,
            TargetDistribution::GeneralGaussian(_) => DistributionKind::GeneralGaussian,
            TargetDistribution::Exponential(_) => DistributionKind::Exponential,
            TargetDistribution::LogConcave(_) => DistributionKind::LogConcave,
        }
    }

    /// Dimension fixed by the parameters, if any.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            TargetDistribution::Uniform | TargetDistribution::LogConcave(_) => None,
            TargetDistribution::SphericalGaussian(g) => Some(g.mode.len()),
            TargetDistribution::GeneralGaussian(g) => Some(g.mode.len()),
            TargetDistribution::Exponential(e) => Some(e.direction.len()),
        }
    }

    /// Unnormalized log-density. Constant (zero) for the uniform target; the body's
    /// indicator is not part of it.
    pub fn log_density(&self, x: &DVector<f64>) -> f64 {
        -self.potential(x)
    }

    /// Potential `-log p` up to an additive constant.
    pub fn potential(&self, x: &DVector<f64>) -> f64 {
        match self {
            TargetDistribution::Uniform => 0.0,
            TargetDistribution::SphericalGaussian(g) => {
                (x - &g.mode).norm_squared() / (2.0 * g.variance)
            }
            TargetDistribution::GeneralGaussian(g) => {
                let diff = x - &g.mode;
                0.5 * diff.dot(&(&g.precision * &diff))
            }
            TargetDistribution::Exponential(e) => e.rate * e.direction.dot(x),
            TargetDistribution::LogConcave(l) => l.oracle.potential(x),
        }
    }

    /// Gradient of the potential.
    pub fn potential_gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        match self {
            TargetDistribution::Uniform => DVector::zeros(x.len()),
            TargetDistribution::SphericalGaussian(g) => (x - &g.mode) / g.variance,
            TargetDistribution::GeneralGaussian(g) => &g.precision * (x - &g.mode),
            TargetDistribution::Exponential(e) => &e.direction * e.rate,
            TargetDistribution::LogConcave(l) => l.oracle.potential_gradient(x),
        }
    }

    /// Law of the target on the line `x + t theta`, or `None` when it has no closed form.
    pub fn chord_law(&self, x: &DVector<f64>, theta: &DVector<f64>) -> Option<ChordLaw> {
        match self {
            TargetDistribution::Uniform => Some(ChordLaw {
                curvature: 0.0,
                slope: 0.0,
            }),
            TargetDistribution::SphericalGaussian(g) => Some(ChordLaw {
                curvature: theta.norm_squared() / g.variance,
                slope: -theta.dot(&(x - &g.mode)) / g.variance,
            }),
            TargetDistribution::GeneralGaussian(g) => {
                let p_theta = &g.precision * theta;
                Some(ChordLaw {
                    curvature: theta.dot(&p_theta),
                    slope: -p_theta.dot(&(x - &g.mode)),
                })
            }
            TargetDistribution::Exponential(e) => Some(ChordLaw {
                curvature: 0.0,
                slope: -e.rate * e.direction.dot(theta),
            }),
            TargetDistribution::LogConcave(_) => None,
        }
    }
}

/// One-dimensional density `exp(-curvature t^2 / 2 + slope t)` on an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChordLaw {
    pub curvature: f64,
    pub slope: f64,
}

/// Rejection loops in [`ChordLaw::sample`] give up after this many proposals. Each loop
/// accepts with probability above 0.13, so hitting the cap means broken input.
pub const MAX_CHORD_ATTEMPTS: usize = 1000;

impl ChordLaw {
    /// Draws `t` from the law truncated to `[lo, hi]`. `None` when the rejection budget is
    /// exhausted.
    pub fn sample<R: RandomSource + ?Sized>(&self, lo: f64, hi: f64, rng: &mut R) -> Option<f64> {
        if hi <= lo {
            return Some(lo);
        }
        if self.curvature > 0.0 {
            let sd = self.curvature.sqrt().recip();
            let mean = self.slope / self.curvature;
            let z = truncated_standard_normal((lo - mean) / sd, (hi - mean) / sd, rng)?;
            Some((mean + sd * z).clamp(lo, hi))
        } else if self.slope != 0.0 {
            Some(truncated_exponential(self.slope, lo, hi, rng))
        } else {
            Some(rng.uniform_real(lo, hi))
        }
    }
}

/// Density proportional to `exp(slope t)` on `[lo, hi]`, by inversion.
fn truncated_exponential<R: RandomSource + ?Sized>(
    slope: f64,
    lo: f64,
    hi: f64,
    rng: &mut R,
) -> f64 {
    let u = rng.uniform_real(0.0, 1.0);
    let k = slope.abs();
    // Offset from the heavier end, in (-(hi - lo), 0].
    let offset = (u * (-k * (hi - lo)).exp_m1()).ln_1p() / k;
    if slope > 0.0 {
        (hi + offset).max(lo)
    } else {
        (lo - offset).min(hi)
    }
}

/// N(0, 1) truncated to `[a, b]`, choosing among normal, uniform and exponential
/// rejection so that every branch accepts with bounded probability.
fn truncated_standard_normal<R: RandomSource + ?Sized>(a: f64, b: f64, rng: &mut R) -> Option<f64> {
    if a > 0.0 {
        tail_normal(a, b, rng)
    } else if b < 0.0 {
        tail_normal(-b, -a, rng).map(|z| -z)
    } else if b - a >= 2.0 {
        (0..MAX_CHORD_ATTEMPTS)
            .map(|_| rng.standard_normal())
            .find(|z| (a..=b).contains(z))
    } else {
        (0..MAX_CHORD_ATTEMPTS).find_map(|_| {
            let z = rng.uniform_real(a, b);
            (rng.uniform_real(0.0, 1.0) < (-0.5 * z * z).exp()).then_some(z)
        })
    }
}

/// N(0, 1) truncated to `[a, b]` with `0 < a < b`.
fn tail_normal<R: RandomSource + ?Sized>(a: f64, b: f64, rng: &mut R) -> Option<f64> {
    if b - a < a.max(1.0).recip() {
        (0..MAX_CHORD_ATTEMPTS).find_map(|_| {
            let z = rng.uniform_real(a, b);
            (rng.uniform_real(0.0, 1.0) < (0.5 * (a * a - z * z)).exp()).then_some(z)
        })
    } else {
        // Exponential proposal with the optimal rate for the tail beyond a.
        let lambda = 0.5 * (a + (a * a + 4.0).sqrt());
        (0..MAX_CHORD_ATTEMPTS).find_map(|_| {
            let z = a + rng.standard_exponential() / lambda;
            let accept = (-0.5 * (z - lambda) * (z - lambda)).exp();
            (z <= b && rng.uniform_real(0.0, 1.0) < accept).then_some(z)
        })
    }
}
