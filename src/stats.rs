/*!
Convergence diagnostics for sample batches.

Batches are `(d, n)` arrays with one sample per column, the layout produced by
[`ColumnSink`](crate::sink::ColumnSink). None of the functions here fail: degenerate
input (no samples, a coordinate that never moves, non-finite values) shows up as an
effective sample size of zero.

# Examples

```rust
use convex_walks::stats::effective_sample_size;
use ndarray::arr2;

let batch = arr2(&[[0.1, -0.4, 0.3, 0.9, -0.2, 0.5], [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]]);
let report = effective_sample_size(batch.view());
assert!(report.per_coordinate[0] > 0.0);
assert_eq!(report.per_coordinate[1], 0.0);
assert_eq!(report.minimum, 0.0);
```
*/

use std::fmt;

use log::warn;
use nalgebra::DVector;
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use num_traits::Float;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{Result, SamplingError};

/// Effective sample size per coordinate and its minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct EssReport {
    pub per_coordinate: Array1<f64>,
    /// Minimum over coordinates; 0 for a batch without coordinates.
    pub minimum: f64,
}

/// Biased autocovariance `c_k = sum_t (x_t - m)(x_{t+k} - m) / n` for lags `0..n`, via FFT.
pub fn autocovariance(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let mean = series.iter().sum::<f64>() / n as f64;
    let len = (2 * n).next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = series
        .iter()
        .map(|x| Complex::new(x - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(len)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(len).process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(len).process(&mut buffer);

    let scale = (len * n) as f64;
    buffer.iter().take(n).map(|c| c.re / scale).collect()
}

/// ESS of one series, summing autocorrelations up to `max_lag`.
fn series_ess(series: &[f64], max_lag: usize) -> f64 {
    let n = series.len();
    if n == 0 || series.iter().any(|x| !x.is_finite()) {
        return 0.0;
    }
    if series.iter().all(|x| *x == series[0]) {
        return 0.0;
    }
    let acov = autocovariance(series);
    let var = acov[0];
    if !(var > 0.0) {
        return 0.0;
    }
    // Positive, non-increasing prefix of the autocorrelation sequence.
    let mut sum = 0.0;
    let mut prev = 1.0;
    for c in acov.iter().skip(1).take(max_lag) {
        let rho = (c / var).min(prev);
        if rho <= 0.0 {
            break;
        }
        sum += rho;
        prev = rho;
    }
    (n as f64 / (1.0 + 2.0 * sum)).clamp(0.0, n as f64)
}

/**
Effective sample size of every coordinate of a `(d, n)` batch.

For each row: the autocorrelation sequence is computed by FFT, its positive,
non-increasing prefix is summed and `n / (1 + 2 sum)` is clipped to `[0, n]`. Rows that
are constant or contain non-finite values get 0.

A warning is logged when the minimum is below a tenth of `n`.
*/
pub fn effective_sample_size<T: Float>(batch: ArrayView2<T>) -> EssReport {
    let max_lag = batch.ncols().saturating_sub(1);
    effective_sample_size_with(batch, max_lag)
}

/// Like [`effective_sample_size`] but sums autocorrelations only up to `max_lag`.
pub fn effective_sample_size_with<T: Float>(batch: ArrayView2<T>, max_lag: usize) -> EssReport {
    let n = batch.ncols();
    let per_coordinate: Array1<f64> = batch
        .outer_iter()
        .map(|row| {
            let series: Vec<f64> = row
                .iter()
                .map(|x| x.to_f64().unwrap_or(f64::NAN))
                .collect();
            series_ess(&series, max_lag)
        })
        .collect();
    let minimum = per_coordinate.min().map(|m| *m).unwrap_or(0.0);
    if n > 0 && minimum < 0.1 * n as f64 {
        warn!(
            "effective sample size {:.1} is below 10% of the {} samples",
            minimum, n
        );
    }
    EssReport {
        per_coordinate,
        minimum,
    }
}

/// Stacks points into the `(d, n)` columnar layout.
pub fn points_to_columns(points: &[DVector<f64>]) -> Result<Array2<f64>> {
    let dim = points.first().map_or(0, |p| p.len());
    if let Some(p) = points.iter().find(|p| p.len() != dim) {
        return Err(SamplingError::DimensionMismatch {
            expected: dim,
            found: p.len(),
        });
    }
    Ok(Array2::from_shape_fn((dim, points.len()), |(i, j)| points[j][i]))
}

/**
Potential scale reduction (R-hat) per coordinate across chains of equal shape `(d, n)`.

Compares the variance between chain means with the variance within chains; values close
to 1 indicate the chains agree. `None` for fewer than two chains, fewer than two samples
per chain or chains of different shapes. Coordinates that are constant in every chain
give NaN.
*/
pub fn potential_scale_reduction(chains: &[ArrayView2<f64>]) -> Option<Array1<f64>> {
    let shape = chains.first()?.dim();
    let (_, n) = shape;
    if chains.len() < 2 || n < 2 || chains.iter().any(|c| c.dim() != shape) {
        return None;
    }
    let means: Vec<Array1<f64>> = chains
        .iter()
        .map(|c| c.mean_axis(Axis(1)))
        .collect::<Option<_>>()?;
    let means_sq: Vec<Array1<f64>> = chains
        .iter()
        .map(|c| c.mapv(|x| x * x).mean_axis(Axis(1)))
        .collect::<Option<_>>()?;
    let views: Vec<ArrayView1<f64>> = means.iter().map(|m| m.view()).collect();
    let mean = ndarray::stack(Axis(0), &views).ok()?;
    let views: Vec<ArrayView1<f64>> = means_sq.iter().map(|m| m.view()).collect();
    let mean_sq = ndarray::stack(Axis(0), &views).ok()?;

    let mean_chain = mean.mean_axis(Axis(0))?;
    let n_chains = chains.len() as f64;
    let n = n as f64;
    let between = (&mean - &mean_chain.insert_axis(Axis(0)))
        .pow2()
        .sum_axis(Axis(0))
        * (n / (n_chains - 1.0));
    let sm2 = (mean_sq - mean.pow2()) * n / (n - 1.0);
    let within = sm2.mean_axis(Axis(0))?;
    let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
    Some((var / within).sqrt())
}

/// Per-coordinate mean, standard deviation and effective sample size of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub samples: usize,
    pub mean: Array1<f64>,
    pub std_dev: Array1<f64>,
    pub ess: EssReport,
}

impl BatchSummary {
    pub fn new(batch: ArrayView2<f64>) -> Self {
        let (dim, samples) = batch.dim();
        let mean = batch
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(dim));
        let std_dev = if samples > 1 {
            batch.std_axis(Axis(1), 1.0)
        } else {
            Array1::zeros(dim)
        };
        Self {
            samples,
            mean,
            std_dev,
            ess: effective_sample_size(batch),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} samples, minimum ESS {:.1}", self.samples, self.ess.minimum)?;
        writeln!(f, "{:>5} {:>12} {:>12} {:>10}", "dim", "mean", "sd", "ess")?;
        for i in 0..self.mean.len() {
            writeln!(
                f,
                "{:>5} {:>12.5} {:>12.5} {:>10.1}",
                i, self.mean[i], self.std_dev[i], self.ess.per_coordinate[i]
            )?;
        }
        Ok(())
    }
}
