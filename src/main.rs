//! Samples a standard Gaussian truncated to a cube on several chains and prints diagnostics.

use convex_walks::core::{run_chains, SamplingDriver};
use convex_walks::distributions::{SphericalGaussian, TargetDistribution};
use convex_walks::geometry::HPolytope;
use convex_walks::kernel::{ExactHmcParams, WalkConfig};
use convex_walks::stats::{potential_scale_reduction, BatchSummary};
use ndarray::{concatenate, ArrayView2, Axis};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const DIM: usize = 5;
    const SAMPLES: usize = 5_000;
    const BURNIN: usize = 500;
    const N_CHAINS: usize = 4;
    const SEED: u64 = 42;

    let cube = HPolytope::cube(DIM, 1.0);
    let target = TargetDistribution::from(SphericalGaussian::standard(DIM));
    let config = WalkConfig::GaussianHmcExact(ExactHmcParams::default());
    let driver = SamplingDriver::new(1, SAMPLES, BURNIN);

    let chains = run_chains(&cube, &config, &target, None, &driver, N_CHAINS, SEED, true)?;
    for (i, chain) in chains.iter().enumerate() {
        println!("Chain {i}: {}", chain.report);
    }

    let views: Vec<ArrayView2<f64>> = chains.iter().map(|c| c.samples.view()).collect();
    if let Some(rhat) = potential_scale_reduction(&views) {
        println!("R-hat: {rhat:.4}");
    }
    let pooled = concatenate(Axis(1), &views)?;
    println!("{}", BatchSummary::new(pooled.view()));
    Ok(())
}
