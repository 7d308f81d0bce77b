/*!
Random-walk samplers for distributions restricted to convex bodies.

A body implements [`geometry::ConvexBody`] (membership, an inner ball and ray
intersections). A [`kernel::WalkConfig`] names the walk, a
[`distributions::TargetDistribution`] the law to sample, and
[`core::sample_points`] drives the resulting [`kernel::WalkKernel`] into a
[`sink::CollectionSink`]. [`stats`] computes effective sample sizes and R-hat for the
collected batch.
*/

pub mod ball_walk;
pub mod barrier;
pub mod billiard;
pub mod core;
pub mod distributions;
pub mod error;
pub mod exact_hmc;
pub mod geometry;
pub mod hit_and_run;
pub mod hmc;
pub mod kernel;
pub mod nuts;
pub mod random;
pub mod sink;
pub mod stats;
