//! Billiard walks for the uniform distribution.
//!
//! A step shoots a particle from the current point in a uniformly random direction and
//! lets it travel a random length, bouncing off the boundary like a billiard ball. The
//! reflection count per step is capped; running into the cap ends the step with
//! [`SamplingError::ConvergenceFailure`] and leaves the walk where it was.
//!
//! [`BilliardWalk`] only uses [`ConvexBody::ray_intersection`]. [`AcceleratedBilliardWalk`]
//! works on `Ax <= b` directly and keeps `Ax`, `Av` and the Gram matrix `AA^T` around, so
//! a bounce costs one pass over the constraints instead of a matrix-vector product.

use nalgebra::{DMatrix, DVector};

use crate::core::RandomWalk;
use crate::distributions::TargetDistribution;
use crate::error::{Result, SamplingError};
use crate::geometry::ConvexBody;
use crate::random::RandomSource;

/// After hitting a facet the particle stops this fraction of the way there, keeping it
/// strictly inside.
pub(crate) const BOUNDARY_SHRINK: f64 = 0.995;

/// End state of a reflected flight.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Flight {
    pub position: DVector<f64>,
    pub direction: DVector<f64>,
    pub reflections: usize,
}

/// Moves from `x` along `velocity` for the distance `time * |velocity|`, reflecting at the
/// boundary. The returned direction has the length of `velocity`. `Ok(None)` when more
/// than `max_reflections` bounces would be needed.
pub(crate) fn reflective_flight<B: ConvexBody + ?Sized>(
    body: &B,
    x: &DVector<f64>,
    velocity: &DVector<f64>,
    time: f64,
    max_reflections: usize,
) -> Result<Option<Flight>> {
    let speed = velocity.norm();
    if speed == 0.0 || time <= 0.0 {
        return Ok(Some(Flight {
            position: x.clone(),
            direction: velocity.clone(),
            reflections: 0,
        }));
    }
    let mut position = x.clone();
    let mut direction = velocity / speed;
    let mut remaining = time * speed;
    for reflections in 0..=max_reflections {
        let hit = body.ray_intersection(&position, &direction)?;
        if remaining <= hit.forward {
            position.axpy(remaining, &direction, 1.0);
            return Ok(Some(Flight {
                position,
                direction: direction * speed,
                reflections,
            }));
        }
        let travel = BOUNDARY_SHRINK * hit.forward;
        position.axpy(travel, &direction, 1.0);
        remaining -= travel;
        body.reflect(&mut direction, &hit);
    }
    Ok(None)
}

/// Billiard walk driven by the body's ray-intersection oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct BilliardWalk {
    point: DVector<f64>,
    trajectory_length: f64,
    max_reflections: usize,
}

impl BilliardWalk {
    pub fn new(start: DVector<f64>, trajectory_length: f64, max_reflections: usize) -> Self {
        Self {
            point: start,
            trajectory_length,
            max_reflections,
        }
    }
}

impl RandomWalk for BilliardWalk {
    fn step<B, R>(&mut self, body: &B, _target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let length = self.trajectory_length * rng.standard_exponential();
        let direction = rng.unit_direction(self.point.len());
        match reflective_flight(body, &self.point, &direction, length, self.max_reflections)? {
            Some(flight) => {
                self.point = flight.position;
                Ok(())
            }
            None => Err(SamplingError::ConvergenceFailure {
                walk: self.name(),
                budget: self.max_reflections,
            }),
        }
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "billiard"
    }
}

/// Billiard walk on `Ax <= b` updating the constraint products in O(m) per bounce.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceleratedBilliardWalk {
    point: DVector<f64>,
    trajectory_length: f64,
    max_reflections: usize,
    a: DMatrix<f64>,
    b: DVector<f64>,
    /// `A A^T`; column `i` is `A a_i`, the change of `Av` per unit of reflection at facet `i`.
    gram: DMatrix<f64>,
}

impl AcceleratedBilliardWalk {
    pub fn new(
        start: DVector<f64>,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        trajectory_length: f64,
        max_reflections: usize,
    ) -> Self {
        Self {
            point: start,
            trajectory_length,
            max_reflections,
            gram: a * a.transpose(),
            a: a.clone(),
            b: b.clone(),
        }
    }

    /// Nearest facet ahead given `Ax` and `Av`.
    fn next_facet(&self, ax: &DVector<f64>, av: &DVector<f64>) -> Option<(f64, usize)> {
        (0..self.b.len())
            .filter(|&i| av[i] > 0.0)
            .map(|i| (((self.b[i] - ax[i]).max(0.0)) / av[i], i))
            .min_by(|l, r| l.0.total_cmp(&r.0))
    }
}

impl RandomWalk for AcceleratedBilliardWalk {
    fn step<B, R>(&mut self, _body: &B, _target: &TargetDistribution, rng: &mut R) -> Result<()>
    where
        B: ConvexBody + ?Sized,
        R: RandomSource + ?Sized,
    {
        let mut remaining = self.trajectory_length * rng.standard_exponential();
        let mut v = rng.unit_direction(self.point.len());
        let mut x = self.point.clone();
        // Recomputed every step so bounce updates cannot drift across steps.
        let mut ax = &self.a * &x;
        let mut av = &self.a * &v;

        for _ in 0..=self.max_reflections {
            let (lambda, facet) = self
                .next_facet(&ax, &av)
                .ok_or(SamplingError::UnboundedDirection)?;
            if remaining <= lambda {
                x.axpy(remaining, &v, 1.0);
                ax.axpy(remaining, &av, 1.0);
                self.point = x;
                return Ok(());
            }
            let travel = BOUNDARY_SHRINK * lambda;
            x.axpy(travel, &v, 1.0);
            ax.axpy(travel, &av, 1.0);
            remaining -= travel;

            let c = 2.0 * av[facet] / self.gram[(facet, facet)];
            v.axpy(-c, &self.a.row(facet).transpose(), 1.0);
            av.axpy(-c, &self.gram.column(facet), 1.0);
        }
        Err(SamplingError::ConvergenceFailure {
            walk: self.name(),
            budget: self.max_reflections,
        })
    }

    fn current_point(&self) -> &DVector<f64> {
        &self.point
    }

    fn name(&self) -> &'static str {
        "accelerated billiard"
    }
}
