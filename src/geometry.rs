/*!
Geometry seen by the walks.

The walks only talk to a [`ConvexBody`]: membership, an inscribed ball used for starting
points and default step scales, and the chord/boundary queries needed by hit-and-run and
the reflecting walks. [`HPolytope`] is the bundled implementation for bodies given as
`{x : Ax <= b}`.

# Examples

```rust
use convex_walks::geometry::{ConvexBody, HPolytope};
use nalgebra::DVector;

let cube = HPolytope::cube(3, 1.0);
assert_eq!(cube.dimension(), 3);
assert!(cube.is_feasible(&DVector::from_vec(vec![0.5, -0.2, 0.9])));

let hit = cube
    .ray_intersection(&DVector::zeros(3), &DVector::from_vec(vec![1.0, 0.0, 0.0]))
    .unwrap();
assert!((hit.forward - 1.0).abs() < 1e-12);
```
*/

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SamplingError};

/// A ball inscribed in a body: `center` is strictly feasible and `radius > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub center: DVector<f64>,
    pub radius: f64,
}

/// Result of shooting a ray `x + t v` through a body.
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    /// Largest `t >= 0` with `x + t v` still in the body.
    pub forward: f64,
    /// Largest `s >= 0` with `x - s v` still in the body.
    pub backward: f64,
    /// Index of the facet hit in the forward direction.
    pub facet: usize,
    /// Outer normal of that facet (not necessarily unit length).
    pub normal: DVector<f64>,
}

/// Borrowed `(A, b)` of a body of the form `{x : Ax <= b}`.
#[derive(Debug, Clone, Copy)]
pub struct LinearConstraints<'a> {
    pub a: &'a DMatrix<f64>,
    pub b: &'a DVector<f64>,
}

impl LinearConstraints<'_> {
    /// `b - A x`, one entry per constraint.
    pub fn slacks(&self, x: &DVector<f64>) -> DVector<f64> {
        self.b - self.a * x
    }
}

/// Read-only geometry of a convex body. Bodies are shared between chains, hence `Sync`.
pub trait ConvexBody: Sync {
    fn dimension(&self) -> usize;

    fn is_feasible(&self, x: &DVector<f64>) -> bool;

    fn inner_ball(&self) -> &Ball;

    /// Distances to the boundary along `direction` and against it, plus the facet hit
    /// going forward.
    fn ray_intersection(&self, x: &DVector<f64>, direction: &DVector<f64>) -> Result<RayHit>;

    /// Mirror `direction` at the facet described by `hit`: angle of incidence equals angle
    /// of reflection, length is preserved.
    fn reflect(&self, direction: &mut DVector<f64>, hit: &RayHit) {
        reflect_at(direction, &hit.normal);
    }

    /// The constraint system, for walks that work directly with `A` and `b`.
    fn linear_constraints(&self) -> Option<LinearConstraints<'_>> {
        None
    }

    /// Rough diameter, used to scale billiard trajectories.
    fn diameter_hint(&self) -> f64 {
        2.0 * (self.dimension() as f64).sqrt() * self.inner_ball().radius
    }
}

/// `v <- v - 2 (v.n / n.n) n`.
pub fn reflect_at(direction: &mut DVector<f64>, normal: &DVector<f64>) {
    let nn = normal.norm_squared();
    if nn > 0.0 {
        let c = 2.0 * direction.dot(normal) / nn;
        direction.axpy(-c, normal, 1.0);
    }
}

/// A polytope `{x : Ax <= b}` together with a certified inscribed ball.
#[derive(Debug, Clone, PartialEq)]
pub struct HPolytope {
    a: DMatrix<f64>,
    b: DVector<f64>,
    inner_ball: Ball,
}

impl HPolytope {
    /// Builds the polytope and takes the largest ball around `center` that fits inside.
    ///
    /// Finding the best centre is an optimization problem left to the caller; any strictly
    /// feasible point works.
    pub fn from_center(a: DMatrix<f64>, b: DVector<f64>, center: DVector<f64>) -> Result<Self> {
        check_shapes(&a, &b, center.len())?;
        let slacks = &b - &a * &center;
        let radius = a
            .row_iter()
            .zip(slacks.iter())
            .map(|(row, s)| s / row.norm())
            .fold(f64::INFINITY, f64::min);
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(SamplingError::InvalidParameter(
                "inner ball centre must be strictly inside the polytope".into(),
            ));
        }
        Ok(Self {
            a,
            b,
            inner_ball: Ball { center, radius },
        })
    }

    /// Builds the polytope with a caller-supplied inscribed ball, checking that it fits.
    pub fn with_inner_ball(a: DMatrix<f64>, b: DVector<f64>, ball: Ball) -> Result<Self> {
        check_shapes(&a, &b, ball.center.len())?;
        if ball.radius <= 0.0 {
            return Err(SamplingError::InvalidParameter(
                "inner ball radius must be positive".into(),
            ));
        }
        let slacks = &b - &a * &ball.center;
        let fits = a
            .row_iter()
            .zip(slacks.iter())
            .all(|(row, s)| *s >= ball.radius * row.norm() * (1.0 - 1e-12));
        if !fits {
            return Err(SamplingError::InvalidParameter(
                "inner ball is not contained in the polytope".into(),
            ));
        }
        Ok(Self {
            a,
            b,
            inner_ball: ball,
        })
    }

    /// The cube `[-half_width, half_width]^dim`.
    pub fn cube(dim: usize, half_width: f64) -> Self {
        let a = DMatrix::from_fn(2 * dim, dim, |i, j| {
            if i == j {
                1.0
            } else if i == j + dim {
                -1.0
            } else {
                0.0
            }
        });
        let b = DVector::from_element(2 * dim, half_width);
        Self {
            a,
            b,
            inner_ball: Ball {
                center: DVector::zeros(dim),
                radius: half_width,
            },
        }
    }

    /// The axis-aligned box `lower <= x <= upper`.
    pub fn boxed(lower: &[f64], upper: &[f64]) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(SamplingError::DimensionMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        let dim = lower.len();
        let a = DMatrix::from_fn(2 * dim, dim, |i, j| {
            if i == j {
                1.0
            } else if i == j + dim {
                -1.0
            } else {
                0.0
            }
        });
        let b = DVector::from_fn(2 * dim, |i, _| {
            if i < dim {
                upper[i]
            } else {
                -lower[i - dim]
            }
        });
        let center = DVector::from_fn(dim, |i, _| 0.5 * (lower[i] + upper[i]));
        Self::from_center(a, b, center)
    }

    /// The standard simplex `{x >= 0, sum(x) <= 1}`.
    pub fn simplex(dim: usize) -> Self {
        let a = DMatrix::from_fn(dim + 1, dim, |i, j| {
            if i < dim {
                if i == j {
                    -1.0
                } else {
                    0.0
                }
            } else {
                1.0
            }
        });
        let mut b = DVector::zeros(dim + 1);
        b[dim] = 1.0;
        // Incentre of the standard simplex.
        let d = dim as f64;
        let radius = 1.0 / (d + d.sqrt());
        Self {
            a,
            b,
            inner_ball: Ball {
                center: DVector::from_element(dim, radius),
                radius,
            },
        }
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }
}

fn check_shapes(a: &DMatrix<f64>, b: &DVector<f64>, dim: usize) -> Result<()> {
    if a.nrows() != b.len() {
        return Err(SamplingError::DimensionMismatch {
            expected: a.nrows(),
            found: b.len(),
        });
    }
    if a.ncols() != dim {
        return Err(SamplingError::DimensionMismatch {
            expected: a.ncols(),
            found: dim,
        });
    }
    if a.row_iter().any(|row| row.norm() == 0.0) {
        return Err(SamplingError::InvalidParameter(
            "constraint rows must be non-zero".into(),
        ));
    }
    Ok(())
}

impl ConvexBody for HPolytope {
    fn dimension(&self) -> usize {
        self.a.ncols()
    }

    fn is_feasible(&self, x: &DVector<f64>) -> bool {
        x.len() == self.dimension()
            && (&self.a * x)
                .iter()
                .zip(self.b.iter())
                .all(|(ax, b)| *ax <= *b)
    }

    fn inner_ball(&self) -> &Ball {
        &self.inner_ball
    }

    fn ray_intersection(&self, x: &DVector<f64>, direction: &DVector<f64>) -> Result<RayHit> {
        let ax = &self.a * x;
        let av = &self.a * direction;
        let mut forward = f64::INFINITY;
        let mut backward = f64::INFINITY;
        let mut facet = None;
        for i in 0..self.b.len() {
            // Points sitting a rounding error outside a facet are treated as on it.
            let slack = (self.b[i] - ax[i]).max(0.0);
            if av[i] > 0.0 {
                let t = slack / av[i];
                if t < forward {
                    forward = t;
                    facet = Some(i);
                }
            } else if av[i] < 0.0 {
                backward = backward.min(slack / -av[i]);
            }
        }
        match facet {
            Some(i) if backward.is_finite() => Ok(RayHit {
                forward,
                backward,
                facet: i,
                normal: self.a.row(i).transpose(),
            }),
            _ => Err(SamplingError::UnboundedDirection),
        }
    }

    fn linear_constraints(&self) -> Option<LinearConstraints<'_>> {
        Some(LinearConstraints {
            a: &self.a,
            b: &self.b,
        })
    }
}
