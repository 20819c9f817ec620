//! Sequential quadratic programming for inequality-constrained nonlinear problems.
//!
//! This crate minimizes a smooth objective `f(x)` subject to inequality constraints
//! `c_i(x) >= 0` by solving a sequence of convex quadratic subproblems, following the
//! SNOPT line of SQP methods (Gill, Murray & Saunders).
//!
//! # Features
//! - Gradient and Jacobian cache tied to the exact point it was computed at, with a
//!   central finite-difference fallback for any callable that has no analytic gradient.
//! - Damped BFGS Hessian approximation with the elastic (SNOPT-style) curvature
//!   correction, and skipped updates instead of unsafe ones.
//! - Merit function combining the Lagrangian with a quadratic penalty on slack
//!   infeasibility; penalty weights are retuned in closed form to keep the QP step a
//!   descent direction.
//! - Backtracking merit line search and a KKT convergence test.
//! - Pluggable QP subsolver through [`QpSolver`]; the default [`InteriorPointQp`] is a
//!   dense Mehrotra predictor-corrector method.
//! - Generic over the scalar type through [`Real`], so `f32`, `f64` or any other
//!   `ndarray::NdFloat` backend can be used without touching solver logic.
//!
//! # Example
//!
//! Minimize `x1² + x2²` subject to `x1 + x2 - 1 >= 0`.
//!
//! ```
//! use elastic_sqp::{Constraint, Sqp, SqpSolution};
//! use ndarray::{array, Array1};
//!
//! let SqpSolution {
//!     final_point,
//!     final_value,
//!     converged,
//!     ..
//! } = Sqp::new(|x: &Array1<f64>| x.dot(x))
//!     .with_gradient(|x: &Array1<f64>| x * 2.0)
//!     .with_constraint(
//!         Constraint::new(|x: &Array1<f64>| x[0] + x[1] - 1.0)
//!             .with_gradient(|_: &Array1<f64>| array![1.0, 1.0]),
//!     )
//!     .with_progress_log(false)
//!     .solve(array![0.0, 0.0])
//!     .expect("SQP failed to solve");
//!
//! assert!(converged);
//! assert!((final_point[0] - 0.5).abs() < 1e-5);
//! assert!((final_point[1] - 0.5).abs() < 1e-5);
//! assert!((final_value - 0.5).abs() < 1e-5);
//! ```

use ndarray::NdFloat;
use num_traits::FromPrimitive;

mod convergence;
mod error;
mod gradient;
mod hessian;
mod linalg;
mod merit;
mod penalty;
mod problem;
pub mod qp;
mod solver;

pub use convergence::KktViolation;
pub use error::SqpError;
pub use gradient::GradientSource;
pub use penalty::min_norm_nonnegative;
pub use problem::{Constraint, GradientFn, ScalarFn};
pub use qp::{InteriorPointQp, QpError, QpProblem, QpSolution, QpSolver};
pub use solver::{Sqp, SqpSolution};

/// Scalar type the solver is generic over.
///
/// Anything `ndarray` can do dense linear algebra with, and that can be built from an
/// `f64` literal, qualifies; `f32` and `f64` are covered by the blanket impl.
pub trait Real: NdFloat + FromPrimitive {
    /// Converts an `f64` constant into this scalar type.
    fn lit(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// Lossy conversion used for diagnostics and error payloads.
    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T> Real for T where T: NdFloat + FromPrimitive {}
