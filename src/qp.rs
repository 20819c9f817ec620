//! Convex quadratic subproblems and the default dense interior-point solver.
//!
//! Problems have the canonical form
//!
//! ```text
//! minimize    c'x + ½ x'Qx
//! subject to  A_eq x = b_eq
//!             A_ineq x >= b_ineq
//! ```
//!
//! with `Q` symmetric positive (semi-)definite. Solutions report the slack
//! `s = A_ineq x - b_ineq >= 0` and the inequality multipliers `π >= 0`.

use ndarray::{s, Array1, Array2};

use crate::linalg::{chol_decompose, chol_solve, lu_solve, max_abs};
use crate::Real;

#[derive(Debug, thiserror::Error)]
pub enum QpError {
    #[error("QP dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("the Newton system at QP iteration {iteration} is singular")]
    SingularSystem { iteration: usize },
}

/// A convex QP in canonical form.
#[derive(Debug, Clone)]
pub struct QpProblem<T> {
    pub q: Array2<T>,
    pub c: Array1<T>,
    pub a_eq: Array2<T>,
    pub b_eq: Array1<T>,
    pub a_ineq: Array2<T>,
    pub b_ineq: Array1<T>,
}

impl<T: Real> QpProblem<T> {
    /// An unconstrained QP; add rows with [`with_equalities`](Self::with_equalities) and
    /// [`with_inequalities`](Self::with_inequalities).
    pub fn new(q: Array2<T>, c: Array1<T>) -> Self {
        let n = c.len();
        Self {
            q,
            c,
            a_eq: Array2::zeros((0, n)),
            b_eq: Array1::zeros(0),
            a_ineq: Array2::zeros((0, n)),
            b_ineq: Array1::zeros(0),
        }
    }

    pub fn with_equalities(mut self, a_eq: Array2<T>, b_eq: Array1<T>) -> Self {
        self.a_eq = a_eq;
        self.b_eq = b_eq;
        self
    }

    pub fn with_inequalities(mut self, a_ineq: Array2<T>, b_ineq: Array1<T>) -> Self {
        self.a_ineq = a_ineq;
        self.b_ineq = b_ineq;
        self
    }

    pub fn num_variables(&self) -> usize {
        self.c.len()
    }

    /// `c'x + ½ x'Qx`.
    pub fn objective(&self, x: &Array1<T>) -> T {
        self.c.dot(x) + T::lit(0.5) * x.dot(&self.q.dot(x))
    }

    fn validate(&self) -> Result<(), QpError> {
        let n = self.num_variables();
        let checks = [
            ("Q rows", n, self.q.nrows()),
            ("Q columns", n, self.q.ncols()),
            ("A_eq columns", n, self.a_eq.ncols()),
            ("b_eq length", self.a_eq.nrows(), self.b_eq.len()),
            ("A_ineq columns", n, self.a_ineq.ncols()),
            ("b_ineq length", self.a_ineq.nrows(), self.b_ineq.len()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(QpError::DimensionMismatch {
                    what,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Result of a QP solve. The caller decides whether `residual` and `gap` are small enough.
#[derive(Debug, Clone)]
pub struct QpSolution<T> {
    /// Primal solution.
    pub x: Array1<T>,
    /// Inequality slack `A_ineq x - b_ineq`.
    pub s: Array1<T>,
    /// Inequality multipliers.
    pub pi: Array1<T>,
    /// Equality multipliers.
    pub y: Array1<T>,
    pub objective: T,
    /// Largest infinity norm among the dual, equality and inequality residuals.
    pub residual: T,
    /// Complementarity `s'π`.
    pub gap: T,
    pub iterations: usize,
}

/// A solver for [`QpProblem`].
///
/// Implementations stop when both the residual and the gap drop below `tolerance`, or
/// after `max_iterations`, and return their last iterate either way. Errors are reserved
/// for breakdowns that leave no meaningful iterate.
pub trait QpSolver<T: Real> {
    fn solve(
        &self,
        problem: &QpProblem<T>,
        tolerance: T,
        max_iterations: usize,
    ) -> Result<QpSolution<T>, QpError>;
}

/// Dense primal-dual interior-point method with Mehrotra's predictor-corrector.
///
/// The Newton system is reduced to `Q + A'(Z/S)A` in the primal variables and solved by
/// Cholesky, or by pivoted LU on the symmetric saddle-point system when equality rows
/// are present.
#[derive(Debug, Clone, Copy)]
pub struct InteriorPointQp {
    step_to_boundary: f64,
}

impl Default for InteriorPointQp {
    fn default() -> Self {
        Self {
            step_to_boundary: 0.99,
        }
    }
}

impl InteriorPointQp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of the distance to the boundary of `s, π >= 0` taken per step (default 0.99),
    /// clamped to `[0.5, 0.9999]`.
    pub fn with_step_to_boundary(mut self, fraction: f64) -> Self {
        self.step_to_boundary = fraction.clamp(0.5, 0.9999);
        self
    }
}

// Search direction of one Newton solve.
struct Direction<T> {
    dx: Array1<T>,
    dy: Array1<T>,
    ds: Array1<T>,
    dz: Array1<T>,
}

struct Residuals<T> {
    dual: Array1<T>,
    eq: Array1<T>,
    ineq: Array1<T>,
}

impl<T: Real> Residuals<T> {
    fn at(
        problem: &QpProblem<T>,
        x: &Array1<T>,
        y: &Array1<T>,
        slack: &Array1<T>,
        mult: &Array1<T>,
    ) -> Self {
        let dual = problem.q.dot(x) + &problem.c
            - problem.a_eq.t().dot(y)
            - problem.a_ineq.t().dot(mult);
        let eq = problem.a_eq.dot(x) - &problem.b_eq;
        let ineq = problem.a_ineq.dot(x) - slack - &problem.b_ineq;
        Self { dual, eq, ineq }
    }

    fn norm(&self) -> T {
        max_abs(
            self.dual
                .iter()
                .chain(self.eq.iter())
                .chain(self.ineq.iter())
                .copied(),
        )
    }
}

// Largest α keeping v + α dv >= 0; infinite when no component decreases.
fn max_step<T: Real>(v: &Array1<T>, dv: &Array1<T>) -> T {
    v.iter()
        .zip(dv.iter())
        .filter(|&(_, &d)| d < T::zero())
        .fold(T::infinity(), |acc, (&vi, &d)| acc.min(-vi / d))
}

// Solves the reduced Newton system for the complementarity right-hand side `rc`
// (the target of Z ds + S dz = rc).
fn newton_direction<T: Real>(
    problem: &QpProblem<T>,
    residuals: &Residuals<T>,
    slack: &Array1<T>,
    mult: &Array1<T>,
    rc: &Array1<T>,
    iteration: usize,
) -> Result<Direction<T>, QpError> {
    let n = problem.num_variables();
    let p = problem.a_eq.nrows();
    let a = &problem.a_ineq;

    // K = Q + A' diag(π / s) A
    let weights = mult / slack;
    let mut k = problem.q.clone();
    for (row, &wi) in a.rows().into_iter().zip(weights.iter()) {
        for i in 0..n {
            let ri = row[i] * wi;
            if ri == T::zero() {
                continue;
            }
            for j in 0..n {
                k[[i, j]] += ri * row[j];
            }
        }
    }
    let correction = (rc - &(mult * &residuals.ineq)) / slack;
    let rhs = a.t().dot(&correction) - &residuals.dual;

    let (dx, dy) = if p == 0 {
        let dx = match chol_decompose(&k) {
            Some(l) => chol_solve(&l, &rhs),
            None => lu_solve(&k, &rhs).ok_or(QpError::SingularSystem { iteration })?,
        };
        (dx, Array1::<T>::zeros(0))
    } else {
        // [K  E'] [ dx]   [ rhs ]
        // [E  0 ] [-dy] = [-r_eq]
        let size = n + p;
        let mut kkt = Array2::<T>::zeros((size, size));
        kkt.slice_mut(s![..n, ..n]).assign(&k);
        kkt.slice_mut(s![..n, n..]).assign(&problem.a_eq.t());
        kkt.slice_mut(s![n.., ..n]).assign(&problem.a_eq);
        let mut full_rhs = Array1::<T>::zeros(size);
        full_rhs.slice_mut(s![..n]).assign(&rhs);
        full_rhs
            .slice_mut(s![n..])
            .assign(&residuals.eq.mapv(|v| -v));
        let sol = lu_solve(&kkt, &full_rhs).ok_or(QpError::SingularSystem { iteration })?;
        (sol.slice(s![..n]).to_owned(), sol.slice(s![n..]).mapv(|v| -v))
    };

    let ds = a.dot(&dx) + &residuals.ineq;
    let dz = (rc - &(mult * &ds)) / slack;
    Ok(Direction { dx, dy, ds, dz })
}

impl<T: Real> QpSolver<T> for InteriorPointQp {
    fn solve(
        &self,
        problem: &QpProblem<T>,
        tolerance: T,
        max_iterations: usize,
    ) -> Result<QpSolution<T>, QpError> {
        problem.validate()?;
        let n = problem.num_variables();
        let p = problem.a_eq.nrows();
        let m = problem.a_ineq.nrows();
        let one = T::one();
        let m_t = T::lit(m as f64);
        let to_boundary = T::lit(self.step_to_boundary);

        let mut x = Array1::<T>::zeros(n);
        let mut y = Array1::<T>::zeros(p);
        let mut slack = (problem.a_ineq.dot(&x) - &problem.b_ineq).mapv(|v| v.max(one));
        let mut mult = Array1::<T>::from_elem(m, one);
        let mut iteration = 0;

        loop {
            let residuals = Residuals::at(problem, &x, &y, &slack, &mult);
            let residual = residuals.norm();
            let gap = slack.dot(&mult);
            let done = residual < tolerance && gap < tolerance;
            if done || iteration >= max_iterations || !residual.is_finite() || !gap.is_finite() {
                if !done {
                    log::debug!(
                        "[SQP QP] stopped after {} iterations: residual = {:.3e}, gap = {:.3e}",
                        iteration,
                        residual,
                        gap
                    );
                }
                return Ok(QpSolution {
                    objective: problem.objective(&x),
                    x,
                    s: slack,
                    pi: mult,
                    y,
                    residual,
                    gap,
                    iterations: iteration,
                });
            }
            iteration += 1;

            // Predictor: Newton step aimed at zero complementarity.
            let rc_affine = (&slack * &mult).mapv(|v| -v);
            let affine =
                newton_direction(problem, &residuals, &slack, &mult, &rc_affine, iteration)?;

            let direction = if m > 0 {
                let mu = gap / m_t;
                let alpha_affine = max_step(&slack, &affine.ds)
                    .min(max_step(&mult, &affine.dz))
                    .min(one);
                let mu_affine = (&slack + &(&affine.ds * alpha_affine))
                    .dot(&(&mult + &(&affine.dz * alpha_affine)))
                    / m_t;
                let sigma = if mu > T::zero() {
                    (mu_affine / mu).powi(3).min(one)
                } else {
                    T::zero()
                };
                // Corrector: second-order term plus centering.
                let target = sigma * mu;
                let rc = (&rc_affine - &(&affine.ds * &affine.dz)).mapv(|v| v + target);
                newton_direction(problem, &residuals, &slack, &mult, &rc, iteration)?
            } else {
                affine
            };

            let alpha = if m > 0 {
                (to_boundary
                    * max_step(&slack, &direction.ds).min(max_step(&mult, &direction.dz)))
                .min(one)
            } else {
                one
            };
            x = x + &direction.dx * alpha;
            y = y + &direction.dy * alpha;
            slack = slack + &direction.ds * alpha;
            mult = mult + &direction.dz * alpha;
        }
    }
}
