use ndarray::Array1;

use crate::problem::Problem;
use crate::Real;

/// A primal-dual point `(x, s, π)` the merit function is evaluated at.
#[derive(Debug, Clone)]
pub(crate) struct Iterate<T> {
    pub(crate) x: Array1<T>,
    pub(crate) s: Array1<T>,
    pub(crate) pi: Array1<T>,
}

impl<T: Real> Iterate<T> {
    pub(crate) fn new(x: Array1<T>, s: Array1<T>, pi: Array1<T>) -> Self {
        Self { x, s, pi }
    }

    /// Convex combination `(1 - α) self + α target`, component by component.
    pub(crate) fn toward(&self, target: &Iterate<T>, alpha: T) -> Self {
        let keep = T::one() - alpha;
        Self {
            x: &self.x * keep + &target.x * alpha,
            s: &self.s * keep + &target.s * alpha,
            pi: &self.pi * keep + &target.pi * alpha,
        }
    }
}

#[derive(Debug)]
pub(crate) enum LineSearchError {
    MaxHalvings(usize),
}

/// Elastic merit function
/// `φ(x, s, π) = f(x) - π'(c(x) - s) + ½ Σ ρ_j (c_j(x) - s_j)²`.
pub(crate) fn merit<T: Real>(problem: &Problem<T>, rho: &Array1<T>, point: &Iterate<T>) -> T {
    let residual = problem.constraint_values(&point.x) - &point.s;
    let penalty = residual
        .iter()
        .zip(rho.iter())
        .fold(T::zero(), |acc, (&r, &w)| acc + w * r * r);
    problem.objective(&point.x) - point.pi.dot(&residual) + T::lit(0.5) * penalty
}

/// Backtracks from the full QP step until the merit function strictly decreases.
///
/// Starts at `α = 1` and halves at most `max_halvings` times. Returns the accepted
/// iterate and its step length.
pub(crate) fn backtracking_line_search<T: Real>(
    problem: &Problem<T>,
    rho: &Array1<T>,
    current: &Iterate<T>,
    candidate: &Iterate<T>,
    max_halvings: usize,
) -> Result<(Iterate<T>, T), LineSearchError> {
    let half = T::lit(0.5);
    let m0 = merit(problem, rho, current);
    let mut alpha = T::one();
    for _ in 0..max_halvings {
        let trial = current.toward(candidate, alpha);
        let phi = merit(problem, rho, &trial);
        log::trace!(
            "[SQP LineSearch] alpha = {:.3e}, phi = {:.10e}, phi0 = {:.10e}",
            alpha,
            phi,
            m0
        );
        if phi < m0 {
            return Ok((trial, alpha));
        }
        alpha = alpha * half;
    }
    Err(LineSearchError::MaxHalvings(max_halvings))
}
