use crate::qp::QpError;

/// An error type for clear diagnostics.
///
/// Exhausting the iteration budget is deliberately not an error: the last iterate is
/// returned with `converged == false`.
#[derive(Debug, thiserror::Error)]
pub enum SqpError {
    #[error(
        "The QP subproblem at iteration {iteration} did not reach the minor tolerance {tolerance:e} (residual = {residual:e}, gap = {gap:e}) within its iteration budget."
    )]
    QpSubproblemFailed {
        /// Outer iteration whose subproblem failed.
        iteration: usize,
        /// Primal-dual residual reported by the QP solver.
        residual: f64,
        /// Duality gap reported by the QP solver.
        gap: f64,
        /// Minor tolerance both quantities had to beat.
        tolerance: f64,
    },
    #[error("The QP solver broke down at iteration {iteration}: {source}")]
    QpBreakdown {
        iteration: usize,
        #[source]
        source: QpError,
    },
    #[error(
        "The merit line search found no decrease after {max_halvings} halvings at iteration {iteration}. The current point may be a stationary point of the merit function, or the curvature model is degenerate."
    )]
    LineSearchFailed {
        iteration: usize,
        max_halvings: usize,
    },
    #[error("The gradient or Jacobian contained NaN or infinity at iteration {iteration}.")]
    GradientIsNaN { iteration: usize },
    #[error("Dimension mismatch in {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}
