use ndarray::{Array1, Array2};

use crate::error::SqpError;
use crate::gradient::GradientCache;
use crate::penalty::min_norm_nonnegative;
use crate::problem::Problem;
use crate::Real;

/// What happened to the Hessian approximation in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HessianUpdate {
    /// The plain curvature test passed.
    Applied,
    /// The test passed only after the elastic modification of `y`.
    Corrected,
    /// No safe update was found; `H` is unchanged.
    Skipped,
}

/// Tuning of the damped update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DampingParams<T> {
    /// Fraction of the predicted curvature `α p'Hp` that `y'δ` may fall short by.
    pub(crate) eta: T,
    /// Largest `‖ω‖²` the elastic correction may use.
    pub(crate) correction_limit: T,
}

/// Quasi-Newton approximation of the Hessian of the Lagrangian.
pub(crate) struct HessianApprox<T> {
    matrix: Array2<T>,
}

impl<T: Real> HessianApprox<T> {
    pub(crate) fn identity(n: usize) -> Self {
        Self {
            matrix: Array2::eye(n),
        }
    }

    pub(crate) fn matrix(&self) -> &Array2<T> {
        &self.matrix
    }

    /// Damped BFGS update for the step `x0 -> x1` taken along `p = x_hat - x0`.
    ///
    /// `cache` must hold the gradients at `x0` on entry; it holds those at `x1` on exit.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update(
        &mut self,
        problem: &Problem<T>,
        cache: &mut GradientCache<T>,
        x0: &Array1<T>,
        x1: &Array1<T>,
        x_hat: &Array1<T>,
        pi1: &Array1<T>,
        alpha: T,
        params: DampingParams<T>,
    ) -> Result<HessianUpdate, SqpError> {
        cache.ensure(problem, x0)?;
        let grad0 = cache.grad().clone();
        let jacobian0 = cache.jacobian().clone();

        cache.ensure(problem, x1)?;
        let delta = x1 - x0;
        let delta_j = cache.jacobian() - &jacobian0;
        let mut y = cache.grad() - &grad0 - delta_j.t().dot(pi1);

        let p = x_hat - x0;
        let sigma = alpha * (T::one() - params.eta) * p.dot(&self.matrix.dot(&p));

        let mut y_delta = y.dot(&delta);
        let mut outcome = if y_delta >= sigma {
            HessianUpdate::Applied
        } else {
            HessianUpdate::Skipped
        };

        if outcome == HessianUpdate::Skipped {
            // Elastic modification: shift y along constraint curvature, weighted by ω >= 0.
            let beta = sigma - y_delta;
            let v = delta_j.dot(&delta);
            let w = problem.constraint_values(x1)
                - &problem.constraint_values(x0)
                - jacobian0.dot(&delta);
            let a = &v * &w;
            let max_a = a.iter().copied().fold(T::neg_infinity(), T::max);
            let min_a = a.iter().copied().fold(T::infinity(), T::min);
            if (beta > T::zero() && max_a > T::zero()) || (beta < T::zero() && min_a < T::zero())
            {
                let omega = min_norm_nonnegative(&a, beta);
                let omega_norm_sq = omega.dot(&omega);
                if omega_norm_sq < params.correction_limit {
                    y = y + delta_j.t().dot(&(&omega * &w));
                    y_delta = y.dot(&delta);
                    if y_delta >= T::zero() {
                        outcome = HessianUpdate::Corrected;
                    }
                    log::debug!(
                        "[SQP Hessian] elastic correction, |omega|^2 = {:.3e}, y'delta = {:.3e}",
                        omega_norm_sq,
                        y_delta
                    );
                }
            }
        }

        if outcome == HessianUpdate::Skipped {
            log::info!(
                "[SQP Hessian] no update: y'delta = {:.10e}, sigma = {:.10e}",
                y_delta,
                sigma
            );
            return Ok(outcome);
        }

        let q = self.matrix.dot(&delta);
        let q_delta = q.dot(&delta);
        if !(y_delta > T::zero()) || !(q_delta > T::zero()) {
            // Zero-length step or flat curvature: the secant formula is undefined.
            log::info!(
                "[SQP Hessian] no update: y'delta = {:.10e}, q'delta = {:.10e}",
                y_delta,
                q_delta
            );
            return Ok(HessianUpdate::Skipped);
        }
        self.secant_update(&y, y_delta, &q, q_delta);
        Ok(outcome)
    }

    // H <- H + y y' / (y'δ) + q q' / (q'δ), with q = Hδ.
    fn secant_update(&mut self, y: &Array1<T>, y_delta: T, q: &Array1<T>, q_delta: T) {
        let n = self.matrix.nrows();
        for i in 0..n {
            for j in 0..n {
                self.matrix[[i, j]] += y[i] * y[j] / y_delta + q[i] * q[j] / q_delta;
            }
        }
        // Keep exact symmetry against rounding.
        for i in 0..n {
            for j in (i + 1)..n {
                let v = T::lit(0.5) * (self.matrix[[i, j]] + self.matrix[[j, i]]);
                self.matrix[[i, j]] = v;
                self.matrix[[j, i]] = v;
            }
        }
    }
}
