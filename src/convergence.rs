use ndarray::Array1;

use crate::error::SqpError;
use crate::gradient::GradientCache;
use crate::linalg::max_abs;
use crate::problem::Problem;
use crate::Real;

/// The first approximate KKT condition found violated, with the offending index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KktViolation {
    /// `π_i < -τ_π`.
    DualInfeasible { index: usize, value: f64 },
    /// `c_i(x) < -τ_x`.
    PrimalInfeasible { index: usize, value: f64 },
    /// `c_i(x) π_i > τ_π`.
    Complementarity { index: usize, value: f64 },
    /// `|(∇f - J'π)_j| > τ_π`.
    Stationarity { index: usize, value: f64 },
}

/// Tests the approximate KKT conditions at `(x, π)`.
///
/// Tolerances scale with the iterate: `τ_x = tol (1 + max|x|)` and
/// `τ_π = tol (1 + max|π|)`. The cache is refreshed at `x` as a side effect.
pub(crate) fn check_kkt<T: Real>(
    problem: &Problem<T>,
    cache: &mut GradientCache<T>,
    x: &Array1<T>,
    pi: &Array1<T>,
    tol: T,
) -> Result<Result<(), KktViolation>, SqpError> {
    let tau_x = tol * (T::one() + max_abs(x.iter().copied()));
    let tau_pi = tol * (T::one() + max_abs(pi.iter().copied()));

    if let Some((index, &p)) = pi.iter().enumerate().find(|&(_, &p)| p < -tau_pi) {
        return Ok(Err(KktViolation::DualInfeasible {
            index,
            value: p.as_f64(),
        }));
    }

    let c = problem.constraint_values(x);
    for (index, (&ci, &pi_i)) in c.iter().zip(pi.iter()).enumerate() {
        if ci < -tau_x {
            return Ok(Err(KktViolation::PrimalInfeasible {
                index,
                value: ci.as_f64(),
            }));
        }
        if ci * pi_i > tau_pi {
            return Ok(Err(KktViolation::Complementarity {
                index,
                value: (ci * pi_i).as_f64(),
            }));
        }
    }

    cache.ensure(problem, x)?;
    let stationarity = cache.grad() - &cache.jacobian().t().dot(pi);
    if let Some((index, &d)) = stationarity
        .iter()
        .enumerate()
        .find(|&(_, &d)| d.abs() > tau_pi)
    {
        return Ok(Err(KktViolation::Stationarity {
            index,
            value: d.as_f64(),
        }));
    }
    Ok(Ok(()))
}

/// Boolean form of [`check_kkt`].
pub(crate) fn is_converged<T: Real>(
    problem: &Problem<T>,
    cache: &mut GradientCache<T>,
    x: &Array1<T>,
    pi: &Array1<T>,
    tol: T,
) -> Result<bool, SqpError> {
    let verdict = check_kkt(problem, cache, x, pi, tol)?;
    if let Err(violation) = verdict {
        log::debug!("[SQP] not converged: {:?}", violation);
    }
    Ok(verdict.is_ok())
}

#[cfg(test)]
mod tests {
    use super::{check_kkt, is_converged, KktViolation};
    use crate::gradient::GradientCache;
    use crate::problem::{Constraint, Problem};
    use ndarray::{array, Array1};
    use spectral::prelude::*;

    const TOL: f64 = 1e-8;

    // min x1² + x2²  s.t.  x1 + x2 - 1 >= 0, optimum (0.5, 0.5) with π = 1.
    fn problem() -> Problem<f64> {
        let mut p = Problem::<f64>::new(Box::new(|x: &Array1<f64>| x.dot(x)));
        p.objective_gradient = Some(Box::new(|x: &Array1<f64>| x * 2.0));
        p.constraints.push(
            Constraint::new(|x: &Array1<f64>| x[0] + x[1] - 1.0)
                .with_gradient(|_: &Array1<f64>| array![1.0, 1.0]),
        );
        p
    }

    fn verdict(x: Array1<f64>, pi: Array1<f64>) -> Result<(), KktViolation> {
        let p = problem();
        let mut cache = GradientCache::new(TOL);
        check_kkt(&p, &mut cache, &x, &pi, TOL).unwrap()
    }

    #[test]
    fn optimum_passes_all_conditions() {
        assert_that!(&verdict(array![0.5, 0.5], array![1.0])).is_ok();
    }

    #[test]
    fn negative_multiplier_fails_dual_feasibility() {
        let v = verdict(array![0.5, 0.5], array![-1e-3]);
        assert!(matches!(
            v,
            Err(KktViolation::DualInfeasible { index: 0, .. })
        ));
    }

    #[test]
    fn infeasible_point_fails_primal_feasibility() {
        // x = (0.25, 0.25), π = 0.5: stationary (∇f = (0.5, 0.5) = J'π), dual feasible,
        // complementarity c π = -0.25 < τ, only c < 0 is wrong.
        let v = verdict(array![0.25, 0.25], array![0.5]);
        assert!(matches!(
            v,
            Err(KktViolation::PrimalInfeasible { index: 0, .. })
        ));
    }

    #[test]
    fn inactive_constraint_with_positive_multiplier_fails_complementarity() {
        // x = (1, 1), π = 2 is stationary (∇f = (2, 2)) but c = 1 > 0 while π > 0.
        let v = verdict(array![1.0, 1.0], array![2.0]);
        assert!(matches!(
            v,
            Err(KktViolation::Complementarity { index: 0, .. })
        ));
    }

    #[test]
    fn non_stationary_point_fails_stationarity() {
        // Feasible with c = 0 and π >= 0, but ∇f - J'π = (0.6, 1.4) - (0.5, 0.5) != 0.
        let v = verdict(array![0.3, 0.7], array![0.5]);
        assert!(matches!(v, Err(KktViolation::Stationarity { .. })));
    }

    #[test]
    fn stationarity_is_checked_without_constraints() {
        let mut p = Problem::<f64>::new(Box::new(|x: &Array1<f64>| x.dot(x)));
        p.objective_gradient = Some(Box::new(|x: &Array1<f64>| x * 2.0));
        let mut cache = GradientCache::new(TOL);
        let empty = Array1::zeros(0);
        assert!(!is_converged(&p, &mut cache, &array![1e-3, 0.0], &empty, TOL).unwrap());
        assert!(is_converged(&p, &mut cache, &array![0.0, 0.0], &empty, TOL).unwrap());
    }

    #[test]
    fn tolerances_scale_with_iterate_size() {
        // Slightly infeasible, within τ_x = tol (1 + max|x|) only because |x| is large.
        let x = array![1e4, -1e4 + 1.0 - 5e-5];
        let mut p = Problem::<f64>::new(Box::new(|x: &Array1<f64>| 0.0 * x[0]));
        p.objective_gradient = Some(Box::new(|_: &Array1<f64>| array![0.0, 0.0]));
        p.constraints.push(
            Constraint::new(|x: &Array1<f64>| x[0] + x[1] - 1.0)
                .with_gradient(|_: &Array1<f64>| array![1.0, 1.0]),
        );
        let mut cache = GradientCache::new(TOL);
        assert!(is_converged(&p, &mut cache, &x, &array![0.0], TOL).unwrap());
    }
}
