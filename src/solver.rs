use ndarray::{Array1, Array2};

use crate::convergence::is_converged;
use crate::error::SqpError;
use crate::gradient::{GradientCache, GradientSource};
use crate::hessian::{DampingParams, HessianApprox, HessianUpdate};
use crate::merit::{backtracking_line_search, Iterate, LineSearchError};
use crate::penalty::update_rho;
use crate::problem::{Constraint, Problem};
use crate::qp::{InteriorPointQp, QpProblem, QpSolver};
use crate::Real;

/// A summary of a finished optimization run.
///
/// Reaching the iteration limit is not an error; check `converged` to tell a KKT point
/// from the last iterate of an exhausted run.
#[derive(Debug, Clone)]
pub struct SqpSolution<T> {
    /// The final primal iterate.
    pub final_point: Array1<T>,
    /// Objective value at `final_point`.
    pub final_value: T,
    /// Constraint values `c(x)` at `final_point`.
    pub constraint_values: Array1<T>,
    /// Final multiplier estimates, one per constraint.
    pub multipliers: Array1<T>,
    /// Final slack estimates, one per constraint.
    pub slacks: Array1<T>,
    /// Penalty weights of the merit function when the run stopped.
    pub penalty: Array1<T>,
    /// Whether the approximate KKT conditions held at `final_point`.
    pub converged: bool,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Total iterations spent inside the QP subsolver.
    pub minor_iterations: usize,
    /// Iterations in which the Hessian approximation was updated.
    pub hessian_updates: usize,
    /// Iterations in which no safe Hessian update was found.
    pub hessian_skips: usize,
    /// Number of points at which gradients and the Jacobian were evaluated.
    pub gradient_evals: usize,
    /// How each gradient was obtained: the objective first, then every constraint.
    pub gradient_sources: Vec<GradientSource>,
}

// Configuration shared by every run of one solver.
struct SqpConfig<T> {
    tolerance: T,
    minor_tolerance: Option<T>,
    max_iterations: usize,
    qp_max_iterations: usize,
    max_halvings: usize,
    eta: T,
    correction_limit: T,
    log_progress: bool,
}

impl<T: Real> SqpConfig<T> {
    fn new() -> Self {
        Self {
            // ε^(1/3) balances truncation and rounding in a central difference.
            tolerance: T::epsilon().cbrt(),
            minor_tolerance: None,
            max_iterations: 100,
            qp_max_iterations: 100,
            max_halvings: 30,
            eta: T::lit(0.5),
            correction_limit: T::lit(1e6),
            log_progress: true,
        }
    }

    fn minor_tolerance(&self) -> T {
        self.minor_tolerance
            .unwrap_or_else(|| self.tolerance / T::lit(100.0))
    }
}

// Mutable state of one `solve` call; never outlives it.
struct SolveState<T> {
    hessian: HessianApprox<T>,
    rho: Array1<T>,
    cache: GradientCache<T>,
    iterate: Iterate<T>,
}

/// A configurable SQP solver.
pub struct Sqp<T, Q = InteriorPointQp> {
    problem: Problem<T>,
    config: SqpConfig<T>,
    qp_solver: Q,
}

impl<T: Real> Sqp<T, InteriorPointQp> {
    /// Creates a new SQP solver for `min f(x)` with no constraints yet.
    ///
    /// Add constraints with [`with_constraint`](Self::with_constraint). Without
    /// [`with_gradient`](Self::with_gradient) the objective gradient is approximated by
    /// central differences with step equal to the tolerance.
    pub fn new<F>(objective: F) -> Self
    where
        F: Fn(&Array1<T>) -> T + 'static,
    {
        Self {
            problem: Problem::new(Box::new(objective)),
            config: SqpConfig::new(),
            qp_solver: InteriorPointQp::default(),
        }
    }
}

impl<T: Real, Q: QpSolver<T>> Sqp<T, Q> {
    /// Supplies the analytic gradient of the objective.
    pub fn with_gradient<G>(mut self, gradient: G) -> Self
    where
        G: Fn(&Array1<T>) -> Array1<T> + 'static,
    {
        self.problem.objective_gradient = Some(Box::new(gradient));
        self
    }

    /// Adds the inequality constraint `c(x) >= 0`.
    pub fn with_constraint(mut self, constraint: Constraint<T>) -> Self {
        self.problem.constraints.push(constraint);
        self
    }

    /// Adds several constraints at once, keeping their order.
    pub fn with_constraints<I>(mut self, constraints: I) -> Self
    where
        I: IntoIterator<Item = Constraint<T>>,
    {
        self.problem.constraints.extend(constraints);
        self
    }

    /// Sets the primary tolerance used by the KKT test and as the finite-difference
    /// step (default: ε^(1/3) of `T`, about 6e-6 for `f64`).
    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Sets the tolerance the QP subsolver must reach (default: tolerance / 100).
    pub fn with_minor_tolerance(mut self, tolerance: T) -> Self {
        self.config.minor_tolerance = Some(tolerance);
        self
    }

    /// Sets the maximum number of outer iterations (default: 100).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Sets the iteration budget of each QP subproblem (default: 100).
    pub fn with_qp_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.qp_max_iterations = max_iterations;
        self
    }

    /// Sets how many times the line search may halve the step (default: 30).
    pub fn with_max_halvings(mut self, max_halvings: usize) -> Self {
        self.config.max_halvings = max_halvings.max(1);
        self
    }

    /// Sets η in the curvature threshold `σ = α (1 - η) p'Hp` (default: 0.5).
    pub fn with_damping(mut self, eta: T) -> Self {
        self.config.eta = eta.max(T::zero()).min(T::one());
        self
    }

    /// Sets the bound on `‖ω‖²` for the elastic Hessian correction (default: 1e6).
    pub fn with_correction_limit(mut self, limit: T) -> Self {
        self.config.correction_limit = limit;
        self
    }

    /// Enables or disables the per-iteration progress line logged at `info` level
    /// (default: enabled).
    pub fn with_progress_log(mut self, enable: bool) -> Self {
        self.config.log_progress = enable;
        self
    }

    /// Replaces the QP subsolver.
    pub fn with_qp_solver<Q2: QpSolver<T>>(self, qp_solver: Q2) -> Sqp<T, Q2> {
        Sqp {
            problem: self.problem,
            config: self.config,
            qp_solver,
        }
    }

    /// Evaluates every constraint at `x`, in the order they were added.
    pub fn evaluate_constraints(&self, x: &Array1<T>) -> Array1<T> {
        self.problem.constraint_values(x)
    }

    /// Runs SQP from `x0`.
    ///
    /// Each iteration linearizes at the current point, solves the QP subproblem,
    /// retunes the penalty weights, backtracks on the merit function, refreshes the
    /// Hessian approximation and tests the KKT conditions.
    pub fn solve(&self, x0: Array1<T>) -> Result<SqpSolution<T>, SqpError> {
        let n = x0.len();
        if n == 0 {
            return Err(SqpError::DimensionMismatch {
                what: "starting point",
                expected: 1,
                found: 0,
            });
        }
        let m = self.problem.num_constraints();
        let config = &self.config;
        let minor_tolerance = config.minor_tolerance();
        let damping = DampingParams {
            eta: config.eta,
            correction_limit: config.correction_limit,
        };

        let mut state = SolveState {
            hessian: HessianApprox::identity(n),
            rho: Array1::zeros(m),
            cache: GradientCache::new(config.tolerance),
            iterate: Iterate::new(x0, Array1::zeros(m), Array1::zeros(m)),
        };
        let mut converged = false;
        let mut iterations = 0;
        let mut minor_iterations = 0;
        let mut hessian_updates = 0;
        let mut hessian_skips = 0;

        for iteration in 0..config.max_iterations {
            state.cache.ensure(&self.problem, &state.iterate.x)?;
            if !state.cache.is_finite() {
                return Err(SqpError::GradientIsNaN { iteration });
            }

            let qp = self.subproblem(&state);
            let qp_solution = self
                .qp_solver
                .solve(&qp, minor_tolerance, config.qp_max_iterations)
                .map_err(|source| SqpError::QpBreakdown { iteration, source })?;
            if !(qp_solution.residual < minor_tolerance && qp_solution.gap < minor_tolerance) {
                return Err(SqpError::QpSubproblemFailed {
                    iteration,
                    residual: qp_solution.residual.as_f64(),
                    gap: qp_solution.gap.as_f64(),
                    tolerance: minor_tolerance.as_f64(),
                });
            }
            minor_iterations += qp_solution.iterations;
            let candidate = Iterate::new(qp_solution.x, qp_solution.s, qp_solution.pi);

            let constraint_values = self.problem.constraint_values(&state.iterate.x);
            let replaced = update_rho(
                &mut state.rho,
                state.cache.grad(),
                state.hessian.matrix(),
                &constraint_values,
                &state.iterate.x,
                &state.iterate.s,
                &state.iterate.pi,
                &candidate.x,
                &candidate.pi,
            );
            if let Some(rhs) = replaced {
                log::debug!(
                    "[SQP] iteration {}: penalty weights replaced for target {:.3e}: {}",
                    iteration,
                    rhs,
                    state.rho
                );
            }
            let (next, alpha) = backtracking_line_search(
                &self.problem,
                &state.rho,
                &state.iterate,
                &candidate,
                config.max_halvings,
            )
            .map_err(|err| match err {
                LineSearchError::MaxHalvings(max_halvings) => SqpError::LineSearchFailed {
                    iteration,
                    max_halvings,
                },
            })?;

            let previous = std::mem::replace(&mut state.iterate, next);
            let outcome = state.hessian.update(
                &self.problem,
                &mut state.cache,
                &previous.x,
                &state.iterate.x,
                &candidate.x,
                &state.iterate.pi,
                alpha,
                damping,
            )?;
            match outcome {
                HessianUpdate::Applied | HessianUpdate::Corrected => hessian_updates += 1,
                HessianUpdate::Skipped => hessian_skips += 1,
            }
            if outcome == HessianUpdate::Corrected {
                log::info!("[SQP] iteration {}: modified Hessian update", iteration);
            }
            iterations = iteration + 1;

            if config.log_progress {
                self.log_progress(iteration, &state.iterate.x, alpha, qp_solution.iterations);
            }

            if is_converged(
                &self.problem,
                &mut state.cache,
                &state.iterate.x,
                &state.iterate.pi,
                config.tolerance,
            )? {
                converged = true;
                if config.log_progress {
                    log::info!("[SQP] optimal solution found after {} iterations", iterations);
                }
                break;
            }
        }

        if !converged {
            log::warn!(
                "[SQP] iteration limit {} reached without satisfying the KKT conditions",
                config.max_iterations
            );
        }

        let SolveState {
            rho, cache, iterate, ..
        } = state;
        let Iterate { x, s, pi } = iterate;
        Ok(SqpSolution {
            final_value: self.problem.objective(&x),
            constraint_values: self.problem.constraint_values(&x),
            final_point: x,
            multipliers: pi,
            slacks: s,
            penalty: rho,
            converged,
            iterations,
            minor_iterations,
            hessian_updates,
            hessian_skips,
            gradient_evals: cache.recomputations(),
            gradient_sources: cache.sources().to_vec(),
        })
    }

    // Linearization at x_k:
    //   min (g_k - H x_k)'x + ½ x'Hx  s.t.  J_k x >= J_k x_k - c(x_k).
    fn subproblem(&self, state: &SolveState<T>) -> QpProblem<T> {
        let x_k = &state.iterate.x;
        let h: &Array2<T> = state.hessian.matrix();
        let jacobian = state.cache.jacobian();
        let c = state.cache.grad() - &h.dot(x_k);
        let b_ineq = jacobian.dot(x_k) - &self.problem.constraint_values(x_k);
        QpProblem::new(h.clone(), c).with_inequalities(jacobian.clone(), b_ineq)
    }

    fn log_progress(&self, iteration: usize, x: &Array1<T>, alpha: T, minor_iterations: usize) {
        let objective = self.problem.objective(x);
        let values = self.problem.constraint_values(x);
        let max_constraint = values.iter().copied().fold(T::neg_infinity(), T::max);
        let violation = values
            .iter()
            .fold(T::zero(), |acc, &c| acc.max(-c));
        log::info!(
            "[SQP] iter={}, step={:.10e}, minors={}, obj={:.10e}, max_constr={:.10e}, violation={:.3e}",
            iteration,
            alpha,
            minor_iterations,
            objective,
            max_constraint,
            violation
        );
    }
}
