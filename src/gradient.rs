use ndarray::{Array1, Array2};

use crate::error::SqpError;
use crate::problem::Problem;
use crate::Real;

/// Which path produced a gradient row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientSource {
    Analytic,
    FiniteDifference,
}

/// Central finite-difference gradient with step `h`:
/// `g_i = (f(x + h e_i) - f(x - h e_i)) / 2h`.
pub(crate) fn finite_difference_grad<T, F>(f: F, x: &Array1<T>, h: T) -> Array1<T>
where
    T: Real,
    F: Fn(&Array1<T>) -> T,
{
    let two_h = h + h;
    let mut grad = Array1::<T>::zeros(x.len());
    let mut x_shift = x.clone();
    for i in 0..x.len() {
        x_shift[i] = x[i] + h;
        let fp = f(&x_shift);
        x_shift[i] = x[i] - h;
        let fm = f(&x_shift);
        x_shift[i] = x[i];
        grad[i] = (fp - fm) / two_h;
    }
    grad
}

/// Objective gradient and constraint Jacobian at the last point they were computed for.
///
/// The cache is keyed on exact equality of the point: any bitwise different `x`
/// triggers a full recomputation, and a point containing NaN never hits.
pub(crate) struct GradientCache<T> {
    step: T,
    point: Option<Array1<T>>,
    grad: Array1<T>,
    jacobian: Array2<T>,
    sources: Vec<GradientSource>,
    recomputations: usize,
}

impl<T: Real> GradientCache<T> {
    /// `step` is the finite-difference step used for callables without a gradient.
    pub(crate) fn new(step: T) -> Self {
        Self {
            step,
            point: None,
            grad: Array1::zeros(0),
            jacobian: Array2::zeros((0, 0)),
            sources: Vec::new(),
            recomputations: 0,
        }
    }

    /// Makes the cache valid at `x`, recomputing only if `x` differs from the cached point.
    pub(crate) fn ensure(&mut self, problem: &Problem<T>, x: &Array1<T>) -> Result<(), SqpError> {
        if self.point.as_ref() == Some(x) {
            return Ok(());
        }
        let n = x.len();
        let m = problem.num_constraints();
        let mut sources = Vec::with_capacity(m + 1);

        let grad = match &problem.objective_gradient {
            Some(g) => {
                sources.push(GradientSource::Analytic);
                g(x)
            }
            None => {
                sources.push(GradientSource::FiniteDifference);
                finite_difference_grad(|z: &Array1<T>| problem.objective(z), x, self.step)
            }
        };
        if grad.len() != n {
            return Err(SqpError::DimensionMismatch {
                what: "objective gradient",
                expected: n,
                found: grad.len(),
            });
        }

        let mut jacobian = Array2::<T>::zeros((m, n));
        for (i, constraint) in problem.constraints.iter().enumerate() {
            let row = match &constraint.gradient {
                Some(g) => {
                    sources.push(GradientSource::Analytic);
                    g(x)
                }
                None => {
                    sources.push(GradientSource::FiniteDifference);
                    finite_difference_grad(|z: &Array1<T>| (constraint.value)(z), x, self.step)
                }
            };
            if row.len() != n {
                return Err(SqpError::DimensionMismatch {
                    what: "constraint gradient",
                    expected: n,
                    found: row.len(),
                });
            }
            jacobian.row_mut(i).assign(&row);
        }

        if self.recomputations == 0 {
            log::trace!("[SQP] gradient sources (objective first): {:?}", sources);
        }
        self.grad = grad;
        self.jacobian = jacobian;
        self.sources = sources;
        self.point = Some(x.clone());
        self.recomputations += 1;
        Ok(())
    }

    pub(crate) fn grad(&self) -> &Array1<T> {
        &self.grad
    }

    pub(crate) fn jacobian(&self) -> &Array2<T> {
        &self.jacobian
    }

    /// Path taken for the objective (index 0) and each constraint row (index i + 1).
    pub(crate) fn sources(&self) -> &[GradientSource] {
        &self.sources
    }

    pub(crate) fn recomputations(&self) -> usize {
        self.recomputations
    }

    pub(crate) fn is_finite(&self) -> bool {
        crate::linalg::all_finite(self.grad.iter().copied())
            && crate::linalg::all_finite(self.jacobian.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::{finite_difference_grad, GradientCache, GradientSource};
    use crate::problem::{Constraint, Problem};
    use crate::SqpError;
    use ndarray::{array, Array1};
    use spectral::prelude::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn finite_difference_matches_analytic_sphere_gradient() {
        let h = 1e-6;
        let x = array![0.7, -1.3];
        let g = finite_difference_grad(|z: &Array1<f64>| z[0] * z[0] + z[1] * z[1], &x, h);
        assert_that!(&g[0]).is_close_to(1.4, 10.0 * h);
        assert_that!(&g[1]).is_close_to(-2.6, 10.0 * h);
    }

    #[test]
    fn finite_difference_error_shrinks_with_step() {
        // Cubic term gives an O(h^2) truncation error for the central scheme.
        let f = |z: &Array1<f64>| z[0].powi(3);
        let x = array![1.0];
        let coarse = (finite_difference_grad(f, &x, 1e-1)[0] - 3.0).abs();
        let fine = (finite_difference_grad(f, &x, 1e-3)[0] - 3.0).abs();
        assert_that!(&fine).is_less_than(coarse);
        assert_that!(&coarse).is_close_to(1e-2, 1e-9);
    }

    #[test]
    fn cache_recomputes_only_for_a_different_point() {
        let calls = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&calls);
        let mut problem = Problem::<f64>::new(Box::new(|x: &Array1<f64>| x.dot(x)));
        problem.objective_gradient = Some(Box::new(move |x: &Array1<f64>| {
            counter.set(counter.get() + 1);
            x * 2.0
        }));
        let mut cache = GradientCache::new(1e-6);

        let x = array![1.0, 2.0];
        cache.ensure(&problem, &x).unwrap();
        cache.ensure(&problem, &x.clone()).unwrap();
        assert_that!(&calls.get()).is_equal_to(1);

        let y = array![1.0, 2.0 + 1e-15];
        cache.ensure(&problem, &y).unwrap();
        assert_that!(&calls.get()).is_equal_to(2);
        assert_that!(&cache.recomputations()).is_equal_to(2);
        assert_that!(&cache.grad()[1]).is_close_to(4.0, 1e-12);
    }

    #[test]
    fn cache_records_gradient_paths_and_fills_jacobian() {
        let mut problem = Problem::<f64>::new(Box::new(|x: &Array1<f64>| x[0] * x[1]));
        problem
            .constraints
            .push(Constraint::new(|x: &Array1<f64>| 2.0 * x[0] - x[1]));
        problem.constraints.push(
            Constraint::new(|x: &Array1<f64>| x[0] * x[0])
                .with_gradient(|x: &Array1<f64>| array![2.0 * x[0], 0.0]),
        );
        let mut cache = GradientCache::new(1e-6);
        cache.ensure(&problem, &array![3.0, -1.0]).unwrap();

        assert_eq!(
            cache.sources(),
            &[
                GradientSource::FiniteDifference,
                GradientSource::FiniteDifference,
                GradientSource::Analytic
            ]
        );
        let j = cache.jacobian();
        assert_that!(&j[[0, 0]]).is_close_to(2.0, 1e-6);
        assert_that!(&j[[0, 1]]).is_close_to(-1.0, 1e-6);
        assert_that!(&j[[1, 0]]).is_close_to(6.0, 1e-12);
        assert_that!(&j[[1, 1]]).is_close_to(0.0, 1e-12);
        assert_that!(&cache.grad()[0]).is_close_to(-1.0, 1e-6);
        assert_that!(&cache.grad()[1]).is_close_to(3.0, 1e-6);
    }

    #[test]
    fn wrong_gradient_length_is_reported() {
        let mut problem = Problem::<f64>::new(Box::new(|x: &Array1<f64>| x.sum()));
        problem.objective_gradient = Some(Box::new(|_: &Array1<f64>| array![1.0]));
        let mut cache = GradientCache::new(1e-6);
        let err = cache.ensure(&problem, &array![0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            SqpError::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }
}
