use ndarray::Array1;

use crate::Real;

/// A scalar-valued callable, used for the objective and for each constraint.
pub type ScalarFn<T> = Box<dyn Fn(&Array1<T>) -> T>;

/// A gradient callable returning a vector of the same length as its input.
pub type GradientFn<T> = Box<dyn Fn(&Array1<T>) -> Array1<T>>;

/// One inequality constraint `c(x) >= 0`, with an optional analytic gradient.
///
/// Without a gradient the solver differentiates `c` by central differences.
pub struct Constraint<T> {
    pub(crate) value: ScalarFn<T>,
    pub(crate) gradient: Option<GradientFn<T>>,
}

impl<T: Real> Constraint<T> {
    pub fn new<F>(value: F) -> Self
    where
        F: Fn(&Array1<T>) -> T + 'static,
    {
        Self {
            value: Box::new(value),
            gradient: None,
        }
    }

    /// Attaches the analytic gradient of this constraint.
    pub fn with_gradient<G>(mut self, gradient: G) -> Self
    where
        G: Fn(&Array1<T>) -> Array1<T> + 'static,
    {
        self.gradient = Some(Box::new(gradient));
        self
    }

    pub fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }
}

// Objective plus constraints; everything the iteration needs to evaluate.
pub(crate) struct Problem<T> {
    pub(crate) objective: ScalarFn<T>,
    pub(crate) objective_gradient: Option<GradientFn<T>>,
    pub(crate) constraints: Vec<Constraint<T>>,
}

impl<T: Real> Problem<T> {
    pub(crate) fn new(objective: ScalarFn<T>) -> Self {
        Self {
            objective,
            objective_gradient: None,
            constraints: Vec::new(),
        }
    }

    pub(crate) fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub(crate) fn objective(&self, x: &Array1<T>) -> T {
        (self.objective)(x)
    }

    /// Vector of constraint values `c(x)`, in insertion order.
    pub(crate) fn constraint_values(&self, x: &Array1<T>) -> Array1<T> {
        self.constraints.iter().map(|c| (c.value)(x)).collect()
    }
}
