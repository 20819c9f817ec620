use ndarray::{Array1, Array2};

use crate::Real;

/// Solves `min ρ'ρ  s.t.  a'ρ = b, ρ >= 0` in closed form.
///
/// The sign is normalized first so that `b >= 0` (negating `a` along with `b`). With
/// `S` the sum of squares of the strictly positive entries of `a`, the minimizer is
/// `ρ_i = max(0, (b / S) a_i)`. The result is exact whenever `S > 0`; callers check that
/// some entry of `a` has the right sign before relying on it.
pub fn min_norm_nonnegative<T: Real>(a: &Array1<T>, b: T) -> Array1<T> {
    let (a, b) = if b < T::zero() {
        (a.mapv(|v| -v), -b)
    } else {
        (a.clone(), b)
    };
    let positive_norm_sq = a
        .iter()
        .filter(|&&v| v > T::zero())
        .fold(T::zero(), |acc, &v| acc + v * v);
    let scale = b / positive_norm_sq;
    a.mapv(|v| (scale * v).max(T::zero()))
}

/// Retunes the merit-function penalty weights for the step `(x_k, π_k) -> (x̂, π̂)`.
///
/// Along the step the merit derivative is
/// `φ'(0) = g'p + (π - p_π)'r - Σ ρ_j r_j²` with `r = c(x_k) - s_k`, because the QP
/// linearization gives `J p - p_s = -r`. The weights are chosen as the minimum-norm
/// nonnegative `ρ` that makes `φ'(0) = -½ p'Hp`. When no nonnegative `ρ` is needed
/// (`b <= 0`) or none can help (`r = 0`), the previous weights are kept and `None` is
/// returned; otherwise the new vector replaces the old one wholesale.
#[allow(clippy::too_many_arguments)]
pub(crate) fn update_rho<T: Real>(
    rho: &mut Array1<T>,
    grad: &Array1<T>,
    hessian: &Array2<T>,
    constraint_values: &Array1<T>,
    x_k: &Array1<T>,
    s_k: &Array1<T>,
    pi_k: &Array1<T>,
    x_hat: &Array1<T>,
    pi_hat: &Array1<T>,
) -> Option<T> {
    let p_x = x_hat - x_k;
    let p_pi = pi_hat - pi_k;
    let residual = constraint_values - s_k;
    let residual_sq = residual.mapv(|r| r * r);
    let curvature = p_x.dot(&hessian.dot(&p_x));
    let rhs = grad.dot(&p_x) + (pi_k - &p_pi).dot(&residual) + T::lit(0.5) * curvature;

    let max_a = residual_sq
        .iter()
        .copied()
        .fold(T::neg_infinity(), T::max);
    if rhs > T::zero() && max_a > T::zero() {
        *rho = min_norm_nonnegative(&residual_sq, rhs);
        Some(rhs)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{min_norm_nonnegative, update_rho};
    use ndarray::{array, Array1, Array2};
    use spectral::prelude::*;

    #[test]
    fn min_norm_solution_is_feasible_and_nonnegative() {
        let a = array![1.0, -2.0, 3.0, 0.0];
        let rho = min_norm_nonnegative(&a, 5.0);
        assert_that!(&a.dot(&rho)).is_close_to(5.0, 1e-12);
        assert!(rho.iter().all(|&v| v >= 0.0));
        assert_that!(&rho[0]).is_close_to(0.5, 1e-12);
        assert_that!(&rho[1]).is_equal_to(0.0);
        assert_that!(&rho[2]).is_close_to(1.5, 1e-12);
        assert_that!(&rho[3]).is_equal_to(0.0);
    }

    #[test]
    fn min_norm_solution_beats_other_feasible_points() {
        let a = array![2.0, 1.0, -1.0];
        let b = 3.0;
        let rho = min_norm_nonnegative(&a, b);
        let best = rho.dot(&rho);
        // Feasible alternatives: a'ρ = 3 with ρ >= 0.
        let alternatives = [
            array![1.5, 0.0, 0.0],
            array![0.0, 3.0, 0.0],
            array![1.0, 1.0, 0.0],
            array![1.5, 1.0, 1.0],
            array![1.2, 0.6, 0.0],
        ];
        for alt in alternatives.iter() {
            assert_that!(&a.dot(alt)).is_close_to(b, 1e-12);
            assert_that!(&alt.dot(alt)).is_greater_than_or_equal_to(best - 1e-12);
        }
        // The unconstrained minimizer along a restricted to positive entries.
        assert_that!(&best).is_close_to(b * b / 5.0, 1e-12);
    }

    #[test]
    fn negative_rhs_flips_sign_of_problem() {
        let a = array![-1.0, 2.0];
        let rho = min_norm_nonnegative(&a, -4.0);
        assert_that!(&rho[0]).is_close_to(4.0, 1e-12);
        assert_that!(&rho[1]).is_equal_to(0.0);
        assert_that!(&a.dot(&rho)).is_close_to(-4.0, 1e-12);
    }

    #[test]
    fn penalty_makes_merit_slope_match_half_curvature() {
        // Step from the origin towards (0.5, 0.5) for min x'x s.t. x1 + x2 >= 1.
        let mut rho = Array1::zeros(1);
        let hessian = Array2::eye(2);
        let x_k = array![0.0, 0.0];
        let x_hat = array![0.5, 0.5];
        let grad = array![0.0, 0.0];
        let c = array![-1.0];
        let s_k = array![0.0];
        let pi_k = array![0.0];
        let pi_hat = array![0.5];
        let rhs = update_rho(
            &mut rho, &grad, &hessian, &c, &x_k, &s_k, &pi_k, &x_hat, &pi_hat,
        );
        assert_that!(&rhs.unwrap()).is_close_to(0.75, 1e-12);
        assert_that!(&rho[0]).is_close_to(0.75, 1e-12);

        // φ'(0) = g'p + (π - p_π)'r - ρ'r² must equal -½ p'Hp = -0.25.
        let slope = 0.0 + (0.0 - 0.5) * (-1.0) - rho[0] * 1.0;
        assert_that!(&slope).is_close_to(-0.25, 1e-12);
    }

    #[test]
    fn penalty_is_kept_when_step_already_descends() {
        let mut rho = array![7.0];
        let hessian = Array2::eye(2);
        // Unconstrained-looking step with strongly negative g'p.
        let rhs = update_rho(
            &mut rho,
            &array![-2.0, -4.0],
            &hessian,
            &array![-1.0],
            &array![0.0, 0.0],
            &array![0.0],
            &array![0.0],
            &array![2.0, 4.0],
            &array![0.0],
        );
        assert!(rhs.is_none());
        assert_that!(&rho[0]).is_equal_to(7.0);
    }

    #[test]
    fn penalty_is_kept_when_slacks_are_consistent() {
        let mut rho = array![3.0, 1.0];
        let hessian = Array2::eye(1);
        let rhs = update_rho(
            &mut rho,
            &array![1.0],
            &hessian,
            &array![2.0, 5.0],
            &array![0.0],
            &array![2.0, 5.0],
            &array![0.0, 0.0],
            &array![1.0],
            &array![1.0, 1.0],
        );
        assert!(rhs.is_none());
        assert_that!(&rho[0]).is_equal_to(3.0);
        assert_that!(&rho[1]).is_equal_to(1.0);
    }
}
