// Small dense kernels: Cholesky (LL^T), partially pivoted LU, and reductions.
use ndarray::{Array1, Array2};

use crate::Real;

pub(crate) fn chol_decompose<T: Real>(a: &Array2<T>) -> Option<Array2<T>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<T>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= T::zero() || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

pub(crate) fn chol_solve<T: Real>(l: &Array2<T>, b: &Array1<T>) -> Array1<T> {
    let n = l.nrows();
    // Forward solve: L y = b
    let mut y = Array1::<T>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    // Backward solve: L^T x = y
    let mut x = Array1::<T>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solves `a x = b` by Gaussian elimination with partial pivoting.
///
/// Used for the indefinite KKT systems that appear once equality rows are present.
/// Returns `None` when a pivot vanishes.
pub(crate) fn lu_solve<T: Real>(a: &Array2<T>, b: &Array1<T>) -> Option<Array1<T>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return None;
    }
    let mut m = a.clone();
    let mut rhs = b.clone();
    let scale = max_abs(m.iter().copied()).max(T::one());
    let tiny = T::epsilon() * scale * T::lit(n as f64);
    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_abs = m[[col, col]].abs();
        for row in (col + 1)..n {
            let v = m[[row, col]].abs();
            if v > pivot_abs {
                pivot_abs = v;
                pivot_row = row;
            }
        }
        if !pivot_abs.is_finite() || pivot_abs <= tiny {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                m.swap([col, k], [pivot_row, k]);
            }
            rhs.swap(col, pivot_row);
        }
        let pivot = m[[col, col]];
        for row in (col + 1)..n {
            let factor = m[[row, col]] / pivot;
            if factor == T::zero() {
                continue;
            }
            for k in col..n {
                let delta = factor * m[[col, k]];
                m[[row, k]] -= delta;
            }
            let delta = factor * rhs[col];
            rhs[row] -= delta;
        }
    }
    let mut x = Array1::<T>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for k in (i + 1)..n {
            sum -= m[[i, k]] * x[k];
        }
        x[i] = sum / m[[i, i]];
    }
    Some(x)
}

/// Largest absolute value in `values`, zero when empty.
pub(crate) fn max_abs<T: Real>(values: impl IntoIterator<Item = T>) -> T {
    values
        .into_iter()
        .fold(T::zero(), |acc, v| acc.max(v.abs()))
}

pub(crate) fn all_finite<T: Real>(values: impl IntoIterator<Item = T>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::{chol_decompose, chol_solve, lu_solve, max_abs};
    use ndarray::{array, Array1};
    use spectral::prelude::*;

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let b = array![1.0, 2.0, 3.0];
        let l = chol_decompose(&a).unwrap();
        let x = chol_solve(&l, &b);
        let r = a.dot(&x) - &b;
        assert_that!(&max_abs(r.iter().copied())).is_less_than(1e-12);
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(chol_decompose(&a).is_none());
    }

    #[test]
    fn lu_handles_zero_leading_pivot() {
        // Saddle-point shaped system: the (0, 0) entry is zero.
        let a = array![[0.0, 1.0, 1.0], [1.0, 2.0, 0.0], [1.0, 0.0, 3.0]];
        let b = array![1.0, -1.0, 2.0];
        let x = lu_solve(&a, &b).unwrap();
        let r = a.dot(&x) - &b;
        assert_that!(&max_abs(r.iter().copied())).is_less_than(1e-12);
    }

    #[test]
    fn lu_reports_singular_matrix() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(lu_solve(&a, &array![1.0, 1.0]).is_none());
    }

    #[test]
    fn max_abs_of_empty_is_zero() {
        let empty: Array1<f64> = Array1::zeros(0);
        assert_that!(&max_abs(empty.iter().copied())).is_equal_to(0.0);
        assert_that!(&max_abs(array![-3.0, 2.0].iter().copied())).is_equal_to(3.0);
    }
}
