//! Small dense linear algebra on `ndarray` matrices, backed by `nalgebra` factorizations.
//!
//! Only used for d×d matrices (covariances, preconditioners, Hessians), never for
//! pixel-sized operators.

use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};

fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

fn from_nalgebra(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Cholesky factorization of a symmetric positive-definite matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SpdFactor {
    /// Lower-triangular factor `L` with `L Lᵀ = A`.
    pub lower: Array2<f64>,
    /// `A⁻¹`.
    pub inverse: Array2<f64>,
    /// `log det A`.
    pub log_det: f64,
}

/// Factorizes `a`, returning `None` when it is not square, not symmetric, or not
/// positive definite.
pub fn spd_factor(a: &Array2<f64>) -> Option<SpdFactor> {
    let (rows, cols) = a.dim();
    if rows != cols || rows == 0 || a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    for i in 0..rows {
        for j in 0..i {
            if (a[[i, j]] - a[[j, i]]).abs() > 1e-10 * scale {
                return None;
            }
        }
    }
    let chol = Cholesky::new(to_nalgebra(a))?;
    let l = chol.l();
    let log_det = 2.0 * (0..rows).map(|i| l[(i, i)].ln()).sum::<f64>();
    Some(SpdFactor {
        lower: from_nalgebra(&l),
        inverse: from_nalgebra(&chol.inverse()),
        log_det,
    })
}

/// Eigendecomposition `A = V diag(λ) Vᵀ` of a symmetric matrix, or `None` for
/// non-finite input or when the QR sweeps do not converge.
pub fn symmetric_eigen(a: &Array2<f64>) -> Option<(Array1<f64>, Array2<f64>)> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let eig = SymmetricEigen::try_new(to_nalgebra(a), f64::EPSILON, 10_000)?;
    let values = Array1::from_iter(eig.eigenvalues.iter().copied());
    Some((values, from_nalgebra(&eig.eigenvectors)))
}

/// Rebuilds `V diag(f(λ)) Vᵀ` from an eigendecomposition.
pub fn spectral_map(
    values: &Array1<f64>,
    vectors: &Array2<f64>,
    f: impl Fn(f64) -> f64,
) -> Array2<f64> {
    let scaled = vectors * &values.mapv(f);
    scaled.dot(&vectors.t())
}

/// Largest eigenvalue of a symmetric matrix (its spectral norm when it is SPD).
pub fn largest_eigenvalue(a: &Array2<f64>) -> Option<f64> {
    let (values, _) = symmetric_eigen(a)?;
    Some(values.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    #[test]
    fn factor_reconstructs_matrix() {
        let a = arr2(&[[1.0, -0.5], [-0.5, 1.0]]);
        let f = spd_factor(&a).unwrap();
        assert_abs_diff_eq!(f.lower.dot(&f.lower.t()), a, epsilon = 1e-12);
        assert_abs_diff_eq!(f.inverse.dot(&a), Array2::eye(2), epsilon = 1e-12);
        assert_abs_diff_eq!(f.log_det, 0.75_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn rejects_indefinite_and_asymmetric() {
        assert!(spd_factor(&arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_none());
        assert!(spd_factor(&arr2(&[[1.0, 0.3], [0.0, 1.0]])).is_none());
        assert!(spd_factor(&Array2::zeros((2, 3))).is_none());
    }

    #[test]
    fn spectral_square_root_squares_back() {
        let a = arr2(&[[1.0, 0.1], [0.1, 0.5]]);
        let (values, vectors) = symmetric_eigen(&a).unwrap();
        let root = spectral_map(&values, &vectors, f64::sqrt);
        assert_abs_diff_eq!(root.dot(&root), a, epsilon = 1e-12);
        assert!(largest_eigenvalue(&a).unwrap() > 1.0);
        assert!(symmetric_eigen(&arr2(&[[f64::NAN, 0.0], [0.0, 1.0]])).is_none());
    }
}
