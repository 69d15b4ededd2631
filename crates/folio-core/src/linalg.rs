//! Dense linear-algebra helpers over `nalgebra`.
//!
//! Matrices cross module boundaries as row-major `Vec<Vec<f64>>` so they
//! serialize cleanly; these helpers convert at the point of use.

use nalgebra::DMatrix;

pub fn to_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.len();
    let m = rows.first().map(|r| r.len()).unwrap_or(0);
    DMatrix::from_fn(n, m, |i, j| rows[i][j])
}

pub fn to_rows(mat: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..mat.nrows())
        .map(|i| (0..mat.ncols()).map(|j| mat[(i, j)]).collect())
        .collect()
}

/// Eigenvalues of a symmetric matrix, ascending.
pub fn symmetric_eigenvalues(mat: &DMatrix<f64>) -> Vec<f64> {
    if mat.is_empty() {
        return Vec::new();
    }
    let mut vals: Vec<f64> = mat.clone().symmetric_eigen().eigenvalues.iter().copied().collect();
    vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    vals
}

/// Spectral condition number of a symmetric matrix; infinite when the
/// smallest eigenvalue is not strictly positive.
pub fn condition_number(mat: &DMatrix<f64>) -> f64 {
    let vals = symmetric_eigenvalues(mat);
    match (vals.first(), vals.last()) {
        (Some(&min), Some(&max)) if min > 0.0 && min.is_finite() && max.is_finite() => max / min,
        _ => f64::INFINITY,
    }
}

/// Largest eigenvalue of a symmetric matrix (0 for an empty matrix).
pub fn max_eigenvalue(mat: &DMatrix<f64>) -> f64 {
    symmetric_eigenvalues(mat).last().copied().unwrap_or(0.0)
}

/// Rows of `F'` for a symmetric PSD matrix `Σ = FF'`, from its
/// eigendecomposition. Negative eigenvalues from rounding are clipped to 0.
pub fn psd_factor(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if rows.is_empty() {
        return Vec::new();
    }
    let eig = to_matrix(rows).symmetric_eigen();
    (0..eig.eigenvalues.len())
        .map(|k| {
            let root = eig.eigenvalues[k].max(0.0).sqrt();
            eig.eigenvectors.column(k).iter().map(|v| root * v).collect()
        })
        .collect()
}

/// Inverse of a symmetric positive-definite matrix via Cholesky.
pub fn spd_inverse(mat: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = mat.clone().cholesky()?.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

/// `(m + m') / 2`, removing floating-point asymmetry.
pub fn symmetrize(mat: &DMatrix<f64>) -> DMatrix<f64> {
    (mat + mat.transpose()) * 0.5
}

/// `w' Σ w`.
pub fn quad_form(w: &[f64], cov: &[Vec<f64>]) -> f64 {
    cov.iter()
        .zip(w.iter())
        .map(|(row, wi)| wi * row.iter().zip(w.iter()).map(|(c, wj)| c * wj).sum::<f64>())
        .sum()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
