/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra and numeric utilities for the latent-ignorability samplers.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Shared helpers for Cholesky factorization, triangular solves, inversion,
//! and conversions used across the sampler blocks.

use faer::Mat;
use faer::prelude::Solve;

/// Number of tenfold jitter increases tried before a factorization is given up.
const JITTER_STEPS: usize = 10;
const INITIAL_JITTER: f64 = 1.0e-10;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn identity_matrix(dim: usize) -> Mat<f64> {
    Mat::from_fn(dim, dim, |row, col| if row == col { 1.0 } else { 0.0 })
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Lower Cholesky factor `L` with `matrix = L L'`, or `None` if the matrix is not
/// numerically positive definite.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                lower[(row, col)] = sum / lower[(col, col)];
            }
        }
    }
    Some(lower)
}

/// Cholesky factor of `matrix + jitter * I`, raising the jitter tenfold until the
/// factorization succeeds. Singular cross products under flat priors rely on this.
#[must_use]
pub fn cholesky_with_jitter(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    if let Some(lower) = cholesky_lower(matrix) {
        return Some(lower);
    }
    let dim = matrix.ncols();
    let scale = (0..dim)
        .map(|idx| matrix[(idx, idx)].abs())
        .fold(1.0_f64, f64::max);
    let mut jitter = INITIAL_JITTER * scale;
    for _ in 0..JITTER_STEPS {
        let regularized = Mat::from_fn(dim, dim, |row, col| {
            if row == col {
                matrix[(row, col)] + jitter
            } else {
                matrix[(row, col)]
            }
        });
        if let Some(lower) = cholesky_lower(&regularized) {
            return Some(lower);
        }
        jitter *= 10.0;
    }
    None
}

/// Solve `L x = b` for lower-triangular `L`.
#[must_use]
pub fn solve_lower(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dim = lower.nrows();
    let mut solution = vec![0.0; dim];
    for row in 0..dim {
        let mut sum = rhs[row];
        for col in 0..row {
            sum -= lower[(row, col)] * solution[col];
        }
        solution[row] = sum / lower[(row, row)];
    }
    solution
}

/// Solve `L' x = b` for lower-triangular `L`.
#[must_use]
pub fn solve_lower_transposed(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dim = lower.nrows();
    let mut solution = vec![0.0; dim];
    for row in (0..dim).rev() {
        let mut sum = rhs[row];
        for col in (row + 1)..dim {
            sum -= lower[(col, row)] * solution[col];
        }
        solution[row] = sum / lower[(row, row)];
    }
    solution
}

/// Solve `(L L') x = b` given the lower Cholesky factor.
#[must_use]
pub fn solve_cholesky(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let forward = solve_lower(lower, rhs);
    solve_lower_transposed(lower, &forward)
}

/// Solve a general square system with full-pivoting LU.
///
/// Returns `None` if the solution contains non-finite values.
#[must_use]
pub fn solve_linear_system(a: &Mat<f64>, b: &Mat<f64>) -> Option<Mat<f64>> {
    let rhs = b.clone();
    let lu = a.full_piv_lu();
    let solution = lu.solve(rhs);
    matrix_is_finite(&solution).then_some(solution)
}

/// Matrix inverse through column-wise LU solves.
#[must_use]
pub fn matrix_inverse(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let identity = identity_matrix(dim);
    solve_linear_system(matrix, &identity)
}

/// Replace `matrix` with `(matrix + matrix') / 2`.
pub fn symmetrize(matrix: &mut Mat<f64>) {
    let dim = matrix.nrows().min(matrix.ncols());
    for row in 0..dim {
        for col in (row + 1)..dim {
            let symmetric = 0.5 * (matrix[(row, col)] + matrix[(col, row)]);
            matrix[(row, col)] = symmetric;
            matrix[(col, row)] = symmetric;
        }
    }
}

#[must_use]
pub fn dot_row(matrix: &Mat<f64>, row: usize, coefficients: &[f64]) -> f64 {
    (0..matrix.ncols())
        .map(|col| matrix[(row, col)] * coefficients[col])
        .sum()
}
