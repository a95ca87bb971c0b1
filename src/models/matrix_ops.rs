//! Row-subset matrix products over a fixed design arena.
//!
//! Sampler blocks fit on subsets of units (responders, current non-compliers,
//! members of a cluster). These helpers work from row indices so the design is
//! never copied per subset.

use faer::Mat;

/// `X_S' X_S` for the rows `S` of `design`.
#[must_use]
pub fn cross_product(design: &Mat<f64>, rows: &[usize]) -> Mat<f64> {
    let dim = design.ncols();
    let mut product = Mat::<f64>::zeros(dim, dim);
    for &row in rows {
        for i in 0..dim {
            let xi = design[(row, i)];
            if xi == 0.0 {
                continue;
            }
            for j in i..dim {
                product[(i, j)] += xi * design[(row, j)];
            }
        }
    }
    for i in 0..dim {
        for j in 0..i {
            product[(i, j)] = product[(j, i)];
        }
    }
    product
}

/// `X_S' w` where `values[k]` belongs to `rows[k]`.
#[must_use]
pub fn cross_product_response(design: &Mat<f64>, rows: &[usize], values: &[f64]) -> Vec<f64> {
    let mut product = vec![0.0; design.ncols()];
    for (&row, &value) in rows.iter().zip(values) {
        for (col, entry) in product.iter_mut().enumerate() {
            *entry += design[(row, col)] * value;
        }
    }
    product
}

/// Residual sum of squares `sum_k (values[k] - x_{rows[k]} beta)^2`.
#[must_use]
pub fn residual_sum_of_squares(
    design: &Mat<f64>,
    rows: &[usize],
    values: &[f64],
    coefficients: &[f64],
) -> f64 {
    rows.iter()
        .zip(values)
        .map(|(&row, &value)| {
            let fitted: f64 = (0..design.ncols())
                .map(|col| design[(row, col)] * coefficients[col])
                .sum();
            let residual = value - fitted;
            residual * residual
        })
        .sum()
}

/// Quadratic form `v' A v`.
#[must_use]
pub fn quadratic_form(matrix: &Mat<f64>, vector: &[f64]) -> f64 {
    let mut total = 0.0;
    for (i, vi) in vector.iter().enumerate() {
        for (j, vj) in vector.iter().enumerate() {
            total += vi * matrix[(i, j)] * vj;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::usize_to_f64;
    use approx::assert_relative_eq;

    fn design() -> Mat<f64> {
        Mat::from_fn(4, 2, |row, col| if col == 0 { 1.0 } else { usize_to_f64(row) })
    }

    #[test]
    fn cross_product_uses_only_selected_rows() {
        let product = cross_product(&design(), &[1, 3]);
        assert_relative_eq!(product[(0, 0)], 2.0);
        assert_relative_eq!(product[(0, 1)], 4.0);
        assert_relative_eq!(product[(1, 0)], 4.0);
        assert_relative_eq!(product[(1, 1)], 10.0);
    }

    #[test]
    fn cross_product_response_pairs_values_with_rows() {
        let product = cross_product_response(&design(), &[2, 3], &[1.0, -1.0]);
        assert_relative_eq!(product[0], 0.0);
        assert_relative_eq!(product[1], -1.0);
    }

    #[test]
    fn residual_sum_of_squares_is_zero_for_exact_fit() {
        let values = [1.0, 3.0];
        let rss = residual_sum_of_squares(&design(), &[0, 1], &values, &[1.0, 2.0]);
        assert_relative_eq!(rss, 0.0);
    }
}
