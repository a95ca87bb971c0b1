//! Seeded random stream shared by every sampler block.
//!
//! Draws are strictly sequential: the stream is passed by `&mut` through the
//! blocks of a sweep, so the draw order fixes the realized chain for a seed.

use faer::Mat;
use rand::rngs::ChaCha12Rng;
use rand::{RngExt, SeedableRng};

use super::likelihood::{standard_normal_cdf, standard_normal_quantile};
use super::types::LiError;
use crate::utils::{cholesky_lower, matrix_inverse, symmetrize, usize_to_f64};

/// Probability mass below which inversion sampling hands over to tail rejection.
const MIN_INVERSION_MASS: f64 = 1.0e-280;
const MAX_TAIL_REJECTIONS: usize = 10_000;

/// Random number source with the distributions the samplers need.
///
/// Cloning copies the generator position, so a clone continues the exact
/// sequence the original would have produced.
#[derive(Debug)]
pub struct RandomStream {
    rng: ChaCha12Rng,
}

impl Clone for RandomStream {
    fn clone(&self) -> Self {
        let mut rng = ChaCha12Rng::from_seed(self.rng.get_seed());
        // stream first: setting it resets the word position
        rng.set_stream(self.rng.get_stream());
        rng.set_word_pos(self.rng.get_word_pos());
        Self { rng }
    }
}

impl RandomStream {
    #[must_use]
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    /// Uniform draw on `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Standard normal draw (Box-Muller).
    pub fn normal(&mut self) -> f64 {
        let u1 = (1.0_f64 - self.uniform()).max(f64::MIN_POSITIVE);
        let u2 = self.uniform();
        (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Gamma draw with the given shape and scale (Marsaglia-Tsang).
    pub fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        if !(shape > 0.0 && scale > 0.0) {
            return f64::NAN;
        }

        if shape < 1.0 {
            let u = (1.0_f64 - self.uniform()).max(f64::MIN_POSITIVE);
            return self.gamma(shape + 1.0, scale) * u.powf(1.0 / shape);
        }

        let shape_minus_third = shape - (1.0 / 3.0);
        let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
        loop {
            let standard_normal = self.normal();
            let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
            if one_plus_coeff_noise <= 0.0 {
                continue;
            }
            let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
            let uniform = self.uniform();
            if uniform
                < (0.0331 * standard_normal * standard_normal * standard_normal)
                    .mul_add(-standard_normal, 1.0)
            {
                return scale * shape_minus_third * cubic_term;
            }
            if uniform.ln()
                < (0.5 * standard_normal).mul_add(
                    standard_normal,
                    shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
                )
            {
                return scale * shape_minus_third * cubic_term;
            }
        }
    }

    pub fn chi_square(&mut self, dof: f64) -> f64 {
        self.gamma(0.5 * dof, 2.0)
    }

    /// Inverse-gamma draw: `scale / Gamma(shape, 1)`.
    pub fn inverse_gamma(&mut self, shape: f64, scale: f64) -> f64 {
        scale / self.gamma(shape, 1.0)
    }

    /// Normal draw restricted to `(lower, upper)`; either bound may be infinite.
    ///
    /// Uses inversion on the tail with the smaller mass and falls back to
    /// exponential rejection when the interval sits beyond floating-point reach.
    pub fn truncated_normal(&mut self, mean: f64, sd: f64, lower: f64, upper: f64) -> f64 {
        let a = (lower - mean) / sd;
        let b = (upper - mean) / sd;
        if a >= b {
            return lower;
        }
        // reflect so the interval never lies entirely in the upper tail
        let (a, b, sign) = if a > 0.0 { (-b, -a, -1.0_f64) } else { (a, b, 1.0_f64) };
        let cdf_a = standard_normal_cdf(a);
        let cdf_b = standard_normal_cdf(b);
        let mass = cdf_b - cdf_a;
        let standardized = if mass > MIN_INVERSION_MASS {
            let u = self.uniform();
            let z = standard_normal_quantile(u.mul_add(mass, cdf_a));
            if z.is_finite() { z.clamp(a, b) } else { b }
        } else {
            // interval in the far lower tail: sample -z from the upper tail above -b
            -self.upper_tail_normal(-b, -a)
        };
        sign.mul_add(sd * standardized, mean)
    }

    /// Standard normal restricted to `(lower, upper)` with `lower > 0`.
    fn upper_tail_normal(&mut self, lower: f64, upper: f64) -> f64 {
        let rate = 0.5 * (lower + lower.mul_add(lower, 4.0).sqrt());
        for _ in 0..MAX_TAIL_REJECTIONS {
            let u = (1.0_f64 - self.uniform()).max(f64::MIN_POSITIVE);
            let candidate = lower - u.ln() / rate;
            if candidate >= upper {
                continue;
            }
            let gap = candidate - rate;
            if self.uniform() <= (-0.5 * gap * gap).exp() {
                return candidate;
            }
        }
        lower
    }

    /// Index drawn with probability proportional to `weights`.
    pub fn categorical(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        let target = self.uniform() * total;
        let mut cumulative = 0.0;
        for (index, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if target < cumulative {
                return index;
            }
        }
        weights.len().saturating_sub(1)
    }

    /// `mean + L^{-T} z` with `z` standard normal: a draw from `N(mean, (L L')^{-1})`.
    pub(crate) fn normal_from_precision_factor(
        &mut self,
        mean: &[f64],
        precision_lower: &Mat<f64>,
        scale: f64,
    ) -> Vec<f64> {
        let noise: Vec<f64> = (0..mean.len()).map(|_| self.normal()).collect();
        let correlated = crate::utils::solve_lower_transposed(precision_lower, &noise);
        mean.iter()
            .zip(correlated)
            .map(|(center, deviation)| scale.mul_add(deviation, *center))
            .collect()
    }

    /// Wishart draw through the Bartlett decomposition.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if the scale is not positive definite or
    /// `df <= dim - 1`.
    pub fn wishart(&mut self, df: f64, scale: &Mat<f64>) -> Result<Mat<f64>, LiError> {
        let dim = scale.ncols();
        if dim == 0 || df <= usize_to_f64(dim.saturating_sub(1)) {
            return Err(LiError::SolveFailed("wishart"));
        }
        let chol = cholesky_lower(scale).ok_or(LiError::SolveFailed("wishart"))?;
        let mut bartlett = Mat::<f64>::zeros(dim, dim);
        for row in 0..dim {
            let dof = df - usize_to_f64(row);
            bartlett[(row, row)] = self.chi_square(dof).sqrt();
            for col in 0..row {
                bartlett[(row, col)] = self.normal();
            }
        }
        let product = &chol * &bartlett;
        Ok(&product * product.transpose())
    }

    /// Inverse-Wishart draw with `df` degrees of freedom and scale matrix `scale`.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if an inversion or factorization fails.
    pub fn inverse_wishart(&mut self, df: f64, scale: &Mat<f64>) -> Result<Mat<f64>, LiError> {
        let inv_scale = matrix_inverse(scale).ok_or(LiError::SolveFailed("inverse wishart"))?;
        let mut inv_scale = inv_scale;
        symmetrize(&mut inv_scale);
        let precision_sample = self.wishart(df, &inv_scale)?;
        let mut covariance =
            matrix_inverse(&precision_sample).ok_or(LiError::SolveFailed("inverse wishart"))?;
        symmetrize(&mut covariance);
        Ok(covariance)
    }
}
