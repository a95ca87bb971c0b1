//! Prior configuration for the latent-ignorability sampler.

use faer::Mat;

use super::types::LiError;
use crate::utils::{identity_matrix, matrix_is_finite, usize_to_f64};

/// Multivariate Normal prior on one coefficient block.
#[derive(Debug, Clone)]
pub enum BlockPrior {
    /// Common mean and precision for every coefficient. A zero precision is flat.
    Isotropic { mean: f64, precision: f64 },
    /// Explicit mean vector and precision matrix.
    Full { mean: Vec<f64>, precision: Mat<f64> },
}

impl Default for BlockPrior {
    fn default() -> Self {
        Self::Isotropic {
            mean: 0.0,
            precision: 0.01,
        }
    }
}

impl BlockPrior {
    #[must_use]
    pub const fn flat() -> Self {
        Self::Isotropic {
            mean: 0.0,
            precision: 0.0,
        }
    }

    fn validate(&self) -> Result<(), LiError> {
        match self {
            Self::Isotropic { mean, precision } => {
                if !mean.is_finite() || !precision.is_finite() || *precision < 0.0 {
                    return Err(LiError::InvalidPriorConfig(
                        "isotropic prior needs a finite mean and non-negative precision",
                    ));
                }
            }
            Self::Full { mean, precision } => {
                if precision.nrows() != precision.ncols() {
                    return Err(LiError::InvalidPriorConfig(
                        "prior precision must be square",
                    ));
                }
                if !mean.iter().all(|value| value.is_finite()) || !matrix_is_finite(precision) {
                    return Err(LiError::InvalidPriorConfig(
                        "prior mean and precision must be finite",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Expand to a block of `dim` coefficients.
    ///
    /// # Errors
    ///
    /// Returns `LiError::DimensionMismatch` if an explicit prior has another size.
    pub(crate) fn resolve(&self, block: &'static str, dim: usize) -> Result<ResolvedPrior, LiError> {
        match self {
            Self::Isotropic { mean, precision } => Ok(ResolvedPrior {
                mean: vec![*mean; dim],
                precision: Mat::from_fn(dim, dim, |row, col| {
                    if row == col { *precision } else { 0.0 }
                }),
            }),
            Self::Full { mean, precision } => {
                if mean.len() != dim {
                    return Err(LiError::DimensionMismatch {
                        block,
                        expected: dim,
                        found: mean.len(),
                    });
                }
                if precision.nrows() != dim {
                    return Err(LiError::DimensionMismatch {
                        block,
                        expected: dim,
                        found: precision.nrows(),
                    });
                }
                Ok(ResolvedPrior {
                    mean: mean.clone(),
                    precision: precision.clone(),
                })
            }
        }
    }
}

/// Scaled inverse chi-square prior `s0 / chi2(df)` on the Gaussian outcome variance.
#[derive(Debug, Clone, Copy)]
pub struct VariancePrior {
    pub df: f64,
    pub scale: f64,
}

impl Default for VariancePrior {
    fn default() -> Self {
        Self {
            df: 1.0,
            scale: 1.0,
        }
    }
}

/// Inverse-Wishart prior on a random-effect covariance.
#[derive(Debug, Clone, Default)]
pub enum RandomEffectPrior {
    /// `df = dim + 1` with an identity scale matrix.
    #[default]
    Default,
    Isotropic { df: f64, scale_diag: f64 },
    Full { df: f64, scale: Mat<f64> },
}

impl RandomEffectPrior {
    fn validate(&self) -> Result<(), LiError> {
        let valid = match self {
            Self::Default => true,
            Self::Isotropic { df, scale_diag } => {
                df.is_finite() && scale_diag.is_finite() && *scale_diag > 0.0
            }
            Self::Full { df, scale } => {
                df.is_finite() && scale.nrows() == scale.ncols() && matrix_is_finite(scale)
            }
        };
        if valid {
            Ok(())
        } else {
            Err(LiError::InvalidPriorConfig(
                "random-effect prior needs a finite df and positive scale",
            ))
        }
    }

    /// # Errors
    ///
    /// Returns `LiError` if the scale has the wrong size or `df <= dim - 1`.
    pub(crate) fn resolve(
        &self,
        block: &'static str,
        dim: usize,
    ) -> Result<ResolvedRandomPrior, LiError> {
        let (df, scale) = match self {
            Self::Default => (usize_to_f64(dim) + 1.0, identity_matrix(dim)),
            Self::Isotropic { df, scale_diag } => (
                *df,
                Mat::from_fn(dim, dim, |row, col| if row == col { *scale_diag } else { 0.0 }),
            ),
            Self::Full { df, scale } => {
                if scale.nrows() != dim {
                    return Err(LiError::DimensionMismatch {
                        block,
                        expected: dim,
                        found: scale.nrows(),
                    });
                }
                (*df, scale.clone())
            }
        };
        if df <= usize_to_f64(dim) - 1.0 {
            return Err(LiError::InvalidPriorConfig(
                "random-effect prior df must exceed dimension minus one",
            ));
        }
        Ok(ResolvedRandomPrior { df, scale })
    }
}

/// Inverse-Wishart priors for each hierarchical block.
#[derive(Debug, Clone, Default)]
pub struct RandomEffectsPriors {
    pub compliance: RandomEffectPrior,
    pub always_taker: RandomEffectPrior,
    pub outcome: RandomEffectPrior,
    pub response: RandomEffectPrior,
}

/// Prior configuration for every sampler block.
#[derive(Debug, Clone, Default)]
pub struct LiPriorConfig {
    /// Compliance coefficients. Under a logit link with always-takers this covers
    /// both stacked halves; under a probit link it is reused for the always-taker fit.
    pub compliance: BlockPrior,
    /// Outcome coefficients, type columns first.
    pub outcome: BlockPrior,
    /// Response coefficients, type columns first.
    pub response: BlockPrior,
    pub variance: VariancePrior,
    pub random_effects: RandomEffectsPriors,
}

impl LiPriorConfig {
    /// # Errors
    ///
    /// Returns `LiError::InvalidPriorConfig` for malformed hyperparameters.
    pub fn validate(&self) -> Result<(), LiError> {
        self.compliance.validate()?;
        self.outcome.validate()?;
        self.response.validate()?;
        if !(self.variance.df.is_finite()
            && self.variance.scale.is_finite()
            && self.variance.df >= 0.0
            && self.variance.scale >= 0.0)
        {
            return Err(LiError::InvalidPriorConfig(
                "variance prior needs non-negative df and scale",
            ));
        }
        self.random_effects.compliance.validate()?;
        self.random_effects.always_taker.validate()?;
        self.random_effects.outcome.validate()?;
        self.random_effects.response.validate()
    }
}

/// Prior mean and precision expanded to a concrete block size.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPrior {
    pub mean: Vec<f64>,
    pub precision: Mat<f64>,
}

impl ResolvedPrior {
    /// Whether the prior mean is exactly zero.
    #[must_use]
    pub(crate) fn is_centered(&self) -> bool {
        self.mean.iter().all(|value| *value == 0.0)
    }

    /// Unnormalized log density `-(b - b0)' A0 (b - b0) / 2`.
    #[must_use]
    pub(crate) fn log_density(&self, coefficients: &[f64]) -> f64 {
        let dim = self.mean.len();
        let mut total = 0.0;
        for row in 0..dim {
            let centered_row = coefficients[row] - self.mean[row];
            if centered_row == 0.0 {
                continue;
            }
            for col in 0..dim {
                total += centered_row * self.precision[(row, col)] * (coefficients[col] - self.mean[col]);
            }
        }
        -0.5 * total
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedRandomPrior {
    pub df: f64,
    pub scale: Mat<f64>,
}
