//! Core public types for the latent-ignorability module.

use thiserror::Error;

use super::posterior::LiPosteriorSummary;
use super::qoi::QoiLayout;
use super::priors::LiPriorConfig;
use crate::inference::{InferenceError, McmcConfig};
use crate::input::InputError;

/// Errors returned by configuration, validation, and fitting.
#[derive(Debug, Error)]
pub enum LiError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("burn-in ({burn_in}) must be smaller than iterations ({iterations})")]
    InvalidBurnIn { burn_in: usize, iterations: usize },
    #[error("thinning interval must be positive")]
    InvalidThinning,
    #[error("{block} has dimension {found}; expected {expected}")]
    DimensionMismatch {
        block: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("invalid prior configuration: {0}")]
    InvalidPriorConfig(&'static str),
    #[error("invalid proposal configuration: {0}")]
    InvalidProposalConfig(&'static str),
    #[error("ordinal outcomes need at least two categories; found {0}")]
    InvalidCategories(usize),
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(&'static str),
    #[error("could not reserve storage for {draws} retained draws")]
    AllocationFailure { draws: usize },
    #[error("linear system could not be solved in the {0} block")]
    SolveFailed(&'static str),
}

impl From<InferenceError> for LiError {
    fn from(error: InferenceError) -> Self {
        match error {
            InferenceError::InvalidIterations => Self::InvalidIterations,
            InferenceError::InvalidBurnIn {
                burn_in,
                iterations,
            } => Self::InvalidBurnIn {
                burn_in,
                iterations,
            },
            InferenceError::InvalidThinning => Self::InvalidThinning,
        }
    }
}

/// Latent principal stratum of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComplianceType {
    /// Never takes the treatment, whatever the assignment.
    NeverTaker,
    /// Takes the treatment exactly when assigned to it.
    Complier,
    /// Always takes the treatment, whatever the assignment.
    AlwaysTaker,
}

/// Link function for binary regression blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Link {
    Logit,
    #[default]
    Probit,
}

/// Outcome distribution family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomeFamily {
    /// Outcomes coded `0` / `1`.
    #[default]
    Binary,
    /// Continuous outcomes with a conjugate Normal / inverse-gamma model.
    Gaussian,
    /// Ordered categories coded `0..categories`, fitted with an ordered probit.
    Ordinal { categories: usize },
}

/// Whether quantities of interest refer to the observed units or the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoiMode {
    /// Observed outcomes, with posterior predictive draws for the missing ones
    /// and the unobserved potential outcomes.
    #[default]
    InSample,
    /// Model-implied expectations for every unit.
    Population,
}

/// Which regression families and links the sampler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiModelSpec {
    pub family: OutcomeFamily,
    pub compliance_link: Link,
    /// Used by binary outcomes; Gaussian and ordinal outcomes ignore it.
    pub outcome_link: Link,
    pub response_link: Link,
}

/// Sampler schedule and behaviour switches.
#[derive(Debug, Clone, Copy)]
pub struct LiFitOptions {
    /// Total Gibbs sweeps.
    pub iterations: usize,
    /// Sweeps discarded before retention.
    pub burn_in: usize,
    /// Keep every `thin`-th sweep after burn-in.
    pub thin: usize,
    /// Seed of the random stream when no stream is supplied.
    pub seed: u64,
    /// Admit always-takers as a third compliance type.
    pub always_takers: bool,
    pub qoi_mode: QoiMode,
    /// Record coefficient traces alongside the quantities of interest.
    pub keep_parameters: bool,
    /// Use marginal data augmentation in probit Gibbs blocks.
    pub marginal_augmentation: bool,
    /// Log progress every tenth of the run.
    pub verbose: bool,
}

impl Default for LiFitOptions {
    fn default() -> Self {
        Self {
            iterations: 4_000,
            burn_in: 1_000,
            thin: 4,
            seed: 42,
            always_takers: false,
            qoi_mode: QoiMode::InSample,
            keep_parameters: true,
            marginal_augmentation: false,
            verbose: false,
        }
    }
}

impl LiFitOptions {
    #[must_use]
    pub const fn schedule(self) -> McmcConfig {
        McmcConfig {
            iterations: self.iterations,
            burn_in: self.burn_in,
            thin: self.thin,
            seed: self.seed,
        }
    }

    /// # Errors
    ///
    /// Returns `LiError` if the schedule is internally inconsistent.
    pub fn validate(self) -> Result<(), LiError> {
        self.schedule().validate().map_err(LiError::from)
    }

    /// Number of retained draws implied by `(iterations, burn_in, thin)`.
    #[must_use]
    pub const fn retained_draws(self) -> usize {
        self.schedule().retained_draws()
    }
}

/// Random-walk Metropolis proposal settings.
#[derive(Debug, Clone)]
pub struct LiProposalConfig {
    /// Proposal variances for the logit compliance coefficients; empty means
    /// `default_variance` for each.
    pub compliance: Vec<f64>,
    /// Proposal variances for the logit outcome coefficients.
    pub outcome: Vec<f64>,
    /// Proposal variances for the logit response coefficients.
    pub response: Vec<f64>,
    pub default_variance: f64,
    /// Standard deviation of the ordinal cutpoint proposals.
    pub cutpoint_sd: f64,
}

impl Default for LiProposalConfig {
    fn default() -> Self {
        Self {
            compliance: Vec::new(),
            outcome: Vec::new(),
            response: Vec::new(),
            default_variance: 0.01,
            cutpoint_sd: 0.05,
        }
    }
}

impl LiProposalConfig {
    /// # Errors
    ///
    /// Returns `LiError::InvalidProposalConfig` for non-positive scales.
    pub fn validate(&self) -> Result<(), LiError> {
        let positive = |value: &f64| value.is_finite() && *value > 0.0;
        if !positive(&self.default_variance) {
            return Err(LiError::InvalidProposalConfig(
                "default proposal variance must be positive",
            ));
        }
        if !positive(&self.cutpoint_sd) {
            return Err(LiError::InvalidProposalConfig(
                "cutpoint proposal sd must be positive",
            ));
        }
        let blocks = [&self.compliance, &self.outcome, &self.response];
        if blocks.iter().any(|block| !block.iter().all(positive)) {
            return Err(LiError::InvalidProposalConfig(
                "proposal variances must be positive",
            ));
        }
        Ok(())
    }

    /// Resolve one block of proposal variances to `dim` entries.
    ///
    /// # Errors
    ///
    /// Returns `LiError::DimensionMismatch` if a non-empty block has the wrong length.
    pub(crate) fn resolve(
        &self,
        block: &'static str,
        variances: &[f64],
        dim: usize,
    ) -> Result<Vec<f64>, LiError> {
        if variances.is_empty() {
            return Ok(vec![self.default_variance; dim]);
        }
        if variances.len() != dim {
            return Err(LiError::DimensionMismatch {
                block,
                expected: dim,
                found: variances.len(),
            });
        }
        Ok(variances.to_vec())
    }
}

/// Full sampler configuration.
#[derive(Debug, Clone, Default)]
pub struct LiSamplerConfig {
    pub fit_options: LiFitOptions,
    pub model: LiModelSpec,
    pub prior_config: LiPriorConfig,
    pub proposals: LiProposalConfig,
}

impl LiSamplerConfig {
    /// # Errors
    ///
    /// Returns `LiError` if options, priors, or proposals are invalid.
    pub fn validate(&self) -> Result<(), LiError> {
        self.fit_options.validate()?;
        if let OutcomeFamily::Ordinal { categories } = self.model.family
            && categories < 2
        {
            return Err(LiError::InvalidCategories(categories));
        }
        self.prior_config.validate()?;
        self.proposals.validate()
    }
}

/// Acceptance rates of the Metropolis blocks, one entry per proposal counter.
#[derive(Debug, Clone, Default)]
pub struct LiAcceptanceRates {
    pub compliance: Vec<f64>,
    pub outcome: Vec<f64>,
    pub response: Vec<f64>,
    pub cutpoints: Option<f64>,
}

/// Sampler bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct LiSamplerDiagnostics {
    pub iterations_completed: usize,
    pub retained_draws: usize,
    pub cancelled: bool,
    pub missing_outcomes: usize,
    pub acceptance: LiAcceptanceRates,
}

/// Configuration echo attached to a fit.
#[derive(Debug, Clone)]
pub struct LiModel {
    pub model: LiModelSpec,
    pub fit_options: LiFitOptions,
    pub hierarchical: bool,
    pub qoi_layout: QoiLayout,
}

/// Diagnostics and posterior summary of a fit.
#[derive(Debug, Clone)]
pub struct LiReport {
    pub diagnostics: LiSamplerDiagnostics,
    pub posterior_summary: LiPosteriorSummary,
}
