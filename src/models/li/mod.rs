//! Latent-ignorability model for randomized experiments with noncompliance
//! and missing outcomes.
//!
//! Units belong to a latent compliance type (complier, never-taker and,
//! optionally, always-taker). Missingness of the outcome may depend on that
//! type, which is imputed by data augmentation inside a Gibbs sampler. Outcome
//! families are binary, Gaussian, and ordinal; a mixed-effects variant adds
//! cluster random effects to probit blocks.

mod compliance;
mod design;
mod hierarchical;
mod input;
mod latent_type;
pub mod likelihood;
mod outcome;
pub mod posterior;
pub mod priors;
pub mod qoi;
pub mod random;
mod regression;
mod response;
pub mod sampler;
pub mod types;

pub use posterior::{
    LiParameterDraw, LiPosteriorSamples, LiPosteriorSummary, ParameterSummary,
    RandomEffectCovariances, render_qoi_summary, summarize_posterior,
};
pub use priors::{BlockPrior, LiPriorConfig, RandomEffectPrior, RandomEffectsPriors, VariancePrior};
pub use qoi::{LiQoiDraw, QoiLayout, TypeCounts};
pub use random::RandomStream;
pub use sampler::{
    LiFit, fit_li_input, fit_li_input_with_cancel, fit_li_input_with_config,
    fit_li_input_with_posterior,
};
pub use types::{
    ComplianceType, LiAcceptanceRates, LiError, LiFitOptions, LiModel, LiModelSpec,
    LiProposalConfig, LiReport, LiSamplerConfig, LiSamplerDiagnostics, Link, OutcomeFamily,
    QoiMode,
};
