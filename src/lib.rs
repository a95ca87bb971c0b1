#![forbid(unsafe_code)]

//! # `noncompliance_models`
//!
//! Bayesian analysis of randomized experiments with noncompliance and
//! missing outcomes under latent ignorability: a Gibbs sampler that imputes
//! each unit's compliance type and reports complier average causal effects,
//! intention-to-treat effects, and type-specific outcome means.
//!
//! Binary, Gaussian, and ordinal outcomes are supported, with logit or probit
//! links and an optional cluster random-effects variant for probit blocks.

pub mod inference;
pub mod input;
pub mod models;
pub mod preprocess;
pub mod utils;

pub use inference::{CancelFlag, InferenceError, McmcConfig, ProposalStats, RetentionSchedule};
pub use input::{ClusterDesign, ExperimentInput, InputError};
pub use preprocess::{ExperimentSummary, experiment_summary};

pub use models::li::{
    BlockPrior, ComplianceType, LiAcceptanceRates, LiError, LiFit, LiFitOptions, LiModel,
    LiModelSpec, LiParameterDraw, LiPosteriorSamples, LiPosteriorSummary, LiPriorConfig,
    LiProposalConfig, LiQoiDraw, LiReport, LiSamplerConfig, LiSamplerDiagnostics, Link,
    OutcomeFamily, ParameterSummary, QoiLayout, QoiMode, RandomEffectCovariances,
    RandomEffectPrior, RandomEffectsPriors, RandomStream, TypeCounts, VariancePrior,
    fit_li_input, fit_li_input_with_cancel, fit_li_input_with_config,
    fit_li_input_with_posterior, render_qoi_summary, summarize_posterior,
};
