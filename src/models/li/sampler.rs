//! Gibbs driver for the latent-ignorability model.
//!
//! One sweep updates, in order: the response model, the compliance model, the
//! latent compliance types, the outcome model, and (on retained sweeps) the
//! quantities of interest.

use tracing::{debug, info};

use super::compliance::ComplianceModel;
use super::input::{PreparedExperiment, prepare_experiment};
use super::latent_type::{TypeLikelihoods, initial_likelihoods, sample_types};
use super::outcome::OutcomeModel;
use super::posterior::{
    LiParameterDraw, LiPosteriorSamples, RandomEffectCovariances, summarize_posterior,
};
use super::qoi::{QoiLayout, TypeCounts, estimate_qoi};
use super::random::RandomStream;
use super::response::ResponseModel;
use super::types::{
    ComplianceType, LiAcceptanceRates, LiError, LiFitOptions, LiModel, LiReport,
    LiSamplerConfig, LiSamplerDiagnostics, Link, OutcomeFamily,
};
use crate::inference::{CancelFlag, acceptance_rates};
use crate::input::ExperimentInput;

/// Everything a fit produces, including the state needed to continue a chain.
#[derive(Debug, Clone)]
pub struct LiFit {
    pub model: LiModel,
    pub report: LiReport,
    pub samples: LiPosteriorSamples,
    /// Compliance types after the last completed sweep.
    pub final_types: Vec<ComplianceType>,
    /// Random stream after the last completed sweep.
    pub final_stream: RandomStream,
}

/// Fit the latent-ignorability model with default priors and proposals.
///
/// # Errors
///
/// Returns `LiError` if the input or options are invalid or a Gibbs block fails.
pub fn fit_li_input(
    input: &ExperimentInput,
    options: LiFitOptions,
) -> Result<(LiModel, LiReport), LiError> {
    let config = LiSamplerConfig {
        fit_options: options,
        ..LiSamplerConfig::default()
    };
    fit_li_input_with_config(input, &config)
}

/// Fit with explicit model, prior, and proposal configuration.
///
/// # Errors
///
/// Returns `LiError` if the input or configuration is invalid or a Gibbs block fails.
pub fn fit_li_input_with_config(
    input: &ExperimentInput,
    config: &LiSamplerConfig,
) -> Result<(LiModel, LiReport), LiError> {
    let fit = fit_li_input_with_posterior(input, config)?;
    Ok((fit.model, fit.report))
}

/// Fit and return the retained traces, seeding the stream from `fit_options.seed`.
///
/// # Errors
///
/// Returns `LiError` if the input or configuration is invalid or a Gibbs block fails.
pub fn fit_li_input_with_posterior(
    input: &ExperimentInput,
    config: &LiSamplerConfig,
) -> Result<LiFit, LiError> {
    let stream = RandomStream::seed_from_u64(config.fit_options.seed);
    fit_li_input_with_cancel(input, config, stream, &CancelFlag::new())
}

/// Fit from a caller-supplied stream, stopping early if `cancel` is raised.
///
/// A cancelled fit returns the sweeps retained so far with
/// `diagnostics.cancelled` set.
///
/// # Errors
///
/// Returns `LiError` if the input or configuration is invalid or a Gibbs block fails.
pub fn fit_li_input_with_cancel(
    input: &ExperimentInput,
    config: &LiSamplerConfig,
    mut stream: RandomStream,
    cancel: &CancelFlag,
) -> Result<LiFit, LiError> {
    config.validate()?;
    validate_variant(input, config)?;
    let options = config.fit_options;
    let data = prepare_experiment(input, config.model.family, options.always_takers)?;
    let types = data.initial_types()?;

    let mut response = ResponseModel::new(&data, config)?;
    let mut compliance = ComplianceModel::new(&data, config)?;
    let mut outcome = OutcomeModel::new(&data, config)?;
    let layout = QoiLayout {
        ordinal: matches!(config.model.family, OutcomeFamily::Ordinal { .. }),
        width: outcome.qoi_width(),
        always_takers: data.always_takers,
    };
    let retained_draws = options.retained_draws();
    let mut samples =
        LiPosteriorSamples::with_reserved(retained_draws, options.keep_parameters, layout)?;

    log_setup(&data, config);

    let (outcome_likelihoods, response_likelihoods) =
        initial_likelihoods(data.n_units(), data.n_missing() > 0, &mut stream);
    let mut state = ChainState {
        types,
        outcome_likelihoods,
        response_likelihoods,
    };
    let mut schedule = options.schedule().retention_schedule();
    let progress_interval = (options.iterations / 10).max(1);
    let mut iterations_completed = 0;
    let mut cancelled = false;

    for iteration in 1..=options.iterations {
        if cancel.is_cancelled() {
            info!(
                iterations_completed,
                retained = samples.len(),
                "sampling cancelled"
            );
            cancelled = true;
            break;
        }

        if response.is_active() {
            response.update(&data, &state.types, &mut stream)?;
            state.response_likelihoods = response.likelihoods(&data);
        }
        compliance.update(&data, &state.types, &mut stream)?;
        let prior = compliance.type_probabilities(&data);
        state.types = sample_types(
            &data,
            &prior,
            &state.outcome_likelihoods,
            &state.response_likelihoods,
            &state.types,
            &mut stream,
        );
        outcome.update(&data, &state.types, &mut stream)?;
        state.outcome_likelihoods = outcome.likelihoods(&data);

        if schedule.advance(iteration) {
            let draw = estimate_qoi(
                &data,
                &state.types,
                &prior,
                &outcome,
                options.qoi_mode,
                &mut stream,
            );
            if draw.is_degenerate() {
                debug!(iteration, counts = ?draw.counts, "empty subgroup in retained sweep");
            }
            samples.qoi.push(draw);
            if options.keep_parameters {
                samples.parameters.push(parameter_draw(
                    &data,
                    &compliance,
                    &outcome,
                    &response,
                ));
            }
        }
        iterations_completed = iteration;

        if options.verbose && iteration.is_multiple_of(progress_interval) {
            let acceptance = acceptance(&compliance, &outcome, &response);
            info!(
                iteration,
                total = options.iterations,
                compliers = TypeCounts::from_types(&state.types, &input.assignment).compliers(),
                compliance_acceptance = ?acceptance.compliance,
                outcome_acceptance = ?acceptance.outcome,
                response_acceptance = ?acceptance.response,
                cutpoint_acceptance = ?acceptance.cutpoints,
                "sampling progress"
            );
        }
    }

    let diagnostics = LiSamplerDiagnostics {
        iterations_completed,
        retained_draws: samples.len(),
        cancelled,
        missing_outcomes: data.n_missing(),
        acceptance: acceptance(&compliance, &outcome, &response),
    };
    let report = LiReport {
        diagnostics,
        posterior_summary: summarize_posterior(&samples),
    };
    let model = LiModel {
        model: config.model,
        fit_options: options,
        hierarchical: data.groups.is_some(),
        qoi_layout: layout,
    };
    Ok(LiFit {
        model,
        report,
        samples,
        final_types: state.types,
        final_stream: stream,
    })
}

#[derive(Debug)]
struct ChainState {
    types: Vec<ComplianceType>,
    outcome_likelihoods: TypeLikelihoods,
    response_likelihoods: TypeLikelihoods,
}

/// Random effects are only available for binary probit outcome and response models.
fn validate_variant(input: &ExperimentInput, config: &LiSamplerConfig) -> Result<(), LiError> {
    if input.clusters.is_none() {
        return Ok(());
    }
    if config.model.family != OutcomeFamily::Binary {
        return Err(LiError::UnsupportedConfiguration(
            "cluster random effects require a binary outcome",
        ));
    }
    if config.model.outcome_link != Link::Probit || config.model.response_link != Link::Probit {
        return Err(LiError::UnsupportedConfiguration(
            "cluster random effects require probit outcome and response links",
        ));
    }
    Ok(())
}

fn log_setup(data: &PreparedExperiment<'_>, config: &LiSamplerConfig) {
    let ambiguous = (0..data.n_units())
        .filter(|unit| data.is_ambiguous(*unit))
        .count();
    debug!(
        units = data.n_units(),
        ambiguous,
        missing = data.n_missing(),
        always_takers = data.always_takers,
        clusters = data.groups.as_ref().map_or(0, |groups| groups.n_groups),
        family = ?config.model.family,
        compliance_link = ?config.model.compliance_link,
        outcome_link = ?config.model.outcome_link,
        response_link = ?config.model.response_link,
        qoi_mode = ?config.fit_options.qoi_mode,
        "starting latent-ignorability sampler"
    );
}

fn acceptance(
    compliance: &ComplianceModel,
    outcome: &OutcomeModel,
    response: &ResponseModel,
) -> LiAcceptanceRates {
    LiAcceptanceRates {
        compliance: acceptance_rates(compliance.acceptance_stats()),
        outcome: acceptance_rates(outcome.acceptance_stats()),
        response: acceptance_rates(response.acceptance_stats()),
        cutpoints: outcome.cutpoint_stats().map(|stats| stats.acceptance_rate()),
    }
}

fn parameter_draw(
    data: &PreparedExperiment<'_>,
    compliance: &ComplianceModel,
    outcome: &OutcomeModel,
    response: &ResponseModel,
) -> LiParameterDraw {
    let random_effect_covariances = data.groups.as_ref().map(|_| {
        let (compliance_covariance, always_taker_covariance) = compliance.random_covariances();
        RandomEffectCovariances {
            compliance: compliance_covariance,
            always_taker: always_taker_covariance,
            outcome: outcome.random.as_ref().map(|block| block.covariance.clone()),
            response: response
                .random
                .as_ref()
                .filter(|_| response.is_active())
                .map(|block| block.covariance.clone()),
        }
    });
    LiParameterDraw {
        compliance: compliance.complier_coefficients(),
        always_taker: compliance.always_taker_coefficients(data.always_takers),
        outcome: outcome.coefficients.clone(),
        response: response
            .is_active()
            .then(|| response.coefficients.clone()),
        variance: outcome.variance(),
        cutpoints: outcome.cutpoints().map(<[f64]>::to_vec),
        random_effect_covariances,
    }
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::input::ClusterDesign;

    fn experiment(rows: usize) -> ExperimentInput {
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::from_fn(rows, 1, |row, _| if row % 3 == 0 { 1.0 } else { 0.0 }),
            vec![true; rows],
            (0..rows).map(|row| row % 2 == 0).collect(),
            (0..rows).map(|row| row % 4 == 0).collect(),
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    fn short_config() -> LiSamplerConfig {
        LiSamplerConfig {
            fit_options: LiFitOptions {
                iterations: 30,
                burn_in: 10,
                thin: 5,
                ..LiFitOptions::default()
            },
            ..LiSamplerConfig::default()
        }
    }

    #[test]
    fn clusters_require_binary_probit_outcome_and_response() {
        let data = experiment(8).with_clusters(ClusterDesign::intercepts(vec![0, 0, 1, 1, 2, 2, 3, 3]));
        let mut config = short_config();
        config.model.family = OutcomeFamily::Gaussian;
        assert!(matches!(
            fit_li_input_with_posterior(&data, &config),
            Err(LiError::UnsupportedConfiguration(_))
        ));
        let mut config = short_config();
        config.model.response_link = Link::Logit;
        assert!(matches!(
            fit_li_input_with_posterior(&data, &config),
            Err(LiError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn retained_draws_follow_schedule() {
        let fit = fit_li_input_with_posterior(&experiment(16), &short_config()).expect("fit runs");
        assert_eq!(fit.samples.len(), 4);
        assert_eq!(fit.samples.parameters.len(), 4);
        assert_eq!(fit.report.diagnostics.iterations_completed, 30);
        assert!(!fit.report.diagnostics.cancelled);
        assert!(fit.samples.parameters[0].response.is_none());
    }

    #[test]
    fn pre_cancelled_fit_returns_no_draws() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let fit = fit_li_input_with_cancel(
            &experiment(8),
            &short_config(),
            RandomStream::seed_from_u64(1),
            &cancel,
        )
        .expect("cancellation is not an error");
        assert!(fit.report.diagnostics.cancelled);
        assert_eq!(fit.report.diagnostics.iterations_completed, 0);
        assert!(fit.samples.is_empty());
        assert_eq!(fit.report.posterior_summary.draw_count, 0);
    }

    #[test]
    fn dropping_parameters_keeps_qoi() {
        let mut config = short_config();
        config.fit_options.keep_parameters = false;
        let fit = fit_li_input_with_posterior(&experiment(12), &config).expect("fit runs");
        assert_eq!(fit.samples.len(), 4);
        assert!(fit.samples.parameters.is_empty());
        assert!(fit.report.posterior_summary.compliance.is_empty());
    }
}
