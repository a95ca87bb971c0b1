//! Outcome model: binary, Gaussian, or ordered-probit regression on the
//! type-contrast design, fitted on responders.

use super::design::{ContrastPredictor, LatentCell, type_augmented_design};
use super::hierarchical::RandomEffectsBlock;
use super::input::PreparedExperiment;
use super::latent_type::TypeLikelihoods;
use super::likelihood::{
    bernoulli_likelihood, normal_density, ordinal_probability, success_probability,
};
use super::priors::{ResolvedPrior, VariancePrior};
use super::random::RandomStream;
use super::regression::{BinaryEngine, normal_regression_gibbs, ordinal_probit_update};
use super::types::{ComplianceType, LiError, LiSamplerConfig, Link, OutcomeFamily};
use crate::inference::ProposalStats;
use crate::utils::usize_to_f64;

#[derive(Debug, Clone)]
pub(crate) enum OutcomeKind {
    Binary {
        engine: BinaryEngine,
    },
    Gaussian {
        variance: f64,
        variance_prior: VariancePrior,
    },
    Ordinal {
        categories: usize,
        /// `categories - 1` increasing thresholds, the first fixed at zero.
        cutpoints: Vec<f64>,
        proposal_sd: f64,
        stats: ProposalStats,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct OutcomeModel {
    pub kind: OutcomeKind,
    prior: ResolvedPrior,
    pub coefficients: Vec<f64>,
    pub random: Option<RandomEffectsBlock>,
}

impl OutcomeModel {
    /// # Errors
    ///
    /// Returns `LiError` if priors or proposals do not fit the outcome design.
    pub(crate) fn new(
        data: &PreparedExperiment<'_>,
        config: &LiSamplerConfig,
    ) -> Result<Self, LiError> {
        let dim = data.type_columns() + data.input.x_outcome.ncols();
        let prior = config.prior_config.outcome.resolve("outcome prior", dim)?;
        let kind = match config.model.family {
            OutcomeFamily::Binary => {
                let proposals = config.proposals.resolve(
                    "outcome proposal variances",
                    &config.proposals.outcome,
                    dim,
                )?;
                OutcomeKind::Binary {
                    engine: BinaryEngine::new(
                        config.model.outcome_link,
                        proposals,
                        config.fit_options.marginal_augmentation,
                    ),
                }
            }
            OutcomeFamily::Gaussian => OutcomeKind::Gaussian {
                variance: 1.0,
                variance_prior: config.prior_config.variance,
            },
            OutcomeFamily::Ordinal { categories } => {
                if categories < 2 {
                    return Err(LiError::InvalidCategories(categories));
                }
                OutcomeKind::Ordinal {
                    categories,
                    cutpoints: (0..categories - 1).map(usize_to_f64).collect(),
                    proposal_sd: config.proposals.cutpoint_sd,
                    stats: ProposalStats::default(),
                }
            }
        };
        let random = match (&data.input.clusters, &data.groups) {
            (Some(clusters), Some(groups)) => Some(RandomEffectsBlock::new(
                "outcome random effects",
                &clusters.z_outcome,
                data.type_columns(),
                groups.n_groups,
                &config.prior_config.random_effects.outcome,
            )?),
            _ => None,
        };
        Ok(Self {
            kind,
            prior,
            coefficients: vec![0.0; dim],
            random,
        })
    }

    /// Width of one subgroup mean: one, or `categories - 1` category probabilities.
    #[must_use]
    pub(crate) const fn qoi_width(&self) -> usize {
        match &self.kind {
            OutcomeKind::Ordinal { categories, .. } => *categories - 1,
            OutcomeKind::Binary { .. } | OutcomeKind::Gaussian { .. } => 1,
        }
    }

    pub(crate) fn acceptance_stats(&self) -> &[ProposalStats] {
        match &self.kind {
            OutcomeKind::Binary { engine } => engine.acceptance_stats(),
            OutcomeKind::Gaussian { .. } | OutcomeKind::Ordinal { .. } => &[],
        }
    }

    #[must_use]
    pub(crate) const fn cutpoint_stats(&self) -> Option<ProposalStats> {
        match &self.kind {
            OutcomeKind::Ordinal { stats, .. } => Some(*stats),
            OutcomeKind::Binary { .. } | OutcomeKind::Gaussian { .. } => None,
        }
    }

    #[must_use]
    pub(crate) const fn variance(&self) -> Option<f64> {
        match &self.kind {
            OutcomeKind::Gaussian { variance, .. } => Some(*variance),
            OutcomeKind::Binary { .. } | OutcomeKind::Ordinal { .. } => None,
        }
    }

    #[must_use]
    pub(crate) fn cutpoints(&self) -> Option<&[f64]> {
        match &self.kind {
            OutcomeKind::Ordinal { cutpoints, .. } => Some(cutpoints),
            OutcomeKind::Binary { .. } | OutcomeKind::Gaussian { .. } => None,
        }
    }

    pub(crate) fn predictor<'a>(
        &'a self,
        data: &'a PreparedExperiment<'_>,
    ) -> ContrastPredictor<'a> {
        ContrastPredictor {
            covariates: &data.input.x_outcome,
            coefficients: &self.coefficients,
            type_columns: data.type_columns(),
            random: self
                .random
                .as_ref()
                .zip(data.groups.as_ref())
                .map(|(block, groups)| block.contribution(groups)),
        }
    }

    /// Refit the outcome model on responders given the current types.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if a Gibbs posterior cannot be factored.
    pub(crate) fn update(
        &mut self,
        data: &PreparedExperiment<'_>,
        types: &[ComplianceType],
        stream: &mut RandomStream,
    ) -> Result<(), LiError> {
        let input = data.input;
        let design =
            type_augmented_design(&input.x_outcome, types, &input.assignment, data.type_columns());
        let rows = &data.observed;
        match &mut self.kind {
            OutcomeKind::Binary { engine } => match (&mut self.random, &data.groups) {
                (Some(block), Some(groups)) => block.mixed_probit_update(
                    &design,
                    rows,
                    &data.binary_outcome,
                    &mut self.coefficients,
                    &self.prior,
                    groups,
                    types,
                    &input.assignment,
                    stream,
                ),
                _ => engine.update(
                    "outcome",
                    &design,
                    rows,
                    &data.binary_outcome,
                    &mut self.coefficients,
                    &self.prior,
                    stream,
                ),
            },
            OutcomeKind::Gaussian {
                variance,
                variance_prior,
            } => {
                let response: Vec<f64> = rows.iter().map(|&row| input.outcome[(row, 0)]).collect();
                let (coefficients, drawn) = normal_regression_gibbs(
                    &design,
                    rows,
                    &response,
                    &self.prior,
                    variance_prior.df,
                    variance_prior.scale,
                    stream,
                )?;
                self.coefficients = coefficients;
                *variance = drawn;
                Ok(())
            }
            OutcomeKind::Ordinal {
                cutpoints,
                proposal_sd,
                stats,
                ..
            } => ordinal_probit_update(
                &design,
                rows,
                &data.ordinal_outcome,
                &mut self.coefficients,
                cutpoints,
                &self.prior,
                *proposal_sd,
                stats,
                stream,
            ),
        }
    }

    fn observed_likelihood(&self, data: &PreparedExperiment<'_>, unit: usize, index: f64) -> f64 {
        match &self.kind {
            OutcomeKind::Binary { engine } => {
                bernoulli_likelihood(engine.link(), index, data.binary_outcome[unit])
            }
            OutcomeKind::Gaussian { variance, .. } => {
                normal_density(data.input.outcome[(unit, 0)], index, *variance)
            }
            OutcomeKind::Ordinal { cutpoints, .. } => {
                ordinal_probability(data.ordinal_outcome[unit], cutpoints, index)
            }
        }
    }

    /// Likelihood of each responder's outcome under each hypothetical type;
    /// one for non-responders.
    #[must_use]
    pub(crate) fn likelihoods(&self, data: &PreparedExperiment<'_>) -> TypeLikelihoods {
        let mut likelihoods = TypeLikelihoods::ones(data.n_units());
        let predictor = self.predictor(data);
        for &unit in &data.observed {
            let base = predictor.base(unit);
            let complier = LatentCell::of(ComplianceType::Complier, data.input.assignment[unit]);
            likelihoods.complier[unit] =
                self.observed_likelihood(data, unit, base + predictor.offset(unit, complier));
            likelihoods.never_taker[unit] = self.observed_likelihood(data, unit, base);
            if data.always_takers {
                likelihoods.always_taker[unit] = self.observed_likelihood(
                    data,
                    unit,
                    base + predictor.offset(unit, LatentCell::AlwaysTaker),
                );
            }
        }
        likelihoods
    }

    /// Add the model expectation of the outcome at `index` to `sum`.
    pub(crate) fn add_expected(&self, index: f64, sum: &mut [f64]) {
        match &self.kind {
            OutcomeKind::Binary { engine } => sum[0] += success_probability(engine.link(), index),
            OutcomeKind::Gaussian { .. } => sum[0] += index,
            OutcomeKind::Ordinal { categories, cutpoints, .. } => {
                for category in 1..*categories {
                    sum[category - 1] += ordinal_probability(category, cutpoints, index);
                }
            }
        }
    }

    /// Add the observed outcome of a responder, or one posterior predictive
    /// draw at `index` for a non-responder, to `sum`.
    pub(crate) fn add_realized(
        &self,
        data: &PreparedExperiment<'_>,
        unit: usize,
        index: f64,
        stream: &mut RandomStream,
        sum: &mut [f64],
    ) {
        let responded = data.input.responded[unit];
        match &self.kind {
            OutcomeKind::Binary { engine } => {
                let success = if responded {
                    data.binary_outcome[unit]
                } else {
                    match engine.link() {
                        Link::Logit => success_probability(Link::Logit, index) > stream.uniform(),
                        Link::Probit => index + stream.normal() > 0.0,
                    }
                };
                if success {
                    sum[0] += 1.0;
                }
            }
            OutcomeKind::Gaussian { variance, .. } => {
                sum[0] += if responded {
                    data.input.outcome[(unit, 0)]
                } else {
                    variance.sqrt().mul_add(stream.normal(), index)
                };
            }
            OutcomeKind::Ordinal { categories, cutpoints, .. } => {
                let category = if responded {
                    data.ordinal_outcome[unit]
                } else {
                    let weights: Vec<f64> = (0..*categories)
                        .map(|category| ordinal_probability(category, cutpoints, index))
                        .collect();
                    stream.categorical(&weights)
                };
                if category > 0 {
                    sum[category - 1] += 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::input::ExperimentInput;
    use crate::models::li::input::prepare_experiment;
    use approx::assert_relative_eq;

    fn experiment(outcome: &[f64], responded: Vec<bool>) -> ExperimentInput {
        let rows = outcome.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::from_fn(rows, 1, |row, _| outcome[row]),
            responded,
            (0..rows).map(|row| row % 2 == 0).collect(),
            (0..rows).map(|row| row % 4 == 0).collect(),
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    fn config(family: OutcomeFamily) -> LiSamplerConfig {
        let mut config = LiSamplerConfig::default();
        config.model.family = family;
        config
    }

    #[test]
    fn non_responders_have_unit_likelihood() {
        let data = experiment(&[1.0, 0.0, 0.0, 1.0], vec![true, false, true, true]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let model =
            OutcomeModel::new(&prepared, &config(OutcomeFamily::Binary)).expect("valid config");
        let likelihoods = model.likelihoods(&prepared);
        assert_relative_eq!(likelihoods.complier[1], 1.0);
        assert_relative_eq!(likelihoods.never_taker[1], 1.0);
        assert_relative_eq!(likelihoods.complier[0], 0.5, epsilon = 1.0e-12);
    }

    #[test]
    fn ordinal_widths_and_cutpoints_start_at_integers() {
        let family = OutcomeFamily::Ordinal { categories: 4 };
        let data = experiment(&[0.0, 1.0, 2.0, 3.0], vec![true; 4]);
        let prepared = prepare_experiment(&data, family, false).expect("valid experiment");
        let model = OutcomeModel::new(&prepared, &config(family)).expect("valid config");
        assert_eq!(model.qoi_width(), 3);
        assert_eq!(model.cutpoints(), Some(&[0.0, 1.0, 2.0][..]));
        let mut expected = vec![0.0; 3];
        model.add_expected(0.0, &mut expected);
        let total: f64 = expected.iter().sum();
        assert_relative_eq!(total, 1.0 - 0.5, epsilon = 1.0e-12);
    }

    #[test]
    fn gaussian_update_draws_positive_variance() {
        let outcome: Vec<f64> = (0..20).map(|row| usize_to_f64(row % 5)).collect();
        let data = experiment(&outcome, vec![true; 20]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Gaussian, false).expect("valid experiment");
        let mut model =
            OutcomeModel::new(&prepared, &config(OutcomeFamily::Gaussian)).expect("valid config");
        let types = prepared.initial_types().expect("default types");
        let mut stream = RandomStream::seed_from_u64(9);
        model
            .update(&prepared, &types, &mut stream)
            .expect("update succeeds");
        assert!(model.variance().is_some_and(|variance| variance > 0.0));
        let likelihoods = model.likelihoods(&prepared);
        assert!(likelihoods.never_taker.iter().all(|value| *value > 0.0));
    }

    #[test]
    fn realized_outcomes_use_observed_values() {
        let data = experiment(&[3.5, 0.0], vec![true, false]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Gaussian, false).expect("valid experiment");
        let model =
            OutcomeModel::new(&prepared, &config(OutcomeFamily::Gaussian)).expect("valid config");
        let mut stream = RandomStream::seed_from_u64(1);
        let mut sum = [0.0];
        model.add_realized(&prepared, 0, 100.0, &mut stream, &mut sum);
        assert_relative_eq!(sum[0], 3.5);
        model.add_realized(&prepared, 1, 100.0, &mut stream, &mut sum);
        assert!(sum[0] > 90.0);
    }
}
