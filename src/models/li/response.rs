//! Missing-outcome (response) model.
//!
//! Under latent ignorability the response indicator depends on the latent
//! compliance type and assignment, so `R` is regressed on the type-contrast
//! design. The block is inactive when every outcome is observed.

use super::design::{ContrastPredictor, LatentCell, type_augmented_design};
use super::hierarchical::RandomEffectsBlock;
use super::input::PreparedExperiment;
use super::latent_type::TypeLikelihoods;
use super::likelihood::bernoulli_likelihood;
use super::priors::ResolvedPrior;
use super::random::RandomStream;
use super::regression::BinaryEngine;
use super::types::{ComplianceType, LiError, LiSamplerConfig, Link};

#[derive(Debug, Clone)]
pub(crate) struct ResponseModel {
    engine: BinaryEngine,
    prior: ResolvedPrior,
    pub coefficients: Vec<f64>,
    pub random: Option<RandomEffectsBlock>,
    active: bool,
}

impl ResponseModel {
    /// # Errors
    ///
    /// Returns `LiError` if priors or proposals do not fit the response design.
    pub(crate) fn new(
        data: &PreparedExperiment<'_>,
        config: &LiSamplerConfig,
    ) -> Result<Self, LiError> {
        let dim = data.type_columns() + data.input.x_response.ncols();
        let prior = config.prior_config.response.resolve("response prior", dim)?;
        let proposals = config.proposals.resolve(
            "response proposal variances",
            &config.proposals.response,
            dim,
        )?;
        let random = match (&data.input.clusters, &data.groups) {
            (Some(clusters), Some(groups)) => Some(RandomEffectsBlock::new(
                "response random effects",
                &clusters.z_response,
                data.type_columns(),
                groups.n_groups,
                &config.prior_config.random_effects.response,
            )?),
            _ => None,
        };
        Ok(Self {
            engine: BinaryEngine::new(
                config.model.response_link,
                proposals,
                config.fit_options.marginal_augmentation,
            ),
            prior,
            coefficients: vec![0.0; dim],
            random,
            active: data.n_missing() > 0,
        })
    }

    #[must_use]
    pub(crate) const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub(crate) const fn link(&self) -> Link {
        self.engine.link()
    }

    pub(crate) fn acceptance_stats(&self) -> &[crate::inference::ProposalStats] {
        self.engine.acceptance_stats()
    }

    /// Refit the response coefficients on all units given the current types.
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
        if !self.active {
            return Ok(());
        }
        let input = data.input;
        let design =
            type_augmented_design(&input.x_response, types, &input.assignment, data.type_columns());
        match (&mut self.random, &data.groups) {
            (Some(block), Some(groups)) => block.mixed_probit_update(
                &design,
                &data.all_units,
                &input.responded,
                &mut self.coefficients,
                &self.prior,
                groups,
                types,
                &input.assignment,
                stream,
            ),
            _ => self.engine.update(
                "response",
                &design,
                &data.all_units,
                &input.responded,
                &mut self.coefficients,
                &self.prior,
                stream,
            ),
        }
    }

    /// `P(R_i | cell)` for every unit under each hypothetical type.
    #[must_use]
    pub(crate) fn likelihoods(&self, data: &PreparedExperiment<'_>) -> TypeLikelihoods {
        let n_units = data.n_units();
        let mut likelihoods = TypeLikelihoods::ones(n_units);
        if !self.active {
            return likelihoods;
        }
        let input = data.input;
        let predictor = ContrastPredictor {
            covariates: &input.x_response,
            coefficients: &self.coefficients,
            type_columns: data.type_columns(),
            random: self
                .random
                .as_ref()
                .zip(data.groups.as_ref())
                .map(|(block, groups)| block.contribution(groups)),
        };
        let link = self.link();
        for unit in 0..n_units {
            let responded = input.responded[unit];
            let base = predictor.base(unit);
            let complier = LatentCell::of(ComplianceType::Complier, input.assignment[unit]);
            likelihoods.complier[unit] = bernoulli_likelihood(
                link,
                base + predictor.offset(unit, complier),
                responded,
            );
            likelihoods.never_taker[unit] = bernoulli_likelihood(link, base, responded);
            if data.always_takers {
                likelihoods.always_taker[unit] = bernoulli_likelihood(
                    link,
                    base + predictor.offset(unit, LatentCell::AlwaysTaker),
                    responded,
                );
            }
        }
        likelihoods
    }
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::input::ExperimentInput;
    use crate::models::li::input::prepare_experiment;
    use crate::models::li::types::OutcomeFamily;

    fn experiment(responded: Vec<bool>) -> ExperimentInput {
        let rows = responded.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::zeros(rows, 1),
            responded,
            (0..rows).map(|row| row % 2 == 0).collect(),
            (0..rows).map(|row| row % 4 == 0).collect(),
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    #[test]
    fn fully_observed_outcomes_leave_response_inactive() {
        let data = experiment(vec![true; 8]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let mut model =
            ResponseModel::new(&prepared, &LiSamplerConfig::default()).expect("valid config");
        assert!(!model.is_active());
        let types = prepared.initial_types().expect("default types");
        let mut stream = RandomStream::seed_from_u64(1);
        model
            .update(&prepared, &types, &mut stream)
            .expect("inactive update is a no-op");
        let likelihoods = model.likelihoods(&prepared);
        assert!(likelihoods.complier.iter().all(|value| *value == 1.0));
        assert!(model.coefficients.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn response_likelihoods_are_probabilities() {
        let data = experiment(vec![true, false, true, true, false, true, true, true]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let mut model =
            ResponseModel::new(&prepared, &LiSamplerConfig::default()).expect("valid config");
        assert!(model.is_active());
        let types = prepared.initial_types().expect("default types");
        let mut stream = RandomStream::seed_from_u64(2);
        for _ in 0..5 {
            model
                .update(&prepared, &types, &mut stream)
                .expect("probit update succeeds");
        }
        let likelihoods = model.likelihoods(&prepared);
        for unit in 0..8 {
            for value in [likelihoods.complier[unit], likelihoods.never_taker[unit]] {
                assert!((0.0..=1.0).contains(&value));
            }
        }
    }

    #[test]
    fn wrong_response_prior_size_is_rejected() {
        let data = experiment(vec![true; 4]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let mut config = LiSamplerConfig::default();
        config.prior_config.response = crate::models::li::priors::BlockPrior::Full {
            mean: vec![0.0; 2],
            precision: crate::utils::identity_matrix(2),
        };
        assert!(matches!(
            ResponseModel::new(&prepared, &config),
            Err(LiError::DimensionMismatch { expected: 3, .. })
        ));
    }
}
