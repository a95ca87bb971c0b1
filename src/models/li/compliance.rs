//! Compliance-type model.
//!
//! A logit link fits one (multinomial) logit with never-takers as baseline.
//! A probit link fits two nested probits: complier against everyone, then
//! always-taker against never-taker among the current non-compliers.

use faer::Mat;

use super::design::ContrastPredictor;
use super::hierarchical::RandomEffectsBlock;
use super::input::PreparedExperiment;
use super::latent_type::TypeProbabilities;
use super::likelihood::{logistic_stable, standard_normal_cdf};
use super::priors::{RandomEffectPrior, ResolvedPrior};
use super::random::RandomStream;
use super::regression::{logit_metropolis, probit_gibbs};
use super::types::{ComplianceType, LiError, LiSamplerConfig, Link};
use crate::inference::ProposalStats;

#[derive(Debug, Clone)]
struct ProbitBlock {
    coefficients: Vec<f64>,
    random: Option<RandomEffectsBlock>,
}

impl ProbitBlock {
    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        name: &'static str,
        design: &Mat<f64>,
        rows: &[usize],
        outcome: &[bool],
        prior: &ResolvedPrior,
        marginal_augmentation: bool,
        data: &PreparedExperiment<'_>,
        types: &[ComplianceType],
        stream: &mut RandomStream,
    ) -> Result<(), LiError> {
        match (&mut self.random, &data.groups) {
            (Some(block), Some(groups)) => block.mixed_probit_update(
                design,
                rows,
                outcome,
                &mut self.coefficients,
                prior,
                groups,
                types,
                &data.input.assignment,
                stream,
            ),
            _ => probit_gibbs(
                name,
                design,
                rows,
                outcome,
                &mut self.coefficients,
                prior,
                marginal_augmentation,
                stream,
            ),
        }
    }

    fn index(&self, data: &PreparedExperiment<'_>, unit: usize) -> f64 {
        ContrastPredictor {
            covariates: &data.input.x_compliance,
            coefficients: &self.coefficients,
            type_columns: 0,
            random: self
                .random
                .as_ref()
                .zip(data.groups.as_ref())
                .map(|(block, groups)| block.contribution(groups)),
        }
        .base(unit)
    }
}

#[derive(Debug, Clone)]
enum ComplianceEngine {
    Logit {
        coefficients: Vec<f64>,
        proposal_variances: Vec<f64>,
        stats: Vec<ProposalStats>,
    },
    Probit {
        complier: ProbitBlock,
        always_taker: Option<ProbitBlock>,
        marginal_augmentation: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ComplianceModel {
    engine: ComplianceEngine,
    prior: ResolvedPrior,
    covariates: usize,
}

impl ComplianceModel {
    /// # Errors
    ///
    /// Returns `LiError` if priors or proposals do not fit the compliance design.
    pub(crate) fn new(
        data: &PreparedExperiment<'_>,
        config: &LiSamplerConfig,
    ) -> Result<Self, LiError> {
        let p = data.input.x_compliance.ncols();
        let engine = match config.model.compliance_link {
            Link::Logit => {
                let dim = if data.always_takers { 2 * p } else { p };
                let proposal_variances = config.proposals.resolve(
                    "compliance proposal variances",
                    &config.proposals.compliance,
                    dim,
                )?;
                ComplianceEngine::Logit {
                    coefficients: vec![0.0; dim],
                    stats: vec![ProposalStats::default(); dim],
                    proposal_variances,
                }
            }
            Link::Probit => {
                let random_block = |name: &'static str,
                                    prior: &RandomEffectPrior|
                 -> Result<Option<RandomEffectsBlock>, LiError> {
                    match (&data.input.clusters, &data.groups) {
                        (Some(clusters), Some(groups)) => Ok(Some(RandomEffectsBlock::new(
                            name,
                            &clusters.z_compliance,
                            0,
                            groups.n_groups,
                            prior,
                        )?)),
                        _ => Ok(None),
                    }
                };
                let complier = ProbitBlock {
                    coefficients: vec![0.0; p],
                    random: random_block(
                        "compliance random effects",
                        &config.prior_config.random_effects.compliance,
                    )?,
                };
                let always_taker = if data.always_takers {
                    Some(ProbitBlock {
                        coefficients: vec![0.0; p],
                        random: random_block(
                            "always-taker random effects",
                            &config.prior_config.random_effects.always_taker,
                        )?,
                    })
                } else {
                    None
                };
                ComplianceEngine::Probit {
                    complier,
                    always_taker,
                    marginal_augmentation: config.fit_options.marginal_augmentation,
                }
            }
        };
        let prior_dim = match &engine {
            ComplianceEngine::Logit { coefficients, .. } => coefficients.len(),
            ComplianceEngine::Probit { .. } => p,
        };
        let prior = config
            .prior_config
            .compliance
            .resolve("compliance prior", prior_dim)?;
        Ok(Self {
            engine,
            prior,
            covariates: p,
        })
    }

    /// Refit the compliance coefficients given the current types.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if a probit posterior cannot be factored.
    pub(crate) fn update(
        &mut self,
        data: &PreparedExperiment<'_>,
        types: &[ComplianceType],
        stream: &mut RandomStream,
    ) -> Result<(), LiError> {
        let design = &data.input.x_compliance;
        match &mut self.engine {
            ComplianceEngine::Logit {
                coefficients,
                proposal_variances,
                stats,
            } => {
                let categories: Vec<usize> = types
                    .iter()
                    .map(|compliance_type| match compliance_type {
                        ComplianceType::NeverTaker => 0,
                        ComplianceType::Complier => 1,
                        ComplianceType::AlwaysTaker => 2,
                    })
                    .collect();
                logit_metropolis(
                    design,
                    &data.all_units,
                    &categories,
                    coefficients,
                    &self.prior,
                    proposal_variances,
                    stats,
                    stream,
                );
                Ok(())
            }
            ComplianceEngine::Probit {
                complier,
                always_taker,
                marginal_augmentation,
            } => {
                let is_complier: Vec<bool> = types
                    .iter()
                    .map(|compliance_type| *compliance_type == ComplianceType::Complier)
                    .collect();
                complier.update(
                    "compliance",
                    design,
                    &data.all_units,
                    &is_complier,
                    &self.prior,
                    *marginal_augmentation,
                    data,
                    types,
                    stream,
                )?;
                let Some(always_taker) = always_taker else {
                    return Ok(());
                };
                let non_compliers: Vec<usize> = data
                    .all_units
                    .iter()
                    .copied()
                    .filter(|unit| !is_complier[*unit])
                    .collect();
                if non_compliers.is_empty() {
                    return Ok(());
                }
                let is_always_taker: Vec<bool> = types
                    .iter()
                    .map(|compliance_type| *compliance_type == ComplianceType::AlwaysTaker)
                    .collect();
                always_taker.update(
                    "always-taker compliance",
                    design,
                    &non_compliers,
                    &is_always_taker,
                    &self.prior,
                    *marginal_augmentation,
                    data,
                    types,
                    stream,
                )
            }
        }
    }

    /// Prior probabilities `(qC, qN)` of every unit under the current coefficients.
    #[must_use]
    pub(crate) fn type_probabilities(&self, data: &PreparedExperiment<'_>) -> TypeProbabilities {
        let n_units = data.n_units();
        let mut complier = vec![0.0; n_units];
        let mut never_taker = vec![0.0; n_units];
        for unit in 0..n_units {
            let (q_complier, q_never) = self.unit_probabilities(data, unit);
            complier[unit] = q_complier;
            never_taker[unit] = q_never;
        }
        TypeProbabilities {
            complier,
            never_taker,
        }
    }

    fn unit_probabilities(&self, data: &PreparedExperiment<'_>, unit: usize) -> (f64, f64) {
        let design = &data.input.x_compliance;
        match &self.engine {
            ComplianceEngine::Logit { coefficients, .. } => {
                let p = design.ncols();
                let index = |block: usize| -> f64 {
                    (0..p)
                        .map(|col| design[(unit, col)] * coefficients[block * p + col])
                        .sum()
                };
                let complier_index = index(0);
                if data.always_takers {
                    let always_index = index(1);
                    let max_index = complier_index.max(always_index).max(0.0);
                    let never = (-max_index).exp();
                    let complier = (complier_index - max_index).exp();
                    let always = (always_index - max_index).exp();
                    let total = never + complier + always;
                    (complier / total, never / total)
                } else {
                    let q_complier = logistic_stable(complier_index);
                    (q_complier, 1.0 - q_complier)
                }
            }
            ComplianceEngine::Probit {
                complier,
                always_taker,
                ..
            } => {
                let q_complier = standard_normal_cdf(complier.index(data, unit));
                let q_never = always_taker.as_ref().map_or(1.0 - q_complier, |block| {
                    (1.0 - q_complier) * standard_normal_cdf(-block.index(data, unit))
                });
                (q_complier, q_never)
            }
        }
    }

    /// Complier coefficients (the first block under a logit link).
    #[must_use]
    pub(crate) fn complier_coefficients(&self) -> Vec<f64> {
        match &self.engine {
            ComplianceEngine::Logit { coefficients, .. } => {
                coefficients[..self.covariates].to_vec()
            }
            ComplianceEngine::Probit { complier, .. } => complier.coefficients.clone(),
        }
    }

    /// Always-taker coefficients, when always-takers are admitted.
    #[must_use]
    pub(crate) fn always_taker_coefficients(&self, always_takers: bool) -> Option<Vec<f64>> {
        if !always_takers {
            return None;
        }
        match &self.engine {
            ComplianceEngine::Logit { coefficients, .. } => {
                Some(coefficients[self.covariates..].to_vec())
            }
            ComplianceEngine::Probit { always_taker, .. } => {
                always_taker.as_ref().map(|block| block.coefficients.clone())
            }
        }
    }

    /// Random-effect covariances of the complier and always-taker probits.
    pub(crate) fn random_covariances(&self) -> (Option<Mat<f64>>, Option<Mat<f64>>) {
        match &self.engine {
            ComplianceEngine::Logit { .. } => (None, None),
            ComplianceEngine::Probit {
                complier,
                always_taker,
                ..
            } => (
                complier.random.as_ref().map(|block| block.covariance.clone()),
                always_taker
                    .as_ref()
                    .and_then(|block| block.random.as_ref())
                    .map(|block| block.covariance.clone()),
            ),
        }
    }

    pub(crate) fn acceptance_stats(&self) -> &[ProposalStats] {
        match &self.engine {
            ComplianceEngine::Logit { stats, .. } => stats,
            ComplianceEngine::Probit { .. } => &[],
        }
    }
}
