//! Latent compliance-type imputation.
//!
//! Units in an ambiguous stratum are redrawn each sweep between "complier" and
//! the stratum's alternative type, in proportion to prior type probability
//! times outcome likelihood times response likelihood.

use super::input::PreparedExperiment;
use super::random::RandomStream;
use super::types::ComplianceType;

/// Per-unit likelihood of the data under each hypothetical type.
#[derive(Debug, Clone)]
pub(crate) struct TypeLikelihoods {
    pub complier: Vec<f64>,
    pub never_taker: Vec<f64>,
    pub always_taker: Vec<f64>,
}

impl TypeLikelihoods {
    pub(crate) fn ones(n_units: usize) -> Self {
        Self {
            complier: vec![1.0; n_units],
            never_taker: vec![1.0; n_units],
            always_taker: vec![1.0; n_units],
        }
    }

    pub(crate) fn of(&self, unit: usize, compliance_type: ComplianceType) -> f64 {
        match compliance_type {
            ComplianceType::Complier => self.complier[unit],
            ComplianceType::NeverTaker => self.never_taker[unit],
            ComplianceType::AlwaysTaker => self.always_taker[unit],
        }
    }
}

/// Starting outcome and response likelihoods.
///
/// Draws per unit `pC, pN, pA` and, when some outcome is missing, `prC, prN, prA`
/// uniformly; otherwise the response likelihoods are one.
pub(crate) fn initial_likelihoods(
    n_units: usize,
    any_missing: bool,
    stream: &mut RandomStream,
) -> (TypeLikelihoods, TypeLikelihoods) {
    let mut outcome = TypeLikelihoods::ones(n_units);
    let mut response = TypeLikelihoods::ones(n_units);
    for unit in 0..n_units {
        outcome.complier[unit] = stream.uniform();
        outcome.never_taker[unit] = stream.uniform();
        outcome.always_taker[unit] = stream.uniform();
        if any_missing {
            response.complier[unit] = stream.uniform();
            response.never_taker[unit] = stream.uniform();
            response.always_taker[unit] = stream.uniform();
        }
    }
    (outcome, response)
}

/// Prior type probabilities implied by the compliance model.
#[derive(Debug, Clone)]
pub(crate) struct TypeProbabilities {
    pub complier: Vec<f64>,
    pub never_taker: Vec<f64>,
}

impl TypeProbabilities {
    pub(crate) fn of(&self, unit: usize, compliance_type: ComplianceType) -> f64 {
        match compliance_type {
            ComplianceType::Complier => self.complier[unit],
            ComplianceType::NeverTaker => self.never_taker[unit],
            ComplianceType::AlwaysTaker => {
                (1.0 - self.complier[unit] - self.never_taker[unit]).max(0.0)
            }
        }
    }
}

/// Posterior probability of "complier" against one alternative type.
///
/// Falls back to the prior ratio when the likelihood-weighted denominator is
/// zero or not finite, and to one half when that is degenerate as well.
#[must_use]
pub(crate) fn complier_probability(
    complier_prior: f64,
    complier_likelihood: f64,
    alternative_prior: f64,
    alternative_likelihood: f64,
) -> f64 {
    let complier_weight = complier_prior * complier_likelihood;
    let denominator = complier_weight + alternative_prior * alternative_likelihood;
    if denominator.is_finite() && denominator > 0.0 {
        return (complier_weight / denominator).clamp(0.0, 1.0);
    }
    let prior_total = complier_prior + alternative_prior;
    if prior_total.is_finite() && prior_total > 0.0 {
        (complier_prior / prior_total).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Redraw the types of ambiguous units, one uniform per ambiguous unit in unit order.
pub(crate) fn sample_types(
    data: &PreparedExperiment<'_>,
    prior: &TypeProbabilities,
    outcome: &TypeLikelihoods,
    response: &TypeLikelihoods,
    current: &[ComplianceType],
    stream: &mut RandomStream,
) -> Vec<ComplianceType> {
    let mut types = current.to_vec();
    for (unit, stratum) in data.strata.iter().enumerate() {
        if let Some(fixed) = stratum.fixed_type(data.always_takers) {
            types[unit] = fixed;
            continue;
        }
        let alternative = stratum.alternative();
        let probability = complier_probability(
            prior.of(unit, ComplianceType::Complier),
            outcome.complier[unit] * response.complier[unit],
            prior.of(unit, alternative),
            outcome.of(unit, alternative) * response.of(unit, alternative),
        );
        types[unit] = if stream.uniform() < probability {
            ComplianceType::Complier
        } else {
            alternative
        };
    }
    types
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::input::ExperimentInput;
    use crate::models::li::input::prepare_experiment;
    use crate::models::li::types::OutcomeFamily;
    use crate::utils::usize_to_f64;
    use approx::assert_relative_eq;

    fn experiment(assignment: Vec<bool>, treatment: Vec<bool>) -> ExperimentInput {
        let rows = assignment.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::zeros(rows, 1),
            vec![true; rows],
            assignment,
            treatment,
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    #[test]
    fn complier_probability_matches_weighted_ratio() {
        let probability = complier_probability(0.6, 0.5, 0.3, 0.2);
        assert_relative_eq!(probability, 0.3 / (0.3 + 0.06), epsilon = 1.0e-12);
    }

    #[test]
    fn complier_probability_falls_back_on_degenerate_likelihoods() {
        assert_relative_eq!(complier_probability(0.6, 0.0, 0.2, 0.0), 0.75);
        assert_relative_eq!(complier_probability(0.0, 0.0, 0.0, 0.0), 0.5);
        assert_relative_eq!(complier_probability(0.6, f64::INFINITY, 0.2, 1.0), 0.75);
    }

    #[test]
    fn sampled_types_stay_within_admissible_strata() {
        let data = experiment(
            vec![true, true, false, false],
            vec![true, false, false, true],
        );
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, true).expect("valid experiment");
        let prior = TypeProbabilities {
            complier: vec![0.4; 4],
            never_taker: vec![0.3; 4],
        };
        let likelihoods = TypeLikelihoods::ones(4);
        let mut stream = RandomStream::seed_from_u64(4);
        let mut types = prepared.initial_types().expect("default types");
        for _ in 0..200 {
            types = sample_types(&prepared, &prior, &likelihoods, &likelihoods, &types, &mut stream);
            for (unit, compliance_type) in types.iter().enumerate() {
                assert!(prepared.strata[unit].admits(*compliance_type, true));
            }
        }
    }

    #[test]
    fn without_always_takers_assigned_takers_are_compliers() {
        let data = experiment(vec![true, false], vec![true, false]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let prior = TypeProbabilities {
            complier: vec![0.01; 2],
            never_taker: vec![0.99; 2],
        };
        let likelihoods = TypeLikelihoods::ones(2);
        let mut stream = RandomStream::seed_from_u64(6);
        let types = prepared.initial_types().expect("default types");
        for _ in 0..50 {
            let drawn =
                sample_types(&prepared, &prior, &likelihoods, &likelihoods, &types, &mut stream);
            assert_eq!(drawn[0], ComplianceType::Complier);
            assert_ne!(drawn[1], ComplianceType::AlwaysTaker);
        }
    }

    #[test]
    fn complier_frequency_converges_to_posterior_probability() {
        let n = 20_000;
        let data = experiment(vec![false; n], vec![false; n]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Binary, false).expect("valid experiment");
        let prior = TypeProbabilities {
            complier: vec![0.5; n],
            never_taker: vec![0.5; n],
        };
        let mut outcome = TypeLikelihoods::ones(n);
        outcome.complier = vec![0.3; n];
        outcome.never_taker = vec![0.6; n];
        let response = TypeLikelihoods::ones(n);
        let mut stream = RandomStream::seed_from_u64(12);
        let types = prepared.initial_types().expect("default types");
        let drawn = sample_types(&prepared, &prior, &outcome, &response, &types, &mut stream);
        let compliers = drawn
            .iter()
            .filter(|compliance_type| **compliance_type == ComplianceType::Complier)
            .count();
        let expected = 0.15 / (0.15 + 0.3);
        assert_relative_eq!(usize_to_f64(compliers) / usize_to_f64(n), expected, epsilon = 0.02);
    }

    #[test]
    fn initial_likelihoods_skip_response_draws_without_missingness() {
        let mut stream = RandomStream::seed_from_u64(1);
        let (outcome, response) = initial_likelihoods(3, false, &mut stream);
        assert!(outcome.complier.iter().all(|value| (0.0..1.0).contains(value)));
        assert!(response.never_taker.iter().all(|value| *value == 1.0));
    }
}
