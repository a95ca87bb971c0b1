//! Link functions and per-unit likelihood primitives.

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::erf::erfc;

use super::types::Link;

/// Stable logistic transform.
#[must_use]
pub fn logistic_stable(value: f64) -> f64 {
    if value >= 0.0 {
        let z = (-value).exp();
        1.0 / (1.0 + z)
    } else {
        let z = value.exp();
        z / (1.0 + z)
    }
}

/// Standard normal CDF through `erfc`, accurate deep in the lower tail.
#[must_use]
pub fn standard_normal_cdf(value: f64) -> f64 {
    0.5 * erfc(-value / std::f64::consts::SQRT_2)
}

/// Standard normal quantile; the probability is clamped to `[0, 1]`.
#[must_use]
pub fn standard_normal_quantile(probability: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| {
        normal.inverse_cdf(probability.clamp(0.0, 1.0))
    })
}

/// Log-density of standard normal.
#[must_use]
pub fn log_standard_normal_pdf(value: f64) -> f64 {
    -0.5 * value.mul_add(value, std::f64::consts::TAU.ln())
}

/// Normal density with the given mean and variance.
#[must_use]
pub fn normal_density(value: f64, mean: f64, variance: f64) -> f64 {
    let sd = variance.sqrt();
    (log_standard_normal_pdf((value - mean) / sd) - sd.ln()).exp()
}

/// `P(y = 1 | index)` under the link.
#[must_use]
pub fn success_probability(link: Link, index: f64) -> f64 {
    match link {
        Link::Logit => logistic_stable(index),
        Link::Probit => standard_normal_cdf(index),
    }
}

/// Probability of the observed binary value.
#[must_use]
pub fn bernoulli_likelihood(link: Link, index: f64, success: bool) -> f64 {
    let probability = success_probability(link, index);
    if success { probability } else { 1.0 - probability }
}

/// Ordered-probit probability of `category` given cutpoints and the linear index.
///
/// `cutpoints` holds the `categories - 1` thresholds; the outer ones are infinite.
#[must_use]
pub fn ordinal_probability(category: usize, cutpoints: &[f64], index: f64) -> f64 {
    let upper = cutpoints
        .get(category)
        .map_or(1.0, |cut| standard_normal_cdf(cut - index));
    let lower = if category == 0 {
        0.0
    } else {
        cutpoints
            .get(category - 1)
            .map_or(1.0, |cut| standard_normal_cdf(cut - index))
    };
    (upper - lower).max(0.0)
}

/// Log-likelihood of a multinomial logit with the first category as baseline.
///
/// `indices` holds the linear predictors of categories `1..`.
#[must_use]
pub fn multinomial_logit_log_likelihood(indices: &[f64], category: usize) -> f64 {
    let max_index = indices.iter().copied().fold(0.0_f64, f64::max);
    let normalizer = (-max_index).exp()
        + indices
            .iter()
            .map(|index| (index - max_index).exp())
            .sum::<f64>();
    let chosen = if category == 0 {
        0.0
    } else {
        indices[category - 1]
    };
    chosen - max_index - normalizer.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn logistic_is_bounded_and_symmetric() {
        for value in [-800.0, -10.0, -1.0, 0.0, 1.0, 10.0, 800.0] {
            let probability = logistic_stable(value);
            assert!((0.0..=1.0).contains(&probability));
            assert_relative_eq!(probability + logistic_stable(-value), 1.0, epsilon = 1.0e-12);
        }
    }

    #[test]
    fn normal_cdf_and_quantile_invert_each_other() {
        for probability in [1.0e-10, 0.025, 0.5, 0.9, 0.999] {
            let quantile = standard_normal_quantile(probability);
            assert_relative_eq!(standard_normal_cdf(quantile), probability, max_relative = 1.0e-6);
        }
        assert!(standard_normal_cdf(-30.0) > 0.0);
    }

    #[test]
    fn ordinal_probabilities_sum_to_one() {
        let cutpoints = [0.0, 0.7, 1.9];
        let total: f64 = (0..4)
            .map(|category| ordinal_probability(category, &cutpoints, 0.4))
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn multinomial_logit_probabilities_sum_to_one() {
        let indices = [0.3, -1.2];
        let total: f64 = (0..3)
            .map(|category| multinomial_logit_log_likelihood(&indices, category).exp())
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn normal_density_matches_closed_form() {
        let density = normal_density(1.0, 0.0, 4.0);
        let expected = (-0.125_f64).exp() / (2.0 * std::f64::consts::TAU.sqrt());
        assert_relative_eq!(density, expected, epsilon = 1.0e-12);
    }
}
