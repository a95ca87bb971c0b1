//! Bayesian regression engines used as Gibbs blocks.
//!
//! Every engine works on a row subset of a fixed design matrix and folds its
//! Normal prior in closed form: posterior precision `X'X + A0` and right-hand
//! side `X'w + A0 b0`.

use faer::Mat;

use super::likelihood::{
    multinomial_logit_log_likelihood, ordinal_probability, standard_normal_cdf,
};
use super::priors::ResolvedPrior;
use super::random::RandomStream;
use super::types::{LiError, Link};
use crate::inference::ProposalStats;
use crate::models::matrix_ops::{
    cross_product, cross_product_response, quadratic_form, residual_sum_of_squares,
};
use crate::utils::{cholesky_with_jitter, dot_row, solve_cholesky, usize_to_f64};

/// Working prior `alpha^2 ~ MDA_SCALE / chi2(MDA_DF)` for marginal data augmentation.
const MDA_DF: f64 = 1.0;
const MDA_SCALE: f64 = 1.0;

/// Conditional Normal posterior of a coefficient block given a working response.
#[derive(Debug, Clone)]
pub(crate) struct NormalPosterior {
    pub mean: Vec<f64>,
    /// Lower Cholesky factor of the posterior precision.
    precision_lower: Mat<f64>,
    /// Residual sum of squares at the mean plus the prior quadratic term.
    pub scaled_ssr: f64,
    pub n: usize,
}

impl NormalPosterior {
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if the posterior precision cannot be factored.
    pub(crate) fn new(
        block: &'static str,
        design: &Mat<f64>,
        rows: &[usize],
        response: &[f64],
        prior: &ResolvedPrior,
    ) -> Result<Self, LiError> {
        let dim = design.ncols();
        let mut precision = cross_product(design, rows);
        let mut rhs = cross_product_response(design, rows, response);
        let prior_mean = &prior.mean;
        for row in 0..dim {
            for col in 0..dim {
                let entry = prior.precision[(row, col)];
                precision[(row, col)] += entry;
                rhs[row] += entry * prior_mean[col];
            }
        }
        let precision_lower = cholesky_with_jitter(&precision).ok_or(LiError::SolveFailed(block))?;
        let mean = solve_cholesky(&precision_lower, &rhs);
        if !mean.iter().all(|value| value.is_finite()) {
            return Err(LiError::SolveFailed(block));
        }
        let deviation: Vec<f64> = mean
            .iter()
            .zip(prior_mean)
            .map(|(value, center)| value - center)
            .collect();
        let scaled_ssr = residual_sum_of_squares(design, rows, response, &mean)
            + quadratic_form(&prior.precision, &deviation);
        Ok(Self {
            mean,
            precision_lower,
            scaled_ssr,
            n: rows.len(),
        })
    }

    /// Draw from `N(mean, variance * precision^-1)`.
    pub(crate) fn draw(&self, variance: f64, stream: &mut RandomStream) -> Vec<f64> {
        stream.normal_from_precision_factor(&self.mean, &self.precision_lower, variance.sqrt())
    }
}

/// Conjugate Normal / inverse-gamma regression: draws `sigma^2`, then `beta`.
///
/// # Errors
///
/// Returns `LiError::SolveFailed` if the posterior precision cannot be factored.
pub(crate) fn normal_regression_gibbs(
    design: &Mat<f64>,
    rows: &[usize],
    response: &[f64],
    prior: &ResolvedPrior,
    variance_df: f64,
    variance_scale: f64,
    stream: &mut RandomStream,
) -> Result<(Vec<f64>, f64), LiError> {
    let posterior = NormalPosterior::new("gaussian outcome", design, rows, response, prior)?;
    let shape = 0.5 * (usize_to_f64(posterior.n) + variance_df);
    let scale = 0.5 * (variance_scale + posterior.scaled_ssr);
    let variance = stream.inverse_gamma(shape, scale);
    if !variance.is_finite() || variance <= 0.0 {
        return Err(LiError::SolveFailed("gaussian outcome variance"));
    }
    Ok((posterior.draw(variance, stream), variance))
}

/// Probit regression by truncated-normal data augmentation.
///
/// With `marginal_augmentation` the latent scores are expanded by a working
/// scale `alpha` (Imai and van Dyk), which is integrated out on return. The
/// expanded prior `N(0, alpha^2 A0^-1)` keeps the `alpha^2` draw conjugate only
/// for a zero prior mean; blocks with a non-zero mean use plain augmentation.
///
/// # Errors
///
/// Returns `LiError::SolveFailed` if the posterior precision cannot be factored.
#[allow(clippy::too_many_arguments)]
pub(crate) fn probit_gibbs(
    block: &'static str,
    design: &Mat<f64>,
    rows: &[usize],
    outcome: &[bool],
    coefficients: &mut Vec<f64>,
    prior: &ResolvedPrior,
    marginal_augmentation: bool,
    stream: &mut RandomStream,
) -> Result<(), LiError> {
    let latent = draw_probit_latent(design, rows, outcome, coefficients, None, stream);
    if !marginal_augmentation || !prior.is_centered() {
        let posterior = NormalPosterior::new(block, design, rows, &latent, prior)?;
        *coefficients = posterior.draw(1.0, stream);
        return Ok(());
    }

    let working_scale_sq = stream.inverse_gamma(0.5 * MDA_DF, 0.5 * MDA_SCALE);
    let working_scale = working_scale_sq.sqrt();
    let expanded: Vec<f64> = latent.iter().map(|value| value * working_scale).collect();
    let posterior = NormalPosterior::new(block, design, rows, &expanded, prior)?;
    let shape = 0.5 * (usize_to_f64(posterior.n) + MDA_DF);
    let rate = 0.5 * (MDA_SCALE + posterior.scaled_ssr);
    let redrawn_scale_sq = stream.inverse_gamma(shape, rate);
    if !redrawn_scale_sq.is_finite() || redrawn_scale_sq <= 0.0 {
        return Err(LiError::SolveFailed(block));
    }
    let expanded_draw = posterior.draw(redrawn_scale_sq, stream);
    let redrawn_scale = redrawn_scale_sq.sqrt();
    *coefficients = expanded_draw
        .into_iter()
        .map(|value| value / redrawn_scale)
        .collect();
    Ok(())
}

/// Latent probit scores `W_i ~ TN(x_i beta + offset_i, 1)` truncated by the outcome sign.
pub(crate) fn draw_probit_latent(
    design: &Mat<f64>,
    rows: &[usize],
    outcome: &[bool],
    coefficients: &[f64],
    offsets: Option<&[f64]>,
    stream: &mut RandomStream,
) -> Vec<f64> {
    rows.iter()
        .enumerate()
        .map(|(position, &row)| {
            let offset = offsets.map_or(0.0, |values| values[position]);
            let mean = dot_row(design, row, coefficients) + offset;
            if outcome[row] {
                stream.truncated_normal(mean, 1.0, 0.0, f64::INFINITY)
            } else {
                stream.truncated_normal(mean, 1.0, f64::NEG_INFINITY, 0.0)
            }
        })
        .collect()
}

/// Component-wise random-walk Metropolis for a (multinomial) logit model.
///
/// `categories[row]` is the observed category, `0` being the baseline.
/// Coefficients are stacked per non-baseline category, `design.ncols()` each.
#[allow(clippy::too_many_arguments)]
pub(crate) fn logit_metropolis(
    design: &Mat<f64>,
    rows: &[usize],
    categories: &[usize],
    coefficients: &mut [f64],
    prior: &ResolvedPrior,
    proposal_variances: &[f64],
    stats: &mut [ProposalStats],
    stream: &mut RandomStream,
) {
    let mut current = logit_log_posterior(design, rows, categories, coefficients, prior);
    for index in 0..coefficients.len() {
        let previous = coefficients[index];
        coefficients[index] = proposal_variances[index]
            .sqrt()
            .mul_add(stream.normal(), previous);
        let candidate = logit_log_posterior(design, rows, categories, coefficients, prior);
        let accepted = candidate.is_finite() && should_accept(candidate - current, stream);
        if accepted {
            current = candidate;
        } else {
            coefficients[index] = previous;
        }
        stats[index].record(accepted);
    }
}

fn logit_log_posterior(
    design: &Mat<f64>,
    rows: &[usize],
    categories: &[usize],
    coefficients: &[f64],
    prior: &ResolvedPrior,
) -> f64 {
    let dim = design.ncols();
    let blocks = coefficients.len() / dim.max(1);
    let mut indices = vec![0.0; blocks];
    let mut log_likelihood = 0.0;
    for &row in rows {
        for (block, index) in indices.iter_mut().enumerate() {
            *index = dot_row(design, row, &coefficients[block * dim..(block + 1) * dim]);
        }
        log_likelihood += multinomial_logit_log_likelihood(&indices, categories[row]);
    }
    log_likelihood + prior.log_density(coefficients)
}

/// Metropolis-Hastings acceptance test on the log scale.
pub(crate) fn should_accept(log_acceptance: f64, stream: &mut RandomStream) -> bool {
    log_acceptance >= 0.0 || stream.uniform().ln() < log_acceptance
}

/// Binary regression engine selected once per block at configuration time.
#[derive(Debug, Clone)]
pub(crate) enum BinaryEngine {
    Logit {
        proposal_variances: Vec<f64>,
        stats: Vec<ProposalStats>,
    },
    Probit {
        marginal_augmentation: bool,
    },
}

impl BinaryEngine {
    pub(crate) fn new(link: Link, proposal_variances: Vec<f64>, marginal_augmentation: bool) -> Self {
        match link {
            Link::Logit => Self::Logit {
                stats: vec![ProposalStats::default(); proposal_variances.len()],
                proposal_variances,
            },
            Link::Probit => Self::Probit {
                marginal_augmentation,
            },
        }
    }

    pub(crate) const fn link(&self) -> Link {
        match self {
            Self::Logit { .. } => Link::Logit,
            Self::Probit { .. } => Link::Probit,
        }
    }

    pub(crate) fn acceptance_stats(&self) -> &[ProposalStats] {
        match self {
            Self::Logit { stats, .. } => stats,
            Self::Probit { .. } => &[],
        }
    }

    /// One conditional update of `coefficients` given the binary outcome.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if a probit posterior cannot be factored.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update(
        &mut self,
        block: &'static str,
        design: &Mat<f64>,
        rows: &[usize],
        outcome: &[bool],
        coefficients: &mut Vec<f64>,
        prior: &ResolvedPrior,
        stream: &mut RandomStream,
    ) -> Result<(), LiError> {
        match self {
            Self::Logit {
                proposal_variances,
                stats,
            } => {
                let categories: Vec<usize> = outcome.iter().map(|value| usize::from(*value)).collect();
                logit_metropolis(
                    design,
                    rows,
                    &categories,
                    coefficients,
                    prior,
                    proposal_variances,
                    stats,
                    stream,
                );
                Ok(())
            }
            Self::Probit {
                marginal_augmentation,
            } => probit_gibbs(
                block,
                design,
                rows,
                outcome,
                coefficients,
                prior,
                *marginal_augmentation,
                stream,
            ),
        }
    }
}

/// Ordered-probit Metropolis-within-Gibbs update.
///
/// Cutpoints `1..` move jointly by sequentially truncated Normal proposals
/// (Cowles, 1996); `cutpoints[0]` stays at zero. Latent scores and coefficients
/// are then drawn by Gibbs.
///
/// # Errors
///
/// Returns `LiError::SolveFailed` if the coefficient posterior cannot be factored.
#[allow(clippy::too_many_arguments)]
pub(crate) fn ordinal_probit_update(
    design: &Mat<f64>,
    rows: &[usize],
    categories: &[usize],
    coefficients: &mut Vec<f64>,
    cutpoints: &mut [f64],
    prior: &ResolvedPrior,
    proposal_sd: f64,
    stats: &mut ProposalStats,
    stream: &mut RandomStream,
) -> Result<(), LiError> {
    let means: Vec<f64> = rows
        .iter()
        .map(|&row| dot_row(design, row, coefficients))
        .collect();

    if cutpoints.len() > 1 {
        let proposal = propose_cutpoints(cutpoints, proposal_sd, stream);
        let accepted = strictly_increasing(&proposal) && {
            let log_ratio = cutpoint_log_ratio(&proposal, cutpoints, proposal_sd, rows, categories, &means);
            log_ratio.is_finite() && should_accept(log_ratio, stream)
        };
        if accepted {
            cutpoints.copy_from_slice(&proposal);
        }
        stats.record(accepted);
    }

    let latent: Vec<f64> = rows
        .iter()
        .zip(&means)
        .map(|(&row, &mean)| {
            let category = categories[row];
            let lower = if category == 0 {
                f64::NEG_INFINITY
            } else {
                cutpoints[category - 1]
            };
            let upper = cutpoints.get(category).copied().unwrap_or(f64::INFINITY);
            stream.truncated_normal(mean, 1.0, lower, upper)
        })
        .collect();
    let posterior = NormalPosterior::new("ordinal outcome", design, rows, &latent, prior)?;
    *coefficients = posterior.draw(1.0, stream);
    Ok(())
}

fn propose_cutpoints(current: &[f64], proposal_sd: f64, stream: &mut RandomStream) -> Vec<f64> {
    let mut proposal = current.to_vec();
    for index in 1..current.len() {
        let lower = proposal[index - 1];
        let upper = current.get(index + 1).copied().unwrap_or(f64::INFINITY);
        proposal[index] = stream.truncated_normal(current[index], proposal_sd, lower, upper);
    }
    proposal
}

fn strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] < pair[1])
}

/// Log Metropolis-Hastings ratio of a cutpoint move, including the Cowles
/// correction for the truncated proposal normalizers.
fn cutpoint_log_ratio(
    proposal: &[f64],
    current: &[f64],
    proposal_sd: f64,
    rows: &[usize],
    categories: &[usize],
    means: &[f64],
) -> f64 {
    let mut log_ratio = 0.0;
    for index in 1..current.len() {
        let next_current = current.get(index + 1).copied().unwrap_or(f64::INFINITY);
        let next_proposal = proposal.get(index + 1).copied().unwrap_or(f64::INFINITY);
        let forward = standard_normal_cdf((next_current - current[index]) / proposal_sd)
            - standard_normal_cdf((proposal[index - 1] - current[index]) / proposal_sd);
        let backward = standard_normal_cdf((next_proposal - proposal[index]) / proposal_sd)
            - standard_normal_cdf((current[index - 1] - proposal[index]) / proposal_sd);
        log_ratio += forward.ln() - backward.ln();
    }
    for (&row, &mean) in rows.iter().zip(means) {
        let category = categories[row];
        log_ratio += ordinal_probability(category, proposal, mean).ln()
            - ordinal_probability(category, current, mean).ln();
    }
    log_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::li::priors::BlockPrior;
    use approx::assert_relative_eq;

    fn design(n: usize) -> Mat<f64> {
        Mat::from_fn(n, 2, |row, col| {
            if col == 0 {
                1.0
            } else {
                usize_to_f64(row % 7) - 3.0
            }
        })
    }

    #[test]
    fn flat_prior_posterior_mean_is_least_squares() {
        let x = design(14);
        let rows: Vec<usize> = (0..14).collect();
        let response: Vec<f64> = rows
            .iter()
            .map(|&row| 1.5 - 0.5 * x[(row, 1)])
            .collect();
        let prior = BlockPrior::flat().resolve("test", 2).expect("flat prior");
        let posterior =
            NormalPosterior::new("test", &x, &rows, &response, &prior).expect("well posed");
        assert_relative_eq!(posterior.mean[0], 1.5, epsilon = 1.0e-10);
        assert_relative_eq!(posterior.mean[1], -0.5, epsilon = 1.0e-10);
        assert_relative_eq!(posterior.scaled_ssr, 0.0, epsilon = 1.0e-10);
    }

    #[test]
    fn informative_prior_shrinks_toward_prior_mean() {
        let x = Mat::from_fn(2, 1, |_, _| 1.0);
        let prior = BlockPrior::Isotropic {
            mean: 0.0,
            precision: 2.0,
        }
        .resolve("test", 1)
        .expect("isotropic prior");
        let posterior =
            NormalPosterior::new("test", &x, &[0, 1], &[2.0, 2.0], &prior).expect("well posed");
        assert_relative_eq!(posterior.mean[0], 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn gaussian_regression_recovers_coefficients() {
        let n = 400;
        let x = design(n);
        let rows: Vec<usize> = (0..n).collect();
        let mut stream = RandomStream::seed_from_u64(17);
        let response: Vec<f64> = rows
            .iter()
            .map(|&row| 2.0 + 0.75 * x[(row, 1)] + 0.5 * stream.normal())
            .collect();
        let prior = BlockPrior::default().resolve("test", 2).expect("default prior");
        let (coefficients, variance) =
            normal_regression_gibbs(&x, &rows, &response, &prior, 1.0, 1.0, &mut stream)
                .expect("well posed");
        assert_relative_eq!(coefficients[0], 2.0, epsilon = 0.2);
        assert_relative_eq!(coefficients[1], 0.75, epsilon = 0.1);
        assert_relative_eq!(variance, 0.25, epsilon = 0.1);
    }

    #[test]
    fn probit_gibbs_moves_toward_signal() {
        let n = 600;
        let x = design(n);
        let rows: Vec<usize> = (0..n).collect();
        let mut stream = RandomStream::seed_from_u64(23);
        let outcome: Vec<bool> = rows
            .iter()
            .map(|&row| 0.3 + 0.8 * x[(row, 1)] + stream.normal() > 0.0)
            .collect();
        let prior = BlockPrior::default().resolve("test", 2).expect("default prior");
        for marginal_augmentation in [false, true] {
            let mut coefficients = vec![0.0, 0.0];
            let mut slope_total = 0.0;
            for sweep in 0..300 {
                probit_gibbs(
                    "test",
                    &x,
                    &rows,
                    &outcome,
                    &mut coefficients,
                    &prior,
                    marginal_augmentation,
                    &mut stream,
                )
                .expect("well posed");
                if sweep >= 100 {
                    slope_total += coefficients[1];
                }
            }
            assert_relative_eq!(slope_total / 200.0, 0.8, epsilon = 0.25);
        }
    }

    #[test]
    fn informative_probit_prior_is_recovered_with_few_rows() {
        let x = Mat::from_fn(10, 1, |_, _| 1.0);
        let mut stream = RandomStream::seed_from_u64(5);
        let outcome: Vec<bool> = (0..10).map(|_| 1.0 + stream.normal() > 0.0).collect();
        let prior = BlockPrior::Isotropic {
            mean: 1.0,
            precision: 25.0,
        }
        .resolve("test", 1)
        .expect("isotropic prior");
        for rows in [Vec::new(), vec![0, 1]] {
            for marginal_augmentation in [false, true] {
                let mut coefficients = vec![0.0];
                let mut total = 0.0;
                for sweep in 0..4000 {
                    probit_gibbs(
                        "test",
                        &x,
                        &rows,
                        &outcome,
                        &mut coefficients,
                        &prior,
                        marginal_augmentation,
                        &mut stream,
                    )
                    .expect("well posed");
                    if sweep >= 500 {
                        total += coefficients[0];
                    }
                }
                assert_relative_eq!(total / 3500.0, 1.0, epsilon = 0.1);
            }
        }
    }

    #[test]
    fn logit_metropolis_records_every_proposal() {
        let x = design(50);
        let rows: Vec<usize> = (0..50).collect();
        let categories: Vec<usize> = rows.iter().map(|row| row % 3).collect();
        let prior = BlockPrior::default().resolve("test", 4).expect("default prior");
        let mut coefficients = vec![0.0; 4];
        let mut stats = vec![ProposalStats::default(); 4];
        let mut stream = RandomStream::seed_from_u64(1);
        for _ in 0..25 {
            logit_metropolis(
                &x,
                &rows,
                &categories,
                &mut coefficients,
                &prior,
                &[0.05; 4],
                &mut stats,
                &mut stream,
            );
        }
        assert!(stats.iter().all(|stat| stat.proposed == 25));
        assert!(stats.iter().any(|stat| stat.accepted > 0));
        assert!(coefficients.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn ordinal_cutpoints_stay_anchored_and_increasing() {
        let n = 120;
        let x = Mat::from_fn(n, 1, |_, _| 1.0);
        let rows: Vec<usize> = (0..n).collect();
        let categories: Vec<usize> = rows.iter().map(|row| row % 4).collect();
        let prior = BlockPrior::default().resolve("test", 1).expect("default prior");
        let mut coefficients = vec![0.0];
        let mut cutpoints = vec![0.0, 1.0, 2.0];
        let mut stats = ProposalStats::default();
        let mut stream = RandomStream::seed_from_u64(29);
        for _ in 0..200 {
            ordinal_probit_update(
                &x,
                &rows,
                &categories,
                &mut coefficients,
                &mut cutpoints,
                &prior,
                0.1,
                &mut stats,
                &mut stream,
            )
            .expect("well posed");
            assert_relative_eq!(cutpoints[0], 0.0);
            assert!(strictly_increasing(&cutpoints));
        }
        assert_eq!(stats.proposed, 200);
        assert!(stats.accepted > 0);
    }
}
