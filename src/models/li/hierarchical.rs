//! Cluster-level random effects and the mixed-effects probit Gibbs block.

use faer::Mat;

use super::design::{RandomContribution, type_augmented_design};
use super::input::GroupIndex;
use super::priors::{RandomEffectPrior, ResolvedPrior, ResolvedRandomPrior};
use super::random::RandomStream;
use super::regression::{NormalPosterior, draw_probit_latent};
use super::types::{ComplianceType, LiError};
use crate::models::matrix_ops::{cross_product, cross_product_response};
use crate::utils::{
    cholesky_with_jitter, dot_row, matrix_inverse, solve_cholesky, symmetrize, usize_to_f64,
};

/// Random effects of one regression block: one coefficient vector per cluster
/// with an inverse-Wishart covariance.
#[derive(Debug, Clone)]
pub(crate) struct RandomEffectsBlock {
    name: &'static str,
    covariates: Mat<f64>,
    type_columns: usize,
    pub effects: Vec<Vec<f64>>,
    pub covariance: Mat<f64>,
    prior: ResolvedRandomPrior,
}

impl RandomEffectsBlock {
    /// # Errors
    ///
    /// Returns `LiError` if the prior does not fit the random-effect dimension.
    pub(crate) fn new(
        name: &'static str,
        covariates: &Mat<f64>,
        type_columns: usize,
        n_groups: usize,
        prior: &RandomEffectPrior,
    ) -> Result<Self, LiError> {
        let dim = type_columns + covariates.ncols();
        let prior = prior.resolve(name, dim)?;
        Ok(Self {
            name,
            covariates: covariates.clone(),
            type_columns,
            effects: vec![vec![0.0; dim]; n_groups],
            covariance: prior.scale.clone(),
            prior,
        })
    }

    #[must_use]
    pub(crate) fn dim(&self) -> usize {
        self.type_columns + self.covariates.ncols()
    }

    pub(crate) fn contribution<'a>(&'a self, groups: &'a GroupIndex) -> RandomContribution<'a> {
        RandomContribution {
            covariates: &self.covariates,
            effects: &self.effects,
            row_to_group: &groups.row_to_group,
            type_columns: self.type_columns,
        }
    }

    fn design(&self, types: &[ComplianceType], assignment: &[bool]) -> Mat<f64> {
        if self.type_columns == 0 {
            self.covariates.clone()
        } else {
            type_augmented_design(&self.covariates, types, assignment, self.type_columns)
        }
    }

    /// Mixed-effects probit Gibbs sweep over `rows`:
    /// latent scores, fixed effects, cluster effects, then covariance.
    ///
    /// # Errors
    ///
    /// Returns `LiError::SolveFailed` if a posterior precision or the
    /// inverse-Wishart draw fails.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn mixed_probit_update(
        &mut self,
        fixed_design: &Mat<f64>,
        rows: &[usize],
        outcome: &[bool],
        coefficients: &mut Vec<f64>,
        prior: &ResolvedPrior,
        groups: &GroupIndex,
        types: &[ComplianceType],
        assignment: &[bool],
        stream: &mut RandomStream,
    ) -> Result<(), LiError> {
        let random_design = self.design(types, assignment);
        let offsets: Vec<f64> = rows
            .iter()
            .map(|&row| dot_row(&random_design, row, &self.effects[groups.row_to_group[row]]))
            .collect();
        let latent = draw_probit_latent(
            fixed_design,
            rows,
            outcome,
            coefficients,
            Some(&offsets),
            stream,
        );

        let adjusted: Vec<f64> = latent
            .iter()
            .zip(&offsets)
            .map(|(score, offset)| score - offset)
            .collect();
        let posterior = NormalPosterior::new(self.name, fixed_design, rows, &adjusted, prior)?;
        *coefficients = posterior.draw(1.0, stream);

        let mut residual_by_row = vec![0.0; fixed_design.nrows()];
        for (&row, score) in rows.iter().zip(&latent) {
            residual_by_row[row] = score - dot_row(fixed_design, row, coefficients);
        }
        let mut covariance_inverse =
            matrix_inverse(&self.covariance).ok_or(LiError::SolveFailed(self.name))?;
        symmetrize(&mut covariance_inverse);
        for (group, members) in groups.partition(rows).iter().enumerate() {
            let mut precision = cross_product(&random_design, members);
            for row in 0..self.dim() {
                for col in 0..self.dim() {
                    precision[(row, col)] += covariance_inverse[(row, col)];
                }
            }
            let residuals: Vec<f64> = members.iter().map(|&row| residual_by_row[row]).collect();
            let rhs = cross_product_response(&random_design, members, &residuals);
            let lower = cholesky_with_jitter(&precision).ok_or(LiError::SolveFailed(self.name))?;
            let mean = solve_cholesky(&lower, &rhs);
            self.effects[group] = stream.normal_from_precision_factor(&mean, &lower, 1.0);
        }

        let mut scale = self.prior.scale.clone();
        for effect in &self.effects {
            for row in 0..self.dim() {
                for col in 0..self.dim() {
                    scale[(row, col)] += effect[row] * effect[col];
                }
            }
        }
        symmetrize(&mut scale);
        let df = self.prior.df + usize_to_f64(self.effects.len());
        self.covariance = stream.inverse_wishart(df, &scale)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::li::priors::BlockPrior;

    #[test]
    fn mixed_probit_update_keeps_effects_finite_and_covariance_positive() {
        let n = 120;
        let groups = GroupIndex {
            row_to_group: (0..n).map(|row| row % 6).collect(),
            n_groups: 6,
        };
        let fixed = Mat::from_fn(n, 2, |row, col| {
            if col == 0 { 1.0 } else { usize_to_f64(row % 5) - 2.0 }
        });
        let random_covariates = Mat::from_fn(n, 1, |_, _| 1.0);
        let mut block = RandomEffectsBlock::new(
            "test random effects",
            &random_covariates,
            0,
            groups.n_groups,
            &RandomEffectPrior::Default,
        )
        .expect("default prior fits");
        let mut stream = RandomStream::seed_from_u64(31);
        let outcome: Vec<bool> = (0..n)
            .map(|row| 0.5 * fixed[(row, 1)] + stream.normal() > 0.0)
            .collect();
        let prior = BlockPrior::default().resolve("test", 2).expect("default prior");
        let rows: Vec<usize> = (0..n).collect();
        let types = vec![ComplianceType::Complier; n];
        let assignment = vec![true; n];
        let mut coefficients = vec![0.0; 2];
        for _ in 0..50 {
            block
                .mixed_probit_update(
                    &fixed,
                    &rows,
                    &outcome,
                    &mut coefficients,
                    &prior,
                    &groups,
                    &types,
                    &assignment,
                    &mut stream,
                )
                .expect("sweep succeeds");
        }
        assert!(coefficients.iter().all(|value| value.is_finite()));
        assert!(block.effects.iter().flatten().all(|value| value.is_finite()));
        assert!(block.covariance[(0, 0)] > 0.0);
    }

    #[test]
    fn type_columns_extend_random_dimension() {
        let covariates = Mat::from_fn(4, 1, |_, _| 1.0);
        let block = RandomEffectsBlock::new(
            "outcome random effects",
            &covariates,
            3,
            2,
            &RandomEffectPrior::Default,
        )
        .expect("default prior fits");
        assert_eq!(block.dim(), 4);
        assert_eq!(block.effects.len(), 2);
        assert_eq!(block.covariance.nrows(), 4);
    }
}
