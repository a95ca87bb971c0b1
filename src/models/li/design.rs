//! Type-contrast designs.
//!
//! Outcome and response designs lead with one column per non-baseline
//! (type, arm) cell, followed by the user covariates:
//!
//! | column | value |
//! |--------|-------|
//! | 0 | complier and assigned to treatment |
//! | 1 | complier and assigned to control |
//! | 2 | always-taker (only when always-takers are admitted) |
//!
//! Never-takers are the baseline. The columns are rebuilt from the current type
//! vector whenever a block needs them.

use faer::Mat;

use super::types::ComplianceType;

/// Hypothetical `(type, arm)` cell a linear index is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LatentCell {
    NeverTaker,
    ComplierTreated,
    ComplierControl,
    AlwaysTaker,
}

impl LatentCell {
    pub(crate) const fn of(compliance_type: ComplianceType, assigned: bool) -> Self {
        match compliance_type {
            ComplianceType::NeverTaker => Self::NeverTaker,
            ComplianceType::AlwaysTaker => Self::AlwaysTaker,
            ComplianceType::Complier if assigned => Self::ComplierTreated,
            ComplianceType::Complier => Self::ComplierControl,
        }
    }

    /// Index of the type-contrast column switched on in this cell.
    pub(crate) const fn column(self) -> Option<usize> {
        match self {
            Self::NeverTaker => None,
            Self::ComplierTreated => Some(0),
            Self::ComplierControl => Some(1),
            Self::AlwaysTaker => Some(2),
        }
    }
}

/// `[type columns | covariates]` for the current types.
#[must_use]
pub(crate) fn type_augmented_design(
    covariates: &Mat<f64>,
    types: &[ComplianceType],
    assignment: &[bool],
    type_columns: usize,
) -> Mat<f64> {
    Mat::from_fn(
        covariates.nrows(),
        type_columns + covariates.ncols(),
        |row, col| {
            if col < type_columns {
                let cell = LatentCell::of(types[row], assignment[row]);
                if cell.column() == Some(col) { 1.0 } else { 0.0 }
            } else {
                covariates[(row, col - type_columns)]
            }
        },
    )
}

/// Random-effect part of a type-contrast index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RandomContribution<'a> {
    pub covariates: &'a Mat<f64>,
    pub effects: &'a [Vec<f64>],
    pub row_to_group: &'a [usize],
    /// Leading type columns of the random design; zero for the compliance model.
    pub type_columns: usize,
}

/// Linear index of a type-contrast regression, evaluated in any cell.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContrastPredictor<'a> {
    pub covariates: &'a Mat<f64>,
    pub coefficients: &'a [f64],
    pub type_columns: usize,
    pub random: Option<RandomContribution<'a>>,
}

impl ContrastPredictor<'_> {
    /// Covariate part of the index, shared by every cell.
    #[must_use]
    pub(crate) fn base(&self, unit: usize) -> f64 {
        let mut index: f64 = (0..self.covariates.ncols())
            .map(|col| self.covariates[(unit, col)] * self.coefficients[self.type_columns + col])
            .sum();
        if let Some(random) = &self.random {
            let effect = &random.effects[random.row_to_group[unit]];
            index += (0..random.covariates.ncols())
                .map(|col| random.covariates[(unit, col)] * effect[random.type_columns + col])
                .sum::<f64>();
        }
        index
    }

    /// Type-contrast shift of `cell` relative to the never-taker baseline.
    #[must_use]
    pub(crate) fn offset(&self, unit: usize, cell: LatentCell) -> f64 {
        let Some(column) = cell.column() else {
            return 0.0;
        };
        let mut shift = self.coefficients.get(column).copied().unwrap_or(0.0);
        if let Some(random) = &self.random
            && column < random.type_columns
        {
            shift += random.effects[random.row_to_group[unit]][column];
        }
        shift
    }

    #[must_use]
    pub(crate) fn index(&self, unit: usize, cell: LatentCell) -> f64 {
        self.base(unit) + self.offset(unit, cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn type_columns_follow_cells() {
        let covariates = Mat::from_fn(4, 1, |_, _| 1.0);
        let types = [
            ComplianceType::Complier,
            ComplianceType::Complier,
            ComplianceType::AlwaysTaker,
            ComplianceType::NeverTaker,
        ];
        let design = type_augmented_design(&covariates, &types, &[true, false, false, true], 3);
        assert_eq!(design.ncols(), 4);
        let rows: Vec<[f64; 4]> = (0..4)
            .map(|row| [design[(row, 0)], design[(row, 1)], design[(row, 2)], design[(row, 3)]])
            .collect();
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn predictor_adds_cell_offsets_to_base() {
        let covariates = Mat::from_fn(1, 1, |_, _| 2.0);
        let coefficients = [0.5, -0.25, 1.0, 0.1];
        let predictor = ContrastPredictor {
            covariates: &covariates,
            coefficients: &coefficients,
            type_columns: 3,
            random: None,
        };
        assert_relative_eq!(predictor.index(0, LatentCell::NeverTaker), 0.2, epsilon = 1.0e-12);
        assert_relative_eq!(predictor.index(0, LatentCell::ComplierTreated), 0.7, epsilon = 1.0e-12);
        assert_relative_eq!(predictor.index(0, LatentCell::ComplierControl), -0.05, epsilon = 1.0e-12);
        assert_relative_eq!(predictor.index(0, LatentCell::AlwaysTaker), 1.2, epsilon = 1.0e-12);
    }

    #[test]
    fn predictor_includes_cluster_effects() {
        let covariates = Mat::<f64>::zeros(2, 0);
        let random_covariates = Mat::from_fn(2, 1, |_, _| 1.0);
        let coefficients = [1.0, 0.0];
        let effects = vec![vec![0.5, 0.0, 0.3], vec![-0.5, 0.0, -0.3]];
        let predictor = ContrastPredictor {
            covariates: &covariates,
            coefficients: &coefficients,
            type_columns: 2,
            random: Some(RandomContribution {
                covariates: &random_covariates,
                effects: &effects,
                row_to_group: &[0, 1],
                type_columns: 2,
            }),
        };
        assert_relative_eq!(predictor.index(0, LatentCell::ComplierTreated), 1.8, epsilon = 1.0e-12);
        assert_relative_eq!(predictor.index(1, LatentCell::NeverTaker), -0.3, epsilon = 1.0e-12);
    }
}
