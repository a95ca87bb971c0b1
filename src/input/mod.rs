//! # Experiment inputs
//!
//! Defines the container for a randomized experiment with noncompliance:
//! assignment, treatment received, response indicators, outcomes, and the
//! covariate matrices of the compliance, outcome and response models.
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use noncompliance_models::ExperimentInput;
//!
//! let intercept = Mat::from_fn(4, 1, |_, _| 1.0);
//! let outcome = Mat::from_fn(4, 1, |i, _| if i % 2 == 0 { 0.0 } else { 1.0 });
//! let input = ExperimentInput::new(
//!     outcome,
//!     vec![true; 4],
//!     vec![true, true, false, false],
//!     vec![true, false, false, false],
//!     intercept.clone(),
//!     intercept.clone(),
//!     intercept,
//! );
//!
//! assert!(input.validate().is_ok());
//! ```

use faer::Mat;
use thiserror::Error;

use crate::models::li::ComplianceType;
use crate::utils::matrix_is_finite;

/// Errors returned when validating experiment inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("experiment must contain at least one unit")]
    NoUnits,
    #[error("{design} design matrix must have at least one column")]
    EmptyDesign { design: &'static str },
    #[error("outcome must be a single column matrix")]
    InvalidOutcomeShape,
    #[error("{field} length ({len}) must match outcome rows ({rows})")]
    LengthMismatch {
        field: &'static str,
        len: usize,
        rows: usize,
    },
    #[error("{design} design rows ({rows}) must match outcome rows ({expected})")]
    DesignRowMismatch {
        design: &'static str,
        rows: usize,
        expected: usize,
    },
    #[error("{design} design matrix contains non-finite values")]
    NonFiniteDesign { design: &'static str },
    #[error("observed outcome at row {row} is not finite")]
    NonFiniteOutcome { row: usize },
    #[error("binary outcome at row {row} must be 0 or 1")]
    InvalidBinaryOutcome { row: usize },
    #[error("ordinal outcome at row {row} must be an integer in 0..{categories}")]
    InvalidOrdinalOutcome { row: usize, categories: usize },
    #[error(
        "row {row} received treatment under control assignment, which requires always-takers"
    )]
    AlwaysTakerWithoutAdmission { row: usize },
    #[error("initial type at row {row} is inconsistent with its assignment and treatment")]
    InadmissibleInitialType { row: usize },
}

/// Cluster structure and random-effect covariates for the hierarchical variant.
#[derive(Debug, Clone)]
pub struct ClusterDesign {
    pub group_ids: Vec<u64>,
    /// Random-effect covariates of the compliance model.
    pub z_compliance: Mat<f64>,
    /// Random-effect covariates of the outcome model; type columns are prepended.
    pub z_outcome: Mat<f64>,
    /// Random-effect covariates of the response model; type columns are prepended.
    pub z_response: Mat<f64>,
}

impl ClusterDesign {
    /// Random intercepts for every block.
    #[must_use]
    pub fn intercepts(group_ids: Vec<u64>) -> Self {
        let rows = group_ids.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        Self {
            group_ids,
            z_compliance: intercept.clone(),
            z_outcome: intercept.clone(),
            z_response: intercept,
        }
    }

    #[must_use]
    pub fn with_outcome_covariates(self, z_outcome: Mat<f64>) -> Self {
        Self { z_outcome, ..self }
    }

    #[must_use]
    pub fn with_response_covariates(self, z_response: Mat<f64>) -> Self {
        Self { z_response, ..self }
    }

    #[must_use]
    pub fn with_compliance_covariates(self, z_compliance: Mat<f64>) -> Self {
        Self {
            z_compliance,
            ..self
        }
    }
}

/// Data of one randomized experiment.
#[derive(Debug, Clone)]
pub struct ExperimentInput {
    /// Outcome values; entries of non-responders are ignored.
    pub outcome: Mat<f64>,
    /// Whether the outcome of each unit was observed.
    pub responded: Vec<bool>,
    /// Randomized assignment to treatment.
    pub assignment: Vec<bool>,
    /// Treatment actually received.
    pub treatment: Vec<bool>,
    pub x_compliance: Mat<f64>,
    /// Outcome covariates, without the type-contrast columns.
    pub x_outcome: Mat<f64>,
    /// Response covariates, without the type-contrast columns.
    pub x_response: Mat<f64>,
    pub clusters: Option<ClusterDesign>,
    pub initial_types: Option<Vec<ComplianceType>>,
}

impl ExperimentInput {
    #[must_use]
    pub const fn new(
        outcome: Mat<f64>,
        responded: Vec<bool>,
        assignment: Vec<bool>,
        treatment: Vec<bool>,
        x_compliance: Mat<f64>,
        x_outcome: Mat<f64>,
        x_response: Mat<f64>,
    ) -> Self {
        Self {
            outcome,
            responded,
            assignment,
            treatment,
            x_compliance,
            x_outcome,
            x_response,
            clusters: None,
            initial_types: None,
        }
    }

    #[must_use]
    pub fn with_clusters(self, clusters: ClusterDesign) -> Self {
        Self {
            clusters: Some(clusters),
            ..self
        }
    }

    #[must_use]
    pub fn with_initial_types(self, initial_types: Vec<ComplianceType>) -> Self {
        Self {
            initial_types: Some(initial_types),
            ..self
        }
    }

    #[must_use]
    pub fn n_units(&self) -> usize {
        self.outcome.nrows()
    }

    #[must_use]
    pub fn n_missing(&self) -> usize {
        self.responded.iter().filter(|responded| !**responded).count()
    }

    /// Observed outcome of `unit`, or `None` for non-responders.
    #[must_use]
    pub fn observed_outcome(&self, unit: usize) -> Option<f64> {
        self.responded[unit].then(|| self.outcome[(unit, 0)])
    }

    /// Validate shapes and finiteness of every component.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if inputs are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.outcome.ncols() != 1 {
            return Err(InputError::InvalidOutcomeShape);
        }
        let rows = self.outcome.nrows();
        if rows == 0 {
            return Err(InputError::NoUnits);
        }
        for (field, len) in [
            ("responded", self.responded.len()),
            ("assignment", self.assignment.len()),
            ("treatment", self.treatment.len()),
        ] {
            if len != rows {
                return Err(InputError::LengthMismatch { field, len, rows });
            }
        }
        validate_design("compliance", &self.x_compliance, rows, false)?;
        validate_design("outcome", &self.x_outcome, rows, true)?;
        validate_design("response", &self.x_response, rows, true)?;

        for unit in 0..rows {
            if let Some(value) = self.observed_outcome(unit)
                && !value.is_finite()
            {
                return Err(InputError::NonFiniteOutcome { row: unit });
            }
        }

        if let Some(clusters) = &self.clusters {
            if clusters.group_ids.len() != rows {
                return Err(InputError::LengthMismatch {
                    field: "group_ids",
                    len: clusters.group_ids.len(),
                    rows,
                });
            }
            validate_design("compliance random-effect", &clusters.z_compliance, rows, false)?;
            validate_design("outcome random-effect", &clusters.z_outcome, rows, true)?;
            validate_design("response random-effect", &clusters.z_response, rows, true)?;
        }

        if let Some(initial) = &self.initial_types
            && initial.len() != rows
        {
            return Err(InputError::LengthMismatch {
                field: "initial_types",
                len: initial.len(),
                rows,
            });
        }
        Ok(())
    }
}

fn validate_design(
    design: &'static str,
    matrix: &Mat<f64>,
    expected: usize,
    allow_empty: bool,
) -> Result<(), InputError> {
    if matrix.ncols() == 0 && !allow_empty {
        return Err(InputError::EmptyDesign { design });
    }
    if matrix.nrows() != expected {
        return Err(InputError::DesignRowMismatch {
            design,
            rows: matrix.nrows(),
            expected,
        });
    }
    if !matrix_is_finite(matrix) {
        return Err(InputError::NonFiniteDesign { design });
    }
    Ok(())
}
