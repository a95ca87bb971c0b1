//! Input preparation: strata, cluster indices, and family-specific outcome coding.

use std::collections::BTreeMap;

use super::types::{ComplianceType, LiError, OutcomeFamily};
use crate::input::{ExperimentInput, InputError};

/// Observed `(assignment, treatment)` cell of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stratum {
    /// `Z = 0, D = 0`: complier or never-taker.
    ControlUntreated,
    /// `Z = 0, D = 1`: always-taker.
    ControlTreated,
    /// `Z = 1, D = 0`: never-taker.
    AssignedUntreated,
    /// `Z = 1, D = 1`: complier, or always-taker when those are admitted.
    AssignedTreated,
}

impl Stratum {
    const fn from_cell(assigned: bool, treated: bool) -> Self {
        match (assigned, treated) {
            (false, false) => Self::ControlUntreated,
            (false, true) => Self::ControlTreated,
            (true, false) => Self::AssignedUntreated,
            (true, true) => Self::AssignedTreated,
        }
    }

    /// Type pinned down by the exclusion restriction, if any.
    pub(crate) const fn fixed_type(self, always_takers: bool) -> Option<ComplianceType> {
        match self {
            Self::ControlTreated => Some(ComplianceType::AlwaysTaker),
            Self::AssignedUntreated => Some(ComplianceType::NeverTaker),
            Self::AssignedTreated if !always_takers => Some(ComplianceType::Complier),
            Self::ControlUntreated | Self::AssignedTreated => None,
        }
    }

    /// Non-complier type competing with "complier" in an ambiguous stratum.
    pub(crate) const fn alternative(self) -> ComplianceType {
        match self {
            Self::ControlUntreated | Self::AssignedUntreated => ComplianceType::NeverTaker,
            Self::ControlTreated | Self::AssignedTreated => ComplianceType::AlwaysTaker,
        }
    }

    /// Whether `compliance_type` is consistent with this stratum.
    pub(crate) fn admits(self, compliance_type: ComplianceType, always_takers: bool) -> bool {
        match self.fixed_type(always_takers) {
            Some(fixed) => fixed == compliance_type,
            None => {
                compliance_type == ComplianceType::Complier || compliance_type == self.alternative()
            }
        }
    }
}

/// Dense cluster index for each unit.
#[derive(Debug, Clone)]
pub(crate) struct GroupIndex {
    pub row_to_group: Vec<usize>,
    pub n_groups: usize,
}

impl GroupIndex {
    fn from_ids(group_ids: &[u64]) -> Self {
        let mut row_to_group = vec![usize::MAX; group_ids.len()];
        let mut lookup: BTreeMap<u64, usize> = BTreeMap::new();
        let mut next_index = 0usize;

        for (row, group_id) in group_ids.iter().copied().enumerate() {
            let group_index = *lookup.entry(group_id).or_insert_with(|| {
                let index = next_index;
                next_index += 1;
                index
            });
            row_to_group[row] = group_index;
        }
        debug_assert!(row_to_group.iter().all(|idx| *idx != usize::MAX));
        Self {
            row_to_group,
            n_groups: next_index,
        }
    }

    /// Split `rows` by cluster, preserving order within each cluster.
    pub(crate) fn partition(&self, rows: &[usize]) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.n_groups];
        for &row in rows {
            members[self.row_to_group[row]].push(row);
        }
        members
    }
}

/// Prepared view reused by every sampler block.
#[derive(Debug, Clone)]
pub(crate) struct PreparedExperiment<'a> {
    pub input: &'a ExperimentInput,
    pub strata: Vec<Stratum>,
    /// Units with an observed outcome.
    pub observed: Vec<usize>,
    /// `0..n_units`.
    pub all_units: Vec<usize>,
    pub always_takers: bool,
    pub groups: Option<GroupIndex>,
    /// Observed binary outcomes (`false` for non-responders).
    pub binary_outcome: Vec<bool>,
    /// Observed ordinal categories (`0` for non-responders).
    pub ordinal_outcome: Vec<usize>,
}

impl PreparedExperiment<'_> {
    #[must_use]
    pub(crate) const fn n_units(&self) -> usize {
        self.strata.len()
    }

    #[must_use]
    pub(crate) fn n_missing(&self) -> usize {
        self.n_units() - self.observed.len()
    }

    /// Number of leading type-contrast columns in the outcome and response designs.
    #[must_use]
    pub(crate) const fn type_columns(&self) -> usize {
        if self.always_takers { 3 } else { 2 }
    }

    #[must_use]
    pub(crate) fn is_ambiguous(&self, unit: usize) -> bool {
        self.strata[unit].fixed_type(self.always_takers).is_none()
    }

    /// Starting types: caller-provided, or stratum-fixed with ambiguous units as compliers.
    pub(crate) fn initial_types(&self) -> Result<Vec<ComplianceType>, LiError> {
        if let Some(initial) = &self.input.initial_types {
            for (row, (stratum, compliance_type)) in self.strata.iter().zip(initial).enumerate() {
                if !stratum.admits(*compliance_type, self.always_takers) {
                    return Err(InputError::InadmissibleInitialType { row }.into());
                }
            }
            return Ok(initial.clone());
        }
        Ok(self
            .strata
            .iter()
            .map(|stratum| {
                stratum
                    .fixed_type(self.always_takers)
                    .unwrap_or(ComplianceType::Complier)
            })
            .collect())
    }
}

/// # Errors
///
/// Returns `LiError` if the input is malformed or inconsistent with the family
/// and the always-taker setting.
pub(crate) fn prepare_experiment(
    input: &ExperimentInput,
    family: OutcomeFamily,
    always_takers: bool,
) -> Result<PreparedExperiment<'_>, LiError> {
    input.validate()?;
    let n_units = input.n_units();

    let strata: Vec<Stratum> = input
        .assignment
        .iter()
        .zip(&input.treatment)
        .map(|(assigned, treated)| Stratum::from_cell(*assigned, *treated))
        .collect();
    if !always_takers
        && let Some(row) = strata
            .iter()
            .position(|stratum| *stratum == Stratum::ControlTreated)
    {
        return Err(InputError::AlwaysTakerWithoutAdmission { row }.into());
    }

    let observed: Vec<usize> = (0..n_units).filter(|unit| input.responded[*unit]).collect();
    let mut binary_outcome = vec![false; n_units];
    let mut ordinal_outcome = vec![0usize; n_units];
    for &row in &observed {
        let value = input.outcome[(row, 0)];
        match family {
            OutcomeFamily::Binary => {
                if value != 0.0 && value != 1.0 {
                    return Err(InputError::InvalidBinaryOutcome { row }.into());
                }
                binary_outcome[row] = value == 1.0;
            }
            OutcomeFamily::Ordinal { categories } => {
                ordinal_outcome[row] = ordinal_category(value, categories)
                    .ok_or(InputError::InvalidOrdinalOutcome { row, categories })?;
            }
            OutcomeFamily::Gaussian => {}
        }
    }

    let groups = input
        .clusters
        .as_ref()
        .map(|clusters| GroupIndex::from_ids(&clusters.group_ids));

    Ok(PreparedExperiment {
        input,
        strata,
        observed,
        all_units: (0..n_units).collect(),
        always_takers,
        groups,
        binary_outcome,
        ordinal_outcome,
    })
}

fn ordinal_category(value: f64, categories: usize) -> Option<usize> {
    if value < 0.0 || value.fract() != 0.0 {
        return None;
    }
    (0..categories).find(|category| crate::utils::usize_to_f64(*category) == value)
}
