//! Descriptive checks run before fitting: stratum counts, missingness,
//! and treatment uptake.

use crate::input::ExperimentInput;
use crate::utils::usize_to_f64;

/// Observed `(assignment, treatment)` cell counts and uptake rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentSummary {
    pub n_units: usize,
    pub n_missing: usize,
    /// `Z = 0, D = 0`.
    pub control_untreated: usize,
    /// `Z = 0, D = 1`; non-zero only when always-takers exist.
    pub control_treated: usize,
    /// `Z = 1, D = 0`.
    pub assigned_untreated: usize,
    /// `Z = 1, D = 1`.
    pub assigned_treated: usize,
    /// Share of treated units among those assigned to treatment.
    pub uptake_assigned: f64,
    /// Share of treated units among those assigned to control.
    pub uptake_control: f64,
    /// `uptake_assigned - uptake_control`: the ITT effect on treatment receipt.
    pub uptake_difference: f64,
}

impl ExperimentSummary {
    #[must_use]
    pub const fn has_control_takers(&self) -> bool {
        self.control_treated > 0
    }
}

#[must_use]
pub fn experiment_summary(input: &ExperimentInput) -> ExperimentSummary {
    let mut cells = [[0usize; 2]; 2];
    for (assigned, treated) in input.assignment.iter().zip(&input.treatment) {
        cells[usize::from(*assigned)][usize::from(*treated)] += 1;
    }
    let share = |treated: usize, total: usize| {
        if total == 0 {
            f64::NAN
        } else {
            usize_to_f64(treated) / usize_to_f64(total)
        }
    };
    let uptake_assigned = share(cells[1][1], cells[1][0] + cells[1][1]);
    let uptake_control = share(cells[0][1], cells[0][0] + cells[0][1]);

    ExperimentSummary {
        n_units: input.assignment.len(),
        n_missing: input.n_missing(),
        control_untreated: cells[0][0],
        control_treated: cells[0][1],
        assigned_untreated: cells[1][0],
        assigned_treated: cells[1][1],
        uptake_assigned,
        uptake_control,
        uptake_difference: uptake_assigned - uptake_control,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use approx::assert_relative_eq;

    fn input(assignment: Vec<bool>, treatment: Vec<bool>, responded: Vec<bool>) -> ExperimentInput {
        let rows = assignment.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::zeros(rows, 1),
            responded,
            assignment,
            treatment,
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    #[test]
    fn summary_counts_cells_and_uptake() {
        let data = input(
            vec![true, true, true, true, false, false],
            vec![true, true, true, false, false, true],
            vec![true, false, true, true, true, false],
        );
        let summary = experiment_summary(&data);
        assert_eq!(summary.n_units, 6);
        assert_eq!(summary.n_missing, 2);
        assert_eq!(summary.assigned_treated, 3);
        assert_eq!(summary.assigned_untreated, 1);
        assert_eq!(summary.control_untreated, 1);
        assert!(summary.has_control_takers());
        assert_relative_eq!(summary.uptake_assigned, 0.75);
        assert_relative_eq!(summary.uptake_control, 0.5);
        assert_relative_eq!(summary.uptake_difference, 0.25);
    }

    #[test]
    fn empty_arm_gives_nan_uptake() {
        let data = input(vec![true, true], vec![true, false], vec![true, true]);
        let summary = experiment_summary(&data);
        assert!(summary.uptake_control.is_nan());
        assert!(!summary.has_control_takers());
    }
}
