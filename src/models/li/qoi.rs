//! Quantities of interest computed from one sweep's state.

use super::design::LatentCell;
use super::input::PreparedExperiment;
use super::latent_type::TypeProbabilities;
use super::outcome::OutcomeModel;
use super::random::RandomStream;
use super::types::{ComplianceType, QoiMode};
use crate::utils::usize_to_f64;

/// Units per compliance type, split by assignment arm (`[control, treatment]`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub complier: [usize; 2],
    pub never_taker: [usize; 2],
    pub always_taker: [usize; 2],
}

impl TypeCounts {
    #[must_use]
    pub fn from_types(types: &[ComplianceType], assignment: &[bool]) -> Self {
        let mut counts = Self::default();
        for (compliance_type, assigned) in types.iter().zip(assignment) {
            let arm = usize::from(*assigned);
            match compliance_type {
                ComplianceType::Complier => counts.complier[arm] += 1,
                ComplianceType::NeverTaker => counts.never_taker[arm] += 1,
                ComplianceType::AlwaysTaker => counts.always_taker[arm] += 1,
            }
        }
        counts
    }

    #[must_use]
    pub const fn arm(&self, arm: usize) -> usize {
        self.complier[arm] + self.never_taker[arm] + self.always_taker[arm]
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.arm(0) + self.arm(1)
    }

    #[must_use]
    pub const fn compliers(&self) -> usize {
        self.complier[0] + self.complier[1]
    }

    #[must_use]
    pub const fn never_takers(&self) -> usize {
        self.never_taker[0] + self.never_taker[1]
    }

    #[must_use]
    pub const fn always_takers(&self) -> usize {
        self.always_taker[0] + self.always_taker[1]
    }
}

/// Quantities of interest of one retained sweep.
///
/// Vector fields hold one value for binary (probability of `1`) and Gaussian
/// (mean) outcomes, and the probabilities of categories `1..categories` for
/// ordinal outcomes. Means over an empty subgroup are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct LiQoiDraw {
    pub itt: Vec<f64>,
    pub cace: Vec<f64>,
    pub y1_complier: Vec<f64>,
    pub y0_complier: Vec<f64>,
    pub y_never_taker: Vec<f64>,
    pub p_complier: f64,
    pub p_never_taker: f64,
    pub y_always_taker: Option<Vec<f64>>,
    pub counts: TypeCounts,
}

impl LiQoiDraw {
    /// Whether any field is NaN because a subgroup was empty.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        let vectors = [
            &self.itt,
            &self.cace,
            &self.y1_complier,
            &self.y0_complier,
            &self.y_never_taker,
        ];
        vectors.iter().any(|values| values.iter().any(|value| value.is_nan()))
            || self
                .y_always_taker
                .as_ref()
                .is_some_and(|values| values.iter().any(|value| value.is_nan()))
            || self.p_complier.is_nan()
            || self.p_never_taker.is_nan()
    }
}

/// Column layout of flattened quantity-of-interest rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QoiLayout {
    pub ordinal: bool,
    /// Values per subgroup mean.
    pub width: usize,
    pub always_takers: bool,
}

impl QoiLayout {
    #[must_use]
    pub const fn row_width(&self) -> usize {
        let means = if self.always_takers { 6 } else { 5 };
        means * self.width + 2
    }

    /// Column names in flattening order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        let vector = |name: &str| -> Vec<String> {
            if self.ordinal {
                (1..=self.width).map(|category| format!("{name}[{category}]")).collect()
            } else {
                vec![name.to_string()]
            }
        };
        let mut labels = Vec::with_capacity(self.row_width());
        if self.ordinal {
            for name in ["ITT", "CACE", "Y1barC", "Y0barC", "YbarN"] {
                labels.extend(vector(name));
            }
            labels.push("p_comp".to_string());
            labels.push("p_never".to_string());
        } else {
            for name in ["ITT", "CACE", "p_comp", "p_never", "Y1barC", "Y0barC", "YbarN"] {
                labels.extend(vector(name));
            }
        }
        if self.always_takers {
            labels.extend(vector("YbarA"));
        }
        labels
    }

    /// One flat row in the order given by [`QoiLayout::labels`].
    #[must_use]
    pub fn flatten(&self, draw: &LiQoiDraw) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.row_width());
        if self.ordinal {
            row.extend_from_slice(&draw.itt);
            row.extend_from_slice(&draw.cace);
            row.extend_from_slice(&draw.y1_complier);
            row.extend_from_slice(&draw.y0_complier);
            row.extend_from_slice(&draw.y_never_taker);
            row.push(draw.p_complier);
            row.push(draw.p_never_taker);
        } else {
            row.extend_from_slice(&draw.itt);
            row.extend_from_slice(&draw.cace);
            row.push(draw.p_complier);
            row.push(draw.p_never_taker);
            row.extend_from_slice(&draw.y1_complier);
            row.extend_from_slice(&draw.y0_complier);
            row.extend_from_slice(&draw.y_never_taker);
        }
        if self.always_takers {
            match &draw.y_always_taker {
                Some(values) => row.extend_from_slice(values),
                None => row.extend(std::iter::repeat_n(f64::NAN, self.width)),
            }
        }
        row
    }
}

fn mean_or_nan(sum: f64, count: usize) -> f64 {
    if count == 0 {
        f64::NAN
    } else {
        sum / usize_to_f64(count)
    }
}

/// Compute the quantities of interest for the current types and outcome model.
pub(crate) fn estimate_qoi(
    data: &PreparedExperiment<'_>,
    types: &[ComplianceType],
    prior: &TypeProbabilities,
    outcome: &OutcomeModel,
    mode: QoiMode,
    stream: &mut RandomStream,
) -> LiQoiDraw {
    let width = outcome.qoi_width();
    let assignment = &data.input.assignment;
    let counts = TypeCounts::from_types(types, assignment);
    let predictor = outcome.predictor(data);

    let mut y1 = vec![0.0; width];
    let mut y0 = vec![0.0; width];
    let mut never = vec![0.0; width];
    let mut always = vec![0.0; width];
    for (unit, compliance_type) in types.iter().enumerate() {
        let assigned = assignment[unit];
        match mode {
            QoiMode::InSample => {
                let target = match compliance_type {
                    ComplianceType::Complier if assigned => &mut y1,
                    ComplianceType::Complier => &mut y0,
                    ComplianceType::NeverTaker => &mut never,
                    ComplianceType::AlwaysTaker => &mut always,
                };
                let index = predictor.index(unit, LatentCell::of(*compliance_type, assigned));
                outcome.add_realized(data, unit, index, stream, target);
            }
            QoiMode::Population => match compliance_type {
                ComplianceType::Complier => {
                    outcome.add_expected(predictor.index(unit, LatentCell::ComplierTreated), &mut y1);
                    outcome.add_expected(predictor.index(unit, LatentCell::ComplierControl), &mut y0);
                }
                ComplianceType::NeverTaker => {
                    outcome.add_expected(predictor.index(unit, LatentCell::NeverTaker), &mut never);
                }
                ComplianceType::AlwaysTaker => {
                    outcome.add_expected(predictor.index(unit, LatentCell::AlwaysTaker), &mut always);
                }
            },
        }
    }

    let n_units = counts.total();
    let (itt, y1_complier, y0_complier, p_complier, p_never_taker) = match mode {
        QoiMode::InSample => (
            (0..width)
                .map(|j| mean_or_nan(y1[j], counts.arm(1)) - mean_or_nan(y0[j], counts.arm(0)))
                .collect::<Vec<f64>>(),
            y1.iter()
                .map(|sum| mean_or_nan(*sum, counts.complier[1]))
                .collect::<Vec<f64>>(),
            y0.iter()
                .map(|sum| mean_or_nan(*sum, counts.complier[0]))
                .collect::<Vec<f64>>(),
            mean_or_nan(usize_to_f64(counts.compliers()), n_units),
            mean_or_nan(usize_to_f64(counts.never_takers()), n_units),
        ),
        QoiMode::Population => (
            (0..width)
                .map(|j| mean_or_nan(y1[j] - y0[j], n_units))
                .collect(),
            y1.iter()
                .map(|sum| mean_or_nan(*sum, counts.compliers()))
                .collect(),
            y0.iter()
                .map(|sum| mean_or_nan(*sum, counts.compliers()))
                .collect(),
            mean_or_nan(prior.complier.iter().sum(), n_units),
            mean_or_nan(prior.never_taker.iter().sum(), n_units),
        ),
    };
    let cace = y1_complier
        .iter()
        .zip(&y0_complier)
        .map(|(treated, control)| treated - control)
        .collect();
    let y_never_taker = never
        .iter()
        .map(|sum| mean_or_nan(*sum, counts.never_takers()))
        .collect();
    let y_always_taker = data.always_takers.then(|| {
        always
            .iter()
            .map(|sum| mean_or_nan(*sum, counts.always_takers()))
            .collect()
    });

    LiQoiDraw {
        itt,
        cace,
        y1_complier,
        y0_complier,
        y_never_taker,
        p_complier,
        p_never_taker,
        y_always_taker,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::input::ExperimentInput;
    use crate::models::li::input::prepare_experiment;
    use crate::models::li::types::{LiSamplerConfig, OutcomeFamily};
    use approx::assert_relative_eq;

    fn experiment(outcome: &[f64], assignment: Vec<bool>, treatment: Vec<bool>) -> ExperimentInput {
        let rows = outcome.len();
        let intercept = Mat::from_fn(rows, 1, |_, _| 1.0);
        ExperimentInput::new(
            Mat::from_fn(rows, 1, |row, _| outcome[row]),
            vec![true; rows],
            assignment,
            treatment,
            intercept.clone(),
            intercept.clone(),
            intercept,
        )
    }

    fn gaussian_config() -> LiSamplerConfig {
        let mut config = LiSamplerConfig::default();
        config.model.family = OutcomeFamily::Gaussian;
        config
    }

    fn uniform_prior(n: usize) -> TypeProbabilities {
        TypeProbabilities {
            complier: vec![0.5; n],
            never_taker: vec![0.5; n],
        }
    }

    #[test]
    fn in_sample_means_use_observed_outcomes() {
        let data = experiment(
            &[4.0, 2.0, 1.0, 3.0],
            vec![true, false, true, false],
            vec![true, false, false, false],
        );
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Gaussian, false).expect("valid experiment");
        let outcome = OutcomeModel::new(&prepared, &gaussian_config()).expect("valid config");
        let types = vec![
            ComplianceType::Complier,
            ComplianceType::Complier,
            ComplianceType::NeverTaker,
            ComplianceType::NeverTaker,
        ];
        let mut stream = RandomStream::seed_from_u64(1);
        let draw = estimate_qoi(
            &prepared,
            &types,
            &uniform_prior(4),
            &outcome,
            QoiMode::InSample,
            &mut stream,
        );
        assert_relative_eq!(draw.y1_complier[0], 4.0);
        assert_relative_eq!(draw.y0_complier[0], 2.0);
        assert_relative_eq!(draw.cace[0], 2.0);
        assert_relative_eq!(draw.itt[0], 4.0 / 2.0 - 2.0 / 2.0);
        assert_relative_eq!(draw.y_never_taker[0], 2.0);
        assert_relative_eq!(draw.p_complier, 0.5);
        assert_relative_eq!(draw.p_never_taker, 0.5);
        assert_eq!(draw.counts.total(), 4);
    }

    #[test]
    fn empty_subgroups_give_nan() {
        let data = experiment(&[1.0, 0.0], vec![true, true], vec![false, false]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Gaussian, false).expect("valid experiment");
        let outcome = OutcomeModel::new(&prepared, &gaussian_config()).expect("valid config");
        let types = vec![ComplianceType::NeverTaker; 2];
        let mut stream = RandomStream::seed_from_u64(1);
        let draw = estimate_qoi(
            &prepared,
            &types,
            &uniform_prior(2),
            &outcome,
            QoiMode::InSample,
            &mut stream,
        );
        assert!(draw.cace[0].is_nan());
        assert!(draw.itt[0].is_nan());
        assert_relative_eq!(draw.y_never_taker[0], 0.5);
        assert!(draw.is_degenerate());
    }

    #[test]
    fn population_mode_averages_prior_probabilities() {
        let data = experiment(&[1.0, 0.0, 1.0], vec![true, false, true], vec![true, false, false]);
        let prepared =
            prepare_experiment(&data, OutcomeFamily::Gaussian, false).expect("valid experiment");
        let mut outcome = OutcomeModel::new(&prepared, &gaussian_config()).expect("valid config");
        outcome.coefficients = vec![1.5, -0.5, 2.0];
        let types = vec![
            ComplianceType::Complier,
            ComplianceType::Complier,
            ComplianceType::NeverTaker,
        ];
        let prior = TypeProbabilities {
            complier: vec![0.2, 0.4, 0.6],
            never_taker: vec![0.8, 0.6, 0.4],
        };
        let mut stream = RandomStream::seed_from_u64(1);
        let draw = estimate_qoi(&prepared, &types, &prior, &outcome, QoiMode::Population, &mut stream);
        assert_relative_eq!(draw.p_complier, 0.4, epsilon = 1.0e-12);
        assert_relative_eq!(draw.p_never_taker, 0.6, epsilon = 1.0e-12);
        assert_relative_eq!(draw.y1_complier[0], 3.5, epsilon = 1.0e-12);
        assert_relative_eq!(draw.y0_complier[0], 1.5, epsilon = 1.0e-12);
        assert_relative_eq!(draw.itt[0], 2.0 * 2.0 / 3.0, epsilon = 1.0e-12);
        assert_relative_eq!(draw.cace[0], 2.0, epsilon = 1.0e-12);
    }

    #[test]
    fn layouts_match_flattened_rows() {
        let draw = LiQoiDraw {
            itt: vec![1.0, 2.0],
            cace: vec![3.0, 4.0],
            y1_complier: vec![5.0, 6.0],
            y0_complier: vec![7.0, 8.0],
            y_never_taker: vec![9.0, 10.0],
            p_complier: 0.3,
            p_never_taker: 0.7,
            y_always_taker: None,
            counts: TypeCounts::default(),
        };
        let layout = QoiLayout {
            ordinal: true,
            width: 2,
            always_takers: false,
        };
        let row = layout.flatten(&draw);
        assert_eq!(row.len(), layout.row_width());
        assert_eq!(layout.labels().len(), layout.row_width());
        assert_eq!(layout.labels()[10], "p_comp");
        assert_relative_eq!(row[10], 0.3);

        let binary = QoiLayout {
            ordinal: false,
            width: 1,
            always_takers: true,
        };
        assert_eq!(binary.row_width(), 8);
        assert_eq!(binary.labels()[7], "YbarA");
    }
}
