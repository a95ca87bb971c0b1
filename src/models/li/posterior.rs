//! Posterior storage and summaries for the latent-ignorability sampler.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};
use faer::Mat;
use num_traits::ToPrimitive;

use super::qoi::{LiQoiDraw, QoiLayout};
use super::types::LiError;
use crate::utils::usize_to_f64;

/// Random-effect covariance matrices of one retained sweep.
#[derive(Debug, Clone)]
pub struct RandomEffectCovariances {
    pub compliance: Option<Mat<f64>>,
    pub always_taker: Option<Mat<f64>>,
    pub outcome: Option<Mat<f64>>,
    pub response: Option<Mat<f64>>,
}

/// Coefficient blocks of one retained sweep.
#[derive(Debug, Clone)]
pub struct LiParameterDraw {
    pub compliance: Vec<f64>,
    /// Present when always-takers are admitted.
    pub always_taker: Option<Vec<f64>>,
    /// Type-contrast coefficients first, then covariates.
    pub outcome: Vec<f64>,
    /// Present when some outcome is missing.
    pub response: Option<Vec<f64>>,
    /// Gaussian outcome variance.
    pub variance: Option<f64>,
    /// Ordinal thresholds, the first fixed at zero.
    pub cutpoints: Option<Vec<f64>>,
    pub random_effect_covariances: Option<RandomEffectCovariances>,
}

/// Retained traces of a fit.
#[derive(Debug, Clone)]
pub struct LiPosteriorSamples {
    /// Empty unless parameters are kept.
    pub parameters: Vec<LiParameterDraw>,
    pub qoi: Vec<LiQoiDraw>,
    pub layout: QoiLayout,
}

impl LiPosteriorSamples {
    /// Reserve room for `draws` retained sweeps up front.
    ///
    /// # Errors
    ///
    /// Returns `LiError::AllocationFailure` if the traces cannot be allocated.
    pub(crate) fn with_reserved(
        draws: usize,
        keep_parameters: bool,
        layout: QoiLayout,
    ) -> Result<Self, LiError> {
        let mut qoi = Vec::new();
        qoi.try_reserve_exact(draws)
            .map_err(|_| LiError::AllocationFailure { draws })?;
        let mut parameters = Vec::new();
        if keep_parameters {
            parameters
                .try_reserve_exact(draws)
                .map_err(|_| LiError::AllocationFailure { draws })?;
        }
        Ok(Self {
            parameters,
            qoi,
            layout,
        })
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.qoi.is_empty()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.qoi.len()
    }

    /// Quantity-of-interest trace as flat rows in [`QoiLayout::labels`] order.
    #[must_use]
    pub fn qoi_rows(&self) -> Vec<Vec<f64>> {
        self.qoi.iter().map(|draw| self.layout.flatten(draw)).collect()
    }
}

/// Scalar posterior summary statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
    /// Draws that entered the summary; non-finite draws are skipped.
    pub finite_draws: usize,
}

/// Posterior summary of the quantities of interest and coefficient blocks.
#[derive(Debug, Clone, Default)]
pub struct LiPosteriorSummary {
    pub labels: Vec<String>,
    pub qoi: Vec<ParameterSummary>,
    pub compliance: Vec<ParameterSummary>,
    pub always_taker: Vec<ParameterSummary>,
    pub outcome: Vec<ParameterSummary>,
    pub response: Vec<ParameterSummary>,
    pub variance: Option<ParameterSummary>,
    pub cutpoints: Vec<ParameterSummary>,
    pub draw_count: usize,
}

/// Compute posterior summaries for every stored trace.
#[must_use]
pub fn summarize_posterior(samples: &LiPosteriorSamples) -> LiPosteriorSummary {
    let draw_count = samples.len();
    let labels = samples.layout.labels();
    if draw_count == 0 {
        return LiPosteriorSummary {
            labels,
            draw_count,
            ..LiPosteriorSummary::default()
        };
    }

    let rows = samples.qoi_rows();
    let qoi = (0..samples.layout.row_width())
        .map(|col| {
            let column: Vec<f64> = rows.iter().map(|row| row[col]).collect();
            summarize_scalar(&column)
        })
        .collect();

    let parameters = &samples.parameters;
    let variances: Vec<f64> = parameters.iter().filter_map(|draw| draw.variance).collect();
    LiPosteriorSummary {
        labels,
        qoi,
        compliance: summarize_block(parameters, |draw| Some(&draw.compliance)),
        always_taker: summarize_block(parameters, |draw| draw.always_taker.as_ref()),
        outcome: summarize_block(parameters, |draw| Some(&draw.outcome)),
        response: summarize_block(parameters, |draw| draw.response.as_ref()),
        variance: (!variances.is_empty()).then(|| summarize_scalar(&variances)),
        cutpoints: summarize_block(parameters, |draw| draw.cutpoints.as_ref()),
        draw_count,
    }
}

fn summarize_block<F>(draws: &[LiParameterDraw], block: F) -> Vec<ParameterSummary>
where
    F: Fn(&LiParameterDraw) -> Option<&Vec<f64>>,
{
    let len = draws.first().and_then(&block).map_or(0, Vec::len);
    (0..len)
        .map(|index| {
            let values: Vec<f64> = draws
                .iter()
                .filter_map(|draw| block(draw).and_then(|values| values.get(index).copied()))
                .collect();
            summarize_scalar(&values)
        })
        .collect()
}

fn summarize_scalar(values: &[f64]) -> ParameterSummary {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|value| value.is_finite()).collect();
    if sorted.is_empty() {
        return ParameterSummary {
            mean: f64::NAN,
            std_dev: f64::NAN,
            q025: f64::NAN,
            q50: f64::NAN,
            q975: f64::NAN,
            finite_draws: 0,
        };
    }

    let n = usize_to_f64(sorted.len());
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>()
        / n.max(1.0);

    sorted.sort_by(f64::total_cmp);

    ParameterSummary {
        mean,
        std_dev: variance.sqrt(),
        q025: percentile(&sorted, 0.025),
        q50: percentile(&sorted, 0.5),
        q975: percentile(&sorted, 0.975),
        finite_draws: sorted.len(),
    }
}

#[must_use]
fn percentile(sorted_values: &[f64], probability: f64) -> f64 {
    if sorted_values.is_empty() {
        return f64::NAN;
    }

    let clamped = probability.clamp(0.0, 1.0);
    let last = sorted_values.len() - 1;
    let position = clamped * usize_to_f64(last);
    let lower = position.floor().to_usize().unwrap_or(0);
    let upper = position.ceil().to_usize().unwrap_or(last);

    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = position - usize_to_f64(lower);
        (1.0 - weight).mul_add(sorted_values[lower], weight * sorted_values[upper])
    }
}

/// Render the quantity-of-interest summary as a table.
///
/// Effect rows (`ITT`, `CACE`) whose 95% interval excludes zero are highlighted.
#[must_use]
pub fn render_qoi_summary(summary: &LiPosteriorSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["quantity", "mean", "sd", "2.5%", "50%", "97.5%", "draws"]
                .iter()
                .map(|header| Cell::new(*header))
                .collect::<Vec<_>>(),
        );
    for (label, stats) in summary.labels.iter().zip(&summary.qoi) {
        let is_effect = label.starts_with("ITT") || label.starts_with("CACE");
        let excludes_zero = stats.q025 > 0.0 || stats.q975 < 0.0;
        let name = if is_effect && excludes_zero {
            Cell::new(label).fg(Color::Green).add_attribute(Attribute::Bold)
        } else {
            Cell::new(label)
        };
        table.add_row(vec![
            name,
            Cell::new(format!("{:.3}", stats.mean)),
            Cell::new(format!("{:.3}", stats.std_dev)),
            Cell::new(format!("{:.3}", stats.q025)),
            Cell::new(format!("{:.3}", stats.q50)),
            Cell::new(format!("{:.3}", stats.q975)),
            Cell::new(stats.finite_draws),
        ]);
    }
    table
}
