//! Tabular result records handed to downstream diagnostics writers.
//!
//! Every record is flat so it serializes directly to one CSV row.

use serde::Serialize;

/// Category of a robustness test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// Same specification on a restricted sample.
    SampleRestriction,
    /// A non-baseline registry entry on the full sample.
    AlternativeSpecification,
    /// Re-estimation under known-false treatment timing.
    Placebo,
}

impl TestType {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::SampleRestriction => "sample_restriction",
            TestType::AlternativeSpecification => "alternative_specification",
            TestType::Placebo => "placebo",
        }
    }
}

/// One row per estimated specification: the treatment effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationRecord {
    /// Specification name.
    pub specification: String,
    /// Sample restriction label.
    pub sample: String,
    /// Observations used.
    pub n_obs: usize,
    /// Treatment coefficient.
    pub coefficient: f64,
    /// Standard error of the treatment coefficient.
    pub std_error: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_low: f64,
    /// Upper confidence bound.
    pub ci_high: f64,
    /// Rows removed by listwise deletion.
    pub dropped_rows: usize,
    /// Inference mode label (`classical`, `robust`, `cluster`).
    pub inference: String,
    /// Number of clusters for cluster-robust inference.
    pub n_clusters: Option<usize>,
    /// Residual degrees of freedom.
    pub df_resid: usize,
}

/// One row per regressor of one specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientRecord {
    /// Specification name.
    pub specification: String,
    /// Sample restriction label.
    pub sample: String,
    /// Regressor name.
    pub term: String,
    /// Point estimate.
    pub coefficient: f64,
    /// Standard error.
    pub std_error: f64,
    /// t statistic.
    pub t_stat: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_low: f64,
    /// Upper confidence bound.
    pub ci_high: f64,
    /// Whether this is the treatment regressor.
    pub is_treatment: bool,
}

/// One row per robustness test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobustnessRecord {
    /// Test name (unique within a run).
    pub test_name: String,
    /// Test category.
    pub test_type: TestType,
    /// Specification estimated.
    pub specification: String,
    /// Treatment coefficient (absent on failure).
    pub coefficient: Option<f64>,
    /// Standard error (absent on failure).
    pub std_error: Option<f64>,
    /// p-value (absent on failure).
    pub p_value: Option<f64>,
    /// Observations used (absent on failure).
    pub n_obs: Option<usize>,
    /// True when the perturbation could not be estimated.
    pub failure_marker: bool,
    /// Failure class label.
    pub failure_kind: Option<String>,
    /// Failure message.
    pub failure_message: Option<String>,
}

/// One row per placebo draw, plus a final summary row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceboRecord {
    /// `draw` or `summary`.
    pub kind: String,
    /// Draw index (absent on the summary row).
    pub draw_index: Option<usize>,
    /// Seed of this draw; the base seed on the summary row.
    pub seed: Option<u64>,
    /// Placebo coefficient, or the real estimate on the summary row.
    pub coefficient: Option<f64>,
    /// Standard error of `coefficient`.
    pub std_error: Option<f64>,
    /// Mean of successful placebo coefficients (summary only).
    pub placebo_mean: Option<f64>,
    /// Standard deviation of successful placebo coefficients (summary only).
    pub placebo_sd: Option<f64>,
    /// Share of placebo coefficients at least as extreme as the real one (summary only).
    pub empirical_p_value: Option<f64>,
    /// Number of successful draws (summary only).
    pub n_successful: Option<usize>,
    /// Failure message of a draw.
    pub failure_message: Option<String>,
}

/// All output tables of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTables {
    /// Treatment-effect rows.
    pub estimates: Vec<EstimationRecord>,
    /// Per-regressor rows.
    pub coefficients: Vec<CoefficientRecord>,
    /// Robustness rows.
    pub robustness: Vec<RobustnessRecord>,
    /// Placebo rows.
    pub placebo: Vec<PlaceboRecord>,
}

impl ResultTables {
    /// Whether every table is empty.
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
            && self.coefficients.is_empty()
            && self.robustness.is_empty()
            && self.placebo.is_empty()
    }
}
