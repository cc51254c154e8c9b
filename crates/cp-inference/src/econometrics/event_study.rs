//! Event-study regression with leads and lags of treatment onset.
//!
//! Estimates `y = α_i + λ_t + Σ_k δ_k · 1{t − t*_i = k} + Xβ + ε` over the
//! window's relative periods, the reference period omitted. Never-treated
//! rows carry all-zero indicators.

use cp_core::{EventWindow, Result, Specification};
use serde::Serialize;

use super::design::Regressors;
use super::estimation::{self, EstimationOptions, EstimationResult};
use super::panel::Panel;

/// Lead/lag coefficients of an event study.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventStudyResult {
    /// Specification name.
    pub specification: String,
    /// Relative periods with an estimated coefficient.
    pub relative_times: Vec<i64>,
    /// Point estimates per relative period.
    pub coefficients: Vec<f64>,
    /// Standard errors per relative period.
    pub std_errors: Vec<f64>,
    /// Two-sided p-values.
    pub p_values: Vec<f64>,
    /// Lower confidence bounds.
    pub ci_lower: Vec<f64>,
    /// Upper confidence bounds.
    pub ci_upper: Vec<f64>,
    /// Observations used.
    pub n_obs: usize,
    /// Omitted relative period.
    pub reference_period: i64,
    /// Full regression, controls included.
    pub regression: EstimationResult,
}

/// Run the event study of `spec` over `window`.
pub fn event_study(
    panel: &Panel,
    spec: &Specification,
    window: EventWindow,
    options: &EstimationOptions,
) -> Result<EventStudyResult> {
    let regression =
        estimation::estimate_with(panel, spec, None, Regressors::EventStudy(window), options)?;
    let relative_times = window.relative_times();
    let k = relative_times.len();
    // Indicator columns come first, in relative-time order.
    Ok(EventStudyResult {
        specification: spec.name.clone(),
        relative_times,
        coefficients: regression.coefficients[..k].to_vec(),
        std_errors: regression.std_errors[..k].to_vec(),
        p_values: regression.p_values[..k].to_vec(),
        ci_lower: regression.ci_lower[..k].to_vec(),
        ci_upper: regression.ci_upper[..k].to_vec(),
        n_obs: regression.n_obs,
        reference_period: window.reference,
        regression,
    })
}
