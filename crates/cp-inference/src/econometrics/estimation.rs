//! One estimation: assemble, fit, and attach inference.

use cp_core::{Error, Result, Specification};
use serde::Serialize;

use super::design::{self, DesignMatrix, Regressors};
use super::ols;
use super::panel::Panel;
use super::variance::{self, InferenceMode, InferenceOverride, DEFAULT_CONFIDENCE};

/// Label of the unrestricted sample.
pub const FULL_SAMPLE: &str = "full";

/// Options for one estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationOptions {
    /// Label recorded for the sample.
    pub sample: String,
    /// Override of the specification's inference choice.
    pub inference: Option<InferenceOverride>,
    /// Confidence level of the intervals.
    pub confidence: f64,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self { sample: FULL_SAMPLE.into(), inference: None, confidence: DEFAULT_CONFIDENCE }
    }
}

/// Coefficients and inference of one specification on one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
    /// Specification name.
    pub specification: String,
    /// Sample label.
    pub sample: String,
    /// Observations used.
    pub n_obs: usize,
    /// Rows removed by listwise deletion.
    pub dropped_rows: usize,
    /// Rows removed by the sample restriction.
    pub excluded_rows: usize,
    /// Regressor names.
    pub names: Vec<String>,
    /// Point estimates.
    pub coefficients: Vec<f64>,
    /// Standard errors.
    pub std_errors: Vec<f64>,
    /// t statistics.
    pub t_stats: Vec<f64>,
    /// Two-sided p-values.
    pub p_values: Vec<f64>,
    /// Lower confidence bounds.
    pub ci_lower: Vec<f64>,
    /// Upper confidence bounds.
    pub ci_upper: Vec<f64>,
    /// Confidence level of the bounds.
    pub confidence: f64,
    /// `n − k − df_absorbed`.
    pub df_resid: usize,
    /// Degrees of freedom of the reference t distribution.
    pub df_inference: usize,
    /// Parameters absorbed by fixed effects.
    pub df_absorbed: usize,
    /// Covariance estimator.
    pub inference: InferenceMode,
    /// Clustering column (cluster mode only).
    pub cluster: Option<String>,
    /// Number of clusters (cluster mode only).
    pub n_clusters: Option<usize>,
    /// R² after absorption.
    pub r_squared_within: f64,
    /// Position of the treatment coefficient.
    pub treatment_index: Option<usize>,
}

impl EstimationResult {
    /// Treatment coefficient.
    pub fn treatment_effect(&self) -> Option<f64> {
        self.treatment_index.map(|j| self.coefficients[j])
    }

    /// Standard error of the treatment coefficient.
    pub fn treatment_std_error(&self) -> Option<f64> {
        self.treatment_index.map(|j| self.std_errors[j])
    }

    /// p-value of the treatment coefficient.
    pub fn treatment_p_value(&self) -> Option<f64> {
        self.treatment_index.map(|j| self.p_values[j])
    }

    /// Look up a coefficient by regressor name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|j| self.coefficients[j])
    }
}

/// Estimate `spec` on the panel rows selected by `mask`.
pub fn estimate(
    panel: &Panel,
    spec: &Specification,
    mask: Option<&[bool]>,
    options: &EstimationOptions,
) -> Result<EstimationResult> {
    estimate_with(panel, spec, mask, Regressors::Treatment, options)
}

/// [`estimate`] with explicit regressors of interest.
pub fn estimate_with(
    panel: &Panel,
    spec: &Specification,
    mask: Option<&[bool]>,
    regressors: Regressors,
    options: &EstimationOptions,
) -> Result<EstimationResult> {
    let (spec, mode) = variance::resolve_inference(spec, options.inference.as_ref());
    let design = design::assemble_with(panel, &spec, mask, regressors)?;
    estimate_design(&spec.name, &design, mode, options)
}

/// Fit an assembled design and attach inference.
pub fn estimate_design(
    specification: &str,
    design: &DesignMatrix,
    mode: InferenceMode,
    options: &EstimationOptions,
) -> Result<EstimationResult> {
    let fit = ols::fit(design)?;
    let cov = variance::covariance(design, &fit, mode)?;
    let coefficients: Vec<f64> = fit.coefficients.iter().copied().collect();
    let std_errors = cov.std_errors();
    if let Some(j) = std_errors.iter().position(|se| !se.is_finite()) {
        return Err(Error::Computation(format!(
            "non-finite standard error for '{}'",
            design.column_names[j]
        )));
    }
    let degenerate = variance::degenerate_terms(&coefficients, &std_errors);
    if !degenerate.is_empty() {
        let names: Vec<&str> =
            degenerate.iter().map(|&j| design.column_names[j].as_str()).collect();
        log::warn!(
            "'{}' on '{}': {} standard error numerically zero for {} ({} cluster(s)); p-values and intervals are not informative",
            specification,
            options.sample,
            mode.as_str(),
            names.join(", "),
            cov.n_clusters.map_or_else(|| "no".to_string(), |g| g.to_string())
        );
    }
    let inf = variance::t_inference(&coefficients, &std_errors, cov.df, options.confidence)?;

    log::debug!(
        "estimated '{}' on '{}': n={}, mode={}, df={}",
        specification,
        options.sample,
        design.n_obs(),
        mode.as_str(),
        cov.df
    );

    Ok(EstimationResult {
        specification: specification.to_string(),
        sample: options.sample.clone(),
        n_obs: design.n_obs(),
        dropped_rows: design.dropped_rows,
        excluded_rows: design.excluded_rows,
        names: design.column_names.clone(),
        coefficients,
        std_errors,
        t_stats: inf.iter().map(|i| i.t_stat).collect(),
        p_values: inf.iter().map(|i| i.p_value).collect(),
        ci_lower: inf.iter().map(|i| i.ci_low).collect(),
        ci_upper: inf.iter().map(|i| i.ci_high).collect(),
        confidence: options.confidence,
        df_resid: fit.df_resid,
        df_inference: cov.df,
        df_absorbed: design.df_absorbed,
        inference: mode,
        cluster: design.clusters.as_ref().map(|c| c.column.clone()),
        n_clusters: cov.n_clusters,
        r_squared_within: fit.r_squared_within,
        treatment_index: design.treatment_index,
    })
}
