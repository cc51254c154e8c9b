//! Coefficient covariance: classical, heteroskedasticity-robust (HC1) and
//! cluster-robust (CR1) sandwich estimators, plus t-based inference.
//!
//! # References
//!
//! - White (1980), "A heteroskedasticity-consistent covariance matrix estimator."
//! - Liang & Zeger (1986); Cameron & Miller (2015), "A practitioner's guide to
//!   cluster-robust inference."

use std::collections::BTreeMap;

use cp_core::{Error, Result, Specification};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::design::{ClusterIds, DesignMatrix};
use super::ols::OlsFit;

/// Default confidence level for intervals.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Standard errors below this fraction of `|b|` are numerical zeros.
const DEGENERATE_SE_RATIO: f64 = 1e-12;

/// Covariance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Homoskedastic `σ² (X'X)⁻¹`.
    Classical,
    /// HC1 sandwich.
    Robust,
    /// CR1 sandwich over clusters.
    Cluster,
}

impl InferenceMode {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            InferenceMode::Classical => "classical",
            InferenceMode::Robust => "robust",
            InferenceMode::Cluster => "cluster",
        }
    }
}

/// Caller override of a specification's inference choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOverride {
    /// Classical standard errors.
    Classical,
    /// HC1, ignoring the specification's cluster column.
    Robust,
    /// Cluster on the given column.
    Cluster(String),
}

impl InferenceOverride {
    /// Parse `classical`, `robust`/`none`, or a column name.
    pub fn parse(s: &str) -> Self {
        match s {
            "classical" => InferenceOverride::Classical,
            "robust" | "none" => InferenceOverride::Robust,
            col => InferenceOverride::Cluster(col.to_string()),
        }
    }
}

/// Apply an override to a specification, returning the specification to
/// assemble (with the right cluster column) and the mode to use.
pub fn resolve_inference(
    spec: &Specification,
    over: Option<&InferenceOverride>,
) -> (Specification, InferenceMode) {
    match over {
        None => {
            let mode = if spec.cluster.is_some() {
                InferenceMode::Cluster
            } else {
                InferenceMode::Robust
            };
            (spec.clone(), mode)
        }
        Some(InferenceOverride::Classical) => (spec.with_cluster(None), InferenceMode::Classical),
        Some(InferenceOverride::Robust) => (spec.with_cluster(None), InferenceMode::Robust),
        Some(InferenceOverride::Cluster(col)) => {
            (spec.with_cluster(Some(col.clone())), InferenceMode::Cluster)
        }
    }
}

/// Covariance and the degrees of freedom used for t inference.
#[derive(Debug, Clone)]
pub struct Covariance {
    /// k × k coefficient covariance.
    pub vcov: DMatrix<f64>,
    /// Estimator used.
    pub mode: InferenceMode,
    /// Degrees of freedom of the reference t distribution.
    pub df: usize,
    /// Number of clusters (cluster mode only).
    pub n_clusters: Option<usize>,
}

impl Covariance {
    /// Standard errors (square roots of the diagonal, floored at zero).
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.vcov.nrows()).map(|j| self.vcov[(j, j)].max(0.0).sqrt()).collect()
    }
}

/// Estimate the coefficient covariance of `fit` under `mode`.
pub fn covariance(design: &DesignMatrix, fit: &OlsFit, mode: InferenceMode) -> Result<Covariance> {
    match mode {
        InferenceMode::Classical => Ok(classical(fit)),
        InferenceMode::Robust => Ok(hc1(&design.x, fit)),
        InferenceMode::Cluster => {
            let clusters = design.clusters.as_ref().ok_or_else(|| {
                Error::Validation("cluster-robust inference requested without a cluster column".into())
            })?;
            cr1(&design.x, fit, clusters)
        }
    }
}

fn classical(fit: &OlsFit) -> Covariance {
    let sigma2 = fit.rss / fit.df_resid as f64;
    Covariance {
        vcov: &fit.xtx_inv * sigma2,
        mode: InferenceMode::Classical,
        df: fit.df_resid,
        n_clusters: None,
    }
}

/// HC1: `n/(n − p) · (X'X)⁻¹ (Σ e_i² x_i x_i') (X'X)⁻¹`, with `p` every
/// estimated parameter including absorbed levels.
fn hc1(x: &DMatrix<f64>, fit: &OlsFit) -> Covariance {
    let n = x.nrows();
    let k = x.ncols();
    let mut meat = DMatrix::zeros(k, k);
    for i in 0..n {
        let e2 = fit.residuals[i] * fit.residuals[i];
        let row = x.row(i);
        for a in 0..k {
            let xa = row[a] * e2;
            for b in 0..k {
                meat[(a, b)] += xa * row[b];
            }
        }
    }
    let n_params = n - fit.df_resid;
    let correction = n as f64 / (n - n_params) as f64;
    Covariance {
        vcov: (&fit.xtx_inv * meat) * &fit.xtx_inv * correction,
        mode: InferenceMode::Robust,
        df: fit.df_resid,
        n_clusters: None,
    }
}

/// CR1: `G/(G−1) · (N−1)/(N−K) · (X'X)⁻¹ (Σ_g s_g s_g') (X'X)⁻¹` with
/// `s_g = X_g' e_g` and `K` the number of design columns.
///
/// Cluster scores are accumulated in cluster-id order, so the result does not
/// depend on the row order of the design.
fn cr1(x: &DMatrix<f64>, fit: &OlsFit, clusters: &ClusterIds) -> Result<Covariance> {
    let n = x.nrows();
    let k = x.ncols();
    let g = clusters.n_clusters;
    if g < 2 {
        return Err(Error::InsufficientClusters { column: clusters.column.clone(), n_clusters: g });
    }

    let mut scores: BTreeMap<usize, DVector<f64>> = BTreeMap::new();
    for (i, &cid) in clusters.ids.iter().enumerate() {
        let s = scores.entry(cid).or_insert_with(|| DVector::zeros(k));
        let e = fit.residuals[i];
        for j in 0..k {
            s[j] += x[(i, j)] * e;
        }
    }
    let mut meat = DMatrix::zeros(k, k);
    for s in scores.values() {
        meat += s * s.transpose();
    }

    let (g_f, n_f, k_f) = (g as f64, n as f64, k as f64);
    let correction = if n_f > k_f { (g_f / (g_f - 1.0)) * ((n_f - 1.0) / (n_f - k_f)) } else { 1.0 };
    Ok(Covariance {
        vcov: (&fit.xtx_inv * meat) * &fit.xtx_inv * correction,
        mode: InferenceMode::Cluster,
        df: g - 1,
        n_clusters: Some(g),
    })
}

/// Indices of coefficients whose standard error is numerically zero
/// relative to the estimate, e.g. when every cluster score cancels.
pub fn degenerate_terms(coefficients: &[f64], std_errors: &[f64]) -> Vec<usize> {
    coefficients
        .iter()
        .zip(std_errors)
        .enumerate()
        .filter(|(_, (b, se))| **se < DEGENERATE_SE_RATIO * b.abs())
        .map(|(j, _)| j)
        .collect()
}

/// Two-sided t inference for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TInference {
    /// t statistic.
    pub t_stat: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_low: f64,
    /// Upper confidence bound.
    pub ci_high: f64,
}

/// t statistics, p-values and intervals for every coefficient.
pub fn t_inference(
    coefficients: &[f64],
    std_errors: &[f64],
    df: usize,
    confidence: f64,
) -> Result<Vec<TInference>> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(Error::Validation(format!("confidence must be in (0, 1), got {confidence}")));
    }
    if df == 0 {
        return Err(Error::Computation("zero degrees of freedom for t inference".into()));
    }
    let t_dist = StudentsT::new(0.0, 1.0, df as f64)
        .map_err(|e| Error::Computation(format!("t distribution: {e}")))?;
    let crit = t_dist.inverse_cdf(0.5 + confidence / 2.0);
    Ok(coefficients
        .iter()
        .zip(std_errors)
        .map(|(&b, &se)| {
            let t_stat = b / se;
            let p_value = if t_stat.is_finite() {
                (2.0 * (1.0 - t_dist.cdf(t_stat.abs()))).clamp(0.0, 1.0)
            } else if se == 0.0 && b != 0.0 {
                0.0
            } else {
                f64::NAN
            };
            TInference { t_stat, p_value, ci_low: b - crit * se, ci_high: b + crit * se }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::econometrics::ols;
    use approx::assert_relative_eq;
    use cp_core::{FixedEffect, SpecificationConfig};

    fn design(clusters: Option<Vec<usize>>) -> DesignMatrix {
        let xs = [0.5, 1.5, -0.3, 2.2, 0.9, -1.1, 1.7, 0.2, -0.6, 1.3];
        let ys = [1.2, 3.1, 0.1, 4.9, 1.6, -1.8, 3.9, 0.9, -0.5, 2.2];
        let n = xs.len();
        let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { xs[i] } else { 1.0 });
        DesignMatrix {
            x,
            y: DVector::from_column_slice(&ys),
            column_names: vec!["treatment".into(), "const".into()],
            treatment_index: Some(0),
            rows: (0..n).collect(),
            clusters: clusters.map(|ids| {
                let n_clusters = ids.iter().max().map_or(0, |m| m + 1);
                ClusterIds { column: "g".into(), ids, n_clusters }
            }),
            fixed_effects: Vec::new(),
            df_absorbed: 0,
            dropped_rows: 0,
            excluded_rows: 0,
        }
    }

    #[test]
    fn classical_matches_closed_form() {
        let dm = design(None);
        let f = ols::fit(&dm).unwrap();
        let c = covariance(&dm, &f, InferenceMode::Classical).unwrap();
        let sigma2 = f.rss / 8.0;
        assert_relative_eq!(c.vcov[(0, 0)], sigma2 * f.xtx_inv[(0, 0)], epsilon = 1e-14);
        assert_eq!(c.df, 8);
    }

    #[test]
    fn one_cluster_per_row_is_hc1_up_to_scale() {
        let dm = design(Some((0..10).collect()));
        let f = ols::fit(&dm).unwrap();
        let hc = covariance(&dm, &f, InferenceMode::Robust).unwrap();
        let cr = covariance(&dm, &f, InferenceMode::Cluster).unwrap();
        // CR1 with G = N: G/(G−1)·(N−1)/(N−K) = N/(N−K), same as HC1 here.
        assert_relative_eq!(hc.vcov[(0, 0)], cr.vcov[(0, 0)], epsilon = 1e-12);
        assert_eq!(cr.df, 9);
        assert_eq!(cr.n_clusters, Some(10));
    }

    #[test]
    fn single_cluster_refused() {
        let dm = design(Some(vec![0; 10]));
        let f = ols::fit(&dm).unwrap();
        let err = covariance(&dm, &f, InferenceMode::Cluster).unwrap_err();
        assert!(matches!(err, Error::InsufficientClusters { n_clusters: 1, .. }));
    }

    #[test]
    fn t_inference_known_values() {
        // t = 2, df = 10: two-sided p ≈ 0.0734
        let inf = t_inference(&[2.0], &[1.0], 10, 0.95).unwrap();
        assert_relative_eq!(inf[0].p_value, 0.073_388, epsilon = 1e-5);
        // t_{0.975, 10} ≈ 2.228139
        assert_relative_eq!(inf[0].ci_high - 2.0, 2.228_139, epsilon = 1e-5);
        assert!(t_inference(&[2.0], &[1.0], 10, 1.5).is_err());
    }

    #[test]
    fn override_resolution() {
        let spec = Specification::from_config(
            "s",
            SpecificationConfig {
                outcome: "y".into(),
                treatment: "d".into(),
                controls: vec![],
                fixed_effects: vec![FixedEffect::Unit],
                cluster: Some("unit_id".into()),
                description: String::new(),
            },
        )
        .unwrap();
        let (s, m) = resolve_inference(&spec, None);
        assert_eq!((s.cluster.as_deref(), m), (Some("unit_id"), InferenceMode::Cluster));
        let (s, m) = resolve_inference(&spec, Some(&InferenceOverride::parse("none")));
        assert_eq!((s.cluster, m), (None, InferenceMode::Robust));
        let (s, m) = resolve_inference(&spec, Some(&InferenceOverride::parse("state")));
        assert_eq!((s.cluster.as_deref(), m), (Some("state"), InferenceMode::Cluster));
        let (_, m) = resolve_inference(&spec, Some(&InferenceOverride::parse("classical")));
        assert_eq!(m, InferenceMode::Classical);
    }

    #[test]
    fn vanishing_standard_errors_are_flagged() {
        let b = [1.5, 0.0, -2.0, 0.3];
        let se = [3.3e-16, 0.0, 0.4, 1e-3];
        assert_eq!(degenerate_terms(&b, &se), vec![0]);
    }
}
