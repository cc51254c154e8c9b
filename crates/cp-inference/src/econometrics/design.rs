//! Design-matrix assembly: listwise deletion, fixed-effect absorption and
//! rank checks.

use std::collections::BTreeMap;

use cp_core::{CellKey, Error, EventWindow, FixedEffect, Result, Specification};
use nalgebra::{DMatrix, DVector};

use super::hdfe::FixedEffectsSolver;
use super::panel::Panel;

/// Name of the intercept column added when no fixed effect is absorbed.
pub const INTERCEPT: &str = "const";

/// Relative norm below which a demeaned column counts as absorbed.
const ABSORBED_TOL: f64 = 1e-8;

/// Relative singular value below which the design counts as rank-deficient.
const RANK_TOL: f64 = 1e-9;

/// Dense cluster assignment of the estimation rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIds {
    /// Clustering column.
    pub column: String,
    /// Cluster index per estimation row, numbered in key order.
    pub ids: Vec<usize>,
    /// Number of distinct clusters.
    pub n_clusters: usize,
}

/// Numeric design of one specification on one sample.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Regressors after absorption (n × k).
    pub x: DMatrix<f64>,
    /// Response after absorption.
    pub y: DVector<f64>,
    /// Column names, aligned with `x`.
    pub column_names: Vec<String>,
    /// Position of the treatment column; `None` for event-study designs.
    pub treatment_index: Option<usize>,
    /// Panel row index of each estimation row.
    pub rows: Vec<usize>,
    /// Cluster assignment when the specification clusters.
    pub clusters: Option<ClusterIds>,
    /// Fixed effects absorbed.
    pub fixed_effects: Vec<FixedEffect>,
    /// Parameters absorbed by the fixed effects (intercept included).
    pub df_absorbed: usize,
    /// Rows removed by listwise deletion.
    pub dropped_rows: usize,
    /// Rows removed by the sample restriction.
    pub excluded_rows: usize,
}

impl DesignMatrix {
    /// Number of estimation rows.
    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    /// Number of regressors.
    pub fn n_regressors(&self) -> usize {
        self.x.ncols()
    }
}

/// What the regressors of interest are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regressors {
    /// The specification's treatment indicator.
    Treatment,
    /// Lead/lag indicators of event time.
    EventStudy(EventWindow),
}

/// Assemble the design of `spec` on the rows of `panel` selected by `mask`.
pub fn assemble(panel: &Panel, spec: &Specification, mask: Option<&[bool]>) -> Result<DesignMatrix> {
    assemble_with(panel, spec, mask, Regressors::Treatment)
}

/// Assemble the design of `spec` with the given regressors of interest.
pub fn assemble_with(
    panel: &Panel,
    spec: &Specification,
    mask: Option<&[bool]>,
    regressors: Regressors,
) -> Result<DesignMatrix> {
    let n_rows = panel.n_rows();
    if let Some(m) = mask {
        if m.len() != n_rows {
            return Err(Error::Validation(format!(
                "sample mask length ({}) != panel rows ({})",
                m.len(),
                n_rows
            )));
        }
    }
    if let Regressors::EventStudy(w) = regressors {
        w.validate()?;
    }

    let y_raw = panel.numeric(&spec.outcome, "outcome")?;
    let d_raw = panel.numeric(&spec.treatment, "treatment")?;
    let controls_raw: Vec<&[Option<f64>]> =
        spec.controls.iter().map(|c| panel.numeric(c, "control")).collect::<Result<_>>()?;
    let cluster_col = match &spec.cluster {
        Some(c) => Some(panel.column(c, "cluster")?),
        None => None,
    };

    let candidates: Vec<usize> =
        (0..n_rows).filter(|&i| mask.map_or(true, |m| m[i])).collect();
    let excluded_rows = n_rows - candidates.len();

    let observed = |v: Option<f64>| v.is_some_and(f64::is_finite);
    let rows: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| {
            observed(y_raw[i])
                && observed(d_raw[i])
                && controls_raw.iter().all(|c| observed(c[i]))
                && cluster_col.map_or(true, |c| c.key(i).is_some())
        })
        .collect();
    let dropped_rows = candidates.len() - rows.len();
    if dropped_rows > 0 {
        log::warn!(
            "specification '{}': {} row(s) dropped for missing values",
            spec.name,
            dropped_rows
        );
    }
    if rows.is_empty() {
        return Err(Error::EmptySample(format!(
            "specification '{}': {} candidate row(s), none complete",
            spec.name,
            candidates.len()
        )));
    }
    let n = rows.len();
    let value = |col: &[Option<f64>], i: usize| col[i].unwrap_or(f64::NAN);

    let mut names: Vec<String> = Vec::new();
    let mut cols: Vec<Vec<f64>> = Vec::new();
    let treatment_index = match regressors {
        Regressors::Treatment => {
            let d: Vec<f64> = rows.iter().map(|&i| value(d_raw, i)).collect();
            if d.iter().all(|&v| v == d[0]) {
                return Err(Error::NoIdentifyingVariation { column: spec.treatment.clone() });
            }
            names.push(spec.treatment.clone());
            cols.push(d);
            Some(0)
        }
        Regressors::EventStudy(w) => {
            let event_time = panel.event_time();
            for k in w.relative_times() {
                let col: Vec<f64> = rows
                    .iter()
                    .map(|&i| match event_time[i] {
                        Some(et) => {
                            let et =
                                if w.bin_endpoints { et.clamp(w.min_lag, w.max_lag) } else { et };
                            if et == k { 1.0 } else { 0.0 }
                        }
                        None => 0.0,
                    })
                    .collect();
                names.push(format!("event_{k}"));
                cols.push(col);
            }
            None
        }
    };
    for (name, raw) in spec.controls.iter().zip(&controls_raw) {
        names.push(name.clone());
        cols.push(rows.iter().map(|&i| value(raw, i)).collect());
    }

    let mut y: Vec<f64> = rows.iter().map(|&i| value(y_raw, i)).collect();

    let mut df_absorbed = 0;
    if spec.has_fixed_effects() {
        let groups: Vec<Vec<usize>> = spec
            .fixed_effects
            .iter()
            .map(|&fe| {
                let g = panel.group_of(fe);
                rows.iter().map(|&i| g[i]).collect()
            })
            .collect();
        let solver = FixedEffectsSolver::new(groups)?;
        df_absorbed = solver.degrees_of_freedom_absorbed();
        solver.partial_out_in_place(&mut y)?;

        let mut absorbed = Vec::new();
        for (j, col) in cols.iter_mut().enumerate() {
            let before = norm(col);
            solver.partial_out_in_place(col)?;
            let after = norm(col);
            if before == 0.0 || after <= ABSORBED_TOL * before {
                if treatment_index == Some(j) {
                    return Err(Error::NoIdentifyingVariation { column: spec.treatment.clone() });
                }
                absorbed.push(names[j].clone());
            }
        }
        if !absorbed.is_empty() {
            return Err(Error::CollinearDesign { columns: absorbed });
        }
    } else {
        names.push(INTERCEPT.to_string());
        cols.push(vec![1.0; n]);
    }

    let empty: Vec<String> = names
        .iter()
        .zip(&cols)
        .filter(|(_, c)| c.iter().all(|&v| v == 0.0))
        .map(|(name, _)| name.clone())
        .collect();
    if !empty.is_empty() {
        return Err(Error::CollinearDesign { columns: empty });
    }

    let k = cols.len();
    let x = DMatrix::from_fn(n, k, |i, j| cols[j][i]);
    check_full_rank(&x, &names)?;

    let clusters = match (cluster_col, &spec.cluster) {
        (Some(col), Some(name)) => {
            let mut index: BTreeMap<CellKey, usize> = BTreeMap::new();
            let keys: Vec<CellKey> = rows.iter().filter_map(|&i| col.key(i)).collect();
            for key in &keys {
                index.entry(key.clone()).or_insert(0);
            }
            for (dense, slot) in index.values_mut().enumerate() {
                *slot = dense;
            }
            let ids = keys.iter().map(|key| index[key]).collect();
            Some(ClusterIds { column: name.clone(), ids, n_clusters: index.len() })
        }
        _ => None,
    };

    log::debug!(
        "design '{}': n={}, k={}, df_absorbed={}, dropped={}, excluded={}",
        spec.name,
        n,
        k,
        df_absorbed,
        dropped_rows,
        excluded_rows
    );

    Ok(DesignMatrix {
        x,
        y: DVector::from_vec(y),
        column_names: names,
        treatment_index,
        rows,
        clusters,
        fixed_effects: spec.fixed_effects.clone(),
        df_absorbed,
        dropped_rows,
        excluded_rows,
    })
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Refuse rank-deficient designs, naming the columns that depend on
/// earlier ones.
///
/// Columns are scaled to unit norm first so the singular-value test reflects
/// collinearity rather than units of measurement.
fn check_full_rank(x: &DMatrix<f64>, names: &[String]) -> Result<()> {
    let k = x.ncols();
    if x.nrows() < k {
        return Err(Error::CollinearDesign { columns: names[x.nrows()..].to_vec() });
    }
    let mut scaled = x.clone();
    for mut col in scaled.column_iter_mut() {
        let s = col.norm();
        if s > 0.0 {
            col /= s;
        }
    }
    let sv = scaled.clone().svd(false, false).singular_values;
    let max_sv = sv.max();
    let rank = sv.iter().filter(|&&s| s > RANK_TOL * max_sv.max(1.0)).count();
    if rank == k {
        return Ok(());
    }

    // Greedy Gram–Schmidt in column order to find the dependent columns.
    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(rank);
    let mut offending = Vec::new();
    for (j, name) in names.iter().enumerate() {
        let mut v: DVector<f64> = scaled.column(j).into_owned();
        for _ in 0..2 {
            for q in &basis {
                let proj = q.dot(&v);
                v.axpy(-proj, q, 1.0);
            }
        }
        let r = v.norm();
        if r <= 1e-7 {
            offending.push(name.clone());
        } else {
            basis.push(v / r);
        }
    }
    if offending.is_empty() {
        // Rank deficiency spread across columns; report them all.
        offending = names.to_vec();
    }
    Err(Error::CollinearDesign { columns: offending })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::econometrics::panel::PanelConfig;
    use cp_core::{LinkedTable, SpecificationConfig};

    fn panel_3x4() -> Panel {
        // 3 units × 4 periods; unit 3 treated from period 3.
        let mut unit = Vec::new();
        let mut period = Vec::new();
        let mut d = Vec::new();
        let mut y = Vec::new();
        let mut x1 = Vec::new();
        let mut unit_const = Vec::new();
        for u in 1..=3 {
            for t in 1..=4 {
                unit.push(u as f64);
                period.push(t as f64);
                let treated = u == 3 && t >= 3;
                d.push(if treated { 1.0 } else { 0.0 });
                y.push(u as f64 + 0.5 * t as f64 + if treated { 2.0 } else { 0.0 });
                x1.push(((u * 7 + t * 3) % 5) as f64);
                unit_const.push(10.0 * u as f64);
            }
        }
        let table = LinkedTable::new()
            .with_values("unit_id", &unit)
            .unwrap()
            .with_values("period", &period)
            .unwrap()
            .with_values("treatment", &d)
            .unwrap()
            .with_values("outcome", &y)
            .unwrap()
            .with_values("x1", &x1)
            .unwrap()
            .with_values("unit_const", &unit_const)
            .unwrap();
        Panel::build(&table, PanelConfig::default()).unwrap()
    }

    fn spec(controls: &[&str], fes: Vec<FixedEffect>, cluster: Option<&str>) -> Specification {
        Specification::from_config(
            "test",
            SpecificationConfig {
                outcome: "outcome".into(),
                treatment: "treatment".into(),
                controls: controls.iter().map(|s| s.to_string()).collect(),
                fixed_effects: fes,
                cluster: cluster.map(str::to_string),
                description: String::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn pooled_design_gets_intercept() {
        let dm = assemble(&panel_3x4(), &spec(&["x1"], vec![], None), None).unwrap();
        assert_eq!(dm.column_names, vec!["treatment", "x1", INTERCEPT]);
        assert_eq!(dm.n_obs(), 12);
        assert_eq!(dm.df_absorbed, 0);
        assert_eq!(dm.treatment_index, Some(0));
    }

    #[test]
    fn twoway_design_absorbs_effects() {
        let s = spec(&[], vec![FixedEffect::Unit, FixedEffect::Period], Some("unit_id"));
        let dm = assemble(&panel_3x4(), &s, None).unwrap();
        assert_eq!(dm.column_names, vec!["treatment"]);
        assert_eq!(dm.df_absorbed, 3 + 4 - 1);
        let clusters = dm.clusters.unwrap();
        assert_eq!(clusters.n_clusters, 3);
        assert_eq!(clusters.ids, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn control_collinear_with_unit_fe_is_named() {
        let s = spec(&["unit_const"], vec![FixedEffect::Unit], None);
        let err = assemble(&panel_3x4(), &s, None).unwrap_err();
        match err {
            Error::CollinearDesign { columns } => assert_eq!(columns, vec!["unit_const"]),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn collinear_controls_are_named() {
        let mut panel_table = panel_3x4().table().clone();
        let x1 = panel_table.numeric("x1", "t").unwrap().to_vec();
        let x2: Vec<Option<f64>> = x1.iter().map(|v| v.map(|x| 2.0 * x + 0.0)).collect();
        panel_table.insert("x2", cp_core::Column::Numeric(x2)).unwrap();
        let panel = Panel::build(&panel_table, PanelConfig::default()).unwrap();
        let err = assemble(&panel, &spec(&["x1", "x2"], vec![], None), None).unwrap_err();
        match err {
            Error::CollinearDesign { columns } => assert_eq!(columns, vec!["x2"]),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn constant_treatment_refused() {
        let mut t = panel_3x4().table().clone();
        t.insert("treatment", cp_core::Column::Numeric(vec![Some(1.0); 12])).unwrap();
        let panel = Panel::build(&t, PanelConfig::default()).unwrap();
        let err = assemble(&panel, &spec(&[], vec![], None), None).unwrap_err();
        assert!(matches!(err, Error::NoIdentifyingVariation { .. }));
    }

    #[test]
    fn listwise_deletion_counts_rows() {
        let mut t = panel_3x4().table().clone();
        let mut x1 = t.numeric("x1", "t").unwrap().to_vec();
        x1[0] = None;
        x1[5] = None;
        t.insert("x1", cp_core::Column::Numeric(x1)).unwrap();
        let panel = Panel::build(&t, PanelConfig::default()).unwrap();
        let dm = assemble(&panel, &spec(&["x1"], vec![], None), None).unwrap();
        assert_eq!(dm.n_obs(), 10);
        assert_eq!(dm.dropped_rows, 2);
    }

    #[test]
    fn mask_excludes_rows_and_empty_sample_fails() {
        let panel = panel_3x4();
        let s = spec(&[], vec![], None);
        let mask: Vec<bool> = panel.periods().iter().map(|&p| p >= 2).collect();
        let dm = assemble(&panel, &s, Some(&mask)).unwrap();
        assert_eq!(dm.n_obs(), 9);
        assert_eq!(dm.excluded_rows, 3);
        assert_eq!(dm.dropped_rows, 0);

        let none = vec![false; panel.n_rows()];
        assert!(matches!(assemble(&panel, &s, Some(&none)), Err(Error::EmptySample(_))));
    }

    #[test]
    fn event_study_columns() {
        let window = EventWindow { min_lag: -2, max_lag: 1, reference: -1, bin_endpoints: false };
        let s = spec(&[], vec![FixedEffect::Unit, FixedEffect::Period], Some("unit_id"));
        let dm =
            assemble_with(&panel_3x4(), &s, None, Regressors::EventStudy(window)).unwrap();
        assert_eq!(dm.column_names, vec!["event_-2", "event_0", "event_1"]);
        assert_eq!(dm.treatment_index, None);
    }
}
