//! End-to-end properties of the estimation stages on small panels.

use approx::assert_relative_eq;
use cp_core::{
    BASELINE, Error, ErrorKind, EventWindow, FixedEffect, LinkedTable, Specification,
    SpecificationConfig, SpecificationRegistry,
};
use cp_inference::econometrics::design::{self, ClusterIds, DesignMatrix};
use cp_inference::econometrics::variance::{self, InferenceMode, InferenceOverride};
use cp_inference::econometrics::{FixedEffectsSolver, ols};
use cp_inference::{
    EstimationOptions, Panel, PanelConfig, RunOptions, SyntheticPanel, run_estimation,
    run_event_study,
};
use nalgebra::{DMatrix, DVector};

fn spec(
    name: &str,
    controls: &[&str],
    fixed_effects: Vec<FixedEffect>,
    cluster: Option<&str>,
) -> Specification {
    Specification::from_config(
        name,
        SpecificationConfig {
            outcome: "outcome".into(),
            treatment: "treatment".into(),
            controls: controls.iter().map(|s| s.to_string()).collect(),
            fixed_effects,
            cluster: cluster.map(str::to_string),
            description: String::new(),
        },
    )
    .unwrap()
}

/// 2 units × 6 periods; unit 2 treated from period 3; covariates all zero.
fn twelve_row_table() -> LinkedTable {
    let unit = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
    let period = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let d = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let y = [1.0, 1.4, 2.1, 2.3, 3.2, 3.4, 2.2, 2.5, 3.3, 5.6, 6.1, 6.9];
    LinkedTable::new()
        .with_values("unit_id", &unit)
        .unwrap()
        .with_values("period", &period)
        .unwrap()
        .with_values("treatment", &d)
        .unwrap()
        .with_values("outcome", &y)
        .unwrap()
        .with_values("x1", &[0.0; 12])
        .unwrap()
        .with_values("x2", &[0.0; 12])
        .unwrap()
}

fn synthetic_panel(cfg: SyntheticPanel) -> Panel {
    Panel::build(&cfg.generate().unwrap(), PanelConfig::default()).unwrap()
}

#[test]
fn baseline_run_on_twelve_rows() {
    let panel = Panel::build(&twelve_row_table(), PanelConfig::default()).unwrap();
    let tables =
        run_estimation(&panel, &SpecificationRegistry::builtin(), &RunOptions::default()).unwrap();
    assert_eq!(tables.estimates.len(), 1);
    let row = &tables.estimates[0];
    assert_eq!(row.specification, BASELINE);
    assert_eq!(row.sample, "full");
    assert_eq!(row.n_obs, 12);
    assert_eq!(row.dropped_rows, 0);
    assert_eq!(row.inference, "cluster");
    assert_eq!(row.n_clusters, Some(2));
    // 12 − 1 − (2 + 6 − 1)
    assert_eq!(row.df_resid, 4);
    assert!(row.coefficient.is_finite());
    assert_eq!(tables.coefficients.len(), 1);
    assert!(tables.coefficients[0].is_treatment);
    assert_eq!(panel.timing()[1].onset, Some(3));
}

#[test]
fn two_cluster_twfe_flags_degenerate_standard_error() {
    // With two units the demeaned treatment and residuals are mirror images,
    // so both cluster scores vanish.
    let panel = Panel::build(&twelve_row_table(), PanelConfig::default()).unwrap();
    let registry = SpecificationRegistry::builtin();
    let est = cp_inference::econometrics::estimate(
        &panel,
        registry.baseline(),
        None,
        &EstimationOptions::default(),
    )
    .unwrap();
    assert_eq!(est.n_clusters, Some(2));
    assert_eq!(variance::degenerate_terms(&est.coefficients, &est.std_errors), vec![0]);
}

#[test]
fn unknown_specification_is_a_configuration_error() {
    let panel = Panel::build(&twelve_row_table(), PanelConfig::default()).unwrap();
    let opts = RunOptions { specification: "no_such_spec".into(), ..Default::default() };
    let err = run_estimation(&panel, &SpecificationRegistry::builtin(), &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("no_such_spec"));
    assert_eq!(err.identifiers(), vec!["no_such_spec".to_string()]);
}

#[test]
fn unknown_sample_is_a_configuration_error() {
    let panel = Panel::build(&twelve_row_table(), PanelConfig::default()).unwrap();
    let opts = RunOptions { sample: "north_only".into(), ..Default::default() };
    let err = run_estimation(&panel, &SpecificationRegistry::builtin(), &opts).unwrap_err();
    assert!(matches!(err, Error::UnknownSample(ref s) if s == "north_only"));
}

#[test]
fn all_treated_sample_has_no_identifying_variation() {
    let table = twelve_row_table();
    let mut t = table.clone();
    t.insert("treatment", cp_core::Column::Numeric(vec![Some(1.0); 12])).unwrap();
    let panel = Panel::build(&t, PanelConfig::default()).unwrap();
    let err = run_estimation(&panel, &SpecificationRegistry::builtin(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::NoIdentifyingVariation { ref column } if column == "treatment"));
    assert_eq!(err.kind(), ErrorKind::Identification);
}

#[test]
fn missing_control_column_is_named() {
    let panel = Panel::build(&twelve_row_table(), PanelConfig::default()).unwrap();
    let s = spec("with_x", &["income"], vec![FixedEffect::Unit], None);
    let err = cp_inference::econometrics::estimate(&panel, &s, None, &EstimationOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "income"));
}

#[test]
fn pooled_ols_matches_closed_form() {
    let cfg = SyntheticPanel {
        n_units: 8,
        n_periods: 5,
        cohort_onsets: vec![3],
        covariate_betas: vec![0.7, -0.4],
        seed: 11,
        ..Default::default()
    };
    let panel = synthetic_panel(cfg);
    let s = spec("pooled", &["covariate_1", "covariate_2"], vec![], None);
    let opts =
        EstimationOptions { inference: Some(InferenceOverride::Classical), ..Default::default() };
    let r = cp_inference::econometrics::estimate(&panel, &s, None, &opts).unwrap();
    assert_eq!(r.names, vec!["treatment", "covariate_1", "covariate_2", "const"]);

    let get = |name: &str| -> Vec<f64> {
        panel.numeric(name, "test").unwrap().iter().map(|v| v.unwrap()).collect()
    };
    let (d, x1, x2, y) = (get("treatment"), get("covariate_1"), get("covariate_2"), get("outcome"));
    let n = y.len();
    let x = DMatrix::from_fn(n, 4, |i, j| match j {
        0 => d[i],
        1 => x1[i],
        2 => x2[i],
        _ => 1.0,
    });
    let yv = DVector::from_vec(y);
    let xtx_inv = (x.transpose() * &x).try_inverse().unwrap();
    let beta = &xtx_inv * x.transpose() * &yv;
    let resid = &yv - &x * &beta;
    let sigma2 = resid.norm_squared() / (n - 4) as f64;
    for j in 0..4 {
        assert_relative_eq!(r.coefficients[j], beta[j], epsilon = 1e-9);
        assert_relative_eq!(r.std_errors[j], (sigma2 * xtx_inv[(j, j)]).sqrt(), epsilon = 1e-9);
    }
    assert_eq!(r.df_resid, n - 4);
    assert_eq!(r.inference, InferenceMode::Classical);
}

#[test]
fn twoway_fixed_effects_recover_effect_without_noise() {
    let cfg = SyntheticPanel {
        n_units: 12,
        n_periods: 8,
        cohort_onsets: vec![4, 7],
        never_treated_share: 0.25,
        effect: 1.5,
        noise_sd: 0.0,
        seed: 3,
        ..Default::default()
    };
    let panel = synthetic_panel(cfg);
    let s = spec("twfe", &[], vec![FixedEffect::Unit, FixedEffect::Period], Some("unit_id"));
    let r = cp_inference::econometrics::estimate(&panel, &s, None, &EstimationOptions::default())
        .unwrap();
    assert_relative_eq!(r.treatment_effect().unwrap(), 1.5, epsilon = 1e-7);
    assert_eq!(r.n_clusters, Some(12));
    assert_eq!(r.df_inference, 11);
}

#[test]
fn demeaning_is_idempotent_on_unbalanced_panel() {
    let cfg = SyntheticPanel { n_units: 15, n_periods: 6, seed: 5, ..Default::default() };
    let table = cfg.generate().unwrap();
    // Drop every seventh row to unbalance the panel.
    let keep: Vec<usize> = (0..table.n_rows()).filter(|i| i % 7 != 3).collect();
    let panel = Panel::build(&table.select_rows(&keep), PanelConfig::default()).unwrap();
    let solver = FixedEffectsSolver::new(vec![
        panel.group_of(FixedEffect::Unit).to_vec(),
        panel.group_of(FixedEffect::Period).to_vec(),
    ])
    .unwrap();
    let y: Vec<f64> =
        panel.numeric("outcome", "test").unwrap().iter().map(|v| v.unwrap()).collect();
    let once = solver.partial_out(&y).unwrap();
    let twice = solver.partial_out(&once).unwrap();
    for (a, b) in once.iter().zip(&twice) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
}

fn permuted(dm: &DesignMatrix, order: &[usize], relabel: impl Fn(usize) -> usize) -> DesignMatrix {
    let k = dm.x.ncols();
    let clusters = dm.clusters.as_ref().map(|c| ClusterIds {
        column: c.column.clone(),
        ids: order.iter().map(|&i| relabel(c.ids[i])).collect(),
        n_clusters: c.n_clusters,
    });
    DesignMatrix {
        x: DMatrix::from_fn(order.len(), k, |i, j| dm.x[(order[i], j)]),
        y: DVector::from_iterator(order.len(), order.iter().map(|&i| dm.y[i])),
        rows: order.iter().map(|&i| dm.rows[i]).collect(),
        clusters,
        ..dm.clone()
    }
}

#[test]
fn cluster_errors_ignore_row_order_and_cluster_labels() {
    let cfg = SyntheticPanel { n_units: 10, n_periods: 6, seed: 9, ..Default::default() };
    let panel = synthetic_panel(cfg);
    let s = spec("twfe", &[], vec![FixedEffect::Unit, FixedEffect::Period], Some("unit_id"));
    let dm = design::assemble(&panel, &s, None).unwrap();
    let se_of = |d: &DesignMatrix| {
        let fit = ols::fit(d).unwrap();
        variance::covariance(d, &fit, InferenceMode::Cluster).unwrap().std_errors()[0]
    };
    let base = se_of(&dm);

    let n = dm.n_obs();
    let order: Vec<usize> = (0..n).map(|i| (i * 7 + 3) % n).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..n).collect::<Vec<_>>());
    let g = dm.clusters.as_ref().unwrap().n_clusters;

    assert_relative_eq!(se_of(&permuted(&dm, &order, |c| c)), base, max_relative = 1e-10);
    assert_relative_eq!(se_of(&permuted(&dm, &order, |c| g - 1 - c)), base, max_relative = 1e-10);
}

#[test]
fn cluster_errors_ignore_label_values_in_input() {
    let table = twelve_row_table();
    let mut relabeled = table.clone();
    let names: Vec<Option<String>> = table
        .numeric("unit_id", "t")
        .unwrap()
        .iter()
        .map(|v| v.map(|u| if u == 1.0 { "zeta".to_string() } else { "alpha".to_string() }))
        .collect();
    relabeled.insert("state", cp_core::Column::Text(names.clone())).unwrap();
    let mut flipped = table.clone();
    let names_flipped: Vec<Option<String>> = names
        .iter()
        .map(|n| n.as_deref().map(|s| if s == "zeta" { "alpha".into() } else { "zeta".into() }))
        .collect();
    flipped.insert("state", cp_core::Column::Text(names_flipped)).unwrap();

    let s = spec("twfe", &[], vec![FixedEffect::Unit, FixedEffect::Period], Some("state"));
    let est = |t: &LinkedTable| {
        let panel = Panel::build(t, PanelConfig::default()).unwrap();
        cp_inference::econometrics::estimate(&panel, &s, None, &EstimationOptions::default())
            .unwrap()
    };
    let a = est(&relabeled);
    let b = est(&flipped);
    assert_relative_eq!(
        a.treatment_std_error().unwrap(),
        b.treatment_std_error().unwrap(),
        max_relative = 1e-12
    );
}

#[test]
fn event_study_recovers_dynamic_effect() {
    let cfg = SyntheticPanel {
        n_units: 20,
        n_periods: 8,
        cohort_onsets: vec![5, 7],
        never_treated_share: 0.3,
        effect: 1.0,
        effect_slope: 0.5,
        noise_sd: 0.0,
        seed: 21,
        ..Default::default()
    };
    let panel = synthetic_panel(cfg);
    let window = EventWindow { min_lag: -6, max_lag: 3, reference: -1, bin_endpoints: false };
    let es = run_event_study(&panel, &SpecificationRegistry::builtin(), window, &RunOptions::default())
        .unwrap();
    assert_eq!(es.relative_times, vec![-6, -5, -4, -3, -2, 0, 1, 2, 3]);
    assert_eq!(es.reference_period, -1);
    for (&k, &b) in es.relative_times.iter().zip(&es.coefficients) {
        let expected = if k >= 0 { 1.0 + 0.5 * k as f64 } else { 0.0 };
        assert_relative_eq!(b, expected, epsilon = 1e-6);
    }
}

#[test]
fn listwise_deletion_is_reported() {
    let mut t = twelve_row_table();
    let mut y = t.numeric("outcome", "t").unwrap().to_vec();
    y[2] = None;
    t.insert("outcome", cp_core::Column::Numeric(y)).unwrap();
    let panel = Panel::build(&t, PanelConfig::default()).unwrap();
    let tables =
        run_estimation(&panel, &SpecificationRegistry::builtin(), &RunOptions::default()).unwrap();
    assert_eq!(tables.estimates[0].n_obs, 11);
    assert_eq!(tables.estimates[0].dropped_rows, 1);
}
