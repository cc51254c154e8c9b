//! Robustness menus and placebo distributions.

use std::collections::BTreeMap;

use cp_core::{ErrorKind, SpecificationRegistry, TestType};
use cp_inference::econometrics::{placebo, robustness};
use cp_inference::{
    EstimationOptions, Panel, PanelConfig, Perturbation, PlaceboConfig, PlaceboMethod,
    RunOptions, SampleRestriction, SyntheticPanel, estimate_robustness, run_placebo,
};

fn panel(seed: u64) -> Panel {
    let cfg = SyntheticPanel {
        n_units: 24,
        n_periods: 8,
        cohort_onsets: vec![4, 6],
        never_treated_share: 0.5,
        effect: 2.0,
        noise_sd: 0.5,
        seed,
        ..Default::default()
    };
    Panel::build(&cfg.generate().unwrap(), PanelConfig::default()).unwrap()
}

#[test]
fn one_emptying_restriction_fails_alone() {
    let p = panel(1);
    let registry = SpecificationRegistry::builtin();
    let menu = vec![
        Perturbation::Sample(SampleRestriction::DropFirstPeriods { k: 1 }),
        Perturbation::Sample(SampleRestriction::DropFirstPeriods { k: 100 }),
        Perturbation::Sample(SampleRestriction::BalancedOnly),
        Perturbation::AlternativeSpecification("pooled".into()),
        Perturbation::PlaceboLead(2),
    ];
    let tests = robustness::run(&p, &registry, &menu, &EstimationOptions::default()).unwrap();
    assert_eq!(tests.len(), menu.len());
    let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["drop_first_1", "drop_first_100", "balanced_only", "spec_pooled", "placebo_lead_2"]
    );

    let failed: Vec<_> = tests.iter().filter(|t| t.is_failure()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "drop_first_100");
    let failure = failed[0].outcome.as_ref().unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Identification);

    for t in tests.iter().filter(|t| !t.is_failure()) {
        let r = t.outcome.as_ref().unwrap();
        assert!(r.treatment_effect().unwrap().is_finite(), "{}", t.name);
    }
    assert_eq!(tests[4].test_type, TestType::Placebo);
    assert_eq!(tests[3].specification, "pooled");
}

#[test]
fn default_menu_tables_carry_failure_markers() {
    let p = panel(2);
    let registry = SpecificationRegistry::builtin();
    let menu = vec![
        Perturbation::Sample(SampleRestriction::DropLastPeriods { k: 50 }),
        Perturbation::AlternativeSpecification("missing_spec".into()),
        Perturbation::Sample(SampleRestriction::DropLastPeriods { k: 1 }),
    ];
    let tables = estimate_robustness(&p, &registry, Some(&menu), &RunOptions::default()).unwrap();
    assert_eq!(tables.robustness.len(), 3);
    assert!(tables.robustness[0].failure_marker);
    assert_eq!(tables.robustness[0].failure_kind.as_deref(), Some("identification"));
    assert!(tables.robustness[1].failure_marker);
    assert_eq!(tables.robustness[1].failure_kind.as_deref(), Some("configuration"));
    assert!(!tables.robustness[2].failure_marker);
    assert!(tables.robustness[2].coefficient.is_some());

    let full = estimate_robustness(&p, &registry, None, &RunOptions::default()).unwrap();
    assert_eq!(full.robustness.len(), robustness::default_menu(&registry).len());
}

#[test]
fn duplicate_test_names_are_rejected() {
    let p = panel(3);
    let registry = SpecificationRegistry::builtin();
    let menu = vec![Perturbation::PlaceboLead(1), Perturbation::PlaceboLead(1)];
    assert!(robustness::run(&p, &registry, &menu, &EstimationOptions::default()).is_err());
}

#[test]
fn placebo_draws_are_reproducible() {
    let p = panel(4);
    let registry = SpecificationRegistry::builtin();
    let spec = registry.baseline();
    let cfg = PlaceboConfig { draws: 12, seed: 7, method: PlaceboMethod::Permute };
    let a = placebo::run(&p, spec, &cfg, &EstimationOptions::default()).unwrap();
    let b = placebo::run(&p, spec, &cfg, &EstimationOptions::default()).unwrap();

    let coefs = |d: &placebo::PlaceboDistribution| -> Vec<Option<u64>> {
        d.draws.iter().map(|t| t.coefficient().map(f64::to_bits)).collect()
    };
    assert_eq!(coefs(&a), coefs(&b));
    assert_eq!(a.summary, b.summary);
    for (i, t) in a.draws.iter().enumerate() {
        assert_eq!(t.draw_index, i);
        assert_eq!(t.seed, 7 + i as u64);
    }

    let other = PlaceboConfig { seed: 8, ..cfg };
    let c = placebo::run(&p, spec, &other, &EstimationOptions::default()).unwrap();
    assert_ne!(coefs(&a), coefs(&c));
}

#[test]
fn permuted_draws_preserve_cohort_sizes() {
    let p = panel(5);
    let registry = SpecificationRegistry::builtin();
    let cfg = PlaceboConfig { draws: 8, seed: 1, method: PlaceboMethod::Permute };
    let dist = placebo::run(&p, registry.baseline(), &cfg, &EstimationOptions::default()).unwrap();
    let sizes = |onsets: &[Option<i64>]| {
        let mut m: BTreeMap<Option<i64>, usize> = BTreeMap::new();
        for o in onsets {
            *m.entry(*o).or_default() += 1;
        }
        m
    };
    let truth = sizes(&p.onsets());
    for d in &dist.draws {
        assert_eq!(sizes(&d.onsets), truth);
    }
}

#[test]
fn placebo_summary_against_strong_effect() {
    let p = panel(6);
    let registry = SpecificationRegistry::builtin();
    let cfg = PlaceboConfig { draws: 20, seed: 42, method: PlaceboMethod::Permute };
    let tables = run_placebo(&p, &registry, &cfg, &RunOptions::default()).unwrap();
    assert_eq!(tables.estimates.len(), 1);
    assert_eq!(tables.placebo.len(), 21);
    let summary = tables.placebo.last().unwrap();
    assert_eq!(summary.kind, "summary");
    assert_eq!(summary.draw_index, None);
    let n_ok = summary.n_successful.unwrap();
    assert!(n_ok > 0);
    // A true effect of 2 with noise 0.5 dominates reshuffled timing.
    assert!(summary.empirical_p_value.unwrap() < 0.2);
    assert!(summary.placebo_mean.unwrap().abs() < summary.coefficient.unwrap().abs());
}

#[test]
fn shift_method_uses_pre_treatment_rows() {
    let p = panel(7);
    let registry = SpecificationRegistry::builtin();
    let cfg = PlaceboConfig { draws: 5, seed: 3, method: PlaceboMethod::Shift { max_offset: 2 } };
    let dist = placebo::run(&p, registry.baseline(), &cfg, &EstimationOptions::default()).unwrap();
    let n_pre = p
        .timing()
        .iter()
        .map(|t| match t.onset {
            Some(o) => p.period_levels().iter().filter(|&&q| q < o).count(),
            None => p.n_periods(),
        })
        .sum::<usize>();
    for d in &dist.draws {
        if let Ok(r) = &d.outcome {
            assert_eq!(r.n_obs, n_pre);
        }
    }
    assert!(dist.summary.n_successful > 0);
}
