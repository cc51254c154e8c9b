//! Robustness menu: re-estimation under sample restrictions, alternative
//! specifications and in-time placebo leads.
//!
//! Perturbations are independent and run on the rayon pool. A perturbation
//! that cannot be estimated yields a failure record; it never aborts the
//! batch.

use std::collections::HashSet;

use cp_core::{Error, Failure, Result, Specification, SpecificationRegistry, TestType};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::estimation::{self, EstimationOptions, EstimationResult, FULL_SAMPLE};
use super::panel::Panel;
use super::sample::SampleRestriction;

/// Default in-time placebo lead, in periods.
pub const DEFAULT_PLACEBO_LEAD: usize = 2;

/// One entry of the robustness menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    /// Baseline specification on a restricted sample.
    Sample(SampleRestriction),
    /// A registry entry on the full sample.
    AlternativeSpecification(String),
    /// Baseline with every onset moved `k` periods earlier, estimated on
    /// pre-treatment rows only.
    PlaceboLead(usize),
}

impl Perturbation {
    /// Test name.
    pub fn name(&self) -> String {
        match self {
            Perturbation::Sample(r) => r.label(),
            Perturbation::AlternativeSpecification(s) => format!("spec_{s}"),
            Perturbation::PlaceboLead(k) => format!("placebo_lead_{k}"),
        }
    }

    /// Test category.
    pub fn test_type(&self) -> TestType {
        match self {
            Perturbation::Sample(_) => TestType::SampleRestriction,
            Perturbation::AlternativeSpecification(_) => TestType::AlternativeSpecification,
            Perturbation::PlaceboLead(_) => TestType::Placebo,
        }
    }
}

/// Drop-first, drop-last, balanced-only, every non-baseline specification,
/// and a placebo lead.
pub fn default_menu(registry: &SpecificationRegistry) -> Vec<Perturbation> {
    let mut menu = vec![
        Perturbation::Sample(SampleRestriction::DropFirstPeriods { k: 1 }),
        Perturbation::Sample(SampleRestriction::DropLastPeriods { k: 1 }),
        Perturbation::Sample(SampleRestriction::BalancedOnly),
    ];
    menu.extend(
        registry.alternatives().map(|s| Perturbation::AlternativeSpecification(s.name.clone())),
    );
    menu.push(Perturbation::PlaceboLead(DEFAULT_PLACEBO_LEAD));
    menu
}

/// Outcome of one perturbation.
#[derive(Debug, Clone, Serialize)]
pub struct RobustnessTest {
    /// Test name, unique within the run.
    pub name: String,
    /// Test category.
    pub test_type: TestType,
    /// Specification estimated.
    pub specification: String,
    /// Estimate, or why there is none.
    pub outcome: std::result::Result<EstimationResult, Failure>,
}

impl RobustnessTest {
    /// Whether the perturbation failed.
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Run every perturbation of `menu` against the baseline of `registry`.
///
/// Output order follows `menu`. Errors only when two perturbations share a
/// name.
pub fn run(
    panel: &Panel,
    registry: &SpecificationRegistry,
    menu: &[Perturbation],
    options: &EstimationOptions,
) -> Result<Vec<RobustnessTest>> {
    let mut seen = HashSet::new();
    for p in menu {
        let name = p.name();
        if !seen.insert(name.clone()) {
            return Err(Error::Validation(format!("duplicate robustness test '{name}'")));
        }
    }

    let baseline = registry.baseline();
    let tests: Vec<RobustnessTest> = menu
        .par_iter()
        .map(|p| {
            let name = p.name();
            let specification = match p {
                Perturbation::AlternativeSpecification(s) => s.clone(),
                _ => baseline.name.clone(),
            };
            let outcome = run_one(panel, registry, baseline, p, &name, options).map_err(|e| {
                log::warn!("robustness test '{}' failed: {}", name, e);
                Failure::from(&e)
            });
            RobustnessTest { name, test_type: p.test_type(), specification, outcome }
        })
        .collect();

    let n_failed = tests.iter().filter(|t| t.is_failure()).count();
    log::debug!("robustness: {} test(s), {} failed", tests.len(), n_failed);
    Ok(tests)
}

fn run_one(
    panel: &Panel,
    registry: &SpecificationRegistry,
    baseline: &Specification,
    perturbation: &Perturbation,
    name: &str,
    options: &EstimationOptions,
) -> Result<EstimationResult> {
    match perturbation {
        Perturbation::Sample(r) => {
            let mask = r.mask(panel)?;
            let opts = EstimationOptions { sample: name.to_string(), ..options.clone() };
            estimation::estimate(panel, baseline, mask.as_deref(), &opts)
        }
        Perturbation::AlternativeSpecification(s) => {
            let spec = registry.resolve(s)?;
            let opts = EstimationOptions { sample: FULL_SAMPLE.to_string(), ..options.clone() };
            estimation::estimate(panel, spec, None, &opts)
        }
        Perturbation::PlaceboLead(k) => {
            let (placebo, mask) = placebo_lead_panel(panel, &baseline.treatment, *k)?;
            let opts = EstimationOptions { sample: name.to_string(), ..options.clone() };
            estimation::estimate(&placebo, baseline, Some(&mask), &opts)
        }
    }
}

/// Panel with onsets moved `lead` periods earlier, and the mask of rows
/// strictly before the true onset (never-treated rows are always kept).
pub fn placebo_lead_panel(
    panel: &Panel,
    treatment_column: &str,
    lead: usize,
) -> Result<(Panel, Vec<bool>)> {
    if lead == 0 {
        return Err(Error::Validation("placebo lead must be at least 1 period".into()));
    }
    let true_onsets = panel.onsets();
    let fake: Vec<Option<i64>> = true_onsets.iter().map(|o| o.map(|t| t - lead as i64)).collect();
    let mask = pre_treatment_mask(panel, &true_onsets);
    Ok((panel.with_onsets(&fake, treatment_column)?, mask))
}

/// Rows strictly before each unit's onset; never-treated rows are kept.
pub(crate) fn pre_treatment_mask(panel: &Panel, onsets: &[Option<i64>]) -> Vec<bool> {
    panel
        .unit_of()
        .iter()
        .zip(panel.periods())
        .map(|(&u, &p)| onsets[u].map_or(true, |t| p < t))
        .collect()
}
