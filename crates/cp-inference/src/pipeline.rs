//! Stage entry points: estimation, robustness, placebo and event study over a
//! built [`Panel`] and a [`SpecificationRegistry`].

use std::collections::BTreeMap;

use cp_core::{BASELINE, EventWindow, Result, ResultTables, SpecificationRegistry};

use crate::econometrics::estimation::{self, EstimationOptions};
use crate::econometrics::variance::{DEFAULT_CONFIDENCE, InferenceOverride};
use crate::econometrics::{
    EventStudyResult, Panel, Perturbation, PlaceboConfig, SampleRestriction, event_study,
    placebo, robustness,
};
use crate::results::ResultAssembler;

/// Run-time choices shared by the stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Specification to estimate.
    pub specification: String,
    /// Sample restriction name (configured or built-in).
    pub sample: String,
    /// Override of the specification's inference choice.
    pub inference: Option<InferenceOverride>,
    /// Confidence level of the intervals.
    pub confidence: f64,
    /// Configured sample restrictions by name.
    pub samples: BTreeMap<String, SampleRestriction>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            specification: BASELINE.into(),
            sample: estimation::FULL_SAMPLE.into(),
            inference: None,
            confidence: DEFAULT_CONFIDENCE,
            samples: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    fn estimation_options(&self, sample: String) -> EstimationOptions {
        EstimationOptions { sample, inference: self.inference.clone(), confidence: self.confidence }
    }
}

/// Estimate one specification on one sample.
///
/// Unknown specification or sample names fail before anything is estimated.
pub fn run_estimation(
    panel: &Panel,
    registry: &SpecificationRegistry,
    options: &RunOptions,
) -> Result<ResultTables> {
    let spec = registry.resolve(&options.specification)?;
    let restriction = SampleRestriction::resolve(&options.sample, &options.samples)?;
    let mask = restriction.mask(panel)?;
    let result = estimation::estimate(
        panel,
        spec,
        mask.as_deref(),
        &options.estimation_options(options.sample.clone()),
    )?;
    let mut out = ResultAssembler::new();
    out.add_estimation(&result);
    Ok(out.finish())
}

/// Run the robustness menu (the default menu when `menu` is `None`).
pub fn estimate_robustness(
    panel: &Panel,
    registry: &SpecificationRegistry,
    menu: Option<&[Perturbation]>,
    options: &RunOptions,
) -> Result<ResultTables> {
    let default;
    let menu = match menu {
        Some(m) => m,
        None => {
            default = robustness::default_menu(registry);
            &default[..]
        }
    };
    let tests = robustness::run(
        panel,
        registry,
        menu,
        &options.estimation_options(estimation::FULL_SAMPLE.into()),
    )?;
    let mut out = ResultAssembler::new();
    out.add_robustness(&tests);
    Ok(out.finish())
}

/// Placebo distribution of the selected specification.
pub fn run_placebo(
    panel: &Panel,
    registry: &SpecificationRegistry,
    config: &PlaceboConfig,
    options: &RunOptions,
) -> Result<ResultTables> {
    let spec = registry.resolve(&options.specification)?;
    let dist = placebo::run(
        panel,
        spec,
        config,
        &options.estimation_options(estimation::FULL_SAMPLE.into()),
    )?;
    let mut out = ResultAssembler::new();
    out.add_estimation(&dist.real).add_placebo(&dist);
    Ok(out.finish())
}

/// Event study of the selected specification.
pub fn run_event_study(
    panel: &Panel,
    registry: &SpecificationRegistry,
    window: EventWindow,
    options: &RunOptions,
) -> Result<EventStudyResult> {
    let spec = registry.resolve(&options.specification)?;
    event_study(panel, spec, window, &options.estimation_options(estimation::FULL_SAMPLE.into()))
}
