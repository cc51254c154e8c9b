//! Placebo distribution of the treatment effect under randomized timing.
//!
//! Each draw reassigns treatment onsets and re-estimates the specification
//! on the resulting panel. Draw `i` owns an RNG seeded with `seed + i`, so
//! results are reproducible regardless of how rayon schedules the draws.

use cp_core::{Error, Failure, Result, Specification};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::estimation::{self, EstimationOptions, EstimationResult};
use super::panel::Panel;
use super::robustness::pre_treatment_mask;

/// Default number of draws.
pub const DEFAULT_DRAWS: usize = 50;
/// Default base seed.
pub const DEFAULT_SEED: u64 = 42;

/// How placebo onsets are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceboMethod {
    /// Shuffle the per-unit onsets (never-treated included) across units.
    /// Cohort sizes are preserved exactly.
    Permute,
    /// Move every treated onset `d ∈ [1, max_offset]` periods earlier and
    /// estimate on pre-treatment rows only.
    Shift {
        /// Largest backward shift.
        max_offset: usize,
    },
}

/// Placebo run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaceboConfig {
    /// Number of draws.
    pub draws: usize,
    /// Base seed.
    pub seed: u64,
    /// Draw method.
    pub method: PlaceboMethod,
}

impl Default for PlaceboConfig {
    fn default() -> Self {
        Self { draws: DEFAULT_DRAWS, seed: DEFAULT_SEED, method: PlaceboMethod::Permute }
    }
}

impl PlaceboConfig {
    fn validate(&self) -> Result<()> {
        if self.draws == 0 {
            return Err(Error::Validation("placebo draws must be >= 1".into()));
        }
        if let PlaceboMethod::Shift { max_offset: 0 } = self.method {
            return Err(Error::Validation("placebo max_offset must be >= 1".into()));
        }
        Ok(())
    }
}

/// One placebo draw.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceboTest {
    /// Draw index in `0..draws`.
    pub draw_index: usize,
    /// Seed of this draw.
    pub seed: u64,
    /// Synthetic onset per unit (indexed like [`Panel::timing`]).
    pub onsets: Vec<Option<i64>>,
    /// Estimate on the synthetic panel, or why there is none.
    pub outcome: std::result::Result<EstimationResult, Failure>,
}

impl PlaceboTest {
    /// Placebo treatment coefficient of a successful draw.
    pub fn coefficient(&self) -> Option<f64> {
        self.outcome.as_ref().ok().and_then(EstimationResult::treatment_effect)
    }
}

/// Empirical placebo distribution against the real estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceboSummary {
    /// Base seed.
    pub seed: u64,
    /// Real treatment coefficient.
    pub real_coefficient: f64,
    /// Real standard error.
    pub real_std_error: f64,
    /// Mean of successful placebo coefficients.
    pub mean: Option<f64>,
    /// Sample standard deviation (n − 1) of successful placebo coefficients.
    pub sd: Option<f64>,
    /// `#{|b_i| ≥ |b_real|} / n_successful`.
    pub empirical_p_value: Option<f64>,
    /// Draws that produced an estimate.
    pub n_successful: usize,
    /// Draws that failed.
    pub n_failed: usize,
}

/// Draws plus summary.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceboDistribution {
    /// Real estimate on the observed panel.
    pub real: EstimationResult,
    /// Draws ordered by index.
    pub draws: Vec<PlaceboTest>,
    /// Summary statistics.
    pub summary: PlaceboSummary,
}

/// Estimate `spec` on the observed panel and on `config.draws` placebo panels.
///
/// Fails only when the real estimate fails; failed draws are recorded.
pub fn run(
    panel: &Panel,
    spec: &Specification,
    config: &PlaceboConfig,
    options: &EstimationOptions,
) -> Result<PlaceboDistribution> {
    config.validate()?;
    let real = estimation::estimate(panel, spec, None, options)?;
    let (real_coefficient, real_std_error) = match (real.treatment_effect(), real.treatment_std_error()) {
        (Some(b), Some(se)) => (b, se),
        _ => return Err(Error::Computation("real estimate has no treatment coefficient".into())),
    };

    let true_onsets = panel.onsets();
    let draws: Vec<PlaceboTest> = (0..config.draws)
        .into_par_iter()
        .map(|i| {
            let seed = config.seed.wrapping_add(i as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            let onsets = draw_onsets(&true_onsets, config.method, &mut rng);
            let outcome = estimate_draw(panel, spec, &true_onsets, &onsets, config.method, i, options)
                .map_err(|e| {
                    log::debug!("placebo draw {} failed: {}", i, e);
                    Failure::from(&e)
                });
            PlaceboTest { draw_index: i, seed, onsets, outcome }
        })
        .collect();

    let summary = summarize(config.seed, real_coefficient, real_std_error, &draws);
    if summary.n_failed > 0 {
        log::warn!("placebo: {} of {} draw(s) failed", summary.n_failed, draws.len());
    }
    Ok(PlaceboDistribution { real, draws, summary })
}

/// Synthetic onsets for one draw.
pub fn draw_onsets(
    true_onsets: &[Option<i64>],
    method: PlaceboMethod,
    rng: &mut StdRng,
) -> Vec<Option<i64>> {
    match method {
        PlaceboMethod::Permute => {
            let mut onsets = true_onsets.to_vec();
            onsets.shuffle(rng);
            onsets
        }
        PlaceboMethod::Shift { max_offset } => {
            let d = rng.random_range(1..=max_offset.max(1)) as i64;
            true_onsets.iter().map(|o| o.map(|t| t - d)).collect()
        }
    }
}

fn estimate_draw(
    panel: &Panel,
    spec: &Specification,
    true_onsets: &[Option<i64>],
    onsets: &[Option<i64>],
    method: PlaceboMethod,
    index: usize,
    options: &EstimationOptions,
) -> Result<EstimationResult> {
    let synthetic = panel.with_onsets(onsets, &spec.treatment)?;
    let opts = EstimationOptions { sample: format!("placebo_{index}"), ..options.clone() };
    match method {
        PlaceboMethod::Permute => estimation::estimate(&synthetic, spec, None, &opts),
        PlaceboMethod::Shift { .. } => {
            let mask = pre_treatment_mask(panel, true_onsets);
            estimation::estimate(&synthetic, spec, Some(&mask), &opts)
        }
    }
}

fn summarize(seed: u64, real: f64, real_se: f64, draws: &[PlaceboTest]) -> PlaceboSummary {
    let coefs: Vec<f64> = draws.iter().filter_map(PlaceboTest::coefficient).collect();
    let n = coefs.len();
    let mean = (n > 0).then(|| coefs.iter().sum::<f64>() / n as f64);
    let sd = match (mean, n) {
        (Some(m), n) if n > 1 => {
            Some((coefs.iter().map(|b| (b - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt())
        }
        _ => None,
    };
    let empirical_p_value = (n > 0)
        .then(|| coefs.iter().filter(|b| b.abs() >= real.abs()).count() as f64 / n as f64);
    PlaceboSummary {
        seed,
        real_coefficient: real,
        real_std_error: real_se,
        mean,
        sd,
        empirical_p_value,
        n_successful: n,
        n_failed: draws.len() - n,
    }
}
