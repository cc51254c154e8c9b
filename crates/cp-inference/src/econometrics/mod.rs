//! Causal panel econometrics.
//!
//! This module provides:
//! - **Panel construction** with treatment timing, cohorts and event time.
//! - **Design assembly** with listwise deletion, high-dimensional fixed-effect
//!   absorption (alternating projections) and rank checks.
//! - **OLS** via QR, with classical, HC1 and cluster-robust (CR1) covariance.
//! - **Robustness** menus and **placebo** distributions, run in parallel.
//! - **Event studies** with leads and lags.

pub mod design;
pub mod estimation;
pub mod event_study;
pub mod hdfe;
pub mod ols;
pub mod panel;
pub mod placebo;
pub mod robustness;
pub mod sample;
pub mod variance;

pub use design::{ClusterIds, DesignMatrix, Regressors, assemble, assemble_with};
pub use estimation::{EstimationOptions, EstimationResult, FULL_SAMPLE, estimate};
pub use event_study::{EventStudyResult, event_study};
pub use hdfe::FixedEffectsSolver;
pub use ols::OlsFit;
pub use panel::{Cohort, EventBinning, Panel, PanelConfig, PanelDiagnostics, TreatmentTiming};
pub use placebo::{PlaceboConfig, PlaceboDistribution, PlaceboMethod, PlaceboSummary, PlaceboTest};
pub use robustness::{Perturbation, RobustnessTest, default_menu};
pub use sample::{Comparison, SampleRestriction, SubsampleValue};
pub use variance::{InferenceMode, InferenceOverride};
