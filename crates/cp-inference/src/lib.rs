//! # cp-inference
//!
//! Causal panel estimation for causalpanel.
//!
//! This crate provides:
//! - Panel construction with treatment timing and event time
//! - Two-way fixed-effects / DiD estimation with cluster-robust inference
//! - Event studies
//! - Robustness menus and placebo distributions
//!
//! Inputs are [`cp_core::LinkedTable`]s; outputs flatten into
//! [`cp_core::ResultTables`] through [`results::ResultAssembler`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Panel econometrics: panel, design, OLS, variance, robustness, placebo.
pub mod econometrics;
/// Stage entry points over a built panel.
pub mod pipeline;
/// Flat result tables.
pub mod results;
/// Seeded synthetic panels.
pub mod synthetic;

pub use econometrics::{
    EstimationOptions, EstimationResult, EventStudyResult, Panel, PanelConfig, Perturbation,
    PlaceboConfig, PlaceboMethod, SampleRestriction,
};
pub use pipeline::{RunOptions, estimate_robustness, run_estimation, run_event_study, run_placebo};
pub use results::ResultAssembler;
pub use synthetic::SyntheticPanel;
