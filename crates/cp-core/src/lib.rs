//! # cp-core
//!
//! Core types shared by the causalpanel crates:
//! - the error taxonomy ([`Error`], [`ErrorKind`], [`Failure`]),
//! - the linked input table ([`LinkedTable`]),
//! - estimation specifications and their registry,
//! - flat result records for downstream writers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod specification;
pub mod table;
pub mod types;

pub use error::{Error, ErrorKind, Failure, Result};
pub use specification::{
    BASELINE, EventWindow, FixedEffect, Specification, SpecificationConfig, SpecificationRegistry,
};
pub use table::{CellKey, Column, LinkedTable};
pub use types::{
    CoefficientRecord, EstimationRecord, PlaceboRecord, ResultTables, RobustnessRecord, TestType,
};
