//! Error types for causalpanel

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of an [`Error`].
///
/// Configuration errors abort a run before any result is produced.
/// Identification errors are specific to one specification/sample and are
/// captured as failure records in batch contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown names, missing columns, malformed inputs.
    Configuration,
    /// The data cannot identify the requested parameters.
    Identification,
    /// File-system or (de)serialization failure at the boundary.
    Io,
    /// Numerical breakdown inside a decomposition.
    Computation,
}

impl ErrorKind {
    /// Stable lowercase label used in result records.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Identification => "identification",
            ErrorKind::Io => "io",
            ErrorKind::Computation => "computation",
        }
    }
}

/// causalpanel error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Specification name not present in the registry.
    #[error("unknown specification '{0}'")]
    UnknownSpecification(String),

    /// Sample restriction name not defined.
    #[error("unknown sample restriction '{0}'")]
    UnknownSample(String),

    /// A required column is absent from the input.
    #[error("missing required column '{column}' ({context})")]
    MissingColumn {
        /// Column name that was requested.
        column: String,
        /// What needed the column.
        context: String,
    },

    /// The (unit, period) key occurs more than once.
    #[error("duplicate observation for unit '{unit}' in period {period}")]
    DuplicateObservation {
        /// Unit label.
        unit: String,
        /// Period value.
        period: i64,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// No observation survives listwise deletion and sample restriction.
    #[error("empty estimation sample ({0})")]
    EmptySample(String),

    /// Treatment has no variation left to estimate an effect from.
    #[error("no identifying variation in treatment column '{column}'")]
    NoIdentifyingVariation {
        /// Treatment column name.
        column: String,
    },

    /// Regressor matrix is not of full column rank.
    #[error("collinear design: {}", columns.join(", "))]
    CollinearDesign {
        /// Columns found to be linearly dependent on earlier columns or on the
        /// absorbed fixed effects.
        columns: Vec<String>,
    },

    /// Cluster-robust inference needs at least two clusters.
    #[error("insufficient clusters for cluster-robust inference: {n_clusters} cluster(s) in '{column}'")]
    InsufficientClusters {
        /// Clustering column.
        column: String,
        /// Number of distinct clusters found.
        n_clusters: usize,
    },

    /// n_obs does not exceed the number of estimated parameters.
    #[error("insufficient degrees of freedom: {n_obs} observations for {n_params} parameters")]
    InsufficientDegreesOfFreedom {
        /// Observations in the estimation sample.
        n_obs: usize,
        /// Regressors plus absorbed fixed-effect levels.
        n_params: usize,
    },

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Json(_) => ErrorKind::Io,
            Error::UnknownSpecification(_)
            | Error::UnknownSample(_)
            | Error::MissingColumn { .. }
            | Error::DuplicateObservation { .. }
            | Error::Validation(_) => ErrorKind::Configuration,
            Error::EmptySample(_)
            | Error::NoIdentifyingVariation { .. }
            | Error::CollinearDesign { .. }
            | Error::InsufficientClusters { .. }
            | Error::InsufficientDegreesOfFreedom { .. } => ErrorKind::Identification,
            Error::Computation(_) => ErrorKind::Computation,
        }
    }

    /// Names (specifications, columns, units) the error refers to.
    pub fn identifiers(&self) -> Vec<String> {
        match self {
            Error::UnknownSpecification(name) | Error::UnknownSample(name) => vec![name.clone()],
            Error::MissingColumn { column, .. }
            | Error::NoIdentifyingVariation { column }
            | Error::InsufficientClusters { column, .. } => vec![column.clone()],
            Error::DuplicateObservation { unit, period } => {
                vec![unit.clone(), period.to_string()]
            }
            Error::CollinearDesign { columns } => columns.clone(),
            _ => Vec::new(),
        }
    }

    /// Shorthand for a [`Error::MissingColumn`].
    pub fn missing_column(column: impl Into<String>, context: impl Into<String>) -> Self {
        Error::MissingColumn { column: column.into(), context: context.into() }
    }
}

/// Serializable form of an [`Error`], attached to batch records in place of a
/// result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    /// Error class.
    pub kind: ErrorKind,
    /// Rendered message.
    pub message: String,
    /// Offending identifiers, when known.
    pub identifiers: Vec<String>,
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Self { kind: err.kind(), message: err.to_string(), identifiers: err.identifiers() }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::from(&err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::UnknownSpecification("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(Error::missing_column("onset", "timing").kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::NoIdentifyingVariation { column: "treatment".into() }.kind(),
            ErrorKind::Identification
        );
        assert_eq!(
            Error::InsufficientClusters { column: "unit_id".into(), n_clusters: 1 }.kind(),
            ErrorKind::Identification
        );
        assert_eq!(Error::Computation("qr".into()).kind(), ErrorKind::Computation);
    }

    #[test]
    fn failure_carries_identifiers() {
        let err = Error::CollinearDesign { columns: vec!["x1".into(), "x2".into()] };
        let failure = Failure::from(&err);
        assert_eq!(failure.kind, ErrorKind::Identification);
        assert_eq!(failure.identifiers, vec!["x1".to_string(), "x2".to_string()]);
        assert!(failure.message.contains("x1, x2"));
    }

    #[test]
    fn unknown_specification_names_it() {
        let err = Error::UnknownSpecification("nope".into());
        assert!(err.to_string().contains("nope"));
        assert_eq!(err.identifiers(), vec!["nope".to_string()]);
    }
}
