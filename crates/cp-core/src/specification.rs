//! Estimation specifications and the registry that holds them.
//!
//! The registry is built once from configuration (or the built-in defaults)
//! and validated up front, so a bad or unknown name fails at startup rather
//! than deep inside an estimation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default name of the baseline specification.
pub const BASELINE: &str = "baseline";

/// A fixed-effect grouping absorbed by within-group demeaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedEffect {
    /// One intercept per unit.
    Unit,
    /// One intercept per period.
    Period,
}

impl FixedEffect {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            FixedEffect::Unit => "unit",
            FixedEffect::Period => "period",
        }
    }
}

/// Lead/lag window of an event-study regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    /// Earliest relative period (a lead, usually negative).
    pub min_lag: i64,
    /// Latest relative period.
    pub max_lag: i64,
    /// Omitted relative period.
    #[serde(default = "default_reference")]
    pub reference: i64,
    /// Cap event times outside `[min_lag, max_lag]` into the endpoint bins
    /// instead of leaving them in the omitted category.
    #[serde(default)]
    pub bin_endpoints: bool,
}

fn default_reference() -> i64 {
    -1
}

impl EventWindow {
    /// Check `min_lag <= reference <= max_lag`.
    pub fn validate(&self) -> Result<()> {
        if self.min_lag > self.max_lag {
            return Err(Error::Validation(format!(
                "event window min_lag ({}) must be <= max_lag ({})",
                self.min_lag, self.max_lag
            )));
        }
        if self.reference < self.min_lag || self.reference > self.max_lag {
            return Err(Error::Validation(format!(
                "event window reference ({}) must lie within [{}, {}]",
                self.reference, self.min_lag, self.max_lag
            )));
        }
        if self.min_lag == self.max_lag {
            return Err(Error::Validation(
                "event window must contain at least one non-reference period".into(),
            ));
        }
        Ok(())
    }

    /// Relative periods that get an indicator column, in ascending order.
    pub fn relative_times(&self) -> Vec<i64> {
        (self.min_lag..=self.max_lag).filter(|&k| k != self.reference).collect()
    }
}

/// Serialized form of one specification (registry config entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecificationConfig {
    /// Outcome column.
    pub outcome: String,
    /// Treatment indicator column.
    pub treatment: String,
    /// Control columns.
    #[serde(default)]
    pub controls: Vec<String>,
    /// Absorbed fixed effects.
    #[serde(default)]
    pub fixed_effects: Vec<FixedEffect>,
    /// Clustering column; `None` selects heteroskedasticity-robust errors.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

/// Immutable, validated estimation specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Specification {
    /// Registry name.
    pub name: String,
    /// Outcome column.
    pub outcome: String,
    /// Treatment indicator column.
    pub treatment: String,
    /// Control columns.
    pub controls: Vec<String>,
    /// Absorbed fixed effects, deduplicated, in `Unit, Period` order.
    pub fixed_effects: Vec<FixedEffect>,
    /// Clustering column.
    pub cluster: Option<String>,
    /// Free-text description.
    pub description: String,
}

impl Specification {
    /// Validate a config entry into a specification.
    pub fn from_config(name: &str, cfg: SpecificationConfig) -> Result<Self> {
        let bad = |msg: String| Error::Validation(format!("specification '{name}': {msg}"));
        if name.trim().is_empty() {
            return Err(Error::Validation("specification name must be non-empty".into()));
        }
        if cfg.outcome.trim().is_empty() {
            return Err(bad("outcome column must be non-empty".into()));
        }
        if cfg.treatment.trim().is_empty() {
            return Err(bad("treatment column must be non-empty".into()));
        }
        if cfg.outcome == cfg.treatment {
            return Err(bad(format!("outcome and treatment are both '{}'", cfg.outcome)));
        }
        let mut seen = HashSet::new();
        for c in &cfg.controls {
            if c.trim().is_empty() {
                return Err(bad("control column names must be non-empty".into()));
            }
            if c == &cfg.outcome || c == &cfg.treatment {
                return Err(bad(format!("control '{c}' duplicates the outcome or treatment")));
            }
            if !seen.insert(c.as_str()) {
                return Err(bad(format!("control '{c}' listed twice")));
            }
        }
        if let Some(cl) = &cfg.cluster {
            if cl.trim().is_empty() {
                return Err(bad("cluster column must be non-empty when set".into()));
            }
        }
        let mut fixed_effects = cfg.fixed_effects;
        fixed_effects.sort();
        fixed_effects.dedup();

        Ok(Self {
            name: name.to_string(),
            outcome: cfg.outcome,
            treatment: cfg.treatment,
            controls: cfg.controls,
            fixed_effects,
            cluster: cfg.cluster,
            description: cfg.description,
        })
    }

    /// Copy with a different clustering column.
    pub fn with_cluster(&self, cluster: Option<String>) -> Self {
        Self { cluster, ..self.clone() }
    }

    /// Whether the outcome is estimated with absorbed fixed effects.
    pub fn has_fixed_effects(&self) -> bool {
        !self.fixed_effects.is_empty()
    }
}

/// Named catalogue of specifications with a designated baseline.
#[derive(Debug, Clone, Serialize)]
pub struct SpecificationRegistry {
    specs: Vec<Specification>,
    baseline: usize,
}

impl SpecificationRegistry {
    /// Build and validate a registry. The baseline entry comes first; the
    /// remaining entries follow in name order.
    pub fn from_config(
        entries: BTreeMap<String, SpecificationConfig>,
        baseline: &str,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::Validation("specification registry is empty".into()));
        }
        if !entries.contains_key(baseline) {
            return Err(Error::UnknownSpecification(baseline.to_string()));
        }
        let mut specs = Vec::with_capacity(entries.len());
        let mut rest = Vec::with_capacity(entries.len() - 1);
        for (name, cfg) in entries {
            let spec = Specification::from_config(&name, cfg)?;
            if name == baseline {
                specs.push(spec);
            } else {
                rest.push(spec);
            }
        }
        specs.extend(rest);
        log::debug!("specification registry: {} entries, baseline '{}'", specs.len(), baseline);
        Ok(Self { specs, baseline: 0 })
    }

    /// Built-in registry over the standard column names
    /// (`unit_id`, `period`, `treatment`, `outcome`).
    pub fn builtin() -> Self {
        let entry = |fes: Vec<FixedEffect>, cluster: Option<&str>, description: &str| {
            SpecificationConfig {
                outcome: "outcome".into(),
                treatment: "treatment".into(),
                controls: Vec::new(),
                fixed_effects: fes,
                cluster: cluster.map(str::to_string),
                description: description.into(),
            }
        };
        let mut entries = BTreeMap::new();
        entries.insert(
            BASELINE.to_string(),
            entry(
                vec![FixedEffect::Unit, FixedEffect::Period],
                Some("unit_id"),
                "Two-way fixed effects, clustered by unit",
            ),
        );
        entries.insert(
            "unit_fe".to_string(),
            entry(vec![FixedEffect::Unit], Some("unit_id"), "Unit fixed effects only"),
        );
        entries.insert(
            "period_fe".to_string(),
            entry(vec![FixedEffect::Period], Some("unit_id"), "Period fixed effects only"),
        );
        entries.insert(
            "pooled".to_string(),
            entry(Vec::new(), None, "Pooled OLS with heteroskedasticity-robust errors"),
        );
        // The built-in entries are statically valid.
        match Self::from_config(entries, BASELINE) {
            Ok(reg) => reg,
            Err(e) => unreachable!("built-in registry invalid: {e}"),
        }
    }

    /// Look up a specification by name.
    pub fn resolve(&self, name: &str) -> Result<&Specification> {
        self.specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::UnknownSpecification(name.to_string()))
    }

    /// The baseline specification.
    pub fn baseline(&self) -> &Specification {
        &self.specs[self.baseline]
    }

    /// All non-baseline specifications.
    pub fn alternatives(&self) -> impl Iterator<Item = &Specification> {
        self.specs.iter().enumerate().filter(|(i, _)| *i != self.baseline).map(|(_, s)| s)
    }

    /// All specifications, baseline first.
    pub fn iter(&self) -> impl Iterator<Item = &Specification> {
        self.specs.iter()
    }

    /// Registered names, baseline first.
    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Number of specifications.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Always false for a constructed registry.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
