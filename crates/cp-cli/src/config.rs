//! Project config v0 (YAML) parsing + registry validation.
//!
//! A single YAML file declares how the panel is keyed, the specification
//! registry, named samples, the robustness menu and placebo settings.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use cp_core::{BASELINE, EventWindow, SpecificationConfig, SpecificationRegistry};
use cp_inference::econometrics::variance::DEFAULT_CONFIDENCE;
use cp_inference::{PanelConfig, Perturbation, PlaceboConfig, SampleRestriction};
use serde::Deserialize;

pub const CONFIG_V0: &str = "causalpanel_config_v0";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub schema_version: String,
    #[serde(default)]
    pub panel: PanelConfig,
    /// Empty selects the built-in registry.
    #[serde(default)]
    pub specifications: BTreeMap<String, SpecificationConfig>,
    #[serde(default = "default_baseline")]
    pub baseline: String,
    #[serde(default)]
    pub samples: BTreeMap<String, SampleRestriction>,
    /// `None` selects the default menu.
    #[serde(default)]
    pub robustness: Option<Vec<Perturbation>>,
    #[serde(default)]
    pub placebo: PlaceboConfig,
    #[serde(default)]
    pub event_window: Option<EventWindow>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_baseline() -> String {
    BASELINE.to_string()
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_V0.to_string(),
            panel: PanelConfig::default(),
            specifications: BTreeMap::new(),
            baseline: default_baseline(),
            samples: BTreeMap::new(),
            robustness: None,
            placebo: PlaceboConfig::default(),
            event_window: None,
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl ProjectConfig {
    /// Read and validate a config; `None` gives the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

        // YAML parser can also read JSON (YAML is a superset).
        let probe: serde_yaml_ng::Value = serde_yaml_ng::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let schema_version = probe.get("schema_version").and_then(|v| v.as_str());
        if schema_version != Some(CONFIG_V0) {
            anyhow::bail!(
                "{}: schema_version must be '{CONFIG_V0}', got {:?}",
                path.display(),
                schema_version
            );
        }

        let cfg: ProjectConfig = serde_yaml_ng::from_slice(&bytes)
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.validate()?;
        tracing::info!(path = %path.display(), specifications = cfg.specifications.len(), "config loaded");
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            anyhow::bail!("confidence must be in (0, 1), got {}", self.confidence);
        }
        if let Some(w) = &self.event_window {
            w.validate()?;
        }
        if let Some(b) = &self.panel.event_binning {
            b.validate()?;
        }
        for name in self.samples.keys() {
            if name.trim().is_empty() {
                anyhow::bail!("sample names must be non-empty");
            }
        }
        self.registry()?;
        Ok(())
    }

    /// Specification registry: the configured one, or the built-in one.
    pub fn registry(&self) -> Result<SpecificationRegistry> {
        if self.specifications.is_empty() {
            if self.baseline != BASELINE {
                anyhow::bail!(
                    "baseline '{}' requires a 'specifications' section (built-in baseline is '{BASELINE}')",
                    self.baseline
                );
            }
            return Ok(SpecificationRegistry::builtin());
        }
        Ok(SpecificationRegistry::from_config(self.specifications.clone(), &self.baseline)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let yaml = r#"
schema_version: causalpanel_config_v0
panel:
  unit_column: county
  period_column: year
  treatment_column: treated
  balance: true
specifications:
  twfe:
    outcome: y
    treatment: treated
    controls: [x1]
    fixed_effects: [unit, period]
    cluster: state
  pooled:
    outcome: y
    treatment: treated
baseline: twfe
samples:
  south:
    kind: subsample
    column: region
    op: eq
    value: south
robustness:
  - sample: { kind: drop_first_periods, k: 2 }
  - alternative_specification: pooled
  - placebo_lead: 1
placebo:
  draws: 10
  seed: 7
  method: { shift: { max_offset: 2 } }
"#;
        let cfg: ProjectConfig = serde_yaml_ng::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.panel.unit_column, "county");
        assert!(cfg.panel.balance);
        let reg = cfg.registry().unwrap();
        assert_eq!(reg.names(), vec!["twfe", "pooled"]);
        assert_eq!(reg.baseline().cluster.as_deref(), Some("state"));
        assert_eq!(cfg.robustness.as_ref().map(Vec::len), Some(3));
        assert_eq!(cfg.placebo.draws, 10);
        assert!(cfg.samples.contains_key("south"));
    }

    #[test]
    fn missing_baseline_rejected() {
        let yaml = r#"
schema_version: causalpanel_config_v0
specifications:
  a: { outcome: y, treatment: d }
baseline: b
"#;
        let cfg: ProjectConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_event_binning_rejected() {
        let yaml = r#"
schema_version: causalpanel_config_v0
panel:
  event_binning: { min: 2, max: -2 }
"#;
        let cfg: ProjectConfig = serde_yaml_ng::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("event binning"), "{err}");
    }

    #[test]
    fn defaults_use_builtin_registry() {
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.registry().unwrap().len(), 4);
    }
}
