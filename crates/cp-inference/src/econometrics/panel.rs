//! Panel construction: unit/period keys, treatment timing, cohorts and event time.
//!
//! A [`Panel`] is built once from a [`LinkedTable`] and is read-only
//! afterwards. Rows are ordered by (unit, period); units and periods are
//! mapped to dense 0-based indices which double as the fixed-effect group
//! keys used by the demeaning solver.

use std::collections::{HashMap, HashSet};

use cp_core::{CellKey, Column, Error, FixedEffect, LinkedTable, Result};
use serde::{Deserialize, Serialize};

/// Derived column: 1 for units that are ever treated.
pub const EVER_TREATED: &str = "ever_treated";
/// Derived column: signed distance to treatment onset (missing for never-treated).
pub const EVENT_TIME: &str = "event_time";
/// Derived column: onset period of the unit's cohort (missing for never-treated).
pub const COHORT: &str = "cohort";

/// How the panel is keyed and where treatment timing comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PanelConfig {
    /// Unit identifier column.
    pub unit_column: String,
    /// Period column (integral values).
    pub period_column: String,
    /// Treatment indicator column (0/1).
    pub treatment_column: Option<String>,
    /// Explicit treatment-onset column; null marks a never-treated unit.
    pub onset_column: Option<String>,
    /// Keep only units observed in every period.
    pub balance: bool,
    /// Cap derived event times into `[min, max]`.
    pub event_binning: Option<EventBinning>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            unit_column: "unit_id".into(),
            period_column: "period".into(),
            treatment_column: Some("treatment".into()),
            onset_column: None,
            balance: false,
            event_binning: None,
        }
    }
}

/// Endpoint-binning policy for event time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBinning {
    /// Event times below this are set to it.
    pub min: i64,
    /// Event times above this are set to it.
    pub max: i64,
}

impl EventBinning {
    /// Check `min <= max`.
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(Error::Validation(format!(
                "event binning min ({}) must be <= max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Apply the cap.
    #[inline]
    pub fn apply(&self, event_time: i64) -> i64 {
        event_time.clamp(self.min, self.max)
    }
}

/// Treatment cohort: the set of units sharing an onset period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    /// Never treated within the observed window.
    Never,
    /// Treated from this period on.
    Onset(i64),
}

/// Per-unit treatment timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreatmentTiming {
    /// Unit label.
    pub unit: String,
    /// Whether the unit is ever treated.
    pub ever_treated: bool,
    /// Onset period, `None` for never-treated.
    pub onset: Option<i64>,
    /// Cohort label.
    pub cohort: Cohort,
}

impl TreatmentTiming {
    fn new(unit: String, onset: Option<i64>) -> Self {
        let cohort = onset.map_or(Cohort::Never, Cohort::Onset);
        Self { unit, ever_treated: onset.is_some(), onset, cohort }
    }
}

/// Data-quality counts from panel construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PanelDiagnostics {
    /// Rows retained.
    pub n_rows: usize,
    /// Units retained.
    pub n_units: usize,
    /// Distinct periods retained.
    pub n_periods: usize,
    /// Units dropped by the balance policy.
    pub units_dropped_unbalanced: usize,
    /// Rows dropped by the balance policy.
    pub rows_dropped_unbalanced: usize,
    /// Distinct treated cohorts.
    pub n_treated_cohorts: usize,
    /// Never-treated units.
    pub n_never_treated: usize,
    /// Whether every retained unit is observed in every period.
    pub balanced: bool,
}

/// Read-only analysis panel.
#[derive(Debug, Clone)]
pub struct Panel {
    config: PanelConfig,
    table: LinkedTable,
    unit_labels: Vec<String>,
    unit_of: Vec<usize>,
    periods: Vec<i64>,
    period_levels: Vec<i64>,
    period_of: Vec<usize>,
    timing: Vec<TreatmentTiming>,
    event_time: Vec<Option<i64>>,
    balanced_units: Vec<bool>,
    diagnostics: PanelDiagnostics,
}

fn integral_period(v: f64, what: &str) -> Result<i64> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(Error::Validation(format!("{what} must be integral, got {v}")));
    }
    Ok(v as i64)
}

impl Panel {
    /// Build a panel from a linked table.
    pub fn build(table: &LinkedTable, config: PanelConfig) -> Result<Self> {
        if let Some(b) = &config.event_binning {
            b.validate()?;
        }
        if config.treatment_column.is_none() && config.onset_column.is_none() {
            return Err(Error::Validation(
                "panel requires a treatment column or an onset column".into(),
            ));
        }
        let n = table.n_rows();
        if n == 0 {
            return Err(Error::Validation("linked table has no rows".into()));
        }

        let unit_col = table.column(&config.unit_column, "unit identifier")?;
        let period_raw = table.numeric(&config.period_column, "period")?;

        // Dense unit index in first-appearance order; re-sorted below.
        let mut unit_index: HashMap<CellKey, usize> = HashMap::new();
        let mut unit_first_row: Vec<usize> = Vec::new();
        let mut unit_raw = Vec::with_capacity(n);
        let mut periods_raw = Vec::with_capacity(n);
        for i in 0..n {
            let key = unit_col.key(i).ok_or_else(|| {
                Error::Validation(format!(
                    "unit identifier '{}' is missing in row {}",
                    config.unit_column,
                    i + 1
                ))
            })?;
            let next = unit_index.len();
            let u = *unit_index.entry(key).or_insert_with(|| {
                unit_first_row.push(i);
                next
            });
            unit_raw.push(u);
            let p = period_raw[i].ok_or_else(|| {
                Error::Validation(format!(
                    "period '{}' is missing in row {}",
                    config.period_column,
                    i + 1
                ))
            })?;
            periods_raw.push(integral_period(p, "period")?);
        }

        let label_of = |u: usize| unit_col.label(unit_first_row[u]).unwrap_or_default();

        let mut seen = HashSet::with_capacity(n);
        for i in 0..n {
            if !seen.insert((unit_raw[i], periods_raw[i])) {
                return Err(Error::DuplicateObservation {
                    unit: label_of(unit_raw[i]),
                    period: periods_raw[i],
                });
            }
        }

        // Balance policy over the full period range.
        let n_units_raw = unit_index.len();
        let all_periods: HashSet<i64> = periods_raw.iter().copied().collect();
        let mut obs_per_unit = vec![0usize; n_units_raw];
        for &u in &unit_raw {
            obs_per_unit[u] += 1;
        }
        let unit_is_balanced: Vec<bool> =
            obs_per_unit.iter().map(|&c| c == all_periods.len()).collect();

        let mut keep: Vec<usize> = (0..n).collect();
        let mut units_dropped = 0usize;
        if config.balance {
            units_dropped = unit_is_balanced.iter().filter(|b| !**b).count();
            keep.retain(|&i| unit_is_balanced[unit_raw[i]]);
            if units_dropped > 0 {
                log::warn!(
                    "balance policy dropped {} unit(s) ({} row(s)) not observed in all {} periods",
                    units_dropped,
                    n - keep.len(),
                    all_periods.len()
                );
            }
            if keep.is_empty() {
                return Err(Error::EmptySample("no unit is observed in every period".into()));
            }
        }
        let rows_dropped = n - keep.len();

        // Unit order: numeric ids by value, text ids lexically.
        let mut retained_units: Vec<usize> = keep.iter().map(|&i| unit_raw[i]).collect();
        retained_units.sort_unstable();
        retained_units.dedup();
        let sort_value = |u: usize| match unit_col {
            Column::Numeric(v) => v[unit_first_row[u]],
            Column::Text(_) => None,
        };
        retained_units.sort_by(|&a, &b| match (sort_value(a), sort_value(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => label_of(a).cmp(&label_of(b)),
        });
        let mut dense_of_raw = vec![usize::MAX; n_units_raw];
        for (d, &u) in retained_units.iter().enumerate() {
            dense_of_raw[u] = d;
        }

        keep.sort_by_key(|&i| (dense_of_raw[unit_raw[i]], periods_raw[i]));

        let unit_labels: Vec<String> = retained_units.iter().map(|&u| label_of(u)).collect();
        let unit_of: Vec<usize> = keep.iter().map(|&i| dense_of_raw[unit_raw[i]]).collect();
        let periods: Vec<i64> = keep.iter().map(|&i| periods_raw[i]).collect();
        let balanced_units: Vec<bool> =
            retained_units.iter().map(|&u| unit_is_balanced[u]).collect();

        let mut sorted_table = table.select_rows(&keep);
        let onsets = derive_onsets(&sorted_table, &config, &unit_of, &periods, unit_labels.len())?;

        // Derive a treatment indicator from the onset column when the table has none.
        if let Some(tcol) = &config.treatment_column {
            if !sorted_table.has_column(tcol) {
                if config.onset_column.is_none() {
                    return Err(Error::missing_column(tcol.clone(), "treatment timing"));
                }
                let derived = treatment_indicator(&unit_of, &periods, &onsets);
                sorted_table.insert(tcol.clone(), Column::Numeric(derived))?;
            }
        }

        Panel::assemble(
            config,
            sorted_table,
            unit_labels,
            unit_of,
            periods,
            onsets,
            balanced_units,
            units_dropped,
            rows_dropped,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: PanelConfig,
        mut table: LinkedTable,
        unit_labels: Vec<String>,
        unit_of: Vec<usize>,
        periods: Vec<i64>,
        onsets: Vec<Option<i64>>,
        balanced_units: Vec<bool>,
        units_dropped_unbalanced: usize,
        rows_dropped_unbalanced: usize,
    ) -> Result<Self> {
        let mut period_levels = periods.clone();
        period_levels.sort_unstable();
        period_levels.dedup();
        let period_of: Vec<usize> =
            periods.iter().map(|p| period_levels.binary_search(p).unwrap_or(0)).collect();

        let timing: Vec<TreatmentTiming> = unit_labels
            .iter()
            .zip(&onsets)
            .map(|(label, &onset)| TreatmentTiming::new(label.clone(), onset))
            .collect();

        let event_time: Vec<Option<i64>> = unit_of
            .iter()
            .zip(&periods)
            .map(|(&u, &p)| {
                onsets[u].map(|onset| {
                    let et = p - onset;
                    config.event_binning.map_or(et, |b| b.apply(et))
                })
            })
            .collect();

        for name in [EVER_TREATED, EVENT_TIME, COHORT] {
            if table.has_column(name) {
                log::debug!("replacing input column '{name}' with the derived panel column");
            }
        }
        table.insert(
            EVER_TREATED,
            Column::Numeric(
                unit_of.iter().map(|&u| Some(if onsets[u].is_some() { 1.0 } else { 0.0 })).collect(),
            ),
        )?;
        table.insert(
            EVENT_TIME,
            Column::Numeric(event_time.iter().map(|e| e.map(|v| v as f64)).collect()),
        )?;
        table.insert(
            COHORT,
            Column::Numeric(unit_of.iter().map(|&u| onsets[u].map(|v| v as f64)).collect()),
        )?;

        let cohorts: HashSet<i64> = onsets.iter().flatten().copied().collect();
        let n_units = unit_labels.len();
        let diagnostics = PanelDiagnostics {
            n_rows: unit_of.len(),
            n_units,
            n_periods: period_levels.len(),
            units_dropped_unbalanced,
            rows_dropped_unbalanced,
            n_treated_cohorts: cohorts.len(),
            n_never_treated: onsets.iter().filter(|o| o.is_none()).count(),
            balanced: unit_of.len() == n_units * period_levels.len(),
        };

        Ok(Self {
            config,
            table,
            unit_labels,
            unit_of,
            periods,
            period_levels,
            period_of,
            timing,
            event_time,
            balanced_units,
            diagnostics,
        })
    }

    /// New panel with the given per-unit onsets (indexed like [`Panel::timing`]).
    ///
    /// `treatment_column` is overwritten with `1{period >= onset}` and the
    /// derived timing columns are recomputed. Used for placebo assignments.
    pub fn with_onsets(&self, onsets: &[Option<i64>], treatment_column: &str) -> Result<Panel> {
        if onsets.len() != self.n_units() {
            return Err(Error::Validation(format!(
                "onsets length ({}) != number of units ({})",
                onsets.len(),
                self.n_units()
            )));
        }
        let mut table = self.table.clone();
        table.insert(
            treatment_column,
            Column::Numeric(treatment_indicator(&self.unit_of, &self.periods, onsets)),
        )?;
        Panel::assemble(
            self.config.clone(),
            table,
            self.unit_labels.clone(),
            self.unit_of.clone(),
            self.periods.clone(),
            onsets.to_vec(),
            self.balanced_units.clone(),
            self.diagnostics.units_dropped_unbalanced,
            self.diagnostics.rows_dropped_unbalanced,
        )
    }

    /// Panel configuration.
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.unit_of.len()
    }

    /// Number of units.
    pub fn n_units(&self) -> usize {
        self.unit_labels.len()
    }

    /// Number of distinct periods.
    pub fn n_periods(&self) -> usize {
        self.period_levels.len()
    }

    /// Unit labels indexed by dense unit index.
    pub fn unit_labels(&self) -> &[String] {
        &self.unit_labels
    }

    /// Dense unit index per row.
    pub fn unit_of(&self) -> &[usize] {
        &self.unit_of
    }

    /// Period value per row.
    pub fn periods(&self) -> &[i64] {
        &self.periods
    }

    /// Sorted distinct periods.
    pub fn period_levels(&self) -> &[i64] {
        &self.period_levels
    }

    /// Dense period index per row.
    pub fn period_of(&self) -> &[usize] {
        &self.period_of
    }

    /// Group key per row for a fixed-effect dimension.
    pub fn group_of(&self, fe: FixedEffect) -> &[usize] {
        match fe {
            FixedEffect::Unit => &self.unit_of,
            FixedEffect::Period => &self.period_of,
        }
    }

    /// Treatment timing per unit.
    pub fn timing(&self) -> &[TreatmentTiming] {
        &self.timing
    }

    /// Per-unit onsets, indexed like [`Panel::timing`].
    pub fn onsets(&self) -> Vec<Option<i64>> {
        self.timing.iter().map(|t| t.onset).collect()
    }

    /// Event time per row, `None` for never-treated units.
    pub fn event_time(&self) -> &[Option<i64>] {
        &self.event_time
    }

    /// Whether each unit is observed in every period of the input.
    pub fn balanced_units(&self) -> &[bool] {
        &self.balanced_units
    }

    /// Build diagnostics.
    pub fn diagnostics(&self) -> &PanelDiagnostics {
        &self.diagnostics
    }

    /// Underlying columns (input plus derived), rows in panel order.
    pub fn table(&self) -> &LinkedTable {
        &self.table
    }

    /// Numeric column lookup.
    pub fn numeric(&self, name: &str, context: &str) -> Result<&[Option<f64>]> {
        self.table.numeric(name, context)
    }

    /// Any-type column lookup.
    pub fn column(&self, name: &str, context: &str) -> Result<&Column> {
        self.table.column(name, context)
    }

    /// Cohort sizes: `(cohort, number of units)` in cohort order.
    pub fn cohort_sizes(&self) -> Vec<(Cohort, usize)> {
        let mut counts: HashMap<Cohort, usize> = HashMap::new();
        for t in &self.timing {
            *counts.entry(t.cohort).or_default() += 1;
        }
        let mut out: Vec<(Cohort, usize)> = counts.into_iter().collect();
        out.sort();
        out
    }
}

fn treatment_indicator(
    unit_of: &[usize],
    periods: &[i64],
    onsets: &[Option<i64>],
) -> Vec<Option<f64>> {
    unit_of
        .iter()
        .zip(periods)
        .map(|(&u, &p)| Some(if onsets[u].is_some_and(|o| p >= o) { 1.0 } else { 0.0 }))
        .collect()
}

/// Per-unit onset from the explicit onset column, or else from the first
/// treated period.
fn derive_onsets(
    table: &LinkedTable,
    config: &PanelConfig,
    unit_of: &[usize],
    periods: &[i64],
    n_units: usize,
) -> Result<Vec<Option<i64>>> {
    let mut onsets: Vec<Option<i64>> = vec![None; n_units];

    let treatment = match &config.treatment_column {
        Some(tcol) if table.has_column(tcol) => {
            let values = table.numeric(tcol, "treatment indicator")?;
            if let Some(bad) = values.iter().flatten().find(|&&v| v != 0.0 && v != 1.0) {
                return Err(Error::Validation(format!(
                    "treatment column '{tcol}' must be 0 or 1, found {bad}"
                )));
            }
            Some(values)
        }
        _ => None,
    };

    if let Some(ocol) = &config.onset_column {
        let values = table.numeric(ocol, "treatment onset")?;
        for (i, v) in values.iter().enumerate() {
            let Some(v) = v else { continue };
            let onset = integral_period(*v, "treatment onset")?;
            let u = unit_of[i];
            match onsets[u] {
                None => onsets[u] = Some(onset),
                Some(prev) if prev != onset => {
                    return Err(Error::Validation(format!(
                        "onset column '{ocol}' is not constant within a unit ({prev} vs {onset})"
                    )));
                }
                Some(_) => {}
            }
        }
        return Ok(onsets);
    }

    let Some(treatment) = treatment else {
        let tcol = config.treatment_column.clone().unwrap_or_default();
        return Err(Error::missing_column(tcol, "treatment timing"));
    };

    for (i, d) in treatment.iter().enumerate() {
        if *d == Some(1.0) {
            let u = unit_of[i];
            onsets[u] = Some(onsets[u].map_or(periods[i], |o: i64| o.min(periods[i])));
        }
    }

    let switched_off = treatment
        .iter()
        .enumerate()
        .filter(|(i, d)| **d == Some(0.0) && onsets[unit_of[*i]].is_some_and(|o| periods[*i] > o))
        .count();
    if switched_off > 0 {
        log::warn!("{switched_off} row(s) are untreated after their unit's treatment onset");
    }
    Ok(onsets)
}
