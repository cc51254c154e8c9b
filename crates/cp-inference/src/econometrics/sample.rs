//! Sample restrictions: row masks over a [`Panel`].

use std::collections::BTreeMap;
use std::fmt;

use cp_core::{Column, Error, Result};
use serde::{Deserialize, Serialize};

use super::panel::Panel;

/// Comparison operator of a covariate-defined subsample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
        }
    }

    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparison::Eq => ord == Equal,
            Comparison::Ne => ord != Equal,
            Comparison::Lt => ord == Less,
            Comparison::Le => ord != Greater,
            Comparison::Gt => ord == Greater,
            Comparison::Ge => ord != Less,
        }
    }
}

/// Right-hand side of a subsample comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubsampleValue {
    /// Compared against numeric columns.
    Number(f64),
    /// Compared against text columns (equality only).
    Text(String),
}

impl fmt::Display for SubsampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubsampleValue::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => {
                write!(f, "{}", *v as i64)
            }
            SubsampleValue::Number(v) => write!(f, "{v}"),
            SubsampleValue::Text(s) => f.write_str(s),
        }
    }
}

/// Which panel rows enter an estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleRestriction {
    /// Every row.
    Full,
    /// Drop the first `k` distinct periods.
    DropFirstPeriods {
        /// Periods dropped.
        k: usize,
    },
    /// Drop the last `k` distinct periods.
    DropLastPeriods {
        /// Periods dropped.
        k: usize,
    },
    /// Keep only units observed in every period.
    BalancedOnly,
    /// Keep rows where `column op value`; rows with a missing value are dropped.
    Subsample {
        /// Covariate column.
        column: String,
        /// Comparison.
        op: Comparison,
        /// Comparison value.
        value: SubsampleValue,
    },
}

impl SampleRestriction {
    /// Stable label used as sample/test name.
    pub fn label(&self) -> String {
        match self {
            SampleRestriction::Full => "full".into(),
            SampleRestriction::DropFirstPeriods { k } => format!("drop_first_{k}"),
            SampleRestriction::DropLastPeriods { k } => format!("drop_last_{k}"),
            SampleRestriction::BalancedOnly => "balanced_only".into(),
            SampleRestriction::Subsample { column, op, value } => {
                format!("subsample_{column}_{}_{value}", op.as_str())
            }
        }
    }

    /// Parse a built-in restriction name: `full`, `balanced`/`balanced_only`,
    /// `drop_first:K`, `drop_last:K` (also `drop_first_K`, `drop_last_K`).
    pub fn parse(name: &str) -> Result<Self> {
        let count = |rest: &str| {
            rest.parse::<usize>().map_err(|_| Error::UnknownSample(name.to_string()))
        };
        match name {
            "full" => return Ok(SampleRestriction::Full),
            "balanced" | "balanced_only" => return Ok(SampleRestriction::BalancedOnly),
            _ => {}
        }
        for prefix in ["drop_first:", "drop_first_"] {
            if let Some(rest) = name.strip_prefix(prefix) {
                return Ok(SampleRestriction::DropFirstPeriods { k: count(rest)? });
            }
        }
        for prefix in ["drop_last:", "drop_last_"] {
            if let Some(rest) = name.strip_prefix(prefix) {
                return Ok(SampleRestriction::DropLastPeriods { k: count(rest)? });
            }
        }
        Err(Error::UnknownSample(name.to_string()))
    }

    /// Resolve `name` against configured samples first, then built-in names.
    pub fn resolve(name: &str, named: &BTreeMap<String, SampleRestriction>) -> Result<Self> {
        match named.get(name) {
            Some(r) => Ok(r.clone()),
            None => Self::parse(name),
        }
    }

    /// Row mask; `None` for [`SampleRestriction::Full`].
    pub fn mask(&self, panel: &Panel) -> Result<Option<Vec<bool>>> {
        let levels = panel.period_levels();
        let periods = panel.periods();
        let mask = match self {
            SampleRestriction::Full => return Ok(None),
            SampleRestriction::DropFirstPeriods { k } => match levels.get(*k) {
                Some(&first_kept) => periods.iter().map(|&p| p >= first_kept).collect(),
                None => vec![false; periods.len()],
            },
            SampleRestriction::DropLastPeriods { k } => {
                let last_kept = k
                    .checked_add(1)
                    .and_then(|k1| levels.len().checked_sub(k1))
                    .map(|j| levels[j]);
                match last_kept {
                    Some(last_kept) => periods.iter().map(|&p| p <= last_kept).collect(),
                    None => vec![false; periods.len()],
                }
            }
            SampleRestriction::BalancedOnly => {
                let balanced = panel.balanced_units();
                panel.unit_of().iter().map(|&u| balanced[u]).collect()
            }
            SampleRestriction::Subsample { column, op, value } => {
                let col = panel.column(column, "subsample")?;
                subsample_mask(col, *op, value, column)?
            }
        };
        Ok(Some(mask))
    }
}

fn subsample_mask(
    col: &Column,
    op: Comparison,
    value: &SubsampleValue,
    name: &str,
) -> Result<Vec<bool>> {
    match (col, value) {
        (Column::Numeric(vals), SubsampleValue::Number(v)) => Ok(vals
            .iter()
            .map(|x| match x.and_then(|x| x.partial_cmp(v)) {
                Some(ord) => op.holds(ord),
                None => false,
            })
            .collect()),
        (Column::Numeric(vals), SubsampleValue::Text(s)) => {
            let v: f64 = s.parse().map_err(|_| {
                Error::Validation(format!("subsample on numeric column '{name}' needs a number, got '{s}'"))
            })?;
            subsample_mask(&Column::Numeric(vals.clone()), op, &SubsampleValue::Number(v), name)
        }
        (Column::Text(vals), value) => {
            if !matches!(op, Comparison::Eq | Comparison::Ne) {
                return Err(Error::Validation(format!(
                    "subsample on text column '{name}' supports only eq/ne"
                )));
            }
            let target = value.to_string();
            Ok(vals
                .iter()
                .map(|x| match x {
                    Some(s) => op.holds(s.as_str().cmp(target.as_str())),
                    None => false,
                })
                .collect())
        }
    }
}
