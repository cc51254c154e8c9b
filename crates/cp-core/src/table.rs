//! Linked input table.
//!
//! The tabular dataset handed over by the ingestion/linkage stages: named,
//! equal-length columns that are either numeric or text, with explicit
//! missing values.

use std::collections::HashMap;

use serde::Serialize;

use crate::{Error, Result};

/// Markers treated as missing when parsing text cells.
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "."];

/// One column of a [`LinkedTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum Column {
    /// Numeric values; `None` is missing.
    Numeric(Vec<Option<f64>>),
    /// Text values; `None` is missing.
    Text(Vec<Option<String>>),
}

impl Column {
    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// True when the column has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grouping key of cell `row`, `None` when missing.
    pub fn key(&self, row: usize) -> Option<CellKey> {
        match self {
            Column::Numeric(v) => v[row].map(CellKey::from_f64),
            Column::Text(v) => v[row].as_ref().map(|s| CellKey::Text(s.clone())),
        }
    }

    /// Cell `row` rendered as a label, `None` when missing.
    pub fn label(&self, row: usize) -> Option<String> {
        match self {
            Column::Numeric(v) => v[row].map(format_number),
            Column::Text(v) => v[row].clone(),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// Exact-equality key of a cell, used for cluster and unit grouping.
///
/// Numeric cells compare by bit pattern (with `-0.0` folded into `0.0`), so
/// two cells share a key iff they hold the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellKey {
    /// Numeric cell, ordered by bit pattern.
    Number(u64),
    /// Text cell.
    Text(String),
}

impl CellKey {
    /// Key for a numeric value.
    pub fn from_f64(v: f64) -> Self {
        let v = if v == 0.0 { 0.0 } else { v };
        CellKey::Number(v.to_bits())
    }
}

/// Render a numeric label without a trailing `.0` for integral values.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Column-oriented table with named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkedTable {
    n_rows: usize,
    names: Vec<String>,
    columns: Vec<Column>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl LinkedTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (0 for a table without columns).
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Add (or replace) a column.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if !self.names.is_empty() && column.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column '{}' has length {}, expected {}",
                name,
                column.len(),
                self.n_rows
            )));
        }
        if let Some(&j) = self.index.get(&name) {
            self.columns[j] = column;
            return Ok(());
        }
        self.n_rows = column.len();
        self.index.insert(name.clone(), self.names.len());
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Builder-style [`LinkedTable::insert`] for a numeric column.
    pub fn with_numeric(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self> {
        self.insert(name, Column::Numeric(values))?;
        Ok(self)
    }

    /// Builder-style [`LinkedTable::insert`] for a fully observed numeric column.
    pub fn with_values(self, name: impl Into<String>, values: &[f64]) -> Result<Self> {
        self.with_numeric(name, values.iter().map(|&v| Some(v)).collect())
    }

    /// Builder-style [`LinkedTable::insert`] for a text column.
    pub fn with_text(mut self, name: impl Into<String>, values: Vec<Option<String>>) -> Result<Self> {
        self.insert(name, Column::Text(values))?;
        Ok(self)
    }

    /// Look up a column; absent → [`Error::MissingColumn`] with `context`.
    pub fn column(&self, name: &str, context: &str) -> Result<&Column> {
        self.index
            .get(name)
            .map(|&j| &self.columns[j])
            .ok_or_else(|| Error::missing_column(name, context))
    }

    /// Look up a numeric column.
    pub fn numeric(&self, name: &str, context: &str) -> Result<&[Option<f64>]> {
        match self.column(name, context)? {
            Column::Numeric(v) => Ok(v),
            Column::Text(_) => {
                Err(Error::Validation(format!("column '{name}' is not numeric ({context})")))
            }
        }
    }

    /// Iterate `(name, column)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// New table holding only `rows`, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> LinkedTable {
        let mut out = LinkedTable::new();
        for (name, col) in self.iter() {
            // Lengths agree by construction.
            let _ = out.insert(name, col.select(rows));
        }
        out.n_rows = rows.len();
        out
    }

    /// Build a typed table from raw string records (e.g. CSV rows).
    ///
    /// A column whose non-missing cells all parse as `f64` becomes
    /// [`Column::Numeric`]; anything else stays [`Column::Text`].
    pub fn from_string_records<I, R, S>(headers: &[String], records: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        if headers.is_empty() {
            return Err(Error::Validation("table has no columns".into()));
        }
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for (i, record) in records.into_iter().enumerate() {
            let record = record.as_ref();
            if record.len() != headers.len() {
                return Err(Error::Validation(format!(
                    "row {} has {} fields, expected {}",
                    i + 1,
                    record.len(),
                    headers.len()
                )));
            }
            for (j, cell) in record.iter().enumerate() {
                let cell = cell.as_ref().trim();
                raw[j].push(if MISSING_MARKERS.contains(&cell) {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let mut table = LinkedTable::new();
        for (name, cells) in headers.iter().zip(raw) {
            let numeric = cells.iter().flatten().all(|s| s.parse::<f64>().is_ok());
            let column = if numeric {
                Column::Numeric(
                    cells.iter().map(|c| c.as_ref().and_then(|s| s.parse::<f64>().ok())).collect(),
                )
            } else {
                Column::Text(cells)
            };
            if table.has_column(name) {
                return Err(Error::Validation(format!("duplicate column header '{name}'")));
            }
            table.insert(name.clone(), column)?;
        }
        Ok(table)
    }
}
