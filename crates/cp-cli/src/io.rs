//! CSV input and CSV/JSON output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cp_core::{Column, LinkedTable, ResultTables};
use serde::Serialize;

pub const ESTIMATION_CSV: &str = "estimation_results.csv";
pub const COEFFICIENTS_CSV: &str = "coefficients.csv";
pub const ROBUSTNESS_CSV: &str = "robustness_results.csv";
pub const PLACEBO_CSV: &str = "placebo_results.csv";

/// Read a CSV file into a [`LinkedTable`].
///
/// Columns whose non-missing cells all parse as f64 become numeric; others
/// stay text.
pub fn read_table(path: &Path) -> Result<LinkedTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records: Vec<Vec<String>> = Vec::new();
    for result in rdr.records() {
        let record = result.context("failed to read CSV row")?;
        records.push(record.iter().map(str::to_string).collect());
    }
    if records.is_empty() {
        anyhow::bail!("{}: CSV file contains no data rows", path.display());
    }

    let table = LinkedTable::from_string_records(&headers, &records)
        .with_context(|| format!("invalid table {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = table.n_rows(), columns = headers.len(), "table loaded");
    Ok(table)
}

/// Write a [`LinkedTable`] as CSV, missing cells empty.
pub fn write_table(path: &Path, table: &LinkedTable) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    wtr.write_record(table.column_names())?;
    let columns: Vec<&Column> = table.iter().map(|(_, c)| c).collect();
    for i in 0..table.n_rows() {
        let row: Vec<String> = columns.iter().map(|c| c.label(i).unwrap_or_default()).collect();
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write every non-empty table of `tables` under `out_dir`; returns the
/// files written.
pub fn write_tables(out_dir: &Path, tables: &ResultTables) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut written = Vec::new();
    let mut emit = |name: &str, empty: bool, f: &dyn Fn(&Path) -> Result<()>| -> Result<()> {
        if !empty {
            let path = out_dir.join(name);
            f(&path)?;
            written.push(path);
        }
        Ok(())
    };
    emit(ESTIMATION_CSV, tables.estimates.is_empty(), &|p| write_records(p, &tables.estimates))?;
    emit(COEFFICIENTS_CSV, tables.coefficients.is_empty(), &|p| {
        write_records(p, &tables.coefficients)
    })?;
    emit(ROBUSTNESS_CSV, tables.robustness.is_empty(), &|p| write_records(p, &tables.robustness))?;
    emit(PLACEBO_CSV, tables.placebo.is_empty(), &|p| write_records(p, &tables.placebo))?;
    for path in &written {
        tracing::info!(path = %path.display(), "wrote");
    }
    Ok(written)
}

pub fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
