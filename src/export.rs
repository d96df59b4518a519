// 📤 Export - merged table → CSV, JSON and chart-ready views
//
// Missing values are written as empty CSV cells and JSON nulls. Only the
// per-municipality series substitutes 0 for missing.

use crate::error::Result;
use crate::table::{Table, MUNICIPALITY, YEAR};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}' (expected csv or json)", other)),
        }
    }
}

// ============================================================================
// FILE OUTPUT
// ============================================================================

fn header(table: &Table) -> Vec<String> {
    let mut header = vec![YEAR.to_string(), MUNICIPALITY.to_string()];
    header.extend(table.key_names().iter().cloned());
    header.extend(table.columns().iter().cloned());
    header
}

pub fn write_csv<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(header(table))?;

    for (key, row) in table.rows() {
        let mut record = vec![key.year.to_string(), key.municipality.clone()];
        record.extend(key.secondary.iter().cloned());
        record.extend(
            table
                .columns()
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// One JSON object per row, keys first, columns in presentation order
pub fn to_json_rows(table: &Table) -> Value {
    let rows = table
        .rows()
        .map(|(key, row)| {
            let mut object = Map::new();
            object.insert(YEAR.to_string(), Value::from(key.year));
            object.insert(MUNICIPALITY.to_string(), Value::from(key.municipality.clone()));
            for (name, part) in table.key_names().iter().zip(&key.secondary) {
                object.insert(name.clone(), Value::from(part.clone()));
            }
            for column in table.columns() {
                object.insert(column.clone(), row.get(column).copied().map(Value::from).unwrap_or(Value::Null));
            }
            Value::Object(object)
        })
        .collect();
    Value::Array(rows)
}

pub fn write_json<W: Write>(table: &Table, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, &to_json_rows(table))?;
    Ok(())
}

pub fn write_file(table: &Table, path: &Path, format: OutputFormat) -> Result<()> {
    let file = File::create(path)?;
    match format {
        OutputFormat::Csv => write_csv(table, file),
        OutputFormat::Json => write_json(table, file),
    }
}

// ============================================================================
// VIEWS
// ============================================================================

/// Year → column → municipality → value (missing as None)
pub type YearView = BTreeMap<i32, BTreeMap<String, BTreeMap<String, Option<f64>>>>;

pub fn by_year(table: &Table) -> YearView {
    let mut view = YearView::new();
    for (key, row) in table.rows() {
        let columns = view.entry(key.year).or_default();
        for column in table.columns() {
            columns
                .entry(column.clone())
                .or_default()
                .insert(key.municipality.clone(), row.get(column).copied());
        }
    }
    view
}

/// Sorted, distinct municipalities
pub fn municipalities(table: &Table) -> Vec<String> {
    table.municipalities()
}

/// Municipalities with at least one row that has every column
pub fn complete_municipalities(table: &Table) -> Vec<String> {
    table
        .rows()
        .filter(|(_, row)| table.is_complete(row))
        .map(|(key, _)| key.municipality.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Bar and line values for one municipality across the table's years
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySeries {
    pub municipality: String,
    pub years: Vec<i32>,
    pub bar_column: String,
    pub bar: Vec<f64>,
    pub line_column: String,
    pub line: Vec<f64>,
}

/// Series over every year in the table; years without a value give 0.
/// `None` when the municipality or a column is unknown.
pub fn city_series(table: &Table, municipality: &str, bar: &str, line: &str) -> Option<CitySeries> {
    if !table.has_column(bar) || !table.has_column(line) {
        return None;
    }
    if !table.keys().any(|k| k.municipality == municipality) {
        return None;
    }

    let years: Vec<i32> = table
        .keys()
        .map(|k| k.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let value = |year: i32, column: &str| {
        table
            .rows()
            .find(|(k, _)| k.year == year && k.municipality == municipality)
            .and_then(|(_, row)| row.get(column).copied())
            .unwrap_or(0.0)
    };

    Some(CitySeries {
        municipality: municipality.to_string(),
        bar: years.iter().map(|y| value(*y, bar)).collect(),
        line: years.iter().map(|y| value(*y, line)).collect(),
        years,
        bar_column: bar.to_string(),
        line_column: line.to_string(),
    })
}
