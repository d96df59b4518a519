// 🧮 Aggregator - collapse raw records into one row per composite key
//
// Sum uses min_count=1 semantics per cell: a cell with no contributing
// value stays missing; one present contributor is enough for a value.

use crate::data_quality::{DefectLog, RowDefect};
use crate::error::Result;
use crate::table::{RecordKey, Row, Table};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A normalized, not yet aggregated measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    pub values: Row,
    pub file: String,
    pub line: usize,
}

/// Fill policy for (key, category) combinations with no records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// The category set is closed: absent means zero
    Zero,
    /// Coverage is not guaranteed: absent stays missing
    Missing,
}

fn add_into(target: &mut Row, values: &Row) {
    for (col, v) in values {
        *target.entry(col.clone()).or_insert(0.0) += v;
    }
}

/// Sum all records sharing a key
pub fn sum_by_key(
    name: &str,
    key_names: Vec<String>,
    columns: Vec<String>,
    records: Vec<Record>,
) -> Result<Table> {
    let mut sums: BTreeMap<RecordKey, Row> = BTreeMap::new();
    let input = records.len();
    for record in records {
        add_into(sums.entry(record.key).or_default(), &record.values);
    }
    debug!(table = name, records = input, keys = sums.len(), "summed by key");
    Table::from_rows(name, key_names, columns, sums)
}

/// For sources that are already aggregated: a repeated key is a row defect,
/// the first occurrence is kept.
pub fn unique_by_key(
    name: &str,
    key_names: Vec<String>,
    columns: Vec<String>,
    records: Vec<Record>,
    log: &mut DefectLog,
) -> Result<Table> {
    let mut table = Table::new(name, key_names, columns);
    for record in records {
        if table.row(&record.key).is_some() {
            log.record_defect(RowDefect {
                source: name.to_string(),
                file: record.file,
                line: record.line,
                field: String::new(),
                value: record.key.to_string(),
                reason: "duplicate composite key in an aggregated source".to_string(),
            });
            continue;
        }
        table.insert_row(record.key, record.values);
    }
    Ok(table)
}

/// Long → wide: the last secondary key component of each record is its
/// category. Values of `value_column` are summed per (key, category) and the
/// categories become columns. `declared` categories always get a column, even
/// when no record carries them.
pub fn pivot_categories(
    name: &str,
    records: Vec<Record>,
    value_column: &str,
    declared: &[String],
    fill: FillPolicy,
) -> Result<Table> {
    let mut categories: BTreeSet<String> = declared.iter().cloned().collect();
    let mut cells: BTreeMap<RecordKey, Row> = BTreeMap::new();

    for mut record in records {
        let Some(category) = record.key.secondary.pop() else {
            continue;
        };
        let Some(value) = record.values.get(value_column).copied() else {
            continue;
        };
        categories.insert(category.clone());
        *cells.entry(record.key).or_default().entry(category).or_insert(0.0) += value;
    }

    if fill == FillPolicy::Zero {
        for row in cells.values_mut() {
            for category in &categories {
                row.entry(category.clone()).or_insert(0.0);
            }
        }
    }

    let key_names = Vec::new();
    Table::from_rows(name, key_names, categories.into_iter().collect(), cells)
}

/// Append a synthetic category row per group: for every key with the
/// category level removed, `total_label` gets the sum of `value_column` over
/// the group's other categories. Only `value_column` is set on the new row.
pub fn append_category_total(
    table: &Table,
    category_level: &str,
    total_label: &str,
    value_column: &str,
) -> Result<Table> {
    let level = table.level(category_level)?;
    if !table.has_column(value_column) {
        return Err(crate::error::PipelineError::contract(
            table.name(),
            value_column,
            "missing required column",
        ));
    }

    let mut groups: BTreeMap<RecordKey, Option<f64>> = BTreeMap::new();
    for (key, row) in table.rows() {
        if key.secondary[level] == total_label {
            continue;
        }
        let slot = groups.entry(key.without_level(level)).or_insert(None);
        if let Some(v) = row.get(value_column) {
            *slot = Some(slot.unwrap_or(0.0) + v);
        }
    }

    let mut rows: Vec<(RecordKey, Row)> = table
        .rows()
        .filter(|(key, _)| key.secondary[level] != total_label)
        .map(|(k, r)| (k.clone(), r.clone()))
        .collect();
    for (group, total) in groups {
        let mut key = group;
        key.secondary.insert(level, total_label.to_string());
        let mut row = Row::new();
        if let Some(total) = total {
            row.insert(value_column.to_string(), total);
        }
        rows.push((key, row));
    }

    Table::from_rows(
        table.name(),
        table.key_names().to_vec(),
        table.columns().to_vec(),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: RecordKey, values: &[(&str, f64)]) -> Record {
        Record {
            key,
            values: values.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
            file: "test.csv".to_string(),
            line: 2,
        }
    }

    #[test]
    fn test_sum_keeps_missing_cells_missing() {
        let k = RecordKey::new(2020, "Delft");
        let table = sum_by_key(
            "primary",
            vec![],
            vec!["Primary".to_string(), "Other".to_string()],
            vec![record(k.clone(), &[("Primary", 10.0)]), record(k.clone(), &[("Primary", 5.0)])],
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&k, "Primary"), Some(15.0));
        assert_eq!(table.get(&k, "Other"), None);
    }

    #[test]
    fn test_unique_rejects_repeated_key() {
        let k = RecordKey::new(2019, "Utrecht (gemeente)");
        let mut log = DefectLog::new();
        let table = unique_by_key(
            "poverty",
            vec![],
            vec!["A".to_string()],
            vec![record(k.clone(), &[("A", 1.0)]), record(k.clone(), &[("A", 9.0)])],
            &mut log,
        )
        .unwrap();
        assert_eq!(table.get(&k, "A"), Some(1.0));
        assert_eq!(log.defects().len(), 1);
    }

    #[test]
    fn test_pivot_zero_fills_closed_categories() {
        let delft = RecordKey::new(2020, "Delft");
        let leiden = RecordKey::new(2020, "Leiden");
        let declared = vec!["PRAKTIJK".to_string(), "VWO".to_string()];
        let table = pivot_categories(
            "secondary",
            vec![
                record(delft.clone().with_secondary("VWO"), &[("Students", 30.0)]),
                record(delft.clone().with_secondary("VWO"), &[("Students", 12.0)]),
                record(leiden.clone().with_secondary("HAVO"), &[("Students", 7.0)]),
            ],
            "Students",
            &declared,
            FillPolicy::Zero,
        )
        .unwrap();

        assert_eq!(table.columns(), &["HAVO", "PRAKTIJK", "VWO"]);
        assert_eq!(table.get(&delft, "VWO"), Some(42.0));
        assert_eq!(table.get(&delft, "HAVO"), Some(0.0));
        assert_eq!(table.get(&leiden, "PRAKTIJK"), Some(0.0));
        assert_eq!(table.get(&leiden, "HAVO"), Some(7.0));
    }

    #[test]
    fn test_pivot_missing_policy_leaves_gaps() {
        let delft = RecordKey::new(2020, "Delft");
        let table = pivot_categories(
            "lines",
            vec![record(delft.clone().with_secondary("4.1"), &[("Total", 3.0)])],
            "Total",
            &["4.2".to_string()],
            FillPolicy::Missing,
        )
        .unwrap();
        assert_eq!(table.get(&delft, "4.2"), None);
    }

    #[test]
    fn test_category_total_row() {
        let base = RecordKey::new(2020, "Amsterdam").with_secondary("Begroting");
        let table = sum_by_key(
            "expenditure",
            vec!["ReportType".to_string(), "Category".to_string()],
            vec!["Total".to_string()],
            vec![
                record(base.clone().with_secondary("4.1"), &[("Total", 100.0)]),
                record(base.clone().with_secondary("4.2"), &[("Total", 50.0)]),
            ],
        )
        .unwrap();

        let with_total = append_category_total(&table, "Category", "4.T TOTAL", "Total").unwrap();
        assert_eq!(with_total.len(), 3);
        assert_eq!(with_total.get(&base.clone().with_secondary("4.T TOTAL"), "Total"), Some(150.0));
    }

    #[test]
    fn test_category_total_is_not_counted_twice() {
        let base = RecordKey::new(2020, "Amsterdam").with_secondary("Begroting");
        let table = sum_by_key(
            "expenditure",
            vec!["ReportType".to_string(), "Category".to_string()],
            vec!["Total".to_string()],
            vec![record(base.clone().with_secondary("4.1"), &[("Total", 100.0)])],
        )
        .unwrap();
        let once = append_category_total(&table, "Category", "4.T TOTAL", "Total").unwrap();
        let twice = append_category_total(&once, "Category", "4.T TOTAL", "Total").unwrap();
        assert_eq!(once, twice);
    }
}
