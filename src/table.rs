// 📋 Canonical Table - keyed rows plus an explicit presentation order
//
// Storage is a BTreeMap keyed by the composite key, so uniqueness is structural.
// A cell that is absent from a row is "missing"; NaN is never stored.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const YEAR: &str = "Year";
pub const MUNICIPALITY: &str = "Municipality";

// ============================================================================
// COMPOSITE KEY
// ============================================================================

/// Composite key: (Year, Municipality, ...secondary components)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub year: i32,
    pub municipality: String,
    pub secondary: Vec<String>,
}

impl RecordKey {
    pub fn new(year: i32, municipality: impl Into<String>) -> Self {
        RecordKey {
            year,
            municipality: municipality.into(),
            secondary: Vec::new(),
        }
    }

    /// Builder pattern: append a secondary key component
    pub fn with_secondary(mut self, part: impl Into<String>) -> Self {
        self.secondary.push(part.into());
        self
    }

    /// Same key with the secondary component at `level` removed
    pub fn without_level(&self, level: usize) -> RecordKey {
        let mut key = self.clone();
        if level < key.secondary.len() {
            key.secondary.remove(level);
        }
        key
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}", self.year, self.municipality)?;
        for part in &self.secondary {
            write!(f, ", {}", part)?;
        }
        write!(f, ")")
    }
}

/// One row: column name → value. Absent column = missing.
pub type Row = BTreeMap<String, f64>;

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    key_names: Vec<String>,
    columns: Vec<String>,
    rows: BTreeMap<RecordKey, Row>,
}

impl Table {
    /// Empty table. `key_names` names the secondary key components only.
    pub fn new(name: impl Into<String>, key_names: Vec<String>, columns: Vec<String>) -> Self {
        Table {
            name: name.into(),
            key_names,
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Build a table from rows, rejecting duplicate keys and unknown columns.
    pub fn from_rows<I>(
        name: impl Into<String>,
        key_names: Vec<String>,
        columns: Vec<String>,
        rows: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (RecordKey, Row)>,
    {
        let mut table = Table::new(name, key_names, columns);
        for (key, row) in rows {
            table.check_shape(&key, &row)?;
            if table.rows.contains_key(&key) {
                return Err(PipelineError::DuplicateKey {
                    dataset: table.name.clone(),
                    key: key.to_string(),
                });
            }
            table.rows.insert(key, row);
        }
        Ok(table)
    }

    fn check_shape(&self, key: &RecordKey, row: &Row) -> Result<()> {
        if key.secondary.len() != self.key_names.len() {
            return Err(PipelineError::contract(
                &self.name,
                key.to_string(),
                format!("key has {} secondary components, table expects {}", key.secondary.len(), self.key_names.len()),
            ));
        }
        if let Some(col) = row.keys().find(|c| !self.columns.contains(c)) {
            return Err(PipelineError::contract(&self.name, col.clone(), "value for undeclared column"));
        }
        Ok(())
    }

    /// Stage-internal insert; callers own the uniqueness decision.
    pub(crate) fn insert_row(&mut self, key: RecordKey, row: Row) -> Option<Row> {
        debug_assert_eq!(key.secondary.len(), self.key_names.len());
        self.rows.insert(key, row)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RecordKey, &Row)> {
        self.rows.iter()
    }

    pub fn row(&self, key: &RecordKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn get(&self, key: &RecordKey, column: &str) -> Option<f64> {
        self.rows.get(key).and_then(|row| row.get(column).copied())
    }

    /// Position of a secondary key component by name
    pub fn level(&self, name: &str) -> Result<usize> {
        self.key_names
            .iter()
            .position(|k| k == name)
            .ok_or_else(|| PipelineError::contract(&self.name, name, "no such key level"))
    }

    /// Sum of a column over all rows where it is present
    pub fn column_sum(&self, column: &str) -> f64 {
        self.rows.values().filter_map(|row| row.get(column)).sum()
    }

    /// Distinct municipalities in key order
    pub fn municipalities(&self) -> Vec<String> {
        self.rows
            .keys()
            .map(|k| k.municipality.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// True when every declared column has a value in this row
    pub fn is_complete(&self, row: &Row) -> bool {
        self.columns.iter().all(|c| row.contains_key(c))
    }

    // ========================================================================
    // DERIVED TABLES (never mutate self)
    // ========================================================================

    /// Same rows under a new table name
    pub fn renamed(&self, name: impl Into<String>) -> Table {
        let mut table = self.clone();
        table.name = name.into();
        table
    }

    /// Rename columns. Renames whose source column is absent are no-ops, so
    /// applying the same mapping twice changes nothing. A rename onto an
    /// existing, different column is a collision.
    pub fn rename_columns(&self, renames: &[(&str, &str)]) -> Result<Table> {
        let mut columns = self.columns.clone();
        for (from, to) in renames {
            if from == to {
                continue;
            }
            let Some(pos) = columns.iter().position(|c| c == from) else {
                continue;
            };
            if columns.iter().any(|c| c == to) {
                return Err(PipelineError::KeyCollision {
                    column: to.to_string(),
                    left: self.name.clone(),
                    right: self.name.clone(),
                });
            }
            columns[pos] = to.to_string();
        }

        let rows = self
            .rows
            .iter()
            .map(|(key, row)| {
                let renamed = row
                    .iter()
                    .map(|(col, v)| {
                        let name = renames
                            .iter()
                            .find(|(from, _)| from == col)
                            .map(|(_, to)| to.to_string())
                            .unwrap_or_else(|| col.clone());
                        (name, *v)
                    })
                    .collect();
                (key.clone(), renamed)
            })
            .collect();

        Ok(Table {
            name: self.name.clone(),
            key_names: self.key_names.clone(),
            columns,
            rows,
        })
    }

    /// Keep only the given columns, in the given order
    pub fn select(&self, columns: &[&str]) -> Result<Table> {
        for col in columns {
            if !self.has_column(col) {
                return Err(PipelineError::contract(&self.name, *col, "missing required column"));
            }
        }
        let rows = self
            .rows
            .iter()
            .map(|(key, row)| {
                let kept = row
                    .iter()
                    .filter(|(c, _)| columns.contains(&c.as_str()))
                    .map(|(c, v)| (c.clone(), *v))
                    .collect();
                (key.clone(), kept)
            })
            .collect();
        Ok(Table {
            name: self.name.clone(),
            key_names: self.key_names.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }

    /// Cross-section: keep rows whose key level `level` equals `value`, and
    /// drop that level from the key.
    pub fn cross_section(&self, level: &str, value: &str) -> Result<Table> {
        let idx = self.level(level)?;
        let mut key_names = self.key_names.clone();
        key_names.remove(idx);
        let rows = self
            .rows
            .iter()
            .filter(|(key, _)| key.secondary[idx] == value)
            .map(|(key, row)| (key.without_level(idx), row.clone()))
            .collect();
        Ok(Table {
            name: self.name.clone(),
            key_names,
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Rows with at least one missing column removed
    pub fn drop_incomplete(&self) -> Table {
        let rows = self
            .rows
            .iter()
            .filter(|(_, row)| self.is_complete(row))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        Table {
            name: self.name.clone(),
            key_names: self.key_names.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[(&str, f64)]) -> Row {
        values.iter().map(|(c, v)| (c.to_string(), *v)).collect()
    }

    fn sample() -> Table {
        Table::from_rows(
            "sample",
            vec!["ReportType".to_string()],
            vec!["A".to_string(), "B".to_string()],
            vec![
                (RecordKey::new(2020, "Amsterdam").with_secondary("Begroting"), row(&[("A", 1.0), ("B", 2.0)])),
                (RecordKey::new(2020, "Amsterdam").with_secondary("Realisatie"), row(&[("A", 3.0)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let key = RecordKey::new(2020, "Delft");
        let result = Table::from_rows(
            "dup",
            vec![],
            vec!["A".to_string()],
            vec![(key.clone(), row(&[("A", 1.0)])), (key, row(&[("A", 2.0)]))],
        );
        assert!(matches!(result, Err(PipelineError::DuplicateKey { .. })));
    }

    #[test]
    fn test_undeclared_column_rejected() {
        let result = Table::from_rows(
            "bad",
            vec![],
            vec!["A".to_string()],
            vec![(RecordKey::new(2020, "Delft"), row(&[("Z", 1.0)]))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rename_is_idempotent() {
        let table = sample();
        let renames = [("A", "Alpha")];
        let once = table.rename_columns(&renames).unwrap();
        let twice = once.rename_columns(&renames).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.columns(), &["Alpha".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_rename_onto_existing_column_collides() {
        let table = sample();
        let result = table.rename_columns(&[("A", "B")]);
        assert!(matches!(result, Err(PipelineError::KeyCollision { .. })));
    }

    #[test]
    fn test_cross_section_drops_level() {
        let table = sample();
        let begroting = table.cross_section("ReportType", "Begroting").unwrap();
        assert!(begroting.key_names().is_empty());
        assert_eq!(begroting.len(), 1);
        assert_eq!(begroting.get(&RecordKey::new(2020, "Amsterdam"), "B"), Some(2.0));
    }

    #[test]
    fn test_select_and_drop_incomplete() {
        let table = sample();
        assert_eq!(table.drop_incomplete().len(), 1);

        let only_a = table.select(&["A"]).unwrap();
        assert_eq!(only_a.drop_incomplete().len(), 2);
        assert!(table.select(&["Missing"]).is_err());
    }
}
