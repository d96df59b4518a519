// ⚖️ Reconciliation Engine - derived values must match their constituents
//
// Re-computes every derived column and every synthetic category row from the
// published table and compares. A missing derived value where the constituents
// allow one (or the reverse) is a discrepancy too.

use crate::derive::{sum_min_count, sum_strict, DerivedColumns, TOTAL};
use crate::error::{PipelineError, Result};
use crate::table::{RecordKey, Row, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// Both values present, outside tolerance
    AmountMismatch,
    /// Constituents give a value, the table has none
    MissingValue,
    /// The table has a value the constituents do not support
    UnexpectedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub key: RecordKey,
    pub column: String,
    pub expected: Option<f64>,
    pub actual: Option<f64>,
    pub category: DiscrepancyCategory,
}

impl Discrepancy {
    pub fn difference(&self) -> f64 {
        (self.expected.unwrap_or(0.0) - self.actual.unwrap_or(0.0)).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// "<table>: <column>" being verified
    pub check: String,
    pub rows_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl CheckResult {
    pub fn is_balanced(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub checks: Vec<CheckResult>,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.checks.iter().all(|c| c.is_balanced())
    }

    pub fn discrepancy_count(&self) -> usize {
        self.checks.iter().map(|c| c.discrepancies.len()).sum()
    }

    pub fn summary(&self) -> String {
        let rows: usize = self.checks.iter().map(|c| c.rows_checked).sum();
        format!(
            "Reconciliation: {} checks over {} rows, {} discrepancies",
            self.checks.len(),
            rows,
            self.discrepancy_count()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Absolute tolerance for floating-point comparisons
    pub tolerance: f64,

    /// (key level, label) of synthetic category rows, skipped by column checks
    synthetic: Option<(String, String)>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: 0.01,
            synthetic: None,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        ReconciliationEngine {
            tolerance,
            synthetic: None,
        }
    }

    /// Builder pattern: leave synthetic category rows out of column checks
    pub fn skipping_category(mut self, level: &str, label: &str) -> Self {
        self.synthetic = Some((level.to_string(), label.to_string()));
        self
    }

    fn compare(&self, key: &RecordKey, column: &str, expected: Option<f64>, actual: Option<f64>) -> Option<Discrepancy> {
        let category = match (expected, actual) {
            (Some(e), Some(a)) if (e - a).abs() <= self.tolerance => return None,
            (None, None) => return None,
            (Some(_), Some(_)) => DiscrepancyCategory::AmountMismatch,
            (Some(_), None) => DiscrepancyCategory::MissingValue,
            (None, Some(_)) => DiscrepancyCategory::UnexpectedValue,
        };
        Some(Discrepancy {
            key: key.clone(),
            column: column.to_string(),
            expected,
            actual,
            category,
        })
    }

    /// Verify the columns a `DerivedColumns` definition adds to `table`
    pub fn check_derived(&self, table: &Table, derived: &DerivedColumns) -> Vec<CheckResult> {
        let derived_names = derived.derived_names();
        let primary: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| !derived_names.contains(&c.as_str()))
            .cloned()
            .collect();

        let mut results = Vec::new();
        if derived.has_total() {
            results.push(self.run_check(table, TOTAL, |row| sum_min_count(row, &primary)));
        }
        for sub in derived.subtotals() {
            results.push(self.run_check(table, &sub.name, |row| sum_strict(row, &sub.constituents)));
        }
        results
    }

    fn run_check<F>(&self, table: &Table, column: &str, expected: F) -> CheckResult
    where
        F: Fn(&Row) -> Option<f64>,
    {
        let skip = self
            .synthetic
            .as_ref()
            .and_then(|(level, label)| table.level(level).ok().map(|idx| (idx, label)));

        let mut rows_checked = 0;
        let mut discrepancies = Vec::new();
        for (key, row) in table.rows() {
            if matches!(skip, Some((idx, label)) if &key.secondary[idx] == label) {
                continue;
            }
            rows_checked += 1;
            let actual = row.get(column).copied();
            if let Some(d) = self.compare(key, column, expected(row), actual) {
                discrepancies.push(d);
            }
        }
        CheckResult {
            check: format!("{}: {}", table.name(), column),
            rows_checked,
            discrepancies,
        }
    }

    /// Verify synthetic category rows: each must equal the sum of
    /// `value_column` over the other categories of its group.
    pub fn check_category_total(
        &self,
        table: &Table,
        category_level: &str,
        total_label: &str,
        value_column: &str,
    ) -> Result<CheckResult> {
        let level = table.level(category_level)?;
        if !table.has_column(value_column) {
            return Err(PipelineError::contract(table.name(), value_column, "missing required column"));
        }

        let mut expected: BTreeMap<RecordKey, Option<f64>> = BTreeMap::new();
        let mut actual: BTreeMap<RecordKey, Option<f64>> = BTreeMap::new();
        for (key, row) in table.rows() {
            let group = key.without_level(level);
            let value = row.get(value_column).copied();
            if key.secondary[level] == total_label {
                actual.insert(group, value);
            } else {
                let slot = expected.entry(group).or_insert(None);
                if let Some(v) = value {
                    *slot = Some(slot.unwrap_or(0.0) + v);
                }
            }
        }

        let column = format!("{} {}", total_label, value_column);
        let mut discrepancies = Vec::new();
        let groups: BTreeSet<&RecordKey> = expected.keys().chain(actual.keys()).collect();
        for group in &groups {
            let e = expected.get(*group).copied().flatten();
            let a = actual.get(*group).copied().flatten();
            let mut key = (*group).clone();
            key.secondary.insert(level, total_label.to_string());
            if let Some(d) = self.compare(&key, &column, e, a) {
                discrepancies.push(d);
            }
        }

        Ok(CheckResult {
            check: format!("{}: {}", table.name(), column),
            rows_checked: groups.len(),
            discrepancies,
        })
    }

    /// Bundle check results into a timestamped report
    pub fn report(&self, checks: Vec<CheckResult>) -> ReconciliationReport {
        ReconciliationReport {
            checks,
            reconciled_at: chrono::Utc::now(),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{append_category_total, sum_by_key, Record};
    use crate::derive::{Placement, SubTotal};

    fn row(values: &[(&str, f64)]) -> Row {
        values.iter().map(|(c, v)| (c.to_string(), *v)).collect()
    }

    fn mbo_definition() -> DerivedColumns {
        DerivedColumns::new()
            .with_total(Placement::Front)
            .with_subtotal(SubTotal::new("MBO Total", &["MBO1", "MBO2"], Placement::End))
    }

    fn enrollment() -> Table {
        let base = Table::from_rows(
            "enrollment",
            vec![],
            vec!["MBO1".to_string(), "MBO2".to_string()],
            vec![
                (RecordKey::new(2020, "Delft"), row(&[("MBO1", 3.0), ("MBO2", 4.0)])),
                (RecordKey::new(2020, "Leiden"), row(&[("MBO1", 5.0)])),
            ],
        )
        .unwrap();
        mbo_definition().apply(&base).unwrap()
    }

    #[test]
    fn test_derived_columns_reconcile() {
        let engine = ReconciliationEngine::new();
        let checks = engine.check_derived(&enrollment(), &mbo_definition());
        let report = engine.report(checks);

        assert_eq!(report.checks.len(), 2);
        assert!(report.is_balanced(), "{}", report.summary());
        assert_eq!(report.checks[0].rows_checked, 2);
    }

    #[test]
    fn test_tampered_total_is_detected() {
        let table = enrollment();
        let tampered = Table::from_rows(
            table.name(),
            vec![],
            table.columns().to_vec(),
            table.rows().map(|(k, r)| {
                let mut r = r.clone();
                if k.municipality == "Delft" {
                    r.insert(TOTAL.to_string(), 99.0);
                }
                (k.clone(), r)
            }),
        )
        .unwrap();

        let engine = ReconciliationEngine::new();
        let report = engine.report(engine.check_derived(&tampered, &mbo_definition()));
        assert_eq!(report.discrepancy_count(), 1);
        let d = &report.checks[0].discrepancies[0];
        assert_eq!(d.category, DiscrepancyCategory::AmountMismatch);
        assert_eq!(d.expected, Some(7.0));
        assert_eq!(d.difference(), 92.0);
    }

    #[test]
    fn test_category_total_reconciles() {
        let base = RecordKey::new(2020, "Amsterdam").with_secondary("Begroting");
        let record = |category: &str, total: f64| Record {
            key: base.clone().with_secondary(category),
            values: row(&[("Total", total)]),
            file: "Gemeenten_2020_lasten.csv".to_string(),
            line: 1,
        };
        let lines = sum_by_key(
            "expenditure",
            vec!["ReportType".to_string(), "Category".to_string()],
            vec!["Total".to_string()],
            vec![record("4.1", 100.0), record("4.2", 50.0)],
        )
        .unwrap();
        let table = append_category_total(&lines, "Category", "4.T TOTAL", "Total").unwrap();

        let engine = ReconciliationEngine::new();
        let check = engine
            .check_category_total(&table, "Category", "4.T TOTAL", "Total")
            .unwrap();
        assert!(check.is_balanced());
        assert_eq!(check.rows_checked, 1);

        let with_total = DerivedColumns::new().with_total(Placement::Front);
        let derived = with_total.apply(&lines.rename_columns(&[("Total", "Expenses")]).unwrap()).unwrap();
        let derived = append_category_total(&derived, "Category", "4.T TOTAL", "Total").unwrap();
        let skipping = ReconciliationEngine::new().skipping_category("Category", "4.T TOTAL");
        let checks = skipping.check_derived(&derived, &with_total);
        assert!(checks[0].is_balanced());
        assert_eq!(checks[0].rows_checked, 2);

        // without the synthetic row the group's total is missing
        let check = engine
            .check_category_total(&lines, "Category", "4.T TOTAL", "Total")
            .unwrap();
        assert_eq!(check.discrepancies[0].category, DiscrepancyCategory::MissingValue);
    }
}
