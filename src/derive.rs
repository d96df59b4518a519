// ➕ Derived Column Engine - totals and sub-totals over aggregated columns
//
// `Total` sums the primary columns with min_count=1. Sub-totals are
// informational views: they are computed from primary columns only and never
// feed back into `Total` or into each other.

use crate::error::{PipelineError, Result};
use crate::table::{Row, Table};
use std::collections::BTreeMap;

pub const TOTAL: &str = "Total";

/// Where a derived column goes in the presentation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Front,
    At(usize),
    After(String),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTotal {
    pub name: String,
    pub constituents: Vec<String>,
    pub placement: Placement,
}

impl SubTotal {
    pub fn new(name: &str, constituents: &[&str], placement: Placement) -> Self {
        SubTotal {
            name: name.to_string(),
            constituents: constituents.iter().map(|c| c.to_string()).collect(),
            placement,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedColumns {
    total: Option<Placement>,
    subtotals: Vec<SubTotal>,
}

/// min_count=1 sum: None when no column has a value
pub fn sum_min_count(row: &Row, columns: &[String]) -> Option<f64> {
    let mut present = columns.iter().filter_map(|c| row.get(c)).peekable();
    present.peek()?;
    Some(present.sum())
}

/// Strict sum: None when any column is missing
pub fn sum_strict(row: &Row, columns: &[String]) -> Option<f64> {
    columns.iter().map(|c| row.get(c).copied()).sum()
}

impl DerivedColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add the row-wise grand total
    pub fn with_total(mut self, placement: Placement) -> Self {
        self.total = Some(placement);
        self
    }

    /// Builder pattern: add a sub-total
    pub fn with_subtotal(mut self, subtotal: SubTotal) -> Self {
        self.subtotals.push(subtotal);
        self
    }

    pub fn subtotals(&self) -> &[SubTotal] {
        &self.subtotals
    }

    pub fn has_total(&self) -> bool {
        self.total.is_some()
    }

    /// Names of every column this definition adds
    pub fn derived_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.subtotals.iter().map(|s| s.name.as_str()).collect();
        if self.total.is_some() {
            names.push(TOTAL);
        }
        names
    }

    fn validate(&self, primary: &[String], table: &Table) -> Result<()> {
        let derived = self.derived_names();

        for name in &derived {
            if primary.iter().any(|c| c == name) {
                return Err(PipelineError::KeyCollision {
                    column: name.to_string(),
                    left: table.name().to_string(),
                    right: "derived columns".to_string(),
                });
            }
        }

        for sub in &self.subtotals {
            if sub.constituents.is_empty() {
                return Err(PipelineError::InvalidDerivation {
                    column: sub.name.clone(),
                    detail: "no constituent columns".to_string(),
                });
            }
            for c in &sub.constituents {
                if derived.contains(&c.as_str()) {
                    return Err(PipelineError::InvalidDerivation {
                        column: sub.name.clone(),
                        detail: format!("'{}' is itself derived", c),
                    });
                }
                if !primary.contains(c) {
                    return Err(PipelineError::InvalidDerivation {
                        column: sub.name.clone(),
                        detail: format!("'{}' is not a column of {}", c, table.name()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Produce a new table with the derived columns added
    pub fn apply(&self, table: &Table) -> Result<Table> {
        let primary: Vec<String> = table.columns().to_vec();
        self.validate(&primary, table)?;

        let mut rows: BTreeMap<_, Row> = BTreeMap::new();
        for (key, row) in table.rows() {
            let mut out = row.clone();
            if self.total.is_some() {
                if let Some(total) = sum_min_count(row, &primary) {
                    out.insert(TOTAL.to_string(), total);
                }
            }
            for sub in &self.subtotals {
                if let Some(v) = sum_strict(row, &sub.constituents) {
                    out.insert(sub.name.clone(), v);
                }
            }
            rows.insert(key.clone(), out);
        }

        let mut columns = primary;
        if let Some(placement) = &self.total {
            place(&mut columns, TOTAL, placement);
        }
        for sub in &self.subtotals {
            place(&mut columns, &sub.name, &sub.placement);
        }

        Table::from_rows(table.name(), table.key_names().to_vec(), columns, rows)
    }
}

fn place(columns: &mut Vec<String>, name: &str, placement: &Placement) {
    let index = match placement {
        Placement::Front => 0,
        Placement::At(i) => (*i).min(columns.len()),
        Placement::After(anchor) => columns
            .iter()
            .position(|c| c == anchor)
            .map(|p| p + 1)
            .unwrap_or(columns.len()),
        Placement::End => columns.len(),
    };
    columns.insert(index, name.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RecordKey;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    fn table(rows: Vec<(RecordKey, Vec<(&str, f64)>)>) -> Table {
        Table::from_rows(
            "enrollment",
            vec![],
            cols(&["Primary", "MBO1", "MBO2", "HBO"]),
            rows.into_iter()
                .map(|(k, vals)| (k, vals.iter().map(|(c, v)| (c.to_string(), *v)).collect())),
        )
        .unwrap()
    }

    #[test]
    fn test_total_min_count_law() {
        let all_missing = RecordKey::new(2020, "Nergens");
        let one_present = RecordKey::new(2020, "Delft");
        let t = table(vec![(all_missing.clone(), vec![]), (one_present.clone(), vec![("HBO", 7.0)])]);

        let derived = DerivedColumns::new().with_total(Placement::Front).apply(&t).unwrap();
        assert_eq!(derived.get(&all_missing, TOTAL), None);
        assert_eq!(derived.get(&one_present, TOTAL), Some(7.0));
        assert_eq!(derived.columns()[0], TOTAL);
    }

    #[test]
    fn test_subtotal_not_folded_into_total() {
        let k = RecordKey::new(2020, "Delft");
        let t = table(vec![(k.clone(), vec![("Primary", 1.0), ("MBO1", 2.0), ("MBO2", 3.0), ("HBO", 4.0)])]);
        let derived = DerivedColumns::new()
            .with_total(Placement::Front)
            .with_subtotal(SubTotal::new("MBO Total", &["MBO1", "MBO2"], Placement::After("MBO2".to_string())))
            .apply(&t)
            .unwrap();

        assert_eq!(derived.get(&k, TOTAL), Some(10.0));
        assert_eq!(derived.get(&k, "MBO Total"), Some(5.0));
        assert_eq!(
            derived.columns(),
            &cols(&["Total", "Primary", "MBO1", "MBO2", "MBO Total", "HBO"])
        );
    }

    #[test]
    fn test_subtotal_missing_when_constituent_missing() {
        let k = RecordKey::new(2020, "Delft");
        let t = table(vec![(k.clone(), vec![("MBO1", 2.0)])]);
        let derived = DerivedColumns::new()
            .with_subtotal(SubTotal::new("MBO Total", &["MBO1", "MBO2"], Placement::End))
            .apply(&t)
            .unwrap();
        assert_eq!(derived.get(&k, "MBO Total"), None);
    }

    #[test]
    fn test_subtotal_of_derived_column_rejected() {
        let t = table(vec![]);
        let result = DerivedColumns::new()
            .with_total(Placement::Front)
            .with_subtotal(SubTotal::new("Everything", &["Total", "HBO"], Placement::End))
            .apply(&t);
        assert!(matches!(result, Err(PipelineError::InvalidDerivation { .. })));
    }

    #[test]
    fn test_subtotal_of_unknown_column_rejected() {
        let t = table(vec![]);
        let result = DerivedColumns::new()
            .with_subtotal(SubTotal::new("Secondary", &["VWO"], Placement::End))
            .apply(&t);
        assert!(matches!(result, Err(PipelineError::InvalidDerivation { .. })));
    }

    #[test]
    fn test_sum_preservation_over_rows() {
        let rows = vec![
            (RecordKey::new(2019, "A"), vec![("MBO1", 3.0), ("MBO2", 4.0)]),
            (RecordKey::new(2020, "A"), vec![("MBO1", 10.0), ("MBO2", 1.0)]),
            (RecordKey::new(2020, "B"), vec![("MBO1", 0.0), ("MBO2", 8.0)]),
        ];
        let t = table(rows);
        let derived = DerivedColumns::new()
            .with_subtotal(SubTotal::new("MBO Total", &["MBO1", "MBO2"], Placement::End))
            .apply(&t)
            .unwrap();
        assert_eq!(
            derived.column_sum("MBO Total"),
            derived.column_sum("MBO1") + derived.column_sum("MBO2")
        );
    }
}
