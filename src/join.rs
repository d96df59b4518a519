// 🔗 Join Engine - outer join of canonical tables on (Year, Municipality)
//
// Tables are joined pairwise, left-accumulating, in the order given. All
// preconditions are checked before the first join so a collision never
// leaves a half-built result behind.

use crate::error::{PipelineError, Result};
use crate::table::{RecordKey, Row, Table};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct JoinEngine {
    /// Drop every row with at least one missing column after all joins
    pub full_data_only: bool,
}

impl JoinEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_data_only(full_data_only: bool) -> Self {
        JoinEngine { full_data_only }
    }

    /// Check key shape and column uniqueness across all tables
    pub fn check_preconditions(tables: &[&Table]) -> Result<()> {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for table in tables {
            if !table.key_names().is_empty() {
                return Err(PipelineError::contract(
                    table.name(),
                    table.key_names().join(", "),
                    "join requires tables keyed by (Year, Municipality) only",
                ));
            }
            for column in table.columns() {
                if let Some(owner) = owners.insert(column.as_str(), table.name()) {
                    return Err(PipelineError::KeyCollision {
                        column: column.clone(),
                        left: owner.to_string(),
                        right: table.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Outer join of two tables. Columns from the side lacking a key stay missing.
    pub fn outer_join(left: &Table, right: &Table, name: &str) -> Result<Table> {
        Self::check_preconditions(&[left, right])?;

        let keys: BTreeSet<&RecordKey> = left.keys().chain(right.keys()).collect();
        let rows = keys.into_iter().map(|key| {
            let mut row: Row = left.row(key).cloned().unwrap_or_default();
            if let Some(r) = right.row(key) {
                row.extend(r.iter().map(|(c, v)| (c.clone(), *v)));
            }
            (key.clone(), row)
        });

        let columns = left
            .columns()
            .iter()
            .chain(right.columns())
            .cloned()
            .collect();
        Table::from_rows(name, Vec::new(), columns, rows)
    }

    /// Join all tables in the given order, then apply the full-data filter once
    pub fn merge(&self, name: &str, tables: Vec<Table>) -> Result<Table> {
        Self::check_preconditions(&tables.iter().collect::<Vec<_>>())?;

        let mut tables = tables.into_iter();
        let Some(first) = tables.next() else {
            return Ok(Table::new(name, Vec::new(), Vec::new()));
        };

        let mut merged = first.renamed(name);
        for table in tables {
            merged = Self::outer_join(&merged, &table, name)?;
        }

        let joined_rows = merged.len();
        if self.full_data_only {
            merged = merged.drop_incomplete();
        }
        info!(
            table = name,
            rows = merged.len(),
            dropped_incomplete = joined_rows - merged.len(),
            columns = merged.columns().len(),
            "merged tables"
        );
        Ok(merged)
    }
}
