// ✅ Data Quality - recoverable defects recorded during normalization
//
// A RowDefect excludes one row and the run continues. An unmatched category
// label under the `Warn` policy is recorded here as well.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Row could not be used at all
    Warning,  // Row was excluded on one bad field
}

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDefect {
    pub source: String,
    pub file: String,
    pub line: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryWarning {
    pub source: String,
    pub file: String,
    pub line: usize,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub defects: usize,
    /// Defects of `Severity::Critical`, counted within `defects`
    pub critical: usize,
    pub unmatched_categories: usize,
}

// ============================================================================
// DEFECT LOG
// ============================================================================

/// Owned by one normalizer chain, merged after the chains complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectLog {
    defects: Vec<RowDefect>,
    warnings: Vec<CategoryWarning>,
}

impl DefectLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_defect(&mut self, defect: RowDefect) {
        warn!(
            source = %defect.source,
            file = %defect.file,
            line = defect.line,
            field = %defect.field,
            value = %defect.value,
            "row rejected: {}",
            defect.reason
        );
        self.defects.push(defect);
    }

    pub fn record_unmatched(&mut self, warning: CategoryWarning) {
        warn!(
            source = %warning.source,
            file = %warning.file,
            line = warning.line,
            label = %warning.label,
            "category label matched no rule, row excluded"
        );
        self.warnings.push(warning);
    }

    /// Absorb another chain's log
    pub fn merge(&mut self, other: DefectLog) {
        self.defects.extend(other.defects);
        self.warnings.extend(other.warnings);
    }

    pub fn defects(&self) -> &[RowDefect] {
        &self.defects
    }

    pub fn warnings(&self) -> &[CategoryWarning] {
        &self.warnings
    }

    pub fn is_clean(&self) -> bool {
        self.defects.is_empty() && self.warnings.is_empty()
    }

    pub fn severity_of(defect: &RowDefect) -> Severity {
        if defect.field.is_empty() {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }

    /// Counts per source name
    pub fn summary(&self) -> BTreeMap<String, SourceSummary> {
        let mut summary: BTreeMap<String, SourceSummary> = BTreeMap::new();
        for d in &self.defects {
            let entry = summary.entry(d.source.clone()).or_default();
            entry.defects += 1;
            if Self::severity_of(d) == Severity::Critical {
                entry.critical += 1;
            }
        }
        for w in &self.warnings {
            summary.entry(w.source.clone()).or_default().unmatched_categories += 1;
        }
        summary
    }
}
