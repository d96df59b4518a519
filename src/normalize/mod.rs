// 🧹 Source Normalizers - loader rows → canonical records
//
// One normalizer per dataset. Each resolves its headers against a static
// mapping, coerces years and numbers with locale fixups, and applies the
// municipality alias table before anything is keyed.

pub mod enrollment;
pub mod expenditure;
pub mod poverty;

use crate::category::UnmatchedPolicy;
use crate::data_quality::{CategoryWarning, DefectLog, RowDefect};
use crate::error::{PipelineError, Result};
use crate::loader::{LoaderOptions, RawRow};
use crate::table::{Row, Table};
use std::collections::BTreeMap;
use std::path::Path;

pub use enrollment::{EnrollmentInputs, EnrollmentNormalizer};
pub use expenditure::{ExpenditureFile, ExpenditureNormalizer};
pub use poverty::PovertyNormalizer;

/// SourceNormalizer - one implementation per dataset
///
/// Takes loaded raw tables and produces the dataset's canonical, aggregated
/// table. Recoverable row problems go to `log`; anything returned as `Err`
/// aborts the run.
pub trait SourceNormalizer: Send + Sync {
    type Input;

    /// Dataset name, used as the table name and in defect records
    fn dataset(&self) -> &'static str;

    fn normalize(&self, input: &Self::Input, log: &mut DefectLog) -> Result<Table>;
}

// ============================================================================
// SOURCE KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    EnrollmentAggregate,
    EnrollmentPrimary,
    EnrollmentSecondary,
    MunicipalityCodes,
    Expenditure,
    Poverty,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::EnrollmentAggregate,
        SourceKind::EnrollmentPrimary,
        SourceKind::EnrollmentSecondary,
        SourceKind::MunicipalityCodes,
        SourceKind::Expenditure,
        SourceKind::Poverty,
    ];

    /// Name used in logs, defects and config keys
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::EnrollmentAggregate => "enrollment-aggregate",
            SourceKind::EnrollmentPrimary => "enrollment-primary",
            SourceKind::EnrollmentSecondary => "enrollment-secondary",
            SourceKind::MunicipalityCodes => "municipality-codes",
            SourceKind::Expenditure => "expenditure",
            SourceKind::Poverty => "poverty",
        }
    }

    /// Leading file-name fragment that identifies the source
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SourceKind::EnrollmentAggregate => "Regionale_kerncijfers_",
            SourceKind::EnrollmentPrimary => "primary_education_",
            SourceKind::EnrollmentSecondary => "enrollment-secondary",
            SourceKind::MunicipalityCodes => "georef",
            SourceKind::Expenditure => "Gemeenten_",
            SourceKind::Poverty => "Laag_en_langdurig_laag_inkomen_",
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        match self {
            SourceKind::EnrollmentAggregate => LoaderOptions::statline(3),
            SourceKind::EnrollmentPrimary | SourceKind::EnrollmentSecondary => LoaderOptions::csv(b','),
            SourceKind::MunicipalityCodes => LoaderOptions::csv(b';'),
            SourceKind::Expenditure | SourceKind::Poverty => LoaderOptions::statline(4),
        }
    }

    pub fn number_format(&self) -> NumberFormat {
        match self {
            SourceKind::EnrollmentAggregate | SourceKind::Expenditure | SourceKind::Poverty => {
                NumberFormat::STATLINE
            }
            _ => NumberFormat::PLAIN,
        }
    }
}

/// Detect the source of a file from its name
pub fn detect_source(path: &Path) -> Result<SourceKind> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if !filename.to_lowercase().ends_with(".csv") {
        return Err(PipelineError::contract("input", filename, "not a .csv file"));
    }

    SourceKind::ALL
        .iter()
        .copied()
        .find(|kind| filename.starts_with(kind.file_prefix()))
        .ok_or_else(|| PipelineError::contract("input", filename, "file name matches no known source"))
}

// ============================================================================
// MUNICIPALITY ALIASES
// ============================================================================

/// Literal alias table for merge-key normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MunicipalityAliases {
    map: BTreeMap<String, String>,
}

impl MunicipalityAliases {
    /// A canonical name may not itself be an alias, so applying the table
    /// to its own output never changes it.
    pub fn new(map: BTreeMap<String, String>) -> Result<Self> {
        for (alias, canonical) in &map {
            if alias != canonical && map.contains_key(canonical) {
                return Err(PipelineError::Config(format!(
                    "alias '{}' maps to '{}', which is itself an alias",
                    alias, canonical
                )));
            }
        }
        Ok(MunicipalityAliases { map })
    }

    pub fn canonical(&self, name: &str) -> String {
        let name = name.trim();
        self.map
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// First letter upper case, the rest lower case ("AMSTERDAM" → "Amsterdam")
pub fn capitalize(name: &str) -> String {
    let mut chars = name.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

// ============================================================================
// LOCALE-AWARE NUMBERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalSeparator {
    Point,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub decimal: DecimalSeparator,
    /// Cell contents that mean "no value"
    pub missing: &'static [&'static str],
}

impl NumberFormat {
    pub const STATLINE: NumberFormat = NumberFormat {
        decimal: DecimalSeparator::Comma,
        missing: &["", "."],
    };

    pub const PLAIN: NumberFormat = NumberFormat {
        decimal: DecimalSeparator::Point,
        missing: &[""],
    };
}

fn strip_footnote(raw: &str) -> &str {
    raw.trim().trim_end_matches('*').trim_end()
}

/// Parse a year, tolerating footnote markers ("2021*")
pub fn parse_year(raw: &str) -> std::result::Result<i32, String> {
    let cleaned = strip_footnote(raw);
    cleaned
        .parse::<i32>()
        .map_err(|_| format!("'{}' is not a year", raw.trim()))
}

/// Parse a numeric cell. `Ok(None)` is a missing value, `Err` a malformed one.
pub fn parse_number(raw: &str, format: &NumberFormat) -> std::result::Result<Option<f64>, String> {
    let cleaned = strip_footnote(raw);
    if format.missing.contains(&cleaned) {
        return Ok(None);
    }

    let normalized = match format.decimal {
        DecimalSeparator::Comma if cleaned.contains(',') => cleaned.replace(['.', ' '], "").replace(',', "."),
        _ => cleaned.to_string(),
    };

    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("'{}' is not a number", raw.trim())),
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

/// Where a row came from, for defect records
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowContext<'a> {
    pub source: &'a str,
    pub file: &'a str,
    pub line: usize,
}

impl<'a> RowContext<'a> {
    pub fn new(source: &'a str, file: &'a str, row: &RawRow) -> Self {
        RowContext {
            source,
            file,
            line: row.line,
        }
    }

    pub fn defect(&self, field: &str, value: &str, reason: impl Into<String>) -> RowDefect {
        RowDefect {
            source: self.source.to_string(),
            file: self.file.to_string(),
            line: self.line,
            field: field.to_string(),
            value: value.trim().to_string(),
            reason: reason.into(),
        }
    }

    /// Year cell, or a recorded defect
    pub fn year(&self, row: &RawRow, index: usize, log: &mut DefectLog) -> Option<i32> {
        let raw = row.get(index);
        match parse_year(raw) {
            Ok(year) => Some(year),
            Err(reason) => {
                log.record_defect(self.defect("Year", raw, reason));
                None
            }
        }
    }

    /// All value columns of a row; the first malformed cell rejects the row
    pub fn values(
        &self,
        row: &RawRow,
        columns: &[(usize, String)],
        format: &NumberFormat,
        log: &mut DefectLog,
    ) -> Option<Row> {
        let mut values = Row::new();
        for (index, name) in columns {
            let raw = row.get(*index);
            match parse_number(raw, format) {
                Ok(Some(v)) => {
                    values.insert(name.clone(), v);
                }
                Ok(None) => {}
                Err(reason) => {
                    log.record_defect(self.defect(name, raw, reason));
                    return None;
                }
            }
        }
        Some(values)
    }
}

/// Apply the unmatched-label policy to one row whose label matched no rule
pub(crate) fn handle_unmatched(
    policy: UnmatchedPolicy,
    ctx: &RowContext<'_>,
    label: &str,
    log: &mut DefectLog,
) -> Result<()> {
    match policy {
        UnmatchedPolicy::Warn => {
            log.record_unmatched(CategoryWarning {
                source: ctx.source.to_string(),
                file: ctx.file.to_string(),
                line: ctx.line,
                label: label.trim().to_string(),
            });
            Ok(())
        }
        UnmatchedPolicy::Fail => Err(PipelineError::UnmatchedCategory {
            dataset: ctx.source.to_string(),
            label: label.trim().to_string(),
            line: ctx.line,
        }),
    }
}

/// Ignore list for a source: built-in names plus configured extras
pub(crate) fn ignore_list(builtin: &[&str], extra: &[String]) -> Vec<String> {
    builtin
        .iter()
        .map(|s| s.to_string())
        .chain(extra.iter().cloned())
        .collect()
}
