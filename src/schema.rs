// 📐 Header Schema - vendor headers → canonical roles
//
// Every header a source may carry has exactly one entry: a key field, a value
// column with its canonical name, or an explicit ignore. A header without an
// entry is an input contract violation; so is a required entry without a header.

use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

// ============================================================================
// ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyField {
    Year,
    Municipality,
    MunicipalityCode,
    ReportType,
    Category,
}

impl KeyField {
    pub fn name(&self) -> &str {
        match self {
            KeyField::Year => "Year",
            KeyField::Municipality => "Municipality",
            KeyField::MunicipalityCode => "MunicipalityCode",
            KeyField::ReportType => "ReportType",
            KeyField::Category => "Category",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    Key(KeyField),
    Value { canonical: String, required: bool },
    Ignore,
}

/// How a header cell is addressed: by its text, or by position when blank
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderRef {
    Label(String),
    Blank(usize),
}

impl HeaderRef {
    fn describe(&self) -> String {
        match self {
            HeaderRef::Label(label) => label.clone(),
            HeaderRef::Blank(pos) => format!("<blank header #{}>", pos),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub header: HeaderRef,
    pub role: ColumnRole,
}

// ============================================================================
// HEADER MAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    source: String,
    entries: Vec<HeaderEntry>,
}

impl HeaderMap {
    pub fn new(source: impl Into<String>) -> Self {
        HeaderMap {
            source: source.into(),
            entries: Vec::new(),
        }
    }

    pub fn key(mut self, label: &str, field: KeyField) -> Self {
        self.entries.push(HeaderEntry {
            header: HeaderRef::Label(label.to_string()),
            role: ColumnRole::Key(field),
        });
        self
    }

    pub fn blank_key(mut self, position: usize, field: KeyField) -> Self {
        self.entries.push(HeaderEntry {
            header: HeaderRef::Blank(position),
            role: ColumnRole::Key(field),
        });
        self
    }

    pub fn value(mut self, label: &str, canonical: &str) -> Self {
        self.entries.push(HeaderEntry {
            header: HeaderRef::Label(label.to_string()),
            role: ColumnRole::Value {
                canonical: canonical.to_string(),
                required: true,
            },
        });
        self
    }

    pub fn optional_value(mut self, label: &str, canonical: &str) -> Self {
        self.entries.push(HeaderEntry {
            header: HeaderRef::Label(label.to_string()),
            role: ColumnRole::Value {
                canonical: canonical.to_string(),
                required: false,
            },
        });
        self
    }

    pub fn ignore<S: AsRef<str>>(mut self, labels: &[S]) -> Self {
        for label in labels {
            self.entries.push(HeaderEntry {
                header: HeaderRef::Label(label.as_ref().to_string()),
                role: ColumnRole::Ignore,
            });
        }
        self
    }

    fn lookup(&self, position: usize, header: &str) -> Option<&HeaderEntry> {
        self.entries.iter().find(|e| match &e.header {
            HeaderRef::Label(label) => !header.is_empty() && label == header,
            HeaderRef::Blank(pos) => header.is_empty() && *pos == position,
        })
    }

    /// Resolve a header row into column positions
    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedSchema> {
        let mut keys = BTreeMap::new();
        let mut values = Vec::new();
        let mut seen: Vec<&HeaderEntry> = Vec::new();

        for (position, header) in headers.iter().enumerate() {
            let header = header.trim();
            let entry = self.lookup(position, header).ok_or_else(|| {
                let field = if header.is_empty() {
                    HeaderRef::Blank(position).describe()
                } else {
                    header.to_string()
                };
                PipelineError::contract(&self.source, field, "unrecognized header")
            })?;

            match &entry.role {
                ColumnRole::Key(field) => {
                    if keys.insert(*field, position).is_some() {
                        return Err(PipelineError::contract(&self.source, field.name(), "key column appears twice"));
                    }
                }
                ColumnRole::Value { canonical, .. } => values.push((position, canonical.clone())),
                ColumnRole::Ignore => {}
            }
            seen.push(entry);
        }

        for entry in &self.entries {
            let required = match &entry.role {
                ColumnRole::Key(_) => true,
                ColumnRole::Value { required, .. } => *required,
                ColumnRole::Ignore => false,
            };
            if required && !seen.iter().any(|s| *s == entry) {
                return Err(PipelineError::contract(&self.source, entry.header.describe(), "missing required column"));
            }
        }

        Ok(ResolvedSchema { keys, values })
    }
}

/// Header positions resolved for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    keys: BTreeMap<KeyField, usize>,
    values: Vec<(usize, String)>,
}

impl ResolvedSchema {
    /// Position of a key field. Every key entry is required, so a key declared
    /// in the map is always present after `resolve`.
    pub fn key(&self, field: KeyField) -> Option<usize> {
        self.keys.get(&field).copied()
    }

    /// (position, canonical name) of every value column, in file order
    pub fn values(&self) -> &[(usize, String)] {
        &self.values
    }

    pub fn value_names(&self) -> Vec<String> {
        self.values.iter().map(|(_, name)| name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(h: &[&str]) -> Vec<String> {
        h.iter().map(|s| s.to_string()).collect()
    }

    fn poverty_map() -> HeaderMap {
        HeaderMap::new("poverty")
            .blank_key(0, KeyField::Year)
            .blank_key(1, KeyField::Municipality)
            .blank_key(2, KeyField::Category)
            .value("Minderjarige kinderen", "Minderjarige kinderen")
            .optional_value("Minderjarige kinderen relatief", "Minderjarige kinderen relatief")
    }

    #[test]
    fn test_resolve_blank_and_labelled_headers() {
        let schema = poverty_map()
            .resolve(&headers(&["", "", "", "Minderjarige kinderen"]))
            .unwrap();
        assert_eq!(schema.key(KeyField::Year), Some(0));
        assert_eq!(schema.key(KeyField::Category), Some(2));
        assert_eq!(schema.value_names(), vec!["Minderjarige kinderen"]);
    }

    #[test]
    fn test_unknown_header_is_error() {
        let result = poverty_map().resolve(&headers(&["", "", "", "Minderjarige kinderen", "Huishoudens"]));
        match result {
            Err(PipelineError::InputContractViolation { field, detail, .. }) => {
                assert_eq!(field, "Huishoudens");
                assert_eq!(detail, "unrecognized header");
            }
            other => panic!("expected contract violation, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_column_is_error() {
        let result = poverty_map().resolve(&headers(&["", "", ""]));
        match result {
            Err(PipelineError::InputContractViolation { field, detail, .. }) => {
                assert_eq!(field, "Minderjarige kinderen");
                assert_eq!(detail, "missing required column");
            }
            other => panic!("expected contract violation, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_headers_are_accepted() {
        let map = HeaderMap::new("codes")
            .key("Gemeente code", KeyField::MunicipalityCode)
            .key("Gemeente name", KeyField::Municipality)
            .ignore(&["Provincie name"]);
        let schema = map
            .resolve(&headers(&["Gemeente code", "Provincie name", "Gemeente name"]))
            .unwrap();
        assert_eq!(schema.key(KeyField::Municipality), Some(2));
        assert!(schema.values().is_empty());
    }
}
