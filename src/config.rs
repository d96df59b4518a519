// ⚙️ Pipeline Configuration - every knob the normalizers and join read
//
// Loaded from a JSON file; every field has a default so an empty object
// (or no file at all) gives the standard run.

use crate::category::UnmatchedPolicy;
use crate::error::{PipelineError, Result};
use crate::normalize::MunicipalityAliases;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Source spelling → canonical municipality name, applied in every normalizer
    pub municipality_aliases: BTreeMap<String, String>,

    /// Keep VMBO tracks apart ("VMBO BB") instead of collapsing them into "VMBO"
    pub split_vmbo: bool,

    /// What to do with education-type or budget-line labels no rule matches
    pub unmatched_categories: UnmatchedPolicy,

    /// Report type kept for the merged expenditure column
    pub report_type: String,

    /// Drop merged rows with any missing column
    pub full_data_only: bool,

    /// Merge only the enrollment `Total`, without its sub-totals and categories
    pub enrollment_total_only: bool,

    /// Expenditure value headers → canonical column names
    pub expenditure_value_headers: BTreeMap<String, String>,

    /// Additional headers to accept and ignore, per source name
    pub ignored_headers: BTreeMap<String, Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut municipality_aliases = BTreeMap::new();
        municipality_aliases.insert("Utrecht".to_string(), "Utrecht (gemeente)".to_string());

        let mut expenditure_value_headers = BTreeMap::new();
        expenditure_value_headers.insert("Lasten".to_string(), "Expenses".to_string());

        PipelineConfig {
            municipality_aliases,
            split_vmbo: false,
            unmatched_categories: UnmatchedPolicy::Warn,
            report_type: "Begroting".to_string(),
            full_data_only: false,
            enrollment_total_only: false,
            expenditure_value_headers,
            ignored_headers: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.report_type.trim().is_empty() {
            return Err(PipelineError::Config("report_type must not be empty".to_string()));
        }
        if self.expenditure_value_headers.is_empty() {
            return Err(PipelineError::Config(
                "expenditure_value_headers needs at least one entry".to_string(),
            ));
        }
        self.aliases().map(|_| ())
    }

    pub fn aliases(&self) -> Result<MunicipalityAliases> {
        MunicipalityAliases::new(self.municipality_aliases.clone())
    }

    /// Extra ignored headers for one source
    pub fn ignored_for(&self, source: &str) -> &[String] {
        self.ignored_headers
            .get(source)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Boolean switch from an environment variable or similar free text
pub fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PipelineError::Config(format!("'{}' is not a boolean flag", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_maps_utrecht() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aliases().unwrap().canonical("Utrecht"), "Utrecht (gemeente)");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"split_vmbo": true, "unmatched_categories": "fail"}}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert!(config.split_vmbo);
        assert_eq!(config.unmatched_categories, UnmatchedPolicy::Fail);
        assert_eq!(config.report_type, "Begroting");
    }

    #[test]
    fn test_empty_report_type_rejected() {
        let config = PipelineConfig {
            report_type: " ".to_string(),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = PipelineConfig::from_file("/nonexistent/pipeline.json");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(!parse_flag(" 0 ").unwrap());
        assert!(!parse_flag("OFF").unwrap());
        assert!(matches!(parse_flag("maybe"), Err(PipelineError::Config(_))));
    }
}
