// 🚨 Pipeline Errors - fatal conditions that abort a run
// Recoverable row-level problems live in data_quality::DefectLog instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required column is absent, a header is not in the mapping table,
    /// or an input file does not follow its naming contract.
    #[error("input contract violation in {dataset}: field '{field}': {detail}")]
    InputContractViolation {
        dataset: String,
        field: String,
        detail: String,
    },

    /// Two tables handed to the join carry the same non-key column.
    #[error("column '{column}' exists in both '{left}' and '{right}'")]
    KeyCollision {
        column: String,
        left: String,
        right: String,
    },

    /// A free-text label matched no taxonomy rule while the taxonomy is closed.
    #[error("unmatched category in {dataset} (line {line}): '{label}'")]
    UnmatchedCategory {
        dataset: String,
        label: String,
        line: usize,
    },

    /// Two records share one composite key where the table requires uniqueness.
    #[error("duplicate key in {dataset}: {key}")]
    DuplicateKey { dataset: String, key: String },

    /// A derived column definition refers to something it may not use.
    #[error("invalid derivation for '{column}': {detail}")]
    InvalidDerivation { column: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl PipelineError {
    pub fn contract(
        dataset: impl Into<String>,
        field: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        PipelineError::InputContractViolation {
            dataset: dataset.into(),
            field: field.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
