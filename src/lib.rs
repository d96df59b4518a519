// Municipal Education Statistics - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod error;
pub mod table;
pub mod loader;
pub mod schema;          // Header → role mapping per source
pub mod category;        // Ordered taxonomy rules for free-text labels
pub mod normalize;       // One normalizer per dataset
pub mod aggregate;
pub mod derive;          // Total and sub-total columns
pub mod join;
pub mod data_quality;    // Row defects and unmatched-label warnings
pub mod reconciliation;  // Derived values vs. constituents
pub mod config;
pub mod pipeline;
pub mod export;
pub mod logging;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use table::{RecordKey, Row, Table, MUNICIPALITY, YEAR};
pub use loader::{LoaderOptions, RawRow, RawTable};
pub use schema::{ColumnRole, HeaderMap, HeaderRef, KeyField, ResolvedSchema};
pub use category::{CategoryMatch, Rule, SplitMode, Taxonomy, UnmatchedPolicy};
pub use normalize::{
    capitalize, detect_source, parse_number, parse_year, EnrollmentInputs, EnrollmentNormalizer,
    ExpenditureFile, ExpenditureNormalizer, MunicipalityAliases, NumberFormat, PovertyNormalizer,
    SourceKind, SourceNormalizer,
};
pub use aggregate::{append_category_total, pivot_categories, sum_by_key, unique_by_key, FillPolicy, Record};
pub use derive::{DerivedColumns, Placement, SubTotal, TOTAL};
pub use join::JoinEngine;
pub use data_quality::{CategoryWarning, DefectLog, RowDefect, Severity, SourceSummary};
pub use reconciliation::{
    CheckResult, Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport,
};
pub use config::PipelineConfig;
pub use pipeline::{InputPaths, Pipeline, PipelineOutput, RunReport, SourceTables, MERGED};
pub use export::{city_series, complete_municipalities, CitySeries, OutputFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
