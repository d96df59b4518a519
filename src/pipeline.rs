// 🚰 Pipeline - discover inputs, run the three chains, join
//
// Loading, normalizing and aggregating happen per chain; the chains share no
// data and run on the rayon pool. The join starts once all three are done and
// always applies enrollment, expenditure, poverty in that order.

use crate::config::PipelineConfig;
use crate::data_quality::{DefectLog, SourceSummary};
use crate::derive::{DerivedColumns, Placement, TOTAL};
use crate::error::{PipelineError, Result};
use crate::join::JoinEngine;
use crate::loader::RawTable;
use crate::normalize::{
    detect_source, enrollment, expenditure, poverty, EnrollmentInputs, EnrollmentNormalizer, ExpenditureFile,
    ExpenditureNormalizer, PovertyNormalizer, SourceKind, SourceNormalizer,
};
use crate::category::SplitMode;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::table::Table;
use chrono::{DateTime, Utc};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MERGED: &str = "merged";

// ============================================================================
// INPUT DISCOVERY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPaths {
    pub enrollment_aggregate: PathBuf,
    pub enrollment_primary: PathBuf,
    pub enrollment_secondary: PathBuf,
    pub municipality_codes: PathBuf,
    pub expenditure: Vec<PathBuf>,
    pub poverty: PathBuf,
}

impl InputPaths {
    /// Search `dir` and its subdirectories for the input files by name.
    /// Single-file sources take the first match in path order.
    pub fn discover(dir: &Path) -> Result<Self> {
        let pattern = format!("{}/**/*.csv", dir.display());
        let mut found: BTreeMap<SourceKind, Vec<PathBuf>> = BTreeMap::new();

        for entry in glob(&pattern)? {
            let path = entry.map_err(|e| PipelineError::Io(e.into_error()))?;
            match detect_source(&path) {
                Ok(kind) => found.entry(kind).or_default().push(path),
                Err(_) => debug!(file = %path.display(), "skipping file of unknown source"),
            }
        }
        for paths in found.values_mut() {
            paths.sort();
        }

        let mut single = |kind: SourceKind| -> Result<PathBuf> {
            let paths = found.remove(&kind).unwrap_or_default();
            if paths.len() > 1 {
                warn!(
                    source = kind.name(),
                    candidates = paths.len(),
                    chosen = %paths[0].display(),
                    "several input files match, using the first"
                );
            }
            paths.into_iter().next().ok_or_else(|| {
                PipelineError::contract(
                    kind.name(),
                    format!("{}*.csv", kind.file_prefix()),
                    format!("no input file found under {}", dir.display()),
                )
            })
        };

        let paths = InputPaths {
            enrollment_aggregate: single(SourceKind::EnrollmentAggregate)?,
            enrollment_primary: single(SourceKind::EnrollmentPrimary)?,
            enrollment_secondary: single(SourceKind::EnrollmentSecondary)?,
            municipality_codes: single(SourceKind::MunicipalityCodes)?,
            poverty: single(SourceKind::Poverty)?,
            expenditure: found.remove(&SourceKind::Expenditure).unwrap_or_default(),
        };
        if paths.expenditure.is_empty() {
            return Err(PipelineError::contract(
                SourceKind::Expenditure.name(),
                "Gemeenten_<YYYY>_*.csv",
                format!("no input file found under {}", dir.display()),
            ));
        }

        info!(
            dir = %dir.display(),
            expenditure_files = paths.expenditure.len(),
            "discovered input files"
        );
        Ok(paths)
    }
}

fn load(path: &Path, kind: SourceKind) -> Result<RawTable> {
    RawTable::from_path(path, &kind.loader_options())
}

// ============================================================================
// OUTPUT
// ============================================================================

/// The three canonical tables, before the merge views are taken
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub enrollment: Table,
    pub expenditure: Table,
    pub poverty: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub full_data_only: bool,
    /// Row count per canonical table, merged table included
    pub rows: BTreeMap<String, usize>,
    pub merged_columns: Vec<String>,
    pub defects: BTreeMap<String, SourceSummary>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub merged: Table,
    pub sources: SourceTables,
    pub defects: DefectLog,
    pub report: RunReport,
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn enrollment_normalizer(&self) -> Result<EnrollmentNormalizer> {
        let mut normalizer = EnrollmentNormalizer::new(self.config.aliases()?)
            .with_split_mode(SplitMode::from(self.config.split_vmbo))
            .with_unmatched_policy(self.config.unmatched_categories);
        for kind in [
            SourceKind::EnrollmentAggregate,
            SourceKind::EnrollmentPrimary,
            SourceKind::EnrollmentSecondary,
        ] {
            normalizer = normalizer.with_ignored(kind, self.config.ignored_for(kind.name()).to_vec());
        }
        Ok(normalizer)
    }

    pub fn expenditure_normalizer(&self) -> Result<ExpenditureNormalizer> {
        Ok(
            ExpenditureNormalizer::new(self.config.aliases()?, self.config.expenditure_value_headers.clone())
                .with_unmatched_policy(self.config.unmatched_categories)
                .with_ignored(self.config.ignored_for(SourceKind::Expenditure.name()).to_vec()),
        )
    }

    pub fn poverty_normalizer(&self) -> Result<PovertyNormalizer> {
        Ok(PovertyNormalizer::new(self.config.aliases()?)
            .with_ignored(self.config.ignored_for(SourceKind::Poverty.name()).to_vec()))
    }

    pub fn build_enrollment(&self, paths: &InputPaths) -> Result<(Table, DefectLog)> {
        let inputs = EnrollmentInputs {
            aggregate: load(&paths.enrollment_aggregate, SourceKind::EnrollmentAggregate)?,
            primary: load(&paths.enrollment_primary, SourceKind::EnrollmentPrimary)?,
            codes: load(&paths.municipality_codes, SourceKind::MunicipalityCodes)?,
            secondary: load(&paths.enrollment_secondary, SourceKind::EnrollmentSecondary)?,
        };
        let mut log = DefectLog::new();
        let table = self.enrollment_normalizer()?.normalize(&inputs, &mut log)?;
        Ok((table, log))
    }

    pub fn build_expenditure(&self, paths: &InputPaths) -> Result<(Table, DefectLog)> {
        let files = paths
            .expenditure
            .iter()
            .map(|p| ExpenditureFile::load(p))
            .collect::<Result<Vec<_>>>()?;
        let mut log = DefectLog::new();
        let table = self.expenditure_normalizer()?.normalize(&files, &mut log)?;
        Ok((table, log))
    }

    pub fn build_poverty(&self, paths: &InputPaths) -> Result<(Table, DefectLog)> {
        let raw = load(&paths.poverty, SourceKind::Poverty)?;
        let mut log = DefectLog::new();
        let table = self.poverty_normalizer()?.normalize(&raw, &mut log)?;
        Ok((table, log))
    }

    /// Run the three chains concurrently; collect their tables and logs
    pub fn build_sources(&self, paths: &InputPaths) -> Result<(SourceTables, DefectLog)> {
        let (enrollment, (expenditure, poverty)) = rayon::join(
            || self.build_enrollment(paths),
            || rayon::join(|| self.build_expenditure(paths), || self.build_poverty(paths)),
        );
        let (enrollment, mut defects) = enrollment?;
        let (expenditure, expenditure_log) = expenditure?;
        let (poverty, poverty_log) = poverty?;
        defects.merge(expenditure_log);
        defects.merge(poverty_log);

        Ok((
            SourceTables {
                enrollment,
                expenditure,
                poverty,
            },
            defects,
        ))
    }

    /// Join-ready views of the source tables, in join order
    pub fn merge_views(&self, sources: &SourceTables) -> Result<Vec<Table>> {
        Ok(vec![
            enrollment::merge_view(&sources.enrollment, self.config.enrollment_total_only)?,
            expenditure::merge_view(&sources.expenditure, &self.config.report_type)?,
            poverty::merge_view(&sources.poverty)?,
        ])
    }

    pub fn run(&self, paths: &InputPaths) -> Result<PipelineOutput> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "pipeline run started");

        let (sources, defects) = self.build_sources(paths)?;
        let merged = JoinEngine::with_full_data_only(self.config.full_data_only)
            .merge(MERGED, self.merge_views(&sources)?)?;

        let mut rows = BTreeMap::new();
        for table in [&sources.enrollment, &sources.expenditure, &sources.poverty, &merged] {
            rows.insert(table.name().to_string(), table.len());
        }
        let report = RunReport {
            run_id,
            generated_at: Utc::now(),
            full_data_only: self.config.full_data_only,
            rows,
            merged_columns: merged.columns().to_vec(),
            defects: defects.summary(),
        };

        info!(
            %run_id,
            rows = merged.len(),
            defects = defects.defects().len(),
            unmatched = defects.warnings().len(),
            "pipeline run finished"
        );
        Ok(PipelineOutput {
            merged,
            sources,
            defects,
            report,
        })
    }

    /// Re-check every derived value of the source tables
    pub fn verify(&self, sources: &SourceTables) -> Result<ReconciliationReport> {
        self.verify_with_tolerance(sources, ReconciliationEngine::new().tolerance)
    }

    pub fn verify_with_tolerance(&self, sources: &SourceTables, tolerance: f64) -> Result<ReconciliationReport> {
        let engine = ReconciliationEngine::with_tolerance(tolerance);
        let mut checks = engine.check_derived(
            &sources.enrollment,
            &enrollment::derived_columns(sources.enrollment.columns()),
        );

        let expenditure_engine = ReconciliationEngine::with_tolerance(tolerance)
            .skipping_category(expenditure::CATEGORY, expenditure::TOTAL_CATEGORY);
        checks.extend(expenditure_engine.check_derived(
            &sources.expenditure,
            &DerivedColumns::new().with_total(Placement::Front),
        ));
        checks.push(engine.check_category_total(
            &sources.expenditure,
            expenditure::CATEGORY,
            expenditure::TOTAL_CATEGORY,
            TOTAL,
        )?);

        let report = engine.report(checks);
        info!(
            checks = report.checks.len(),
            discrepancies = report.discrepancy_count(),
            "reconciliation finished"
        );
        Ok(report)
    }
}
