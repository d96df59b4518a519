// 💶 Expenditure Normalizer - yearly budget-line files → one expenditure table
//
// One file per year; the year only appears in the file name. Rows are keyed
// (Year, Municipality, ReportType, Category) where Category is the budget-line
// code. Each (Year, Municipality, ReportType) gets a synthetic `4.T TOTAL` row.

use super::{handle_unmatched, ignore_list, MunicipalityAliases, RowContext, SourceKind, SourceNormalizer};
use crate::aggregate::{append_category_total, sum_by_key, Record};
use crate::category::{CategoryMatch, Taxonomy, UnmatchedPolicy};
use crate::data_quality::DefectLog;
use crate::derive::{DerivedColumns, Placement, TOTAL};
use crate::error::{PipelineError, Result};
use crate::loader::RawTable;
use crate::schema::{HeaderMap, KeyField};
use crate::table::{RecordKey, Table};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

pub const DATASET: &str = "expenditure";

pub const REPORT_TYPE: &str = "ReportType";
pub const CATEGORY: &str = "Category";
pub const TOTAL_CATEGORY: &str = "4.T TOTAL";
pub const EDUCATION_EXPENSES: &str = "Education expenses";

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Gemeenten_(\d{4})_").expect("static pattern"))
}

/// One yearly expenditure file
#[derive(Debug, Clone)]
pub struct ExpenditureFile {
    pub year: i32,
    pub raw: RawTable,
}

impl ExpenditureFile {
    /// Year encoded in a file name like `Gemeenten_2020_lasten.csv`
    pub fn year_from_filename(filename: &str) -> Result<i32> {
        year_pattern()
            .captures(filename)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| PipelineError::contract(DATASET, filename, "file name carries no Gemeenten_<YYYY>_ year"))
    }

    pub fn from_raw(raw: RawTable) -> Result<Self> {
        let year = Self::year_from_filename(&raw.source_file)?;
        Ok(ExpenditureFile { year, raw })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = RawTable::from_path(path, &SourceKind::Expenditure.loader_options())?;
        Self::from_raw(raw)
    }
}

#[derive(Debug, Clone)]
pub struct ExpenditureNormalizer {
    aliases: MunicipalityAliases,
    taxonomy: Taxonomy,
    unmatched: UnmatchedPolicy,
    /// Vendor value header → canonical column name
    value_headers: BTreeMap<String, String>,
    extra_ignored: Vec<String>,
}

impl ExpenditureNormalizer {
    pub fn new(aliases: MunicipalityAliases, value_headers: BTreeMap<String, String>) -> Self {
        ExpenditureNormalizer {
            aliases,
            taxonomy: Taxonomy::budget_lines(),
            unmatched: UnmatchedPolicy::Warn,
            value_headers,
            extra_ignored: Vec::new(),
        }
    }

    /// Builder pattern: what to do with labels that carry no budget-line code
    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched = policy;
        self
    }

    /// Builder pattern: accept and ignore extra headers
    pub fn with_ignored(mut self, headers: Vec<String>) -> Self {
        self.extra_ignored = headers;
        self
    }

    fn headers(&self) -> HeaderMap {
        let map = HeaderMap::new(DATASET)
            .blank_key(0, KeyField::Municipality)
            .blank_key(1, KeyField::ReportType)
            .key("Categorie", KeyField::Category);
        self.value_headers
            .iter()
            .fold(map, |map, (label, canonical)| map.optional_value(label, canonical))
            .ignore(&ignore_list(&[], &self.extra_ignored))
    }

    fn records(&self, file: &ExpenditureFile, columns: &mut Vec<String>, log: &mut DefectLog) -> Result<Vec<Record>> {
        let raw = &file.raw;
        let schema = self.headers().resolve(&raw.headers)?;
        if schema.values().is_empty() {
            return Err(PipelineError::contract(
                DATASET,
                raw.source_file.clone(),
                "no expenditure value column present",
            ));
        }
        for name in schema.value_names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }

        let position = |field: KeyField| {
            schema
                .key(field)
                .ok_or_else(|| PipelineError::contract(DATASET, field.name(), "missing required column"))
        };
        let city_at = position(KeyField::Municipality)?;
        let report_at = position(KeyField::ReportType)?;
        let label_at = position(KeyField::Category)?;
        let format = SourceKind::Expenditure.number_format();

        let mut records = Vec::new();
        for row in &raw.rows {
            let ctx = RowContext::new(DATASET, &raw.source_file, row);

            let label = row.get(label_at);
            let code = match self.taxonomy.extract(label) {
                CategoryMatch::Matched(code) => code,
                CategoryMatch::NoMatch => {
                    handle_unmatched(self.unmatched, &ctx, label, log)?;
                    continue;
                }
            };

            let report_type = row.get(report_at).trim();
            if report_type.is_empty() {
                log.record_defect(ctx.defect("Verslagsoort", report_type, "empty report type"));
                continue;
            }

            let Some(values) = ctx.values(row, schema.values(), &format, log) else { continue };
            records.push(Record {
                key: RecordKey::new(file.year, self.aliases.canonical(row.get(city_at)))
                    .with_secondary(report_type)
                    .with_secondary(code),
                values,
                file: raw.source_file.clone(),
                line: row.line,
            });
        }
        Ok(records)
    }
}

impl SourceNormalizer for ExpenditureNormalizer {
    type Input = Vec<ExpenditureFile>;

    fn dataset(&self) -> &'static str {
        DATASET
    }

    fn normalize(&self, files: &Vec<ExpenditureFile>, log: &mut DefectLog) -> Result<Table> {
        let mut columns = Vec::new();
        let mut records = Vec::new();
        for file in files {
            records.extend(self.records(file, &mut columns, log)?);
        }

        let key_names = vec![REPORT_TYPE.to_string(), CATEGORY.to_string()];
        let lines = sum_by_key(DATASET, key_names, columns, records)?;
        let with_total = DerivedColumns::new().with_total(Placement::Front).apply(&lines)?;
        let table = append_category_total(&with_total, CATEGORY, TOTAL_CATEGORY, TOTAL)?;

        info!(
            dataset = DATASET,
            files = files.len(),
            rows = table.len(),
            "normalized expenditure"
        );
        Ok(table)
    }
}

/// Rows of one report type, with the ReportType level dropped
pub fn only_report_type(table: &Table, report_type: &str) -> Result<Table> {
    table.cross_section(REPORT_TYPE, report_type)
}

/// The synthetic total category only, `Total` column only
pub fn only_total(table: &Table) -> Result<Table> {
    table.cross_section(CATEGORY, TOTAL_CATEGORY)?.select(&[TOTAL])
}

/// Join-ready view: one report type, synthetic total, renamed for the merge
pub fn merge_view(table: &Table, report_type: &str) -> Result<Table> {
    only_total(&only_report_type(table, report_type)?)?.rename_columns(&[(TOTAL, EDUCATION_EXPENSES)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const LASTEN_2020: &str = "\
Gemeentelijke begrotingen en realisaties
Onderwerp;;;
Perioden;;;
Eenheid;;;
;;Categorie;Lasten
;;;x 1 000 euro
Amsterdam;Begroting;4.1 Openbaar basisonderwijs;100
Amsterdam;Begroting;4.2 Onderwijshuisvesting;50
Amsterdam;Realisatie;4.1 Openbaar basisonderwijs;90
Utrecht;Begroting;4.1 Openbaar basisonderwijs;12,5
Utrecht;Begroting;Totaal taakvelden;999
Bron: CBS
";

    fn file(name: &str, data: &str) -> ExpenditureFile {
        let raw = RawTable::from_reader(data.as_bytes(), name, &SourceKind::Expenditure.loader_options()).unwrap();
        ExpenditureFile::from_raw(raw).unwrap()
    }

    fn normalizer() -> ExpenditureNormalizer {
        let config = crate::config::PipelineConfig::default();
        ExpenditureNormalizer::new(config.aliases().unwrap(), config.expenditure_value_headers)
    }

    #[test]
    fn test_year_from_filename() {
        assert_eq!(ExpenditureFile::year_from_filename("Gemeenten_2021_lasten.csv").unwrap(), 2021);
        assert!(ExpenditureFile::year_from_filename("Gemeenten_lasten.csv").is_err());
        assert!(ExpenditureFile::year_from_filename("Begroting_2021_.csv").is_err());
    }

    #[test]
    fn test_synthetic_total_category() {
        let mut log = DefectLog::new();
        let table = normalizer()
            .normalize(&vec![file("Gemeenten_2020_lasten.csv", LASTEN_2020)], &mut log)
            .unwrap();

        let begroting = RecordKey::new(2020, "Amsterdam").with_secondary("Begroting");
        assert_eq!(table.get(&begroting.clone().with_secondary(TOTAL_CATEGORY), TOTAL), Some(150.0));
        assert_eq!(table.get(&begroting.with_secondary("4.1"), "Expenses"), Some(100.0));
        assert_eq!(table.columns(), &["Total", "Expenses"]);

        // the "Totaal taakvelden" line carries no code
        assert_eq!(log.warnings().len(), 1);
    }

    #[test]
    fn test_merge_view() {
        let mut log = DefectLog::new();
        let table = normalizer()
            .normalize(&vec![file("Gemeenten_2020_lasten.csv", LASTEN_2020)], &mut log)
            .unwrap();
        let view = merge_view(&table, "Begroting").unwrap();

        assert!(view.key_names().is_empty());
        assert_eq!(view.columns(), &[EDUCATION_EXPENSES]);
        assert_eq!(view.get(&RecordKey::new(2020, "Amsterdam"), EDUCATION_EXPENSES), Some(150.0));
        assert_eq!(view.get(&RecordKey::new(2020, "Utrecht (gemeente)"), EDUCATION_EXPENSES), Some(12.5));

        let realisatie = merge_view(&table, "Realisatie").unwrap();
        assert_eq!(realisatie.len(), 1);
    }

    #[test]
    fn test_years_come_from_each_file() {
        let mut log = DefectLog::new();
        let table = normalizer()
            .normalize(
                &vec![
                    file("Gemeenten_2020_lasten.csv", LASTEN_2020),
                    file("Gemeenten_2021_lasten.csv", LASTEN_2020),
                ],
                &mut log,
            )
            .unwrap();
        let totals = only_total(&only_report_type(&table, "Begroting").unwrap()).unwrap();
        assert_eq!(totals.get(&RecordKey::new(2021, "Amsterdam"), TOTAL), Some(150.0));
        assert_eq!(totals.len(), 4);
    }

    #[test]
    fn test_unmatched_budget_line_fails_when_closed() {
        let result = normalizer()
            .with_unmatched_policy(UnmatchedPolicy::Fail)
            .normalize(&vec![file("Gemeenten_2020_lasten.csv", LASTEN_2020)], &mut DefectLog::new());
        assert!(matches!(result, Err(PipelineError::UnmatchedCategory { .. })));
    }

    #[test]
    fn test_missing_value_column_is_contract_violation() {
        let data = "\
a
b
c
d
;;Categorie
;;
Amsterdam;Begroting;4.1 Openbaar basisonderwijs
Bron
";
        let result = normalizer().normalize(&vec![file("Gemeenten_2020_x.csv", data)], &mut DefectLog::new());
        assert!(matches!(result, Err(PipelineError::InputContractViolation { .. })));
    }

    #[test]
    fn test_malformed_amount_rejects_row() {
        let data = LASTEN_2020.replace("4.2 Onderwijshuisvesting;50", "4.2 Onderwijshuisvesting;veel");
        let mut log = DefectLog::new();
        let table = normalizer()
            .normalize(&vec![file("Gemeenten_2020_lasten.csv", &data)], &mut log)
            .unwrap();
        let total = RecordKey::new(2020, "Amsterdam")
            .with_secondary("Begroting")
            .with_secondary(TOTAL_CATEGORY);
        assert_eq!(table.get(&total, TOTAL), Some(100.0));
        assert_eq!(log.defects().len(), 1);
        assert_eq!(log.defects()[0].field, "Expenses");
    }
}
