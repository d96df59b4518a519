// 🧒 Poverty Normalizer - children in low-income households per bracket
//
// Already aggregated at the source: one row per (Year, Municipality, income
// bracket). A repeated key is a row defect, never a sum.

use super::{ignore_list, MunicipalityAliases, RowContext, SourceKind, SourceNormalizer};
use crate::aggregate::{unique_by_key, Record};
use crate::data_quality::DefectLog;
use crate::error::{PipelineError, Result};
use crate::loader::RawTable;
use crate::schema::{HeaderMap, KeyField};
use crate::table::{RecordKey, Table};
use tracing::info;

pub const DATASET: &str = "poverty";

pub const BRACKET: &str = "Category";
pub const TOTAL_BRACKET: &str = "Totaal";
pub const CHILDREN: &str = "Minderjarige kinderen";
pub const CHILDREN_RELATIVE: &str = "Minderjarige kinderen relatief";
pub const IMPOVERISHED_CHILDREN: &str = "Impoverished children";

#[derive(Debug, Clone)]
pub struct PovertyNormalizer {
    aliases: MunicipalityAliases,
    extra_ignored: Vec<String>,
}

impl PovertyNormalizer {
    pub fn new(aliases: MunicipalityAliases) -> Self {
        PovertyNormalizer {
            aliases,
            extra_ignored: Vec::new(),
        }
    }

    /// Builder pattern: accept and ignore extra headers
    pub fn with_ignored(mut self, headers: Vec<String>) -> Self {
        self.extra_ignored = headers;
        self
    }

    fn headers(&self) -> HeaderMap {
        HeaderMap::new(DATASET)
            .blank_key(0, KeyField::Year)
            .blank_key(1, KeyField::Municipality)
            .blank_key(2, KeyField::Category)
            .value(CHILDREN, CHILDREN)
            .optional_value(CHILDREN_RELATIVE, CHILDREN_RELATIVE)
            .ignore(&ignore_list(&[], &self.extra_ignored))
    }
}

impl SourceNormalizer for PovertyNormalizer {
    type Input = RawTable;

    fn dataset(&self) -> &'static str {
        DATASET
    }

    fn normalize(&self, raw: &RawTable, log: &mut DefectLog) -> Result<Table> {
        let schema = self.headers().resolve(&raw.headers)?;
        let position = |field: KeyField| {
            schema
                .key(field)
                .ok_or_else(|| PipelineError::contract(DATASET, field.name(), "missing required column"))
        };
        let year_at = position(KeyField::Year)?;
        let city_at = position(KeyField::Municipality)?;
        let bracket_at = position(KeyField::Category)?;
        let format = SourceKind::Poverty.number_format();

        let mut records = Vec::new();
        for row in &raw.rows {
            let ctx = RowContext::new(DATASET, &raw.source_file, row);
            let Some(year) = ctx.year(row, year_at, log) else { continue };
            let Some(values) = ctx.values(row, schema.values(), &format, log) else { continue };
            records.push(Record {
                key: RecordKey::new(year, self.aliases.canonical(row.get(city_at)))
                    .with_secondary(row.get(bracket_at).trim()),
                values,
                file: raw.source_file.clone(),
                line: row.line,
            });
        }

        let table = unique_by_key(DATASET, vec![BRACKET.to_string()], schema.value_names(), records, log)?;
        info!(dataset = DATASET, rows = table.len(), "normalized poverty");
        Ok(table)
    }
}

/// `Totaal` bracket only, absolute count only
pub fn only_total(table: &Table) -> Result<Table> {
    table.cross_section(BRACKET, TOTAL_BRACKET)?.select(&[CHILDREN])
}

/// Join-ready view
pub fn merge_view(table: &Table) -> Result<Table> {
    only_total(table)?.rename_columns(&[(CHILDREN, IMPOVERISHED_CHILDREN)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const POVERTY: &str = "\
Kinderen in huishoudens met een laag inkomen
Onderwerp;;;;
Perioden;;;;
Eenheid;;;;
;;;Minderjarige kinderen;Minderjarige kinderen relatief
;;;x 1 000;%
2019;Utrecht;Totaal;12,5;8,1
2019;Utrecht;Tot 110% van sociaal minimum;3,2;2,0
2021*;Delft;Totaal;4;6,3
2021*;Delft;Totaal;5;6,3
2021*;Leiden;Totaal;.;.
Bron: CBS
";

    fn raw(data: &str) -> RawTable {
        RawTable::from_reader(
            data.as_bytes(),
            "Laag_en_langdurig_laag_inkomen_2023.csv",
            &SourceKind::Poverty.loader_options(),
        )
        .unwrap()
    }

    fn normalizer() -> PovertyNormalizer {
        PovertyNormalizer::new(crate::config::PipelineConfig::default().aliases().unwrap())
    }

    #[test]
    fn test_utrecht_total_bracket() {
        let mut log = DefectLog::new();
        let table = normalizer().normalize(&raw(POVERTY), &mut log).unwrap();
        let view = merge_view(&table).unwrap();
        assert_eq!(
            view.get(&RecordKey::new(2019, "Utrecht (gemeente)"), IMPOVERISHED_CHILDREN),
            Some(12.5)
        );
        assert_eq!(view.columns(), &[IMPOVERISHED_CHILDREN]);
    }

    #[test]
    fn test_brackets_stay_apart() {
        let mut log = DefectLog::new();
        let table = normalizer().normalize(&raw(POVERTY), &mut log).unwrap();
        let key = RecordKey::new(2019, "Utrecht (gemeente)").with_secondary("Tot 110% van sociaal minimum");
        assert_eq!(table.get(&key, CHILDREN), Some(3.2));
        assert_eq!(table.get(&key, CHILDREN_RELATIVE), Some(2.0));
    }

    #[test]
    fn test_duplicate_key_is_row_defect() {
        let mut log = DefectLog::new();
        let table = normalizer().normalize(&raw(POVERTY), &mut log).unwrap();
        let delft = RecordKey::new(2021, "Delft").with_secondary(TOTAL_BRACKET);
        assert_eq!(table.get(&delft, CHILDREN), Some(4.0));
        assert_eq!(log.defects().len(), 1);
    }

    #[test]
    fn test_missing_marker_stays_missing() {
        let mut log = DefectLog::new();
        let table = normalizer().normalize(&raw(POVERTY), &mut log).unwrap();
        let totals = only_total(&table).unwrap();
        assert!(totals.row(&RecordKey::new(2021, "Leiden")).is_some());
        assert_eq!(totals.get(&RecordKey::new(2021, "Leiden"), CHILDREN), None);
    }

    #[test]
    fn test_missing_required_column() {
        let data = POVERTY.replace(";;;Minderjarige kinderen;Minderjarige kinderen relatief", ";;;Huishoudens;");
        let result = normalizer().normalize(&raw(&data), &mut DefectLog::new());
        assert!(matches!(result, Err(PipelineError::InputContractViolation { .. })));
    }
}
