// 🎓 Enrollment Normalizer - four raw tables → one enrollment table
//
// The statistics-bureau extract gives vocational and higher education per
// municipality. Primary enrollment comes per municipality code, secondary per
// institution with a free-text education type. The three are joined on
// (Year, Municipality) before totals are derived.

use super::{
    capitalize, handle_unmatched, ignore_list, MunicipalityAliases, RowContext, SourceKind,
    SourceNormalizer,
};
use crate::aggregate::{pivot_categories, sum_by_key, unique_by_key, FillPolicy, Record};
use crate::category::{CategoryMatch, SplitMode, Taxonomy, UnmatchedPolicy};
use crate::data_quality::DefectLog;
use crate::derive::{DerivedColumns, Placement, SubTotal, TOTAL};
use crate::error::{PipelineError, Result};
use crate::join::JoinEngine;
use crate::loader::RawTable;
use crate::schema::{HeaderMap, KeyField};
use crate::table::{RecordKey, Table};
use std::collections::BTreeMap;
use tracing::info;

pub const DATASET: &str = "enrollment";

pub const PRIMARY: &str = "Primary";
pub const SECONDARY: &str = "Secondary";
pub const MBO1: &str = "MBO1";
pub const MBO2: &str = "MBO2";
pub const MBO_TOTAL: &str = "MBO Total";
pub const HBO: &str = "HBO";
pub const WO: &str = "WO";
pub const TOTAL_ENROLLMENT: &str = "Total enrollment";

const STUDENTS: &str = "Students";
const AGGREGATE_PREFIX: &str = "Onderwijs|Naar woongemeente|Leerlingen/studenten|";

const PRIMARY_IGNORED: &[&str] = &["GEMEENTENAAM", "PROVINCIE", "SOORT PO", "LEEFTIJD", "GESLACHT"];

const SECONDARY_IGNORED: &[&str] = &[
    "_id",
    "LEERJAAR",
    "BEVOEGD GEZAG",
    "NAAM BEVOEGD GEZAG",
    "DENOMINATIE BG",
    "BRIN NUMMER",
    "VESTIGINGSNUMMER",
    "BRINVESTIGINGSNUMMER",
    "DENOMINATIE VESTIGING",
    "INSTELLINGSNAAM VESTIGING",
    "PROVINCIE VESTIGING",
    "INDICATIE VO-VAVO",
    "VMBO SECTOR",
    "AFDELING",
];

/// Raw inputs of the enrollment chain
#[derive(Debug, Clone)]
pub struct EnrollmentInputs {
    pub aggregate: RawTable,
    pub primary: RawTable,
    pub codes: RawTable,
    pub secondary: RawTable,
}

#[derive(Debug, Clone)]
pub struct EnrollmentNormalizer {
    aliases: MunicipalityAliases,
    taxonomy: Taxonomy,
    unmatched: UnmatchedPolicy,
    extra_ignored: BTreeMap<SourceKind, Vec<String>>,
}

impl EnrollmentNormalizer {
    pub fn new(aliases: MunicipalityAliases) -> Self {
        EnrollmentNormalizer {
            aliases,
            taxonomy: Taxonomy::secondary_education(SplitMode::Collapse),
            unmatched: UnmatchedPolicy::Warn,
            extra_ignored: BTreeMap::new(),
        }
    }

    /// Builder pattern: keep VMBO tracks apart
    pub fn with_split_mode(mut self, mode: SplitMode) -> Self {
        self.taxonomy = Taxonomy::secondary_education(mode);
        self
    }

    /// Builder pattern: what to do with unmatched education types
    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched = policy;
        self
    }

    /// Builder pattern: accept and ignore extra headers in one source
    pub fn with_ignored(mut self, kind: SourceKind, headers: Vec<String>) -> Self {
        self.extra_ignored.insert(kind, headers);
        self
    }

    fn ignored(&self, kind: SourceKind, builtin: &[&str]) -> Vec<String> {
        let extra = self.extra_ignored.get(&kind).map(|v| v.as_slice()).unwrap_or(&[]);
        ignore_list(builtin, extra)
    }

    // ========================================================================
    // HEADER MAPS
    // ========================================================================

    fn aggregate_headers(&self) -> HeaderMap {
        let label = |suffix: &str| format!("{}{}", AGGREGATE_PREFIX, suffix);
        HeaderMap::new(SourceKind::EnrollmentAggregate.name())
            .blank_key(0, KeyField::Year)
            .blank_key(1, KeyField::Municipality)
            // recomputed from the institution-level source
            .ignore(&[label("Voortgezet onderwijs")])
            .value(&label("Beroepsopleidende leerweg"), MBO1)
            .value(&label("Beroepsbegeleidende leerweg"), MBO2)
            .value(&label("Hoger beroepsonderwijs"), HBO)
            .value(&label("Wetenschappelijk onderwijs"), WO)
            .ignore(&self.ignored(SourceKind::EnrollmentAggregate, &[]))
    }

    fn primary_headers(&self) -> HeaderMap {
        HeaderMap::new(SourceKind::EnrollmentPrimary.name())
            .key("PEILJAAR", KeyField::Year)
            .key("GEMEENTENUMMER", KeyField::MunicipalityCode)
            .value("AANTAL_LEERLINGEN", PRIMARY)
            .ignore(&self.ignored(SourceKind::EnrollmentPrimary, PRIMARY_IGNORED))
    }

    fn secondary_headers(&self) -> HeaderMap {
        HeaderMap::new(SourceKind::EnrollmentSecondary.name())
            .key("SCHOOLJAAR", KeyField::Year)
            .key("PLAATSNAAM VESTIGING", KeyField::Municipality)
            .key("ONDERWIJSTYPE VO EN LEER- OF VERBLIJFSJAAR", KeyField::Category)
            .value("AANTAL LEERLINGEN", STUDENTS)
            .ignore(&self.ignored(SourceKind::EnrollmentSecondary, SECONDARY_IGNORED))
    }

    // ========================================================================
    // PER-SOURCE TABLES
    // ========================================================================

    /// Statistics-bureau extract, already one row per (Year, Municipality)
    pub fn aggregate_table(&self, raw: &RawTable, log: &mut DefectLog) -> Result<Table> {
        let kind = SourceKind::EnrollmentAggregate;
        let schema = self.aggregate_headers().resolve(&raw.headers)?;
        let year_at = required(schema.key(KeyField::Year), kind, KeyField::Year)?;
        let city_at = required(schema.key(KeyField::Municipality), kind, KeyField::Municipality)?;
        let format = kind.number_format();

        let mut records = Vec::new();
        for row in &raw.rows {
            let ctx = RowContext::new(kind.name(), &raw.source_file, row);
            let Some(year) = ctx.year(row, year_at, log) else { continue };
            let Some(values) = ctx.values(row, schema.values(), &format, log) else { continue };
            records.push(Record {
                key: RecordKey::new(year, self.aliases.canonical(row.get(city_at))),
                values,
                file: raw.source_file.clone(),
                line: row.line,
            });
        }

        unique_by_key(kind.name(), Vec::new(), schema.value_names(), records, log)
    }

    /// Municipality code → canonical name. Only the two lookup columns are
    /// read; every other column is ignored.
    pub fn code_lookup(&self, raw: &RawTable, log: &mut DefectLog) -> Result<BTreeMap<u32, String>> {
        let kind = SourceKind::MunicipalityCodes;
        let position = |label: &str| {
            raw.headers
                .iter()
                .position(|h| h == label)
                .ok_or_else(|| PipelineError::contract(kind.name(), label, "missing required column"))
        };
        let code_at = position("Gemeente code")?;
        let name_at = position("Gemeente name")?;

        let mut lookup = BTreeMap::new();
        for row in &raw.rows {
            let ctx = RowContext::new(kind.name(), &raw.source_file, row);
            let raw_code = row.get(code_at);
            let Some(code) = parse_code(raw_code) else {
                log.record_defect(ctx.defect("Gemeente code", raw_code, "not a municipality code"));
                continue;
            };
            if lookup.contains_key(&code) {
                log.record_defect(ctx.defect("Gemeente code", raw_code, "code listed twice, first entry kept"));
                continue;
            }
            lookup.insert(code, self.aliases.canonical(row.get(name_at)));
        }
        Ok(lookup)
    }

    /// Primary enrollment summed per (Year, Municipality). The `-1` sentinel counts as 0.
    pub fn primary_table(&self, raw: &RawTable, codes: &BTreeMap<u32, String>, log: &mut DefectLog) -> Result<Table> {
        let kind = SourceKind::EnrollmentPrimary;
        let schema = self.primary_headers().resolve(&raw.headers)?;
        let year_at = required(schema.key(KeyField::Year), kind, KeyField::Year)?;
        let code_at = required(schema.key(KeyField::MunicipalityCode), kind, KeyField::MunicipalityCode)?;
        let format = kind.number_format();

        let mut records = Vec::new();
        for row in &raw.rows {
            let ctx = RowContext::new(kind.name(), &raw.source_file, row);
            let Some(year) = ctx.year(row, year_at, log) else { continue };

            let raw_code = row.get(code_at);
            let Some(municipality) = parse_code(raw_code).and_then(|c| codes.get(&c)) else {
                log.record_defect(ctx.defect("GEMEENTENUMMER", raw_code, "municipality code not in lookup"));
                continue;
            };

            let Some(mut values) = ctx.values(row, schema.values(), &format, log) else { continue };
            for v in values.values_mut() {
                if *v == -1.0 {
                    *v = 0.0;
                }
            }
            records.push(Record {
                key: RecordKey::new(year, municipality.clone()),
                values,
                file: raw.source_file.clone(),
                line: row.line,
            });
        }

        sum_by_key(kind.name(), Vec::new(), schema.value_names(), records)
    }

    /// Institution rows → one column per education-type tag, zero-filled
    pub fn secondary_table(&self, raw: &RawTable, log: &mut DefectLog) -> Result<Table> {
        let kind = SourceKind::EnrollmentSecondary;
        let schema = self.secondary_headers().resolve(&raw.headers)?;
        let year_at = required(schema.key(KeyField::Year), kind, KeyField::Year)?;
        let city_at = required(schema.key(KeyField::Municipality), kind, KeyField::Municipality)?;
        let label_at = required(schema.key(KeyField::Category), kind, KeyField::Category)?;
        let format = kind.number_format();

        let mut records = Vec::new();
        for row in &raw.rows {
            let ctx = RowContext::new(kind.name(), &raw.source_file, row);
            let Some(year) = ctx.year(row, year_at, log) else { continue };

            let label = row.get(label_at);
            let tag = match self.taxonomy.extract(label) {
                CategoryMatch::Matched(tag) => tag,
                CategoryMatch::NoMatch => {
                    handle_unmatched(self.unmatched, &ctx, label, log)?;
                    continue;
                }
            };

            let Some(values) = ctx.values(row, schema.values(), &format, log) else { continue };
            let municipality = self.aliases.canonical(&capitalize(row.get(city_at)));
            records.push(Record {
                key: RecordKey::new(year, municipality).with_secondary(tag),
                values,
                file: raw.source_file.clone(),
                line: row.line,
            });
        }

        pivot_categories(
            kind.name(),
            records,
            STUDENTS,
            self.taxonomy.declared_tags(),
            FillPolicy::Zero,
        )
    }
}

impl SourceNormalizer for EnrollmentNormalizer {
    type Input = EnrollmentInputs;

    fn dataset(&self) -> &'static str {
        DATASET
    }

    fn normalize(&self, input: &EnrollmentInputs, log: &mut DefectLog) -> Result<Table> {
        let aggregate = self.aggregate_table(&input.aggregate, log)?;
        let codes = self.code_lookup(&input.codes, log)?;
        let primary = self.primary_table(&input.primary, &codes, log)?;
        let secondary = self.secondary_table(&input.secondary, log)?;

        let joined = JoinEngine::new().merge(DATASET, vec![primary, aggregate, secondary])?;
        let table = derived_columns(joined.columns()).apply(&joined)?;

        info!(
            dataset = DATASET,
            rows = table.len(),
            columns = table.columns().len(),
            "normalized enrollment"
        );
        Ok(table)
    }
}

/// Totals of the enrollment table. Every column that is not primary, not a
/// vocational or higher-education level and not itself derived is a
/// secondary-education type and feeds `Secondary`.
pub fn derived_columns(columns: &[String]) -> DerivedColumns {
    const NOT_SECONDARY: &[&str] = &[TOTAL, SECONDARY, PRIMARY, MBO1, MBO2, MBO_TOTAL, HBO, WO];
    let secondary: Vec<&str> = columns
        .iter()
        .map(|c| c.as_str())
        .filter(|c| !NOT_SECONDARY.contains(c))
        .collect();

    DerivedColumns::new()
        .with_total(Placement::Front)
        .with_subtotal(SubTotal::new(MBO_TOTAL, &[MBO1, MBO2], Placement::After(MBO2.to_string())))
        .with_subtotal(SubTotal::new(SECONDARY, &secondary, Placement::At(1)))
}

/// `Total` only, rows without a total dropped
pub fn only_total(table: &Table) -> Result<Table> {
    Ok(table.select(&[TOTAL])?.drop_incomplete())
}

/// Join-ready view with `Total` renamed for the merge. By default every
/// enrollment column is kept, including rows with no values at all;
/// `total_only` narrows it to the `only_total` view.
pub fn merge_view(table: &Table, total_only: bool) -> Result<Table> {
    let renames = [(TOTAL, TOTAL_ENROLLMENT)];
    if total_only {
        only_total(table)?.rename_columns(&renames)
    } else {
        table.rename_columns(&renames)
    }
}

fn required(position: Option<usize>, kind: SourceKind, field: KeyField) -> Result<usize> {
    position.ok_or_else(|| PipelineError::contract(kind.name(), field.name(), "missing required column"))
}

/// "363", "0363" and "GM0363" all name municipality 363
fn parse_code(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    raw.strip_prefix("GM").unwrap_or(raw).parse().ok()
}
