// 📂 Raw Table Loader - delimited text → header + row records
//
// Knows nothing about the meaning of columns. It only strips the layout
// around the data: preamble lines, sub-header rows and footer rows.

use crate::error::{PipelineError, Result};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub delimiter: u8,
    /// Records before the header row
    pub preamble_rows: usize,
    /// Records right after the header that are not data (units, sub-labels)
    pub subheader_rows: usize,
    /// Trailing records that are not data (source notes)
    pub footer_rows: usize,
}

impl LoaderOptions {
    /// Plain CSV with a single header row
    pub fn csv(delimiter: u8) -> Self {
        LoaderOptions {
            delimiter,
            preamble_rows: 0,
            subheader_rows: 0,
            footer_rows: 0,
        }
    }

    /// Statistics-bureau export: preamble, header, one sub-header, one footer
    pub fn statline(preamble_rows: usize) -> Self {
        LoaderOptions {
            delimiter: b';',
            preamble_rows,
            subheader_rows: 1,
            footer_rows: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line in the source file
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn get(&self, index: usize) -> &str {
        self.fields.get(index).map(|s| s.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn from_path(path: &Path, options: &LoaderOptions) -> Result<RawTable> {
        let file = File::open(path).map_err(|e| {
            PipelineError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open file {}: {}", path.display(), e),
            ))
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();
        let table = RawTable::from_reader(file, filename, options)?;
        debug!(
            file = %table.source_file,
            columns = table.headers.len(),
            rows = table.rows.len(),
            "loaded raw table"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        source_file: impl Into<String>,
        options: &LoaderOptions,
    ) -> Result<RawTable> {
        let source_file = source_file.into();
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 1);
            records.push(RawRow {
                line,
                fields: record.iter().map(|f| f.to_string()).collect(),
            });
        }

        let mut records = records.into_iter().skip(options.preamble_rows);
        let header = records.next().ok_or_else(|| {
            PipelineError::contract(&source_file, "header", "file ends before the header row")
        })?;
        let headers = header
            .fields
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows: Vec<RawRow> = records.skip(options.subheader_rows).collect();
        let keep = rows.len().saturating_sub(options.footer_rows);
        rows.truncate(keep);

        Ok(RawTable {
            source_file,
            headers,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STATLINE: &str = "\
Regionale kerncijfers Nederland
Onderwerp;;
Perioden;;
;;Onderwijs|Hoger beroepsonderwijs
;;aantal
2019;Delft;1200
2020;Delft;1250
Bron: CBS
";

    #[test]
    fn test_statline_layout_is_stripped() {
        let table = RawTable::from_reader(STATLINE.as_bytes(), "kern.csv", &LoaderOptions::statline(3)).unwrap();
        assert_eq!(table.headers, vec!["", "", "Onderwijs|Hoger beroepsonderwijs"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get(1), "Delft");
        assert_eq!(table.rows[0].line, 6);
        assert_eq!(table.rows[1].get(2), "1250");
    }

    #[test]
    fn test_plain_csv() {
        let data = "PEILJAAR,GEMEENTENUMMER,AANTAL_LEERLINGEN\n2020,363,40\n";
        let table = RawTable::from_reader(data.as_bytes(), "po.csv", &LoaderOptions::csv(b',')).unwrap();
        assert_eq!(table.headers.len(), 3);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get(5), "");
    }

    #[test]
    fn test_empty_file_is_contract_violation() {
        let result = RawTable::from_reader("".as_bytes(), "empty.csv", &LoaderOptions::csv(b','));
        assert!(matches!(result, Err(PipelineError::InputContractViolation { .. })));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a;b\n1;2\n").unwrap();
        let table = RawTable::from_path(file.path(), &LoaderOptions::csv(b';')).unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.rows[0].fields, vec!["1", "2"]);
    }
}
