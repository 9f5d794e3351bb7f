use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited { delimiter: char },
    Json,
    Xml,
    SpreadsheetXml,
    Xlsx,
    Synthetic,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Delimited { delimiter: ',' } => "csv",
            SourceFormat::Delimited { delimiter: '\t' } => "tsv",
            SourceFormat::Delimited { .. } => "delimited",
            SourceFormat::Json => "json",
            SourceFormat::Xml => "xml",
            SourceFormat::SpreadsheetXml => "spreadsheet_xml",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Delimited { delimiter } => write!(f, "delimited({delimiter:?})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Limits and knobs applied while turning bytes into a [`RawTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Number of leading rows searched for a header.
    pub header_scan_lines: usize,
    /// Data rows kept per file; the rest are discarded with a warning.
    pub max_rows: usize,
    /// Files larger than this still parse, but get a warning.
    pub max_file_bytes: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            header_scan_lines: 10,
            max_rows: 1_000_000,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
}

impl<'a> SourceFile<'a> {
    pub fn new(name: &'a str, bytes: &'a [u8]) -> Self {
        Self { name, bytes }
    }
}

/// Source bytes together with their best-effort text decoding.
#[derive(Debug, Clone)]
pub struct DecodedSource<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    pub text: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn from_cell(cell: &str) -> Self {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RawValue::Empty)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Empty => None,
            RawValue::Number(value) => value.is_finite().then_some(*value),
            RawValue::Text(text) => parse_numeric(text),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Text(text) => f.write_str(text),
        }
    }
}

static NUMERIC_WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*[A-Za-z°%]{1,4}$")
        .expect("numeric-with-unit pattern is valid")
});

/// Lenient numeric parsing for cycler exports: accepts quoted values, decimal
/// commas (`3,45`) and a short trailing unit (`4.2V`, `1200 mAh`).
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if matches!(lower.as_str(), "nan" | "null" | "none" | "n/a" | "na" | "-" | "--") {
        return None;
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return value.is_finite().then_some(value);
    }
    if trimmed.matches(',').count() == 1 && !trimmed.contains('.') {
        if let Ok(value) = trimmed.replace(',', ".").parse::<f64>() {
            return value.is_finite().then_some(value);
        }
    }
    NUMERIC_WITH_UNIT
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// One retained data row, aligned with [`RawTable::headers`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub values: Vec<RawValue>,
}

impl RawRecord {
    pub fn new(values: Vec<RawValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: usize) -> Option<&RawValue> {
        self.values.get(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(RawValue::is_empty)
    }
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub format: SourceFormat,
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
    /// 1-based source line of the header row; `None` for keyed formats and
    /// headerless files.
    pub header_row: Option<usize>,
    /// Lines above the header (vendor preamble), joined per line.
    pub preamble: Vec<String>,
    /// Unit tokens from a units row directly below the header, per column.
    pub unit_hints: Vec<Option<String>>,
    /// True when column names were synthesized because no header was found.
    pub headerless: bool,
    pub warnings: Vec<String>,
}

impl RawTable {
    pub fn new(format: SourceFormat, headers: Vec<String>, rows: Vec<RawRecord>) -> Self {
        let width = headers.len();
        Self {
            format,
            headers,
            rows,
            header_row: None,
            preamble: Vec::new(),
            unit_hints: vec![None; width],
            headerless: false,
            warnings: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn column<'t>(&'t self, index: usize) -> impl Iterator<Item = &'t RawValue> + 't {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    pub fn unit_hint(&self, index: usize) -> Option<&str> {
        self.unit_hints.get(index).and_then(|hint| hint.as_deref())
    }

    /// Keep at most `max_rows` rows, recording a warning when rows were cut.
    pub(crate) fn cap_rows(&mut self, max_rows: usize) {
        if self.rows.len() > max_rows {
            let discarded = self.rows.len() - max_rows;
            self.rows.truncate(max_rows);
            self.warnings.push(format!(
                "file has more than {max_rows} data rows; ignored the last {discarded} row(s)"
            ));
        }
    }
}
