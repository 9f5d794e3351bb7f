use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::ParserError;
use crate::fields::matches_any_field;
use crate::model::{parse_numeric, IngestOptions, RawRecord, RawTable, RawValue, SourceFormat};

/// Spreadsheet column limit (`XFD`). Sparse cell references past it are rejected
/// rather than padded out.
pub(crate) const MAX_COLUMNS: usize = 16_384;

/// One row of a cell grid, remembering the 1-based source line it came from.
#[derive(Debug, Clone, Default)]
pub(crate) struct GridRow {
    pub line: usize,
    pub cells: Vec<String>,
}

impl GridRow {
    pub fn new(line: usize, cells: Vec<String>) -> Self {
        Self { line, cells }
    }

    fn non_empty(&self) -> impl Iterator<Item = &str> {
        self.cells
            .iter()
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
    }

    fn is_blank(&self) -> bool {
        self.non_empty().next().is_none()
    }

    fn is_header_like(&self) -> bool {
        self.non_empty().count() >= 2 && self.non_empty().any(matches_any_field)
    }

    fn has_numeric_cell(&self) -> bool {
        self.non_empty().any(|cell| parse_numeric(cell).is_some())
    }

    fn all_numeric(&self) -> bool {
        !self.is_blank() && self.non_empty().all(|cell| parse_numeric(cell).is_some())
    }

    fn joined(&self) -> String {
        self.non_empty().collect::<Vec<_>>().join(" ")
    }
}

static HEADER_LINE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)nb\s+header\s+lines\s*:\s*(\d+)").expect("header line hint pattern is valid")
});

/// Build a [`RawTable`] from a cell grid: locate the header row, pick up an
/// optional units row, then collect the data rows.
pub(crate) fn table_from_grid(
    parser: &'static str,
    format: SourceFormat,
    grid: Vec<GridRow>,
    options: &IngestOptions,
) -> Result<RawTable, ParserError> {
    let rows: Vec<GridRow> = grid.into_iter().filter(|row| !row.is_blank()).collect();
    if rows.is_empty() {
        return Err(ParserError::EmptyData { parser });
    }

    let mut warnings = Vec::new();
    let header_index = locate_header(&rows, options, &mut warnings);

    let (headers, data_start, header_row, headerless) = match header_index {
        Some(index) => {
            let header = &rows[index];
            if index > 0 {
                warnings.push(format!(
                    "header row found at line {}; skipped {index} preamble line(s)",
                    header.line
                ));
            }
            (
                header_names(&header.cells),
                index + 1,
                Some(header.line),
                false,
            )
        }
        None if rows[0].all_numeric() => {
            let width = rows
                .iter()
                .take(options.header_scan_lines.max(1))
                .map(|row| row.cells.len())
                .max()
                .unwrap_or(0);
            warnings.push("no header row detected; using positional column names".to_string());
            let headers = (1..=width).map(|n| format!("column_{n}")).collect();
            (headers, 0, None, true)
        }
        None => {
            warnings.push(format!(
                "no recognizable header row; using line {} as column names",
                rows[0].line
            ));
            (header_names(&rows[0].cells), 1, Some(rows[0].line), false)
        }
    };

    let preamble: Vec<String> = match header_index {
        Some(index) => rows[..index].iter().map(GridRow::joined).collect(),
        None => Vec::new(),
    };

    let width = headers.len();
    let mut data_start = data_start;
    let mut unit_hints = vec![None; width];
    if !headerless {
        if let Some(candidate) = rows.get(data_start) {
            if !candidate.has_numeric_cell() {
                for (slot, cell) in unit_hints.iter_mut().zip(candidate.cells.iter()) {
                    let cell = cell.trim();
                    if !cell.is_empty() {
                        *slot = Some(cell.to_string());
                    }
                }
                warnings.push(format!(
                    "treated line {} as a units row below the header",
                    candidate.line
                ));
                data_start += 1;
            }
        }
    }

    let mut ragged = 0usize;
    let mut records = Vec::with_capacity(rows.len().saturating_sub(data_start));
    for row in &rows[data_start..] {
        if row.cells.len() != width {
            ragged += 1;
        }
        let mut values: Vec<RawValue> = row
            .cells
            .iter()
            .take(width)
            .map(|cell| RawValue::from_cell(cell))
            .collect();
        values.resize(width, RawValue::Empty);
        records.push(RawRecord::new(values));
    }
    if ragged > 0 {
        warnings.push(format!(
            "{ragged} row(s) had a column count different from the header and were padded or truncated"
        ));
    }

    if records.is_empty() {
        return Err(ParserError::EmptyData { parser });
    }

    let mut table = RawTable::new(format, headers, records);
    table.header_row = header_row;
    table.preamble = preamble;
    table.unit_hints = unit_hints;
    table.headerless = headerless;
    table.warnings = warnings;
    table.cap_rows(options.max_rows);
    Ok(table)
}

fn locate_header(
    rows: &[GridRow],
    options: &IngestOptions,
    warnings: &mut Vec<String>,
) -> Option<usize> {
    if let Some(line) = header_line_hint(rows) {
        match rows.iter().position(|row| row.line == line) {
            Some(index) if rows[index].non_empty().count() >= 2 => return Some(index),
            _ => warnings.push(format!(
                "preamble declares {line} header lines but line {line} is not a header; scanning instead"
            )),
        }
    }
    rows.iter()
        .take(options.header_scan_lines)
        .position(GridRow::is_header_like)
}

fn header_line_hint(rows: &[GridRow]) -> Option<usize> {
    rows.iter().take(3).find_map(|row| {
        HEADER_LINE_HINT
            .captures(&row.joined())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
    })
}

/// Clean header names: blanks get positional names and duplicates get a
/// numeric suffix so every column stays addressable by name.
pub(crate) fn header_names(cells: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let base = match cell.trim().trim_start_matches('\u{feff}').trim() {
                "" => format!("column_{}", idx + 1),
                name => name.to_string(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            }
        })
        .collect()
}
