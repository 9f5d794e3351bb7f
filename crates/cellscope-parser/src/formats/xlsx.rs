use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::decode::is_zip;
use crate::errors::ParserError;
use crate::model::{DecodedSource, IngestOptions, RawTable, SourceFormat};
use crate::registry::FormatParser;

use super::common::{table_from_grid, GridRow, MAX_COLUMNS};

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const WORKBOOK: &str = "xl/workbook.xml";

pub struct XlsxParser;

impl Default for XlsxParser {
    fn default() -> Self {
        Self
    }
}

impl XlsxParser {
    const NAME: &'static str = "XLSX";

    fn zip_error(source: ZipError) -> ParserError {
        ParserError::Zip {
            parser: Self::NAME,
            source,
        }
    }

    fn xml_error(message: impl Into<String>) -> ParserError {
        ParserError::Xml {
            parser: Self::NAME,
            message: message.into(),
        }
    }

    fn read_entry(
        archive: &mut ZipArchive<Cursor<&[u8]>>,
        name: &str,
    ) -> Result<Option<String>, ParserError> {
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(Self::zip_error(err)),
        };
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|err| Self::zip_error(ZipError::Io(err)))?;
        Ok(Some(text))
    }

    /// First worksheet in archive order; `sheet1.xml` wins when present.
    fn first_sheet_name(archive: &ZipArchive<Cursor<&[u8]>>) -> Option<String> {
        let mut sheets: Vec<&str> = archive
            .file_names()
            .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
            .collect();
        sheets.sort_by_key(|name| (*name != "xl/worksheets/sheet1.xml", name.len(), *name));
        sheets.first().map(|name| name.to_string())
    }

    fn shared_strings(xml: &str) -> Result<Vec<String>, ParserError> {
        let mut reader = Reader::from_str(xml);
        let mut strings = Vec::new();
        let mut current: Option<String> = None;
        let mut in_text = false;
        loop {
            match reader
                .read_event()
                .map_err(|err| Self::xml_error(format!("shared strings: {err}")))?
            {
                Event::Start(start) => match start.local_name().as_ref() {
                    b"si" => current = Some(String::new()),
                    b"t" => in_text = true,
                    _ => {}
                },
                Event::End(end) => match end.local_name().as_ref() {
                    b"si" => strings.extend(current.take()),
                    b"t" => in_text = false,
                    _ => {}
                },
                Event::Text(text) if in_text => {
                    let value = text
                        .unescape()
                        .map_err(|err| Self::xml_error(err.to_string()))?;
                    if let Some(current) = current.as_mut() {
                        current.push_str(&value);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(strings)
    }

    fn attribute(start: &BytesStart<'_>, key: &[u8]) -> Option<String> {
        start
            .attributes()
            .flatten()
            .find(|attribute| attribute.key.local_name().as_ref() == key)
            .and_then(|attribute| attribute.unescape_value().ok())
            .map(|value| value.into_owned())
    }

    fn sheet_grid(xml: &str, shared: &[String]) -> Result<Vec<GridRow>, ParserError> {
        let mut reader = Reader::from_str(xml);
        let mut grid: Vec<GridRow> = Vec::new();
        let mut row: Option<GridRow> = None;
        let mut cell_column: usize = 0;
        let mut cell_type: Option<String> = None;
        let mut cell_value = String::new();
        let mut in_value = false;

        loop {
            match reader
                .read_event()
                .map_err(|err| Self::xml_error(format!("worksheet: {err}")))?
            {
                Event::Start(start) => match start.local_name().as_ref() {
                    b"row" => {
                        let line = Self::attribute(&start, b"r")
                            .and_then(|r| r.parse::<usize>().ok())
                            .unwrap_or(grid.len() + 1);
                        row = Some(GridRow::new(line, Vec::new()));
                    }
                    b"c" => {
                        let next = row.as_ref().map(|row| row.cells.len()).unwrap_or(0);
                        let reference = Self::attribute(&start, b"r");
                        cell_column = reference
                            .as_deref()
                            .and_then(column_index)
                            .unwrap_or(next);
                        if cell_column >= MAX_COLUMNS {
                            return Err(ParserError::Unsupported {
                                parser: Self::NAME,
                                reason: format!(
                                    "cell {} lies beyond column XFD",
                                    reference.as_deref().unwrap_or("without reference")
                                ),
                            });
                        }
                        cell_type = Self::attribute(&start, b"t");
                        cell_value.clear();
                    }
                    b"v" | b"t" => in_value = true,
                    _ => {}
                },
                Event::Text(text) if in_value => {
                    let value = text
                        .unescape()
                        .map_err(|err| Self::xml_error(err.to_string()))?;
                    cell_value.push_str(&value);
                }
                Event::End(end) => match end.local_name().as_ref() {
                    b"v" | b"t" => in_value = false,
                    b"c" => {
                        let value = match cell_type.as_deref() {
                            Some("s") => cell_value
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|index| shared.get(index))
                                .cloned()
                                .unwrap_or_default(),
                            Some("b") => match cell_value.trim() {
                                "1" => "true".to_string(),
                                "0" => "false".to_string(),
                                other => other.to_string(),
                            },
                            _ => cell_value.clone(),
                        };
                        if let Some(row) = row.as_mut() {
                            if row.cells.len() <= cell_column {
                                row.cells.resize(cell_column + 1, String::new());
                            }
                            row.cells[cell_column] = value;
                        }
                    }
                    b"row" => grid.extend(row.take()),
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(grid)
    }
}

/// Zero-based column index of an A1-style reference (`C7` gives 2).
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference
        .chars()
        .take_while(|ch| ch.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    letters
        .chars()
        .try_fold(0usize, |acc, ch| {
            let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
            acc.checked_mul(26)?.checked_add(digit)
        })
        .map(|number| number - 1)
}

impl FormatParser for XlsxParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(
        &self,
        source: &DecodedSource<'_>,
        options: &IngestOptions,
    ) -> Result<RawTable, ParserError> {
        if !is_zip(source.bytes) {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "not a zip container".to_string(),
            });
        }

        let mut archive = ZipArchive::new(Cursor::new(source.bytes)).map_err(Self::zip_error)?;
        if archive.by_name(WORKBOOK).is_err() {
            return Err(ParserError::Unsupported {
                parser: Self::NAME,
                reason: "zip archive is not an xlsx workbook".to_string(),
            });
        }

        let shared = match Self::read_entry(&mut archive, SHARED_STRINGS)? {
            Some(xml) => Self::shared_strings(&xml)?,
            None => Vec::new(),
        };
        let sheet_name = Self::first_sheet_name(&archive).ok_or(ParserError::EmptyData {
            parser: Self::NAME,
        })?;
        let sheet = Self::read_entry(&mut archive, &sheet_name)?
            .ok_or(ParserError::EmptyData { parser: Self::NAME })?;

        let grid = Self::sheet_grid(&sheet, &shared)?;
        let mut table = table_from_grid(Self::NAME, SourceFormat::Xlsx, grid, options)?;
        if archive
            .file_names()
            .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
            .count()
            > 1
        {
            table
                .warnings
                .insert(0, format!("workbook has several sheets; read only {sheet_name}"));
        }
        Ok(table)
    }
}
