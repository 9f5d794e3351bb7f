use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::ParserError;
use crate::model::{DecodedSource, IngestOptions, RawRecord, RawTable, RawValue, SourceFormat};
use crate::registry::FormatParser;

use super::common::{table_from_grid, GridRow, MAX_COLUMNS};

/// Minimal element tree; cycler XML exports are small enough to hold whole.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParserError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| XmlParser::error(err.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|err| XmlParser::error(err.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn descendants<'e>(&'e self, out: &mut Vec<&'e Element>) {
        for child in &self.children {
            out.push(child);
            child.descendants(out);
        }
    }

    fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

pub struct XmlParser;

impl Default for XmlParser {
    fn default() -> Self {
        Self
    }
}

impl XmlParser {
    const NAME: &'static str = "XML";

    fn error(message: impl Into<String>) -> ParserError {
        ParserError::Xml {
            parser: Self::NAME,
            message: message.into(),
        }
    }

    fn read_tree(text: &str) -> Result<Element, ParserError> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut stack: Vec<Element> = vec![Element::default()];
        loop {
            let event = reader.read_event().map_err(|err| {
                Self::error(format!(
                    "malformed document near byte {}: {err}",
                    reader.buffer_position()
                ))
            })?;
            match event {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Event::End(_) => {
                    if stack.len() < 2 {
                        return Err(Self::error("unbalanced closing tag"));
                    }
                    if let Some(element) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        }
                    }
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|err| Self::error(err.to_string()))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&value);
                    }
                }
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&value);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(Self::error("document ended before all elements were closed"));
        }
        stack
            .pop()
            .ok_or_else(|| Self::error("document has no root element"))
    }

    /// Excel 2003 SpreadsheetML: `Workbook/Worksheet/Table/Row/Cell/Data`,
    /// with `ss:Index` allowing sparse cells.
    fn spreadsheet_grid(table: &Element) -> Result<Vec<GridRow>, ParserError> {
        let mut grid = Vec::new();
        let mut line = 0usize;
        for row in table.children.iter().filter(|child| child.name == "Row") {
            line = row
                .attribute("Index")
                .and_then(|index| index.parse::<usize>().ok())
                .unwrap_or(line + 1);
            let mut cells: Vec<String> = Vec::new();
            for cell in row.children.iter().filter(|child| child.name == "Cell") {
                if let Some(index) = cell
                    .attribute("Index")
                    .and_then(|index| index.parse::<usize>().ok())
                {
                    if index > MAX_COLUMNS {
                        return Err(ParserError::Unsupported {
                            parser: Self::NAME,
                            reason: format!("cell index {index} lies beyond column XFD"),
                        });
                    }
                    if index > cells.len() + 1 {
                        cells.resize(index - 1, String::new());
                    }
                }
                let value = cell
                    .children
                    .iter()
                    .find(|child| child.name == "Data")
                    .map(|data| data.text.trim().to_string())
                    .unwrap_or_default();
                cells.push(value);
            }
            grid.push(GridRow::new(line, cells));
        }
        Ok(grid)
    }

    /// The record element is the most frequent tag carrying fields (attributes
    /// or leaf children); its attributes and leaf children become columns.
    fn record_table(root: &Element, options: &IngestOptions) -> Result<RawTable, ParserError> {
        let mut all = Vec::new();
        root.descendants(&mut all);

        // Per tag: how many elements carry fields, and whether any has leaf children.
        let mut counts: HashMap<&str, (usize, bool)> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for element in &all {
            let leafy = element.children.iter().any(Element::is_leaf);
            if element.attributes.is_empty() && !leafy {
                continue;
            }
            let entry = counts.entry(element.name.as_str()).or_insert((0, false));
            if entry.0 == 0 {
                first_seen.push(element.name.as_str());
            }
            entry.0 += 1;
            entry.1 |= leafy;
        }

        // Most frequent wins; on a tie, a tag with leaf children beats one that
        // only has attributes, then document order decides.
        let record_tag = first_seen
            .iter()
            .copied()
            .fold(None::<(&str, (usize, bool))>, |best, name| {
                let rank = counts.get(name).copied().unwrap_or_default();
                match best {
                    Some((_, best_rank)) if best_rank >= rank => best,
                    _ => Some((name, rank)),
                }
            })
            .map(|(name, _)| name)
            .ok_or(ParserError::EmptyData { parser: Self::NAME })?;

        let records: Vec<&Element> = all
            .iter()
            .copied()
            .filter(|element| element.name == record_tag)
            .collect();

        let mut headers: Vec<String> = Vec::new();
        let mut push_header = |name: &str| {
            if !headers.iter().any(|existing| existing == name) {
                headers.push(name.to_string());
            }
        };
        for record in &records {
            for (key, _) in &record.attributes {
                push_header(key);
            }
            for child in record.children.iter().filter(|child| child.is_leaf()) {
                push_header(&child.name);
            }
        }

        let rows: Vec<RawRecord> = records
            .iter()
            .map(|record| {
                RawRecord::new(
                    headers
                        .iter()
                        .map(|header| {
                            record
                                .attribute(header)
                                .or_else(|| {
                                    record
                                        .children
                                        .iter()
                                        .find(|child| child.is_leaf() && &child.name == header)
                                        .map(|child| child.text.as_str())
                                })
                                .map(RawValue::from_cell)
                                .unwrap_or(RawValue::Empty)
                        })
                        .collect(),
                )
            })
            .filter(|record| !record.is_empty())
            .collect();
        if rows.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        let mut table = RawTable::new(SourceFormat::Xml, headers, rows);
        table.warnings.push(format!(
            "read {} <{record_tag}> element(s) as records",
            records.len()
        ));
        table.cap_rows(options.max_rows);
        Ok(table)
    }
}

impl FormatParser for XmlParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(
        &self,
        source: &DecodedSource<'_>,
        options: &IngestOptions,
    ) -> Result<RawTable, ParserError> {
        if !source.text.trim_start().starts_with('<') {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "text does not start with '<'".to_string(),
            });
        }

        let root = Self::read_tree(&source.text)?;
        if root.children.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        let workbook = root.children.iter().find(|child| child.name == "Workbook");
        match workbook.and_then(|workbook| workbook.find("Table")) {
            Some(table) => table_from_grid(
                Self::NAME,
                SourceFormat::SpreadsheetXml,
                Self::spreadsheet_grid(table)?,
                options,
            ),
            None => Self::record_table(&root, options),
        }
    }
}
