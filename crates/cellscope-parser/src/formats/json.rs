use serde_json::{Map, Value};

use crate::errors::ParserError;
use crate::model::{DecodedSource, IngestOptions, RawRecord, RawTable, RawValue, SourceFormat};
use crate::registry::FormatParser;

use super::common::{table_from_grid, GridRow};

/// Keys that commonly wrap the record array in exported JSON documents.
const WRAPPER_KEYS: [&str; 2] = ["data", "results"];

pub struct JsonParser;

impl Default for JsonParser {
    fn default() -> Self {
        Self
    }
}

impl JsonParser {
    const NAME: &'static str = "JSON";

    fn mismatch(reason: impl Into<String>) -> ParserError {
        ParserError::FormatMismatch {
            parser: Self::NAME,
            reason: reason.into(),
        }
    }

    /// Find the record array: the document itself, a `data`/`results` member,
    /// or failing that the first member holding an array.
    fn record_array<'v>(
        document: &'v Value,
        warnings: &mut Vec<String>,
    ) -> Result<&'v Vec<Value>, ParserError> {
        match document {
            Value::Array(items) => Ok(items),
            Value::Object(map) => {
                for key in WRAPPER_KEYS {
                    if let Some(Value::Array(items)) = map.get(key) {
                        return Ok(items);
                    }
                }
                let (key, items) = map
                    .iter()
                    .find_map(|(key, value)| match value {
                        Value::Array(items) if !items.is_empty() => Some((key, items)),
                        _ => None,
                    })
                    .ok_or_else(|| Self::mismatch("object has no array of records"))?;
                warnings.push(format!("read records from the \"{key}\" member"));
                Ok(items)
            }
            _ => Err(Self::mismatch("document is neither an array nor an object")),
        }
    }

    fn value_to_raw(value: &Value) -> RawValue {
        match value {
            Value::Null => RawValue::Empty,
            Value::Number(number) => number
                .as_f64()
                .filter(|v| v.is_finite())
                .map(RawValue::Number)
                .unwrap_or(RawValue::Empty),
            Value::String(text) => RawValue::from_cell(text),
            Value::Bool(flag) => RawValue::Text(flag.to_string()),
            nested => RawValue::Text(nested.to_string()),
        }
    }

    fn value_to_cell(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    fn table_from_objects(
        items: &[Value],
        options: &IngestOptions,
        mut warnings: Vec<String>,
    ) -> Result<RawTable, ParserError> {
        let objects: Vec<&Map<String, Value>> =
            items.iter().filter_map(Value::as_object).collect();
        let skipped = items.len() - objects.len();
        if skipped > 0 {
            warnings.push(format!("skipped {skipped} array element(s) that were not objects"));
        }

        let mut headers: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !headers.iter().any(|existing| existing == key) {
                    headers.push(key.clone());
                }
            }
        }
        if headers.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        let rows: Vec<RawRecord> = objects
            .iter()
            .map(|object| {
                RawRecord::new(
                    headers
                        .iter()
                        .map(|key| object.get(key).map(Self::value_to_raw).unwrap_or(RawValue::Empty))
                        .collect(),
                )
            })
            .filter(|record| !record.is_empty())
            .collect();
        if rows.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        let mut table = RawTable::new(SourceFormat::Json, headers, rows);
        table.warnings = warnings;
        table.cap_rows(options.max_rows);
        Ok(table)
    }

    fn table_from_arrays(
        items: &[Value],
        options: &IngestOptions,
        warnings: Vec<String>,
    ) -> Result<RawTable, ParserError> {
        let grid = items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                item.as_array().map(|cells| {
                    GridRow::new(idx + 1, cells.iter().map(Self::value_to_cell).collect())
                })
            })
            .collect();
        let mut table = table_from_grid(Self::NAME, SourceFormat::Json, grid, options)?;
        let mut combined = warnings;
        combined.append(&mut table.warnings);
        table.warnings = combined;
        Ok(table)
    }
}

impl FormatParser for JsonParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(
        &self,
        source: &DecodedSource<'_>,
        options: &IngestOptions,
    ) -> Result<RawTable, ParserError> {
        let trimmed = source.text.trim_start();
        if !(trimmed.starts_with('[') || trimmed.starts_with('{')) {
            return Err(Self::mismatch("text does not start with '[' or '{'"));
        }
        let document: Value = serde_json::from_str(trimmed)
            .map_err(|err| Self::mismatch(format!("invalid JSON: {err}")))?;

        let mut warnings = Vec::new();
        let items = Self::record_array(&document, &mut warnings)?;
        if items.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        if items.iter().any(Value::is_object) {
            Self::table_from_objects(items, options, warnings)
        } else if items.iter().any(Value::is_array) {
            Self::table_from_arrays(items, options, warnings)
        } else {
            Err(Self::mismatch("records are neither objects nor arrays"))
        }
    }
}
