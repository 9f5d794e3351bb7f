use tracing::{debug, warn};

use crate::decode::{decode, is_ole};
use crate::errors::{ParserAttempt, ParserError};
use crate::formats::{DelimitedParser, JsonParser, XlsxParser, XmlParser};
use crate::model::{DecodedSource, IngestOptions, RawTable, SourceFile};

pub trait FormatParser {
    fn name(&self) -> &'static str;
    fn parse(
        &self,
        source: &DecodedSource<'_>,
        options: &IngestOptions,
    ) -> Result<RawTable, ParserError>;
}

const REGISTRY: &str = "REGISTRY";

/// Decode a file and hand it to the built-in parsers in fixed order: xlsx,
/// JSON, XML, then delimited text as the catch-all.
pub fn parse_source(
    source: &SourceFile<'_>,
    options: &IngestOptions,
) -> Result<RawTable, ParserError> {
    if source.bytes.is_empty() {
        return Err(ParserError::EmptyData { parser: REGISTRY });
    }
    if is_ole(source.bytes) {
        return Err(ParserError::Unsupported {
            parser: REGISTRY,
            reason: "legacy binary spreadsheet (.xls); export the data as CSV or xlsx".to_string(),
        });
    }

    let mut decoded = decode(source);
    if source.bytes.len() as u64 > options.max_file_bytes {
        warn!(
            file = source.name,
            bytes = source.bytes.len(),
            limit = options.max_file_bytes,
            "file exceeds the configured size limit"
        );
        decoded.warnings.push(format!(
            "file is {} bytes, above the {} byte limit; parsing anyway",
            source.bytes.len(),
            options.max_file_bytes
        ));
    }

    let xlsx = XlsxParser;
    let json = JsonParser;
    let xml = XmlParser;
    let delimited = DelimitedParser;
    let parsers: [&dyn FormatParser; 4] = [&xlsx, &json, &xml, &delimited];

    let mut table = parse_with_parsers(&decoded, options, &parsers)?;
    let mut warnings = std::mem::take(&mut decoded.warnings);
    warnings.append(&mut table.warnings);
    table.warnings = warnings;
    Ok(table)
}

pub fn parse_with_parsers(
    source: &DecodedSource<'_>,
    options: &IngestOptions,
    parsers: &[&dyn FormatParser],
) -> Result<RawTable, ParserError> {
    let mut attempts = Vec::new();

    for parser in parsers {
        match parser.parse(source, options) {
            Ok(parsed) => {
                debug!(
                    file = source.name,
                    parser = parser.name(),
                    rows = parsed.rows.len(),
                    columns = parsed.column_count(),
                    "parsed source file"
                );
                return Ok(parsed);
            }
            Err(ParserError::FormatMismatch { reason, .. }) => {
                attempts.push(ParserAttempt::new(parser.name(), reason));
            }
            Err(err) => return Err(err),
        }
    }

    Err(ParserError::NoMatchingParser { attempts })
}
