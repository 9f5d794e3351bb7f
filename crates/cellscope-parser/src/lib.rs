mod decode;
pub mod errors;
pub mod fields;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{ParserAttempt, ParserError};
pub use fields::{header_unit, matches_any_field, normalize_header, CanonicalField};
pub use model::{
    parse_numeric, DecodedSource, IngestOptions, RawRecord, RawTable, RawValue, SourceFile,
    SourceFormat,
};
pub use registry::{parse_source, parse_with_parsers, FormatParser};

#[cfg(test)]
mod tests;
