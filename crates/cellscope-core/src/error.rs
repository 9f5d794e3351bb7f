use std::path::PathBuf;

use cellscope_parser::ParserError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file could not be parsed: {0}")]
    Parser(#[from] ParserError),

    #[error("no usable data rows: {0}")]
    NoUsableRows(String),

    #[error("no cycles could be aggregated from {samples} sample(s)")]
    NoCycles { samples: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
