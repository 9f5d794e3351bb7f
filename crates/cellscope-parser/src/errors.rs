use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ParserAttempt {
    pub parser: &'static str,
    pub message: String,
}

impl ParserAttempt {
    pub fn new(parser: &'static str, message: impl Into<String>) -> Self {
        Self {
            parser,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParserAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parser, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{parser} format mismatch: {reason}")]
    FormatMismatch {
        parser: &'static str,
        reason: String,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} XML error: {message}")]
    Xml {
        parser: &'static str,
        message: String,
    },

    #[error("{parser} archive error: {source}")]
    Zip {
        parser: &'static str,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{parser} unsupported input: {reason}")]
    Unsupported {
        parser: &'static str,
        reason: String,
    },

    #[error("{parser} file did not contain any data rows")]
    EmptyData { parser: &'static str },

    #[error("no parser recognized this file ({})", summarize(attempts))]
    NoMatchingParser { attempts: Vec<ParserAttempt> },
}

fn summarize(attempts: &[ParserAttempt]) -> String {
    attempts
        .iter()
        .map(ParserAttempt::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
