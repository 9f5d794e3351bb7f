pub mod config;
pub mod cycles;
pub mod equipment;
pub mod error;
pub mod health;
pub mod issues;
pub mod mapping;
pub mod metrics;
pub mod outputs;
pub mod pipeline;
pub mod samples;
pub mod synthetic;
pub mod units;

pub use config::{AnalysisConfig, CONFIG_ENV_VAR};
pub use error::{AnalysisError, Result};
pub use pipeline::{
    analyze_file, analyze_path, detect, AnalysisReport, DetectionReport, FileInput, FileMetadata,
};
