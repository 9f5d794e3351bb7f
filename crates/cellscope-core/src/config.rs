use std::path::Path;

use cellscope_parser::IngestOptions;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::health::HealthThresholds;
use crate::issues::IssueThresholds;

/// Environment variable naming a TOML configuration file.
pub const CONFIG_ENV_VAR: &str = "CELLSCOPE_CONFIG";

/// Every tunable constant of the analysis. All sections are optional in TOML;
/// missing keys keep their defaults.
///
/// ```toml
/// [ingest]
/// max_rows = 200000
///
/// [health]
/// rul_window = 30
///
/// [issues]
/// temperature_warning_c = 50.0
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub ingest: IngestOptions,
    pub health: HealthThresholds,
    pub issues: IssueThresholds,
}

impl AnalysisConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AnalysisConfig =
            toml::from_str(raw).map_err(|err| AnalysisError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AnalysisError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from the file named by `CELLSCOPE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim())),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let health = &self.health;
        let issues = &self.issues;
        let checks = [
            (
                self.ingest.header_scan_lines >= 1,
                "ingest.header_scan_lines must be at least 1",
            ),
            (self.ingest.max_rows >= 1, "ingest.max_rows must be at least 1"),
            (
                health.min_rul_points >= 2,
                "health.min_rul_points must be at least 2",
            ),
            (
                health.rul_window >= health.min_rul_points,
                "health.rul_window must not be smaller than health.min_rul_points",
            ),
            (
                health.end_of_life_soh > 0.0 && health.end_of_life_soh < 100.0,
                "health.end_of_life_soh must lie strictly between 0 and 100",
            ),
            (
                health.rul_default <= health.rul_ceiling,
                "health.rul_default must not exceed health.rul_ceiling",
            ),
            (
                issues.soh_critical <= issues.soh_warning,
                "issues.soh_critical must not exceed issues.soh_warning",
            ),
            (
                issues.rul_critical <= issues.rul_warning,
                "issues.rul_critical must not exceed issues.rul_warning",
            ),
            (
                issues.coulombic_efficiency_low < issues.coulombic_efficiency_high,
                "issues.coulombic_efficiency_low must be below issues.coulombic_efficiency_high",
            ),
            (
                issues.temperature_warning_c <= issues.temperature_critical_c,
                "issues.temperature_warning_c must not exceed issues.temperature_critical_c",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(AnalysisError::Config((*message).to_string())),
            None => Ok(()),
        }
    }
}
