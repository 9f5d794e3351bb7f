//! Health metrics: state-of-health history, chemistry classification, grade,
//! status and remaining-useful-life projection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cycles::{mean, CycleRecord};

/// Tolerance around a profile's voltage window when testing extrema.
const BAND_MARGIN_V: f64 = 0.05;
/// Distance from nominal voltage at which the average-voltage score reaches zero.
const NOMINAL_FALLOFF_V: f64 = 0.3;
const MAX_IN_BAND_SCORE: f64 = 40.0;
const MIN_IN_BAND_SCORE: f64 = 30.0;
const NOMINAL_SCORE: f64 = 30.0;
/// A profile must score above this to be reported.
const CHEMISTRY_ACCEPTANCE: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Most recent SoH points used by the RUL regression.
    pub rul_window: usize,
    /// RUL reported when there are too few points to regress.
    pub rul_default: u32,
    /// RUL reported for flat or improving trends, and the upper cap.
    pub rul_ceiling: u32,
    pub min_rul_points: usize,
    /// SoH percentage treated as end of life.
    pub end_of_life_soh: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            rul_window: 20,
            rul_default: 500,
            rul_ceiling: 1000,
            min_rul_points: 3,
            end_of_life_soh: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chemistry {
    #[serde(rename = "LFP")]
    Lfp,
    #[serde(rename = "NMC")]
    Nmc,
    #[serde(rename = "LCO")]
    Lco,
    #[serde(rename = "NCA")]
    Nca,
    #[serde(rename = "LTO")]
    Lto,
    #[serde(rename = "LMO")]
    Lmo,
    Unknown,
}

impl Chemistry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chemistry::Lfp => "LFP",
            Chemistry::Nmc => "NMC",
            Chemistry::Lco => "LCO",
            Chemistry::Nca => "NCA",
            Chemistry::Lto => "LTO",
            Chemistry::Lmo => "LMO",
            Chemistry::Unknown => "Unknown",
        }
    }

    pub fn profile(&self) -> Option<&'static ChemistryProfile> {
        CHEMISTRY_PROFILES
            .iter()
            .find(|profile| profile.chemistry == *self)
    }
}

impl fmt::Display for Chemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChemistryProfile {
    pub chemistry: Chemistry,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub nominal_voltage: f64,
}

/// Reference voltage windows, in tie-break order.
pub const CHEMISTRY_PROFILES: [ChemistryProfile; 6] = [
    ChemistryProfile {
        chemistry: Chemistry::Lfp,
        min_voltage: 2.5,
        max_voltage: 3.65,
        nominal_voltage: 3.2,
    },
    ChemistryProfile {
        chemistry: Chemistry::Nmc,
        min_voltage: 3.0,
        max_voltage: 4.2,
        nominal_voltage: 3.7,
    },
    ChemistryProfile {
        chemistry: Chemistry::Lco,
        min_voltage: 3.0,
        max_voltage: 4.35,
        nominal_voltage: 3.85,
    },
    ChemistryProfile {
        chemistry: Chemistry::Nca,
        min_voltage: 3.0,
        max_voltage: 4.2,
        nominal_voltage: 3.6,
    },
    ChemistryProfile {
        chemistry: Chemistry::Lto,
        min_voltage: 1.5,
        max_voltage: 2.8,
        nominal_voltage: 2.4,
    },
    ChemistryProfile {
        chemistry: Chemistry::Lmo,
        min_voltage: 3.0,
        max_voltage: 4.2,
        nominal_voltage: 3.8,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degrading,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SohPoint {
    pub cycle: u32,
    pub soh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryHealthSummary {
    pub soh: f64,
    pub soh_history: Vec<SohPoint>,
    pub rul: u32,
    pub grade: Grade,
    pub status: HealthStatus,
    pub chemistry: Chemistry,
}

/// Observed voltage envelope across cycles: highest maximum, lowest minimum
/// and mean of the per-cycle averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageEnvelope {
    pub max: f64,
    pub min: f64,
    pub avg: f64,
}

impl VoltageEnvelope {
    pub fn from_cycles(records: &[CycleRecord]) -> Option<Self> {
        let max = records
            .iter()
            .filter_map(|r| r.max_voltage)
            .reduce(f64::max)?;
        let min = records
            .iter()
            .filter_map(|r| r.min_voltage)
            .reduce(f64::min)?;
        let averages: Vec<f64> = records.iter().filter_map(|r| r.avg_voltage).collect();
        Some(Self {
            max,
            min,
            avg: mean(&averages)?,
        })
    }
}

fn profile_score(profile: &ChemistryProfile, envelope: &VoltageEnvelope) -> f64 {
    let low = profile.min_voltage - BAND_MARGIN_V;
    let high = profile.max_voltage + BAND_MARGIN_V;
    let mut score = 0.0;
    if (low..=high).contains(&envelope.max) {
        score += MAX_IN_BAND_SCORE;
    }
    if (low..=high).contains(&envelope.min) {
        score += MIN_IN_BAND_SCORE;
    }
    let distance = (envelope.avg - profile.nominal_voltage).abs();
    if distance < NOMINAL_FALLOFF_V {
        score += NOMINAL_SCORE * (1.0 - distance / NOMINAL_FALLOFF_V);
    }
    score
}

pub fn detect_chemistry(records: &[CycleRecord]) -> Chemistry {
    let Some(envelope) = VoltageEnvelope::from_cycles(records) else {
        return Chemistry::Unknown;
    };
    let mut best: Option<(Chemistry, f64)> = None;
    for profile in &CHEMISTRY_PROFILES {
        let score = profile_score(profile, &envelope);
        debug!(chemistry = %profile.chemistry, score, "chemistry profile score");
        if score > CHEMISTRY_ACCEPTANCE && best.map_or(true, |(_, top)| score > top) {
            best = Some((profile.chemistry, score));
        }
    }
    best.map_or(Chemistry::Unknown, |(chemistry, _)| chemistry)
}

/// SoH per cycle with capacity data, relative to the running maximum
/// discharge capacity.
pub fn soh_history(records: &[CycleRecord]) -> Vec<SohPoint> {
    let mut running_max: f64 = 0.0;
    records
        .iter()
        .filter(|record| record.has_capacity() && record.discharge_capacity.is_finite())
        .map(|record| {
            running_max = running_max.max(record.discharge_capacity);
            SohPoint {
                cycle: record.cycle,
                soh: (record.discharge_capacity / running_max * 100.0).clamp(0.0, 100.0),
            }
        })
        .collect()
}

pub fn grade_for(soh: f64) -> Grade {
    if soh >= 95.0 {
        Grade::A
    } else if soh >= 85.0 {
        Grade::B
    } else if soh >= 75.0 {
        Grade::C
    } else {
        Grade::D
    }
}

pub fn status_for(soh: f64) -> HealthStatus {
    if soh >= 90.0 {
        HealthStatus::Healthy
    } else if soh >= 80.0 {
        HealthStatus::Degrading
    } else {
        HealthStatus::Critical
    }
}

/// Ordinary least squares fit, returning `(slope, intercept)`. `None` when
/// there are fewer than two points or every x is identical.
pub(crate) fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

/// The most recent `rul_window` history points as `(cycle, soh)` pairs.
pub(crate) fn recent_window(history: &[SohPoint], thresholds: &HealthThresholds) -> Vec<(f64, f64)> {
    let start = history.len().saturating_sub(thresholds.rul_window);
    history[start..]
        .iter()
        .map(|point| (f64::from(point.cycle), point.soh))
        .collect()
}

/// Cycles until the fitted SoH trend crosses end of life.
pub fn estimate_rul(history: &[SohPoint], thresholds: &HealthThresholds) -> u32 {
    if history.len() < thresholds.min_rul_points {
        return thresholds.rul_default;
    }
    let Some(last) = history.last() else {
        return thresholds.rul_default;
    };
    let Some((slope, intercept)) = linear_fit(&recent_window(history, thresholds)) else {
        return thresholds.rul_ceiling;
    };
    if slope >= 0.0 {
        return thresholds.rul_ceiling;
    }
    let crossing = (thresholds.end_of_life_soh - intercept) / slope;
    let remaining = (crossing - f64::from(last.cycle)).floor();
    remaining.clamp(0.0, f64::from(thresholds.rul_ceiling)) as u32
}

pub fn assess_health(
    records: &[CycleRecord],
    thresholds: &HealthThresholds,
    warnings: &mut Vec<String>,
) -> BatteryHealthSummary {
    let history = soh_history(records);
    let soh = match history.last() {
        Some(point) => point.soh,
        None => {
            warnings.push(
                "no discharge capacity data; state of health reported as 100".to_string(),
            );
            100.0
        }
    };
    let rul = estimate_rul(&history, thresholds);
    let chemistry = detect_chemistry(records);
    debug!(soh, rul, chemistry = %chemistry, points = history.len(), "assessed health");

    BatteryHealthSummary {
        soh,
        soh_history: history,
        rul,
        grade: grade_for(soh),
        status: status_for(soh),
        chemistry,
    }
}
