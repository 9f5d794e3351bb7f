use std::collections::BTreeMap;

use cellscope_parser::CanonicalField;
use serde::Serialize;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::mapping::FieldMapping;
use crate::samples::{NormalizedSample, SampleSet, StepType};

/// Cycles a never-resetting counter must span before it is treated as one.
const CUMULATIVE_MIN_CYCLES: usize = 3;
const COUNTER_TOLERANCE: f64 = 1e-6;

/// Per-cycle electrical summary in canonical units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub cycle: u32,
    pub discharge_capacity: f64,
    pub charge_capacity: f64,
    pub max_voltage: Option<f64>,
    pub min_voltage: Option<f64>,
    pub avg_voltage: Option<f64>,
    pub coulombic_efficiency: f64,
    /// Latest normalized time in the cycle, seconds.
    pub timestamp: Option<f64>,
    pub is_missing: bool,
    pub is_interpolated: bool,
    pub discharge_energy: Option<f64>,
    pub charge_energy: Option<f64>,
    pub energy_efficiency: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub sample_count: usize,
}

impl CycleRecord {
    pub fn has_capacity(&self) -> bool {
        self.discharge_capacity > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Discharge,
    Charge,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Discharge => "discharge",
            Direction::Charge => "charge",
        }
    }

    fn step(self) -> StepType {
        match self {
            Direction::Discharge => StepType::Discharge,
            Direction::Charge => StepType::Charge,
        }
    }

    fn capacity_field(self) -> CanonicalField {
        match self {
            Direction::Discharge => CanonicalField::DischargeCapacity,
            Direction::Charge => CanonicalField::ChargeCapacity,
        }
    }

    fn energy_field(self) -> CanonicalField {
        match self {
            Direction::Discharge => CanonicalField::DischargeEnergy,
            Direction::Charge => CanonicalField::ChargeEnergy,
        }
    }
}

/// Which sample fields feed the per-direction capacity and energy values.
/// A dedicated column is read on every sample of the cycle; the shared
/// column only on samples tagged with the direction's step.
#[derive(Debug, Clone, Copy)]
struct Sources {
    dedicated_capacity: bool,
    dedicated_energy: bool,
}

impl Sources {
    fn new(mapping: &FieldMapping, direction: Direction) -> Self {
        Self {
            dedicated_capacity: mapping.contains(direction.capacity_field()),
            dedicated_energy: mapping.contains(direction.energy_field()),
        }
    }

    fn capacity(&self, direction: Direction, sample: &NormalizedSample) -> Option<f64> {
        let value = if self.dedicated_capacity {
            match direction {
                Direction::Discharge => sample.discharge_capacity,
                Direction::Charge => sample.charge_capacity,
            }
        } else if sample.step == direction.step() {
            sample.capacity
        } else {
            None
        };
        value.map(f64::abs)
    }

    fn energy(&self, direction: Direction, sample: &NormalizedSample) -> Option<f64> {
        let value = if self.dedicated_energy {
            match direction {
                Direction::Discharge => sample.discharge_energy,
                Direction::Charge => sample.charge_energy,
            }
        } else if sample.step == direction.step() {
            sample.energy
        } else {
            None
        };
        value.map(f64::abs)
    }
}

/// Group samples by cycle and summarize each one. Output is sorted by cycle
/// number with no duplicates.
pub fn aggregate_cycles(
    set: &SampleSet,
    mapping: &FieldMapping,
    warnings: &mut Vec<String>,
) -> Result<Vec<CycleRecord>> {
    if set.samples.is_empty() {
        return Err(AnalysisError::NoCycles { samples: 0 });
    }

    let mut grouped: BTreeMap<u32, Vec<&NormalizedSample>> = BTreeMap::new();
    for sample in &set.samples {
        grouped.entry(sample.cycle).or_default().push(sample);
    }
    let groups: Vec<(u32, Vec<&NormalizedSample>)> = grouped.into_iter().collect();

    let discharge = direction_capacities(&groups, mapping, Direction::Discharge, warnings);
    let charge = direction_capacities(&groups, mapping, Direction::Charge, warnings);
    let discharge_sources = Sources::new(mapping, Direction::Discharge);
    let charge_sources = Sources::new(mapping, Direction::Charge);

    let decreasing = count_decreasing_steps(&set.samples, mapping);
    if decreasing > 0 {
        warnings.push(format!(
            "capacity decreased within {decreasing} charge/discharge step(s); cycle capacity uses the step maximum"
        ));
    }

    let mut records: Vec<CycleRecord> = groups
        .iter()
        .zip(discharge.iter().zip(charge.iter()))
        .map(|((cycle, samples), (&discharge_capacity, &charge_capacity))| {
            let discharge_energy =
                max_of(samples.iter().filter_map(|s| discharge_sources.energy(Direction::Discharge, s)));
            let charge_energy =
                max_of(samples.iter().filter_map(|s| charge_sources.energy(Direction::Charge, s)));
            let (max_voltage, min_voltage, avg_voltage) = voltage_stats(samples);
            let temperatures: Vec<f64> = samples.iter().filter_map(|s| s.temperature).collect();

            CycleRecord {
                cycle: *cycle,
                discharge_capacity,
                charge_capacity,
                max_voltage,
                min_voltage,
                avg_voltage,
                coulombic_efficiency: efficiency(discharge_capacity, charge_capacity),
                timestamp: max_of(samples.iter().filter_map(|s| s.time)),
                is_missing: discharge_capacity == 0.0 && charge_capacity == 0.0,
                is_interpolated: false,
                discharge_energy,
                charge_energy,
                energy_efficiency: match (discharge_energy, charge_energy) {
                    (Some(out), Some(input)) if input > 0.0 => Some(out / input * 100.0),
                    _ => None,
                },
                avg_temperature: mean(&temperatures),
                max_temperature: max_of(temperatures.iter().copied()),
                sample_count: samples.len(),
            }
        })
        .collect();

    let interpolated = interpolate_gaps(&mut records);
    if interpolated > 0 {
        warnings.push(format!(
            "interpolated capacity for {interpolated} missing cycle(s) from neighbouring cycles"
        ));
    }

    debug!(
        cycles = records.len(),
        missing = records.iter().filter(|r| r.is_missing).count(),
        interpolated,
        "aggregated cycles"
    );
    Ok(records)
}

fn direction_capacities(
    groups: &[(u32, Vec<&NormalizedSample>)],
    mapping: &FieldMapping,
    direction: Direction,
    warnings: &mut Vec<String>,
) -> Vec<f64> {
    let sources = Sources::new(mapping, direction);
    let readings: Vec<Vec<f64>> = groups
        .iter()
        .map(|(_, samples)| {
            samples
                .iter()
                .filter_map(|sample| sources.capacity(direction, sample))
                .collect()
        })
        .collect();

    let cumulative = is_cumulative(&readings);
    if cumulative {
        warnings.push(format!(
            "{} capacity counter does not reset between cycles; using the per-cycle span",
            direction.as_str()
        ));
    }

    readings
        .iter()
        .map(|values| {
            let (Some(min), Some(max)) = (min_of(values.iter().copied()), max_of(values.iter().copied()))
            else {
                return 0.0;
            };
            if cumulative {
                max - min
            } else {
                max
            }
        })
        .collect()
}

/// A counter accumulates across the test when every cycle starts at or above
/// where the previous one ended.
fn is_cumulative(readings: &[Vec<f64>]) -> bool {
    let populated: Vec<&Vec<f64>> = readings.iter().filter(|values| !values.is_empty()).collect();
    if populated.len() < CUMULATIVE_MIN_CYCLES || populated.iter().any(|values| values.len() < 2) {
        return false;
    }
    let ranges: Vec<(f64, f64)> = populated
        .iter()
        .filter_map(|values| {
            Some((
                min_of(values.iter().copied())?,
                max_of(values.iter().copied())?,
            ))
        })
        .collect();
    ranges
        .windows(2)
        .all(|pair| pair[1].0 > 0.0 && pair[1].0 >= pair[0].1 - COUNTER_TOLERANCE)
}

/// Contiguous charge or discharge runs whose capacity magnitude drops
/// part-way through.
fn count_decreasing_steps(samples: &[NormalizedSample], mapping: &FieldMapping) -> usize {
    let mut count = 0;
    let mut run: Option<(u32, StepType)> = None;
    let mut previous: Option<f64> = None;
    let mut flagged = false;

    for sample in samples {
        let direction = match sample.step {
            StepType::Discharge => Direction::Discharge,
            StepType::Charge => Direction::Charge,
            _ => {
                run = None;
                previous = None;
                continue;
            }
        };
        let key = (sample.cycle, sample.step);
        if run != Some(key) {
            run = Some(key);
            previous = None;
            flagged = false;
        }
        let Some(value) = Sources::new(mapping, direction).capacity(direction, sample) else {
            continue;
        };
        if let Some(last) = previous {
            if value < last - COUNTER_TOLERANCE && !flagged {
                count += 1;
                flagged = true;
            }
        }
        previous = Some(value);
    }
    count
}

fn voltage_stats(samples: &[&NormalizedSample]) -> (Option<f64>, Option<f64>, Option<f64>) {
    let all: Vec<f64> = samples.iter().filter_map(|s| s.voltage).collect();
    let discharge: Vec<f64> = samples
        .iter()
        .filter(|s| s.step == StepType::Discharge)
        .filter_map(|s| s.voltage)
        .collect();
    let average = if discharge.is_empty() {
        mean(&all)
    } else {
        mean(&discharge)
    };
    (
        max_of(all.iter().copied()),
        min_of(all.iter().copied()),
        average,
    )
}

/// Fill missing cycles that sit between two valid cycles by linear
/// interpolation on cycle number. Returns how many were filled.
fn interpolate_gaps(records: &mut [CycleRecord]) -> usize {
    let valid: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| !record.is_missing)
        .map(|(idx, _)| idx)
        .collect();

    let mut filled = 0;
    for idx in 0..records.len() {
        if !records[idx].is_missing {
            continue;
        }
        let before = valid.iter().rev().find(|&&v| v < idx).copied();
        let after = valid.iter().find(|&&v| v > idx).copied();
        let (Some(before), Some(after)) = (before, after) else {
            continue;
        };

        let (lo, hi) = (&records[before], &records[after]);
        let span = f64::from(hi.cycle) - f64::from(lo.cycle);
        let t = (f64::from(records[idx].cycle) - f64::from(lo.cycle)) / span;
        let discharge = lo.discharge_capacity + t * (hi.discharge_capacity - lo.discharge_capacity);
        let charge = lo.charge_capacity + t * (hi.charge_capacity - lo.charge_capacity);

        let record = &mut records[idx];
        record.discharge_capacity = discharge;
        record.charge_capacity = charge;
        record.coulombic_efficiency = efficiency(discharge, charge);
        record.is_interpolated = true;
        filled += 1;
    }
    filled
}

fn efficiency(discharge: f64, charge: f64) -> f64 {
    if charge > 0.0 {
        discharge / charge * 100.0
    } else {
        0.0
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn max_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

fn min_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}
