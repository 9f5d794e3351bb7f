//! Deterministic stand-in dataset used when a file cannot be analyzed. It is
//! emitted as a raw table so it passes through the normal mapping, unit and
//! aggregation stages.

use cellscope_parser::{RawRecord, RawTable, RawValue, SourceFormat};

pub const SYNTHETIC_CYCLES: u32 = 100;
const INITIAL_CAPACITY_AH: f64 = 2.5;
/// Fraction of initial capacity lost per cycle.
const FADE_PER_CYCLE: f64 = 0.0008;
const COULOMBIC_EFFICIENCY: f64 = 0.995;
const CURRENT_A: f64 = 1.25;
const SAMPLE_INTERVAL_S: f64 = 1800.0;

const HEADERS: [&str; 7] = [
    "Cycle",
    "Step Type",
    "Time (s)",
    "Voltage (V)",
    "Current (A)",
    "Capacity (Ah)",
    "Temperature (C)",
];

/// (fraction of step capacity, voltage) per sample.
const CHARGE_PROFILE: [(f64, f64); 3] = [(0.0, 3.6), (0.5, 3.9), (1.0, 4.2)];
const DISCHARGE_PROFILE: [(f64, f64); 3] = [(0.0, 4.0), (0.5, 3.6), (1.0, 3.0)];

pub fn synthetic_table() -> RawTable {
    let mut rows = Vec::new();
    let mut time = 0.0;

    for cycle in 1..=SYNTHETIC_CYCLES {
        let discharge = INITIAL_CAPACITY_AH * (1.0 - FADE_PER_CYCLE * f64::from(cycle - 1));
        let charge = discharge / COULOMBIC_EFFICIENCY;
        let steps = [
            ("charge", CURRENT_A, charge, &CHARGE_PROFILE),
            ("discharge", -CURRENT_A, discharge, &DISCHARGE_PROFILE),
        ];
        for (label, current, capacity, profile) in steps {
            for (index, (fraction, voltage)) in profile.iter().enumerate() {
                let temperature = 25.0 + 1.5 * index as f64;
                rows.push(RawRecord::new(vec![
                    RawValue::Number(f64::from(cycle)),
                    RawValue::Text(label.to_string()),
                    RawValue::Number(time),
                    RawValue::Number(*voltage),
                    RawValue::Number(current),
                    RawValue::Number(capacity * fraction),
                    RawValue::Number(temperature),
                ]));
                time += SAMPLE_INTERVAL_S;
            }
        }
    }

    RawTable::new(
        SourceFormat::Synthetic,
        HEADERS.iter().map(|header| header.to_string()).collect(),
        rows,
    )
}
