use cellscope_parser::{CanonicalField, RawRecord, RawTable};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mapping::FieldMapping;
use crate::units::UnitPlan;

/// Rows per synthetic cycle when the file has no cycle column.
pub const ROWS_PER_FALLBACK_CYCLE: usize = 100;
/// Currents within this band (A) count as rest.
pub const REST_CURRENT_THRESHOLD: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Charge,
    Discharge,
    Rest,
    Pulse,
    Impedance,
    Unknown,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Charge => "charge",
            StepType::Discharge => "discharge",
            StepType::Rest => "rest",
            StepType::Pulse => "pulse",
            StepType::Impedance => "impedance",
            StepType::Unknown => "unknown",
        }
    }
}

/// Step-name patterns, tested in order; discharge precedes charge because
/// most discharge labels contain "charge".
static STEP_PATTERNS: Lazy<Vec<(StepType, Regex)>> = Lazy::new(|| {
    [
        (
            StepType::Discharge,
            r"(?i)^d$|dis|dchg|dchrg|dsg|^cc[_\s-]?d|^cp[_\s-]?d|^i-$",
        ),
        (
            StepType::Charge,
            r"(?i)^c$|chg|chrg|charge|^cc$|^cv$|cccv|^i\+$",
        ),
        (StepType::Rest, r"(?i)^r$|^o$|rest|pause|ocv|idle|relax|wait"),
        (StepType::Pulse, r"(?i)^p$|pulse|hppc|dcir|gitt"),
        (StepType::Impedance, r"(?i)^z$|eis|imped|peis|geis"),
    ]
    .into_iter()
    .map(|(step, pattern)| {
        (
            step,
            Regex::new(pattern).expect("step pattern is valid"),
        )
    })
    .collect()
});

/// Step from an explicit label first, then from the current sign.
pub fn classify_step(label: Option<&str>, current: Option<f64>) -> StepType {
    if let Some(label) = label.map(str::trim).filter(|label| !label.is_empty()) {
        if let Some((step, _)) = STEP_PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(label))
        {
            return *step;
        }
    }
    match current {
        Some(current) if current > REST_CURRENT_THRESHOLD => StepType::Charge,
        Some(current) if current < -REST_CURRENT_THRESHOLD => StepType::Discharge,
        Some(_) => StepType::Rest,
        None => StepType::Unknown,
    }
}

/// One retained row in canonical units (mAh, V, A, s, Wh, °C).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    /// Index of the source row within the raw table.
    pub row: usize,
    pub cycle: u32,
    pub step: StepType,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub capacity: Option<f64>,
    pub discharge_capacity: Option<f64>,
    pub charge_capacity: Option<f64>,
    pub energy: Option<f64>,
    pub discharge_energy: Option<f64>,
    pub charge_energy: Option<f64>,
    pub temperature: Option<f64>,
    pub time: Option<f64>,
}

impl NormalizedSample {
    fn has_measurement(&self) -> bool {
        self.voltage.is_some()
            || self.current.is_some()
            || self.capacity.is_some()
            || self.discharge_capacity.is_some()
            || self.charge_capacity.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    pub samples: Vec<NormalizedSample>,
    pub dropped_rows: usize,
    pub cycle_fallback: bool,
}

struct RowReader<'a> {
    mapping: &'a FieldMapping,
    plan: &'a UnitPlan,
}

impl RowReader<'_> {
    fn value(&self, record: &RawRecord, field: CanonicalField) -> Option<f64> {
        let column = self.mapping.column(field)?;
        self.plan.normalize(field, record.get(column)?)
    }

    fn label<'r>(&self, record: &'r RawRecord) -> Option<&'r str> {
        let column = self.mapping.column(CanonicalField::StepType)?;
        record.get(column)?.as_text()
    }

    fn cycle(&self, record: &RawRecord) -> Option<Option<u32>> {
        let column = self.mapping.column(CanonicalField::Cycle)?;
        let value = record.get(column).and_then(|value| value.as_f64());
        Some(
            value
                .filter(|cycle| *cycle >= 0.0 && *cycle <= u32::MAX as f64)
                .map(|cycle| cycle.round() as u32),
        )
    }
}

/// Convert raw records into normalized samples, dropping rows that carry no
/// usable measurement or an unusable cycle number.
pub fn build_samples(
    table: &RawTable,
    mapping: &FieldMapping,
    plan: &UnitPlan,
    warnings: &mut Vec<String>,
) -> SampleSet {
    let reader = RowReader { mapping, plan };
    let cycle_fallback = !mapping.contains(CanonicalField::Cycle);
    if cycle_fallback {
        warnings.push(format!(
            "no cycle column recognized; numbering cycles in blocks of {ROWS_PER_FALLBACK_CYCLE} rows"
        ));
    }

    let mut set = SampleSet {
        cycle_fallback,
        ..SampleSet::default()
    };

    for (row, record) in table.rows.iter().enumerate() {
        let cycle = match reader.cycle(record) {
            Some(Some(cycle)) => cycle,
            Some(None) => {
                set.dropped_rows += 1;
                continue;
            }
            None => (row / ROWS_PER_FALLBACK_CYCLE + 1) as u32,
        };

        let current = reader.value(record, CanonicalField::Current);
        let sample = NormalizedSample {
            row,
            cycle,
            step: classify_step(reader.label(record), current),
            voltage: reader.value(record, CanonicalField::Voltage),
            current,
            capacity: reader.value(record, CanonicalField::Capacity),
            discharge_capacity: reader.value(record, CanonicalField::DischargeCapacity),
            charge_capacity: reader.value(record, CanonicalField::ChargeCapacity),
            energy: reader.value(record, CanonicalField::Energy),
            discharge_energy: reader.value(record, CanonicalField::DischargeEnergy),
            charge_energy: reader.value(record, CanonicalField::ChargeEnergy),
            temperature: reader.value(record, CanonicalField::Temperature),
            time: reader.value(record, CanonicalField::Time),
        };
        if !sample.has_measurement() {
            set.dropped_rows += 1;
            continue;
        }
        set.samples.push(sample);
    }

    if set.dropped_rows > 0 {
        let total = table.rows.len();
        let percent = set.dropped_rows as f64 / total.max(1) as f64 * 100.0;
        warnings.push(format!(
            "dropped {} of {} row(s) ({percent:.1}%) with missing or non-numeric values",
            set.dropped_rows, total
        ));
    }
    debug!(
        samples = set.samples.len(),
        dropped = set.dropped_rows,
        "built normalized samples"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::map_columns;
    use crate::units::infer_units;
    use cellscope_parser::{RawValue, SourceFormat};

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            SourceFormat::Delimited { delimiter: ',' },
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| RawRecord::new(row.iter().map(|c| RawValue::from_cell(c)).collect()))
                .collect(),
        )
    }

    fn build(table: &RawTable) -> (SampleSet, Vec<String>) {
        let mut warnings = Vec::new();
        let mapping = map_columns(table, &mut warnings);
        let plan = infer_units(table, &mapping, &mut warnings);
        let set = build_samples(table, &mapping, &plan, &mut warnings);
        (set, warnings)
    }

    #[test]
    fn classifies_vendor_step_labels() {
        assert_eq!(classify_step(Some("CC_DChg"), Some(1.0)), StepType::Discharge);
        assert_eq!(classify_step(Some("CCCV_Chg"), None), StepType::Charge);
        assert_eq!(classify_step(Some("Discharge"), None), StepType::Discharge);
        assert_eq!(classify_step(Some("D"), None), StepType::Discharge);
        assert_eq!(classify_step(Some("C"), None), StepType::Charge);
        assert_eq!(classify_step(Some("R"), None), StepType::Rest);
        assert_eq!(classify_step(Some("Rest"), None), StepType::Rest);
        assert_eq!(classify_step(Some("HPPC pulse"), None), StepType::Pulse);
        assert_eq!(classify_step(Some("PEIS"), None), StepType::Impedance);
    }

    #[test]
    fn falls_back_to_current_sign() {
        assert_eq!(classify_step(Some("1"), Some(0.5)), StepType::Charge);
        assert_eq!(classify_step(None, Some(-0.5)), StepType::Discharge);
        assert_eq!(classify_step(None, Some(0.0005)), StepType::Rest);
        assert_eq!(classify_step(None, None), StepType::Unknown);
    }

    #[test]
    fn drops_rows_without_usable_values() {
        let table = table(
            &["Cycle", "Voltage", "Current", "Capacity"],
            &[
                &["1", "4.2", "-1.0", "2500"],
                &["x", "4.1", "-1.0", "2400"],
                &["1", "", "n/a", ""],
                &["2", "4.0", "-1.0", "2300"],
            ],
        );
        let (set, warnings) = build(&table);

        assert_eq!(set.samples.len(), 2);
        assert_eq!(set.dropped_rows, 2);
        assert!(warnings
            .iter()
            .any(|w| w.contains("dropped 2 of 4 row(s) (50.0%)")));
    }

    #[test]
    fn numbers_cycles_by_row_blocks_without_cycle_column() {
        let rows: Vec<[&str; 2]> = (0..250).map(|_| ["3.7", "-1.0"]).collect();
        let slices: Vec<&[&str]> = rows.iter().map(|row| row.as_slice()).collect();
        let table = table(&["Voltage", "Current"], &slices);
        let (set, warnings) = build(&table);

        assert!(set.cycle_fallback);
        assert_eq!(set.samples[0].cycle, 1);
        assert_eq!(set.samples[99].cycle, 1);
        assert_eq!(set.samples[100].cycle, 2);
        assert_eq!(set.samples[249].cycle, 3);
        assert!(warnings.iter().any(|w| w.contains("blocks of 100 rows")));
    }
}
