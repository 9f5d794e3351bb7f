//! Column/field mapping: decides which source column carries each canonical
//! field by combining the header-name score from the shared pattern table with
//! a plausibility check on a sample of the column's values.

use std::collections::BTreeMap;

use cellscope_parser::{normalize_header, CanonicalField, RawTable, RawValue};
use tracing::debug;

use crate::units::parse_time_text;

/// Combined score a header must exceed to claim a field.
pub const ACCEPTANCE_THRESHOLD: f64 = 25.0;
const CONTENT_SAMPLE: usize = 10;
const PLAUSIBLE: f64 = 20.0;
const IMPLAUSIBLE: f64 = -15.0;

const POSITIONAL_FIELDS: [CanonicalField; 4] = [
    CanonicalField::Cycle,
    CanonicalField::Voltage,
    CanonicalField::Current,
    CanonicalField::Capacity,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMatch {
    pub column: usize,
    pub header: String,
    pub score: f64,
}

/// Canonical field to source column, one field per column at most.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapping {
    matches: BTreeMap<CanonicalField, ColumnMatch>,
    positional: bool,
}

impl FieldMapping {
    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.matches.get(&field).map(|m| m.column)
    }

    pub fn get(&self, field: CanonicalField) -> Option<&ColumnMatch> {
        self.matches.get(&field)
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.matches.contains_key(&field)
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &ColumnMatch)> {
        self.matches.iter().map(|(field, m)| (*field, m))
    }

    fn claims(&self, column: usize) -> bool {
        self.matches.values().any(|m| m.column == column)
    }

    /// Canonical field name to source header, for report metadata.
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.matches
            .iter()
            .map(|(field, m)| (field.canonical_name().to_string(), m.header.clone()))
            .collect()
    }
}

pub fn map_columns(table: &RawTable, warnings: &mut Vec<String>) -> FieldMapping {
    let normalized: Vec<String> = table.headers.iter().map(|h| normalize_header(h)).collect();
    let mut mapping = FieldMapping::default();

    for field in CanonicalField::ALL {
        let mut best: Option<ColumnMatch> = None;
        for (column, header) in normalized.iter().enumerate() {
            if mapping.claims(column) {
                continue;
            }
            let Some(name_score) = field.name_score(header) else {
                continue;
            };
            let score = name_score + content_score(field, table, column);
            if score > ACCEPTANCE_THRESHOLD && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ColumnMatch {
                    column,
                    header: table.headers[column].clone(),
                    score,
                });
            }
        }
        if let Some(found) = best {
            debug!(field = %field, header = %found.header, score = found.score, "mapped column");
            mapping.matches.insert(field, found);
        }
    }

    let anchors = [
        CanonicalField::Cycle,
        CanonicalField::Voltage,
        CanonicalField::Current,
    ];
    if table.column_count() > 0 && !anchors.iter().any(|field| mapping.contains(*field)) {
        apply_positional(&mut mapping, table);
        let assigned: Vec<&str> = POSITIONAL_FIELDS
            .iter()
            .take(table.column_count())
            .map(|field| field.canonical_name())
            .collect();
        warnings.push(format!(
            "no cycle, voltage or current column recognized; mapped leading columns by position as {}",
            assigned.join(", ")
        ));
    }

    if !CanonicalField::ALL
        .iter()
        .any(|field| field.is_capacity() && mapping.contains(*field))
    {
        warnings.push("no capacity column recognized; cycle capacities will be zero".to_string());
    }

    mapping
}

fn apply_positional(mapping: &mut FieldMapping, table: &RawTable) {
    let width = table.column_count().min(POSITIONAL_FIELDS.len());
    mapping
        .matches
        .retain(|field, m| m.column >= width && !POSITIONAL_FIELDS[..width].contains(field));
    for (column, field) in POSITIONAL_FIELDS.iter().take(width).enumerate() {
        mapping.matches.insert(
            *field,
            ColumnMatch {
                column,
                header: table.headers[column].clone(),
                score: 0.0,
            },
        );
    }
    mapping.positional = true;
}

/// Plausibility of a column's first non-empty values for a field:
/// +20 plausible, -15 implausible, 0 when the column has no values.
pub fn content_score(field: CanonicalField, table: &RawTable, column: usize) -> f64 {
    let sample: Vec<&RawValue> = table
        .column(column)
        .filter(|value| !value.is_empty())
        .take(CONTENT_SAMPLE)
        .collect();
    if sample.is_empty() {
        return 0.0;
    }
    if is_plausible(field, &sample) {
        PLAUSIBLE
    } else {
        IMPLAUSIBLE
    }
}

fn is_plausible(field: CanonicalField, sample: &[&RawValue]) -> bool {
    let numbers: Vec<f64> = sample.iter().filter_map(|value| value.as_f64()).collect();
    let all_numeric = numbers.len() == sample.len();
    let mean = if numbers.is_empty() {
        None
    } else {
        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
    };

    match field {
        CanonicalField::Cycle => {
            all_numeric
                && numbers.iter().all(|v| *v >= 0.0 && v.fract() == 0.0)
                && numbers.windows(2).all(|pair| pair[1] >= pair[0])
        }
        CanonicalField::StepType => {
            let text = sample.len() - numbers.len();
            text * 2 >= sample.len()
        }
        CanonicalField::Time => {
            if all_numeric {
                numbers.windows(2).all(|pair| pair[1] >= pair[0])
            } else {
                sample
                    .iter()
                    .filter_map(|value| value.as_text())
                    .all(|text| parse_time_text(text).is_some())
            }
        }
        CanonicalField::Voltage => mean.is_some_and(|m| (0.0..=5.0).contains(&m)),
        CanonicalField::Current => mean.is_some_and(|m| m.abs() < 100.0),
        CanonicalField::DischargeCapacity
        | CanonicalField::ChargeCapacity
        | CanonicalField::Capacity => mean.is_some_and(|m| m > 10.0),
        CanonicalField::DischargeEnergy | CanonicalField::ChargeEnergy | CanonicalField::Energy => {
            mean.is_some_and(|m| m > 0.0)
        }
        CanonicalField::Temperature => mean.is_some_and(|m| (-40.0..=200.0).contains(&m)),
    }
}
