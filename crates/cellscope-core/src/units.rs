//! Unit inference and normalization. Every measurement ends up in the
//! canonical unit of its field: mAh, V, A, s, Wh and °C.

use std::collections::BTreeMap;

use cellscope_parser::{header_unit, CanonicalField, RawTable, RawValue};
use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::mapping::FieldMapping;

const CAPACITY_MAH_MEAN: f64 = 100.0;
const VOLTAGE_MV_MAX: f64 = 100.0;
const CURRENT_MA_MEAN: f64 = 10.0;
const TIME_SECONDS_MAX: f64 = 10_000.0;
const TIME_MINUTES_MAX: f64 = 200.0;
const ENERGY_MWH_MEAN: f64 = 100.0;
const TEMPERATURE_KELVIN_MEAN: f64 = 150.0;
const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "mAh")]
    MilliampHours,
    #[serde(rename = "Ah")]
    AmpHours,
    #[serde(rename = "V")]
    Volts,
    #[serde(rename = "mV")]
    Millivolts,
    #[serde(rename = "A")]
    Amps,
    #[serde(rename = "mA")]
    Milliamps,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "Wh")]
    WattHours,
    #[serde(rename = "mWh")]
    MilliwattHours,
    #[serde(rename = "kWh")]
    KilowattHours,
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "K")]
    Kelvin,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::MilliampHours => "mAh",
            Unit::AmpHours => "Ah",
            Unit::Volts => "V",
            Unit::Millivolts => "mV",
            Unit::Amps => "A",
            Unit::Milliamps => "mA",
            Unit::Seconds => "s",
            Unit::Minutes => "min",
            Unit::Hours => "h",
            Unit::WattHours => "Wh",
            Unit::MilliwattHours => "mWh",
            Unit::KilowattHours => "kWh",
            Unit::Celsius => "°C",
            Unit::Kelvin => "K",
        }
    }

    /// Parse a declared unit token such as `mA.h`, `Amp-hr`, `°C` or `secs`.
    pub fn parse(token: &str) -> Option<Unit> {
        let cleaned: String = token
            .trim()
            .to_lowercase()
            .chars()
            .filter(|ch| !matches!(ch, '.' | '-' | ' ' | '°' | '_'))
            .collect();
        let unit = match cleaned.as_str() {
            "mah" => Unit::MilliampHours,
            "ah" | "amphr" | "amphrs" | "amphour" | "amphours" => Unit::AmpHours,
            "v" | "volt" | "volts" => Unit::Volts,
            "mv" => Unit::Millivolts,
            "a" | "amp" | "amps" => Unit::Amps,
            "ma" => Unit::Milliamps,
            "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds,
            "min" | "mins" | "minute" | "minutes" => Unit::Minutes,
            "h" | "hr" | "hrs" | "hour" | "hours" => Unit::Hours,
            "wh" | "watthr" | "watthour" => Unit::WattHours,
            "mwh" => Unit::MilliwattHours,
            "kwh" => Unit::KilowattHours,
            "c" | "degc" | "celsius" => Unit::Celsius,
            "k" | "kelvin" => Unit::Kelvin,
            _ => return None,
        };
        Some(unit)
    }

    fn suits(&self, field: CanonicalField) -> bool {
        match field {
            f if f.is_capacity() => matches!(self, Unit::MilliampHours | Unit::AmpHours),
            f if f.is_energy() => matches!(
                self,
                Unit::WattHours | Unit::MilliwattHours | Unit::KilowattHours
            ),
            CanonicalField::Voltage => matches!(self, Unit::Volts | Unit::Millivolts),
            CanonicalField::Current => matches!(self, Unit::Amps | Unit::Milliamps),
            CanonicalField::Time => matches!(self, Unit::Seconds | Unit::Minutes | Unit::Hours),
            CanonicalField::Temperature => matches!(self, Unit::Celsius | Unit::Kelvin),
            _ => false,
        }
    }

    /// Convert a value in this unit to the canonical unit of its field.
    pub fn to_canonical(&self, value: f64) -> f64 {
        match self {
            Unit::AmpHours => value * 1000.0,
            Unit::Millivolts | Unit::Milliamps | Unit::MilliwattHours => value / 1000.0,
            Unit::KilowattHours => value * 1000.0,
            Unit::Minutes => value * 60.0,
            Unit::Hours => value * 3600.0,
            Unit::Kelvin => value - KELVIN_OFFSET,
            Unit::MilliampHours
            | Unit::Volts
            | Unit::Amps
            | Unit::Seconds
            | Unit::WattHours
            | Unit::Celsius => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitSource {
    Header,
    UnitsRow,
    Magnitude,
    TextTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnUnit {
    pub unit: Unit,
    pub source: UnitSource,
}

/// Parsed textual time value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeText {
    Timestamp(NaiveDateTime),
    Duration(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeBasis {
    Numeric,
    /// Timestamps are measured from the first parseable one in the column.
    Timestamps { origin: NaiveDateTime },
    Durations,
}

/// Unit decision per mapped field, applied row by row by the sample builder.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    units: BTreeMap<CanonicalField, ColumnUnit>,
    time_basis: TimeBasis,
}

impl Default for UnitPlan {
    fn default() -> Self {
        Self {
            units: BTreeMap::new(),
            time_basis: TimeBasis::Numeric,
        }
    }
}

impl UnitPlan {
    pub fn unit(&self, field: CanonicalField) -> Option<&ColumnUnit> {
        self.units.get(&field)
    }

    /// Normalize a raw cell of a mapped field into the canonical unit. Values
    /// that overflow during conversion are treated as missing.
    pub fn normalize(&self, field: CanonicalField, value: &RawValue) -> Option<f64> {
        self.convert(field, value).filter(|value| value.is_finite())
    }

    fn convert(&self, field: CanonicalField, value: &RawValue) -> Option<f64> {
        if field == CanonicalField::Time {
            if let Some(text) = value.as_text() {
                if value.as_f64().is_none() {
                    return match (self.time_basis, parse_time_text(text)?) {
                        (TimeBasis::Timestamps { origin }, TimeText::Timestamp(ts)) => {
                            Some((ts - origin).num_milliseconds() as f64 / 1000.0)
                        }
                        (_, TimeText::Duration(seconds)) => Some(seconds),
                        _ => None,
                    };
                }
            }
        }
        let raw = value.as_f64()?;
        match self.units.get(&field) {
            Some(column) => Some(column.unit.to_canonical(raw)),
            None => Some(raw),
        }
    }

    /// Source unit per canonical field name, for report metadata.
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.units
            .iter()
            .map(|(field, column)| {
                let label = match column.source {
                    UnitSource::TextTime => "text".to_string(),
                    _ => column.unit.symbol().to_string(),
                };
                (field.canonical_name().to_string(), label)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnStats {
    min: f64,
    max: f64,
    mean: f64,
    mean_abs: f64,
    count: usize,
}

fn column_stats(table: &RawTable, column: usize) -> Option<ColumnStats> {
    let mut stats = ColumnStats {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        mean: 0.0,
        mean_abs: 0.0,
        count: 0,
    };
    for value in table.column(column).filter_map(RawValue::as_f64) {
        stats.min = stats.min.min(value);
        stats.max = stats.max.max(value);
        stats.mean += value;
        stats.mean_abs += value.abs();
        stats.count += 1;
    }
    if stats.count == 0 {
        return None;
    }
    stats.mean /= stats.count as f64;
    stats.mean_abs /= stats.count as f64;
    Some(stats)
}

fn magnitude_unit(field: CanonicalField, stats: &ColumnStats) -> Unit {
    match field {
        f if f.is_capacity() => {
            if stats.mean_abs > CAPACITY_MAH_MEAN {
                Unit::MilliampHours
            } else {
                Unit::AmpHours
            }
        }
        f if f.is_energy() => {
            if stats.mean_abs > ENERGY_MWH_MEAN {
                Unit::MilliwattHours
            } else {
                Unit::WattHours
            }
        }
        CanonicalField::Voltage if stats.max > VOLTAGE_MV_MAX => Unit::Millivolts,
        CanonicalField::Voltage => Unit::Volts,
        CanonicalField::Current if stats.mean_abs > CURRENT_MA_MEAN => Unit::Milliamps,
        CanonicalField::Current => Unit::Amps,
        CanonicalField::Time if stats.max > TIME_SECONDS_MAX => Unit::Seconds,
        CanonicalField::Time if stats.max > TIME_MINUTES_MAX => Unit::Minutes,
        CanonicalField::Time => Unit::Hours,
        CanonicalField::Temperature if stats.mean > TEMPERATURE_KELVIN_MEAN => Unit::Kelvin,
        _ => Unit::Celsius,
    }
}

fn declared_unit(table: &RawTable, column: usize, field: CanonicalField) -> Option<ColumnUnit> {
    let from_header = table
        .headers
        .get(column)
        .and_then(|header| header_unit(header))
        .and_then(|token| Unit::parse(&token))
        .filter(|unit| unit.suits(field))
        .map(|unit| ColumnUnit {
            unit,
            source: UnitSource::Header,
        });
    from_header.or_else(|| {
        table
            .unit_hint(column)
            .and_then(Unit::parse)
            .filter(|unit| unit.suits(field))
            .map(|unit| ColumnUnit {
                unit,
                source: UnitSource::UnitsRow,
            })
    })
}

/// Decide the source unit of every mapped numeric field. Declared units win
/// over magnitude heuristics; text time columns switch to timestamp or
/// duration parsing.
pub fn infer_units(table: &RawTable, mapping: &FieldMapping, warnings: &mut Vec<String>) -> UnitPlan {
    let mut plan = UnitPlan::default();

    for (field, column_match) in mapping.iter() {
        if field == CanonicalField::Cycle || field == CanonicalField::StepType {
            continue;
        }
        let column = column_match.column;

        if field == CanonicalField::Time {
            if let Some(basis) = text_time_basis(table, column) {
                plan.time_basis = basis;
                plan.units.insert(
                    field,
                    ColumnUnit {
                        unit: Unit::Seconds,
                        source: UnitSource::TextTime,
                    },
                );
                debug!(column = %column_match.header, basis = ?basis, "time column holds text values");
                continue;
            }
        }

        if let Some(declared) = declared_unit(table, column, field) {
            debug!(field = %field, unit = declared.unit.symbol(), source = ?declared.source, "declared unit");
            plan.units.insert(field, declared);
            continue;
        }

        let Some(stats) = column_stats(table, column) else {
            continue;
        };
        let unit = magnitude_unit(field, &stats);
        debug!(
            field = %field,
            unit = unit.symbol(),
            min = stats.min,
            max = stats.max,
            mean = stats.mean,
            "unit inferred from magnitude"
        );
        if unit.to_canonical(1.0) != 1.0 {
            warnings.push(format!(
                "assumed {} for column '{}' from value magnitudes; converted to {}",
                unit.symbol(),
                column_match.header,
                canonical_symbol(field)
            ));
        }
        plan.units.insert(
            field,
            ColumnUnit {
                unit,
                source: UnitSource::Magnitude,
            },
        );
    }

    plan
}

fn canonical_symbol(field: CanonicalField) -> &'static str {
    match field {
        f if f.is_capacity() => "mAh",
        f if f.is_energy() => "Wh",
        CanonicalField::Voltage => "V",
        CanonicalField::Current => "A",
        CanonicalField::Time => "s",
        CanonicalField::Temperature => "°C",
        _ => "",
    }
}

fn text_time_basis(table: &RawTable, column: usize) -> Option<TimeBasis> {
    let mut numeric = 0usize;
    let mut parsed = Vec::new();
    for value in table.column(column).filter(|value| !value.is_empty()) {
        if value.as_f64().is_some() {
            numeric += 1;
        } else if let Some(text) = value.as_text().and_then(parse_time_text) {
            parsed.push(text);
        }
    }
    if parsed.len() <= numeric {
        return None;
    }
    match parsed.iter().find_map(|text| match text {
        TimeText::Timestamp(ts) => Some(*ts),
        TimeText::Duration(_) => None,
    }) {
        Some(origin) => Some(TimeBasis::Timestamps { origin }),
        None => Some(TimeBasis::Durations),
    }
}

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%d.%m.%Y %H:%M:%S%.f",
];

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)(?:\s*d(?:ays?)?\s*|[\.\s-]))?(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)$")
        .expect("duration pattern is valid")
});

/// Parse a timestamp or an `[d ]HH:MM:SS[.f]` duration.
pub fn parse_time_text(raw: &str) -> Option<TimeText> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(caps) = DURATION.captures(text) {
        let days: f64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let hours: f64 = caps.get(2)?.as_str().parse().ok()?;
        let minutes: f64 = caps.get(3)?.as_str().parse().ok()?;
        let seconds: f64 = caps.get(4)?.as_str().parse().ok()?;
        return Some(TimeText::Duration(
            days * 86_400.0 + hours * 3600.0 + minutes * 60.0 + seconds,
        ));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(TimeText::Timestamp(ts.naive_utc()));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(TimeText::Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::map_columns;
    use cellscope_parser::{RawRecord, SourceFormat};

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            SourceFormat::Delimited { delimiter: ',' },
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| RawRecord::new(row.iter().map(|c| RawValue::from_cell(c)).collect()))
                .collect(),
        )
    }

    fn plan_for(table: &RawTable) -> (FieldMapping, UnitPlan, Vec<String>) {
        let mut warnings = Vec::new();
        let mapping = map_columns(table, &mut warnings);
        let plan = infer_units(table, &mapping, &mut warnings);
        (mapping, plan, warnings)
    }

    #[test]
    fn amp_hour_capacities_scale_to_milliamp_hours() {
        let rows: Vec<Vec<String>> = (0..=25)
            .map(|i| {
                let capacity = 0.5 + 0.1 * i as f64;
                vec!["1".into(), "3.7".into(), "-1.0".into(), format!("{capacity:.2}")]
            })
            .collect();
        let row_refs: Vec<Vec<&str>> = rows
            .iter()
            .map(|row| row.iter().map(String::as_str).collect())
            .collect();
        let slices: Vec<&[&str]> = row_refs.iter().map(Vec::as_slice).collect();
        let table = table(&["Cycle", "Voltage", "Current", "Capacity"], &slices);
        let (_, plan, _) = plan_for(&table);

        assert_eq!(
            plan.unit(CanonicalField::Capacity).map(|c| c.unit),
            Some(Unit::AmpHours)
        );
        for record in &table.rows {
            let raw = record.get(3).and_then(RawValue::as_f64).unwrap();
            let normalized = plan
                .normalize(CanonicalField::Capacity, record.get(3).unwrap())
                .unwrap();
            assert!((normalized - raw * 1000.0).abs() < 1e-9);
            assert!((500.0 - 1e-9..=3000.0 + 1e-9).contains(&normalized));
        }
    }

    #[test]
    fn overflowing_conversions_are_treated_as_missing() {
        let table = table(
            &["Cycle", "Voltage", "Current", "Capacity (Ah)"],
            &[&["1", "3.7", "-1.0", "1e306"], &["1", "3.6", "-1.0", "2.5"]],
        );
        let (_, plan, _) = plan_for(&table);

        assert_eq!(
            plan.unit(CanonicalField::Capacity).map(|c| c.unit),
            Some(Unit::AmpHours)
        );
        assert_eq!(
            plan.normalize(CanonicalField::Capacity, &RawValue::Number(1e306)),
            None
        );
        assert_eq!(
            plan.normalize(CanonicalField::Capacity, &RawValue::Number(2.5)),
            Some(2500.0)
        );
    }

    #[test]
    fn magnitude_rules_detect_milli_units() {
        let table = table(
            &["Cycle", "Voltage", "Current", "Capacity", "Test Time"],
            &[
                &["1", "4200", "-1500", "2500", "0"],
                &["1", "3000", "1500", "1000", "12000"],
            ],
        );
        let (_, plan, warnings) = plan_for(&table);

        let unit = |field| plan.unit(field).map(|c: &ColumnUnit| c.unit);
        assert_eq!(unit(CanonicalField::Voltage), Some(Unit::Millivolts));
        assert_eq!(unit(CanonicalField::Current), Some(Unit::Milliamps));
        assert_eq!(unit(CanonicalField::Capacity), Some(Unit::MilliampHours));
        assert_eq!(unit(CanonicalField::Time), Some(Unit::Seconds));
        assert_eq!(
            plan.normalize(CanonicalField::Voltage, &RawValue::Number(4200.0)),
            Some(4.2)
        );
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn small_time_values_read_as_minutes_or_hours() {
        let minutes = ColumnStats {
            min: 0.0,
            max: 600.0,
            mean: 300.0,
            mean_abs: 300.0,
            count: 2,
        };
        let hours = ColumnStats { max: 48.0, ..minutes };
        assert_eq!(magnitude_unit(CanonicalField::Time, &minutes), Unit::Minutes);
        assert_eq!(magnitude_unit(CanonicalField::Time, &hours), Unit::Hours);
    }

    #[test]
    fn declared_units_override_magnitude() {
        // 3.2 would pass as volts by magnitude; the header says millivolts.
        let table = table(
            &["Cycle", "Voltage(mV)", "Current(A)", "Capacity(mAh)"],
            &[&["1", "3.2", "-1.0", "5.0"]],
        );
        let (_, plan, warnings) = plan_for(&table);

        let voltage = plan.unit(CanonicalField::Voltage).unwrap();
        assert_eq!(voltage.unit, Unit::Millivolts);
        assert_eq!(voltage.source, UnitSource::Header);
        assert_eq!(
            plan.unit(CanonicalField::Capacity).map(|c| c.unit),
            Some(Unit::MilliampHours)
        );
        assert!(warnings.iter().all(|w| !w.contains("assumed")));
    }

    #[test]
    fn kelvin_temperatures_convert_to_celsius() {
        let table = table(
            &["Cycle", "Voltage", "Temperature"],
            &[&["1", "3.7", "298.15"], &["1", "3.6", "300.15"]],
        );
        let (_, plan, _) = plan_for(&table);
        let celsius = plan
            .normalize(CanonicalField::Temperature, &RawValue::Number(298.15))
            .unwrap();
        assert!((celsius - 25.0).abs() < 1e-9);
    }

    #[test]
    fn parses_timestamps_and_durations() {
        assert_eq!(
            parse_time_text("01:02:03.5"),
            Some(TimeText::Duration(3723.5))
        );
        assert_eq!(parse_time_text("1d 00:00:10"), Some(TimeText::Duration(86_410.0)));
        assert!(matches!(
            parse_time_text("2024-04-01 10:00:00"),
            Some(TimeText::Timestamp(_))
        ));
        assert!(matches!(
            parse_time_text("2024-04-01T10:00:00Z"),
            Some(TimeText::Timestamp(_))
        ));
        assert!(matches!(
            parse_time_text("04/01/2024 10:00:00"),
            Some(TimeText::Timestamp(_))
        ));
        assert_eq!(parse_time_text("charge"), None);
    }

    #[test]
    fn text_timestamps_are_seconds_from_first() {
        let table = table(
            &["Cycle", "Voltage", "Realtime"],
            &[
                &["1", "3.7", "2024-04-01 10:00:00"],
                &["1", "3.8", "2024-04-01 10:30:00"],
            ],
        );
        let (_, plan, _) = plan_for(&table);
        let seconds = plan.normalize(
            CanonicalField::Time,
            &RawValue::Text("2024-04-01 10:30:00".into()),
        );
        assert_eq!(seconds, Some(1800.0));
        assert_eq!(plan.describe().get("time_s").map(String::as_str), Some("text"));
    }

    #[test]
    fn parses_vendor_unit_tokens() {
        assert_eq!(Unit::parse("mA.h"), Some(Unit::MilliampHours));
        assert_eq!(Unit::parse("Amp-hr"), Some(Unit::AmpHours));
        assert_eq!(Unit::parse("°C"), Some(Unit::Celsius));
        assert_eq!(Unit::parse("secs"), Some(Unit::Seconds));
        assert_eq!(Unit::parse("%"), None);
    }
}
