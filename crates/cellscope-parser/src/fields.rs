//! Canonical battery-cycler fields and the header-name patterns that identify
//! them. The same table drives header-row detection during ingestion and the
//! name half of the column mapper's score.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Cycle,
    StepType,
    Time,
    Voltage,
    Current,
    DischargeCapacity,
    ChargeCapacity,
    Capacity,
    DischargeEnergy,
    ChargeEnergy,
    Energy,
    Temperature,
}

/// Name patterns for one canonical field, matched against normalized headers.
#[derive(Debug)]
pub struct FieldPatterns {
    pub exact: &'static [&'static str],
    pub contains: &'static [&'static str],
    pub excludes: &'static [&'static str],
}

const EXACT_BASE: f64 = 50.0;
const CONTAINS_BASE: f64 = 30.0;
const MAX_POSITION_PENALTY: f64 = 8.0;

impl CanonicalField {
    /// Resolution order used by the mapper: specific fields claim their
    /// columns before the generic ones they overlap with.
    pub const ALL: [CanonicalField; 12] = [
        CanonicalField::Cycle,
        CanonicalField::StepType,
        CanonicalField::Time,
        CanonicalField::Voltage,
        CanonicalField::Current,
        CanonicalField::DischargeCapacity,
        CanonicalField::ChargeCapacity,
        CanonicalField::Capacity,
        CanonicalField::DischargeEnergy,
        CanonicalField::ChargeEnergy,
        CanonicalField::Energy,
        CanonicalField::Temperature,
    ];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            CanonicalField::Cycle => "cycle",
            CanonicalField::StepType => "step_type",
            CanonicalField::Time => "time_s",
            CanonicalField::Voltage => "voltage_v",
            CanonicalField::Current => "current_a",
            CanonicalField::DischargeCapacity => "discharge_capacity_mah",
            CanonicalField::ChargeCapacity => "charge_capacity_mah",
            CanonicalField::Capacity => "capacity_mah",
            CanonicalField::DischargeEnergy => "discharge_energy_wh",
            CanonicalField::ChargeEnergy => "charge_energy_wh",
            CanonicalField::Energy => "energy_wh",
            CanonicalField::Temperature => "temperature_c",
        }
    }

    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            CanonicalField::Capacity
                | CanonicalField::DischargeCapacity
                | CanonicalField::ChargeCapacity
        )
    }

    pub fn is_energy(&self) -> bool {
        matches!(
            self,
            CanonicalField::Energy | CanonicalField::DischargeEnergy | CanonicalField::ChargeEnergy
        )
    }

    pub fn patterns(&self) -> &'static FieldPatterns {
        match self {
            CanonicalField::Cycle => &FieldPatterns {
                exact: &[
                    "cycle",
                    "cycle index",
                    "cycle number",
                    "cycle no",
                    "cycle id",
                    "cyc",
                    "cycle count",
                    "cycle nr",
                    "loop counter",
                ],
                contains: &["cycle index", "cycle number", "cycle", "cyc"],
                excludes: &[
                    "time",
                    "capacity",
                    "energy",
                    "voltage",
                    "current",
                    "efficiency",
                    "life",
                ],
            },
            CanonicalField::StepType => &FieldPatterns {
                exact: &[
                    "step type",
                    "step name",
                    "step mode",
                    "mode",
                    "md",
                    "state",
                    "status",
                    "step status",
                    "procedure",
                    "type",
                ],
                contains: &["step type", "step name", "mode", "status", "state"],
                excludes: &["index", "time", "number"],
            },
            CanonicalField::Time => &FieldPatterns {
                exact: &[
                    "test time",
                    "total time",
                    "time",
                    "elapsed time",
                    "run time",
                    "prog time",
                    "program time",
                    "test time s",
                    "absolute time",
                    "timestamp",
                    "time stamp",
                    "date time",
                    "datetime",
                    "systime",
                    "step time",
                ],
                contains: &["test time", "total time", "elapsed", "run time", "time", "date"],
                excludes: &["per", "constant", "tau"],
            },
            CanonicalField::Voltage => &FieldPatterns {
                exact: &[
                    "voltage",
                    "volts",
                    "volt",
                    "v",
                    "cell voltage",
                    "ewe",
                    "ecell",
                    "potential",
                    "u",
                    "vcell",
                    "terminal voltage",
                ],
                contains: &["voltage", "volt", "potential", "ewe", "ecell"],
                excludes: &["time", "capacity", "energy", "control", "aux"],
            },
            CanonicalField::Current => &FieldPatterns {
                exact: &["current", "amps", "amp", "i", "curr", "cell current"],
                contains: &["current", "curr", "amps"],
                excludes: &["capacity", "hr", "hour", "energy", "time", "density", "control"],
            },
            CanonicalField::DischargeCapacity => &FieldPatterns {
                exact: &[
                    "discharge capacity",
                    "dchg capacity",
                    "discharge cap",
                    "dcap",
                    "q discharge",
                    "discharge ah",
                    "discharge amp hr",
                ],
                contains: &[
                    "discharge capacity",
                    "discharge cap",
                    "dchg cap",
                    "dischg cap",
                    "dis cap",
                    "discharge ah",
                    "q discharge",
                ],
                excludes: &["energy", "specific", "retention"],
            },
            CanonicalField::ChargeCapacity => &FieldPatterns {
                exact: &[
                    "charge capacity",
                    "chg capacity",
                    "charge cap",
                    "ccap",
                    "q charge",
                    "charge ah",
                ],
                contains: &["charge capacity", "charge cap", "chg cap", "charge ah"],
                excludes: &["discharge", "dchg", "dischg", "dis cap", "energy", "specific"],
            },
            CanonicalField::Capacity => &FieldPatterns {
                exact: &[
                    "capacity",
                    "cap",
                    "amp hr",
                    "ah",
                    "mah",
                    "q",
                    "q charge discharge",
                    "step capacity",
                ],
                contains: &["capacity", "amp hr", "amphr", "q charge"],
                excludes: &["energy", "retention", "fade", "specific"],
            },
            CanonicalField::DischargeEnergy => &FieldPatterns {
                exact: &["discharge energy", "dchg energy", "dischg energy"],
                contains: &["discharge energy", "dchg energy", "dischg energy", "dis energy"],
                excludes: &["specific", "density"],
            },
            CanonicalField::ChargeEnergy => &FieldPatterns {
                exact: &["charge energy", "chg energy"],
                contains: &["charge energy", "chg energy"],
                excludes: &["discharge", "dchg", "dischg", "specific", "density"],
            },
            CanonicalField::Energy => &FieldPatterns {
                exact: &["energy", "wh", "watt hr", "watt hour"],
                contains: &["energy", "watt hr", "watt hour"],
                excludes: &["specific", "density"],
            },
            CanonicalField::Temperature => &FieldPatterns {
                exact: &[
                    "temperature",
                    "temp",
                    "t",
                    "cell temperature",
                    "aux temperature",
                    "tc",
                ],
                contains: &["temperature", "temp", "degc"],
                excludes: &["time"],
            },
        }
    }

    /// Name half of the mapper score; `None` when the header does not match.
    pub fn name_score(&self, normalized_header: &str) -> Option<f64> {
        let patterns = self.patterns();
        if normalized_header.is_empty()
            || patterns
                .excludes
                .iter()
                .any(|excluded| normalized_header.contains(excluded))
        {
            return None;
        }
        if let Some(position) = patterns
            .exact
            .iter()
            .position(|pattern| *pattern == normalized_header)
        {
            return Some(EXACT_BASE - position_penalty(position));
        }
        patterns
            .contains
            .iter()
            .position(|pattern| normalized_header.contains(pattern))
            .map(|position| CONTAINS_BASE - position_penalty(position))
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

fn position_penalty(position: usize) -> f64 {
    (2.0 * position as f64).min(MAX_POSITION_PENALTY)
}

const UNIT_TOKENS: &str =
    r"m?a\.?h|m?ah|amp\s*-?\s*hr|m?v|volts?|m?a|amps?|m?w\.?h|k?wh|s|sec|secs|min|h|hr|hrs|°c|degc|c|k|%";

static TRAILING_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[]([^\)\]]*)[\)\]]\s*$").expect("trailing unit group pattern is valid"));

static SLASH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\s*/\s*({UNIT_TOKENS})\s*$")).expect("slash unit pattern is valid")
});

static UNDERSCORE_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[_\s](mah|ah|mv|ma|mwh|wh)$").expect("underscore unit pattern is valid")
});

static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_\-\.#:/<>]+").expect("separator pattern is valid"));

/// Lowercase a header, strip its unit suffix and collapse separators, so that
/// `Discharge_Capacity(Ah)`, `discharge-capacity [mAh]` and
/// `Discharge Capacity` compare equal.
pub fn normalize_header(raw: &str) -> String {
    let mut working = raw.trim().trim_start_matches('\u{feff}').to_lowercase();
    loop {
        let stripped = TRAILING_GROUP.replace(&working, "").into_owned();
        let stripped = SLASH_UNIT.replace(&stripped, "").into_owned();
        if stripped == working || stripped.trim().is_empty() {
            break;
        }
        working = stripped;
    }
    SEPARATORS.replace_all(&working, " ").trim().to_string()
}

/// Unit declared by a header, if any: the contents of a trailing `(...)` or
/// `[...]` group, a `/unit` suffix, a `_unit` suffix, or a unit-bearing name
/// such as Maccor's `Amp-hr`.
pub fn header_unit(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(caps) = TRAILING_GROUP.captures(trimmed) {
        let unit = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !unit.is_empty() {
            return Some(unit.to_lowercase());
        }
    }
    if let Some(caps) = SLASH_UNIT.captures(trimmed) {
        return caps.get(1).map(|m| m.as_str().to_lowercase());
    }
    if let Some(caps) = UNDERSCORE_UNIT.captures(trimmed) {
        return caps.get(1).map(|m| m.as_str().to_lowercase());
    }
    match normalize_header(trimmed).as_str() {
        "amp hr" | "amphr" => Some("ah".to_string()),
        "volts" => Some("v".to_string()),
        "amps" => Some("a".to_string()),
        "watt hr" => Some("wh".to_string()),
        _ => None,
    }
}

/// Whether a raw header token names any canonical field.
pub fn matches_any_field(raw: &str) -> bool {
    let normalized = normalize_header(raw);
    CanonicalField::ALL
        .iter()
        .any(|field| field.name_score(&normalized).is_some())
}
