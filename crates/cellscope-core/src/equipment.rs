use std::fmt;

use cellscope_parser::RawTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Equipment {
    Maccor,
    Arbin,
    Neware,
    BioLogic,
    Basytec,
    Digatron,
    Bitrode,
    Land,
    #[serde(rename = "PEC")]
    Pec,
    Custom,
    Unknown,
}

impl Equipment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Equipment::Maccor => "Maccor",
            Equipment::Arbin => "Arbin",
            Equipment::Neware => "Neware",
            Equipment::BioLogic => "BioLogic",
            Equipment::Basytec => "Basytec",
            Equipment::Digatron => "Digatron",
            Equipment::Bitrode => "Bitrode",
            Equipment::Land => "Land",
            Equipment::Pec => "PEC",
            Equipment::Custom => "Custom",
            Equipment::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compile(table: &[(Equipment, &str)]) -> Vec<(Equipment, Regex)> {
    table
        .iter()
        .map(|(equipment, pattern)| {
            (
                *equipment,
                Regex::new(pattern).expect("equipment pattern is valid"),
            )
        })
        .collect()
}

static FILENAME_PATTERNS: Lazy<Vec<(Equipment, Regex)>> = Lazy::new(|| {
    compile(&[
        (Equipment::Maccor, r"(?i)maccor"),
        (Equipment::Arbin, r"(?i)arbin|\.res$"),
        (Equipment::Neware, r"(?i)neware|\.ndax?$"),
        (Equipment::BioLogic, r"(?i)bio-?logic|ec-?lab|\.mp[rt]$"),
        (Equipment::Basytec, r"(?i)basytec"),
        (Equipment::Digatron, r"(?i)digatron"),
        (Equipment::Bitrode, r"(?i)bitrode"),
        (Equipment::Land, r"(?i)lanhe|(?:^|[^a-z])land(?:[^a-z]|$)|\.cex$"),
        (Equipment::Pec, r"(?i)(?:^|[^a-z])pec(?:[^a-z]|$)"),
        (Equipment::Custom, r"(?i)custom"),
    ])
});

static CONTENT_PATTERNS: Lazy<Vec<(Equipment, Regex)>> = Lazy::new(|| {
    compile(&[
        (Equipment::Maccor, r"(?i)maccor|amp-hr|watt-hr|cyc#|rec#"),
        (Equipment::Arbin, r"(?i)arbin|data_point|cycle_index|step_index"),
        (Equipment::Neware, r"(?i)neware|cycle id|step id|bts\s?\d"),
        (Equipment::BioLogic, r"(?i)ec-lab|bio-?logic|ewe/v|<i>/ma|ox/red|nb header lines"),
        (Equipment::Basytec, r"(?i)basytec|~resultfile"),
        (Equipment::Digatron, r"(?i)digatron|ah-cyc|ah-step"),
        (Equipment::Bitrode, r"(?i)bitrode"),
        (Equipment::Land, r"(?i)lanhe|land battery|cbt-?\d"),
        (Equipment::Pec, r"(?i)\bpec\b|lifetest"),
    ])
});

/// Originating cycler, judged from the filename first and then from the
/// header and preamble text. First match in table order wins.
pub fn detect_equipment(filename: &str, table: Option<&RawTable>) -> Equipment {
    if let Some((equipment, _)) = FILENAME_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(filename))
    {
        return *equipment;
    }
    let Some(table) = table else {
        return Equipment::Unknown;
    };
    let text = table
        .preamble
        .iter()
        .chain(table.headers.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    CONTENT_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&text))
        .map_or(Equipment::Unknown, |(equipment, _)| *equipment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellscope_parser::SourceFormat;

    fn headers(names: &[&str]) -> RawTable {
        RawTable::new(
            SourceFormat::Delimited { delimiter: ',' },
            names.iter().map(|n| n.to_string()).collect(),
            Vec::new(),
        )
    }

    #[test]
    fn filename_wins() {
        assert_eq!(detect_equipment("Arbin_cell07.csv", None), Equipment::Arbin);
        assert_eq!(detect_equipment("MACCOR export.txt", None), Equipment::Maccor);
        assert_eq!(detect_equipment("cell03_C01.mpt", None), Equipment::BioLogic);
        assert_eq!(detect_equipment("land_run.csv", None), Equipment::Land);
        assert_eq!(detect_equipment("PEC-rack2.csv", None), Equipment::Pec);
        assert_eq!(detect_equipment("my_custom_rig.csv", None), Equipment::Custom);
        let table = headers(&["Cycle ID", "Voltage(V)"]);
        assert_eq!(detect_equipment("arbin.csv", Some(&table)), Equipment::Arbin);
    }

    #[test]
    fn word_boundaries_avoid_false_matches() {
        assert_eq!(detect_equipment("island_test.csv", None), Equipment::Unknown);
        assert_eq!(detect_equipment("spectra.csv", None), Equipment::Unknown);
    }

    #[test]
    fn falls_back_to_headers_and_preamble() {
        let neware = headers(&["Cycle ID", "Step ID", "Step Type", "Voltage(V)"]);
        assert_eq!(detect_equipment("cell_a1.tsv", Some(&neware)), Equipment::Neware);

        let arbin = headers(&["Data_Point", "Cycle_Index", "Voltage(V)"]);
        assert_eq!(detect_equipment("export.csv", Some(&arbin)), Equipment::Arbin);

        let mut maccor = headers(&["Rec#", "Cyc#", "Amp-hr", "Volts"]);
        maccor.preamble.push("Today's Date 04/15/2024".to_string());
        assert_eq!(detect_equipment("cell_12.txt", Some(&maccor)), Equipment::Maccor);

        let mut biologic = headers(&["mode", "time/s", "Ewe/V"]);
        biologic.preamble.push("EC-Lab ASCII FILE".to_string());
        assert_eq!(detect_equipment("run.txt", Some(&biologic)), Equipment::BioLogic);

        let plain = headers(&["Cycle", "Voltage", "Current", "Capacity"]);
        assert_eq!(detect_equipment("data.csv", Some(&plain)), Equipment::Unknown);
    }
}
