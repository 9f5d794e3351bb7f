use std::collections::BTreeMap;
use std::path::Path;

use blake3::Hasher;
use cellscope_parser::{parse_source, RawTable, SourceFile};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::cycles::{aggregate_cycles, CycleRecord};
use crate::equipment::{detect_equipment, Equipment};
use crate::error::{AnalysisError, Result};
use crate::health::{assess_health, BatteryHealthSummary, SohPoint};
use crate::issues::{analyze_issues, Issue, IssueContext};
use crate::mapping::{map_columns, FieldMapping};
use crate::metrics::{compute_metrics, ComputedMetrics};
use crate::samples::build_samples;
use crate::synthetic::synthetic_table;
use crate::units::{infer_units, UnitPlan};

#[derive(Debug, Clone, Copy)]
pub struct FileInput<'a> {
    pub name: &'a str,
    pub contents: &'a [u8],
}

/// Column-oriented view of the cycle table for charting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleAnalysis {
    pub cycles: Vec<u32>,
    pub discharge_capacity: Vec<f64>,
    pub charge_capacity: Vec<f64>,
    pub coulombic_efficiency: Vec<f64>,
    pub avg_voltage: Vec<Option<f64>>,
    /// SoH per cycle; `None` for cycles without capacity data.
    pub soh: Vec<Option<f64>>,
}

impl CycleAnalysis {
    fn build(records: &[CycleRecord], history: &[SohPoint]) -> Self {
        let soh_by_cycle: BTreeMap<u32, f64> =
            history.iter().map(|point| (point.cycle, point.soh)).collect();
        Self {
            cycles: records.iter().map(|r| r.cycle).collect(),
            discharge_capacity: records.iter().map(|r| r.discharge_capacity).collect(),
            charge_capacity: records.iter().map(|r| r.charge_capacity).collect(),
            coulombic_efficiency: records.iter().map(|r| r.coulombic_efficiency).collect(),
            avg_voltage: records.iter().map(|r| r.avg_voltage).collect(),
            soh: records
                .iter()
                .map(|r| soh_by_cycle.get(&r.cycle).copied())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub equipment: Equipment,
    pub filename: String,
    pub total_cycles: usize,
    pub file_size: usize,
    pub data_points: usize,
    pub format: String,
    pub file_hash: String,
    pub header_row: Option<usize>,
    pub dropped_rows: usize,
    pub mapped_fields: BTreeMap<String, String>,
    pub detected_units: BTreeMap<String, String>,
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub cycle_analysis: CycleAnalysis,
    pub cycles: Vec<CycleRecord>,
    pub computed_metrics: ComputedMetrics,
    pub health: BatteryHealthSummary,
    pub issues: Vec<Issue>,
    pub warnings: Vec<String>,
    pub metadata: FileMetadata,
}

/// Format, equipment and column mapping of a file, without analytics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub filename: String,
    pub format: String,
    pub equipment: Equipment,
    pub header_row: Option<usize>,
    pub headers: Vec<String>,
    pub data_rows: usize,
    pub positional: bool,
    pub mapped_fields: BTreeMap<String, String>,
    pub detected_units: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

struct ProcessedTable {
    table: RawTable,
    mapping: FieldMapping,
    plan: UnitPlan,
    dropped_rows: usize,
    records: Vec<CycleRecord>,
}

fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    let hash = hasher.finalize();
    hash.to_hex().to_string()
}

fn process_table(table: RawTable, warnings: &mut Vec<String>) -> Result<ProcessedTable> {
    warnings.extend(table.warnings.iter().cloned());
    let mapping = map_columns(&table, warnings);
    let plan = infer_units(&table, &mapping, warnings);
    let set = build_samples(&table, &mapping, &plan, warnings);
    if set.samples.is_empty() {
        return Err(AnalysisError::NoUsableRows(format!(
            "all {} data row(s) were dropped",
            table.rows.len()
        )));
    }
    let records = aggregate_cycles(&set, &mapping, warnings)?;
    debug!(
        format = %table.format,
        mapped = mapping.len(),
        cycles = records.len(),
        "processed table"
    );
    Ok(ProcessedTable {
        table,
        mapping,
        plan,
        dropped_rows: set.dropped_rows,
        records,
    })
}

/// Run the full analysis on one file. Any parse or processing failure is
/// replaced by the synthetic dataset with a warning; only an unnamed input is
/// rejected.
pub fn analyze_file(input: FileInput<'_>, config: &AnalysisConfig) -> Result<AnalysisReport> {
    if input.name.trim().is_empty() {
        return Err(AnalysisError::InvalidInput(
            "file name must not be empty".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    let parsed = parse_source(&SourceFile::new(input.name, input.contents), &config.ingest);
    let equipment = detect_equipment(input.name, parsed.as_ref().ok());

    let attempt = parsed
        .map_err(AnalysisError::from)
        .and_then(|table| process_table(table, &mut warnings));
    let (processed, synthetic) = match attempt {
        Ok(processed) => (processed, false),
        Err(err) => {
            warn!(file = input.name, error = %err, "analysis failed; using synthetic dataset");
            warnings.push(format!(
                "could not analyze {}: {err}; results use a synthetic dataset",
                input.name
            ));
            (process_table(synthetic_table(), &mut warnings)?, true)
        }
    };

    let records = processed.records;
    let health = assess_health(&records, &config.health, &mut warnings);
    let computed_metrics = compute_metrics(&records, &health.soh_history, &config.health);
    let issues = analyze_issues(
        &IssueContext {
            health: &health,
            metrics: &computed_metrics,
        },
        &config.issues,
    );

    let metadata = FileMetadata {
        equipment,
        filename: input.name.to_string(),
        total_cycles: records.len(),
        file_size: input.contents.len(),
        data_points: processed.table.rows.len(),
        format: processed.table.format.as_str().to_string(),
        file_hash: compute_hash(input.contents),
        header_row: processed.table.header_row,
        dropped_rows: processed.dropped_rows,
        mapped_fields: processed.mapping.describe(),
        detected_units: processed.plan.describe(),
        synthetic,
    };

    info!(
        file = input.name,
        equipment = %equipment,
        format = %metadata.format,
        cycles = records.len(),
        soh = health.soh,
        rul = health.rul,
        issues = issues.len(),
        warnings = warnings.len(),
        synthetic,
        "analyzed file"
    );

    Ok(AnalysisReport {
        cycle_analysis: CycleAnalysis::build(&records, &health.soh_history),
        cycles: records,
        computed_metrics,
        health,
        issues,
        warnings,
        metadata,
    })
}

/// Read and analyze a file from disk. An unreadable path is an error rather
/// than a synthetic fallback.
pub fn analyze_path(path: &Path, config: &AnalysisConfig) -> Result<AnalysisReport> {
    let contents = std::fs::read(path).map_err(|source| AnalysisError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    analyze_file(
        FileInput {
            name: &name,
            contents: &contents,
        },
        config,
    )
}

/// Parse and map a file without aggregating it.
pub fn detect(input: FileInput<'_>, config: &AnalysisConfig) -> Result<DetectionReport> {
    let table = parse_source(&SourceFile::new(input.name, input.contents), &config.ingest)?;
    let mut warnings = table.warnings.clone();
    let mapping = map_columns(&table, &mut warnings);
    let plan = infer_units(&table, &mapping, &mut warnings);
    Ok(DetectionReport {
        filename: input.name.to_string(),
        format: table.format.as_str().to_string(),
        equipment: detect_equipment(input.name, Some(&table)),
        header_row: table.header_row,
        headers: table.headers.clone(),
        data_rows: table.rows.len(),
        positional: mapping.is_positional(),
        mapped_fields: mapping.describe(),
        detected_units: plan.describe(),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Chemistry, Grade, HealthStatus};
    use crate::issues::{IssueCategory, Severity};
    use crate::synthetic::SYNTHETIC_CYCLES;
    use std::path::PathBuf;

    fn fixture(name: &str) -> Vec<u8> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../cellscope-parser/tests/data")
            .join(name);
        std::fs::read(&path)
            .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", path.display(), err))
    }

    fn analyze(name: &str, contents: &[u8]) -> AnalysisReport {
        analyze_file(FileInput { name, contents }, &AnalysisConfig::default())
            .unwrap_or_else(|err| panic!("{name} failed: {err}"))
    }

    #[test]
    fn end_to_end_csv() {
        let csv = b"Cycle,Voltage,Current,Capacity\n1,4.2,-1.0,2500\n1,3.0,1.0,1000\n2,4.1,-1.0,2450\n2,3.0,1.0,980\n";
        let report = analyze("cell.csv", csv);

        assert!(!report.metadata.synthetic);
        assert_eq!(report.cycles.len(), 2);
        assert_eq!(report.cycles[0].discharge_capacity, 2500.0);
        assert_eq!(report.cycles[0].charge_capacity, 1000.0);
        assert_eq!(report.cycles[0].coulombic_efficiency, 250.0);
        assert_eq!(report.cycles[1].discharge_capacity, 2450.0);
        assert_eq!(report.health.soh_history[1].soh, 98.0);
        assert_eq!(report.health.soh, 98.0);
        assert_eq!(report.health.rul, 500);
        assert_eq!(report.cycle_analysis.soh, vec![Some(100.0), Some(98.0)]);
        assert_eq!(report.metadata.format, "csv");
        assert_eq!(report.metadata.header_row, Some(1));
        assert_eq!(report.metadata.mapped_fields["capacity_mah"], "Capacity");
        assert_eq!(report.metadata.file_hash.len(), 64);
    }

    #[test]
    fn arbin_export_uses_dedicated_columns() {
        let report = analyze("arbin_cell07.csv", &fixture("arbin_cell07.csv"));

        assert_eq!(report.metadata.equipment, Equipment::Arbin);
        assert_eq!(report.cycles.len(), 3);
        assert!((report.cycles[0].discharge_capacity - 2450.0).abs() < 1e-6);
        assert!((report.cycles[0].charge_capacity - 2500.0).abs() < 1e-6);
        assert!((report.cycles[2].discharge_capacity - 2400.0).abs() < 1e-6);
        assert_eq!(report.cycles[0].max_temperature, Some(28.1));
        assert!(report.cycles[0].energy_efficiency.is_some());
        assert_eq!(report.health.chemistry, Chemistry::Nmc);
        assert_eq!(report.metadata.detected_units["discharge_capacity_mah"], "Ah");
    }

    #[test]
    fn maccor_export_detects_lfp() {
        let report = analyze("maccor_cell12.txt", &fixture("maccor_cell12.txt"));

        assert_eq!(report.metadata.equipment, Equipment::Maccor);
        assert_eq!(report.metadata.header_row, Some(5));
        assert_eq!(report.cycles.len(), 3);
        assert!((report.cycles[0].discharge_capacity - 1470.0).abs() < 1e-6);
        assert!((report.cycles[0].charge_capacity - 1480.0).abs() < 1e-6);
        assert_eq!(report.health.chemistry, Chemistry::Lfp);
    }

    #[test]
    fn neware_steps_with_milliamps_and_timestamps() {
        let report = analyze("cell_a1_steps.tsv", &fixture("cell_a1_steps.tsv"));

        assert_eq!(report.metadata.equipment, Equipment::Neware);
        assert_eq!(report.cycles[0].discharge_capacity, 980.0);
        assert_eq!(report.cycles[0].charge_capacity, 1000.0);
        assert_eq!(report.cycles[1].discharge_capacity, 970.0);
        assert_eq!(report.cycles[0].timestamp, Some(8400.0));
        assert_eq!(report.metadata.detected_units["current_a"], "mA");
    }

    #[test]
    fn biologic_signed_capacity_counter() {
        let report = analyze("biologic_cell03.mpt", &fixture("biologic_cell03.mpt"));

        assert_eq!(report.metadata.equipment, Equipment::BioLogic);
        assert_eq!(report.cycles.len(), 2);
        assert!((report.cycles[0].discharge_capacity - 1150.0).abs() < 1e-6);
        assert!((report.cycles[0].charge_capacity - 1200.0).abs() < 1e-6);
    }

    #[test]
    fn structured_formats_analyze() {
        let json = analyze("cycles.json", &fixture("cycles.json"));
        assert_eq!(json.metadata.format, "json");
        assert!((json.cycles[0].discharge_capacity - 2050.0).abs() < 1e-6);

        let xml = analyze("records.xml", &fixture("records.xml"));
        assert_eq!(xml.metadata.format, "xml");
        assert_eq!(xml.cycles[1].discharge_capacity, 2430.0);

        let workbook = analyze("workbook.xml", &fixture("workbook.xml"));
        assert_eq!(workbook.metadata.format, "spreadsheet_xml");
        assert_eq!(workbook.cycles[0].discharge_capacity, 2450.0);
    }

    #[test]
    fn headerless_file_maps_by_position() {
        let report = analyze("headerless.csv", &fixture("headerless.csv"));

        assert!(!report.metadata.synthetic);
        assert_eq!(report.cycles.len(), 3);
        assert!((report.cycles[0].discharge_capacity - 2500.0).abs() < 1e-6);
        assert!(report.warnings.iter().any(|w| w.contains("by position")));
    }

    #[test]
    fn soh_stays_in_range_for_extreme_magnitudes() {
        for header in ["Capacity", "Capacity (Ah)", "Capacity (mAh)"] {
            for magnitude in [1e-300, 1e-3, 1.0, 1e150, 1e300, 1e306, 1.5e308] {
                let mut csv = format!("Cycle,Voltage,Current,{header}\n");
                for cycle in 1..=5 {
                    let rising = magnitude * (1.0 + 0.1 * f64::from(cycle));
                    csv.push_str(&format!("{cycle},3.7,-1.0,{rising:e}\n"));
                }
                let report = analyze("extreme.csv", csv.as_bytes());
                let health = &report.health;
                assert!(
                    (0.0..=100.0).contains(&health.soh),
                    "{header} x {magnitude:e}: soh {}",
                    health.soh
                );
                assert!(health
                    .soh_history
                    .iter()
                    .all(|point| (0.0..=100.0).contains(&point.soh)));
            }
        }

        let headerless = "1,3.7,-1.0,1e306\n".repeat(5);
        let report = analyze("headerless.csv", headerless.as_bytes());
        assert!((0.0..=100.0).contains(&report.health.soh), "soh {}", report.health.soh);
    }

    #[test]
    fn garbage_falls_back_to_synthetic() {
        let noise: Vec<u8> = (0u8..=255).cycle().take(2048).collect();
        for contents in [&b""[..], &noise[..]] {
            let report = analyze("mystery.bin", contents);
            assert!(report.metadata.synthetic);
            assert_eq!(report.metadata.format, "synthetic");
            assert_eq!(report.cycles.len(), SYNTHETIC_CYCLES as usize);
            assert!(report
                .warnings
                .iter()
                .any(|w| w.contains("synthetic dataset")));
        }
    }

    #[test]
    fn synthetic_fallback_still_reports_equipment_from_filename() {
        let report = analyze("maccor_broken.txt", b"\x00\x01\x02\x03\x04\x05");
        assert!(report.metadata.synthetic);
        assert_eq!(report.metadata.equipment, Equipment::Maccor);
    }

    #[test]
    fn analysis_is_deterministic() {
        let contents = fixture("arbin_cell07.csv");
        let first = analyze("arbin_cell07.csv", &contents);
        let second = analyze("arbin_cell07.csv", &contents);
        assert_eq!(first, second);
    }

    #[test]
    fn health_values_stay_in_range() {
        for name in [
            "arbin_cell07.csv",
            "maccor_cell12.txt",
            "cell_a1_steps.tsv",
            "biologic_cell03.mpt",
            "cycles.json",
            "records.xml",
            "workbook.xml",
            "headerless.csv",
        ] {
            let report = analyze(name, &fixture(name));
            assert!((0.0..=100.0).contains(&report.health.soh), "{name}");
            for point in &report.health.soh_history {
                assert!((0.0..=100.0).contains(&point.soh), "{name}");
            }
            let cycles: Vec<u32> = report.cycles.iter().map(|c| c.cycle).collect();
            assert!(cycles.windows(2).all(|pair| pair[0] < pair[1]), "{name}");
        }
    }

    #[test]
    fn low_soh_raises_performance_issue() {
        let csv = b"Cycle,Voltage,Current,Capacity\n\
            1,4.2,-1.0,2500\n1,3.0,1.0,2500\n\
            2,4.2,-1.0,2100\n2,3.0,1.0,2100\n\
            3,4.2,-1.0,1750\n3,3.0,1.0,1750\n";
        let report = analyze("aged.csv", csv);

        assert!((report.health.soh - 70.0).abs() < 1e-9);
        assert_eq!(report.health.grade, Grade::D);
        assert_eq!(report.health.status, HealthStatus::Critical);
        let critical: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::Performance && i.severity == Severity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        let has_rul_issue = report.issues.iter().any(|i| i.id == "rul-low");
        assert_eq!(has_rul_issue, report.health.rul < 100);
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let missing = Path::new("/definitely/not/here/cell.csv");
        let err = analyze_path(missing, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Unreadable { .. }));
    }

    #[test]
    fn empty_name_is_invalid() {
        let err = analyze_file(
            FileInput {
                name: " ",
                contents: b"a,b\n1,2\n",
            },
            &AnalysisConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn analyze_path_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.csv");
        std::fs::write(&path, fixture("arbin_cell07.csv")).unwrap();
        let report = analyze_path(&path, &AnalysisConfig::default()).unwrap();
        assert_eq!(report.metadata.filename, "cell.csv");
        assert_eq!(report.cycles.len(), 3);
    }

    #[test]
    fn detect_reports_mapping_without_analysis() {
        let contents = fixture("maccor_cell12.txt");
        let report = detect(
            FileInput {
                name: "maccor_cell12.txt",
                contents: &contents,
            },
            &AnalysisConfig::default(),
        )
        .unwrap();
        assert_eq!(report.format, "tsv");
        assert_eq!(report.equipment, Equipment::Maccor);
        assert_eq!(report.mapped_fields["cycle"], "Cyc#");
        assert_eq!(report.mapped_fields["voltage_v"], "Volts");
        assert_eq!(report.detected_units["capacity_mah"], "Ah");
    }
}
