use std::io::{Cursor, Write};

use chrono::Utc;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{Column, DataFrame, NamedFrom, Series};
use serde_json::json;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::cycles::CycleRecord;
use crate::error::Result;
use crate::pipeline::AnalysisReport;

/// Per-cycle table with one column per `CycleRecord` field.
pub fn cycle_frame(records: &[CycleRecord]) -> Result<DataFrame> {
    let columns: Vec<Column> = vec![
        Series::new(
            "cycle".into(),
            records.iter().map(|r| r.cycle).collect::<Vec<u32>>(),
        )
        .into(),
        Series::new(
            "discharge_capacity_mah".into(),
            records.iter().map(|r| r.discharge_capacity).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new(
            "charge_capacity_mah".into(),
            records.iter().map(|r| r.charge_capacity).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new(
            "max_voltage_v".into(),
            records.iter().map(|r| r.max_voltage).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "min_voltage_v".into(),
            records.iter().map(|r| r.min_voltage).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "avg_voltage_v".into(),
            records.iter().map(|r| r.avg_voltage).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "coulombic_efficiency_pct".into(),
            records.iter().map(|r| r.coulombic_efficiency).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new(
            "timestamp_s".into(),
            records.iter().map(|r| r.timestamp).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "is_missing".into(),
            records.iter().map(|r| r.is_missing).collect::<Vec<bool>>(),
        )
        .into(),
        Series::new(
            "is_interpolated".into(),
            records.iter().map(|r| r.is_interpolated).collect::<Vec<bool>>(),
        )
        .into(),
        Series::new(
            "discharge_energy_wh".into(),
            records.iter().map(|r| r.discharge_energy).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "charge_energy_wh".into(),
            records.iter().map(|r| r.charge_energy).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "energy_efficiency_pct".into(),
            records.iter().map(|r| r.energy_efficiency).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "avg_temperature_c".into(),
            records.iter().map(|r| r.avg_temperature).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "max_temperature_c".into(),
            records.iter().map(|r| r.max_temperature).collect::<Vec<Option<f64>>>(),
        )
        .into(),
        Series::new(
            "sample_count".into(),
            records.iter().map(|r| r.sample_count as u64).collect::<Vec<u64>>(),
        )
        .into(),
    ];
    Ok(DataFrame::new(columns)?)
}

pub fn cycle_parquet_bytes(records: &[CycleRecord]) -> Result<Vec<u8>> {
    let mut frame = cycle_frame(records)?;
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut frame)?;
    }
    Ok(buffer)
}

/// Zip bundle of the full report, the cycle table and a short manifest.
pub fn export_archive(report: &AnalysisReport) -> Result<Vec<u8>> {
    let report_bytes = serde_json::to_vec_pretty(report)?;
    let parquet_bytes = cycle_parquet_bytes(&report.cycles)?;
    let manifest = json!({
        "generated_at": Utc::now().to_rfc3339(),
        "filename": report.metadata.filename,
        "file_hash": report.metadata.file_hash,
        "synthetic": report.metadata.synthetic,
        "cycles": report.cycles.len(),
    });
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut zip = ZipWriter::new(&mut cursor);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("manifest.json", options)?;
        zip.write_all(&manifest_bytes)?;

        zip.start_file("report.json", options)?;
        zip.write_all(&report_bytes)?;

        zip.start_file("cycles.parquet", options)?;
        zip.write_all(&parquet_bytes)?;

        zip.finish()?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::pipeline::{analyze_file, FileInput};
    use polars::prelude::{ParquetReader, SerReader};
    use std::io::Read;

    fn report() -> AnalysisReport {
        let csv = b"Cycle,Voltage,Current,Capacity\n1,4.2,-1.0,2500\n1,3.0,1.0,2400\n2,4.1,-1.0,2450\n2,3.0,1.0,2390\n3,4.1,-1.0,2400\n3,3.0,1.0,2380\n";
        analyze_file(
            FileInput {
                name: "cell.csv",
                contents: csv,
            },
            &AnalysisConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn frame_has_one_row_per_cycle() {
        let report = report();
        let frame = cycle_frame(&report.cycles).unwrap();
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.width(), 16);
        let capacities: Vec<Option<f64>> = frame
            .column("discharge_capacity_mah")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(capacities, vec![Some(2500.0), Some(2450.0), Some(2400.0)]);
    }

    #[test]
    fn parquet_round_trips_row_count() {
        let report = report();
        let bytes = cycle_parquet_bytes(&report.cycles).unwrap();
        let frame = ParquetReader::new(Cursor::new(bytes)).finish().unwrap();
        assert_eq!(frame.height(), 3);
    }

    #[test]
    fn archive_contains_report_and_cycles() {
        let report = report();
        let bytes = export_archive(&report).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["cycles.parquet", "manifest.json", "report.json"]);

        let mut body = String::new();
        archive
            .by_name("report.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["metadata"]["filename"], "cell.csv");
        assert_eq!(value["cycleAnalysis"]["cycles"].as_array().unwrap().len(), 3);
        assert!(value["health"]["sohHistory"].is_array());
    }
}
