use std::path::PathBuf;

use anyhow::{Context, Result};
use cellscope_core::{detect, AnalysisConfig, FileInput};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;

use super::display_name;

#[derive(clap::Args, Debug)]
pub struct DetectArgs {
    /// Cycler export to inspect.
    file: PathBuf,
    /// Print the detection report as JSON.
    #[arg(long)]
    json: bool,
}

pub async fn handle_detect_command(args: DetectArgs, config: &AnalysisConfig) -> Result<()> {
    let contents = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let name = display_name(&args.file);
    let report = detect(
        FileInput {
            name: &name,
            contents: &contents,
        },
        config,
    )
    .with_context(|| format!("could not detect the layout of {}", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File:      {}", report.filename);
    println!("Format:    {}", report.format);
    println!("Equipment: {}", report.equipment);
    match report.header_row {
        Some(line) => println!("Header:    line {line}"),
        None => println!("Header:    none"),
    }
    println!("Rows:      {}", report.data_rows);
    if report.positional {
        println!("Mapping:   positional fallback");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Field", "Column", "Unit"]);
    for (field, column) in &report.mapped_fields {
        let unit = report
            .detected_units
            .get(field)
            .cloned()
            .unwrap_or_default();
        table.add_row(vec![field.clone(), column.clone(), unit]);
    }
    println!("{table}");

    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}
