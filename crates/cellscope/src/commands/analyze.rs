use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cellscope_core::outputs::{cycle_parquet_bytes, export_archive};
use cellscope_core::{analyze_file, AnalysisConfig, AnalysisReport, FileInput};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use futures::future::join_all;
use tracing::{info, warn};

use super::display_name;

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Cycler exports to analyze.
    files: Vec<PathBuf>,
    /// Also analyze every file below this directory.
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// Print the full reports as a JSON array instead of the summary table.
    #[arg(long)]
    json: bool,
    /// Write `<stem>.cycles.parquet` for each analyzed file.
    #[arg(long)]
    parquet_dir: Option<PathBuf>,
    /// Write a `<stem>.cellscope.zip` bundle for each analyzed file.
    #[arg(long)]
    archive_dir: Option<PathBuf>,
}

type Encoder = fn(&AnalysisReport) -> cellscope_core::Result<Vec<u8>>;

pub async fn handle_analyze_command(args: AnalyzeArgs, config: AnalysisConfig) -> Result<()> {
    let paths = collect_paths(&args)?;
    if paths.is_empty() {
        bail!("no input files; pass FILES or --dir");
    }

    let config = Arc::new(config);
    let tasks = paths.into_iter().map(|path| {
        let config = Arc::clone(&config);
        async move {
            let result = analyze_one(&path, config).await;
            (path, result)
        }
    });

    let mut reports = Vec::new();
    let mut failures = 0usize;
    for (path, result) in join_all(tasks).await {
        match result {
            Ok(report) => reports.push((path, report)),
            Err(err) => {
                eprintln!("WARNING: skipping {}: {err:#}", path.display());
                failures += 1;
            }
        }
    }

    if let Some(dir) = &args.parquet_dir {
        write_outputs(dir, "cycles.parquet", &reports, |report| {
            cycle_parquet_bytes(&report.cycles)
        })
        .await?;
    }
    if let Some(dir) = &args.archive_dir {
        write_outputs(dir, "cellscope.zip", &reports, export_archive).await?;
    }

    if args.json {
        let body: Vec<&AnalysisReport> = reports.iter().map(|(_, report)| report).collect();
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_summary(&reports);
    }

    info!(analyzed = reports.len(), failed = failures, "analysis finished");
    if failures > 0 {
        bail!("{failures} file(s) could not be analyzed");
    }
    Ok(())
}

fn collect_paths(args: &AnalyzeArgs) -> Result<Vec<PathBuf>> {
    let mut paths = args.files.clone();
    if let Some(dir) = &args.dir {
        let pattern = dir.join("**/*");
        let pattern = pattern
            .to_str()
            .with_context(|| format!("directory {} is not valid UTF-8", dir.display()))?;
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "could not read path from glob pattern"),
            }
        }
    }
    let mut seen = HashSet::new();
    paths.retain(|path| seen.insert(path.clone()));
    Ok(paths)
}

async fn analyze_one(path: &Path, config: Arc<AnalysisConfig>) -> Result<AnalysisReport> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = display_name(path);
    let report = tokio::task::spawn_blocking(move || {
        analyze_file(
            FileInput {
                name: &name,
                contents: &contents,
            },
            &config,
        )
    })
    .await
    .context("analysis task failed")??;
    Ok(report)
}

async fn write_outputs(
    dir: &Path,
    suffix: &str,
    reports: &[(PathBuf, AnalysisReport)],
    encode: Encoder,
) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for (path, report) in reports {
        let bytes =
            encode(report).with_context(|| format!("failed to encode {}", path.display()))?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| report.metadata.filename.clone());
        let target = dir.join(format!("{stem}.{suffix}"));
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        info!(path = %target.display(), "wrote output");
    }
    Ok(())
}

fn print_summary(reports: &[(PathBuf, AnalysisReport)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "File", "Equipment", "Format", "Cycles", "SoH %", "RUL", "Grade", "Status",
            "Chemistry", "Fade %", "Issues",
        ]);
    for (_, report) in reports {
        let metadata = &report.metadata;
        let health = &report.health;
        let filename = if metadata.synthetic {
            format!("{} (synthetic)", metadata.filename)
        } else {
            metadata.filename.clone()
        };
        table.add_row(vec![
            filename,
            metadata.equipment.to_string(),
            metadata.format.clone(),
            metadata.total_cycles.to_string(),
            format!("{:.1}", health.soh),
            health.rul.to_string(),
            format!("{:?}", health.grade),
            format!("{:?}", health.status),
            health.chemistry.to_string(),
            format!("{:.2}", report.computed_metrics.capacity_fade),
            report.issues.len().to_string(),
        ]);
    }
    println!("{table}");

    for (_, report) in reports {
        if report.issues.is_empty() && report.warnings.is_empty() {
            continue;
        }
        println!("\n{}", report.metadata.filename);
        for issue in &report.issues {
            println!("  [{:?}] {}: {}", issue.severity, issue.title, issue.description);
        }
        for warning in &report.warnings {
            println!("  warning: {warning}");
        }
    }
}
