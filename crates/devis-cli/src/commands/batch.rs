//! Batch processing command for multiple quotes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use devis_core::{DevisConfig, DevisParser, ExtractionResult};

use super::process::{format_result, OutputFormat};
use super::{generate_purchase_order, load_config, parse_input};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Output directory for extracted records
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Fill a purchase order for every successful quote
    #[arg(long)]
    bdc: bool,

    /// Purchase-order template
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of processing a single file.
struct ProcessResult {
    path: PathBuf,
    result: Option<ExtractionResult>,
    purchase_order: Option<PathBuf>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            matches!(ext.to_lowercase().as_str(), "pdf" | "txt")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    eprintln!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let parser = DevisParser::from_config(&config);
    let mut results = Vec::with_capacity(files.len());

    for path in files {
        let file_start = Instant::now();
        let outcome = process_single_file(&path, &parser, &args, &config);
        let processing_time_ms = file_start.elapsed().as_millis() as u64;

        match outcome {
            Ok((result, purchase_order)) => results.push(ProcessResult {
                path,
                result: Some(result),
                purchase_order,
                error: None,
                processing_time_ms,
            }),
            Err(e) => {
                let error_msg = e.to_string();
                if !args.continue_on_error {
                    overall_pb.abandon();
                    error!("Failed to process {}: {}", path.display(), error_msg);
                    anyhow::bail!("Processing failed: {}", error_msg);
                }
                warn!("Failed to process {}: {}", path.display(), error_msg);
                results.push(ProcessResult {
                    path,
                    result: None,
                    purchase_order: None,
                    error: Some(error_msg),
                    processing_time_ms,
                });
            }
        }

        overall_pb.inc(1);
    }

    overall_pb.finish_with_message("Complete");

    if let Some(output_dir) = &args.output_dir {
        for item in &results {
            let Some(result) = &item.result else {
                continue;
            };
            let output_name = item
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("devis");
            let output_path =
                output_dir.join(format!("{}.{}", output_name, args.format.extension()));
            fs::write(&output_path, format_result(result, args.format)?)?;
            debug!("Wrote output to {}", output_path.display());
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results, &config.extraction.reference_prefix)?;
        eprintln!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
    eprintln!();
    eprintln!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    eprintln!(
        "   {} successful, {} failed",
        style(results.len() - failed.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        eprintln!();
        eprintln!("{}", style("Failed files:").red());
        for item in &failed {
            eprintln!(
                "  - {}: {}",
                item.path.display(),
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn process_single_file(
    path: &Path,
    parser: &DevisParser,
    args: &BatchArgs,
    config: &DevisConfig,
) -> anyhow::Result<(ExtractionResult, Option<PathBuf>)> {
    let result = parse_input(parser, path)?;
    if !args.bdc {
        return Ok((result, None));
    }
    let written = generate_purchase_order(&result, config, args.template.as_deref(), None)?;
    Ok((result, Some(written)))
}

fn write_summary(path: &Path, results: &[ProcessResult], prefix: &str) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "reference",
        "client_nom",
        "commercial_nom",
        "fourniture_ht",
        "prestations_ht",
        "pose_sold",
        "purchase_order",
        "processing_time_ms",
        "warnings",
        "error",
    ])?;

    for item in results {
        let filename = item.path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let time = item.processing_time_ms.to_string();

        match &item.result {
            Some(result) => {
                let record = &result.record;
                let reference = record
                    .reference(prefix)
                    .map(|r| r.full())
                    .unwrap_or_default();
                let purchase_order = item
                    .purchase_order
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                wtr.write_record([
                    filename,
                    "success",
                    &reference,
                    &record.client_nom,
                    &record.commercial_nom,
                    &record.fourniture_ht,
                    &record.prestations_ht,
                    if record.pose_sold { "true" } else { "false" },
                    &purchase_order,
                    &time,
                    &record.parse_warning,
                    "",
                ])?;
            }
            None => {
                wtr.write_record([
                    filename,
                    "error",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    &time,
                    "",
                    item.error.as_deref().unwrap_or(""),
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
