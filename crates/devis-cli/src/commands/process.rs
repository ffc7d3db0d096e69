//! Process command - extract a single quote and optionally fill the BDC.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use devis_core::devis::rules::ReferenceDecoder;
use devis_core::{DevisParser, ExtractionResult, Field};

use super::{generate_purchase_order, load_config, parse_input};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input quote (PDF, or extracted text as .txt)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file for the extracted record (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Override a field, e.g. --set client_nom="SARL DUPONT" or --set reference=SRX2511AFF037501
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Fill the purchase-order template
    #[arg(long)]
    bdc: bool,

    /// Purchase-order template (default: config, then Templates/ lookup)
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Directory receiving the purchase order
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Only run the anchor rules
    #[arg(long)]
    no_fallbacks: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "txt",
        }
    }
}

pub fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    info!("Processing file: {}", args.input.display());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message("Extracting quote...");

    let parser = DevisParser::from_config(&config).with_fallbacks_enabled(
        config.extraction.enable_fallbacks && !args.no_fallbacks,
    );
    let mut result = match parse_input(&parser, &args.input) {
        Ok(result) => result,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };

    if let Err(e) = apply_overrides(
        &parser,
        &mut result,
        &args.overrides,
        &config.extraction.reference_prefix,
    ) {
        pb.finish_and_clear();
        return Err(e);
    }

    if args.bdc {
        pb.set_message("Filling purchase order...");
        let written = generate_purchase_order(
            &result,
            &config,
            args.template.as_deref(),
            args.output_dir.as_deref(),
        );
        pb.finish_and_clear();
        let path = written?;
        eprintln!(
            "{} Purchase order written to {}",
            style("✓").green(),
            path.display()
        );
    } else {
        pb.finish_and_clear();
    }

    for warning in &result.warnings {
        eprintln!("{} {}", style("⚠").yellow(), warning);
    }

    let output = format_result(&result, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total processing time: {:?}", start.elapsed());
    Ok(())
}

/// Apply `KEY=VALUE` overrides. `reference` sets the whole quote reference.
pub fn apply_overrides(
    parser: &DevisParser,
    result: &mut ExtractionResult,
    overrides: &[String],
    prefix: &str,
) -> anyhow::Result<()> {
    for item in overrides {
        let Some((key, value)) = item.split_once('=') else {
            anyhow::bail!("Invalid override '{}', expected KEY=VALUE", item);
        };
        let key = key.trim();
        let value = value.trim();

        if key == "reference" {
            let reference = ReferenceDecoder::with_prefix(prefix)
                .decode_str(value)
                .ok_or_else(|| anyhow::anyhow!("Invalid quote reference: {}", value))?;
            result.force_reference(&reference);
            continue;
        }

        let field = Field::from_key(key)
            .ok_or_else(|| anyhow::anyhow!("Unknown field: {}", key))?;
        if field.is_reference() {
            anyhow::bail!("Use --set reference=... to change {}", key);
        }
        if !parser.force(result, field, value) {
            anyhow::bail!("Refused value for {}: {:?}", key, value);
        }
    }
    Ok(())
}

pub fn format_result(result: &ExtractionResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => format_csv(result),
        OutputFormat::Text => Ok(format_text(result)),
    }
}

fn format_csv(result: &ExtractionResult) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header: Vec<&str> = Field::ALL.iter().map(|f| f.as_str()).collect();
    header.extend(["pose_sold", "parse_warning"]);
    wtr.write_record(&header)?;

    let record = &result.record;
    let mut row: Vec<String> = record.iter().map(|(_, v)| v.to_string()).collect();
    row.push(record.pose_sold.to_string());
    row.push(record.parse_warning.clone());
    wtr.write_record(&row)?;

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(result: &ExtractionResult) -> String {
    let record = &result.record;
    let mut output = String::new();

    let reference = format!(
        "{}{}{}",
        record.devis_annee_mois(),
        record.devis_type(),
        record.devis_num()
    );
    output.push_str(&format!("Devis: {}\n", reference));
    if !record.date_devis.is_empty() {
        output.push_str(&format!("Date: {}\n", record.date_devis));
    }
    if !record.ref_affaire.is_empty() {
        output.push_str(&format!("Réf affaire: {}\n", record.ref_affaire));
    }
    output.push('\n');

    output.push_str("Client:\n");
    output.push_str(&format!("  {}\n", record.client_nom));
    for line in [&record.client_adresse1, &record.client_adresse2] {
        if !line.is_empty() {
            output.push_str(&format!("  {}\n", line));
        }
    }
    output.push_str(&format!("  {} {}\n", record.client_cp, record.client_ville));
    output.push('\n');

    output.push_str(&format!("Commercial: {}\n", record.commercial_nom));
    output.push('\n');

    output.push_str("Montants HT:\n");
    output.push_str(&format!("  Fourniture:  {}\n", record.fourniture_ht));
    output.push_str(&format!("  Prestations: {}\n", record.prestations_ht));
    output.push_str(&format!("  Total:       {}\n", record.total_ht));
    output.push_str(&format!(
        "Pose vendue: {}\n",
        if record.pose_sold { "oui" } else { "non" }
    ));

    if !result.strategies_used.is_empty() {
        let used: Vec<String> = result.strategies_used.iter().map(|s| s.to_string()).collect();
        output.push_str(&format!("\nStrategies: {}\n", used.join(", ")));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTE: &str = "\
Devis n° SRX2511AFF037501
Code client : C0042
BERVAL MAISONS
77100 MAREUIL LES MEAUX
Contact commercial : Julien LEROY
PRIX DE LA FOURNITURE HT : 4 894,08";

    fn result() -> ExtractionResult {
        DevisParser::new()
            .with_fallbacks_enabled(false)
            .parse_text(None, QUOTE)
            .unwrap()
    }

    #[test]
    fn test_overrides() {
        let parser = DevisParser::new();
        let mut result = result();
        apply_overrides(
            &parser,
            &mut result,
            &[
                "ref_affaire = CHANTIER LILAS".to_string(),
                "reference=SRX2601CMD000123".to_string(),
            ],
            "SRX",
        )
        .unwrap();
        assert_eq!(result.record.ref_affaire, "CHANTIER LILAS");
        assert_eq!(result.record.devis_num(), "000123");

        let mut rejected = |item: &str| {
            apply_overrides(&parser, &mut result, &[item.to_string()], "SRX").is_err()
        };
        assert!(rejected("nope=1"));
        assert!(rejected("client_nom"));
        assert!(rejected("client_nom=RIAUX ESCALIERS"));
        assert!(rejected("client_nom="));
        assert!(rejected("client_tel=+33 2 99 97 45 40"));
    }

    #[test]
    fn test_amount_override_is_normalized() {
        let parser = DevisParser::new();
        let mut result = result();
        apply_overrides(&parser, &mut result, &["prestations_ht=1250".to_string()], "SRX")
            .unwrap();
        assert_eq!(result.record.prestations_ht, "1 250,00");
    }

    #[test]
    fn test_csv_has_header_and_row() {
        let csv = format_csv(&result()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("devis_annee_mois,devis_type,devis_num"));
        assert!(lines[1].starts_with("2511,AFF,037501"));
    }

    #[test]
    fn test_text_summary() {
        let text = format_text(&result());
        assert!(text.contains("Devis: 2511AFF037501"));
        assert!(text.contains("BERVAL MAISONS"));
        assert!(text.contains("Pose vendue: non"));
    }
}
