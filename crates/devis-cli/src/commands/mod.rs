//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod process;

use std::path::{Path, PathBuf};

use tracing::debug;

use devis_core::form::{locate_template, AcroFormWriter, FormWriter};
use devis_core::{build_field_values, output_file_name, DevisConfig, DevisParser, ExtractionResult};

/// Directory name under the user config dir.
pub const APP_DIR: &str = "srx-bdc";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

/// Explicit config file, else the user config when it exists, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<DevisConfig> {
    if let Some(path) = config_path {
        return Ok(DevisConfig::from_file(Path::new(path))?);
    }
    let default_path = default_config_path();
    if default_path.is_file() {
        debug!("Using config {}", default_path.display());
        return Ok(DevisConfig::from_file(&default_path)?);
    }
    Ok(DevisConfig::default())
}

/// Parse a quote PDF, or a text file holding its already extracted lines.
pub fn parse_input(parser: &DevisParser, path: &Path) -> anyhow::Result<ExtractionResult> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "pdf" => Ok(parser.parse_pdf(path)?),
        "txt" => {
            let text = std::fs::read_to_string(path)?;
            let filename = path.file_name().and_then(|n| n.to_str());
            Ok(parser.parse_text(filename, &text)?)
        }
        _ => anyhow::bail!("Unsupported file format: {}", extension),
    }
}

/// Next to the executable, then under the user config dir.
fn template_search_dirs() -> Vec<PathBuf> {
    let mut search = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        search.push(exe_dir);
    }
    if let Some(config_dir) = dirs::config_dir() {
        search.push(config_dir.join(APP_DIR));
    }
    search
}

/// Fill the BDC template from an extraction result.
pub fn generate_purchase_order(
    result: &ExtractionResult,
    config: &DevisConfig,
    template: Option<&Path>,
    output_dir: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let explicit = template.or(config.form.template_path.as_deref());
    let template = locate_template(explicit, &template_search_dirs())?;

    let values = build_field_values(&result.record, &config.extraction.reference_prefix);
    let output_dir = output_dir.unwrap_or(config.form.output_dir.as_path());
    let output = output_dir.join(output_file_name(&result.record));

    Ok(AcroFormWriter::new().fill(&template, &values, &output)?)
}
