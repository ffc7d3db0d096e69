//! Configuration structures for the quote extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::DevisError;

/// Main configuration for the devis pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevisConfig {
    /// Anchor extraction configuration.
    pub extraction: ExtractionConfig,

    /// PDF text source configuration.
    pub pdf: PdfConfig,

    /// LLM fallback configuration.
    pub llm: LlmConfig,

    /// OCR fallback configuration.
    pub ocr: OcrConfig,

    /// Purchase-order form configuration.
    pub form: FormConfig,
}

/// Anchor extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Three-letter prefix of quote references.
    pub reference_prefix: String,

    /// Additional issuer markers (regexes, case-insensitive).
    pub extra_contamination_markers: Vec<String>,

    /// Pose amounts that are only placeholders and do not mean "sold".
    pub pose_placeholder_amounts: Vec<String>,

    /// Maximum number of address lines after the client name.
    pub address_block_lines: usize,

    /// Lines scanned after `Code client` for phone and email.
    pub client_contact_window: usize,

    /// Lines scanned after `Contact commercial`.
    pub commercial_window: usize,

    /// Run fallback strategies when critical fields are missing.
    pub enable_fallbacks: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            reference_prefix: "SRX".to_string(),
            extra_contamination_markers: Vec::new(),
            pose_placeholder_amounts: vec!["1,00".to_string()],
            address_block_lines: 6,
            client_contact_window: 10,
            commercial_window: 6,
            enable_fallbacks: true,
        }
    }
}

/// PDF text source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Below this many characters of embedded text the document counts as scanned.
    pub min_text_length: usize,

    /// Maximum pages to read (0 = unlimited).
    pub max_pages: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            max_pages: 0,
        }
    }
}

/// OpenAI-compatible chat completion endpoint used as last-resort producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,

    /// Base URL, `/chat/completions` is appended.
    pub base_url: String,

    pub model: String,

    /// API key; when absent, read from `api_key_env`.
    pub api_key: Option<String>,

    pub api_key_env: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Document text is truncated to this many characters.
    pub max_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "DEVIS_LLM_API_KEY".to_string(),
            timeout_secs: 60,
            max_chars: 12_000,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from the config or the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// External OCR command configuration.
///
/// `{input}` in `args` is replaced with the PDF path (appended when absent).
/// The command must print plain text on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,

    pub command: String,

    pub args: Vec<String>,

    /// Kill the command after this many seconds.
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "ocrmypdf".to_string(),
            args: vec![
                "--force-ocr".to_string(),
                "-l".to_string(),
                "fra".to_string(),
                "--sidecar".to_string(),
                "/dev/stdout".to_string(),
                "{input}".to_string(),
                "/dev/null".to_string(),
            ],
            timeout_secs: 120,
        }
    }
}

/// Purchase-order template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// AcroForm template (BDC).
    pub template_path: Option<PathBuf>,

    /// Directory receiving generated purchase orders.
    pub output_dir: PathBuf,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            output_dir: PathBuf::from("."),
        }
    }
}

impl DevisConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| DevisError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| DevisError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
