//! OCR fallback through an external command.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::devis::lines::LineSequence;
use crate::devis::strategy::{
    AnchorPipeline, ExtractionStrategy, SourceDocument, StrategyKind, StrategyOutput,
};
use crate::error::ProducerError;
use crate::models::config::OcrConfig;
use crate::models::devis::{DevisRecord, Provenance};

const INPUT_PLACEHOLDER: &str = "{input}";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Turns a PDF file into plain text.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, pdf_path: &Path) -> Result<String, ProducerError>;
}

/// OCR engine running a configured command that prints text on stdout.
#[derive(Debug, Clone)]
pub struct CommandOcrEngine {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOcrEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    /// Arguments with `{input}` expanded; the path is appended when absent.
    fn build_args(&self, pdf_path: &Path) -> Vec<String> {
        let input = pdf_path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &input))
            .collect();
        if !self.args.iter().any(|arg| arg.contains(INPUT_PLACEHOLDER)) {
            args.push(input.into_owned());
        }
        args
    }
}

impl OcrEngine for CommandOcrEngine {
    fn name(&self) -> &str {
        &self.command
    }

    fn recognize(&self, pdf_path: &Path) -> Result<String, ProducerError> {
        let args = self.build_args(pdf_path);
        debug!("Running {} {:?}", self.command, args);

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProducerError::Call(format!("failed to run {}: {}", self.command, e)))?;

        // Drain the pipes while waiting so a verbose command cannot block.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!("{} killed after {:?}", self.command, self.timeout);
                    return Err(ProducerError::Timeout(self.timeout.as_secs()));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(ProducerError::Call(e.to_string())),
            }
        };

        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        if !status.success() {
            return Err(ProducerError::Call(format!(
                "{} failed (exit code {:?}): {}",
                self.command,
                status.code(),
                stderr.lines().take(5).collect::<Vec<_>>().join("\n")
            )));
        }

        Ok(stdout)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Re-runs the anchor rules over OCR text.
pub struct OcrStrategy {
    engine: Box<dyn OcrEngine>,
    pipeline: AnchorPipeline,
}

impl OcrStrategy {
    pub fn new(engine: Box<dyn OcrEngine>, pipeline: AnchorPipeline) -> Self {
        Self { engine, pipeline }
    }

    pub fn from_config(config: &OcrConfig, pipeline: AnchorPipeline) -> Self {
        Self::new(Box::new(CommandOcrEngine::from_config(config)), pipeline)
    }

    fn recognize_source(&self, source: &SourceDocument) -> Result<String, ProducerError> {
        if let Some(path) = &source.path {
            return self.engine.recognize(path);
        }
        let Some(bytes) = &source.pdf_bytes else {
            return Err(ProducerError::NotApplicable("no PDF to recognize".to_string()));
        };

        let temp = write_temp_pdf(bytes)?;
        self.engine.recognize(temp.path())
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OcrFallback
    }

    fn provenance(&self) -> Provenance {
        Provenance::Ocr
    }

    fn extract(
        &self,
        source: &SourceDocument,
        _hint: &DevisRecord,
    ) -> Result<StrategyOutput, ProducerError> {
        let start = Instant::now();
        let text = self.recognize_source(source)?;
        let lines = LineSequence::from_pages(&[text]);
        if !lines.has_letters() {
            return Err(ProducerError::InvalidResponse(format!(
                "{} returned no text",
                self.engine.name()
            )));
        }

        info!(
            "OCR by {} produced {} lines in {}ms",
            self.engine.name(),
            lines.len(),
            start.elapsed().as_millis()
        );
        Ok(self.pipeline.run(source.filename.as_deref(), &lines))
    }
}

/// PDF bytes in a uniquely named temp file, removed when dropped.
fn write_temp_pdf(bytes: &[u8]) -> Result<NamedTempFile, ProducerError> {
    let mut file = tempfile::Builder::new()
        .prefix("devis-ocr-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ProducerError::Call(format!("cannot create temp PDF: {}", e)))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ProducerError::Call(format!("cannot write temp PDF: {}", e)))?;
    debug!("PDF bytes written to {}", file.path().display());
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::devis::Field;
    use pretty_assertions::{assert_eq, assert_ne};

    struct StubEngine(&'static str);

    impl OcrEngine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }

        fn recognize(&self, pdf_path: &Path) -> Result<String, ProducerError> {
            assert!(pdf_path.exists());
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_build_args_placeholder() {
        let engine = CommandOcrEngine::new(
            "ocr",
            vec!["--in".to_string(), "{input}".to_string(), "-".to_string()],
            Duration::from_secs(1),
        );
        assert_eq!(
            engine.build_args(Path::new("/tmp/a.pdf")),
            vec!["--in", "/tmp/a.pdf", "-"]
        );

        let engine = CommandOcrEngine::new("ocr", vec!["-q".to_string()], Duration::from_secs(1));
        assert_eq!(engine.build_args(Path::new("a.pdf")), vec!["-q", "a.pdf"]);
    }

    #[test]
    fn test_strategy_uses_temp_file_for_bytes() {
        let strategy = OcrStrategy::new(
            Box::new(StubEngine(
                "Code client\nDUPONT\nPRIX DE LA FOURNITURE HT : 980,00",
            )),
            AnchorPipeline::default(),
        );
        let source = SourceDocument {
            pdf_bytes: Some(b"%PDF-1.5".to_vec()),
            ..SourceDocument::default()
        };
        let out = strategy.extract(&source, &DevisRecord::new()).unwrap();
        assert_eq!(out.record.get(Field::ClientNom), "DUPONT");
        assert_eq!(out.record.fourniture_ht, "980,00");
    }

    #[test]
    fn test_temp_pdfs_are_distinct_and_removed() {
        let first = write_temp_pdf(b"%PDF-1.5 a").unwrap();
        let second = write_temp_pdf(b"%PDF-1.5 b").unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(first.path().extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(std::fs::read(first.path()).unwrap(), b"%PDF-1.5 a");

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn test_parallel_ocr_runs_keep_their_files() {
        let strategy = std::sync::Arc::new(OcrStrategy::new(
            Box::new(StubEngine("Code client\nDUPONT")),
            AnchorPipeline::default(),
        ));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let strategy = strategy.clone();
                thread::spawn(move || {
                    let source = SourceDocument {
                        pdf_bytes: Some(format!("%PDF-1.5 {i}").into_bytes()),
                        ..SourceDocument::default()
                    };
                    strategy.extract(&source, &DevisRecord::new()).map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[test]
    fn test_strategy_without_pdf() {
        let strategy = OcrStrategy::new(Box::new(StubEngine("")), AnchorPipeline::default());
        let err = strategy
            .extract(&SourceDocument::from_text(None, "x"), &DevisRecord::new())
            .unwrap_err();
        assert!(matches!(err, ProducerError::NotApplicable(_)));
    }

    #[test]
    fn test_empty_ocr_output_is_invalid() {
        let strategy = OcrStrategy::new(Box::new(StubEngine("  \n")), AnchorPipeline::default());
        let source = SourceDocument {
            pdf_bytes: Some(b"%PDF-1.5".to_vec()),
            ..SourceDocument::default()
        };
        let err = strategy.extract(&source, &DevisRecord::new()).unwrap_err();
        assert!(matches!(err, ProducerError::InvalidResponse(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_reads_stdout() {
        let engine = CommandOcrEngine::new(
            "sh",
            vec!["-c".to_string(), "echo Code client".to_string(), "{input}".to_string()],
            Duration::from_secs(5),
        );
        let text = engine.recognize(Path::new("unused.pdf")).unwrap();
        assert_eq!(text.trim(), "Code client");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_timeout() {
        let engine = CommandOcrEngine::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string(), "{input}".to_string()],
            Duration::from_millis(200),
        );
        let err = engine.recognize(Path::new("unused.pdf")).unwrap_err();
        assert!(matches!(err, ProducerError::Timeout(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_failure() {
        let engine = CommandOcrEngine::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string(), "{input}".to_string()],
            Duration::from_secs(5),
        );
        let err = engine.recognize(Path::new("unused.pdf")).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
