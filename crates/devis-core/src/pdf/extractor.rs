//! PDF text extraction using lopdf and pdf-extract.

use lopdf::{Document, Object};
use tracing::{debug, trace};

use super::{PdfProcessor, PdfType, Result};
use crate::error::PdfError;
use crate::models::config::PdfConfig;
use crate::producers::geometry::{collect_text_boxes, TextBox};

/// PDF content extractor using lopdf.
pub struct PdfExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
    config: PdfConfig,
}

/// Extracted content from a PDF.
#[derive(Debug, Clone)]
pub struct PdfContent {
    /// Type of PDF content.
    pub pdf_type: PdfType,
    /// Pages with their content.
    pub pages: Vec<PdfPage>,
    /// Positioned text runs of every page.
    pub boxes: Vec<TextBox>,
}

impl PdfContent {
    /// Page texts, in order.
    pub fn page_texts(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.text.clone()).collect()
    }
}

/// Content from a single PDF page.
#[derive(Debug, Clone)]
pub struct PdfPage {
    /// Page number (1-indexed).
    pub number: u32,
    /// Extracted text from this page.
    pub text: String,
}

impl PdfExtractor {
    /// Create a new PDF extractor.
    pub fn new() -> Self {
        Self {
            document: None,
            raw_data: Vec::new(),
            config: PdfConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PdfConfig) -> Self {
        self.config = config;
        self
    }

    /// Bytes of the loaded document, decrypted when needed.
    pub fn into_raw_data(self) -> Vec<u8> {
        self.raw_data
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or_else(|| PdfError::Parse("No document loaded".to_string()))
    }

    /// Page numbers to read, honoring `max_pages`.
    fn page_numbers(&self) -> Vec<u32> {
        let count = self.page_count();
        let limit = match self.config.max_pages {
            0 => count,
            max => count.min(max as u32),
        };
        (1..=limit).collect()
    }

    /// Positioned text runs from the content streams.
    pub fn text_boxes(&self) -> Vec<TextBox> {
        let Ok(doc) = self.document() else {
            return Vec::new();
        };
        let max_page = self.page_numbers().last().copied().unwrap_or(0);
        collect_text_boxes(doc)
            .into_iter()
            .filter(|b| b.page <= max_page)
            .collect()
    }

    /// Load and extract all content from a PDF.
    pub fn extract_all(&self) -> Result<PdfContent> {
        let pages: Vec<PdfPage> = self
            .extract_pages()?
            .into_iter()
            .enumerate()
            .map(|(i, text)| PdfPage {
                number: i as u32 + 1,
                text,
            })
            .collect();

        Ok(PdfContent {
            pdf_type: self.analyze(),
            pages,
            boxes: self.text_boxes(),
        })
    }

    /// Whether any page references an image XObject.
    fn has_images(&self) -> bool {
        let Ok(doc) = self.document() else {
            return false;
        };
        doc.objects.values().any(|obj| match obj {
            Object::Stream(stream) => stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Image"),
            _ => false,
        })
    }

    fn letter_count(text: &str) -> usize {
        text.chars().filter(|c| c.is_alphanumeric()).count()
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor for PdfExtractor {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Handle PDFs with empty password encryption
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            let mut decrypted_data = Vec::new();
            doc.save_to(&mut decrypted_data)
                .map_err(|e| PdfError::Parse(format!("Failed to save decrypted PDF: {}", e)))?;
            self.raw_data = decrypted_data;
        } else {
            self.raw_data = data.to_vec();
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        self.document = Some(doc);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn analyze(&self) -> PdfType {
        let text = self.extract_pages().unwrap_or_default().join("\n");
        let has_text = Self::letter_count(&text) >= self.config.min_text_length;

        let pdf_type = match (has_text, self.has_images()) {
            (true, _) => PdfType::Text,
            (false, true) => PdfType::Scanned,
            (false, false) => PdfType::Empty,
        };

        debug!("PDF analysis: has_text={} -> {:?}", has_text, pdf_type);
        pdf_type
    }

    fn extract_text(&self) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(&self.raw_data)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))?;
        Ok(text)
    }

    fn extract_page_text(&self, page: u32) -> Result<String> {
        let doc = self.document()?;
        if !doc.get_pages().contains_key(&page) {
            return Err(PdfError::InvalidPage(page));
        }
        doc.extract_text(&[page])
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// Per-page text through lopdf. When that yields too little text, the
    /// whole document is read again with pdf-extract as a single page.
    fn extract_pages(&self) -> Result<Vec<String>> {
        let numbers = self.page_numbers();
        if numbers.is_empty() {
            return Err(PdfError::NoPages);
        }

        let pages: Vec<String> = numbers
            .iter()
            .map(|&n| {
                self.extract_page_text(n).unwrap_or_else(|e| {
                    trace!("Page {} text unavailable: {}", n, e);
                    String::new()
                })
            })
            .collect();

        let letters: usize = pages.iter().map(|p| Self::letter_count(p)).sum();
        if letters >= self.config.min_text_length {
            return Ok(pages);
        }

        debug!(
            "Only {} characters through page extraction, trying pdf-extract",
            letters
        );
        match self.extract_text() {
            Ok(text) if Self::letter_count(&text) > letters => Ok(vec![text]),
            Ok(_) => Ok(pages),
            Err(e) => {
                debug!("pdf-extract failed: {}", e);
                Ok(pages)
            }
        }
    }
}
