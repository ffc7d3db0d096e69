//! Alternative record producers used when the anchor rules leave gaps.

pub mod geometry;
pub mod llm;
#[cfg(feature = "ocr")]
pub mod ocr;

pub use geometry::{collect_text_boxes, decode_pdf_string, group_lines, TextBox, LINE_TOLERANCE};
#[cfg(feature = "llm")]
pub use llm::HttpChatClient;
pub use llm::{parse_llm_json, record_from_json, ChatClient, LlmStrategy};
#[cfg(feature = "ocr")]
pub use ocr::{CommandOcrEngine, OcrEngine, OcrStrategy};
