//! Positioned text runs and their regrouping into visual lines.

use lopdf::content::Content;
use lopdf::{Document, Object};
use tracing::{debug, trace};

/// Vertical distance under which two runs belong to the same line.
pub const LINE_TOLERANCE: f32 = 3.0;

/// A run of text at a position on a page.
///
/// `y` grows downward, so sorting by `(page, y, x)` gives reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    /// Page number (1-indexed).
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub text: String,
}

impl TextBox {
    pub fn new(page: u32, x: f32, y: f32, text: impl Into<String>) -> Self {
        Self {
            page,
            x,
            y,
            text: text.into(),
        }
    }
}

/// Group runs into lines by page and approximate `y`, left to right.
pub fn group_lines(boxes: &[TextBox], tolerance: f32) -> Vec<String> {
    let mut sorted: Vec<&TextBox> = boxes.iter().filter(|b| !b.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut lines: Vec<String> = Vec::new();
    let mut current: Vec<&TextBox> = Vec::new();

    for text_box in sorted {
        let same_line = current.first().is_some_and(|first| {
            first.page == text_box.page && (text_box.y - first.y).abs() < tolerance
        });
        if !same_line && !current.is_empty() {
            lines.push(join_runs(&mut current));
        }
        current.push(text_box);
    }
    if !current.is_empty() {
        lines.push(join_runs(&mut current));
    }

    lines
}

fn join_runs(runs: &mut Vec<&TextBox>) -> String {
    runs.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
    let line = runs
        .iter()
        .map(|r| r.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    runs.clear();
    line
}

#[derive(Debug, Default)]
struct TextCursor {
    line_x: f32,
    line_y: f32,
    x: f32,
    y: f32,
    leading: f32,
}

impl TextCursor {
    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_x += tx;
        self.line_y += ty;
        self.x = self.line_x;
        self.y = self.line_y;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }
}

/// Collect positioned text runs from the page content streams.
///
/// Only the text matrix and line moves are tracked, which is enough to
/// rebuild lines on generated quotes.
pub fn collect_text_boxes(doc: &Document) -> Vec<TextBox> {
    let mut boxes = Vec::new();

    for (page_num, page_id) in doc.get_pages() {
        let Ok(data) = doc.get_page_content(page_id) else {
            continue;
        };
        let Ok(content) = Content::decode(&data) else {
            debug!("Could not decode content stream of page {}", page_num);
            continue;
        };

        let mut cursor = TextCursor::default();
        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "BT" => cursor = TextCursor {
                    leading: cursor.leading,
                    ..TextCursor::default()
                },
                "Tm" if operands.len() == 6 => {
                    cursor.line_x = number(&operands[4]).unwrap_or(0.0);
                    cursor.line_y = number(&operands[5]).unwrap_or(0.0);
                    cursor.x = cursor.line_x;
                    cursor.y = cursor.line_y;
                }
                "Td" | "TD" if operands.len() == 2 => {
                    let tx = number(&operands[0]).unwrap_or(0.0);
                    let ty = number(&operands[1]).unwrap_or(0.0);
                    if op.operator == "TD" {
                        cursor.leading = -ty;
                    }
                    cursor.move_line(tx, ty);
                }
                "TL" if !operands.is_empty() => {
                    cursor.leading = number(&operands[0]).unwrap_or(0.0);
                }
                "T*" => cursor.next_line(),
                "Tj" | "'" | "\"" => {
                    if op.operator != "Tj" {
                        cursor.next_line();
                    }
                    if let Some(text) = operands.last().and_then(string_operand) {
                        push_run(&mut boxes, page_num, &cursor, text);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        push_run(&mut boxes, page_num, &cursor, array_text(items));
                    }
                }
                _ => {}
            }
        }
    }

    debug!("Collected {} positioned text runs", boxes.len());
    boxes
}

fn push_run(boxes: &mut Vec<TextBox>, page: u32, cursor: &TextCursor, text: String) {
    if text.trim().is_empty() {
        return;
    }
    trace!("Run at ({}, {}): {:?}", cursor.x, cursor.y, text);
    boxes.push(TextBox::new(page, cursor.x, -cursor.y, text));
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn string_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// Concatenate a `TJ` array; large negative kerning becomes a space.
fn array_text(items: &[Object]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            other => {
                if number(other).is_some_and(|k| k < -200.0) {
                    text.push(' ');
                }
            }
        }
    }
    text
}

/// UTF-16BE when a BOM is present, Latin-1 otherwise.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes
        .iter()
        .map(|&b| b as char)
        .filter(|c| !c.is_control())
        .collect()
}
