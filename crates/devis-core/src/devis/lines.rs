//! Normalized line view of a quote's text.

use unicode_normalization::UnicodeNormalization;

/// Ordered, immutable list of normalized text lines.
///
/// Built once per document; every extractor works on the same view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineSequence {
    lines: Vec<String>,
}

impl LineSequence {
    /// Normalize raw text into lines.
    ///
    /// NFC composition, unusual spaces mapped to a plain space, runs of
    /// whitespace collapsed, empty lines dropped.
    pub fn normalize(raw: &str) -> Self {
        Self::from_lines(raw.lines())
    }

    /// Normalize the text of several pages, in page order.
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        Self::from_lines(pages.iter().flat_map(|p| p.as_ref().lines()))
    }

    /// Normalize already split lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines = lines
            .into_iter()
            .filter_map(|l| normalize_line(l.as_ref()))
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(|s| s.as_str())
    }

    /// Index of the first line matching `predicate`.
    pub fn find_first<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&str) -> bool,
    {
        self.lines.iter().position(|l| predicate(l))
    }

    /// Whether any line carries at least one letter.
    pub fn has_letters(&self) -> bool {
        self.lines.iter().any(|l| l.chars().any(char::is_alphabetic))
    }

    /// All lines joined with `\n`.
    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }
}

fn normalize_line(line: &str) -> Option<String> {
    let composed: String = line
        .nfc()
        .map(|c| match c {
            '\u{00a0}' | '\u{202f}' | '\u{2007}' | '\u{2009}' | '\t' => ' ',
            other => other,
        })
        .collect();

    let collapsed = composed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
