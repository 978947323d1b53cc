//! The source buffer owning one translation unit's program text

use crate::{Position, Span};

/// Owns the full text of a translation unit and resolves byte offsets to
/// line/column positions.
///
/// Tokens, AST nodes and diagnostics refer into this buffer by span; nothing
/// downstream copies source text. The buffer lives as long as the
/// translation unit.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    name: String,
    text: String,
    /// Byte offset of the first character of each line.
    line_starts: Vec<u32>,
}

impl SourceBuffer {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    /// The display name of this unit, usually the file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Translate an absolute byte offset to a 1-based position.
    pub fn position(&self, offset: u32) -> Position {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line_start = self.line_starts[line_idx];
        let column = self.text[line_start as usize..offset.min(self.text.len() as u32) as usize]
            .chars()
            .count() as u32;
        Position::new(line_idx as u32 + 1, column + 1)
    }

    /// The text of a 1-based line, without its terminator.
    pub fn line_text(&self, line: u32) -> &str {
        let idx = (line as usize - 1).min(self.line_starts.len() - 1);
        let start = self.line_starts[idx] as usize;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&s| s as usize)
            .unwrap_or(self.text.len());
        self.text[start..end].trim_end_matches(['\n', '\r'])
    }

    /// The source slice a span covers.
    pub fn slice(&self, span: Span) -> &str {
        &self.text[span.start as usize..span.end as usize]
    }

    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn position_translation() {
        let buf = SourceBuffer::new("test.via", "var x = 1\nprint(x)\n");
        assert_eq!(buf.position(0), Position::new(1, 1));
        assert_eq!(buf.position(4), Position::new(1, 5));
        assert_eq!(buf.position(10), Position::new(2, 1));
        assert_eq!(buf.position(16), Position::new(2, 7));
    }

    #[test]
    fn line_text_strips_terminator() {
        let buf = SourceBuffer::new("test.via", "first\nsecond\r\nthird");
        assert_eq!(buf.line_text(1), "first");
        assert_eq!(buf.line_text(2), "second");
        assert_eq!(buf.line_text(3), "third");
    }

    #[test]
    fn slice_matches_span() {
        let buf = SourceBuffer::new("test.via", "var x = 1");
        assert_eq!(buf.slice(Span::new(4, 5)), "x");
    }
}
