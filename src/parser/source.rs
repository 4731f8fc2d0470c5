//! One procedure's text with its token stream and derived views.

use super::lexer::{mask_comments, mask_comments_and_strings, tokenize, Lexeme, LineIndex};
use super::procedure_parser::{parse_procedure_header, ProcedureHeader};
use super::segmenter::{split_statements, StatementSpan};

/// Procedure text tokenized once and shared read-only by every analysis stage.
#[derive(Debug, Clone)]
pub struct SqlSource {
    text: String,
    lexemes: Vec<Lexeme>,
    sig: Vec<Lexeme>,
    lines: LineIndex,
    masked: String,
    code: String,
    header: Option<ProcedureHeader>,
    header_sig_start: usize,
    body_sig_start: usize,
}

impl SqlSource {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let lexemes = tokenize(&text);
        let sig: Vec<Lexeme> = lexemes.iter().filter(|l| !l.is_trivia()).cloned().collect();
        let lines = LineIndex::new(&text);
        let masked = mask_comments(&text, &lexemes);
        let code = mask_comments_and_strings(&text, &lexemes);
        let header = parse_procedure_header(&lexemes);

        let (header_sig_start, body_sig_start) = match &header {
            Some(h) => (
                sig.partition_point(|t| t.start < h.header_start),
                sig.partition_point(|t| t.start < h.body_start),
            ),
            None => (0, 0),
        };

        Self {
            text,
            lexemes,
            sig,
            lines,
            masked,
            code,
            header,
            header_sig_start,
            body_sig_start,
        }
    }

    /// The original text.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// All lexemes including whitespace and comments.
    #[inline]
    pub fn lexemes(&self) -> &[Lexeme] {
        &self.lexemes
    }

    /// Lexemes without whitespace and comments.
    #[inline]
    pub fn sig(&self) -> &[Lexeme] {
        &self.sig
    }

    /// Text with comments blanked; offsets match [`text`](Self::text).
    #[inline]
    pub fn masked(&self) -> &str {
        &self.masked
    }

    /// Text with comments and string contents blanked; offsets match [`text`](Self::text).
    #[inline]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[inline]
    pub fn header(&self) -> Option<&ProcedureHeader> {
        self.header.as_ref()
    }

    /// Index of the first significant token of the body.
    #[inline]
    pub fn body_sig_start(&self) -> usize {
        self.body_sig_start
    }

    /// Byte offset where the body begins (0 without a header).
    pub fn body_start(&self) -> usize {
        self.header.as_ref().map_or(0, |h| h.body_start)
    }

    /// Whether the byte offset falls inside the `CREATE PROCEDURE ... AS` header.
    pub fn in_header(&self, offset: usize) -> bool {
        self.header
            .as_ref()
            .is_some_and(|h| offset >= h.header_start && offset < h.body_start)
    }

    #[inline]
    pub fn line_of(&self, offset: usize) -> usize {
        self.lines.line_of(offset)
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    /// Byte range covered by significant tokens `[first, last)`.
    pub fn span_bytes(&self, first: usize, last: usize) -> (usize, usize) {
        if first >= last || first >= self.sig.len() {
            let at = self.sig.get(first).map_or(self.text.len(), |t| t.start);
            return (at, at);
        }
        let last = last.min(self.sig.len());
        (self.sig[first].start, self.sig[last - 1].end)
    }

    /// Source text covered by significant tokens `[first, last)`.
    pub fn span_text(&self, first: usize, last: usize) -> &str {
        let (start, end) = self.span_bytes(first, last);
        &self.text[start..end]
    }

    /// Every statement outside the procedure header, in source order.
    pub fn statement_spans(&self) -> Vec<StatementSpan> {
        let mut spans = split_statements(&self.sig, 0, self.header_sig_start);
        spans.extend(split_statements(
            &self.sig,
            self.body_sig_start,
            self.sig.len(),
        ));
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_excluded_from_statements() {
        let source = SqlSource::new("CREATE PROCEDURE dbo.P @a INT AS SELECT @a; RETURN");
        let spans = source.statement_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(source.span_text(spans[0].first, spans[0].last), "SELECT @a;");
    }

    #[test]
    fn test_script_without_header() {
        let source = SqlSource::new("SELECT 1");
        assert!(source.header().is_none());
        assert_eq!(source.body_start(), 0);
        assert_eq!(source.statement_spans().len(), 1);
    }

    #[test]
    fn test_in_header() {
        let source = SqlSource::new("CREATE PROC p @a INT AS SELECT @a");
        let decl = source.text().find("@a").unwrap();
        let usage = source.text().rfind("@a").unwrap();
        assert!(source.in_header(decl));
        assert!(!source.in_header(usage));
    }
}
