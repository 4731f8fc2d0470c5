//! Tokenization of procedure text with byte offsets.
//!
//! Every analysis stage works from the same token stream produced here, so
//! string literals and comments are recognized exactly once. sqlparser reports
//! token spans as 1-based line/column (in characters); they are converted to
//! byte offsets into the original text so source slices stay exact.

use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer, Whitespace, Word};
use tracing::warn;

/// A token together with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl Lexeme {
    /// Whitespace and comments.
    #[inline]
    pub fn is_trivia(&self) -> bool {
        matches!(self.token, Token::Whitespace(_))
    }

    #[inline]
    pub fn is_comment(&self) -> bool {
        matches!(
            self.token,
            Token::Whitespace(Whitespace::SingleLineComment { .. })
                | Token::Whitespace(Whitespace::MultiLineComment(_))
        )
    }

    /// The word, if this token is an identifier or keyword.
    #[inline]
    pub fn word(&self) -> Option<&Word> {
        match &self.token {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }

    /// Unquoted word equal to `keyword` (case-insensitive). `[Status]` is never a keyword.
    #[inline]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
    }

    /// Unquoted word equal to any of `keywords`.
    #[inline]
    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(k))
    }

    /// Uppercased value of an unquoted word.
    pub fn keyword_upper(&self) -> Option<String> {
        match &self.token {
            Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
            _ => None,
        }
    }

    /// `@name` word (local variable or parameter), excluding `@@` system functions.
    pub fn variable_name(&self) -> Option<&str> {
        match &self.token {
            Token::Word(w)
                if w.quote_style.is_none()
                    && w.value.starts_with('@')
                    && !w.value.starts_with("@@")
                    && w.value.len() > 1 =>
            {
                Some(&w.value)
            }
            _ => None,
        }
    }

    /// Contents of a string literal.
    pub fn string_value(&self) -> Option<&str> {
        match &self.token {
            Token::SingleQuotedString(s) | Token::NationalStringLiteral(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is(&self, token: &Token) -> bool {
        &self.token == token
    }

    /// Text of a comment without its delimiters.
    pub fn comment_text(&self) -> Option<&str> {
        match &self.token {
            Token::Whitespace(Whitespace::SingleLineComment { comment, .. }) => Some(comment.trim()),
            Token::Whitespace(Whitespace::MultiLineComment(text)) => Some(text.trim()),
            _ => None,
        }
    }
}

/// Maps byte offsets to 0-based line numbers and back.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// 0-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset) - 1
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte offset of a 1-based (line, column) location as reported by sqlparser.
    fn offset(&self, text: &str, line: u64, column: u64) -> usize {
        let line_idx = (line.max(1) - 1) as usize;
        let Some(&line_start) = self.line_starts.get(line_idx) else {
            return text.len();
        };
        let chars_in = (column.max(1) - 1) as usize;
        text[line_start..]
            .char_indices()
            .nth(chars_in)
            .map(|(i, _)| line_start + i)
            .unwrap_or(text.len())
    }
}

fn to_lexemes(text: &str, index: &LineIndex, tokens: Vec<TokenWithSpan>) -> Vec<Lexeme> {
    tokens
        .into_iter()
        .filter(|t| !matches!(t.token, Token::EOF))
        .map(|t| Lexeme {
            start: index.offset(text, t.span.start.line, t.span.start.column),
            end: index.offset(text, t.span.end.line, t.span.end.column),
            token: t.token,
        })
        .collect()
}

/// Tokenize procedure text.
///
/// Never fails: when the tokenizer rejects the input (unterminated string or
/// comment), the longest prefix that does tokenize is returned instead.
pub fn tokenize(sql: &str) -> Vec<Lexeme> {
    let dialect = MsSqlDialect {};
    let index = LineIndex::new(sql);
    let mut limit = sql.len();

    for _ in 0..8 {
        let prefix = &sql[..limit];
        match Tokenizer::new(&dialect, prefix).tokenize_with_location() {
            Ok(tokens) => return to_lexemes(sql, &index, tokens),
            Err(err) => {
                let at = index.offset(sql, err.location.line, err.location.column);
                let cut = if at < limit {
                    at
                } else {
                    // Error reported at end of input: back off to the last opening delimiter
                    prefix
                        .rfind(['\'', '[', '"'])
                        .or_else(|| prefix.rfind("/*"))
                        .unwrap_or(0)
                };
                warn!(
                    "Tokenizer stopped at byte {}: {}; analyzing the preceding text only",
                    cut, err.message
                );
                limit = cut;
                if limit == 0 {
                    break;
                }
            }
        }
    }
    Vec::new()
}

/// Replace the given lexemes with spaces, keeping newlines and byte length.
fn mask_with(sql: &str, lexemes: &[Lexeme], pick: impl Fn(&Lexeme) -> Option<(usize, usize)>) -> String {
    let mut bytes = sql.as_bytes().to_vec();
    for lexeme in lexemes {
        if let Some((from, to)) = pick(lexeme) {
            for b in &mut bytes[from.min(to)..to] {
                if *b != b'\n' {
                    *b = b' ';
                }
            }
        }
    }
    String::from_utf8(bytes).unwrap_or_else(|_| sql.to_string())
}

/// Source text with comments blanked out. Offsets match the original.
pub fn mask_comments(sql: &str, lexemes: &[Lexeme]) -> String {
    mask_with(sql, lexemes, |lx| lx.is_comment().then_some((lx.start, lx.end)))
}

/// Source text with comments and string-literal contents blanked out.
/// The surrounding quotes stay so literals remain visible as `'   '`.
pub fn mask_comments_and_strings(sql: &str, lexemes: &[Lexeme]) -> String {
    mask_with(sql, lexemes, |lx| {
        if lx.is_comment() {
            return Some((lx.start, lx.end));
        }
        lx.string_value()?;
        let slice = &sql[lx.start..lx.end];
        let open = slice.find('\'')? + lx.start + 1;
        let close = lx.end.saturating_sub(1);
        (open <= close).then_some((open, close))
    })
}
