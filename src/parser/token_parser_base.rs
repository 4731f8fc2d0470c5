//! Base token parser providing common helper methods for T-SQL parsing.
//!
//! `TokenParser` wraps a stream of [`Lexeme`]s and a cursor. The header parser
//! and the statement-level extractors in the operation detector use it through
//! composition:
//!
//! ```ignore
//! pub struct ProcedureTokenParser {
//!     base: TokenParser,
//! }
//!
//! impl ProcedureTokenParser {
//!     pub fn parse_header(&mut self) -> Option<...> {
//!         self.base.skip_whitespace();
//!         self.base.expect_keyword("CREATE")?;
//!         // ...
//!     }
//! }
//! ```

use sqlparser::tokenizer::Token;

use super::identifier_utils::{format_token, normalize_identifier};
use super::lexer::{tokenize, Lexeme};

/// Base token parser with common helper methods for T-SQL parsing.
pub struct TokenParser {
    tokens: Vec<Lexeme>,
    pos: usize,
}

impl TokenParser {
    /// Create a new TokenParser from a SQL string.
    pub fn new(sql: &str) -> Self {
        Self {
            tokens: tokenize(sql),
            pos: 0,
        }
    }

    /// Create a new TokenParser with pre-tokenized lexemes.
    pub fn from_lexemes(tokens: Vec<Lexeme>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ========================================================================
    // Position and state
    // ========================================================================

    /// Check if at end of tokens.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Get current position in token stream.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Set current position in token stream.
    #[inline]
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.tokens.len());
    }

    /// Get the underlying lexemes.
    #[inline]
    pub fn tokens(&self) -> &[Lexeme] {
        &self.tokens
    }

    // ========================================================================
    // Token access
    // ========================================================================

    /// Get current token without consuming.
    #[inline]
    pub fn current_token(&self) -> Option<&Lexeme> {
        self.tokens.get(self.pos)
    }

    /// Advance to next token.
    #[inline]
    pub fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    // ========================================================================
    // Whitespace handling
    // ========================================================================

    /// Skip whitespace and comment tokens.
    pub fn skip_whitespace(&mut self) {
        while self.current_token().is_some_and(Lexeme::is_trivia) {
            self.advance();
        }
    }

    // ========================================================================
    // Token type checks
    // ========================================================================

    /// Check if current token is the given unquoted keyword (case-insensitive).
    #[inline]
    pub fn check_keyword(&self, keyword: &str) -> bool {
        self.current_token().is_some_and(|t| t.is_keyword(keyword))
    }

    /// Check if current token is one of several keywords.
    #[inline]
    pub fn check_any_keyword(&self, keywords: &[&str]) -> bool {
        self.current_token()
            .is_some_and(|t| t.is_any_keyword(keywords))
    }

    /// Check if current token matches a specific token type (by discriminant).
    ///
    /// For example, `check_token(&Token::LParen)` matches any left parenthesis.
    #[inline]
    pub fn check_token(&self, expected: &Token) -> bool {
        self.current_token().is_some_and(|t| {
            std::mem::discriminant(&t.token) == std::mem::discriminant(expected)
        })
    }

    // ========================================================================
    // Expect methods (check and advance)
    // ========================================================================

    /// Expect a specific keyword, advancing if found.
    ///
    /// Returns `Some(())` if the keyword was found and position advanced,
    /// `None` otherwise (position unchanged).
    pub fn expect_keyword(&mut self, keyword: &str) -> Option<()> {
        if self.check_keyword(keyword) {
            self.advance();
            Some(())
        } else {
            None
        }
    }

    /// Expect a specific token type, advancing if found.
    pub fn expect_token(&mut self, expected: &Token) -> Option<()> {
        if self.check_token(expected) {
            self.advance();
            Some(())
        } else {
            None
        }
    }

    // ========================================================================
    // Identifier parsing
    // ========================================================================

    /// Parse an identifier (bracketed or unbracketed).
    ///
    /// Returns the identifier value without brackets/quotes.
    pub fn parse_identifier(&mut self) -> Option<String> {
        let token = self.current_token()?;
        match &token.token {
            Token::Word(w) => {
                let name = normalize_identifier(&w.value);
                self.advance();
                Some(name)
            }
            _ => None,
        }
    }

    /// Parse a dotted object name as written: `[dbo].[Orders]` → `dbo.Orders`,
    /// `#Temp` → `#Temp`. No default schema is applied.
    pub fn parse_qualified_name(&mut self) -> Option<String> {
        let mut parts = vec![self.parse_identifier()?];
        loop {
            let save = self.pos;
            self.skip_whitespace();
            if !self.check_token(&Token::Period) {
                self.pos = save;
                break;
            }
            self.advance();
            self.skip_whitespace();
            match self.parse_identifier() {
                Some(part) => parts.push(part),
                None => {
                    self.pos = save;
                    break;
                }
            }
        }
        Some(parts.join("."))
    }

    // ========================================================================
    // Token string conversion
    // ========================================================================

    /// Convert a range of tokens to a string.
    ///
    /// Concatenates tokens from `start_pos` to `end_pos` (exclusive).
    pub fn tokens_to_string(&self, start_pos: usize, end_pos: usize) -> String {
        self.tokens[start_pos..end_pos.min(self.tokens.len())]
            .iter()
            .map(|t| format_token(&t.token))
            .collect()
    }

    // ========================================================================
    // Utility methods
    // ========================================================================

    /// Skip a parenthesized expression, handling nested parentheses.
    ///
    /// Position should be at the opening parenthesis. After this call,
    /// position will be after the closing parenthesis.
    pub fn skip_parenthesized(&mut self) {
        if !self.check_token(&Token::LParen) {
            return;
        }

        let mut depth = 0;
        while !self.is_at_end() {
            if self.check_token(&Token::LParen) {
                depth += 1;
            } else if self.check_token(&Token::RParen) {
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    return;
                }
            }
            self.advance();
        }
    }

    /// Consume a parenthesized group and return the positions of its inner
    /// tokens as `(first_inner, closing_paren)`.
    ///
    /// Position should be at the opening parenthesis; afterwards it is past
    /// the closing one. Returns `None` if not at a left parenthesis or the
    /// group is unbalanced.
    pub fn consume_parenthesized(&mut self) -> Option<(usize, usize)> {
        if !self.check_token(&Token::LParen) {
            return None;
        }

        let start_pos = self.pos + 1;
        let mut depth = 0;

        while !self.is_at_end() {
            if self.check_token(&Token::LParen) {
                depth += 1;
            } else if self.check_token(&Token::RParen) {
                depth -= 1;
                if depth == 0 {
                    let close = self.pos;
                    self.advance();
                    return Some((start_pos, close));
                }
            }
            self.advance();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_at_end() {
        let mut parser = TokenParser::new("A");
        assert!(!parser.is_at_end());

        while !parser.is_at_end() {
            parser.advance();
        }
        assert!(parser.is_at_end());
    }

    #[test]
    fn test_skip_whitespace_skips_comments() {
        let mut parser = TokenParser::new("  -- lead\n /* x */ SELECT");
        parser.skip_whitespace();
        assert!(parser.check_keyword("SELECT"));
    }

    #[test]
    fn test_check_keyword_case_insensitive() {
        let mut parser = TokenParser::new("create TABLE");
        parser.skip_whitespace();
        assert!(parser.check_keyword("CREATE"));
        assert!(!parser.check_keyword("SELECT"));
    }

    #[test]
    fn test_bracketed_word_is_not_keyword() {
        let parser = TokenParser::new("[Status]");
        assert!(!parser.check_keyword("STATUS"));
    }

    #[test]
    fn test_check_token() {
        let parser = TokenParser::new("(test)");
        assert!(parser.check_token(&Token::LParen));
        assert!(!parser.check_token(&Token::RParen));
    }

    #[test]
    fn test_parse_identifier_bracketed() {
        let mut parser = TokenParser::new("[MyTable]");
        assert_eq!(parser.parse_identifier(), Some("MyTable".to_string()));
    }

    #[test]
    fn test_parse_qualified_name() {
        let mut parser = TokenParser::new("[dbo].[Users] u");
        assert_eq!(parser.parse_qualified_name(), Some("dbo.Users".to_string()));
        parser.skip_whitespace();
        assert!(parser.check_keyword("u"));
    }

    #[test]
    fn test_parse_qualified_name_temp_table() {
        let mut parser = TokenParser::new("#Staging");
        assert_eq!(parser.parse_qualified_name(), Some("#Staging".to_string()));
    }

    #[test]
    fn test_skip_parenthesized() {
        let mut parser = TokenParser::new("(a, (b, c), d) rest");
        parser.skip_parenthesized();
        parser.skip_whitespace();
        assert!(parser.check_keyword("rest"));
    }

    #[test]
    fn test_consume_parenthesized() {
        let mut parser = TokenParser::new("(a, b) rest");
        let (first, close) = parser.consume_parenthesized().unwrap();
        assert_eq!(parser.tokens_to_string(first, close), "a, b");
        parser.skip_whitespace();
        assert!(parser.check_keyword("rest"));
    }
}
