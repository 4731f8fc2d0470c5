//! Identifier handling utilities for T-SQL text.
//!
//! # Examples
//!
//! ```ignore
//! use crate::parser::identifier_utils::*;
//!
//! assert_eq!(normalize_identifier("[MyTable]"), "MyTable");
//! assert_eq!(normalize_object_name("[dbo].[Orders]"), "dbo.Orders");
//! assert!(is_temp_name("#Staging"));
//! ```

use sqlparser::tokenizer::{Token, Word};

/// Strips brackets `[]` and double quotes `""` from an identifier.
///
/// ```ignore
/// assert_eq!(normalize_identifier("[MyTable]"), "MyTable");
/// assert_eq!(normalize_identifier("\"MyColumn\""), "MyColumn");
/// assert_eq!(normalize_identifier("  [Trimmed]  "), "Trimmed");
/// ```
pub fn normalize_identifier(ident: &str) -> String {
    ident
        .trim()
        .trim_matches(|c| c == '[' || c == ']' || c == '"')
        .to_string()
}

/// Normalizes every part of a dotted name: `[dbo] . [Orders]` → `dbo.Orders`.
pub fn normalize_object_name(name: &str) -> String {
    name.split('.')
        .map(normalize_identifier)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// `#local`, `##global` temp tables and `@table` variables.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('@')
}

/// Case-insensitive comparison of two object names after normalization.
pub fn same_object(a: &str, b: &str) -> bool {
    normalize_object_name(a).eq_ignore_ascii_case(&normalize_object_name(b))
}

/// The last part of a dotted name (`dbo.Orders` → `Orders`).
pub fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Converts a sqlparser-rs Word token to a properly quoted string.
///
/// - `Some('[')` -> `[identifier]`
/// - `Some('"')` -> `"identifier"`
/// - `None` -> `identifier` (unquoted)
pub fn format_word(word: &Word) -> String {
    match word.quote_style {
        Some('[') => format!("[{}]", word.value),
        Some('"') => format!("\"{}\"", word.value),
        _ => word.value.clone(),
    }
}

/// Converts a sqlparser-rs Token back to SQL text, preserving identifier quoting.
pub fn format_token(token: &Token) -> String {
    match token {
        Token::Word(w) => format_word(w),
        Token::Number(n, _) => n.clone(),
        Token::SingleQuotedString(s) => format!("'{}'", s),
        Token::NationalStringLiteral(s) => format!("N'{}'", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::keywords::Keyword;

    #[test]
    fn test_normalize_identifier_brackets() {
        assert_eq!(normalize_identifier("[MyTable]"), "MyTable");
        assert_eq!(normalize_identifier("\"MyTable\""), "MyTable");
        assert_eq!(normalize_identifier("dbo"), "dbo");
    }

    #[test]
    fn test_normalize_object_name() {
        assert_eq!(normalize_object_name("[dbo].[Orders]"), "dbo.Orders");
        assert_eq!(normalize_object_name("Orders"), "Orders");
        assert_eq!(normalize_object_name("#Temp"), "#Temp");
    }

    #[test]
    fn test_same_object_ignores_case_and_brackets() {
        assert!(same_object("[dbo].[Orders]", "DBO.orders"));
        assert!(!same_object("dbo.Orders", "Orders"));
    }

    #[test]
    fn test_is_temp_name() {
        assert!(is_temp_name("#T"));
        assert!(is_temp_name("##Global"));
        assert!(is_temp_name("@Rows"));
        assert!(!is_temp_name("Orders"));
    }

    #[test]
    fn test_format_word_bracketed() {
        let word = Word {
            value: "MyTable".to_string(),
            quote_style: Some('['),
            keyword: Keyword::NoKeyword,
        };
        assert_eq!(format_word(&word), "[MyTable]");
    }

    #[test]
    fn test_format_token() {
        assert_eq!(format_token(&Token::LParen), "(");
        assert_eq!(
            format_token(&Token::NationalStringLiteral("x".to_string())),
            "N'x'"
        );
        assert_eq!(format_token(&Token::Number("42".to_string(), false)), "42");
    }
}
