//! Token-based `CREATE PROCEDURE` header parsing.
//!
//! ## Supported Syntax
//!
//! ```sql
//! CREATE PROCEDURE [schema].[name] AS ...
//! CREATE PROC name @a INT, @b VARCHAR(50) = 'x' OUTPUT AS ...
//! CREATE OR ALTER PROCEDURE name (@a INT = NULL) WITH RECOMPILE AS ...
//! ALTER PROC name @items dbo.TableType READONLY WITH EXECUTE AS OWNER AS ...
//! ```
//!
//! The header may be preceded by other batches (`SET ANSI_NULLS ON GO`, a
//! guarded `DROP PROCEDURE`); the first `CREATE`/`ALTER` that parses wins.

use sqlparser::tokenizer::Token;

use super::identifier_utils::format_token;
use super::lexer::Lexeme;
use super::token_parser_base::TokenParser;

/// Result of parsing a procedure header
#[derive(Debug, Clone, Default)]
pub struct ProcedureHeader {
    /// Procedure name as written, brackets stripped (`dbo.GetOrders`)
    pub name: String,
    /// Declared parameters in order
    pub parameters: Vec<ParsedParameter>,
    /// Byte offset of the `CREATE`/`ALTER` keyword
    pub header_start: usize,
    /// Byte offset just past the `AS` that opens the body
    pub body_start: usize,
}

/// A parameter extracted from a procedure header
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParameter {
    /// Parameter name including the `@` prefix
    pub name: String,
    /// Data type (e.g., "INT", "DECIMAL(18,2)", "[dbo].[TableType]")
    pub data_type: String,
    /// Whether this is an OUTPUT parameter
    pub is_output: bool,
    /// Whether this is a READONLY table-valued parameter
    pub is_readonly: bool,
    /// Default value if specified
    pub default_value: Option<String>,
}

/// Token-based procedure header parser
pub struct ProcedureTokenParser {
    base: TokenParser,
}

impl ProcedureTokenParser {
    pub fn from_lexemes(lexemes: Vec<Lexeme>) -> Self {
        Self {
            base: TokenParser::from_lexemes(lexemes),
        }
    }

    /// Find and parse the first procedure header in the stream.
    pub fn find_header(&mut self) -> Option<ProcedureHeader> {
        let candidates: Vec<usize> = self
            .base
            .tokens()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_any_keyword(&["CREATE", "ALTER"]))
            .map(|(i, _)| i)
            .collect();

        candidates.into_iter().find_map(|pos| {
            self.base.set_pos(pos);
            self.parse_header()
        })
    }

    /// Parse `CREATE [OR ALTER] PROC[EDURE]` or `ALTER PROC[EDURE]` at the current position.
    pub fn parse_header(&mut self) -> Option<ProcedureHeader> {
        self.base.skip_whitespace();
        let header_start = self.base.current_token()?.start;

        if self.base.expect_keyword("CREATE").is_some() {
            self.base.skip_whitespace();
            if self.base.expect_keyword("OR").is_some() {
                self.base.skip_whitespace();
                self.base.expect_keyword("ALTER")?;
                self.base.skip_whitespace();
            }
        } else {
            self.base.expect_keyword("ALTER")?;
            self.base.skip_whitespace();
        }

        if !self.base.check_any_keyword(&["PROCEDURE", "PROC"]) {
            return None;
        }
        self.base.advance();
        self.base.skip_whitespace();

        let name = self.base.parse_qualified_name()?;
        self.base.skip_whitespace();

        // Numbered procedures: name;1
        if self.base.check_token(&Token::SemiColon) {
            self.base.advance();
            self.base.skip_whitespace();
            if self.base.check_token(&Token::Number(String::new(), false)) {
                self.base.advance();
                self.base.skip_whitespace();
            }
        }

        let parameters = self.parse_parameters();
        self.skip_procedure_options();

        let body_start = match self.base.current_token() {
            Some(token) if token.is_keyword("AS") => {
                let end = token.end;
                self.base.advance();
                end
            }
            Some(token) => token.start,
            None => self.base.tokens().last().map_or(header_start, |t| t.end),
        };

        Some(ProcedureHeader {
            name,
            parameters,
            header_start,
            body_start,
        })
    }

    /// Parse procedure parameters: @param1 TYPE, @param2 TYPE OUTPUT, @items TYPE READONLY
    /// Parameters continue until AS (or a WITH option clause) is found
    fn parse_parameters(&mut self) -> Vec<ParsedParameter> {
        let mut params = Vec::new();

        self.base.skip_whitespace();

        // Parameters may or may not be wrapped in parentheses
        let has_parens = self.base.check_token(&Token::LParen);
        if has_parens {
            self.base.advance();
            self.base.skip_whitespace();
        }

        loop {
            if self.base.is_at_end() || self.base.check_any_keyword(&["AS", "WITH"]) {
                break;
            }

            if has_parens && self.base.check_token(&Token::RParen) {
                self.base.advance();
                self.base.skip_whitespace();
                break;
            }

            match self.parse_single_parameter() {
                Some(param) => params.push(param),
                None => self.base.advance(),
            }

            self.base.skip_whitespace();

            if self.base.check_token(&Token::Comma) {
                self.base.advance();
                self.base.skip_whitespace();
            }
        }

        params
    }

    /// Skip `WITH RECOMPILE, EXECUTE AS OWNER, ...` up to the body's `AS`.
    fn skip_procedure_options(&mut self) {
        self.base.skip_whitespace();
        if self.base.expect_keyword("WITH").is_none() {
            return;
        }

        let mut after_execute = false;
        while !self.base.is_at_end() {
            self.base.skip_whitespace();
            if self.base.check_keyword("AS") && !after_execute {
                return;
            }
            after_execute = self.base.check_any_keyword(&["EXECUTE", "EXEC"]);
            self.base.advance();
        }
    }

    /// Parse a single parameter: @name [AS] TYPE [= default] [READONLY] [OUTPUT|OUT]
    fn parse_single_parameter(&mut self) -> Option<ParsedParameter> {
        let name = self.parse_parameter_name()?;
        self.base.skip_whitespace();

        if self.base.check_keyword("AS") {
            self.base.advance();
            self.base.skip_whitespace();
        }

        let data_type = self.parse_data_type()?;
        self.base.skip_whitespace();

        // Modifiers can appear in various orders, so loop until a delimiter
        let mut default_value = None;
        let mut is_readonly = false;
        let mut is_output = false;

        loop {
            if self.base.check_token(&Token::Eq) {
                self.base.advance();
                self.base.skip_whitespace();
                default_value = Some(self.parse_default_value());
                self.base.skip_whitespace();
                continue;
            }

            if self.base.check_keyword("READONLY") {
                is_readonly = true;
                self.base.advance();
                self.base.skip_whitespace();
                continue;
            }

            if self.base.check_any_keyword(&["OUTPUT", "OUT"]) {
                is_output = true;
                self.base.advance();
                self.base.skip_whitespace();
                continue;
            }

            break;
        }

        Some(ParsedParameter {
            name,
            data_type,
            is_output,
            is_readonly,
            default_value,
        })
    }

    /// Parse parameter name (@name), keeping the @ prefix
    fn parse_parameter_name(&mut self) -> Option<String> {
        let name = self.base.current_token()?.variable_name()?.to_string();
        self.base.advance();
        Some(name)
    }

    /// Parse data type (e.g., INT, DECIMAL(18, 2), NVARCHAR(MAX), [dbo].[TableType])
    fn parse_data_type(&mut self) -> Option<String> {
        let first_part = self.try_parse_identifier()?;
        let save = self.base.pos();
        self.base.skip_whitespace();

        let mut result = if self.base.check_token(&Token::Period) {
            self.base.advance();
            self.base.skip_whitespace();

            if let Some(second_part) = self.try_parse_identifier() {
                format!("[{}].[{}]", first_part, second_part)
            } else {
                first_part
            }
        } else {
            self.base.set_pos(save);
            first_part.to_uppercase()
        };

        self.base.skip_whitespace();

        if self.base.check_token(&Token::LParen) {
            let (first, close) = self.base.consume_parenthesized()?;
            let inner: String = self.base.tokens()[first..close]
                .iter()
                .filter(|t| !t.is_trivia())
                .map(|t| match t.keyword_upper() {
                    Some(upper) => upper,
                    None => format_token(&t.token),
                })
                .collect();
            result.push('(');
            result.push_str(&inner);
            result.push(')');
        }

        Some(result)
    }

    /// Try to parse an identifier without consuming if not found
    fn try_parse_identifier(&mut self) -> Option<String> {
        let token = self.base.current_token()?;
        if token.is_any_keyword(&["AS", "BEGIN", "WITH", "FOR", "READONLY", "OUTPUT", "OUT"]) {
            return None;
        }
        match &token.token {
            Token::Word(w) if !w.value.starts_with('@') => {
                let name = w.value.clone();
                self.base.advance();
                Some(name)
            }
            _ => None,
        }
    }

    /// Parse default value (everything up to comma, READONLY, OUTPUT, OUT, or AS)
    fn parse_default_value(&mut self) -> String {
        let mut result = String::new();
        let mut depth = 0;

        while let Some(token) = self.base.current_token() {
            match &token.token {
                Token::LParen => {
                    depth += 1;
                    result.push('(');
                }
                Token::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    result.push(')');
                }
                Token::Comma if depth == 0 => break,
                _ if depth == 0
                    && token.is_any_keyword(&["AS", "OUTPUT", "OUT", "READONLY", "WITH"]) =>
                {
                    break
                }
                Token::Whitespace(_) => {
                    if !result.is_empty() && !result.ends_with(' ') {
                        result.push(' ');
                    }
                }
                other => result.push_str(&format_token(other)),
            }
            self.base.advance();
        }

        result.trim().to_string()
    }
}

/// Parse the first procedure header found in `lexemes`.
pub fn parse_procedure_header(lexemes: &[Lexeme]) -> Option<ProcedureHeader> {
    ProcedureTokenParser::from_lexemes(lexemes.to_vec()).find_header()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::tokenize;

    fn parse(sql: &str) -> ProcedureHeader {
        parse_procedure_header(&tokenize(sql)).unwrap()
    }

    // ========================================================================
    // Name tests
    // ========================================================================

    #[test]
    fn test_create_procedure_bracketed_schema_and_name() {
        let header = parse("CREATE PROCEDURE [dbo].[GetUsers] AS SELECT * FROM Users");
        assert_eq!(header.name, "dbo.GetUsers");
    }

    #[test]
    fn test_create_procedure_no_schema() {
        let header = parse("CREATE PROCEDURE GetUsers AS SELECT 1");
        assert_eq!(header.name, "GetUsers");
    }

    #[test]
    fn test_create_or_alter_proc_shorthand() {
        let header = parse("create or alter proc sales.Report AS SELECT 1");
        assert_eq!(header.name, "sales.Report");
    }

    #[test]
    fn test_alter_procedure() {
        let header = parse("ALTER PROCEDURE dbo.Fix AS RETURN 0");
        assert_eq!(header.name, "dbo.Fix");
    }

    #[test]
    fn test_not_a_procedure() {
        assert!(parse_procedure_header(&tokenize("CREATE TABLE t (id INT)")).is_none());
    }

    #[test]
    fn test_header_after_preamble_batch() {
        let sql = "SET ANSI_NULLS ON\nGO\nCREATE TABLE #x (a INT)\nGO\nCREATE PROCEDURE dbo.P AS SELECT 1";
        let header = parse(sql);
        assert_eq!(header.name, "dbo.P");
        assert_eq!(&sql[header.body_start..].trim(), &"SELECT 1");
    }

    // ========================================================================
    // Parameter tests
    // ========================================================================

    #[test]
    fn test_no_params() {
        let header = parse("CREATE PROCEDURE dbo.P AS SELECT 1");
        assert!(header.parameters.is_empty());
    }

    #[test]
    fn test_multiple_params_with_defaults() {
        let header = parse(
            "CREATE PROCEDURE dbo.P @id INT, @name nvarchar(50) = N'x', @total decimal(18, 2) = NULL AS SELECT 1",
        );
        assert_eq!(header.parameters.len(), 3);
        assert_eq!(header.parameters[0].name, "@id");
        assert_eq!(header.parameters[0].data_type, "INT");
        assert_eq!(header.parameters[0].default_value, None);
        assert_eq!(header.parameters[1].data_type, "NVARCHAR(50)");
        assert_eq!(header.parameters[1].default_value.as_deref(), Some("N'x'"));
        assert_eq!(header.parameters[2].data_type, "DECIMAL(18,2)");
        assert_eq!(header.parameters[2].default_value.as_deref(), Some("NULL"));
    }

    #[test]
    fn test_output_and_negative_default() {
        let header = parse("CREATE PROC p @count INT = -1 OUTPUT, @flag BIT OUT AS RETURN");
        assert!(header.parameters[0].is_output);
        assert_eq!(header.parameters[0].default_value.as_deref(), Some("-1"));
        assert!(header.parameters[1].is_output);
    }

    #[test]
    fn test_parenthesized_params_and_max() {
        let header = parse("CREATE PROCEDURE p (@body NVARCHAR(MAX), @n INT) AS SELECT 1");
        assert_eq!(header.parameters.len(), 2);
        assert_eq!(header.parameters[0].data_type, "NVARCHAR(MAX)");
    }

    #[test]
    fn test_readonly_tvp() {
        let header = parse("CREATE PROCEDURE p @items dbo.ItemList READONLY AS SELECT 1");
        assert_eq!(header.parameters[0].data_type, "[dbo].[ItemList]");
        assert!(header.parameters[0].is_readonly);
    }

    #[test]
    fn test_with_execute_as_option() {
        let sql = "CREATE PROCEDURE p @a INT WITH EXECUTE AS OWNER AS SELECT @a";
        let header = parse(sql);
        assert_eq!(header.parameters.len(), 1);
        assert_eq!(sql[header.body_start..].trim(), "SELECT @a");
    }

    #[test]
    fn test_param_with_as_keyword() {
        let header = parse("CREATE PROCEDURE p @a AS INT = 5 AS SELECT 1");
        assert_eq!(header.parameters[0].data_type, "INT");
        assert_eq!(header.parameters[0].default_value.as_deref(), Some("5"));
    }
}
