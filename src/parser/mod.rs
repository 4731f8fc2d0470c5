//! T-SQL tokenization and low-level parsing

pub mod identifier_utils;
pub mod lexer;
pub mod procedure_parser;
pub mod segmenter;
mod source;
pub mod token_parser_base;

pub use lexer::{tokenize, Lexeme, LineIndex};
pub use procedure_parser::{parse_procedure_header, ParsedParameter, ProcedureHeader};
pub use segmenter::StatementSpan;
pub use source::SqlSource;
