//! Temporary tables and table variables
//!
//! ## Supported Syntax
//!
//! ```sql
//! CREATE TABLE #name (col TYPE[(len[,scale])] [NULL|NOT NULL ...], ..., [CONSTRAINT ...])
//! DECLARE @name [AS] TABLE (col TYPE, ...)
//! SELECT ... INTO #name FROM ...
//! ```
//!
//! After the definitions are collected, every table reference naming a temp
//! structure feeds its lifecycle: INSERTs record where rows came from, reads
//! record where rows went, UPDATE/DELETE/MERGE record transformations.

use sqlparser::tokenizer::Token;

use crate::model::{
    TableOperation, TableReference, TempColumn, TempPopulation, TempStructure, TempTransformation,
    TempTransformationType, TempType, TempUsage,
};
use crate::parser::identifier_utils::{is_temp_name, normalize_identifier, same_object};
use crate::parser::lexer::Lexeme;
use crate::parser::token_parser_base::TokenParser;
use crate::parser::{SqlSource, StatementSpan};
use crate::util::{push_unique, truncate_chars};

const DEFINITION_LIMIT: usize = 200;

/// Column-list entries that are table constraints rather than columns.
const TABLE_CONSTRAINT_WORDS: &[&str] = &[
    "CONSTRAINT", "PRIMARY", "UNIQUE", "INDEX", "CHECK", "FOREIGN", "PERIOD",
];

/// Target of a `SELECT ... INTO`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectInto {
    pub statement: usize,
    pub name: String,
    pub offset: usize,
}

/// Find temp structure definitions and trace their lifecycle through `references`.
pub fn detect_temp_structures(
    source: &SqlSource,
    spans: &[StatementSpan],
    select_intos: &[SelectInto],
    references: &[TableReference],
) -> Vec<TempStructure> {
    let mut structures: Vec<TempStructure> = Vec::new();

    for span in spans {
        let tokens = &source.sig()[span.first..span.last];
        let definition = truncate_chars(source.span_text(span.first, span.last), DEFINITION_LIMIT);
        for (name, temp_type, columns) in parse_definitions(tokens) {
            if !structures.iter().any(|s| same_object(&s.name, &name)) {
                structures.push(new_structure(name, temp_type, definition.clone(), columns));
            }
        }
    }

    for into in select_intos {
        if into.name.starts_with('#') && !structures.iter().any(|s| same_object(&s.name, &into.name)) {
            let span = spans[into.statement];
            let definition =
                truncate_chars(source.span_text(span.first, span.last), DEFINITION_LIMIT);
            structures.push(new_structure(
                into.name.clone(),
                TempType::LocalTemp,
                definition,
                Vec::new(),
            ));
        }
    }

    for structure in &mut structures {
        trace_lifecycle(structure, references);
    }
    structures
}

fn new_structure(
    name: String,
    temp_type: TempType,
    definition: String,
    columns: Vec<TempColumn>,
) -> TempStructure {
    TempStructure {
        name,
        temp_type,
        definition,
        columns,
        populated_from: Vec::new(),
        used_in: Vec::new(),
        transformations: Vec::new(),
    }
}

/// `CREATE TABLE #t (...)` and `DECLARE @t TABLE (...)` in one statement.
fn parse_definitions(tokens: &[Lexeme]) -> Vec<(String, TempType, Vec<TempColumn>)> {
    let mut parser = TempTokenParser {
        base: TokenParser::from_lexemes(tokens.to_vec()),
    };
    let mut found = Vec::new();

    if parser.base.check_keyword("CREATE") {
        if let Some(def) = parser.parse_create_temp_table() {
            found.push(def);
        }
    } else if parser.base.check_keyword("DECLARE") {
        parser.base.advance();
        found.extend(parser.parse_table_variables());
    }
    found
}

/// Token-based parser for temp structure definitions
struct TempTokenParser {
    base: TokenParser,
}

impl TempTokenParser {
    fn parse_create_temp_table(&mut self) -> Option<(String, TempType, Vec<TempColumn>)> {
        self.base.expect_keyword("CREATE")?;
        self.base.expect_keyword("TABLE")?;
        let name = self.base.parse_qualified_name()?;
        if !name.starts_with('#') {
            return None;
        }
        let columns = self.parse_column_definitions().unwrap_or_default();
        Some((name, TempType::LocalTemp, columns))
    }

    /// `@a INT = 1, @t TABLE (...), ...` after DECLARE.
    fn parse_table_variables(&mut self) -> Vec<(String, TempType, Vec<TempColumn>)> {
        let mut found = Vec::new();
        while !self.base.is_at_end() {
            let Some(name) = self
                .base
                .current_token()
                .and_then(Lexeme::variable_name)
                .map(str::to_string)
            else {
                break;
            };
            self.base.advance();
            self.base.expect_keyword("AS");

            if self.base.expect_keyword("TABLE").is_some() {
                let columns = self.parse_column_definitions().unwrap_or_default();
                found.push((name, TempType::TableVariable, columns));
            }

            // Skip the rest of this declarator
            while !self.base.is_at_end() && !self.base.check_token(&Token::Comma) {
                if self.base.check_token(&Token::LParen) {
                    self.base.skip_parenthesized();
                } else {
                    self.base.advance();
                }
            }
            if self.base.expect_token(&Token::Comma).is_none() {
                break;
            }
        }
        found
    }

    /// `(col TYPE[(args)] ..., CONSTRAINT ...)`; positioned at the `(`.
    fn parse_column_definitions(&mut self) -> Option<Vec<TempColumn>> {
        let (first, close) = self.base.consume_parenthesized()?;
        let inner = &self.base.tokens()[first..close];

        let mut columns = Vec::new();
        for item in split_top_level(inner) {
            if let Some(column) = parse_column(item) {
                columns.push(column);
            }
        }
        Some(columns)
    }
}

/// Split on commas at parenthesis depth 0.
fn split_top_level(tokens: &[Lexeme]) -> Vec<&[Lexeme]> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.is(&Token::LParen) {
            depth += 1;
        } else if token.is(&Token::RParen) {
            depth = depth.saturating_sub(1);
        } else if token.is(&Token::Comma) && depth == 0 {
            items.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        items.push(&tokens[start..]);
    }
    items
}

/// `name TYPE[(len[,scale])] ...` → column; table constraints → `None`.
fn parse_column(item: &[Lexeme]) -> Option<TempColumn> {
    let name_token = item.first()?;
    if name_token.is_any_keyword(TABLE_CONSTRAINT_WORDS) {
        return None;
    }
    let name = normalize_identifier(&name_token.word()?.value);

    let mut parser = TokenParser::from_lexemes(item[1..].to_vec());
    let type_word = parser.current_token()?.word()?;
    let mut data_type = if type_word.quote_style.is_none() {
        type_word.value.to_ascii_uppercase()
    } else {
        type_word.value.clone()
    };
    parser.advance();

    if parser.check_token(&Token::LParen) {
        if let Some((first, close)) = parser.consume_parenthesized() {
            let args = parser.tokens_to_string(first, close).to_ascii_uppercase();
            data_type = format!("{}({})", data_type, args);
        }
    }

    Some(TempColumn { name, data_type })
}

/// Fill in `populated_from`, `used_in` and `transformations` from references.
fn trace_lifecycle(structure: &mut TempStructure, references: &[TableReference]) {
    for reference in references {
        let is_this = same_object(&reference.table, &structure.name);

        if is_this {
            match reference.operation {
                TableOperation::Insert => {
                    for src in co_resident_reads(reference, references) {
                        if same_object(&src.table, &structure.name) {
                            continue;
                        }
                        push_unique(
                            &mut structure.populated_from,
                            TempPopulation {
                                table_reference: src.table.clone(),
                                operation: "SELECT_INTO_TEMP".to_string(),
                                block_id: reference.block_id.clone(),
                            },
                        );
                    }
                }
                TableOperation::Select | TableOperation::MergeSource => {
                    push_unique(
                        &mut structure.used_in,
                        TempUsage {
                            operation: "SELECT_FROM_TEMP".to_string(),
                            target_table: None,
                            block_id: reference.block_id.clone(),
                        },
                    );
                }
                TableOperation::Update => structure.transformations.push(TempTransformation {
                    transformation_type: TempTransformationType::Update,
                    block_id: reference.block_id.clone(),
                    description: format!("Update columns: {}", reference.columns.join(", ")),
                }),
                TableOperation::Delete => structure.transformations.push(TempTransformation {
                    transformation_type: TempTransformationType::Filter,
                    block_id: reference.block_id.clone(),
                    description: "Delete/filter rows".to_string(),
                }),
                TableOperation::MergeTarget => structure.transformations.push(TempTransformation {
                    transformation_type: TempTransformationType::Merge,
                    block_id: reference.block_id.clone(),
                    description: "Merge rows".to_string(),
                }),
            }
            continue;
        }

        // Rows moving from this structure into a permanent table
        if reference.operation == TableOperation::Insert && !is_temp_name(&reference.table) {
            let feeds = co_resident_reads(reference, references)
                .iter()
                .any(|r| same_object(&r.table, &structure.name));
            if feeds {
                push_unique(
                    &mut structure.used_in,
                    TempUsage {
                        operation: format!("INSERT_INTO_{}", reference.table),
                        target_table: Some(reference.table.clone()),
                        block_id: reference.block_id.clone(),
                    },
                );
            }
        }
    }
}

/// SELECT references read alongside a write: the same statement first,
/// otherwise the same block.
fn co_resident_reads<'a>(
    write: &TableReference,
    references: &'a [TableReference],
) -> Vec<&'a TableReference> {
    let is_read =
        |r: &&TableReference| matches!(r.operation, TableOperation::Select | TableOperation::MergeSource);

    let same_statement: Vec<&TableReference> = references
        .iter()
        .filter(is_read)
        .filter(|r| r.statement == write.statement)
        .collect();
    if !same_statement.is_empty() || write.block_id.is_none() {
        return same_statement;
    }

    references
        .iter()
        .filter(is_read)
        .filter(|r| r.block_id == write.block_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::operations::detect_operations;
    use crate::analysis::structure::analyze_structure;

    fn temps(sql: &str) -> Vec<TempStructure> {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        detect_operations(&source, &blocks, &source.statement_spans()).temp_structures
    }

    #[test]
    fn test_create_temp_table_columns() {
        let found = temps(
            "CREATE TABLE #Work (Id INT NOT NULL, Amount decimal(10, 2), Name NVARCHAR(MAX), PRIMARY KEY (Id))",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "#Work");
        assert_eq!(found[0].temp_type, TempType::LocalTemp);
        assert_eq!(
            found[0].columns,
            vec![
                TempColumn { name: "Id".into(), data_type: "INT".into() },
                TempColumn { name: "Amount".into(), data_type: "DECIMAL(10,2)".into() },
                TempColumn { name: "Name".into(), data_type: "NVARCHAR(MAX)".into() },
            ]
        );
    }

    #[test]
    fn test_table_variable() {
        let found = temps("DECLARE @count INT = 0, @Ids AS TABLE (Id INT)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "@Ids");
        assert_eq!(found[0].temp_type, TempType::TableVariable);
        assert_eq!(found[0].columns.len(), 1);
    }

    #[test]
    fn test_select_into_creates_structure() {
        let found = temps("SELECT * INTO #Temp FROM Source; INSERT INTO Target SELECT * FROM #Temp;");
        assert_eq!(found.len(), 1);
        let temp = &found[0];
        assert_eq!(temp.name, "#Temp");
        assert_eq!(temp.temp_type, TempType::LocalTemp);
        assert_eq!(temp.populated_from.len(), 1);
        assert_eq!(temp.populated_from[0].table_reference, "Source");
        assert_eq!(temp.populated_from[0].operation, "SELECT_INTO_TEMP");
        assert!(temp
            .used_in
            .iter()
            .any(|u| u.operation == "INSERT_INTO_Target" && u.target_table.as_deref() == Some("Target")));
        assert!(temp.used_in.iter().any(|u| u.operation == "SELECT_FROM_TEMP"));
    }

    #[test]
    fn test_transformations() {
        let found = temps(
            "CREATE TABLE #t (Id INT, Flag BIT); UPDATE #t SET Flag = 1; DELETE FROM #t WHERE Flag = 0;",
        );
        let kinds: Vec<_> = found[0]
            .transformations
            .iter()
            .map(|t| t.transformation_type)
            .collect();
        assert_eq!(
            kinds,
            vec![TempTransformationType::Update, TempTransformationType::Filter]
        );
        assert_eq!(found[0].transformations[0].description, "Update columns: Flag");
    }

    #[test]
    fn test_definition_truncated() {
        let long = format!("CREATE TABLE #Wide ({})", (0..60).map(|i| format!("c{} INT", i)).collect::<Vec<_>>().join(", "));
        let found = temps(&long);
        assert!(found[0].definition.ends_with("..."));
        assert_eq!(found[0].definition.chars().count(), DEFINITION_LIMIT + 3);
    }

    #[test]
    fn test_permanent_table_is_not_temp() {
        assert!(temps("CREATE TABLE dbo.Real (Id INT)").is_empty());
    }
}
