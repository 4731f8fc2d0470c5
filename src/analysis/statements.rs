//! Statement classification
//!
//! Every statement span gets a `(purpose, subPurpose)` pair from a decision
//! list keyed on its leading keyword, followed by a refinement pass that may
//! pick a more specific sub-purpose but never changes the purpose.
//!
//! ## Decision list
//!
//! ```sql
//! SELECT @v = ... / SELECT ... INTO   -- RETRIEVAL / VARIABLE_ASSIGNMENT | RESULT_SET
//! SELECT COUNT(*) ...                 -- RETRIEVAL / AGGREGATION
//! INSERT ... SELECT                   -- PERSISTENCE / BULK_INSERT
//! CREATE TABLE #t                     -- STRUCTURE / TEMP_TABLE_CREATION
//! DECLARE c CURSOR FOR ...            -- VARIABLE / CURSOR_DECLARATION
//! SET NOCOUNT ON                      -- VARIABLE / SESSION_SETTING
//! IF EXISTS (...)                     -- CONTROL_FLOW / EXISTENCE_CHECK
//! BEGIN TRAN                          -- TRANSACTION_CONTROL / BEGIN_TRANSACTION
//! EXEC sp_executesql @sql             -- EXECUTION / DYNAMIC_SQL
//! ```

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;
use tracing::debug;

use super::data_flow::extract_transformations;
use super::{clause_end, innermost_block, known_tables, IdSequence};
use crate::model::{
    BlockType, LogicalBlock, Statement, StatementPurpose, SubPurpose, TableOperation, TableReference,
    Transformation,
};
use crate::parser::lexer::Lexeme;
use crate::parser::{SqlSource, StatementSpan};
use crate::util::{collapse_whitespace, contains_ci, contains_word_ci, is_ident_byte, push_unique};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)GETDATE|SYSDATETIME|DATEADD|DATEDIFF|DATE\b|\bDATE").unwrap()
});

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBETWEEN\b|[<>]=?").unwrap());

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\w*STATUS\w*\s*(?:=|<>|!=|\bIN\b)").unwrap());

static ID_LOOKUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\w*ID\s*=").unwrap());

static VARIABLE_COMPARISON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+\s*[<>=!]").unwrap());

static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\s+").unwrap());

const WHERE_END: &[&str] = &[
    "GROUP", "ORDER", "HAVING", "UNION", "EXCEPT", "INTERSECT", "OPTION", "OUTPUT", "FOR",
];

const DML_VERBS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE"];

const LOGGING_WORDS: &[&str] = &["LOG", "AUDIT", "HISTORY"];

/// Classify every statement outside the procedure header.
pub fn classify_statements(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    table_references: &[TableReference],
    spans: &[StatementSpan],
) -> Vec<Statement> {
    let tables = known_tables(table_references);
    let mut ids = IdSequence::new("stmt");
    let mut statements = Vec::with_capacity(spans.len());

    for (idx, span) in spans.iter().enumerate() {
        let tokens = &source.sig()[span.first..span.last];
        if tokens.is_empty() {
            continue;
        }
        let (start, end) = source.span_bytes(span.first, span.last);
        let masked = &source.masked()[start..end];
        let code = &source.code()[start..end];

        let statement_refs: Vec<&TableReference> =
            table_references.iter().filter(|r| r.statement == idx).collect();

        let (purpose, sub_purpose) = classify(tokens, code);
        let sub_purpose = refine(
            purpose,
            sub_purpose,
            &StatementContext {
                tokens,
                code,
                references: &statement_refs,
                body: if_body(source, blocks, start),
            },
        );

        statements.push(Statement {
            statement_id: ids.next_id(),
            block_id: innermost_block(blocks, start, end).map(|b| b.id.clone()),
            line_range: [source.line_of(start), source.line_of(end.saturating_sub(1).max(start))],
            statement_text: source.text()[start..end].trim().to_string(),
            purpose,
            sub_purpose,
            affected_entities: affected_entities(masked, tokens, &tables),
            conditions: extract_conditions(tokens, masked, code),
            tokens: (span.first, span.last),
            span: (start, end),
        });
    }

    debug!("Classified {} statements", statements.len());
    statements
}

// =============================================================================
// Decision list
// =============================================================================

/// Leading keyword; a CTE classifies by its main DML verb.
fn leader(tokens: &[Lexeme]) -> String {
    let first = tokens[0].keyword_upper().unwrap_or_default();
    if first != "WITH" {
        return first;
    }
    let mut depth = 0usize;
    for token in tokens {
        match token.token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if let Some(verb) = DML_VERBS.iter().find(|v| token.is_keyword(v)) {
                    return verb.to_string();
                }
            }
            _ => {}
        }
    }
    first
}

/// Depth-0 tokens of the statement.
fn top_level(tokens: &[Lexeme]) -> impl Iterator<Item = &Lexeme> {
    let mut depth = 0usize;
    tokens.iter().filter(move |t| {
        match t.token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.saturating_sub(1);
                return false;
            }
            _ => {}
        }
        depth == 0
    })
}

fn has_keyword(tokens: &[Lexeme], keyword: &str) -> bool {
    tokens.iter().any(|t| t.is_keyword(keyword))
}

/// `SELECT @v = ...` at the start of the select list.
fn assigns_variable(tokens: &[Lexeme]) -> bool {
    tokens.get(1).is_some_and(|t| t.variable_name().is_some())
        && tokens.get(2).is_some_and(|t| t.is(&Token::Eq))
}

fn is_aggregate_call(tokens: &[Lexeme], i: usize) -> bool {
    tokens[i].is_any_keyword(&["COUNT", "SUM", "AVG"])
        && tokens.get(i + 1).is_some_and(|t| t.is(&Token::LParen))
}

fn classify(tokens: &[Lexeme], code: &str) -> (StatementPurpose, SubPurpose) {
    use StatementPurpose as P;
    use SubPurpose as S;

    let second = tokens.get(1);
    match leader(tokens).as_str() {
        "SELECT" => {
            let into = top_level(tokens).any(|t| t.is_keyword("INTO"));
            if assigns_variable(tokens) {
                (P::Retrieval, S::VariableAssignment)
            } else if into {
                (P::Retrieval, S::ResultSet)
            } else if (0..tokens.len()).any(|i| is_aggregate_call(tokens, i)) {
                (P::Retrieval, S::Aggregation)
            } else if has_keyword(tokens, "JOIN") {
                (P::Retrieval, S::JoinQuery)
            } else {
                (P::Retrieval, S::SimpleQuery)
            }
        }
        "INSERT" => {
            if has_keyword(tokens, "SELECT") {
                (P::Persistence, S::BulkInsert)
            } else {
                (P::Persistence, S::SingleInsert)
            }
        }
        "UPDATE" => (P::Persistence, S::Update),
        "DELETE" => (P::Persistence, S::Delete),
        "MERGE" => (P::Persistence, S::Merge),
        "TRUNCATE" => (P::Persistence, S::Truncate),
        "CREATE" => {
            let kind = tokens
                .iter()
                .skip(1)
                .take(3)
                .find(|t| t.is_any_keyword(&["TABLE", "INDEX"]));
            match kind {
                Some(t) if t.is_keyword("TABLE") => {
                    let temp = tokens
                        .iter()
                        .skip_while(|t| !t.is_keyword("TABLE"))
                        .nth(1)
                        .and_then(|n| n.word())
                        .is_some_and(|w| w.value.starts_with('#'));
                    if temp {
                        (P::Structure, S::TempTableCreation)
                    } else {
                        (P::Structure, S::TableCreation)
                    }
                }
                Some(_) => (P::Structure, S::IndexCreation),
                None => (P::Structure, S::ObjectCreation),
            }
        }
        "ALTER" => (P::Structure, S::ObjectModification),
        "DROP" => (P::Structure, S::ObjectDeletion),
        "DECLARE" => {
            if top_level(tokens).any(|t| t.is_keyword("TABLE")) {
                (P::Variable, S::TableVariable)
            } else if top_level(tokens).any(|t| t.is_keyword("CURSOR")) {
                (P::Variable, S::CursorDeclaration)
            } else {
                (P::Variable, S::VariableDeclaration)
            }
        }
        "SET" => {
            if second.is_some_and(|t| t.variable_name().is_some()) {
                (P::Variable, S::VariableAssignment)
            } else {
                (P::Variable, S::SessionSetting)
            }
        }
        "IF" => {
            if has_keyword(tokens, "EXISTS") {
                (P::ControlFlow, S::ExistenceCheck)
            } else if has_keyword(tokens, "NULL") {
                (P::ControlFlow, S::NullCheck)
            } else if VARIABLE_COMPARISON_RE.is_match(code) {
                (P::ControlFlow, S::VariableCondition)
            } else {
                (P::ControlFlow, S::GeneralCondition)
            }
        }
        "WHILE" => (P::ControlFlow, S::Loop),
        "RETURN" => (P::ControlFlow, S::ProcedureExit),
        "BEGIN" => match second {
            Some(t) if t.is_any_keyword(&["TRAN", "TRANSACTION", "DISTRIBUTED"]) => {
                (P::TransactionControl, S::BeginTransaction)
            }
            Some(t) if t.is_keyword("TRY") => (P::ErrorHandling, S::TryBlock),
            Some(t) if t.is_keyword("CATCH") => (P::ErrorHandling, S::CatchBlock),
            _ => (P::ControlFlow, S::BlockStructure),
        },
        "COMMIT" => (P::TransactionControl, S::CommitTransaction),
        "ROLLBACK" => (P::TransactionControl, S::RollbackTransaction),
        "EXEC" | "EXECUTE" => {
            let dynamic = second.is_some_and(|t| {
                t.is(&Token::LParen)
                    || t.word().is_some_and(|w| {
                        w.value.to_ascii_lowercase().ends_with("sp_executesql")
                    })
            });
            if dynamic {
                (P::Execution, S::DynamicSql)
            } else {
                (P::Execution, S::ProcedureCall)
            }
        }
        "OPEN" | "FETCH" | "CLOSE" | "DEALLOCATE" => (P::Execution, S::CursorOperation),
        "THROW" | "RAISERROR" => (P::ErrorHandling, S::ErrorRaising),
        "PRINT" => (P::Auxiliary, S::MessageOutput),
        _ => (P::Auxiliary, S::Other),
    }
}

// =============================================================================
// Refinement
// =============================================================================

struct StatementContext<'a> {
    tokens: &'a [Lexeme],
    code: &'a str,
    references: &'a [&'a TableReference],
    /// Masked text of the IF block this statement heads, if any
    body: Option<&'a str>,
}

/// The IF block that starts at `start`, as comment-masked text.
fn if_body<'a>(source: &'a SqlSource, blocks: &[LogicalBlock], start: usize) -> Option<&'a str> {
    blocks
        .iter()
        .filter(|b| b.span.0 == start && b.block_type == BlockType::If)
        .min_by_key(|b| b.len())
        .map(|b| &source.masked()[b.span.0..b.span.1])
}

/// Narrow the sub-purpose; the purpose itself is fixed.
fn refine(purpose: StatementPurpose, sub_purpose: SubPurpose, ctx: &StatementContext<'_>) -> SubPurpose {
    use StatementPurpose as P;
    use SubPurpose as S;

    match purpose {
        P::Retrieval => {
            let Some(m) = WHERE_RE.find(ctx.code) else {
                return sub_purpose;
            };
            let filter = &ctx.code[m.end()..];
            if RANGE_RE.is_match(filter) && DATE_RE.is_match(filter) {
                S::DateRangeFilter
            } else if STATUS_RE.is_match(filter) {
                S::StatusCheck
            } else if ID_LOOKUP_RE.is_match(filter) {
                S::IdLookup
            } else {
                sub_purpose
            }
        }
        P::Variable if sub_purpose == S::VariableAssignment => {
            let Some(eq) = ctx.tokens.iter().position(|t| t.is(&Token::Eq)) else {
                return sub_purpose;
            };
            let compound = eq > 0 && is_arithmetic(&ctx.tokens[eq - 1]);
            let expr = &ctx.tokens[eq + 1..];
            let has_string = expr.iter().any(|t| t.string_value().is_some());
            let concatenates = compound || expr.iter().any(|t| t.is(&Token::Plus));
            if has_string && concatenates {
                S::StringBuilding
            } else if compound || expr.iter().any(is_arithmetic) {
                S::Calculation
            } else {
                sub_purpose
            }
        }
        P::Persistence if matches!(sub_purpose, S::SingleInsert | S::BulkInsert) => {
            let logs = ctx
                .references
                .iter()
                .filter(|r| r.operation == TableOperation::Insert)
                .any(|r| LOGGING_WORDS.iter().any(|w| contains_ci(&r.table, w)));
            if logs {
                S::Logging
            } else {
                sub_purpose
            }
        }
        P::ControlFlow if ctx.tokens[0].is_keyword("IF") => {
            let exits = ctx.body.is_some_and(|body| {
                ["RETURN", "THROW", "RAISERROR"]
                    .iter()
                    .any(|w| contains_word_ci(body, w))
            });
            if exits {
                S::Validation
            } else {
                sub_purpose
            }
        }
        _ => sub_purpose,
    }
}

fn is_arithmetic(token: &Lexeme) -> bool {
    matches!(
        token.token,
        Token::Plus | Token::Minus | Token::Mul | Token::Div | Token::Mod
    )
}

// =============================================================================
// Entities and conditions
// =============================================================================

/// Known tables named in the statement, then its `@variables` in order.
fn affected_entities(masked: &str, tokens: &[Lexeme], tables: &[String]) -> Vec<String> {
    let mut entities = Vec::new();
    for table in tables {
        if contains_word_ci(masked, table) {
            push_unique(&mut entities, table.clone());
        }
    }
    for token in tokens {
        if let Some(var) = token.variable_name() {
            push_unique(&mut entities, var.to_string());
        }
    }
    entities
}

/// WHERE, IF/WHILE and JOIN ... ON conditions split into atomic clauses.
fn extract_conditions(tokens: &[Lexeme], masked: &str, code: &str) -> Vec<String> {
    let mut conditions = Vec::new();

    for m in WHERE_RE.find_iter(code) {
        let end = clause_end(code, m.end(), WHERE_END);
        conditions.extend(split_conditions(&masked[m.end()..end]));
    }

    if tokens[0].is_any_keyword(&["IF", "WHILE"]) {
        let keyword_len = tokens[0].end - tokens[0].start;
        conditions.extend(split_conditions(&masked[keyword_len..]));
    }

    for transformation in extract_transformations(masked, code) {
        if let Transformation::Join {
            join_condition: Some(condition),
            ..
        } = transformation
        {
            conditions.extend(split_conditions(&condition));
        }
    }

    conditions
}

/// Split on AND/OR outside parentheses, quotes and `BETWEEN x AND y`.
pub fn split_conditions(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut pending_between = false;
    let mut part_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => in_string = true,
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b if b.is_ascii_alphabetic() && (i == 0 || !is_ident_byte(bytes[i - 1])) => {
                let end = (i..bytes.len())
                    .find(|&j| !is_ident_byte(bytes[j]))
                    .unwrap_or(bytes.len());
                let word = &text[i..end];
                if depth == 0 {
                    if word.eq_ignore_ascii_case("BETWEEN") {
                        pending_between = true;
                    } else if word.eq_ignore_ascii_case("AND") && pending_between {
                        pending_between = false;
                    } else if word.eq_ignore_ascii_case("AND") || word.eq_ignore_ascii_case("OR") {
                        parts.push(&text[part_start..i]);
                        part_start = end;
                    }
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&text[part_start..]);

    parts
        .into_iter()
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::operations::detect_operations;
    use crate::analysis::structure::analyze_structure;

    fn classify_all(sql: &str) -> Vec<Statement> {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        let spans = source.statement_spans();
        let ops = detect_operations(&source, &blocks, &spans);
        classify_statements(&source, &blocks, &ops.table_references, &spans)
    }

    fn kinds(sql: &str) -> Vec<(StatementPurpose, SubPurpose)> {
        classify_all(sql)
            .into_iter()
            .map(|s| (s.purpose, s.sub_purpose))
            .collect()
    }

    // ========================================================================
    // Decision list
    // ========================================================================

    #[test]
    fn test_retrieval_kinds() {
        use StatementPurpose::Retrieval;
        assert_eq!(
            kinds(
                "SELECT @n = Name FROM Users;
                 SELECT * INTO #T FROM Users;
                 SELECT COUNT(*) FROM Users;
                 SELECT a FROM X JOIN Y ON X.k = Y.k;
                 SELECT 1;"
            ),
            vec![
                (Retrieval, SubPurpose::VariableAssignment),
                (Retrieval, SubPurpose::ResultSet),
                (Retrieval, SubPurpose::Aggregation),
                (Retrieval, SubPurpose::JoinQuery),
                (Retrieval, SubPurpose::SimpleQuery),
            ]
        );
    }

    #[test]
    fn test_persistence_and_structure() {
        use StatementPurpose::{Persistence, Structure};
        assert_eq!(
            kinds(
                "INSERT INTO T (a) VALUES (1);
                 INSERT INTO T (a) SELECT a FROM S;
                 CREATE TABLE #Work (Id INT);
                 CREATE NONCLUSTERED INDEX IX ON T (a);
                 DROP TABLE #Work;"
            ),
            vec![
                (Persistence, SubPurpose::SingleInsert),
                (Persistence, SubPurpose::BulkInsert),
                (Structure, SubPurpose::TempTableCreation),
                (Structure, SubPurpose::IndexCreation),
                (Structure, SubPurpose::ObjectDeletion),
            ]
        );
    }

    #[test]
    fn test_cte_classifies_by_main_verb() {
        assert_eq!(
            kinds("WITH c AS (SELECT Id FROM S) UPDATE T SET x = 1 FROM c WHERE T.Id = c.Id;"),
            vec![(StatementPurpose::Persistence, SubPurpose::Update)]
        );
    }

    #[test]
    fn test_control_and_transactions() {
        let result = kinds(
            "CREATE PROC p AS
             BEGIN TRAN
             IF EXISTS (SELECT 1 FROM T) SET @x = 1
             WHILE @i < 10 SET @i = @i + 1
             COMMIT
             EXEC sp_executesql @sql
             EXEC dbo.Other",
        );
        assert_eq!(
            result,
            vec![
                (StatementPurpose::TransactionControl, SubPurpose::BeginTransaction),
                (StatementPurpose::ControlFlow, SubPurpose::ExistenceCheck),
                (StatementPurpose::Variable, SubPurpose::VariableAssignment),
                (StatementPurpose::ControlFlow, SubPurpose::Loop),
                (StatementPurpose::Variable, SubPurpose::Calculation),
                (StatementPurpose::TransactionControl, SubPurpose::CommitTransaction),
                (StatementPurpose::Execution, SubPurpose::DynamicSql),
                (StatementPurpose::Execution, SubPurpose::ProcedureCall),
            ]
        );
    }

    // ========================================================================
    // Refinement
    // ========================================================================

    #[test]
    fn test_refinement_narrows_sub_purpose() {
        let result = kinds(
            "SELECT * FROM Orders WHERE OrderDate >= DATEADD(day, -7, GETDATE());
             SELECT * FROM Orders WHERE Status = 'OPEN';
             SELECT * FROM Orders WHERE CustomerId = @id;
             SET @msg = 'Total: ' + @total;
             INSERT INTO AuditLog (Msg) VALUES (@msg);",
        );
        assert_eq!(
            result,
            vec![
                (StatementPurpose::Retrieval, SubPurpose::DateRangeFilter),
                (StatementPurpose::Retrieval, SubPurpose::StatusCheck),
                (StatementPurpose::Retrieval, SubPurpose::IdLookup),
                (StatementPurpose::Variable, SubPurpose::StringBuilding),
                (StatementPurpose::Persistence, SubPurpose::Logging),
            ]
        );
    }

    #[test]
    fn test_validation_if() {
        let result = kinds(
            "CREATE PROC p @id INT AS
             IF @id IS NULL
             BEGIN
                 RAISERROR('missing', 16, 1)
                 RETURN
             END",
        );
        assert_eq!(result[0], (StatementPurpose::ControlFlow, SubPurpose::Validation));
        assert_eq!(result[1].1, SubPurpose::ErrorRaising);
        assert_eq!(result[2].1, SubPurpose::ProcedureExit);
    }

    // ========================================================================
    // Entities and conditions
    // ========================================================================

    #[test]
    fn test_statement_fields() {
        let statements = classify_all(
            "CREATE PROC p @id INT AS
             SELECT o.Id FROM Orders o
             INNER JOIN Customers c ON c.Id = o.CustomerId AND c.Active = 1
             WHERE o.Id = @id AND o.Total BETWEEN 1 AND 10 OR o.Flag = 1",
        );
        assert_eq!(statements.len(), 1);
        let stmt = &statements[0];
        assert_eq!(stmt.statement_id, "stmt_0");
        assert_eq!(stmt.block_id.as_deref(), Some("block_0"));
        assert_eq!(stmt.line_range, [1, 3]);
        assert_eq!(stmt.affected_entities, vec!["Orders", "Customers", "@id"]);
        assert_eq!(
            stmt.conditions,
            vec![
                "o.Id = @id",
                "o.Total BETWEEN 1 AND 10",
                "o.Flag = 1",
                "c.Id = o.CustomerId",
                "c.Active = 1",
            ]
        );
    }

    #[test]
    fn test_if_header_conditions() {
        let statements = classify_all("IF @a > 1 AND (@b = 2 OR @c = 3) SELECT 1");
        assert_eq!(statements[0].conditions, vec!["@a > 1", "(@b = 2 OR @c = 3)"]);
        assert_eq!(statements[0].sub_purpose, SubPurpose::VariableCondition);
    }

    #[test]
    fn test_split_conditions_respects_quotes() {
        assert_eq!(
            split_conditions("Name = 'Tom AND Jerry' OR x = 1"),
            vec!["Name = 'Tom AND Jerry'", "x = 1"]
        );
    }
}
