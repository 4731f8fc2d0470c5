//! Dynamic SQL detection and best-effort reconstruction
//!
//! String variables are evaluated statement by statement: literals are
//! concatenated, references to already known variables are substituted and
//! any other expression becomes a single space. A variable whose value looks
//! like SQL is a *SQL container*. Every EXEC/EXECUTE yields one operation;
//! containers that are built but never executed yield a `STRING_BUILDING`
//! operation. The reconstructed text is only ever a guess, so every operation
//! carries `confidence: LOW`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;

use crate::analysis::{innermost_block, IdSequence};
use crate::model::{
    Confidence, ConstructionPattern, DynamicParameterUsage, DynamicSqlOperation,
    DynamicSqlParameter, LogicalBlock, PotentialQuery,
};
use crate::parser::identifier_utils::{normalize_identifier, unqualified};
use crate::parser::lexer::Lexeme;
use crate::parser::{SqlSource, StatementSpan};
use crate::util::{push_unique, truncate_chars};

const PATTERN_LIMIT: usize = 100;

static SQL_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|MERGE|FROM|WHERE|JOIN)\b").unwrap()
});

static DML_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|MERGE)\b").unwrap());

static FROM_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\s+([\w.\[\]#@]+)").unwrap());

static INTO_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINTO\s+([\w.\[\]#@]+)").unwrap());

static UPDATE_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUPDATE\s+([\w.\[\]#@]+)").unwrap());

/// Names after FROM that are not tables.
const PSEUDO_TABLES: &[&str] = &["DUAL", "SYSDATE"];

/// A variable whose evaluated value looks like SQL
#[derive(Debug, Clone)]
struct SqlContainer {
    name: String,
    value: String,
    /// Byte offset of the first SQL-bearing assignment
    offset: usize,
    executed: bool,
}

/// Running values of string variables, keyed by lowercase name.
#[derive(Debug, Default)]
struct VariableValues {
    values: HashMap<String, String>,
    containers: Vec<SqlContainer>,
}

impl VariableValues {
    fn get(&self, name: &str) -> Option<&String> {
        self.values.get(&name.to_ascii_lowercase())
    }

    fn container(&self, name: &str) -> Option<&SqlContainer> {
        self.containers
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn assign(&mut self, name: &str, expr: &[Lexeme], append: bool, offset: usize) {
        let mut value = if append {
            self.get(name).cloned().unwrap_or_default()
        } else {
            String::new()
        };
        let mut gap = false;
        for token in expr {
            if let Some(text) = token.string_value() {
                value.push_str(text);
                gap = false;
            } else if token.is(&Token::Plus) {
                continue;
            } else if let Some(known) = token.variable_name().and_then(|v| self.get(v)) {
                value.push_str(known);
                gap = false;
            } else if !gap {
                value.push(' ');
                gap = true;
            }
        }

        if SQL_TEXT_RE.is_match(&value) {
            match self
                .containers
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(name))
            {
                Some(existing) => existing.value = value.clone(),
                None => self.containers.push(SqlContainer {
                    name: name.to_string(),
                    value: value.clone(),
                    offset,
                    executed: false,
                }),
            }
        }
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    /// Track `DECLARE @v type = expr, ...` and `SET @v [+]= expr`.
    fn observe(&mut self, tokens: &[Lexeme]) {
        let Some(first) = tokens.first() else {
            return;
        };

        if first.is_keyword("DECLARE") {
            for item in split_declarators(&tokens[1..]) {
                let Some(name) = item.first().and_then(Lexeme::variable_name) else {
                    continue;
                };
                if let Some(eq) = item.iter().position(|t| t.is(&Token::Eq)) {
                    self.assign(name, &item[eq + 1..], false, item[0].start);
                }
            }
        } else if first.is_keyword("SET") {
            let Some(name) = tokens.get(1).and_then(Lexeme::variable_name) else {
                return;
            };
            match (tokens.get(2), tokens.get(3)) {
                (Some(op), Some(eq)) if is_compound_op(op) && eq.is(&Token::Eq) => {
                    self.assign(name, &tokens[4..], true, tokens[1].start);
                }
                (Some(eq), _) if eq.is(&Token::Eq) => {
                    self.assign(name, &tokens[3..], false, tokens[1].start);
                }
                _ => {}
            }
        }
    }
}

/// `+=` arrives as two tokens.
fn is_compound_op(token: &Lexeme) -> bool {
    token.is(&Token::Plus)
}

/// Declarators of a DECLARE, split on depth-0 commas.
fn split_declarators(tokens: &[Lexeme]) -> Vec<&[Lexeme]> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.is(&Token::LParen) {
            depth += 1;
        } else if token.is(&Token::RParen) {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && (token.is(&Token::Comma) || token.is(&Token::SemiColon)) {
            items.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        items.push(&tokens[start..]);
    }
    items
}

/// First EXEC/EXECUTE in a statement that runs something (not `EXECUTE AS`).
fn find_exec(tokens: &[Lexeme]) -> Option<usize> {
    tokens.iter().enumerate().position(|(i, t)| {
        t.is_any_keyword(&["EXEC", "EXECUTE"])
            && !tokens.get(i + 1).is_some_and(|n| n.is_keyword("AS"))
    })
}

fn classify_exec(tokens: &[Lexeme], exec: usize) -> ConstructionPattern {
    let calls_executesql = tokens[exec + 1..].iter().any(|t| {
        t.word()
            .is_some_and(|w| unqualified(&w.value).eq_ignore_ascii_case("sp_executesql"))
    });
    if calls_executesql {
        ConstructionPattern::SpExecutesql
    } else if tokens.get(exec + 1).is_some_and(|t| t.is(&Token::LParen)) {
        ConstructionPattern::DirectExec
    } else {
        ConstructionPattern::ExecStatement
    }
}

/// Tables and DML verbs mentioned in reconstructed SQL; `None` when no verb.
pub fn analyze_embedded_sql(text: &str) -> Option<PotentialQuery> {
    let mut operations: Vec<String> = Vec::new();
    for m in DML_RE.find_iter(text) {
        push_unique(&mut operations, m.as_str().to_ascii_uppercase());
    }
    if operations.is_empty() {
        return None;
    }
    let order = ["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE"];
    operations.sort_by_key(|op| order.iter().position(|o| o == op));

    let mut tables: Vec<String> = Vec::new();
    for re in [&*FROM_TABLE_RE, &*INTO_TABLE_RE, &*UPDATE_TABLE_RE] {
        for cap in re.captures_iter(text) {
            let name = cap[1]
                .split('.')
                .map(normalize_identifier)
                .collect::<Vec<_>>()
                .join(".");
            let is_pseudo = PSEUDO_TABLES.iter().any(|p| name.eq_ignore_ascii_case(p));
            if !name.is_empty() && !is_pseudo && !name.starts_with('@') {
                push_unique(&mut tables, name);
            }
        }
    }

    Some(PotentialQuery {
        pattern: truncate_chars(text.trim(), PATTERN_LIMIT),
        potential_tables: tables,
        potential_operations: operations,
    })
}

/// Detect dynamic SQL operations in statement order.
pub fn detect_dynamic_sql(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    spans: &[StatementSpan],
) -> Vec<DynamicSqlOperation> {
    let mut values = VariableValues::default();
    let mut operations = Vec::new();

    for span in spans {
        let tokens = &source.sig()[span.first..span.last];
        values.observe(tokens);

        let Some(exec) = find_exec(tokens) else {
            continue;
        };
        let construction_pattern = classify_exec(tokens, exec);
        let args = &tokens[exec + 1..];

        let mut parameters: Vec<DynamicSqlParameter> = Vec::new();
        let mut potential_queries: Vec<PotentialQuery> = Vec::new();

        for token in args {
            if let Some(text) = token.string_value() {
                if let Some(query) = analyze_embedded_sql(text) {
                    push_unique(&mut potential_queries, query);
                }
            }
            let Some(name) = token.variable_name() else {
                continue;
            };
            if parameters.iter().any(|p| p.name.eq_ignore_ascii_case(name)) {
                continue;
            }
            let usage = match values.container(name) {
                Some(container) => {
                    if let Some(query) = analyze_embedded_sql(&container.value) {
                        push_unique(&mut potential_queries, query);
                    }
                    DynamicParameterUsage::SqlContainer
                }
                None => DynamicParameterUsage::Parameter,
            };
            parameters.push(DynamicSqlParameter {
                name: name.to_string(),
                usage,
            });
        }

        for p in &parameters {
            if p.usage == DynamicParameterUsage::SqlContainer {
                if let Some(c) = values
                    .containers
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(&p.name))
                {
                    c.executed = true;
                }
            }
        }

        let offset = tokens[exec].start;
        operations.push(DynamicSqlOperation {
            id: String::new(),
            block_id: innermost_block(blocks, offset, tokens[exec].end).map(|b| b.id.clone()),
            construction_pattern,
            parameters,
            potential_queries,
            confidence: Confidence::Low,
            offset,
        });
    }

    for container in values.containers.iter().filter(|c| !c.executed) {
        operations.push(DynamicSqlOperation {
            id: String::new(),
            block_id: innermost_block(blocks, container.offset, container.offset + container.name.len())
                .map(|b| b.id.clone()),
            construction_pattern: ConstructionPattern::StringBuilding,
            parameters: vec![DynamicSqlParameter {
                name: container.name.clone(),
                usage: DynamicParameterUsage::SqlContainer,
            }],
            potential_queries: analyze_embedded_sql(&container.value).into_iter().collect(),
            confidence: Confidence::Low,
            offset: container.offset,
        });
    }

    operations.sort_by_key(|op| op.offset);
    let mut ids = IdSequence::new("dsql");
    for op in &mut operations {
        op.id = ids.next_id();
    }
    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::structure::analyze_structure;

    fn detect(sql: &str) -> Vec<DynamicSqlOperation> {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        detect_dynamic_sql(&source, &blocks, &source.statement_spans())
    }

    #[test]
    fn test_declared_sql_executed_directly() {
        let ops = detect("DECLARE @sql NVARCHAR(MAX) = 'SELECT * FROM Orders'; EXEC(@sql)");
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.id, "dsql_0");
        assert_eq!(op.construction_pattern, ConstructionPattern::DirectExec);
        assert_eq!(op.confidence, Confidence::Low);
        assert_eq!(op.parameters[0].name, "@sql");
        assert_eq!(op.parameters[0].usage, DynamicParameterUsage::SqlContainer);
        assert_eq!(op.potential_queries[0].potential_tables, vec!["Orders"]);
        assert_eq!(op.potential_queries[0].potential_operations, vec!["SELECT"]);
    }

    #[test]
    fn test_sp_executesql_with_concatenation() {
        let ops = detect(
            "CREATE PROC p @Id INT AS
             DECLARE @sql NVARCHAR(MAX)
             SET @sql = N'SELECT Name FROM dbo.Customers'
             SET @sql += N' WHERE Id = ' + CAST(@Id AS NVARCHAR(10))
             EXEC sp_executesql @sql, N'@Id INT', @Id = @Id",
        );
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].construction_pattern, ConstructionPattern::SpExecutesql);
        let names: Vec<_> = ops[0].parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@sql", "@Id"]);
        assert_eq!(ops[0].parameters[1].usage, DynamicParameterUsage::Parameter);
        let query = &ops[0].potential_queries[0];
        assert!(query.pattern.starts_with("SELECT Name FROM dbo.Customers WHERE Id ="));
        assert_eq!(query.potential_tables, vec!["dbo.Customers"]);
    }

    #[test]
    fn test_plain_procedure_call() {
        let ops = detect("EXEC dbo.usp_Audit @Action = 'run'");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].construction_pattern, ConstructionPattern::ExecStatement);
        assert!(ops[0].potential_queries.is_empty());
    }

    #[test]
    fn test_unexecuted_container_is_string_building() {
        let ops = detect("DECLARE @q VARCHAR(200); SET @q = 'DELETE FROM Staging'; PRINT @q");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].construction_pattern, ConstructionPattern::StringBuilding);
        assert_eq!(ops[0].potential_queries[0].potential_operations, vec!["DELETE"]);
        assert_eq!(ops[0].potential_queries[0].potential_tables, vec!["Staging"]);
    }

    #[test]
    fn test_execute_as_is_not_dynamic() {
        assert!(detect("EXECUTE AS USER = 'x'; REVERT;").is_empty());
    }

    #[test]
    fn test_embedded_sql_requires_verb() {
        assert!(analyze_embedded_sql("WHERE a = 1").is_none());
        let q = analyze_embedded_sql("INSERT INTO [Audit] SELECT * FROM dual").unwrap();
        assert_eq!(q.potential_tables, vec!["Audit"]);
        assert_eq!(q.potential_operations, vec!["SELECT", "INSERT"]);
    }

    #[test]
    fn test_ids_follow_source_order() {
        let ops = detect("SET @a = 'SELECT 1 FROM A'; EXEC sp_who; EXEC(@b)");
        let ids: Vec<_> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["dsql_0", "dsql_1", "dsql_2"]);
        assert_eq!(ops[0].construction_pattern, ConstructionPattern::StringBuilding);
    }
}
