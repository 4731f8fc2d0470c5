//! Parameter usage tracking and test-value synthesis
//!
//! Every occurrence of a declared parameter in the body is classified by the
//! clause it sits in. String literals are searched too, since parameters
//! referenced from dynamic SQL only appear inside the string.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;
use tracing::debug;

use super::innermost_block;
use crate::model::{
    DependencyKind, LogicalBlock, ParameterDependency, ParameterInfo, ParameterOccurrence,
    ParameterUsage, ProcedureMetadata, Statement, SuggestedValue, TestCondition,
    TestValueCandidate, UsageType, ValuePurpose,
};
use crate::parser::identifier_utils::{normalize_identifier, unqualified};
use crate::parser::lexer::Lexeme;
use crate::parser::SqlSource;
use crate::util::{context_window, contains_word_ci, find_word_ci, push_unique};

static LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\s*'([^']*)'|=\s*(\d+)").unwrap());

static IN_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIN\s*\(([^()]*)\)").unwrap());

static MAX_LENGTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CHAR\((\d+)\)").unwrap());

/// Keywords that open the clause a parameter occurrence belongs to.
const CLAUSE_WORDS: &[&str] = &[
    "WHERE", "ON", "JOIN", "HAVING", "ORDER", "GROUP", "TOP", "OFFSET", "FETCH", "VALUES",
    "SET", "SELECT", "FROM", "INTO", "USING", "OUTPUT",
];

/// Usage, test values and dependencies of the declared parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterAnalysis {
    pub usage: Vec<ParameterUsage>,
    pub test_values: Vec<TestValueCandidate>,
    pub dependencies: Vec<ParameterDependency>,
}

/// Track every declared parameter through the body.
pub fn track_parameters(
    source: &SqlSource,
    metadata: &ProcedureMetadata,
    blocks: &[LogicalBlock],
    statements: &[Statement],
) -> ParameterAnalysis {
    let usage: Vec<ParameterUsage> = metadata
        .parameters
        .iter()
        .map(|param| {
            let occurrences = find_occurrences(source, blocks, statements, &param.name);
            ParameterUsage {
                parameter_name: param.name.clone(),
                parameter_type: param.data_type.clone(),
                default_value: param.default_value.clone(),
                usage_pattern: usage_pattern(&occurrences),
                occurrences,
            }
        })
        .collect();

    let test_values = metadata
        .parameters
        .iter()
        .zip(&usage)
        .map(|(param, usage)| test_value_candidate(param, usage))
        .collect();

    let dependencies = parameter_dependencies(&usage, statements);

    debug!(
        "Tracked {} parameters ({} dependencies)",
        usage.len(),
        dependencies.len()
    );

    ParameterAnalysis {
        usage,
        test_values,
        dependencies,
    }
}

// =============================================================================
// Occurrences
// =============================================================================

fn find_occurrences(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    statements: &[Statement],
    name: &str,
) -> Vec<ParameterOccurrence> {
    let mut occurrences = Vec::new();

    for (k, token) in source.sig().iter().enumerate() {
        if source.in_header(token.start) {
            continue;
        }

        if token
            .variable_name()
            .is_some_and(|v| v.eq_ignore_ascii_case(name))
        {
            let statement = statements
                .iter()
                .position(|s| s.tokens.0 <= k && k < s.tokens.1);
            let (usage, entity, condition) = match statement {
                Some(idx) => {
                    let stmt = &statements[idx];
                    let tokens = &source.sig()[stmt.tokens.0..stmt.tokens.1];
                    let at = k - stmt.tokens.0;
                    (
                        classify_usage(tokens, at),
                        affected_entity(source, stmt, tokens, at),
                        occurrence_condition(stmt, name),
                    )
                }
                None => (UsageType::OtherUsage, None, None),
            };
            occurrences.push(occurrence(
                source, blocks, token.start, token.end, usage, entity, condition, statement,
            ));
        } else if token.string_value().is_some() {
            let raw = &source.text()[token.start..token.end];
            for hit in find_word_ci(raw, name) {
                let start = token.start + hit;
                let statement = statements
                    .iter()
                    .position(|s| s.span.0 <= start && start < s.span.1);
                occurrences.push(occurrence(
                    source,
                    blocks,
                    start,
                    start + name.len(),
                    UsageType::DynamicSqlParameter,
                    None,
                    None,
                    statement,
                ));
            }
        }
    }
    occurrences
}

#[allow(clippy::too_many_arguments)]
fn occurrence(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    start: usize,
    end: usize,
    usage: UsageType,
    entity: Option<String>,
    condition: Option<String>,
    statement: Option<usize>,
) -> ParameterOccurrence {
    ParameterOccurrence {
        block_id: innermost_block(blocks, start, end).map(|b| b.id.clone()),
        line_number: source.line_of(start),
        usage,
        context: context_window(source.text(), start, end, 50, 50).to_string(),
        entity,
        condition,
        statement,
    }
}

/// Nearest clause keyword before token `at`.
fn enclosing_clause(tokens: &[Lexeme], at: usize) -> Option<String> {
    tokens[..at]
        .iter()
        .rev()
        .find(|t| t.is_any_keyword(CLAUSE_WORDS))
        .and_then(|t| t.keyword_upper())
}

fn is_comparison(token: &Token) -> bool {
    matches!(
        token,
        Token::Eq | Token::Neq | Token::Lt | Token::Gt | Token::LtEq | Token::GtEq
    )
}

/// Classify the occurrence at `tokens[at]` by clause and adjacent operator.
///
/// Checks run in priority order: filter, join, sort/group/having,
/// pagination, insert/update values, conditionals, return, exec,
/// declarations and assignments.
fn classify_usage(tokens: &[Lexeme], at: usize) -> UsageType {
    let leader = tokens[0].keyword_upper().unwrap_or_default();
    let clause = enclosing_clause(tokens, at).unwrap_or_default();
    let prev = at.checked_sub(1).map(|i| &tokens[i]);
    let next = tokens.get(at + 1);

    match clause.as_str() {
        "WHERE" => return filter_usage(tokens, at),
        "ON" => return UsageType::JoinCondition,
        "JOIN" => return UsageType::JoinOther,
        "ORDER" => return UsageType::SortParameter,
        "GROUP" => return UsageType::GroupParameter,
        "HAVING" => return UsageType::HavingCondition,
        "TOP" | "FETCH" => return UsageType::PaginationLimit,
        "OFFSET" => return UsageType::PaginationOffset,
        _ => {}
    }

    if leader == "INSERT" && matches!(clause.as_str(), "VALUES" | "SELECT") {
        return UsageType::InsertValue;
    }
    if leader == "UPDATE" && clause == "SET" {
        return UsageType::UpdateValue;
    }

    match leader.as_str() {
        "IF" | "WHILE" => UsageType::ConditionalCheck,
        "RETURN" => UsageType::ReturnValue,
        "EXEC" | "EXECUTE" => {
            let dynamic = tokens.get(1).is_some_and(|t| {
                t.is(&Token::LParen)
                    || t.word().is_some_and(|w| {
                        w.value.to_ascii_lowercase().ends_with("sp_executesql")
                    })
            });
            if dynamic {
                UsageType::DynamicSqlParameter
            } else {
                UsageType::ProcedureParameter
            }
        }
        "DECLARE" => UsageType::VariableInitialization,
        "SET" => {
            let builds_sql = tokens.iter().any(|t| t.string_value().is_some())
                && tokens.iter().any(|t| t.is(&Token::Plus) || t.is_keyword("CONCAT"));
            if builds_sql {
                UsageType::DynamicSqlParameter
            } else {
                UsageType::VariableAssignment
            }
        }
        "SELECT"
            if prev.is_some_and(|p| p.is(&Token::Eq))
                || next.is_some_and(|n| n.is(&Token::Eq)) =>
        {
            UsageType::VariableAssignment
        }
        _ => UsageType::OtherUsage,
    }
}

/// FILTER_* subtype from the operator next to the parameter.
fn filter_usage(tokens: &[Lexeme], at: usize) -> UsageType {
    let prev = at.checked_sub(1).map(|i| &tokens[i]);
    let next = tokens.get(at + 1);

    if prev.is_some_and(|p| matches!(p.token, Token::Eq | Token::Neq))
        || next.is_some_and(|n| matches!(n.token, Token::Eq | Token::Neq))
    {
        return UsageType::FilterCondition;
    }
    if prev.is_some_and(|p| p.is_keyword("LIKE")) || next.is_some_and(|n| n.is_keyword("LIKE")) {
        return UsageType::FilterPattern;
    }
    if in_list(tokens, at) {
        return UsageType::FilterList;
    }
    let between = prev.is_some_and(|p| p.is_keyword("BETWEEN"))
        || (prev.is_some_and(|p| p.is_keyword("AND"))
            && at >= 3
            && tokens[at - 3].is_keyword("BETWEEN"));
    if between
        || prev.is_some_and(|p| is_comparison(&p.token))
        || next.is_some_and(|n| is_comparison(&n.token))
    {
        return UsageType::FilterRange;
    }
    UsageType::FilterOther
}

/// Whether `tokens[at]` is an item of an `IN (...)` list.
fn in_list(tokens: &[Lexeme], at: usize) -> bool {
    let mut i = at;
    while i > 0 {
        i -= 1;
        match tokens[i].token {
            Token::Comma => continue,
            Token::LParen => return i > 0 && tokens[i - 1].is_keyword("IN"),
            _ if tokens[i].variable_name().is_some() || tokens[i].string_value().is_some() => {
                continue
            }
            Token::Number(..) => continue,
            _ => return false,
        }
    }
    false
}

/// The table (or `Table.Column`) the parameter is compared against.
fn affected_entity(source: &SqlSource, stmt: &Statement, tokens: &[Lexeme], at: usize) -> Option<String> {
    let tables: Vec<&String> = stmt
        .affected_entities
        .iter()
        .filter(|e| !e.starts_with('@'))
        .collect();

    match tables.as_slice() {
        [] => None,
        [only] => Some((*only).clone()),
        _ => {
            let (qualifier, column) = compared_column(tokens, at)?;
            let code = &source.masked()[stmt.span.0..stmt.span.1];
            tables
                .into_iter()
                .find(|t| {
                    let name = unqualified(t);
                    qualifier.eq_ignore_ascii_case(name) || aliases(code, name, &qualifier)
                })
                .map(|t| format!("{}.{}", t, column))
        }
    }
}

/// `alias.Column` on the other side of the comparison at `tokens[at]`.
fn compared_column(tokens: &[Lexeme], at: usize) -> Option<(String, String)> {
    // `end` is the index of the column word
    let qualified = |end: usize| -> Option<(String, String)> {
        let column = tokens.get(end)?.word()?;
        let dot = tokens.get(end.checked_sub(1)?)?;
        let qualifier = tokens.get(end.checked_sub(2)?)?.word()?;
        dot.is(&Token::Period).then(|| {
            (
                normalize_identifier(&qualifier.value),
                normalize_identifier(&column.value),
            )
        })
    };

    if at >= 2 && is_comparison(&tokens[at - 1].token) {
        if let Some(found) = qualified(at - 2) {
            return Some(found);
        }
    }
    if tokens.get(at + 1).is_some_and(|t| is_comparison(&t.token)) {
        return qualified(at + 4);
    }
    None
}

/// Whether `table [AS] alias` appears in `code`.
fn aliases(code: &str, table: &str, alias: &str) -> bool {
    let pattern = format!(
        r"(?i)\b{}\]?\s+(?:AS\s+)?\[?{}\b",
        regex::escape(table),
        regex::escape(alias)
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(code))
}

/// Statement conditions mentioning the parameter, joined with AND.
fn occurrence_condition(stmt: &Statement, name: &str) -> Option<String> {
    let matching: Vec<&str> = stmt
        .conditions
        .iter()
        .filter(|c| contains_word_ci(c, name))
        .map(String::as_str)
        .collect();
    (!matching.is_empty()).then(|| matching.join(" AND "))
}

/// Majority usage collapsed to a pattern; ties go to the usage seen first.
fn usage_pattern(occurrences: &[ParameterOccurrence]) -> String {
    let mut counts: Vec<(UsageType, usize)> = Vec::new();
    for occ in occurrences {
        match counts.iter_mut().find(|(u, _)| *u == occ.usage) {
            Some((_, n)) => *n += 1,
            None => counts.push((occ.usage, 1)),
        }
    }

    let mut best: Option<(UsageType, usize)> = None;
    for (usage, n) in counts {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((usage, n));
        }
    }
    best.map_or_else(|| "UNUSED_PARAMETER".to_string(), |(u, _)| u.pattern().to_string())
}

// =============================================================================
// Test values
// =============================================================================

fn suggestion(value: impl Into<String>, purpose: ValuePurpose, scenario: impl Into<String>) -> SuggestedValue {
    SuggestedValue {
        value: value.into(),
        purpose,
        scenario: scenario.into(),
    }
}

/// Literal values compared in `condition`: `= 'x'`, `= 42` and `IN (...)` items.
fn condition_literals(condition: &str, literals: &mut Vec<String>) {
    for cap in LITERAL_RE.captures_iter(condition) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            push_unique(literals, m.as_str().to_string());
        }
    }
    for cap in IN_LIST_RE.captures_iter(condition) {
        let Some(list) = cap.get(1) else {
            continue;
        };
        for item in list.as_str().split(',') {
            let item = item.trim();
            if item.starts_with('@') || item.is_empty() {
                continue;
            }
            push_unique(literals, item.trim_matches('\'').to_string());
        }
    }
}

fn test_value_candidate(param: &ParameterInfo, usage: &ParameterUsage) -> TestValueCandidate {
    let mut conditions: Vec<TestCondition> = Vec::new();
    let mut literals = Vec::new();
    for occ in &usage.occurrences {
        let Some(condition) = &occ.condition else {
            continue;
        };
        condition_literals(condition, &mut literals);
        if !conditions.iter().any(|c| &c.condition == condition) {
            conditions.push(TestCondition {
                condition: condition.clone(),
                entity: occ.entity.clone(),
                usage: occ.usage,
            });
        }
    }

    let mut values = Vec::new();
    if let Some(default) = param
        .default_value
        .as_deref()
        .filter(|d| !d.eq_ignore_ascii_case("NULL"))
    {
        values.push(suggestion(
            default.trim_matches('\''),
            ValuePurpose::DefaultValue,
            "Default case",
        ));
    }
    for literal in literals {
        values.push(suggestion(literal, ValuePurpose::LiteralValue, "Value from condition"));
    }
    values.extend(type_values(&param.data_type, &usage.usage_pattern));
    values.push(suggestion("NULL", ValuePurpose::NullValue, "Null value handling"));

    TestValueCandidate {
        parameter_name: param.name.clone(),
        data_type: param.data_type.clone(),
        default_value: param.default_value.clone(),
        usage_context: usage.usage_pattern.clone(),
        conditions,
        suggested_test_values: values,
    }
}

/// Boundary values driven by the declared type and the usage pattern.
fn type_values(data_type: &str, pattern: &str) -> Vec<SuggestedValue> {
    let upper = data_type.to_ascii_uppercase();
    let filter = pattern == "FILTER_PARAMETER";
    let mut values = Vec::new();

    if ["INT", "NUMERIC", "DECIMAL"].iter().any(|t| upper.contains(t)) {
        if filter {
            values.push(suggestion("0", ValuePurpose::BoundaryValue, "Zero value"));
            values.push(suggestion("-1", ValuePurpose::NegativeValue, "Negative value"));
            values.push(suggestion(
                "2147483647",
                ValuePurpose::ExtremeValue,
                "Maximum integer value",
            ));
        } else if pattern == "PAGINATION_PARAMETER" {
            values.push(suggestion("0", ValuePurpose::BoundaryValue, "Zero page/offset"));
            values.push(suggestion("1", ValuePurpose::CommonValue, "First page"));
            values.push(suggestion("100", ValuePurpose::CommonValue, "Large page size"));
        }
    } else if ["CHAR", "TEXT"].iter().any(|t| upper.contains(t)) {
        if filter {
            values.push(suggestion("", ValuePurpose::EmptyValue, "Empty string"));
            values.push(suggestion("%", ValuePurpose::WildcardValue, "Wildcard (all values)"));
            if let Some(len) = MAX_LENGTH_RE
                .captures(&upper)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok())
            {
                values.push(suggestion(
                    "X".repeat(len),
                    ValuePurpose::MaxLengthValue,
                    format!("Maximum length ({} characters)", len),
                ));
            }
        }
    } else if upper.contains("DATE") || upper.contains("TIME") {
        values.push(suggestion("GETDATE()", ValuePurpose::CurrentValue, "Current date/time"));
        if filter {
            values.push(suggestion(
                "DATEADD(day, -30, GETDATE())",
                ValuePurpose::RelativeValue,
                "30 days ago",
            ));
            values.push(suggestion(
                "DATEADD(day, 30, GETDATE())",
                ValuePurpose::RelativeValue,
                "30 days in future",
            ));
        }
    }
    values
}

// =============================================================================
// Dependencies
// =============================================================================

/// Parameter pairs sharing a statement, in declaration order.
fn parameter_dependencies(usage: &[ParameterUsage], statements: &[Statement]) -> Vec<ParameterDependency> {
    let mut dependencies: Vec<ParameterDependency> = Vec::new();

    for (idx, stmt) in statements.iter().enumerate() {
        let present: Vec<&str> = usage
            .iter()
            .filter(|u| u.occurrences.iter().any(|o| o.statement == Some(idx)))
            .map(|u| u.parameter_name.as_str())
            .collect();

        for (i, first) in present.iter().enumerate() {
            for second in &present[i + 1..] {
                let conditional = stmt
                    .conditions
                    .iter()
                    .any(|c| contains_word_ci(c, first) && contains_word_ci(c, second));
                let relationship = if conditional {
                    DependencyKind::ConditionalRelationship
                } else {
                    DependencyKind::UsedTogether
                };
                let exists = dependencies.iter().any(|d| {
                    d.parameter1 == *first && d.parameter2 == **second && d.relationship == relationship
                });
                if !exists {
                    dependencies.push(ParameterDependency {
                        parameter1: first.to_string(),
                        parameter2: second.to_string(),
                        relationship,
                        statement_id: stmt.statement_id.clone(),
                        block_id: stmt.block_id.clone(),
                    });
                }
            }
        }
    }
    dependencies
}
