//! Data-flow derivation between tables, variables and temp structures
//!
//! Flows come from three passes, numbered `flow_N` in this order:
//!
//! 1. Table flows: a block that both reads and writes tables moves data from
//!    every table it reads into each table it writes.
//! 2. Variable flows: a variable assigned from table data and mentioned in a
//!    later block that touches a table carries data into that table.
//! 3. Temp flows: each temp structure links the tables that populated it to
//!    the tables it was inserted into.
//!
//! A flow without a source or without a target says nothing and is dropped.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;
use tracing::debug;

use super::{block_by_id, clause_end, innermost_block, known_tables, IdSequence, OperationAnalysis};
use crate::model::{
    DataFlow, EntityRelationship, FlowOperation, LogicalBlock, RelationType, TableOperation,
    TableReference, TempStructure, TempTransformationType, Transformation, VariableAssignment,
};
use crate::parser::identifier_utils::{normalize_object_name, same_object};
use crate::parser::lexer::Lexeme;
use crate::parser::{SqlSource, StatementSpan};
use crate::util::{collapse_whitespace, contains_word_ci, push_unique};

static GROUP_BY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());

static ORDER_BY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").unwrap());

static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(INNER|LEFT|RIGHT|FULL|CROSS)\s+(?:OUTER\s+)?)?JOIN\s+([\w.\[\]#@]+)(?:\s+(?:AS\s+)?(\w+))?\s+ON\s+",
    )
    .unwrap()
});

static AGGREGATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(SUM|AVG|MIN|MAX|COUNT)\s*\(([^)]+)\)").unwrap());

static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\s+").unwrap());

/// Words that end a JOIN ... ON condition.
const JOIN_CONDITION_END: &[&str] = &[
    "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "JOIN", "WHERE", "GROUP", "ORDER",
    "HAVING", "UNION", "EXCEPT", "INTERSECT", "OPTION", "END", "ELSE", "SELECT", "INSERT",
    "UPDATE", "DELETE", "MERGE", "SET", "IF", "WHILE", "RETURN", "DECLARE", "EXEC", "EXECUTE",
    "OUTPUT", "WHEN", "BEGIN", "COMMIT", "ROLLBACK",
];

/// Words that end a WHERE condition.
const WHERE_CONDITION_END: &[&str] = &[
    "GROUP", "ORDER", "HAVING", "UNION", "EXCEPT", "INTERSECT", "OPTION", "END", "ELSE", "SELECT",
    "INSERT", "UPDATE", "DELETE", "MERGE", "SET", "IF", "WHILE", "RETURN", "DECLARE", "EXEC",
    "EXECUTE", "BEGIN", "COMMIT", "ROLLBACK", "OUTPUT", "FOR",
];

/// Flows, the variable assignments behind them, and entity relationships.
#[derive(Debug, Clone, Default)]
pub struct DataFlowAnalysis {
    pub flows: Vec<DataFlow>,
    pub assignments: Vec<VariableAssignment>,
    pub relationships: Vec<EntityRelationship>,
}

/// Derive data flows and entity relationships.
pub fn analyze_data_flow(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    operations: &OperationAnalysis,
    spans: &[StatementSpan],
) -> DataFlowAnalysis {
    let refs = &operations.table_references;
    let assignments = extract_assignments(source, blocks, refs, spans);

    let mut builder = FlowBuilder::new();
    table_flows(source, blocks, refs, &mut builder);
    variable_flows(source, blocks, refs, &assignments, &mut builder);
    temp_flows(&operations.temp_structures, &mut builder);

    let flows = builder.flows;
    let relationships = entity_relationships(&flows);

    debug!(
        "Derived {} data flows from {} variable assignments",
        flows.len(),
        assignments.len()
    );

    DataFlowAnalysis {
        flows,
        assignments,
        relationships,
    }
}

/// Numbers flows as they are accepted; degenerate flows never get an id.
struct FlowBuilder {
    flows: Vec<DataFlow>,
    ids: IdSequence,
}

impl FlowBuilder {
    fn new() -> Self {
        Self {
            flows: Vec::new(),
            ids: IdSequence::new("flow"),
        }
    }

    fn push(
        &mut self,
        source_entities: Vec<String>,
        intermediate_entities: Vec<String>,
        target_entities: Vec<String>,
        operations: Vec<FlowOperation>,
        block_ids: Vec<String>,
        transformations: Vec<Transformation>,
    ) {
        if source_entities.is_empty() || target_entities.is_empty() {
            return;
        }
        let duplicate = self.flows.iter().any(|f| {
            f.source_entities == source_entities
                && f.intermediate_entities == intermediate_entities
                && f.target_entities == target_entities
                && f.operations == operations
                && f.block_ids == block_ids
        });
        if duplicate {
            return;
        }
        self.flows.push(DataFlow {
            flow_id: self.ids.next_id(),
            source_entities,
            intermediate_entities,
            target_entities,
            operations,
            block_ids,
            transformations,
        });
    }
}

// =============================================================================
// Variable assignments
// =============================================================================

/// `SET @v = expr` and `SELECT @v = expr, ...` with the tables each reads.
fn extract_assignments(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    refs: &[TableReference],
    spans: &[StatementSpan],
) -> Vec<VariableAssignment> {
    let tables = known_tables(refs);
    let mut assignments = Vec::new();

    for (idx, span) in spans.iter().enumerate() {
        let tokens = &source.sig()[span.first..span.last];
        let Some(first) = tokens.first() else {
            continue;
        };
        let statement_end = source.span_bytes(span.first, span.last).1;

        // (variable token, first expression token, expression end offset)
        let mut targets: Vec<(&Lexeme, usize, usize)> = Vec::new();

        if first.is_keyword("SET") {
            if let Some(var) = tokens.get(1).filter(|t| t.variable_name().is_some()) {
                let expr = match (tokens.get(2), tokens.get(3)) {
                    (Some(op), Some(eq))
                        if eq.is(&Token::Eq)
                            && matches!(
                                op.token,
                                Token::Plus | Token::Minus | Token::Mul | Token::Div
                            ) =>
                    {
                        Some(4)
                    }
                    (Some(eq), _) if eq.is(&Token::Eq) => Some(3),
                    _ => None,
                };
                if let Some(expr) = expr {
                    targets.push((var, expr, statement_end));
                }
            }
        } else if first.is_keyword("SELECT") {
            let mut depth = 0usize;
            for (i, token) in tokens.iter().enumerate() {
                if token.is(&Token::LParen) {
                    depth += 1;
                } else if token.is(&Token::RParen) {
                    depth = depth.saturating_sub(1);
                } else if depth == 0 && token.is_any_keyword(&["FROM", "INTO", "WHERE"]) {
                    break;
                }
                let starts_item = i == 1 || (i > 1 && tokens[i - 1].is(&Token::Comma));
                if depth == 0
                    && starts_item
                    && token.variable_name().is_some()
                    && tokens.get(i + 1).is_some_and(|t| t.is(&Token::Eq))
                {
                    targets.push((token, i + 2, statement_end));
                }
            }
        }

        for (var, expr, end) in targets {
            let Some(expr_token) = tokens.get(expr) else {
                continue;
            };
            let text = source.text()[expr_token.start..end]
                .trim_end()
                .trim_end_matches(';')
                .trim_end();
            let mut source_entities = Vec::new();
            for table in &tables {
                if contains_word_ci(text, table) {
                    push_unique(&mut source_entities, table.clone());
                }
            }
            assignments.push(VariableAssignment {
                variable: var.variable_name().unwrap_or_default().to_string(),
                expression: collapse_whitespace(text),
                block_id: innermost_block(blocks, var.start, var.end).map(|b| b.id.clone()),
                line_number: source.line_of(var.start),
                source_entities,
                statement: idx,
            });
        }
    }
    assignments
}

// =============================================================================
// Flow passes
// =============================================================================

fn block_code<'a>(source: &'a SqlSource, block: &LogicalBlock) -> &'a str {
    &source.masked()[block.span.0..block.span.1]
}

/// JOIN / FILTER / AGGREGATE / SORT keywords present in a block.
fn block_operations(code: &str) -> Vec<FlowOperation> {
    let mut ops = Vec::new();
    if contains_word_ci(code, "JOIN") {
        ops.push(FlowOperation::Join);
    }
    if contains_word_ci(code, "WHERE") {
        ops.push(FlowOperation::Filter);
    }
    if GROUP_BY_RE.is_match(code) {
        ops.push(FlowOperation::Aggregate);
    }
    if ORDER_BY_RE.is_match(code) {
        ops.push(FlowOperation::Sort);
    }
    ops
}

fn is_read(op: TableOperation) -> bool {
    matches!(op, TableOperation::Select | TableOperation::MergeSource)
}

fn write_operation(op: TableOperation) -> Option<FlowOperation> {
    match op {
        TableOperation::Insert => Some(FlowOperation::Insert),
        TableOperation::Update | TableOperation::MergeTarget => Some(FlowOperation::Update),
        _ => None,
    }
}

fn table_flows(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    refs: &[TableReference],
    builder: &mut FlowBuilder,
) {
    let mut block_order: Vec<&str> = Vec::new();
    for r in refs {
        if let Some(id) = r.block_id.as_deref() {
            push_unique(&mut block_order, id);
        }
    }

    for block_id in block_order {
        let Some(block) = block_by_id(blocks, block_id) else {
            continue;
        };
        let in_block: Vec<&TableReference> = refs
            .iter()
            .filter(|r| r.block_id.as_deref() == Some(block_id))
            .collect();

        let mut targets: Vec<(&str, FlowOperation)> = Vec::new();
        for r in &in_block {
            if let Some(op) = write_operation(r.operation) {
                if !targets.iter().any(|(t, o)| same_object(t, &r.table) && *o == op) {
                    targets.push((r.table.as_str(), op));
                }
            }
        }
        if targets.is_empty() {
            continue;
        }

        let code = block_code(source, block);
        let transformations =
            extract_transformations(code, &source.code()[block.span.0..block.span.1]);

        for (target, op) in targets {
            let mut sources: Vec<String> = Vec::new();
            for r in in_block.iter().filter(|r| is_read(r.operation)) {
                if !same_object(&r.table, target) && !sources.iter().any(|s| same_object(s, &r.table)) {
                    sources.push(r.table.clone());
                }
            }
            let mut operations = block_operations(code);
            operations.push(op);

            builder.push(
                sources,
                Vec::new(),
                vec![target.to_string()],
                operations,
                vec![block.id.clone()],
                transformations.clone(),
            );
        }
    }
}

fn variable_flows(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    refs: &[TableReference],
    assignments: &[VariableAssignment],
    builder: &mut FlowBuilder,
) {
    for assignment in assignments.iter().filter(|a| !a.source_entities.is_empty()) {
        for r in refs.iter().filter(|r| r.statement > assignment.statement) {
            let Some(block) = r.block_id.as_deref().and_then(|id| block_by_id(blocks, id)) else {
                continue;
            };
            let code = block_code(source, block);
            if !contains_word_ci(code, &assignment.variable) {
                continue;
            }

            let operations = match r.operation {
                TableOperation::Insert => vec![FlowOperation::Insert],
                TableOperation::Update | TableOperation::MergeTarget => vec![FlowOperation::Update],
                TableOperation::Delete => vec![FlowOperation::Delete],
                _ if contains_word_ci(code, "WHERE") => vec![FlowOperation::Filter],
                _ => Vec::new(),
            };

            let mut block_ids = Vec::new();
            if let Some(id) = &assignment.block_id {
                block_ids.push(id.clone());
            }
            push_unique(&mut block_ids, block.id.clone());

            builder.push(
                assignment.source_entities.clone(),
                vec![assignment.variable.clone()],
                vec![r.table.clone()],
                operations,
                block_ids,
                Vec::new(),
            );
        }
    }
}

fn temp_flows(temps: &[TempStructure], builder: &mut FlowBuilder) {
    for temp in temps {
        let mut sources = Vec::new();
        let mut targets = Vec::new();
        let mut block_ids = Vec::new();

        for p in &temp.populated_from {
            push_unique(&mut sources, p.table_reference.clone());
            if let Some(id) = &p.block_id {
                push_unique(&mut block_ids, id.clone());
            }
        }
        for u in &temp.used_in {
            if let Some(target) = &u.target_table {
                push_unique(&mut targets, target.clone());
            }
            if let Some(id) = &u.block_id {
                push_unique(&mut block_ids, id.clone());
            }
        }

        let mut operations = Vec::new();
        for t in &temp.transformations {
            let op = match t.transformation_type {
                TempTransformationType::Update | TempTransformationType::Merge => FlowOperation::Update,
                TempTransformationType::Filter => FlowOperation::Filter,
            };
            push_unique(&mut operations, op);
        }

        builder.push(
            sources,
            vec![temp.name.clone()],
            targets,
            operations,
            block_ids,
            Vec::new(),
        );
    }
}

// =============================================================================
// Transformations
// =============================================================================

/// JOIN, aggregate and WHERE details of a block.
///
/// `masked` (comments blanked) supplies the reported text; `code` (comments
/// and strings blanked) decides where clauses end. Both share offsets.
pub fn extract_transformations(masked: &str, code: &str) -> Vec<Transformation> {
    let mut transformations = Vec::new();

    for cap in JOIN_RE.captures_iter(code) {
        let (Some(whole), Some(table)) = (cap.get(0), cap.get(2)) else {
            continue;
        };
        let join_type = cap
            .get(1)
            .map_or("INNER".to_string(), |m| m.as_str().to_ascii_uppercase());
        let end = clause_end(code, whole.end(), JOIN_CONDITION_END);
        let condition = collapse_whitespace(&masked[whole.end()..end]);
        transformations.push(Transformation::Join {
            join_type,
            entities: vec![normalize_object_name(table.as_str())],
            join_condition: (!condition.is_empty()).then_some(condition),
        });
    }

    for cap in AGGREGATE_RE.captures_iter(code) {
        let (Some(function), Some(column)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        transformations.push(Transformation::Aggregate {
            function: function.as_str().to_ascii_uppercase(),
            source_column: collapse_whitespace(&masked[column.start()..column.end()]),
        });
    }

    for m in WHERE_RE.find_iter(code) {
        let end = clause_end(code, m.end(), WHERE_CONDITION_END);
        let condition = collapse_whitespace(&masked[m.end()..end]);
        if !condition.is_empty() {
            transformations.push(Transformation::Filter { condition });
        }
    }

    transformations
}

// =============================================================================
// Relationships
// =============================================================================

/// Source × target pairs of every flow, deduplicated on (source, target, type).
pub fn entity_relationships(flows: &[DataFlow]) -> Vec<EntityRelationship> {
    let mut relationships: Vec<EntityRelationship> = Vec::new();

    for flow in flows {
        let has = |op: FlowOperation| flow.operations.contains(&op);
        let relation_type = if has(FlowOperation::Join) {
            RelationType::Joins
        } else if has(FlowOperation::Insert) {
            RelationType::Populates
        } else if has(FlowOperation::Update) {
            RelationType::Updates
        } else {
            RelationType::References
        };

        for source in &flow.source_entities {
            for target in &flow.target_entities {
                if same_object(source, target) && !has(FlowOperation::Update) {
                    continue;
                }
                let exists = relationships.iter().any(|r| {
                    r.source_entity == *source
                        && r.target_entity == *target
                        && r.relation_type == relation_type
                });
                if !exists {
                    relationships.push(EntityRelationship {
                        source_entity: source.clone(),
                        target_entity: target.clone(),
                        relation_type,
                        flow_id: flow.flow_id.clone(),
                        operations: flow.operations.clone(),
                    });
                }
            }
        }
    }
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::operations::detect_operations;
    use crate::analysis::structure::analyze_structure;

    fn analyze(sql: &str) -> DataFlowAnalysis {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        let spans = source.statement_spans();
        let ops = detect_operations(&source, &blocks, &spans);
        analyze_data_flow(&source, &blocks, &ops, &spans)
    }

    #[test]
    fn test_temp_table_flow() {
        let result = analyze("SELECT * INTO #Temp FROM Source; INSERT INTO Target SELECT * FROM #Temp;");
        let temp_flow = result
            .flows
            .iter()
            .find(|f| f.intermediate_entities == vec!["#Temp"])
            .unwrap();
        assert_eq!(temp_flow.source_entities, vec!["Source"]);
        assert_eq!(temp_flow.target_entities, vec!["Target"]);
    }

    #[test]
    fn test_table_flow_with_operations() {
        let result = analyze(
            "INSERT INTO Summary (CustomerId, Total)
             SELECT o.CustomerId, SUM(o.Amount) FROM Orders o
             INNER JOIN Customers c ON c.Id = o.CustomerId
             WHERE o.Status = 1 GROUP BY o.CustomerId",
        );
        assert_eq!(result.flows.len(), 1);
        let flow = &result.flows[0];
        assert_eq!(flow.flow_id, "flow_0");
        assert_eq!(flow.source_entities, vec!["Orders", "Customers"]);
        assert_eq!(flow.target_entities, vec!["Summary"]);
        assert_eq!(
            flow.operations,
            vec![
                FlowOperation::Join,
                FlowOperation::Filter,
                FlowOperation::Aggregate,
                FlowOperation::Insert
            ]
        );
        assert_eq!(
            flow.transformations,
            vec![
                Transformation::Join {
                    join_type: "INNER".into(),
                    entities: vec!["Customers".into()],
                    join_condition: Some("c.Id = o.CustomerId".into()),
                },
                Transformation::Aggregate {
                    function: "SUM".into(),
                    source_column: "o.Amount".into(),
                },
                Transformation::Filter {
                    condition: "o.Status = 1".into(),
                },
            ]
        );
        assert_eq!(result.relationships.len(), 2);
        assert_eq!(result.relationships[0].relation_type, RelationType::Joins);
    }

    #[test]
    fn test_variable_assignments() {
        let result = analyze(
            "SELECT @max = MAX(Id), @n = COUNT(*) FROM Orders; SET @next = @max + 1;",
        );
        let vars: Vec<_> = result.assignments.iter().map(|a| a.variable.as_str()).collect();
        assert_eq!(vars, vec!["@max", "@n", "@next"]);
        assert_eq!(result.assignments[0].source_entities, vec!["Orders"]);
        assert_eq!(result.assignments[2].expression, "@max + 1");
        assert!(result.assignments[2].source_entities.is_empty());
    }

    #[test]
    fn test_variable_mediated_flow() {
        let result = analyze(
            "CREATE PROC p AS
             SET @limit = (SELECT MAX(Qty) FROM Limits)
             IF @limit > 0
             BEGIN
                 UPDATE Stock SET Qty = @limit
             END",
        );
        let flow = result
            .flows
            .iter()
            .find(|f| f.intermediate_entities == vec!["@limit"])
            .unwrap();
        assert_eq!(flow.source_entities, vec!["Limits"]);
        assert_eq!(flow.target_entities, vec!["Stock"]);
        assert_eq!(flow.operations, vec![FlowOperation::Update]);
        assert_eq!(flow.block_ids, vec!["block_0", "block_1"]);
    }

    #[test]
    fn test_no_degenerate_flows() {
        let result = analyze("UPDATE A SET x = 1; DELETE FROM B WHERE y = 2;");
        assert!(result.flows.is_empty());
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_self_relationship_skipped_without_update() {
        let flows = vec![DataFlow {
            flow_id: "flow_0".into(),
            source_entities: vec!["T".into()],
            intermediate_entities: vec!["@v".into()],
            target_entities: vec!["T".into()],
            operations: vec![FlowOperation::Filter],
            block_ids: vec![],
            transformations: vec![],
        }];
        assert!(entity_relationships(&flows).is_empty());
    }
}
