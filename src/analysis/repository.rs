//! Repository-migration hints
//!
//! Three advisory outputs built from everything the earlier stages found:
//! query patterns per block and per flow, suggested repository methods, and
//! constructs that make a straight port hard.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{block_by_id, innermost_block, IdSequence, OperationAnalysis};
use crate::model::{
    BlockPurpose, Compatibility, ComplexityIndicator, ComplexityLevel, ComplexityType, DataFlow,
    FilterType, FlowOperation, LogicalBlock, MethodParameter, ParameterUsage, PatternType,
    ProcedureMetadata, QueryPattern, RepositoryMethod, ReturnDataStructure, ReturnType,
    Statement, StatementPurpose, SubPurpose, TableReference, Transformation,
};
use crate::parser::identifier_utils::same_object;
use crate::parser::SqlSource;
use crate::util::{contains_ci, contains_word_ci, find_word_ci, pascal_case_entity, push_unique};

static GROUP_BY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());

static JOIN_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(INNER|LEFT|RIGHT|FULL|CROSS)\s+(?:OUTER\s+)?)?JOIN\b").unwrap()
});

static EQUALITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^<>!]=\s*@").unwrap());

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:[<>]=?|\bBETWEEN)\s*@").unwrap());

static LIST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bIN\s*\(").unwrap());

static NULL_CHECK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIS\s+(?:NOT\s+)?NULL\b").unwrap());

static EXEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEXEC(?:UTE)?\b|\+=").unwrap());

static CTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bWITH\s+\w+\s*(?:\([^)]*\)\s*)?AS\s*\(").unwrap()
});

static DYNAMIC_SQL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bEXEC(?:UTE)?\s*(?:sp_executesql\s+)?[@N(]|@\w+\s*\+=").unwrap()
});

static TEMP_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCREATE\s+TABLE\s+#|\bDECLARE\s+@\w+\s+(?:AS\s+)?TABLE\b|\bINTO\s+#").unwrap()
});

static TEMP_MUTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bUPDATE\s+[#@]|\bDELETE\s+(?:FROM\s+)?[#@]").unwrap()
});

/// High-risk constructs in flagging order.
static CONSTRUCTS: LazyLock<Vec<Construct>> = LazyLock::new(|| {
    vec![
        Construct::new(r"\bPIVOT\b", ComplexityType::Pivot, ComplexityLevel::High, "Complex data transformation"),
        Construct::new(r"\bUNPIVOT\b", ComplexityType::Unpivot, ComplexityLevel::High, "Complex data transformation"),
        Construct::new(r"\bMERGE\s+", ComplexityType::Merge, ComplexityLevel::High, "Complex data operation"),
        Construct::new(r"\bCURSOR\b[^;]*?\bFOR\b", ComplexityType::Cursor, ComplexityLevel::High, "Cursor-based processing"),
        Construct::new(
            r"\bOUTPUT\s+(?:INSERTED|DELETED|\$ACTION)\b",
            ComplexityType::Output,
            ComplexityLevel::Medium,
            "Output clause",
        ),
        Construct::new(
            r"\bWITH\s+\w+\s*(?:\([^)]*\)\s*)?AS\s*\(",
            ComplexityType::Cte,
            ComplexityLevel::Medium,
            "Common Table Expression",
        ),
        Construct::new(r"\b(?:CROSS|OUTER)\s+APPLY\b", ComplexityType::Apply, ComplexityLevel::Medium, "APPLY operator"),
    ]
});

const ALTERNATIVES: [&str; 3] = [
    "Use stored procedure for this operation",
    "Implement as a series of sequential database calls",
    "Break complex logic into smaller repository methods",
];

const DYNAMIC_SQL_ALTERNATIVES: [&str; 3] = [
    "Use stored procedure with Dapper",
    "Implement custom SQL builder",
    "Break complex logic into smaller repository methods",
];

const TEMP_TABLE_ALTERNATIVES: [&str; 3] = [
    "Use stored procedure for this operation",
    "Implement as a series of sequential database calls",
    "Create a view for common intermediate results",
];

struct Construct {
    pattern: Regex,
    complexity_type: ComplexityType,
    level: ComplexityLevel,
    description: &'static str,
}

impl Construct {
    fn new(pattern: &str, complexity_type: ComplexityType, level: ComplexityLevel, description: &'static str) -> Self {
        Self {
            pattern: Regex::new(&format!("(?i){}", pattern)).unwrap(),
            complexity_type,
            level,
            description,
        }
    }

    fn migration_approach(&self) -> &'static str {
        match self.complexity_type {
            ComplexityType::Cursor => "Use LINQ or collection processing instead of cursors",
            ComplexityType::Cte => "Break into multiple repository methods or use a custom query",
            ComplexityType::Pivot | ComplexityType::Unpivot => {
                "Transform data in application code after retrieval"
            }
            _ => "Use multiple repository methods",
        }
    }
}

/// Query patterns, method boundaries and complexity indicators.
#[derive(Debug, Clone, Default)]
pub struct RepositoryAnalysis {
    pub query_patterns: Vec<QueryPattern>,
    pub methods: Vec<RepositoryMethod>,
    pub complexity: Vec<ComplexityIndicator>,
}

/// Everything the repository hints are derived from.
struct RepositoryContext<'a> {
    source: &'a SqlSource,
    blocks: &'a [LogicalBlock],
    references: &'a [TableReference],
    flows: &'a [DataFlow],
    statements: &'a [Statement],
    parameters: &'a [ParameterUsage],
}

impl RepositoryContext<'_> {
    fn code(&self, block: &LogicalBlock) -> &str {
        &self.source.masked()[block.span.0..block.span.1]
    }

    /// Distinct tables referenced from the block, in reference order.
    fn block_tables(&self, block_id: &str) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for r in self.references.iter().filter(|r| r.block_id.as_deref() == Some(block_id)) {
            if !tables.iter().any(|t| same_object(t, &r.table)) {
                tables.push(r.table.clone());
            }
        }
        tables
    }

    /// Parameters with at least one occurrence in `block_ids`, with the first such usage.
    fn input_parameters(&self, block_ids: &[String]) -> Vec<MethodParameter> {
        self.parameters
            .iter()
            .filter_map(|p| {
                let occ = p.occurrences.iter().find(|o| {
                    o.block_id
                        .as_ref()
                        .is_some_and(|id| block_ids.contains(id))
                })?;
                Some(MethodParameter {
                    name: p.parameter_name.clone(),
                    param_type: p.parameter_type.clone(),
                    usage: occ.usage.as_str().to_string(),
                })
            })
            .collect()
    }

    /// Columns of `entity` referenced from `block_ids`.
    fn entity_columns(&self, entity: &str, block_ids: &[String]) -> Vec<String> {
        let mut columns = Vec::new();
        for r in self.references {
            let in_blocks = r.block_id.as_ref().is_some_and(|id| block_ids.contains(id));
            if in_blocks && same_object(&r.table, entity) {
                for c in &r.columns {
                    push_unique(&mut columns, c.clone());
                }
            }
        }
        columns
    }
}

/// Derive advisory repository-migration hints.
#[allow(clippy::too_many_arguments)]
pub fn analyze_repository(
    source: &SqlSource,
    _metadata: &ProcedureMetadata,
    blocks: &[LogicalBlock],
    operations: &OperationAnalysis,
    flows: &[DataFlow],
    statements: &[Statement],
    parameters: &[ParameterUsage],
) -> RepositoryAnalysis {
    let ctx = RepositoryContext {
        source,
        blocks,
        references: &operations.table_references,
        flows,
        statements,
        parameters,
    };

    let query_patterns = detect_query_patterns(&ctx);
    let methods = suggest_methods(&ctx);
    let complexity = flag_complexity(&ctx);

    debug!(
        "Repository hints: {} patterns, {} methods, {} complexity indicators",
        query_patterns.len(),
        methods.len(),
        complexity.len()
    );

    RepositoryAnalysis {
        query_patterns,
        methods,
        complexity,
    }
}

// =============================================================================
// Query patterns
// =============================================================================

const DATA_PURPOSES: [BlockPurpose; 3] = [
    BlockPurpose::DataRetrieval,
    BlockPurpose::DataTransformation,
    BlockPurpose::DataFiltering,
];

fn detect_query_patterns(ctx: &RepositoryContext<'_>) -> Vec<QueryPattern> {
    let mut ids = IdSequence::new("pattern");
    let mut patterns = Vec::new();

    for purpose in DATA_PURPOSES {
        for block in ctx.blocks.iter().filter(|b| b.purpose == purpose) {
            if let Some(pattern) = block_pattern(ctx, block, &mut ids) {
                patterns.push(pattern);
            }
        }
    }
    for flow in ctx.flows {
        if let Some(pattern) = flow_pattern(ctx, flow, &mut ids) {
            patterns.push(pattern);
        }
    }
    patterns
}

fn join_types(code: &str) -> Vec<String> {
    let mut types = Vec::new();
    for cap in JOIN_TYPE_RE.captures_iter(code) {
        let join_type = cap
            .get(1)
            .map_or("INNER".to_string(), |m| m.as_str().to_ascii_uppercase());
        push_unique(&mut types, join_type);
    }
    types
}

fn filter_types(code: &str) -> Vec<FilterType> {
    let mut types = Vec::new();
    if EQUALITY_RE.is_match(code) {
        types.push(FilterType::Equality);
    }
    if RANGE_RE.is_match(code) {
        types.push(FilterType::Range);
    }
    if contains_word_ci(code, "LIKE") {
        types.push(FilterType::Pattern);
    }
    if LIST_RE.is_match(code) {
        types.push(FilterType::List);
    }
    if NULL_CHECK_RE.is_match(code) {
        types.push(FilterType::NullCheck);
    }
    types
}

fn compatibility(code: &str) -> Compatibility {
    if CTE_RE.is_match(code) {
        Compatibility::Advanced
    } else if EXEC_RE.is_match(code) {
        Compatibility::Complex
    } else {
        Compatibility::Standard
    }
}

/// The table mentioned most often in `code`; ties go to the first.
fn primary_entity(code: &str, tables: &[String]) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for table in tables {
        let count = find_word_ci(code, table).len();
        if best.map_or(true, |(_, n)| count > n) {
            best = Some((table, count));
        }
    }
    best.map(|(t, _)| t.clone())
}

fn block_pattern(ctx: &RepositoryContext<'_>, block: &LogicalBlock, ids: &mut IdSequence) -> Option<QueryPattern> {
    let tables = ctx.block_tables(&block.id);
    if tables.is_empty() {
        return None;
    }
    let code = ctx.code(block);
    let has = |word: &str| contains_word_ci(code, word);

    let pattern_type = if has("SELECT") && !has("JOIN") && has("WHERE") {
        PatternType::FilteredRetrieval
    } else if has("SELECT") && has("JOIN") {
        PatternType::JoinedRetrieval
    } else if has("SELECT") && GROUP_BY_RE.is_match(code) {
        PatternType::Aggregation
    } else if has("INSERT") && has("SELECT") {
        PatternType::InsertFromSelect
    } else if has("UPDATE") {
        PatternType::UpdateOperation
    } else if has("DELETE") {
        PatternType::DeleteOperation
    } else {
        PatternType::OtherOperation
    };

    let complexity = if has("CASE") || has("PIVOT") || find_word_ci(code, "JOIN").len() > 2 {
        ComplexityLevel::High
    } else if tables.len() > 2 {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::Low
    };

    let primary = primary_entity(code, &tables);
    let related = tables
        .iter()
        .filter(|t| Some(*t) != primary.as_ref())
        .cloned()
        .collect();

    Some(QueryPattern {
        pattern_id: ids.next_id(),
        pattern_type,
        complexity,
        table_count: tables.len(),
        join_types: join_types(code),
        filter_types: filter_types(code),
        primary_entity: primary,
        related_entities: related,
        repository_compatibility: compatibility(code),
        block_ids: vec![block.id.clone()],
        flow_id: None,
    })
}

fn flow_pattern(ctx: &RepositoryContext<'_>, flow: &DataFlow, ids: &mut IdSequence) -> Option<QueryPattern> {
    if flow.source_entities.is_empty() || flow.target_entities.is_empty() {
        return None;
    }
    let has = |op: FlowOperation| flow.operations.contains(&op);

    let pattern_type = if has(FlowOperation::Aggregate) {
        PatternType::DataAggregation
    } else if has(FlowOperation::Join) && has(FlowOperation::Filter) {
        PatternType::FilteredJoin
    } else if has(FlowOperation::Join) {
        PatternType::DataJoin
    } else if has(FlowOperation::Filter) {
        PatternType::DataFiltering
    } else if has(FlowOperation::Update) {
        PatternType::DataUpdate
    } else if has(FlowOperation::Insert) {
        PatternType::DataInsert
    } else {
        PatternType::DataTransformation
    };

    let complexity = if flow.operations.len() > 3 {
        ComplexityLevel::High
    } else if flow.source_entities.len() > 1 || flow.target_entities.len() > 1 {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::Low
    };

    let repository_compatibility = flow
        .block_ids
        .iter()
        .filter_map(|id| block_by_id(ctx.blocks, id))
        .map(|b| compatibility(ctx.code(b)))
        .max_by_key(|c| match c {
            Compatibility::Standard => 0,
            Compatibility::Complex => 1,
            Compatibility::Advanced => 2,
        })
        .unwrap_or(Compatibility::Standard);

    let mut join_kinds = Vec::new();
    let mut filters = Vec::new();
    for t in &flow.transformations {
        match t {
            Transformation::Join { join_type, .. } => push_unique(&mut join_kinds, join_type.clone()),
            Transformation::Filter { condition } => {
                for f in filter_types(&format!(" {}", condition)) {
                    push_unique(&mut filters, f);
                }
            }
            Transformation::Aggregate { .. } => {}
        }
    }

    let mut related: Vec<String> = flow.source_entities[1..].to_vec();
    related.extend(flow.target_entities.iter().cloned());

    Some(QueryPattern {
        pattern_id: ids.next_id(),
        pattern_type,
        complexity,
        table_count: flow.source_entities.len() + flow.target_entities.len(),
        join_types: join_kinds,
        filter_types: filters,
        primary_entity: flow.source_entities.first().cloned(),
        related_entities: related,
        repository_compatibility,
        block_ids: flow.block_ids.clone(),
        flow_id: Some(flow.flow_id.clone()),
    })
}

// =============================================================================
// Method boundaries
// =============================================================================

fn suggest_methods(ctx: &RepositoryContext<'_>) -> Vec<RepositoryMethod> {
    let mut ids = IdSequence::new("method");
    let mut methods: Vec<RepositoryMethod> = Vec::new();

    // entity -> statements touching it, in first-appearance order
    let mut by_entity: Vec<(&str, Vec<&Statement>)> = Vec::new();
    for stmt in ctx.statements {
        for entity in stmt.affected_entities.iter().filter(|e| !e.starts_with('@')) {
            match by_entity.iter_mut().find(|(e, _)| *e == entity.as_str()) {
                Some((_, list)) => list.push(stmt),
                None => by_entity.push((entity.as_str(), vec![stmt])),
            }
        }
    }

    for (entity, statements) in by_entity.iter().filter(|(_, s)| s.len() >= 2) {
        let retrieval: Vec<&Statement> = statements
            .iter()
            .copied()
            .filter(|s| s.purpose == StatementPurpose::Retrieval)
            .collect();
        if let Some(method) = retrieval_method(ctx, entity, &retrieval, &mut ids) {
            methods.push(method);
        }

        let persistence: Vec<&Statement> = statements
            .iter()
            .copied()
            .filter(|s| s.purpose == StatementPurpose::Persistence)
            .collect();
        if let Some(method) = persistence_method(ctx, entity, &persistence, &mut ids) {
            methods.push(method);
        }
    }

    for flow in ctx.flows {
        let claimed = methods
            .iter()
            .any(|m| flow.block_ids.iter().any(|id| m.related_blocks.contains(id)));
        if !claimed {
            if let Some(method) = flow_method(ctx, flow, &mut ids) {
                methods.push(method);
            }
        }
    }

    for block in ctx.blocks {
        let claimed = methods.iter().any(|m| m.related_blocks.contains(&block.id));
        if !claimed && DATA_PURPOSES.contains(&block.purpose) {
            if let Some(method) = block_method(ctx, block, &mut ids) {
                methods.push(method);
            }
        }
    }
    methods
}

fn statement_blocks(statements: &[&Statement]) -> Vec<String> {
    let mut blocks = Vec::new();
    for s in statements {
        if let Some(id) = &s.block_id {
            push_unique(&mut blocks, id.clone());
        }
    }
    blocks
}

fn retrieval_method(
    ctx: &RepositoryContext<'_>,
    entity: &str,
    statements: &[&Statement],
    ids: &mut IdSequence,
) -> Option<RepositoryMethod> {
    let block_ids = statement_blocks(statements);
    if block_ids.is_empty() {
        return None;
    }
    let has = |sub: SubPurpose| statements.iter().any(|s| s.sub_purpose == sub);
    let name = pascal_case_entity(entity);
    let suffix = if has(SubPurpose::IdLookup) {
        "ById"
    } else if has(SubPurpose::DateRangeFilter) {
        "ByDateRange"
    } else if has(SubPurpose::StatusCheck) {
        "ByStatus"
    } else {
        ""
    };

    let mut columns = ctx.entity_columns(entity, &block_ids);
    if columns.is_empty() {
        columns.push("*".to_string());
    }

    Some(RepositoryMethod {
        method_id: ids.next_id(),
        suggested_name: format!("Get{}{}", name, suffix),
        description: format!("Retrieve {} data based on filters", entity),
        input_parameters: ctx.input_parameters(&block_ids),
        related_blocks: block_ids,
        return_data_structure: ReturnDataStructure {
            primary_entity: entity.to_string(),
            included_columns: Some(columns),
            return_type: Some(ReturnType::EntityList),
            ..Default::default()
        },
    })
}

fn persistence_method(
    ctx: &RepositoryContext<'_>,
    entity: &str,
    statements: &[&Statement],
    ids: &mut IdSequence,
) -> Option<RepositoryMethod> {
    let block_ids = statement_blocks(statements);
    if block_ids.is_empty() {
        return None;
    }
    let all = |sub: SubPurpose| statements.iter().all(|s| s.sub_purpose == sub);
    let any = |sub: SubPurpose| statements.iter().any(|s| s.sub_purpose == sub);
    let verb = if all(SubPurpose::SingleInsert) {
        "Create"
    } else if all(SubPurpose::Update) {
        "Update"
    } else if all(SubPurpose::Delete) {
        "Delete"
    } else if any(SubPurpose::Logging) {
        "Log"
    } else {
        "Save"
    };

    Some(RepositoryMethod {
        method_id: ids.next_id(),
        suggested_name: format!("{}{}", verb, pascal_case_entity(entity)),
        description: format!("Persist {} data", entity),
        input_parameters: ctx.input_parameters(&block_ids),
        related_blocks: block_ids,
        return_data_structure: ReturnDataStructure {
            primary_entity: entity.to_string(),
            return_type: Some(if any(SubPurpose::Delete) {
                ReturnType::Bool
            } else {
                ReturnType::Void
            }),
            ..Default::default()
        },
    })
}

fn flow_method(ctx: &RepositoryContext<'_>, flow: &DataFlow, ids: &mut IdSequence) -> Option<RepositoryMethod> {
    let (first_source, first_target) = match (flow.source_entities.first(), flow.target_entities.first()) {
        (Some(s), Some(t)) if !flow.block_ids.is_empty() => (s, t),
        _ => return None,
    };
    let source = pascal_case_entity(first_source);
    let target = pascal_case_entity(first_target);
    let has = |op: FlowOperation| flow.operations.contains(&op);

    let name = if has(FlowOperation::Aggregate) {
        format!("Aggregate{}", source)
    } else if has(FlowOperation::Join) {
        match flow.source_entities.get(1) {
            Some(other) => format!("Join{}With{}", source, pascal_case_entity(other)),
            None => format!("Process{}", source),
        }
    } else if has(FlowOperation::Filter) {
        format!("Filter{}", source)
    } else if has(FlowOperation::Update) {
        format!("Update{}From{}", target, source)
    } else if has(FlowOperation::Insert) {
        format!("Create{}From{}", target, source)
    } else {
        format!("Process{}To{}", source, target)
    };

    Some(RepositoryMethod {
        method_id: ids.next_id(),
        suggested_name: name,
        description: format!(
            "Process data from {} to {}",
            flow.source_entities.join(", "),
            flow.target_entities.join(", ")
        ),
        related_blocks: flow.block_ids.clone(),
        input_parameters: ctx.input_parameters(&flow.block_ids),
        return_data_structure: ReturnDataStructure {
            primary_entity: first_target.clone(),
            source_entities: Some(flow.source_entities.clone()),
            operations: Some(flow.operations.iter().map(|op| op.to_string()).collect()),
            ..Default::default()
        },
    })
}

fn block_method(ctx: &RepositoryContext<'_>, block: &LogicalBlock, ids: &mut IdSequence) -> Option<RepositoryMethod> {
    let tables = ctx.block_tables(&block.id);
    let code = ctx.code(block);
    let primary = primary_entity(code, &tables)?;
    let name = pascal_case_entity(&primary);

    let suggested_name = match block.purpose {
        BlockPurpose::DataRetrieval if contains_word_ci(code, "JOIN") => format!("Get{}WithRelated", name),
        BlockPurpose::DataRetrieval if contains_word_ci(code, "WHERE") => format!("Get{}ByFilter", name),
        BlockPurpose::DataRetrieval => format!("Get{}", name),
        BlockPurpose::DataFiltering => format!("Filter{}", name),
        BlockPurpose::DataTransformation => format!("Transform{}", name),
        _ => format!("Process{}", name),
    };

    let block_ids = vec![block.id.clone()];
    let columns = ctx.entity_columns(&primary, &block_ids);
    let related: Vec<String> = tables.iter().filter(|t| **t != primary).cloned().collect();

    Some(RepositoryMethod {
        method_id: ids.next_id(),
        suggested_name,
        description: format!("{} for {}", block.purpose.title(), primary),
        input_parameters: ctx.input_parameters(&block_ids),
        related_blocks: block_ids,
        return_data_structure: ReturnDataStructure {
            primary_entity: primary,
            included_columns: (!columns.is_empty()).then_some(columns),
            related_entities: Some(related),
            ..Default::default()
        },
    })
}

// =============================================================================
// Implementation complexity
// =============================================================================

/// Innermost blocks containing a match of `re`, in source order.
fn matching_blocks<'a>(ctx: &RepositoryContext<'a>, re: &Regex) -> Vec<&'a LogicalBlock> {
    let code = ctx.source.masked();
    let mut found: Vec<&LogicalBlock> = Vec::new();
    for m in re.find_iter(code) {
        if ctx.source.in_header(m.start()) {
            continue;
        }
        if let Some(block) = innermost_block(ctx.blocks, m.start(), m.end()) {
            if !found.iter().any(|b| b.id == block.id) {
                found.push(block);
            }
        }
    }
    found
}

fn flag_complexity(ctx: &RepositoryContext<'_>) -> Vec<ComplexityIndicator> {
    let mut ids = IdSequence::new("complex");
    let mut flagged: Vec<ComplexityIndicator> = Vec::new();

    for block in matching_blocks(ctx, &DYNAMIC_SQL_RE) {
        let approach = if contains_ci(ctx.code(block), "sp_executesql") {
            "Use parameterized queries with a custom SQL builder"
        } else {
            "Use IQueryable with expression building"
        };
        flagged.push(ComplexityIndicator {
            complexity_id: ids.next_id(),
            block_ids: vec![block.id.clone()],
            complexity_level: ComplexityLevel::High,
            complexity_type: ComplexityType::DynamicSql,
            description: "Dynamic SQL construction".to_string(),
            migration_approach: approach.to_string(),
            alternative_approaches: DYNAMIC_SQL_ALTERNATIVES.iter().map(|s| s.to_string()).collect(),
        });
    }

    for block in matching_blocks(ctx, &TEMP_TABLE_RE) {
        let mutated = TEMP_MUTATION_RE.is_match(ctx.code(block));
        let (level, description, approach) = if mutated {
            (
                ComplexityLevel::High,
                "Temporary table with transformations",
                "Use multiple repository methods with intermediate results",
            )
        } else {
            (
                ComplexityLevel::Medium,
                "Temporary table usage",
                "Use in-memory collections with LINQ",
            )
        };
        flagged.push(ComplexityIndicator {
            complexity_id: ids.next_id(),
            block_ids: vec![block.id.clone()],
            complexity_level: level,
            complexity_type: ComplexityType::TempTable,
            description: description.to_string(),
            migration_approach: approach.to_string(),
            alternative_approaches: TEMP_TABLE_ALTERNATIVES.iter().map(|s| s.to_string()).collect(),
        });
    }

    for construct in CONSTRUCTS.iter() {
        for block in matching_blocks(ctx, &construct.pattern) {
            if flagged.iter().any(|c| c.block_ids.contains(&block.id)) {
                continue;
            }
            flagged.push(ComplexityIndicator {
                complexity_id: ids.next_id(),
                block_ids: vec![block.id.clone()],
                complexity_level: construct.level,
                complexity_type: construct.complexity_type,
                description: construct.description.to_string(),
                migration_approach: construct.migration_approach().to_string(),
                alternative_approaches: ALTERNATIVES.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze_source, AnalysisMode};

    fn analyze(sql: &str) -> RepositoryAnalysis {
        let source = SqlSource::new(sql);
        analyze_source(&source, None, AnalysisMode::Full)
            .details
            .unwrap()
            .repository
    }

    // ========================================================================
    // Query patterns
    // ========================================================================

    #[test]
    fn test_block_pattern_for_filtered_retrieval() {
        let result = analyze(
            "CREATE PROC p @id INT AS
             SELECT Id, Name FROM Customers WHERE Id = @id AND Email LIKE '%x' AND Deleted IS NULL",
        );
        let pattern = &result.query_patterns[0];
        assert_eq!(pattern.pattern_id, "pattern_0");
        assert_eq!(pattern.pattern_type, PatternType::FilteredRetrieval);
        assert_eq!(pattern.complexity, ComplexityLevel::Low);
        assert_eq!(pattern.primary_entity.as_deref(), Some("Customers"));
        assert_eq!(
            pattern.filter_types,
            vec![FilterType::Equality, FilterType::Pattern, FilterType::NullCheck]
        );
        assert_eq!(pattern.repository_compatibility, Compatibility::Standard);
    }

    #[test]
    fn test_flow_pattern() {
        let result = analyze(
            "INSERT INTO Summary (Id, Total)
             SELECT o.Id, SUM(o.Amount) FROM Orders o LEFT JOIN Items i ON i.OrderId = o.Id
             GROUP BY o.Id",
        );
        let pattern = result
            .query_patterns
            .iter()
            .find(|p| p.flow_id.is_some())
            .unwrap();
        assert_eq!(pattern.pattern_type, PatternType::DataAggregation);
        assert_eq!(pattern.primary_entity.as_deref(), Some("Orders"));
        assert_eq!(pattern.related_entities, vec!["Items", "Summary"]);
        assert_eq!(pattern.join_types, vec!["LEFT"]);
        assert_eq!(pattern.complexity, ComplexityLevel::Medium);
    }

    // ========================================================================
    // Method boundaries
    // ========================================================================

    #[test]
    fn test_entity_methods() {
        let result = analyze(
            "CREATE PROC p @id INT AS
             SELECT Name FROM dbo.order_items WHERE ItemId = @id
             UPDATE dbo.order_items SET Name = 'x' WHERE ItemId = @id",
        );
        let names: Vec<&str> = result.methods.iter().map(|m| m.suggested_name.as_str()).collect();
        assert_eq!(names, vec!["GetOrderItemsById", "UpdateOrderItems"]);
        let get = &result.methods[0];
        assert_eq!(get.method_id, "method_0");
        assert_eq!(get.input_parameters.len(), 1);
        assert_eq!(get.input_parameters[0].usage, "FILTER_CONDITION");
        assert_eq!(get.return_data_structure.return_type, Some(ReturnType::EntityList));
        assert_eq!(
            result.methods[1].return_data_structure.return_type,
            Some(ReturnType::Void)
        );
    }

    #[test]
    fn test_covered_blocks_get_no_duplicate_method() {
        let result = analyze(
            "CREATE PROC p AS
             SELECT a FROM T WHERE a = 1
             SELECT b FROM T WHERE b = 2",
        );
        // both statements share block_0; the block itself is not proposed again
        let related: Vec<&Vec<String>> = result.methods.iter().map(|m| &m.related_blocks).collect();
        assert_eq!(related, vec![&vec!["block_0".to_string()]]);
    }

    // ========================================================================
    // Complexity
    // ========================================================================

    #[test]
    fn test_complexity_flags_stop_per_block() {
        let result = analyze(
            "CREATE PROC p AS
             IF 1 = 1
             BEGIN
                 DECLARE c CURSOR FOR SELECT a FROM T
                 SELECT x FROM A CROSS APPLY fn(A.y) f
             END
             WHILE @i < 3
             BEGIN
                 ;WITH cte AS (SELECT 1 AS n) SELECT n FROM cte
             END",
        );
        let kinds: Vec<(ComplexityType, &str)> = result
            .complexity
            .iter()
            .map(|c| (c.complexity_type, c.block_ids[0].as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![(ComplexityType::Cursor, "block_1"), (ComplexityType::Cte, "block_2")]
        );
    }

    #[test]
    fn test_dynamic_sql_and_temp_tables() {
        let result = analyze(
            "CREATE PROC p AS
             CREATE TABLE #t (Id INT)
             UPDATE #t SET Id = 1
             EXEC sp_executesql @sql",
        );
        assert_eq!(result.complexity.len(), 2);
        assert_eq!(result.complexity[0].complexity_type, ComplexityType::DynamicSql);
        assert_eq!(
            result.complexity[0].migration_approach,
            "Use parameterized queries with a custom SQL builder"
        );
        assert_eq!(result.complexity[1].complexity_type, ComplexityType::TempTable);
        assert_eq!(result.complexity[1].complexity_level, ComplexityLevel::High);
        assert_eq!(result.complexity[1].complexity_id, "complex_1");
    }
}
