//! Business rules, data flows and entity relationships

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    Validation,
    Calculation,
    ProcessFlow,
    DataIntegrity,
    Security,
    Timing,
}

/// A heuristic, non-authoritative business rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRule {
    pub rule_id: String,
    pub category: RuleCategory,
    pub description: String,
    pub block_ids: Vec<String>,
    pub condition: Option<String>,
    pub action: Option<String>,
    pub entities: Vec<String>,
    pub code_snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowOperation {
    Join,
    Filter,
    Aggregate,
    Sort,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for FlowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlowOperation::Join => "JOIN",
            FlowOperation::Filter => "FILTER",
            FlowOperation::Aggregate => "AGGREGATE",
            FlowOperation::Sort => "SORT",
            FlowOperation::Insert => "INSERT",
            FlowOperation::Update => "UPDATE",
            FlowOperation::Delete => "DELETE",
        })
    }
}

/// Detail of how data is reshaped inside a block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transformation {
    #[serde(rename_all = "camelCase")]
    Join {
        join_type: String,
        entities: Vec<String>,
        join_condition: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Aggregate {
        function: String,
        source_column: String,
    },
    Filter { condition: String },
}

/// A derived source → intermediate → target movement of data
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    pub flow_id: String,
    pub source_entities: Vec<String>,
    pub intermediate_entities: Vec<String>,
    pub target_entities: Vec<String>,
    pub operations: Vec<FlowOperation>,
    pub block_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<Transformation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Joins,
    Populates,
    Updates,
    References,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelationship {
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: RelationType,
    pub flow_id: String,
    pub operations: Vec<FlowOperation>,
}

/// `SET @v = expr` / `SELECT @v = expr` with the tables feeding it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableAssignment {
    pub variable: String,
    pub expression: String,
    pub block_id: Option<String>,
    pub line_number: usize,
    pub source_entities: Vec<String>,
    #[serde(skip)]
    pub statement: usize,
}
