//! Repository-migration hints: query patterns, method boundaries, complexity

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    FilteredRetrieval,
    JoinedRetrieval,
    Aggregation,
    InsertFromSelect,
    UpdateOperation,
    DeleteOperation,
    OtherOperation,
    DataAggregation,
    FilteredJoin,
    DataJoin,
    DataFiltering,
    DataUpdate,
    DataInsert,
    DataTransformation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterType {
    Equality,
    Range,
    Pattern,
    List,
    NullCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compatibility {
    Standard,
    Complex,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPattern {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub complexity: ComplexityLevel,
    pub table_count: usize,
    pub join_types: Vec<String>,
    pub filter_types: Vec<FilterType>,
    pub primary_entity: Option<String>,
    pub related_entities: Vec<String>,
    pub repository_compatibility: Compatibility,
    pub block_ids: Vec<String>,
    pub flow_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnType {
    EntityList,
    Void,
    Bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDataStructure {
    pub primary_entity: String,
    pub included_columns: Option<Vec<String>>,
    pub return_type: Option<ReturnType>,
    pub source_entities: Option<Vec<String>>,
    pub operations: Option<Vec<String>>,
    pub related_entities: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub usage: String,
}

/// A suggested data-access method
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryMethod {
    pub method_id: String,
    pub suggested_name: String,
    pub description: String,
    pub related_blocks: Vec<String>,
    pub input_parameters: Vec<MethodParameter>,
    pub return_data_structure: ReturnDataStructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityType {
    DynamicSql,
    TempTable,
    Pivot,
    Unpivot,
    Merge,
    Cursor,
    Output,
    Cte,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityIndicator {
    pub complexity_id: String,
    pub block_ids: Vec<String>,
    pub complexity_level: ComplexityLevel,
    pub complexity_type: ComplexityType,
    pub description: String,
    pub migration_approach: String,
    pub alternative_approaches: Vec<String>,
}
