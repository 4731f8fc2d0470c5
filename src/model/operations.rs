//! Table references, dynamic SQL and temporary structures

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableOperation {
    Select,
    Insert,
    Update,
    Delete,
    MergeTarget,
    MergeSource,
}

impl TableOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableOperation::Select => "SELECT",
            TableOperation::Insert => "INSERT",
            TableOperation::Update => "UPDATE",
            TableOperation::Delete => "DELETE",
            TableOperation::MergeTarget => "MERGE_TARGET",
            TableOperation::MergeSource => "MERGE_SOURCE",
        }
    }
}

impl fmt::Display for TableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One syntactic occurrence of a table in a DML statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub table: String,
    pub operation: TableOperation,
    pub columns: Vec<String>,
    pub block_id: Option<String>,
    /// Index of the owning statement
    #[serde(skip)]
    pub statement: usize,
    /// Byte offset of the table name
    #[serde(skip)]
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstructionPattern {
    DirectExec,
    SpExecutesql,
    ExecStatement,
    StringBuilding,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DynamicParameterUsage {
    Parameter,
    SqlContainer,
}

/// Reconstructed SQL is a guess; every dynamic operation says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSqlParameter {
    pub name: String,
    pub usage: DynamicParameterUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialQuery {
    pub pattern: String,
    pub potential_tables: Vec<String>,
    pub potential_operations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSqlOperation {
    pub id: String,
    pub block_id: Option<String>,
    pub construction_pattern: ConstructionPattern,
    pub parameters: Vec<DynamicSqlParameter>,
    pub potential_queries: Vec<PotentialQuery>,
    pub confidence: Confidence,
    #[serde(skip)]
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TempType {
    LocalTemp,
    TableVariable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempColumn {
    pub name: String,
    pub data_type: String,
}

/// A table that fed rows into a temp structure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempPopulation {
    pub table_reference: String,
    pub operation: String,
    pub block_id: Option<String>,
}

/// A read of a temp structure, optionally feeding another table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempUsage {
    pub operation: String,
    pub target_table: Option<String>,
    pub block_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TempTransformationType {
    Update,
    Filter,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempTransformation {
    #[serde(rename = "type")]
    pub transformation_type: TempTransformationType,
    pub block_id: Option<String>,
    pub description: String,
}

/// A `#temp` table or `@table` variable and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempStructure {
    pub name: String,
    #[serde(rename = "type")]
    pub temp_type: TempType,
    pub definition: String,
    pub columns: Vec<TempColumn>,
    pub populated_from: Vec<TempPopulation>,
    pub used_in: Vec<TempUsage>,
    pub transformations: Vec<TempTransformation>,
}
