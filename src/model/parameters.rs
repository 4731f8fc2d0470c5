//! Parameter usage, test values and parameter dependencies

use serde::Serialize;

/// The role a parameter plays at one occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageType {
    FilterCondition,
    FilterPattern,
    FilterList,
    FilterRange,
    FilterOther,
    JoinCondition,
    JoinOther,
    SortParameter,
    GroupParameter,
    HavingCondition,
    PaginationLimit,
    PaginationOffset,
    InsertValue,
    UpdateValue,
    ConditionalCheck,
    ReturnValue,
    ProcedureParameter,
    VariableInitialization,
    VariableAssignment,
    DynamicSqlParameter,
    OtherUsage,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::FilterCondition => "FILTER_CONDITION",
            UsageType::FilterPattern => "FILTER_PATTERN",
            UsageType::FilterList => "FILTER_LIST",
            UsageType::FilterRange => "FILTER_RANGE",
            UsageType::FilterOther => "FILTER_OTHER",
            UsageType::JoinCondition => "JOIN_CONDITION",
            UsageType::JoinOther => "JOIN_OTHER",
            UsageType::SortParameter => "SORT_PARAMETER",
            UsageType::GroupParameter => "GROUP_PARAMETER",
            UsageType::HavingCondition => "HAVING_CONDITION",
            UsageType::PaginationLimit => "PAGINATION_LIMIT",
            UsageType::PaginationOffset => "PAGINATION_OFFSET",
            UsageType::InsertValue => "INSERT_VALUE",
            UsageType::UpdateValue => "UPDATE_VALUE",
            UsageType::ConditionalCheck => "CONDITIONAL_CHECK",
            UsageType::ReturnValue => "RETURN_VALUE",
            UsageType::ProcedureParameter => "PROCEDURE_PARAMETER",
            UsageType::VariableInitialization => "VARIABLE_INITIALIZATION",
            UsageType::VariableAssignment => "VARIABLE_ASSIGNMENT",
            UsageType::DynamicSqlParameter => "DYNAMIC_SQL_PARAMETER",
            UsageType::OtherUsage => "OTHER_USAGE",
        }
    }

    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            UsageType::FilterCondition
                | UsageType::FilterPattern
                | UsageType::FilterList
                | UsageType::FilterRange
                | UsageType::FilterOther
        )
    }

    pub fn is_pagination(&self) -> bool {
        matches!(self, UsageType::PaginationLimit | UsageType::PaginationOffset)
    }

    /// Collapse to the parameter-level usage pattern.
    pub fn pattern(&self) -> &'static str {
        match self {
            u if u.is_filter() => "FILTER_PARAMETER",
            UsageType::JoinCondition | UsageType::JoinOther => "JOIN_PARAMETER",
            u if u.is_pagination() => "PAGINATION_PARAMETER",
            UsageType::InsertValue | UsageType::UpdateValue => "DATA_VALUE",
            UsageType::ConditionalCheck => "CONTROL_PARAMETER",
            other => other.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterOccurrence {
    pub block_id: Option<String>,
    pub line_number: usize,
    pub usage: UsageType,
    pub context: String,
    pub entity: Option<String>,
    pub condition: Option<String>,
    #[serde(skip)]
    pub statement: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterUsage {
    pub parameter_name: String,
    pub parameter_type: String,
    pub default_value: Option<String>,
    pub usage_pattern: String,
    pub occurrences: Vec<ParameterOccurrence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValuePurpose {
    DefaultValue,
    LiteralValue,
    BoundaryValue,
    NegativeValue,
    ExtremeValue,
    CommonValue,
    EmptyValue,
    WildcardValue,
    MaxLengthValue,
    CurrentValue,
    RelativeValue,
    NullValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedValue {
    pub value: String,
    pub purpose: ValuePurpose,
    pub scenario: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCondition {
    pub condition: String,
    pub entity: Option<String>,
    pub usage: UsageType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestValueCandidate {
    pub parameter_name: String,
    pub data_type: String,
    pub default_value: Option<String>,
    pub usage_context: String,
    pub conditions: Vec<TestCondition>,
    pub suggested_test_values: Vec<SuggestedValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyKind {
    UsedTogether,
    ConditionalRelationship,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDependency {
    pub parameter1: String,
    pub parameter2: String,
    pub relationship: DependencyKind,
    pub statement_id: String,
    pub block_id: Option<String>,
}
