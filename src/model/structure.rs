//! Procedure metadata and the logical block arena

use serde::Serialize;

/// Procedure name, parameters and header comments
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureMetadata {
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
    pub header_comments: Vec<String>,
}

/// A declared procedure parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    /// Name including the `@` prefix
    pub name: String,
    pub data_type: String,
    pub default_value: Option<String>,
    pub is_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    ProcedureBody,
    If,
    Else,
    While,
    Case,
    BeginEnd,
    Transaction,
    Try,
    Catch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockPurpose {
    DataRetrieval,
    DataFiltering,
    DataTransformation,
    DataInsertion,
    ControlFlow,
    ErrorHandling,
    TransactionControl,
    Auxiliary,
}

impl BlockPurpose {
    /// `DATA_RETRIEVAL` → `Data Retrieval`
    pub fn title(&self) -> &'static str {
        match self {
            BlockPurpose::DataRetrieval => "Data Retrieval",
            BlockPurpose::DataFiltering => "Data Filtering",
            BlockPurpose::DataTransformation => "Data Transformation",
            BlockPurpose::DataInsertion => "Data Insertion",
            BlockPurpose::ControlFlow => "Control Flow",
            BlockPurpose::ErrorHandling => "Error Handling",
            BlockPurpose::TransactionControl => "Transaction Control",
            BlockPurpose::Auxiliary => "Auxiliary",
        }
    }
}

/// Where an IF/WHILE/CASE condition sits and what it says
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBoundary {
    pub start_line: usize,
    pub end_line: usize,
    pub condition: String,
}

/// A syntactic region of the procedure.
///
/// Blocks live in a flat arena ordered by creation; relationships are ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    /// Inclusive, 0-based
    pub line_range: [usize; 2],
    pub parent_block: Option<String>,
    pub code_text: String,
    pub comments: Vec<String>,
    pub child_blocks: Vec<String>,
    pub next_block: Option<String>,
    pub condition_boundary: Option<ConditionBoundary>,
    pub purpose: BlockPurpose,
    /// Byte range of `code_text` in the source
    #[serde(skip)]
    pub span: (usize, usize),
}

impl LogicalBlock {
    #[inline]
    pub fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.span.0 && offset < self.span.1
    }

    #[inline]
    pub fn contains_span(&self, start: usize, end: usize) -> bool {
        start >= self.span.0 && end <= self.span.1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.span.1 - self.span.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
