//! Classified statements

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementPurpose {
    Retrieval,
    Persistence,
    Structure,
    Variable,
    ControlFlow,
    TransactionControl,
    ErrorHandling,
    Execution,
    Auxiliary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubPurpose {
    // Retrieval
    VariableAssignment,
    ResultSet,
    Aggregation,
    JoinQuery,
    SimpleQuery,
    DateRangeFilter,
    StatusCheck,
    IdLookup,
    // Persistence
    SingleInsert,
    BulkInsert,
    Logging,
    Update,
    Delete,
    Merge,
    Truncate,
    // Structure
    TempTableCreation,
    TableCreation,
    IndexCreation,
    ObjectCreation,
    ObjectModification,
    ObjectDeletion,
    // Variables
    TableVariable,
    CursorDeclaration,
    VariableDeclaration,
    SessionSetting,
    Calculation,
    StringBuilding,
    // Control flow
    ExistenceCheck,
    NullCheck,
    VariableCondition,
    GeneralCondition,
    Validation,
    Loop,
    ProcedureExit,
    // Transactions and errors
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    TryBlock,
    CatchBlock,
    ErrorRaising,
    // Blocks, execution and the rest
    BlockStructure,
    DynamicSql,
    ProcedureCall,
    CursorOperation,
    MessageOutput,
    Other,
}

/// One statement with its classification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub statement_id: String,
    pub block_id: Option<String>,
    pub line_range: [usize; 2],
    pub statement_text: String,
    pub purpose: StatementPurpose,
    pub sub_purpose: SubPurpose,
    pub affected_entities: Vec<String>,
    pub conditions: Vec<String>,
    /// Significant-token range `[first, last)`
    #[serde(skip)]
    pub tokens: (usize, usize),
    /// Byte range in the source
    #[serde(skip)]
    pub span: (usize, usize),
}
