//! Operation detection: table references, dynamic SQL, temp structures
//!
//! Table references come from a token parser run over each statement
//! ([`references`]). Each reference is then linked to the smallest block whose
//! text mentions both the table and the operation keyword. Dynamic SQL and
//! temp-structure lifecycles are separate passes over the same statements.

pub mod dynamic_sql;
pub mod references;
pub mod temp_tables;

use tracing::debug;

use crate::model::{DynamicSqlOperation, LogicalBlock, TableOperation, TableReference, TempStructure};
use crate::parser::identifier_utils::unqualified;
use crate::parser::{SqlSource, StatementSpan};
use crate::util::{contains_word_ci, find_word_ci};

use references::extract_references;
use temp_tables::SelectInto;

/// Everything the operation detector produces.
#[derive(Debug, Clone, Default)]
pub struct OperationAnalysis {
    pub table_references: Vec<TableReference>,
    pub dynamic_sql: Vec<DynamicSqlOperation>,
    pub temp_structures: Vec<TempStructure>,
}

/// Detect table references, dynamic SQL and temp structures.
pub fn detect_operations(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    spans: &[StatementSpan],
) -> OperationAnalysis {
    let mut table_references = Vec::new();
    let mut select_intos = Vec::new();

    for (idx, span) in spans.iter().enumerate() {
        let extracted = extract_references(&source.sig()[span.first..span.last]);
        for r in extracted.references {
            table_references.push(TableReference {
                table: r.table,
                operation: r.operation,
                columns: r.columns,
                block_id: None,
                statement: idx,
                offset: r.offset,
            });
        }
        if let Some((name, offset)) = extracted.select_into {
            select_intos.push(SelectInto {
                statement: idx,
                name,
                offset,
            });
        }
    }

    link_references(source, blocks, &mut table_references);

    let dynamic_sql = dynamic_sql::detect_dynamic_sql(source, blocks, spans);
    let temp_structures =
        temp_tables::detect_temp_structures(source, spans, &select_intos, &table_references);

    debug!(
        "Detected {} table references, {} dynamic SQL operations, {} temp structures",
        table_references.len(),
        dynamic_sql.len(),
        temp_structures.len()
    );

    OperationAnalysis {
        table_references,
        dynamic_sql,
        temp_structures,
    }
}

/// Keyword a block's text must contain for a reference to link to it.
fn link_keywords(operation: TableOperation) -> &'static [&'static str] {
    match operation {
        TableOperation::Select => &["SELECT"],
        TableOperation::Insert => &["INSERT", "INTO"],
        TableOperation::Update => &["UPDATE"],
        TableOperation::Delete => &["DELETE"],
        TableOperation::MergeTarget | TableOperation::MergeSource => &["MERGE"],
    }
}

/// Whether a block's text mentions the table together with the keyword.
fn block_mentions(source: &SqlSource, block: &LogicalBlock, reference: &TableReference) -> bool {
    let text = &source.masked()[block.span.0..block.span.1];
    !find_word_ci(text, unqualified(&reference.table)).is_empty()
        && link_keywords(reference.operation)
            .iter()
            .any(|k| contains_word_ci(text, k))
}

/// Link each reference to the smallest block mentioning its table and
/// operation keyword. Among equally small candidates, a block holding the
/// reference itself wins, then the latest (most nested) block.
pub(crate) fn link_references(source: &SqlSource, blocks: &[LogicalBlock], references: &mut [TableReference]) {
    for reference in references.iter_mut() {
        let linked = blocks
            .iter()
            .rev()
            .filter(|b| block_mentions(source, b, reference))
            .min_by_key(|b| (b.len(), !b.contains_offset(reference.offset)));
        reference.block_id = linked.map(|b| b.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::structure::analyze_structure;

    fn detect(sql: &str) -> (Vec<LogicalBlock>, OperationAnalysis) {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        let ops = detect_operations(&source, &blocks, &source.statement_spans());
        (blocks, ops)
    }

    #[test]
    fn test_if_else_reference_links_to_else() {
        let (blocks, ops) = detect(
            "CREATE PROCEDURE dbo.P @x INT AS IF @x IS NULL BEGIN SET @x = 30 END ELSE BEGIN SELECT * FROM T WHERE Id = @x END",
        );
        assert_eq!(ops.table_references.len(), 1);
        let reference = &ops.table_references[0];
        assert_eq!(reference.table, "T");
        assert_eq!(reference.operation, TableOperation::Select);
        let block = blocks
            .iter()
            .find(|b| Some(&b.id) == reference.block_id.as_ref())
            .unwrap();
        assert_eq!(block.block_type, crate::model::BlockType::Else);
    }

    #[test]
    fn test_reference_statement_indices() {
        let (_, ops) = detect("SELECT a FROM A; UPDATE B SET x = 1;");
        assert_eq!(ops.table_references[0].statement, 0);
        assert_eq!(ops.table_references[1].statement, 1);
        assert_eq!(ops.table_references[1].operation, TableOperation::Update);
    }

    #[test]
    fn test_reference_in_root_links_to_root() {
        let (_, ops) = detect("CREATE PROC p AS SELECT a FROM Orders");
        assert_eq!(ops.table_references[0].block_id.as_deref(), Some("block_0"));
    }

    #[test]
    fn test_unmatched_keyword_leaves_block_empty() {
        let source = SqlSource::new("SELECT 1");
        let blocks = analyze_structure(&source, None).blocks;
        let mut refs = vec![TableReference {
            table: "Missing".to_string(),
            operation: TableOperation::Select,
            columns: vec![],
            block_id: None,
            statement: 0,
            offset: 0,
        }];
        link_references(&source, &blocks, &mut refs);
        assert!(refs[0].block_id.is_none());
    }
}
