//! The analysis pipeline.
//!
//! Stages run in dependency order over one shared [`SqlSource`]:
//! structure → operations → rules → data flow → statements → parameters →
//! repository. Each stage is a free function returning owned results; no
//! state outlives a single procedure.

pub mod data_flow;
pub mod operations;
pub mod parameters;
pub mod repository;
pub mod rules;
pub mod statements;
pub mod structure;

use tracing::debug;

use crate::model::{BusinessRule, LogicalBlock, ProcedureMetadata, Statement, TableReference};
use crate::parser::identifier_utils::same_object;
use crate::parser::SqlSource;
use crate::util::is_ident_byte;

pub use data_flow::DataFlowAnalysis;
pub use operations::OperationAnalysis;
pub use parameters::ParameterAnalysis;
pub use repository::RepositoryAnalysis;
pub use structure::StructureAnalysis;

/// How much of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Structure, operations and rules only
    Basic,
    /// Every stage
    #[default]
    Full,
}

/// Everything derived from one procedure.
#[derive(Debug, Clone)]
pub struct ProcedureAnalysis {
    pub metadata: ProcedureMetadata,
    pub blocks: Vec<LogicalBlock>,
    pub operations: OperationAnalysis,
    pub business_rules: Vec<BusinessRule>,
    /// Present in [`AnalysisMode::Full`]
    pub details: Option<DetailedAnalysis>,
}

/// Output of the stages skipped in basic mode.
#[derive(Debug, Clone)]
pub struct DetailedAnalysis {
    pub data_flow: DataFlowAnalysis,
    pub statements: Vec<Statement>,
    pub parameters: ParameterAnalysis,
    pub repository: RepositoryAnalysis,
}

/// Run the pipeline over an already tokenized procedure.
pub fn analyze_source(source: &SqlSource, name: Option<&str>, mode: AnalysisMode) -> ProcedureAnalysis {
    let StructureAnalysis { metadata, blocks } = structure::analyze_structure(source, name);
    let spans = source.statement_spans();
    let operations = operations::detect_operations(source, &blocks, &spans);
    let business_rules = rules::extract_rules(source, &blocks, &operations.table_references);

    let details = match mode {
        AnalysisMode::Basic => None,
        AnalysisMode::Full => {
            let data_flow = data_flow::analyze_data_flow(source, &blocks, &operations, &spans);
            let statements = statements::classify_statements(
                source,
                &blocks,
                &operations.table_references,
                &spans,
            );
            let parameters = parameters::track_parameters(source, &metadata, &blocks, &statements);
            let repository = repository::analyze_repository(
                source,
                &metadata,
                &blocks,
                &operations,
                &data_flow.flows,
                &statements,
                &parameters.usage,
            );
            Some(DetailedAnalysis {
                data_flow,
                statements,
                parameters,
                repository,
            })
        }
    };

    debug!(
        "Analyzed '{}': {} blocks, {} table references, {} rules",
        metadata.name,
        blocks.len(),
        operations.table_references.len(),
        business_rules.len()
    );

    ProcedureAnalysis {
        metadata,
        blocks,
        operations,
        business_rules,
        details,
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Sequential `prefix_N` ids scoped to one analysis run.
#[derive(Debug, Clone)]
pub struct IdSequence {
    prefix: &'static str,
    next: usize,
}

impl IdSequence {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}_{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Smallest block containing the byte range. Among equal spans the later
/// block is the nested one (see `link_blocks`), so ties go to it.
pub(crate) fn innermost_block(blocks: &[LogicalBlock], start: usize, end: usize) -> Option<&LogicalBlock> {
    blocks
        .iter()
        .rev()
        .filter(|b| b.contains_span(start, end))
        .min_by_key(|b| b.len())
}

/// Ids of every block containing the byte range, outermost first.
pub(crate) fn blocks_containing(blocks: &[LogicalBlock], start: usize, end: usize) -> Vec<String> {
    let mut found: Vec<&LogicalBlock> = blocks.iter().filter(|b| b.contains_span(start, end)).collect();
    found.sort_by_key(|b| std::cmp::Reverse(b.len()));
    found.into_iter().map(|b| b.id.clone()).collect()
}

pub(crate) fn block_by_id<'a>(blocks: &'a [LogicalBlock], id: &str) -> Option<&'a LogicalBlock> {
    blocks.iter().find(|b| b.id == id)
}

/// Distinct table names in first-reference order.
pub(crate) fn known_tables(refs: &[TableReference]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for r in refs {
        if !tables.iter().any(|t| same_object(t, &r.table)) {
            tables.push(r.table.clone());
        }
    }
    tables
}

/// End of a clause that starts at byte `from` of `code` (comment- and
/// string-masked text): the first `;`, unmatched `)`, or one of `stop_words`
/// at parenthesis depth 0.
pub(crate) fn clause_end(code: &str, from: usize, stop_words: &[&str]) -> usize {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' if depth == 0 => return i,
            b')' => depth -= 1,
            b';' if depth == 0 => return i,
            b if depth == 0 && is_ident_byte(b) && (i == 0 || !is_ident_byte(bytes[i - 1])) => {
                let end = (i..bytes.len())
                    .find(|&j| !is_ident_byte(bytes[j]))
                    .unwrap_or(bytes.len());
                let word = &code[i..end];
                if i > from && stop_words.iter().any(|s| word.eq_ignore_ascii_case(s)) {
                    return i;
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_end() {
        let code = "WHERE a = 1 AND b IN (SELECT x FROM y) ORDER BY a";
        let end = clause_end(code, 6, &["ORDER", "SELECT"]);
        assert_eq!(&code[6..end], "a = 1 AND b IN (SELECT x FROM y) ");
        assert_eq!(clause_end("x = 1) END", 0, &["END"]), 5);
    }

    #[test]
    fn test_id_sequence() {
        let mut ids = IdSequence::new("rule");
        assert_eq!(ids.next_id(), "rule_0");
        assert_eq!(ids.next_id(), "rule_1");
    }

    #[test]
    fn test_basic_mode_skips_details() {
        let source = SqlSource::new("CREATE PROC p AS SELECT a FROM T");
        let analysis = analyze_source(&source, None, AnalysisMode::Basic);
        assert!(analysis.details.is_none());
        assert_eq!(analysis.operations.table_references.len(), 1);
    }

    #[test]
    fn test_innermost_block_prefers_smallest() {
        let source = SqlSource::new("CREATE PROC p AS IF @a = 1 BEGIN SELECT a FROM T END");
        let analysis = analyze_source(&source, None, AnalysisMode::Basic);
        let offset = source.text().find("SELECT").unwrap();
        let block = innermost_block(&analysis.blocks, offset, offset + 6).unwrap();
        assert_eq!(block.id, "block_1");
        assert_eq!(
            blocks_containing(&analysis.blocks, offset, offset + 6),
            vec!["block_0", "block_1"]
        );
    }

    #[test]
    fn test_innermost_block_prefers_nested_on_equal_span() {
        let source = SqlSource::new("IF EXISTS (SELECT 1 FROM Orders) BEGIN UPDATE Orders SET a = 1 END");
        let analysis = analyze_source(&source, None, AnalysisMode::Basic);
        assert_eq!(analysis.blocks[0].span, analysis.blocks[1].span);

        let offset = source.text().find("UPDATE").unwrap();
        let block = innermost_block(&analysis.blocks, offset, offset + 6).unwrap();
        assert_eq!(block.id, "block_1");
        let linked: Vec<Option<&str>> = analysis
            .operations
            .table_references
            .iter()
            .map(|r| r.block_id.as_deref())
            .collect();
        assert_eq!(linked, vec![Some("block_1"), Some("block_1")]);
    }
}
