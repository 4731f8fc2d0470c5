//! Procedure metadata and logical block extraction.
//!
//! Blocks are found in one walk over the significant tokens of the body.
//! BEGIN/END and CASE/END nesting is counted by the segmenter, so an inner
//! `END` never closes an outer block. Transactions are paired afterwards and
//! widened so they never partially overlap another block. Parents are then
//! assigned by containment.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::tokenizer::Token;
use tracing::debug;

use crate::model::{
    BlockPurpose, BlockType, ConditionBoundary, LogicalBlock, ParameterInfo, ProcedureMetadata,
};
use crate::parser::lexer::Lexeme;
use crate::parser::segmenter::{
    condition_end, find_block_end, is_block_begin, is_transaction_begin, statement_end,
};
use crate::parser::SqlSource;
use crate::util::collapse_whitespace;

use super::IdSequence;

/// Comments are collected from this many leading bytes when there is no header.
const HEADERLESS_COMMENT_WINDOW: usize = 1000;

static DML_WRITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:INSERT|UPDATE|DELETE|MERGE)\b").unwrap());
static TRANSFORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bJOIN\b|\bUNION\b|\bGROUP\s+BY\b|\bORDER\s+BY\b|\bPIVOT\b|\bCASE\s+WHEN\b")
        .unwrap()
});
static FILTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b|\bHAVING\b").unwrap());
/// First word of an IF condition, past any opening parentheses.
static IF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIF\s+[(\s]*([^\s(]+)").unwrap());
static SELECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").unwrap());
static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bBEGIN\s+TRAN|\bCOMMIT\b|\bROLLBACK\b|\bRETURN\b|\bTHROW\b|\bRAISERROR\b|\bTRY\b|\bCATCH\b",
    )
    .unwrap()
});

/// Output of the structure stage
#[derive(Debug, Clone)]
pub struct StructureAnalysis {
    pub metadata: ProcedureMetadata,
    pub blocks: Vec<LogicalBlock>,
}

/// Extract metadata and the block arena.
///
/// `name` overrides the name found in the `CREATE PROCEDURE` header.
pub fn analyze_structure(source: &SqlSource, name: Option<&str>) -> StructureAnalysis {
    let metadata = extract_metadata(source, name);

    let mut walker = BlockWalker {
        text: source.text(),
        sig: source.sig(),
        blocks: Vec::new(),
    };
    walker.walk(source.body_sig_start(), source.sig().len());
    walker.pair_transactions(source.body_sig_start());

    let blocks = assemble_blocks(source, walker.blocks);
    debug!(
        "Structure: {} blocks, {} parameters",
        blocks.len(),
        metadata.parameters.len()
    );

    StructureAnalysis { metadata, blocks }
}

fn extract_metadata(source: &SqlSource, name: Option<&str>) -> ProcedureMetadata {
    let header = source.header();

    let comment_limit = match header {
        Some(h) => h.body_start,
        None => HEADERLESS_COMMENT_WINDOW,
    };
    let header_comments = source
        .lexemes()
        .iter()
        .take_while(|lx| lx.start < comment_limit)
        .filter_map(Lexeme::comment_text)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let parameters = header
        .map(|h| {
            h.parameters
                .iter()
                .map(|p| ParameterInfo {
                    name: p.name.clone(),
                    data_type: p.data_type.clone(),
                    default_value: p.default_value.clone(),
                    is_output: p.is_output,
                })
                .collect()
        })
        .unwrap_or_default();

    let name = name
        .map(str::to_string)
        .or_else(|| header.map(|h| h.name.clone()))
        .unwrap_or_default();

    ProcedureMetadata {
        name,
        parameters,
        header_comments,
    }
}

// =============================================================================
// Block walker
// =============================================================================

/// A block as significant-token indices; `last` is inclusive.
#[derive(Debug, Clone, Copy)]
struct RawBlock {
    kind: BlockType,
    first: usize,
    last: usize,
    condition: Option<(usize, usize)>,
}

/// Extent of an IF/WHILE/ELSE body; `inner` is the range walked for children.
#[derive(Debug, Clone, Copy)]
struct Body {
    last: usize,
    inner: (usize, usize),
}

#[derive(Debug, Clone, Copy)]
struct Conditional {
    condition: (usize, usize),
    body: Body,
    /// `ELSE` keyword index and its body
    else_branch: Option<(usize, Body)>,
}

impl Conditional {
    fn last(&self) -> usize {
        self.else_branch.map_or(self.body.last, |(_, b)| b.last)
    }
}

#[derive(Debug, Clone, Copy)]
struct TryCatch {
    /// Index of `END` closing the TRY
    try_end: usize,
    /// Last token of `END TRY`
    try_last: usize,
    /// (`BEGIN` index, `END` index, last token of `END CATCH`)
    catch: Option<(usize, usize, usize)>,
}

struct BlockWalker<'a> {
    text: &'a str,
    sig: &'a [Lexeme],
    blocks: Vec<RawBlock>,
}

impl BlockWalker<'_> {
    fn push(&mut self, kind: BlockType, first: usize, last: usize, condition: Option<(usize, usize)>) {
        self.blocks.push(RawBlock {
            kind,
            first,
            last,
            condition,
        });
    }

    fn walk(&mut self, from: usize, to: usize) {
        let sig = self.sig;
        let mut i = from;
        while i < to {
            let token = &sig[i];

            if token.is_any_keyword(&["IF", "WHILE"]) {
                if let Some(c) = self.conditional(i, to) {
                    let kind = if token.is_keyword("IF") {
                        BlockType::If
                    } else {
                        BlockType::While
                    };
                    self.push(kind, i, c.body.last, Some(c.condition));
                    self.walk(c.condition.0, c.condition.1);
                    self.walk(c.body.inner.0, c.body.inner.1);
                    if let Some((else_kw, body)) = c.else_branch {
                        self.push(BlockType::Else, else_kw, body.last, None);
                        self.walk(body.inner.0, body.inner.1);
                    }
                    i = c.last() + 1;
                    continue;
                }
            } else if token.is_keyword("BEGIN") {
                let next = sig.get(i + 1);
                if next.is_some_and(|n| n.is_keyword("TRY")) {
                    if let Some(tc) = self.try_catch(i, to) {
                        self.push(BlockType::Try, i, tc.try_last, None);
                        self.walk(i + 2, tc.try_end);
                        i = tc.try_last + 1;
                        if let Some((begin, end, last)) = tc.catch {
                            self.push(BlockType::Catch, begin, last, None);
                            self.walk(begin + 2, end);
                            i = last + 1;
                        }
                        continue;
                    }
                } else if is_block_begin(sig, i) && !next.is_some_and(|n| n.is_keyword("CATCH")) {
                    if let Some(end) = find_block_end(sig, i, to) {
                        self.push(BlockType::BeginEnd, i, end, None);
                        self.walk(i + 1, end);
                        i = end + 1;
                        continue;
                    }
                }
            } else if token.is_keyword("CASE") {
                if let Some(end) = find_block_end(sig, i, to) {
                    let condition = self.case_condition(i, end);
                    self.push(BlockType::Case, i, end, Some(condition));
                    self.walk(i + 1, end);
                    i = end + 1;
                    continue;
                }
            }

            i += 1;
        }
    }

    /// IF/WHILE at `at`: condition, body, and for IF an optional ELSE.
    fn conditional(&self, at: usize, to: usize) -> Option<Conditional> {
        let sig = self.sig;
        let body_start = condition_end(sig, at + 1, to);
        if body_start >= to {
            return None;
        }
        let body = self.body_at(body_start, to)?;

        let mut else_branch = None;
        if sig[at].is_keyword("IF") {
            let mut after = body.last + 1;
            if sig.get(after).is_some_and(|t| t.is(&Token::SemiColon)) {
                after += 1;
            }
            if after < to && sig[after].is_keyword("ELSE") {
                else_branch = self.body_at(after + 1, to).map(|b| (after, b));
            }
        }

        Some(Conditional {
            condition: (at + 1, body_start),
            body,
            else_branch,
        })
    }

    /// Body starting at `at`: a BEGIN/END block, a TRY/CATCH pair, a nested
    /// IF/WHILE (including its ELSE) or a single statement.
    fn body_at(&self, at: usize, to: usize) -> Option<Body> {
        let sig = self.sig;
        if at >= to {
            return None;
        }
        let token = &sig[at];
        if token.is_any_keyword(&["END", "ELSE"]) {
            return None;
        }

        if token.is_keyword("BEGIN") && is_block_begin(sig, at) {
            if sig.get(at + 1).is_some_and(|n| n.is_keyword("TRY")) {
                let tc = self.try_catch(at, to)?;
                let last = tc.catch.map_or(tc.try_last, |(_, _, last)| last);
                return Some(Body {
                    last,
                    inner: (at, last + 1),
                });
            }
            let end = find_block_end(sig, at, to)?;
            return Some(Body {
                last: end,
                inner: (at + 1, end),
            });
        }

        if token.is_any_keyword(&["IF", "WHILE"]) {
            let nested = self.conditional(at, to)?;
            let last = nested.last();
            return Some(Body {
                last,
                inner: (at, last + 1),
            });
        }

        let end = statement_end(sig, at, to);
        if end <= at {
            return None;
        }
        Some(Body {
            last: end - 1,
            inner: (at, end),
        })
    }

    /// `BEGIN TRY ... END TRY`, plus `BEGIN CATCH ... END CATCH` when only
    /// whitespace separates the two.
    fn try_catch(&self, at: usize, to: usize) -> Option<TryCatch> {
        let sig = self.sig;
        let try_end = find_block_end(sig, at, to)?;
        let try_last = if sig.get(try_end + 1).is_some_and(|n| n.is_keyword("TRY")) {
            try_end + 1
        } else {
            try_end
        };

        let begin = try_last + 1;
        let catch = if begin + 1 < to
            && sig[begin].is_keyword("BEGIN")
            && sig[begin + 1].is_keyword("CATCH")
            && self.text[sig[try_last].end..sig[begin].start].trim().is_empty()
        {
            find_block_end(sig, begin, to).map(|end| {
                let last = if sig.get(end + 1).is_some_and(|n| n.is_keyword("CATCH")) {
                    end + 1
                } else {
                    end
                };
                (begin, end, last)
            })
        } else {
            None
        };

        Some(TryCatch {
            try_end,
            try_last,
            catch,
        })
    }

    /// Tokens between `CASE` and its first `THEN`, without a leading `WHEN`.
    fn case_condition(&self, at: usize, end: usize) -> (usize, usize) {
        let sig = self.sig;
        let mut nested = 0usize;
        let mut then = end;
        for (k, token) in sig.iter().enumerate().take(end).skip(at + 1) {
            if token.is_keyword("CASE") {
                nested += 1;
            } else if token.is_keyword("END") {
                nested = nested.saturating_sub(1);
            } else if token.is_keyword("THEN") && nested == 0 {
                then = k;
                break;
            }
        }
        let start = if sig.get(at + 1).is_some_and(|t| t.is_keyword("WHEN")) {
            at + 2
        } else {
            at + 1
        };
        (start.min(then), then)
    }

    /// Pair each `BEGIN TRAN` with the nearest following COMMIT/ROLLBACK.
    ///
    /// Nested transactions are not modeled. The span is widened until it no
    /// longer partially overlaps any other block.
    fn pair_transactions(&mut self, from: usize) {
        let sig = self.sig;
        let n = sig.len();
        for i in from..n {
            if !is_transaction_begin(sig, i) {
                continue;
            }
            let Some(close) = (i + 2..n).find(|&j| sig[j].is_any_keyword(&["COMMIT", "ROLLBACK"]))
            else {
                continue;
            };
            let (mut first, mut last) = (i, statement_end(sig, close, n).saturating_sub(1).max(close));

            loop {
                let mut changed = false;
                for b in &self.blocks {
                    let overlaps = b.first <= last && first <= b.last;
                    let nested = (b.first <= first && last <= b.last)
                        || (first <= b.first && b.last <= last);
                    if overlaps && !nested {
                        first = first.min(b.first);
                        last = last.max(b.last);
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            self.push(BlockType::Transaction, first, last, None);
        }
    }
}

// =============================================================================
// Assembly
// =============================================================================

fn assemble_blocks(source: &SqlSource, raw: Vec<RawBlock>) -> Vec<LogicalBlock> {
    let text = source.text();
    let sig = source.sig();
    let mut ids = IdSequence::new("block");

    let mut blocks = Vec::with_capacity(raw.len() + 1);
    blocks.push(LogicalBlock {
        id: ids.next_id(),
        block_type: BlockType::ProcedureBody,
        line_range: [0, source.line_count().saturating_sub(1)],
        parent_block: None,
        code_text: text.to_string(),
        comments: comments_in(source, 0, text.len()),
        child_blocks: Vec::new(),
        next_block: None,
        condition_boundary: None,
        purpose: BlockPurpose::Auxiliary,
        span: (0, text.len()),
    });

    for rb in raw {
        let (start, end) = (sig[rb.first].start, sig[rb.last].end);
        let condition_boundary = rb
            .condition
            .filter(|(a, b)| a < b)
            .map(|(a, b)| ConditionBoundary {
                start_line: source.line_of(sig[a].start),
                end_line: source.line_of(sig[b - 1].end.saturating_sub(1)),
                condition: collapse_whitespace(source.span_text(a, b)),
            });
        blocks.push(LogicalBlock {
            id: ids.next_id(),
            block_type: rb.kind,
            line_range: [
                source.line_of(start),
                source.line_of(end.saturating_sub(1).max(start)),
            ],
            parent_block: None,
            code_text: text[start..end].to_string(),
            comments: comments_in(source, start, end),
            child_blocks: Vec::new(),
            next_block: None,
            condition_boundary,
            purpose: BlockPurpose::Auxiliary,
            span: (start, end),
        });
    }

    link_blocks(&mut blocks);
    for block in &mut blocks {
        let masked = &source.masked()[block.span.0..block.span.1];
        block.purpose = classify_purpose(block.block_type, masked);
    }
    blocks
}

fn comments_in(source: &SqlSource, start: usize, end: usize) -> Vec<String> {
    source
        .lexemes()
        .iter()
        .filter(|lx| lx.start >= start && lx.end <= end)
        .filter_map(Lexeme::comment_text)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Assign parents by containment, then children and next siblings.
fn link_blocks(blocks: &mut [LogicalBlock]) {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by(|&a, &b| {
        blocks[a]
            .span
            .0
            .cmp(&blocks[b].span.0)
            .then(blocks[b].span.1.cmp(&blocks[a].span.1))
            .then(a.cmp(&b))
    });

    let mut parents: Vec<Option<usize>> = vec![None; blocks.len()];
    let mut stack: Vec<usize> = Vec::new();
    for &idx in &order {
        let (start, end) = blocks[idx].span;
        while let Some(&top) = stack.last() {
            if blocks[top].contains_span(start, end) {
                break;
            }
            stack.pop();
        }
        parents[idx] = stack.last().copied();
        stack.push(idx);
    }

    for &idx in &order {
        if let Some(parent) = parents[idx] {
            let child_id = blocks[idx].id.clone();
            blocks[parent].child_blocks.push(child_id);
            blocks[idx].parent_block = Some(blocks[parent].id.clone());
        }
    }

    for idx in 0..blocks.len() {
        let Some(parent) = parents[idx] else {
            continue;
        };
        let end = blocks[idx].span.1;
        let next = (0..blocks.len())
            .filter(|&s| s != idx && parents[s] == Some(parent) && blocks[s].span.0 >= end)
            .min_by_key(|&s| (blocks[s].span.0, s));
        blocks[idx].next_block = next.map(|s| blocks[s].id.clone());
    }
}

/// Ordered decision list; the first matching purpose wins.
fn classify_purpose(kind: BlockType, text: &str) -> BlockPurpose {
    if matches!(kind, BlockType::Try | BlockType::Catch) {
        return BlockPurpose::ErrorHandling;
    }
    if kind == BlockType::Transaction {
        return BlockPurpose::TransactionControl;
    }
    if DML_WRITE_RE.is_match(text) {
        return BlockPurpose::DataInsertion;
    }
    if TRANSFORM_RE.is_match(text) {
        return BlockPurpose::DataTransformation;
    }
    let bare_if = IF_RE
        .captures_iter(text)
        .any(|c| !c[1].eq_ignore_ascii_case("EXISTS"));
    if FILTER_RE.is_match(text) || bare_if {
        return BlockPurpose::DataFiltering;
    }
    if SELECT_RE.is_match(text) {
        return BlockPurpose::DataRetrieval;
    }
    if CONTROL_RE.is_match(text) {
        return BlockPurpose::ControlFlow;
    }
    BlockPurpose::Auxiliary
}
