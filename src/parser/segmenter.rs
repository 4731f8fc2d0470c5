//! Statement boundaries over the significant-token stream.
//!
//! T-SQL does not require semicolons, so a statement also ends where the next
//! statement's leading keyword appears at parenthesis depth 0. The rules here
//! are shared by the block walker (single-statement IF/WHILE bodies) and the
//! statement splitter.

use sqlparser::tokenizer::Token;

use super::lexer::Lexeme;

/// Keywords that begin a new statement when they appear at depth 0.
const STATEMENT_STARTERS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "SET", "DECLARE", "IF", "WHILE", "BEGIN",
    "RETURN", "PRINT", "EXEC", "EXECUTE", "RAISERROR", "THROW", "COMMIT", "ROLLBACK", "SAVE",
    "CREATE", "DROP", "ALTER", "TRUNCATE", "OPEN", "CLOSE", "FETCH", "DEALLOCATE", "GOTO",
    "BREAK", "CONTINUE", "WAITFOR", "GO", "WITH",
];

/// Tokens after which a starter keyword continues the current statement.
const CONTINUATION_WORDS: &[&str] = &["UNION", "ALL", "EXCEPT", "INTERSECT", "FOR", "THEN"];

const DML_VERBS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE"];

/// Object kinds that may precede `IF EXISTS` in `DROP TABLE IF EXISTS`.
const DROP_OBJECT_KINDS: &[&str] = &[
    "TABLE", "VIEW", "PROCEDURE", "PROC", "FUNCTION", "INDEX", "TRIGGER", "SCHEMA", "TYPE",
    "SEQUENCE", "SYNONYM",
];

/// A statement as a half-open range of significant-token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSpan {
    pub first: usize,
    pub last: usize,
}

/// Running state of the statement whose end is being searched for.
struct StatementState {
    leader: String,
    seen_select: bool,
    seen_values: bool,
}

impl StatementState {
    fn new(leader: &str) -> Self {
        Self {
            leader: leader.to_string(),
            seen_select: false,
            seen_values: false,
        }
    }

    fn observe(&mut self, token: &Lexeme) {
        if token.is_keyword("SELECT") {
            self.seen_select = true;
        } else if token.is_keyword("VALUES") {
            self.seen_values = true;
        }
        if self.leader == "WITH" {
            if let Some(verb) = DML_VERBS.iter().find(|v| token.is_keyword(v)) {
                self.leader = verb.to_string();
            }
        }
    }
}

/// `BEGIN` that opens a counted block (not `BEGIN TRAN`, `BEGIN DIALOG`, ...).
pub fn is_block_begin(sig: &[Lexeme], i: usize) -> bool {
    sig[i].is_keyword("BEGIN")
        && !sig.get(i + 1).is_some_and(|n| {
            n.is_any_keyword(&["TRAN", "TRANSACTION", "DISTRIBUTED", "DIALOG", "CONVERSATION"])
        })
}

/// `BEGIN TRAN`, `BEGIN TRANSACTION` or `BEGIN DISTRIBUTED TRAN`.
pub fn is_transaction_begin(sig: &[Lexeme], i: usize) -> bool {
    sig[i].is_keyword("BEGIN")
        && sig
            .get(i + 1)
            .is_some_and(|n| n.is_any_keyword(&["TRAN", "TRANSACTION", "DISTRIBUTED"]))
}

/// `WITH name AS (` or `WITH name (cols) AS (`.
fn starts_cte(sig: &[Lexeme], i: usize) -> bool {
    let Some(name) = sig.get(i + 1) else {
        return false;
    };
    if name.word().is_none() || name.is_any_keyword(&["TIES", "XMLNAMESPACES", "ROLLUP", "CUBE"]) {
        return false;
    }
    match sig.get(i + 2) {
        Some(next) if next.is_keyword("AS") => true,
        Some(next) if next.is(&Token::LParen) => {
            let mut depth = 0;
            for (k, t) in sig.iter().enumerate().skip(i + 2) {
                if t.is(&Token::LParen) {
                    depth += 1;
                } else if t.is(&Token::RParen) {
                    depth -= 1;
                    if depth == 0 {
                        return sig.get(k + 1).is_some_and(|a| a.is_keyword("AS"));
                    }
                }
            }
            false
        }
        _ => false,
    }
}

/// Whether `sig[i]` begins a new statement, given the statement it would interrupt.
fn is_starter(sig: &[Lexeme], i: usize, state: Option<&StatementState>) -> bool {
    let token = &sig[i];
    let Some(word) = token.keyword_upper() else {
        return false;
    };
    if !STATEMENT_STARTERS.contains(&word.as_str()) {
        return false;
    }
    if i > 0 && sig[i - 1].is_any_keyword(CONTINUATION_WORDS) {
        return false;
    }

    let leader = state.map(|s| s.leader.as_str()).unwrap_or("");
    if leader == "MERGE" {
        return false;
    }

    match word.as_str() {
        "SELECT" => match state {
            Some(s) if s.leader == "INSERT" => s.seen_select || s.seen_values,
            Some(s) if s.leader == "WITH" => false,
            _ => true,
        },
        "INSERT" | "DELETE" | "UPDATE" if leader == "WITH" => false,
        "UPDATE" => !sig.get(i + 1).is_some_and(|n| n.is(&Token::LParen)),
        "SET" => leader != "UPDATE",
        "EXEC" | "EXECUTE" => match state {
            Some(s) if s.leader == "INSERT" => s.seen_select || s.seen_values,
            _ => true,
        },
        "FETCH" => !(i > 0 && sig[i - 1].is_any_keyword(&["ROWS", "ROW"])),
        "WITH" => starts_cte(sig, i),
        "IF" => !(i > 0
            && sig[i - 1].is_any_keyword(DROP_OBJECT_KINDS)
            && sig.get(i + 1).is_some_and(|n| n.is_keyword("EXISTS"))),
        _ => true,
    }
}

/// Index one past the last token of the statement starting at `start`.
///
/// Stops after a depth-0 `;` (included), or before `ELSE`, an unmatched `END`
/// or `)`, or the leading keyword of the next statement.
pub fn statement_end(sig: &[Lexeme], start: usize, limit: usize) -> usize {
    let limit = limit.min(sig.len());
    if start >= limit {
        return limit;
    }

    let leader = sig[start].keyword_upper().unwrap_or_default();
    let mut state = StatementState::new(&leader);
    state.observe(&sig[start]);

    let mut depth = 0usize;
    let mut case_depth = 0usize;
    let mut i = start + 1;
    while i < limit {
        let token = &sig[i];
        match &token.token {
            Token::LParen => depth += 1,
            Token::RParen => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            Token::SemiColon if depth == 0 => return i + 1,
            _ if depth == 0 => {
                if token.is_keyword("CASE") {
                    case_depth += 1;
                } else if token.is_keyword("END") {
                    if case_depth == 0 {
                        return i;
                    }
                    case_depth -= 1;
                } else if case_depth == 0 {
                    if token.is_keyword("ELSE") || is_starter(sig, i, Some(&state)) {
                        return i;
                    }
                    state.observe(token);
                }
            }
            _ => {}
        }
        i += 1;
    }
    limit
}

/// Index of the first body token of an IF/WHILE whose condition starts at `start`.
///
/// The condition runs to the first depth-0 `BEGIN` or statement keyword;
/// `CASE ... END` inside the condition is skipped.
pub fn condition_end(sig: &[Lexeme], start: usize, limit: usize) -> usize {
    let limit = limit.min(sig.len());
    let mut depth = 0usize;
    let mut case_depth = 0usize;
    let mut i = start;
    while i < limit {
        let token = &sig[i];
        match &token.token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if token.is_keyword("CASE") {
                    case_depth += 1;
                } else if token.is_keyword("END") && case_depth > 0 {
                    case_depth -= 1;
                } else if case_depth == 0 && i > start && is_starter(sig, i, None) {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    limit
}

/// Index of the `END` matching the `BEGIN` (or `CASE`) at `open`.
///
/// Counts nested `BEGIN` and `CASE` openers; `BEGIN TRAN`/`END CONVERSATION`
/// are not block delimiters. Returns `None` when the block never closes.
pub fn find_block_end(sig: &[Lexeme], open: usize, limit: usize) -> Option<usize> {
    let limit = limit.min(sig.len());
    let mut depth = 0usize;
    for i in open..limit {
        let token = &sig[i];
        if (token.is_keyword("BEGIN") && is_block_begin(sig, i)) || token.is_keyword("CASE") {
            depth += 1;
        } else if token.is_keyword("END")
            && !sig
                .get(i + 1)
                .is_some_and(|n| n.is_keyword("CONVERSATION"))
        {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split the significant tokens in `[from, to)` into statements.
///
/// `BEGIN`/`END`/`ELSE` delimiters and `GO` separators are not statements;
/// `BEGIN TRY`/`BEGIN CATCH` are; IF/WHILE yield a header statement that
/// covers the keyword and its condition, with the body split separately.
pub fn split_statements(sig: &[Lexeme], from: usize, to: usize) -> Vec<StatementSpan> {
    let to = to.min(sig.len());
    let mut spans = Vec::new();
    let mut i = from;

    while i < to {
        let token = &sig[i];

        if token.is(&Token::SemiColon) || token.is_any_keyword(&["ELSE", "GO"]) {
            i += 1;
            continue;
        }

        if token.is_keyword("END") {
            i += 1;
            if i < to && sig[i].is_any_keyword(&["TRY", "CATCH"]) {
                i += 1;
            }
            continue;
        }

        if token.is_keyword("BEGIN") {
            match sig.get(i + 1) {
                Some(next) if next.is_any_keyword(&["TRY", "CATCH"]) => {
                    spans.push(StatementSpan {
                        first: i,
                        last: (i + 2).min(to),
                    });
                    i += 2;
                    continue;
                }
                _ if is_block_begin(sig, i) => {
                    i += 1;
                    continue;
                }
                _ => {}
            }
        }

        if token.is_any_keyword(&["IF", "WHILE"]) {
            let body = condition_end(sig, i + 1, to).max(i + 1);
            spans.push(StatementSpan { first: i, last: body });
            i = body;
            continue;
        }

        // Labels: `retry:`
        if token.word().is_some() && sig.get(i + 1).is_some_and(|n| n.is(&Token::Colon)) {
            i += 2;
            continue;
        }

        let end = statement_end(sig, i, to);
        if end <= i {
            i += 1;
            continue;
        }
        spans.push(StatementSpan { first: i, last: end });
        i = end;
    }

    spans
}
