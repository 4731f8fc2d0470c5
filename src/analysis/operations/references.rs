//! Token-based table reference extraction for DML statements
//!
//! ## Supported Syntax
//!
//! ```sql
//! SELECT o.Id, o.Total [INTO #Recent] FROM dbo.Orders o JOIN Customers c ON ...
//! INSERT [INTO] Target [(a, b)] SELECT a, b FROM Source
//! UPDATE [TOP (n)] o SET Status = 1 FROM Orders o WHERE ...
//! DELETE [TOP (n)] [FROM] Log [FROM ...] WHERE ...
//! MERGE [INTO] Target AS t USING Source AS s ON ...
//! WITH cte AS (...) SELECT ... FROM cte
//! ```
//!
//! Any other statement containing a `SELECT` (an `IF EXISTS (...)` header,
//! `SET @v = (SELECT ...)`, a cursor declaration) yields SELECT references
//! for its FROM/JOIN tables.

use sqlparser::tokenizer::Token;

use crate::model::TableOperation;
use crate::parser::identifier_utils::{normalize_identifier, unqualified};
use crate::parser::lexer::Lexeme;
use crate::parser::token_parser_base::TokenParser;
use crate::util::push_unique;

const DML_VERBS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE"];

/// Words that end a table factor instead of naming its alias.
const NON_ALIAS_WORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON", "GROUP", "ORDER",
    "HAVING", "UNION", "EXCEPT", "INTERSECT", "WITH", "SET", "OPTION", "FOR", "PIVOT", "UNPIVOT",
    "WHEN", "THEN", "ELSE", "END", "INTO", "AND", "OR", "SELECT", "INSERT", "UPDATE", "DELETE",
    "MERGE", "USING", "OUTPUT", "VALUES", "EXEC", "EXECUTE", "RETURN", "IF", "BEGIN", "DECLARE",
    "WHILE", "APPLY", "GO", "PRINT", "RAISERROR", "THROW", "COMMIT", "ROLLBACK", "TRUNCATE",
    "CREATE", "DROP", "ALTER", "FETCH", "OPEN", "CLOSE", "DEALLOCATE", "OFFSET", "TABLESAMPLE",
];

/// Words that end a SELECT list at depth 0.
const SELECT_LIST_END: &[&str] = &[
    "FROM", "INTO", "WHERE", "GROUP", "ORDER", "HAVING", "UNION", "EXCEPT", "INTERSECT", "OPTION",
    "FOR",
];

/// Words that end an UPDATE SET list at depth 0.
const SET_LIST_END: &[&str] = &["FROM", "WHERE", "OUTPUT", "OPTION"];

/// Keywords that look like a bare column but are not one.
const NON_COLUMN_WORDS: &[&str] = &[
    "NULL", "CASE", "CURRENT_TIMESTAMP", "CURRENT_USER", "SYSTEM_USER", "SESSION_USER", "USER",
    "DISTINCT", "TOP", "ALL",
];

/// Tokens before `FROM` that make it part of a cursor FETCH.
const FETCH_DIRECTIONS: &[&str] = &["NEXT", "PRIOR", "FIRST", "LAST", "FETCH"];

/// A table reference found in one statement
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReference {
    pub table: String,
    pub operation: TableOperation,
    pub columns: Vec<String>,
    /// Byte offset of the table name
    pub offset: usize,
}

/// References of one statement, plus the target of `SELECT ... INTO`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedStatement {
    pub references: Vec<ExtractedReference>,
    /// `(name, offset)` of a `SELECT ... INTO` target
    pub select_into: Option<(String, usize)>,
}

/// A table in a FROM/JOIN clause
#[derive(Debug, Clone)]
struct TableSource {
    table: String,
    alias: Option<String>,
    offset: usize,
}

impl TableSource {
    /// Whether `name` is this source's alias or (unqualified) table name.
    fn answers_to(&self, name: &str) -> bool {
        self.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
            || self.table.eq_ignore_ascii_case(name)
            || unqualified(&self.table).eq_ignore_ascii_case(name)
    }
}

/// Extract table references from one statement's significant tokens.
pub fn extract_references(tokens: &[Lexeme]) -> ExtractedStatement {
    let mut parser = ReferenceTokenParser::new(tokens);
    let mut extracted = parser.extract();
    extracted.references.sort_by_key(|r| r.offset);
    extracted
}

/// Token-based reference parser over a single statement
struct ReferenceTokenParser {
    base: TokenParser,
    /// Parenthesis depth before each token
    depths: Vec<usize>,
}

impl ReferenceTokenParser {
    fn new(tokens: &[Lexeme]) -> Self {
        let mut depths = Vec::with_capacity(tokens.len());
        let mut depth = 0usize;
        for t in tokens {
            if t.is(&Token::RParen) {
                depth = depth.saturating_sub(1);
            }
            depths.push(depth);
            if t.is(&Token::LParen) {
                depth += 1;
            }
        }
        Self {
            base: TokenParser::from_lexemes(tokens.to_vec()),
            depths,
        }
    }

    fn token(&self, i: usize) -> Option<&Lexeme> {
        self.base.tokens().get(i)
    }

    fn len(&self) -> usize {
        self.base.tokens().len()
    }

    fn extract(&mut self) -> ExtractedStatement {
        let Some(first) = self.token(0) else {
            return ExtractedStatement::default();
        };

        let verb_pos = if first.is_keyword("WITH") {
            (1..self.len()).find(|&i| {
                self.depths[i] == 0 && self.token(i).is_some_and(|t| t.is_any_keyword(DML_VERBS))
            })
        } else if first.is_any_keyword(DML_VERBS) {
            Some(0)
        } else {
            None
        };

        let Some(pos) = verb_pos else {
            return self.extract_nested_selects();
        };

        let verb = self
            .token(pos)
            .and_then(Lexeme::keyword_upper)
            .unwrap_or_default();
        match verb.as_str() {
            "SELECT" => self.extract_select(pos),
            "INSERT" => self.extract_insert(pos),
            "UPDATE" => self.extract_update(pos),
            "DELETE" => self.extract_delete(pos),
            "MERGE" => self.extract_merge(pos),
            _ => ExtractedStatement::default(),
        }
    }

    // =========================================================================
    // Statement kinds
    // =========================================================================

    fn extract_select(&mut self, pos: usize) -> ExtractedStatement {
        let select_into = self.select_into(pos);
        let sources = self.from_sources(&[]);
        let columns = self.select_columns(pos);

        let mut references = Vec::new();
        if let Some((name, offset)) = &select_into {
            let mut names = Vec::new();
            for (_, column) in &columns {
                push_unique(&mut names, column.clone());
            }
            references.push(ExtractedReference {
                table: name.clone(),
                operation: TableOperation::Insert,
                columns: names,
                offset: *offset,
            });
        }
        references.extend(assign_columns(&sources, &columns, TableOperation::Select));

        ExtractedStatement {
            references,
            select_into,
        }
    }

    fn extract_insert(&mut self, pos: usize) -> ExtractedStatement {
        self.base.set_pos(pos + 1);
        self.base.expect_keyword("INTO");
        let Some(offset) = self.base.current_token().map(|t| t.start) else {
            return ExtractedStatement::default();
        };
        let Some(target) = self.base.parse_qualified_name() else {
            return ExtractedStatement::default();
        };
        self.skip_table_hints();

        let mut columns = Vec::new();
        if self.base.check_token(&Token::LParen) {
            if let Some((first, close)) = self.base.consume_parenthesized() {
                columns = self.column_list(first, close);
            }
        }

        let body_start = self.base.pos();
        let sources = self.from_sources(&[]);
        let select_columns = (body_start..self.len())
            .find(|&i| self.depths[i] == 0 && self.token(i).is_some_and(|t| t.is_keyword("SELECT")))
            .map(|select| self.select_columns(select))
            .unwrap_or_default();

        let mut references = vec![ExtractedReference {
            table: target,
            operation: TableOperation::Insert,
            columns,
            offset,
        }];
        references.extend(assign_columns(&sources, &select_columns, TableOperation::Select));
        ExtractedStatement {
            references,
            select_into: None,
        }
    }

    fn extract_update(&mut self, pos: usize) -> ExtractedStatement {
        self.base.set_pos(pos + 1);
        self.skip_top();
        let Some(offset) = self.base.current_token().map(|t| t.start) else {
            return ExtractedStatement::default();
        };
        let Some(target) = self.base.parse_qualified_name() else {
            return ExtractedStatement::default();
        };

        let set_columns = (self.base.pos()..self.len())
            .find(|&i| self.depths[i] == 0 && self.token(i).is_some_and(|t| t.is_keyword("SET")))
            .map(|set| self.set_columns(set + 1))
            .unwrap_or_default();

        let sources = self.from_sources(&[]);
        self.resolve_target(target, offset, TableOperation::Update, set_columns, sources)
    }

    fn extract_delete(&mut self, pos: usize) -> ExtractedStatement {
        self.base.set_pos(pos + 1);
        self.skip_top();
        let mut skip = Vec::new();
        if self.base.check_keyword("FROM") {
            skip.push(self.base.pos());
            self.base.advance();
        }
        let Some(offset) = self.base.current_token().map(|t| t.start) else {
            return ExtractedStatement::default();
        };
        let Some(target) = self.base.parse_qualified_name() else {
            return ExtractedStatement::default();
        };

        let sources = self.from_sources(&skip);
        self.resolve_target(target, offset, TableOperation::Delete, Vec::new(), sources)
    }

    fn extract_merge(&mut self, pos: usize) -> ExtractedStatement {
        self.base.set_pos(pos + 1);
        self.skip_top();
        self.base.expect_keyword("INTO");
        let Some(target_offset) = self.base.current_token().map(|t| t.start) else {
            return ExtractedStatement::default();
        };
        let Some(target) = self.base.parse_qualified_name() else {
            return ExtractedStatement::default();
        };
        self.skip_table_hints();
        self.parse_alias();

        let mut references = vec![ExtractedReference {
            table: target,
            operation: TableOperation::MergeTarget,
            columns: Vec::new(),
            offset: target_offset,
        }];

        if self.base.expect_keyword("USING").is_some() && !self.base.check_token(&Token::LParen) {
            if let Some(offset) = self.base.current_token().map(|t| t.start) {
                if let Some(source) = self.base.parse_qualified_name() {
                    references.push(ExtractedReference {
                        table: source,
                        operation: TableOperation::MergeSource,
                        columns: Vec::new(),
                        offset,
                    });
                }
            }
        }

        let sources = self.from_sources(&[]);
        references.extend(assign_columns(&sources, &[], TableOperation::Select));
        ExtractedStatement {
            references,
            select_into: None,
        }
    }

    /// IF headers, assignments from subqueries, cursor declarations.
    fn extract_nested_selects(&mut self) -> ExtractedStatement {
        let has_select = self.base.tokens().iter().any(|t| t.is_keyword("SELECT"));
        if !has_select {
            return ExtractedStatement::default();
        }
        let sources = self.from_sources(&[]);
        ExtractedStatement {
            references: assign_columns(&sources, &[], TableOperation::Select),
            select_into: None,
        }
    }

    /// UPDATE/DELETE targets may be an alias declared in the FROM clause.
    fn resolve_target(
        &self,
        target: String,
        offset: usize,
        operation: TableOperation,
        columns: Vec<String>,
        sources: Vec<TableSource>,
    ) -> ExtractedStatement {
        let resolved = sources
            .iter()
            .find(|s| s.answers_to(&target))
            .map(|s| s.table.clone())
            .unwrap_or(target);

        let mut references = vec![ExtractedReference {
            table: resolved.clone(),
            operation,
            columns,
            offset,
        }];
        let others: Vec<TableSource> = sources
            .into_iter()
            .filter(|s| !s.table.eq_ignore_ascii_case(&resolved))
            .collect();
        references.extend(assign_columns(&others, &[], TableOperation::Select));
        ExtractedStatement {
            references,
            select_into: None,
        }
    }

    // =========================================================================
    // Clauses
    // =========================================================================

    /// `SELECT ... INTO name` at depth 0, before the first FROM.
    fn select_into(&mut self, pos: usize) -> Option<(String, usize)> {
        let into = (pos + 1..self.len())
            .take_while(|&i| !(self.depths[i] == 0 && self.token(i).is_some_and(|t| t.is_keyword("FROM"))))
            .find(|&i| self.depths[i] == 0 && self.token(i).is_some_and(|t| t.is_keyword("INTO")))?;
        self.base.set_pos(into + 1);
        let offset = self.base.current_token()?.start;
        let name = self.base.parse_qualified_name()?;
        Some((name, offset))
    }

    /// Tables of every FROM/JOIN clause at any depth, except the FROM
    /// positions in `skip`.
    fn from_sources(&mut self, skip: &[usize]) -> Vec<TableSource> {
        let mut sources = Vec::new();
        for i in 0..self.len() {
            if skip.contains(&i) {
                continue;
            }
            let Some(token) = self.token(i) else {
                continue;
            };
            let is_from = token.is_keyword("FROM");
            if !is_from && !token.is_keyword("JOIN") {
                continue;
            }
            if is_from && self.is_fetch_or_distinct_from(i) {
                continue;
            }

            self.base.set_pos(i + 1);
            loop {
                if let Some(source) = self.table_factor() {
                    sources.push(source);
                }
                if is_from && self.base.check_token(&Token::Comma) {
                    self.base.advance();
                    continue;
                }
                break;
            }
        }
        sources
    }

    fn is_fetch_or_distinct_from(&self, i: usize) -> bool {
        let prev = i.checked_sub(1).and_then(|p| self.token(p));
        let prev2 = i.checked_sub(2).and_then(|p| self.token(p));
        prev.is_some_and(|t| t.is_any_keyword(FETCH_DIRECTIONS) || t.is_keyword("DISTINCT"))
            || prev2.is_some_and(|t| t.is_any_keyword(&["ABSOLUTE", "RELATIVE"]))
    }

    /// A named table with optional alias. Derived tables and table-valued
    /// functions are skipped (their inner FROM clauses are found separately).
    fn table_factor(&mut self) -> Option<TableSource> {
        if self.base.check_token(&Token::LParen) {
            self.base.skip_parenthesized();
            self.parse_alias();
            return None;
        }

        let token = self.base.current_token()?;
        let word = token.word()?;
        if word.quote_style.is_none()
            && NON_ALIAS_WORDS
                .iter()
                .any(|k| word.value.eq_ignore_ascii_case(k))
        {
            return None;
        }
        let offset = token.start;
        let table = self.base.parse_qualified_name()?;

        if self.base.check_token(&Token::LParen) {
            self.base.skip_parenthesized();
            self.parse_alias();
            return None;
        }

        let alias = self.parse_alias();
        self.skip_table_hints();
        Some(TableSource {
            table,
            alias,
            offset,
        })
    }

    fn parse_alias(&mut self) -> Option<String> {
        let explicit = self.base.expect_keyword("AS").is_some();
        let word = self.base.current_token()?.word()?;
        if word.value.starts_with('@') {
            return None;
        }
        if !explicit
            && word.quote_style.is_none()
            && NON_ALIAS_WORDS
                .iter()
                .any(|k| word.value.eq_ignore_ascii_case(k))
        {
            return None;
        }
        self.base.parse_identifier()
    }

    /// `WITH (NOLOCK)` and similar.
    fn skip_table_hints(&mut self) {
        let is_hint = self.base.check_keyword("WITH")
            && self
                .token(self.base.pos() + 1)
                .is_some_and(|t| t.is(&Token::LParen));
        if is_hint {
            self.base.advance();
            self.base.skip_parenthesized();
        }
    }

    /// `TOP (n) [PERCENT]` / `TOP n`.
    fn skip_top(&mut self) {
        if self.base.expect_keyword("TOP").is_none() {
            return;
        }
        if self.base.check_token(&Token::LParen) {
            self.base.skip_parenthesized();
        } else {
            self.base.advance();
        }
        self.base.expect_keyword("PERCENT");
    }

    /// Names in an explicit INSERT column list.
    fn column_list(&self, first: usize, close: usize) -> Vec<String> {
        let mut columns = Vec::new();
        let mut expect_name = true;
        for i in first..close {
            let Some(token) = self.token(i) else {
                break;
            };
            if token.is(&Token::Comma) {
                expect_name = true;
            } else if expect_name {
                if let Some(w) = token.word() {
                    columns.push(normalize_identifier(&w.value));
                }
                expect_name = false;
            }
        }
        columns
    }

    /// Depth-0 comma-separated items from `start` until a depth-0 stop word.
    fn list_items(&self, start: usize, stop: &[&str]) -> Vec<Vec<Lexeme>> {
        let mut items = Vec::new();
        let mut current = Vec::new();
        let base_depth = self.depths.get(start).copied().unwrap_or(0);
        for i in start..self.len() {
            let Some(token) = self.token(i) else {
                break;
            };
            let depth = self.depths[i];
            if depth < base_depth {
                break;
            }
            if depth == base_depth {
                if token.is_any_keyword(stop) || token.is(&Token::SemiColon) {
                    break;
                }
                if token.is(&Token::Comma) {
                    items.push(std::mem::take(&mut current));
                    continue;
                }
            }
            current.push(token.clone());
        }
        if !current.is_empty() {
            items.push(current);
        }
        items
    }

    /// Simple columns of the SELECT list starting at `pos`.
    fn select_columns(&self, pos: usize) -> Vec<(Option<String>, String)> {
        let mut start = pos + 1;
        while let Some(token) = self.token(start) {
            if token.is_any_keyword(&["ALL", "DISTINCT"]) {
                start += 1;
            } else if token.is_keyword("TOP") {
                start += 1;
                if self.token(start).is_some_and(|t| t.is(&Token::LParen)) {
                    let depth = self.depths[start];
                    start += 1;
                    while self.token(start).is_some_and(|_| self.depths[start] > depth) {
                        start += 1;
                    }
                    start += 1;
                } else {
                    start += 1;
                }
                if self.token(start).is_some_and(|t| t.is_keyword("PERCENT")) {
                    start += 1;
                }
                if self.token(start).is_some_and(|t| t.is_keyword("WITH"))
                    && self.token(start + 1).is_some_and(|t| t.is_keyword("TIES"))
                {
                    start += 2;
                }
            } else {
                break;
            }
        }

        self.list_items(start, SELECT_LIST_END)
            .iter()
            .filter_map(|item| simple_column(item))
            .collect()
    }

    /// Column names assigned in an UPDATE SET list; variables are skipped.
    fn set_columns(&self, start: usize) -> Vec<String> {
        let mut columns = Vec::new();
        for item in self.list_items(start, SET_LIST_END) {
            let mut parts = Vec::new();
            for token in &item {
                match token.word() {
                    Some(w) => parts.push(w.value.clone()),
                    None if token.is(&Token::Period) => {}
                    None => break,
                }
            }
            if let Some(last) = parts.last() {
                if !parts[0].starts_with('@') {
                    push_unique(&mut columns, normalize_identifier(last));
                }
            }
        }
        columns
    }
}

/// `col`, `t.col`, `col AS x`, `x = col`: the column and its qualifier.
/// Expressions, literals, variables and `*` yield `None`.
fn simple_column(item: &[Lexeme]) -> Option<(Option<String>, String)> {
    let mut item = item;
    if item.len() >= 3 && item[0].word().is_some() && item[1].is(&Token::Eq) {
        item = &item[2..];
    }

    let mut parts = Vec::new();
    let mut k = 0;
    loop {
        let word = item.get(k)?.word()?;
        if word.value.starts_with('@')
            || (word.quote_style.is_none()
                && NON_COLUMN_WORDS
                    .iter()
                    .any(|w| word.value.eq_ignore_ascii_case(w)))
        {
            return None;
        }
        parts.push(normalize_identifier(&word.value));
        k += 1;
        if item.get(k).is_some_and(|t| t.is(&Token::Period)) {
            k += 1;
            continue;
        }
        break;
    }

    let rest = &item[k..];
    let alias_ok = match rest {
        [] => true,
        [alias] => alias.word().is_some() || alias.string_value().is_some(),
        [kw, alias] => kw.is_keyword("AS") && (alias.word().is_some() || alias.string_value().is_some()),
        _ => false,
    };
    if !alias_ok {
        return None;
    }

    let column = parts.pop()?;
    Some((parts.pop(), column))
}

/// One reference per source; qualified columns go to the source they name,
/// unqualified columns to the first source.
fn assign_columns(
    sources: &[TableSource],
    columns: &[(Option<String>, String)],
    operation: TableOperation,
) -> Vec<ExtractedReference> {
    let mut references: Vec<ExtractedReference> = sources
        .iter()
        .map(|s| ExtractedReference {
            table: s.table.clone(),
            operation,
            columns: Vec::new(),
            offset: s.offset,
        })
        .collect();

    for (qualifier, column) in columns {
        let target = match qualifier {
            Some(q) => sources.iter().position(|s| s.answers_to(q)),
            None if !sources.is_empty() => Some(0),
            None => None,
        };
        if let Some(idx) = target {
            push_unique(&mut references[idx].columns, column.clone());
        }
    }
    references
}
