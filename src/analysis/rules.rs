//! Heuristic business-rule extraction
//!
//! Six independent rule families each scan either the IF blocks or the whole
//! procedure text. Matches are never deduplicated across families: the same
//! code may be reported as both a validation and a timing rule.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{blocks_containing, clause_end, IdSequence};
use crate::model::{BlockType, BusinessRule, LogicalBlock, RuleCategory, TableReference};
use crate::parser::identifier_utils::normalize_object_name;
use crate::parser::SqlSource;
use crate::util::{context_window, contains_word_ci, push_unique};

static VALIDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*IF\s+@?\w+(?:\.\w+)?\s*(?:IS\s+(?:NOT\s+)?NULL|[<>=!]+)").unwrap()
});

static GUARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*IF\s+@?\w+(?:\.\w+)?\s*(?:IS\s+(?:NOT\s+)?NULL|[<>=!]+)\s*(?:RETURN|RAISERROR|THROW)",
    )
    .unwrap()
});

static CALCULATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SET|SELECT)\s+(@?\w+)\s*=\s*([^;\r\n]+)").unwrap()
});

static ARITHMETIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[+\-*/]").unwrap());

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@?[A-Za-z_#][\w#]*").unwrap());

static EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(?:NOT\s+)?EXISTS\s*\(\s*SELECT\b.*?\bFROM\s+([\w.\[\]#@]+)").unwrap()
});

static REFERENTIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\.\w+\s*=\s*(\w+)\.\w+").unwrap());

static SECURITY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(?:IS_MEMBER|HAS_PERMS_BY_NAME|SUSER_SNAME|USER_NAME|IS_SRVROLEMEMBER)\s*\(")
            .unwrap(),
        Regex::new(r"(?i)\bEXECUTE\s+AS\s+(?:OWNER|USER)").unwrap(),
        Regex::new(r"(?i)\b(?:DENY|GRANT|REVOKE)\s+").unwrap(),
    ]
});

static TIMING_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(?:GETDATE|CURRENT_TIMESTAMP|DATEADD|DATEDIFF)\s*\(").unwrap(),
        Regex::new(r"(?i)\b(?:YEAR|MONTH|DAY|HOUR|MINUTE)\s*\(").unwrap(),
        Regex::new(r"@\w+\s*(?:>=|<=|<>|!=|>|<|=)\s*\d{4}-\d{2}-\d{2}").unwrap(),
    ]
});

static DATE_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)GETDATE|CURRENT_TIMESTAMP|DATEADD|DATEDIFF|DATE|DAY|MONTH|YEAR").unwrap()
});

/// Words in conditions and formulas that are not entities.
const NON_ENTITY_WORDS: &[&str] = &[
    "IF", "IS", "NOT", "NULL", "AND", "OR", "IN", "EXISTS", "SELECT", "FROM", "WHERE", "LIKE",
    "BETWEEN", "CASE", "WHEN", "THEN", "ELSE", "END", "AS", "BEGIN", "SET", "INSERT", "INTO",
    "UPDATE", "DELETE", "MERGE", "EXEC", "EXECUTE", "DECLARE", "RETURN", "WHILE", "PRINT",
];

/// Words that end a formula when they appear outside parentheses.
const FORMULA_END: &[&str] = &[
    "BEGIN", "END", "ELSE", "IF", "WHILE", "SET", "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE",
    "EXEC", "EXECUTE", "DECLARE", "RETURN", "PRINT", "RAISERROR", "THROW", "FROM", "WHERE",
];

/// Read-only inputs shared by every rule family.
pub struct RuleContext<'a> {
    pub source: &'a SqlSource,
    pub blocks: &'a [LogicalBlock],
    pub table_references: &'a [TableReference],
}

impl<'a> RuleContext<'a> {
    fn if_blocks(&self) -> impl Iterator<Item = &'a LogicalBlock> {
        self.blocks.iter().filter(|b| b.block_type == BlockType::If)
    }

    /// Block text with comments blanked.
    fn block_code(&self, block: &LogicalBlock) -> &str {
        &self.source.masked()[block.span.0..block.span.1]
    }

    fn block_tables(&self, block: &LogicalBlock) -> Vec<String> {
        let mut tables = Vec::new();
        for r in self
            .table_references
            .iter()
            .filter(|r| r.block_id.as_deref() == Some(block.id.as_str()))
        {
            push_unique(&mut tables, r.table.clone());
        }
        tables
    }

    fn snippet(&self, start: usize, end: usize, before: usize, after: usize) -> String {
        context_window(self.source.text(), start, end, before, after).to_string()
    }
}

/// A rule before it receives an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleMatch {
    pub description: String,
    pub block_ids: Vec<String>,
    pub condition: Option<String>,
    pub action: Option<String>,
    pub entities: Vec<String>,
    pub code_snippet: Option<String>,
}

/// One family of rule detection.
pub trait RuleHeuristic: Sync {
    fn category(&self) -> RuleCategory;
    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch>;
}

/// Families in output order.
static HEURISTICS: [&dyn RuleHeuristic; 6] = [
    &ValidationRules,
    &CalculationRules,
    &ProcessFlowRules,
    &IntegrityRules,
    &SecurityRules,
    &TimingRules,
];

/// Run every rule family and number the matches `rule_N` in family order.
pub fn extract_rules(
    source: &SqlSource,
    blocks: &[LogicalBlock],
    table_references: &[TableReference],
) -> Vec<BusinessRule> {
    let ctx = RuleContext {
        source,
        blocks,
        table_references,
    };
    let mut ids = IdSequence::new("rule");
    let mut rules = Vec::new();

    for heuristic in HEURISTICS {
        let category = heuristic.category();
        for m in heuristic.detect(&ctx) {
            rules.push(BusinessRule {
                rule_id: ids.next_id(),
                category,
                description: m.description,
                block_ids: m.block_ids,
                condition: m.condition,
                action: m.action,
                entities: m.entities,
                code_snippet: m.code_snippet,
            });
        }
    }

    debug!("Extracted {} business rules", rules.len());
    rules
}

/// Identifiers in a condition or formula, minus keywords and numbers.
fn condition_terms(text: &str, entities: &mut Vec<String>) {
    for m in TERM_RE.find_iter(text) {
        let term = m.as_str();
        if !NON_ENTITY_WORDS.iter().any(|k| term.eq_ignore_ascii_case(k)) {
            push_unique(entities, term.to_string());
        }
    }
}

fn block_condition(block: &LogicalBlock) -> Option<String> {
    block.condition_boundary.as_ref().map(|c| c.condition.clone())
}

// =============================================================================
// Families
// =============================================================================

/// IF blocks comparing a value or checking it for NULL.
pub struct ValidationRules;

impl RuleHeuristic for ValidationRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Validation
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let mut found = Vec::new();
        for block in ctx.if_blocks() {
            let code = ctx.block_code(block);
            if !VALIDATION_RE.is_match(code) {
                continue;
            }
            let condition = block_condition(block);

            let action = if contains_word_ci(code, "RETURN") {
                Some("RETURN (validation failure)".to_string())
            } else if contains_word_ci(code, "RAISERROR") || contains_word_ci(code, "THROW") {
                Some("Raise error (validation failure)".to_string())
            } else {
                None
            };

            let mut entities = ctx.block_tables(block);
            condition_terms(condition.as_deref().unwrap_or_default(), &mut entities);

            found.push(RuleMatch {
                description: format!("Validation check: {}", condition.as_deref().unwrap_or_default()),
                block_ids: vec![block.id.clone()],
                condition,
                action,
                entities,
                code_snippet: Some(block.code_text.clone()),
            });
        }
        found
    }
}

/// Assignments whose right-hand side does arithmetic.
pub struct CalculationRules;

impl RuleHeuristic for CalculationRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Calculation
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let code = ctx.source.code();
        let text = ctx.source.text();
        let mut found = Vec::new();

        let mut pos = 0;
        while let Some(cap) = CALCULATION_RE.captures_at(code, pos) {
            let (Some(whole), Some(var), Some(rhs)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                break;
            };
            // the line may hold further statements
            let rhs_end = clause_end(code, rhs.start(), FORMULA_END).min(rhs.end());
            pos = rhs_end.max(rhs.start() + 1);
            if ctx.source.in_header(whole.start()) {
                continue;
            }
            let rhs_code = &code[rhs.start()..rhs_end];
            // `COUNT(*)` is not arithmetic
            if !ARITHMETIC_RE.is_match(&rhs_code.replace("(*)", "")) {
                continue;
            }

            let variable = var.as_str().to_string();
            let formula = text[rhs.start()..rhs_end].trim().to_string();
            let mut entities = vec![variable.clone()];
            condition_terms(rhs_code.trim(), &mut entities);

            found.push(RuleMatch {
                description: format!("Calculation: {} = {}", variable, formula),
                block_ids: blocks_containing(ctx.blocks, whole.start(), rhs_end),
                condition: None,
                action: Some(format!("Calculate {}", variable)),
                entities,
                code_snippet: Some(text[whole.start()..rhs_end].trim_end().to_string()),
            });
        }
        found
    }
}

/// IF blocks that choose between data-changing paths.
pub struct ProcessFlowRules;

impl RuleHeuristic for ProcessFlowRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::ProcessFlow
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let mut found = Vec::new();
        for block in ctx.if_blocks() {
            let code = ctx.block_code(block);
            if GUARD_RE.is_match(code) {
                continue;
            }

            let has = |k: &str| contains_word_ci(code, k);
            let reads = has("SELECT") && (has("INTO") || has("FROM"));
            if !(reads || has("INSERT") || has("UPDATE") || has("DELETE")) {
                continue;
            }

            let operations: Vec<&str> = ["SELECT", "INSERT", "UPDATE", "DELETE"]
                .into_iter()
                .filter(|k| has(k))
                .collect();
            let condition = block_condition(block);

            found.push(RuleMatch {
                description: format!(
                    "Process flow control: {}",
                    condition.as_deref().unwrap_or_default()
                ),
                block_ids: vec![block.id.clone()],
                condition,
                action: Some(format!("Execute {} operations", operations.join(", "))),
                entities: ctx.block_tables(block),
                code_snippet: Some(block.code_text.clone()),
            });
        }
        found
    }
}

/// Existence checks and cross-table key comparisons.
pub struct IntegrityRules;

impl RuleHeuristic for IntegrityRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::DataIntegrity
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let code = ctx.source.code();
        let mut found = Vec::new();

        for cap in EXISTS_RE.captures_iter(code) {
            let (Some(whole), Some(table)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let table = normalize_object_name(table.as_str());
            found.push(RuleMatch {
                description: format!("Data integrity check on {}", table),
                block_ids: blocks_containing(ctx.blocks, whole.start(), whole.end()),
                condition: Some(format!("Checking existence in {}", table)),
                action: None,
                entities: vec![table],
                code_snippet: Some(ctx.snippet(whole.start(), whole.end(), 50, 50)),
            });
        }

        for cap in REFERENTIAL_RE.captures_iter(code) {
            let (Some(whole), Some(left), Some(right)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                continue;
            };
            let (left, right) = (left.as_str(), right.as_str());
            if left.eq_ignore_ascii_case(right) {
                continue;
            }
            found.push(RuleMatch {
                description: format!("Referential integrity between {} and {}", left, right),
                block_ids: blocks_containing(ctx.blocks, whole.start(), whole.end()),
                condition: Some(whole.as_str().to_string()),
                action: None,
                entities: vec![left.to_string(), right.to_string()],
                code_snippet: Some(ctx.snippet(whole.start(), whole.end(), 50, 50)),
            });
        }
        found
    }
}

/// Permission checks, impersonation and grants.
pub struct SecurityRules;

impl RuleHeuristic for SecurityRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let code = ctx.source.code();
        let mut found = Vec::new();
        for re in SECURITY_RES.iter() {
            for m in re.find_iter(code) {
                if ctx.source.in_header(m.start()) {
                    continue;
                }
                found.push(RuleMatch {
                    description: "Security/authorization check".to_string(),
                    block_ids: blocks_containing(ctx.blocks, m.start(), m.end()),
                    code_snippet: Some(ctx.snippet(m.start(), m.end(), 50, 100)),
                    ..Default::default()
                });
            }
        }
        found
    }
}

/// Date arithmetic and date-driven conditions.
pub struct TimingRules;

impl RuleHeuristic for TimingRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Timing
    }

    fn detect(&self, ctx: &RuleContext<'_>) -> Vec<RuleMatch> {
        let masked = ctx.source.masked();
        let mut found = Vec::new();

        for re in TIMING_RES.iter() {
            for m in re.find_iter(masked) {
                found.push(RuleMatch {
                    description: "Time-based condition or calculation".to_string(),
                    block_ids: blocks_containing(ctx.blocks, m.start(), m.end()),
                    code_snippet: Some(ctx.snippet(m.start(), m.end(), 50, 50)),
                    ..Default::default()
                });
            }
        }

        for block in ctx.if_blocks() {
            let Some(boundary) = &block.condition_boundary else {
                continue;
            };
            if !DATE_WORD_RE.is_match(&boundary.condition) {
                continue;
            }
            let end = (block.span.0 + 2).min(block.span.1);
            found.push(RuleMatch {
                description: "Date/time-based condition".to_string(),
                block_ids: blocks_containing(ctx.blocks, block.span.0, end),
                condition: Some(boundary.condition.clone()),
                code_snippet: Some(format!("IF {}", boundary.condition)),
                ..Default::default()
            });
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::operations::detect_operations;
    use crate::analysis::structure::analyze_structure;

    fn rules(sql: &str) -> Vec<BusinessRule> {
        let source = SqlSource::new(sql);
        let blocks = analyze_structure(&source, None).blocks;
        let ops = detect_operations(&source, &blocks, &source.statement_spans());
        extract_rules(&source, &blocks, &ops.table_references)
    }

    fn categories(found: &[BusinessRule]) -> Vec<RuleCategory> {
        found.iter().map(|r| r.category).collect()
    }

    #[test]
    fn test_validation_with_return() {
        let found = rules("CREATE PROC p @Id INT AS IF @Id IS NULL RETURN -1");
        assert_eq!(found[0].rule_id, "rule_0");
        assert_eq!(found[0].category, RuleCategory::Validation);
        assert_eq!(found[0].condition.as_deref(), Some("@Id IS NULL"));
        assert_eq!(found[0].action.as_deref(), Some("RETURN (validation failure)"));
        assert_eq!(found[0].entities, vec!["@Id"]);
        assert_eq!(found[0].block_ids, vec!["block_1"]);
    }

    #[test]
    fn test_calculation() {
        let found = rules("CREATE PROC p AS SET @Total = @Price * @Qty + 1;");
        assert_eq!(categories(&found), vec![RuleCategory::Calculation]);
        assert_eq!(found[0].description, "Calculation: @Total = @Price * @Qty + 1");
        assert_eq!(found[0].entities, vec!["@Total", "@Price", "@Qty"]);
        assert_eq!(found[0].block_ids, vec!["block_0"]);
    }

    #[test]
    fn test_calculation_stops_at_next_statement() {
        let found = rules(
            "CREATE PROC p @x INT AS IF @x IS NULL BEGIN SET @x = 30 END ELSE BEGIN SELECT * FROM T WHERE Id = @x END",
        );
        assert!(categories(&found).iter().all(|c| *c != RuleCategory::Calculation));

        let found = rules("CREATE PROC p AS BEGIN SET @a = 1 SET @b = @a * 2 END");
        let calc: Vec<_> = found
            .iter()
            .filter(|r| r.category == RuleCategory::Calculation)
            .collect();
        assert_eq!(calc.len(), 1);
        assert_eq!(calc[0].description, "Calculation: @b = @a * 2");
        assert_eq!(calc[0].entities, vec!["@b", "@a"]);
    }

    #[test]
    fn test_string_and_count_are_not_calculations() {
        assert!(rules("SET @s = 'a-b'; SELECT @n = COUNT(*) FROM T").is_empty());
    }

    #[test]
    fn test_process_flow() {
        let found = rules("IF EXISTS (SELECT 1 FROM Orders) BEGIN UPDATE Orders SET a = 1 END");
        let flow: Vec<_> = found
            .iter()
            .filter(|r| r.category == RuleCategory::ProcessFlow)
            .collect();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].action.as_deref(), Some("Execute SELECT, UPDATE operations"));
        assert_eq!(flow[0].entities, vec!["Orders"]);
        assert!(found
            .iter()
            .any(|r| r.category == RuleCategory::DataIntegrity
                && r.description == "Data integrity check on Orders"));
    }

    #[test]
    fn test_referential_integrity_skips_self_join() {
        let found = rules("SELECT 1 FROM A a JOIN B b ON a.Id = b.AId WHERE a.x = a.y");
        let integrity: Vec<_> = found
            .iter()
            .filter(|r| r.category == RuleCategory::DataIntegrity)
            .collect();
        assert_eq!(integrity.len(), 1);
        assert_eq!(integrity[0].entities, vec!["a", "b"]);
    }

    #[test]
    fn test_security_and_timing() {
        let found = rules(
            "IF IS_MEMBER('admin') = 1 PRINT 'ok'; IF DATEDIFF(day, @d, GETDATE()) > 30 RETURN",
        );
        let cats = categories(&found);
        assert!(cats.contains(&RuleCategory::Security));
        assert_eq!(
            cats.iter().filter(|c| **c == RuleCategory::Timing).count(),
            3
        );
    }

    #[test]
    fn test_comments_do_not_produce_rules() {
        assert!(rules("-- SET @a = @b + 1\nSELECT 1").is_empty());
    }

    #[test]
    fn test_ids_follow_family_order() {
        let found = rules("SET @d = DATEADD(day, 1, @d) + 0; IF @a = 1 RETURN");
        let ids: Vec<_> = found.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["rule_0", "rule_1", "rule_2"]);
        assert_eq!(
            categories(&found),
            vec![RuleCategory::Validation, RuleCategory::Calculation, RuleCategory::Timing]
        );
    }
}
