//! Properties every analysis document must satisfy

use std::collections::HashMap;

use rust_sproc_analyzer::{analyze_sql, output, AnalysisMode};
use serde_json::Value;

use crate::common::{document, fixture_sql};

const FIXTURES: &[&str] = &[
    "usp_GetCustomerOrders.sql",
    "usp_ArchiveOrders.sql",
    "usp_SearchProducts.sql",
];

fn full_documents() -> Vec<(&'static str, Value)> {
    FIXTURES
        .iter()
        .map(|name| (*name, document(&fixture_sql(name), AnalysisMode::Full)))
        .collect()
}

fn line_range(block: &Value) -> (u64, u64) {
    let range = block["lineRange"].as_array().unwrap();
    (range[0].as_u64().unwrap(), range[1].as_u64().unwrap())
}

#[test]
fn test_blocks_nest_inside_parents() {
    for (name, doc) in full_documents() {
        let blocks = doc["logicalBlocks"].as_array().unwrap();
        let by_id: HashMap<&str, &Value> = blocks
            .iter()
            .map(|b| (b["id"].as_str().unwrap(), b))
            .collect();

        let roots: Vec<&Value> = blocks.iter().filter(|b| b.get("parentBlock").is_none()).collect();
        assert_eq!(roots.len(), 1, "{}: expected a single root", name);
        assert_eq!(roots[0]["type"], "PROCEDURE_BODY");

        for block in blocks {
            let Some(parent_id) = block.get("parentBlock").and_then(|p| p.as_str()) else {
                continue;
            };
            let parent = by_id[parent_id];
            let (start, end) = line_range(block);
            let (p_start, p_end) = line_range(parent);
            assert!(
                p_start <= start && end <= p_end,
                "{}: {} escapes its parent",
                name,
                block["id"]
            );
        }
    }
}

#[test]
fn test_sibling_blocks_do_not_overlap() {
    for (name, doc) in full_documents() {
        let blocks = doc["logicalBlocks"].as_array().unwrap();
        for a in blocks {
            for b in blocks {
                if a["id"] == b["id"] || a.get("parentBlock") != b.get("parentBlock") {
                    continue;
                }
                let (a_start, a_end) = line_range(a);
                let (b_start, b_end) = line_range(b);
                assert!(
                    a_end < b_start || b_end < a_start,
                    "{}: {} overlaps {}",
                    name,
                    a["id"],
                    b["id"]
                );
            }
        }
    }
}

#[test]
fn test_flows_are_never_degenerate() {
    for (name, doc) in full_documents() {
        for flow in doc["dataFlow"].as_array().into_iter().flatten() {
            assert!(!flow["sourceEntities"].as_array().unwrap().is_empty(), "{}", name);
            assert!(!flow["targetEntities"].as_array().unwrap().is_empty(), "{}", name);
        }
    }
}

#[test]
fn test_every_parameter_has_a_null_test_value() {
    for (name, doc) in full_documents() {
        let candidates = doc["testValueCandidates"].as_array().unwrap();
        for param in doc["metadata"]["parameters"].as_array().unwrap() {
            let candidate = candidates
                .iter()
                .find(|c| c["parameterName"] == param["name"])
                .unwrap_or_else(|| panic!("{}: no candidate for {}", name, param["name"]));
            let has_null = candidate["suggestedTestValues"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v["purpose"] == "NULL_VALUE");
            assert!(has_null, "{}: {} lacks a NULL value", name, param["name"]);
        }
    }
}

#[test]
fn test_block_purposes_are_deterministic() {
    for name in FIXTURES {
        let sql = fixture_sql(name);
        let first = analyze_sql(&sql, None, AnalysisMode::Full);
        let second = analyze_sql(&sql, None, AnalysisMode::Full);
        let purposes = |a: &rust_sproc_analyzer::ProcedureAnalysis| {
            a.blocks.iter().map(|b| b.purpose).collect::<Vec<_>>()
        };
        assert_eq!(purposes(&first), purposes(&second));
    }
}

#[test]
fn test_output_is_byte_identical_across_runs() {
    for name in FIXTURES {
        let sql = fixture_sql(name);
        let first = output::render(&analyze_sql(&sql, None, AnalysisMode::Full), true).unwrap();
        let second = output::render(&analyze_sql(&sql, None, AnalysisMode::Full), true).unwrap();
        assert_eq!(first, second, "{} is not deterministic", name);
    }
}

#[test]
fn test_unusual_input_never_panics() {
    let inputs = [
        "",
        "   ",
        "CREATE PROCEDURE",
        "CREATE PROC p AS",
        "SELECT 'unterminated",
        "/* open comment",
        "IF (SELECT COUNT(*) FROM T) > 0 BEGIN",
        "END END END",
        "BEGIN TRAN; BEGIN TRAN; COMMIT;",
    ];
    for sql in inputs {
        let doc = document(sql, AnalysisMode::Full);
        assert!(doc["logicalBlocks"].is_array(), "input {:?}", sql);
    }
}
