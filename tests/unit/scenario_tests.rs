//! End-to-end scenarios over in-memory procedure text

use pretty_assertions::assert_eq;
use rust_sproc_analyzer::AnalysisMode;
use serde_json::Value;

use crate::common::{document, field_values};

fn blocks_of_type<'a>(doc: &'a Value, block_type: &str) -> Vec<&'a Value> {
    doc["logicalBlocks"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|b| b["type"] == block_type)
        .collect()
}

// ============================================================================
// IF / ELSE
// ============================================================================

const IF_ELSE: &str = "CREATE PROCEDURE dbo.P @x INT AS IF @x IS NULL BEGIN SET @x = 30 END ELSE BEGIN SELECT * FROM T WHERE Id = @x END";

#[test]
fn test_if_else_blocks() {
    let doc = document(IF_ELSE, AnalysisMode::Full);

    assert_eq!(doc["metadata"]["name"], "dbo.P");
    let ifs = blocks_of_type(&doc, "IF");
    let elses = blocks_of_type(&doc, "ELSE");
    assert_eq!(ifs.len(), 1);
    assert_eq!(elses.len(), 1);

    let condition = ifs[0]["conditionBoundary"]["condition"].as_str().unwrap();
    assert!(condition.contains("@x IS NULL"), "condition was {}", condition);
    assert_eq!(ifs[0]["purpose"], "DATA_FILTERING");
    assert_eq!(ifs[0]["parentBlock"], elses[0]["parentBlock"]);
}

#[test]
fn test_if_else_reference_links_to_else_block() {
    let doc = document(IF_ELSE, AnalysisMode::Full);
    let else_id = blocks_of_type(&doc, "ELSE")[0]["id"].clone();

    let refs = doc["tableReferences"].as_array().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0]["table"], "T");
    assert_eq!(refs[0]["operation"], "SELECT");
    assert_eq!(refs[0]["blockId"], else_id);
}

#[test]
fn test_if_else_parameter_usage() {
    let doc = document(IF_ELSE, AnalysisMode::Full);
    let usage = &doc["parameterUsage"][0];
    assert_eq!(usage["parameterName"], "@x");
    assert_eq!(usage["parameterType"], "INT");

    let kinds: Vec<&str> = field_values(usage, "occurrences", "usage")
        .into_iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(kinds.first(), Some(&"CONDITIONAL_CHECK"));
    assert_eq!(kinds.last(), Some(&"FILTER_CONDITION"));
}

// ============================================================================
// Temp table flow
// ============================================================================

#[test]
fn test_temp_table_flow() {
    let doc = document(
        "SELECT * INTO #Temp FROM Source; INSERT INTO Target SELECT * FROM #Temp;",
        AnalysisMode::Full,
    );

    let temp = &doc["tempStructures"][0];
    assert_eq!(temp["name"], "#Temp");
    assert_eq!(temp["type"], "LOCAL_TEMP");

    let flows = doc["dataFlow"].as_array().unwrap();
    let flow = flows
        .iter()
        .find(|f| f["intermediateEntities"] == serde_json::json!(["#Temp"]))
        .expect("no flow through #Temp");
    assert_eq!(flow["sourceEntities"], serde_json::json!(["Source"]));
    assert_eq!(flow["targetEntities"], serde_json::json!(["Target"]));
}

// ============================================================================
// Dynamic SQL
// ============================================================================

#[test]
fn test_dynamic_sql_reconstruction() {
    let doc = document(
        "DECLARE @sql NVARCHAR(MAX) = 'SELECT * FROM Orders'; EXEC(@sql)",
        AnalysisMode::Full,
    );

    let ops = doc["dynamicSqlOperations"].as_array().unwrap();
    assert_eq!(ops.len(), 1);
    let pattern = ops[0]["constructionPattern"].as_str().unwrap();
    assert!(["STRING_BUILDING", "DIRECT_EXEC"].contains(&pattern));
    assert_eq!(ops[0]["confidence"], "LOW");

    let query = &ops[0]["potentialQueries"][0];
    assert!(query["potentialTables"].as_array().unwrap().contains(&Value::from("Orders")));
    assert!(query["potentialOperations"].as_array().unwrap().contains(&Value::from("SELECT")));
}

// ============================================================================
// Basic vs full mode
// ============================================================================

#[test]
fn test_basic_mode_is_subset_of_full() {
    let sql = crate::common::fixture_sql("usp_GetCustomerOrders.sql");
    let basic = document(&sql, AnalysisMode::Basic);
    let full = document(&sql, AnalysisMode::Full);

    let basic_map = basic.as_object().unwrap();
    let full_map = full.as_object().unwrap();
    assert_eq!(basic_map.len(), 4);
    for (key, value) in basic_map {
        assert_eq!(full_map.get(key), Some(value), "key {} differs", key);
    }
    assert!(full_map.len() > basic_map.len());
}
