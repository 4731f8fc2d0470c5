//! Integration tests for file and directory analysis

use std::fs;

use rust_sproc_analyzer::{analyze_path, AnalysisMode, AnalyzerError};

use crate::common::{fixture_path, TestContext};

// ============================================================================
// Single file
// ============================================================================

#[test]
fn test_analyze_single_file() {
    let ctx = TestContext::new();
    let output = ctx.output_dir.join("orders.json");
    let options = ctx.options(
        &fixture_path("usp_GetCustomerOrders.sql"),
        &output,
        AnalysisMode::Full,
    );

    let written = analyze_path(&options).unwrap();
    assert_eq!(written, 1);

    let doc = ctx.read_output("orders.json");
    assert_eq!(doc["metadata"]["name"], "dbo.usp_GetCustomerOrders");
    let params: Vec<&str> = doc["metadata"]["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(params, vec!["@CustomerId", "@Status", "@FromDate", "@PageSize"]);
    assert!(doc["metadata"]["headerComments"][0]
        .as_str()
        .unwrap()
        .contains("open orders"));
    assert!(doc.get("repositoryBoundaries").is_some());
}

#[test]
fn test_name_option_overrides_header() {
    let ctx = TestContext::new();
    let output = ctx.output_dir.join("renamed.json");
    let mut options = ctx.options(
        &fixture_path("usp_ArchiveOrders.sql"),
        &output,
        AnalysisMode::Basic,
    );
    options.name = Some("ArchiveJob".to_string());

    analyze_path(&options).unwrap();
    assert_eq!(ctx.read_output("renamed.json")["metadata"]["name"], "ArchiveJob");
}

#[test]
fn test_headerless_file_uses_file_stem() {
    let ctx = TestContext::new();
    let input = ctx.write_sql("nightly_cleanup.sql", "DELETE FROM Staging WHERE Loaded = 1");
    let output = ctx.output_dir.join("nightly_cleanup.json");

    analyze_path(&ctx.options(&input, &output, AnalysisMode::Full)).unwrap();
    let doc = ctx.read_output("nightly_cleanup.json");
    assert_eq!(doc["metadata"]["name"], "nightly_cleanup");
    assert_eq!(doc["tableReferences"][0]["operation"], "DELETE");
}

#[test]
fn test_pretty_output() {
    let ctx = TestContext::new();
    let input = ctx.write_sql("p.sql", "CREATE PROC p AS SELECT 1");
    let output = ctx.output_dir.join("p.json");
    let mut options = ctx.options(&input, &output, AnalysisMode::Basic);
    options.pretty = true;

    analyze_path(&options).unwrap();
    let text = fs::read_to_string(&output).unwrap();
    assert!(text.starts_with("{\n  \"metadata\""));
}

#[test]
fn test_file_input_with_directory_output_fails() {
    let ctx = TestContext::new();
    fs::create_dir_all(&ctx.output_dir).unwrap();
    let options = ctx.options(
        &fixture_path("usp_ArchiveOrders.sql"),
        &ctx.output_dir,
        AnalysisMode::Full,
    );

    let err = analyze_path(&options).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AnalyzerError>(),
        Some(AnalyzerError::OutputIsDirectory { .. })
    ));
}

#[test]
fn test_missing_input_fails() {
    let ctx = TestContext::new();
    let input = ctx.input_dir.join("missing.sql");
    let output = ctx.output_dir.join("missing.json");

    let err = analyze_path(&ctx.options(&input, &output, AnalysisMode::Full)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AnalyzerError>(),
        Some(AnalyzerError::InputNotFound { .. })
    ));
    assert!(!output.exists());
}

// ============================================================================
// Directory
// ============================================================================

#[test]
fn test_analyze_directory() {
    let ctx = TestContext::with_fixtures(&[
        "usp_GetCustomerOrders.sql",
        "usp_ArchiveOrders.sql",
        "usp_SearchProducts.sql",
    ]);
    ctx.write_sql("notes.txt", "not a procedure");

    let written = ctx.analyze_directory(AnalysisMode::Full).unwrap();
    assert_eq!(written, 3);

    let mut outputs: Vec<String> = fs::read_dir(&ctx.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    outputs.sort();
    assert_eq!(
        outputs,
        vec![
            "usp_ArchiveOrders.json",
            "usp_GetCustomerOrders.json",
            "usp_SearchProducts.json"
        ]
    );

    let archive = ctx.read_output("usp_ArchiveOrders.json");
    assert_eq!(archive["tempStructures"][0]["name"], "#ToArchive");
    let search = ctx.read_output("usp_SearchProducts.json");
    assert_eq!(search["dynamicSqlOperations"][0]["constructionPattern"], "SP_EXECUTESQL");
}

#[test]
fn test_directory_input_with_file_output_fails() {
    let ctx = TestContext::with_fixtures(&["usp_ArchiveOrders.sql"]);
    let output = ctx.input_dir.join("usp_ArchiveOrders.sql");

    let err = analyze_path(&ctx.options(&ctx.input_dir, &output, AnalysisMode::Full)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AnalyzerError>(),
        Some(AnalyzerError::OutputNotDirectory { .. })
    ));
}

#[test]
fn test_directory_batch_continues_after_failure() {
    let ctx = TestContext::with_fixtures(&["usp_ArchiveOrders.sql", "usp_SearchProducts.sql"]);
    // a directory squatting on the output path makes that one write fail
    fs::create_dir_all(ctx.output_dir.join("usp_ArchiveOrders.json").join("blocker")).unwrap();

    let err = ctx.analyze_directory(AnalysisMode::Basic).unwrap_err();
    match err.downcast_ref::<AnalyzerError>() {
        Some(AnalyzerError::BatchFailed { failed, total }) => {
            assert_eq!(*failed, 1);
            assert_eq!(*total, 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(ctx.output_dir.join("usp_SearchProducts.json").is_file());
}
