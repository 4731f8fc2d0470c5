//! Common test utilities for rust-sproc-analyzer tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use rust_sproc_analyzer::{analyze_path, AnalysisMode, AnalyzeOptions};

/// Path to a procedure under `tests/fixtures/procedures`
pub fn fixture_path(file_name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("procedures")
        .join(file_name)
}

/// Read a fixture procedure as a string
pub fn fixture_sql(file_name: &str) -> String {
    fs::read_to_string(fixture_path(file_name)).expect("Failed to read fixture")
}

/// Analyze SQL text in memory and return the JSON document
pub fn document(sql: &str, mode: AnalysisMode) -> Value {
    let analysis = rust_sproc_analyzer::analyze_sql(sql, None, mode);
    rust_sproc_analyzer::output::build_document(&analysis).expect("Failed to build document")
}

/// Values of `field` across the array at `key`
pub fn field_values<'a>(doc: &'a Value, key: &str, field: &str) -> Vec<&'a Value> {
    doc[key]
        .as_array()
        .map(|items| items.iter().map(|item| &item[field]).collect())
        .unwrap_or_default()
}

/// Test context with temporary directory for isolated test execution
pub struct TestContext {
    /// Kept to prevent temp directory cleanup until TestContext is dropped
    _temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("procs");
        let output_dir = temp_dir.path().join("out");
        fs::create_dir_all(&input_dir).expect("Failed to create input directory");

        Self {
            _temp_dir: temp_dir,
            input_dir,
            output_dir,
        }
    }

    /// Create a context whose input directory holds copies of the named fixtures
    pub fn with_fixtures(file_names: &[&str]) -> Self {
        let ctx = Self::new();
        for name in file_names {
            fs::copy(fixture_path(name), ctx.input_dir.join(name)).expect("Failed to copy fixture");
        }
        ctx
    }

    /// Write a procedure into the input directory
    pub fn write_sql(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.input_dir.join(file_name);
        fs::write(&path, content).expect("Failed to write SQL file");
        path
    }

    pub fn options(&self, input: &Path, output: &Path, mode: AnalysisMode) -> AnalyzeOptions {
        AnalyzeOptions {
            input_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            name: None,
            pretty: false,
            mode,
        }
    }

    /// Analyze the whole input directory into the output directory
    pub fn analyze_directory(&self, mode: AnalysisMode) -> anyhow::Result<usize> {
        analyze_path(&self.options(&self.input_dir, &self.output_dir, mode))
    }

    /// Parse a written output document
    pub fn read_output(&self, file_name: &str) -> Value {
        let text = fs::read_to_string(self.output_dir.join(file_name)).expect("Missing output document");
        serde_json::from_str(&text).expect("Output is not valid JSON")
    }
}
