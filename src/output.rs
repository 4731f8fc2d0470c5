//! Assemble and write the analysis document

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::analysis::ProcedureAnalysis;
use crate::error::AnalyzerError;

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, AnalyzerError> {
    Ok(serde_json::to_value(value)?)
}

/// Insert `key` only when `items` is non-empty.
fn insert_non_empty<T: Serialize>(
    doc: &mut Map<String, Value>,
    key: &str,
    items: &[T],
) -> Result<(), AnalyzerError> {
    if !items.is_empty() {
        doc.insert(key.to_string(), to_value(items)?);
    }
    Ok(())
}

/// Build the JSON document for one analyzed procedure.
///
/// The first four keys are always present. Detailed sections follow in a
/// fixed order and are omitted when empty.
pub fn build_document(analysis: &ProcedureAnalysis) -> Result<Value, AnalyzerError> {
    let mut doc = Map::new();
    doc.insert("metadata".to_string(), to_value(&analysis.metadata)?);
    doc.insert("logicalBlocks".to_string(), to_value(&analysis.blocks)?);
    doc.insert(
        "tableReferences".to_string(),
        to_value(&analysis.operations.table_references)?,
    );
    doc.insert(
        "potentialBusinessRules".to_string(),
        to_value(&analysis.business_rules)?,
    );

    if let Some(details) = &analysis.details {
        let repository = &details.repository;
        insert_non_empty(&mut doc, "dataFlow", &details.data_flow.flows)?;
        insert_non_empty(&mut doc, "statementPurpose", &details.statements)?;
        insert_non_empty(&mut doc, "parameterUsage", &details.parameters.usage)?;
        insert_non_empty(&mut doc, "queryPatterns", &repository.query_patterns)?;
        insert_non_empty(&mut doc, "repositoryBoundaries", &repository.methods)?;
        insert_non_empty(&mut doc, "implementationComplexity", &repository.complexity)?;
        insert_non_empty(&mut doc, "testValueCandidates", &details.parameters.test_values)?;

        insert_non_empty(&mut doc, "dynamicSqlOperations", &analysis.operations.dynamic_sql)?;
        insert_non_empty(&mut doc, "tempStructures", &analysis.operations.temp_structures)?;
        insert_non_empty(&mut doc, "entityRelationships", &details.data_flow.relationships)?;
        insert_non_empty(&mut doc, "parameterDependencies", &details.parameters.dependencies)?;
    }

    Ok(clean(Value::Object(doc)))
}

/// Recursively drop null-valued object keys.
pub fn clean(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, clean(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(clean).collect()),
        other => other,
    }
}

/// Serialize the document for one procedure.
pub fn render(analysis: &ProcedureAnalysis, pretty: bool) -> Result<String, AnalyzerError> {
    let doc = build_document(analysis)?;
    let json = if pretty {
        serde_json::to_string_pretty(&doc)?
    } else {
        serde_json::to_string(&doc)?
    };
    Ok(json)
}

/// Write `contents` to `path` through a temp file in the same directory, so
/// the target is either fully written or untouched.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let write_error = |source: std::io::Error| AnalyzerError::OutputWriteError {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_error)?;

    let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(contents.as_bytes()).map_err(write_error)?;
    file.flush().map_err(write_error)?;
    file.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}
