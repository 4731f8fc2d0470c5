//! rust-sproc-analyzer: a fast structural analyzer for T-SQL stored procedures
//!
//! This library turns the text of one stored procedure into a JSON analysis
//! document: logical blocks, table references, heuristic business rules and,
//! in full mode, data flows, statement purposes, parameter usage and
//! repository-migration hints.

pub mod analysis;
pub mod error;
pub mod input;
pub mod model;
pub mod output;
pub mod parser;
pub mod util;

use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;
use tracing::{error, info};
use walkdir::WalkDir;

pub use analysis::{AnalysisMode, ProcedureAnalysis};
pub use error::AnalyzerError;

/// Options for analyzing a file or a directory of files
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Path to a `.sql` file or a directory of them
    pub input_path: PathBuf,
    /// Output `.json` file, or directory when the input is a directory
    pub output_path: PathBuf,
    /// Procedure name for single-file mode (overrides the header)
    pub name: Option<String>,
    /// Pretty-print the JSON document
    pub pretty: bool,
    /// Basic or full analysis
    pub mode: AnalysisMode,
}

/// Analyze procedure text in memory.
///
/// `name` overrides the name from the `CREATE PROCEDURE` header.
pub fn analyze_sql(sql: &str, name: Option<&str>, mode: AnalysisMode) -> ProcedureAnalysis {
    let source = parser::SqlSource::new(sql);
    analysis::analyze_source(&source, name, mode)
}

/// Analyze one file and write its document to `output_path`.
///
/// The procedure name is `name` when given, else the header name, else the
/// file stem.
pub fn analyze_file(
    input_path: &Path,
    output_path: &Path,
    name: Option<&str>,
    mode: AnalysisMode,
    pretty: bool,
) -> Result<()> {
    let sql = input::read_sql_file(input_path)?;
    let source = parser::SqlSource::new(sql);

    let stem = input_path.file_stem().and_then(|s| s.to_str());
    let name = name.or(if source.header().is_none() { stem } else { None });

    let analysis = analysis::analyze_source(&source, name, mode);
    let json = output::render(&analysis, pretty)?;
    output::write_atomic(output_path, &json)?;

    info!(
        "Analyzed {} -> {}",
        input_path.display(),
        output_path.display()
    );
    Ok(())
}

/// `*.sql` files directly inside `dir`, sorted by file name.
pub fn list_sql_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        })
        .collect()
}

/// Analyze a file or every `.sql` file of a directory.
///
/// Returns the number of documents written. In directory mode every file is
/// attempted; failures are logged and reported together as
/// [`AnalyzerError::BatchFailed`].
pub fn analyze_path(options: &AnalyzeOptions) -> Result<usize> {
    let input = &options.input_path;
    let output = &options.output_path;

    if !input.exists() {
        return Err(AnalyzerError::InputNotFound {
            path: input.clone(),
        }
        .into());
    }

    if input.is_file() {
        if output.is_dir() {
            return Err(AnalyzerError::OutputIsDirectory {
                path: output.clone(),
            }
            .into());
        }
        analyze_file(
            input,
            output,
            options.name.as_deref(),
            options.mode,
            options.pretty,
        )?;
        return Ok(1);
    }

    if output.exists() && !output.is_dir() {
        return Err(AnalyzerError::OutputNotDirectory {
            path: output.clone(),
        }
        .into());
    }
    std::fs::create_dir_all(output).map_err(|source| AnalyzerError::OutputWriteError {
        path: output.clone(),
        source,
    })?;

    let files = list_sql_files(input);
    info!("Found {} SQL files in {}", files.len(), input.display());

    let failed = files
        .par_iter()
        .filter(|file| {
            let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
            let target = output.join(format!("{}.json", stem));
            match analyze_file(file, &target, None, options.mode, options.pretty) {
                Ok(()) => false,
                Err(e) => {
                    error!("Error processing {}: {:#}", file.display(), e);
                    true
                }
            }
        })
        .count();

    if failed > 0 {
        return Err(AnalyzerError::BatchFailed {
            failed,
            total: files.len(),
        }
        .into());
    }
    Ok(files.len())
}
