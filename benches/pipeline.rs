//! Pipeline benchmarks for rust-sproc-analyzer
//!
//! Measures:
//! - Tokenization of procedure text
//! - Structure analysis
//! - Full and basic pipelines
//! - Document rendering
//!
//! Run with: cargo bench
//! Compare against baseline: cargo bench -- --save-baseline before
//!                          (make changes)
//!                          cargo bench -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_sproc_analyzer::analysis::{analyze_source, structure, AnalysisMode};
use rust_sproc_analyzer::parser::{tokenize, SqlSource};
use rust_sproc_analyzer::{analyze_sql, output};
use std::path::PathBuf;

/// Get the path to a test fixture
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("procedures")
        .join(name)
}

/// Every fixture procedure as (name, text)
fn fixtures() -> Vec<(String, String)> {
    let dir = fixture_path("");
    rust_sproc_analyzer::list_sql_files(&dir)
        .into_iter()
        .map(|path| {
            let name = path.file_stem().unwrap().to_string_lossy().into_owned();
            let sql = std::fs::read_to_string(&path).unwrap();
            (name, sql)
        })
        .collect()
}

/// One large procedure made by concatenating every fixture body
fn large_procedure() -> String {
    let mut sql = String::from("CREATE PROCEDURE dbo.usp_Large @CustomerId INT, @CutoffDate DATE AS\nBEGIN\n");
    for _ in 0..20 {
        for (_, fixture) in fixtures() {
            let body = fixture.split_once("\nAS\n").map_or(fixture.as_str(), |(_, b)| b);
            sql.push_str(body);
            sql.push('\n');
        }
    }
    sql.push_str("END\n");
    sql
}

fn bench_tokenization(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenization");
    let large = large_procedure();
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("large_procedure", |b| b.iter(|| tokenize(black_box(&large))));
    group.finish();
}

fn bench_structure(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_analysis");
    for (name, sql) in fixtures() {
        let source = SqlSource::new(sql);
        group.bench_with_input(BenchmarkId::from_parameter(&name), &source, |b, source| {
            b.iter(|| structure::analyze_structure(black_box(source), None))
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");
    for (name, sql) in fixtures() {
        group.bench_with_input(BenchmarkId::new("full", &name), &sql, |b, sql| {
            b.iter(|| analyze_sql(black_box(sql), None, AnalysisMode::Full))
        });
        group.bench_with_input(BenchmarkId::new("basic", &name), &sql, |b, sql| {
            b.iter(|| analyze_sql(black_box(sql), None, AnalysisMode::Basic))
        });
    }

    let large = large_procedure();
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.sample_size(20);
    group.bench_function("large_procedure", |b| {
        b.iter(|| analyze_sql(black_box(&large), None, AnalysisMode::Full))
    });
    group.finish();
}

fn bench_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendering");
    let source = SqlSource::new(large_procedure());
    let analysis = analyze_source(&source, None, AnalysisMode::Full);

    group.bench_function("compact", |b| {
        b.iter(|| output::render(black_box(&analysis), false).unwrap())
    });
    group.bench_function("pretty", |b| {
        b.iter(|| output::render(black_box(&analysis), true).unwrap())
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_tokenization,
    bench_structure,
    bench_full_pipeline,
    bench_rendering
);
criterion_main!(benches);
