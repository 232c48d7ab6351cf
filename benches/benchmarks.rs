//! Benchmark suite for pyrefly-autotype subsystems.
//!
//! This module provides performance benchmarks for:
//! - Diagnostic parsing (JSON, text, and fallback output)
//! - Static annotation analysis (single source files)
//! - Project scanning (walk + per-file analysis)
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```
//!
//! Criterion writes machine-readable estimates to `target/criterion/`.

use autotype::config::AutotypeConfig;
use autotype::diagnostics::{parse, DiagnosticParser};
use autotype::project::{scan, PythonAnalyzer};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fmt::Write as _;
use std::fs;
use tempfile::TempDir;

// ============================================================================
// Diagnostic Parsing Benchmarks
// ============================================================================

fn json_report(errors: usize) -> String {
    let entries: Vec<String> = (0..errors)
        .map(|i| {
            format!(
                r#"{{"path":"app.py","line":{},"column":5,"severity":"error","description":"Returned type `str` is not assignable to `int`","name":"bad-return"}}"#,
                i + 1
            )
        })
        .collect();
    format!(r#"{{"errors":[{}]}}"#, entries.join(","))
}

fn text_report(errors: usize) -> String {
    let mut out = String::new();
    for i in 0..errors {
        let _ = writeln!(
            out,
            "ERROR Returned type `str` is not assignable to `int` [bad-return]\n --> app.py:{}:5",
            i + 1
        );
    }
    let _ = writeln!(out, " INFO {errors} errors shown");
    out
}

/// Benchmark parsing of checker output in each recognized shape.
fn bench_diagnostic_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("diagnostic_parsing");
    let parser = DiagnosticParser::for_file("app.py");

    for size in [1, 50, 500] {
        group.throughput(Throughput::Elements(size as u64));

        let json = json_report(size);
        group.bench_with_input(BenchmarkId::new("json", size), &json, |b, raw| {
            b.iter(|| black_box(parser.parse(black_box(raw), Some(1))))
        });

        let text = text_report(size);
        group.bench_with_input(BenchmarkId::new("text", size), &text, |b, raw| {
            b.iter(|| black_box(parser.parse(black_box(raw), Some(1))))
        });
    }

    let garbage = "Traceback (most recent call last):\n  boom\n".repeat(100);
    group.bench_function("fallback", |b| {
        b.iter(|| black_box(parse(black_box(&garbage), Some(70))))
    });

    group.finish();
}

// ============================================================================
// Static Analysis Benchmarks
// ============================================================================

fn python_module(functions: usize) -> String {
    let mut src = String::from("import os\n\nLIMIT = 10\nNAME: str = \"demo\"\n\n");
    for i in 0..functions {
        if i % 2 == 0 {
            let _ = writeln!(
                src,
                "def handler_{i}(request, *args, retries=3, **kwargs):\n    \"\"\"Doc (with, commas)\"\"\"\n    return request\n"
            );
        } else {
            let _ = writeln!(
                src,
                "class Service{i}:\n    def call(self, payload: dict[str, int],\n             timeout: float = 1.0) -> bool:\n        # comment (\n        return True\n"
            );
        }
    }
    src
}

/// Benchmark the lexical missing-annotation analysis.
fn bench_static_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_analysis");
    let analyzer = PythonAnalyzer::new().expect("patterns compile");

    for size in [10, 100, 1000] {
        let source = python_module(size);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::new("analyze_source", size), &source, |b, src| {
            b.iter(|| black_box(analyzer.analyze_source(black_box(src))))
        });
    }

    group.finish();
}

// ============================================================================
// Project Scan Benchmarks
// ============================================================================

fn create_python_project(files: usize) -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    for i in 0..files {
        let dir = temp.path().join(format!("pkg{}", i % 5));
        fs::create_dir_all(&dir).expect("Failed to create package");
        fs::write(dir.join(format!("module_{i}.py")), python_module(10))
            .expect("Failed to write module");
    }

    let hidden = temp.path().join(".venv/lib/python3.12/site-packages");
    fs::create_dir_all(&hidden).expect("Failed to create venv");
    for i in 0..files {
        fs::write(hidden.join(format!("dep_{i}.py")), python_module(10))
            .expect("Failed to write dependency");
    }
    temp
}

/// Benchmark a full project scan, including the pruned virtualenv.
fn bench_project_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_scan");
    let config = AutotypeConfig::default();

    for size in [10, 50, 200] {
        let temp = create_python_project(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("scan", size), temp.path(), |b, root| {
            b.iter(|| black_box(scan(black_box(root), &config).expect("scan succeeds")))
        });
    }

    group.finish();
}

criterion_group!(parse_benches, bench_diagnostic_parsing);

criterion_group!(analysis_benches, bench_static_analysis, bench_project_scan);

criterion_main!(parse_benches, analysis_benches);
