//! Benchmarks for code regeneration.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln::core::compile::compile;
use kiln::core::manifest::parse_manifest;
use kiln::core::{marshal_code, ExecutionContext, Process, Record, TypeName, Value};

fn ctx() -> ExecutionContext {
    ExecutionContext::new(Process::new("bench"))
}

fn bench_marshal_strings(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = ctx();
    let mut group = c.benchmark_group("marshal_strings");
    for n in [1, 16, 256] {
        let value = Value::Strings((0..n).map(|i| format!("host-{i}\t\"x\"")).collect());
        group.bench_with_input(BenchmarkId::from_parameter(n), &value, |b, value| {
            b.iter(|| rt.block_on(marshal_code(&ctx, black_box(value))).unwrap());
        });
    }
    group.finish();
}

fn bench_marshal_record(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = ctx();
    let record = Value::Record(
        Record::new(TypeName::new("ssh", "Target"))
            .field("Local", true)
            .field("Path", "/var/lib/app/releases/current"),
    );
    c.bench_function("marshal_record", |b| {
        b.iter(|| rt.block_on(marshal_code(&ctx, black_box(&record))).unwrap());
    });
}

fn bench_program_code(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut steps = String::new();
    for i in 0..20 {
        steps.push_str(&format!(
            "  - session:\n      hosts: [web{i}, db{i}]\n      steps:\n        - copy: {{ from: \"local:build/app\", to: \"remote:/srv/app\" }}\n        - exec: {{ command: \"systemctl restart app-{i}\" }}\n"
        ));
    }
    let yaml = format!("version: \"1.0\"\nname: bench\nsteps:\n{steps}");
    let program = compile(&parse_manifest(&yaml).unwrap()).unwrap();
    let ctx = program.initial_context(Process::new("bench"));
    c.bench_function("program_code_20_sessions", |b| {
        b.iter(|| rt.block_on(program.code(black_box(&ctx))).unwrap());
    });
}

criterion_group!(
    benches,
    bench_marshal_strings,
    bench_marshal_record,
    bench_program_code
);
criterion_main!(benches);
