use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use streamgen::*;

// Latency scenarios for the generator.
// The synth fixture exercises every member kind the generator supports.

const SYNTH: &str = include_str!("../compiler/tests/fixtures/synth.json");
const SYNTH_TEMPLATE: &str = include_str!("../compiler/tests/fixtures/synth.tmpl");

/// `n` chained signals with a rate change every fourth link.
fn rate_chain(n: usize) -> String {
    let mut nodes = vec![
        r#"{"block": {"name": "AudioDomain", "type": "domain", "rate": 48000}}"#.to_string(),
    ];
    let mut members = Vec::with_capacity(n);
    for i in 0..n {
        let rate = if i % 4 == 3 {
            format!(", \"rate\": {}", 48000 >> (i % 3))
        } else {
            String::new()
        };
        nodes.push(format!(
            r#"{{"block": {{"name": "s{}", "type": "signal"{}}}}}"#,
            i, rate
        ));
        members.push(format!(r#"{{"name": {{"name": "s{}"}}}}"#, i));
    }
    nodes.push(format!(
        r#"{{"stream": {{"members": [{}]}}}}"#,
        members.join(", ")
    ));
    format!("[{}]", nodes.join(",\n"))
}

/// `n` module calls, each with its own gain property.
fn module_fanout(n: usize) -> String {
    let mut nodes = vec![
        r#"{"block": {"name": "Gain", "type": "module",
            "ports": [{"name": "input", "direction": "input"}, {"name": "output", "direction": "output"},
                      {"name": "amount", "direction": "property"}],
            "blocks": [{"block": {"name": "input", "type": "signal"}}, {"block": {"name": "output", "type": "signal"}},
                       {"block": {"name": "amount", "type": "signal"}}],
            "streams": [{"stream": {"members": [
                {"expression": {"type": "Multiply", "left": {"name": {"name": "input"}}, "right": {"name": {"name": "amount"}}}},
                {"name": {"name": "output"}}]}}]}}"#
            .to_string(),
    ];
    for i in 0..n {
        nodes.push(format!(
            r#"{{"block": {{"name": "x{}", "type": "signal"}}}}"#,
            i
        ));
        nodes.push(format!(
            r#"{{"stream": {{"members": [{{"name": {{"name": "x{}"}}}}, {{"function": {{"name": "Gain", "ports": {{"amount": {{"value": {}}}}}}}}}, {{"name": {{"name": "x{}"}}}}]}}}}"#,
            i,
            i,
            (i + 1) % n
        ));
    }
    format!("[{}]", nodes.join(",\n"))
}

// Load latency of the synth tree.
fn bench_load_latency(c: &mut Criterion) {
    c.bench_function("load/synth", |b| {
        b.iter(|| {
            let program = ast::load_program(black_box(SYNTH));
            black_box(&program);
        });
    });
}

// Generation latency, excluding loading.
fn bench_generate_latency(c: &mut Criterion) {
    let program = match ast::load_program(SYNTH) {
        Ok(p) => p,
        Err(e) => panic!("synth fixture must load: {}", e),
    };
    let templates = templates::CppTemplates::new();
    let opts = generate::GeneratorOptions::default();
    c.bench_function("generate/synth", |b| {
        b.iter(|| black_box(generate::generate(black_box(&program), &templates, &opts)));
    });
}

// Full pipeline latency (load -> generate -> stitch).
fn bench_full_pipeline_latency(c: &mut Criterion) {
    let templates = templates::CppTemplates::new();
    let opts = pipeline::CompileOptions {
        template: Some(SYNTH_TEMPLATE.to_string()),
        ..pipeline::CompileOptions::default()
    };
    c.bench_function("pipeline/synth", |b| {
        b.iter(|| black_box(pipeline::compile(black_box(SYNTH), &templates, &opts)));
    });
}

// Generation scaling vs stream length and call count.
fn bench_generate_scaling(c: &mut Criterion) {
    let templates = templates::CppTemplates::new();
    let opts = generate::GeneratorOptions::default();

    let mut group = c.benchmark_group("generate/rate_chain");
    for n in [8_usize, 32, 128] {
        let source = rate_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| black_box(pipeline::compile(source, &templates, &pipeline::CompileOptions::default())));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("generate/module_fanout");
    for n in [4_usize, 16, 64] {
        let program = match ast::load_program(&module_fanout(n)) {
            Ok(p) => p,
            Err(e) => panic!("fan-out tree must load: {}", e),
        };
        group.bench_with_input(BenchmarkId::from_parameter(n), &program, |b, program| {
            b.iter(|| black_box(generate::generate(program, &templates, &opts)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_load_latency,
    bench_generate_latency,
    bench_full_pipeline_latency,
    bench_generate_scaling,
);
criterion_main!(benches);
