//! Benchmarks for log redaction and output flattening.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use iacflow::credentials::sanitize_log;
use iacflow::pipeline::flatten_outputs;
use std::collections::HashMap;

fn redaction_benchmark(c: &mut Criterion) {
    let env_vars = HashMap::from([
        ("AWS_ACCESS_KEY_ID".to_string(), "ASIAEXAMPLEKEY".to_string()),
        ("AWS_SECRET_ACCESS_KEY".to_string(), "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
        ("AWS_SESSION_TOKEN".to_string(), "FwoGZXIvYXdzEBYaDH+session/token==".to_string()),
    ]);
    let line = "aws_s3_bucket.site: Creation complete after 2s using wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    c.bench_function("sanitize_log", |b| {
        b.iter(|| sanitize_log(black_box(line), black_box(&env_vars)));
    });
}

fn outputs_benchmark(c: &mut Criterion) {
    let raw = (0..50)
        .map(|i| format!(r#""output_{i}": {{"sensitive": false, "type": "string", "value": "value-{i}"}}"#))
        .collect::<Vec<_>>()
        .join(",");
    let raw = format!("{{{raw}}}");

    c.bench_function("flatten_outputs", |b| {
        b.iter(|| flatten_outputs(black_box(&raw)));
    });
}

criterion_group!(benches, redaction_benchmark, outputs_benchmark);
criterion_main!(benches);
