//! Expression parsing and evaluation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use virtual_thing::math::{Env, parse};

const EXPRESSIONS: [(&str, &str); 3] = [
    ("arithmetic", "(a + b) * 2 - c / 4 % 3"),
    ("comparison", "a > b and (c == 10 or not flag)"),
    ("member", "reading.level * reading.scale + 1"),
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, source) in EXPRESSIONS {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| parse(black_box(source)))
        });
    }
    group.finish();
}

fn bench_eval(c: &mut Criterion) {
    let scope = json!({
        "a": 3, "b": 4, "c": 10, "flag": false,
        "reading": { "level": 42, "scale": 0.5 }
    });
    let env = Env {
        scope: Some(&scope),
        epsilon: 0.0,
    };
    let mut group = c.benchmark_group("eval");
    for (name, source) in EXPRESSIONS {
        let Ok(expr) = parse(source) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &expr, |b, expr| {
            b.iter(|| env.eval(black_box(expr)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_eval);
criterion_main!(benches);
