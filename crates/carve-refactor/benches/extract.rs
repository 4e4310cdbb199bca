use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use carve_refactor::{ExtractLocalFunction, FileId, TextRange};

/// A method with `statements` numbered statements between the declarations and the final read.
fn method_fixture(statements: u32) -> String {
    let mut out = String::from("class Bench\n{\n    static int Step(int v) => v + 1;\n\n    static void Run(int seed)\n    {\n");
    out.push_str("        int total = seed;\n");
    out.push_str("        int other = 0;\n");
    for i in 0..statements {
        out.push_str(&format!("        total = Step(total) + {i};\n"));
        out.push_str(&format!("        other += total * {i};\n"));
    }
    out.push_str("        System.Console.WriteLine(total + other);\n    }\n}\n");
    out
}

/// The statements between the two declarations and the final read.
fn statement_selection(source: &str) -> TextRange {
    let start = source
        .find("total = Step")
        .expect("fixture must contain a loop body");
    let end = source
        .find("\n        System.Console")
        .expect("fixture must contain the final read");
    TextRange::new(start, end)
}

fn bench_extract(c: &mut Criterion) {
    let file = FileId::new("Bench.cs");

    let mut group = c.benchmark_group("extract_local_function");
    group.measurement_time(Duration::from_secs(2));
    group.warm_up_time(Duration::from_secs(1));
    group.sample_size(20);

    for statements in [10u32, 100, 500] {
        let source = method_fixture(statements);
        let selection = statement_selection(&source);
        let refactoring = ExtractLocalFunction::new(file.clone(), selection);
        assert!(
            refactoring.apply(&source).is_some(),
            "extraction must apply to the {statements} statement fixture"
        );

        group.bench_with_input(BenchmarkId::new("statements", statements), &source, |b, source| {
            b.iter_batched(
                || refactoring.clone(),
                |refactoring| black_box(refactoring.apply(black_box(source))),
                BatchSize::SmallInput,
            );
        });
    }

    let source = method_fixture(100);
    let offset = source.find("Step(total) + 50").expect("fixture must contain the 50th step");
    let expression = ExtractLocalFunction::new(file.clone(), TextRange::new(offset, offset + "Step(total) + 50".len()));
    assert!(expression.apply(&source).is_some(), "expression extraction must apply");
    group.bench_function("expression", |b| {
        b.iter(|| black_box(expression.apply(black_box(&source))))
    });

    group.bench_function("analyze", |b| {
        let refactoring = ExtractLocalFunction::new(file.clone(), statement_selection(&source));
        b.iter(|| black_box(refactoring.analyze(black_box(&source))))
    });

    group.finish();
}

criterion_group!(benches, bench_extract);
criterion_main!(benches);
