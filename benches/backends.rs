use criterion::{Criterion, black_box, criterion_group, criterion_main};

use monkey::backend;
use monkey::{lexer, parser};

const FIBONACCI: &str = "
let fibonacci = fn(x) {
    if (x == 0) {
        0
    } else {
        if (x == 1) {
            1
        } else {
            fibonacci(x - 1) + fibonacci(x - 2)
        }
    }
};
fibonacci(20);
";

fn bench_frontend(c: &mut Criterion) {
    c.bench_function("frontend_tokenize", |b| {
        b.iter(|| {
            let tokens = lexer::tokenize(black_box(FIBONACCI)).expect("tokenize");
            black_box(tokens);
        })
    });

    c.bench_function("frontend_parse", |b| {
        b.iter(|| {
            let (program, errors) = parser::parse(black_box(FIBONACCI));
            assert!(errors.is_empty());
            black_box(program);
        })
    });
}

fn bench_backends(c: &mut Criterion) {
    let (program, errors) = parser::parse(FIBONACCI);
    assert!(errors.is_empty(), "parse errors: {errors:?}");

    for mut backend in backend::backends() {
        c.bench_function(&format!("fibonacci_{}", backend.name()), |b| {
            b.iter(|| {
                let value = backend.run(black_box(&program)).expect("run");
                black_box(value);
            })
        });
    }
}

criterion_group!(benches, bench_frontend, bench_backends);
criterion_main!(benches);
