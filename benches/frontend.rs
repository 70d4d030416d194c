use std::path::Path;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use jplang::context::CompilationContext;
use jplang::language::LanguageTable;
use jplang::{lexer, parser};

fn sample_source(functions: usize) -> String {
    let mut source = String::new();
    for index in 0..functions {
        source.push_str(&format!(
            "funcao calcula{index}(n):\n    total = 0\n    para k de 1 ate n:\n        se k % 2 == 0:\n            total = total + k\n        senao:\n            total = total - 1\n    retornar total\nsaida(\"parcial {{calcula{index}(10)}}\")\n"
        ));
    }
    source
}

fn bench_frontend(c: &mut Criterion) {
    let lang = LanguageTable::portuguese();
    let source = sample_source(100);

    c.bench_function("frontend_tokenize", |b| {
        b.iter(|| {
            let out = lexer::tokenize(black_box(&source), &lang).expect("tokenize");
            black_box(out);
        })
    });

    c.bench_function("frontend_tokenize_parse", |b| {
        b.iter(|| {
            let tokens = lexer::tokenize(black_box(&source), &lang).expect("tokenize");
            let mut ctx = CompilationContext::new(lang.clone(), Path::new("."));
            let out = parser::parse_tokens(tokens, &mut ctx).expect("parse");
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
