//! Lexer throughput benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use via_lexer::Lexer;

fn sample_program(repeat: usize) -> String {
    let unit = r#"
// accumulate squares below a limit
var limit = 1000
var total = 0
for i = 1, limit {
    if i % 2 == 0 {
        total += i * i
    } else {
        total -= i
    }
}
const banner = "total: " .. total
print(banner)

fn scale(xs, k) {
    var out = []
    for x in xs {
        out[len(out)] = x * k
    }
    return out
}
"#;
    unit.repeat(repeat)
}

fn bench_tokenize(c: &mut Criterion) {
    let source = sample_program(64);
    let mut group = c.benchmark_group("lexer");
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("tokenize", |b| {
        b.iter(|| {
            let mut lexer = Lexer::new(black_box(&source));
            black_box(lexer.tokenize())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
