//! Parser and emulator throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use termsession::parser::Parser;
use termsession::Emulator;

/// Typical build output: colored status words and line endings
fn mixed_output() -> String {
    "Line 1: \x1b[32mOK\x1b[0m\r\nLine 2: \x1b[31mERROR\x1b[0m\r\n".repeat(500)
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    let inputs = [
        ("plain_text", "Hello, World! ".repeat(1000)),
        ("csi_sequences", "\x1b[1;31mRed\x1b[0m \x1b[5;10H\x1b[2J".repeat(100)),
        ("mixed_content", mixed_output()),
        ("utf8_content", "Hello, 世界! 🎉 ".repeat(500)),
    ];

    for (name, input) in &inputs {
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_function(*name, |b| {
            b.iter(|| {
                let mut parser = Parser::new();
                black_box(parser.parse(black_box(input.as_bytes())))
            })
        });
    }

    group.finish();
}

fn bench_emulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("emulator");

    let mixed = mixed_output();
    group.throughput(Throughput::Bytes(mixed.len() as u64));
    group.bench_function("append_scrolling", |b| {
        b.iter(|| {
            let mut emulator = Emulator::new(80, 24, 2000);
            emulator.append(black_box(mixed.as_bytes()));
            black_box(emulator)
        })
    });

    let long_lines = "x".repeat(300).repeat(200);
    group.throughput(Throughput::Bytes(long_lines.len() as u64));
    group.bench_function("resize_reflow", |b| {
        let mut emulator = Emulator::new(80, 24, 2000);
        emulator.append(long_lines.as_bytes());
        let mut wide = false;
        b.iter(|| {
            wide = !wide;
            emulator.resize(if wide { 132 } else { 80 }, 24);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_emulator);

criterion_main!(benches);
