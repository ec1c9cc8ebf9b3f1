//! Benchmarks for the load-time path.
//!
//! Covers the work done for every class the host loads:
//! - parsing a class file
//! - rewriting a class with probes
//! - a full dispatch including the exclusion check
//! - recording hits into the memory sink

extern crate lineprobe;

use criterion::{criterion_group, criterion_main, Criterion};
use lineprobe::{dispatcher::LoadRequest, prelude::*};
use std::{hint::black_box, sync::Arc};

/// A class with `methods` static methods of `lines` lines each, two instructions per line.
fn synthetic_class(methods: u16, lines: u16) -> Vec<u8> {
    let mut builder = ClassBuilder::new("bench/Synthetic").source_file("Synthetic.java");
    for method in 0..methods {
        builder = builder.method(
            MethodBuilder::new(&format!("m{method}"), "(I)I")
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .body(move |body| {
                    for line in 0..lines {
                        body.line(method * lines + line + 1);
                        body.local("iload", 0)?;
                        body.op("pop")?;
                    }
                    body.local("iload", 0)?;
                    body.op("ireturn")
                }),
        );
    }
    builder.to_bytes().unwrap()
}

fn bench_parse(c: &mut Criterion) {
    let bytes = synthetic_class(20, 30);

    c.bench_function("classfile_parse", |b| {
        b.iter(|| {
            let class = ClassFile::parse(black_box(&bytes)).unwrap();
            black_box(class)
        });
    });
}

fn bench_rewrite(c: &mut Criterion) {
    let small = synthetic_class(1, 5);
    let large = synthetic_class(40, 50);
    let rewriter = UnitRewriter::new(ProbeConfig::default());

    c.bench_function("rewrite_small_class", |b| {
        b.iter(|| {
            let outcome = rewriter.rewrite(black_box(&small), "bench/Synthetic").unwrap();
            black_box(outcome)
        });
    });

    c.bench_function("rewrite_large_class", |b| {
        b.iter(|| {
            let outcome = rewriter.rewrite(black_box(&large), "bench/Synthetic").unwrap();
            black_box(outcome)
        });
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let bytes = synthetic_class(10, 20);
    let dispatcher = Dispatcher::with_rewriter(
        ExclusionSet::with_prefixes(["java/", "sun/", "jdk/"]),
        ProbeConfig::default(),
    );

    // every iteration uses a fresh loader so nothing is deduplicated
    let mut loader = 0u64;
    c.bench_function("dispatch_first_load", |b| {
        b.iter(|| {
            loader += 1;
            let request = LoadRequest {
                loader: Some(LoaderId(loader)),
                unit_name: Some("bench/Synthetic"),
                being_redefined: false,
                bytes: black_box(&bytes),
            };
            black_box(dispatcher.on_load(&request))
        });
    });

    c.bench_function("dispatch_excluded", |b| {
        b.iter(|| {
            let request = LoadRequest {
                loader: Some(LoaderId(1)),
                unit_name: Some("java/util/HashMap"),
                being_redefined: false,
                bytes: black_box(&bytes),
            };
            black_box(dispatcher.on_load(&request))
        });
    });
}

fn bench_record(c: &mut Criterion) {
    let recorder = HitRecorder::new(Arc::new(MemorySink::new()));

    c.bench_function("record_hit_memory", |b| {
        b.iter(|| black_box(recorder.register_hit(black_box("bench/Synthetic"), 42)));
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_rewrite,
    bench_dispatch,
    bench_record
);
criterion_main!(benches);
