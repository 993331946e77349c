// ABOUTME: Benchmark suite for wire-frame encoding and decoding performance
// ABOUTME: Measures Frame construction, serialization, and parsing across payload sizes

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use msghub::{Action, Frame};
use std::time::Duration;

fn bench_new_and_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_to_bytes");
    for size in [16usize, 256, 4096] {
        let topic = b"bench_topic".to_vec();
        let body = vec![0xABu8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let frame =
                    Frame::new(Action::Publish, black_box(topic.clone()), black_box(body.clone()))
                        .unwrap();
                black_box(frame.to_bytes())
            });
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    for size in [16usize, 256, 4096] {
        let topic = b"bench_topic".to_vec();
        let body = vec![0xABu8; size];
        let frame = Frame::new(Action::Publish, topic, body).unwrap();
        let bytes: Bytes = frame.to_bytes();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(Frame::parse(black_box(bytes.clone())).unwrap()));
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(3));
    targets = bench_new_and_encode, bench_parse
}
criterion_main!(benches);
