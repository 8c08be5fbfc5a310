//! Wire codec and RTO estimator benchmarks

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rft_protocol::packet::{OperationDescriptor, PacketHeader, ACK, PSH};
use rft_protocol::packet::{Operation, RecoveryMode};
use rft_protocol::{ReliableConfig, RtoEstimator};
use std::time::Duration;

fn bench_header_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_round_trip");

    for size in [0usize, 64, 1024] {
        let payload = vec![0xABu8; size];
        let header = PacketHeader::new(42, 7, PSH).unwrap();
        let encoded = header.encode(&payload);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| black_box(&header).encode(black_box(payload)));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| PacketHeader::parse(black_box(encoded)));
        });
    }

    group.finish();
}

fn bench_operation_descriptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("operation_descriptor");
    let desc = OperationDescriptor {
        op: Operation::Upload,
        mode: RecoveryMode::SelectiveRepeat,
    };
    let encoded = desc.encode();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(&desc).encode());
    });
    group.bench_function("decode", |b| {
        b.iter(|| OperationDescriptor::decode(black_box(&encoded)));
    });
    group.finish();
}

fn bench_rto_estimator(c: &mut Criterion) {
    let mut group = c.benchmark_group("rto_estimator");

    group.bench_function("sample", |b| {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        b.iter(|| est.sample(black_box(Duration::from_millis(120))));
    });

    group.bench_function("backoff", |b| {
        let mut est = RtoEstimator::new(ReliableConfig::default());
        b.iter(|| est.backoff());
    });

    group.finish();
}

fn bench_ack_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack_header");
    let payload: [u8; 0] = [];

    group.bench_function("build_and_encode", |b| {
        b.iter(|| {
            let header = PacketHeader::new(black_box(100), black_box(200), ACK).unwrap();
            black_box(header.encode(&payload))
        });
    });

    let encoded = Bytes::from(
        PacketHeader::new(100, 200, ACK)
            .unwrap()
            .encode(&payload)
            .to_vec(),
    );
    group.bench_function("parse", |b| {
        b.iter(|| PacketHeader::parse(black_box(&encoded)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_header_round_trip,
    bench_operation_descriptor,
    bench_rto_estimator,
    bench_ack_header,
);

criterion_main!(benches);
