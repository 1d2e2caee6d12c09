//! Sniffing and carryover benchmarks
//!
//! Measures the per-connection cost of classifying the first bytes and of
//! draining the carryover buffer at various fetch sizes.
//!
//! Run with: cargo bench --bench carryover

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use std::time::Duration;
use tlsmux::mux::{classify, sniff, Carryover};

fn client_hello() -> Vec<u8> {
    let mut hello = vec![0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0xfc, 0x03, 0x03];
    hello.resize(517, 0xab);
    hello
}

fn http_request() -> Vec<u8> {
    b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nUser-Agent: bench\r\nAccept: */*\r\n\r\n"
        .to_vec()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let hello = client_hello();
    let request = http_request();

    group.bench_function("tls_client_hello", |b| {
        b.iter(|| black_box(classify(black_box(&hello))));
    });

    group.bench_function("http_request", |b| {
        b.iter(|| black_box(classify(black_box(&request))));
    });

    group.finish();
}

fn bench_sniff(c: &mut Criterion) {
    let mut group = c.benchmark_group("sniff");
    let hello = client_hello();

    group.throughput(Throughput::Bytes(hello.len() as u64));
    group.bench_function("client_hello", |b| {
        b.iter(|| {
            let (transport, io) = sniff(Cursor::new(black_box(hello.clone())));
            black_box((transport, io.buffered().len()));
        });
    });

    group.finish();
}

fn bench_fetch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("carryover_fetch");
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let prefix = &payload[..4096];
    let rest = &payload[4096..];

    group.throughput(Throughput::Bytes(payload.len() as u64));
    for size in [16usize, 512, 4096, 16384] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut io = Carryover::new(Cursor::new(rest.to_vec()), BytesMut::from(prefix));
                let mut total = 0;
                loop {
                    let chunk = io.fetch(size).unwrap();
                    if chunk.is_empty() {
                        break;
                    }
                    total += chunk.len();
                }
                black_box(total);
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = sniffing;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .sample_size(500);
    targets =
        bench_classify,
        bench_sniff
}

criterion_group! {
    name = carryover;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets = bench_fetch_sizes
}

criterion_main!(sniffing, carryover);
