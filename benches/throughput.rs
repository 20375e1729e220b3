//! Throughput benchmark for the request path
//!
//! Measures the cost of one pipelined batch: framing, dispatch against the
//! keyspace and reply encoding, without the socket. The per-batch and
//! per-command split mirrors `t0` and `t1` of the throughput model.

use bytes::BytesMut;
use cqdam_server::network::Connection;
use cqdam_server::protocol::resp::encode_request;
use cqdam_server::protocol::CommandExecutor;
use cqdam_server::store::HashTable;
use cqdam_server::Config;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const DEPTHS: [usize; 6] = [1, 4, 16, 64, 128, 256];

fn batch(command: &[u8], depth: usize) -> BytesMut {
    let mut buf = BytesMut::new();
    for i in 0..depth {
        let key = format!("key:{}", i);
        if command == b"SET" {
            encode_request(&mut buf, &[command, key.as_bytes(), b"xyz".as_slice()]);
        } else {
            encode_request(&mut buf, &[command, key.as_bytes()]);
        }
    }
    buf
}

/// Benchmark a full batch through parse, dispatch and flush
fn bench_pipeline(c: &mut Criterion) {
    let config = Config::default();

    for command in [b"SET".as_slice(), b"GET".as_slice()] {
        let name = String::from_utf8_lossy(command).to_lowercase();
        let mut group = c.benchmark_group(format!("pipeline_{}", name));

        for depth in DEPTHS {
            let input = batch(command, depth);
            let mut executor = CommandExecutor::new(&config);
            let mut connection = Connection::new(1, None, &config);
            let mut sink = Vec::with_capacity(64 * 1024);

            // Populate keys so GET measures hits
            connection.process_read(&batch(b"SET", depth), &mut executor);
            let _ = connection.flush(&mut sink);

            group.throughput(Throughput::Elements(depth as u64));
            group.bench_with_input(BenchmarkId::from_parameter(depth), &input, |b, input| {
                b.iter(|| {
                    sink.clear();
                    let replies = connection.process_read(black_box(input), &mut executor);
                    let _ = connection.flush(&mut sink);
                    black_box(replies)
                });
            });
        }

        group.finish();
    }
}

/// Benchmark raw table inserts and lookups
fn bench_table(c: &mut Criterion) {
    let keys: Vec<bytes::Bytes> = (0..100_000)
        .map(|i| bytes::Bytes::from(format!("key:{}", i)))
        .collect();

    let mut group = c.benchmark_group("table");
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("insert_100k", |b| {
        b.iter(|| {
            let mut table = HashTable::new();
            for (i, key) in keys.iter().enumerate() {
                table.insert(key.clone(), i);
            }
            black_box(table.len())
        });
    });

    let mut table = HashTable::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        table.insert(key.clone(), i);
    }
    group.bench_function("get_100k", |b| {
        b.iter(|| {
            let mut found = 0;
            for key in &keys {
                if table.get(key).is_some() {
                    found += 1;
                }
            }
            black_box(found)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_table);
criterion_main!(benches);
