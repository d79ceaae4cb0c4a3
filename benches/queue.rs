//! Byte queue transfer benchmarks

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use termsession::io::{ByteQueue, DEFAULT_CAPACITY};

const TRANSFER: usize = 1 << 20;

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Bytes(TRANSFER as u64));

    for chunk in [64usize, 1024, 4096] {
        group.bench_function(format!("transfer_chunk_{chunk}"), |b| {
            let data = vec![0xA5u8; chunk];
            b.iter(|| {
                let queue = Arc::new(ByteQueue::new(DEFAULT_CAPACITY));
                let consumer = {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || {
                        let mut buf = [0u8; DEFAULT_CAPACITY];
                        let mut received = 0;
                        while received < TRANSFER {
                            match queue.read(&mut buf, true) {
                                Ok(n) => received += n,
                                Err(_) => break,
                            }
                        }
                        received
                    })
                };

                let mut sent = 0;
                while sent < TRANSFER {
                    sent += queue.write(&data, false).unwrap_or(0);
                }
                black_box(consumer.join().unwrap_or(0))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transfer);

criterion_main!(benches);
