use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use redrelay::engine::LocalEngine;
use redrelay::session::Session;
use redrelay::storage::Dict;
use std::sync::Arc;

fn bench_exec_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec");
    group.bench_function("set_get", |b| {
        b.iter_batched(
            || Session::new(Box::new(LocalEngine::new(Arc::new(Dict::new())))),
            |mut session| {
                for i in 0..1000u32 {
                    let k = format!("k{}", i);
                    let v = format!("v{}", i);
                    let set = format!(
                        "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
                        k.len(),
                        k,
                        v.len(),
                        v
                    );
                    let get = format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", k.len(), k);
                    session.feed(set.as_bytes());
                    session.feed(get.as_bytes());
                    let _ = session.take_output();
                }
                black_box(session)
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_exec_set_get);
criterion_main!(benches);
