use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redrelay::protocol::CommandStream;

fn bench_resp_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");
    group.bench_function("decode_1k_pipelined", |b| {
        let mut buf = BytesMut::new();
        for i in 0..1000 {
            buf.extend_from_slice(
                format!(
                    "*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n${}\r\nval{}\r\n",
                    3 + i.to_string().len(),
                    i
                )
                .as_bytes(),
            );
        }
        b.iter(|| {
            let mut tmp = buf.clone();
            let mut stream = CommandStream::new();
            let mut count = 0usize;
            while let Some(frame) = stream.feed(&mut tmp).unwrap() {
                count += frame.argc();
            }
            black_box(count);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_resp_decode);
criterion_main!(benches);
