use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ts::testing::TsWriter;
use ts::{Demuxer, ReadContext, split_batches};

fn benchmark_demuxer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Demuxer");

    // Roughly 4 seconds of 30 fps video with large keyframes.
    let segment = TsWriter::new()
        .with_keyframe_size(64 * 1024)
        .segment(0, 120, 30);
    group.throughput(Throughput::Bytes(segment.len() as u64));

    group.bench_function("Whole segment", |b| {
        b.iter(|| {
            let mut demuxer = Demuxer::default();
            let ctx = ReadContext::default();
            let mut frames = demuxer.push(black_box(&segment), ctx);
            frames.extend(demuxer.flush(ctx));
            black_box(frames)
        })
    });

    group.bench_function("Sub-batched segment", |b| {
        b.iter(|| {
            let mut demuxer = Demuxer::default();
            let ctx = ReadContext::default();
            let mut count = 0usize;
            for batch in split_batches(segment.clone(), 2000) {
                count += demuxer.push(black_box(&batch), ctx).len();
            }
            black_box(count)
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_demuxer);
criterion_main!(benches);
