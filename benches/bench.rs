use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ooosim::{mem::DataMemory, parse_and_exec};

fn run_loop() -> u64 {
    let engine = parse_and_exec("pressure", DataMemory::new(), 100_000);
    assert!(engine.is_halted());
    engine.cycles()
}

fn pipeline_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_throughput");
    group.sample_size(10);
    group.bench_function("pressure loop", |b| b.iter(|| black_box(run_loop())));
    group.finish();
}

criterion_group!(benches, pipeline_throughput);
criterion_main!(benches);
