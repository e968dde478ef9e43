use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use perfmon_sampler::counter::decode::decode;
use perfmon_sampler::counter::{CounterCatalog, CounterType};
use perfmon_sampler::driver::sim::{NullFrame, SimDriver};
use perfmon_sampler::report::Report;
use perfmon_sampler::sampler::{Sampler, SamplerOptions};

fn result_bytes(value: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + value.len());
    data.extend_from_slice(&0u32.to_ne_bytes());
    data.extend_from_slice(&0u32.to_ne_bytes());
    data.extend_from_slice(value);
    data
}

fn build_sampler(pool_size: usize) -> Sampler<SimDriver, NullFrame, std::io::Sink> {
    let driver = SimDriver::with_default_catalog();
    let catalog =
        CounterCatalog::discover(&driver, &mut Report::new(std::io::sink())).expect("discover");
    Sampler::new(
        driver,
        NullFrame::new(),
        catalog.select_target("GRBM_000"),
        pool_size,
        Report::new(std::io::sink()),
        SamplerOptions::default(),
    )
    .expect("sampler")
}

fn bench_decode(c: &mut Criterion) {
    let clocks = result_bytes(&987_654_321u64.to_ne_bytes());
    let busy = result_bytes(&42.5f32.to_ne_bytes());

    c.bench_function("decode/uint64", |b| {
        b.iter(|| decode(black_box(&clocks), CounterType::UnsignedInt64).expect("decode u64"))
    });

    c.bench_function("decode/percentage", |b| {
        b.iter(|| decode(black_box(&busy), CounterType::Percentage).expect("decode pct"))
    });
}

fn bench_sampling(c: &mut Criterion) {
    c.bench_function("sampler/step_no_harvest", |b| {
        b.iter_batched(
            || build_sampler(100),
            |mut sampler| {
                for _ in 0..100 {
                    black_box(sampler.step().expect("step"));
                }
                sampler
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("sampler/harvest_100", |b| {
        b.iter_batched(
            || {
                let mut sampler = build_sampler(100);
                for _ in 0..100 {
                    sampler.step().expect("step");
                }
                sampler
            },
            |mut sampler| {
                black_box(sampler.harvest().expect("harvest"));
                sampler
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_decode(c);
    bench_sampling(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
