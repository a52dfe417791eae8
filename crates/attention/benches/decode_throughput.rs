use attention::masks::build_causal_mask;
use attention::{AttentionConfig, DecoderState, MultiheadAttention, StepAttention};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_decode(c: &mut Criterion) {
    let device = Device::Cpu;
    let embed_dim = 256usize;
    let histories = [32usize, 128, 512];

    let config = AttentionConfig::new(embed_dim, 4);
    let module = MultiheadAttention::new(config, &device, DType::F32).expect("module init");
    let decoder = module.clone().into_growing();

    let mut group = c.benchmark_group("decode");
    for &history in &histories {
        let mut state = DecoderState::new();
        for _ in 0..history {
            let x = Tensor::randn(0f32, 1.0, (1, 1, embed_dim), &device).expect("prefill input");
            decoder
                .step(&x, &x, &x, None, None, &mut state)
                .expect("prefill step");
        }
        let x = Tensor::randn(0f32, 1.0, (1, 1, embed_dim), &device).expect("step input");

        group.bench_with_input(
            BenchmarkId::new("cached_step", history),
            &history,
            |b, _| {
                b.iter(|| {
                    let mut step_state = state.clone();
                    let out = decoder
                        .step(black_box(&x), &x, &x, None, None, &mut step_state)
                        .expect("step");
                    black_box(out);
                });
            },
        );

        let sequence =
            Tensor::randn(0f32, 1.0, (history + 1, 1, embed_dim), &device).expect("sequence");
        let causal = build_causal_mask(&device, history + 1, history + 1).expect("mask");
        group.bench_with_input(
            BenchmarkId::new("full_recompute", history),
            &history,
            |b, _| {
                b.iter(|| {
                    let out = module
                        .forward(black_box(&sequence), &sequence, &sequence, None, Some(&causal))
                        .expect("forward");
                    black_box(out);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
