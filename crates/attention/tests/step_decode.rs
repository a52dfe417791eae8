use anyhow::Result;
use attention::masks::{build_causal_mask, key_padding_mask_from_lengths};
use attention::{
    AttentionConfig, AttentionError, DecoderState, MultiheadAttention, StepAttention,
};
use candle_core::{DType, Device, Tensor};

fn allclose(a: &Tensor, b: &Tensor, tol: f32) {
    let diff = a
        .sub(b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    let max = diff.into_iter().fold(0.0_f32, |acc, v| acc.max(v));
    assert!(max <= tol, "max diff {max} exceeded tolerance {tol}");
}

fn build_module(embed_dim: usize, num_heads: usize) -> MultiheadAttention {
    let config = AttentionConfig::new(embed_dim, num_heads);
    MultiheadAttention::new(config, &Device::Cpu, DType::F32).expect("module builds")
}

#[test]
fn growing_decode_matches_full_forward() -> Result<()> {
    let device = Device::Cpu;
    let steps = 4usize;
    let module = build_module(8, 2);

    let sequence = Tensor::randn(0f32, 1.0, (steps, 2, 8), &device)?;
    let causal = build_causal_mask(&device, steps, steps)?;
    let (full_output, _) = module.forward(&sequence, &sequence, &sequence, None, Some(&causal))?;

    let decoder = module.clone().into_growing();
    let mut state = DecoderState::new();
    let mut outputs = Vec::with_capacity(steps);
    for t in 0..steps {
        let x_t = sequence.narrow(0, t, 1)?;
        let (output, weights) = decoder.step(&x_t, &x_t, &x_t, None, None, &mut state)?;
        assert_eq!(weights.dims(), &[4, 1, t + 1]);
        outputs.push(output);
    }

    let refs: Vec<&Tensor> = outputs.iter().collect();
    let stepped = Tensor::cat(&refs, 0)?;
    allclose(&stepped, &full_output, 1e-5);
    Ok(())
}

#[test]
fn growing_decode_matches_full_forward_with_padding() -> Result<()> {
    let device = Device::Cpu;
    let steps = 3usize;
    let module = build_module(8, 2);

    let sequence = Tensor::randn(0f32, 1.0, (steps, 2, 8), &device)?;
    // Batch item 1 has its second position padded out.
    let full_mask = Tensor::from_vec(vec![0u8, 0, 0, 0, 1, 0], (2, 3), &device)?;
    let causal = build_causal_mask(&device, steps, steps)?;
    let (full_output, _) = module.forward(
        &sequence,
        &sequence,
        &sequence,
        Some(&full_mask),
        Some(&causal),
    )?;

    let decoder = module.clone().into_growing();
    let mut state = DecoderState::new();
    let mut outputs = Vec::with_capacity(steps);
    for t in 0..steps {
        let x_t = sequence.narrow(0, t, 1)?;
        let step_mask = full_mask.narrow(1, t, 1)?.contiguous()?;
        let (output, _) = decoder.step(&x_t, &x_t, &x_t, Some(&step_mask), None, &mut state)?;
        outputs.push(output);
    }

    let refs: Vec<&Tensor> = outputs.iter().collect();
    let stepped = Tensor::cat(&refs, 0)?;
    allclose(&stepped, &full_output, 1e-5);
    Ok(())
}

#[test]
fn static_cache_is_computed_once_and_reused() -> Result<()> {
    let device = Device::Cpu;
    let module = build_module(8, 2);
    let source = Tensor::randn(0f32, 1.0, (5, 2, 8), &device)?;
    let decoder = module.clone().into_static_kv();
    let mut state = DecoderState::new();

    let mut cached_after_first: Option<(Tensor, Tensor)> = None;
    for call in 0..3 {
        let query = Tensor::randn(0f32, 1.0, (1, 2, 8), &device)?;

        // After the first call the raw source argument is ignored, so a
        // garbage tensor must not change the result.
        let raw_source = if call == 0 {
            source.clone()
        } else {
            Tensor::randn(0f32, 100.0, (5, 2, 8), &device)?
        };
        let (step_output, _) =
            decoder.step(&query, &raw_source, &raw_source, None, None, &mut state)?;

        let (full_output, _) = module.forward(&query, &source, &source, None, None)?;
        allclose(&step_output, &full_output, 1e-5);

        match &state {
            DecoderState::Static { key, value } => {
                assert_eq!(key.dims(), &[2, 2, 5, 4]);
                match &cached_after_first {
                    None => cached_after_first = Some((key.clone(), value.clone())),
                    Some((first_key, first_value)) => {
                        allclose(key, first_key, 0.0);
                        allclose(value, first_value, 0.0);
                    }
                }
            }
            other => panic!("expected static state after step, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn static_mode_applies_fresh_padding_mask_each_call() -> Result<()> {
    let device = Device::Cpu;
    let module = build_module(8, 2);
    let source = Tensor::randn(0f32, 1.0, (4, 1, 8), &device)?;
    let query = Tensor::randn(0f32, 1.0, (1, 1, 8), &device)?;
    // Only the first two source positions are valid.
    let mask = key_padding_mask_from_lengths(&device, &[2], 4)?;

    let decoder = module.clone().into_static_kv();
    let mut state = DecoderState::new();
    decoder.step(&query, &source, &source, None, None, &mut state)?;
    let (masked_step, weights) =
        decoder.step(&query, &source, &source, Some(&mask), None, &mut state)?;

    let (masked_full, _) = module.forward(&query, &source, &source, Some(&mask), None)?;
    allclose(&masked_step, &masked_full, 1e-5);

    // The padded columns carry no probability mass.
    let weights = weights.flatten_all()?.to_vec1::<f32>()?;
    for row in weights.chunks(4) {
        assert!(row[2].abs() < 1e-7 && row[3].abs() < 1e-7);
    }
    Ok(())
}

#[test]
fn padding_masks_accumulate_in_call_order() -> Result<()> {
    let device = Device::Cpu;
    let module = build_module(4, 2);
    let decoder = module.into_growing();
    let mut state = DecoderState::new();

    let step_masks = [vec![0u8, 1], vec![1u8, 0], vec![0u8, 0]];
    for mask_row in &step_masks {
        let x = Tensor::randn(0f32, 1.0, (1, 2, 4), &device)?;
        let mask = Tensor::from_vec(mask_row.clone(), (2, 1), &device)?;
        decoder.step(&x, &x, &x, Some(&mask), None, &mut state)?;
    }

    match &state {
        DecoderState::Growing {
            key_padding_mask: Some(mask),
            ..
        } => {
            assert_eq!(
                mask.to_vec2::<u8>()?,
                vec![vec![0, 1, 0], vec![1, 0, 0]],
            );
        }
        other => panic!("expected growing state with mask, got {other:?}"),
    }
    Ok(())
}

#[test]
fn history_grows_by_one_position_per_step() -> Result<()> {
    // The documented three-step scenario: embed_dim 4, two heads, batch 1.
    let device = Device::Cpu;
    let module = build_module(4, 2);
    let decoder = module.into_growing();
    let mut state = DecoderState::new();

    for expected_len in 1..=3usize {
        let x = Tensor::randn(0f32, 1.0, (1, 1, 4), &device)?;
        let (output, weights) = decoder.step(&x, &x, &x, None, None, &mut state)?;
        assert_eq!(output.dims(), &[1, 1, 4]);
        assert_eq!(weights.dims(), &[2, 1, expected_len]);
        assert_eq!(state.cached_len(), expected_len);
        match &state {
            DecoderState::Growing { key, value, .. } => {
                assert_eq!(key.dims(), &[1, 2, expected_len, 2]);
                assert_eq!(value.dims(), &[1, 2, expected_len, 2]);
            }
            other => panic!("expected growing state, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn multi_timestep_incremental_call_fails() {
    let device = Device::Cpu;
    let module = build_module(4, 2);
    let decoder = module.into_growing();
    let mut state = DecoderState::new();

    let query = Tensor::zeros((2, 1, 4), DType::F32, &device).unwrap();
    let err = decoder
        .step(&query, &query, &query, None, None, &mut state)
        .unwrap_err();
    assert!(matches!(err, AttentionError::UnsupportedMode { .. }));
}

#[test]
fn uneven_head_split_fails_at_construction() {
    let config = AttentionConfig::new(10, 3);
    let err = MultiheadAttention::new(config, &Device::Cpu, DType::F32).unwrap_err();
    assert!(matches!(err, AttentionError::Config { .. }));
}

#[test]
fn state_mode_mismatch_is_detected() -> Result<()> {
    let device = Device::Cpu;
    let module = build_module(4, 2);

    // Drive a growing state, then hand it to a static-source path.
    let growing = module.clone().into_growing();
    let mut state = DecoderState::new();
    let x = Tensor::randn(0f32, 1.0, (1, 1, 4), &device)?;
    growing.step(&x, &x, &x, None, None, &mut state)?;

    let cross = module.into_static_kv();
    let err = cross
        .step(&x, &x, &x, None, None, &mut state)
        .unwrap_err();
    assert!(matches!(err, AttentionError::InvalidState { .. }));
    Ok(())
}

#[test]
fn failed_step_leaves_state_untouched() -> Result<()> {
    let device = Device::Cpu;
    let module = build_module(4, 2);
    let decoder = module.into_growing();
    let mut state = DecoderState::new();

    let x = Tensor::randn(0f32, 1.0, (1, 1, 4), &device)?;
    decoder.step(&x, &x, &x, None, None, &mut state)?;
    let before = state.cached_len();

    let wrong_batch = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
    assert!(decoder
        .step(&wrong_batch, &wrong_batch, &wrong_batch, None, None, &mut state)
        .is_err());
    assert_eq!(state.cached_len(), before);
    Ok(())
}
