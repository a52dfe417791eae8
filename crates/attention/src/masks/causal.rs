//! Builder for causal attention masks.
//!
//! The resulting tensor has dtype [`MASK_DTYPE`](super::MASK_DTYPE) and
//! shape `(target_len, source_len)`. Entries are `0.0` where attention is
//! permitted and `f32::NEG_INFINITY` otherwise.

use candle_core::{Device, Result, Tensor};

/// Construct a causal mask for the supplied sequence dimensions.
///
/// When `source_len > target_len`, queries are assumed to align with the
/// most recent `target_len` keys, so the extra prefix stays visible. That
/// is the alignment incremental decoding produces when a single new query
/// attends over the accumulated history.
pub fn build_causal_mask(device: &Device, target_len: usize, source_len: usize) -> Result<Tensor> {
    let mut data = vec![0f32; target_len * source_len];
    let offset = source_len.saturating_sub(target_len);

    for q in 0..target_len {
        let row_start = q * source_len;
        let max_k = q + offset;
        for k in 0..source_len {
            if k > max_k {
                data[row_start + k] = f32::NEG_INFINITY;
            }
        }
    }

    Tensor::from_vec(data, (target_len, source_len), device)
}
