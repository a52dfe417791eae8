//! Builders for boolean key-padding masks.
//!
//! All padding masks share the dtype and layout described in
//! [`super::PADDING_MASK_DTYPE`](super::PADDING_MASK_DTYPE): `U8`,
//! `(batch, source_len)`, non-zero marking a padded (excluded) key.

use candle_core::{Device, Result, Tensor};

/// Construct a padding mask from per-batch valid key lengths.
///
/// Positions at or beyond each batch element's valid length are marked as
/// padding.
pub fn key_padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    source_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0u8; batch * source_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(source_len);
        for k in valid..source_len {
            data[b * source_len + k] = 1;
        }
    }

    Tensor::from_vec(data, (batch, source_len), device)
}

/// Construct a padding mask from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn key_padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let source_len = padding.first().map(|row| row.len()).unwrap_or(0);
    for row in padding.iter() {
        assert_eq!(
            row.len(),
            source_len,
            "all boolean padding rows must share source_len"
        );
    }

    let batch = padding.len();
    let mut data = vec![0u8; batch * source_len];
    for (b, row) in padding.iter().enumerate() {
        for (k, &is_padding) in row.iter().enumerate() {
            if is_padding {
                data[b * source_len + k] = 1;
            }
        }
    }

    Tensor::from_vec(data, (batch, source_len), device)
}
