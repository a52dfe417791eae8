//! Mask utilities shared by the attention call paths.
//!
//! Two mask flavours exist. Additive attention masks are f32 tensors shaped
//! `(target_len, source_len)` whose values are either `0.0` (keep) or
//! `f32::NEG_INFINITY` (discard), added to the attention scores. Boolean
//! key-padding masks are `U8` tensors shaped `(batch, source_len)` where a
//! non-zero entry marks a padded key whose score is filled with `-inf`
//! before the softmax.

pub mod causal;
pub mod padding;

use candle_core::DType;

/// Dtype of additive attention masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Dtype of boolean key-padding masks.
pub const PADDING_MASK_DTYPE: DType = DType::U8;

pub use causal::build_causal_mask;
pub use padding::{key_padding_mask_from_booleans, key_padding_mask_from_lengths};
