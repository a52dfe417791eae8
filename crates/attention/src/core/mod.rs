//! Core traits and types shared across the attention engine.
//!
//! Inputs are time-major: queries are `(target_len, batch, embed_dim)` and
//! keys/values `(source_len, batch, embed_dim)`. Additive attention masks
//! are `(target_len, source_len)` f32 tensors; boolean key-padding masks
//! are `(batch, source_len)` `U8` tensors where a non-zero entry marks a
//! padded key to exclude from attention.

pub mod config;
pub mod errors;

use candle_core::Tensor;

use crate::state::DecoderState;

pub use config::AttentionConfig;
pub use errors::AttentionError;

/// Unified interface for single-step incremental decoding.
///
/// * `query` must cover exactly one timestep, `(1, batch, embed_dim)`;
///   multi-timestep incremental calls are rejected.
/// * `key`/`value` are interpreted per call path: the full fixed source for
///   static-source attention (only read until the cache is populated), or
///   the single new timestep for growing-history attention.
/// * `attn_mask`, when present, applies additively to the one new query row
///   against the full resolved key length.
/// * `state` is the caller-owned per-sequence cache, mutated in place; one
///   state must never be shared across concurrently decoded sequences.
///
/// Returns the attention output `(1, batch, embed_dim)` and the per-head
/// attention weights `(batch * num_heads, 1, resolved_len)` before
/// head-averaging.
pub trait StepAttention {
    /// Compute one incremental decoding step.
    fn step(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        key_padding_mask: Option<&Tensor>,
        attn_mask: Option<&Tensor>,
        state: &mut DecoderState,
    ) -> Result<(Tensor, Tensor), AttentionError>;
}
