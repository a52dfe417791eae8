//! Per-sequence decoder cache state.
//!
//! A [`DecoderState`] carries the projected key/value tensors one decoding
//! sequence has accumulated so far. The caller creates it empty before the
//! first step, threads it through every step of that sequence by exclusive
//! borrow, and drops it when the sequence ends; the engine itself never
//! creates or frees states.
//!
//! The state is a tagged variant rather than a bag of optional entries, so
//! a cache that is simultaneously static and growing is unrepresentable.

use candle_core::Tensor;

/// Cache state for one decoding sequence.
///
/// Cached keys and values are stored per head as
/// `(batch, num_heads, cached_len, head_dim)`.
#[derive(Debug, Clone)]
pub enum DecoderState {
    /// No cache yet; the first step of either call path populates it.
    Empty,
    /// Fixed-source cache: projected once from the full source, then reused
    /// unchanged by every later step.
    Static { key: Tensor, value: Tensor },
    /// Self-attention history: extended by exactly one position per step.
    /// The padding mask, when tracked, is `(batch, cached_len)` `U8` and
    /// covers the entire history.
    Growing {
        key: Tensor,
        value: Tensor,
        key_padding_mask: Option<Tensor>,
    },
}

impl DecoderState {
    /// Creates the empty pre-first-step state.
    pub fn new() -> Self {
        DecoderState::Empty
    }

    /// Whether any cache has been populated yet.
    pub fn is_empty(&self) -> bool {
        matches!(self, DecoderState::Empty)
    }

    /// Number of cached source positions (0 when empty).
    pub fn cached_len(&self) -> usize {
        match self {
            DecoderState::Empty => 0,
            DecoderState::Static { key, .. } | DecoderState::Growing { key, .. } => {
                key.dims().get(2).copied().unwrap_or(0)
            }
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            DecoderState::Empty => "empty",
            DecoderState::Static { .. } => "static",
            DecoderState::Growing { .. } => "growing",
        }
    }
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new()
    }
}
