//! Incremental multi-head attention for autoregressive decoding.
//!
//! The crate implements multi-head attention over time-major tensors —
//! queries `(target_len, batch, embed_dim)`, keys/values
//! `(source_len, batch, embed_dim)` — with an incremental decoding mode
//! that caches projected keys and values across successive single-step
//! calls. Two caching regimes exist, resolved at construction: a static
//! cache for a source that never changes across steps (encoder output) and
//! a growing cache for self-attention over the decoding history. Stepping a
//! sequence one position at a time reproduces the full-sequence
//! [`MultiheadAttention::forward`] numbers exactly, given identical weights
//! and a causal mask.
//!
//! Dropout is an optional, train-only concern controlled via the public
//! configuration. Callers should disable it for evaluation or when
//! deterministic outputs are required.

pub mod core;
pub mod decode;
pub mod masks;
pub mod multihead;
pub mod projection;
pub mod state;

pub use crate::core::{AttentionConfig, AttentionError, StepAttention};
pub use crate::decode::{GrowingKvAttention, StaticKvAttention};
pub use crate::multihead::MultiheadAttention;
pub use crate::state::DecoderState;
