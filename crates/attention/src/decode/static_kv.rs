//! Incremental attention over a fixed source.
//!
//! The first step projects the full source sequence and stores the per-head
//! key/value tensors in the caller's [`DecoderState`]; every later step
//! reuses them unchanged and ignores the raw key/value arguments. The
//! key-padding mask is not cached: the source is fixed, so the caller can
//! supply the correct mask on every call.

use std::sync::OnceLock;

use candle_core::Tensor;

use crate::core::errors::{to_backend_err, AttentionError};
use crate::core::StepAttention;
use crate::multihead::MultiheadAttention;
use crate::state::DecoderState;

/// Fixed-source incremental attention (e.g. decoder-to-encoder).
#[derive(Debug)]
pub struct StaticKvAttention {
    inner: MultiheadAttention,
    first_step: OnceLock<()>,
}

impl StaticKvAttention {
    /// Wraps an attention module in the fixed-source call path.
    pub fn new(inner: MultiheadAttention) -> Self {
        Self {
            inner,
            first_step: OnceLock::new(),
        }
    }

    /// The wrapped attention module.
    pub fn inner(&self) -> &MultiheadAttention {
        &self.inner
    }

    /// Unwraps the attention module.
    pub fn into_inner(self) -> MultiheadAttention {
        self.inner
    }
}

impl StepAttention for StaticKvAttention {
    fn step(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        key_padding_mask: Option<&Tensor>,
        attn_mask: Option<&Tensor>,
        state: &mut DecoderState,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let config = self.inner.config();
        let embed_dim = config.embed_dim;
        let heads = config.num_heads;
        let head_dim = config.head_dim();

        let (tgt_len, batch, q_dim) = query.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "query must be (1, batch, embed_dim)".to_string(),
        })?;
        if tgt_len != 1 {
            return Err(AttentionError::UnsupportedMode {
                context: format!(
                    "incremental decoding processes one timestep per call, got target_len {tgt_len}"
                ),
            });
        }
        if q_dim != embed_dim {
            return Err(AttentionError::InvalidShape {
                context: format!("query embedding dim {q_dim} must equal embed_dim {embed_dim}"),
            });
        }

        if self.first_step.set(()).is_ok() {
            log::info!(
                "static-kv attention first step: embed_dim={embed_dim} num_heads={heads} batch={batch}"
            );
        }

        let q = self.inner.projected_query(query, 1, batch)?;

        let (k, v, populate) = match state {
            DecoderState::Growing { .. } => {
                return Err(AttentionError::InvalidState {
                    context: format!(
                        "static-source attention expects an empty or static state, got {}",
                        state.describe()
                    ),
                });
            }
            DecoderState::Static {
                key: cached_key,
                value: cached_value,
            } => {
                let dims = cached_key.dims();
                if dims[0] != batch {
                    return Err(AttentionError::InvalidShape {
                        context: format!(
                            "cached source batch {} does not match query batch {batch}",
                            dims[0]
                        ),
                    });
                }
                let src_len = dims[2];
                let k = cached_key
                    .reshape((batch * heads, src_len, head_dim))
                    .map_err(to_backend_err)?;
                let v = cached_value
                    .reshape((batch * heads, src_len, head_dim))
                    .map_err(to_backend_err)?;
                (k, v, false)
            }
            DecoderState::Empty => {
                let (src_len, key_batch, k_dim) =
                    key.dims3().map_err(|_| AttentionError::InvalidShape {
                        context: "key must be (source_len, batch, embed_dim)".to_string(),
                    })?;
                if value.dims() != key.dims() {
                    return Err(AttentionError::InvalidShape {
                        context: format!(
                            "value shape {:?} must match key shape {:?}",
                            value.dims(),
                            key.dims()
                        ),
                    });
                }
                if key_batch != batch || k_dim != embed_dim {
                    return Err(AttentionError::InvalidShape {
                        context: format!(
                            "key must be (source_len, {batch}, {embed_dim}), got {:?}",
                            key.dims()
                        ),
                    });
                }
                let k = self.inner.projected_key(key, src_len, batch)?;
                let v = self.inner.projected_value(value, src_len, batch)?;
                (k, v, true)
            }
        };

        let (output, weights) =
            self.inner
                .attend_merged(&q, &k, &v, key_padding_mask, attn_mask, batch, 1)?;

        if populate {
            let src_len = k.dims()[1];
            *state = DecoderState::Static {
                key: k
                    .reshape((batch, heads, src_len, head_dim))
                    .map_err(to_backend_err)?,
                value: v
                    .reshape((batch, heads, src_len, head_dim))
                    .map_err(to_backend_err)?,
            };
        }

        Ok((output, weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AttentionConfig;
    use candle_core::{DType, Device, Tensor};

    fn build() -> StaticKvAttention {
        let config = AttentionConfig::new(8, 2);
        MultiheadAttention::new(config, &Device::Cpu, DType::F32)
            .unwrap()
            .into_static_kv()
    }

    #[test]
    fn multi_timestep_queries_are_rejected() {
        let device = Device::Cpu;
        let attention = build();
        let query = Tensor::zeros((2, 1, 8), DType::F32, &device).unwrap();
        let source = Tensor::zeros((4, 1, 8), DType::F32, &device).unwrap();
        let mut state = DecoderState::new();

        let err = attention
            .step(&query, &source, &source, None, None, &mut state)
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedMode { .. }));
        assert!(state.is_empty());
    }

    #[test]
    fn growing_state_is_rejected() {
        let device = Device::Cpu;
        let attention = build();
        let query = Tensor::zeros((1, 1, 8), DType::F32, &device).unwrap();
        let source = Tensor::zeros((4, 1, 8), DType::F32, &device).unwrap();
        let cached = Tensor::zeros((1, 2, 3, 4), DType::F32, &device).unwrap();
        let mut state = DecoderState::Growing {
            key: cached.clone(),
            value: cached,
            key_padding_mask: None,
        };

        let err = attention
            .step(&query, &source, &source, None, None, &mut state)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidState { .. }));
    }

    #[test]
    fn first_step_populates_cache_with_source_shape() {
        let device = Device::Cpu;
        let attention = build();
        let query = Tensor::randn(0f32, 1.0, (1, 1, 8), &device).unwrap();
        let source = Tensor::randn(0f32, 1.0, (5, 1, 8), &device).unwrap();
        let mut state = DecoderState::new();

        let (output, weights) = attention
            .step(&query, &source, &source, None, None, &mut state)
            .unwrap();
        assert_eq!(output.dims(), &[1, 1, 8]);
        assert_eq!(weights.dims(), &[2, 1, 5]);
        assert_eq!(state.cached_len(), 5);
        match &state {
            DecoderState::Static { key, value } => {
                assert_eq!(key.dims(), &[1, 2, 5, 4]);
                assert_eq!(value.dims(), &[1, 2, 5, 4]);
            }
            other => panic!("expected static state, got {}", other.describe()),
        }
    }
}
