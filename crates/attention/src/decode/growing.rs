//! Incremental attention over the growing decoding history.
//!
//! Every step projects the single new key/value timestep, concatenates it
//! onto the cached history in the caller's [`DecoderState`], and attends
//! the new query against the extended history. The per-step key-padding
//! mask, shaped `(batch, 1)`, accumulates alongside: the cached mask always
//! covers the full history, with spans from mask-less steps filled as
//! attendable.

use std::sync::OnceLock;

use candle_core::{Device, Tensor};

use crate::core::errors::{to_backend_err, AttentionError};
use crate::core::StepAttention;
use crate::masks::PADDING_MASK_DTYPE;
use crate::multihead::MultiheadAttention;
use crate::state::DecoderState;

/// Growing-history incremental attention (decoder self-attention).
#[derive(Debug)]
pub struct GrowingKvAttention {
    inner: MultiheadAttention,
    first_step: OnceLock<()>,
}

impl GrowingKvAttention {
    /// Wraps an attention module in the growing-history call path.
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

impl StepAttention for GrowingKvAttention {
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
        let (key_len, key_batch, k_dim) =
            key.dims3().map_err(|_| AttentionError::InvalidShape {
                context: "key must be (1, batch, embed_dim)".to_string(),
            })?;
        if key_len != 1 {
            return Err(AttentionError::UnsupportedMode {
                context: format!(
                    "growing-history decoding extends by one key/value position per call, got {key_len}"
                ),
            });
        }
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
                    "key must be (1, {batch}, {embed_dim}), got {:?}",
                    key.dims()
                ),
            });
        }
        if let Some(mask) = key_padding_mask {
            if mask.dims() != &[batch, 1] {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "per-step key_padding_mask must be ({batch}, 1), got {:?}",
                        mask.dims()
                    ),
                });
            }
            if mask.dtype() != PADDING_MASK_DTYPE {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "key_padding_mask expects dtype {PADDING_MASK_DTYPE:?}, got {:?}",
                        mask.dtype()
                    ),
                });
            }
        }

        if self.first_step.set(()).is_ok() {
            log::info!(
                "growing-kv attention first step: embed_dim={embed_dim} num_heads={heads} batch={batch}"
            );
        }

        let q = self.inner.projected_query(query, 1, batch)?;
        let k_new = self.inner.projected_key(key, 1, batch)?;
        let v_new = self.inner.projected_value(value, 1, batch)?;

        let (k, v, mask, history) = match state {
            DecoderState::Static { .. } => {
                return Err(AttentionError::InvalidState {
                    context: format!(
                        "growing-history attention expects an empty or growing state, got {}",
                        state.describe()
                    ),
                });
            }
            DecoderState::Empty => {
                let mask =
                    extend_padding_mask(None, key_padding_mask, batch, 0, query.device())?;
                (k_new, v_new, mask, 0usize)
            }
            DecoderState::Growing {
                key: cached_key,
                value: cached_value,
                key_padding_mask: cached_mask,
            } => {
                let dims = cached_key.dims();
                if dims[0] != batch {
                    return Err(AttentionError::InvalidShape {
                        context: format!(
                            "cached history batch {} does not match query batch {batch}",
                            dims[0]
                        ),
                    });
                }
                let history = dims[2];
                if let Some(mask) = cached_mask {
                    if mask.dims()[1] != history {
                        return Err(AttentionError::InvalidState {
                            context: format!(
                                "cached padding mask covers {} positions but history holds {history}",
                                mask.dims()[1]
                            ),
                        });
                    }
                }
                let prev_k = cached_key
                    .reshape((batch * heads, history, head_dim))
                    .map_err(to_backend_err)?;
                let prev_v = cached_value
                    .reshape((batch * heads, history, head_dim))
                    .map_err(to_backend_err)?;
                let k = Tensor::cat(&[&prev_k, &k_new], 1).map_err(to_backend_err)?;
                let v = Tensor::cat(&[&prev_v, &v_new], 1).map_err(to_backend_err)?;
                let mask = extend_padding_mask(
                    cached_mask.as_ref(),
                    key_padding_mask,
                    batch,
                    history,
                    query.device(),
                )?;
                (k, v, mask, history)
            }
        };

        let src_len = history + 1;
        let (output, weights) =
            self.inner
                .attend_merged(&q, &k, &v, mask.as_ref(), attn_mask, batch, 1)?;

        *state = DecoderState::Growing {
            key: k
                .reshape((batch, heads, src_len, head_dim))
                .map_err(to_backend_err)?,
            value: v
                .reshape((batch, heads, src_len, head_dim))
                .map_err(to_backend_err)?,
            key_padding_mask: mask,
        };

        Ok((output, weights))
    }
}

/// Extends the cached padding mask by one position.
///
/// Steps that carry no mask contribute an attendable column; a history that
/// never saw a mask gains an attendable prefix when one first appears.
fn extend_padding_mask(
    prev: Option<&Tensor>,
    step: Option<&Tensor>,
    batch: usize,
    history: usize,
    device: &Device,
) -> Result<Option<Tensor>, AttentionError> {
    match (prev, step) {
        (None, None) => Ok(None),
        (Some(prev), Some(step)) => Tensor::cat(&[prev, step], 1)
            .map(Some)
            .map_err(to_backend_err),
        (None, Some(step)) if history > 0 => {
            let fill =
                Tensor::zeros((batch, history), PADDING_MASK_DTYPE, device).map_err(to_backend_err)?;
            Tensor::cat(&[&fill, step], 1)
                .map(Some)
                .map_err(to_backend_err)
        }
        (None, Some(step)) => Ok(Some(step.clone())),
        (Some(prev), None) => {
            let fill =
                Tensor::zeros((batch, 1), PADDING_MASK_DTYPE, device).map_err(to_backend_err)?;
            Tensor::cat(&[prev, &fill], 1)
                .map(Some)
                .map_err(to_backend_err)
        }
    }
}
