//! Multi-head attention with a combined input projection.
//!
//! [`MultiheadAttention`] owns the projection weights and implements the
//! full-sequence forward pass over time-major tensors: queries are
//! `(target_len, batch, embed_dim)`, keys and values
//! `(source_len, batch, embed_dim)`. It also hosts the scaled dot-product
//! core that the incremental call paths in [`decode`](crate::decode) share,
//! so stepping a sequence one position at a time reproduces the
//! full-sequence numbers exactly.

use candle_core::{DType, Device, Tensor};
use candle_nn::ops::{dropout, softmax_last_dim};
use layers::linear::Linear;

use crate::core::config::AttentionConfig;
use crate::core::errors::{to_backend_err, AttentionError};
use crate::decode::{GrowingKvAttention, StaticKvAttention};
use crate::masks::{MASK_DTYPE, PADDING_MASK_DTYPE};
use crate::projection::{build_out_proj, QkvProjection};

const SUPPORTED_DTYPES: [DType; 3] = [DType::F32, DType::F16, DType::BF16];

/// Multi-head attention over a shared embedding dimension.
#[derive(Debug, Clone)]
pub struct MultiheadAttention {
    config: AttentionConfig,
    qkv: QkvProjection,
    out_proj: Linear,
}

impl MultiheadAttention {
    /// Validates `config` and builds the module with freshly initialised
    /// projections on `device`.
    pub fn new(
        config: AttentionConfig,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        if !SUPPORTED_DTYPES.contains(&dtype) {
            return Err(AttentionError::Config {
                context: format!("unsupported parameter dtype {dtype:?}"),
            });
        }
        log::info!(
            "multihead attention init: embed_dim={} num_heads={} head_dim={} dropout={:?} bias={} dtype={:?}",
            config.embed_dim,
            config.num_heads,
            config.head_dim(),
            config.dropout_p,
            config.bias,
            dtype
        );
        let qkv = QkvProjection::with_init(&config, device, dtype)?;
        let out_proj = build_out_proj(&config, device, dtype)?;
        Ok(Self {
            config,
            qkv,
            out_proj,
        })
    }

    /// The validated configuration this module was built from.
    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// The combined input projection, e.g. for checkpoint loading.
    pub fn qkv(&self) -> &QkvProjection {
        &self.qkv
    }

    /// Mutable access to the combined input projection.
    pub fn qkv_mut(&mut self) -> &mut QkvProjection {
        &mut self.qkv
    }

    /// The output projection.
    pub fn out_proj(&self) -> &Linear {
        &self.out_proj
    }

    /// Mutable access to the output projection.
    pub fn out_proj_mut(&mut self) -> &mut Linear {
        &mut self.out_proj
    }

    /// Resolves this module into the fixed-source incremental call path.
    pub fn into_static_kv(self) -> StaticKvAttention {
        StaticKvAttention::new(self)
    }

    /// Resolves this module into the growing-history incremental call path.
    pub fn into_growing(self) -> GrowingKvAttention {
        GrowingKvAttention::new(self)
    }

    /// Full-sequence attention.
    ///
    /// * `query`: `(target_len, batch, embed_dim)`.
    /// * `key`, `value`: `(source_len, batch, embed_dim)`, same shape.
    /// * `key_padding_mask`: optional `(batch, source_len)` `U8`; non-zero
    ///   entries are filled with `-inf` before the softmax.
    /// * `attn_mask`: optional `(target_len, source_len)` f32, added to the
    ///   attention scores.
    ///
    /// Returns the output `(target_len, batch, embed_dim)` and the
    /// head-averaged attention weights `(batch, target_len, source_len)`.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        key_padding_mask: Option<&Tensor>,
        attn_mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let (tgt_len, src_len, batch) = self.validate_inputs(query, key, value)?;

        let q = self.projected_query(query, tgt_len, batch)?;
        let k = self.projected_key(key, src_len, batch)?;
        let v = self.projected_value(value, src_len, batch)?;

        let (output, weights) = self.attend_merged(&q, &k, &v, key_padding_mask, attn_mask, batch, tgt_len)?;

        let heads = self.config.num_heads;
        let averaged = weights
            .reshape((batch, heads, tgt_len, src_len))
            .and_then(|w| w.mean(1))
            .map_err(to_backend_err)?;
        Ok((output, averaged))
    }

    /// Projects and pre-scales the query, merged to
    /// `(batch * num_heads, target_len, head_dim)`.
    pub(crate) fn projected_query(
        &self,
        query: &Tensor,
        tgt_len: usize,
        batch: usize,
    ) -> Result<Tensor, AttentionError> {
        let q = self.qkv.query(query)?;
        let q = (q * self.config.scaling()).map_err(to_backend_err)?;
        self.merge_heads(&q, tgt_len, batch)
    }

    /// Projects the key, merged to `(batch * num_heads, source_len, head_dim)`.
    pub(crate) fn projected_key(
        &self,
        key: &Tensor,
        src_len: usize,
        batch: usize,
    ) -> Result<Tensor, AttentionError> {
        let k = self.qkv.key(key)?;
        self.merge_heads(&k, src_len, batch)
    }

    /// Projects the value, merged to `(batch * num_heads, source_len, head_dim)`.
    pub(crate) fn projected_value(
        &self,
        value: &Tensor,
        src_len: usize,
        batch: usize,
    ) -> Result<Tensor, AttentionError> {
        let v = self.qkv.value(value)?;
        self.merge_heads(&v, src_len, batch)
    }

    /// `(seq, batch, embed_dim)` to `(batch * num_heads, seq, head_dim)`.
    pub(crate) fn merge_heads(
        &self,
        tensor: &Tensor,
        seq: usize,
        batch: usize,
    ) -> Result<Tensor, AttentionError> {
        tensor
            .reshape((seq, batch * self.config.num_heads, self.config.head_dim()))
            .and_then(|t| t.transpose(0, 1))
            .and_then(|t| t.contiguous())
            .map_err(to_backend_err)
    }

    /// Scaled dot-product core over head-merged tensors.
    ///
    /// `query` must already be scaled by `head_dim^-0.5`. Returns the output
    /// `(target_len, batch, embed_dim)` and the per-head softmax weights
    /// `(batch * num_heads, target_len, source_len)` before dropout.
    pub(crate) fn attend_merged(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        key_padding_mask: Option<&Tensor>,
        attn_mask: Option<&Tensor>,
        batch: usize,
        tgt_len: usize,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let heads = self.config.num_heads;
        let head_dim = self.config.head_dim();
        let src_len = key.dims()[1];

        let mut scores = query
            .matmul(&key.transpose(1, 2).map_err(to_backend_err)?)
            .map_err(to_backend_err)?;

        if let Some(mask) = attn_mask {
            if mask.dims() != &[tgt_len, src_len] {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "attn_mask must be ({tgt_len}, {src_len}), got {:?}",
                        mask.dims()
                    ),
                });
            }
            if mask.dtype() != MASK_DTYPE {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "attn_mask expects dtype {MASK_DTYPE:?}, got {:?}",
                        mask.dtype()
                    ),
                });
            }
            let mask = mask
                .to_dtype(scores.dtype())
                .and_then(|m| m.reshape((1, tgt_len, src_len)))
                .map_err(to_backend_err)?;
            scores = scores.broadcast_add(&mask).map_err(to_backend_err)?;
        }

        if let Some(mask) = key_padding_mask {
            if mask.dims() != &[batch, src_len] {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "key_padding_mask must be ({batch}, {src_len}), got {:?}",
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
            let shape = (batch, heads, tgt_len, src_len);
            let scores4 = scores.reshape(shape).map_err(to_backend_err)?;
            let fill = mask
                .reshape((batch, 1, 1, src_len))
                .and_then(|m| m.broadcast_as(shape))
                .map_err(to_backend_err)?;
            let neg_inf = Tensor::full(f32::NEG_INFINITY, shape, query.device())
                .and_then(|t| t.to_dtype(scores4.dtype()))
                .map_err(to_backend_err)?;
            scores = fill
                .where_cond(&neg_inf, &scores4)
                .and_then(|s| s.reshape((batch * heads, tgt_len, src_len)))
                .map_err(to_backend_err)?;
        }

        let probs = softmax_last_dim(&scores).map_err(to_backend_err)?;
        let attended = match self.config.dropout_p {
            Some(p) if p > 0.0 => dropout(&probs, p).map_err(to_backend_err)?,
            _ => probs.clone(),
        };

        let context = attended
            .matmul(value)
            .and_then(|c| c.transpose(0, 1))
            .and_then(|c| c.contiguous())
            .and_then(|c| c.reshape((tgt_len, batch, heads * head_dim)))
            .map_err(to_backend_err)?;
        let output = self.out_proj.forward(&context).map_err(to_backend_err)?;
        Ok((output, probs))
    }

    fn validate_inputs(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<(usize, usize, usize), AttentionError> {
        let embed_dim = self.config.embed_dim;
        let (tgt_len, batch, q_dim) = query.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "query must be (target_len, batch, embed_dim)".to_string(),
        })?;
        let (src_len, key_batch, k_dim) = key.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "key must be (source_len, batch, embed_dim)".to_string(),
        })?;
        if q_dim != embed_dim || k_dim != embed_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "query/key embedding dims ({q_dim}, {k_dim}) must equal embed_dim {embed_dim}"
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
        if key_batch != batch {
            return Err(AttentionError::InvalidShape {
                context: format!("key batch {key_batch} must match query batch {batch}"),
            });
        }
        let device = query.device();
        if !device.same_device(key.device()) || !device.same_device(value.device()) {
            return Err(AttentionError::InvalidShape {
                context: "query, key and value must reside on the same device".to_string(),
            });
        }
        let dtype = query.dtype();
        if dtype != key.dtype() || dtype != value.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "query, key and value must share a dtype".to_string(),
            });
        }
        if !SUPPORTED_DTYPES.contains(&dtype) {
            return Err(AttentionError::InvalidShape {
                context: format!("unsupported dtype {dtype:?}"),
            });
        }
        Ok((tgt_len, src_len, batch))
    }
}
