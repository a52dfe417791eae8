//! Input and output projections owned by the attention module.
//!
//! The input projection packs query, key and value into one combined weight
//! of shape `(3 * embed_dim, embed_dim)` with rows ordered
//! query-then-key-then-value; checkpoint loaders must respect that layout,
//! and it is the only serialization contract the engine exposes. Weights
//! start Xavier-uniform with zero biases.

use candle_core::{DType, Device, Tensor};
use layers::linear::{Linear, LinearConfig, LinearInit};

use crate::core::config::AttentionConfig;
use crate::core::errors::{to_backend_err, AttentionError};

const QUERY_SHARD: usize = 0;
const KEY_SHARD: usize = 1;
const VALUE_SHARD: usize = 2;

/// Combined query/key/value input projection.
#[derive(Debug, Clone)]
pub struct QkvProjection {
    inner: Linear,
}

impl QkvProjection {
    /// Builds a freshly initialised combined projection for `config`.
    pub fn with_init(
        config: &AttentionConfig,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let mut linear_config = LinearConfig::new(config.embed_dim, config.embed_dim);
        linear_config.bias = config.bias;
        linear_config.fused_projections = 3;
        let inner = Linear::with_init(linear_config, &LinearInit::XavierUniform, device, dtype)
            .map_err(to_backend_err)?;
        Ok(Self { inner })
    }

    /// Applies the query third of the combined weight.
    pub fn query(&self, input: &Tensor) -> Result<Tensor, AttentionError> {
        self.inner
            .forward_shard(QUERY_SHARD, input)
            .map_err(to_backend_err)
    }

    /// Applies the key third of the combined weight.
    pub fn key(&self, input: &Tensor) -> Result<Tensor, AttentionError> {
        self.inner
            .forward_shard(KEY_SHARD, input)
            .map_err(to_backend_err)
    }

    /// Applies the value third of the combined weight.
    pub fn value(&self, input: &Tensor) -> Result<Tensor, AttentionError> {
        self.inner
            .forward_shard(VALUE_SHARD, input)
            .map_err(to_backend_err)
    }

    /// The combined `(3 * embed_dim, embed_dim)` weight.
    pub fn weight(&self) -> &Tensor {
        self.inner.weight()
    }

    /// The combined `(3 * embed_dim)` bias, when bias is enabled.
    pub fn bias(&self) -> Option<&Tensor> {
        self.inner.bias()
    }

    /// Loads a combined weight (and bias, when enabled) from a checkpoint.
    pub fn load(&mut self, weight: &Tensor, bias: Option<&Tensor>) -> Result<(), AttentionError> {
        self.inner.copy_weight_from(weight).map_err(to_backend_err)?;
        if let Some(bias) = bias {
            self.inner.copy_bias_from(bias).map_err(to_backend_err)?;
        }
        Ok(())
    }
}

/// Builds the output projection, `(embed_dim, embed_dim)`.
pub(crate) fn build_out_proj(
    config: &AttentionConfig,
    device: &Device,
    dtype: DType,
) -> Result<Linear, AttentionError> {
    let mut linear_config = LinearConfig::new(config.embed_dim, config.embed_dim);
    linear_config.bias = config.bias;
    Linear::with_init(linear_config, &LinearInit::XavierUniform, device, dtype)
        .map_err(to_backend_err)
}
