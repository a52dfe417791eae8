//! Configuration options shared by all attention call paths.
//!
//! The [`AttentionConfig`] struct captures the geometry of the module plus
//! run-time knobs such as dropout. It is plain data; validation happens when
//! an attention module is constructed from it, so a rejected configuration
//! never produces a usable module.

use crate::core::errors::AttentionError;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    /// Total embedding dimension of the model.
    pub embed_dim: usize,
    /// Number of parallel attention heads; must divide `embed_dim` evenly.
    pub num_heads: usize,
    /// Probability for dropout applied to attention weights.
    ///
    /// When `None`, dropout is disabled and the computation is
    /// deterministic; callers should disable it for evaluation. Dropout
    /// runs after the padding fill and softmax, so padded positions can
    /// retain surviving probability mass when dropout is active. Existing
    /// checkpoints may depend on that behaviour, so it is kept as-is.
    pub dropout_p: Option<f32>,
    /// Whether the input and output projections carry a bias vector.
    pub bias: bool,
    /// Key feature dimension. Only `None` (meaning `embed_dim`) or
    /// `Some(embed_dim)` is accepted; the separate-projection computation
    /// path is not implemented.
    pub kdim: Option<usize>,
    /// Value feature dimension, with the same restriction as `kdim`.
    pub vdim: Option<usize>,
    /// Learned bias rows appended to the key/value sequences. Not
    /// supported; requesting it fails at construction.
    pub add_bias_kv: bool,
    /// Zero row appended to the key/value sequences. Not supported;
    /// requesting it fails at construction.
    pub add_zero_attn: bool,
}

impl AttentionConfig {
    /// Creates a configuration with default knobs: bias enabled, dropout
    /// disabled, shared query/key/value dimensions.
    pub fn new(embed_dim: usize, num_heads: usize) -> Self {
        Self {
            embed_dim,
            num_heads,
            dropout_p: None,
            bias: true,
            kdim: None,
            vdim: None,
            add_bias_kv: false,
            add_zero_attn: false,
        }
    }

    /// Dimensionality of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    /// Query scaling factor, `head_dim^-0.5`.
    pub fn scaling(&self) -> f64 {
        1.0 / (self.head_dim() as f64).sqrt()
    }

    /// Checks the configuration against the supported feature set.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 || self.embed_dim == 0 {
            return Err(AttentionError::Config {
                context: format!(
                    "embed_dim {} and num_heads {} must be non-zero",
                    self.embed_dim, self.num_heads
                ),
            });
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(AttentionError::Config {
                context: format!(
                    "embed_dim {} must be divisible by num_heads {}",
                    self.embed_dim, self.num_heads
                ),
            });
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::Config {
                    context: format!("dropout probability must be in [0, 1), got {p}"),
                });
            }
        }
        if self.kdim.map_or(false, |k| k != self.embed_dim)
            || self.vdim.map_or(false, |v| v != self.embed_dim)
        {
            return Err(AttentionError::Config {
                context: format!(
                    "separate key/value projections (kdim={:?}, vdim={:?}) are not implemented; \
                     both must equal embed_dim {}",
                    self.kdim, self.vdim, self.embed_dim
                ),
            });
        }
        if self.add_bias_kv {
            return Err(AttentionError::Config {
                context: "add_bias_kv is not supported".to_string(),
            });
        }
        if self.add_zero_attn {
            // Can never succeed later either, so fail before the first call.
            return Err(AttentionError::UnsupportedMode {
                context: "add_zero_attn is not supported".to_string(),
            });
        }
        Ok(())
    }
}
