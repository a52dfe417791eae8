//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(seq, batch, in_dim)` and return
//! tensors with `(seq, batch, out_dim)`; flat `(rows, in_dim)` inputs are
//! also accepted. Multi-projection variants pack the weight as
//! `(num_projections * out_dim, in_dim)` so that a combined query/key/value
//! matrix is stored as one parameter; [`Linear::forward_shard`] applies a
//! single projection out of the pack. Initialisation policies mirror common
//! transformer recipes (Glorot uniform/normal) so downstream crates can
//! share a single implementation.

use candle_core::{bail, DType, Device, Result, Tensor};

use crate::checks;

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension per projection shard.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
    /// Number of projections fused together (1 for standard linear).
    pub fused_projections: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single projection layer.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
            fused_projections: 1,
        }
    }

    /// Total number of output features stored by the layer.
    pub fn total_output_dim(&self) -> usize {
        self.output_dim * self.fused_projections
    }
}

/// Supported weight initialisation policies for transformer projections.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight_f32)
        } else {
            weight_f32.to_dtype(dtype)
        }
    }
}

/// Dense affine projection with optional bias and fused shard support.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        if let Some(bias) = bias.as_ref() {
            checks::expect_same_dtype("linear.weight", &weight, "linear.bias", bias)?;
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with randomly initialised weights following
    /// `init`; the bias, when enabled, starts at zero.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.total_output_dim(), config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.total_output_dim(), dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration used to validate inputs.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the underlying weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Returns the bias tensor if present.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Replaces the weight storage, e.g. when loading a checkpoint.
    pub fn copy_weight_from(&mut self, value: &Tensor) -> Result<()> {
        Self::validate_weight(&self.config, value)?;
        self.weight = value.to_dtype(self.weight.dtype())?;
        Ok(())
    }

    /// Replaces the bias storage.
    pub fn copy_bias_from(&mut self, value: &Tensor) -> Result<()> {
        match &self.bias {
            Some(existing) => {
                Self::validate_bias(&self.config, Some(value))?;
                self.bias = Some(value.to_dtype(existing.dtype())?);
                Ok(())
            }
            None => bail!("linear.bias: layer has no bias to copy into"),
        }
    }

    /// Applies the full (possibly fused) projection.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.apply(input, &self.weight, self.bias.as_ref())
    }

    /// Applies a single projection shard out of a fused weight.
    ///
    /// Shard `i` covers weight rows `i * output_dim .. (i + 1) * output_dim`,
    /// so a fused query/key/value layer exposes its three sub-projections at
    /// shards 0, 1 and 2.
    pub fn forward_shard(&self, shard: usize, input: &Tensor) -> Result<Tensor> {
        if shard >= self.config.fused_projections {
            bail!(
                "linear shard {shard} out of range for {} fused projections",
                self.config.fused_projections
            );
        }
        let rows = self.config.output_dim;
        let weight = self.weight.narrow(0, shard * rows, rows)?;
        let bias = match &self.bias {
            Some(bias) => Some(bias.narrow(0, shard * rows, rows)?),
            None => None,
        };
        self.apply(input, &weight, bias.as_ref())
    }

    fn apply(&self, input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        self.validate_input(input)?;
        checks::expect_same_dtype("linear.input", input, "linear.weight", weight)?;
        checks::expect_same_device("linear.input", input, weight.device())?;

        let weight_t = weight.t()?;
        let out_dim = weight.dims()[0];
        let mut output = match input.dims() {
            [seq, batch, _] => {
                let flat = input.reshape((*seq * *batch, self.config.input_dim))?;
                flat.matmul(&weight_t)?.reshape((*seq, *batch, out_dim))?
            }
            [rows, _] => input.matmul(&weight_t)?.reshape((*rows, out_dim))?,
            _ => unreachable!("validated above"),
        };

        if let Some(bias) = bias {
            output = output.broadcast_add(bias)?;
        }
        Ok(output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.total_output_dim(), config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", weight)?;
        Ok(())
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.total_output_dim()])?;
                checks::expect_contiguous("linear.bias", tensor)?;
                Ok(())
            }
            (false, Some(_)) => bail!("linear.bias provided but config disables bias"),
            (true, None) => bail!("linear config expects bias but none supplied"),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, input: &Tensor) -> Result<()> {
        match input.dims() {
            [_, _, dim] | [_, dim] if *dim == self.config.input_dim => Ok(()),
            [_, _, dim] | [_, dim] => bail!(
                "linear.input: expected last dim {}, got {dim}",
                self.config.input_dim
            ),
            _ => bail!("linear expects input shaped (seq, batch, dim) or (rows, dim)"),
        }
    }
}
