//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be
//! wired into constructors or forward paths. They return
//! `candle_core::Result<()>` so call sites can propagate errors without
//! panicking. The `name` argument identifies the tensor in error messages,
//! e.g. `"linear.weight"`.

use candle_core::{DType, Device, Error, Result, Tensor};

/// Ensures a tensor has the expected rank.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Ensures two tensors share a dtype.
pub fn expect_same_dtype(
    left_name: &str,
    left: &Tensor,
    right_name: &str,
    right: &Tensor,
) -> Result<()> {
    if left.dtype() == right.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{left_name} has dtype {:?} but {right_name} has dtype {:?}",
            left.dtype(),
            right.dtype()
        )))
    }
}

/// Ensures a tensor lives on the expected device.
pub fn expect_same_device(name: &str, tensor: &Tensor, device: &Device) -> Result<()> {
    if tensor.device().same_device(device) {
        Ok(())
    } else {
        Err(Error::Msg(format!("{name}: tensor is on a different device")))
    }
}

/// Ensures a tensor is contiguous in memory.
pub fn expect_contiguous(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{name}: tensor must be contiguous")))
    }
}
