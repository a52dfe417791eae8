//! Dense projection primitives for the attention workspace.
//!
//! The crate provides a [`Linear`](linear::Linear) layer with optional bias
//! and fused multi-way projections: a combined query/key/value weight is a
//! single `Linear` with three fused projections, and callers can apply one
//! projection shard at a time. Inputs are time-major `(seq, batch, dim)` or
//! flat `(rows, dim)`.
//!
//! Validation helpers live in [`checks`]; they return `candle_core::Result`
//! so call sites can propagate errors instead of panicking.

pub mod checks;
pub mod linear;

pub use linear::{Linear, LinearConfig, LinearInit};
