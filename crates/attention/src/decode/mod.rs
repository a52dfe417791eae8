//! Construction-resolved incremental decoding paths.
//!
//! The caching regime is picked once, when a [`MultiheadAttention`] is
//! resolved into one of the two types here, instead of being re-dispatched
//! on every call:
//!
//! - [`StaticKvAttention`] attends to a source that never changes across
//!   steps (e.g. encoder output) and projects it exactly once.
//! - [`GrowingKvAttention`] attends over the decoding history, which gains
//!   one key/value position per step.
//!
//! Both implement [`StepAttention`](crate::core::StepAttention) and share
//! the scaled dot-product core of [`MultiheadAttention`].
//!
//! [`MultiheadAttention`]: crate::multihead::MultiheadAttention

pub mod growing;
pub mod static_kv;

pub use growing::GrowingKvAttention;
pub use static_kv::StaticKvAttention;
