//! Error types emitted by the attention engine.

/// Attention-specific error category.
///
/// Every failure is fatal to the current call; after an error the caller
/// must not keep stepping with the same [`DecoderState`](crate::state::DecoderState)
/// without resetting it first.
#[derive(Debug)]
pub enum AttentionError {
    /// The requested configuration cannot be built (bad geometry or an
    /// unimplemented projection layout). Raised at construction.
    Config { context: String },
    /// The call asked for a mode the engine deliberately does not support,
    /// such as multi-timestep incremental decoding.
    UnsupportedMode { context: String },
    /// The supplied decoder state disagrees with the call path, e.g. a
    /// growing-history state handed to a static-source attention.
    InvalidState { context: String },
    /// The supplied tensor shapes or dtypes do not align with the
    /// documented contract.
    InvalidShape { context: String },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::Config { context } => {
                write!(f, "invalid attention configuration: {context}")
            }
            AttentionError::UnsupportedMode { context } => {
                write!(f, "unsupported attention mode: {context}")
            }
            AttentionError::InvalidState { context } => {
                write!(f, "invalid decoder state: {context}")
            }
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

pub(crate) fn to_backend_err(err: candle_core::Error) -> AttentionError {
    AttentionError::Backend {
        message: err.to_string(),
    }
}
