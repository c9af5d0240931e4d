use thiserror::Error;

use crate::wire::FromWireError;

/// Errors reported by the codec and bus-model operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A parameter or configuration value is out of range
    #[error("invalid argument")]
    InvalidArg,

    /// No stream is bound to the codec
    #[error("no stream bound to codec")]
    NoStream,

    /// The stream is exhausted, no further messages are available
    #[error("no further messages")]
    NoMessage,

    /// A write would exceed a non-growable stream buffer
    #[error("write exceeds stream buffer")]
    MsgSize,

    /// A numeric configuration merge conflicted with an earlier value
    #[error("conflicting configuration merge")]
    Conflict,

    /// Decoding a PDU frame from the stream failed
    #[error("wire decode failed: {0}")]
    Wire(#[from] FromWireError),
}

impl CodecError {
    /// Numeric-stable error code for C-compatible surfaces.
    ///
    /// Always negative. Wire decode failures share the invalid-argument
    /// code.
    pub fn code(&self) -> i32 {
        match self {
            CodecError::InvalidArg => -22,
            CodecError::NoStream => -60,
            CodecError::NoMessage => -42,
            CodecError::MsgSize => -90,
            CodecError::Conflict => -52,
            CodecError::Wire(_) => -22,
        }
    }
}

/// Convenience result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
