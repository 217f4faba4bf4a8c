//! Error types for the codec.

use thiserror::Error;

/// Errors produced while encoding or decoding entity payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
