//! Decoder error types.

use ravel_image::ImageError;
use thiserror::Error;

/// Error type for instruction decoding.
///
/// A byte stream that simply matches no opcode is not an error; the
/// decoder reports that as a miss (`Ok(None)`). These variants cover
/// streams that selected an opcode and then failed operand decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The image ended in the middle of an operand.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The encoding selects a feature the decoder does not implement.
    #[error("unsupported encoding at {address:#x}: {reason}")]
    Unsupported { address: u64, reason: &'static str },

    /// The encoding is malformed.
    #[error("invalid encoding at {address:#x}: {reason}")]
    InvalidEncoding { address: u64, reason: String },
}

impl DecodeError {
    /// Creates a new Unsupported error.
    pub fn unsupported(address: u64, reason: &'static str) -> Self {
        Self::Unsupported { address, reason }
    }

    /// Creates a new InvalidEncoding error.
    pub fn invalid_encoding(address: u64, reason: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            address,
            reason: reason.into(),
        }
    }
}
