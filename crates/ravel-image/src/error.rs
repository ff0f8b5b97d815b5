//! Image access error types.

use thiserror::Error;

/// Error type for image and byte-sequence access.
#[derive(Error, Debug)]
pub enum ImageError {
    /// A read or seek moved past the end of the image.
    #[error("end of image at offset {offset:#x}: need {needed} more byte(s)")]
    EndOfImage { offset: u64, needed: usize },

    /// A seek moved before the start of the image.
    #[error("seek before start of image: offset {offset:#x}, rewind {rewind}")]
    SeekBeforeStart { offset: u64, rewind: i64 },

    /// An address does not map into the image.
    #[error("address {addr:#x} does not map into the image")]
    InvalidAddress { addr: u64 },
}

impl ImageError {
    /// Creates a new EndOfImage error.
    pub fn end_of_image(offset: u64, needed: usize) -> Self {
        Self::EndOfImage { offset, needed }
    }

    /// Creates a new InvalidAddress error.
    pub fn invalid_address(addr: u64) -> Self {
        Self::InvalidAddress { addr }
    }
}
