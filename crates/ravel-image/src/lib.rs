//! # ravel-image
//!
//! Executable image abstraction for the ravel disassembler. This crate
//! defines the position-tracked byte cursor used by the decoder, the
//! `Image` trait consumed by the analysis engine, and a flat in-memory
//! image implementation for tests and the CLI driver.

pub mod error;
pub mod raw;
pub mod section;
pub mod sequence;

pub use error::ImageError;
pub use raw::RawImage;
pub use section::{SectionInfo, SectionKind};
pub use sequence::ByteSequence;

use std::collections::BTreeMap;

/// A loaded executable image.
///
/// Implementations expose the raw bytes of the image through scoped
/// [`ByteSequence`] cursors and translate between file offsets and
/// virtual addresses. Acquiring a sequence locks the image bytes for
/// reading so that script-driven patches cannot tear a decode in
/// progress; the lock is released when the sequence is dropped.
pub trait Image: Send + Sync {
    /// Acquires a cursor positioned at the given virtual address.
    fn byte_sequence(&self, addr: u64) -> Result<ByteSequence<'_>, ImageError>;

    /// Returns the virtual address of the code entry point.
    fn code_entry_point_mem(&self) -> u64;

    /// Returns true if the address maps into the image.
    fn is_valid_address(&self, addr: u64) -> bool;

    /// Returns true if the address lies in a code section.
    fn is_code_address(&self, addr: u64) -> bool;

    /// Translates a file offset to its virtual address.
    fn to_mem_address(&self, file_offset: u64) -> u64;

    /// Translates a virtual address to its file offset.
    fn to_file_offset(&self, addr: u64) -> Option<u64>;

    /// Returns the import table: virtual address of each import slot
    /// mapped to the imported symbol name.
    fn imports(&self) -> &BTreeMap<u64, String>;

    /// Returns the image's section table.
    fn sections(&self) -> &[SectionInfo];
}
