//! Flat in-memory image.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::{ByteSequence, Image, ImageError, SectionInfo};

/// A flat in-memory image mapped at a fixed base address.
///
/// File offset 0 corresponds to the base virtual address and the bytes
/// are contiguous from there, so offset/address translation is a single
/// addition. Sections are optional; an image without section metadata
/// treats every mapped byte as code. Byte patches take the write side
/// of the lock that [`ByteSequence`] readers hold, which is what makes
/// sequence acquisition atomic against script patches.
pub struct RawImage {
    base: u64,
    entry: u64,
    bytes: RwLock<Vec<u8>>,
    len: u64,
    sections: Vec<SectionInfo>,
    imports: BTreeMap<u64, String>,
}

impl RawImage {
    /// Creates an image from raw bytes mapped at `base`. The entry
    /// point defaults to the base address.
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            base,
            entry: base,
            bytes: RwLock::new(bytes),
            len,
            sections: Vec::new(),
            imports: BTreeMap::new(),
        }
    }

    /// Sets the entry point address.
    pub fn with_entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    /// Adds a section record.
    pub fn with_section(mut self, section: SectionInfo) -> Self {
        self.sections.push(section);
        self
    }

    /// Declares an import slot at `addr` resolving to `name`.
    pub fn with_import(mut self, addr: u64, name: impl Into<String>) -> Self {
        self.imports.insert(addr, name.into());
        self
    }

    /// Patches one byte at a virtual address. Blocks while any
    /// [`ByteSequence`] is alive, so a decode in progress always sees a
    /// consistent snapshot.
    pub fn patch_byte(&self, addr: u64, value: u8) -> Result<(), ImageError> {
        let offset = self
            .to_file_offset(addr)
            .ok_or_else(|| ImageError::invalid_address(addr))?;
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        bytes[offset as usize] = value;
        Ok(())
    }

    /// Reads one byte at a virtual address.
    pub fn read_byte(&self, addr: u64) -> Option<u8> {
        let offset = self.to_file_offset(addr)?;
        let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        bytes.get(offset as usize).copied()
    }

    /// Base virtual address of the image.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl Image for RawImage {
    fn byte_sequence(&self, addr: u64) -> Result<ByteSequence<'_>, ImageError> {
        let offset = self
            .to_file_offset(addr)
            .ok_or_else(|| ImageError::invalid_address(addr))?;
        let guard = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ByteSequence::locked(guard, offset))
    }

    fn code_entry_point_mem(&self) -> u64 {
        self.entry
    }

    fn is_valid_address(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.len
    }

    fn is_code_address(&self, addr: u64) -> bool {
        if !self.is_valid_address(addr) {
            return false;
        }
        if self.sections.is_empty() {
            return true;
        }
        self.sections
            .iter()
            .any(|s| s.contains(addr) && s.is_code())
    }

    fn to_mem_address(&self, file_offset: u64) -> u64 {
        self.base + file_offset
    }

    fn to_file_offset(&self, addr: u64) -> Option<u64> {
        if self.is_valid_address(addr) {
            Some(addr - self.base)
        } else {
            None
        }
    }

    fn imports(&self) -> &BTreeMap<u64, String> {
        &self.imports
    }

    fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SectionKind;

    fn image() -> RawImage {
        RawImage::new(0x1000, vec![0x90, 0xc3, 0xaa, 0xbb])
            .with_section(SectionInfo::new(".text", 0x1000, 2, SectionKind::Code))
            .with_section(SectionInfo::new(".data", 0x1002, 2, SectionKind::Data))
    }

    #[test]
    fn test_address_translation() {
        let img = image();
        assert_eq!(img.to_mem_address(1), 0x1001);
        assert_eq!(img.to_file_offset(0x1003), Some(3));
        assert_eq!(img.to_file_offset(0x2000), None);
    }

    #[test]
    fn test_validity_and_code_sections() {
        let img = image();
        assert!(img.is_valid_address(0x1000));
        assert!(img.is_valid_address(0x1003));
        assert!(!img.is_valid_address(0x0fff));
        assert!(!img.is_valid_address(0x1004));
        assert!(img.is_code_address(0x1001));
        assert!(!img.is_code_address(0x1002));
    }

    #[test]
    fn test_sequence_positioned_at_address() {
        let img = image();
        let mut seq = img.byte_sequence(0x1001).unwrap();
        assert_eq!(seq.read_u8().unwrap(), 0xc3);
    }

    #[test]
    fn test_patch_byte() {
        let img = image();
        img.patch_byte(0x1000, 0xcc).unwrap();
        assert_eq!(img.read_byte(0x1000), Some(0xcc));
        assert!(img.patch_byte(0x2000, 0x00).is_err());
    }
}
