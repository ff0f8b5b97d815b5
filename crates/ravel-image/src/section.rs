//! Section metadata.

/// Classification of a section's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Executable code.
    Code,
    /// Initialized data.
    Data,
    /// Import thunks and tables.
    Imports,
}

/// Metadata for one section of the image.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// Section name (e.g. ".text").
    pub name: String,
    /// Virtual address of the first byte.
    pub virtual_address: u64,
    /// Size in bytes.
    pub size: u64,
    /// Content classification.
    pub kind: SectionKind,
}

impl SectionInfo {
    /// Creates a new section record.
    pub fn new(name: impl Into<String>, virtual_address: u64, size: u64, kind: SectionKind) -> Self {
        Self {
            name: name.into(),
            virtual_address,
            size,
            kind,
        }
    }

    /// Returns true if the address lies inside this section.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.virtual_address && addr < self.virtual_address + self.size
    }

    /// Returns true if this section holds executable code.
    pub fn is_code(&self) -> bool {
        matches!(self.kind, SectionKind::Code)
    }
}
