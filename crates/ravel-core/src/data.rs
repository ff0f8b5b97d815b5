//! Decoded data items.

use ravel_image::{ByteSequence, ImageError};

/// Longest string the analyzer will consume before giving up.
const MAX_STRING_LEN: usize = 4096;

/// How far the unknown-data probe looks for a printable run.
const PROBE_LEN: usize = 64;

/// Type tag for a decoded datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DataKind {
    Byte,
    Word,
    Dword,
    Qword,
    String,
    /// Referenced but not yet classified; [`Data::analyze`] probes the
    /// bytes and settles on a concrete kind.
    Unknown,
}

/// A decoded datum at an address.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Data {
    address: u64,
    kind: DataKind,
    length: u64,
    value: Option<u64>,
    text: Option<String>,
}

impl Data {
    /// Creates an unanalyzed datum.
    pub fn new(address: u64, kind: DataKind) -> Self {
        Self {
            address,
            kind,
            length: 0,
            value: None,
            text: None,
        }
    }

    /// Picks the kind matching a memory access width in bytes.
    pub fn kind_for_access_size(size: u8) -> DataKind {
        match size {
            1 => DataKind::Byte,
            2 => DataKind::Word,
            4 => DataKind::Dword,
            8 => DataKind::Qword,
            _ => DataKind::Unknown,
        }
    }

    /// Memory address of this datum.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Type tag. For `Unknown`, the tag is refined by [`Data::analyze`].
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Encoded length in bytes (0 before analysis).
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Decoded integer value, if any.
    pub fn value(&self) -> Option<u64> {
        self.value
    }

    /// Decoded string contents, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Decodes the datum from the sequence, which must be positioned at
    /// the datum's address. Sets length and value.
    pub fn analyze(&mut self, seq: &mut ByteSequence<'_>) -> Result<(), ImageError> {
        match self.kind {
            DataKind::Byte => {
                self.value = Some(seq.read_u8()? as u64);
                self.length = 1;
            }
            DataKind::Word => {
                self.value = Some(seq.read_u16()? as u64);
                self.length = 2;
            }
            DataKind::Dword => {
                self.value = Some(seq.read_u32()? as u64);
                self.length = 4;
            }
            DataKind::Qword => {
                self.value = Some(seq.read_u64()?);
                self.length = 8;
            }
            DataKind::String => self.analyze_string(seq)?,
            DataKind::Unknown => {
                if probe_string(seq)? {
                    self.kind = DataKind::String;
                    self.analyze_string(seq)?;
                } else {
                    self.kind = DataKind::Dword;
                    self.value = Some(seq.read_u32()? as u64);
                    self.length = 4;
                }
            }
        }
        Ok(())
    }

    fn analyze_string(&mut self, seq: &mut ByteSequence<'_>) -> Result<(), ImageError> {
        let mut text = String::new();
        loop {
            let b = seq.read_u8()?;
            if b == 0 {
                break;
            }
            if text.len() >= MAX_STRING_LEN {
                return Err(ImageError::end_of_image(seq.position(), 1));
            }
            text.push(b as char);
        }
        self.length = text.len() as u64 + 1;
        self.text = Some(text);
        Ok(())
    }
}

/// Returns true if the sequence starts with a printable NUL-terminated
/// run of at least four characters. The sequence position is restored.
fn probe_string(seq: &mut ByteSequence<'_>) -> Result<bool, ImageError> {
    let mut printable = 0usize;
    let mut verdict = false;
    let mut consumed = 0i64;
    for _ in 0..PROBE_LEN {
        let b = match seq.read_u8() {
            Ok(b) => b,
            Err(_) => break,
        };
        consumed += 1;
        if b == 0 {
            verdict = printable >= 4;
            break;
        }
        if (0x20..=0x7e).contains(&b) {
            printable += 1;
        } else {
            break;
        }
    }
    seq.skip(-consumed)?;
    Ok(verdict)
}

impl std::fmt::Display for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.value, &self.text) {
            (DataKind::Byte, Some(v), _) => write!(f, "db {:#04x}", v),
            (DataKind::Word, Some(v), _) => write!(f, "dw {:#06x}", v),
            (DataKind::Dword, Some(v), _) => write!(f, "dd {:#010x}", v),
            (DataKind::Qword, Some(v), _) => write!(f, "dq {:#018x}", v),
            (DataKind::String, _, Some(s)) => write!(f, "db \"{}\", 0", s),
            _ => write!(f, "<unanalyzed>"),
        }
    }
}
