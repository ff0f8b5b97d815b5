//! Per-instruction decoder state.

use crate::{PrefixEffect, Segment};

/// Mutable per-decode state: where the instruction starts, which
/// prefix bytes have been consumed, and what they did to the operand
/// and address sizes.
///
/// The context is reset before each top-level decode; the decoded
/// prefix trail additionally tracks the trie descent path so the
/// decoder can unwind it byte by byte on a miss.
#[derive(Debug, Default)]
pub struct Context {
    instruction_pointer: u64,
    file_offset: u64,
    decoded_prefixes: Vec<u8>,
    operand_size_override: bool,
    address_size_override: bool,
    segment_override: Option<Segment>,
    lock: bool,
    rep: bool,
    repne: bool,
}

impl Context {
    /// Creates a context for 32-bit protected-mode decoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the virtual address of the instruction being decoded.
    pub fn set_instruction_pointer(&mut self, addr: u64) {
        self.instruction_pointer = addr;
    }

    /// Virtual address of the instruction being decoded.
    pub fn virtual_address(&self) -> u64 {
        self.instruction_pointer
    }

    /// Records where the instruction starts in the file.
    pub fn set_file_offset(&mut self, offset: u64) {
        self.file_offset = offset;
    }

    /// File offset of the instruction start.
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Merges a prefix-only syntax's effect into the context.
    pub fn apply_prefix(&mut self, effect: PrefixEffect) {
        match effect {
            PrefixEffect::Lock => self.lock = true,
            PrefixEffect::Rep => self.rep = true,
            PrefixEffect::RepNe => self.repne = true,
            PrefixEffect::OperandSize => self.operand_size_override = true,
            PrefixEffect::AddressSize => self.address_size_override = true,
            PrefixEffect::Segment(seg) => self.segment_override = Some(seg),
        }
    }

    /// Pushes a byte onto the descent trail.
    pub fn add_decoded_prefix(&mut self, byte: u8) {
        self.decoded_prefixes.push(byte);
    }

    /// Pops the most recent byte off the descent trail.
    pub fn remove_decoded_prefix_top(&mut self) {
        self.decoded_prefixes.pop();
    }

    /// The bytes matched so far, prefixes included.
    pub fn decoded_prefixes(&self) -> &[u8] {
        &self.decoded_prefixes
    }

    /// The most recently matched byte.
    pub fn last_decoded(&self) -> Option<u8> {
        self.decoded_prefixes.last().copied()
    }

    /// Clears all per-instruction state for the next top-level decode.
    pub fn reset(&mut self) {
        self.decoded_prefixes.clear();
        self.operand_size_override = false;
        self.address_size_override = false;
        self.segment_override = None;
        self.lock = false;
        self.rep = false;
        self.repne = false;
    }

    /// Effective operand size in bits.
    pub fn operand_size(&self) -> u16 {
        if self.operand_size_override {
            16
        } else {
            32
        }
    }

    /// Effective address size in bits.
    pub fn address_size(&self) -> u16 {
        if self.address_size_override {
            16
        } else {
            32
        }
    }

    /// Segment override, if any.
    pub fn segment_override(&self) -> Option<Segment> {
        self.segment_override
    }

    /// LOCK prefix seen.
    pub fn lock(&self) -> bool {
        self.lock
    }

    /// REP prefix seen.
    pub fn rep(&self) -> bool {
        self.rep
    }

    /// REPNE prefix seen.
    pub fn repne(&self) -> bool {
        self.repne
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_application() {
        let mut ctx = Context::new();
        assert_eq!(ctx.operand_size(), 32);
        ctx.apply_prefix(PrefixEffect::OperandSize);
        ctx.apply_prefix(PrefixEffect::Lock);
        ctx.apply_prefix(PrefixEffect::Segment(Segment::Fs));
        assert_eq!(ctx.operand_size(), 16);
        assert!(ctx.lock());
        assert_eq!(ctx.segment_override(), Some(Segment::Fs));

        ctx.reset();
        assert_eq!(ctx.operand_size(), 32);
        assert!(!ctx.lock());
        assert_eq!(ctx.segment_override(), None);
    }

    #[test]
    fn test_descent_trail() {
        let mut ctx = Context::new();
        ctx.add_decoded_prefix(0x66);
        ctx.add_decoded_prefix(0x0f);
        assert_eq!(ctx.decoded_prefixes(), &[0x66, 0x0f]);
        ctx.remove_decoded_prefix_top();
        assert_eq!(ctx.last_decoded(), Some(0x66));
    }
}
