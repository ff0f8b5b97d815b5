//! Opcode syntax records.
//!
//! An [`OpcodeSyntax`] describes one encodable instruction form: the
//! literal opcode bytes that select it, an optional ModR/M reg-field
//! extension, and the operand descriptors the decoder consumes further
//! bytes for. The records are built once and shared read-only behind
//! `Arc` for the life of the disassembler.

use ravel_core::Operation;

/// Segment override selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl Segment {
    /// Returns the segment register encoding number.
    pub fn number(self) -> u8 {
        match self {
            Segment::Es => ravel_core::register::seg::ES,
            Segment::Cs => ravel_core::register::seg::CS,
            Segment::Ss => ravel_core::register::seg::SS,
            Segment::Ds => ravel_core::register::seg::DS,
            Segment::Fs => ravel_core::register::seg::FS,
            Segment::Gs => ravel_core::register::seg::GS,
        }
    }
}

/// Effect of a prefix-only syntax on the decode context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixEffect {
    /// LOCK (0xF0).
    Lock,
    /// REP/REPE (0xF3).
    Rep,
    /// REPNE (0xF2).
    RepNe,
    /// Operand-size override (0x66).
    OperandSize,
    /// Address-size override (0x67).
    AddressSize,
    /// Segment override (0x26/0x2E/0x36/0x3E/0x64/0x65).
    Segment(Segment),
}

/// Operand descriptor. Descriptors are consumed left to right; all
/// ModR/M-derived descriptors share the single ModR/M byte (and SIB /
/// displacement) that follows the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// ModR/M r/m, operand-sized.
    Rm,
    /// ModR/M r/m, byte-sized.
    Rm8,
    /// ModR/M r/m, word-sized regardless of operand size.
    Rm16,
    /// ModR/M reg field, operand-sized.
    Reg,
    /// ModR/M reg field, byte-sized.
    Reg8,
    /// ModR/M reg field as an MMX register.
    MmxReg,
    /// ModR/M r/m as an MMX register or 64-bit memory.
    MmxRm,
    /// ModR/M reg field as an XMM register.
    XmmReg,
    /// ModR/M r/m as an XMM register or 128-bit memory.
    XmmRm,
    /// Register in the low 3 bits of the last opcode byte, operand-sized.
    OpcodeReg,
    /// Register in the low 3 bits of the last opcode byte, byte-sized.
    OpcodeReg8,
    /// Implicit AL.
    Al,
    /// Implicit AX/EAX, operand-sized.
    EAx,
    /// Implicit CL (shift counts).
    Cl,
    /// 8-bit immediate, zero-extended.
    Imm8,
    /// 8-bit immediate, sign-extended to the operand size.
    Imm8Signed,
    /// 16-bit immediate.
    Imm16,
    /// Operand-sized immediate (16 or 32 bits).
    ImmV,
    /// 8-bit relative branch offset.
    Rel8,
    /// Operand-sized relative branch offset.
    RelV,
    /// Direct memory offset, byte access.
    Moffs8,
    /// Direct memory offset, operand-sized access.
    MoffsV,
    /// The constant 1 (shift-by-one forms).
    Const1,
}

impl OperandKind {
    /// Returns true if decoding this operand requires the ModR/M byte.
    pub fn uses_modrm(self) -> bool {
        matches!(
            self,
            OperandKind::Rm
                | OperandKind::Rm8
                | OperandKind::Rm16
                | OperandKind::Reg
                | OperandKind::Reg8
                | OperandKind::MmxReg
                | OperandKind::MmxRm
                | OperandKind::XmmReg
                | OperandKind::XmmRm
        )
    }
}

/// A description of one encodable instruction form.
#[derive(Debug, Clone)]
pub struct OpcodeSyntax {
    prefix: Vec<u8>,
    extension: Option<u8>,
    register_in_opcode: bool,
    mnemonic: &'static str,
    operation: Operation,
    operands: Vec<OperandKind>,
    prefix_effect: Option<PrefixEffect>,
}

impl OpcodeSyntax {
    /// Creates a syntax selected by the given literal opcode bytes.
    pub fn new(prefix: &[u8], mnemonic: &'static str, operation: Operation) -> Self {
        debug_assert!(!prefix.is_empty() && prefix.len() <= 3);
        Self {
            prefix: prefix.to_vec(),
            extension: None,
            register_in_opcode: false,
            mnemonic,
            operation,
            operands: Vec::new(),
            prefix_effect: None,
        }
    }

    /// Creates a prefix-only syntax for a single prefix byte.
    pub fn prefix_byte(byte: u8, mnemonic: &'static str, effect: PrefixEffect) -> Self {
        Self {
            prefix: vec![byte],
            extension: None,
            register_in_opcode: false,
            mnemonic,
            operation: Operation::Nop,
            operands: Vec::new(),
            prefix_effect: Some(effect),
        }
    }

    /// Sets the operand descriptors.
    pub fn with_operands(mut self, operands: &[OperandKind]) -> Self {
        self.operands = operands.to_vec();
        self
    }

    /// Restricts the syntax to one ModR/M reg-field value.
    pub fn with_extension(mut self, extension: u8) -> Self {
        debug_assert!(extension <= 7);
        self.extension = Some(extension);
        self
    }

    /// Marks the low 3 bits of the last opcode byte as a register
    /// number; the syntax then occupies 8 adjacent leaf slots.
    pub fn with_register_in_opcode(mut self) -> Self {
        self.register_in_opcode = true;
        self
    }

    /// The literal opcode bytes.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// ModR/M reg-field extension, if any.
    pub fn extension(&self) -> Option<u8> {
        self.extension
    }

    /// Returns true if selection also depends on the ModR/M reg field.
    pub fn is_extended(&self) -> bool {
        self.extension.is_some()
    }

    /// Returns true if the last opcode byte encodes a register.
    pub fn has_encoded_register(&self) -> bool {
        self.register_in_opcode
    }

    /// Mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    /// Operation category.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Operand descriptors.
    pub fn operands(&self) -> &[OperandKind] {
        &self.operands
    }

    /// Context effect for prefix-only syntaxes.
    pub fn prefix_effect(&self) -> Option<PrefixEffect> {
        self.prefix_effect
    }

    /// Returns true if this syntax is a bare prefix rather than an
    /// instruction.
    pub fn is_prefix(&self) -> bool {
        self.prefix_effect.is_some()
    }
}
