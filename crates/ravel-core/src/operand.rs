//! Instruction operand types.

use crate::Register;

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Operand {
    /// Register operand.
    Register(Register),
    /// Immediate value.
    Immediate(Immediate),
    /// Memory reference.
    Memory(MemoryRef),
    /// Relative branch target.
    Relative {
        /// Signed offset from the end of the instruction.
        offset: i64,
        /// Resolved target address.
        target: u64,
    },
}

impl Operand {
    /// Creates a register operand.
    pub fn reg(reg: Register) -> Self {
        Self::Register(reg)
    }

    /// Creates an immediate operand.
    pub fn imm(value: i64, size: u8) -> Self {
        Self::Immediate(Immediate { value, size })
    }

    /// Returns true if this is a memory operand.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Returns true if this is an immediate operand.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate(_))
    }
}

/// Immediate value operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Immediate {
    /// The value, sign-extended to i64.
    pub value: i64,
    /// Original size in bits.
    pub size: u8,
}

impl Immediate {
    /// Returns the value as an unsigned u32 address candidate.
    pub fn as_address(&self) -> u64 {
        self.value as u32 as u64
    }
}

/// Memory reference operand: `[base + index*scale + disp]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MemoryRef {
    /// Base register (if any).
    pub base: Option<Register>,
    /// Index register (if any).
    pub index: Option<Register>,
    /// Scale factor for index (1, 2, 4, or 8).
    pub scale: u8,
    /// Displacement.
    pub displacement: i64,
    /// Access size in bytes.
    pub size: u8,
    /// Segment override.
    pub segment: Option<Register>,
}

impl MemoryRef {
    /// Creates a memory reference with just a base register.
    pub fn base(reg: Register, size: u8) -> Self {
        Self {
            base: Some(reg),
            index: None,
            scale: 1,
            displacement: 0,
            size,
            segment: None,
        }
    }

    /// Creates a memory reference with just a displacement.
    pub fn absolute(address: i64, size: u8) -> Self {
        Self {
            base: None,
            index: None,
            scale: 1,
            displacement: address,
            size,
            segment: None,
        }
    }

    /// Sets the segment override.
    pub fn with_segment(mut self, segment: Register) -> Self {
        self.segment = Some(segment);
        self
    }

    /// If the effective address is a literal (no base and no index),
    /// returns it.
    pub fn absolute_address(&self) -> Option<u64> {
        if self.base.is_none() && self.index.is_none() {
            Some(self.displacement as u32 as u64)
        } else {
            None
        }
    }
}

fn size_tag(size: u8) -> Option<&'static str> {
    match size {
        1 => Some("byte"),
        2 => Some("word"),
        4 => Some("dword"),
        8 => Some("qword"),
        16 => Some("xmmword"),
        _ => None,
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{}", reg.name()),
            Self::Immediate(imm) => {
                if imm.value < 0 {
                    write!(f, "-{:#x}", -imm.value)
                } else {
                    write!(f, "{:#x}", imm.value)
                }
            }
            Self::Memory(mem) => {
                if let Some(tag) = size_tag(mem.size) {
                    write!(f, "{} ", tag)?;
                }
                if let Some(ref seg) = mem.segment {
                    write!(f, "{}:", seg.name())?;
                }
                write!(f, "[")?;
                let mut has_content = false;

                if let Some(ref base) = mem.base {
                    write!(f, "{}", base.name())?;
                    has_content = true;
                }

                if let Some(ref index) = mem.index {
                    if has_content {
                        write!(f, " + ")?;
                    }
                    write!(f, "{}", index.name())?;
                    if mem.scale > 1 {
                        write!(f, "*{}", mem.scale)?;
                    }
                    has_content = true;
                }

                if mem.displacement != 0 || !has_content {
                    if has_content {
                        if mem.displacement >= 0 {
                            write!(f, " + {:#x}", mem.displacement)?;
                        } else {
                            write!(f, " - {:#x}", -mem.displacement)?;
                        }
                    } else {
                        write!(f, "{:#x}", mem.displacement as u32)?;
                    }
                }

                write!(f, "]")
            }
            Self::Relative { target, .. } => write!(f, "{:#x}", target),
        }
    }
}
