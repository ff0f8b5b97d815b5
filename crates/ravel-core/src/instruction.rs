//! Decoded instruction representation.

use crate::{Data, Operand};

/// High-level operation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Operation {
    // Data movement
    Move,
    MoveZeroExtend,
    MoveSignExtend,
    Exchange,
    Push,
    Pop,
    LoadEffectiveAddress,

    // Arithmetic
    Add,
    AddWithCarry,
    Sub,
    SubWithBorrow,
    Mul,
    SignedMul,
    Div,
    SignedDiv,
    Neg,
    Inc,
    Dec,

    // Logical
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    RclRotate,
    RcrRotate,

    // Comparison
    Compare,
    Test,
    SetCondition,

    // Control flow
    Jump,
    ConditionalJump,
    Call,
    Return,
    Leave,

    // System
    Interrupt,
    Halt,
    Nop,
    Convert,
}

/// A decoded x86 instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Instruction {
    /// Virtual address of the first byte, prefixes included.
    pub address: u64,
    /// Total encoded size in bytes, prefixes included.
    pub size: usize,
    /// Raw encoding.
    pub bytes: Vec<u8>,
    /// Mnemonic (e.g. "mov", "jnz").
    pub mnemonic: &'static str,
    /// Operation category.
    pub operation: Operation,
    /// Operands, destination first.
    pub operands: Vec<Operand>,
    /// LOCK prefix seen.
    pub lock: bool,
    /// REP/REPE prefix seen.
    pub rep: bool,
    /// REPNE prefix seen.
    pub repne: bool,
}

impl Instruction {
    /// Returns the address one past the last byte.
    pub fn end_address(&self) -> u64 {
        self.address + self.size as u64
    }

    /// Returns true for call instructions, direct or indirect.
    pub fn is_call(&self) -> bool {
        self.operation == Operation::Call
    }

    /// Returns true for unconditional jumps, direct or indirect.
    pub fn is_unconditional_jump(&self) -> bool {
        self.operation == Operation::Jump
    }

    /// Returns true if linear decoding cannot continue past this
    /// instruction (return, unconditional jump, halt).
    pub fn stops_trace(&self) -> bool {
        matches!(
            self.operation,
            Operation::Jump | Operation::Return | Operation::Halt
        )
    }

    /// Addresses directly reachable through this instruction's
    /// relative branch operands.
    pub fn branch_targets(&self) -> Vec<u64> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Relative { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Data items seeded by memory operands whose effective address is
    /// a literal (direct loads, indirect branch slots, moffs forms).
    pub fn associated_data(&self) -> Vec<Data> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Memory(mem) => mem
                    .absolute_address()
                    .map(|addr| Data::new(addr, Data::kind_for_access_size(mem.size))),
                _ => None,
            })
            .collect()
    }

    /// Immediate values wide enough to be in-image addresses. The
    /// caller decides whether they actually map into the image.
    pub fn probable_data_pointers(&self) -> Vec<u64> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Immediate(imm) if imm.size == 32 => Some(imm.as_address()),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lock {
            write!(f, "lock ")?;
        }
        if self.rep {
            write!(f, "rep ")?;
        }
        if self.repne {
            write!(f, "repne ")?;
        }
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataKind, MemoryRef};

    fn inst(operation: Operation, operands: Vec<Operand>) -> Instruction {
        Instruction {
            address: 0x1000,
            size: 2,
            bytes: vec![0x00, 0x00],
            mnemonic: "test",
            operation,
            operands,
            lock: false,
            rep: false,
            repne: false,
        }
    }

    #[test]
    fn test_stops_trace() {
        assert!(inst(Operation::Return, vec![]).stops_trace());
        assert!(inst(Operation::Jump, vec![]).stops_trace());
        assert!(inst(Operation::Halt, vec![]).stops_trace());
        assert!(!inst(Operation::Call, vec![]).stops_trace());
        assert!(!inst(Operation::ConditionalJump, vec![]).stops_trace());
    }

    #[test]
    fn test_branch_targets() {
        let i = inst(
            Operation::Call,
            vec![Operand::Relative {
                offset: 4,
                target: 0x1009,
            }],
        );
        assert_eq!(i.branch_targets(), vec![0x1009]);
    }

    #[test]
    fn test_associated_data() {
        let i = inst(
            Operation::Jump,
            vec![Operand::Memory(MemoryRef::absolute(0x2000, 4))],
        );
        let data = i.associated_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].address(), 0x2000);
        assert_eq!(data[0].kind(), DataKind::Dword);
    }

    #[test]
    fn test_probable_data_pointers() {
        let i = inst(Operation::Move, vec![Operand::imm(0x0040_1000, 32)]);
        assert_eq!(i.probable_data_pointers(), vec![0x0040_1000]);
        let j = inst(Operation::Move, vec![Operand::imm(0x41, 8)]);
        assert!(j.probable_data_pointers().is_empty());
    }
}
