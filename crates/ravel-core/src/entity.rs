//! Decoded entities.

use crate::{Data, Instruction};

/// Anything the disassembler can place at an address.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Entity {
    /// A decoded instruction.
    Instruction(Instruction),
    /// A decoded datum.
    Data(Data),
    /// A byte no opcode matched. Emitted by the one-shot decode
    /// stream; the trace engine reports a miss instead of storing one.
    UnknownOpcode { address: u64, byte: u8 },
}

impl Entity {
    /// Memory address of the entity's first byte.
    pub fn address(&self) -> u64 {
        match self {
            Entity::Instruction(inst) => inst.address,
            Entity::Data(data) => data.address(),
            Entity::UnknownOpcode { address, .. } => *address,
        }
    }

    /// Encoded length in bytes.
    pub fn length(&self) -> u64 {
        match self {
            Entity::Instruction(inst) => inst.size as u64,
            Entity::Data(data) => data.length().max(1),
            Entity::UnknownOpcode { .. } => 1,
        }
    }

    /// Returns the instruction if this entity is one.
    pub fn as_instruction(&self) -> Option<&Instruction> {
        match self {
            Entity::Instruction(inst) => Some(inst),
            _ => None,
        }
    }

    /// Returns the datum if this entity is one.
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            Entity::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns true if this entity is an instruction.
    pub fn is_instruction(&self) -> bool {
        matches!(self, Entity::Instruction(_))
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Instruction(inst) => write!(f, "{}", inst),
            Entity::Data(data) => write!(f, "{}", data),
            Entity::UnknownOpcode { byte, .. } => write!(f, "Unknown opcode: {:02X}", byte),
        }
    }
}
