//! # ravel-decode
//!
//! The x86 instruction decoder: a variable-depth prefix trie over opcode
//! bytes with ModR/M group-extension disambiguation, and the recursive
//! decoder that consumes a byte stream against it while accumulating
//! prefix state.

pub mod context;
pub mod decoder;
pub mod error;
pub mod opcodes;
mod operands;
pub mod syntax;
pub mod tree;

pub use context::Context;
pub use decoder::{DecodeListener, InstructionDecoder};
pub use error::DecodeError;
pub use syntax::{OpcodeSyntax, OperandKind, PrefixEffect, Segment};
pub use tree::DecodeTree;
