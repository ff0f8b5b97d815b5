//! # ravel-trace
//!
//! The trace-driven disassembly engine: a priority work queue of code
//! and data addresses, a dedicated analyzer worker that decodes linear
//! traces and discovers new work from instruction operands, and the
//! address-indexed store of decoded entities, functions, and
//! cross-references.

pub mod engine;
pub mod error;
pub mod listener;
pub mod queue;
pub mod store;

pub use engine::Disassembler;
pub use error::EngineError;
pub use listener::DisassemblyListener;
pub use queue::WorkItem;
pub use store::{DataEntry, DisassemblyData};
