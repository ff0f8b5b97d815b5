//! The recursive-descent instruction decoder.

use std::sync::Arc;

use ravel_core::{Entity, Instruction};
use ravel_image::ByteSequence;
use tracing::warn;

use crate::{operands, Context, DecodeError, DecodeTree, OpcodeSyntax};

/// Receiver for the one-shot decode stream.
pub trait DecodeListener {
    /// Called once per decoded entity, in address order.
    fn on_decode(&mut self, address: u64, length: u64, entity: &Entity);
}

/// Decodes instructions against a shared decode tree.
pub struct InstructionDecoder {
    tree: Arc<DecodeTree>,
}

impl InstructionDecoder {
    /// Creates a decoder over a prepared decode tree.
    pub fn new(tree: Arc<DecodeTree>) -> Self {
        Self { tree }
    }

    /// Creates a decoder over the builtin opcode table.
    pub fn with_builtin_table() -> Self {
        Self::new(Arc::new(DecodeTree::build(crate::opcodes::builtin_syntaxes())))
    }

    /// The decode tree in use.
    pub fn tree(&self) -> &DecodeTree {
        &self.tree
    }

    /// Decodes one instruction at the sequence position.
    ///
    /// Prefix-only matches are applied to the context and decoding
    /// continues, so the returned instruction carries its prefixes and
    /// its size includes them. `Ok(None)` is a decode miss: no opcode
    /// matched (or the image ended between prefix and opcode); the
    /// sequence is left just past any consumed prefix bytes.
    pub fn decode(
        &self,
        seq: &mut ByteSequence<'_>,
        ctx: &mut Context,
    ) -> Result<Option<Instruction>, DecodeError> {
        ctx.set_file_offset(seq.position());
        loop {
            let Some(syntax) = self.descend(seq, ctx, &self.tree) else {
                return Ok(None);
            };
            if let Some(effect) = syntax.prefix_effect() {
                ctx.apply_prefix(effect);
                continue;
            }
            let inst = operands::decode_instruction(&syntax, seq, ctx)?;
            return Ok(Some(inst));
        }
    }

    /// One recursive step: consume a byte, prefer the deeper sub-tree
    /// match, fall back to the leaf list, unwind on a miss.
    fn descend(
        &self,
        seq: &mut ByteSequence<'_>,
        ctx: &mut Context,
        node: &DecodeTree,
    ) -> Option<Arc<OpcodeSyntax>> {
        let byte = match seq.read_u8() {
            Ok(byte) => byte,
            Err(_) => return None,
        };
        ctx.add_decoded_prefix(byte);

        if let Some(sub) = node.sub_tree(byte) {
            if let Some(found) = self.descend(seq, ctx, sub) {
                return Some(found);
            }
        }

        let Some(leaves) = node.leaves(byte) else {
            // Neither a longer encoding nor a leaf: undo this byte.
            let _ = seq.skip(-1);
            ctx.remove_decoded_prefix_top();
            return None;
        };

        let mut extension: Option<u8> = None;
        for syntax in leaves {
            match syntax.extension() {
                Some(ext) => {
                    if extension.is_none() {
                        match seq.peek_u8() {
                            Ok(next) => extension = Some((next >> 3) & 0x07),
                            Err(_) => continue,
                        }
                    }
                    if extension == Some(ext) {
                        return Some(Arc::clone(syntax));
                    }
                }
                // Ambiguities in the opcode table resolve to the first
                // inserted syntax.
                None => return Some(Arc::clone(syntax)),
            }
        }
        None
    }

    /// Linear one-shot decoding of a byte block, without a data store.
    ///
    /// Emits every decoded instruction to the listener and stops at the
    /// first byte no opcode matches, reporting it as a length-1
    /// [`Entity::UnknownOpcode`].
    pub fn decode_stream(&self, bytes: &[u8], base_address: u64, listener: &mut dyn DecodeListener) {
        let mut seq = ByteSequence::over(bytes, 0);
        let mut ctx = Context::new();

        while (seq.position() as usize) < bytes.len() {
            ctx.reset();
            ctx.set_instruction_pointer(base_address + seq.position());
            match self.decode(&mut seq, &mut ctx) {
                Ok(Some(inst)) => {
                    let address = inst.address;
                    let length = inst.size as u64;
                    listener.on_decode(address, length, &Entity::Instruction(inst));
                }
                Ok(None) => {
                    let address = base_address + seq.position();
                    if let Ok(byte) = seq.read_u8() {
                        listener.on_decode(address, 1, &Entity::UnknownOpcode { address, byte });
                    }
                    return;
                }
                Err(err) => {
                    warn!("decode failed at {:#010x}: {}", ctx.virtual_address(), err);
                    return;
                }
            }
        }
    }
}
