//! The decode tree: a prefix trie over opcode bytes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::OpcodeSyntax;

/// A node of the decode tree.
///
/// Each node maps byte values to child sub-trees and, independently, to
/// lists of syntax records that terminate at this node through that
/// byte. A single byte value may carry both: longer and shorter
/// encodings share a prefix, e.g. the operand-size prefix `66` is a
/// leaf at the root while `66 0F 6F` descends a sub-tree from the same
/// slot. Built once, then shared read-only.
#[derive(Debug, Default)]
pub struct DecodeTree {
    children: HashMap<u8, DecodeTree>,
    leaves: HashMap<u8, Vec<Arc<OpcodeSyntax>>>,
}

impl DecodeTree {
    /// Builds a tree from syntax records. A record whose last opcode
    /// byte encodes a register occupies 8 adjacent leaf slots.
    pub fn build<I>(syntaxes: I) -> Self
    where
        I: IntoIterator<Item = OpcodeSyntax>,
    {
        let mut tree = DecodeTree::default();
        for syntax in syntaxes {
            let syntax = Arc::new(syntax);
            if syntax.has_encoded_register() {
                let mut prefix = syntax.prefix().to_vec();
                let last = prefix.len() - 1;
                let base = prefix[last];
                for reg in 0..8 {
                    prefix[last] = base + reg;
                    tree.insert(&prefix, Arc::clone(&syntax));
                }
            } else {
                tree.insert(syntax.prefix(), Arc::clone(&syntax));
            }
        }
        tree
    }

    /// Inserts a syntax record under the given byte path.
    pub fn insert(&mut self, prefix: &[u8], syntax: Arc<OpcodeSyntax>) {
        let (&last, path) = match prefix.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut node = self;
        for &byte in path {
            node = node.children.entry(byte).or_default();
        }
        let leaves = node.leaves.entry(last).or_default();
        if let Some(clash) = leaves.iter().find(|s| s.extension() == syntax.extension()) {
            // First match wins at lookup time; keep insertion order.
            warn!(
                prefix = ?prefix,
                first = clash.mnemonic(),
                second = syntax.mnemonic(),
                "ambiguous opcode syntax, first match wins"
            );
        }
        leaves.push(syntax);
    }

    /// Returns the sub-tree reached through `byte`, if any.
    pub fn sub_tree(&self, byte: u8) -> Option<&DecodeTree> {
        self.children.get(&byte)
    }

    /// Returns the syntax records terminating at `byte`, if any.
    pub fn leaves(&self, byte: u8) -> Option<&[Arc<OpcodeSyntax>]> {
        self.leaves.get(&byte).map(|v| v.as_slice())
    }

    /// Visits every reachable leaf with its full byte path.
    pub fn for_each_leaf<F>(&self, f: &mut F)
    where
        F: FnMut(&[u8], &Arc<OpcodeSyntax>),
    {
        let mut path = Vec::new();
        self.walk(&mut path, f);
    }

    fn walk<F>(&self, path: &mut Vec<u8>, f: &mut F)
    where
        F: FnMut(&[u8], &Arc<OpcodeSyntax>),
    {
        for (&byte, leaves) in &self.leaves {
            path.push(byte);
            for syntax in leaves {
                f(path, syntax);
            }
            path.pop();
        }
        for (&byte, child) in &self.children {
            path.push(byte);
            child.walk(path, f);
            path.pop();
        }
    }

    /// Total number of leaf slots in the tree.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.for_each_leaf(&mut |_, _| count += 1);
        count
    }
}
