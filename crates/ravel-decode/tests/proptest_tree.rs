//! Property-based tests for the decode tree and decoder.

use proptest::prelude::*;

use ravel_core::Operation;
use ravel_decode::{Context, DecodeTree, InstructionDecoder, OpcodeSyntax};
use ravel_image::ByteSequence;

/// (prefix bytes, extension, register-in-opcode) triples that are
/// always legal to insert. The last prefix byte is aligned down to a
/// multiple of 8 when the register flag is set so the 8-slot expansion
/// stays within the byte.
fn syntax_shape() -> impl Strategy<Value = (Vec<u8>, Option<u8>, bool)> {
    (
        prop::collection::vec(any::<u8>(), 1..=3),
        prop::option::of(0u8..8),
        any::<bool>(),
    )
        .prop_map(|(mut prefix, extension, register)| {
            if register {
                let last = prefix.len() - 1;
                prefix[last] &= 0xf8;
            }
            (prefix, extension, register)
        })
}

fn build_syntax(shape: &(Vec<u8>, Option<u8>, bool)) -> OpcodeSyntax {
    let (prefix, extension, register) = shape;
    let mut syntax = OpcodeSyntax::new(prefix, "op", Operation::Nop);
    if let Some(ext) = extension {
        syntax = syntax.with_extension(*ext);
    }
    if *register {
        syntax = syntax.with_register_in_opcode();
    }
    syntax
}

proptest! {
    /// Building the tree from a syntax list and enumerating all
    /// reachable leaves yields exactly the list, with register-encoded
    /// syntaxes expanded into 8 adjacent slots.
    #[test]
    fn tree_leaves_round_trip(shapes in prop::collection::vec(syntax_shape(), 1..40)) {
        let tree = DecodeTree::build(shapes.iter().map(build_syntax));

        let mut seen: Vec<(Vec<u8>, Option<u8>)> = Vec::new();
        tree.for_each_leaf(&mut |path, syntax| {
            seen.push((path.to_vec(), syntax.extension()));
        });
        seen.sort();

        let mut expected: Vec<(Vec<u8>, Option<u8>)> = Vec::new();
        for (prefix, extension, register) in &shapes {
            if *register {
                let last = prefix.len() - 1;
                for reg in 0..8 {
                    let mut path = prefix.clone();
                    path[last] += reg;
                    expected.push((path, *extension));
                }
            } else {
                expected.push((prefix.clone(), *extension));
            }
        }
        expected.sort();

        prop_assert_eq!(seen, expected);
    }

    /// The decoder never panics on arbitrary byte streams.
    #[test]
    fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let decoder = InstructionDecoder::with_builtin_table();
        let mut seq = ByteSequence::over(&data, 0);
        let mut ctx = Context::new();
        ctx.set_instruction_pointer(0x1000);
        let _ = decoder.decode(&mut seq, &mut ctx);
    }

    /// A successful decode always consumes as many bytes as it reports.
    #[test]
    fn decode_size_matches_consumption(data in prop::collection::vec(any::<u8>(), 1..32)) {
        let decoder = InstructionDecoder::with_builtin_table();
        let mut seq = ByteSequence::over(&data, 0);
        let mut ctx = Context::new();
        ctx.set_instruction_pointer(0x1000);
        if let Ok(Some(inst)) = decoder.decode(&mut seq, &mut ctx) {
            prop_assert_eq!(inst.size as u64, seq.position());
            prop_assert_eq!(inst.bytes.as_slice(), &data[..inst.size]);
        }
    }
}
