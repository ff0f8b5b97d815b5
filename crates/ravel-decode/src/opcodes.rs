//! Builtin x86 opcode table.
//!
//! A 32-bit protected-mode subset of the x86 encoding space, produced
//! as plain [`OpcodeSyntax`] records. The decode tree consumes the
//! records without knowing where they came from, so an external opcode
//! reference can replace this table wholesale.

use ravel_core::Operation;

use crate::syntax::{OpcodeSyntax, OperandKind, PrefixEffect, Segment};
use OperandKind::*;

fn op(
    prefix: &[u8],
    mnemonic: &'static str,
    operation: Operation,
    operands: &[OperandKind],
) -> OpcodeSyntax {
    OpcodeSyntax::new(prefix, mnemonic, operation).with_operands(operands)
}

/// Condition-code mnemonics indexed by the low opcode nibble.
const JCC: [&str; 16] = [
    "jo", "jno", "jb", "jae", "je", "jne", "jbe", "ja", "js", "jns", "jp", "jnp", "jl", "jge",
    "jle", "jg",
];

const SETCC: [&str; 16] = [
    "seto", "setno", "setb", "setae", "sete", "setne", "setbe", "seta", "sets", "setns", "setp",
    "setnp", "setl", "setge", "setle", "setg",
];

/// Produces the builtin opcode syntax records.
pub fn builtin_syntaxes() -> Vec<OpcodeSyntax> {
    let mut t = Vec::with_capacity(256);

    // Prefixes. 66/F2/F3 also open mandatory-prefix escapes below; the
    // tree keeps both under the same byte slot.
    t.push(OpcodeSyntax::prefix_byte(0xf0, "lock", PrefixEffect::Lock));
    t.push(OpcodeSyntax::prefix_byte(0xf2, "repne", PrefixEffect::RepNe));
    t.push(OpcodeSyntax::prefix_byte(0xf3, "rep", PrefixEffect::Rep));
    t.push(OpcodeSyntax::prefix_byte(0x66, "opsize", PrefixEffect::OperandSize));
    t.push(OpcodeSyntax::prefix_byte(0x67, "addrsize", PrefixEffect::AddressSize));
    t.push(OpcodeSyntax::prefix_byte(0x26, "es", PrefixEffect::Segment(Segment::Es)));
    t.push(OpcodeSyntax::prefix_byte(0x2e, "cs", PrefixEffect::Segment(Segment::Cs)));
    t.push(OpcodeSyntax::prefix_byte(0x36, "ss", PrefixEffect::Segment(Segment::Ss)));
    t.push(OpcodeSyntax::prefix_byte(0x3e, "ds", PrefixEffect::Segment(Segment::Ds)));
    t.push(OpcodeSyntax::prefix_byte(0x64, "fs", PrefixEffect::Segment(Segment::Fs)));
    t.push(OpcodeSyntax::prefix_byte(0x65, "gs", PrefixEffect::Segment(Segment::Gs)));

    // ALU rows: six encodings each, plus the group-1 immediate forms
    // selected by the ModR/M reg field.
    let alu: [(u8, &'static str, Operation); 8] = [
        (0x00, "add", Operation::Add),
        (0x08, "or", Operation::Or),
        (0x10, "adc", Operation::AddWithCarry),
        (0x18, "sbb", Operation::SubWithBorrow),
        (0x20, "and", Operation::And),
        (0x28, "sub", Operation::Sub),
        (0x30, "xor", Operation::Xor),
        (0x38, "cmp", Operation::Compare),
    ];
    for (base, mnemonic, operation) in alu {
        t.push(op(&[base], mnemonic, operation, &[Rm8, Reg8]));
        t.push(op(&[base + 1], mnemonic, operation, &[Rm, Reg]));
        t.push(op(&[base + 2], mnemonic, operation, &[Reg8, Rm8]));
        t.push(op(&[base + 3], mnemonic, operation, &[Reg, Rm]));
        t.push(op(&[base + 4], mnemonic, operation, &[Al, Imm8]));
        t.push(op(&[base + 5], mnemonic, operation, &[EAx, ImmV]));
    }
    for (ext, &(_, mnemonic, operation)) in alu.iter().enumerate() {
        let ext = ext as u8;
        t.push(op(&[0x80], mnemonic, operation, &[Rm8, Imm8]).with_extension(ext));
        t.push(op(&[0x81], mnemonic, operation, &[Rm, ImmV]).with_extension(ext));
        t.push(op(&[0x83], mnemonic, operation, &[Rm, Imm8Signed]).with_extension(ext));
    }

    // Register rows encoded in the opcode byte.
    t.push(op(&[0x40], "inc", Operation::Inc, &[OpcodeReg]).with_register_in_opcode());
    t.push(op(&[0x48], "dec", Operation::Dec, &[OpcodeReg]).with_register_in_opcode());
    t.push(op(&[0x50], "push", Operation::Push, &[OpcodeReg]).with_register_in_opcode());
    t.push(op(&[0x58], "pop", Operation::Pop, &[OpcodeReg]).with_register_in_opcode());

    t.push(op(&[0x68], "push", Operation::Push, &[ImmV]));
    t.push(op(&[0x69], "imul", Operation::SignedMul, &[Reg, Rm, ImmV]));
    t.push(op(&[0x6a], "push", Operation::Push, &[Imm8Signed]));
    t.push(op(&[0x6b], "imul", Operation::SignedMul, &[Reg, Rm, Imm8Signed]));

    // Conditional jumps.
    for (cc, &name) in JCC.iter().enumerate() {
        t.push(op(&[0x70 + cc as u8], name, Operation::ConditionalJump, &[Rel8]));
        t.push(op(&[0x0f, 0x80 + cc as u8], name, Operation::ConditionalJump, &[RelV]));
    }
    for (cc, &name) in SETCC.iter().enumerate() {
        t.push(op(&[0x0f, 0x90 + cc as u8], name, Operation::SetCondition, &[Rm8]));
    }

    t.push(op(&[0x84], "test", Operation::Test, &[Rm8, Reg8]));
    t.push(op(&[0x85], "test", Operation::Test, &[Rm, Reg]));
    t.push(op(&[0x86], "xchg", Operation::Exchange, &[Rm8, Reg8]));
    t.push(op(&[0x87], "xchg", Operation::Exchange, &[Rm, Reg]));
    t.push(op(&[0x88], "mov", Operation::Move, &[Rm8, Reg8]));
    t.push(op(&[0x89], "mov", Operation::Move, &[Rm, Reg]));
    t.push(op(&[0x8a], "mov", Operation::Move, &[Reg8, Rm8]));
    t.push(op(&[0x8b], "mov", Operation::Move, &[Reg, Rm]));
    t.push(op(&[0x8d], "lea", Operation::LoadEffectiveAddress, &[Reg, Rm]));
    t.push(op(&[0x8f], "pop", Operation::Pop, &[Rm]).with_extension(0));

    // 90 is NOP; the xchg-with-eax row overlaps it, and the table's
    // first-match policy resolves the clash in favor of NOP.
    t.push(op(&[0x90], "nop", Operation::Nop, &[]));
    t.push(op(&[0x90], "xchg", Operation::Exchange, &[OpcodeReg, EAx]).with_register_in_opcode());

    t.push(op(&[0x98], "cwde", Operation::Convert, &[]));
    t.push(op(&[0x99], "cdq", Operation::Convert, &[]));

    t.push(op(&[0xa0], "mov", Operation::Move, &[Al, Moffs8]));
    t.push(op(&[0xa1], "mov", Operation::Move, &[EAx, MoffsV]));
    t.push(op(&[0xa2], "mov", Operation::Move, &[Moffs8, Al]));
    t.push(op(&[0xa3], "mov", Operation::Move, &[MoffsV, EAx]));
    t.push(op(&[0xa4], "movsb", Operation::Move, &[]));
    t.push(op(&[0xa5], "movsd", Operation::Move, &[]));
    t.push(op(&[0xa8], "test", Operation::Test, &[Al, Imm8]));
    t.push(op(&[0xa9], "test", Operation::Test, &[EAx, ImmV]));
    t.push(op(&[0xaa], "stosb", Operation::Move, &[]));
    t.push(op(&[0xab], "stosd", Operation::Move, &[]));
    t.push(op(&[0xac], "lodsb", Operation::Move, &[]));
    t.push(op(&[0xad], "lodsd", Operation::Move, &[]));

    t.push(op(&[0xb0], "mov", Operation::Move, &[OpcodeReg8, Imm8]).with_register_in_opcode());
    t.push(op(&[0xb8], "mov", Operation::Move, &[OpcodeReg, ImmV]).with_register_in_opcode());

    // Shift and rotate groups.
    let shifts: [(&'static str, Operation); 8] = [
        ("rol", Operation::Rol),
        ("ror", Operation::Ror),
        ("rcl", Operation::RclRotate),
        ("rcr", Operation::RcrRotate),
        ("shl", Operation::Shl),
        ("shr", Operation::Shr),
        ("sal", Operation::Shl),
        ("sar", Operation::Sar),
    ];
    for (ext, &(mnemonic, operation)) in shifts.iter().enumerate() {
        let ext = ext as u8;
        t.push(op(&[0xc0], mnemonic, operation, &[Rm8, Imm8]).with_extension(ext));
        t.push(op(&[0xc1], mnemonic, operation, &[Rm, Imm8]).with_extension(ext));
        t.push(op(&[0xd0], mnemonic, operation, &[Rm8, Const1]).with_extension(ext));
        t.push(op(&[0xd1], mnemonic, operation, &[Rm, Const1]).with_extension(ext));
        t.push(op(&[0xd2], mnemonic, operation, &[Rm8, Cl]).with_extension(ext));
        t.push(op(&[0xd3], mnemonic, operation, &[Rm, Cl]).with_extension(ext));
    }

    t.push(op(&[0xc2], "ret", Operation::Return, &[Imm16]));
    t.push(op(&[0xc3], "ret", Operation::Return, &[]));
    t.push(op(&[0xc6], "mov", Operation::Move, &[Rm8, Imm8]).with_extension(0));
    t.push(op(&[0xc7], "mov", Operation::Move, &[Rm, ImmV]).with_extension(0));
    t.push(op(&[0xc9], "leave", Operation::Leave, &[]));
    t.push(op(&[0xcc], "int3", Operation::Interrupt, &[]));
    t.push(op(&[0xcd], "int", Operation::Interrupt, &[Imm8]));

    t.push(op(&[0xe8], "call", Operation::Call, &[RelV]));
    t.push(op(&[0xe9], "jmp", Operation::Jump, &[RelV]));
    t.push(op(&[0xeb], "jmp", Operation::Jump, &[Rel8]));
    t.push(op(&[0xf4], "hlt", Operation::Halt, &[]));

    // Group 3: TEST and the one-operand arithmetic forms.
    t.push(op(&[0xf6], "test", Operation::Test, &[Rm8, Imm8]).with_extension(0));
    t.push(op(&[0xf6], "not", Operation::Not, &[Rm8]).with_extension(2));
    t.push(op(&[0xf6], "neg", Operation::Neg, &[Rm8]).with_extension(3));
    t.push(op(&[0xf6], "mul", Operation::Mul, &[Rm8]).with_extension(4));
    t.push(op(&[0xf6], "imul", Operation::SignedMul, &[Rm8]).with_extension(5));
    t.push(op(&[0xf6], "div", Operation::Div, &[Rm8]).with_extension(6));
    t.push(op(&[0xf6], "idiv", Operation::SignedDiv, &[Rm8]).with_extension(7));
    t.push(op(&[0xf7], "test", Operation::Test, &[Rm, ImmV]).with_extension(0));
    t.push(op(&[0xf7], "not", Operation::Not, &[Rm]).with_extension(2));
    t.push(op(&[0xf7], "neg", Operation::Neg, &[Rm]).with_extension(3));
    t.push(op(&[0xf7], "mul", Operation::Mul, &[Rm]).with_extension(4));
    t.push(op(&[0xf7], "imul", Operation::SignedMul, &[Rm]).with_extension(5));
    t.push(op(&[0xf7], "div", Operation::Div, &[Rm]).with_extension(6));
    t.push(op(&[0xf7], "idiv", Operation::SignedDiv, &[Rm]).with_extension(7));

    // Groups 4 and 5.
    t.push(op(&[0xfe], "inc", Operation::Inc, &[Rm8]).with_extension(0));
    t.push(op(&[0xfe], "dec", Operation::Dec, &[Rm8]).with_extension(1));
    t.push(op(&[0xff], "inc", Operation::Inc, &[Rm]).with_extension(0));
    t.push(op(&[0xff], "dec", Operation::Dec, &[Rm]).with_extension(1));
    t.push(op(&[0xff], "call", Operation::Call, &[Rm]).with_extension(2));
    t.push(op(&[0xff], "jmp", Operation::Jump, &[Rm]).with_extension(4));
    t.push(op(&[0xff], "push", Operation::Push, &[Rm]).with_extension(6));

    // Two-byte escape forms.
    t.push(op(&[0x0f, 0x1f], "nop", Operation::Nop, &[Rm]).with_extension(0));
    t.push(op(&[0x0f, 0xaf], "imul", Operation::SignedMul, &[Reg, Rm]));
    t.push(op(&[0x0f, 0xb6], "movzx", Operation::MoveZeroExtend, &[Reg, Rm8]));
    t.push(op(&[0x0f, 0xb7], "movzx", Operation::MoveZeroExtend, &[Reg, Rm16]));
    t.push(op(&[0x0f, 0xbe], "movsx", Operation::MoveSignExtend, &[Reg, Rm8]));
    t.push(op(&[0x0f, 0xbf], "movsx", Operation::MoveSignExtend, &[Reg, Rm16]));

    // MMX/SSE moves, including the mandatory-prefix escapes that share
    // their first byte with the 66/F3 prefixes.
    t.push(op(&[0x0f, 0x6e], "movd", Operation::Move, &[MmxReg, Rm]));
    t.push(op(&[0x66, 0x0f, 0x6e], "movd", Operation::Move, &[XmmReg, Rm]));
    t.push(op(&[0x0f, 0x6f], "movq", Operation::Move, &[MmxReg, MmxRm]));
    t.push(op(&[0x66, 0x0f, 0x6f], "movdqa", Operation::Move, &[XmmReg, XmmRm]));
    t.push(op(&[0xf3, 0x0f, 0x6f], "movdqu", Operation::Move, &[XmmReg, XmmRm]));
    t.push(op(&[0x0f, 0x7f], "movq", Operation::Move, &[MmxRm, MmxReg]));
    t.push(op(&[0x66, 0x0f, 0x7f], "movdqa", Operation::Move, &[XmmRm, XmmReg]));

    t
}
