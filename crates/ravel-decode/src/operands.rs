//! Operand decoding: ModR/M, SIB, displacements, immediates.

use ravel_core::{Immediate, Instruction, MemoryRef, Operand, Register};
use ravel_image::ByteSequence;

use crate::{Context, DecodeError, OpcodeSyntax, OperandKind};

/// Decoded ModR/M byte.
#[derive(Debug, Clone, Copy)]
struct ModRm {
    reg: u8,
    rm_is_register: bool,
    rm_reg: u8,
    base: Option<u8>,
    index: Option<u8>,
    scale: u8,
    displacement: i64,
}

/// Parses the ModR/M byte and, where required, the SIB byte and
/// displacement. 32-bit addressing forms only; the `67` prefix selects
/// 16-bit forms the decoder does not implement.
fn parse_modrm(seq: &mut ByteSequence<'_>, ctx: &Context) -> Result<ModRm, DecodeError> {
    if ctx.address_size() != 32 {
        return Err(DecodeError::unsupported(
            ctx.virtual_address(),
            "16-bit addressing",
        ));
    }

    let byte = seq.read_u8()?;
    let mod_ = (byte >> 6) & 0x3;
    let reg = (byte >> 3) & 0x7;
    let rm = byte & 0x7;

    if mod_ == 0b11 {
        return Ok(ModRm {
            reg,
            rm_is_register: true,
            rm_reg: rm,
            base: None,
            index: None,
            scale: 1,
            displacement: 0,
        });
    }

    let mut base = None;
    let mut index = None;
    let mut scale = 1;
    let mut displacement = 0i64;
    let mut disp32 = mod_ == 0b10;

    if rm == 0b100 {
        let sib = seq.read_u8()?;
        let sib_index = (sib >> 3) & 0x7;
        let sib_base = sib & 0x7;
        if sib_index != 0b100 {
            index = Some(sib_index);
            scale = 1 << (sib >> 6);
        }
        if sib_base == 0b101 && mod_ == 0b00 {
            disp32 = true;
        } else {
            base = Some(sib_base);
        }
    } else if rm == 0b101 && mod_ == 0b00 {
        disp32 = true;
    } else {
        base = Some(rm);
    }

    if disp32 {
        displacement = seq.read_u32()? as i32 as i64;
    } else if mod_ == 0b01 {
        displacement = seq.read_u8()? as i8 as i64;
    }

    Ok(ModRm {
        reg,
        rm_is_register: false,
        rm_reg: 0,
        base,
        index,
        scale,
        displacement,
    })
}

fn segment_register(ctx: &Context) -> Option<Register> {
    ctx.segment_override()
        .map(|seg| Register::segment(seg.number()))
}

/// Materializes the r/m side of the ModR/M byte for a given register
/// constructor and access width.
fn rm_operand(
    modrm: &ModRm,
    ctx: &Context,
    access_bytes: u8,
    make_reg: impl Fn(u8) -> Register,
) -> Operand {
    if modrm.rm_is_register {
        return Operand::Register(make_reg(modrm.rm_reg));
    }
    let mut mem = MemoryRef {
        base: modrm.base.map(|id| Register::gpr(id, 32)),
        index: modrm.index.map(|id| Register::gpr(id, 32)),
        scale: modrm.scale,
        displacement: modrm.displacement,
        size: access_bytes,
        segment: None,
    };
    if let Some(seg) = segment_register(ctx) {
        mem = mem.with_segment(seg);
    }
    Operand::Memory(mem)
}

fn read_imm_v(seq: &mut ByteSequence<'_>, ctx: &Context) -> Result<Immediate, DecodeError> {
    Ok(match ctx.operand_size() {
        16 => Immediate {
            value: seq.read_u16()? as i64,
            size: 16,
        },
        _ => Immediate {
            value: seq.read_u32()? as i64,
            size: 32,
        },
    })
}

fn moffs_operand(
    seq: &mut ByteSequence<'_>,
    ctx: &Context,
    access_bytes: u8,
) -> Result<Operand, DecodeError> {
    let addr = seq.read_u32()? as i64;
    let mut mem = MemoryRef::absolute(addr, access_bytes);
    if let Some(seg) = segment_register(ctx) {
        mem = mem.with_segment(seg);
    }
    Ok(Operand::Memory(mem))
}

/// Decodes the operands of a selected syntax and assembles the final
/// instruction. The sequence is positioned just past the opcode bytes;
/// the context carries the prefix state and the instruction start.
pub(crate) fn decode_instruction(
    syntax: &OpcodeSyntax,
    seq: &mut ByteSequence<'_>,
    ctx: &Context,
) -> Result<Instruction, DecodeError> {
    let needs_modrm =
        syntax.is_extended() || syntax.operands().iter().any(|kind| kind.uses_modrm());
    let modrm = if needs_modrm {
        Some(parse_modrm(seq, ctx)?)
    } else {
        None
    };

    let opsize = ctx.operand_size();
    let opreg = ctx.last_decoded().unwrap_or(0) & 0x7;

    let mut operands = Vec::with_capacity(syntax.operands().len());
    for &kind in syntax.operands() {
        let operand = match kind {
            OperandKind::Rm => {
                let m = modrm_ref(&modrm, ctx)?;
                rm_operand(m, ctx, (opsize / 8) as u8, |id| Register::gpr(id, opsize))
            }
            OperandKind::Rm8 => {
                let m = modrm_ref(&modrm, ctx)?;
                rm_operand(m, ctx, 1, |id| Register::gpr(id, 8))
            }
            OperandKind::Rm16 => {
                let m = modrm_ref(&modrm, ctx)?;
                rm_operand(m, ctx, 2, |id| Register::gpr(id, 16))
            }
            OperandKind::MmxRm => {
                let m = modrm_ref(&modrm, ctx)?;
                rm_operand(m, ctx, 8, Register::mmx)
            }
            OperandKind::XmmRm => {
                let m = modrm_ref(&modrm, ctx)?;
                rm_operand(m, ctx, 16, Register::xmm)
            }
            OperandKind::Reg => {
                Operand::Register(Register::gpr(modrm_ref(&modrm, ctx)?.reg, opsize))
            }
            OperandKind::Reg8 => Operand::Register(Register::gpr(modrm_ref(&modrm, ctx)?.reg, 8)),
            OperandKind::MmxReg => Operand::Register(Register::mmx(modrm_ref(&modrm, ctx)?.reg)),
            OperandKind::XmmReg => Operand::Register(Register::xmm(modrm_ref(&modrm, ctx)?.reg)),
            OperandKind::OpcodeReg => Operand::Register(Register::gpr(opreg, opsize)),
            OperandKind::OpcodeReg8 => Operand::Register(Register::gpr(opreg, 8)),
            OperandKind::Al => Operand::Register(Register::gpr(0, 8)),
            OperandKind::EAx => Operand::Register(Register::gpr(0, opsize)),
            OperandKind::Cl => Operand::Register(Register::gpr(1, 8)),
            OperandKind::Imm8 => Operand::imm(seq.read_u8()? as i64, 8),
            OperandKind::Imm8Signed => {
                let value = seq.read_u8()? as i8 as i64;
                Operand::Immediate(Immediate {
                    value,
                    size: opsize as u8,
                })
            }
            OperandKind::Imm16 => Operand::imm(seq.read_u16()? as i64, 16),
            OperandKind::ImmV => Operand::Immediate(read_imm_v(seq, ctx)?),
            OperandKind::Rel8 => {
                let offset = seq.read_u8()? as i8 as i64;
                Operand::Relative { offset, target: 0 }
            }
            OperandKind::RelV => {
                let offset = match ctx.operand_size() {
                    16 => seq.read_u16()? as i16 as i64,
                    _ => seq.read_u32()? as i32 as i64,
                };
                Operand::Relative { offset, target: 0 }
            }
            OperandKind::Moffs8 => moffs_operand(seq, ctx, 1)?,
            OperandKind::MoffsV => moffs_operand(seq, ctx, (opsize / 8) as u8)?,
            OperandKind::Const1 => Operand::imm(1, 8),
        };
        operands.push(operand);
    }

    let size = (seq.position() - ctx.file_offset()) as usize;
    let address = ctx.virtual_address();

    // Relative targets resolve against the end of the instruction,
    // which is only known once every operand byte is consumed.
    for operand in &mut operands {
        if let Operand::Relative { offset, target } = operand {
            *target = address
                .wrapping_add(size as u64)
                .wrapping_add(*offset as u64);
        }
    }

    Ok(Instruction {
        address,
        size,
        bytes: seq.bytes_from(ctx.file_offset()).to_vec(),
        mnemonic: syntax.mnemonic(),
        operation: syntax.operation(),
        operands,
        lock: ctx.lock(),
        rep: ctx.rep(),
        repne: ctx.repne(),
    })
}

fn modrm_ref<'a>(modrm: &'a Option<ModRm>, ctx: &Context) -> Result<&'a ModRm, DecodeError> {
    modrm.as_ref().ok_or_else(|| {
        DecodeError::invalid_encoding(ctx.virtual_address(), "operand requires ModR/M")
    })
}
