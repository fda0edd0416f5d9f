//! Lowers decoded instructions into closures over [`Core`].
//!
//! Loads take effect immediately, the load delay slot is not emulated.

use super::{CompiledOp, Flow, JumpKind};
use crate::{
    cpu::Core,
    exception::{ExecutionException, Signal},
};
use r3000_decomp::{
    register::{Cp0, GeneralPurpose},
    Exception, Mnemonic, Operand, ParsedInstruction, INSTRUCTION_SIZE,
};

const RA: usize = GeneralPurpose::Ra as usize;

type Binary = fn(u32, u32) -> u32;
type Checked = fn(i32, i32) -> Option<i32>;
type Condition = fn(u32, u32) -> bool;

fn raise(exception: Exception, pc: u32) -> Signal {
    ExecutionException::architectural(exception, pc).into()
}

fn operand(instr: &ParsedInstruction, op: Operand) -> usize {
    instr.get(op).unwrap_or_default() as usize
}

pub(super) fn lower(instr: Option<&ParsedInstruction>, pc: u32) -> CompiledOp {
    let Some(instr) = instr else {
        return Box::new(move |_, _| Err(raise(Exception::ReservedInstruction, pc)));
    };

    let rs = operand(instr, Operand::Source);
    let rt = operand(instr, Operand::Target);
    let rd = operand(instr, Operand::Destination);
    let sa = instr.get(Operand::Shift).unwrap_or_default();
    let imm = instr.get(Operand::Immediate).unwrap_or_default();
    let simm = imm as u16 as i16 as i32 as u32;
    let offset = instr.get(Operand::Offset).unwrap_or_default() as u16 as i16 as i32 as u32;
    let base = operand(instr, Operand::Base);
    let link = pc.wrapping_add(2 * INSTRUCTION_SIZE);
    let target = instr.try_resolve_static_jump(pc).unwrap_or_default();

    match instr.mnemonic() {
        Mnemonic::Add => checked(rd, rs, Source::Register(rt), i32::checked_add, pc),
        Mnemonic::Addi => checked(rt, rs, Source::Immediate(simm), i32::checked_add, pc),
        Mnemonic::Sub => checked(rd, rs, Source::Register(rt), i32::checked_sub, pc),
        Mnemonic::Addu => binary(rd, rs, Source::Register(rt), u32::wrapping_add),
        Mnemonic::Addiu => binary(rt, rs, Source::Immediate(simm), u32::wrapping_add),
        Mnemonic::Subu => binary(rd, rs, Source::Register(rt), u32::wrapping_sub),
        Mnemonic::And => binary(rd, rs, Source::Register(rt), |a, b| a & b),
        Mnemonic::Andi => binary(rt, rs, Source::Immediate(imm), |a, b| a & b),
        Mnemonic::Or => binary(rd, rs, Source::Register(rt), |a, b| a | b),
        Mnemonic::Ori => binary(rt, rs, Source::Immediate(imm), |a, b| a | b),
        Mnemonic::Xor => binary(rd, rs, Source::Register(rt), |a, b| a ^ b),
        Mnemonic::Xori => binary(rt, rs, Source::Immediate(imm), |a, b| a ^ b),
        Mnemonic::Nor => binary(rd, rs, Source::Register(rt), |a, b| !(a | b)),
        Mnemonic::Slt => binary(rd, rs, Source::Register(rt), |a, b| {
            ((a as i32) < (b as i32)) as u32
        }),
        Mnemonic::Slti => binary(rt, rs, Source::Immediate(simm), |a, b| {
            ((a as i32) < (b as i32)) as u32
        }),
        Mnemonic::Sltu => binary(rd, rs, Source::Register(rt), |a, b| (a < b) as u32),
        // The immediate is sign extended, then compared unsigned.
        Mnemonic::Sltiu => binary(rt, rs, Source::Immediate(simm), |a, b| (a < b) as u32),
        Mnemonic::Lui => binary(rt, 0, Source::Immediate(imm << 16), |_, b| b),

        Mnemonic::Sll => binary(rd, rt, Source::Immediate(sa), |a, b| a << b),
        Mnemonic::Srl => binary(rd, rt, Source::Immediate(sa), |a, b| a >> b),
        Mnemonic::Sra => binary(rd, rt, Source::Immediate(sa), |a, b| ((a as i32) >> b) as u32),
        Mnemonic::Sllv => binary(rd, rt, Source::Register(rs), |a, b| a << (b & 0x1F)),
        Mnemonic::Srlv => binary(rd, rt, Source::Register(rs), |a, b| a >> (b & 0x1F)),
        Mnemonic::Srav => binary(rd, rt, Source::Register(rs), |a, b| {
            ((a as i32) >> (b & 0x1F)) as u32
        }),

        Mnemonic::Mult => Box::new(move |core, ctx| {
            let product = (core.gpr(rs) as i32 as i64) * (core.gpr(rt) as i32 as i64);
            core.set_hi_lo(ctx, (product >> 32) as u32, product as u32);
            Ok(Flow::Continue)
        }),
        Mnemonic::Multu => Box::new(move |core, ctx| {
            let product = (core.gpr(rs) as u64) * (core.gpr(rt) as u64);
            core.set_hi_lo(ctx, (product >> 32) as u32, product as u32);
            Ok(Flow::Continue)
        }),
        Mnemonic::Div => Box::new(move |core, ctx| {
            let (n, d) = (core.gpr(rs) as i32, core.gpr(rt) as i32);
            let (hi, lo) = match (n, d) {
                // Division by zero does not trap, it produces garbage the BIOS relies on.
                (n, 0) if n >= 0 => (n as u32, u32::MAX),
                (n, 0) => (n as u32, 1),
                (i32::MIN, -1) => (0, i32::MIN as u32),
                (n, d) => ((n % d) as u32, (n / d) as u32),
            };
            core.set_hi_lo(ctx, hi, lo);
            Ok(Flow::Continue)
        }),
        Mnemonic::Divu => Box::new(move |core, ctx| {
            let (n, d) = (core.gpr(rs), core.gpr(rt));
            let (hi, lo) = match d {
                0 => (n, u32::MAX),
                d => (n % d, n / d),
            };
            core.set_hi_lo(ctx, hi, lo);
            Ok(Flow::Continue)
        }),
        Mnemonic::Mfhi => move_from(rd, 32),
        Mnemonic::Mflo => move_from(rd, 33),
        Mnemonic::Mthi => move_to(rs, 32),
        Mnemonic::Mtlo => move_to(rs, 33),

        Mnemonic::Lb => load(rt, base, offset, pc, 1, |core, address, pc, _| {
            Ok(core.read_u8(address, pc)? as i8 as i32 as u32)
        }),
        Mnemonic::Lbu => load(rt, base, offset, pc, 1, |core, address, pc, _| {
            Ok(core.read_u8(address, pc)? as u32)
        }),
        Mnemonic::Lh => load(rt, base, offset, pc, 2, |core, address, pc, _| {
            Ok(core.read_u16(address, pc)? as i16 as i32 as u32)
        }),
        Mnemonic::Lhu => load(rt, base, offset, pc, 2, |core, address, pc, _| {
            Ok(core.read_u16(address, pc)? as u32)
        }),
        Mnemonic::Lw => load(rt, base, offset, pc, 4, |core, address, pc, _| {
            core.read_u32(address, pc)
        }),
        Mnemonic::Lwl => load(rt, base, offset, pc, 1, |core, address, pc, current| {
            let word = core.read_u32(address & !3, pc)?;
            Ok(match address & 3 {
                0 => (current & 0x00FF_FFFF) | (word << 24),
                1 => (current & 0x0000_FFFF) | (word << 16),
                2 => (current & 0x0000_00FF) | (word << 8),
                _ => word,
            })
        }),
        Mnemonic::Lwr => load(rt, base, offset, pc, 1, |core, address, pc, current| {
            let word = core.read_u32(address & !3, pc)?;
            Ok(match address & 3 {
                0 => word,
                1 => (current & 0xFF00_0000) | (word >> 8),
                2 => (current & 0xFFFF_0000) | (word >> 16),
                _ => (current & 0xFFFF_FF00) | (word >> 24),
            })
        }),
        Mnemonic::Lwc2 => Box::new(move |core, _| {
            let address = effective_address(core, base, offset, 4, Exception::AddressLoadError, pc)?;
            let value = core.read_u32(address, pc)?;
            core.set_cop2_data(rt, value);
            Ok(Flow::Continue)
        }),

        Mnemonic::Sb => store(rt, base, offset, pc, 1, |core, address, value, pc| {
            core.write_u8(address, value as u8, pc)
        }),
        Mnemonic::Sh => store(rt, base, offset, pc, 2, |core, address, value, pc| {
            core.write_u16(address, value as u16, pc)
        }),
        Mnemonic::Sw => store(rt, base, offset, pc, 4, |core, address, value, pc| {
            core.write_u32(address, value, pc)
        }),
        Mnemonic::Swl => store(rt, base, offset, pc, 1, |core, address, value, pc| {
            let aligned = address & !3;
            let word = core.read_u32(aligned, pc)?;
            let merged = match address & 3 {
                0 => (word & 0xFFFF_FF00) | (value >> 24),
                1 => (word & 0xFFFF_0000) | (value >> 16),
                2 => (word & 0xFF00_0000) | (value >> 8),
                _ => value,
            };
            core.write_u32(aligned, merged, pc)
        }),
        Mnemonic::Swr => store(rt, base, offset, pc, 1, |core, address, value, pc| {
            let aligned = address & !3;
            let word = core.read_u32(aligned, pc)?;
            let merged = match address & 3 {
                0 => value,
                1 => (word & 0x0000_00FF) | (value << 8),
                2 => (word & 0x0000_FFFF) | (value << 16),
                _ => (word & 0x00FF_FFFF) | (value << 24),
            };
            core.write_u32(aligned, merged, pc)
        }),
        Mnemonic::Swc2 => Box::new(move |core, _| {
            let address =
                effective_address(core, base, offset, 4, Exception::AddressStoreError, pc)?;
            let value = core.registers().cop2_data(rt).unwrap_or_default();
            core.write_u32(address, value, pc)?;
            Ok(Flow::Continue)
        }),

        Mnemonic::Beq => branch(rs, rt, target, None, |a, b| a == b),
        Mnemonic::Bne => branch(rs, rt, target, None, |a, b| a != b),
        Mnemonic::Bgtz => branch(rs, 0, target, None, |a, _| (a as i32) > 0),
        Mnemonic::Blez => branch(rs, 0, target, None, |a, _| (a as i32) <= 0),
        Mnemonic::Bgez => branch(rs, 0, target, None, |a, _| (a as i32) >= 0),
        Mnemonic::Bltz => branch(rs, 0, target, None, |a, _| (a as i32) < 0),
        Mnemonic::Bgezal => branch(rs, 0, target, Some(link), |a, _| (a as i32) >= 0),
        Mnemonic::Bltzal => branch(rs, 0, target, Some(link), |a, _| (a as i32) < 0),

        Mnemonic::J => Box::new(move |_, _| {
            Ok(Flow::Jump {
                target,
                kind: JumpKind::Plain,
            })
        }),
        Mnemonic::Jal => Box::new(move |core, ctx| {
            core.set_gpr(ctx, RA, link);
            Ok(Flow::Jump {
                target,
                kind: JumpKind::Call,
            })
        }),
        Mnemonic::Jr => {
            let kind = if rs == RA {
                JumpKind::Return
            } else {
                JumpKind::Plain
            };
            Box::new(move |core, _| {
                Ok(Flow::Jump {
                    target: core.gpr(rs),
                    kind,
                })
            })
        }
        Mnemonic::Jalr => Box::new(move |core, ctx| {
            // Read before linking, `jalr ra, ra` jumps to the old value.
            let target = core.gpr(rs);
            core.set_gpr(ctx, rd, link);
            Ok(Flow::Jump {
                target,
                kind: JumpKind::Call,
            })
        }),

        Mnemonic::Syscall => Box::new(move |_, _| Err(raise(Exception::Syscall, pc))),
        Mnemonic::Break => Box::new(move |_, _| Err(raise(Exception::Breakpoint, pc))),

        Mnemonic::Mfc0 => Box::new(move |core, ctx| {
            let value = core.registers().cop0(rd).unwrap_or_default();
            core.set_gpr(ctx, rt, value);
            Ok(Flow::Continue)
        }),
        Mnemonic::Mtc0 => Box::new(move |core, _| {
            let value = core.gpr(rt);
            core.write_cop0(rd, value);
            Ok(Flow::Continue)
        }),
        Mnemonic::Rfe => Box::new(|core, _| {
            let status = core.registers().status().return_from_exception();
            core.write_cop0(Cp0::Sr.to_repr(), status.raw());
            Ok(Flow::Continue)
        }),

        Mnemonic::Mfc2 => Box::new(move |core, ctx| {
            let value = core.registers().cop2_data(rd).unwrap_or_default();
            core.set_gpr(ctx, rt, value);
            Ok(Flow::Continue)
        }),
        Mnemonic::Cfc2 => Box::new(move |core, ctx| {
            let value = core.registers().cop2_control(rd).unwrap_or_default();
            core.set_gpr(ctx, rt, value);
            Ok(Flow::Continue)
        }),
        Mnemonic::Mtc2 => Box::new(move |core, _| {
            let value = core.gpr(rt);
            core.set_cop2_data(rd, value);
            Ok(Flow::Continue)
        }),
        Mnemonic::Ctc2 => Box::new(move |core, _| {
            let value = core.gpr(rt);
            core.set_cop2_control(rd, value);
            Ok(Flow::Continue)
        }),
        // The GTE itself is not emulated.
        Mnemonic::Cop2 => Box::new(|_, _| Ok(Flow::Continue)),
    }
}

#[derive(Clone, Copy)]
enum Source {
    Register(usize),
    Immediate(u32),
}

impl Source {
    fn value(self, core: &Core) -> u32 {
        match self {
            Self::Register(index) => core.gpr(index),
            Self::Immediate(value) => value,
        }
    }
}

fn binary(dest: usize, lhs: usize, rhs: Source, op: Binary) -> CompiledOp {
    Box::new(move |core, ctx| {
        let value = op(core.gpr(lhs), rhs.value(core));
        core.set_gpr(ctx, dest, value);
        Ok(Flow::Continue)
    })
}

/// Trapping arithmetic: on overflow the destination is left untouched.
fn checked(dest: usize, lhs: usize, rhs: Source, op: Checked, pc: u32) -> CompiledOp {
    Box::new(move |core, ctx| {
        let value = op(core.gpr(lhs) as i32, rhs.value(core) as i32)
            .ok_or_else(|| raise(Exception::Overflow, pc))?;
        core.set_gpr(ctx, dest, value as u32);
        Ok(Flow::Continue)
    })
}

fn move_from(dest: usize, special: usize) -> CompiledOp {
    Box::new(move |core, ctx| {
        let value = core.gpr(special);
        core.set_gpr(ctx, dest, value);
        Ok(Flow::Continue)
    })
}

fn move_to(source: usize, special: usize) -> CompiledOp {
    Box::new(move |core, ctx| {
        let value = core.gpr(source);
        core.set_gpr(ctx, special, value);
        Ok(Flow::Continue)
    })
}

fn effective_address(
    core: &Core,
    base: usize,
    offset: u32,
    alignment: u32,
    misaligned: Exception,
    pc: u32,
) -> Result<u32, Signal> {
    let address = core.gpr(base).wrapping_add(offset);
    if address % alignment != 0 {
        return Err(raise(misaligned, pc));
    }
    Ok(address)
}

/// The access function gets the core, the effective address, the PC and the current target value.
fn load(
    dest: usize,
    base: usize,
    offset: u32,
    pc: u32,
    alignment: u32,
    access: fn(&Core, u32, u32, u32) -> Result<u32, Signal>,
) -> CompiledOp {
    Box::new(move |core, ctx| {
        let address =
            effective_address(core, base, offset, alignment, Exception::AddressLoadError, pc)?;
        let value = access(core, address, pc, core.gpr(dest))?;
        core.set_gpr(ctx, dest, value);
        Ok(Flow::Continue)
    })
}

fn store(
    source: usize,
    base: usize,
    offset: u32,
    pc: u32,
    alignment: u32,
    access: fn(&mut Core, u32, u32, u32) -> Result<(), Signal>,
) -> CompiledOp {
    Box::new(move |core, _| {
        let address =
            effective_address(core, base, offset, alignment, Exception::AddressStoreError, pc)?;
        let value = core.gpr(source);
        access(core, address, value, pc)?;
        Ok(Flow::Continue)
    })
}

/// Conditional branches. Linking variants write the return address whether or not the branch is taken.
fn branch(
    lhs: usize,
    rhs: usize,
    target: u32,
    link: Option<u32>,
    condition: Condition,
) -> CompiledOp {
    Box::new(move |core, ctx| {
        let taken = condition(core.gpr(lhs), core.gpr(rhs));
        if let Some(link) = link {
            core.set_gpr(ctx, RA, link);
        }

        if !taken {
            return Ok(Flow::Continue);
        }
        let kind = if link.is_some() {
            JumpKind::Call
        } else {
            JumpKind::Plain
        };
        Ok(Flow::Jump { target, kind })
    })
}
