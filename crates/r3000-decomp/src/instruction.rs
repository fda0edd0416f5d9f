use crate::{
    pattern::{InstructionPattern, Operand},
    register, INSTRUCTION_SIZE,
};
use std::fmt;
use strum::{EnumCount, VariantNames};

#[derive(EnumCount, VariantNames, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Mnemonic {
    Add,
    Addi,
    Addiu,
    Addu,
    And,
    Andi,
    Beq,
    Bgez,
    Bgezal,
    Bgtz,
    Blez,
    Bltz,
    Bltzal,
    Bne,
    Break,
    Cfc2,
    Cop2,
    Ctc2,
    Div,
    Divu,
    J,
    Jal,
    Jalr,
    Jr,
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lui,
    Lw,
    Lwc2,
    Lwl,
    Lwr,
    Mfc0,
    Mfc2,
    Mfhi,
    Mflo,
    Mtc0,
    Mtc2,
    Mthi,
    Mtlo,
    Mult,
    Multu,
    Nor,
    Or,
    Ori,
    Rfe,
    Sb,
    Sh,
    Sll,
    Sllv,
    Slt,
    Slti,
    Sltiu,
    Sltu,
    Sra,
    Srav,
    Srl,
    Srlv,
    Sub,
    Subu,
    Sw,
    Swc2,
    Swl,
    Swr,
    Syscall,
    Xor,
    Xori,
}

impl Mnemonic {
    pub const fn is_branch(&self) -> bool {
        matches!(
            self,
            Self::Beq
                | Self::Bgez
                | Self::Bgezal
                | Self::Bgtz
                | Self::Blez
                | Self::Bltz
                | Self::Bltzal
                | Self::Bne
        )
    }

    pub const fn is_jump(&self) -> bool {
        matches!(self, Self::J | Self::Jal | Self::Jalr | Self::Jr)
    }

    /// Jumps and branches, which always execute the following instruction before transferring control.
    pub const fn has_delay_slot(&self) -> bool {
        self.is_branch() || self.is_jump()
    }

    /// Whether the instruction unconditionally hands control to somewhere other than the next instruction.
    pub const fn ends_block(&self) -> bool {
        self.has_delay_slot() || matches!(self, Self::Syscall | Self::Break)
    }

    /// Call-style jumps, which are tracked as function entries.
    pub const fn is_call(&self) -> bool {
        matches!(self, Self::Jal | Self::Jalr)
    }

    /// Whether the instruction writes a return address into a register.
    pub const fn links(&self) -> bool {
        matches!(self, Self::Jal | Self::Jalr | Self::Bgezal | Self::Bltzal)
    }

    pub const fn is_load(&self) -> bool {
        matches!(
            self,
            Self::Lb | Self::Lbu | Self::Lh | Self::Lhu | Self::Lw | Self::Lwl | Self::Lwr | Self::Lwc2
        )
    }

    pub const fn is_store(&self) -> bool {
        matches!(
            self,
            Self::Sb | Self::Sh | Self::Sw | Self::Swl | Self::Swr | Self::Swc2
        )
    }

    const fn uses_cp0_destination(&self) -> bool {
        matches!(self, Self::Mfc0 | Self::Mtc0)
    }

    const fn uses_cp2_data_destination(&self) -> bool {
        matches!(self, Self::Mfc2 | Self::Mtc2)
    }

    const fn uses_cp2_control_destination(&self) -> bool {
        matches!(self, Self::Cfc2 | Self::Ctc2)
    }

    pub const fn name(&self) -> &'static str {
        Self::VARIANTS[*self as usize]
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Signed16,
    Unsigned16,
    Unsigned32,
}

impl Signedness {
    pub fn format(&self, num: u32) -> String {
        match self {
            Signedness::Signed16 => format!("{}", num as u16 as i16),
            Signedness::Unsigned16 => format!("{:#x}", num as u16),
            Signedness::Unsigned32 => format!("{:#x}", num),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pattern: InstructionPattern,
    mnemonic: Mnemonic,
    operands: &'static [(Operand, Signedness)],
}

impl Instruction {
    pub const fn new(
        mnemonic: Mnemonic,
        pattern: &str,
        operands: &'static [(Operand, Signedness)],
    ) -> Self {
        Self {
            pattern: InstructionPattern::new(pattern),
            mnemonic,
            operands,
        }
    }

    /// `delay_slot` is the address after the instruction, when known. Jump indices are then
    /// printed as the absolute target.
    fn format(&self, raw: u32, delay_slot: Option<u32>) -> String {
        if raw == 0 {
            // Pseudo instruction
            return "nop".to_string();
        }

        if self.operands.is_empty() {
            return self.mnemonic.name().to_string();
        }

        let mut result = format!("{: <8}", self.mnemonic.name());
        for (i, (op, sign)) in self.operands.iter().enumerate() {
            let num = self.pattern.get(*op, raw).unwrap_or_default();

            match op {
                Operand::Offset if self.mnemonic.is_load() || self.mnemonic.is_store() => {
                    let base = self.pattern.get(Operand::Base, raw).unwrap_or_default();
                    let base = register::GeneralPurpose::name_from_index(base as usize);
                    result.push_str(&format!("{}({base})", sign.format(num)));
                }

                // Printed as part of the offset above.
                Operand::Base => continue,

                Operand::Destination if self.mnemonic.uses_cp0_destination() => {
                    result.push_str(register::Cp0::name_from_index(num as usize));
                }

                Operand::Destination if self.mnemonic.uses_cp2_data_destination() => {
                    result.push_str(register::Cp2Data::name_from_index(num as usize));
                }

                Operand::Destination if self.mnemonic.uses_cp2_control_destination() => {
                    result.push_str(register::Cp2Control::name_from_index(num as usize));
                }

                Operand::Target if matches!(self.mnemonic, Mnemonic::Lwc2 | Mnemonic::Swc2) => {
                    result.push_str(register::Cp2Data::name_from_index(num as usize));
                }

                _ if op.is_register() => {
                    result.push_str(register::GeneralPurpose::name_from_index(num as usize));
                }

                Operand::JumpIndex => match delay_slot {
                    Some(slot) => {
                        result.push_str(&format!("{:#010x}", (slot & 0xF000_0000) | (num << 2)))
                    }
                    None => result.push_str(&sign.format(num)),
                },

                _ => result.push_str(&sign.format(num)),
            }

            let followed_by_base_only = self.operands[i + 1..]
                .iter()
                .all(|(next, _)| *next == Operand::Base);
            if !followed_by_base_only {
                result.push_str(", ");
            }
        }

        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    instr: &'static Instruction,
    raw: u32,
}

impl ParsedInstruction {
    pub const fn new(raw: u32) -> Option<Self> {
        if let Some(instr) = decode(raw) {
            Some(Self { instr, raw })
        } else {
            None
        }
    }

    pub const fn raw(&self) -> u32 {
        self.raw
    }

    pub const fn mnemonic(&self) -> Mnemonic {
        self.instr.mnemonic
    }

    pub const fn ends_block(&self) -> bool {
        self.instr.mnemonic.ends_block()
    }

    pub const fn has_delay_slot(&self) -> bool {
        self.instr.mnemonic.has_delay_slot()
    }

    pub const fn is_call(&self) -> bool {
        self.instr.mnemonic.is_call()
    }

    /// A `jr` through the return address register.
    pub const fn is_return(&self) -> bool {
        matches!(self.instr.mnemonic, Mnemonic::Jr)
            && matches!(
                self.instr.pattern.get(Operand::Source, self.raw),
                Some(r) if r == register::GeneralPurpose::Ra as u32
            )
    }

    pub const fn get(&self, op: Operand) -> Option<u32> {
        self.instr.pattern.get(op, self.raw)
    }

    /// Resolves the destination of jumps and branches whose target does not depend on register state.
    /// Branches jump relative to their delay slot, `j`/`jal` keep the upper bits of the delay slot address.
    pub const fn try_resolve_static_jump(&self, pc: u32) -> Option<u32> {
        let delay_slot = pc.wrapping_add(INSTRUCTION_SIZE);
        if self.instr.mnemonic.is_branch() {
            let Some(offset) = self.get(Operand::Offset) else {
                return None;
            };
            let offset = ((offset as u16 as i16 as i32) << 2) as u32;
            Some(delay_slot.wrapping_add(offset))
        } else if matches!(self.instr.mnemonic, Mnemonic::J | Mnemonic::Jal) {
            let Some(index) = self.get(Operand::JumpIndex) else {
                return None;
            };
            Some((delay_slot & 0xF000_0000) | (index << 2))
        } else {
            None
        }
    }

    /// Formats the instruction as it appears at `pc`, with `j`/`jal` targets resolved.
    pub fn disassemble(&self, pc: u32) -> String {
        self.instr
            .format(self.raw, Some(pc.wrapping_add(INSTRUCTION_SIZE)))
    }

    fn operand(&self, op: Operand, what: &str) -> u32 {
        self.get(op).unwrap_or_else(|| {
            panic!(
                "failed to get {what} for instruction {:?}",
                self.instr.mnemonic.name()
            )
        })
    }

    pub fn rs(&self) -> u32 {
        self.operand(Operand::Source, "source register")
    }

    pub fn rt(&self) -> u32 {
        self.operand(Operand::Target, "target register")
    }

    pub fn rd(&self) -> u32 {
        self.operand(Operand::Destination, "destination register")
    }

    pub fn sa(&self) -> u32 {
        self.operand(Operand::Shift, "shift amount")
    }

    pub fn immediate(&self) -> u32 {
        self.operand(Operand::Immediate, "immediate")
    }

    /// The immediate, sign extended to 32 bits.
    pub fn immediate_signed(&self) -> u32 {
        self.immediate() as u16 as i16 as i32 as u32
    }

    pub fn offset(&self) -> u32 {
        self.operand(Operand::Offset, "offset") as u16 as i16 as i32 as u32
    }

    pub fn base(&self) -> u32 {
        self.operand(Operand::Base, "base")
    }

    pub fn jump_index(&self) -> u32 {
        self.operand(Operand::JumpIndex, "jump index")
    }
}

impl TryFrom<u32> for ParsedInstruction {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(())
    }
}

impl fmt::Display for ParsedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instr.format(self.raw, None))
    }
}

const fn decode(instr_raw: u32) -> Option<&'static Instruction> {
    let mut i = 0;
    while i < INSTRUCTIONS.len() {
        let instr = &INSTRUCTIONS[i];
        if instr.pattern.matches(instr_raw) {
            return Some(instr);
        }
        i += 1;
    }
    None
}

macro_rules! operand {
    ($name:ident) => {
        (Operand::$name, Signedness::Unsigned32)
    };

    ($name:ident, $sign:ident) => {
        (Operand::$name, Signedness::$sign)
    };
}

macro_rules! instr {
    ($mnemonic:ident, $pattern:expr) => {
        Instruction::new(Mnemonic::$mnemonic, $pattern, &[])
    };

    ($mnemonic:ident, $pattern:expr, $($operands:tt)*) => {
        Instruction::new(Mnemonic::$mnemonic, $pattern, &[$(operand! $operands),*])
    };
}

/// The R3000A subset of MIPS I, plus the PlayStation's COP0 and GTE (COP2) encodings.
#[rustfmt::skip]
const INSTRUCTIONS: &[Instruction] = &[
    instr!(Add,     "0000 00ss ssst tttt dddd d000 0010 0000", (Destination)(Source)(Target)),
    instr!(Addi,    "0010 00ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Addiu,   "0010 01ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Addu,    "0000 00ss ssst tttt dddd d000 0010 0001", (Destination)(Source)(Target)),
    instr!(And,     "0000 00ss ssst tttt dddd d000 0010 0100", (Destination)(Source)(Target)),
    instr!(Andi,    "0011 00ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
    instr!(Beq,     "0001 00ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Bgez,    "0000 01ss sss0 0001 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgezal,  "0000 01ss sss1 0001 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgtz,    "0001 11ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Blez,    "0001 10ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltz,    "0000 01ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltzal,  "0000 01ss sss1 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bne,     "0001 01ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Break,   "0000 00cc cccc cccc cccc cccc cc00 1101"),
    instr!(Cfc2,    "0100 1000 010t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Cop2,    "0100 101g gggg gggg gggg gggg gggg gggg", (Command)),
    instr!(Ctc2,    "0100 1000 110t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Div,     "0000 00ss ssst tttt 0000 0000 0001 1010", (Source)(Target)),
    instr!(Divu,    "0000 00ss ssst tttt 0000 0000 0001 1011", (Source)(Target)),
    instr!(J,       "0000 10jj jjjj jjjj jjjj jjjj jjjj jjjj", (JumpIndex)),
    instr!(Jal,     "0000 11jj jjjj jjjj jjjj jjjj jjjj jjjj", (JumpIndex)),
    instr!(Jalr,    "0000 00ss sss0 0000 dddd d000 0000 1001", (Destination)(Source)),
    instr!(Jr,      "0000 00ss sss0 0000 0000 0000 0000 1000", (Source)),
    instr!(Lb,      "1000 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lbu,     "1001 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lh,      "1000 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lhu,     "1001 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lui,     "0011 1100 000t tttt kkkk kkkk kkkk kkkk", (Target)(Immediate, Unsigned16)),
    instr!(Lw,      "1000 11bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lwc2,    "1100 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lwl,     "1000 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lwr,     "1001 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Mfc0,    "0100 0000 000t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Mfc2,    "0100 1000 000t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Mfhi,    "0000 0000 0000 0000 dddd d000 0001 0000", (Destination)),
    instr!(Mflo,    "0000 0000 0000 0000 dddd d000 0001 0010", (Destination)),
    instr!(Mtc0,    "0100 0000 100t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Mtc2,    "0100 1000 100t tttt dddd d000 0000 0000", (Target)(Destination)),
    instr!(Mthi,    "0000 00ss sss0 0000 0000 0000 0001 0001", (Source)),
    instr!(Mtlo,    "0000 00ss sss0 0000 0000 0000 0001 0011", (Source)),
    instr!(Mult,    "0000 00ss ssst tttt 0000 0000 0001 1000", (Source)(Target)),
    instr!(Multu,   "0000 00ss ssst tttt 0000 0000 0001 1001", (Source)(Target)),
    instr!(Nor,     "0000 00ss ssst tttt dddd d000 0010 0111", (Destination)(Source)(Target)),
    instr!(Or,      "0000 00ss ssst tttt dddd d000 0010 0101", (Destination)(Source)(Target)),
    instr!(Ori,     "0011 01ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
    instr!(Rfe,     "0100 0010 0000 0000 0000 0000 0001 0000"),
    instr!(Sb,      "1010 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Sh,      "1010 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Sll,     "0000 0000 000t tttt dddd dhhh hh00 0000", (Destination)(Target)(Shift)),
    instr!(Sllv,    "0000 00ss ssst tttt dddd d000 0000 0100", (Destination)(Target)(Source)),
    instr!(Slt,     "0000 00ss ssst tttt dddd d000 0010 1010", (Destination)(Source)(Target)),
    instr!(Slti,    "0010 10ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Sltiu,   "0010 11ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Sltu,    "0000 00ss ssst tttt dddd d000 0010 1011", (Destination)(Source)(Target)),
    instr!(Sra,     "0000 0000 000t tttt dddd dhhh hh00 0011", (Destination)(Target)(Shift)),
    instr!(Srav,    "0000 00ss ssst tttt dddd d000 0000 0111", (Destination)(Target)(Source)),
    instr!(Srl,     "0000 0000 000t tttt dddd dhhh hh00 0010", (Destination)(Target)(Shift)),
    instr!(Srlv,    "0000 00ss ssst tttt dddd d000 0000 0110", (Destination)(Target)(Source)),
    instr!(Sub,     "0000 00ss ssst tttt dddd d000 0010 0010", (Destination)(Source)(Target)),
    instr!(Subu,    "0000 00ss ssst tttt dddd d000 0010 0011", (Destination)(Source)(Target)),
    instr!(Sw,      "1010 11bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Swc2,    "1110 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Swl,     "1010 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Swr,     "1011 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Syscall, "0000 00cc cccc cccc cccc cccc cc00 1100"),
    instr!(Xor,     "0000 00ss ssst tttt dddd d000 0010 0110", (Destination)(Source)(Target)),
    instr!(Xori,    "0011 10ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
];
