//! Instruction decoding and register definitions for the MIPS R3000A, as found in the PlayStation.

use strum::{Display, EnumCount, EnumIter, FromRepr};

pub mod instruction;
mod pattern;
pub mod register;

pub use crate::{
    instruction::{Mnemonic, ParsedInstruction},
    pattern::Operand,
};

pub const INSTRUCTION_SIZE: u32 = 4;

/// The exceptions the R3000A can raise. Except for `Reset` the discriminant is the `ExcCode`
/// stored in the CP0 Cause register, see table 3-7 of the LSI LR33300 manual.
#[derive(Display, EnumCount, EnumIter, FromRepr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Exception {
    #[strum(serialize = "interrupt")]
    Interrupt = 0,
    #[strum(serialize = "TLB modified")]
    TlbModified = 1,
    #[strum(serialize = "TLB miss on load")]
    TlbLoadMiss = 2,
    #[strum(serialize = "TLB miss on store")]
    TlbStoreMiss = 3,
    #[strum(serialize = "address error on load")]
    AddressLoadError = 4,
    #[strum(serialize = "address error on store")]
    AddressStoreError = 5,
    #[strum(serialize = "bus error on instruction fetch")]
    InstructionBusError = 6,
    #[strum(serialize = "bus error on data access")]
    DataBusError = 7,
    #[strum(serialize = "syscall")]
    Syscall = 8,
    #[strum(serialize = "breakpoint")]
    Breakpoint = 9,
    #[strum(serialize = "reserved instruction")]
    ReservedInstruction = 10,
    #[strum(serialize = "coprocessor unusable")]
    CoprocessorUnusable = 11,
    #[strum(serialize = "arithmetic overflow")]
    Overflow = 12,
    /// Not a real `ExcCode`, reset has its own vector and never touches Cause.
    #[strum(serialize = "reset")]
    Reset = 0xFF,
}

impl Exception {
    /// The value written to the `ExcCode` field of the Cause register, if any.
    pub const fn code(self) -> Option<u8> {
        match self {
            Self::Reset => None,
            _ => Some(self as u8),
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_repr(code).filter(|e| *e != Self::Reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn exception_codes() {
        assert_eq!(Exception::Reset.code(), None);
        assert_eq!(Exception::Interrupt.code(), Some(0));
        assert_eq!(Exception::Overflow.code(), Some(12));
        assert_eq!(Exception::from_code(8), Some(Exception::Syscall));
        assert_eq!(Exception::from_code(0xFF), None);
        assert_eq!(Exception::from_code(13), None);

        for exception in Exception::iter().filter(|e| *e != Exception::Reset) {
            let code = exception.code().unwrap();
            assert_eq!(Exception::from_code(code), Some(exception));
        }
        assert_eq!(Exception::COUNT, 14);
    }
}
