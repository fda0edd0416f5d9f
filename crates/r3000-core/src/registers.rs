//! The architectural register file.

use r3000_decomp::register::{self, cp0};
use std::fmt;

pub const GPR_BASE: usize = 0;
pub const HI: usize = register::GeneralPurpose::count();
pub const LO: usize = HI + 1;
pub const COP0_BASE: usize = LO + 1;
pub const COP2_DATA_BASE: usize = COP0_BASE + register::Cp0::count();
pub const COP2_CONTROL_BASE: usize = COP2_DATA_BASE + register::Cp2Data::count();
pub const REGISTER_FILE_SIZE: usize = COP2_CONTROL_BASE + register::Cp2Control::count();

/// Number of slots addressable through the general purpose accessors: the GPRs followed by HI and LO.
pub const TRACKED_REGISTER_COUNT: usize = LO + 1;

/// One contiguous block holding every register, laid out as GPRs, HI, LO, COP0, COP2 data, COP2 control.
/// Values are stored unsigned; signedness is applied where an instruction needs it.
#[derive(Clone, PartialEq, Eq)]
pub struct Registers {
    slots: Box<[u32; REGISTER_FILE_SIZE]>,
}

impl Registers {
    /// Zeroes everything, then applies the values the hardware holds after a reset.
    pub fn reset(&mut self) {
        self.slots.fill(0);
        self[register::Cp0::Sr] = cp0::Status::RESET;
        self[register::Cp0::Prid] = cp0::PROCESSOR_ID;
    }

    /// Reads a GPR, or HI/LO for index 32/33.
    pub fn gpr(&self, index: usize) -> Option<u32> {
        (index < TRACKED_REGISTER_COUNT).then(|| self.slots[GPR_BASE + index])
    }

    /// Stores into a GPR (or HI/LO) without any of the architectural rules, `r0` included.
    pub fn set_gpr(&mut self, index: usize, value: u32) -> Option<()> {
        let slot = self.slots[GPR_BASE..TRACKED_REGISTER_COUNT].get_mut(index)?;
        *slot = value;
        Some(())
    }

    pub fn cop0(&self, index: usize) -> Option<u32> {
        self.bank(COP0_BASE, register::Cp0::count()).get(index).copied()
    }

    pub fn cop2_data(&self, index: usize) -> Option<u32> {
        self.bank(COP2_DATA_BASE, register::Cp2Data::count()).get(index).copied()
    }

    pub fn cop2_control(&self, index: usize) -> Option<u32> {
        self.bank(COP2_CONTROL_BASE, register::Cp2Control::count())
            .get(index)
            .copied()
    }

    pub(crate) fn set_cop0(&mut self, index: usize, value: u32) {
        self.slots[COP0_BASE + index] = value;
    }

    pub(crate) fn set_cop2_data(&mut self, index: usize, value: u32) {
        self.slots[COP2_DATA_BASE + index] = value;
    }

    pub(crate) fn set_cop2_control(&mut self, index: usize, value: u32) {
        self.slots[COP2_CONTROL_BASE + index] = value;
    }

    pub fn status(&self) -> cp0::Status {
        cp0::Status::new(self[register::Cp0::Sr])
    }

    /// The whole register file, in storage order.
    pub fn as_slice(&self) -> &[u32] {
        &self.slots[..]
    }

    fn bank(&self, base: usize, len: usize) -> &[u32] {
        &self.slots[base..base + len]
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            slots: Box::new([0; REGISTER_FILE_SIZE]),
        }
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\ngeneral registers:")?;
        for reg in register::GeneralPurpose::iter() {
            writeln!(f, "{: <9} = {:#010x}", reg.name(), self[reg])?;
        }

        writeln!(f, "\nspecial registers:")?;
        for reg in register::Special::iter() {
            writeln!(f, "{: <9} = {:#010x}", reg.name(), self[reg])?;
        }

        writeln!(f, "\ncoprocessor 0 registers:")?;
        for reg in register::Cp0::iter() {
            writeln!(f, "{: <9} = {:#010x}", reg.name(), self[reg])?;
        }

        Ok(())
    }
}

macro_rules! impl_index {
    ($(($name:ident, $base:expr)),*) => {
        $(
            impl ::std::ops::Index<register::$name> for Registers {
                type Output = u32;

                fn index(&self, reg: register::$name) -> &Self::Output {
                    &self.slots[$base + reg.to_repr()]
                }
            }

            impl ::std::ops::IndexMut<register::$name> for Registers {
                fn index_mut(&mut self, reg: register::$name) -> &mut Self::Output {
                    &mut self.slots[$base + reg.to_repr()]
                }
            }
        )*
    };
}

impl_index!(
    (GeneralPurpose, GPR_BASE),
    (Special, HI),
    (Cp0, COP0_BASE),
    (Cp2Data, COP2_DATA_BASE),
    (Cp2Control, COP2_CONTROL_BASE)
);

#[cfg(test)]
mod tests {
    use super::*;
    use r3000_decomp::register::{Cp0, Cp2Control, GeneralPurpose, Special};

    #[test]
    fn layout() {
        assert_eq!(HI, 32);
        assert_eq!(LO, 33);
        assert_eq!(COP0_BASE, 34);
        assert_eq!(COP2_DATA_BASE, 50);
        assert_eq!(COP2_CONTROL_BASE, 82);
        assert_eq!(REGISTER_FILE_SIZE, 114);
    }

    #[test]
    fn reset_sets_boot_values() {
        let mut regs = Registers::default();
        regs[GeneralPurpose::Sp] = 0x801F_FF00;
        regs[Special::Lo] = 7;
        regs[Cp2Control::Flag] = 0xFFFF_FFFF;
        regs[Cp0::Cause] = 0x20;
        regs.reset();

        assert_eq!(regs[GeneralPurpose::Sp], 0);
        assert_eq!(regs[Special::Lo], 0);
        assert_eq!(regs[Cp2Control::Flag], 0);
        assert_eq!(regs[Cp0::Cause], 0);
        assert_eq!(regs[Cp0::Sr], 0x0040_0002);
        assert_eq!(regs[Cp0::Prid], 0x0000_0230);
    }

    #[test]
    fn gpr_accessors_cover_hi_and_lo() {
        let mut regs = Registers::default();
        assert_eq!(regs.set_gpr(33, 5), Some(()));
        assert_eq!(regs[Special::Lo], 5);
        assert_eq!(regs.gpr(33), Some(5));
        assert_eq!(regs.gpr(34), None);
        assert_eq!(regs.set_gpr(34, 1), None);
        assert_eq!(regs.cop0(12), Some(0));
        assert_eq!(regs.cop0(16), None);
    }
}
