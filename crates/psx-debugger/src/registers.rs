use crate::{parse::parse_value, DebuggerError};
use r3000_core::registers::{Registers, TRACKED_REGISTER_COUNT};

/// The PC of the most recent write to every GPR, HI and LO.
pub type WriteTrace = [u32; TRACKED_REGISTER_COUNT];

/// Records the write in `trace`, then commits it. `r0` is hardwired, so its slot keeps zero.
pub(crate) fn record(
    trace: &mut WriteTrace,
    pc: u32,
    registers: &mut Registers,
    index: usize,
    value: u32,
) {
    if let Some(slot) = trace.get_mut(index) {
        *slot = pc;
    }
    registers.set_gpr(index, if index == 0 { 0 } else { value });
}

/// GPR access through the debugger. Writes are validated and land in the write trace.
pub struct TracedRegisters<'a> {
    pub(crate) registers: &'a mut Registers,
    pub(crate) trace: &'a mut WriteTrace,
    pub(crate) pc: u32,
}

impl TracedRegisters<'_> {
    fn check(index: usize) -> Result<(), DebuggerError> {
        if index < TRACKED_REGISTER_COUNT {
            Ok(())
        } else {
            Err(DebuggerError::InvalidRegister { index })
        }
    }

    /// `index` 32 and 33 address HI and LO.
    pub fn get(&self, index: usize) -> Result<u32, DebuggerError> {
        self.registers
            .gpr(index)
            .ok_or(DebuggerError::InvalidRegister { index })
    }

    pub fn set(&mut self, index: usize, value: u32) -> Result<(), DebuggerError> {
        Self::check(index)?;
        record(self.trace, self.pc, self.registers, index, value);
        Ok(())
    }

    /// Parses `value` first, an invalid value leaves the register alone.
    pub fn set_str(&mut self, index: usize, value: &str) -> Result<(), DebuggerError> {
        Self::check(index)?;
        let value = parse_value(value)?;
        self.set(index, value)
    }

    pub fn last_write(&self, index: usize) -> Option<u32> {
        self.trace.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_traced() {
        let mut registers = Registers::default();
        let mut trace = [0; TRACKED_REGISTER_COUNT];
        let mut traced = TracedRegisters {
            registers: &mut registers,
            trace: &mut trace,
            pc: 0x8001_0000,
        };

        traced.set(8, 5).unwrap();
        traced.set_str(33, "0b11").unwrap();
        assert_eq!(traced.get(8).unwrap(), 5);
        assert_eq!(traced.get(33).unwrap(), 3);
        assert_eq!(traced.last_write(8), Some(0x8001_0000));
        assert_eq!(traced.last_write(9), Some(0));
    }

    #[test]
    fn rejected_writes_change_nothing() {
        let mut registers = Registers::default();
        let mut trace = [0; TRACKED_REGISTER_COUNT];
        let mut traced = TracedRegisters {
            registers: &mut registers,
            trace: &mut trace,
            pc: 0x8001_0000,
        };

        traced.set(8, 5).unwrap();
        traced.pc = 0x8001_0004;
        assert!(matches!(
            traced.set_str(8, "five"),
            Err(DebuggerError::Parse(_))
        ));
        assert!(matches!(
            traced.set(34, 1),
            Err(DebuggerError::InvalidRegister { index: 34 })
        ));
        assert_eq!(traced.get(8).unwrap(), 5);
        assert_eq!(traced.last_write(8), Some(0x8001_0000));
    }
}
