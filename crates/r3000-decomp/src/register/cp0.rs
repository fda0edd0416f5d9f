//! Bitfields for the CP0 registers that carry side effects.

use crate::Exception;
use tartan_bitfield::bitfield;

bitfield! {
    /// The format of the CP0 register Status (`sr`).
    pub struct Status(u32) {
        /// Interrupt enable, current.
        [0] pub interrupt_enable,
        /// User mode when set, current.
        [1] pub user_mode,
        [2] pub previous_interrupt_enable,
        [3] pub previous_user_mode,
        [4] pub old_interrupt_enable,
        [5] pub old_user_mode,
        /// Per-line interrupt mask.
        [8..=15] pub interrupt_mask: u8,
        /// When set, loads and stores only touch the data cache, never main memory.
        [16] pub isolate_cache,
        [17] pub swap_caches,
        [18] pub parity_zero,
        [19] pub cache_miss,
        [20] pub parity_error,
        [21] pub tlb_shutdown,
        /// Exceptions vector to the BIOS ROM instead of RAM.
        [22] pub boot_exception_vectors,
        [25] pub reverse_endian,
        [28] pub cop0_enable,
        [29] pub cop1_enable,
        [30] pub cop2_enable,
        [31] pub cop3_enable,
    }
}

impl Status {
    /// The value the hardware holds after a reset.
    pub const RESET: u32 = 0x0040_0002;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Pops the interrupt enable/user mode stack, which is what `rfe` does.
    pub const fn return_from_exception(self) -> Self {
        Self((self.0 & !0b1111) | ((self.0 >> 2) & 0b1111))
    }
}

bitfield! {
    /// The format of the CP0 register Cause.
    pub struct Cause(u32) {
        [2..=6] pub exception_code: u8,
        /// Pending interrupts, only the two software bits are writable.
        [8..=15] pub interrupt_pending: u8,
        /// The coprocessor referenced by a coprocessor unusable exception.
        [28..=29] pub coprocessor_error: u8,
        /// Whether the exception happened inside a branch delay slot.
        [31] pub branch_delay,
    }
}

impl Cause {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn exception(&self) -> Option<Exception> {
        Exception::from_code(self.exception_code())
    }
}

/// Processor revision reported in `prid` after reset.
pub const PROCESSOR_ID: u32 = 0x0000_0230;
