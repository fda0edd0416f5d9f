//! An interactive debugger for the R3000A recompiler: stepping, breakpoints, a shadow call stack
//! and a per-register write trace. Optionally exposed over the GDB remote serial protocol.

mod breakpoint;
mod debugger;
mod events;
pub mod gdb;
mod parse;
mod registers;

pub use crate::{
    breakpoint::{Breakpoint, BreakpointList},
    debugger::{Debugger, StopReason},
    events::{Event, Listener, ListenerId, StepInfo},
    parse::{parse_value, ParseValueError},
    registers::{TracedRegisters, WriteTrace},
};

use r3000_core::{CoreError, MemoryError};

#[derive(Debug, thiserror::Error)]
pub enum DebuggerError {
    #[error("register index {index} is out of range")]
    InvalidRegister { index: usize },
    #[error(transparent)]
    Parse(#[from] ParseValueError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
