//! The MIPS R3000A as found in the PlayStation: register file, memory views and a block recompiler.

pub mod diagnostics;
pub mod exception;
pub mod memory;
pub mod recompiler;
pub mod registers;

mod cpu;

pub use crate::{
    cpu::{Core, CoreError, Cpu, StopHandle, BOOT_ADDRESS, CLOCK_THRESHOLD},
    diagnostics::{DiagnosticsSink, LogSink, RecordingSink, SharedDiagnostics},
    exception::{ExecutionException, Fault, Signal},
    memory::{CacheView, Memory, MemoryError, MemoryView, Ram},
    recompiler::{Action, ExecutionContext, Headless, Injector},
    registers::Registers,
};
pub use r3000_decomp as decomp;
