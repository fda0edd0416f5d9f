use crate::{
    diagnostics::{LogSink, SharedDiagnostics},
    exception::{ExecutionException, Signal},
    memory::{Memory, MemoryError, MemoryView},
    recompiler::{ExecutionContext, Injector, Recompiler},
    registers::{Registers, HI, LO},
};
use r3000_decomp::register::{cp0::Status, Cp0};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Where the BIOS starts executing after a reset.
pub const BOOT_ADDRESS: u32 = 0xBFC0_0000;

/// Number of ticks between two heartbeat messages.
pub const CLOCK_THRESHOLD: u32 = 2_000_000;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no memory view is attached, reset the CPU first")]
    Detached,
    #[error("misaligned instruction address {address:#010x}")]
    Misaligned { address: u32 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Lets another thread ask a running CPU to stop at the next block boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Architectural state, everything compiled code operates on.
pub struct Core {
    registers: Registers,
    memory: Option<MemoryView>,
    stopped: StopHandle,
    ticks: u32,
    diagnostics: SharedDiagnostics,
    /// Addresses stored to since the recompiler last looked, so stale translations can be dropped.
    written: Vec<u32>,
}

impl Core {
    fn new(diagnostics: SharedDiagnostics) -> Self {
        Self {
            registers: Registers::default(),
            memory: None,
            stopped: StopHandle::default(),
            ticks: 0,
            diagnostics,
            written: Vec::new(),
        }
    }

    pub const fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub const fn memory(&self) -> Option<&MemoryView> {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> Option<&mut MemoryView> {
        self.memory.as_mut()
    }

    pub fn diagnostics(&self) -> &SharedDiagnostics {
        &self.diagnostics
    }

    pub const fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_stopped()
    }

    /// Stores a COP0 register. Toggling the isolate cache bit of the status register swaps the active memory view.
    pub fn write_cop0(&mut self, index: usize, value: u32) {
        let Some(old) = self.registers.cop0(index) else {
            self.diagnostics.warn(format_args!(
                "ignoring write of {value:#x} to nonexistent cop0 register {index}"
            ));
            return;
        };

        self.registers.set_cop0(index, value);
        self.diagnostics.debug(format_args!(
            "writing {value:#x} to {}",
            Cp0::name_from_index(index)
        ));

        if index == Cp0::Sr.to_repr() {
            let was_isolated = Status::new(old).isolate_cache();
            let isolated = Status::new(value).isolate_cache();
            if was_isolated != isolated {
                let diagnostics = &self.diagnostics;
                self.memory = self.memory.take().map(|view| {
                    if isolated {
                        // A fresh cache view has no sink yet.
                        let mut view = view.isolate();
                        view.set_diagnostics(diagnostics.clone());
                        view
                    } else {
                        view.unisolate()
                    }
                });
            }
        }
    }

    /// Raises the stopped flag and builds an exception without an underlying cause.
    pub fn panic(&self, message: impl Into<String>, pc: u32) -> ExecutionException {
        self.stopped.stop();
        ExecutionException::new(message, pc, None)
    }

    /// A coarse heartbeat, not a timing model.
    pub fn clock(&mut self, ticks: u32) {
        self.ticks = self.ticks.saturating_add(ticks);
        if self.ticks >= CLOCK_THRESHOLD {
            self.diagnostics
                .info(format_args!("{CLOCK_THRESHOLD} ticks elapsed"));
            self.ticks = 0;
        }
    }

    /*
        Helpers for compiled code.
    */

    /// `r0` always reads as zero, whatever the host stored in its slot.
    pub(crate) fn gpr(&self, index: usize) -> u32 {
        match index {
            0 => 0,
            _ => self.registers.gpr(index).unwrap_or_default(),
        }
    }

    /// Writes to `r0` are discarded here, storage itself does not enforce it.
    pub(crate) fn set_gpr(&mut self, ctx: &mut dyn ExecutionContext, index: usize, value: u32) {
        if index != 0 {
            ctx.write_gpr(&mut self.registers, index, value);
        }
    }

    pub(crate) fn set_hi_lo(&mut self, ctx: &mut dyn ExecutionContext, hi: u32, lo: u32) {
        ctx.write_gpr(&mut self.registers, HI, hi);
        ctx.write_gpr(&mut self.registers, LO, lo);
    }

    pub(crate) fn set_cop2_data(&mut self, index: usize, value: u32) {
        self.registers.set_cop2_data(index, value);
    }

    pub(crate) fn set_cop2_control(&mut self, index: usize, value: u32) {
        self.registers.set_cop2_control(index, value);
    }

    fn view(&self, pc: u32) -> Result<&MemoryView, Signal> {
        self.memory
            .as_ref()
            .ok_or_else(|| self.panic("no memory view attached", pc).into())
    }

    fn view_mut(&mut self, pc: u32) -> Result<&mut MemoryView, Signal> {
        match self.memory.as_mut() {
            Some(view) => Ok(view),
            None => {
                self.stopped.stop();
                Err(ExecutionException::new("no memory view attached", pc, None).into())
            }
        }
    }

    pub(crate) fn read_u8(&self, address: u32, pc: u32) -> Result<u8, Signal> {
        let view = self.view(pc)?;
        view.read_u8(address)
            .map_err(|err| ExecutionException::memory(err, pc).into())
    }

    pub(crate) fn read_u16(&self, address: u32, pc: u32) -> Result<u16, Signal> {
        let view = self.view(pc)?;
        view.read_u16(address)
            .map_err(|err| ExecutionException::memory(err, pc).into())
    }

    pub(crate) fn read_u32(&self, address: u32, pc: u32) -> Result<u32, Signal> {
        let view = self.view(pc)?;
        view.read_u32(address)
            .map_err(|err| ExecutionException::memory(err, pc).into())
    }

    pub(crate) fn write_u8(&mut self, address: u32, value: u8, pc: u32) -> Result<(), Signal> {
        self.view_mut(pc)?
            .write_u8(address, value)
            .map_err(|err| ExecutionException::memory(err, pc))?;
        self.written.push(address);
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, address: u32, value: u16, pc: u32) -> Result<(), Signal> {
        self.view_mut(pc)?
            .write_u16(address, value)
            .map_err(|err| ExecutionException::memory(err, pc))?;
        self.written.push(address);
        Ok(())
    }

    pub(crate) fn write_u32(&mut self, address: u32, value: u32, pc: u32) -> Result<(), Signal> {
        self.view_mut(pc)?
            .write_u32(address, value)
            .map_err(|err| ExecutionException::memory(err, pc))?;
        self.written.push(address);
        Ok(())
    }

    pub(crate) fn take_written(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.written)
    }
}

/// The R3000A: architectural state plus the engine that runs guest code against it.
pub struct Cpu {
    core: Core,
    compiled: Recompiler,
}

impl Cpu {
    pub fn new() -> Self {
        Self::with_diagnostics(LogSink::shared("r3000"))
    }

    pub fn with_diagnostics(diagnostics: SharedDiagnostics) -> Self {
        Self {
            core: Core::new(diagnostics),
            compiled: Recompiler::new(),
        }
    }

    /// Installs `memory` and brings the CPU back to its power-on state, regardless of what ran before.
    pub fn reset(&mut self, mut memory: MemoryView) {
        memory.set_diagnostics(self.core.diagnostics.clone());
        memory.reset();

        let core = &mut self.core;
        core.memory = Some(memory);
        core.registers.reset();
        core.stopped.clear();
        core.ticks = 0;
        core.written.clear();
        self.compiled.clear();
    }

    pub const fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    pub const fn registers(&self) -> &Registers {
        self.core.registers()
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        self.core.registers_mut()
    }

    pub const fn memory(&self) -> Option<&MemoryView> {
        self.core.memory()
    }

    pub fn memory_mut(&mut self) -> Option<&mut MemoryView> {
        self.core.memory_mut()
    }

    pub fn write_cop0(&mut self, index: usize, value: u32) {
        self.core.write_cop0(index, value)
    }

    pub fn panic(&self, message: impl Into<String>, pc: u32) -> ExecutionException {
        self.core.panic(message, pc)
    }

    pub fn stop(&self) {
        self.core.stopped.stop()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.core.stopped.clone()
    }

    pub fn clock(&mut self, ticks: u32) {
        self.core.clock(ticks)
    }

    /// Replaces the diagnostics sink, for the memory view too.
    pub fn set_diagnostics(&mut self, diagnostics: SharedDiagnostics) {
        if let Some(memory) = self.core.memory.as_mut() {
            memory.set_diagnostics(diagnostics.clone());
        }
        self.core.diagnostics = diagnostics;
    }

    pub fn set_injector(&mut self, injector: Option<Box<dyn Injector>>) {
        self.compiled.set_injector(injector);
    }

    pub const fn recompiler(&self) -> &Recompiler {
        &self.compiled
    }

    /// Runs compiled code from `address` until the routine it starts returns, yielding the address it returned to.
    pub fn execute(&mut self, address: u32, ctx: &mut dyn ExecutionContext) -> Result<u32, Signal> {
        self.core.stopped.clear();
        self.compiled.invoke(&mut self.core, address, ctx)
    }

    /// Executes the instruction at `address`, together with its delay slot if it has one, and returns the next PC.
    pub fn execute_one(
        &mut self,
        address: u32,
        ctx: &mut dyn ExecutionContext,
    ) -> Result<u32, Signal> {
        self.compiled.execute_one(&mut self.core, address, ctx)
    }

    /// Drops every translation covering `address`.
    pub fn invalidate(&mut self, address: u32) {
        self.compiled.invalidate(address)
    }

    pub fn invalidate_all(&mut self) {
        self.compiled.clear()
    }

    /// Reads an instruction word from the memory underneath any cache view.
    pub fn read_instruction(&self, address: u32) -> Result<u32, CoreError> {
        if address % 4 != 0 {
            return Err(CoreError::Misaligned { address });
        }
        let memory = self.core.memory().ok_or(CoreError::Detached)?;
        Ok(memory.backing().read_u32(address)?)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
