use crate::{
    breakpoint::BreakpointList,
    events::{Event, ListenerId, Listeners, StepInfo},
    parse::parse_value,
    registers::{record, TracedRegisters, WriteTrace},
    DebuggerError,
};
use r3000_core::{
    decomp::{register::GeneralPurpose, Mnemonic, ParsedInstruction},
    registers::{Registers, TRACKED_REGISTER_COUNT},
    Action, Cpu, ExecutionContext, Injector, Memory, MemoryView, Signal, BOOT_ADDRESS,
};
use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

const RA: usize = GeneralPurpose::Ra as usize;

/// Why `run` handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `hits` is the breakpoint's hit count including this one.
    Breakpoint { address: u32, hits: u32 },
    Exception { pc: u32 },
    /// The CPU was asked to stop.
    Halted { pc: u32 },
}

/// Compiles the debugger's bookkeeping into every translated instruction.
struct DebugInjector {
    breakpoints: Rc<RefCell<BreakpointList>>,
}

impl Injector for DebugInjector {
    fn inject_before_instruction(
        &self,
        address: u32,
        instruction: Option<&ParsedInstruction>,
    ) -> Vec<Action> {
        let mut actions = vec![Action::SyncPc];
        if self.breakpoints.borrow().has_enabled(address) {
            actions.push(Action::CheckBreakpoint);
        }

        match instruction {
            Some(instr) if instr.is_call() => actions.push(Action::EnterFunction {
                call_site: address,
            }),
            Some(instr) if instr.is_return() => actions.push(Action::LeaveFunction),
            _ => {}
        }
        actions
    }
}

/// Everything compiled code reports back into.
struct Session {
    pc: u32,
    stack: Vec<u32>,
    breakpoints: Rc<RefCell<BreakpointList>>,
    last_hit: Option<u32>,
    trace: WriteTrace,
    listeners: Listeners,
}

impl Session {
    /// Moving the PC anywhere disarms the breakpoint execution last stopped at.
    fn set_pc(&mut self, pc: u32) {
        if let Some(address) = self.last_hit.take() {
            self.breakpoints.borrow_mut().set_skip_once(address, false);
        }
        self.pc = pc;
    }

    fn emit(&mut self, event: Event) {
        let info = StepInfo {
            event,
            pc: self.pc,
            depth: self.stack.len(),
        };
        self.listeners.emit(info);
    }
}

impl ExecutionContext for Session {
    fn sync_pc(&mut self, address: u32) {
        self.pc = address;
    }

    fn hit_breakpoint(&mut self, address: u32) -> Result<(), Signal> {
        self.breakpoints.borrow_mut().hit(address)
    }

    fn enter_function(&mut self, call_site: u32) {
        // Calls return past their delay slot.
        self.stack.push(call_site.wrapping_add(8));
        self.emit(Event::SteppedInto);
    }

    fn leave_function(&mut self) {
        self.stack.pop();
        self.emit(Event::SteppedOut);
    }

    fn write_gpr(&mut self, registers: &mut Registers, index: usize, value: u32) {
        record(&mut self.trace, self.pc, registers, index, value);
    }
}

/// Drives a [`Cpu`] one instruction, one call or one breakpoint at a time.
pub struct Debugger {
    cpu: Cpu,
    session: Session,
}

impl Debugger {
    pub fn new(cpu: Cpu) -> Self {
        Self {
            cpu,
            session: Session {
                pc: BOOT_ADDRESS,
                stack: Vec::new(),
                breakpoints: Rc::new(RefCell::new(BreakpointList::new())),
                last_hit: None,
                trace: [0; TRACKED_REGISTER_COUNT],
                listeners: Listeners::default(),
            },
        }
    }

    pub const fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub const fn pc(&self) -> u32 {
        self.session.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.session.set_pc(pc);
    }

    /// Expected return addresses, innermost last.
    pub fn call_stack(&self) -> &[u32] {
        &self.session.stack
    }

    pub const fn last_hit(&self) -> Option<u32> {
        self.session.last_hit
    }

    pub fn breakpoints(&self) -> Ref<'_, BreakpointList> {
        self.session.breakpoints.borrow()
    }

    pub fn write_trace(&self) -> &WriteTrace {
        &self.session.trace
    }

    pub fn add_listener(
        &mut self,
        event: Event,
        listener: impl FnMut(&StepInfo) + 'static,
    ) -> ListenerId {
        self.session.listeners.add(event, Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.session.listeners.remove(id)
    }

    /// Resets the CPU onto `memory` and starts a fresh session at `pc`.
    pub fn reset(&mut self, pc: u32, memory: MemoryView) {
        self.session.set_pc(pc);
        self.session.stack = vec![pc];
        self.cpu.reset(memory);
        self.session.breakpoints.borrow_mut().reset_hits();
        self.session.trace = [0; TRACKED_REGISTER_COUNT];
        self.cpu.set_injector(Some(Box::new(DebugInjector {
            breakpoints: Rc::clone(&self.session.breakpoints),
        })));

        self.session.emit(Event::Stepped);
        self.session.emit(Event::SteppedInto);
    }

    pub fn registers(&mut self) -> TracedRegisters<'_> {
        TracedRegisters {
            registers: self.cpu.registers_mut(),
            trace: &mut self.session.trace,
            pc: self.session.pc,
        }
    }

    pub fn gpr(&self, index: usize) -> Result<String, DebuggerError> {
        let value = self
            .cpu
            .registers()
            .gpr(index)
            .ok_or(DebuggerError::InvalidRegister { index })?;
        Ok(format!("0x{value:08x}"))
    }

    pub fn set_gpr(&mut self, index: usize, value: &str) -> Result<(), DebuggerError> {
        self.registers().set_str(index, value)
    }

    pub fn cop0(&self, index: usize) -> Result<String, DebuggerError> {
        let value = self
            .cpu
            .registers()
            .cop0(index)
            .ok_or(DebuggerError::InvalidRegister { index })?;
        Ok(format!("0x{value:08x}"))
    }

    /// Goes through the same path as `mtc0`, so toggling cache isolation swaps the memory view.
    pub fn set_cop0(&mut self, index: usize, value: &str) -> Result<(), DebuggerError> {
        if self.cpu.registers().cop0(index).is_none() {
            return Err(DebuggerError::InvalidRegister { index });
        }
        let value = parse_value(value)?;
        self.cpu.write_cop0(index, value);
        Ok(())
    }

    /// Returns false if a breakpoint already existed at `address`.
    pub fn set_breakpoint(&mut self, address: u32) -> bool {
        let inserted = self.session.breakpoints.borrow_mut().set(address);
        self.cpu.invalidate(address);
        inserted
    }

    pub fn remove_breakpoint(&mut self, address: u32) -> bool {
        let removed = self.session.breakpoints.borrow_mut().remove(address);
        if removed.is_some() {
            if self.session.last_hit == Some(address) {
                self.session.last_hit = None;
            }
            self.cpu.invalidate(address);
        }
        removed.is_some()
    }

    pub fn enable_breakpoint(&mut self, address: u32) -> bool {
        let found = self.session.breakpoints.borrow_mut().enable(address);
        self.cpu.invalidate(address);
        found
    }

    pub fn disable_breakpoint(&mut self, address: u32) -> bool {
        let found = self.session.breakpoints.borrow_mut().disable(address);
        self.cpu.invalidate(address);
        found
    }

    pub fn disassemble(&self, address: u32) -> Result<String, DebuggerError> {
        let raw = self.cpu.read_instruction(address)?;
        Ok(match ParsedInstruction::new(raw) {
            Some(instr) => instr.disassemble(address),
            None => format!(".word   {raw:#010x}"),
        })
    }

    /// Reads through the active memory view, so an isolated cache is visible.
    pub fn read_memory(&self, address: u32, buf: &mut [u8]) -> Result<(), DebuggerError> {
        let memory = self.attached_memory()?;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = memory.read_u8(address.wrapping_add(i as u32))?;
        }
        Ok(())
    }

    /// Writes through the active memory view and drops translations of the patched code.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), DebuggerError> {
        let memory = self
            .cpu
            .memory_mut()
            .ok_or(DebuggerError::Core(r3000_core::CoreError::Detached))?;
        for (i, byte) in data.iter().enumerate() {
            memory.write_u8(address.wrapping_add(i as u32), *byte)?;
        }
        let first_word = address & !3;
        for offset in (0..data.len() as u32 + (address & 3)).step_by(4) {
            self.cpu.invalidate(first_word.wrapping_add(offset));
        }
        Ok(())
    }

    fn attached_memory(&self) -> Result<&MemoryView, DebuggerError> {
        self.cpu
            .memory()
            .ok_or(DebuggerError::Core(r3000_core::CoreError::Detached))
    }

    fn instruction_at_pc(&self) -> Option<ParsedInstruction> {
        let raw = self.cpu.read_instruction(self.session.pc).ok()?;
        ParsedInstruction::new(raw)
    }

    fn call_at_pc(&self) -> Option<ParsedInstruction> {
        self.instruction_at_pc().filter(ParsedInstruction::is_call)
    }

    /// Executes one instruction. A `jr` is emulated here, only its delay slot goes through the CPU.
    pub fn step_over(&mut self) -> Result<(), DebuggerError> {
        self.attached_memory()?;
        let pc = self.session.pc;

        match self.instruction_at_pc() {
            Some(instr) if instr.mnemonic() == Mnemonic::Jr => {
                let source = instr.rs() as usize;
                let target = self.cpu.registers().gpr(source).unwrap_or_default();
                if let Err(signal) = self.cpu.execute_one(pc.wrapping_add(4), &mut self.session) {
                    self.handle_signal(signal);
                    return Ok(());
                }

                self.session.set_pc(target);
                if source == RA {
                    self.session.stack.pop();
                    self.session.emit(Event::SteppedOut);
                }
            }

            _ => match self.cpu.execute_one(pc, &mut self.session) {
                Ok(next) => self.session.set_pc(next),
                Err(signal) => {
                    self.handle_signal(signal);
                    return Ok(());
                }
            },
        }

        self.session.emit(Event::Stepped);
        Ok(())
    }

    /// Whether the instruction at the PC is a `jal` or `jalr`.
    pub fn can_step_into(&self) -> bool {
        self.call_at_pc().is_some()
    }

    /// Enters the call at the PC. Returns false, changing nothing, if there is none.
    pub fn step_into(&mut self) -> bool {
        let Some(instr) = self.call_at_pc() else {
            return false;
        };

        let pc = self.session.pc;
        let return_address = pc.wrapping_add(8);
        let (target, link) = if instr.mnemonic() == Mnemonic::Jal {
            (instr.try_resolve_static_jump(pc).unwrap_or_default(), RA)
        } else {
            let target = self.cpu.registers().gpr(instr.rs() as usize);
            (target.unwrap_or_default(), instr.rd() as usize)
        };

        self.session.stack.push(return_address);
        if let Err(signal) = self.cpu.execute_one(pc.wrapping_add(4), &mut self.session) {
            self.session.stack.pop();
            self.handle_signal(signal);
            return true;
        }

        if link != 0 {
            record(
                &mut self.session.trace,
                pc,
                self.cpu.registers_mut(),
                link,
                return_address,
            );
        }
        self.session.set_pc(target);
        self.session.emit(Event::SteppedInto);
        self.session.emit(Event::Stepped);
        true
    }

    /// Runs until the current routine returns. The shadow stack is popped by the return itself.
    pub fn step_out(&mut self) -> Result<(), DebuggerError> {
        self.attached_memory()?;
        match self.cpu.execute(self.session.pc, &mut self.session) {
            Ok(returned) => {
                self.session.set_pc(returned);
                self.session.emit(Event::Stepped);
            }
            Err(signal) => {
                self.handle_signal(signal);
            }
        }
        Ok(())
    }

    /// Runs until `address` is reached, through a temporary breakpoint that is always removed again.
    pub fn run_until(&mut self, address: u32) -> Result<StopReason, DebuggerError> {
        self.set_breakpoint(address);
        let result = self.run();
        self.remove_breakpoint(address);
        result
    }

    /// Keeps executing until a breakpoint, an exception or a stop request interrupts it.
    pub fn run(&mut self) -> Result<StopReason, DebuggerError> {
        self.attached_memory()?;
        loop {
            match self.cpu.execute(self.session.pc, &mut self.session) {
                Ok(_) => {
                    let ra = self.cpu.registers()[GeneralPurpose::Ra];
                    self.session.set_pc(ra);
                }
                Err(signal) => return Ok(self.handle_signal(signal)),
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) -> StopReason {
        let diagnostics = Rc::clone(self.cpu.core().diagnostics());
        match signal {
            Signal::Breakpoint { address } => {
                self.session.set_pc(address);
                let hits = {
                    let mut breakpoints = self.session.breakpoints.borrow_mut();
                    breakpoints.set_skip_once(address, true);
                    breakpoints.get(address).map_or(0, |bp| bp.hits())
                };
                self.session.last_hit = Some(address);

                diagnostics.info(format_args!("stopped at {address:#010x}"));
                self.session.emit(Event::Stepped);
                StopReason::Breakpoint { address, hits }
            }

            Signal::Exception(err) => {
                match err.cause() {
                    Some(cause) => diagnostics.error(format_args!("{cause}")),
                    None => diagnostics.error(format_args!("{}", err.message())),
                }
                self.session.set_pc(err.pc());
                self.session.emit(Event::Stepped);
                StopReason::Exception { pc: err.pc() }
            }

            Signal::Stopped { pc } => {
                diagnostics.warn(format_args!("execution stopped before {pc:#010x}"));
                self.session.set_pc(pc);
                StopReason::Halted { pc }
            }
        }
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("pc", &format_args!("{:#010x}", self.session.pc))
            .field("stack", &self.session.stack)
            .field("last_hit", &self.session.last_hit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r3000_core::{Ram, RecordingSink};

    const BASE: u32 = 0x8001_0000;

    fn debugger(words: &[u32]) -> (Debugger, Rc<RecordingSink>) {
        let sink = Rc::new(RecordingSink::new());
        let mut debugger = Debugger::new(Cpu::with_diagnostics(sink.clone()));
        debugger.reset(BASE, MemoryView::new(Ram::new()));
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        debugger.write_memory(BASE, &bytes).unwrap();
        (debugger, sink)
    }

    #[test]
    fn injector_requests() {
        let breakpoints = Rc::new(RefCell::new(BreakpointList::new()));
        breakpoints.borrow_mut().set(0x10);
        let injector = DebugInjector {
            breakpoints: Rc::clone(&breakpoints),
        };

        let jal = ParsedInstruction::new(0x0C00_0010).unwrap();
        assert_eq!(
            injector.inject_before_instruction(0x10, Some(&jal)),
            vec![
                Action::SyncPc,
                Action::CheckBreakpoint,
                Action::EnterFunction { call_site: 0x10 }
            ]
        );

        let jr_ra = ParsedInstruction::new(0x03E0_0008).unwrap();
        assert_eq!(
            injector.inject_before_instruction(0x14, Some(&jr_ra)),
            vec![Action::SyncPc, Action::LeaveFunction]
        );

        breakpoints.borrow_mut().disable(0x10);
        assert_eq!(
            injector.inject_before_instruction(0x10, None),
            vec![Action::SyncPc]
        );
    }

    #[test]
    fn exceptions_land_on_the_faulting_instruction() {
        let (mut debugger, sink) = debugger(&[
            0x2408_0001, // addiu t0, zero, 1
            0x0000_000C, // syscall
        ]);

        let reason = debugger.run().unwrap();
        assert_eq!(reason, StopReason::Exception { pc: BASE + 4 });
        assert_eq!(debugger.pc(), BASE + 4);
        assert!(sink.contains("syscall"));
    }

    #[test]
    fn breakpoints_resume_past_themselves() {
        let (mut debugger, sink) = debugger(&[
            0x2508_0001, // addiu t0, t0, 1
            0x1000_FFFE, // b -2
            0x0000_0000, // nop
        ]);

        debugger.set_breakpoint(BASE);
        assert_eq!(
            debugger.run().unwrap(),
            StopReason::Breakpoint {
                address: BASE,
                hits: 1
            }
        );
        assert_eq!(debugger.last_hit(), Some(BASE));
        assert!(sink.contains("stopped at 0x80010000"));
        assert_eq!(debugger.cpu().registers()[GeneralPurpose::T0], 0);

        // Resuming skips the breakpoint once, the loop comes back around to it.
        assert_eq!(
            debugger.run().unwrap(),
            StopReason::Breakpoint {
                address: BASE,
                hits: 2
            }
        );
        assert_eq!(debugger.cpu().registers()[GeneralPurpose::T0], 1);
    }

    #[test]
    fn moving_the_pc_disarms_skip_once() {
        let (mut debugger, _) = debugger(&[0x0000_0000, 0x0000_0000]);
        debugger.set_breakpoint(BASE);
        debugger.run().unwrap();
        assert!(debugger.breakpoints().get(BASE).unwrap().skips_once());

        debugger.set_pc(BASE);
        assert!(!debugger.breakpoints().get(BASE).unwrap().skips_once());
        assert_eq!(debugger.last_hit(), None);
    }

    #[test]
    fn set_cop0_swaps_the_memory_view() {
        let (mut debugger, _) = debugger(&[]);
        debugger.set_cop0(12, "0x10000").unwrap();
        assert!(debugger.cpu().memory().unwrap().is_isolated());
        assert_eq!(debugger.cop0(12).unwrap(), "0x00010000");
        assert_eq!(debugger.gpr(12).unwrap(), "0x00000000");

        debugger.set_cop0(12, "0").unwrap();
        assert!(!debugger.cpu().memory().unwrap().is_isolated());
        assert!(matches!(
            debugger.set_cop0(16, "0"),
            Err(DebuggerError::InvalidRegister { index: 16 })
        ));
    }

    #[test]
    fn disassembly() {
        let (debugger, _) = debugger(&[0x03E0_0008, 0xFFFF_FFFF]);
        assert_eq!(debugger.disassemble(BASE).unwrap(), "jr      ra");
        assert_eq!(debugger.disassemble(BASE + 4).unwrap(), ".word   0xffffffff");
        assert!(debugger.disassemble(BASE + 2).is_err());
    }

    #[test]
    fn stepping_requires_memory() {
        let mut debugger = Debugger::new(Cpu::new());
        assert!(matches!(
            debugger.step_over(),
            Err(DebuggerError::Core(r3000_core::CoreError::Detached))
        ));
        assert!(debugger.run().is_err());
        assert!(!debugger.can_step_into());
        assert!(!debugger.step_into());
    }
}
