//! Translates guest code into chains of native closures, one block at a time.
//!
//! A block starts at the address it was entered from and runs until the first jump or branch has
//! executed its delay slot. Before every instruction an [`Injector`] may ask for extra work
//! (syncing the PC, checking breakpoints, tracking calls), which is baked into the translation.

use crate::{
    cpu::Core,
    exception::{ExecutionException, Fault, Signal},
    registers::Registers,
};
use r3000_decomp::{Exception, ParsedInstruction, INSTRUCTION_SIZE};
use std::{collections::BTreeMap, rc::Rc};

mod ops;

/// Upper bound on the number of instructions in a single translation.
pub const MAX_BLOCK_LEN: usize = 64;

// One extra slot, a block may end in a delay slot past the cap.
const MAX_BLOCK_BYTES: u32 = (MAX_BLOCK_LEN as u32 + 1) * INSTRUCTION_SIZE;

/// Extra work requested before an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Publish the address of the instruction about to execute.
    SyncPc,
    /// Stop if an enabled breakpoint sits on this instruction.
    CheckBreakpoint,
    /// A call is made from `call_site`.
    EnterFunction { call_site: u32 },
    /// The current routine returns.
    LeaveFunction,
}

/// Decides which [`Action`]s get compiled in before each instruction.
pub trait Injector {
    /// `instruction` is `None` for words that do not decode.
    fn inject_before_instruction(
        &self,
        address: u32,
        instruction: Option<&ParsedInstruction>,
    ) -> Vec<Action>;
}

/// The receiving end of injected actions, along with every general purpose register write.
pub trait ExecutionContext {
    fn sync_pc(&mut self, _address: u32) {}

    /// Returning an error leaves compiled code before the instruction at `address` runs.
    fn hit_breakpoint(&mut self, address: u32) -> Result<(), Signal> {
        Err(Signal::Breakpoint { address })
    }

    fn enter_function(&mut self, _call_site: u32) {}

    fn leave_function(&mut self) {}

    /// `index` covers the GPRs, HI (32) and LO (33). Writes to `r0` never arrive here.
    fn write_gpr(&mut self, registers: &mut Registers, index: usize, value: u32) {
        registers.set_gpr(index, value);
    }
}

/// A context that observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl ExecutionContext for Headless {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JumpKind {
    Plain,
    Call,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Taken once the delay slot has executed.
    Jump { target: u32, kind: JumpKind },
}

pub(crate) type CompiledOp =
    Box<dyn Fn(&mut Core, &mut dyn ExecutionContext) -> Result<Flow, Signal>>;

type Hook = Box<dyn Fn(&mut dyn ExecutionContext) -> Result<(), Signal>>;

struct Step {
    hooks: Vec<Hook>,
    op: CompiledOp,
}

struct Exit {
    target: u32,
    kind: JumpKind,
}

struct Block {
    start: u32,
    steps: Vec<Step>,
}

impl Block {
    fn len(&self) -> usize {
        self.steps.len()
    }

    fn end(&self) -> u32 {
        self.start
            .wrapping_add(self.steps.len() as u32 * INSTRUCTION_SIZE)
    }

    fn covers(&self, address: u32) -> bool {
        (self.start..self.end()).contains(&address)
    }

    fn run(&self, core: &mut Core, ctx: &mut dyn ExecutionContext) -> Result<Exit, Signal> {
        let mut pending = None;
        for step in &self.steps {
            for hook in &step.hooks {
                hook(ctx)?;
            }
            if let Flow::Jump { target, kind } = (step.op)(core, ctx)? {
                pending = Some(Exit { target, kind });
            }
        }

        Ok(pending.unwrap_or(Exit {
            target: self.end(),
            kind: JumpKind::Plain,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Cached, runs until control flow leaves it.
    Block,
    /// One instruction plus its delay slot, never cached. Breakpoints are not checked.
    Single,
}

fn lower_action(action: Action, address: u32) -> Hook {
    match action {
        Action::SyncPc => Box::new(move |ctx| {
            ctx.sync_pc(address);
            Ok(())
        }),
        Action::CheckBreakpoint => Box::new(move |ctx| ctx.hit_breakpoint(address)),
        Action::EnterFunction { call_site } => Box::new(move |ctx| {
            ctx.enter_function(call_site);
            Ok(())
        }),
        Action::LeaveFunction => Box::new(|ctx| {
            ctx.leave_function();
            Ok(())
        }),
    }
}

/// Segment aliases of an address, translations are keyed by the address they were entered at.
fn aliases(address: u32) -> [u32; 4] {
    if address >= 0xC000_0000 {
        return [address; 4];
    }
    let physical = address & 0x1FFF_FFFF;
    [
        address,
        physical,
        physical | 0x8000_0000,
        physical | 0xA000_0000,
    ]
}

/// Cache of translated blocks.
#[derive(Default)]
pub struct Recompiler {
    blocks: BTreeMap<u32, Rc<Block>>,
    injector: Option<Box<dyn Injector>>,
}

impl Recompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new injector. Existing translations were built for the old one and are dropped.
    pub fn set_injector(&mut self, injector: Option<Box<dyn Injector>>) {
        self.injector = injector;
        self.clear();
    }

    /// Number of cached translations.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_compiled(&self, address: u32) -> bool {
        self.blocks.contains_key(&address)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Drops every translation that covers `address`, through any segment.
    pub fn invalidate(&mut self, address: u32) {
        for alias in aliases(address) {
            let stale: Vec<u32> = self
                .blocks
                .range(alias.saturating_sub(MAX_BLOCK_BYTES)..=alias)
                .filter(|(_, block)| block.covers(alias))
                .map(|(start, _)| *start)
                .collect();
            for start in stale {
                self.blocks.remove(&start);
            }
        }
    }

    /// Runs from `address` until the routine it started in returns, following calls along the way.
    pub(crate) fn invoke(
        &mut self,
        core: &mut Core,
        address: u32,
        ctx: &mut dyn ExecutionContext,
    ) -> Result<u32, Signal> {
        let mut pc = address;
        let mut depth = 0usize;

        loop {
            if core.is_stopped() {
                return Err(Signal::Stopped { pc });
            }

            let block = self.block(core, pc)?;
            let result = block.run(core, ctx);
            self.flush_written(core);
            core.clock(block.len() as u32);

            let exit = result?;
            match exit.kind {
                JumpKind::Call => depth += 1,
                JumpKind::Return if depth == 0 => return Ok(exit.target),
                JumpKind::Return => depth -= 1,
                JumpKind::Plain => {}
            }
            pc = exit.target;
        }
    }

    /// Executes the instruction at `address`, and its delay slot. Returns the next PC.
    pub(crate) fn execute_one(
        &mut self,
        core: &mut Core,
        address: u32,
        ctx: &mut dyn ExecutionContext,
    ) -> Result<u32, Signal> {
        let block = self.translate(core, address, Mode::Single)?;
        let result = block.run(core, ctx);
        self.flush_written(core);
        core.clock(block.len() as u32);
        Ok(result?.target)
    }

    fn flush_written(&mut self, core: &mut Core) {
        for address in core.take_written() {
            self.invalidate(address);
        }
    }

    fn block(&mut self, core: &Core, address: u32) -> Result<Rc<Block>, Signal> {
        if let Some(block) = self.blocks.get(&address) {
            return Ok(Rc::clone(block));
        }

        let block = Rc::new(self.translate(core, address, Mode::Block)?);
        self.blocks.insert(address, Rc::clone(&block));
        Ok(block)
    }

    fn instrument(
        &self,
        address: u32,
        instruction: Option<&ParsedInstruction>,
        mode: Mode,
    ) -> Vec<Hook> {
        let Some(injector) = &self.injector else {
            return Vec::new();
        };

        injector
            .inject_before_instruction(address, instruction)
            .into_iter()
            .filter(|action| mode == Mode::Block || *action != Action::CheckBreakpoint)
            .map(|action| lower_action(action, address))
            .collect()
    }

    fn translate(&self, core: &Core, start: u32, mode: Mode) -> Result<Block, Signal> {
        let memory = core
            .memory()
            .ok_or_else(|| core.panic("no memory view attached", start))?;

        if start % INSTRUCTION_SIZE != 0 {
            return Err(ExecutionException::architectural(Exception::AddressLoadError, start).into());
        }

        let mut steps = Vec::new();
        let mut address = start;
        let mut in_delay_slot = false;

        loop {
            let raw = match memory.backing().read_u32(address) {
                Ok(raw) => raw,
                Err(err) if steps.is_empty() => {
                    return Err(ExecutionException::new(
                        format!("instruction fetch failed at {address:#010x}: {err}"),
                        address,
                        Some(Fault::Architectural(Exception::InstructionBusError)),
                    )
                    .into());
                }
                // Whatever got translated so far still runs, the fetch faults once it is reached.
                Err(_) => break,
            };

            let instruction = ParsedInstruction::new(raw);
            steps.push(Step {
                hooks: self.instrument(address, instruction.as_ref(), mode),
                op: ops::lower(instruction.as_ref(), address),
            });

            if in_delay_slot {
                break;
            }
            match &instruction {
                Some(instr) if instr.has_delay_slot() => in_delay_slot = true,
                Some(instr) if instr.ends_block() => break,
                None => break,
                Some(_) if mode == Mode::Single || steps.len() >= MAX_BLOCK_LEN => break,
                Some(_) => {}
            }
            address = address.wrapping_add(INSTRUCTION_SIZE);
        }

        Ok(Block { start, steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cpu::Cpu,
        memory::{Memory, MemoryView, Ram},
    };
    use r3000_decomp::register::GeneralPurpose;
    use std::cell::RefCell;

    const BASE: u32 = 0x8001_0000;

    fn cpu_with_program(words: &[u32]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.reset(MemoryView::new(Ram::new()));
        store(&mut cpu, BASE, words);
        cpu
    }

    fn store(cpu: &mut Cpu, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            cpu.memory_mut()
                .unwrap()
                .write_u32(address + i as u32 * 4, *word)
                .unwrap();
        }
    }

    /// Asks for everything the debugger would.
    struct Everything;

    impl Injector for Everything {
        fn inject_before_instruction(
            &self,
            address: u32,
            instruction: Option<&ParsedInstruction>,
        ) -> Vec<Action> {
            let mut actions = vec![Action::SyncPc, Action::CheckBreakpoint];
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

    #[derive(Default)]
    struct Recorder {
        synced: Vec<u32>,
        calls: Vec<u32>,
        returns: usize,
        breakpoint: Option<u32>,
        writes: RefCell<Vec<(usize, u32)>>,
    }

    impl ExecutionContext for Recorder {
        fn sync_pc(&mut self, address: u32) {
            self.synced.push(address);
        }

        fn hit_breakpoint(&mut self, address: u32) -> Result<(), Signal> {
            if self.breakpoint == Some(address) {
                Err(Signal::Breakpoint { address })
            } else {
                Ok(())
            }
        }

        fn enter_function(&mut self, call_site: u32) {
            self.calls.push(call_site);
        }

        fn leave_function(&mut self) {
            self.returns += 1;
        }

        fn write_gpr(&mut self, registers: &mut Registers, index: usize, value: u32) {
            self.writes.borrow_mut().push((index, value));
            registers.set_gpr(index, value);
        }
    }

    #[test]
    fn blocks_end_after_the_delay_slot() {
        let mut cpu = cpu_with_program(&[
            0x2408_0001, // addiu t0, zero, 1
            0x1000_0002, // b +2
            0x2409_0002, // addiu t1, zero, 2
            0x240A_0003, // addiu t2, zero, 3 (skipped)
            0x03E0_0008, // jr ra
            0x0000_0000, // nop
        ]);
        cpu.registers_mut()[GeneralPurpose::Ra] = 0x8001_0200;

        let returned = cpu.execute(BASE, &mut Headless).unwrap();
        assert_eq!(returned, 0x8001_0200);
        assert_eq!(cpu.registers()[GeneralPurpose::T0], 1);
        assert_eq!(cpu.registers()[GeneralPurpose::T1], 2);
        assert_eq!(cpu.registers()[GeneralPurpose::T2], 0);
        assert!(cpu.recompiler().is_compiled(BASE));
        assert!(cpu.recompiler().is_compiled(BASE + 0x10));
    }

    #[test]
    fn calls_are_followed_until_the_outer_return() {
        let mut cpu = cpu_with_program(&[
            0x03E0_8821, // addu s1, ra, zero
            0x0C00_4008, // jal 0x80010020
            0x0000_0000, // nop
            0x2408_0007, // addiu t0, zero, 7
            0x0220_F821, // addu ra, s1, zero
            0x03E0_0008, // jr ra
            0x0000_0000, // nop
            0x0000_0000, // nop
            // 0x80010020
            0x03E0_0008, // jr ra
            0x2409_0009, // addiu t1, zero, 9
        ]);
        cpu.registers_mut()[GeneralPurpose::Ra] = 0x8001_0400;

        let mut recorder = Recorder::default();
        cpu.set_injector(Some(Box::new(Everything)));
        let returned = cpu.execute(BASE, &mut recorder).unwrap();

        assert_eq!(returned, 0x8001_0400);
        assert_eq!(cpu.registers()[GeneralPurpose::T0], 7);
        assert_eq!(cpu.registers()[GeneralPurpose::T1], 9);
        assert_eq!(cpu.registers()[GeneralPurpose::Ra], 0x8001_0400);
        assert_eq!(recorder.calls, vec![BASE + 4]);
        assert_eq!(recorder.returns, 2);
        assert_eq!(recorder.synced.first(), Some(&BASE));
        assert!(recorder.writes.borrow().contains(&(31, BASE + 0xC)));
    }

    #[test]
    fn breakpoints_stop_before_the_instruction() {
        let mut cpu = cpu_with_program(&[
            0x2408_0001, // addiu t0, zero, 1
            0x2409_0002, // addiu t1, zero, 2
            0x03E0_0008, // jr ra
            0x0000_0000, // nop
        ]);
        cpu.set_injector(Some(Box::new(Everything)));
        let mut recorder = Recorder {
            breakpoint: Some(BASE + 4),
            ..Default::default()
        };

        let result = cpu.execute(BASE, &mut recorder);
        assert_eq!(result, Err(Signal::Breakpoint { address: BASE + 4 }));
        assert_eq!(cpu.registers()[GeneralPurpose::T0], 1);
        assert_eq!(cpu.registers()[GeneralPurpose::T1], 0);

        // Single stepping ignores breakpoints.
        let next = cpu.execute_one(BASE + 4, &mut recorder).unwrap();
        assert_eq!(next, BASE + 8);
        assert_eq!(cpu.registers()[GeneralPurpose::T1], 2);
    }

    #[test]
    fn execute_one_runs_the_delay_slot() {
        let mut cpu = cpu_with_program(&[
            0x0800_4010, // j 0x80010040
            0x2408_0001, // addiu t0, zero, 1
        ]);
        let next = cpu.execute_one(BASE, &mut Headless).unwrap();
        assert_eq!(next, 0x8001_0040);
        assert_eq!(cpu.registers()[GeneralPurpose::T0], 1);
        assert!(cpu.recompiler().is_empty());
    }

    #[test]
    fn stores_invalidate_translations() {
        let mut cpu = cpu_with_program(&[
            0x2408_0001, // addiu t0, zero, 1
            0x03E0_0008, // jr ra
            0x0000_0000, // nop
        ]);
        cpu.execute(BASE, &mut Headless).unwrap();
        assert!(cpu.recompiler().is_compiled(BASE));

        // Patch through the uncached segment, the KSEG0 translation has to go.
        cpu.registers_mut()[GeneralPurpose::T1] = 0x2408_0005; // addiu t0, zero, 5
        cpu.registers_mut()[GeneralPurpose::T2] = 0xA001_0000;
        store(
            &mut cpu,
            0x8001_0100,
            &[
                0xAD49_0000, // sw t1, 0(t2)
                0x03E0_0008, // jr ra
                0x0000_0000, // nop
            ],
        );
        cpu.execute(0x8001_0100, &mut Headless).unwrap();
        assert!(!cpu.recompiler().is_compiled(BASE));

        cpu.execute(BASE, &mut Headless).unwrap();
        assert_eq!(cpu.registers()[GeneralPurpose::T0], 5);
    }

    #[test]
    fn explicit_invalidation() {
        let mut cpu = cpu_with_program(&[0x03E0_0008, 0x0000_0000]);
        cpu.execute(BASE, &mut Headless).unwrap();
        assert_eq!(cpu.recompiler().len(), 1);

        cpu.invalidate(BASE + 8);
        assert_eq!(cpu.recompiler().len(), 1);
        cpu.invalidate(BASE + 4);
        assert!(cpu.recompiler().is_empty());
    }

    #[test]
    fn fetch_faults() {
        let mut cpu = cpu_with_program(&[]);
        let Err(Signal::Exception(err)) = cpu.execute(0x1F90_0000, &mut Headless) else {
            panic!("expected a fetch fault");
        };
        assert_eq!(err.pc(), 0x1F90_0000);
        assert_eq!(
            err.cause().map(Fault::exception),
            Some(Exception::InstructionBusError)
        );

        let Err(Signal::Exception(err)) = cpu.execute(BASE + 2, &mut Headless) else {
            panic!("expected an address error");
        };
        assert_eq!(
            err.cause().map(Fault::exception),
            Some(Exception::AddressLoadError)
        );
    }

    #[test]
    fn undecodable_words_raise_reserved_instruction() {
        let mut cpu = cpu_with_program(&[0xFFFF_FFFF]);
        let Err(Signal::Exception(err)) = cpu.execute(BASE, &mut Headless) else {
            panic!("expected a reserved instruction");
        };
        assert_eq!(err.pc(), BASE);
        assert_eq!(
            err.cause().map(Fault::exception),
            Some(Exception::ReservedInstruction)
        );
    }

    #[test]
    fn long_runs_are_split() {
        let mut program = vec![0x2508_0001; MAX_BLOCK_LEN + 10]; // addiu t0, t0, 1
        program.extend([0x03E0_0008, 0x0000_0000]);
        let mut cpu = cpu_with_program(&program);

        cpu.execute(BASE, &mut Headless).unwrap();
        assert_eq!(cpu.registers()[GeneralPurpose::T0], MAX_BLOCK_LEN as u32 + 10);
        assert!(cpu
            .recompiler()
            .is_compiled(BASE + MAX_BLOCK_LEN as u32 * INSTRUCTION_SIZE));
    }
}
