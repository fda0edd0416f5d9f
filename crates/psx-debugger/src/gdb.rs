//! A GDB remote stub on top of [`Debugger`]. Continuing blocks until the guest stops on its own,
//! so an interrupt from GDB is only noticed between stops.

use crate::{Debugger, StopReason};
use gdbstub::{
    common::Signal,
    conn::ConnectionExt,
    outputln,
    stub::{state_machine::GdbStubStateMachine, DisconnectReason, GdbStub, SingleThreadStopReason},
    target::{
        self,
        ext::{
            base::singlethread::{SingleThreadBase, SingleThreadResume, SingleThreadSingleStep},
            breakpoints::{Breakpoints, SwBreakpoint},
            monitor_cmd::{ConsoleOutput, MonitorCmd},
        },
        Target, TargetResult,
    },
};
use r3000_core::registers::{HI, LO};
use r3000_decomp::register::{self, Cp0};
use std::{io, net::TcpStream};

type Conn = Box<dyn ConnectionExt<Error = io::Error>>;

const MONITOR_COMMANDS: &[(&str, &str)] = &[
    ("help", "print this help message"),
    ("regs", "dump the register file"),
    ("stack", "print the call stack, innermost frame last"),
    ("trace", "print the PC of the most recent write to each register"),
    ("breakpoints", "list breakpoints and their hit counts"),
    ("disasm", "disassemble [address] [count] instructions"),
];

#[derive(Debug, thiserror::Error)]
pub enum GdbError {
    #[error("gdb stub error: {0}")]
    Stub(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn stub_error(err: impl std::fmt::Display) -> GdbError {
    GdbError::Stub(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Continue,
    Step,
}

pub struct GdbTarget<'a> {
    debugger: &'a mut Debugger,
    resume: Option<Resume>,
}

impl<'a> GdbTarget<'a> {
    pub fn new(debugger: &'a mut Debugger) -> Self {
        Self {
            debugger,
            resume: None,
        }
    }

    /// Carries out whatever GDB last asked for, returning once the guest stops.
    fn resume_execution(&mut self) -> SingleThreadStopReason<u32> {
        let resume = self.resume.take().unwrap_or(Resume::Step);
        if resume == Resume::Step {
            return match self.debugger.step_over() {
                Ok(()) => SingleThreadStopReason::DoneStep,
                Err(err) => {
                    log::error!("failed to step: {err}");
                    SingleThreadStopReason::Terminated(Signal::SIGABRT)
                }
            };
        }

        match self.debugger.run() {
            Ok(StopReason::Breakpoint { .. }) => SingleThreadStopReason::SwBreak(()),
            Ok(StopReason::Exception { .. }) => SingleThreadStopReason::Signal(Signal::SIGTRAP),
            Ok(StopReason::Halted { .. }) => SingleThreadStopReason::Signal(Signal::SIGINT),
            Err(err) => {
                log::error!("failed to run: {err}");
                SingleThreadStopReason::Terminated(Signal::SIGABRT)
            }
        }
    }
}

/// Serves a single GDB session over `stream`, until the client disconnects.
pub fn serve(debugger: &mut Debugger, stream: TcpStream) -> Result<DisconnectReason, GdbError> {
    let conn: Conn = Box::new(stream);
    let mut target = GdbTarget::new(debugger);
    let mut gdb = GdbStub::new(conn)
        .run_state_machine(&mut target)
        .map_err(stub_error)?;

    loop {
        gdb = match gdb {
            GdbStubStateMachine::Idle(mut gdb) => {
                let byte = gdb.borrow_conn().read()?;
                gdb.incoming_data(&mut target, byte).map_err(stub_error)?
            }

            GdbStubStateMachine::Running(mut gdb) => {
                let conn = gdb.borrow_conn();
                if conn.peek()?.is_some() {
                    let byte = conn.read()?;
                    gdb.incoming_data(&mut target, byte).map_err(stub_error)?
                } else {
                    let reason = target.resume_execution();
                    gdb.report_stop(&mut target, reason).map_err(stub_error)?
                }
            }

            GdbStubStateMachine::CtrlCInterrupt(gdb) => {
                target.resume = None;
                let reason = Some(SingleThreadStopReason::Signal(Signal::SIGINT));
                gdb.interrupt_handled(&mut target, reason)
                    .map_err(stub_error)?
            }

            GdbStubStateMachine::Disconnected(gdb) => {
                let reason = gdb.get_reason();
                log::info!("GDB disconnected: {reason:?}");
                return Ok(reason);
            }
        };
    }
}

impl Target for GdbTarget<'_> {
    type Arch = gdbstub_arch::mips::Mips;
    type Error = &'static str;

    #[inline(always)]
    fn base_ops(&mut self) -> target::ext::base::BaseOps<'_, Self::Arch, Self::Error> {
        target::ext::base::BaseOps::SingleThread(self)
    }

    #[inline(always)]
    fn support_breakpoints(
        &mut self,
    ) -> Option<target::ext::breakpoints::BreakpointsOps<'_, Self>> {
        Some(self)
    }

    #[inline(always)]
    fn support_monitor_cmd(&mut self) -> Option<target::ext::monitor_cmd::MonitorCmdOps<'_, Self>> {
        Some(self)
    }
}

impl Breakpoints for GdbTarget<'_> {
    #[inline(always)]
    fn support_sw_breakpoint(
        &mut self,
    ) -> Option<target::ext::breakpoints::SwBreakpointOps<'_, Self>> {
        Some(self)
    }
}

impl SwBreakpoint for GdbTarget<'_> {
    fn add_sw_breakpoint(
        &mut self,
        addr: <Self::Arch as gdbstub::arch::Arch>::Usize,
        _kind: <Self::Arch as gdbstub::arch::Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        Ok(self.debugger.set_breakpoint(addr))
    }

    fn remove_sw_breakpoint(
        &mut self,
        addr: <Self::Arch as gdbstub::arch::Arch>::Usize,
        _kind: <Self::Arch as gdbstub::arch::Arch>::BreakpointKind,
    ) -> TargetResult<bool, Self> {
        Ok(self.debugger.remove_breakpoint(addr))
    }
}

impl SingleThreadBase for GdbTarget<'_> {
    fn read_addrs(
        &mut self,
        start_addr: <Self::Arch as gdbstub::arch::Arch>::Usize,
        data: &mut [u8],
    ) -> TargetResult<usize, Self> {
        self.debugger
            .read_memory(start_addr, data)
            .map_err(|_| ())?;
        Ok(data.len())
    }

    fn write_addrs(
        &mut self,
        start_addr: <Self::Arch as gdbstub::arch::Arch>::Usize,
        data: &[u8],
    ) -> TargetResult<(), Self> {
        self.debugger
            .write_memory(start_addr, data)
            .map_err(|_| ())?;
        Ok(())
    }

    fn read_registers(
        &mut self,
        regs: &mut <Self::Arch as gdbstub::arch::Arch>::Registers,
    ) -> TargetResult<(), Self> {
        let registers = self.debugger.cpu().registers();
        for (i, r) in regs.r.iter_mut().enumerate() {
            *r = registers.gpr(i).unwrap_or_default();
        }
        regs.hi = registers[register::Special::Hi];
        regs.lo = registers[register::Special::Lo];
        regs.cp0.status = registers[Cp0::Sr];
        regs.cp0.cause = registers[Cp0::Cause];
        regs.cp0.badvaddr = registers[Cp0::BadVaddr];
        regs.pc = self.debugger.pc();
        Ok(())
    }

    fn write_registers(
        &mut self,
        regs: &<Self::Arch as gdbstub::arch::Arch>::Registers,
    ) -> TargetResult<(), Self> {
        {
            let mut registers = self.debugger.registers();
            for (i, r) in regs.r.iter().enumerate() {
                registers.set(i, *r).map_err(|_| ())?;
            }
            registers.set(HI, regs.hi).map_err(|_| ())?;
            registers.set(LO, regs.lo).map_err(|_| ())?;
        }

        let cpu = self.debugger.cpu_mut();
        cpu.write_cop0(Cp0::Sr.to_repr(), regs.cp0.status);
        cpu.write_cop0(Cp0::Cause.to_repr(), regs.cp0.cause);
        cpu.write_cop0(Cp0::BadVaddr.to_repr(), regs.cp0.badvaddr);

        if regs.pc != self.debugger.pc() {
            self.debugger.set_pc(regs.pc);
        }
        Ok(())
    }

    #[inline(always)]
    fn support_resume(
        &mut self,
    ) -> Option<target::ext::base::singlethread::SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadResume for GdbTarget<'_> {
    fn resume(&mut self, signal: Option<Signal>) -> Result<(), Self::Error> {
        if let Some(signal) = signal {
            log::warn!("gdb: resume with signal {signal} is not supported");
        }
        self.resume = Some(Resume::Continue);
        Ok(())
    }

    #[inline(always)]
    fn support_single_step(
        &mut self,
    ) -> Option<target::ext::base::singlethread::SingleThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadSingleStep for GdbTarget<'_> {
    fn step(&mut self, signal: Option<Signal>) -> Result<(), Self::Error> {
        if let Some(signal) = signal {
            log::warn!("gdb: step with signal {signal} is not supported");
        }
        self.resume = Some(Resume::Step);
        Ok(())
    }
}

impl GdbTarget<'_> {
    fn run_monitor_cmd<'a>(
        &mut self,
        name: &str,
        args: &mut impl Iterator<Item = &'a str>,
        out: &mut ConsoleOutput<'_>,
    ) -> Result<(), String> {
        match name {
            "help" => {
                for (name, description) in MONITOR_COMMANDS {
                    outputln!(out, "{name: <12} {description}");
                }
            }

            "regs" => outputln!(out, "{:?}", self.debugger.cpu().registers()),

            "stack" => {
                for (depth, address) in self.debugger.call_stack().iter().enumerate() {
                    outputln!(out, "#{depth: <3} {address:#010x}");
                }
            }

            "trace" => {
                let trace = self.debugger.write_trace();
                for reg in register::GeneralPurpose::iter() {
                    outputln!(out, "{: <9} {:#010x}", reg.name(), trace[reg.to_repr()]);
                }
                for reg in register::Special::iter() {
                    outputln!(out, "{: <9} {:#010x}", reg.name(), trace[HI + reg.to_repr()]);
                }
            }

            "breakpoints" => {
                let breakpoints = self.debugger.breakpoints();
                if breakpoints.is_empty() {
                    outputln!(out, "no breakpoints set");
                }
                for bp in breakpoints.iter() {
                    let state = if bp.is_enabled() { "enabled" } else { "disabled" };
                    outputln!(out, "{:#010x} {state: <8} hits: {}", bp.address(), bp.hits());
                }
            }

            "disasm" => {
                let start = match args.next() {
                    Some(arg) => crate::parse_value(arg).map_err(|err| err.to_string())?,
                    None => self.debugger.pc(),
                };
                let count = match args.next() {
                    Some(arg) => crate::parse_value(arg).map_err(|err| err.to_string())?,
                    None => 8,
                };
                for i in 0..count {
                    let address = start.wrapping_add(i * 4);
                    let text = self
                        .debugger
                        .disassemble(address)
                        .map_err(|err| err.to_string())?;
                    let marker = if address == self.debugger.pc() { ">" } else { " " };
                    outputln!(out, "{marker} {address:#010x}: {text}");
                }
            }

            _ => return Err(format!("unrecognized command: '{name}'")),
        }
        Ok(())
    }
}

impl MonitorCmd for GdbTarget<'_> {
    fn handle_monitor_cmd(
        &mut self,
        cmd: &[u8],
        mut out: ConsoleOutput<'_>,
    ) -> Result<(), Self::Error> {
        let Ok(cmd) = std::str::from_utf8(cmd) else {
            outputln!(out, "monitor command is not valid UTF-8");
            return Ok(());
        };

        let mut args = cmd.split_whitespace().peekable();
        match args.next() {
            Some(name) => {
                if let Err(err) = self.run_monitor_cmd(name, &mut args, &mut out) {
                    outputln!(out, "{err}");
                }
            }
            None => outputln!(out, "no command specified"),
        }

        if args.peek().is_some() {
            outputln!(out, "warning: ignoring extra arguments");
        }
        Ok(())
    }
}
