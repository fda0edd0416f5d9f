use psx_debugger::{parse_value, Debugger, DebuggerError, Event, StepInfo, StopReason};
use r3000_core::{
    decomp::register::{cp0, Cp0, GeneralPurpose},
    Cpu, Memory, MemoryView, Ram,
};
use std::{cell::RefCell, rc::Rc};

const BASE: u32 = 0x8001_0000;
const CALLEE: u32 = BASE + 0x20;

/// `main` calls a leaf routine which loads 7 into `v0` and returns.
const PROGRAM: &[(u32, u32)] = &[
    (BASE, 0x0C00_4008),       // jal 0x80010020
    (BASE + 0x04, 0x0000_0000), // nop
    (BASE + 0x08, 0x2403_0001), // addiu v1, zero, 1
    (BASE + 0x0C, 0x0000_0000), // nop
    (CALLEE, 0x2402_0007),      // addiu v0, zero, 7
    (CALLEE + 0x04, 0x03E0_0008), // jr ra
    (CALLEE + 0x08, 0x0000_0000), // nop
];

fn load(words: &[(u32, u32)]) -> Debugger {
    let mut ram = Ram::new();
    for (address, word) in words {
        ram.load(*address, &word.to_le_bytes()).unwrap();
    }

    let mut debugger = Debugger::new(Cpu::new());
    debugger.reset(BASE, MemoryView::new(ram));
    debugger
}

fn record_events(debugger: &mut Debugger) -> Rc<RefCell<Vec<StepInfo>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    for event in [Event::Stepped, Event::SteppedInto, Event::SteppedOut] {
        let events = Rc::clone(&events);
        debugger.add_listener(event, move |info| events.borrow_mut().push(*info));
    }
    events
}

#[test]
fn reset_state() {
    let debugger = load(PROGRAM);
    assert_eq!(debugger.pc(), BASE);
    assert_eq!(debugger.call_stack(), &[BASE]);
    assert!(debugger.write_trace().iter().all(|pc| *pc == 0));

    let registers = debugger.cpu().registers();
    assert_eq!(registers[Cp0::Sr], cp0::Status::RESET);
    assert_eq!(registers[Cp0::Prid], cp0::PROCESSOR_ID);
    assert_eq!(registers[GeneralPurpose::Sp], 0);
}

#[test]
fn pc_round_trips() {
    let mut debugger = load(PROGRAM);
    for pc in [0, BASE + 4, 0xBFC0_0000, u32::MAX] {
        debugger.set_pc(pc);
        assert_eq!(debugger.pc(), pc);
    }
}

#[test]
fn step_into_then_out() {
    let mut debugger = load(PROGRAM);
    let events = record_events(&mut debugger);

    assert!(debugger.can_step_into());
    assert!(debugger.step_into());
    assert_eq!(debugger.pc(), CALLEE);
    assert_eq!(debugger.call_stack(), &[BASE, BASE + 8]);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::Ra], BASE + 8);
    assert_eq!(debugger.write_trace()[GeneralPurpose::Ra.to_repr()], BASE);

    debugger.step_out().unwrap();
    assert_eq!(debugger.pc(), BASE + 8);
    assert_eq!(debugger.call_stack(), &[BASE]);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V0], 7);
    assert_eq!(debugger.write_trace()[GeneralPurpose::V0.to_repr()], CALLEE);

    let seen: Vec<_> = events.borrow().iter().map(|info| (info.event, info.depth)).collect();
    assert_eq!(
        seen,
        vec![
            (Event::SteppedInto, 2),
            (Event::Stepped, 2),
            (Event::SteppedOut, 1),
            (Event::Stepped, 1),
        ]
    );
}

#[test]
fn step_into_without_a_call_changes_nothing() {
    let mut debugger = load(PROGRAM);
    debugger.set_pc(BASE + 8);
    let events = record_events(&mut debugger);

    assert!(!debugger.can_step_into());
    assert!(!debugger.step_into());
    assert_eq!(debugger.pc(), BASE + 8);
    assert_eq!(debugger.call_stack(), &[BASE]);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V1], 0);
    assert!(events.borrow().is_empty());
}

#[test]
fn step_over_follows_calls_and_returns() {
    let mut debugger = load(PROGRAM);
    let events = record_events(&mut debugger);

    // A `jal` executes together with its delay slot, landing in the callee.
    debugger.step_over().unwrap();
    assert_eq!(debugger.pc(), CALLEE);
    assert_eq!(debugger.call_stack(), &[BASE, BASE + 8]);

    debugger.step_over().unwrap();
    assert_eq!(debugger.pc(), CALLEE + 4);

    debugger.step_over().unwrap();
    assert_eq!(debugger.pc(), BASE + 8);
    assert_eq!(debugger.call_stack(), &[BASE]);

    let seen: Vec<_> = events.borrow().iter().map(|info| info.event).collect();
    assert_eq!(
        seen,
        vec![
            Event::SteppedInto,
            Event::Stepped,
            Event::Stepped,
            Event::SteppedOut,
            Event::Stepped,
        ]
    );
}

#[test]
fn run_until_removes_its_breakpoint() {
    let mut debugger = load(PROGRAM);
    let reason = debugger.run_until(CALLEE + 4).unwrap();
    assert_eq!(
        reason,
        StopReason::Breakpoint {
            address: CALLEE + 4,
            hits: 1
        }
    );
    assert_eq!(debugger.pc(), CALLEE + 4);
    assert_eq!(debugger.call_stack(), &[BASE, BASE + 8]);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V0], 7);
    assert!(debugger.breakpoints().is_empty());
}

#[test]
fn run_until_removes_its_breakpoint_after_an_exception() {
    let mut debugger = load(&[
        (BASE, 0x2403_0001),        // addiu v1, zero, 1
        (BASE + 0x04, 0x0000_000C), // syscall
    ]);
    let reason = debugger.run_until(BASE + 0x40).unwrap();
    assert_eq!(reason, StopReason::Exception { pc: BASE + 4 });
    assert_eq!(debugger.pc(), BASE + 4);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V1], 1);
    assert!(debugger.breakpoints().is_empty());
}

#[test]
fn jump_through_other_registers_is_not_a_return() {
    let mut debugger = load(&[
        (BASE, 0x0100_0008),        // jr t0
        (BASE + 0x04, 0x2403_0001), // addiu v1, zero, 1
    ]);
    debugger.set_gpr(GeneralPurpose::T0.to_repr(), "0x80010040").unwrap();
    let events = record_events(&mut debugger);

    debugger.step_over().unwrap();
    assert_eq!(debugger.pc(), BASE + 0x40);
    assert_eq!(debugger.call_stack(), &[BASE]);
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V1], 1);

    let seen: Vec<_> = events.borrow().iter().map(|info| info.event).collect();
    assert_eq!(seen, vec![Event::Stepped]);
}

#[test]
fn step_out_runs_through_nested_calls() {
    const OUTER: u32 = BASE + 0x20;
    const INNER: u32 = BASE + 0x40;
    let mut debugger = load(&[
        (BASE, 0x0C00_4008),         // jal OUTER
        (BASE + 0x04, 0x0000_0000),  // nop
        (BASE + 0x08, 0x2403_0001),  // addiu v1, zero, 1
        (OUTER, 0x03E0_8821),        // addu s1, ra, zero
        (OUTER + 0x04, 0x0C00_4010), // jal INNER
        (OUTER + 0x08, 0x0000_0000), // nop
        (OUTER + 0x0C, 0x0220_F821), // addu ra, s1, zero
        (OUTER + 0x10, 0x03E0_0008), // jr ra
        (OUTER + 0x14, 0x0000_0000), // nop
        (INNER, 0x2402_0007),        // addiu v0, zero, 7
        (INNER + 0x04, 0x03E0_0008), // jr ra
        (INNER + 0x08, 0x0000_0000), // nop
    ]);
    let events = record_events(&mut debugger);

    assert!(debugger.step_into());
    assert_eq!(debugger.pc(), OUTER);
    assert_eq!(debugger.call_stack(), &[BASE, BASE + 8]);

    debugger.step_out().unwrap();
    assert_eq!(debugger.pc(), BASE + 8);
    assert_eq!(debugger.call_stack(), &[BASE]);

    let registers = debugger.cpu().registers();
    assert_eq!(registers[GeneralPurpose::V0], 7);
    assert_eq!(registers[GeneralPurpose::S1], BASE + 8);
    assert_eq!(registers[GeneralPurpose::Ra], BASE + 8);
    assert_eq!(registers[GeneralPurpose::V1], 0);

    let seen: Vec<_> = events.borrow().iter().map(|info| (info.event, info.depth)).collect();
    assert_eq!(seen.first(), Some(&(Event::SteppedInto, 2)));
    assert_eq!(seen.last(), Some(&(Event::Stepped, 1)));
}

#[test]
fn memory_reset_keeps_the_loaded_program() {
    let mut debugger = load(PROGRAM);
    debugger.write_memory(CALLEE, &[0; 4]).unwrap();
    assert_eq!(debugger.disassemble(CALLEE).unwrap(), "nop");

    debugger.cpu_mut().memory_mut().unwrap().reset();
    assert_eq!(debugger.disassemble(CALLEE).unwrap(), "addiu   v0, zero, 7");
    assert!(debugger.can_step_into());

    debugger.run_until(CALLEE + 4).unwrap();
    assert_eq!(debugger.cpu().registers()[GeneralPurpose::V0], 7);
}

#[test]
fn zero_register_stays_zero_after_a_host_write() {
    let mut debugger = load(&[
        (BASE, 0x2408_0001),        // addiu t0, zero, 1
        (BASE + 0x04, 0x0000_0821), // addu at, zero, zero
    ]);
    debugger.set_gpr(GeneralPurpose::At.to_repr(), "9").unwrap();
    debugger.set_gpr(0, "5").unwrap();
    assert_eq!(debugger.gpr(0).unwrap(), "0x00000000");

    debugger.step_over().unwrap();
    debugger.step_over().unwrap();
    assert_eq!(debugger.gpr(GeneralPurpose::T0.to_repr()).unwrap(), "0x00000001");
    assert_eq!(debugger.gpr(GeneralPurpose::At.to_repr()).unwrap(), "0x00000000");
}

#[test]
fn permanent_breakpoints_count_hits() {
    let mut debugger = load(PROGRAM);
    assert!(debugger.set_breakpoint(CALLEE));
    assert!(!debugger.set_breakpoint(CALLEE));

    debugger.run_until(CALLEE + 4).unwrap();
    assert_eq!(debugger.pc(), CALLEE);
    assert_eq!(debugger.breakpoints().get(CALLEE).unwrap().hits(), 1);
    assert!(debugger.breakpoints().get(CALLEE + 4).is_none());

    assert!(debugger.disable_breakpoint(CALLEE));
    debugger.reset(BASE, MemoryView::new(Ram::new()));
    assert_eq!(debugger.breakpoints().get(CALLEE).unwrap().hits(), 0);
    assert!(!debugger.breakpoints().get(CALLEE).unwrap().is_enabled());
}

#[test]
fn invalid_register_values_are_rejected() {
    let mut debugger = load(PROGRAM);
    debugger.set_gpr(8, "0x1234").unwrap();
    assert_eq!(debugger.gpr(8).unwrap(), "0x00001234");

    assert!(matches!(
        debugger.set_gpr(8, "0xzz"),
        Err(DebuggerError::Parse(_))
    ));
    assert_eq!(debugger.gpr(8).unwrap(), "0x00001234");
    assert!(matches!(
        debugger.gpr(40),
        Err(DebuggerError::InvalidRegister { index: 40 })
    ));

    debugger.set_gpr(9, "-1").unwrap();
    assert_eq!(debugger.gpr(9).unwrap(), "0xffffffff");
}

#[test]
fn formatted_registers_parse_back() {
    let mut debugger = load(PROGRAM);
    debugger.set_gpr(4, "0b1011").unwrap();
    let text = debugger.gpr(4).unwrap();
    assert_eq!(parse_value(&text).unwrap(), 0b1011);
}

#[test]
fn cache_isolation_round_trip() {
    let mut debugger = load(PROGRAM);
    let mut before = [0; 4];
    debugger.read_memory(BASE, &mut before).unwrap();

    debugger.set_cop0(Cp0::Sr.to_repr(), "0x10000").unwrap();
    debugger.write_memory(BASE, &[0xAA; 4]).unwrap();
    let mut cached = [0; 4];
    debugger.read_memory(BASE, &mut cached).unwrap();
    assert_eq!(cached, [0xAA; 4]);

    debugger.set_cop0(Cp0::Sr.to_repr(), "0").unwrap();
    let mut after = [0; 4];
    debugger.read_memory(BASE, &mut after).unwrap();
    assert_eq!(after, before);
    assert_eq!(debugger.disassemble(BASE).unwrap(), "jal     0x80010020");
}
