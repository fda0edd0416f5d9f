use clap::Parser;
use psx_debugger::{gdb, parse_value, Debugger, Event, StopReason};
use r3000_core::{Cpu, MemoryView, Ram, BOOT_ADDRESS};
use std::{
    fmt::Display,
    io,
    net::{TcpListener, TcpStream},
    time::Duration,
};

const DEFAULT_GDB_PORT: u16 = 9001;
const DEFAULT_LOAD_ADDRESS: &str = "0x80010000";

/// Blocks until a GDB client connects via TCP
pub fn wait_for_gdb_connection(port: Option<u16>) -> io::Result<TcpStream> {
    let sockaddr = format!("localhost:{}", port.unwrap_or(DEFAULT_GDB_PORT));
    eprintln!("Waiting for a GDB connection on {sockaddr:?}...");
    let sock = TcpListener::bind(sockaddr)?;
    let (stream, addr) = sock.accept()?;

    eprintln!("Debugger connected from {addr}");
    Ok(stream)
}

fn exit_with(context: &str, err: impl Display) -> ! {
    eprintln!("{context}: {err}");
    std::process::exit(1);
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct CommandLineInterface {
    /// Raw program image, copied into main RAM
    #[clap(short, long, value_name = "path")]
    program: Option<String>,

    #[clap(short, long, value_name = "address", value_parser = parse_value, default_value = DEFAULT_LOAD_ADDRESS)]
    load_address: u32,

    /// Where execution starts. Defaults to the load address with a program, the reset vector without
    #[clap(short, long, value_name = "address", value_parser = parse_value)]
    entry: Option<u32>,

    #[clap(short, long, value_name = "path")]
    bios: Option<String>,

    /// Run until this address is reached
    #[clap(short, long, value_name = "address", value_parser = parse_value)]
    run_until: Option<u32>,

    /// Execute this many instructions, printing each one
    #[clap(short, long, value_name = "count")]
    steps: Option<u32>,

    #[clap(short, long, value_name = "port")]
    gdb: Option<Option<u16>>,

    /// Stop free running execution after this many milliseconds
    #[clap(short, long, value_name = "ms")]
    timeout: Option<u64>,
}

fn build_memory(cli: &CommandLineInterface) -> Ram {
    let mut ram = Ram::new();
    if let Some(path) = &cli.bios {
        let image = std::fs::read(path).unwrap_or_else(|e| exit_with("failed to read BIOS", e));
        ram = ram
            .with_bios(&image)
            .unwrap_or_else(|e| exit_with("failed to install BIOS", e));
    }

    if let Some(path) = &cli.program {
        let image = std::fs::read(path).unwrap_or_else(|e| exit_with("failed to read program", e));
        ram.load(cli.load_address, &image)
            .unwrap_or_else(|e| exit_with("failed to load program", e));
        log::info!(
            "loaded {:#x} bytes at {:#010x}",
            image.len(),
            cli.load_address
        );
    }
    ram
}

fn report(debugger: &Debugger, reason: StopReason) {
    match reason {
        StopReason::Breakpoint { address, hits } => {
            println!("breakpoint at {address:#010x} (hit {hits} times)")
        }
        StopReason::Exception { pc } => println!("exception at {pc:#010x}"),
        StopReason::Halted { pc } => println!("halted before {pc:#010x}"),
    }
    println!("{:?}", debugger.cpu().registers());
    for (depth, address) in debugger.call_stack().iter().enumerate() {
        println!("#{depth: <3} {address:#010x}");
    }
}

fn main() {
    env_logger::init();
    let cli = CommandLineInterface::parse();

    let ram = build_memory(&cli);
    let entry = cli.entry.unwrap_or(if cli.program.is_some() {
        cli.load_address
    } else {
        BOOT_ADDRESS
    });

    let mut debugger = Debugger::new(Cpu::new());
    debugger.add_listener(Event::SteppedInto, |info| {
        log::debug!("entered {:#010x}, depth {}", info.pc, info.depth)
    });
    debugger.add_listener(Event::SteppedOut, |info| {
        log::debug!("returned to depth {}", info.depth)
    });
    debugger.reset(entry, MemoryView::new(ram));

    if let Some(ms) = cli.timeout {
        let handle = debugger.cpu().stop_handle();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(ms));
            handle.stop();
        });
    }

    if let Some(port) = cli.gdb {
        let stream =
            wait_for_gdb_connection(port).unwrap_or_else(|e| exit_with("failed to wait for GDB", e));
        let reason = gdb::serve(&mut debugger, stream).unwrap_or_else(|e| exit_with("GDB session failed", e));
        eprintln!("GDB session ended: {reason:?}");
        return;
    }

    if let Some(steps) = cli.steps {
        for _ in 0..steps {
            let pc = debugger.pc();
            let text = debugger
                .disassemble(pc)
                .unwrap_or_else(|e| format!("<{e}>"));
            println!("{pc:#010x}: {text}");
            debugger
                .step_over()
                .unwrap_or_else(|e| exit_with("failed to step", e));
        }
        println!("{:?}", debugger.cpu().registers());
        return;
    }

    let reason = match cli.run_until {
        Some(address) => debugger.run_until(address),
        None => debugger.run(),
    }
    .unwrap_or_else(|e| exit_with("failed to run", e));
    report(&debugger, reason);
}
