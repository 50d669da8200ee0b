//! The interactive single-stepping debugger: `step`, `continue`, `regs`,
//! `mem <addr> <len>`, `break <addr>`, `quit`, built on `rustyline` the way
//! this workspace's sibling interactive emulator builds its debug console.

use cpu8086::{RunOutcome, Simulator, StepOutcome};
use rustyline::error::ReadlineError;
use rustyline::Editor;

const PROMPT: &str = "(dos8086) ";

/// Drives `sim` from a `rustyline` prompt until `quit` or EOF.
pub fn run(sim: &mut Simulator) {
    let mut editor = Editor::<()>::new();
    println!("dos8086 interactive debugger. Type `help` for commands.");

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                if !dispatch(sim, line.trim()) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {}", err);
                break;
            }
        }
    }
}

/// Runs one command; returns `false` when the REPL should exit.
fn dispatch(sim: &mut Simulator, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let command = match parts.next() {
        Some(c) => c,
        None => return true,
    };

    match command {
        "help" | "?" => print_help(),
        "step" | "s" => report_step(sim.step()),
        "continue" | "c" => {
            let (outcome, retired) = sim.run_to_breakpoint();
            println!("{} instruction(s) retired", retired);
            report_run(outcome);
        }
        "regs" | "r" => print_registers(sim),
        "mem" | "m" => match (parts.next(), parts.next()) {
            (Some(addr), Some(len)) => print_memory(sim, addr, len),
            _ => println!("usage: mem <hex-addr> <len>"),
        },
        "break" | "b" => match parts.next() {
            Some(addr) => match parse_hex(addr) {
                Some(phys) => {
                    sim.add_breakpoint(phys);
                    println!("breakpoint set at {:#07X}", phys);
                }
                None => println!("bad address: {}", addr),
            },
            None => println!("usage: break <hex-addr>"),
        },
        "quit" | "q" | "exit" => return false,
        other => println!("unknown command: {} (try `help`)", other),
    }
    true
}

fn print_help() {
    println!("step (s)              execute exactly one instruction");
    println!("continue (c)          run until halt, fault or breakpoint");
    println!("regs (r)               print the register/flag snapshot");
    println!("mem (m) <addr> <len>  dump <len> bytes starting at physical <addr>");
    println!("break (b) <addr>      set a breakpoint at physical <addr>");
    println!("quit (q)              leave the debugger");
}

fn report_step(outcome: StepOutcome) {
    match outcome {
        StepOutcome::Continue => println!("continue"),
        StepOutcome::Halted => println!("halted"),
        StepOutcome::BreakpointHit => println!("breakpoint hit"),
        StepOutcome::Fault(f) => println!("fault: {}", f),
    }
}

fn report_run(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Halted => println!("halted"),
        RunOutcome::BreakpointHit => println!("breakpoint hit"),
        RunOutcome::Fault(f) => println!("fault: {}", f),
        RunOutcome::BudgetExhausted => println!("budget exhausted"),
    }
}

fn print_registers(sim: &Simulator) {
    let r = sim.registers();
    println!(
        "AX={:04X} BX={:04X} CX={:04X} DX={:04X} SP={:04X} BP={:04X} SI={:04X} DI={:04X}",
        r.ax, r.bx, r.cx, r.dx, r.sp, r.bp, r.si, r.di
    );
    println!(
        "CS={:04X} DS={:04X} ES={:04X} SS={:04X} IP={:04X} FLAGS={:04X}",
        r.cs,
        r.ds,
        r.es,
        r.ss,
        r.ip,
        r.flags.to_word()
    );
}

fn print_memory(sim: &mut Simulator, addr: &str, len: &str) {
    let (addr, len) = match (parse_hex(addr), len.parse::<usize>()) {
        (Some(addr), Ok(len)) => (addr, len),
        _ => {
            println!("usage: mem <hex-addr> <len>");
            return;
        }
    };
    let bytes = sim.read_memory(addr, len);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:#07X}: {}", addr as usize + i * 16, line.join(" "));
    }
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).ok()
}
