#[macro_use]
extern crate clap;

use clap::Arg;

use cpu8086::constants::MEMORY_SIZE;
use cpu8086::Simulator;
use dos8086::{load_program, resolve_entry, DosInterruptHost, Error};

fn main() {
    if let Err(err) = run() {
        eprintln!("dos8086: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    pretty_env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("PROGRAM")
                .help("Source file (.asm) or pre-assembled image (.vimg) to run")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("memory")
                .short("m")
                .long("memory")
                .takes_value(true)
                .value_name("BYTES")
                .default_value("1048576")
                .help("Size of the address space in bytes (at most the 1 MiB 8086 limit)"),
        )
        .arg(
            Arg::with_name("entry")
                .short("e")
                .long("entry")
                .takes_value(true)
                .value_name("LABEL")
                .help("Overrides the assembled entry point with a code label"),
        )
        .arg(
            Arg::with_name("break")
                .short("b")
                .long("break")
                .takes_value(true)
                .value_name("ADDR")
                .multiple(true)
                .number_of_values(1)
                .help("Seeds a breakpoint at a physical hex address (repeatable)"),
        )
        .arg(
            Arg::with_name("step")
                .short("s")
                .long("step")
                .help("Start in the interactive stepping REPL instead of free-running"),
        )
        .arg(
            Arg::with_name("max-instructions")
                .long("max-instructions")
                .takes_value(true)
                .value_name("N")
                .default_value("1000000")
                .help("Instruction budget for free-running mode"),
        )
        .get_matches();

    let mem_size = value_t!(matches, "memory", usize).unwrap_or_else(|e| e.exit());
    if mem_size > MEMORY_SIZE {
        log::warn!("--memory {} exceeds the 8086's 1 MiB address space; clamping", mem_size);
    }

    let max_instructions = value_t!(matches, "max-instructions", u64).unwrap_or_else(|e| e.exit());

    let program_path = matches.value_of("PROGRAM").expect("required");
    let program = load_program(program_path)?;
    let entry = resolve_entry(&program, matches.value_of("entry"))?;

    let mut sim = Simulator::with_interrupt_host(Box::new(DosInterruptHost::new()));
    let mut loadable = program;
    loadable.entry_offset = entry;
    sim.load(&loadable);

    for addr in values_t!(matches, "break", String).unwrap_or_default() {
        let parsed = u32::from_str_radix(addr.trim_start_matches("0x"), 16)
            .map_err(|_| Error::UndefinedLabel(format!("bad breakpoint address: {}", addr)))?;
        sim.add_breakpoint(parsed);
    }

    if matches.is_present("step") {
        dos8086::repl::run(&mut sim);
        return Ok(());
    }

    let (outcome, retired) = sim.run(max_instructions);
    log::info!("{} instruction(s) retired", retired);
    match outcome {
        cpu8086::RunOutcome::Halted => {
            println!("Halted after {} instruction(s)", retired);
            Ok(())
        }
        cpu8086::RunOutcome::BreakpointHit => {
            println!("Breakpoint hit after {} instruction(s)", retired);
            Ok(())
        }
        cpu8086::RunOutcome::BudgetExhausted => {
            println!("Instruction budget exhausted after {} instruction(s)", retired);
            Ok(())
        }
        cpu8086::RunOutcome::Fault(fault) => Err(Error::Fault(fault)),
    }
}
