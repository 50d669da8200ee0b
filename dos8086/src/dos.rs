//! The INT 21h stub called for in the core's `Fault::UnhandledInterrupt`
//! design: AH=02h writes `DL` to stdout, AH=09h writes the `$`-terminated
//! string at `DS:DX`, AH=4Ch halts with `AL` as the exit code. Every other
//! vector (and every other AH under INT 21h) is reported back to the core
//! as unhandled, which surfaces to the caller as a fault.

use std::io::{self, Write};

use cpu8086::interrupt::{InterruptHost, InterruptOutcome};
use cpu8086::memory::{phys, Memory};
use cpu8086::register::{RegisterFile, RegisterId, SegReg};

/// Exit code recorded by `INT 21h AH=4Ch`, read back by the CLI host after
/// the run loop reports `Halted`.
pub struct DosInterruptHost {
    exit_code: Option<u8>,
}

impl DosInterruptHost {
    pub fn new() -> DosInterruptHost {
        DosInterruptHost { exit_code: None }
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.exit_code
    }
}

impl Default for DosInterruptHost {
    fn default() -> DosInterruptHost {
        DosInterruptHost::new()
    }
}

impl InterruptHost for DosInterruptHost {
    fn handle(&mut self, vector: u8, regs: &mut RegisterFile, memory: &mut Memory) -> InterruptOutcome {
        if vector != 0x21 {
            return InterruptOutcome::Unhandled;
        }

        let ah = (regs.reg_read(RegisterId::AX) >> 8) as u8;
        match ah {
            0x02 => {
                let dl = (regs.reg_read(RegisterId::DX) & 0xFF) as u8;
                print_byte(dl);
                InterruptOutcome::Handled
            }
            0x09 => {
                let ds = regs.read_seg(SegReg::Ds);
                let dx = regs.reg_read(RegisterId::DX);
                let mut addr = phys(ds, dx);
                loop {
                    let byte = memory.read_byte(addr);
                    if byte == b'$' {
                        break;
                    }
                    print_byte(byte);
                    addr = addr.wrapping_add(1);
                }
                InterruptOutcome::Handled
            }
            0x4C => {
                let al = (regs.reg_read(RegisterId::AX) & 0xFF) as u8;
                self.exit_code = Some(al);
                InterruptOutcome::Halt
            }
            _ => InterruptOutcome::Unhandled,
        }
    }
}

fn print_byte(b: u8) {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = lock.write_all(&[b]);
    let _ = lock.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu8086::program::{Program, SymbolTable};
    use cpu8086::Simulator;

    #[test]
    fn ah_4c_halts_and_records_exit_code() {
        let mut sim = Simulator::with_interrupt_host(Box::new(DosInterruptHost::new()));
        let program = Program {
            code: vec![0xB8, 0x00, 0x4C, 0xCD, 0x21],
            data: Vec::new(),
            symbols: SymbolTable::new(),
            entry_offset: 0,
        };
        sim.load(&program);
        let outcome = sim.run(10);
        assert_eq!(outcome.0, cpu8086::RunOutcome::Halted);
    }
}
