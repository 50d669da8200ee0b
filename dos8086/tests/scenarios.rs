//! End-to-end assemble -> load -> run scenarios against the public API
//! only, covering the concrete examples a correct 8086 core must satisfy.

use std::cell::RefCell;
use std::rc::Rc;

use cpu8086::interrupt::{InterruptHost, InterruptOutcome};
use cpu8086::memory::{phys, Memory};
use cpu8086::register::{RegisterFile, RegisterId, SegReg};
use cpu8086::{Flags, RunOutcome, Simulator};

fn run_to_halt(source: &str) -> Simulator {
    let program = asm8086::assemble(source).expect("assembly failed");
    let mut sim = Simulator::new();
    sim.load(&program);
    let (outcome, _) = sim.run(10_000);
    assert_eq!(outcome, RunOutcome::Halted, "program did not halt");
    sim
}

#[test]
fn s1_arithmetic_chain() {
    let sim = run_to_halt(
        "\
.CODE
MOV AX,10
MOV BX,20
MOV CX,30
MOV DX,40
ADD AX,BX
ADD AX,CX
ADD AX,DX
HLT
",
    );
    let r = sim.registers();
    assert_eq!(r.ax, 100);
    assert_eq!(r.bx, 20);
    assert_eq!(r.cx, 30);
    assert_eq!(r.dx, 40);
    assert!(!r.flags.contains(Flags::ZF));
    assert!(!r.flags.contains(Flags::CF));
}

#[test]
fn s2_dec_jnz_loop() {
    let sim = run_to_halt(
        "\
.CODE
MOV CX,5
MOV AX,0
L:
ADD AX,CX
DEC CX
JNZ L
HLT
",
    );
    let r = sim.registers();
    assert_eq!(r.ax, 15);
    assert_eq!(r.cx, 0);
    assert!(r.flags.contains(Flags::ZF));
}

#[test]
fn s3_loop_instruction() {
    let sim = run_to_halt(
        "\
.CODE
MOV CX,5
MOV AX,0
L:
INC AX
LOOP L
HLT
",
    );
    let r = sim.registers();
    assert_eq!(r.ax, 5);
    assert_eq!(r.cx, 0);
}

#[test]
fn s4_cbw_sign_extends() {
    let sim = run_to_halt(
        "\
.CODE
MOV AL,0x80
CBW
HLT
",
    );
    assert_eq!(sim.registers().ax, 0xFF80);
}

#[test]
fn s5_mul_then_div() {
    let sim = run_to_halt(
        "\
.CODE
MOV AL,5
MOV BL,10
MUL BL
MOV AX,100
MOV BL,3
DIV BL
HLT
",
    );
    let r = sim.registers();
    assert_eq!(r.ax & 0xFF, 33);
    assert_eq!((r.ax >> 8) & 0xFF, 1);
}

#[test]
fn s5a_mul_sets_flags_from_ah() {
    let program = asm8086::assemble(
        "\
.CODE
MOV AL,5
MOV BL,10
MUL BL
HLT
",
    )
    .unwrap();
    let mut sim = Simulator::new();
    sim.load(&program);
    sim.run(10_000);
    let r = sim.registers();
    assert_eq!(r.ax, 0x0032);
    assert!(!r.flags.contains(Flags::CF));
    assert!(!r.flags.contains(Flags::OF));
}

#[test]
fn s6_rol_ror() {
    let sim = run_to_halt(
        "\
.CODE
MOV AL,0x81
ROL AL,1
HLT
",
    );
    assert_eq!(sim.registers().ax & 0xFF, 0x03);
    assert!(sim.registers().flags.contains(Flags::CF));

    let sim = run_to_halt(
        "\
.CODE
MOV AL,0x81
ROR AL,1
HLT
",
    );
    assert_eq!(sim.registers().ax & 0xFF, 0xC0);
    assert!(sim.registers().flags.contains(Flags::CF));
}

/// A test-only interrupt host that captures `AH=02h`/`09h` console output
/// into a shared buffer instead of touching the real process stdout, so the
/// DOS print scenario can assert on exactly what was printed after `run`
/// has consumed the host inside the `Simulator`.
struct CapturingDosHost {
    output: Rc<RefCell<Vec<u8>>>,
}

impl InterruptHost for CapturingDosHost {
    fn handle(&mut self, vector: u8, regs: &mut RegisterFile, memory: &mut Memory) -> InterruptOutcome {
        if vector != 0x21 {
            return InterruptOutcome::Unhandled;
        }
        let ah = (regs.reg_read(RegisterId::AX) >> 8) as u8;
        match ah {
            0x02 => {
                self.output.borrow_mut().push((regs.reg_read(RegisterId::DX) & 0xFF) as u8);
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
                    self.output.borrow_mut().push(byte);
                    addr = addr.wrapping_add(1);
                }
                InterruptOutcome::Handled
            }
            0x4C => InterruptOutcome::Halt,
            _ => InterruptOutcome::Unhandled,
        }
    }
}

#[test]
fn s7_dos_print_and_exit() {
    let source = "\
.MODEL SMALL
.DATA
MSG DB 'Hi$'
.CODE
START:
MOV AX,@DATA
MOV DS,AX
MOV AH,9
MOV DX,OFFSET MSG
INT 21h
MOV AX,0x4C00
INT 21h
END START
";
    let program = asm8086::assemble(source).unwrap();
    let output = Rc::new(RefCell::new(Vec::new()));
    let host = CapturingDosHost { output: Rc::clone(&output) };
    let mut sim = Simulator::with_interrupt_host(Box::new(host));
    sim.load(&program);
    let (outcome, _) = sim.run(10_000);
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(sim.registers().ax & 0xFF, 0);
    assert_eq!(&output.borrow()[..], b"Hi");
}
