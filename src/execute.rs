//! The decode/execute loop and instruction dispatch: `Simulator` is the
//! top-level value callers thread through `step`/`run`/`run_to_breakpoint`.
//!
//! Every handler below reads its operand(s), calls one of the flag-computing
//! primitives in [`crate::arith`], and writes its result back; none of them
//! compute CF/PF/AF/ZF/SF/OF themselves.

use std::collections::HashSet;

use crate::arith::{self, RotateKind, ShiftKind};
use crate::constants::{CODE_BASE_PHYS, DATA_BASE_PHYS};
use crate::decode::{
    decode, format_instruction, ArithOp, Condition, DecodedInstruction, JumpTarget, LoopKind,
    MemOperand, MemoryCursor, MulDivOp, Operand, RepPrefix, ShiftCount, ShiftRotateOp, StringOp,
    Width,
};
use crate::error::Fault;
use crate::flags::Flags;
use crate::interrupt::{InterruptHost, InterruptOutcome, NullInterruptHost};
use crate::memory::{phys, pop_word, push_word, Memory};
use crate::observer::Observer;
use crate::program::{Program, SymbolTable};
use crate::register::{Reg16, Reg8, RegisterFile, RegistersSnapshot, SegReg};

/// Outcome of a single `step()` call.
#[derive(Clone, PartialEq, Debug)]
pub enum StepOutcome {
    Continue,
    Halted,
    BreakpointHit,
    Fault(Fault),
}

/// Outcome of a `run`/`run_to_breakpoint` call, together with the number of
/// instructions retired before it was reached.
#[derive(Clone, PartialEq, Debug)]
pub enum RunOutcome {
    Halted,
    BreakpointHit,
    Fault(Fault),
    BudgetExhausted,
}

/// `Idle -> Running -> (Halted | Faulted | Paused)`; `Paused` re-enters
/// `Running` on the next `step`/`run`. `Halted`/`Faulted` require `reset()`.
#[derive(Clone, PartialEq, Debug)]
enum SimState {
    Idle,
    Running,
    Paused,
    Halted,
    Faulted(Fault),
}

enum Dispatch {
    Continue,
    Halted,
    Fault(Fault),
}

/// The whole simulator: memory, registers, breakpoints and the host-provided
/// interrupt table. An explicit value a caller owns and threads through its
/// own API -- never a process-wide singleton.
pub struct Simulator {
    memory: Memory,
    regs: RegisterFile,
    state: SimState,
    breakpoints: HashSet<u32>,
    /// Set when `step()` returns `BreakpointHit` at this address, so the
    /// *next* call executes past it instead of reporting the same hit again.
    suppress_breakpoint_at: Option<u32>,
    interrupt_host: Box<dyn InterruptHost>,
    symbols: SymbolTable,
}

impl Default for Simulator {
    fn default() -> Simulator {
        Simulator::new()
    }
}

impl Simulator {
    pub fn new() -> Simulator {
        Simulator::with_interrupt_host(Box::new(NullInterruptHost))
    }

    pub fn with_interrupt_host(interrupt_host: Box<dyn InterruptHost>) -> Simulator {
        let mut regs = RegisterFile::new();
        regs.reset();
        Simulator {
            memory: Memory::new(),
            regs,
            state: SimState::Idle,
            breakpoints: HashSet::new(),
            suppress_breakpoint_at: None,
            interrupt_host,
            symbols: SymbolTable::new(),
        }
    }

    pub fn set_interrupt_host(&mut self, host: Box<dyn InterruptHost>) {
        self.interrupt_host = host;
    }

    pub fn set_observer(&mut self, observer: Box<dyn Observer>) -> Box<dyn Observer> {
        self.memory.set_observer(observer)
    }

    /// Copies `program.code` to CS:0 and `program.data` to DS:0, sets
    /// IP to the entry offset, and resets flags/SP/general registers to
    /// their post-reset defaults. Breakpoints survive a load; only
    /// `reset()` clears them.
    pub fn load(&mut self, program: &Program) {
        self.memory.write_bytes(CODE_BASE_PHYS, &program.code);
        self.memory.write_bytes(DATA_BASE_PHYS, &program.data);
        self.regs.reset();
        self.regs.set_ip(program.entry_offset);
        self.symbols = program.symbols.clone();
        self.state = SimState::Idle;
        self.suppress_breakpoint_at = None;
    }

    pub fn reset(&mut self) {
        self.memory.reset();
        self.regs.reset();
        self.breakpoints.clear();
        self.suppress_breakpoint_at = None;
        self.state = SimState::Idle;
    }

    pub fn add_breakpoint(&mut self, phys: u32) {
        self.breakpoints.insert(phys & 0xFFFFF);
    }

    pub fn remove_breakpoint(&mut self, phys: u32) {
        self.breakpoints.remove(&(phys & 0xFFFFF));
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &u32> {
        self.breakpoints.iter()
    }

    pub fn read_memory(&mut self, addr: u32, len: usize) -> Vec<u8> {
        self.memory.read_bytes(addr, len)
    }

    pub fn write_memory(&mut self, addr: u32, data: &[u8]) {
        self.memory.write_bytes(addr, data)
    }

    pub fn registers(&self) -> RegistersSnapshot {
        self.regs.snapshot()
    }

    pub fn flags(&self) -> Flags {
        self.regs.flags()
    }

    pub fn symbol(&self, name: &str) -> Option<crate::program::Symbol> {
        self.symbols.get(name)
    }

    /// Decode and execute exactly one instruction.
    pub fn step(&mut self) -> StepOutcome {
        match &self.state {
            SimState::Halted => return StepOutcome::Halted,
            SimState::Faulted(f) => return StepOutcome::Fault(f.clone()),
            _ => {}
        }

        let cs = self.regs.read_seg(SegReg::Cs);
        let ip = self.regs.ip();
        let fetch_phys = phys(cs, ip);

        if self.breakpoints.contains(&fetch_phys) {
            if self.suppress_breakpoint_at == Some(fetch_phys) {
                self.suppress_breakpoint_at = None;
            } else {
                self.suppress_breakpoint_at = Some(fetch_phys);
                self.state = SimState::Paused;
                return StepOutcome::BreakpointHit;
            }
        } else {
            self.suppress_breakpoint_at = None;
        }

        self.state = SimState::Running;
        self.memory.note_execute(fetch_phys);

        let (instr, len) = {
            let mut cursor = MemoryCursor { mem: &mut self.memory, phys: fetch_phys };
            decode(&mut cursor, ip)
        };
        self.regs.set_ip(ip.wrapping_add(len));

        log::trace!("{:#07X}: {}", fetch_phys, format_instruction(&instr));

        match self.dispatch(instr) {
            Dispatch::Continue => StepOutcome::Continue,
            Dispatch::Halted => {
                self.state = SimState::Halted;
                StepOutcome::Halted
            }
            Dispatch::Fault(fault) => {
                log::warn!("fault at {:#07X}: {}", fetch_phys, fault);
                self.state = SimState::Faulted(fault.clone());
                StepOutcome::Fault(fault)
            }
        }
    }

    /// Calls `step()` until `Halted`, `BreakpointHit`, `Fault`, or the
    /// budget is exhausted. Returns the outcome and instructions retired.
    pub fn run(&mut self, max_instructions: u64) -> (RunOutcome, u64) {
        let mut retired = 0u64;
        loop {
            if retired >= max_instructions {
                return (RunOutcome::BudgetExhausted, retired);
            }
            match self.step() {
                StepOutcome::Continue => retired += 1,
                StepOutcome::Halted => return (RunOutcome::Halted, retired),
                StepOutcome::BreakpointHit => return (RunOutcome::BreakpointHit, retired),
                StepOutcome::Fault(f) => return (RunOutcome::Fault(f), retired),
            }
        }
    }

    /// `run(u32::MAX)`-equivalent: runs until a breakpoint, halt or fault.
    pub fn run_to_breakpoint(&mut self) -> (RunOutcome, u64) {
        self.run(u64::MAX)
    }

    fn effective_phys(&self, m: MemOperand) -> u32 {
        let base_val = m.base.map(|r| self.regs.read16(r)).unwrap_or(0);
        let index_val = m.index.map(|r| self.regs.read16(r)).unwrap_or(0);
        let offset = base_val.wrapping_add(index_val).wrapping_add(m.disp as u16);
        let seg = if !m.direct && m.base == Some(Reg16::Bp) {
            self.regs.read_seg(SegReg::Ss)
        } else {
            self.regs.read_seg(SegReg::Ds)
        };
        phys(seg, offset)
    }

    fn read_operand(&mut self, op: Operand, width: Width) -> u16 {
        match op {
            Operand::Reg8(r) => self.regs.read8(r) as u16,
            Operand::Reg16(r) => self.regs.read16(r),
            Operand::Seg(s) => self.regs.read_seg(s),
            Operand::Imm8(v) => v as u16,
            Operand::Imm16(v) => v,
            Operand::Mem(m) => {
                let addr = self.effective_phys(m);
                match width {
                    Width::Byte => self.memory.read_byte(addr) as u16,
                    Width::Word => self.memory.read_word(addr),
                }
            }
        }
    }

    fn write_operand(&mut self, op: Operand, width: Width, value: u16) {
        match op {
            Operand::Reg8(r) => self.regs.write8(r, value as u8),
            Operand::Reg16(r) => self.regs.write16(r, value),
            Operand::Seg(s) => self.regs.write_seg(s, value),
            Operand::Mem(m) => {
                let addr = self.effective_phys(m);
                match width {
                    Width::Byte => self.memory.write_byte(addr, value as u8),
                    Width::Word => self.memory.write_word(addr, value),
                }
            }
            Operand::Imm8(_) | Operand::Imm16(_) => {
                unreachable!("the decoder never produces an immediate as a write destination")
            }
        }
    }

    fn arith_result(op: ArithOp, width: Width, a: u16, b: u16, cf_in: bool) -> (u16, Flags) {
        match width {
            Width::Byte => {
                let (av, bv) = (a as u8, b as u8);
                match op {
                    ArithOp::Add => {
                        let (r, f) = arith::add_bytes(av, bv, false);
                        (r as u16, f)
                    }
                    ArithOp::Adc => {
                        let (r, f) = arith::add_bytes(av, bv, cf_in);
                        (r as u16, f)
                    }
                    ArithOp::Sub | ArithOp::Cmp => {
                        let (r, f) = arith::sub_bytes(av, bv, false);
                        (r as u16, f)
                    }
                    ArithOp::Sbb => {
                        let (r, f) = arith::sub_bytes(av, bv, cf_in);
                        (r as u16, f)
                    }
                    ArithOp::And | ArithOp::Test => {
                        let r = av & bv;
                        (r as u16, arith::logical_bytes(r))
                    }
                    ArithOp::Or => {
                        let r = av | bv;
                        (r as u16, arith::logical_bytes(r))
                    }
                    ArithOp::Xor => {
                        let r = av ^ bv;
                        (r as u16, arith::logical_bytes(r))
                    }
                }
            }
            Width::Word => match op {
                ArithOp::Add => arith::add_words(a, b, false),
                ArithOp::Adc => arith::add_words(a, b, cf_in),
                ArithOp::Sub | ArithOp::Cmp => arith::sub_words(a, b, false),
                ArithOp::Sbb => arith::sub_words(a, b, cf_in),
                ArithOp::And | ArithOp::Test => {
                    let r = a & b;
                    (r, arith::logical_words(r))
                }
                ArithOp::Or => {
                    let r = a | b;
                    (r, arith::logical_words(r))
                }
                ArithOp::Xor => {
                    let r = a ^ b;
                    (r, arith::logical_words(r))
                }
            },
        }
    }

    fn dispatch(&mut self, instr: DecodedInstruction) -> Dispatch {
        match instr {
            DecodedInstruction::Mov { dst, src, width } => {
                let value = self.read_operand(src, width);
                self.write_operand(dst, width, value);
            }
            DecodedInstruction::MovSeg { dst, src } => {
                let value = self.read_operand(src, Width::Word);
                self.write_operand(dst, Width::Word, value);
            }
            DecodedInstruction::Push { src } => {
                let value = self.read_operand(src, Width::Word);
                let ss = self.regs.read_seg(SegReg::Ss);
                let mut sp = self.regs.read16(Reg16::Sp);
                push_word(&mut self.memory, ss, &mut sp, value);
                self.regs.write16(Reg16::Sp, sp);
            }
            DecodedInstruction::Pop { dst } => {
                let ss = self.regs.read_seg(SegReg::Ss);
                let mut sp = self.regs.read16(Reg16::Sp);
                let value = pop_word(&mut self.memory, ss, &mut sp);
                self.regs.write16(Reg16::Sp, sp);
                self.write_operand(dst, Width::Word, value);
            }
            DecodedInstruction::Arith { op, dst, src, width } => {
                let a = self.read_operand(dst, width);
                let b = self.read_operand(src, width);
                let cf_in = self.regs.flags().get_bit(Flags::CF);
                let (result, flags) = Self::arith_result(op, width, a, b, cf_in);
                self.regs.set_flags(flags);
                if !matches!(op, ArithOp::Cmp | ArithOp::Test) {
                    self.write_operand(dst, width, result);
                }
            }
            DecodedInstruction::Inc { rm, width } => {
                let a = self.read_operand(rm, width);
                let cf_prior = self.regs.flags().get_bit(Flags::CF);
                let (result, mut flags) = match width {
                    Width::Byte => {
                        let (r, f) = arith::inc_byte(a as u8);
                        (r as u16, f)
                    }
                    Width::Word => arith::inc_word(a),
                };
                flags.set_bit(Flags::CF, cf_prior);
                self.regs.set_flags(flags);
                self.write_operand(rm, width, result);
            }
            DecodedInstruction::Dec { rm, width } => {
                let a = self.read_operand(rm, width);
                let cf_prior = self.regs.flags().get_bit(Flags::CF);
                let (result, mut flags) = match width {
                    Width::Byte => {
                        let (r, f) = arith::dec_byte(a as u8);
                        (r as u16, f)
                    }
                    Width::Word => arith::dec_word(a),
                };
                flags.set_bit(Flags::CF, cf_prior);
                self.regs.set_flags(flags);
                self.write_operand(rm, width, result);
            }
            DecodedInstruction::Not { rm, width } => {
                let a = self.read_operand(rm, width);
                let result = match width {
                    Width::Byte => !(a as u8) as u16,
                    Width::Word => !a,
                };
                self.write_operand(rm, width, result);
            }
            DecodedInstruction::Neg { rm, width } => {
                let a = self.read_operand(rm, width);
                let (result, flags) = match width {
                    Width::Byte => {
                        let (r, f) = arith::sub_bytes(0, a as u8, false);
                        (r as u16, f)
                    }
                    Width::Word => arith::sub_words(0, a, false),
                };
                self.regs.set_flags(flags);
                self.write_operand(rm, width, result);
            }
            DecodedInstruction::MulDiv { op, src, width } => {
                if let Err(fault) = self.exec_muldiv(op, src, width) {
                    return Dispatch::Fault(fault);
                }
            }
            DecodedInstruction::ShiftRotate { op, rm, width, count } => {
                self.exec_shift_rotate(op, rm, width, count);
            }
            DecodedInstruction::Cbw => {
                let al = self.regs.read8(Reg8::Al) as i8 as i16 as u16;
                self.regs.write16(Reg16::Ax, al);
            }
            DecodedInstruction::Cwd => {
                let ax = self.regs.read16(Reg16::Ax);
                let dx = if ax & 0x8000 != 0 { 0xFFFF } else { 0 };
                self.regs.write16(Reg16::Dx, dx);
            }
            DecodedInstruction::Lahf => {
                let byte = (self.regs.flags().to_word() & 0xFF) as u8;
                self.regs.write8(Reg8::Ah, byte);
            }
            DecodedInstruction::Sahf => {
                let ah = self.regs.read8(Reg8::Ah);
                let mut flags = self.regs.flags();
                flags.set_bit(Flags::CF, ah & 0x01 != 0);
                flags.set_bit(Flags::PF, ah & 0x04 != 0);
                flags.set_bit(Flags::AF, ah & 0x10 != 0);
                flags.set_bit(Flags::ZF, ah & 0x40 != 0);
                flags.set_bit(Flags::SF, ah & 0x80 != 0);
                self.regs.set_flags(flags);
            }
            DecodedInstruction::FlagOp(kind) => self.exec_flag_op(kind),
            DecodedInstruction::Nop => {}
            DecodedInstruction::Hlt => return Dispatch::Halted,
            DecodedInstruction::Jmp { target } => self.jump_to(target),
            DecodedInstruction::Jcc { cond, target } => {
                let cx = self.regs.read16(Reg16::Cx);
                if cond.evaluate(self.regs.flags(), cx) {
                    self.regs.set_ip(target);
                }
            }
            DecodedInstruction::LoopInstr { kind, target } => {
                let cx = self.regs.read16(Reg16::Cx).wrapping_sub(1);
                self.regs.write16(Reg16::Cx, cx);
                let zf = self.regs.flags().get_bit(Flags::ZF);
                let take = match kind {
                    LoopKind::Loop => cx != 0,
                    LoopKind::Loope => cx != 0 && zf,
                    LoopKind::Loopne => cx != 0 && !zf,
                };
                if take {
                    self.regs.set_ip(target);
                }
            }
            DecodedInstruction::Call { target } => {
                let ss = self.regs.read_seg(SegReg::Ss);
                let mut sp = self.regs.read16(Reg16::Sp);
                match target {
                    JumpTarget::Near(_) => {
                        let ret_ip = self.regs.ip();
                        push_word(&mut self.memory, ss, &mut sp, ret_ip);
                    }
                    JumpTarget::Far { .. } => {
                        let ret_cs = self.regs.read_seg(SegReg::Cs);
                        let ret_ip = self.regs.ip();
                        push_word(&mut self.memory, ss, &mut sp, ret_cs);
                        push_word(&mut self.memory, ss, &mut sp, ret_ip);
                    }
                }
                self.regs.write16(Reg16::Sp, sp);
                self.jump_to(target);
            }
            DecodedInstruction::Ret { imm16 } => {
                let ss = self.regs.read_seg(SegReg::Ss);
                let mut sp = self.regs.read16(Reg16::Sp);
                let target = pop_word(&mut self.memory, ss, &mut sp);
                if let Some(extra) = imm16 {
                    sp = sp.wrapping_add(extra);
                }
                self.regs.write16(Reg16::Sp, sp);
                self.regs.set_ip(target);
            }
            DecodedInstruction::Int { vector } => {
                match self.interrupt_host.handle(vector, &mut self.regs, &mut self.memory) {
                    InterruptOutcome::Handled => {}
                    InterruptOutcome::Halt => return Dispatch::Halted,
                    InterruptOutcome::Unhandled => {
                        let ah = self.regs.read8(Reg8::Ah);
                        return Dispatch::Fault(Fault::UnhandledInterrupt { vector, ah });
                    }
                }
            }
            DecodedInstruction::Iret => {
                let ss = self.regs.read_seg(SegReg::Ss);
                let mut sp = self.regs.read16(Reg16::Sp);
                let ip = pop_word(&mut self.memory, ss, &mut sp);
                let cs = pop_word(&mut self.memory, ss, &mut sp);
                let flags_word = pop_word(&mut self.memory, ss, &mut sp);
                self.regs.write16(Reg16::Sp, sp);
                self.regs.write_seg(SegReg::Cs, cs);
                self.regs.set_ip(ip);
                self.regs.set_flags(Flags::from_word(flags_word));
            }
            DecodedInstruction::StringOp { op, width, rep } => self.exec_string_op(op, width, rep),
            DecodedInstruction::Invalid { opcode } => {
                return Dispatch::Fault(Fault::InvalidOpcode { opcode })
            }
        }
        Dispatch::Continue
    }

    fn jump_to(&mut self, target: JumpTarget) {
        match target {
            JumpTarget::Near(offset) => self.regs.set_ip(offset),
            JumpTarget::Far { segment, offset } => {
                self.regs.write_seg(SegReg::Cs, segment);
                self.regs.set_ip(offset);
            }
        }
    }

    fn exec_flag_op(&mut self, kind: crate::decode::FlagOpKind) {
        use crate::decode::FlagOpKind::*;
        let mut flags = self.regs.flags();
        match kind {
            Clc => flags.set_bit(Flags::CF, false),
            Stc => flags.set_bit(Flags::CF, true),
            Cli => flags.set_bit(Flags::IF, false),
            Sti => flags.set_bit(Flags::IF, true),
            Cld => flags.set_bit(Flags::DF, false),
            Std => flags.set_bit(Flags::DF, true),
        }
        self.regs.set_flags(flags);
    }

    fn exec_shift_rotate(&mut self, op: ShiftRotateOp, rm: Operand, width: Width, count: ShiftCount) {
        let count_val: u32 = match count {
            ShiftCount::One => 1,
            ShiftCount::Cl => (self.regs.read8(Reg8::Cl) as u32) & 0x1F,
        };
        if count_val == 0 {
            return;
        }
        let a = self.read_operand(rm, width);
        let cf_in = self.regs.flags().get_bit(Flags::CF);
        match op {
            ShiftRotateOp::Rol | ShiftRotateOp::Ror | ShiftRotateOp::Rcl | ShiftRotateOp::Rcr => {
                let kind = match op {
                    ShiftRotateOp::Rol => RotateKind::Rol,
                    ShiftRotateOp::Ror => RotateKind::Ror,
                    ShiftRotateOp::Rcl => RotateKind::Rcl,
                    ShiftRotateOp::Rcr => RotateKind::Rcr,
                    _ => unreachable!(),
                };
                let (result, rflags) = match width {
                    Width::Byte => {
                        let (r, f) = arith::rotate_byte(a as u8, count_val, kind, cf_in);
                        (r as u16, f)
                    }
                    Width::Word => arith::rotate_word(a, count_val, kind, cf_in),
                };
                let mut flags = self.regs.flags();
                flags.set_bit(Flags::CF, rflags.get_bit(Flags::CF));
                if count_val == 1 {
                    flags.set_bit(Flags::OF, rflags.get_bit(Flags::OF));
                }
                self.regs.set_flags(flags);
                self.write_operand(rm, width, result);
            }
            ShiftRotateOp::Shl | ShiftRotateOp::Shr | ShiftRotateOp::Sar => {
                let kind = match op {
                    ShiftRotateOp::Shl => ShiftKind::Shl,
                    ShiftRotateOp::Shr => ShiftKind::Shr,
                    ShiftRotateOp::Sar => ShiftKind::Sar,
                    _ => unreachable!(),
                };
                let (result, flags) = match width {
                    Width::Byte => {
                        let (r, f) = arith::shift_byte(a as u8, count_val, kind);
                        (r as u16, f)
                    }
                    Width::Word => arith::shift_word(a, count_val, kind),
                };
                self.regs.set_flags(flags);
                self.write_operand(rm, width, result);
            }
        }
    }

    fn exec_muldiv(&mut self, op: MulDivOp, src: Operand, width: Width) -> Result<(), Fault> {
        let src_val = self.read_operand(src, width);
        match op {
            MulDivOp::Mul => match width {
                Width::Byte => {
                    let al = self.regs.read8(Reg8::Al) as u16;
                    let product = al * (src_val as u8 as u16);
                    self.regs.write16(Reg16::Ax, product);
                    let overflow = product > 0xFF;
                    let mut flags = self.regs.flags();
                    flags.set_bit(Flags::CF, overflow);
                    flags.set_bit(Flags::OF, overflow);
                    self.regs.set_flags(flags);
                }
                Width::Word => {
                    let ax = self.regs.read16(Reg16::Ax) as u32;
                    let product = ax * (src_val as u32);
                    self.regs.write16(Reg16::Ax, product as u16);
                    self.regs.write16(Reg16::Dx, (product >> 16) as u16);
                    let overflow = (product >> 16) != 0;
                    let mut flags = self.regs.flags();
                    flags.set_bit(Flags::CF, overflow);
                    flags.set_bit(Flags::OF, overflow);
                    self.regs.set_flags(flags);
                }
            },
            MulDivOp::Imul => match width {
                Width::Byte => {
                    let al = self.regs.read8(Reg8::Al) as i8 as i16;
                    let src8 = src_val as u8 as i8 as i16;
                    let product = al * src8;
                    self.regs.write16(Reg16::Ax, product as u16);
                    let overflow = product != (product as i8) as i16;
                    let mut flags = self.regs.flags();
                    flags.set_bit(Flags::CF, overflow);
                    flags.set_bit(Flags::OF, overflow);
                    self.regs.set_flags(flags);
                }
                Width::Word => {
                    let ax = self.regs.read16(Reg16::Ax) as i16 as i32;
                    let srcw = src_val as i16 as i32;
                    let product = ax * srcw;
                    self.regs.write16(Reg16::Ax, product as u16);
                    self.regs.write16(Reg16::Dx, (product >> 16) as u16);
                    let overflow = product != (product as i16) as i32;
                    let mut flags = self.regs.flags();
                    flags.set_bit(Flags::CF, overflow);
                    flags.set_bit(Flags::OF, overflow);
                    self.regs.set_flags(flags);
                }
            },
            MulDivOp::Div => match width {
                Width::Byte => {
                    let dividend = self.regs.read16(Reg16::Ax) as u32;
                    let divisor = src_val as u8 as u32;
                    if divisor == 0 {
                        return Err(Fault::DivideError);
                    }
                    let quotient = dividend / divisor;
                    if quotient > 0xFF {
                        return Err(Fault::DivideError);
                    }
                    let remainder = dividend % divisor;
                    self.regs.write8(Reg8::Al, quotient as u8);
                    self.regs.write8(Reg8::Ah, remainder as u8);
                }
                Width::Word => {
                    let dividend = ((self.regs.read16(Reg16::Dx) as u32) << 16)
                        | self.regs.read16(Reg16::Ax) as u32;
                    let divisor = src_val as u32;
                    if divisor == 0 {
                        return Err(Fault::DivideError);
                    }
                    let quotient = dividend / divisor;
                    if quotient > 0xFFFF {
                        return Err(Fault::DivideError);
                    }
                    let remainder = dividend % divisor;
                    self.regs.write16(Reg16::Ax, quotient as u16);
                    self.regs.write16(Reg16::Dx, remainder as u16);
                }
            },
            MulDivOp::Idiv => match width {
                Width::Byte => {
                    let dividend = self.regs.read16(Reg16::Ax) as i16;
                    let divisor = src_val as u8 as i8 as i16;
                    if divisor == 0 {
                        return Err(Fault::DivideError);
                    }
                    let quotient = dividend / divisor;
                    if quotient > i8::MAX as i16 || quotient < i8::MIN as i16 {
                        return Err(Fault::DivideError);
                    }
                    let remainder = dividend % divisor;
                    self.regs.write8(Reg8::Al, quotient as i8 as u8);
                    self.regs.write8(Reg8::Ah, remainder as i8 as u8);
                }
                Width::Word => {
                    let dividend = (((self.regs.read16(Reg16::Dx) as u32) << 16)
                        | self.regs.read16(Reg16::Ax) as u32) as i32;
                    let divisor = src_val as i16 as i32;
                    if divisor == 0 {
                        return Err(Fault::DivideError);
                    }
                    let quotient = dividend / divisor;
                    if quotient > i16::MAX as i32 || quotient < i16::MIN as i32 {
                        return Err(Fault::DivideError);
                    }
                    let remainder = dividend % divisor;
                    self.regs.write16(Reg16::Ax, quotient as i16 as u16);
                    self.regs.write16(Reg16::Dx, remainder as i16 as u16);
                }
            },
        }
        Ok(())
    }

    /// Runs one unit of `op` (one byte/word), advancing SI/DI as DF dictates.
    /// Returns the post-op ZF for CMPS/SCAS, which drive REPE/REPNE; `None`
    /// for MOVS/STOS/LODS, which never affect flags.
    fn string_unit(&mut self, op: StringOp, width: Width) -> Option<bool> {
        let step: u16 = if width == Width::Byte { 1 } else { 2 };
        let df = self.regs.flags().get_bit(Flags::DF);
        let advance = |value: u16| -> u16 {
            if df {
                value.wrapping_sub(step)
            } else {
                value.wrapping_add(step)
            }
        };

        match op {
            StringOp::Movs => {
                let ds = self.regs.read_seg(SegReg::Ds);
                let es = self.regs.read_seg(SegReg::Es);
                let si = self.regs.read16(Reg16::Si);
                let di = self.regs.read16(Reg16::Di);
                let src_addr = phys(ds, si);
                let dst_addr = phys(es, di);
                match width {
                    Width::Byte => {
                        let b = self.memory.read_byte(src_addr);
                        self.memory.write_byte(dst_addr, b);
                    }
                    Width::Word => {
                        let w = self.memory.read_word(src_addr);
                        self.memory.write_word(dst_addr, w);
                    }
                }
                self.regs.write16(Reg16::Si, advance(si));
                self.regs.write16(Reg16::Di, advance(di));
                None
            }
            StringOp::Stos => {
                let es = self.regs.read_seg(SegReg::Es);
                let di = self.regs.read16(Reg16::Di);
                let dst_addr = phys(es, di);
                match width {
                    Width::Byte => self.memory.write_byte(dst_addr, self.regs.read8(Reg8::Al)),
                    Width::Word => self.memory.write_word(dst_addr, self.regs.read16(Reg16::Ax)),
                }
                self.regs.write16(Reg16::Di, advance(di));
                None
            }
            StringOp::Lods => {
                let ds = self.regs.read_seg(SegReg::Ds);
                let si = self.regs.read16(Reg16::Si);
                let src_addr = phys(ds, si);
                match width {
                    Width::Byte => {
                        let b = self.memory.read_byte(src_addr);
                        self.regs.write8(Reg8::Al, b);
                    }
                    Width::Word => {
                        let w = self.memory.read_word(src_addr);
                        self.regs.write16(Reg16::Ax, w);
                    }
                }
                self.regs.write16(Reg16::Si, advance(si));
                None
            }
            StringOp::Cmps => {
                let ds = self.regs.read_seg(SegReg::Ds);
                let es = self.regs.read_seg(SegReg::Es);
                let si = self.regs.read16(Reg16::Si);
                let di = self.regs.read16(Reg16::Di);
                let src_addr = phys(ds, si);
                let dst_addr = phys(es, di);
                let (zf, flags) = match width {
                    Width::Byte => {
                        let a = self.memory.read_byte(src_addr);
                        let b = self.memory.read_byte(dst_addr);
                        let (_, f) = arith::sub_bytes(a, b, false);
                        (f.get_bit(Flags::ZF), f)
                    }
                    Width::Word => {
                        let a = self.memory.read_word(src_addr);
                        let b = self.memory.read_word(dst_addr);
                        let (_, f) = arith::sub_words(a, b, false);
                        (f.get_bit(Flags::ZF), f)
                    }
                };
                self.regs.set_flags(flags);
                self.regs.write16(Reg16::Si, advance(si));
                self.regs.write16(Reg16::Di, advance(di));
                Some(zf)
            }
            StringOp::Scas => {
                let es = self.regs.read_seg(SegReg::Es);
                let di = self.regs.read16(Reg16::Di);
                let dst_addr = phys(es, di);
                let (zf, flags) = match width {
                    Width::Byte => {
                        let a = self.regs.read8(Reg8::Al);
                        let b = self.memory.read_byte(dst_addr);
                        let (_, f) = arith::sub_bytes(a, b, false);
                        (f.get_bit(Flags::ZF), f)
                    }
                    Width::Word => {
                        let a = self.regs.read16(Reg16::Ax);
                        let b = self.memory.read_word(dst_addr);
                        let (_, f) = arith::sub_words(a, b, false);
                        (f.get_bit(Flags::ZF), f)
                    }
                };
                self.regs.set_flags(flags);
                self.regs.write16(Reg16::Di, advance(di));
                Some(zf)
            }
        }
    }

    /// Performs the whole repetition for a single `step()` call so CX/ZF
    /// update observably once, not once per byte copied.
    fn exec_string_op(&mut self, op: StringOp, width: Width, rep: Option<RepPrefix>) {
        match rep {
            None => {
                self.string_unit(op, width);
            }
            Some(prefix) => loop {
                let cx = self.regs.read16(Reg16::Cx);
                if cx == 0 {
                    break;
                }
                let zf = self.string_unit(op, width);
                let cx = self.regs.read16(Reg16::Cx).wrapping_sub(1);
                self.regs.write16(Reg16::Cx, cx);
                if cx == 0 {
                    break;
                }
                match (prefix, zf) {
                    (RepPrefix::Repe, Some(z)) if !z => break,
                    (RepPrefix::Repne, Some(z)) if z => break,
                    _ => {}
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{SegmentKind, Symbol};

    fn assemble_ret(program: &mut Program, code: &[u8]) {
        program.code = code.to_vec();
    }

    #[test]
    fn arithmetic_chain_s1() {
        // MOV AX,10; MOV BX,20; MOV CX,30; MOV DX,40;
        // ADD AX,BX; ADD AX,CX; ADD AX,DX; HLT
        let code = vec![
            0xB8, 10, 0, // MOV AX, 10
            0xBB, 20, 0, // MOV BX, 20
            0xB9, 30, 0, // MOV CX, 30
            0xBA, 40, 0, // MOV DX, 40
            0x01, 0xD8, // ADD AX, BX
            0x01, 0xC8, // ADD AX, CX
            0x01, 0xD0, // ADD AX, DX
            0xF4, // HLT
        ];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        let regs = sim.registers();
        assert_eq!(regs.ax, 100);
        assert_eq!(regs.bx, 20);
        assert_eq!(regs.cx, 30);
        assert_eq!(regs.dx, 40);
        assert!(!sim.flags().get_bit(Flags::ZF));
        assert!(!sim.flags().get_bit(Flags::CF));
    }

    #[test]
    fn dec_jnz_loop_s2() {
        // MOV CX,5; MOV AX,0; L: ADD AX,CX; DEC CX; JNZ L; HLT
        let code = vec![
            0xB9, 5, 0, // MOV CX, 5
            0xB8, 0, 0, // MOV AX, 0
            0x01, 0xC8, // L: ADD AX, CX
            0x49, // DEC CX
            0x75, 0xFB, // JNZ L (back 5 bytes)
            0xF4, // HLT
        ];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        let regs = sim.registers();
        assert_eq!(regs.ax, 15);
        assert_eq!(regs.cx, 0);
        assert!(sim.flags().get_bit(Flags::ZF));
    }

    #[test]
    fn loop_instruction_s3() {
        // MOV CX,5; MOV AX,0; L: INC AX; LOOP L; HLT
        let code = vec![
            0xB9, 5, 0, // MOV CX, 5
            0xB8, 0, 0, // MOV AX, 0
            0x40, // L: INC AX
            0xE2, 0xFD, // LOOP L
            0xF4, // HLT
        ];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        let regs = sim.registers();
        assert_eq!(regs.ax, 5);
        assert_eq!(regs.cx, 0);
    }

    #[test]
    fn cbw_sign_extends_s4() {
        // MOV AL,0x80; CBW; HLT
        let code = vec![0xB0, 0x80, 0x98, 0xF4];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(sim.registers().ax, 0xFF80);
    }

    #[test]
    fn mul_then_div_s5() {
        // MOV AL,5; MOV BL,10; MUL BL
        let code = vec![0xB0, 5, 0xB3, 10, 0xF6, 0xE3, 0xF4];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, retired) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(retired, 4);
        assert_eq!(sim.registers().ax, 0x0032);
        assert!(!sim.flags().get_bit(Flags::CF));
        assert!(!sim.flags().get_bit(Flags::OF));

        // MOV AX,100; MOV BL,3; DIV BL
        let code2 = vec![0xB8, 100, 0, 0xB3, 3, 0xF6, 0xF3, 0xF4];
        let mut program2 = Program::new();
        assemble_ret(&mut program2, &code2);
        sim.reset();
        sim.load(&program2);
        let (outcome2, _) = sim.run(1000);
        assert_eq!(outcome2, RunOutcome::Halted);
        assert_eq!(sim.registers().ax & 0xFF, 33);
        assert_eq!((sim.registers().ax >> 8) & 0xFF, 1);
    }

    #[test]
    fn rol_ror_s6() {
        let code = vec![0xB0, 0x81, 0xD0, 0xC0, 0xF4]; // MOV AL,0x81; ROL AL,1; HLT
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        sim.run(1000);
        assert_eq!(sim.registers().ax & 0xFF, 0x03);
        assert!(sim.flags().get_bit(Flags::CF));

        let code2 = vec![0xB0, 0x81, 0xD0, 0xC8, 0xF4]; // MOV AL,0x81; ROR AL,1; HLT
        let mut program2 = Program::new();
        assemble_ret(&mut program2, &code2);
        sim.reset();
        sim.load(&program2);
        sim.run(1000);
        assert_eq!(sim.registers().ax & 0xFF, 0xC0);
        assert!(sim.flags().get_bit(Flags::CF));
    }

    #[test]
    fn rep_movsb_copies_exactly_n_bytes() {
        let mut sim = Simulator::new();
        let program = Program::new();
        sim.load(&program);
        // place source bytes right after the (empty) code image in the code segment
        let src_base = crate::constants::CODE_BASE_PHYS + 0x200;
        let dst_base = crate::constants::DATA_BASE_PHYS + 0x200;
        sim.write_memory(src_base, &[1, 2, 3, 4, 5]);
        sim.write_memory(dst_base, &[0, 0, 0, 0, 0]);

        // DS = CS's segment so SI can reach the source bytes we just wrote under CS's base.
        let cs = sim.registers().cs;
        sim.regs.write_seg(SegReg::Ds, cs);
        sim.regs.write16(Reg16::Si, 0x200);
        sim.regs.write16(Reg16::Di, 0x200);
        sim.regs.write16(Reg16::Cx, 5);
        sim.regs.set_flags(Flags::empty());

        sim.exec_string_op(StringOp::Movs, Width::Byte, Some(RepPrefix::Rep));

        assert_eq!(sim.registers().cx, 0);
        assert_eq!(sim.registers().si, 0x205);
        assert_eq!(sim.registers().di, 0x205);
        assert_eq!(sim.read_memory(dst_base, 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn call_ret_is_stack_balanced() {
        // CALL past the HLT to a NOP that falls through into RET.
        let code = vec![
            0xE8, 0x01, 0x00, // CALL (target = offset 4)
            0xF4, // HLT
            0x90, // NOP
            0xC3, // RET
        ];
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let sp_before = sim.registers().sp;
        let (outcome, _) = sim.run(1000);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(sim.registers().sp, sp_before);
    }

    #[test]
    fn invalid_opcode_faults() {
        let code = vec![0x0F]; // not in the supported opcode table (two-byte escape)
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(10);
        assert!(matches!(outcome, RunOutcome::Fault(Fault::InvalidOpcode { .. })));
    }

    #[test]
    fn divide_by_zero_faults() {
        let code = vec![0xB8, 10, 0, 0xB3, 0, 0xF6, 0xF3]; // MOV AX,10; MOV BL,0; DIV BL
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        let (outcome, _) = sim.run(10);
        assert_eq!(outcome, RunOutcome::Fault(Fault::DivideError));
    }

    #[test]
    fn breakpoint_then_step_past_it() {
        let code = vec![0x90, 0x90, 0xF4]; // NOP; NOP; HLT
        let mut program = Program::new();
        assemble_ret(&mut program, &code);
        let mut sim = Simulator::new();
        sim.load(&program);
        sim.add_breakpoint(crate::constants::CODE_BASE_PHYS + 1);
        let (outcome, retired) = sim.run(10);
        assert_eq!(outcome, RunOutcome::BreakpointHit);
        assert_eq!(retired, 1);
        let (outcome2, _) = sim.run(10);
        assert_eq!(outcome2, RunOutcome::Halted);
    }

    #[test]
    fn unused_symbol_table_lookup_is_case_insensitive() {
        let mut program = Program::new();
        program.symbols.insert(
            "Start",
            Symbol { segment: SegmentKind::Code, offset: 0 },
        );
        let mut sim = Simulator::new();
        sim.load(&program);
        assert_eq!(sim.symbol("START"), sim.symbol("start"));
    }
}
