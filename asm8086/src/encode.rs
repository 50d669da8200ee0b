//! Pass 2 opcode emission. For every mnemonic this crate accepts, selects
//! an encoding from the same opcode space `cpu8086::decode` reads back and
//! writes the real bytes. `instruction_length` performs the matching
//! kind-only calculation pass 1 uses to size the code segment before any
//! label is resolved — the two functions are written mnemonic-by-mnemonic
//! in the same order so a change to one's shape is easy to mirror in the
//! other.
//!
//! This dialect has no `BYTE PTR`/`WORD PTR` qualifiers, so any instruction
//! whose operand width can't be read off a register operand (a bare memory
//! destination with an immediate source, or a memory-only shift/rotate)
//! is rejected with `BadOperand` rather than guessed at.

use crate::ast::{Instr, OperandAst, RepMnemonic};
use crate::error::AssemblyError;
use crate::operand::{self, ResolvedMem};
use cpu8086::constants::DEFAULT_DATA_SEGMENT;
use cpu8086::program::{SegmentKind, SymbolTable};
use cpu8086::register::{Reg16, Reg8, SegReg};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Width {
    Byte,
    Word,
}

enum Place {
    Reg8(Reg8),
    Reg16(Reg16),
    Seg(SegReg),
    Mem(ResolvedMem),
    /// An immediate value, and whether it came from a label (`OFFSET`, a
    /// bare label, or `@DATA`) rather than a literal — label-derived values
    /// always take the wide encoding since pass 1 can't know them yet.
    Imm(i32, bool),
}

fn bad_operand(line: u32, message: impl Into<String>) -> AssemblyError {
    AssemblyError::BadOperand { line, mnemonic: String::new(), message: message.into() }
}

fn resolve_operand(op: &OperandAst, symbols: &SymbolTable, line: u32) -> Result<Place, AssemblyError> {
    match op {
        OperandAst::Register(name) => {
            if let Some(r) = operand::reg8_from_name(name) {
                return Ok(Place::Reg8(r));
            }
            if let Some(r) = operand::reg16_from_name(name) {
                return Ok(Place::Reg16(r));
            }
            if let Some(s) = operand::segreg_from_name(name) {
                return Ok(Place::Seg(s));
            }
            Err(bad_operand(line, format!("'{}' is not a register", name)))
        }
        OperandAst::Immediate(n) => Ok(Place::Imm(*n, false)),
        OperandAst::OffsetOf(name) => {
            let sym = symbols.get(name).ok_or_else(|| AssemblyError::UndefinedLabel { line, name: name.clone() })?;
            Ok(Place::Imm(sym.offset as i32, true))
        }
        OperandAst::LabelRef(name) => {
            if name.eq_ignore_ascii_case("@DATA") {
                return Ok(Place::Imm(DEFAULT_DATA_SEGMENT as i32, true));
            }
            let sym = symbols.get(name).ok_or_else(|| AssemblyError::UndefinedLabel { line, name: name.clone() })?;
            Ok(Place::Imm(sym.offset as i32, true))
        }
        OperandAst::Memory(mem) => {
            let resolved = ResolvedMem::resolve(mem, line, |label| symbols.get(label).map(|s| s.offset))?;
            Ok(Place::Mem(resolved))
        }
        OperandAst::Str(_) => Err(bad_operand(line, "string literals are only valid in data definitions")),
    }
}

fn resolve_jump_target(op: &OperandAst, symbols: &SymbolTable, line: u32) -> Result<u16, AssemblyError> {
    let name = match op {
        OperandAst::LabelRef(name) => name,
        _ => return Err(bad_operand(line, "expected a label")),
    };
    let sym = symbols.get(name).ok_or_else(|| AssemblyError::UndefinedLabel { line, name: name.clone() })?;
    if sym.segment != SegmentKind::Code {
        return Err(bad_operand(line, format!("'{}' is a data label, not a code label", name)));
    }
    Ok(sym.offset)
}

fn width_of_place(p: &Place) -> Option<Width> {
    match p {
        Place::Reg8(_) => Some(Width::Byte),
        Place::Reg16(_) => Some(Width::Word),
        _ => None,
    }
}

fn two_operand_width(line: u32, mnemonic: &str, dst: &Place, src: &Place) -> Result<Width, AssemblyError> {
    match (width_of_place(dst), width_of_place(src)) {
        (Some(a), Some(b)) if a == b => Ok(a),
        (Some(_), Some(_)) => {
            Err(AssemblyError::BadOperand { line, mnemonic: mnemonic.to_owned(), message: "operand widths do not match".to_owned() })
        }
        (Some(a), None) => Ok(a),
        (None, Some(b)) => Ok(b),
        (None, None) => Err(AssemblyError::BadOperand {
            line,
            mnemonic: mnemonic.to_owned(),
            message: "operand size is ambiguous; at least one operand must be a register".to_owned(),
        }),
    }
}

fn single_operand_width(line: u32, mnemonic: &str, p: &Place) -> Result<Width, AssemblyError> {
    width_of_place(p).ok_or_else(|| AssemblyError::BadOperand {
        line,
        mnemonic: mnemonic.to_owned(),
        message: "operand must be a register (this dialect has no BYTE PTR/WORD PTR qualifiers)".to_owned(),
    })
}

fn place_reg_field(p: &Place, line: u32) -> Result<u8, AssemblyError> {
    match p {
        Place::Reg8(r) => Ok(operand::reg8_field(*r)),
        Place::Reg16(r) => Ok(operand::reg16_field(*r)),
        Place::Seg(s) => Ok(operand::segreg_field(*s)),
        _ => Err(bad_operand(line, "expected a register operand")),
    }
}

fn encode_rm_bytes(p: &Place, reg_field: u8, line: u32) -> Result<Vec<u8>, AssemblyError> {
    match p {
        Place::Reg8(r) => Ok(vec![0b11_000_000 | (reg_field << 3) | operand::reg8_field(*r)]),
        Place::Reg16(r) => Ok(vec![0b11_000_000 | (reg_field << 3) | operand::reg16_field(*r)]),
        Place::Mem(m) => m.encode_modrm(reg_field, line),
        _ => Err(bad_operand(line, "expected a register or memory operand")),
    }
}

/// Shared shape for `MOV r/m, reg` (base 0x88) and the arithmetic group's
/// register/memory forms (base = block*8): `base + width_bit + dir_bit*2`.
fn encode_reg_rm(base: u8, dst: &Place, src: &Place, width: Width, line: u32) -> Result<Vec<u8>, AssemblyError> {
    let width_bit = (width == Width::Word) as u8;
    let (reg_place, rm_place, to_reg): (&Place, &Place, bool) = match (dst, src) {
        (Place::Mem(_), Place::Mem(_)) => return Err(bad_operand(line, "both operands cannot be memory")),
        (d, Place::Mem(_)) if matches!(d, Place::Reg8(_) | Place::Reg16(_)) => (d, src, true),
        (Place::Mem(_), s) if matches!(s, Place::Reg8(_) | Place::Reg16(_)) => (s, dst, false),
        (d, s) => (s, d, false),
    };
    let opcode = base + width_bit + if to_reg { 2 } else { 0 };
    let reg_field = place_reg_field(reg_place, line)?;
    let mut out = vec![opcode];
    out.extend(encode_rm_bytes(rm_place, reg_field, line)?);
    Ok(out)
}

fn push_word(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn arith_block(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "ADD" => 0,
        "OR" => 1,
        "ADC" => 2,
        "SBB" => 3,
        "AND" => 4,
        "SUB" => 5,
        "XOR" => 6,
        "CMP" => 7,
        _ => return None,
    })
}

fn shift_rotate_reg_field(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "ROL" => 0,
        "ROR" => 1,
        "RCL" => 2,
        "RCR" => 3,
        "SHL" | "SAL" => 4,
        "SHR" => 5,
        "SAR" => 7,
        _ => return None,
    })
}

fn jcc_opcode(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "JO" => 0x70,
        "JNO" => 0x71,
        "JB" | "JNAE" | "JC" => 0x72,
        "JAE" | "JNB" | "JNC" => 0x73,
        "JE" | "JZ" => 0x74,
        "JNE" | "JNZ" => 0x75,
        "JBE" | "JNA" => 0x76,
        "JA" | "JNBE" => 0x77,
        "JS" => 0x78,
        "JNS" => 0x79,
        "JP" | "JPE" => 0x7A,
        "JNP" | "JPO" => 0x7B,
        "JL" | "JNGE" => 0x7C,
        "JGE" | "JNL" => 0x7D,
        "JLE" | "JNG" => 0x7E,
        "JG" | "JNLE" => 0x7F,
        _ => return None,
    })
}

fn loop_opcode(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "LOOP" => 0xE2,
        "LOOPE" | "LOOPZ" => 0xE1,
        "LOOPNE" | "LOOPNZ" => 0xE0,
        _ => return None,
    })
}

fn string_opcode(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "MOVSB" => 0xA4,
        "MOVSW" => 0xA5,
        "CMPSB" => 0xA6,
        "CMPSW" => 0xA7,
        "STOSB" => 0xAA,
        "STOSW" => 0xAB,
        "LODSB" => 0xAC,
        "LODSW" => 0xAD,
        "SCASB" => 0xAE,
        "SCASW" => 0xAF,
        _ => return None,
    })
}

fn rep_prefix_byte(rep: RepMnemonic) -> u8 {
    match rep {
        RepMnemonic::Repne => 0xF2,
        RepMnemonic::Rep | RepMnemonic::Repe => 0xF3,
    }
}

fn no_operand_opcode(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "CBW" => 0x98,
        "CWD" => 0x99,
        "LAHF" => 0x9F,
        "SAHF" => 0x9E,
        "CLC" => 0xF8,
        "STC" => 0xF9,
        "CLI" => 0xFA,
        "STI" => 0xFB,
        "CLD" => 0xFC,
        "STD" => 0xFD,
        "NOP" => 0x90,
        "HLT" => 0xF4,
        "IRET" => 0xCF,
        _ => return None,
    })
}

fn expect_operands<'a>(instr: &'a Instr, n: usize, line: u32) -> Result<&'a [OperandAst], AssemblyError> {
    if instr.operands.len() != n {
        return Err(AssemblyError::BadOperand {
            line,
            mnemonic: instr.mnemonic.clone(),
            message: format!("expected {} operand(s), found {}", n, instr.operands.len()),
        });
    }
    Ok(&instr.operands)
}

fn is_imm_like(op: &OperandAst) -> bool {
    matches!(op, OperandAst::Immediate(_) | OperandAst::OffsetOf(_) | OperandAst::LabelRef(_))
}

fn rm_extra(op: &OperandAst) -> u16 {
    match op {
        OperandAst::Memory(m) => operand::mem_extra_len(m),
        _ => 0,
    }
}

fn reg_width_from_ast(op: &OperandAst) -> Option<Width> {
    match op {
        OperandAst::Register(name) => {
            if operand::reg8_from_name(name).is_some() {
                Some(Width::Byte)
            } else if operand::reg16_from_name(name).is_some() {
                Some(Width::Word)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_seg_ast(op: &OperandAst) -> bool {
    matches!(op, OperandAst::Register(name) if operand::segreg_from_name(name).is_some())
}

/// Pure kind-based byte count, matching `encode_instruction`'s shape for
/// the same mnemonic exactly, but never needing a resolved label value.
pub fn instruction_length(instr: &Instr, line: u32) -> Result<u16, AssemblyError> {
    let m = instr.mnemonic.as_str();
    let ops = &instr.operands;

    if let Some(rep_op) = string_opcode(m) {
        let _ = rep_op;
        expect_operands(instr, 0, line)?;
        return Ok(1 + instr.rep.is_some() as u16);
    }
    if no_operand_opcode(m).is_some() {
        expect_operands(instr, 0, line)?;
        return Ok(1);
    }

    match m {
        "MOV" => {
            let ops = expect_operands(instr, 2, line)?;
            let (a, b) = (&ops[0], &ops[1]);
            if is_seg_ast(a) || is_seg_ast(b) {
                Ok(1 + 1 + rm_extra(a) + rm_extra(b))
            } else if is_imm_like(b) {
                match reg_width_from_ast(a) {
                    Some(Width::Byte) => Ok(1 + 1),
                    Some(Width::Word) => Ok(1 + 2),
                    None => Err(bad_operand(line, "MOV destination must be a register when the source is an immediate")),
                }
            } else {
                Ok(1 + 1 + rm_extra(a) + rm_extra(b))
            }
        }
        "ADD" | "OR" | "ADC" | "SBB" | "AND" | "SUB" | "XOR" | "CMP" | "TEST" => {
            let ops = expect_operands(instr, 2, line)?;
            let (a, b) = (&ops[0], &ops[1]);
            if is_imm_like(b) {
                let width = match reg_width_from_ast(a) {
                    Some(w) => w,
                    None => return Err(bad_operand(line, "destination must be a register when the source is an immediate")),
                };
                let imm_bytes = if width == Width::Byte { 1 } else { 2 };
                Ok(1 + 1 + imm_bytes)
            } else {
                Ok(1 + 1 + rm_extra(a) + rm_extra(b))
            }
        }
        "PUSH" | "POP" => {
            let ops = expect_operands(instr, 1, line)?;
            match &ops[0] {
                OperandAst::Register(name) if operand::reg16_from_name(name).is_some() => Ok(1),
                OperandAst::Memory(mem) => Ok(1 + 1 + operand::mem_extra_len(mem)),
                _ => Err(bad_operand(line, "PUSH/POP operand must be a 16-bit register or memory location")),
            }
        }
        "INC" | "DEC" => {
            let ops = expect_operands(instr, 1, line)?;
            match &ops[0] {
                OperandAst::Register(name) if operand::reg16_from_name(name).is_some() => Ok(1),
                OperandAst::Register(name) if operand::reg8_from_name(name).is_some() => Ok(1 + 1),
                _ => Err(bad_operand(line, "INC/DEC operand must be a register")),
            }
        }
        "NOT" | "NEG" | "MUL" | "IMUL" | "DIV" | "IDIV" => {
            let ops = expect_operands(instr, 1, line)?;
            match reg_width_from_ast(&ops[0]) {
                Some(_) => Ok(1 + 1),
                None => Err(bad_operand(line, "operand must be a register (no BYTE PTR/WORD PTR support)")),
            }
        }
        "SHL" | "SAL" | "SHR" | "SAR" | "ROL" | "ROR" | "RCL" | "RCR" => {
            let ops = expect_operands(instr, 2, line)?;
            match reg_width_from_ast(&ops[0]) {
                Some(_) => Ok(1 + 1),
                None => Err(bad_operand(line, "shift/rotate operand must be a register")),
            }
        }
        "JMP" | "CALL" => {
            expect_operands(instr, 1, line)?;
            Ok(3)
        }
        "JCXZ" => {
            expect_operands(instr, 1, line)?;
            Ok(2)
        }
        _ if jcc_opcode(m).is_some() => {
            expect_operands(instr, 1, line)?;
            Ok(2)
        }
        _ if loop_opcode(m).is_some() => {
            expect_operands(instr, 1, line)?;
            Ok(2)
        }
        "RET" => {
            if ops.is_empty() {
                Ok(1)
            } else {
                expect_operands(instr, 1, line)?;
                Ok(1 + 2)
            }
        }
        "INT" => {
            expect_operands(instr, 1, line)?;
            Ok(1 + 1)
        }
        _ => Err(AssemblyError::UnknownMnemonic { line, mnemonic: instr.mnemonic.clone() }),
    }
}

/// `next_ip` is the code offset immediately after this instruction — the
/// same value `instruction_length` lets pass 1 predict — used to compute
/// relative branch displacements the same way `cpu8086::decode` resolves
/// them on the way back in.
pub fn encode_instruction(instr: &Instr, next_ip: u16, line: u32, symbols: &SymbolTable) -> Result<Vec<u8>, AssemblyError> {
    let m = instr.mnemonic.as_str();

    if let Some(opcode) = string_opcode(m) {
        expect_operands(instr, 0, line)?;
        let mut out = Vec::new();
        if let Some(rep) = instr.rep {
            out.push(rep_prefix_byte(rep));
        }
        out.push(opcode);
        return Ok(out);
    }
    if let Some(opcode) = no_operand_opcode(m) {
        expect_operands(instr, 0, line)?;
        return Ok(vec![opcode]);
    }

    match m {
        "MOV" => {
            let ops = expect_operands(instr, 2, line)?;
            let dst = resolve_operand(&ops[0], symbols, line)?;
            let src = resolve_operand(&ops[1], symbols, line)?;
            if matches!(dst, Place::Seg(_)) || matches!(src, Place::Seg(_)) {
                let (seg_place, other, to_reg) = if matches!(dst, Place::Seg(_)) {
                    (&dst, &src, true)
                } else {
                    (&src, &dst, false)
                };
                let opcode = if to_reg { 0x8E } else { 0x8C };
                let reg_field = place_reg_field(seg_place, line)?;
                let mut out = vec![opcode];
                out.extend(encode_rm_bytes(other, reg_field, line)?);
                Ok(out)
            } else if let Place::Imm(value, forced_wide) = src {
                match dst {
                    Place::Reg8(r) => {
                        if forced_wide {
                            return Err(bad_operand(line, "a label address does not fit an 8-bit MOV"));
                        }
                        Ok(vec![0xB0 + operand::reg8_field(r), value as u8])
                    }
                    Place::Reg16(r) => {
                        let mut out = vec![0xB8 + operand::reg16_field(r)];
                        push_word(&mut out, value as u16);
                        Ok(out)
                    }
                    _ => Err(bad_operand(line, "MOV destination must be a register when the source is an immediate")),
                }
            } else {
                let width = two_operand_width(line, m, &dst, &src)?;
                encode_reg_rm(0x88, &dst, &src, width, line)
            }
        }

        "ADD" | "OR" | "ADC" | "SBB" | "AND" | "SUB" | "XOR" | "CMP" => {
            let ops = expect_operands(instr, 2, line)?;
            let dst = resolve_operand(&ops[0], symbols, line)?;
            let src = resolve_operand(&ops[1], symbols, line)?;
            let block = arith_block(m).expect("checked by outer match");
            if let Place::Imm(value, forced_wide) = src {
                let width = single_operand_width(line, m, &dst)?;
                if forced_wide && width == Width::Byte {
                    return Err(bad_operand(line, "a label address does not fit an 8-bit operand"));
                }
                let opcode = if width == Width::Byte { 0x80 } else { 0x81 };
                let mut out = vec![opcode];
                out.extend(encode_rm_bytes(&dst, block, line)?);
                match width {
                    Width::Byte => out.push(value as u8),
                    Width::Word => push_word(&mut out, value as u16),
                }
                Ok(out)
            } else {
                let width = two_operand_width(line, m, &dst, &src)?;
                encode_reg_rm(block * 8, &dst, &src, width, line)
            }
        }

        "TEST" => {
            let ops = expect_operands(instr, 2, line)?;
            let dst = resolve_operand(&ops[0], symbols, line)?;
            let src = resolve_operand(&ops[1], symbols, line)?;
            if let Place::Imm(value, forced_wide) = src {
                let width = single_operand_width(line, m, &dst)?;
                if forced_wide && width == Width::Byte {
                    return Err(bad_operand(line, "a label address does not fit an 8-bit operand"));
                }
                let opcode = if width == Width::Byte { 0xF6 } else { 0xF7 };
                let mut out = vec![opcode];
                out.extend(encode_rm_bytes(&dst, 0, line)?);
                match width {
                    Width::Byte => out.push(value as u8),
                    Width::Word => push_word(&mut out, value as u16),
                }
                Ok(out)
            } else {
                let width = two_operand_width(line, m, &dst, &src)?;
                let (reg_place, rm_place) = if matches!(dst, Place::Reg8(_) | Place::Reg16(_)) { (&dst, &src) } else { (&src, &dst) };
                let reg_field = place_reg_field(reg_place, line)?;
                let opcode = if width == Width::Byte { 0x84 } else { 0x85 };
                let mut out = vec![opcode];
                out.extend(encode_rm_bytes(rm_place, reg_field, line)?);
                Ok(out)
            }
        }

        "PUSH" | "POP" => {
            let ops = expect_operands(instr, 1, line)?;
            let place = resolve_operand(&ops[0], symbols, line)?;
            let is_push = m == "PUSH";
            match place {
                Place::Reg16(r) => Ok(vec![if is_push { 0x50 } else { 0x58 } + operand::reg16_field(r)]),
                Place::Mem(mem) => {
                    let opcode = if is_push { 0xFF } else { 0x8F };
                    let reg_field = if is_push { 6 } else { 0 };
                    let mut out = vec![opcode];
                    out.extend(mem.encode_modrm(reg_field, line)?);
                    Ok(out)
                }
                _ => Err(bad_operand(line, "PUSH/POP operand must be a 16-bit register or memory location")),
            }
        }

        "INC" | "DEC" => {
            let ops = expect_operands(instr, 1, line)?;
            let place = resolve_operand(&ops[0], symbols, line)?;
            let is_inc = m == "INC";
            match place {
                Place::Reg16(r) => Ok(vec![if is_inc { 0x40 } else { 0x48 } + operand::reg16_field(r)]),
                Place::Reg8(r) => {
                    let reg_field = if is_inc { 0 } else { 1 };
                    Ok(vec![0xFE, 0b11_000_000 | (reg_field << 3) | operand::reg8_field(r)])
                }
                _ => Err(bad_operand(line, "INC/DEC operand must be a register")),
            }
        }

        "NOT" | "NEG" | "MUL" | "IMUL" | "DIV" | "IDIV" => {
            let ops = expect_operands(instr, 1, line)?;
            let place = resolve_operand(&ops[0], symbols, line)?;
            let reg_field = match m {
                "NOT" => 2,
                "NEG" => 3,
                "MUL" => 4,
                "IMUL" => 5,
                "DIV" => 6,
                "IDIV" => 7,
                _ => unreachable!(),
            };
            let width = single_operand_width(line, m, &place)?;
            let opcode = if width == Width::Byte { 0xF6 } else { 0xF7 };
            Ok(vec![opcode, 0b11_000_000 | (reg_field << 3) | place_reg_field(&place, line)?])
        }

        "SHL" | "SAL" | "SHR" | "SAR" | "ROL" | "ROR" | "RCL" | "RCR" => {
            let ops = expect_operands(instr, 2, line)?;
            let rm = resolve_operand(&ops[0], symbols, line)?;
            let width = single_operand_width(line, m, &rm)?;
            let reg_field = shift_rotate_reg_field(m).expect("checked by outer match");
            let count_is_cl = match &ops[1] {
                OperandAst::Register(name) if name == "CL" => true,
                OperandAst::Immediate(1) => false,
                _ => return Err(bad_operand(line, "shift/rotate count must be 1 or CL")),
            };
            let base = if width == Width::Byte { 0xD0 } else { 0xD1 };
            let opcode = base + if count_is_cl { 2 } else { 0 };
            Ok(vec![opcode, 0b11_000_000 | (reg_field << 3) | place_reg_field(&rm, line)?])
        }

        "JMP" => {
            let ops = expect_operands(instr, 1, line)?;
            let target = resolve_jump_target(&ops[0], symbols, line)?;
            let disp = target.wrapping_sub(next_ip);
            let mut out = vec![0xE9];
            push_word(&mut out, disp);
            Ok(out)
        }
        "CALL" => {
            let ops = expect_operands(instr, 1, line)?;
            let target = resolve_jump_target(&ops[0], symbols, line)?;
            let disp = target.wrapping_sub(next_ip);
            let mut out = vec![0xE8];
            push_word(&mut out, disp);
            Ok(out)
        }
        "JCXZ" => {
            let ops = expect_operands(instr, 1, line)?;
            let target = resolve_jump_target(&ops[0], symbols, line)?;
            let disp = short_displacement(target, next_ip, line)?;
            Ok(vec![0xE3, disp as u8])
        }
        _ if jcc_opcode(m).is_some() => {
            let ops = expect_operands(instr, 1, line)?;
            let target = resolve_jump_target(&ops[0], symbols, line)?;
            let disp = short_displacement(target, next_ip, line)?;
            Ok(vec![jcc_opcode(m).unwrap(), disp as u8])
        }
        _ if loop_opcode(m).is_some() => {
            let ops = expect_operands(instr, 1, line)?;
            let target = resolve_jump_target(&ops[0], symbols, line)?;
            let disp = short_displacement(target, next_ip, line)?;
            Ok(vec![loop_opcode(m).unwrap(), disp as u8])
        }

        "RET" => {
            if instr.operands.is_empty() {
                Ok(vec![0xC3])
            } else {
                let ops = expect_operands(instr, 1, line)?;
                let imm = match &ops[0] {
                    OperandAst::Immediate(n) => *n as u16,
                    _ => return Err(bad_operand(line, "RET's operand must be a numeric literal")),
                };
                let mut out = vec![0xC2];
                push_word(&mut out, imm);
                Ok(out)
            }
        }
        "INT" => {
            let ops = expect_operands(instr, 1, line)?;
            let vector = match &ops[0] {
                OperandAst::Immediate(n) => *n as u8,
                _ => return Err(bad_operand(line, "INT's operand must be a numeric literal")),
            };
            Ok(vec![0xCD, vector])
        }

        _ => Err(AssemblyError::UnknownMnemonic { line, mnemonic: instr.mnemonic.clone() }),
    }
}

fn short_displacement(target: u16, next_ip: u16, line: u32) -> Result<i8, AssemblyError> {
    let disp = target.wrapping_sub(next_ip) as i16;
    i8::try_from(disp).map_err(|_| AssemblyError::JumpOutOfRange { line })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Instr;
    use cpu8086::program::{SegmentKind, Symbol};

    fn instr(mnemonic: &str, operands: Vec<OperandAst>) -> Instr {
        Instr { rep: None, mnemonic: mnemonic.to_owned(), operands }
    }

    #[test]
    fn mov_reg_imm16_is_three_bytes() {
        let i = instr("MOV", vec![OperandAst::Register("AX".to_owned()), OperandAst::Immediate(0x1234)]);
        assert_eq!(instruction_length(&i, 1).unwrap(), 3);
        let bytes = encode_instruction(&i, 0, 1, &SymbolTable::new()).unwrap();
        assert_eq!(bytes, vec![0xB8, 0x34, 0x12]);
    }

    #[test]
    fn add_reg_reg_round_trips_modrm_direction() {
        let i = instr("ADD", vec![OperandAst::Register("AX".to_owned()), OperandAst::Register("BX".to_owned())]);
        let bytes = encode_instruction(&i, 0, 1, &SymbolTable::new()).unwrap();
        assert_eq!(bytes, vec![0x01, 0b11_011_000]);
    }

    #[test]
    fn jmp_to_label_is_near_and_relative_to_next_ip() {
        let mut symbols = SymbolTable::new();
        symbols.insert("TOP", Symbol { segment: SegmentKind::Code, offset: 0 });
        let i = instr("JMP", vec![OperandAst::LabelRef("TOP".to_owned())]);
        let bytes = encode_instruction(&i, 10, 1, &symbols).unwrap();
        assert_eq!(bytes[0], 0xE9);
        let disp = u16::from_le_bytes([bytes[1], bytes[2]]);
        assert_eq!(disp, 0u16.wrapping_sub(10));
    }

    #[test]
    fn short_jump_out_of_range_is_an_error() {
        let mut symbols = SymbolTable::new();
        symbols.insert("FAR", Symbol { segment: SegmentKind::Code, offset: 1000 });
        let i = instr("JE", vec![OperandAst::LabelRef("FAR".to_owned())]);
        let err = encode_instruction(&i, 2, 1, &symbols).unwrap_err();
        assert!(matches!(err, AssemblyError::JumpOutOfRange { .. }));
    }

    #[test]
    fn mem_imm_without_a_register_is_rejected() {
        let mem = crate::ast::MemoryAst { base: None, index: None, disp: 4, direct_label: None };
        let i = instr("MOV", vec![OperandAst::Memory(mem), OperandAst::Immediate(1)]);
        assert!(instruction_length(&i, 1).is_err());
    }
}
