//! Two-pass assembler for the [`cpu8086`] instruction set.
//!
//! [`assemble`] turns a MASM/NASM-hybrid source string into a
//! [`cpu8086::Program`]: a code image, a data image, the symbol table that
//! resolved them, and the entry offset named by `END`. The simulator's
//! `load()` takes that `Program` directly.
//!
//! # Dialect
//!
//! A program is a sequence of lines, each an optional `label:`, followed by
//! an optional directive/data/instruction statement. Segments are framed
//! with either `.MODEL`/`.DATA`/`.CODE` or `SECTION .data`/`SECTION .code`;
//! `ORG` sets the current segment's location counter, and `END label` names
//! the entry point. `NAME PROC` defines `NAME` at the current code offset,
//! same as an ordinary label, and `ENDP` is accepted but otherwise ignored.
//!
//! `DB`/`DW` declare byte/word data: integer literals, `'quoted strings'`,
//! and `count DUP(fill)` repeats.
//!
//! Instructions use Intel operand order (`dst, src`) over the registers and
//! addressing modes in [`cpu8086::register`] and [`cpu8086::decode`]. Memory
//! operands are written `[BASE+INDEX+disp]` or `[label]`; `OFFSET label` and
//! a bare label both resolve to the label's offset, and the special name
//! `@DATA` resolves to [`cpu8086::constants::DEFAULT_DATA_SEGMENT`] the way
//! a `.DATA` segment's paragraph would in a real MASM `.MODEL SMALL`
//! program.
//!
//! This dialect has no `BYTE PTR`/`WORD PTR` qualifiers, so at least one
//! operand of any width-sensitive instruction must be a register; shift and
//! rotate counts must be the literal `1` or `CL`; and `JMP`/`CALL` to a
//! label always assemble to the near (disp16) form, never the short form,
//! since pass 1 can't know in advance which forward references will fit a
//! signed byte. `Jcc`, `LOOP`/`LOOPE`/`LOOPNE`, and `JCXZ` remain
//! inherently short (disp8) branches, as on real 8086 hardware.

mod ast;
mod data;
mod encode;
mod error;
mod operand;
mod parse;
mod pass1;
mod source_map;

pub use ast::{DataItem, DataWidth, Directive, Instr, OperandAst, ParsedLine, RepMnemonic, Stmt};
pub use error::{AssemblyError, Result};
pub use source_map::{SourceMap, SourceMapItem};

use cpu8086::program::{Program, SegmentKind};

/// Assembles `source` into a loadable [`cpu8086::Program`].
///
/// Runs pass 1 (`pass1::run`) to size both segments and resolve every
/// label, then pass 2 to encode each instruction/data item against the
/// now-complete symbol table. A forward reference that pass 1 couldn't
/// resolve by the end of the file surfaces as
/// [`AssemblyError::UndefinedLabel`].
pub fn assemble(source: &str) -> Result<Program> {
    let lines = parse::parse_program(source)?;
    log::debug!("parsed {} source line(s)", lines.len());
    let layout = pass1::run(&lines)?;
    log::debug!("pass 1: {} byte(s) of code, {} byte(s) of data, {} symbol(s)", layout.code_len, layout.data_len, layout.symbols.len());

    let mut code = Vec::with_capacity(layout.code_len as usize);
    let mut data = Vec::with_capacity(layout.data_len as usize);
    let mut segment: Option<SegmentKind> = None;

    for line in &lines {
        let stmt = match &line.stmt {
            Some(stmt) => stmt,
            None => continue,
        };
        match stmt {
            Stmt::Directive(Directive::DataSeg) => segment = Some(SegmentKind::Data),
            Stmt::Directive(Directive::Section(ast::SectionName::Data)) => segment = Some(SegmentKind::Data),
            Stmt::Directive(Directive::CodeSeg) => segment = Some(SegmentKind::Code),
            Stmt::Directive(Directive::Section(ast::SectionName::Code)) => segment = Some(SegmentKind::Code),
            Stmt::Directive(Directive::Org(addr)) => {
                let addr = *addr as u16;
                match segment {
                    Some(SegmentKind::Code) => code.resize(addr as usize, 0),
                    Some(SegmentKind::Data) => data.resize(addr as usize, 0),
                    None => {}
                }
            }
            Stmt::Directive(_) => {}
            Stmt::Data { width, items } => data::emit_items(items, *width, &mut data),
            Stmt::Instruction(instr) => {
                let next_ip = code.len() as u16 + encode::instruction_length(instr, line.line)?;
                let bytes = encode::encode_instruction(instr, next_ip, line.line, &layout.symbols)?;
                code.extend(bytes);
            }
        }
    }

    let entry_offset = match &layout.entry {
        Some(name) => layout.symbols.get(name).ok_or_else(|| AssemblyError::UndefinedLabel { line: 0, name: name.clone() })?.offset,
        None => 0,
    };

    log::info!("assembled {} byte(s) of code, {} byte(s) of data, entry at {:#06x}", code.len(), data.len(), entry_offset);
    Ok(Program { code, data, symbols: layout.symbols, entry_offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_tiny_program_with_data_and_a_forward_jump() {
        let src = "\
.MODEL SMALL
.DATA
MSG DB 'HI', 0
.CODE
START:
MOV AX, @DATA
MOV DS, AX
MOV AX, 1
JMP DONE
NOP
DONE:
MOV AX, 0
INT 21h
END START
";
        let program = assemble(src).unwrap();
        assert_eq!(program.data, vec![b'H', b'I', 0]);
        assert_eq!(program.entry_offset, 0);
        assert!(!program.code.is_empty());
        let done = program.symbols.get("DONE").unwrap();
        assert_eq!(done.segment, SegmentKind::Code);
    }

    #[test]
    fn unknown_mnemonic_is_reported_with_its_line() {
        let src = ".CODE\nFROB AX, BX\n";
        let err = assemble(src).unwrap_err();
        match err {
            AssemblyError::UnknownMnemonic { line, mnemonic } => {
                assert_eq!(line, 2);
                assert_eq!(mnemonic, "FROB");
            }
            other => panic!("expected UnknownMnemonic, got {:?}", other),
        }
    }

    #[test]
    fn undefined_label_is_rejected() {
        let src = ".CODE\nJMP NOWHERE\n";
        let err = assemble(src).unwrap_err();
        assert!(matches!(err, AssemblyError::UndefinedLabel { .. }));
    }

    #[test]
    fn disassembling_assembled_code_reproduces_the_mnemonic_stream() {
        let src = ".CODE\nMOV AX, 5\nADD AX, BX\nINC AX\nHLT\n";
        let program = assemble(src).unwrap();
        let instructions = cpu8086::decode::disassemble(&program.code);
        assert_eq!(instructions.len(), 4);
    }
}
