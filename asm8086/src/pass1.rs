//! First pass over the parsed line list: walks directives and labels to
//! build the symbol table and determine each segment's final size, using
//! only instruction/data *shapes* (never a resolved label value) so the
//! offsets it hands pass 2 never have to move once a label is defined
//! later in the file.

use crate::ast::{Directive, ParsedLine, SectionName, Stmt};
use crate::data::items_size;
use crate::encode::instruction_length;
use crate::error::AssemblyError;
use cpu8086::program::{SegmentKind, Symbol, SymbolTable};

pub struct Pass1 {
    pub symbols: SymbolTable,
    pub code_len: u16,
    pub data_len: u16,
    pub entry: Option<String>,
}

pub fn run(lines: &[ParsedLine]) -> Result<Pass1, AssemblyError> {
    let mut symbols = SymbolTable::new();
    let mut segment: Option<SegmentKind> = None;
    let mut code_len: u16 = 0;
    let mut data_len: u16 = 0;
    let mut entry: Option<String> = None;

    for line in lines {
        if let Some(label) = &line.label {
            let seg = segment.ok_or_else(|| AssemblyError::BadDirective {
                line: line.line,
                message: format!("label '{}' is defined outside of a .CODE/.DATA section", label),
            })?;
            let offset = match seg {
                SegmentKind::Code => code_len,
                SegmentKind::Data => data_len,
            };
            define_label(&mut symbols, label, seg, offset, line.line)?;
        }

        let stmt = match &line.stmt {
            Some(s) => s,
            None => continue,
        };

        match stmt {
            Stmt::Directive(dir) => match dir {
                Directive::DataSeg | Directive::Section(SectionName::Data) => segment = Some(SegmentKind::Data),
                Directive::CodeSeg | Directive::Section(SectionName::Code) => segment = Some(SegmentKind::Code),
                Directive::Org(addr) => {
                    let seg = segment.ok_or_else(|| AssemblyError::BadDirective {
                        line: line.line,
                        message: "ORG outside of a .CODE/.DATA section".to_owned(),
                    })?;
                    match seg {
                        SegmentKind::Code => code_len = *addr as u16,
                        SegmentKind::Data => data_len = *addr as u16,
                    }
                }
                Directive::Proc(name) => {
                    let seg = segment.ok_or_else(|| AssemblyError::BadDirective {
                        line: line.line,
                        message: "PROC outside of .CODE".to_owned(),
                    })?;
                    if seg != SegmentKind::Code {
                        return Err(AssemblyError::BadDirective { line: line.line, message: "PROC is only valid in .CODE".to_owned() });
                    }
                    define_label(&mut symbols, name, seg, code_len, line.line)?;
                }
                Directive::End(label) => entry = label.clone(),
                Directive::Model | Directive::Stack(_) | Directive::Endp => {}
            },
            Stmt::Data { width, items } => {
                let seg = segment.unwrap_or(SegmentKind::Data);
                let size = items_size(items, *width);
                match seg {
                    SegmentKind::Code => code_len += size,
                    SegmentKind::Data => data_len += size,
                }
            }
            Stmt::Instruction(instr) => {
                let seg = segment.ok_or_else(|| AssemblyError::BadDirective {
                    line: line.line,
                    message: "instruction outside of .CODE".to_owned(),
                })?;
                if seg != SegmentKind::Code {
                    return Err(AssemblyError::BadDirective {
                        line: line.line,
                        message: "instructions are only valid in .CODE".to_owned(),
                    });
                }
                code_len += instruction_length(instr, line.line)?;
            }
        }
    }

    Ok(Pass1 { symbols, code_len, data_len, entry })
}

fn define_label(symbols: &mut SymbolTable, name: &str, segment: SegmentKind, offset: u16, line: u32) -> Result<(), AssemblyError> {
    if symbols.contains(name) {
        return Err(AssemblyError::DuplicateLabel { line, name: name.to_owned() });
    }
    symbols.insert(name, Symbol { segment, offset });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_program;

    #[test]
    fn labels_land_at_the_right_offsets_across_both_segments() {
        let src = ".MODEL SMALL\n.DATA\nMSG DB 'HI', 0\n.CODE\nSTART:\nMOV AX, 1\nLOOP_TOP:\nINC AX\nEND START\n";
        let lines = parse_program(src).unwrap();
        let result = run(&lines).unwrap();
        assert_eq!(result.symbols.get("MSG").unwrap().segment, SegmentKind::Data);
        assert_eq!(result.symbols.get("MSG").unwrap().offset, 0);
        assert_eq!(result.symbols.get("START").unwrap().offset, 0);
        assert_eq!(result.symbols.get("LOOP_TOP").unwrap().offset, 3);
        assert_eq!(result.entry.as_deref(), Some("START"));
        assert_eq!(result.data_len, 3);
        assert_eq!(result.code_len, 4);
    }

    #[test]
    fn redefined_label_is_rejected() {
        let src = ".CODE\nA: NOP\nA: NOP\n";
        let lines = parse_program(src).unwrap();
        let err = run(&lines).unwrap_err();
        assert!(matches!(err, AssemblyError::DuplicateLabel { .. }));
    }

    #[test]
    fn forward_reference_does_not_move_earlier_offsets() {
        let src = ".CODE\nJMP AHEAD\nNOP\nAHEAD:\nNOP\n";
        let lines = parse_program(src).unwrap();
        let result = run(&lines).unwrap();
        assert_eq!(result.symbols.get("AHEAD").unwrap().offset, 4);
    }
}
