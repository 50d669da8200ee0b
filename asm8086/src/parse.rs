//! Turns source text into the [`ast`](crate::ast) tree. This is the only
//! module that ever looks at a pest `Pair`; everything downstream works on
//! plain enums.

use crate::ast::*;
use crate::error::AssemblyError;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as DeriveParser;

#[derive(DeriveParser)]
#[grammar = "grammar.pest"]
pub struct Asm8086Parser;

pub fn parse_program(source: &str) -> Result<Vec<ParsedLine>, AssemblyError> {
    let mut pairs = Asm8086Parser::parse(Rule::program, source)
        .map_err(|err| AssemblyError::Syntax { line: 0, message: err.to_string() })?;

    let program_pair = pairs.next().expect("program rule always present");
    let mut lines = Vec::new();

    for pair in program_pair.into_inner() {
        match pair.as_rule() {
            Rule::line => lines.push(parse_line(pair)?),
            Rule::EOI => {}
            _ => unreachable!("unexpected top-level rule {:?}", pair.as_rule()),
        }
    }

    Ok(lines)
}

fn parse_line(pair: Pair<Rule>) -> Result<ParsedLine, AssemblyError> {
    let line_no = pair.as_span().start_pos().line_col().0 as u32;
    let mut label = None;
    let mut stmt = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label => {
                let text = inner.as_str();
                label = Some(text[..text.len() - 1].to_owned());
            }
            Rule::proc_stmt => stmt = Some(parse_proc_stmt(inner)?),
            Rule::endp_stmt => stmt = Some(Stmt::Directive(Directive::Endp)),
            Rule::model_stmt => stmt = Some(Stmt::Directive(Directive::Model)),
            Rule::stack_stmt => stmt = Some(parse_stack_stmt(inner, line_no)?),
            Rule::dataseg_stmt => stmt = Some(Stmt::Directive(Directive::DataSeg)),
            Rule::codeseg_stmt => stmt = Some(Stmt::Directive(Directive::CodeSeg)),
            Rule::section_stmt => stmt = Some(parse_section_stmt(inner, line_no)?),
            Rule::org_stmt => stmt = Some(parse_org_stmt(inner, line_no)?),
            Rule::end_stmt => stmt = Some(parse_end_stmt(inner)),
            Rule::data_stmt => {
                let (data_label, data_stmt) = parse_data_stmt(inner, line_no)?;
                label = Some(data_label);
                stmt = Some(data_stmt);
            }
            Rule::instr_stmt => stmt = Some(parse_instr_stmt(inner, line_no)?),
            other => unreachable!("unexpected line child {:?}", other),
        }
    }

    Ok(ParsedLine { line: line_no, label, stmt })
}

fn parse_proc_stmt(pair: Pair<Rule>) -> Result<Stmt, AssemblyError> {
    let name = pair.into_inner().next().expect("proc_stmt has a name").as_str().to_owned();
    Ok(Stmt::Directive(Directive::Proc(name)))
}

fn parse_stack_stmt(pair: Pair<Rule>, line: u32) -> Result<Stmt, AssemblyError> {
    let num = pair.into_inner().next().expect("stack_stmt has a size");
    Ok(Stmt::Directive(Directive::Stack(parse_u32(num, line)?)))
}

fn parse_section_stmt(pair: Pair<Rule>, line: u32) -> Result<Stmt, AssemblyError> {
    let name = pair.into_inner().next().expect("section_stmt has a name").as_str().to_ascii_lowercase();
    let section = match name.as_str() {
        "data" => SectionName::Data,
        "code" | "text" => SectionName::Code,
        other => {
            return Err(AssemblyError::BadDirective {
                line,
                message: format!("unknown section '.{}'", other),
            })
        }
    };
    Ok(Stmt::Directive(Directive::Section(section)))
}

fn parse_org_stmt(pair: Pair<Rule>, line: u32) -> Result<Stmt, AssemblyError> {
    let num = pair.into_inner().next().expect("org_stmt has an address");
    Ok(Stmt::Directive(Directive::Org(parse_u32(num, line)?)))
}

fn parse_end_stmt(pair: Pair<Rule>) -> Stmt {
    let entry = pair.into_inner().next().map(|p| p.as_str().to_owned());
    Stmt::Directive(Directive::End(entry))
}

fn parse_data_stmt(pair: Pair<Rule>, line: u32) -> Result<(String, Stmt), AssemblyError> {
    let mut inner = pair.into_inner();
    let label = inner.next().expect("data_stmt has a label").as_str().to_owned();
    let width_pair = inner.next().expect("data_stmt has a width");
    let width = match width_pair.as_str().to_ascii_lowercase().as_str() {
        "db" => DataWidth::Byte,
        "dw" => DataWidth::Word,
        other => {
            return Err(AssemblyError::BadDirective {
                line,
                message: format!("unknown data directive '{}'", other),
            })
        }
    };
    let mut items = Vec::new();
    for item_pair in inner {
        items.push(parse_data_item(item_pair, line)?);
    }
    Ok((label, Stmt::Data { width, items }))
}

fn parse_data_item(pair: Pair<Rule>, line: u32) -> Result<DataItem, AssemblyError> {
    let inner = pair.into_inner().next().expect("data_item always wraps one alternative");
    match inner.as_rule() {
        Rule::dup_item => {
            let mut dup_inner = inner.into_inner();
            let count_pair = dup_inner.next().expect("dup_item has a count");
            let count = parse_u32(count_pair, line)?;
            let fill_pair = dup_inner.next().expect("dup_item has a fill value");
            let fill = Box::new(parse_data_item(fill_pair, line)?);
            Ok(DataItem::Dup { count, fill })
        }
        Rule::string_item => Ok(DataItem::Str(unquote(inner.as_str()))),
        Rule::number => Ok(DataItem::Int(parse_i32(inner, line)?)),
        other => unreachable!("unexpected data_item child {:?}", other),
    }
}

fn parse_instr_stmt(pair: Pair<Rule>, line: u32) -> Result<Stmt, AssemblyError> {
    let mut inner = pair.into_inner().peekable();
    let rep = if let Some(p) = inner.peek() {
        if p.as_rule() == Rule::rep_prefix {
            let text = inner.next().unwrap().as_str().to_ascii_lowercase();
            Some(match text.as_str() {
                "rep" => RepMnemonic::Rep,
                "repe" | "repz" => RepMnemonic::Repe,
                "repne" | "repnz" => RepMnemonic::Repne,
                _ => unreachable!(),
            })
        } else {
            None
        }
    } else {
        None
    };

    let mnemonic = inner.next().expect("instr_stmt has a mnemonic").as_str().to_ascii_uppercase();
    let mut operands = Vec::new();
    for op_pair in inner {
        operands.push(parse_operand(op_pair, line)?);
    }
    Ok(Stmt::Instruction(Instr { rep, mnemonic, operands }))
}

fn parse_operand(pair: Pair<Rule>, line: u32) -> Result<OperandAst, AssemblyError> {
    let inner = pair.into_inner().next().expect("operand always wraps one alternative");
    match inner.as_rule() {
        Rule::memory => Ok(OperandAst::Memory(parse_memory(inner, line)?)),
        Rule::offset_of => {
            let name = inner.into_inner().next().expect("offset_of has a label").as_str().to_owned();
            Ok(OperandAst::OffsetOf(name))
        }
        Rule::register => Ok(OperandAst::Register(inner.as_str().to_ascii_uppercase())),
        Rule::number => Ok(OperandAst::Immediate(parse_i32(inner, line)?)),
        Rule::string_item => Ok(OperandAst::Str(unquote(inner.as_str()))),
        Rule::identifier => Ok(OperandAst::LabelRef(inner.as_str().to_owned())),
        other => unreachable!("unexpected operand child {:?}", other),
    }
}

fn parse_memory(pair: Pair<Rule>, line: u32) -> Result<MemoryAst, AssemblyError> {
    let mut mem = MemoryAst::default();
    let mut regs_seen = 0u8;

    for term in pair.into_inner() {
        match term.as_rule() {
            Rule::mem_term => apply_mem_term(&mut mem, term, 1, &mut regs_seen, line)?,
            Rule::mem_plus => {
                let t = term.into_inner().next().expect("mem_plus wraps a mem_term");
                apply_mem_term(&mut mem, t, 1, &mut regs_seen, line)?;
            }
            Rule::mem_minus => {
                let num = term.into_inner().next().expect("mem_minus wraps a number");
                mem.disp -= parse_i32(num, line)?;
            }
            other => unreachable!("unexpected memory child {:?}", other),
        }
    }
    Ok(mem)
}

fn apply_mem_term(mem: &mut MemoryAst, term: Pair<Rule>, sign: i32, regs_seen: &mut u8, line: u32) -> Result<(), AssemblyError> {
    let inner = term.into_inner().next().expect("mem_term always wraps one alternative");
    match inner.as_rule() {
        Rule::register => {
            let name = inner.as_str().to_ascii_uppercase();
            *regs_seen += 1;
            if *regs_seen == 1 {
                mem.base = Some(name);
            } else if *regs_seen == 2 {
                mem.index = Some(name);
            } else {
                return Err(AssemblyError::BadOperand {
                    line,
                    mnemonic: String::new(),
                    message: "memory operand allows at most two registers".to_owned(),
                });
            }
            Ok(())
        }
        Rule::number => {
            mem.disp += sign * parse_i32(inner, line)?;
            Ok(())
        }
        Rule::identifier => {
            if mem.direct_label.is_some() {
                return Err(AssemblyError::BadOperand {
                    line,
                    mnemonic: String::new(),
                    message: "memory operand allows at most one symbol".to_owned(),
                });
            }
            mem.direct_label = Some(inner.as_str().to_owned());
            Ok(())
        }
        other => unreachable!("unexpected mem_term child {:?}", other),
    }
}

fn unquote(text: &str) -> String {
    text[1..text.len() - 1].to_owned()
}

fn parse_i32(pair: Pair<Rule>, line: u32) -> Result<i32, AssemblyError> {
    let text = pair.as_str();
    let lower = text.to_ascii_lowercase();
    let (negative, lower) = match lower.strip_prefix('-') {
        Some(rest) => (true, rest.to_owned()),
        None => (false, lower),
    };
    let magnitude = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(hex) = lower.strip_suffix('h') {
        i64::from_str_radix(hex, 16)
    } else {
        lower.parse::<i64>()
    }
    .map_err(|err| AssemblyError::BadNumeric { line, message: err.to_string() })?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| AssemblyError::BadNumeric {
        line,
        message: format!("'{}' does not fit in 32 bits", text),
    })
}

fn parse_u32(pair: Pair<Rule>, line: u32) -> Result<u32, AssemblyError> {
    let value = parse_i32(pair, line)?;
    u32::try_from(value).map_err(|_| AssemblyError::BadNumeric {
        line,
        message: format!("expected a non-negative value, got {}", value),
    })
}
