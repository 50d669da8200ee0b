//! The tree `parse::parse_program` builds from the pest parse tree. Pass 1
//! and pass 2 both walk this, never the raw `Pairs<Rule>` — keeping the
//! grammar and the two-pass logic decoupled the same way `decode()` and
//! `Simulator::dispatch()` are decoupled on the execution side.

#[derive(Clone, Debug)]
pub struct ParsedLine {
    pub line: u32,
    pub label: Option<String>,
    pub stmt: Option<Stmt>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Directive(Directive),
    Data { width: DataWidth, items: Vec<DataItem> },
    Instruction(Instr),
}

#[derive(Clone, Debug)]
pub enum Directive {
    Model,
    Stack(u32),
    DataSeg,
    CodeSeg,
    Section(SectionName),
    Org(u32),
    End(Option<String>),
    Proc(String),
    Endp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionName {
    Data,
    Code,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
}

impl DataWidth {
    pub fn bytes(self) -> u16 {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Word => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub enum DataItem {
    Int(i32),
    Str(String),
    Dup { count: u32, fill: Box<DataItem> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepMnemonic {
    Rep,
    Repe,
    Repne,
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub rep: Option<RepMnemonic>,
    pub mnemonic: String,
    pub operands: Vec<OperandAst>,
}

#[derive(Clone, Debug)]
pub enum OperandAst {
    Register(String),
    Immediate(i32),
    OffsetOf(String),
    Memory(MemoryAst),
    /// A bare identifier used where a label (jump/call target, or a plain
    /// symbol reference) is expected; resolved against the symbol table.
    LabelRef(String),
    Str(String),
}

#[derive(Clone, Debug, Default)]
pub struct MemoryAst {
    pub base: Option<String>,
    pub index: Option<String>,
    pub disp: i32,
    pub direct_label: Option<String>,
}
