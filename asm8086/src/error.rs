//! Everything that can go wrong assembling a source file. Every variant
//! carries the 1-based source line so a host can point a user at it.

use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum AssemblyError {
    #[error("line {line}: parse error: {message}")]
    Syntax { line: u32, message: String },

    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: u32, mnemonic: String },

    #[error("line {line}: bad operand for '{mnemonic}': {message}")]
    BadOperand { line: u32, mnemonic: String, message: String },

    #[error("line {line}: label '{name}' is already defined")]
    DuplicateLabel { line: u32, name: String },

    #[error("line {line}: undefined label '{name}'")]
    UndefinedLabel { line: u32, name: String },

    #[error("line {line}: jump target out of range for a short encoding")]
    JumpOutOfRange { line: u32 },

    #[error("line {line}: bad directive: {message}")]
    BadDirective { line: u32, message: String },

    #[error("line {line}: bad numeric literal: {message}")]
    BadNumeric { line: u32, message: String },
}

pub type Result<T> = std::result::Result<T, AssemblyError>;
