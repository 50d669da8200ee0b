//! The CLI host's top-level error type: every sub-crate's error, plus the
//! host's own I/O failures, behind one `?`-friendly enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("assembly failed: {0}")]
    Assembly(#[from] asm8086::AssemblyError),

    #[error("simulator fault: {0}")]
    Fault(#[from] cpu8086::Fault),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable image file: {0}")]
    Image(String),

    #[error("undefined label '{0}'")]
    UndefinedLabel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
