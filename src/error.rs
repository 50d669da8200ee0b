//! Faults raised by the decode/execute loop. Faults stop execution and are
//! reported to the caller; nothing is retried inside the simulator.

use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum Fault {
    #[error("invalid opcode 0x{opcode:02X} at CS:IP")]
    InvalidOpcode { opcode: u8 },

    #[error("division error")]
    DivideError,

    #[error("unhandled interrupt {vector:02X}h (AH={ah:02X}h)")]
    UnhandledInterrupt { vector: u8, ah: u8 },

    #[error("instruction budget exhausted before halt or breakpoint")]
    OutOfBudget,

    #[error("host I/O error servicing interrupt {vector:02X}h: {message}")]
    IoError { vector: u8, message: String },
}
