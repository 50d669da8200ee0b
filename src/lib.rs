//! A bit-exact functional model of the Intel 8086: a flat 1 MiB memory and
//! register file (MRF), a byte-stream decoder paired with an instruction
//! dispatcher (DEX), and a passive [`Observer`] hook a host can use to trace
//! memory traffic without touching the hot path.
//!
//! [`execute::Simulator`] is the crate's single entry point: load a
//! [`program::Program`] into it and drive it with `step`/`run`.

pub mod arith;
pub mod constants;
pub mod decode;
pub mod error;
pub mod execute;
pub mod flags;
pub mod interrupt;
pub mod memory;
pub mod observer;
pub mod program;
pub mod register;

pub use error::Fault;
pub use execute::{RunOutcome, Simulator, StepOutcome};
pub use flags::Flags;
pub use interrupt::{InterruptHost, InterruptOutcome, NullInterruptHost};
pub use observer::{AccessCounter, AccessCounts, NullObserver, Observer};
pub use program::{Program, SegmentKind, Symbol, SymbolTable};
pub use register::{RegisterId, RegistersSnapshot};
