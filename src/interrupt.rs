//! Software interrupt dispatch. The decoder turns `INT n` into an opaque
//! vector number; what that vector *does* is host policy, not part of the
//! processor core. The DOS-ish `AH=02h/09h/4Ch` stub lives in the `dos8086`
//! CLI host, not here, so this crate stays free of any I/O assumptions.

use crate::register::RegisterFile;

/// What an [`InterruptHost`] decided to do with an `INT` it was handed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptOutcome {
    /// The host serviced the interrupt; execution resumes at the next instruction.
    Handled,
    /// The host has no handler for this vector; the caller should raise
    /// `Fault::UnhandledInterrupt`.
    Unhandled,
    /// The host wants the simulator to stop (DOS `INT 21h AH=4Ch`, exit code
    /// already written to `AL` by the host). `step()` reports `Halted`.
    Halt,
}

/// Host-provided handling for `INT n`. A [`Simulator`](crate::execute::Simulator)
/// is given one of these at construction time; the default,
/// [`NullInterruptHost`], treats every vector as unhandled.
pub trait InterruptHost {
    /// Called with the vector number and a mutable view of the registers
    /// (to read `AH`/`AL` and friends, or to set a return value) plus raw
    /// memory access for the handful of DOS calls that read/write strings.
    fn handle(&mut self, vector: u8, regs: &mut RegisterFile, memory: &mut crate::memory::Memory) -> InterruptOutcome;
}

/// An `InterruptHost` that never services anything. Used by default and by
/// tests that only care about the fault path.
#[derive(Clone, Copy, Default)]
pub struct NullInterruptHost;

impl InterruptHost for NullInterruptHost {
    fn handle(&mut self, _vector: u8, _regs: &mut RegisterFile, _memory: &mut crate::memory::Memory) -> InterruptOutcome {
        InterruptOutcome::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_host_handles_nothing() {
        let mut host = NullInterruptHost;
        let mut regs = RegisterFile::new();
        let mut mem = crate::memory::Memory::new();
        assert_eq!(host.handle(0x21, &mut regs, &mut mem), InterruptOutcome::Unhandled);
    }
}
