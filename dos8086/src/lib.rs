//! `dos8086`: the command-line host for the [`cpu8086`] core. It owns no
//! processor semantics of its own -- it assembles (via [`asm8086`]) or
//! loads a pre-assembled [`image`], drives a [`cpu8086::Simulator`] through
//! `load`/`run`/`step`, and supplies the one host-specific piece the core
//! deliberately leaves external: the DOS `INT 21h` console stub in [`dos`].
//!
//! This is the in-scope stand-in for the excluded HTTP front-end: it
//! exercises exactly the programmatic API the core publishes and nothing
//! more, so it stays a thin, swappable shell rather than a second source of
//! CPU semantics.

pub mod dos;
pub mod error;
pub mod image;
pub mod repl;

pub use dos::DosInterruptHost;
pub use error::{Error, Result};

use std::fs;
use std::path::Path;

use cpu8086::program::Program;

/// Loads `path` as a [`Program`]: a `.vimg` extension is read as a
/// pre-assembled [`image::Image`]; anything else is read as source text and
/// handed to [`asm8086::assemble`].
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<Program> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) == Some("vimg") {
        let image = image::read_file(path).map_err(|e| Error::Image(e.to_string()))?;
        Ok(image.into_program())
    } else {
        let source = fs::read_to_string(path)?;
        Ok(asm8086::assemble(&source)?)
    }
}

/// Resolves an `--entry` override against the program's symbol table,
/// falling back to the assembler-computed `entry_offset` when `None`.
pub fn resolve_entry(program: &Program, entry: Option<&str>) -> Result<u16> {
    match entry {
        Some(name) => program
            .symbols
            .get(name)
            .map(|sym| sym.offset)
            .ok_or_else(|| Error::UndefinedLabel(name.to_string())),
        None => Ok(program.entry_offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_program_assembles_source_files() {
        let path = std::env::temp_dir().join("dos8086-test-load-program.asm");
        fs::write(&path, ".CODE\nMOV AX, 1\nHLT\n").unwrap();
        let program = load_program(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!program.code.is_empty());
    }

    #[test]
    fn resolve_entry_uses_symbol_when_overridden() {
        let src = ".CODE\nSTART:\nMOV AX,1\nJMP MID\nMID:\nHLT\nEND START\n";
        let program = asm8086::assemble(src).unwrap();
        let offset = resolve_entry(&program, Some("MID")).unwrap();
        assert_eq!(program.symbols.get("MID").unwrap().offset, offset);
    }

    #[test]
    fn resolve_entry_rejects_unknown_labels() {
        let src = ".CODE\nMOV AX,1\nHLT\n";
        let program = asm8086::assemble(src).unwrap();
        assert!(resolve_entry(&program, Some("NOPE")).is_err());
    }
}
