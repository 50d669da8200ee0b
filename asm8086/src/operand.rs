//! Resolves [`ast::OperandAst`] against the symbol table into a concrete
//! register or displacement, and encodes the ModR/M byte + trailing
//! displacement bytes the same way [`cpu8086::decode`] reads them back.

use crate::ast::MemoryAst;
use crate::error::AssemblyError;
use cpu8086::register::{Reg16, Reg8, SegReg};

pub fn reg8_from_name(name: &str) -> Option<Reg8> {
    Some(match name {
        "AL" => Reg8::Al,
        "CL" => Reg8::Cl,
        "DL" => Reg8::Dl,
        "BL" => Reg8::Bl,
        "AH" => Reg8::Ah,
        "CH" => Reg8::Ch,
        "DH" => Reg8::Dh,
        "BH" => Reg8::Bh,
        _ => return None,
    })
}

pub fn reg16_from_name(name: &str) -> Option<Reg16> {
    Some(match name {
        "AX" => Reg16::Ax,
        "CX" => Reg16::Cx,
        "DX" => Reg16::Dx,
        "BX" => Reg16::Bx,
        "SP" => Reg16::Sp,
        "BP" => Reg16::Bp,
        "SI" => Reg16::Si,
        "DI" => Reg16::Di,
        _ => return None,
    })
}

pub fn segreg_from_name(name: &str) -> Option<SegReg> {
    Some(match name {
        "ES" => SegReg::Es,
        "CS" => SegReg::Cs,
        "SS" => SegReg::Ss,
        "DS" => SegReg::Ds,
        _ => return None,
    })
}

pub fn reg8_field(r: Reg8) -> u8 {
    match r {
        Reg8::Al => 0,
        Reg8::Cl => 1,
        Reg8::Dl => 2,
        Reg8::Bl => 3,
        Reg8::Ah => 4,
        Reg8::Ch => 5,
        Reg8::Dh => 6,
        Reg8::Bh => 7,
    }
}

pub fn reg16_field(r: Reg16) -> u8 {
    match r {
        Reg16::Ax => 0,
        Reg16::Cx => 1,
        Reg16::Dx => 2,
        Reg16::Bx => 3,
        Reg16::Sp => 4,
        Reg16::Bp => 5,
        Reg16::Si => 6,
        Reg16::Di => 7,
    }
}

pub fn segreg_field(r: SegReg) -> u8 {
    match r {
        SegReg::Es => 0,
        SegReg::Cs => 1,
        SegReg::Ss => 2,
        SegReg::Ds => 3,
    }
}

/// A memory operand with its symbol already resolved to a flat 16-bit
/// displacement (`direct_label` folded into `disp`, if the caller passed a
/// resolver; see [`ResolvedMem::resolve`]).
#[derive(Clone, Copy, Debug)]
pub struct ResolvedMem {
    pub base: Option<Reg16>,
    pub index: Option<Reg16>,
    pub disp: i32,
    pub direct: bool,
    wide: bool,
}

/// Whether `mem`'s displacement needs a 16-bit field. Decided purely from
/// the written operand (a label present, or a literal that doesn't fit one
/// signed byte) so pass 1's size estimate and pass 2's actual encoding can
/// never disagree — neither ever has to know a label's resolved value to
/// make this call, only whether one was written.
pub fn mem_disp_is_wide(mem: &MemoryAst) -> bool {
    mem.direct_label.is_some() || mem.disp < i8::MIN as i32 || mem.disp > i8::MAX as i32
}

/// Extra bytes (beyond the ModR/M byte itself) a memory operand's
/// displacement will occupy, for pass 1 sizing.
pub fn mem_extra_len(mem: &MemoryAst) -> u16 {
    let direct = mem.base.is_none() && mem.index.is_none();
    if direct {
        return 2;
    }
    let bare_bp = mem.base.as_deref() == Some("BP") && mem.index.is_none();
    if mem_disp_is_wide(mem) {
        2
    } else if mem.disp != 0 || bare_bp {
        1
    } else {
        0
    }
}

impl ResolvedMem {
    pub fn resolve(mem: &MemoryAst, line: u32, lookup: impl Fn(&str) -> Option<u16>) -> Result<ResolvedMem, AssemblyError> {
        let base = match &mem.base {
            Some(name) => Some(reg16_from_name(name).ok_or_else(|| AssemblyError::BadOperand {
                line,
                mnemonic: String::new(),
                message: format!("'{}' is not a valid base register", name),
            })?),
            None => None,
        };
        let index = match &mem.index {
            Some(name) => Some(reg16_from_name(name).ok_or_else(|| AssemblyError::BadOperand {
                line,
                mnemonic: String::new(),
                message: format!("'{}' is not a valid index register", name),
            })?),
            None => None,
        };
        let wide = mem_disp_is_wide(mem);
        let mut disp = mem.disp;
        let direct = base.is_none() && index.is_none();
        if let Some(label) = &mem.direct_label {
            let offset = lookup(label).ok_or_else(|| AssemblyError::UndefinedLabel { line, name: label.clone() })?;
            disp += offset as i32;
        }
        Ok(ResolvedMem { base, index, disp, direct, wide })
    }

    /// `rm` field (0-7) for `mod != 11`, matching `base_index_for_rm` in the
    /// decoder exactly, plus whether real `[BP]` with no displacement needs
    /// the `mod=01,disp8=0` trick to avoid colliding with direct addressing.
    fn rm_field(&self) -> Result<u8, String> {
        match (self.base, self.index) {
            (Some(Reg16::Bx), Some(Reg16::Si)) => Ok(0),
            (Some(Reg16::Bx), Some(Reg16::Di)) => Ok(1),
            (Some(Reg16::Bp), Some(Reg16::Si)) => Ok(2),
            (Some(Reg16::Bp), Some(Reg16::Di)) => Ok(3),
            (Some(Reg16::Si), None) => Ok(4),
            (Some(Reg16::Di), None) => Ok(5),
            (Some(Reg16::Bp), None) => Ok(6),
            (Some(Reg16::Bx), None) => Ok(7),
            _ => Err("unsupported base/index register combination".to_owned()),
        }
    }

    /// Encodes `[mod:rm]` plus any displacement bytes, given the `reg` field
    /// (the opcode's embedded register, or a group-opcode extension number).
    pub fn encode_modrm(&self, reg_field: u8, line: u32) -> Result<Vec<u8>, AssemblyError> {
        let mut out = Vec::new();
        if self.direct {
            out.push((reg_field << 3) | 0b110);
            out.extend_from_slice(&(self.disp as i16 as u16).to_le_bytes());
            return Ok(out);
        }

        let rm = self.rm_field().map_err(|message| AssemblyError::BadOperand { line, mnemonic: String::new(), message })?;
        let bare_bp = rm == 6;
        if self.disp == 0 && !bare_bp && !self.wide {
            out.push((reg_field << 3) | rm);
        } else if bare_bp && self.disp == 0 && !self.wide {
            // `[BP]` with zero displacement must still use mod=01 — mod=00
            // with rm=110 means a direct 16-bit address, not `[BP]`.
            out.push(0b01_000_000 | (reg_field << 3) | rm);
            out.push(0);
        } else if !self.wide {
            out.push(0b01_000_000 | (reg_field << 3) | rm);
            out.push(self.disp as i8 as u8);
        } else {
            out.push(0b10_000_000 | (reg_field << 3) | rm);
            out.extend_from_slice(&(self.disp as i16 as u16).to_le_bytes());
        }
        Ok(out)
    }
}
