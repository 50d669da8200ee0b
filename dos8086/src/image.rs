//! Binary serialization for a pre-assembled [`cpu8086::Program`], so the
//! host can skip re-running the assembler for a program it already built.
//!
//! The layout is three little-endian `u32` lengths/offsets followed by the
//! raw code and data bytes -- the same `len, len, offset, then bytes` shape
//! this workspace's assembler-output format has always used, just read back
//! into a `Program` instead of a standalone `Executable`.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use cpu8086::program::{Program, SymbolTable};
use util::Endian;

/// An assembled image as it is written to disk: code, data and the entry
/// offset. The symbol table does not round-trip through the binary format
/// (it exists only to support `OFFSET label` during assembly and debugger
/// address lookups), so an image loaded from disk has an empty table.
#[derive(Debug, PartialEq)]
pub struct Image {
    entry_offset: u32,
    code: Vec<u8>,
    data: Vec<u8>,
}

impl Image {
    pub fn from_program(program: &Program) -> Image {
        Image {
            entry_offset: program.entry_offset as u32,
            code: program.code.clone(),
            data: program.data.clone(),
        }
    }

    pub fn into_program(self) -> Program {
        Program {
            code: self.code,
            data: self.data,
            symbols: SymbolTable::new(),
            entry_offset: self.entry_offset as u16,
        }
    }
}

pub fn read<R: Read>(reader: &mut R) -> std::io::Result<Image> {
    let code_len = reader.read_u32::<Endian>()?;
    let data_len = reader.read_u32::<Endian>()?;
    let entry_offset = reader.read_u32::<Endian>()?;

    let mut code = vec![0; code_len as usize];
    let mut data = vec![0; data_len as usize];
    reader.read_exact(&mut code)?;
    reader.read_exact(&mut data)?;

    Ok(Image { entry_offset, code, data })
}

pub fn write<W: Write>(writer: &mut W, image: &Image) -> std::io::Result<()> {
    writer.write_u32::<Endian>(image.code.len() as u32)?;
    writer.write_u32::<Endian>(image.data.len() as u32)?;
    writer.write_u32::<Endian>(image.entry_offset)?;
    writer.write_all(&image.code)?;
    writer.write_all(&image.data)?;
    Ok(())
}

pub fn read_file<P: AsRef<Path>>(path: P) -> std::io::Result<Image> {
    read(&mut BufReader::new(File::open(path)?))
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &Image) -> std::io::Result<()> {
    write(&mut BufWriter::new(File::create(path)?), image)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_round_trips_through_bytes() {
        let program = Program {
            code: vec![0xB8, 0x05, 0x00, 0xF4],
            data: vec![b'H', b'i', b'$'],
            symbols: SymbolTable::new(),
            entry_offset: 0,
        };
        let image = Image::from_program(&program);

        let mut buf = Vec::new();
        write(&mut buf, &image).unwrap();
        let read_back = read(&mut &buf[..]).unwrap();

        assert_eq!(read_back, image);
        let restored = read_back.into_program();
        assert_eq!(restored.code, program.code);
        assert_eq!(restored.data, program.data);
        assert_eq!(restored.entry_offset, program.entry_offset);
    }
}
