//! iNES ROM loading.
//!
//! Parses the 16-byte iNES header (magic, PRG/CHR sizes, flag bytes) and
//! instantiates the matching mapper. Mapper selection is fixed for the
//! lifetime of the console.

use std::error::Error;
use std::fmt;

use crate::mapper::{Axrom, Cnrom, Mapper, Mirroring, Mmc1, Mmc3, Nrom, Uxrom};

/// Why a ROM image could not be loaded.
#[derive(Debug)]
pub enum RomError {
    /// Missing or wrong `NES\x1A` magic, or file shorter than a header.
    BadHeader,
    /// Header promises more PRG/CHR data than the file contains.
    Truncated { expected: usize, actual: usize },
    /// Mapper number this build does not implement.
    UnsupportedMapper(u8),
}

impl fmt::Display for RomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader => write!(f, "not an iNES file (bad header)"),
            Self::Truncated { expected, actual } => {
                write!(f, "truncated iNES file: expected {expected} bytes, got {actual}")
            }
            Self::UnsupportedMapper(n) => write!(f, "unsupported mapper {n}"),
        }
    }
}

impl Error for RomError {}

/// Parsed header fields the loader cares about.
#[derive(Debug, Clone, Copy)]
pub struct RomHeader {
    pub prg_banks: u8,
    pub chr_banks: u8,
    pub mapper: u8,
    pub mirroring: Mirroring,
    pub has_trainer: bool,
    pub has_battery: bool,
}

impl RomHeader {
    fn parse(data: &[u8]) -> Result<Self, RomError> {
        if data.len() < 16 || &data[0..4] != b"NES\x1a" {
            return Err(RomError::BadHeader);
        }

        let flags6 = data[6];
        let flags7 = data[7];

        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        Ok(Self {
            prg_banks: data[4],
            chr_banks: data[5],
            mapper: (flags7 & 0xF0) | (flags6 >> 4),
            mirroring,
            has_trainer: flags6 & 0x04 != 0,
            has_battery: flags6 & 0x02 != 0,
        })
    }
}

/// Parse an iNES image into a mapper.
pub fn load_rom(data: &[u8]) -> Result<Box<dyn Mapper>, RomError> {
    let header = RomHeader::parse(data)?;

    let prg_size = usize::from(header.prg_banks) * 0x4000;
    let chr_size = usize::from(header.chr_banks) * 0x2000;
    let prg_start = if header.has_trainer { 16 + 512 } else { 16 };
    let chr_start = prg_start + prg_size;
    let expected = chr_start + chr_size;

    if data.len() < expected {
        return Err(RomError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let prg = data[prg_start..chr_start].to_vec();
    // Zero CHR banks means the board carries CHR RAM instead.
    let chr = data[chr_start..expected].to_vec();

    match header.mapper {
        0 => Ok(Box::new(Nrom::new(prg, chr, header.mirroring))),
        1 => Ok(Box::new(Mmc1::new(prg, chr))),
        2 => Ok(Box::new(Uxrom::new(prg, chr, header.mirroring))),
        3 => Ok(Box::new(Cnrom::new(prg, chr, header.mirroring))),
        4 => Ok(Box::new(Mmc3::new(prg, chr, header.mirroring))),
        7 => Ok(Box::new(Axrom::new(prg, chr))),
        n => Err(RomError::UnsupportedMapper(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn make_ines(mapper: u8, prg_banks: u8, chr_banks: u8, flags6_low: u8) -> Vec<u8> {
        let prg_size = usize::from(prg_banks) * 0x4000;
        let chr_size = usize::from(chr_banks) * 0x2000;
        let mut data = vec![0u8; 16 + prg_size + chr_size];
        data[0..4].copy_from_slice(b"NES\x1a");
        data[4] = prg_banks;
        data[5] = chr_banks;
        data[6] = (mapper << 4) | (flags6_low & 0x0F);
        data[7] = mapper & 0xF0;
        for i in 0..prg_size {
            data[16 + i] = (i >> 8) as u8;
        }
        for i in 0..chr_size {
            data[16 + prg_size + i] = ((i >> 8) as u8).wrapping_add(0x80);
        }
        data
    }

    #[test]
    fn parses_nrom() {
        let rom = make_ines(0, 1, 1, 0x01);
        let mapper = load_rom(&rom).unwrap();
        assert_eq!(mapper.mirror_mode(), Mirroring::Vertical);
        assert_eq!(mapper.read_prg(0x8000), 0x00);
        assert_eq!(mapper.read_chr(0x0100), 0x81);
    }

    #[test]
    fn parses_mapper_number_from_both_nibbles() {
        let mut rom = make_ines(0, 1, 1, 0);
        rom[6] = 0x70; // low nibble of mapper 7
        let mapper = load_rom(&rom).unwrap();
        // AxROM powers on with single-screen page 0.
        assert_eq!(mapper.mirror_mode(), Mirroring::Single0);
    }

    #[test]
    fn four_screen_flag_wins() {
        let rom = make_ines(0, 1, 1, 0x09);
        let mapper = load_rom(&rom).unwrap();
        assert_eq!(mapper.mirror_mode(), Mirroring::FourScreen);
    }

    #[test]
    fn trainer_is_skipped() {
        let mut rom = make_ines(0, 1, 0, 0x04);
        // Insert a 512-byte trainer after the header.
        rom.splice(16..16, std::iter::repeat(0xEE).take(512));
        let mapper = load_rom(&rom).unwrap();
        assert_eq!(mapper.read_prg(0x8000), 0x00);
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(load_rom(&[0u8; 64]), Err(RomError::BadHeader)));
    }

    #[test]
    fn truncated_file_rejected() {
        let mut rom = make_ines(0, 2, 1, 0);
        rom.truncate(1000);
        assert!(matches!(load_rom(&rom), Err(RomError::Truncated { .. })));
    }

    #[test]
    fn unknown_mapper_rejected() {
        let rom = make_ines(11, 1, 1, 0);
        assert!(matches!(load_rom(&rom), Err(RomError::UnsupportedMapper(11))));
    }
}
