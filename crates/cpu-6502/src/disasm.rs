//! 6502 disassembler for execution tracing.
//!
//! Decoding is driven by side-effect-free reads supplied by the caller, so
//! the console can trace without disturbing registers that react to bus
//! reads.

use crate::Mos6502;

/// Operand shape of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Imp,
    Acc,
    Imm,
    Zp,
    Zpx,
    Zpy,
    Abs,
    Abx,
    Aby,
    Ind,
    Izx,
    Izy,
    Rel,
}

impl Mode {
    /// Instruction length in bytes, opcode included.
    pub fn len(self) -> u16 {
        match self {
            Self::Imp | Self::Acc => 1,
            Self::Imm | Self::Zp | Self::Zpx | Self::Zpy | Self::Izx | Self::Izy | Self::Rel => 2,
            Self::Abs | Self::Abx | Self::Aby | Self::Ind => 3,
        }
    }
}

/// Mnemonic and addressing mode for an opcode. Unassigned opcodes decode
/// as `???`.
#[allow(clippy::too_many_lines)]
pub fn opcode_info(op: u8) -> (&'static str, Mode) {
    use Mode::*;
    match op {
        0xA9 => ("LDA", Imm), 0xA5 => ("LDA", Zp), 0xB5 => ("LDA", Zpx), 0xAD => ("LDA", Abs),
        0xBD => ("LDA", Abx), 0xB9 => ("LDA", Aby), 0xA1 => ("LDA", Izx), 0xB1 => ("LDA", Izy),
        0xA2 => ("LDX", Imm), 0xA6 => ("LDX", Zp), 0xB6 => ("LDX", Zpy), 0xAE => ("LDX", Abs),
        0xBE => ("LDX", Aby),
        0xA0 => ("LDY", Imm), 0xA4 => ("LDY", Zp), 0xB4 => ("LDY", Zpx), 0xAC => ("LDY", Abs),
        0xBC => ("LDY", Abx),
        0x85 => ("STA", Zp), 0x95 => ("STA", Zpx), 0x8D => ("STA", Abs), 0x9D => ("STA", Abx),
        0x99 => ("STA", Aby), 0x81 => ("STA", Izx), 0x91 => ("STA", Izy),
        0x86 => ("STX", Zp), 0x96 => ("STX", Zpy), 0x8E => ("STX", Abs),
        0x84 => ("STY", Zp), 0x94 => ("STY", Zpx), 0x8C => ("STY", Abs),
        0xAA => ("TAX", Imp), 0xA8 => ("TAY", Imp), 0x8A => ("TXA", Imp), 0x98 => ("TYA", Imp),
        0xBA => ("TSX", Imp), 0x9A => ("TXS", Imp),
        0x48 => ("PHA", Imp), 0x08 => ("PHP", Imp), 0x68 => ("PLA", Imp), 0x28 => ("PLP", Imp),
        0x29 => ("AND", Imm), 0x25 => ("AND", Zp), 0x35 => ("AND", Zpx), 0x2D => ("AND", Abs),
        0x3D => ("AND", Abx), 0x39 => ("AND", Aby), 0x21 => ("AND", Izx), 0x31 => ("AND", Izy),
        0x49 => ("EOR", Imm), 0x45 => ("EOR", Zp), 0x55 => ("EOR", Zpx), 0x4D => ("EOR", Abs),
        0x5D => ("EOR", Abx), 0x59 => ("EOR", Aby), 0x41 => ("EOR", Izx), 0x51 => ("EOR", Izy),
        0x09 => ("ORA", Imm), 0x05 => ("ORA", Zp), 0x15 => ("ORA", Zpx), 0x0D => ("ORA", Abs),
        0x1D => ("ORA", Abx), 0x19 => ("ORA", Aby), 0x01 => ("ORA", Izx), 0x11 => ("ORA", Izy),
        0x24 => ("BIT", Zp), 0x2C => ("BIT", Abs),
        0x69 => ("ADC", Imm), 0x65 => ("ADC", Zp), 0x75 => ("ADC", Zpx), 0x6D => ("ADC", Abs),
        0x7D => ("ADC", Abx), 0x79 => ("ADC", Aby), 0x61 => ("ADC", Izx), 0x71 => ("ADC", Izy),
        0xE9 => ("SBC", Imm), 0xE5 => ("SBC", Zp), 0xF5 => ("SBC", Zpx), 0xED => ("SBC", Abs),
        0xFD => ("SBC", Abx), 0xF9 => ("SBC", Aby), 0xE1 => ("SBC", Izx), 0xF1 => ("SBC", Izy),
        0xEB => ("SBC", Imm),
        0xC9 => ("CMP", Imm), 0xC5 => ("CMP", Zp), 0xD5 => ("CMP", Zpx), 0xCD => ("CMP", Abs),
        0xDD => ("CMP", Abx), 0xD9 => ("CMP", Aby), 0xC1 => ("CMP", Izx), 0xD1 => ("CMP", Izy),
        0xE0 => ("CPX", Imm), 0xE4 => ("CPX", Zp), 0xEC => ("CPX", Abs),
        0xC0 => ("CPY", Imm), 0xC4 => ("CPY", Zp), 0xCC => ("CPY", Abs),
        0xE6 => ("INC", Zp), 0xF6 => ("INC", Zpx), 0xEE => ("INC", Abs), 0xFE => ("INC", Abx),
        0xE8 => ("INX", Imp), 0xC8 => ("INY", Imp),
        0xC6 => ("DEC", Zp), 0xD6 => ("DEC", Zpx), 0xCE => ("DEC", Abs), 0xDE => ("DEC", Abx),
        0xCA => ("DEX", Imp), 0x88 => ("DEY", Imp),
        0x0A => ("ASL", Acc), 0x06 => ("ASL", Zp), 0x16 => ("ASL", Zpx), 0x0E => ("ASL", Abs),
        0x1E => ("ASL", Abx),
        0x4A => ("LSR", Acc), 0x46 => ("LSR", Zp), 0x56 => ("LSR", Zpx), 0x4E => ("LSR", Abs),
        0x5E => ("LSR", Abx),
        0x2A => ("ROL", Acc), 0x26 => ("ROL", Zp), 0x36 => ("ROL", Zpx), 0x2E => ("ROL", Abs),
        0x3E => ("ROL", Abx),
        0x6A => ("ROR", Acc), 0x66 => ("ROR", Zp), 0x76 => ("ROR", Zpx), 0x6E => ("ROR", Abs),
        0x7E => ("ROR", Abx),
        0x4C => ("JMP", Abs), 0x6C => ("JMP", Ind), 0x20 => ("JSR", Abs),
        0x60 => ("RTS", Imp), 0x40 => ("RTI", Imp),
        0x10 => ("BPL", Rel), 0x30 => ("BMI", Rel), 0x50 => ("BVC", Rel), 0x70 => ("BVS", Rel),
        0x90 => ("BCC", Rel), 0xB0 => ("BCS", Rel), 0xD0 => ("BNE", Rel), 0xF0 => ("BEQ", Rel),
        0x18 => ("CLC", Imp), 0x38 => ("SEC", Imp), 0x58 => ("CLI", Imp), 0x78 => ("SEI", Imp),
        0xD8 => ("CLD", Imp), 0xF8 => ("SED", Imp), 0xB8 => ("CLV", Imp),
        0x00 => ("BRK", Imp), 0xEA => ("NOP", Imp),
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => ("NOP", Imp),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => ("NOP", Imm),
        0x04 | 0x44 | 0x64 => ("NOP", Zp),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => ("NOP", Zpx),
        0x0C => ("NOP", Abs),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => ("NOP", Abx),
        0xA7 => ("LAX", Zp), 0xB7 => ("LAX", Zpy), 0xAF => ("LAX", Abs), 0xBF => ("LAX", Aby),
        0xA3 => ("LAX", Izx), 0xB3 => ("LAX", Izy),
        0x87 => ("SAX", Zp), 0x97 => ("SAX", Zpy), 0x8F => ("SAX", Abs), 0x83 => ("SAX", Izx),
        0xC7 => ("DCP", Zp), 0xD7 => ("DCP", Zpx), 0xCF => ("DCP", Abs), 0xDF => ("DCP", Abx),
        0xDB => ("DCP", Aby), 0xC3 => ("DCP", Izx), 0xD3 => ("DCP", Izy),
        0xE7 => ("ISB", Zp), 0xF7 => ("ISB", Zpx), 0xEF => ("ISB", Abs), 0xFF => ("ISB", Abx),
        0xFB => ("ISB", Aby), 0xE3 => ("ISB", Izx), 0xF3 => ("ISB", Izy),
        0x07 => ("SLO", Zp), 0x17 => ("SLO", Zpx), 0x0F => ("SLO", Abs), 0x1F => ("SLO", Abx),
        0x1B => ("SLO", Aby), 0x03 => ("SLO", Izx), 0x13 => ("SLO", Izy),
        0x27 => ("RLA", Zp), 0x37 => ("RLA", Zpx), 0x2F => ("RLA", Abs), 0x3F => ("RLA", Abx),
        0x3B => ("RLA", Aby), 0x23 => ("RLA", Izx), 0x33 => ("RLA", Izy),
        0x47 => ("SRE", Zp), 0x57 => ("SRE", Zpx), 0x4F => ("SRE", Abs), 0x5F => ("SRE", Abx),
        0x5B => ("SRE", Aby), 0x43 => ("SRE", Izx), 0x53 => ("SRE", Izy),
        0x67 => ("RRA", Zp), 0x77 => ("RRA", Zpx), 0x6F => ("RRA", Abs), 0x7F => ("RRA", Abx),
        0x7B => ("RRA", Aby), 0x63 => ("RRA", Izx), 0x73 => ("RRA", Izy),
        0x0B | 0x2B => ("ANC", Imm),
        0x4B => ("ALR", Imm),
        0x6B => ("ARR", Imm),
        0xCB => ("SBX", Imm),
        _ => ("???", Mode::Imp),
    }
}

/// Disassemble the instruction at `pc`: `"C632  A9 42     LDA #$42"`.
pub fn disassemble(mut read: impl FnMut(u16) -> u8, pc: u16) -> String {
    let op = read(pc);
    let (mnemonic, mode) = opcode_info(op);
    let lo = read(pc.wrapping_add(1));
    let hi = read(pc.wrapping_add(2));
    let word = u16::from_le_bytes([lo, hi]);

    let bytes = match mode.len() {
        1 => format!("{op:02X}"),
        2 => format!("{op:02X} {lo:02X}"),
        _ => format!("{op:02X} {lo:02X} {hi:02X}"),
    };

    let operand = match mode {
        Mode::Imp => String::new(),
        Mode::Acc => "A".to_string(),
        Mode::Imm => format!("#${lo:02X}"),
        Mode::Zp => format!("${lo:02X}"),
        Mode::Zpx => format!("${lo:02X},X"),
        Mode::Zpy => format!("${lo:02X},Y"),
        Mode::Abs => format!("${word:04X}"),
        Mode::Abx => format!("${word:04X},X"),
        Mode::Aby => format!("${word:04X},Y"),
        Mode::Ind => format!("(${word:04X})"),
        Mode::Izx => format!("(${lo:02X},X)"),
        Mode::Izy => format!("(${lo:02X}),Y"),
        Mode::Rel => {
            let target = pc.wrapping_add(2).wrapping_add(lo as i8 as u16);
            format!("${target:04X}")
        }
    };

    if operand.is_empty() {
        format!("{pc:04X}  {bytes:<8}  {mnemonic}")
    } else {
        format!("{pc:04X}  {bytes:<8}  {mnemonic} {operand}")
    }
}

/// One trace line: disassembly plus the register file before execution.
pub fn trace_line(read: impl FnMut(u16) -> u8, cpu: &Mos6502) -> String {
    format!(
        "{:<32} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
        disassemble(read, cpu.pc()),
        cpu.a(),
        cpu.x(),
        cpu.y(),
        cpu.status(),
        cpu.sp(),
        cpu.cycles(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> impl FnMut(u16) -> u8 + '_ {
        move |addr| bytes.get(addr as usize).copied().unwrap_or(0)
    }

    #[test]
    fn formats_immediate() {
        let line = disassemble(reader(&[0xA9, 0x42]), 0);
        assert_eq!(line, "0000  A9 42     LDA #$42");
    }

    #[test]
    fn formats_absolute_indexed() {
        let line = disassemble(reader(&[0xBD, 0x34, 0x12]), 0);
        assert_eq!(line, "0000  BD 34 12  LDA $1234,X");
    }

    #[test]
    fn formats_branch_target() {
        // BNE +4 from $0000: next instruction at $0002, target $0006.
        let line = disassemble(reader(&[0xD0, 0x04]), 0);
        assert_eq!(line, "0000  D0 04     BNE $0006");
    }

    #[test]
    fn formats_implied() {
        let line = disassemble(reader(&[0xEA]), 0);
        assert_eq!(line, "0000  EA        NOP");
    }

    #[test]
    fn every_opcode_has_a_mode_length() {
        for op in 0..=255u8 {
            let (_, mode) = opcode_info(op);
            assert!(mode.len() >= 1 && mode.len() <= 3);
        }
    }
}
