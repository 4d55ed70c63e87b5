//! Cartridge mappers.
//!
//! The mapper is the sole authority over the cartridge half of the address
//! space: CPU accesses in $4020–$FFFF, PPU pattern fetches, and nametable
//! mirroring. Some boards also run a scanline counter that raises an IRQ.
//! Every register that affects decoding is part of the save state.
//!
//! Boards implemented: NROM (0), MMC1 (1), UxROM (2), CNROM (3), MMC3 (4)
//! and AxROM (7).

use emu_state::{StateError, StateReader, StateWriter};

/// Nametable mirroring arrangement, queried by the PPU on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    /// Both nametables map to the first 1 KiB page.
    Single0,
    /// Both nametables map to the second 1 KiB page.
    Single1,
    FourScreen,
}

impl Mirroring {
    fn to_u8(self) -> u8 {
        match self {
            Self::Horizontal => 0,
            Self::Vertical => 1,
            Self::Single0 => 2,
            Self::Single1 => 3,
            Self::FourScreen => 4,
        }
    }

    fn from_u8(v: u8) -> Result<Self, StateError> {
        match v {
            0 => Ok(Self::Horizontal),
            1 => Ok(Self::Vertical),
            2 => Ok(Self::Single0),
            3 => Ok(Self::Single1),
            4 => Ok(Self::FourScreen),
            _ => Err(StateError::Corrupt("mirroring out of range")),
        }
    }
}

/// The cartridge interface the bus and PPU dispatch through.
pub trait Mapper {
    /// CPU read in $4020–$FFFF.
    fn read_prg(&self, addr: u16) -> u8;
    /// CPU write in $4020–$FFFF.
    fn write_prg(&mut self, addr: u16, data: u8);
    /// PPU pattern read in $0000–$1FFF.
    fn read_chr(&self, addr: u16) -> u8;
    /// PPU pattern write in $0000–$1FFF.
    fn write_chr(&mut self, addr: u16, data: u8);
    /// Current nametable arrangement.
    fn mirror_mode(&self) -> Mirroring;

    /// Advance the board's scanline counter, if it has one.
    fn scanline_tick(&mut self) {}

    /// True for exactly one sample after the board's IRQ condition fires.
    fn pending_irq(&mut self) -> bool {
        false
    }

    /// Return bank registers to their power-on values.
    fn reset(&mut self);

    /// Serialize mutable board state (registers, counters, RAM contents).
    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError>;
    /// Restore state written by `save`.
    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError>;
}

/// Pattern memory: CHR ROM from the cart, or 8 KiB of CHR RAM when the
/// header declares none.
struct ChrStore {
    data: Vec<u8>,
    writable: bool,
}

impl ChrStore {
    fn new(chr_rom: Vec<u8>) -> Self {
        if chr_rom.is_empty() {
            Self {
                data: vec![0; 0x2000],
                writable: true,
            }
        } else {
            Self {
                data: chr_rom,
                writable: false,
            }
        }
    }

    fn read(&self, offset: usize) -> u8 {
        self.data[offset % self.data.len()]
    }

    fn write(&mut self, offset: usize, data: u8, board: &str) {
        if self.writable {
            let len = self.data.len();
            self.data[offset % len] = data;
        } else {
            eprintln!("[WARN] {board}: write to read-only chr at {offset:04X}");
        }
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        if self.writable {
            w.write_bytes(&self.data)?;
        }
        Ok(())
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        if self.writable {
            r.read_bytes(&mut self.data)?;
        }
        Ok(())
    }
}

// ===========================================================================
// NROM (mapper 0)
// ===========================================================================

/// No banking: 16 KiB PRG mirrored, or 32 KiB flat.
pub struct Nrom {
    prg: Vec<u8>,
    chr: ChrStore,
    mirroring: Mirroring,
}

impl Nrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            mirroring,
        }
    }
}

impl Mapper for Nrom {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0xFFFF => self.prg[(addr as usize - 0x8000) % self.prg.len()],
            _ => 0,
        }
    }

    fn write_prg(&mut self, addr: u16, _data: u8) {
        eprintln!("[WARN] nrom: unhandled prg write at {addr:04X}");
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr.read(addr as usize & 0x1FFF)
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        self.chr.write(addr as usize & 0x1FFF, data, "nrom");
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirroring
    }

    fn reset(&mut self) {}

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.chr.load(r)
    }
}

// ===========================================================================
// MMC1 (mapper 1)
// ===========================================================================

/// Serial-port banking: five writes load a 5-bit shift register which is
/// latched into the register selected by the address. Carries 8 KiB of
/// PRG RAM at $6000.
pub struct Mmc1 {
    prg: Vec<u8>,
    chr: ChrStore,
    prg_ram: Vec<u8>,

    shift: u8,
    shift_count: u8,
    /// Bits 0-1 mirroring, 2-3 PRG mode, 4 CHR mode.
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            prg_ram: vec![0; 0x2000],
            shift: 0,
            shift_count: 0,
            // PRG mode 3: $8000 switchable, $C000 fixed to the last bank.
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        }
    }

    fn prg_bank_count(&self) -> usize {
        self.prg.len() / 0x4000
    }

    fn chr_offset(&self, addr: u16) -> usize {
        let addr = addr as usize & 0x1FFF;
        if self.control & 0x10 == 0 {
            // 8 KiB mode: low bit of the bank ignored.
            (self.chr_bank0 as usize & !1) * 0x1000 + addr
        } else if addr < 0x1000 {
            self.chr_bank0 as usize * 0x1000 + addr
        } else {
            self.chr_bank1 as usize * 0x1000 + (addr - 0x1000)
        }
    }
}

impl Mapper for Mmc1 {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[addr as usize - 0x6000],
            0x8000..=0xFFFF => {
                let banks = self.prg_bank_count();
                let addr = addr as usize;
                let offset = match (self.control >> 2) & 0x03 {
                    // 32 KiB mode: low bit of the bank ignored.
                    0 | 1 => (self.prg_bank as usize & !1) * 0x4000 + (addr - 0x8000),
                    // First bank fixed at $8000, switchable at $C000.
                    2 => {
                        if addr < 0xC000 {
                            addr - 0x8000
                        } else {
                            (self.prg_bank as usize % banks) * 0x4000 + (addr - 0xC000)
                        }
                    }
                    // Switchable at $8000, last bank fixed at $C000.
                    _ => {
                        if addr < 0xC000 {
                            (self.prg_bank as usize % banks) * 0x4000 + (addr - 0x8000)
                        } else {
                            (banks - 1) * 0x4000 + (addr - 0xC000)
                        }
                    }
                };
                self.prg[offset % self.prg.len()]
            }
            _ => {
                eprintln!("[WARN] mmc1: unhandled prg read at {addr:04X}");
                0
            }
        }
    }

    fn write_prg(&mut self, addr: u16, data: u8) {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[addr as usize - 0x6000] = data,
            0x8000..=0xFFFF => {
                if data & 0x80 != 0 {
                    // Reset the shift register and force PRG mode 3.
                    self.shift = 0;
                    self.shift_count = 0;
                    self.control |= 0x0C;
                    return;
                }

                self.shift >>= 1;
                self.shift |= (data & 1) << 4;
                self.shift_count += 1;
                if self.shift_count < 5 {
                    return;
                }

                let value = self.shift & 0x1F;
                match addr {
                    0x8000..=0x9FFF => self.control = value,
                    0xA000..=0xBFFF => self.chr_bank0 = value,
                    0xC000..=0xDFFF => self.chr_bank1 = value,
                    _ => self.prg_bank = value & 0x0F,
                }
                self.shift = 0;
                self.shift_count = 0;
            }
            _ => eprintln!("[WARN] mmc1: unhandled prg write at {addr:04X}"),
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr.read(self.chr_offset(addr))
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        let offset = self.chr_offset(addr);
        self.chr.write(offset, data, "mmc1");
    }

    fn mirror_mode(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::Single0,
            1 => Mirroring::Single1,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }

    fn reset(&mut self) {
        self.shift = 0;
        self.shift_count = 0;
        self.control = 0x0C;
        self.chr_bank0 = 0;
        self.chr_bank1 = 0;
        self.prg_bank = 0;
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.shift)?;
        w.write_u8(self.shift_count)?;
        w.write_u8(self.control)?;
        w.write_u8(self.chr_bank0)?;
        w.write_u8(self.chr_bank1)?;
        w.write_u8(self.prg_bank)?;
        w.write_bytes(&self.prg_ram)?;
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.shift = r.read_u8()?;
        self.shift_count = r.read_u8()?;
        self.control = r.read_u8()?;
        self.chr_bank0 = r.read_u8()?;
        self.chr_bank1 = r.read_u8()?;
        self.prg_bank = r.read_u8()?;
        r.read_bytes(&mut self.prg_ram)?;
        self.chr.load(r)
    }
}

// ===========================================================================
// UxROM (mapper 2)
// ===========================================================================

/// 16 KiB switchable PRG at $8000, last bank fixed at $C000.
pub struct Uxrom {
    prg: Vec<u8>,
    chr: ChrStore,
    mirroring: Mirroring,
    prg_bank: u8,
}

impl Uxrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            mirroring,
            prg_bank: 0,
        }
    }

    fn bank_count(&self) -> usize {
        self.prg.len() / 0x4000
    }
}

impl Mapper for Uxrom {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0xBFFF => {
                let bank = self.prg_bank as usize % self.bank_count();
                self.prg[bank * 0x4000 + (addr as usize - 0x8000)]
            }
            0xC000..=0xFFFF => {
                let bank = self.bank_count() - 1;
                self.prg[bank * 0x4000 + (addr as usize - 0xC000)]
            }
            _ => 0,
        }
    }

    fn write_prg(&mut self, addr: u16, data: u8) {
        if addr >= 0x8000 {
            self.prg_bank = data & 0x0F;
        } else {
            eprintln!("[WARN] uxrom: unhandled prg write at {addr:04X}");
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr.read(addr as usize & 0x1FFF)
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        self.chr.write(addr as usize & 0x1FFF, data, "uxrom");
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirroring
    }

    fn reset(&mut self) {
        self.prg_bank = 0;
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.prg_bank)?;
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.prg_bank = r.read_u8()?;
        self.chr.load(r)
    }
}

// ===========================================================================
// CNROM (mapper 3)
// ===========================================================================

/// Fixed PRG, 8 KiB switchable CHR.
pub struct Cnrom {
    prg: Vec<u8>,
    chr: ChrStore,
    mirroring: Mirroring,
    chr_bank: u8,
}

impl Cnrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            mirroring,
            chr_bank: 0,
        }
    }
}

impl Mapper for Cnrom {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0xFFFF => self.prg[(addr as usize - 0x8000) % self.prg.len()],
            _ => 0,
        }
    }

    fn write_prg(&mut self, addr: u16, data: u8) {
        if addr >= 0x8000 {
            self.chr_bank = data & 0x03;
        } else {
            eprintln!("[WARN] cnrom: unhandled prg write at {addr:04X}");
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr
            .read(self.chr_bank as usize * 0x2000 + (addr as usize & 0x1FFF))
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        let offset = self.chr_bank as usize * 0x2000 + (addr as usize & 0x1FFF);
        self.chr.write(offset, data, "cnrom");
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirroring
    }

    fn reset(&mut self) {
        self.chr_bank = 0;
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.chr_bank)?;
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.chr_bank = r.read_u8()?;
        self.chr.load(r)
    }
}

// ===========================================================================
// MMC3 (mapper 4)
// ===========================================================================

/// Fine-grained banking plus the scanline IRQ counter that raster effects
/// rely on. Bank select at $8000 (even), bank data at $8001 (odd); R0/R1
/// are 2 KiB CHR banks, R2-R5 1 KiB CHR banks, R6/R7 8 KiB PRG banks.
pub struct Mmc3 {
    prg: Vec<u8>,
    chr: ChrStore,
    prg_ram: Vec<u8>,

    bank_select: u8,
    regs: [u8; 8],
    mirroring: Mirroring,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            prg_ram: vec![0; 0x2000],
            bank_select: 0,
            regs: [0; 8],
            mirroring,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        }
    }

    fn prg_bank_count(&self) -> usize {
        self.prg.len() / 0x2000
    }

    fn chr_offset(&self, addr: u16) -> usize {
        let invert = self.bank_select & 0x80 != 0;
        let addr = addr as usize & 0x1FFF;
        // With the invert bit, the 2 KiB and 1 KiB halves swap.
        let slot = if invert { addr ^ 0x1000 } else { addr };
        match slot {
            0x0000..=0x07FF => (self.regs[0] as usize & !1) * 0x400 + (slot & 0x7FF),
            0x0800..=0x0FFF => (self.regs[1] as usize & !1) * 0x400 + (slot & 0x7FF),
            0x1000..=0x13FF => self.regs[2] as usize * 0x400 + (slot & 0x3FF),
            0x1400..=0x17FF => self.regs[3] as usize * 0x400 + (slot & 0x3FF),
            0x1800..=0x1BFF => self.regs[4] as usize * 0x400 + (slot & 0x3FF),
            _ => self.regs[5] as usize * 0x400 + (slot & 0x3FF),
        }
    }
}

impl Mapper for Mmc3 {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[addr as usize - 0x6000],
            0x8000..=0xFFFF => {
                let banks = self.prg_bank_count();
                let last = banks - 1;
                let swap = self.bank_select & 0x40 != 0;
                let r6 = self.regs[6] as usize & 0x3F;
                let r7 = self.regs[7] as usize & 0x3F;

                let segment = (addr as usize - 0x8000) >> 13;
                let bank = match (segment, swap) {
                    (0, false) => r6,
                    (0, true) => last - 1,
                    (1, _) => r7,
                    (2, false) => last - 1,
                    (2, true) => r6,
                    _ => last,
                };
                self.prg[(bank % banks) * 0x2000 + (addr as usize & 0x1FFF)]
            }
            _ => {
                eprintln!("[WARN] mmc3: unhandled prg read at {addr:04X}");
                0
            }
        }
    }

    fn write_prg(&mut self, addr: u16, data: u8) {
        match (addr, addr & 1) {
            (0x6000..=0x7FFF, _) => self.prg_ram[addr as usize - 0x6000] = data,
            (0x8000..=0x9FFF, 0) => self.bank_select = data,
            (0x8000..=0x9FFF, _) => self.regs[(self.bank_select & 0x07) as usize] = data,
            (0xA000..=0xBFFF, 0) => {
                self.mirroring = if data & 1 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
            }
            (0xA000..=0xBFFF, _) => {} // PRG RAM protect, left permissive
            (0xC000..=0xDFFF, 0) => self.irq_latch = data,
            (0xC000..=0xDFFF, _) => {
                self.irq_counter = 0;
                self.irq_reload = true;
            }
            (0xE000..=0xFFFF, 0) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            (0xE000..=0xFFFF, _) => self.irq_enabled = true,
            _ => eprintln!("[WARN] mmc3: unhandled prg write at {addr:04X}"),
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr.read(self.chr_offset(addr))
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        let offset = self.chr_offset(addr);
        self.chr.write(offset, data, "mmc3");
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirroring
    }

    fn scanline_tick(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
            if self.irq_counter == 0 && self.irq_enabled {
                self.irq_pending = true;
            }
        }
    }

    fn pending_irq(&mut self) -> bool {
        let pending = self.irq_pending;
        self.irq_pending = false;
        pending
    }

    fn reset(&mut self) {
        self.bank_select = 0;
        self.regs = [0; 8];
        self.irq_latch = 0;
        self.irq_counter = 0;
        self.irq_reload = false;
        self.irq_enabled = false;
        self.irq_pending = false;
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.bank_select)?;
        w.write_bytes(&self.regs)?;
        w.write_u8(self.mirroring.to_u8())?;
        w.write_u8(self.irq_latch)?;
        w.write_u8(self.irq_counter)?;
        w.write_bool(self.irq_reload)?;
        w.write_bool(self.irq_enabled)?;
        w.write_bool(self.irq_pending)?;
        w.write_bytes(&self.prg_ram)?;
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.bank_select = r.read_u8()?;
        r.read_bytes(&mut self.regs)?;
        self.mirroring = Mirroring::from_u8(r.read_u8()?)?;
        self.irq_latch = r.read_u8()?;
        self.irq_counter = r.read_u8()?;
        self.irq_reload = r.read_bool()?;
        self.irq_enabled = r.read_bool()?;
        self.irq_pending = r.read_bool()?;
        r.read_bytes(&mut self.prg_ram)?;
        self.chr.load(r)
    }
}

// ===========================================================================
// AxROM (mapper 7)
// ===========================================================================

/// 32 KiB PRG banks with software-selected single-screen mirroring.
pub struct Axrom {
    prg: Vec<u8>,
    chr: ChrStore,
    prg_bank: u8,
    nt_bank: u8,
}

impl Axrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>) -> Self {
        Self {
            prg,
            chr: ChrStore::new(chr),
            prg_bank: 0,
            nt_bank: 0,
        }
    }
}

impl Mapper for Axrom {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0xFFFF => {
                let offset = self.prg_bank as usize * 0x8000 + (addr as usize - 0x8000);
                self.prg[offset % self.prg.len()]
            }
            _ => {
                eprintln!("[WARN] axrom: unhandled prg read at {addr:04X}");
                0
            }
        }
    }

    fn write_prg(&mut self, addr: u16, data: u8) {
        if addr >= 0x8000 {
            self.prg_bank = data & 0x07;
            self.nt_bank = (data & 0x10) >> 4;
        } else {
            eprintln!("[WARN] axrom: unhandled prg write at {addr:04X}");
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        self.chr.read(addr as usize & 0x1FFF)
    }

    fn write_chr(&mut self, addr: u16, data: u8) {
        self.chr.write(addr as usize & 0x1FFF, data, "axrom");
    }

    fn mirror_mode(&self) -> Mirroring {
        if self.nt_bank == 0 {
            Mirroring::Single0
        } else {
            Mirroring::Single1
        }
    }

    fn reset(&mut self) {
        self.prg_bank = 0;
        self.nt_bank = 0;
    }

    fn save(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.prg_bank)?;
        w.write_u8(self.nt_bank)?;
        self.chr.save(w)
    }

    fn load(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.prg_bank = r.read_u8()?;
        self.nt_bank = r.read_u8()?;
        self.chr.load(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ROM filled with its own 256-byte page number, so banks are telling.
    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| ((i >> 8) as u8).wrapping_add(seed)).collect()
    }

    #[test]
    fn nrom_mirrors_16k() {
        let nrom = Nrom::new(patterned(0x4000, 0), vec![0; 0x2000], Mirroring::Horizontal);
        assert_eq!(nrom.read_prg(0x8000), nrom.read_prg(0xC000));
        assert_eq!(nrom.read_prg(0x8123), nrom.read_prg(0xC123));
    }

    #[test]
    fn nrom_32k_is_flat() {
        let nrom = Nrom::new(patterned(0x8000, 0), vec![0; 0x2000], Mirroring::Vertical);
        assert_eq!(nrom.read_prg(0x8000), 0x00);
        assert_eq!(nrom.read_prg(0xC000), 0x40);
    }

    #[test]
    fn chr_ram_when_no_chr_rom() {
        let mut nrom = Nrom::new(patterned(0x4000, 0), Vec::new(), Mirroring::Horizontal);
        nrom.write_chr(0x0123, 0xAB);
        assert_eq!(nrom.read_chr(0x0123), 0xAB);
    }

    #[test]
    fn chr_rom_is_read_only() {
        let mut nrom = Nrom::new(patterned(0x4000, 0), patterned(0x2000, 7), Mirroring::Horizontal);
        let before = nrom.read_chr(0x0000);
        nrom.write_chr(0x0000, !before);
        assert_eq!(nrom.read_chr(0x0000), before);
    }

    fn mmc1_load(m: &mut Mmc1, addr: u16, value: u8) {
        for i in 0..5 {
            m.write_prg(addr, (value >> i) & 1);
        }
    }

    #[test]
    fn mmc1_shift_register_latches_after_five_writes() {
        let mut m = Mmc1::new(patterned(0x8000, 0), vec![0; 0x2000]);
        // Select vertical mirroring (control = 2).
        mmc1_load(&mut m, 0x8000, 0x02);
        assert_eq!(m.mirror_mode(), Mirroring::Vertical);
        // Four writes alone must not latch.
        for _ in 0..4 {
            m.write_prg(0x8000, 1);
        }
        assert_eq!(m.mirror_mode(), Mirroring::Vertical);
    }

    #[test]
    fn mmc1_reset_bit_restores_prg_mode_3() {
        let mut m = Mmc1::new(patterned(0x10000, 0), vec![0; 0x2000]);
        mmc1_load(&mut m, 0x8000, 0x00); // 32 KiB mode
        m.write_prg(0x8000, 0x80); // reset bit
        // Mode 3 again: $C000 reads the last bank.
        let last_bank_first = m.prg[(m.prg_bank_count() - 1) * 0x4000];
        assert_eq!(m.read_prg(0xC000), last_bank_first);
    }

    #[test]
    fn mmc1_prg_bank_switch() {
        let mut m = Mmc1::new(patterned(0x10000, 0), vec![0; 0x2000]);
        mmc1_load(&mut m, 0xE000, 0x02); // bank 2 at $8000 (mode 3)
        assert_eq!(m.read_prg(0x8000), m.prg[2 * 0x4000]);
        assert_eq!(m.read_prg(0xC000), m.prg[3 * 0x4000]); // last fixed
    }

    #[test]
    fn mmc1_prg_ram() {
        let mut m = Mmc1::new(patterned(0x8000, 0), vec![0; 0x2000]);
        m.write_prg(0x6000, 0x5A);
        assert_eq!(m.read_prg(0x6000), 0x5A);
    }

    #[test]
    fn uxrom_banks_and_fixed_tail() {
        let mut m = Uxrom::new(patterned(0x10000, 0), Vec::new(), Mirroring::Vertical);
        m.write_prg(0x8000, 2);
        assert_eq!(m.read_prg(0x8000), m.prg[2 * 0x4000]);
        assert_eq!(m.read_prg(0xC000), m.prg[3 * 0x4000]);
    }

    #[test]
    fn cnrom_switches_chr() {
        let mut m = Cnrom::new(patterned(0x8000, 0), patterned(0x8000, 1), Mirroring::Vertical);
        m.write_prg(0x8000, 1);
        assert_eq!(m.read_chr(0x0000), m.chr.data[0x2000]);
        m.write_prg(0x8000, 3);
        assert_eq!(m.read_chr(0x0000), m.chr.data[0x6000]);
    }

    #[test]
    fn mmc3_prg_modes() {
        let mut m = Mmc3::new(patterned(0x20000, 0), patterned(0x2000, 0), Mirroring::Vertical);
        let banks = m.prg_bank_count();

        // R6 = 3, swap off: bank 3 at $8000, second-to-last at $C000.
        m.write_prg(0x8000, 6);
        m.write_prg(0x8001, 3);
        assert_eq!(m.read_prg(0x8000), m.prg[3 * 0x2000]);
        assert_eq!(m.read_prg(0xC000), m.prg[(banks - 2) * 0x2000]);

        // Swap on: fixed bank moves to $8000, R6 to $C000.
        m.write_prg(0x8000, 0x46);
        assert_eq!(m.read_prg(0x8000), m.prg[(banks - 2) * 0x2000]);
        assert_eq!(m.read_prg(0xC000), m.prg[3 * 0x2000]);
        // Last bank always fixed at $E000.
        assert_eq!(m.read_prg(0xE000), m.prg[(banks - 1) * 0x2000]);
    }

    #[test]
    fn mmc3_scanline_irq_fires_once() {
        let mut m = Mmc3::new(patterned(0x8000, 0), patterned(0x2000, 0), Mirroring::Vertical);
        m.write_prg(0xC000, 3); // latch = 3
        m.write_prg(0xC001, 0); // reload
        m.write_prg(0xE001, 0); // enable

        // Reload tick, then count 3 -> 2 -> 1 -> 0.
        for _ in 0..3 {
            m.scanline_tick();
            assert!(!m.pending_irq());
        }
        m.scanline_tick();
        assert!(m.pending_irq());
        // One sample only.
        assert!(!m.pending_irq());
    }

    #[test]
    fn mmc3_irq_disable_clears_pending() {
        let mut m = Mmc3::new(patterned(0x8000, 0), patterned(0x2000, 0), Mirroring::Vertical);
        m.write_prg(0xC000, 1);
        m.write_prg(0xC001, 0);
        m.write_prg(0xE001, 0);
        m.scanline_tick(); // reload to 1
        m.scanline_tick(); // 1 -> 0, pending
        m.write_prg(0xE000, 0); // disable + acknowledge
        assert!(!m.pending_irq());
    }

    #[test]
    fn axrom_mirror_select() {
        let mut m = Axrom::new(patterned(0x8000, 0), Vec::new());
        m.write_prg(0x8000, 0x00);
        assert_eq!(m.mirror_mode(), Mirroring::Single0);
        m.write_prg(0x8000, 0x10);
        assert_eq!(m.mirror_mode(), Mirroring::Single1);
    }

    #[test]
    fn axrom_32k_banks() {
        let mut m = Axrom::new(patterned(0x20000, 0), Vec::new());
        m.write_prg(0x8000, 0x02);
        assert_eq!(m.read_prg(0x8000), m.prg[2 * 0x8000]);
    }

    #[test]
    fn mmc3_state_round_trip() {
        let mut m = Mmc3::new(patterned(0x20000, 0), patterned(0x2000, 0), Mirroring::Vertical);
        m.write_prg(0x8000, 6);
        m.write_prg(0x8001, 5);
        m.write_prg(0xA000, 1);
        m.write_prg(0xC000, 7);
        m.write_prg(0xC001, 0);
        m.write_prg(0xE001, 0);
        m.write_prg(0x6000, 0x99);
        m.scanline_tick();

        let mut bytes = Vec::new();
        let mut w = StateWriter::new(&mut bytes);
        m.save(&mut w).unwrap();

        let mut restored =
            Mmc3::new(patterned(0x20000, 0), patterned(0x2000, 0), Mirroring::Vertical);
        let mut src = bytes.as_slice();
        let mut r = StateReader::new(&mut src);
        restored.load(&mut r).unwrap();

        assert_eq!(restored.read_prg(0x8000), m.read_prg(0x8000));
        assert_eq!(restored.read_prg(0x6000), 0x99);
        assert_eq!(restored.mirror_mode(), Mirroring::Horizontal);
        assert_eq!(restored.irq_counter, m.irq_counter);
    }
}
