//! The console bus.
//!
//! Owns every subsystem (CPU, PPU, RAM, cartridge, controllers) and
//! drives the master clock: one `tick` is one PPU dot, and every third
//! tick runs one CPU cycle. The per-tick order is fixed and part of the
//! save-state contract: PPU, then CPU, then NMI drain, then the mapper's
//! scanline hook and IRQ, then flag propagation.
//!
//! The CPU cannot borrow the bus that owns it, so the peripherals live in
//! an inner [`Devices`] complex that implements the CPU-facing bus trait.

use std::io::Write;

use cpu_6502::{disasm, Mos6502};
use emu_state::{Snapshot, StateError, StateReader, StateWriter};

use crate::controller::{Joystick, Zapper};
use crate::mapper::Mapper;
use crate::ppu::Ppu;

/// Edges observed during one master tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub instr_complete: bool,
    pub scanline_complete: bool,
    pub frame_complete: bool,
}

/// Controller port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    One,
    Two,
}

/// Everything on the bus except the CPU.
struct Devices {
    ram: [u8; 2048],
    ppu: Ppu,
    cart: Box<dyn Mapper>,
    joy1: Joystick,
    joy2: Joystick,
    zapper: Option<Zapper>,
    /// Master tick counter.
    cycles: u64,
    /// Stall cycles parked by an OAM DMA write, waiting to be moved onto
    /// the CPU's halt counter within the same master tick.
    dma_stall: u32,
}

impl Devices {
    /// Read without side effects, for tracing and the test harness.
    /// Registers with read side effects report 0.
    fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr) & 0x07FF],
            0x2000..=0x401F => 0,
            0x4020..=0xFFFF => self.cart.read_prg(addr),
        }
    }

    fn take_dma_stall(&mut self) -> u32 {
        std::mem::take(&mut self.dma_stall)
    }

    /// OAM DMA: copy a whole page into OAM through the bus and charge the
    /// CPU 513 cycles, one more when the tick counter is odd.
    fn oam_dma(&mut self, page: u8) {
        let base = u16::from(page) << 8;
        for i in 0..256u16 {
            let value = cpu_6502::Bus::read(self, base + i);
            self.ppu.write_oam_data(value);
        }
        self.dma_stall += 513 + u32::from(self.cycles % 2 == 1);
    }
}

impl cpu_6502::Bus for Devices {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr) & 0x07FF],
            0x2000..=0x3FFF => self.ppu.cpu_read(addr & 0x0007, self.cart.as_ref()),
            0x4016 => self.joy1.read(),
            0x4017 => match &self.zapper {
                Some(zapper) => zapper.read(),
                None => self.joy2.read(),
            },
            // APU and test-mode registers: open bus.
            0x4000..=0x401F => 0,
            0x4020..=0xFFFF => self.cart.read_prg(addr),
        }
    }

    fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram[usize::from(addr) & 0x07FF] = data,
            0x2000..=0x3FFF => self.ppu.cpu_write(addr & 0x0007, data, self.cart.as_mut()),
            0x4014 => self.oam_dma(data),
            0x4016 => {
                // The strobe reaches both pads.
                self.joy1.write(data);
                self.joy2.write(data);
            }
            0x4000..=0x401F => {} // APU and test-mode registers
            0x4020..=0xFFFF => self.cart.write_prg(addr, data),
        }
    }
}

/// The NES.
pub struct Bus {
    cpu: Mos6502,
    dev: Devices,
    trace_sink: Option<Box<dyn Write>>,
    trace_enabled: bool,
}

impl Bus {
    pub fn new(cart: Box<dyn Mapper>) -> Self {
        Self {
            cpu: Mos6502::new(),
            dev: Devices {
                ram: [0; 2048],
                ppu: Ppu::new(),
                cart,
                joy1: Joystick::new(),
                joy2: Joystick::new(),
                zapper: None,
                cycles: 0,
                dma_stall: 0,
            },
            trace_sink: None,
            trace_enabled: false,
        }
    }

    /// Put a Zapper on port 2 (replaces the joypad there for reads).
    pub fn attach_zapper(&mut self) {
        self.dev.zapper = Some(Zapper::new());
    }

    /// Reset order matters: the cartridge first, then the CPU (it reads
    /// the reset vector through the mapper), then the PPU.
    pub fn reset(&mut self) {
        self.dev.cart.reset();
        self.cpu.reset(&mut self.dev);
        self.dev.ppu.reset();
        self.dev.cycles = 0;
        self.dev.dma_stall = 0;
    }

    /// One master tick.
    pub fn tick(&mut self) -> Tick {
        let mut tick = Tick::default();

        self.dev.cycles += 1;
        self.dev.ppu.tick(self.dev.cart.as_ref());

        if self.dev.cycles % 3 == 0 {
            tick.instr_complete = self.cpu.tick(&mut self.dev);
            // A $4014 write during that cycle parks the stall count here.
            let stall = self.dev.take_dma_stall();
            if stall > 0 {
                self.cpu.add_halt(stall);
            }
            if tick.instr_complete && self.trace_enabled {
                self.trace();
            }
        }

        if self.dev.ppu.take_nmi() {
            self.cpu.set_nmi();
        }

        if self.dev.ppu.take_scanline() {
            tick.scanline_complete = true;
            self.dev.cart.scanline_tick();
            if self.dev.cart.pending_irq() {
                self.cpu.set_irq();
            }
        }

        if self.dev.ppu.take_frame() {
            tick.frame_complete = true;
        }

        tick
    }

    /// Tick until the next frame edge. Returns ticks consumed.
    pub fn run_frame(&mut self) -> u64 {
        let mut ticks = 0;
        loop {
            ticks += 1;
            if self.tick().frame_complete {
                return ticks;
            }
        }
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        cpu_6502::Bus::read(&mut self.dev, addr)
    }

    pub fn write(&mut self, addr: u16, data: u8) {
        cpu_6502::Bus::write(&mut self.dev, addr, data)
    }

    /// Side-effect-free read, for tests and tracing.
    pub fn peek(&self, addr: u16) -> u8 {
        self.dev.peek(addr)
    }

    pub fn cycles(&self) -> u64 {
        self.dev.cycles
    }

    pub fn cpu(&self) -> &Mos6502 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Mos6502 {
        &mut self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        &self.dev.ppu
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.dev.ppu.framebuffer()
    }

    /// Replay switch: skip pixel composition in the PPU.
    pub fn set_fast_forward(&mut self, on: bool) {
        self.dev.ppu.set_fast_forward(on);
    }

    pub fn set_buttons(&mut self, port: Port, buttons: u8) {
        match port {
            Port::One => self.dev.joy1.set_buttons(buttons),
            Port::Two => self.dev.joy2.set_buttons(buttons),
        }
    }

    pub fn zapper_mut(&mut self) -> Option<&mut Zapper> {
        self.dev.zapper.as_mut()
    }

    /// Feed the Zapper's photodiode from the finished frame. Call once
    /// per visible frame.
    pub fn update_zapper_light(&mut self) {
        if let Some(zapper) = self.dev.zapper.as_mut() {
            zapper.update_light_sense(self.dev.ppu.framebuffer(), crate::ppu::FRAME_WIDTH);
        }
    }

    /// Install an execution-trace sink. Each completed instruction logs
    /// one disassembled line while tracing is enabled.
    pub fn set_trace_sink(&mut self, sink: Box<dyn Write>) {
        self.trace_sink = Some(sink);
    }

    pub fn set_trace_enabled(&mut self, on: bool) {
        self.trace_enabled = on && self.trace_sink.is_some();
    }

    fn trace(&mut self) {
        if let Some(sink) = &mut self.trace_sink {
            let dev = &self.dev;
            let line = disasm::trace_line(|addr| dev.peek(addr), &self.cpu);
            if let Err(err) = writeln!(sink, "{line}") {
                panic!("failed to write execution trace: {err}");
            }
        }
    }
}

impl Snapshot for Bus {
    fn save_state(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_bytes(&self.dev.ram)?;
        self.cpu.save_state(w)?;
        self.dev.ppu.save_state(w)?;
        self.dev.joy1.save_state(w)?;
        self.dev.joy2.save_state(w)?;
        w.write_bool(self.dev.zapper.is_some())?;
        if let Some(zapper) = &self.dev.zapper {
            zapper.save_state(w)?;
        }
        w.write_u64(self.dev.cycles)?;
        w.write_u32(self.dev.dma_stall)?;
        self.dev.cart.save(w)
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        r.read_bytes(&mut self.dev.ram)?;
        self.cpu.load_state(r)?;
        self.dev.ppu.load_state(r)?;
        self.dev.joy1.load_state(r)?;
        self.dev.joy2.load_state(r)?;
        if r.read_bool()? {
            let zapper = self.dev.zapper.get_or_insert_with(Zapper::new);
            zapper.load_state(r)?;
        } else {
            self.dev.zapper = None;
        }
        self.dev.cycles = r.read_u64()?;
        self.dev.dma_stall = r.read_u32()?;
        self.dev.cart.load(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::load_rom;

    /// Build an NROM image whose reset vector points at `code` loaded to
    /// $8000.
    fn rom_with_code(code: &[u8]) -> Box<dyn Mapper> {
        let mut data = vec![0u8; 16 + 0x8000 + 0x2000];
        data[0..4].copy_from_slice(b"NES\x1a");
        data[4] = 2; // 32 KiB PRG
        data[5] = 1;
        data[16..16 + code.len()].copy_from_slice(code);
        // Reset vector -> $8000 (offset $7FFC in PRG).
        data[16 + 0x7FFC] = 0x00;
        data[16 + 0x7FFD] = 0x80;
        load_rom(&data).unwrap()
    }

    fn nop_bus() -> Bus {
        // An endless JMP $8000 loop.
        let mut bus = Bus::new(rom_with_code(&[0x4C, 0x00, 0x80]));
        bus.reset();
        bus
    }

    #[test]
    fn ram_mirrored_every_2k() {
        let mut bus = nop_bus();
        bus.write(0x0000, 0xAB);
        assert_eq!(bus.read(0x0800), 0xAB);
        assert_eq!(bus.read(0x1000), 0xAB);
        assert_eq!(bus.read(0x1800), 0xAB);
    }

    #[test]
    fn reserved_io_is_open_bus() {
        let mut bus = nop_bus();
        bus.write(0x4018, 0xFF);
        assert_eq!(bus.read(0x4018), 0);
        assert_eq!(bus.read(0x401F), 0);
    }

    #[test]
    fn cpu_ticks_every_third_cycle() {
        let mut bus = nop_bus();
        let ticks = 3 * 1000;
        for _ in 0..ticks {
            bus.tick();
        }
        assert_eq!(bus.cpu().cycles(), 1000);
    }

    #[test]
    fn smoke_program_writes_ram() {
        // LDA #$42; STA $0200; JMP self
        let mut bus = Bus::new(rom_with_code(&[
            0xA9, 0x42, 0x8D, 0x00, 0x02, 0x4C, 0x05, 0x80,
        ]));
        bus.reset();
        for _ in 0..300 {
            bus.tick();
        }
        assert_eq!(bus.peek(0x0200), 0x42);
        assert_eq!(bus.cpu().pc(), 0x8005);
    }

    #[test]
    fn oam_dma_copies_a_page_and_stalls() {
        // Fill $0200-$02FF via the bus, then: LDA #$02; STA $4014.
        let mut bus = Bus::new(rom_with_code(&[0xA9, 0x02, 0x8D, 0x14, 0x40]));
        bus.reset();
        for i in 0..=255u8 {
            bus.write(0x0200 + u16::from(i), i.wrapping_add(3));
        }

        // Run master ticks until the DMA write lands (the STA edge).
        let mut stalled_at = None;
        for _ in 0..200 {
            bus.tick();
            if bus.cpu().halt() > 0 {
                stalled_at = Some(bus.cycles());
                break;
            }
        }
        let started = stalled_at.expect("DMA never started");

        // 513 + 1 exactly when the write tick was odd.
        let expected = 513 + u32::from(started % 2 == 1);
        assert_eq!(bus.cpu().halt(), expected);
        assert_eq!(bus.ppu().read_oam(0), 3);
        assert_eq!(bus.ppu().read_oam(255), 2);

        // No instruction retires while the stall burns.
        let mut halted_ticks = 0u32;
        while bus.cpu().halt() > 0 {
            let tick = bus.tick();
            assert!(!tick.instr_complete);
            halted_ticks += 1;
        }
        // The stall burns one halt cycle per CPU tick, i.e. every third
        // master tick.
        assert!(halted_ticks >= expected * 3 - 2);
        assert!(halted_ticks <= expected * 3);
    }

    #[test]
    fn joystick_strobe_protocol_via_registers() {
        let mut bus = nop_bus();
        bus.set_buttons(Port::One, 0b0000_1001); // A + Start

        bus.write(0x4016, 1);
        bus.write(0x4016, 0);

        let bits: Vec<u8> = (0..8).map(|_| bus.read(0x4016) & 1).collect();
        assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(bus.read(0x4016) & 1, 1);
    }

    #[test]
    fn port2_prefers_zapper_when_attached() {
        let mut bus = nop_bus();
        bus.set_buttons(Port::Two, 0xFF);
        bus.write(0x4016, 1);
        bus.write(0x4016, 0);
        assert_eq!(bus.read(0x4017) & 1, 1);

        bus.attach_zapper();
        // Zapper idle: light off (bit 3), trigger released (bit 4).
        assert_eq!(bus.read(0x4017), 0x18);
    }

    #[test]
    fn save_load_round_trip_resumes_identically() {
        let mut bus = Bus::new(rom_with_code(&[
            0xE6, 0x10, // INC $10
            0xA5, 0x10, // LDA $10
            0x8D, 0x00, 0x02, // STA $0200
            0x4C, 0x00, 0x80, // JMP $8000
        ]));
        bus.reset();
        for _ in 0..10_000 {
            bus.tick();
        }

        let saved = emu_state::snapshot_to_vec(&bus).unwrap();

        let mut other = Bus::new(rom_with_code(&[
            0xE6, 0x10,
            0xA5, 0x10,
            0x8D, 0x00, 0x02,
            0x4C, 0x00, 0x80,
        ]));
        other.reset();
        emu_state::snapshot_from_slice(&mut other, &saved).unwrap();

        for _ in 0..30_000 {
            assert_eq!(bus.tick(), other.tick());
        }
        assert_eq!(
            emu_state::snapshot_to_vec(&bus).unwrap(),
            emu_state::snapshot_to_vec(&other).unwrap()
        );
    }

    #[test]
    fn trace_logs_instructions() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let shared = Shared(Arc::new(Mutex::new(Vec::new())));
        let mut bus = nop_bus();
        bus.set_trace_sink(Box::new(shared.clone()));
        bus.set_trace_enabled(true);

        for _ in 0..30 {
            bus.tick();
        }

        let log = String::from_utf8(shared.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("JMP $8000"), "trace was: {log}");
    }
}
