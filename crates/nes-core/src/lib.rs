//! NES console emulation.
//!
//! The console is driven by a master tick equal to one PPU dot. Every
//! third tick runs one CPU cycle, so a full NTSC frame is 341 × 262 =
//! 89,342 ticks (one fewer on odd frames with rendering enabled). The
//! [`Bus`] owns every subsystem and reports per-tick edges — instruction,
//! scanline, and frame completion — that the rollback layer schedules on.
//!
//! Everything mutable serializes through `emu_state` in a fixed order, so
//! a console can be checkpointed and rewound byte-exactly.

pub mod bus;
pub mod capture;
pub mod cartridge;
pub mod controller;
pub mod mapper;
pub mod palette;
pub mod ppu;
pub mod testing;

pub use bus::{Bus, Port, Tick};
pub use cartridge::{load_rom, RomError};
pub use controller::{button, Joystick, Zapper};
pub use mapper::{Mapper, Mirroring};
pub use ppu::{Ppu, FRAME_HEIGHT, FRAME_WIDTH};
