//! Controller port devices: the standard joypad and the Zapper light gun.
//!
//! The joypad is a serial shift register behind $4016/$4017. While the
//! strobe bit is high, reads return the live A button; a high-to-low
//! strobe transition latches the full bitmap, and each subsequent read
//! shifts one bit out with 1s shifting in behind.

use emu_state::{Snapshot, StateError, StateReader, StateWriter};

/// Button bit positions in the joystick bitmap.
pub mod button {
    pub const A: u8 = 0;
    pub const B: u8 = 1;
    pub const SELECT: u8 = 2;
    pub const START: u8 = 3;
    pub const UP: u8 = 4;
    pub const DOWN: u8 = 5;
    pub const LEFT: u8 = 6;
    pub const RIGHT: u8 = 7;
}

/// A standard NES joypad.
pub struct Joystick {
    /// Live button bitmap (bit per button, 1 = pressed).
    buttons: u8,
    /// Latched shift register.
    shift: u8,
    /// Strobe bit from the last $4016 write.
    strobe: bool,
}

impl Joystick {
    pub fn new() -> Self {
        Self {
            buttons: 0,
            shift: 0,
            strobe: false,
        }
    }

    /// Replace the whole bitmap. This is the netplay entry point: one
    /// bitmap per frame per player.
    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
        if self.strobe {
            self.shift = buttons;
        }
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    /// $4016/$4017 read: one bit, LSB first.
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons & 1;
        }
        let bit = self.shift & 1;
        // Ones shift in behind, so reads past the eighth return 1.
        self.shift = 0x80 | (self.shift >> 1);
        bit
    }

    /// $4016 write: bit 0 is the strobe. Latch on the falling edge.
    pub fn write(&mut self, data: u8) {
        let strobe = data & 1 != 0;
        if self.strobe && !strobe {
            self.shift = self.buttons;
        }
        self.strobe = strobe;
    }
}

impl Default for Joystick {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot for Joystick {
    fn save_state(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_u8(self.buttons)?;
        w.write_u8(self.shift)?;
        w.write_bool(self.strobe)
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.buttons = r.read_u8()?;
        self.shift = r.read_u8()?;
        self.strobe = r.read_bool()?;
        Ok(())
    }
}

/// The Zapper light gun on port 2.
///
/// Reads report trigger and photodiode state in the $4017 byte: bit 4 is
/// the trigger (0 = pulled) and bit 3 the light sense (0 = light seen).
/// The photodiode is fed from the rendered frame once per frame by
/// sampling the pixel under the aim point.
pub struct Zapper {
    pub trigger: bool,
    pub aim_x: u16,
    pub aim_y: u16,
    light: bool,
}

impl Zapper {
    pub fn new() -> Self {
        Self {
            trigger: false,
            aim_x: 128,
            aim_y: 120,
            light: false,
        }
    }

    /// $4017 read. Both signals are active-low.
    pub fn read(&self) -> u8 {
        let light = if self.light { 0x00 } else { 0x08 };
        let trigger = if self.trigger { 0x00 } else { 0x10 };
        light | trigger
    }

    /// Sample the framebuffer under the aim point. Bright pixels (the
    /// white flash frames games draw for hit detection) close the diode.
    pub fn update_light_sense(&mut self, framebuffer: &[u32], width: usize) {
        let x = usize::from(self.aim_x);
        let y = usize::from(self.aim_y);
        self.light = match framebuffer.get(y * width + x) {
            Some(&rgba) => {
                let r = (rgba >> 24) & 0xFF;
                let g = (rgba >> 16) & 0xFF;
                let b = (rgba >> 8) & 0xFF;
                r + g + b > 0x180
            }
            None => false,
        };
    }
}

impl Default for Zapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot for Zapper {
    fn save_state(&self, w: &mut StateWriter<'_>) -> Result<(), StateError> {
        w.write_bool(self.trigger)?;
        w.write_u16(self.aim_x)?;
        w.write_u16(self.aim_y)?;
        w.write_bool(self.light)
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.trigger = r.read_bool()?;
        self.aim_x = r.read_u16()?;
        self.aim_y = r.read_u16()?;
        self.light = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strobe_then_read_returns_bits_in_order() {
        let mut joy = Joystick::new();
        joy.set_buttons(0b1010_0101); // A, Select, Down, Right

        joy.write(1);
        joy.write(0);

        let bits: Vec<u8> = (0..8).map(|_| joy.read()).collect();
        assert_eq!(bits, vec![1, 0, 1, 0, 0, 1, 0, 1]);
        // Exhausted register reads as 1.
        assert_eq!(joy.read(), 1);
        assert_eq!(joy.read(), 1);
    }

    #[test]
    fn strobe_high_reads_live_a_button() {
        let mut joy = Joystick::new();
        joy.write(1);

        joy.set_buttons(1 << button::A);
        assert_eq!(joy.read(), 1);
        assert_eq!(joy.read(), 1); // no shifting while strobed

        joy.set_buttons(0);
        assert_eq!(joy.read(), 0);
    }

    #[test]
    fn relatch_on_next_falling_edge() {
        let mut joy = Joystick::new();
        joy.set_buttons(1 << button::START);
        joy.write(1);
        joy.write(0);
        for _ in 0..8 {
            joy.read();
        }

        joy.set_buttons(1 << button::A);
        joy.write(1);
        joy.write(0);
        assert_eq!(joy.read(), 1);
    }

    #[test]
    fn zapper_reports_active_low() {
        let mut zapper = Zapper::new();
        assert_eq!(zapper.read(), 0x18); // no light, trigger released

        zapper.trigger = true;
        assert_eq!(zapper.read(), 0x08);

        let bright = vec![0xFFFFFFFFu32; 256 * 240];
        zapper.update_light_sense(&bright, 256);
        assert_eq!(zapper.read(), 0x00);
    }

    #[test]
    fn zapper_dark_pixel_opens_diode() {
        let mut zapper = Zapper::new();
        let dark = vec![0x000000FFu32; 256 * 240];
        zapper.update_light_sense(&dark, 256);
        assert_eq!(zapper.read() & 0x08, 0x08);
    }

    #[test]
    fn joystick_state_round_trip() {
        let mut joy = Joystick::new();
        joy.set_buttons(0x42);
        joy.write(1);
        joy.write(0);
        joy.read();

        let bytes = emu_state::snapshot_to_vec(&joy).unwrap();
        let mut restored = Joystick::new();
        emu_state::snapshot_from_slice(&mut restored, &bytes).unwrap();

        // Same remaining bits come out of both.
        let rest_a: Vec<u8> = (0..7).map(|_| joy.read()).collect();
        let rest_b: Vec<u8> = (0..7).map(|_| restored.read()).collect();
        assert_eq!(rest_a, rest_b);
    }
}
