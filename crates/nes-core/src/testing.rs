//! Test support: synthetic iNES images assembled in memory.
//!
//! Integration tests across the workspace drive whole consoles without
//! ROM files on disk. The builders here produce minimal NROM images with
//! hand-assembled 6502 programs at $8000.

/// Build an NROM iNES image: 32 KiB PRG with `code` at $8000, an NMI
/// handler at $8040, and 8 KiB of CHR RAM (zero CHR banks).
pub fn build_nrom(code: &[u8], nmi_handler: &[u8]) -> Vec<u8> {
    assert!(code.len() <= 0x40, "code overlaps the NMI handler");
    let mut data = vec![0u8; 16 + 0x8000];
    data[0..4].copy_from_slice(b"NES\x1a");
    data[4] = 2; // 32 KiB PRG
    data[5] = 0; // CHR RAM

    let prg = 16;
    data[prg..prg + code.len()].copy_from_slice(code);
    data[prg + 0x40..prg + 0x40 + nmi_handler.len()].copy_from_slice(nmi_handler);

    // Vectors: NMI -> $8040, reset -> $8000, IRQ -> $8040.
    data[prg + 0x7FFA] = 0x40;
    data[prg + 0x7FFB] = 0x80;
    data[prg + 0x7FFC] = 0x00;
    data[prg + 0x7FFD] = 0x80;
    data[prg + 0x7FFE] = 0x40;
    data[prg + 0x7FFF] = 0x80;
    data
}

/// A program that parks in an infinite loop without touching the PPU.
/// Every frame is exactly 89,342 ticks with this one.
pub fn idle_rom() -> Vec<u8> {
    // JMP $8000
    build_nrom(&[0x4C, 0x00, 0x80], &[0x40])
}

/// A program that enables background rendering and parks.
pub fn rendering_rom() -> Vec<u8> {
    build_nrom(
        &[
            0xA9, 0x08, // LDA #$08
            0x8D, 0x01, 0x20, // STA $2001 (background on)
            0x4C, 0x05, 0x80, // JMP self
        ],
        &[0x40],
    )
}

/// A program whose NMI handler reads both joypads and folds the inputs
/// into RAM and the backdrop colour, making every frame's state and
/// framebuffer depend on the input history.
///
/// Per frame: $10 = P1 buttons, $12 = P2 buttons, $11 = running sum of
/// P1 buttons, $0200 = P1 buttons, $0201 = frame counter. The backdrop
/// palette entry is set to P1's bitmap, so the rendered frame shows it.
pub fn input_echo_rom() -> Vec<u8> {
    let code = [
        0xA9, 0x80, // LDA #$80
        0x8D, 0x00, 0x20, // STA $2000 (NMI on)
        0xA9, 0x1E, // LDA #$1E
        0x8D, 0x01, 0x20, // STA $2001 (rendering on)
        0x4C, 0x0A, 0x80, // JMP self
    ];
    let nmi = [
        // Strobe both pads.
        0xA9, 0x01, // LDA #$01
        0x8D, 0x16, 0x40, // STA $4016
        0xA9, 0x00, // LDA #$00
        0x8D, 0x16, 0x40, // STA $4016
        // Shift 8 bits of P1 into $10, LSB first.
        0xA2, 0x08, // LDX #$08
        0xAD, 0x16, 0x40, // LDA $4016   <- loop
        0x4A, // LSR A
        0x66, 0x10, // ROR $10
        0xCA, // DEX
        0xD0, 0xF7, // BNE loop
        // Shift 8 bits of P2 into $12.
        0xA2, 0x08, // LDX #$08
        0xAD, 0x17, 0x40, // LDA $4017   <- loop2
        0x4A, // LSR A
        0x66, 0x12, // ROR $12
        0xCA, // DEX
        0xD0, 0xF7, // BNE loop2
        // Backdrop colour = P1 buttons (visible in the framebuffer).
        0xA9, 0x3F, // LDA #$3F
        0x8D, 0x06, 0x20, // STA $2006
        0xA9, 0x00, // LDA #$00
        0x8D, 0x06, 0x20, // STA $2006
        0xA5, 0x10, // LDA $10
        0x29, 0x3F, // AND #$3F
        0x8D, 0x07, 0x20, // STA $2007
        // Accumulate and count.
        0xA5, 0x10, // LDA $10
        0x18, // CLC
        0x65, 0x11, // ADC $11
        0x85, 0x11, // STA $11
        0xA5, 0x10, // LDA $10
        0x8D, 0x00, 0x02, // STA $0200
        0xEE, 0x01, 0x02, // INC $0201
        0x40, // RTI
    ];
    build_nrom(&code, &nmi)
}
