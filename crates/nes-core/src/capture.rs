//! PNG screenshots of the framebuffer.

use std::error::Error;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

use crate::ppu::{FRAME_HEIGHT, FRAME_WIDTH};

/// Save a 256×240 RGBA framebuffer as a PNG file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or encoded.
pub fn save_screenshot(framebuffer: &[u32], path: &Path) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, FRAME_WIDTH as u32, FRAME_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder.write_header()?;

    let mut rgba = Vec::with_capacity(FRAME_WIDTH * FRAME_HEIGHT * 4);
    for &pixel in framebuffer {
        rgba.extend_from_slice(&pixel.to_be_bytes());
    }
    png_writer.write_image_data(&rgba)?;
    Ok(())
}
