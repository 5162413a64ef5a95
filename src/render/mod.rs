mod text;

pub use text::{TextRenderer, decode_line, render_diagnostic};

/// One ARGB8888 pixel as laid out in little-endian memory: B, G, R, A.
pub type Colour = [u8; 4];

pub const BYTES_PER_PIXEL: usize = 4;

/// Vertical gradient from `top` (row 0) towards `bottom`; alpha is opaque.
pub fn render_background(
    width: u32,
    height: u32,
    buffer: &mut [u8],
    bottom: Colour,
    top: Colour,
) {
    if width == 0 || height == 0 {
        return;
    }
    let Some(pixels) = pixels_mut(width, height, buffer) else {
        return;
    };
    let width = width as usize;

    for (y, row) in pixels.chunks_exact_mut(width).enumerate() {
        let y = y as u32;
        let mut pixel = [0xff; 4];
        for channel in 0..3 {
            let blended = (y * u32::from(bottom[channel])
                + (height - y) * u32::from(top[channel]))
                / height;
            pixel[channel] = blended as u8;
        }
        row.fill(pixel);
    }
}

pub fn render_solid(width: u32, height: u32, buffer: &mut [u8], colour: Colour) {
    render_background(width, height, buffer, colour, colour);
}

/// The first `width * height` pixels of `buffer`, if it is large enough.
fn pixels_mut(width: u32, height: u32, buffer: &mut [u8]) -> Option<&mut [[u8; 4]]> {
    let len = width as usize * height as usize * BYTES_PER_PIXEL;
    let Some(buffer) = buffer.get_mut(..len) else {
        tracing::warn!(
            width,
            height,
            len = buffer.len(),
            "pixel buffer too small; skipping render"
        );
        return None;
    };
    match bytemuck::try_cast_slice_mut(buffer) {
        Ok(pixels) => Some(pixels),
        Err(err) => {
            tracing::warn!("cannot view buffer as pixels: {err}");
            None
        }
    }
}
