use std::{borrow::Cow, fs, path::Path};

use fontdue::{Font, FontSettings};

use crate::{
    CompositorError,
    render::{BYTES_PER_PIXEL, Colour},
};

/// Font size the diagnostic layout measures at before scaling to fit.
const ESTIMATE_PX: u32 = 50;
const MARGIN_PERCENT: u32 = 5;
/// Line spacing is the glyph height plus this fraction of it.
const LINE_SPACING_DIVISOR: u32 = 5;

/// Rasterizes text into ARGB8888 buffers.
pub struct TextRenderer {
    font: Font,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("font", &self.font.name())
            .finish()
    }
}

impl TextRenderer {
    pub fn from_path(path: &Path) -> Result<Self, CompositorError> {
        let bytes = fs::read(path).map_err(|err| {
            CompositorError::Config(format!("failed to read font {}: {err}", path.display()))
        })?;
        Self::from_bytes(&bytes).map_err(|err| {
            CompositorError::Config(format!("Font {} has unsupported format: {err}", path.display()))
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompositorError> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|err| CompositorError::Config(err.to_owned()))?;
        Ok(Self { font })
    }

    /// Sum of rounded-down advances.
    pub fn line_width(&self, line: &str, height_px: u32) -> u32 {
        line.chars()
            .map(|ch| self.font.metrics(ch, height_px as f32).advance_width.max(0.0) as u32)
            .sum()
    }

    /// Draws one line with its em box at `top_left`, clipped to the buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        buffer: &mut [u8],
        width: u32,
        height: u32,
        line: &str,
        top_left: (i32, i32),
        height_px: u32,
        colour: Colour,
    ) {
        if height_px == 0 {
            return;
        }

        let (mut cursor_x, top) = top_left;
        for ch in line.chars() {
            let (metrics, coverage) = self.font.rasterize(ch, height_px as f32);
            let glyph_x = cursor_x + metrics.xmin;
            let glyph_y = top + height_px as i32 - (metrics.ymin + metrics.height as i32);

            for (row, coverage_row) in coverage.chunks(metrics.width.max(1)).enumerate() {
                let y = glyph_y + row as i32;
                if y < 0 || y >= height as i32 {
                    continue;
                }
                for (column, value) in coverage_row.iter().enumerate() {
                    let x = glyph_x + column as i32;
                    if x < 0 || x >= width as i32 || *value == 0 {
                        continue;
                    }
                    let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                    if let Some(pixel) = buffer.get_mut(offset..offset + BYTES_PER_PIXEL) {
                        blend(pixel, colour, *value);
                    }
                }
            }

            cursor_x += metrics.advance_width.max(0.0) as i32;
        }
    }
}

fn blend(dst: &mut [u8], src: Colour, coverage: u8) {
    let alpha = u32::from(coverage) * u32::from(src[3]) / 255;
    for channel in 0..3 {
        let blended =
            u32::from(dst[channel]) * (255 - alpha) / 255 + u32::from(src[channel]) * alpha / 255;
        dst[channel] = blended as u8;
    }
}

/// Text of a line, substituting bytes when it is not UTF-8.
pub fn decode_line(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(line) => Cow::Borrowed(line),
        Err(err) => {
            tracing::warn!("diagnostic text is not valid UTF-8: {err}");
            Cow::Owned(
                bytes
                    .iter()
                    .map(|byte| {
                        if byte.is_ascii_graphic() || *byte == b' ' {
                            char::from(*byte)
                        } else {
                            char::REPLACEMENT_CHARACTER
                        }
                    })
                    .collect(),
            )
        }
    }
}

/// Lines as a line reader would see them: no trailing empty line.
fn split_lines(text: &[u8]) -> Vec<Cow<'_, str>> {
    let text = text.strip_suffix(b"\n").unwrap_or(text);
    if text.is_empty() {
        return Vec::new();
    }
    text.split(|byte| *byte == b'\n')
        .map(|line| decode_line(line.strip_suffix(b"\r").unwrap_or(line)))
        .collect()
}

/// Largest glyph height letting `lines` lines, the widest measuring
/// `widest_at_estimate` at the estimate size, fit in the area.
fn fit_font_height(widest_at_estimate: u32, lines: u32, avail_width: u32, avail_height: u32) -> u32 {
    let by_width = if widest_at_estimate == 0 {
        u32::MAX
    } else {
        (u64::from(ESTIMATE_PX) * u64::from(avail_width) / u64::from(widest_at_estimate)) as u32
    };
    let by_height = if lines == 0 {
        u32::MAX
    } else {
        avail_height * LINE_SPACING_DIVISOR / (lines * (LINE_SPACING_DIVISOR + 1))
    };
    by_width.min(by_height).max(1)
}

fn line_height(height_px: u32) -> u32 {
    height_px + height_px / LINE_SPACING_DIVISOR
}

/// Centers `text` in the buffer at the largest size that fits inside the
/// margins.
pub fn render_diagnostic(
    renderer: &TextRenderer,
    width: u32,
    height: u32,
    buffer: &mut [u8],
    text: &[u8],
    colour: Colour,
) {
    let lines = split_lines(text);
    if lines.is_empty() || width == 0 || height == 0 {
        return;
    }

    let avail_width = width - width * MARGIN_PERCENT / 100;
    let avail_height = height - height * MARGIN_PERCENT / 100;

    let widest_at_estimate = lines
        .iter()
        .map(|line| renderer.line_width(line, ESTIMATE_PX))
        .max()
        .unwrap_or(0);
    let height_px = fit_font_height(
        widest_at_estimate,
        lines.len() as u32,
        avail_width,
        avail_height,
    );
    let line_height = line_height(height_px);

    let widest = lines
        .iter()
        .map(|line| renderer.line_width(line, height_px))
        .max()
        .unwrap_or(0);
    let x = (width.saturating_sub(widest) / 2) as i32;
    let mut y = (height.saturating_sub(lines.len() as u32 * line_height) / 2) as i32;

    tracing::trace!(height_px, lines = lines.len(), "rendering diagnostic text");
    for line in &lines {
        renderer.render(buffer, width, height, line, (x, y), height_px, colour);
        y += line_height as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blending_is_truncating_per_channel() {
        let mut pixel = [100, 100, 100, 255];
        blend(&mut pixel, [200, 0, 255, 255], 128);
        // alpha 128: 100*127/255 + 200*128/255 = 49 + 100
        assert_eq!(pixel, [149, 49, 177, 255]);

        let mut pixel = [10, 20, 30, 255];
        blend(&mut pixel, [200, 200, 200, 255], 255);
        assert_eq!(pixel, [200, 200, 200, 255]);

        let mut pixel = [10, 20, 30, 255];
        blend(&mut pixel, [200, 200, 200, 0], 255);
        assert_eq!(pixel, [10, 20, 30, 255]);
    }

    #[test]
    fn invalid_utf8_is_substituted() {
        assert_eq!(decode_line(b"fine"), "fine");
        assert_eq!(decode_line(b"a\xffb\x01"), "a\u{fffd}b\u{fffd}");
    }

    #[test]
    fn lines_drop_the_final_newline() {
        assert_eq!(split_lines(b"one\ntwo\n"), vec!["one", "two"]);
        assert_eq!(split_lines(b"one\r\n\nthree"), vec!["one", "", "three"]);
        assert!(split_lines(b"").is_empty());
        assert!(split_lines(b"\n").is_empty());
    }

    #[test]
    fn font_height_is_limited_by_both_dimensions() {
        // width bound: 50 * 1000 / 500 = 100; height bound: 600 * 5 / 6 = 500
        assert_eq!(fit_font_height(500, 1, 1000, 600), 100);
        // height bound: 120 * 5 / (10 * 6) = 10
        assert_eq!(fit_font_height(100, 10, 1000, 120), 10);
        assert_eq!(fit_font_height(0, 0, 10, 10), u32::MAX);
        assert_eq!(fit_font_height(1000, 1, 0, 0), 1);
    }

    #[test]
    fn line_height_adds_a_fifth() {
        assert_eq!(line_height(50), 60);
        assert_eq!(line_height(4), 4);
    }

    #[test]
    fn garbage_fonts_are_rejected() {
        assert!(TextRenderer::from_bytes(b"not a font").is_err());
        assert!(TextRenderer::from_path(Path::new("/nonexistent/font.ttf")).is_err());
    }

    #[test]
    fn renders_with_a_system_font() {
        let Some(path) = crate::config::default_font_path() else {
            return;
        };
        let Ok(renderer) = TextRenderer::from_path(&path) else {
            return;
        };

        let (width, height) = (200, 100);
        let mut buffer = vec![0u8; (width * height) as usize * BYTES_PER_PIXEL];
        render_diagnostic(
            &renderer,
            width,
            height,
            &mut buffer,
            b"crashed\n",
            [255, 255, 255, 255],
        );
        assert!(buffer.iter().any(|byte| *byte != 0));
    }
}
