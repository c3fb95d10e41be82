//! FPS text overlay
//!
//! Text is rendered from a built-in 5x7 bitmap font that covers exactly the
//! characters the overlay needs. Unknown characters advance the cursor
//! without drawing.

use bytes::BytesMut;

use super::frame::{Frame, PixelFormat};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Glyph width plus one column of spacing
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Overlay placement and colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Top-left corner of the first glyph
    pub origin: (u32, u32),
    /// Integer upscale factor for the 5x7 glyphs
    pub scale: u32,
    /// Text colour as RGB
    pub color: [u8; 3],
}

impl Default for OverlayStyle {
    fn default() -> Self {
        // Glyph bottom lands on row 30, 10px from the left edge
        Self {
            origin: (10, 9),
            scale: 3,
            color: [0, 255, 0],
        }
    }
}

/// Overlay text for a frame rate
pub fn fps_label(fps: f64) -> String {
    format!("FPS: {fps:.1}")
}

/// Draw `text` onto a copy of `frame`
///
/// Glyphs that fall partly outside the frame are clipped.
pub fn draw_text(frame: &Frame, text: &str, style: &OverlayStyle) -> Frame {
    let mut data = BytesMut::from(&frame.data[..]);
    let color = match frame.format {
        PixelFormat::Rgb24 => style.color,
        PixelFormat::Bgr24 => [style.color[2], style.color[1], style.color[0]],
    };
    let scale = style.scale.max(1);
    let stride = frame.width as usize * 3;

    let (mut x, y) = style.origin;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let px = x + col * scale;
                    let py = y + row as u32 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let (cx, cy) = (px + dx, py + dy);
                            if cx >= frame.width || cy >= frame.height {
                                continue;
                            }
                            let offset = cy as usize * stride + cx as usize * 3;
                            data[offset..offset + 3].copy_from_slice(&color);
                        }
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
        if x >= frame.width {
            break;
        }
    }

    frame.with_data(data.freeze())
}

/// Draw the `FPS: n.n` label onto a copy of `frame`
pub fn draw_fps(frame: &Frame, fps: f64, style: &OverlayStyle) -> Frame {
    draw_text(frame, &fps_label(fps), style)
}

/// Row bitmaps, most significant of the low 5 bits is the leftmost column
fn glyph(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn black(width: u32, height: u32, format: PixelFormat) -> Frame {
        Frame::new(
            Bytes::from(vec![0u8; format.frame_size(width, height)]),
            width,
            height,
            format,
            3,
            Duration::from_millis(100),
        )
        .unwrap()
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * frame.width as usize + x as usize) * 3;
        [
            frame.data[offset],
            frame.data[offset + 1],
            frame.data[offset + 2],
        ]
    }

    #[test]
    fn test_fps_label_format() {
        assert_eq!(fps_label(0.0), "FPS: 0.0");
        assert_eq!(fps_label(29.97), "FPS: 30.0");
        assert_eq!(fps_label(12.34), "FPS: 12.3");
    }

    #[test]
    fn test_draws_green_top_left() {
        let frame = black(64, 40, PixelFormat::Rgb24);
        let style = OverlayStyle {
            origin: (1, 1),
            scale: 1,
            color: [0, 255, 0],
        };

        let out = draw_text(&frame, "F", &style);

        // Top row of 'F' is solid
        for x in 1..6 {
            assert_eq!(pixel(&out, x, 1), [0, 255, 0]);
        }
        // Gap column after the glyph stays untouched
        assert_eq!(pixel(&out, 6, 1), [0, 0, 0]);
        // Source frame is not modified
        assert_eq!(pixel(&frame, 1, 1), [0, 0, 0]);
        assert_eq!(out.sequence, 3);
    }

    #[test]
    fn test_bgr_channel_order() {
        let frame = black(16, 16, PixelFormat::Bgr24);
        let style = OverlayStyle {
            origin: (0, 0),
            scale: 1,
            color: [255, 0, 10],
        };

        let out = draw_text(&frame, "F", &style);
        assert_eq!(pixel(&out, 0, 0), [10, 0, 255]);
    }

    #[test]
    fn test_clipped_on_small_frame() {
        let frame = black(8, 4, PixelFormat::Rgb24);
        let out = draw_fps(&frame, 123.4, &OverlayStyle::default());

        assert_eq!(out.data.len(), frame.data.len());
    }

    #[test]
    fn test_scaled_glyph() {
        let frame = black(40, 40, PixelFormat::Rgb24);
        let style = OverlayStyle {
            origin: (0, 0),
            scale: 2,
            color: [0, 255, 0],
        };

        let out = draw_text(&frame, "1", &style);

        // '1' top row has a single pixel in column 2, scaled to a 2x2 block
        assert_eq!(pixel(&out, 4, 0), [0, 255, 0]);
        assert_eq!(pixel(&out, 5, 1), [0, 255, 0]);
        assert_eq!(pixel(&out, 3, 0), [0, 0, 0]);
    }
}
