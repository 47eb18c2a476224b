//! Synthetic placeholder frames for streaming error substitution.
//!
//! When a source fails to open or a read stalls, the stream yields a
//! captioned frame instead of terminating. The caption is rendered with a
//! built-in 5x7 dot-matrix glyph table so no font file is needed.

use super::Frame;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SCALE: u32 = 2;
const BACKGROUND: [u8; 3] = [16, 16, 16];
const CAPTION: [u8; 3] = [220, 48, 48];

/// Build a placeholder frame with a human-readable error caption.
pub fn placeholder_frame(width: u32, height: u32, caption: &str) -> Frame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..(width * height) {
        data.extend_from_slice(&BACKGROUND);
    }

    let mut frame = Frame::from_rgb(width, height, data)
        .expect("placeholder raster matches dimensions by construction");

    let x0 = 20u32.min(width.saturating_sub(1));
    let y0 = (height / 2).saturating_sub(GLYPH_H * SCALE / 2);
    draw_text(&mut frame, x0, y0, caption);
    frame
}

fn draw_text(frame: &mut Frame, x0: u32, y0: u32, text: &str) {
    let mut pen_x = x0;
    for ch in text.chars() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            pen_x += (GLYPH_W + 1) * SCALE;
            continue;
        };
        for (gy, row) in rows.iter().enumerate() {
            for gx in 0..GLYPH_W {
                if row & (1 << (GLYPH_W - 1 - gx)) == 0 {
                    continue;
                }
                for sy in 0..SCALE {
                    for sx in 0..SCALE {
                        let px = pen_x + gx * SCALE + sx;
                        let py = y0 + gy as u32 * SCALE + sy;
                        put_pixel(frame, px, py);
                    }
                }
            }
        }
        pen_x += (GLYPH_W + 1) * SCALE;
        if pen_x + GLYPH_W * SCALE >= frame.width {
            break;
        }
    }
}

fn put_pixel(frame: &mut Frame, x: u32, y: u32) {
    if x >= frame.width || y >= frame.height {
        return;
    }
    let idx = ((y * frame.width + x) * 3) as usize;
    frame.data[idx..idx + 3].copy_from_slice(&CAPTION);
}

/// 5x7 glyph rows, MSB = leftmost column. Covers the characters used in
/// stream captions; anything else renders as a blank advance.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_has_caption_pixels() {
        let frame = placeholder_frame(320, 240, "NO SIGNAL");
        assert_eq!(frame.data.len(), 320 * 240 * 3);

        let caption_pixels = frame
            .data
            .chunks_exact(3)
            .filter(|px| px == &CAPTION)
            .count();
        assert!(caption_pixels > 0, "caption should be rendered");
    }

    #[test]
    fn placeholder_fits_tiny_frames() {
        // Must not panic even when the caption cannot fit
        let frame = placeholder_frame(8, 8, "CAMERA DISCONNECTED");
        assert_eq!(frame.data.len(), 8 * 8 * 3);
    }
}
