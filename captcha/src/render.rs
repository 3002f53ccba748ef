//! Puzzle artifact rendering.
//!
//! Draws a token onto a small RGB canvas with enough clutter that it must
//! be read by eye: random light background, diagonal line clutter, jittered
//! and sheared glyphs, speckle noise, then a soft blur.

use rand::Rng;

use crate::error::CaptchaError;
use crate::font::{glyph, is_set, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Artifact width in pixels.
pub const WIDTH: usize = 200;
/// Artifact height in pixels.
pub const HEIGHT: usize = 80;

const MARGIN: usize = 10;
const NOISE_POINTS: usize = 200;
const LINE_SPACING: usize = 10;

/// An RGB raster, row-major, three bytes per pixel.
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize, fill: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            pixels.extend_from_slice(&fill);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    /// Set a pixel; coordinates outside the canvas are clipped silently.
    pub fn put(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let i = (y as usize * self.width + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color);
    }

    /// Bresenham line between two points.
    pub fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: [u8; 3]) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.put(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 3×3 box blur; edge pixels average over the neighbours that exist.
    pub fn blur(&mut self) {
        let src = self.pixels.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                let mut sum = [0u32; 3];
                let mut n = 0u32;
                for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                        let i = (ny * self.width + nx) * 3;
                        for c in 0..3 {
                            sum[c] += src[i + c] as u32;
                        }
                        n += 1;
                    }
                }
                let i = (y * self.width + x) * 3;
                for c in 0..3 {
                    self.pixels[i + c] = (sum[c] / n) as u8;
                }
            }
        }
    }
}

/// Pixel scale applied to the 5×7 font so glyphs fill the canvas.
fn glyph_scale(len: usize) -> usize {
    if len <= 7 {
        4
    } else {
        3
    }
}

/// Render `token` into a fresh canvas.
pub fn render_token<R: Rng + ?Sized>(rng: &mut R, token: &str) -> Result<Canvas, CaptchaError> {
    let len = token.chars().count();
    if len == 0 {
        return Err(CaptchaError::EmptyToken);
    }

    let background = [
        rng.gen_range(200..=255),
        rng.gen_range(200..=255),
        rng.gen_range(200..=255),
    ];
    let mut canvas = Canvas::new(WIDTH, HEIGHT, background);

    for i in (0..WIDTH).step_by(LINE_SPACING) {
        let color = [rng.gen(), rng.gen(), rng.gen()];
        canvas.line((i as i64, 0), (0, i as i64), color);
    }

    let ink = [
        rng.gen_range(0..=50),
        rng.gen_range(0..=50),
        rng.gen_range(0..=50),
    ];
    let scale = glyph_scale(len);
    let advance = ((WIDTH - 2 * MARGIN) / len).min(GLYPH_WIDTH * scale + 10);

    for (index, c) in token.chars().enumerate() {
        let g = glyph(c).ok_or(CaptchaError::NoGlyph(c))?;
        let origin_x = (MARGIN + index * advance) as i64 + rng.gen_range(-5..=5);
        let origin_y = rng.gen_range(5..=20) + rng.gen_range(-5..=5);
        let shear: f64 = rng.gen_range(-0.3..=0.3);
        let mid = (GLYPH_HEIGHT * scale) as f64 / 2.0;

        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !is_set(g, col, row) {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let py = row * scale + sy;
                        let skew = (shear * (mid - py as f64)).round() as i64;
                        canvas.put(
                            origin_x + (col * scale + sx) as i64 + skew,
                            origin_y + py as i64,
                            ink,
                        );
                    }
                }
            }
        }
    }

    for _ in 0..NOISE_POINTS {
        let x = rng.gen_range(0..WIDTH) as i64;
        let y = rng.gen_range(0..HEIGHT) as i64;
        let speckle = [
            rng.gen_range(150..=255),
            rng.gen_range(150..=255),
            rng.gen_range(150..=255),
        ];
        canvas.put(x, y, speckle);
    }

    canvas.blur();
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn darkest(canvas: &Canvas) -> u8 {
        canvas
            .pixels()
            .chunks_exact(3)
            .map(|p| p.iter().copied().max().unwrap_or(255))
            .min()
            .unwrap_or(255)
    }

    #[test]
    fn canvas_is_fixed_size() {
        let canvas = render_token(&mut StdRng::seed_from_u64(1), "Ab3xQ9").unwrap();
        assert_eq!(canvas.width(), WIDTH);
        assert_eq!(canvas.height(), HEIGHT);
        assert_eq!(canvas.pixels().len(), WIDTH * HEIGHT * 3);
    }

    #[test]
    fn glyphs_leave_dark_ink_after_blur() {
        let canvas = render_token(&mut StdRng::seed_from_u64(2), "WWWWWW").unwrap();
        // Ink is at most 50 per channel; a solid 4×4 block survives the 3×3 blur.
        assert!(darkest(&canvas) <= 60);
    }

    #[test]
    fn empty_token_rejected() {
        assert!(matches!(
            render_token(&mut StdRng::seed_from_u64(3), ""),
            Err(CaptchaError::EmptyToken)
        ));
    }

    #[test]
    fn unknown_character_rejected() {
        assert!(matches!(
            render_token(&mut StdRng::seed_from_u64(4), "ab-c"),
            Err(CaptchaError::NoGlyph('-'))
        ));
    }

    #[test]
    fn put_clips_out_of_bounds() {
        let mut canvas = Canvas::new(2, 2, [9, 9, 9]);
        canvas.put(-1, 0, [0, 0, 0]);
        canvas.put(0, 5, [0, 0, 0]);
        assert!(canvas.pixels().iter().all(|&b| b == 9));
    }

    #[test]
    fn line_covers_both_endpoints() {
        let mut canvas = Canvas::new(10, 10, [255, 255, 255]);
        canvas.line((0, 9), (9, 0), [0, 0, 0]);
        assert_eq!(canvas.get(0, 9), Some([0, 0, 0]));
        assert_eq!(canvas.get(9, 0), Some([0, 0, 0]));
    }

    #[test]
    fn blur_keeps_uniform_canvas_uniform() {
        let mut canvas = Canvas::new(5, 5, [120, 130, 140]);
        canvas.blur();
        assert!(canvas
            .pixels()
            .chunks_exact(3)
            .all(|p| p == [120, 130, 140]));
    }
}
