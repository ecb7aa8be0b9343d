use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Difference,
    Exclusion,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Lowercase token, as used by canvas composite operations and the CLI.
    pub fn token(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }

    pub fn parse(s: &str) -> Option<BlendMode> {
        let s = s.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|m| m.token() == s)
    }

    /// Separable blend function B(backdrop, source) on one channel.
    fn channel(&self, cb: f32, cs: f32) -> f32 {
        match self {
            BlendMode::Normal => cs,
            BlendMode::Multiply => cb * cs,
            BlendMode::Screen => cb + cs - cb * cs,
            BlendMode::Overlay => overlay_channel(cb, cs),
            BlendMode::Darken => cb.min(cs),
            BlendMode::Lighten => cb.max(cs),
            BlendMode::Difference => (cb - cs).abs(),
            BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
        }
    }
}

// Hard-light with the operands swapped.
fn overlay_channel(base: f32, top: f32) -> f32 {
    if base <= 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// Composite `top` over `base` with the given mode and layer opacity.
///
/// Blend result is mixed with the raw source by backdrop alpha before the
/// source-over step, so blending onto transparent pixels behaves like Normal.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel, nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }

    // Fast path: Normal blend, full opacity, fully opaque top pixel, just overwrite
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let base_a = base[3] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let cb = base[c] as f32 / 255.0;
        let cs = top[c] as f32 / 255.0;
        let mixed = (1.0 - base_a) * cs + base_a * mode.channel(cb, cs);
        let v = (mixed * top_a + cb * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

// ============================================================================
// SURFACE: a render target owned by exactly one writer
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct Surface {
    pub image: RgbaImage,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize (if needed) and clear to transparent.
    pub fn reset(&mut self, width: u32, height: u32) {
        if self.image.width() != width || self.image.height() != height {
            self.image = RgbaImage::new(width, height);
        } else {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p[3] == 0)
    }
}

// ============================================================================
// DRAW PRIMITIVES
// ============================================================================

/// Blend a same-sized layer over `dst`, row-parallel.
pub fn composite_layer(dst: &mut RgbaImage, src: &RgbaImage, mode: BlendMode, opacity: f32) {
    if src.dimensions() != dst.dimensions() {
        let resized = imageops::resize(src, dst.width(), dst.height(), imageops::FilterType::Triangle);
        composite_layer(dst, &resized, mode, opacity);
        return;
    }
    let row_len = dst.width() as usize * 4;
    if row_len == 0 {
        return;
    }
    let src_raw = src.as_raw();
    dst.as_mut()
        .par_chunks_mut(row_len)
        .zip(src_raw.par_chunks(row_len))
        .for_each(|(drow, srow)| {
            for (d, s) in drow.chunks_exact_mut(4).zip(srow.chunks_exact(4)) {
                let out = blend_pixel(
                    Rgba([d[0], d[1], d[2], d[3]]),
                    Rgba([s[0], s[1], s[2], s[3]]),
                    mode,
                    opacity,
                );
                d.copy_from_slice(&out.0);
            }
        });
}

/// Draw `src` resized to `w`×`h` with its top-left at (`left`, `top`),
/// clipped to `dst`.
pub fn draw_image_rect(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    left: f32,
    top: f32,
    w: f32,
    h: f32,
    opacity: f32,
) {
    let tw = w.round();
    let th = h.round();
    if tw < 1.0 || th < 1.0 || src.width() == 0 || src.height() == 0 || opacity <= 0.0 {
        return;
    }
    let scaled;
    let layer = if src.width() == tw as u32 && src.height() == th as u32 {
        src
    } else {
        scaled = imageops::resize(src, tw as u32, th as u32, imageops::FilterType::Triangle);
        &scaled
    };
    let ox = left.round() as i64;
    let oy = top.round() as i64;
    let (dw, dh) = (dst.width() as i64, dst.height() as i64);
    for (sx, sy, px) in layer.enumerate_pixels() {
        let x = ox + sx as i64;
        let y = oy + sy as i64;
        if x < 0 || y < 0 || x >= dw || y >= dh {
            continue;
        }
        let d = dst.get_pixel_mut(x as u32, y as u32);
        *d = blend_pixel(*d, *px, BlendMode::Normal, opacity);
    }
}

/// Paint a solid colour through a coverage mask whose origin sits at
/// (`ox`, `oy`) in `dst`.
pub fn fill_coverage(
    dst: &mut RgbaImage,
    coverage: &[f32],
    mask_w: u32,
    ox: i64,
    oy: i64,
    color: Rgba<u8>,
    opacity: f32,
) {
    if mask_w == 0 {
        return;
    }
    let (dw, dh) = (dst.width() as i64, dst.height() as i64);
    for (i, &cov) in coverage.iter().enumerate() {
        if cov <= 0.0 {
            continue;
        }
        let x = ox + (i as u32 % mask_w) as i64;
        let y = oy + (i as u32 / mask_w) as i64;
        if x < 0 || y < 0 || x >= dw || y >= dh {
            continue;
        }
        let d = dst.get_pixel_mut(x as u32, y as u32);
        *d = blend_pixel(*d, color, BlendMode::Normal, cov.min(1.0) * opacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREY: Rgba<u8> = Rgba([128, 128, 128, 255]);

    #[test]
    fn parse_accepts_all_tokens() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::parse(mode.token()), Some(*mode));
        }
        assert_eq!(BlendMode::parse(" Multiply "), Some(BlendMode::Multiply));
        assert_eq!(BlendMode::parse("hard-light"), None);
    }

    #[test]
    fn normal_full_opacity_replaces() {
        assert_eq!(blend_pixel(GREY, RED, BlendMode::Normal, 1.0), RED);
    }

    #[test]
    fn zero_opacity_keeps_base() {
        for mode in BlendMode::all() {
            assert_eq!(blend_pixel(GREY, RED, *mode, 0.0), GREY);
        }
    }

    #[test]
    fn multiply_and_screen_on_opaque() {
        let m = blend_pixel(GREY, RED, BlendMode::Multiply, 1.0);
        assert_eq!(m, Rgba([128, 0, 0, 255]));
        let s = blend_pixel(GREY, RED, BlendMode::Screen, 1.0);
        assert_eq!(s, Rgba([255, 128, 128, 255]));
    }

    #[test]
    fn difference_of_equal_is_black() {
        assert_eq!(blend_pixel(GREY, GREY, BlendMode::Difference, 1.0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn half_opacity_mixes() {
        let p = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), BlendMode::Normal, 0.5);
        assert!((p[0] as i32 - 128).abs() <= 1);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn blending_onto_transparent_acts_normal() {
        let clear = Rgba([0, 0, 0, 0]);
        assert_eq!(blend_pixel(clear, RED, BlendMode::Multiply, 1.0), RED);
    }

    #[test]
    fn draw_rect_clips_at_edges() {
        let mut dst = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let src = RgbaImage::from_pixel(2, 2, RED);
        draw_image_rect(&mut dst, &src, 3.0, -1.0, 2.0, 2.0, 1.0);
        assert_eq!(*dst.get_pixel(3, 0), RED);
        assert_eq!(*dst.get_pixel(2, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*dst.get_pixel(3, 1), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn surface_reset_resizes_and_clears() {
        let mut s = Surface::new(2, 2);
        s.image.put_pixel(0, 0, RED);
        s.reset(2, 2);
        assert!(s.is_blank());
        s.reset(3, 1);
        assert_eq!((s.width(), s.height()), (3, 1));
    }
}
