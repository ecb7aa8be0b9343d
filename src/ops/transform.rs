// ============================================================================
// TRANSFORM OPERATIONS: rotate and flip buffers, remap anchor points
// ============================================================================

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

impl FlipAxis {
    pub fn token(&self) -> &'static str {
        match self {
            FlipAxis::Horizontal => "horizontal",
            FlipAxis::Vertical => "vertical",
        }
    }

    pub fn parse(s: &str) -> Option<FlipAxis> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" | "h" => Some(FlipAxis::Horizontal),
            "vertical" | "v" => Some(FlipAxis::Vertical),
            _ => None,
        }
    }
}

/// Normalise an angle into [0, 360).
pub fn normalize_degrees(degrees: f32) -> f32 {
    let d = degrees % 360.0;
    if d < 0.0 { d + 360.0 } else { d }
}

/// Output dimensions of a rotation. Only quarter turns swap the sides.
pub fn rotated_size(w: u32, h: u32, degrees: f32) -> (u32, u32) {
    let d = normalize_degrees(degrees);
    if d == 90.0 || d == 270.0 { (h, w) } else { (w, h) }
}

/// Rotate clockwise (screen space, y down) about the image centre.
///
/// Quarter turns are exact pixel permutations. Other angles are inverse
/// mapped with bilinear sampling onto a same-sized transparent canvas.
pub fn rotate(src: &RgbaImage, degrees: f32) -> RgbaImage {
    let d = normalize_degrees(degrees);
    if d == 0.0 {
        return src.clone();
    } else if d == 90.0 {
        return imageops::rotate90(src);
    } else if d == 180.0 {
        return imageops::rotate180(src);
    } else if d == 270.0 {
        return imageops::rotate270(src);
    }

    let (w, h) = src.dimensions();
    let mut dst = RgbaImage::new(w, h);
    if w == 0 || h == 0 {
        return dst;
    }
    let (sin, cos) = d.to_radians().sin_cos();
    let cx = w as f32 * 0.5;
    let cy = h as f32 * 0.5;
    let row_bytes = w as usize * 4;

    dst.as_mut().par_chunks_mut(row_bytes).enumerate().for_each(|(dy, row)| {
        let ny = dy as f32 + 0.5 - cy;
        for dx in 0..w as usize {
            let nx = dx as f32 + 0.5 - cx;
            // Inverse rotation back into source space.
            let sx = nx * cos + ny * sin + cx - 0.5;
            let sy = -nx * sin + ny * cos + cy - 0.5;
            let p = bilinear_sample(src, sx, sy);
            row[dx * 4..dx * 4 + 4].copy_from_slice(&p.0);
        }
    });
    dst
}

pub fn flip(src: &RgbaImage, axis: FlipAxis) -> RgbaImage {
    match axis {
        FlipAxis::Horizontal => imageops::flip_horizontal(src),
        FlipAxis::Vertical => imageops::flip_vertical(src),
    }
}

/// Move an anchor through the same rotation as the pixels: translate to the
/// old centre, rotate, translate to the new centre.
pub fn rotate_anchor(x: f32, y: f32, old_w: u32, old_h: u32, degrees: f32) -> (f32, f32) {
    let (new_w, new_h) = rotated_size(old_w, old_h, degrees);
    let d = normalize_degrees(degrees);
    let (sin, cos) = quarter_exact_sin_cos(d);
    let nx = x - old_w as f32 * 0.5;
    let ny = y - old_h as f32 * 0.5;
    (
        nx * cos - ny * sin + new_w as f32 * 0.5,
        nx * sin + ny * cos + new_h as f32 * 0.5,
    )
}

pub fn flip_anchor(x: f32, y: f32, w: u32, h: u32, axis: FlipAxis) -> (f32, f32) {
    match axis {
        FlipAxis::Horizontal => (w as f32 - x, y),
        FlipAxis::Vertical => (x, h as f32 - y),
    }
}

// Keeps quarter-turn anchors free of sin/cos rounding noise.
fn quarter_exact_sin_cos(d: f32) -> (f32, f32) {
    if d == 0.0 {
        (0.0, 1.0)
    } else if d == 90.0 {
        (1.0, 0.0)
    } else if d == 180.0 {
        (0.0, -1.0)
    } else if d == 270.0 {
        (-1.0, 0.0)
    } else {
        d.to_radians().sin_cos()
    }
}

/// Bilinear interpolation sampling; outside pixels are transparent.
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= img.width() as i32 || sy >= img.height() as i32 {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}
