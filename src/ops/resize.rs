// ============================================================================
// RESIZE / FIT: bounded working resolution and viewport display fit
// ============================================================================

use image::{RgbaImage, imageops};

/// Interpolation method for downscaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Lanczos3,
}

impl Interpolation {
    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Working size for a `w`×`h` source bounded by `max_dim` on its longest
/// side. Never upscales; each side rounds and is at least 1.
pub fn working_size(w: u32, h: u32, max_dim: u32) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (w, h);
    }
    let max_dim = max_dim.max(1);
    if w.max(h) <= max_dim {
        return (w, h);
    }
    let ratio = (max_dim as f64 / w as f64).min(max_dim as f64 / h as f64);
    let nw = ((w as f64 * ratio).round() as u32).max(1);
    let nh = ((h as f64 * ratio).round() as u32).max(1);
    (nw, nh)
}

/// Scale `src` into the working resolution. Returns the input untouched when
/// it already fits.
pub fn normalize(src: RgbaImage, max_dim: u32, interp: Interpolation) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (nw, nh) = working_size(w, h, max_dim);
    if (nw, nh) == (w, h) {
        return src;
    }
    imageops::resize(&src, nw, nh, interp.to_filter())
}

/// Largest size with the image's aspect ratio that fits inside the
/// container. A container with a zero side falls back to `fallback`.
pub fn fit_display(
    image_w: u32,
    image_h: u32,
    container: (f32, f32),
    fallback: (f32, f32),
) -> (f32, f32) {
    if image_w == 0 || image_h == 0 {
        return (0.0, 0.0);
    }
    let (cw, ch) = if container.0 <= 0.0 || container.1 <= 0.0 {
        fallback
    } else {
        container
    };
    let aspect = image_w as f32 / image_h as f32;
    if cw / ch > aspect {
        (ch * aspect, ch)
    } else {
        (cw, cw / aspect)
    }
}
