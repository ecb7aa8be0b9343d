// ============================================================================
// COLOR FILTERS: the eight-channel filter stack applied at render time
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Eight filter channels. Percentages are 0–200 (100 = identity for
/// brightness/contrast/saturation), blur is pixels (0–10), hue rotation
/// degrees (0–360).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSet {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sepia: f32,
    pub grayscale: f32,
    pub blur: f32,
    pub hue_rotate: f32,
    pub invert: f32,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl FilterSet {
    pub const IDENTITY: FilterSet = FilterSet {
        brightness: 100.0,
        contrast: 100.0,
        saturation: 100.0,
        sepia: 0.0,
        grayscale: 0.0,
        blur: 0.0,
        hue_rotate: 0.0,
        invert: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Clamp every channel into its valid range. NaN falls back to identity.
    pub fn clamped(mut self) -> Self {
        for ch in FilterChannel::ALL {
            let v = ch.get(&self);
            let (lo, hi) = ch.range();
            let v = if v.is_nan() { ch.get(&Self::IDENTITY) } else { v.clamp(lo, hi) };
            ch.set(&mut self, v);
        }
        self
    }

    /// Apply the full stack to a copy of `src`.
    ///
    /// Order: brightness → contrast → saturate → sepia → grayscale → blur →
    /// hue-rotate → invert. Identity channels are skipped, so the identity
    /// set returns the input unchanged.
    pub fn apply(&self, src: &RgbaImage) -> RgbaImage {
        let f = self.clamped();
        let mut out = src.clone();
        if f.is_identity() || src.width() == 0 || src.height() == 0 {
            return out;
        }

        let pre = f.pre_blur_stages();
        if !pre.is_empty() {
            apply_color_stages(&mut out, &pre);
        }
        if f.blur > 0.0 {
            out = parallel_gaussian_blur(&out, f.blur);
        }
        let post = f.post_blur_stages();
        if !post.is_empty() {
            apply_color_stages(&mut out, &post);
        }
        out
    }

    fn pre_blur_stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.brightness != 100.0 {
            stages.push(Stage::Linear {
                slope: self.brightness / 100.0,
                intercept: 0.0,
            });
        }
        if self.contrast != 100.0 {
            let k = self.contrast / 100.0;
            stages.push(Stage::Linear {
                slope: k,
                intercept: 0.5 - 0.5 * k,
            });
        }
        if self.saturation != 100.0 {
            stages.push(Stage::Matrix(saturate_matrix(self.saturation / 100.0)));
        }
        if self.sepia > 0.0 {
            stages.push(Stage::Matrix(sepia_matrix((self.sepia / 100.0).min(1.0))));
        }
        if self.grayscale > 0.0 {
            stages.push(Stage::Matrix(grayscale_matrix((self.grayscale / 100.0).min(1.0))));
        }
        stages
    }

    fn post_blur_stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.hue_rotate % 360.0 != 0.0 {
            stages.push(Stage::Matrix(hue_rotate_matrix(self.hue_rotate)));
        }
        if self.invert > 0.0 {
            let a = (self.invert / 100.0).min(1.0);
            stages.push(Stage::Linear {
                slope: 1.0 - 2.0 * a,
                intercept: a,
            });
        }
        stages
    }
}

// ============================================================================
// CHANNEL DESCRIPTORS: used by the slider panel and the CLI
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterChannel {
    Brightness,
    Contrast,
    Saturation,
    Sepia,
    Grayscale,
    Blur,
    HueRotate,
    Invert,
}

impl FilterChannel {
    pub const ALL: [FilterChannel; 8] = [
        FilterChannel::Brightness,
        FilterChannel::Contrast,
        FilterChannel::Saturation,
        FilterChannel::Sepia,
        FilterChannel::Grayscale,
        FilterChannel::Blur,
        FilterChannel::HueRotate,
        FilterChannel::Invert,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FilterChannel::Brightness => "Brightness",
            FilterChannel::Contrast => "Contrast",
            FilterChannel::Saturation => "Saturation",
            FilterChannel::Sepia => "Sepia",
            FilterChannel::Grayscale => "Grayscale",
            FilterChannel::Blur => "Blur",
            FilterChannel::HueRotate => "Hue Rotate",
            FilterChannel::Invert => "Invert",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            FilterChannel::Blur => "px",
            FilterChannel::HueRotate => "°",
            _ => "%",
        }
    }

    pub fn range(&self) -> (f32, f32) {
        match self {
            FilterChannel::Blur => (0.0, 10.0),
            FilterChannel::HueRotate => (0.0, 360.0),
            _ => (0.0, 200.0),
        }
    }

    pub fn get(&self, f: &FilterSet) -> f32 {
        match self {
            FilterChannel::Brightness => f.brightness,
            FilterChannel::Contrast => f.contrast,
            FilterChannel::Saturation => f.saturation,
            FilterChannel::Sepia => f.sepia,
            FilterChannel::Grayscale => f.grayscale,
            FilterChannel::Blur => f.blur,
            FilterChannel::HueRotate => f.hue_rotate,
            FilterChannel::Invert => f.invert,
        }
    }

    pub fn set(&self, f: &mut FilterSet, v: f32) {
        match self {
            FilterChannel::Brightness => f.brightness = v,
            FilterChannel::Contrast => f.contrast = v,
            FilterChannel::Saturation => f.saturation = v,
            FilterChannel::Sepia => f.sepia = v,
            FilterChannel::Grayscale => f.grayscale = v,
            FilterChannel::Blur => f.blur = v,
            FilterChannel::HueRotate => f.hue_rotate = v,
            FilterChannel::Invert => f.invert = v,
        }
    }
}

// ============================================================================
// PRESETS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPreset {
    Grayscale,
    Sepia,
    Vivid,
    Vintage,
    Cool,
    Warm,
}

impl FilterPreset {
    pub fn all() -> &'static [FilterPreset] {
        &[
            FilterPreset::Grayscale,
            FilterPreset::Sepia,
            FilterPreset::Vivid,
            FilterPreset::Vintage,
            FilterPreset::Cool,
            FilterPreset::Warm,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterPreset::Grayscale => "grayscale",
            FilterPreset::Sepia => "sepia",
            FilterPreset::Vivid => "vivid",
            FilterPreset::Vintage => "vintage",
            FilterPreset::Cool => "cool",
            FilterPreset::Warm => "warm",
        }
    }

    pub fn parse(s: &str) -> Option<FilterPreset> {
        let s = s.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|p| p.name() == s)
    }

    /// Override the preset's channels on top of `base`; other channels keep
    /// their current values.
    pub fn apply_to(&self, base: &FilterSet) -> FilterSet {
        let mut f = *base;
        match self {
            FilterPreset::Grayscale => {
                f.grayscale = 100.0;
                f.saturation = 0.0;
            }
            FilterPreset::Sepia => {
                f.sepia = 80.0;
                f.saturation = 110.0;
                f.contrast = 110.0;
            }
            FilterPreset::Vivid => {
                f.saturation = 150.0;
                f.contrast = 120.0;
                f.brightness = 110.0;
            }
            FilterPreset::Vintage => {
                f.sepia = 30.0;
                f.contrast = 120.0;
                f.brightness = 90.0;
                f.hue_rotate = 30.0;
            }
            FilterPreset::Cool => {
                f.hue_rotate = 180.0;
                f.brightness = 105.0;
            }
            FilterPreset::Warm => {
                f.hue_rotate = 30.0;
                f.brightness = 105.0;
                f.saturation = 120.0;
            }
        }
        f
    }
}

// ============================================================================
// PER-PIXEL STAGES
// ============================================================================

type Matrix3 = [[f32; 3]; 3];

#[derive(Clone, Copy, Debug)]
enum Stage {
    /// Same affine map on every colour channel.
    Linear { slope: f32, intercept: f32 },
    Matrix(Matrix3),
}

impl Stage {
    #[inline]
    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        match self {
            Stage::Linear { slope, intercept } => {
                rgb.map(|c| (c * slope + intercept).clamp(0.0, 1.0))
            }
            Stage::Matrix(m) => {
                let mut out = [0.0; 3];
                for (row, o) in m.iter().zip(out.iter_mut()) {
                    *o = (row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]).clamp(0.0, 1.0);
                }
                out
            }
        }
    }
}

/// Run the stages over every pixel, row-parallel. Alpha is untouched.
fn apply_color_stages(img: &mut RgbaImage, stages: &[Stage]) {
    let stride = img.width() as usize * 4;
    img.as_mut().par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let mut rgb = [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ];
            for s in stages {
                rgb = s.apply(rgb);
            }
            px[0] = (rgb[0] * 255.0).round() as u8;
            px[1] = (rgb[1] * 255.0).round() as u8;
            px[2] = (rgb[2] * 255.0).round() as u8;
        }
    });
}

fn saturate_matrix(s: f32) -> Matrix3 {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn sepia_matrix(amount: f32) -> Matrix3 {
    let g = 1.0 - amount;
    [
        [0.393 + 0.607 * g, 0.769 - 0.769 * g, 0.189 - 0.189 * g],
        [0.349 - 0.349 * g, 0.686 + 0.314 * g, 0.168 - 0.168 * g],
        [0.272 - 0.272 * g, 0.534 - 0.534 * g, 0.131 + 0.869 * g],
    ]
}

fn grayscale_matrix(amount: f32) -> Matrix3 {
    let g = 1.0 - amount;
    [
        [0.2126 + 0.7874 * g, 0.7152 - 0.7152 * g, 0.0722 - 0.0722 * g],
        [0.2126 - 0.2126 * g, 0.7152 + 0.2848 * g, 0.0722 - 0.0722 * g],
        [0.2126 - 0.2126 * g, 0.7152 - 0.7152 * g, 0.0722 + 0.9278 * g],
    ]
}

fn hue_rotate_matrix(degrees: f32) -> Matrix3 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}

// ---------------------------------------------------------------------------
//  Parallel separable Gaussian blur (rayon)
// ---------------------------------------------------------------------------

/// Build a 1-D Gaussian kernel truncated at ceil(3*sigma).
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..radius * 2 + 1)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Two passes (horizontal then vertical) over an f32 copy, edges clamped.
pub fn parallel_gaussian_blur(src: &RgbaImage, sigma: f32) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    if w == 0 || h == 0 || sigma <= 0.0 {
        return src.clone();
    }

    let kernel = build_gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let stride = w * 4;
    let buf_in: Vec<f32> = src.as_raw().iter().map(|&b| b as f32).collect();

    let mut buf_h = vec![0.0f32; w * h * 4];
    buf_h.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &buf_in[y * stride..(y + 1) * stride];
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius).clamp(0, w as isize - 1) as usize;
                for c in 0..4 {
                    acc[c] += row_in[sx * 4 + c] * kv;
                }
            }
            row_out[x * 4..x * 4 + 4].copy_from_slice(&acc);
        }
    });

    let mut dst = vec![0u8; w * h * 4];
    dst.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius).clamp(0, h as isize - 1) as usize;
                let idx = sy * stride + x * 4;
                for c in 0..4 {
                    acc[c] += buf_h[idx + c] * kv;
                }
            }
            for c in 0..4 {
                row_out[x * 4 + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    });

    RgbaImage::from_raw(w as u32, h as u32, dst).unwrap_or_else(|| src.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 40 % 256) as u8, (y * 60 % 256) as u8, ((x + y) * 25 % 256) as u8, 255])
        })
    }

    fn mean_chroma(img: &RgbaImage) -> f64 {
        let total: f64 = img
            .pixels()
            .map(|p| {
                let max = p[0].max(p[1]).max(p[2]) as f64;
                let min = p[0].min(p[1]).min(p[2]) as f64;
                max - min
            })
            .sum();
        total / (img.width() * img.height()) as f64
    }

    #[test]
    fn identity_reproduces_pixels() {
        let img = gradient(7, 5);
        assert_eq!(FilterSet::IDENTITY.apply(&img), img);
    }

    #[test]
    fn near_identity_stays_within_tolerance() {
        let img = gradient(6, 6);
        let mut f = FilterSet::IDENTITY;
        f.hue_rotate = 360.0;
        f.saturation = 100.0;
        let out = f.apply(&img);
        for (a, b) in img.pixels().zip(out.pixels()) {
            for c in 0..4 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn grayscale_preset_removes_chroma() {
        let img = gradient(16, 16);
        assert!(mean_chroma(&img) > 10.0);
        let f = FilterPreset::Grayscale.apply_to(&FilterSet::IDENTITY);
        assert!(mean_chroma(&f.apply(&img)) < 1.0);
    }

    #[test]
    fn presets_only_touch_their_channels() {
        let mut base = FilterSet::IDENTITY;
        base.blur = 2.0;
        base.invert = 10.0;
        let v = FilterPreset::Vintage.apply_to(&base);
        assert_eq!(v.blur, 2.0);
        assert_eq!(v.invert, 10.0);
        assert_eq!(v.sepia, 30.0);
        assert_eq!(v.hue_rotate, 30.0);
        assert_eq!(FilterPreset::parse("WARM"), Some(FilterPreset::Warm));
    }

    #[test]
    fn clamped_limits_every_channel() {
        let f = FilterSet {
            brightness: 500.0,
            contrast: -3.0,
            blur: 99.0,
            hue_rotate: 400.0,
            ..FilterSet::IDENTITY
        }
        .clamped();
        assert_eq!(f.brightness, 200.0);
        assert_eq!(f.contrast, 0.0);
        assert_eq!(f.blur, 10.0);
        assert_eq!(f.hue_rotate, 360.0);
    }

    #[test]
    fn full_invert_flips_channels() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 255, 77]));
        let f = FilterSet { invert: 100.0, ..FilterSet::IDENTITY };
        assert_eq!(*f.apply(&img).get_pixel(1, 1), Rgba([245, 55, 0, 77]));
    }

    #[test]
    fn brightness_zero_is_black() {
        let img = gradient(4, 4);
        let f = FilterSet { brightness: 0.0, ..FilterSet::IDENTITY };
        assert!(f.apply(&img).pixels().all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0));
    }

    #[test]
    fn blur_of_flat_colour_is_flat() {
        let img = RgbaImage::from_pixel(9, 9, Rgba([90, 90, 90, 255]));
        let out = parallel_gaussian_blur(&img, 2.0);
        assert!(out.pixels().all(|p| *p == Rgba([90, 90, 90, 255])));
    }

    #[test]
    fn json_uses_hue_rotate_key() {
        let json = serde_json::to_string(&FilterSet::IDENTITY).unwrap();
        assert!(json.contains("\"hueRotate\":0"));
        let f: FilterSet = serde_json::from_str(r#"{"blur":3}"#).unwrap();
        assert_eq!(f.blur, 3.0);
        assert_eq!(f.brightness, 100.0);
    }
}
