// ============================================================================
// CROP: aspect-constrained selection and sub-raster extraction
// ============================================================================

use image::{RgbaImage, imageops};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CropAspect {
    #[default]
    Free,
    Square,
    FourThree,
    SixteenNine,
    ThreeTwo,
}

impl CropAspect {
    pub fn all() -> &'static [CropAspect] {
        &[
            CropAspect::Free,
            CropAspect::Square,
            CropAspect::FourThree,
            CropAspect::SixteenNine,
            CropAspect::ThreeTwo,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            CropAspect::Free => "Free",
            CropAspect::Square => "1:1",
            CropAspect::FourThree => "4:3",
            CropAspect::SixteenNine => "16:9",
            CropAspect::ThreeTwo => "3:2",
        }
    }

    /// Width / height, or `None` for free-form.
    pub fn ratio(&self) -> Option<f32> {
        match self {
            CropAspect::Free => None,
            CropAspect::Square => Some(1.0),
            CropAspect::FourThree => Some(4.0 / 3.0),
            CropAspect::SixteenNine => Some(16.0 / 9.0),
            CropAspect::ThreeTwo => Some(1.5),
        }
    }

    pub fn parse(s: &str) -> Option<CropAspect> {
        let s = s.trim().to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|a| a.label().to_ascii_lowercase() == s)
    }
}

/// Rectangle in working-buffer pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Integer pixel rectangle clipped to the image, or `None` if nothing
    /// of at least one pixel remains.
    pub fn to_pixels(&self, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.round().max(0.0).min(img_w as f32) as u32;
        let y0 = self.y.round().max(0.0).min(img_h as f32) as u32;
        let x1 = (self.x + self.width).round().max(0.0).min(img_w as f32) as u32;
        let y1 = (self.y + self.height).round().max(0.0).min(img_h as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Build a selection from a drag between `start` and `current`, clamped to
/// the image and constrained to `aspect`. The start corner stays fixed.
pub fn selection_from_drag(
    start: (f32, f32),
    current: (f32, f32),
    aspect: CropAspect,
    img_w: u32,
    img_h: u32,
) -> Option<CropRegion> {
    let (iw, ih) = (img_w as f32, img_h as f32);
    let sx = start.0.clamp(0.0, iw);
    let sy = start.1.clamp(0.0, ih);
    let cx = current.0.clamp(0.0, iw);
    let cy = current.1.clamp(0.0, ih);

    let dir_x = if cx >= sx { 1.0 } else { -1.0 };
    let dir_y = if cy >= sy { 1.0 } else { -1.0 };
    let mut w = (cx - sx).abs();
    let mut h = (cy - sy).abs();

    if let Some(r) = aspect.ratio() {
        // Room left in the drag direction, so the constrained box still fits.
        let room_x = if dir_x > 0.0 { iw - sx } else { sx };
        let room_y = if dir_y > 0.0 { ih - sy } else { sy };
        if w / r > h {
            h = w / r;
        } else {
            w = h * r;
        }
        if w > room_x {
            w = room_x;
            h = w / r;
        }
        if h > room_y {
            h = room_y;
            w = h * r;
        }
    }

    if w < 1.0 || h < 1.0 {
        return None;
    }
    let x = if dir_x > 0.0 { sx } else { sx - w };
    let y = if dir_y > 0.0 { sy } else { sy - h };
    Some(CropRegion::new(x, y, w, h))
}

/// Extract the region. `None` when the region is empty after clipping.
pub fn crop(src: &RgbaImage, region: &CropRegion) -> Option<RgbaImage> {
    let (x, y, w, h) = region.to_pixels(src.width(), src.height())?;
    Some(imageops::crop_imm(src, x, y, w, h).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn free_drag_follows_pointer_in_any_direction() {
        let r = selection_from_drag((50.0, 40.0), (10.0, 90.0), CropAspect::Free, 100, 100).unwrap();
        assert_eq!(r, CropRegion::new(10.0, 40.0, 40.0, 50.0));
    }

    #[test]
    fn square_drag_is_square_and_inside_image() {
        let r = selection_from_drag((80.0, 10.0), (200.0, 30.0), CropAspect::Square, 100, 100).unwrap();
        assert_eq!(r.width, r.height);
        assert!(r.x + r.width <= 100.0 + 1e-3);
        assert!(r.y + r.height <= 100.0 + 1e-3);
    }

    #[test]
    fn sixteen_nine_ratio_holds() {
        let r = selection_from_drag((0.0, 0.0), (160.0, 10.0), CropAspect::SixteenNine, 400, 400).unwrap();
        assert!((r.width / r.height - 16.0 / 9.0).abs() < 1e-4);
        assert_eq!(r.width, 160.0);
    }

    #[test]
    fn tiny_drag_selects_nothing() {
        assert!(selection_from_drag((5.0, 5.0), (5.2, 5.9), CropAspect::Free, 10, 10).is_none());
    }

    #[test]
    fn crop_extracts_sub_raster() {
        let img = RgbaImage::from_fn(10, 10, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        let out = crop(&img, &CropRegion::new(2.0, 3.0, 4.0, 5.0)).unwrap();
        assert_eq!(out.dimensions(), (4, 5));
        assert_eq!(*out.get_pixel(0, 0), Rgba([2, 3, 0, 255]));
    }

    #[test]
    fn region_outside_image_is_empty() {
        let img = RgbaImage::new(10, 10);
        assert!(crop(&img, &CropRegion::new(20.0, 20.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn aspect_labels_parse() {
        assert_eq!(CropAspect::parse("4:3"), Some(CropAspect::FourThree));
        assert_eq!(CropAspect::parse("free"), Some(CropAspect::Free));
    }
}
