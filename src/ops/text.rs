use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont, point};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::canvas::fill_coverage;

// ============================================================================
// FONT FAMILIES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FontFamily {
    #[default]
    Arial,
    TimesNewRoman,
    Georgia,
    Roboto,
    Helvetica,
    CourierNew,
}

impl FontFamily {
    pub fn all() -> &'static [FontFamily] {
        &[
            FontFamily::Arial,
            FontFamily::TimesNewRoman,
            FontFamily::Georgia,
            FontFamily::Roboto,
            FontFamily::Helvetica,
            FontFamily::CourierNew,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FontFamily::Arial => "Arial",
            FontFamily::TimesNewRoman => "Times New Roman",
            FontFamily::Georgia => "Georgia",
            FontFamily::Roboto => "Roboto",
            FontFamily::Helvetica => "Helvetica",
            FontFamily::CourierNew => "Courier New",
        }
    }

    pub fn parse(s: &str) -> Option<FontFamily> {
        let s = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
    }

    fn generic(&self) -> font_kit::family_name::FamilyName {
        use font_kit::family_name::FamilyName;
        match self {
            FontFamily::TimesNewRoman | FontFamily::Georgia => FamilyName::Serif,
            FontFamily::CourierNew => FamilyName::Monospace,
            _ => FamilyName::SansSerif,
        }
    }
}

// Persisted as the display name; unknown names fall back to Arial.
impl Serialize for FontFamily {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FontFamily {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(FontFamily::parse(&s).unwrap_or_default())
    }
}

/// Load a family from the system, falling back to its generic class.
pub fn load_system_font(family: FontFamily) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::Properties;
    use font_kit::source::SystemSource;

    let source = SystemSource::new();
    let handle = source
        .select_best_match(
            &[FamilyName::Title(family.name().to_string()), family.generic()],
            &Properties::new(),
        )
        .ok()?;
    let font_data = handle.load().ok()?;
    let bytes = font_data.copy_font_data()?;
    FontArc::try_from_vec((*bytes).clone()).ok()
}

/// Loaded fonts per family. A failed lookup is remembered so the system is
/// only queried once per family.
#[derive(Default)]
pub struct FontCache {
    fonts: HashMap<FontFamily, Option<FontArc>>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, family: FontFamily) -> Option<FontArc> {
        self.fonts
            .entry(family)
            .or_insert_with(|| {
                let font = load_system_font(family);
                if font.is_none() {
                    log::warn!("no system font available for '{}'", family.name());
                }
                font
            })
            .clone()
    }
}

// ============================================================================
// COLOUR
// ============================================================================

/// Parse `#rrggbb` or `#rgb` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<Rgba<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    match hex.len() {
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        _ => None,
    }
}

pub fn to_hex_color(c: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

// ============================================================================
// LAYOUT + RASTER
// ============================================================================

/// Pixel scale for an em size in px (canvas `font` semantics).
fn em_scale(font: &FontArc, size: f32) -> PxScale {
    match font.units_per_em() {
        Some(upem) if upem > 0.0 => PxScale::from(size * font.height_unscaled() / upem),
        _ => PxScale::from(size),
    }
}

/// Lay out one line left-aligned from x = 0 on the baseline y = 0.
fn layout_line(font: &FontArc, text: &str, scale: PxScale) -> (Vec<(GlyphId, f32)>, f32) {
    let scaled = font.as_scaled(scale);
    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;
    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }
    (glyphs, cursor_x)
}

/// Coverage mask of one line of text.
pub struct TextMask {
    pub coverage: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub off_x: i64,
    pub off_y: i64,
    pub advance: f32,
}

/// Rasterize `text` with its baseline starting at (`x`, `y`).
pub fn rasterize_line(font: &FontArc, text: &str, size: f32, x: f32, y: f32) -> Option<TextMask> {
    if text.is_empty() || size <= 0.0 {
        return None;
    }
    let scale = em_scale(font, size);
    let (glyphs, advance) = layout_line(font, text, scale);

    let outlined: Vec<_> = glyphs
        .iter()
        .filter_map(|&(id, gx)| font.outline_glyph(id.with_scale_and_position(scale, point(x + gx, y))))
        .collect();
    if outlined.is_empty() {
        return None;
    }

    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for g in &outlined {
        let b = g.px_bounds();
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }
    let off_x = min_x.floor() as i64;
    let off_y = min_y.floor() as i64;
    let width = (max_x.ceil() as i64 - off_x).max(1) as u32;
    let height = (max_y.ceil() as i64 - off_y).max(1) as u32;
    let mut coverage = vec![0.0f32; (width * height) as usize];

    for g in &outlined {
        let b = g.px_bounds();
        let gx0 = b.min.x as i64 - off_x;
        let gy0 = b.min.y as i64 - off_y;
        g.draw(|px, py, c| {
            let cx = gx0 + px as i64;
            let cy = gy0 + py as i64;
            if cx < 0 || cy < 0 || cx >= width as i64 || cy >= height as i64 {
                return;
            }
            let idx = (cy as u32 * width + cx as u32) as usize;
            coverage[idx] = (coverage[idx] + c).min(1.0);
        });
    }

    Some(TextMask {
        coverage,
        width,
        height,
        off_x,
        off_y,
        advance,
    })
}

/// Fill text onto `dst`. Returns `false` when nothing was drawn.
pub fn draw_text(
    dst: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    size: f32,
    x: f32,
    y: f32,
    color: Rgba<u8>,
    opacity: f32,
) -> bool {
    match rasterize_line(font, text, size, x, y) {
        Some(mask) => {
            fill_coverage(dst, &mask.coverage, mask.width, mask.off_x, mask.off_y, color, opacity);
            true
        }
        None => false,
    }
}
