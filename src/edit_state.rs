// ============================================================================
// EDIT STATE: overlay, text and freehand drawing state of a session
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::ops::text::FontFamily;

pub const INVALID_OVERLAY_MESSAGE: &str = "Invalid overlay data. Using defaults.";
pub const INVALID_TEXT_MESSAGE: &str = "Invalid text data. Using defaults.";

/// Placement of the overlay image. `x`/`y` is its centre in working pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayState {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub opacity: f32,
    pub dragging: bool,
    pub width: f32,
    pub height: f32,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            x: 50.0,
            y: 50.0,
            scale: 1.0,
            opacity: 1.0,
            dragging: false,
            width: 100.0,
            height: 100.0,
        }
    }
}

impl OverlayState {
    /// Fresh placement centred on (`x`, `y`) with intrinsic size `w`×`h`.
    pub fn centered(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x,
            y,
            width: w,
            height: h,
            ..Self::default()
        }
    }

    pub fn scaled_size(&self) -> (f32, f32) {
        (self.width * self.scale, self.height * self.scale)
    }

    /// Scaled bounding box as (left, top, width, height).
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let (w, h) = self.scaled_size();
        (self.x - w / 2.0, self.y - h / 2.0, w, h)
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        let (left, top, w, h) = self.bounds();
        px >= left && px <= left + w && py >= top && py <= top + h
    }

    /// Parse persisted JSON; malformed input yields defaults plus a
    /// user-facing notice.
    pub fn parse_lenient(json: &str) -> (Self, Option<&'static str>) {
        match serde_json::from_str::<Self>(json) {
            Ok(s) => (s, None),
            Err(e) => {
                log::warn!("overlay JSON rejected: {}", e);
                (Self::default(), Some(INVALID_OVERLAY_MESSAGE))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOverlayState {
    pub content: String,
    pub font: FontFamily,
    pub size: f32,
    pub color: String,
    /// Left end of the baseline.
    pub x: f32,
    pub y: f32,
    pub opacity: f32,
    pub dragging: bool,
}

impl Default for TextOverlayState {
    fn default() -> Self {
        Self {
            content: String::new(),
            font: FontFamily::Arial,
            size: 20.0,
            color: "#ffffff".to_string(),
            x: 50.0,
            y: 50.0,
            opacity: 1.0,
            dragging: false,
        }
    }
}

impl TextOverlayState {
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn parse_lenient(json: &str) -> (Self, Option<&'static str>) {
        match serde_json::from_str::<Self>(json) {
            Ok(s) => (s, None),
            Err(e) => {
                log::warn!("text overlay JSON rejected: {}", e);
                (Self::default(), Some(INVALID_TEXT_MESSAGE))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// A freehand path. Colour and width are fixed when the stroke opens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: String,
    pub width: f32,
}

impl Stroke {
    pub fn begin(x: f32, y: f32, color: &str, width: f32) -> Self {
        Self {
            points: vec![Point { x, y }],
            color: color.to_string(),
            width,
        }
    }

    pub fn push(&mut self, x: f32, y: f32) {
        self.points.push(Point { x, y });
    }

    pub fn is_drawable(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn as_tuples(&self) -> Vec<(f32, f32)> {
        self.points.iter().map(|p| (p.x, p.y)).collect()
    }
}

/// Committed strokes, oldest first.
pub type DrawingLog = Vec<Stroke>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_json_fills_missing_keys() {
        let (o, warn) = OverlayState::parse_lenient(r#"{"x": 120, "scale": 2}"#);
        assert!(warn.is_none());
        assert_eq!(o.x, 120.0);
        assert_eq!(o.y, 50.0);
        assert_eq!(o.scale, 2.0);
        assert_eq!(o.opacity, 1.0);
        assert_eq!((o.width, o.height), (100.0, 100.0));
        assert!(!o.dragging);
    }

    #[test]
    fn malformed_overlay_json_uses_defaults() {
        let (o, warn) = OverlayState::parse_lenient("{not json");
        assert_eq!(o, OverlayState::default());
        assert_eq!(warn, Some(INVALID_OVERLAY_MESSAGE));
    }

    #[test]
    fn text_json_defaults() {
        let (t, warn) = TextOverlayState::parse_lenient(r#"{"content":"Hi","font":"Georgia"}"#);
        assert!(warn.is_none());
        assert_eq!(t.content, "Hi");
        assert_eq!(t.font, FontFamily::Georgia);
        assert_eq!(t.size, 20.0);
        assert_eq!(t.color, "#ffffff");
        assert_eq!((t.x, t.y), (50.0, 50.0));

        let (t, warn) = TextOverlayState::parse_lenient(r#"{"size": "big""#);
        assert_eq!(t, TextOverlayState::default());
        assert!(warn.is_some());
    }

    #[test]
    fn overlay_hit_box_is_scaled_and_centred() {
        let o = OverlayState {
            x: 100.0,
            y: 100.0,
            scale: 0.5,
            ..OverlayState::default()
        };
        assert!(o.contains(124.0, 76.0));
        assert!(!o.contains(126.0, 100.0));
    }

    #[test]
    fn strokes_need_two_points() {
        let mut s = Stroke::begin(1.0, 1.0, "#ff0000", 5.0);
        assert!(!s.is_drawable());
        s.push(2.0, 3.0);
        assert!(s.is_drawable());
        assert_eq!(s.as_tuples(), vec![(1.0, 1.0), (2.0, 3.0)]);
    }
}
