// ============================================================================
// COMPOSITOR: flattens one frame of edit state onto a surface
// ============================================================================
//
// A frame is an explicit, ordered list of typed layers. Every render
// clears the target and redraws all of them; nothing is drawn partially.

use image::RgbaImage;
use std::borrow::Cow;

use crate::canvas::{BlendMode, Surface, composite_layer, draw_image_rect};
use crate::edit_state::{OverlayState, Stroke, TextOverlayState};
use crate::error::{EditorError, EditorResult};
use crate::ops::filters::FilterSet;
use crate::ops::resize::{Interpolation, normalize};
use crate::ops::shapes::stroke_polyline;
use crate::ops::text::{FontCache, draw_text, parse_hex_color};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Base,
    Blend,
    Text,
    Drawing,
    Overlay,
}

pub enum Layer<'a> {
    Base {
        image: &'a RgbaImage,
        filters: &'a FilterSet,
    },
    Blend {
        image: &'a RgbaImage,
        mode: BlendMode,
        /// 0–100
        opacity: f32,
    },
    Text(&'a TextOverlayState),
    Drawing(Vec<&'a Stroke>),
    Overlay {
        image: &'a RgbaImage,
        state: &'a OverlayState,
    },
}

impl Layer<'_> {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Base { .. } => LayerKind::Base,
            Layer::Blend { .. } => LayerKind::Blend,
            Layer::Text(_) => LayerKind::Text,
            Layer::Drawing(_) => LayerKind::Drawing,
            Layer::Overlay { .. } => LayerKind::Overlay,
        }
    }
}

/// Everything one render needs, borrowed from the session.
pub struct Frame<'a> {
    pub base: &'a RgbaImage,
    pub filters: &'a FilterSet,
    pub blend: Option<(&'a RgbaImage, BlendMode, f32)>,
    pub text: &'a TextOverlayState,
    pub strokes: &'a [Stroke],
    /// Stroke being drawn right now, rendered after the committed ones.
    pub active_stroke: Option<&'a Stroke>,
    /// Only set when the overlay is active and its image is loaded.
    pub overlay: Option<(&'a RgbaImage, &'a OverlayState)>,
}

impl<'a> Frame<'a> {
    /// Layers in paint order: Base, Blend, Text, Drawing, Overlay. Empty
    /// layers are left out.
    pub fn layers(&self) -> Vec<Layer<'a>> {
        let mut layers = vec![Layer::Base {
            image: self.base,
            filters: self.filters,
        }];
        if let Some((image, mode, opacity)) = self.blend {
            layers.push(Layer::Blend { image, mode, opacity });
        }
        if self.text.has_content() {
            layers.push(Layer::Text(self.text));
        }
        let strokes: Vec<&Stroke> = self
            .strokes
            .iter()
            .chain(self.active_stroke)
            .filter(|s| s.is_drawable())
            .collect();
        if !strokes.is_empty() {
            layers.push(Layer::Drawing(strokes));
        }
        if let Some((image, state)) = self.overlay {
            layers.push(Layer::Overlay { image, state });
        }
        layers
    }
}

pub struct Compositor {
    max_dim: u32,
    fonts: FontCache,
}

impl Compositor {
    pub fn new(max_dim: u32) -> Self {
        Self {
            max_dim,
            fonts: FontCache::new(),
        }
    }

    pub fn max_dim(&self) -> u32 {
        self.max_dim
    }

    /// Clear `target` and paint every layer of `frame` onto it.
    pub fn render(&mut self, target: Option<&mut Surface>, frame: &Frame) -> EditorResult<()> {
        let surface = target.ok_or_else(|| {
            EditorError::ConfigFailure("Canvas is not available for rendering.".into())
        })?;
        if frame.base.width() == 0 || frame.base.height() == 0 {
            return Err(EditorError::LoadFailure("Image has no pixels.".into()));
        }

        for layer in frame.layers() {
            match layer {
                Layer::Base { image, filters } => {
                    let working = if image.width().max(image.height()) > self.max_dim {
                        Cow::Owned(normalize(image.clone(), self.max_dim, Interpolation::Bilinear))
                    } else {
                        Cow::Borrowed(image)
                    };
                    // Replaces the whole buffer, which also clears it.
                    surface.image = filters.apply(&working);
                }
                Layer::Blend { image, mode, opacity } => {
                    composite_layer(&mut surface.image, image, mode, (opacity / 100.0).clamp(0.0, 1.0));
                }
                Layer::Text(text) => self.paint_text(surface, text),
                Layer::Drawing(strokes) => {
                    for stroke in strokes {
                        let color = parse_hex_color(&stroke.color).unwrap_or(image::Rgba([255, 0, 0, 255]));
                        stroke_polyline(&mut surface.image, &stroke.as_tuples(), stroke.width, color, 1.0);
                    }
                }
                Layer::Overlay { image, state } => {
                    let (left, top, w, h) = state.bounds();
                    draw_image_rect(&mut surface.image, image, left, top, w, h, state.opacity.clamp(0.0, 1.0));
                }
            }
        }
        Ok(())
    }

    fn paint_text(&mut self, surface: &mut Surface, text: &TextOverlayState) {
        let Some(font) = self.fonts.get(text.font) else {
            log::warn!("skipping text layer: font '{}' unavailable", text.font.name());
            return;
        };
        let color = parse_hex_color(&text.color).unwrap_or(image::Rgba([255, 255, 255, 255]));
        draw_text(
            &mut surface.image,
            &font,
            &text.content,
            text.size,
            text.x,
            text.y,
            color,
            text.opacity.clamp(0.0, 1.0),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit_state::Point;
    use image::Rgba;

    fn base() -> RgbaImage {
        RgbaImage::from_fn(40, 20, |x, y| Rgba([(x * 6) as u8, (y * 12) as u8, 90, 255]))
    }

    fn full_frame<'a>(
        base: &'a RgbaImage,
        filters: &'a FilterSet,
        text: &'a TextOverlayState,
        strokes: &'a [Stroke],
        overlay: &'a RgbaImage,
        overlay_state: &'a OverlayState,
    ) -> Frame<'a> {
        Frame {
            base,
            filters,
            blend: Some((overlay, BlendMode::Multiply, 50.0)),
            text,
            strokes,
            active_stroke: None,
            overlay: Some((overlay, overlay_state)),
        }
    }

    #[test]
    fn layer_order_is_fixed() {
        let b = base();
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState {
            content: "hi".into(),
            ..TextOverlayState::default()
        };
        let strokes = vec![Stroke {
            points: vec![Point { x: 1.0, y: 1.0 }, Point { x: 5.0, y: 5.0 }],
            color: "#ff0000".into(),
            width: 2.0,
        }];
        let ov = RgbaImage::new(4, 4);
        let os = OverlayState::default();
        let frame = full_frame(&b, &f, &text, &strokes, &ov, &os);
        let kinds: Vec<LayerKind> = frame.layers().iter().map(Layer::kind).collect();
        assert_eq!(
            kinds,
            vec![
                LayerKind::Base,
                LayerKind::Blend,
                LayerKind::Text,
                LayerKind::Drawing,
                LayerKind::Overlay
            ]
        );
    }

    #[test]
    fn empty_layers_are_omitted() {
        let b = base();
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let short = vec![Stroke::begin(1.0, 1.0, "#ff0000", 3.0)];
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &short,
            active_stroke: None,
            overlay: None,
        };
        let kinds: Vec<LayerKind> = frame.layers().iter().map(Layer::kind).collect();
        assert_eq!(kinds, vec![LayerKind::Base]);
    }

    #[test]
    fn identity_render_reproduces_base() {
        let b = base();
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: None,
        };
        let mut surface = Surface::new(1, 1);
        Compositor::new(400).render(Some(&mut surface), &frame).unwrap();
        assert_eq!(surface.image, b);
    }

    #[test]
    fn render_overwrites_previous_content() {
        let b = base();
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: None,
        };
        let mut surface = Surface::new(40, 20);
        for p in surface.image.pixels_mut() {
            *p = Rgba([1, 2, 3, 4]);
        }
        Compositor::new(400).render(Some(&mut surface), &frame).unwrap();
        assert_eq!(surface.image, b);
    }

    #[test]
    fn oversized_base_is_normalized() {
        let b = RgbaImage::from_pixel(800, 400, Rgba([10, 20, 30, 255]));
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: None,
        };
        let mut surface = Surface::default();
        Compositor::new(400).render(Some(&mut surface), &frame).unwrap();
        assert_eq!((surface.width(), surface.height()), (400, 200));
    }

    #[test]
    fn missing_surface_is_config_failure() {
        let b = base();
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: None,
        };
        let err = Compositor::new(400).render(None, &frame).unwrap_err();
        assert!(matches!(err, EditorError::ConfigFailure(_)));
    }

    #[test]
    fn overlay_is_drawn_centred_at_opacity() {
        let b = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        let ov = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        let state = OverlayState {
            x: 20.0,
            y: 20.0,
            scale: 1.0,
            opacity: 1.0,
            width: 10.0,
            height: 10.0,
            dragging: false,
        };
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: None,
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: Some((&ov, &state)),
        };
        let mut surface = Surface::default();
        Compositor::new(400).render(Some(&mut surface), &frame).unwrap();
        assert_eq!(*surface.image.get_pixel(20, 20), Rgba([255, 255, 255, 255]));
        assert_eq!(*surface.image.get_pixel(14, 20), Rgba([0, 0, 0, 255]));
        assert_eq!(*surface.image.get_pixel(15, 15), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn blend_layer_uses_mode_and_opacity() {
        let b = RgbaImage::from_pixel(8, 8, Rgba([200, 200, 200, 255]));
        let blend = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let f = FilterSet::IDENTITY;
        let text = TextOverlayState::default();
        let frame = Frame {
            base: &b,
            filters: &f,
            blend: Some((&blend, BlendMode::Multiply, 50.0)),
            text: &text,
            strokes: &[],
            active_stroke: None,
            overlay: None,
        };
        let mut surface = Surface::default();
        Compositor::new(400).render(Some(&mut surface), &frame).unwrap();
        let p = surface.image.get_pixel(3, 3);
        assert!((p[0] as i32 - 100).abs() <= 1);
    }
}
