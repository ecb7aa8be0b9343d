// ============================================================================
// INTERACTION CONTROLLER: pointer events to edit-state mutations
// ============================================================================

use eframe::egui::{Pos2, Rect};

use crate::edit_state::{DrawingLog, OverlayState, Stroke, TextOverlayState};
use crate::ops::crop::{CropAspect, CropRegion, selection_from_drag};

/// Tool picked in the toolbar. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    None,
    Draw,
    Text,
    Overlay,
    Crop,
}

impl ToolMode {
    pub fn label(&self) -> &'static str {
        match self {
            ToolMode::None => "Select",
            ToolMode::Draw => "Draw",
            ToolMode::Text => "Text",
            ToolMode::Overlay => "Overlay",
            ToolMode::Crop => "Crop",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InteractionState {
    #[default]
    Idle,
    Drawing,
    DraggingText,
    DraggingOverlay,
    Cropping,
}

/// Pointer event already mapped into working-buffer coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InteractionOutcome {
    None,
    /// Edit state changed mid-gesture; schedule a throttled main render.
    Redraw,
    /// Only the crop rectangle moved; no composite needed.
    SelectionChanged,
    /// Gesture finished; render and push one snapshot with this label.
    Commit(&'static str),
}

/// The parts of session state a gesture may touch.
pub struct EditTargets<'a> {
    pub text: &'a mut TextOverlayState,
    pub overlay: &'a mut OverlayState,
    /// Overlay is active and its image is loaded.
    pub overlay_present: bool,
    pub drawing: &'a mut DrawingLog,
    pub image_size: (u32, u32),
}

/// Map a screen position inside `rect` (where the surface is displayed)
/// into surface pixel coordinates.
pub fn screen_to_surface(pos: Pos2, rect: Rect, surface_w: u32, surface_h: u32) -> (f32, f32) {
    let sx = if rect.width() > 0.0 { surface_w as f32 / rect.width() } else { 1.0 };
    let sy = if rect.height() > 0.0 { surface_h as f32 / rect.height() } else { 1.0 };
    ((pos.x - rect.min.x) * sx, (pos.y - rect.min.y) * sy)
}

pub fn surface_to_screen(x: f32, y: f32, rect: Rect, surface_w: u32, surface_h: u32) -> Pos2 {
    let sx = if surface_w > 0 { rect.width() / surface_w as f32 } else { 1.0 };
    let sy = if surface_h > 0 { rect.height() / surface_h as f32 } else { 1.0 };
    Pos2::new(rect.min.x + x * sx, rect.min.y + y * sy)
}

pub struct InteractionController {
    mode: ToolMode,
    state: InteractionState,
    active_stroke: Option<Stroke>,
    pub brush_color: String,
    pub brush_size: f32,
    pub crop_aspect: CropAspect,
    crop_anchor: Option<(f32, f32)>,
    crop_region: Option<CropRegion>,
}

impl InteractionController {
    pub fn new(brush_color: &str, brush_size: f32) -> Self {
        Self {
            mode: ToolMode::None,
            state: InteractionState::Idle,
            active_stroke: None,
            brush_color: brush_color.to_string(),
            brush_size,
            crop_aspect: CropAspect::Free,
            crop_anchor: None,
            crop_region: None,
        }
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn active_stroke(&self) -> Option<&Stroke> {
        self.active_stroke.as_ref()
    }

    pub fn crop_region(&self) -> Option<CropRegion> {
        self.crop_region
    }

    /// Switch tools. Any gesture in progress is abandoned and a crop
    /// selection does not survive leaving crop mode.
    pub fn set_mode(&mut self, mode: ToolMode) {
        self.active_stroke = None;
        self.crop_anchor = None;
        if mode != ToolMode::Crop {
            self.crop_region = None;
        }
        self.mode = mode;
        self.state = if mode == ToolMode::Crop {
            InteractionState::Cropping
        } else {
            InteractionState::Idle
        };
    }

    /// Toggle: selecting the active tool again returns to no tool.
    pub fn toggle_mode(&mut self, mode: ToolMode) {
        if self.mode == mode {
            self.set_mode(ToolMode::None);
        } else {
            self.set_mode(mode);
        }
    }

    pub fn set_crop_aspect(&mut self, aspect: CropAspect) {
        self.crop_aspect = aspect;
        self.crop_region = None;
    }

    pub fn set_crop_region(&mut self, region: Option<CropRegion>) {
        self.crop_region = region;
    }

    /// Drop transient gesture state after the session was replaced
    /// (undo, load, transform).
    pub fn reset_gesture(&mut self) {
        self.active_stroke = None;
        self.crop_anchor = None;
        if self.state != InteractionState::Cropping {
            self.state = InteractionState::Idle;
        }
    }

    pub fn handle(&mut self, event: PointerEvent, t: EditTargets<'_>) -> InteractionOutcome {
        match (self.state, event) {
            (InteractionState::Cropping, ev) => self.handle_crop(ev, t.image_size),

            (InteractionState::Idle, PointerEvent::Down { x, y }) => {
                if self.mode == ToolMode::Draw {
                    self.active_stroke = Some(Stroke::begin(x, y, &self.brush_color, self.brush_size));
                    self.state = InteractionState::Drawing;
                    InteractionOutcome::Redraw
                } else if self.mode == ToolMode::Text && t.text.has_content() {
                    t.text.x = x;
                    t.text.y = y;
                    t.text.dragging = true;
                    self.state = InteractionState::DraggingText;
                    InteractionOutcome::Redraw
                } else if self.mode == ToolMode::Overlay && t.overlay_present && t.overlay.contains(x, y) {
                    t.overlay.dragging = true;
                    self.state = InteractionState::DraggingOverlay;
                    InteractionOutcome::None
                } else {
                    InteractionOutcome::None
                }
            }

            (InteractionState::Drawing, PointerEvent::Move { x, y }) => match &mut self.active_stroke {
                Some(stroke) => {
                    stroke.push(x, y);
                    InteractionOutcome::Redraw
                }
                None => InteractionOutcome::None,
            },
            (InteractionState::DraggingText, PointerEvent::Move { x, y }) => {
                t.text.x = x;
                t.text.y = y;
                InteractionOutcome::Redraw
            }
            (InteractionState::DraggingOverlay, PointerEvent::Move { x, y }) => {
                t.overlay.x = x;
                t.overlay.y = y;
                InteractionOutcome::Redraw
            }

            (InteractionState::Drawing, PointerEvent::Up) => {
                self.state = InteractionState::Idle;
                match self.active_stroke.take() {
                    Some(stroke) => {
                        t.drawing.push(stroke);
                        InteractionOutcome::Commit("Draw")
                    }
                    None => InteractionOutcome::None,
                }
            }
            (InteractionState::DraggingText, PointerEvent::Up) => {
                t.text.dragging = false;
                self.state = InteractionState::Idle;
                InteractionOutcome::Commit("Move Text")
            }
            (InteractionState::DraggingOverlay, PointerEvent::Up) => {
                t.overlay.dragging = false;
                self.state = InteractionState::Idle;
                InteractionOutcome::Commit("Move Overlay")
            }

            _ => InteractionOutcome::None,
        }
    }

    fn handle_crop(&mut self, event: PointerEvent, image_size: (u32, u32)) -> InteractionOutcome {
        match event {
            PointerEvent::Down { x, y } => {
                self.crop_anchor = Some((x, y));
                self.crop_region = None;
                InteractionOutcome::SelectionChanged
            }
            PointerEvent::Move { x, y } => match self.crop_anchor {
                Some(anchor) => {
                    self.crop_region =
                        selection_from_drag(anchor, (x, y), self.crop_aspect, image_size.0, image_size.1);
                    InteractionOutcome::SelectionChanged
                }
                None => InteractionOutcome::None,
            },
            PointerEvent::Up => {
                self.crop_anchor = None;
                InteractionOutcome::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Targets {
        text: TextOverlayState,
        overlay: OverlayState,
        drawing: DrawingLog,
    }

    impl Targets {
        fn new() -> Self {
            Self {
                text: TextOverlayState::default(),
                overlay: OverlayState::centered(100.0, 100.0, 40.0, 40.0),
                drawing: Vec::new(),
            }
        }

        fn view(&mut self) -> EditTargets<'_> {
            EditTargets {
                text: &mut self.text,
                overlay: &mut self.overlay,
                overlay_present: true,
                drawing: &mut self.drawing,
                image_size: (200, 200),
            }
        }
    }

    #[test]
    fn draw_gesture_commits_one_stroke() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Draw);
        c.handle(PointerEvent::Down { x: 1.0, y: 1.0 }, t.view());
        assert_eq!(c.state(), InteractionState::Drawing);
        assert_eq!(c.handle(PointerEvent::Move { x: 5.0, y: 5.0 }, t.view()), InteractionOutcome::Redraw);
        assert_eq!(c.active_stroke().map(|s| s.points.len()), Some(2));
        assert!(t.drawing.is_empty());
        assert_eq!(c.handle(PointerEvent::Up, t.view()), InteractionOutcome::Commit("Draw"));
        assert_eq!(t.drawing.len(), 1);
        assert_eq!(t.drawing[0].color, "#ff0000");
        assert_eq!(c.state(), InteractionState::Idle);
    }

    #[test]
    fn overlay_drag_moves_centre_to_pointer() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Overlay);
        assert_eq!(c.handle(PointerEvent::Down { x: 110.0, y: 90.0 }, t.view()), InteractionOutcome::None);
        assert_eq!(c.state(), InteractionState::DraggingOverlay);
        assert!(t.overlay.dragging);
        c.handle(PointerEvent::Move { x: 150.0, y: 60.0 }, t.view());
        assert_eq!((t.overlay.x, t.overlay.y), (150.0, 60.0));
        assert_eq!(c.handle(PointerEvent::Up, t.view()), InteractionOutcome::Commit("Move Overlay"));
        assert!(!t.overlay.dragging);
    }

    #[test]
    fn down_outside_overlay_stays_idle() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Overlay);
        c.handle(PointerEvent::Down { x: 10.0, y: 10.0 }, t.view());
        assert_eq!(c.state(), InteractionState::Idle);
        assert_eq!(c.handle(PointerEvent::Up, t.view()), InteractionOutcome::None);
    }

    #[test]
    fn text_drag_requires_content() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Text);
        c.handle(PointerEvent::Down { x: 10.0, y: 10.0 }, t.view());
        assert_eq!(c.state(), InteractionState::Idle);

        t.text.content = "Hello".into();
        c.handle(PointerEvent::Down { x: 10.0, y: 12.0 }, t.view());
        assert_eq!(c.state(), InteractionState::DraggingText);
        assert_eq!((t.text.x, t.text.y), (10.0, 12.0));
        assert_eq!(c.handle(PointerEvent::Up, t.view()), InteractionOutcome::Commit("Move Text"));
    }

    #[test]
    fn switching_modes_abandons_gesture() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Draw);
        c.handle(PointerEvent::Down { x: 1.0, y: 1.0 }, t.view());
        c.set_mode(ToolMode::Crop);
        assert_eq!(c.state(), InteractionState::Cropping);
        assert!(c.active_stroke().is_none());
        c.toggle_mode(ToolMode::Crop);
        assert_eq!(c.mode(), ToolMode::None);
        assert_eq!(c.state(), InteractionState::Idle);
    }

    #[test]
    fn cropping_builds_selection_without_commits() {
        let mut c = InteractionController::new("#ff0000", 5.0);
        let mut t = Targets::new();
        c.set_mode(ToolMode::Crop);
        c.set_crop_aspect(CropAspect::Square);
        c.handle(PointerEvent::Down { x: 20.0, y: 20.0 }, t.view());
        let out = c.handle(PointerEvent::Move { x: 80.0, y: 50.0 }, t.view());
        assert_eq!(out, InteractionOutcome::SelectionChanged);
        assert_eq!(c.handle(PointerEvent::Up, t.view()), InteractionOutcome::None);
        let r = c.crop_region().unwrap();
        assert_eq!((r.width, r.height), (60.0, 60.0));
        assert!(t.drawing.is_empty());
    }

    #[test]
    fn screen_mapping_uses_rect_ratio() {
        let rect = Rect::from_min_size(Pos2::new(10.0, 20.0), eframe::egui::vec2(200.0, 100.0));
        let (x, y) = screen_to_surface(Pos2::new(110.0, 70.0), rect, 400, 200);
        assert_eq!((x, y), (200.0, 100.0));
        let back = surface_to_screen(x, y, rect, 400, 200);
        assert_eq!(back, Pos2::new(110.0, 70.0));
    }
}
