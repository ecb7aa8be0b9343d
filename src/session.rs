// ============================================================================
// EDITOR SESSION: aggregate edit state, render targets and history
// ============================================================================
//
// Everything here runs on the UI thread. Decodes and rotate/flip are handed
// to the loader and the transform worker; their results come back through
// `tick` (GUI) or `finish_pending` (CLI, tests).

use image::{RgbaImage, imageops};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::canvas::{BlendMode, Surface};
use crate::components::history::{HistoryLog, HistorySnapshot};
use crate::components::interaction::{
    EditTargets, InteractionController, InteractionOutcome, PointerEvent, ToolMode,
};
use crate::compositor::{Compositor, Frame};
use crate::config::EditorConfig;
use crate::edit_state::{DrawingLog, OverlayState, TextOverlayState};
use crate::error::{EditorError, EditorResult};
use crate::io::{encode_png, from_data_url, to_data_url};
use crate::loader::{ImageLoader, LoadResult, LoadSlot};
use crate::ops::crop::{CropRegion, crop};
use crate::ops::filters::{FilterChannel, FilterPreset, FilterSet};
use crate::ops::resize::{Interpolation, fit_display};
use crate::ops::transform::{FlipAxis, flip_anchor, rotate_anchor, rotated_size};
use crate::scheduler::TimerSlot;
use crate::worker::{TransformWorker, WorkerRequest, WorkerResponse};

pub const NO_CROP_REGION_MESSAGE: &str = "Failed to crop image: No cropped area selected.";
const NO_IMAGE_MESSAGE: &str = "No image loaded.";

#[derive(Clone, Copy, Debug)]
enum TransformKind {
    Rotate { degrees: f32, from: (u32, u32) },
    Flip { axis: FlipAxis, from: (u32, u32) },
}

/// Rotate or flip waiting on the worker, with what is needed to remap
/// anchors once the pixels come back.
#[derive(Clone, Copy, Debug)]
struct PendingTransform {
    kind: TransformKind,
    /// `state_version` at submit time; a reply for an older state is dropped.
    state_version: u64,
}

/// Persisted overlay/text JSON from a remote record, applied once the
/// record's image has decoded.
#[derive(Default)]
struct RecordSeed {
    overlay_props: Option<String>,
    text_overlay: Option<String>,
}

pub struct EditorSession {
    config: EditorConfig,
    compositor: Compositor,

    image: Option<Arc<RgbaImage>>,
    committed_filters: FilterSet,
    preview_filters: FilterSet,
    blend_image: Option<Arc<RgbaImage>>,
    blend_mode: BlendMode,
    blend_opacity: f32,
    text: TextOverlayState,
    drawing: DrawingLog,
    overlay_image: Option<Arc<RgbaImage>>,
    overlay: OverlayState,
    overlay_active: bool,

    controller: InteractionController,
    history: HistoryLog,

    main_surface: Option<Surface>,
    preview_surface: Option<Surface>,
    main_revision: u64,
    preview_revision: u64,
    preview_timer: TimerSlot,
    main_timer: TimerSlot,

    loader: ImageLoader,
    worker: Option<TransformWorker>,
    pending_transform: Option<PendingTransform>,
    pending_seed: Option<RecordSeed>,
    /// Bumped whenever the session is replaced wholesale (new base, undo/redo).
    state_version: u64,

    error: Option<String>,
    loading: bool,
}

impl EditorSession {
    pub fn new(config: EditorConfig) -> Self {
        let max_dim = config.max_working_dimension;
        let worker = match TransformWorker::spawn(max_dim) {
            Ok(w) => Some(w),
            Err(e) => {
                log::error!("{}", e);
                None
            }
        };
        Self {
            compositor: Compositor::new(max_dim),
            image: None,
            committed_filters: FilterSet::IDENTITY,
            preview_filters: FilterSet::IDENTITY,
            blend_image: None,
            blend_mode: BlendMode::Normal,
            blend_opacity: 50.0,
            text: TextOverlayState::default(),
            drawing: Vec::new(),
            overlay_image: None,
            overlay: OverlayState::default(),
            overlay_active: false,
            controller: InteractionController::new(&config.brush_color, config.brush_size),
            history: HistoryLog::new(config.history_limit),
            main_surface: Some(Surface::default()),
            preview_surface: Some(Surface::default()),
            main_revision: 0,
            preview_revision: 0,
            preview_timer: TimerSlot::debounce(config.preview_debounce_secs()),
            main_timer: TimerSlot::throttle(config.main_throttle_secs()),
            loader: ImageLoader::new(max_dim),
            worker,
            pending_transform: None,
            pending_seed: None,
            state_version: 0,
            error: None,
            loading: false,
            config,
        }
    }

    // ========================================================================
    // ERROR / STATUS
    // ========================================================================

    /// Record a failure for the UI and hand it back for `?`.
    fn fail(&mut self, err: EditorError) -> EditorError {
        log::warn!("{} failure: {}", err.kind(), err);
        self.error = Some(err.message().to_string());
        self.loading = false;
        err
    }

    fn guard<T>(&mut self, result: EditorResult<T>) -> EditorResult<T> {
        result.map_err(|e| self.fail(e))
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn transform_pending(&self) -> bool {
        self.pending_transform.is_some()
    }

    pub fn has_pending_work(&self) -> bool {
        self.loader.any_pending() || self.pending_transform.is_some()
    }

    fn settle_loading(&mut self) {
        if !self.has_pending_work() {
            self.loading = false;
        }
    }

    /// The session was replaced: orphan in-flight work aimed at the old one.
    fn replace_state(&mut self) {
        self.state_version += 1;
        self.loader.cancel(LoadSlot::Blend);
        self.loader.cancel(LoadSlot::Overlay);
        self.settle_loading();
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_deref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn committed_filters(&self) -> &FilterSet {
        &self.committed_filters
    }

    pub fn preview_filters(&self) -> &FilterSet {
        &self.preview_filters
    }

    pub fn blend_image(&self) -> Option<&RgbaImage> {
        self.blend_image.as_deref()
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn blend_opacity(&self) -> f32 {
        self.blend_opacity
    }

    pub fn text(&self) -> &TextOverlayState {
        &self.text
    }

    pub fn drawing(&self) -> &DrawingLog {
        &self.drawing
    }

    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    pub fn overlay_image(&self) -> Option<&RgbaImage> {
        self.overlay_image.as_deref()
    }

    pub fn overlay_active(&self) -> bool {
        self.overlay_active
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut InteractionController {
        &mut self.controller
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn main_surface(&self) -> Option<&Surface> {
        self.main_surface.as_ref()
    }

    pub fn preview_surface(&self) -> Option<&Surface> {
        self.preview_surface.as_ref()
    }

    /// Bumped on every main render; the view re-uploads its texture on change.
    pub fn main_revision(&self) -> u64 {
        self.main_revision
    }

    pub fn preview_revision(&self) -> u64 {
        self.preview_revision
    }

    /// The preview surface is shown only while unapplied filter edits exist.
    pub fn preview_visible(&self) -> bool {
        self.preview_filters != self.committed_filters
            && self.preview_surface.as_ref().is_some_and(|s| !s.is_blank())
    }

    /// On-screen size for the current image inside a container.
    pub fn display_size(&self, container: (f32, f32)) -> (f32, f32) {
        match self.image() {
            Some(img) => fit_display(img.width(), img.height(), container, self.config.container_fallback),
            None => (0.0, 0.0),
        }
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Start decoding a new base image. The session is rebuilt when it lands.
    pub fn load_image_bytes(&mut self, bytes: Vec<u8>) {
        self.pending_seed = None;
        self.begin_load(LoadSlot::Base, bytes);
    }

    /// Load a remote record: image bytes plus its persisted overlay/text JSON.
    pub fn load_record(&mut self, bytes: Vec<u8>, overlay_props: Option<String>, text_overlay: Option<String>) {
        self.pending_seed = Some(RecordSeed {
            overlay_props,
            text_overlay,
        });
        self.begin_load(LoadSlot::Base, bytes);
    }

    pub fn load_blend_bytes(&mut self, bytes: Vec<u8>) -> EditorResult<()> {
        self.require_image()?;
        self.begin_load(LoadSlot::Blend, bytes);
        Ok(())
    }

    pub fn load_overlay_bytes(&mut self, bytes: Vec<u8>) -> EditorResult<()> {
        self.require_image()?;
        self.begin_load(LoadSlot::Overlay, bytes);
        Ok(())
    }

    fn begin_load(&mut self, slot: LoadSlot, bytes: Vec<u8>) {
        self.error = None;
        self.loading = true;
        let version = self.loader.spawn(slot, bytes);
        log::info!("loading {} (version {})", slot.label(), version);
    }

    fn require_image(&mut self) -> EditorResult<Arc<RgbaImage>> {
        match self.image.clone() {
            Some(img) => Ok(img),
            None => Err(self.fail(EditorError::ToolFailure(NO_IMAGE_MESSAGE.into()))),
        }
    }

    fn apply_load(&mut self, result: LoadResult) -> EditorResult<()> {
        let slot = result.slot;
        let img = self.guard(result.image)?;
        self.settle_loading();
        match slot {
            LoadSlot::Base => self.install_base(img),
            LoadSlot::Blend => {
                self.require_image()?;
                self.blend_image = Some(Arc::new(img));
                self.fit_blend();
                self.render_and_commit("Blend Image")
            }
            LoadSlot::Overlay => {
                let base = self.require_image()?;
                self.overlay = OverlayState::centered(
                    base.width() as f32 / 2.0,
                    base.height() as f32 / 2.0,
                    img.width() as f32,
                    img.height() as f32,
                );
                self.overlay_image = Some(Arc::new(img));
                self.overlay_active = true;
                self.render_and_commit("Add Overlay")
            }
        }
    }

    fn install_base(&mut self, img: RgbaImage) -> EditorResult<()> {
        log::info!("image loaded at {}x{}", img.width(), img.height());
        self.replace_state();
        self.image = Some(Arc::new(img));
        self.committed_filters = FilterSet::IDENTITY;
        self.preview_filters = FilterSet::IDENTITY;
        self.blend_image = None;
        self.blend_mode = BlendMode::Normal;
        self.blend_opacity = 50.0;
        self.text = TextOverlayState::default();
        self.drawing.clear();
        self.overlay_image = None;
        self.overlay = OverlayState::default();
        self.overlay_active = false;
        self.controller.set_mode(ToolMode::None);
        self.preview_timer.cancel();
        self.main_timer.cancel();
        self.history.clear();

        let mut notice = None;
        if let Some(seed) = self.pending_seed.take() {
            if let Some(json) = seed.overlay_props.as_deref() {
                let (state, warn) = OverlayState::parse_lenient(json);
                self.overlay = state;
                notice = notice.or(warn);
            }
            if let Some(json) = seed.text_overlay.as_deref() {
                let (state, warn) = TextOverlayState::parse_lenient(json);
                self.text = state;
                notice = notice.or(warn);
            }
        }

        self.clear_preview();
        self.render_and_commit("Load Image")?;
        if let Some(msg) = notice {
            self.error = Some(msg.to_string());
        }
        Ok(())
    }

    // ========================================================================
    // FILTERS
    // ========================================================================

    /// Live slider edit. Touches only the preview set; the preview surface
    /// re-renders once the sliders have been quiet for the debounce window.
    pub fn set_preview_filter(&mut self, channel: FilterChannel, value: f32, now: f64) {
        channel.set(&mut self.preview_filters, value);
        self.preview_filters = self.preview_filters.clamped();
        self.preview_timer.request(now);
    }

    pub fn set_preview_filters(&mut self, filters: FilterSet, now: f64) {
        self.preview_filters = filters.clamped();
        self.preview_timer.request(now);
    }

    /// Put every slider back to identity; still needs Apply to take effect.
    pub fn reset_filters(&mut self, now: f64) {
        self.set_preview_filters(FilterSet::IDENTITY, now);
    }

    /// Drop unapplied slider edits.
    pub fn discard_preview(&mut self) {
        self.preview_filters = self.committed_filters;
        self.preview_timer.cancel();
        self.clear_preview();
    }

    pub fn apply_filters(&mut self) -> EditorResult<()> {
        self.require_image()?;
        self.committed_filters = self.preview_filters;
        self.preview_timer.cancel();
        self.clear_preview();
        self.render_and_commit("Apply Filters")
    }

    pub fn apply_preset(&mut self, preset: FilterPreset) -> EditorResult<()> {
        self.require_image()?;
        self.committed_filters = preset.apply_to(&self.committed_filters);
        self.preview_filters = self.committed_filters;
        self.preview_timer.cancel();
        self.clear_preview();
        self.render_and_commit(&format!("Preset: {}", preset.name()))
    }

    // ========================================================================
    // BLEND / TEXT / OVERLAY PROPERTIES
    // ========================================================================

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
        self.render_now();
    }

    pub fn set_blend_opacity(&mut self, opacity: f32, now: f64) {
        self.blend_opacity = opacity.clamp(0.0, 100.0);
        self.request_main_render(now);
    }

    pub fn clear_blend(&mut self) {
        self.blend_image = None;
        self.render_now();
    }

    /// Replace the text settings. Position and drag state are kept.
    pub fn set_text(&mut self, text: TextOverlayState, now: f64) {
        let (x, y, dragging) = (self.text.x, self.text.y, self.text.dragging);
        self.text = TextOverlayState { x, y, dragging, ..text };
        self.request_main_render(now);
    }

    pub fn set_text_position(&mut self, x: f32, y: f32, now: f64) {
        self.text.x = x;
        self.text.y = y;
        self.request_main_render(now);
    }

    pub fn set_overlay_scale(&mut self, scale: f32, now: f64) {
        self.overlay.scale = scale.max(0.01);
        self.request_main_render(now);
    }

    pub fn set_overlay_opacity(&mut self, opacity: f32, now: f64) {
        self.overlay.opacity = opacity.clamp(0.0, 1.0);
        self.request_main_render(now);
    }

    pub fn set_overlay_position(&mut self, x: f32, y: f32, now: f64) {
        self.overlay.x = x;
        self.overlay.y = y;
        self.request_main_render(now);
    }

    pub fn set_overlay_active(&mut self, active: bool) {
        self.overlay_active = active;
        self.render_now();
    }

    pub fn set_tool(&mut self, mode: ToolMode) {
        self.controller.toggle_mode(mode);
    }

    /// Select a crop rectangle directly (batch mode); enters crop mode.
    pub fn select_crop_region(&mut self, region: CropRegion) {
        if self.controller.mode() != ToolMode::Crop {
            self.controller.set_mode(ToolMode::Crop);
        }
        self.controller.set_crop_region(Some(region));
    }

    // ========================================================================
    // POINTER INPUT
    // ========================================================================

    /// Feed one pointer event (working-buffer coordinates).
    pub fn pointer(&mut self, event: PointerEvent, now: f64) -> InteractionOutcome {
        let Some(size) = self.image.as_ref().map(|i| i.dimensions()) else {
            return InteractionOutcome::None;
        };
        let outcome = self.controller.handle(
            event,
            EditTargets {
                text: &mut self.text,
                overlay: &mut self.overlay,
                overlay_present: self.overlay_active && self.overlay_image.is_some(),
                drawing: &mut self.drawing,
                image_size: size,
            },
        );
        match outcome {
            InteractionOutcome::Redraw => self.request_main_render(now),
            InteractionOutcome::Commit(label) => {
                let _ = self.render_and_commit(label);
            }
            InteractionOutcome::None | InteractionOutcome::SelectionChanged => {}
        }
        outcome
    }

    // ========================================================================
    // GEOMETRY: ROTATE / FLIP / CROP
    // ========================================================================

    pub fn rotate(&mut self, degrees: f32) -> EditorResult<()> {
        let img = self.require_image()?;
        let from = img.dimensions();
        let (w, h) = rotated_size(from.0, from.1, degrees);
        let src = self.guard(to_data_url(&img))?;
        self.submit_transform(
            WorkerRequest::rotate(src, degrees, w, h),
            TransformKind::Rotate { degrees, from },
        )
    }

    pub fn flip(&mut self, axis: FlipAxis) -> EditorResult<()> {
        let img = self.require_image()?;
        let from = img.dimensions();
        let src = self.guard(to_data_url(&img))?;
        self.submit_transform(
            WorkerRequest::flip(src, axis, from.0, from.1),
            TransformKind::Flip { axis, from },
        )
    }

    fn submit_transform(&mut self, req: WorkerRequest, kind: TransformKind) -> EditorResult<()> {
        if self.pending_transform.is_some() {
            return Err(self.fail(EditorError::ToolFailure(
                "A rotate or flip is already in progress.".into(),
            )));
        }
        let submitted = match self.worker.as_mut() {
            Some(worker) => worker.submit(req),
            None => Err(EditorError::ToolFailure("Transform worker is not available.".into())),
        };
        self.guard(submitted)?;
        self.pending_transform = Some(PendingTransform {
            kind,
            state_version: self.state_version,
        });
        self.error = None;
        self.loading = true;
        Ok(())
    }

    fn apply_transform(&mut self, reply: WorkerResponse) -> EditorResult<()> {
        let Some(pending) = self.pending_transform.take() else {
            log::debug!("dropping transform reply with nothing pending");
            return Ok(());
        };
        self.settle_loading();
        if pending.state_version != self.state_version {
            log::debug!(
                "dropping {:?} reply for replaced state (version {}, now {})",
                pending.kind,
                pending.state_version,
                self.state_version
            );
            return Ok(());
        }
        let url = self.guard(reply.into_result())?;
        let img = self.guard(from_data_url(&url))?;

        // Strokes are not remapped; they are dropped with the overlay image.
        self.drawing.clear();
        self.overlay_image = None;
        self.overlay_active = false;
        self.controller.reset_gesture();

        let label = match pending.kind {
            TransformKind::Rotate { degrees, from } => {
                (self.text.x, self.text.y) = rotate_anchor(self.text.x, self.text.y, from.0, from.1, degrees);
                let (ox, oy) = rotate_anchor(self.overlay.x, self.overlay.y, from.0, from.1, degrees);
                self.overlay = OverlayState {
                    x: ox,
                    y: oy,
                    scale: 1.0,
                    opacity: 1.0,
                    dragging: false,
                    width: img.width() as f32,
                    height: img.height() as f32,
                };
                format!("Rotate {}°", degrees)
            }
            TransformKind::Flip { axis, from } => {
                (self.text.x, self.text.y) = flip_anchor(self.text.x, self.text.y, from.0, from.1, axis);
                (self.overlay.x, self.overlay.y) = flip_anchor(self.overlay.x, self.overlay.y, from.0, from.1, axis);
                match axis {
                    FlipAxis::Horizontal => "Flip Horizontal".to_string(),
                    FlipAxis::Vertical => "Flip Vertical".to_string(),
                }
            }
        };

        self.image = Some(Arc::new(img));
        self.fit_blend();
        self.render_and_commit(&label)
    }

    /// Cut the image down to the selected crop region.
    pub fn apply_crop(&mut self) -> EditorResult<()> {
        let img = self.require_image()?;
        let cropped = self
            .controller
            .crop_region()
            .and_then(|region| crop(&img, &region));
        let Some(cropped) = cropped else {
            return Err(self.fail(EditorError::ToolFailure(NO_CROP_REGION_MESSAGE.into())));
        };

        let (cx, cy) = (cropped.width() as f32 / 2.0, cropped.height() as f32 / 2.0);
        self.image = Some(Arc::new(cropped));
        self.fit_blend();
        self.drawing.clear();
        self.overlay_image = None;
        self.overlay_active = false;
        self.text.x = cx;
        self.text.y = cy;
        self.overlay = OverlayState::centered(cx, cy, 100.0, 100.0);
        self.controller.set_mode(ToolMode::None);
        self.render_and_commit("Crop")
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    fn snapshot(&self, label: &str) -> Option<HistorySnapshot> {
        let image = self.image.clone()?;
        Some(HistorySnapshot {
            label: label.to_string(),
            image,
            filters: self.committed_filters,
            blend_image: self.blend_image.clone(),
            blend_mode: self.blend_mode,
            blend_opacity: self.blend_opacity,
            text: TextOverlayState {
                dragging: false,
                ..self.text.clone()
            },
            drawing: self.drawing.clone(),
            overlay_image: self.overlay_image.clone(),
            overlay: OverlayState {
                dragging: false,
                ..self.overlay.clone()
            },
        })
    }

    fn restore(&mut self, snap: HistorySnapshot) {
        self.replace_state();
        self.image = Some(snap.image);
        self.committed_filters = snap.filters;
        self.preview_filters = snap.filters;
        self.blend_image = snap.blend_image;
        self.blend_mode = snap.blend_mode;
        self.blend_opacity = snap.blend_opacity;
        self.text = snap.text;
        self.drawing = snap.drawing;
        self.overlay_active = snap.overlay_image.is_some();
        self.overlay_image = snap.overlay_image;
        self.overlay = snap.overlay;
        self.controller.reset_gesture();
        self.preview_timer.cancel();
        self.main_timer.cancel();
        self.clear_preview();
        self.render_now();
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo().cloned() {
            Some(snap) => {
                log::debug!("undo to '{}'", snap.label);
                self.restore(snap);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo().cloned() {
            Some(snap) => {
                log::debug!("redo to '{}'", snap.label);
                self.restore(snap);
                true
            }
            None => false,
        }
    }

    pub fn jump_to(&mut self, index: usize) -> bool {
        match self.history.jump_to(index).cloned() {
            Some(snap) => {
                self.restore(snap);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // RENDERING
    // ========================================================================

    /// Resample the blend layer to the base size once, so renders composite
    /// it pixel for pixel.
    fn fit_blend(&mut self) {
        let resized = match (self.image.as_deref(), self.blend_image.as_deref()) {
            (Some(base), Some(blend)) if base.dimensions() != blend.dimensions() => imageops::resize(
                blend,
                base.width(),
                base.height(),
                Interpolation::Bilinear.to_filter(),
            ),
            _ => return,
        };
        self.blend_image = Some(Arc::new(resized));
    }

    fn render_with(&mut self, preview: bool) -> EditorResult<()> {
        let Some(base) = self.image.as_deref() else {
            return Ok(());
        };
        let overlay = if self.overlay_active {
            self.overlay_image.as_deref().map(|img| (img, &self.overlay))
        } else {
            None
        };
        let frame = Frame {
            base,
            filters: if preview { &self.preview_filters } else { &self.committed_filters },
            blend: self
                .blend_image
                .as_deref()
                .map(|img| (img, self.blend_mode, self.blend_opacity)),
            text: &self.text,
            strokes: &self.drawing,
            active_stroke: self.controller.active_stroke(),
            overlay,
        };
        let target = if preview {
            self.preview_surface.as_mut()
        } else {
            self.main_surface.as_mut()
        };
        self.compositor.render(target, &frame)?;
        if preview {
            self.preview_revision += 1;
        } else {
            self.main_revision += 1;
        }
        Ok(())
    }

    pub fn render_main(&mut self) -> EditorResult<()> {
        let result = self.render_with(false);
        self.guard(result)
    }

    /// Re-render the preview surface, or blank it when it would match main.
    pub fn render_preview(&mut self) -> EditorResult<()> {
        if self.preview_filters == self.committed_filters {
            self.clear_preview();
            return Ok(());
        }
        let result = self.render_with(true);
        self.guard(result)
    }

    fn clear_preview(&mut self) {
        if let Some(surface) = self.preview_surface.as_mut()
            && !surface.is_blank()
        {
            surface.clear();
            self.preview_revision += 1;
        }
    }

    fn render_now(&mut self) {
        self.main_timer.cancel();
        let _ = self.render_main();
    }

    /// Throttled main render for high-rate edits (drags, sliders).
    fn request_main_render(&mut self, now: f64) {
        if self.image.is_some() && self.main_timer.request(now) {
            let _ = self.render_main();
        }
    }

    fn render_and_commit(&mut self, label: &str) -> EditorResult<()> {
        self.main_timer.cancel();
        self.render_main()?;
        if let Some(snap) = self.snapshot(label) {
            self.history.commit(snap);
        }
        Ok(())
    }

    /// Run any pending render now (before export or upload).
    pub fn flush(&mut self) -> EditorResult<()> {
        if self.main_timer.is_pending() {
            self.main_timer.cancel();
            self.render_main()?;
        }
        Ok(())
    }

    // ========================================================================
    // EVENT PUMP
    // ========================================================================

    /// Deliver finished background work and due timers. Returns `true` when
    /// anything visible may have changed.
    pub fn tick(&mut self, now: f64) -> bool {
        let mut changed = false;
        for result in self.loader.poll() {
            let _ = self.apply_load(result);
            changed = true;
        }
        if let Some(reply) = self.worker.as_mut().and_then(TransformWorker::try_recv) {
            let _ = self.apply_transform(reply);
            changed = true;
        }
        if self.preview_timer.poll(now) {
            let _ = self.render_preview();
            changed = true;
        }
        if self.main_timer.poll(now) {
            let _ = self.render_main();
            changed = true;
        }
        changed
    }

    /// Seconds until the next timer is due, for repaint scheduling.
    pub fn next_wakeup(&self, now: f64) -> Option<f64> {
        match (self.preview_timer.time_until(now), self.main_timer.time_until(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Block until every outstanding load and transform has landed.
    /// Returns the first failure, if any.
    pub fn finish_pending(&mut self, timeout: Duration) -> EditorResult<()> {
        let deadline = Instant::now() + timeout;
        let mut first_err = None;
        while self.has_pending_work() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(self.fail(EditorError::ToolFailure(
                    "Timed out waiting for background work.".into(),
                )));
            };
            let result = if self.loader.any_pending() {
                match self.loader.wait(remaining) {
                    Some(r) => self.apply_load(r),
                    None => continue,
                }
            } else {
                match self.worker.as_mut().and_then(|w| w.recv_timeout(remaining)) {
                    Some(reply) => self.apply_transform(reply),
                    None if self.worker.is_none() => {
                        self.pending_transform = None;
                        continue;
                    }
                    None => continue,
                }
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    pub fn composite(&self) -> Option<&RgbaImage> {
        self.main_surface.as_ref().map(|s| &s.image)
    }

    pub fn export_png(&mut self, path: &Path) -> EditorResult<()> {
        self.flush()?;
        let result = match self.main_surface.as_ref() {
            Some(surface) => crate::io::export_png(&surface.image, path),
            None => Err(EditorError::ConfigFailure("Canvas is not available for export.".into())),
        };
        self.guard(result)?;
        log::info!("exported {}", path.display());
        Ok(())
    }

    pub fn composite_png(&mut self) -> EditorResult<Vec<u8>> {
        self.flush()?;
        let result = match self.main_surface.as_ref() {
            Some(surface) if surface.width() > 0 && surface.height() > 0 => encode_png(&surface.image),
            _ => Err(EditorError::ConfigFailure("Nothing to save.".into())),
        };
        self.guard(result)
    }

    pub fn overlay_props_json(&self) -> EditorResult<String> {
        Ok(serde_json::to_string(&self.overlay)?)
    }

    pub fn text_overlay_json(&self) -> EditorResult<String> {
        Ok(serde_json::to_string(&self.text)?)
    }

    /// Tear down the worker and release the render targets.
    pub fn close(&mut self) {
        self.loader.cancel_all();
        self.preview_timer.cancel();
        self.main_timer.cancel();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.pending_transform = None;
        self.main_surface = None;
        self.preview_surface = None;
        self.loading = false;
        log::info!("editor session closed");
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit_state::Stroke;
    use image::Rgba;

    const WAIT: Duration = Duration::from_secs(10);

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8, 255])
        });
        encode_png(&img).unwrap()
    }

    fn loaded(w: u32, h: u32) -> EditorSession {
        let mut s = EditorSession::new(EditorConfig::default());
        s.load_image_bytes(png(w, h));
        s.finish_pending(WAIT).unwrap();
        s
    }

    #[test]
    fn load_commits_first_snapshot() {
        let s = loaded(800, 400);
        assert_eq!(s.image().map(|i| i.dimensions()), Some((400, 200)));
        assert_eq!(s.history().labels(), vec!["Load Image"]);
        assert_eq!(s.main_surface().map(|m| (m.width(), m.height())), Some((400, 200)));
        assert!(!s.is_loading());
        assert!(s.error().is_none());
    }

    #[test]
    fn bad_bytes_leave_state_intact() {
        let mut s = loaded(20, 10);
        s.load_image_bytes(b"not an image".to_vec());
        let err = s.finish_pending(WAIT).unwrap_err();
        assert!(matches!(err, EditorError::LoadFailure(_)));
        assert!(s.error().is_some());
        assert!(!s.is_loading());
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.image().map(|i| i.dimensions()), Some((20, 10)));
    }

    #[test]
    fn grayscale_preset_removes_chroma() {
        let mut s = loaded(60, 40);
        s.apply_preset(FilterPreset::Grayscale).unwrap();
        let out = s.composite().unwrap();
        let mean_chroma: f64 = out
            .pixels()
            .map(|p| (p[0].max(p[1]).max(p[2]) - p[0].min(p[1]).min(p[2])) as f64)
            .sum::<f64>()
            / (out.width() * out.height()) as f64;
        assert!(mean_chroma < 1.5, "chroma {}", mean_chroma);
        assert_eq!(s.history().undo_description(), Some("Preset: grayscale"));
    }

    #[test]
    fn preview_is_separate_until_applied() {
        let mut s = loaded(30, 30);
        let before = s.composite().unwrap().clone();
        s.set_preview_filter(FilterChannel::Brightness, 150.0, 0.0);
        assert_eq!(s.committed_filters(), &FilterSet::IDENTITY);
        assert!(!s.tick(0.01));
        assert!(s.tick(0.2));
        assert!(s.preview_visible());
        assert_eq!(s.composite().unwrap(), &before);

        s.apply_filters().unwrap();
        assert_eq!(s.committed_filters().brightness, 150.0);
        assert!(!s.preview_visible());
        assert_ne!(s.composite().unwrap(), &before);

        assert!(s.undo());
        assert_eq!(s.committed_filters(), &FilterSet::IDENTITY);
        assert_eq!(s.composite().unwrap(), &before);
    }

    #[test]
    fn overlay_drag_pushes_exactly_one_snapshot() {
        let mut s = loaded(200, 100);
        s.load_overlay_bytes(png(20, 20)).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!((s.overlay().x, s.overlay().y), (100.0, 50.0));
        assert!(s.overlay_active());

        s.set_tool(ToolMode::Overlay);
        let before = s.history().len();
        s.pointer(PointerEvent::Down { x: 102.0, y: 48.0 }, 1.0);
        s.pointer(PointerEvent::Move { x: 130.0, y: 60.0 }, 1.001);
        s.pointer(PointerEvent::Move { x: 140.0, y: 70.0 }, 1.002);
        let out = s.pointer(PointerEvent::Up, 1.003);
        assert_eq!(out, InteractionOutcome::Commit("Move Overlay"));
        assert_eq!(s.history().len(), before + 1);
        assert_eq!((s.overlay().x, s.overlay().y), (140.0, 70.0));
        assert!(!s.overlay().dragging);
    }

    #[test]
    fn freehand_stroke_commits_on_release() {
        let mut s = loaded(50, 50);
        s.set_tool(ToolMode::Draw);
        s.pointer(PointerEvent::Down { x: 5.0, y: 5.0 }, 0.0);
        s.pointer(PointerEvent::Move { x: 40.0, y: 40.0 }, 0.1);
        assert!(s.drawing().is_empty());
        s.pointer(PointerEvent::Up, 0.2);
        assert_eq!(s.drawing().len(), 1);
        assert_eq!(s.history().undo_description(), Some("Draw"));
        let p = s.composite().unwrap().get_pixel(22, 22);
        assert!(p[0] > 240 && p[1] < 15, "{:?}", p);
    }

    #[test]
    fn rotate_there_and_back_restores_geometry() {
        let mut s = loaded(40, 20);
        s.set_text_position(10.0, 5.0, 0.0);
        s.rotate(90.0).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.image().map(|i| i.dimensions()), Some((20, 40)));
        assert_eq!(s.overlay().width, 20.0);
        assert_eq!(s.history().undo_description(), Some("Rotate 90°"));

        s.rotate(-90.0).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.image().map(|i| i.dimensions()), Some((40, 20)));
        assert!((s.text().x - 10.0).abs() < 0.01);
        assert!((s.text().y - 5.0).abs() < 0.01);
        assert_eq!(s.history().len(), 3);
    }

    #[test]
    fn second_transform_while_in_flight_is_rejected() {
        let mut s = loaded(40, 20);
        s.rotate(90.0).unwrap();
        let err = s.flip(FlipAxis::Vertical).unwrap_err();
        assert!(matches!(err, EditorError::ToolFailure(_)));
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn flip_twice_is_identity() {
        let mut s = loaded(30, 20);
        let original = s.image().unwrap().clone();
        s.set_text_position(7.0, 3.0, 0.0);
        s.flip(FlipAxis::Horizontal).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.text().x, 23.0);
        s.flip(FlipAxis::Horizontal).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.image().unwrap(), &original);
        assert_eq!(s.text().x, 7.0);
        assert_eq!(s.history().labels(), vec!["Load Image", "Flip Horizontal", "Flip Horizontal"]);
    }

    #[test]
    fn transform_clears_strokes_and_overlay_image() {
        let mut s = loaded(40, 40);
        s.load_overlay_bytes(png(8, 8)).unwrap();
        s.finish_pending(WAIT).unwrap();
        s.set_tool(ToolMode::Draw);
        s.pointer(PointerEvent::Down { x: 1.0, y: 1.0 }, 0.0);
        s.pointer(PointerEvent::Move { x: 9.0, y: 9.0 }, 0.1);
        s.pointer(PointerEvent::Up, 0.2);
        s.flip(FlipAxis::Vertical).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert!(s.drawing().is_empty());
        assert!(s.overlay_image().is_none());
    }

    #[test]
    fn crop_without_region_changes_nothing() {
        let mut s = loaded(40, 30);
        s.set_tool(ToolMode::Crop);
        let err = s.apply_crop().unwrap_err();
        assert_eq!(err.message(), NO_CROP_REGION_MESSAGE);
        assert_eq!(s.error(), Some(NO_CROP_REGION_MESSAGE));
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.image().map(|i| i.dimensions()), Some((40, 30)));
    }

    #[test]
    fn crop_recentres_and_exits_crop_mode() {
        let mut s = loaded(40, 30);
        s.set_tool(ToolMode::Crop);
        s.pointer(PointerEvent::Down { x: 5.0, y: 5.0 }, 0.0);
        s.pointer(PointerEvent::Move { x: 25.0, y: 15.0 }, 0.1);
        s.pointer(PointerEvent::Up, 0.2);
        assert_eq!(s.history().len(), 1);
        s.apply_crop().unwrap();
        assert_eq!(s.image().map(|i| i.dimensions()), Some((20, 10)));
        assert_eq!((s.text().x, s.text().y), (10.0, 5.0));
        assert_eq!((s.overlay().width, s.overlay().height), (100.0, 100.0));
        assert_eq!(s.controller().mode(), ToolMode::None);
        assert_eq!(s.main_surface().map(|m| (m.width(), m.height())), Some((20, 10)));
    }

    #[test]
    fn record_seed_with_bad_overlay_json_uses_defaults() {
        let mut s = EditorSession::new(EditorConfig::default());
        s.load_record(png(10, 10), Some("{broken".into()), Some(r#"{"content":"Hi"}"#.into()));
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.overlay(), &OverlayState::default());
        assert_eq!(s.text().content, "Hi");
        assert_eq!(s.error(), Some(crate::edit_state::INVALID_OVERLAY_MESSAGE));
    }

    #[test]
    fn undo_redo_restores_drawing() {
        let mut s = loaded(30, 30);
        s.set_tool(ToolMode::Draw);
        s.pointer(PointerEvent::Down { x: 1.0, y: 1.0 }, 0.0);
        s.pointer(PointerEvent::Move { x: 20.0, y: 20.0 }, 0.1);
        s.pointer(PointerEvent::Up, 0.2);
        let drawn: Vec<Stroke> = s.drawing().clone();
        assert!(s.undo());
        assert!(s.drawing().is_empty());
        assert!(s.redo());
        assert_eq!(s.drawing(), &drawn);
        assert!(!s.redo());
    }

    #[test]
    fn closed_session_cannot_render() {
        let mut s = loaded(10, 10);
        s.close();
        let err = s.render_main().unwrap_err();
        assert!(matches!(err, EditorError::ConfigFailure(_)));
        let err = s.rotate(90.0).unwrap_err();
        assert!(matches!(err, EditorError::ToolFailure(_)));
    }

    #[test]
    fn blend_requires_an_image() {
        let mut s = EditorSession::new(EditorConfig::default());
        assert!(s.load_blend_bytes(png(4, 4)).is_err());
        assert_eq!(s.error(), Some(NO_IMAGE_MESSAGE));
    }

    #[test]
    fn rotate_reply_after_reload_is_discarded() {
        let mut s = loaded(40, 20);
        s.rotate(90.0).unwrap();
        s.load_image_bytes(png(10, 10));
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.image().map(|i| i.dimensions()), Some((10, 10)));
        assert_eq!(s.history().labels(), vec!["Load Image"]);
        assert!(!s.transform_pending());
        assert!(!s.is_loading());

        // Worker is free again for the new image.
        s.rotate(90.0).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.history().undo_description(), Some("Rotate 90°"));
    }

    #[test]
    fn undo_discards_in_flight_rotate() {
        let mut s = loaded(40, 20);
        s.apply_preset(FilterPreset::Grayscale).unwrap();
        s.rotate(90.0).unwrap();
        assert!(s.undo());
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.image().map(|i| i.dimensions()), Some((40, 20)));
        assert_eq!(s.history().labels(), vec!["Load Image", "Preset: grayscale"]);
        assert!(s.redo());
        assert_eq!(s.history().undo_description(), Some("Preset: grayscale"));
    }

    #[test]
    fn layer_loads_do_not_survive_a_new_base() {
        let mut s = loaded(30, 30);
        s.load_blend_bytes(png(8, 8)).unwrap();
        s.load_overlay_bytes(png(6, 6)).unwrap();
        s.install_base(RgbaImage::from_pixel(12, 12, Rgba([1, 2, 3, 255]))).unwrap();
        s.finish_pending(WAIT).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        s.tick(1.0);
        assert!(s.blend_image().is_none());
        assert!(!s.overlay_active());
        assert_eq!(s.history().labels(), vec!["Load Image"]);
        assert!(!s.is_loading());
    }

    #[test]
    fn undo_discards_in_flight_blend() {
        let mut s = loaded(30, 30);
        s.apply_preset(FilterPreset::Sepia).unwrap();
        s.load_blend_bytes(png(8, 8)).unwrap();
        assert!(s.undo());
        s.finish_pending(WAIT).unwrap();
        assert!(s.blend_image().is_none());
        assert_eq!(s.history().labels(), vec!["Load Image", "Preset: sepia"]);
        assert!(s.redo());
    }

    #[test]
    fn blend_is_fitted_to_the_base_once() {
        let mut s = loaded(60, 40);
        s.load_blend_bytes(png(16, 16)).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.blend_image().map(|b| b.dimensions()), Some((60, 40)));
        assert_eq!(s.history().undo_description(), Some("Blend Image"));

        s.rotate(90.0).unwrap();
        s.finish_pending(WAIT).unwrap();
        assert_eq!(s.blend_image().map(|b| b.dimensions()), Some((40, 60)));
        assert!(s.undo());
        assert_eq!(s.blend_image().map(|b| b.dimensions()), Some((60, 40)));
    }
}
