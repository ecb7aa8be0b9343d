use crate::canvas::{BlendMode, Surface};
use crate::components::interaction::{PointerEvent, ToolMode, screen_to_surface, surface_to_screen};
use crate::config::EditorConfig;
use crate::error::{EditorError, EditorResult};
use crate::io::{FileHandler, has_image_extension};
use crate::ops::crop::CropAspect;
use crate::ops::filters::{FilterChannel, FilterPreset};
use crate::ops::text::{FontFamily, parse_hex_color, to_hex_color};
use crate::ops::transform::FlipAxis;
use crate::project::{Project, ProjectSource};
use crate::remote::{ImageRecord, RecordId, RemoteStore, SessionContext};
use crate::session::EditorSession;
use eframe::egui;
use egui::{Color32, ColorImage, Rect, TextureHandle, TextureOptions};
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// ASYNC REMOTE PIPELINE: store calls run on rayon, results come back here
// ============================================================================

/// Result delivered from a background remote-store call.
pub enum RemoteResult {
    LoggedIn { token: String, username: String },
    SignedUp(String),
    Listed(Vec<ImageRecord>),
    Deleted(RecordId),
    Uploaded { project: Uuid, message: String },
    Fetched { record: ImageRecord, bytes: Vec<u8> },
    Failed(EditorError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum View {
    Login,
    Gallery,
    Editor,
}

#[derive(Default)]
struct LoginForm {
    username: String,
    password: String,
    signup: bool,
    /// Inline message under the form (server reply or validation failure).
    status: Option<String>,
}

/// GPU copy of a session surface, re-uploaded when the revision moves.
struct SurfaceTexture {
    project: Uuid,
    revision: u64,
    handle: TextureHandle,
}

pub struct PixPerfectApp {
    config: EditorConfig,

    // Multi-Document State
    projects: Vec<Project>,
    active_project_index: usize,

    file_handler: FileHandler,
    view: View,

    // Remote store
    store: Option<Arc<RemoteStore>>,
    remote_ctx: SessionContext,
    username: String,
    login: LoginForm,
    gallery: Vec<ImageRecord>,
    remote_sender: mpsc::Sender<RemoteResult>,
    remote_receiver: mpsc::Receiver<RemoteResult>,
    /// When > 0, a remote call is in flight; show spinner.
    pending_remote_ops: usize,
    remote_status: String,

    // Canvas
    main_texture: Option<SurfaceTexture>,
    preview_texture: Option<SurfaceTexture>,
    /// Primary button went down on the canvas and has not been released yet.
    canvas_pointer_down: bool,

    /// App-level failure shown in the banner (session errors show separately).
    banner: Option<String>,
    notice: Option<String>,

    show_history: bool,
    /// Project index pending close confirmation (unsaved-changes dialog)
    pending_close_index: Option<usize>,
    pending_delete: Option<RecordId>,
}

impl PixPerfectApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: EditorConfig) -> Self {
        let store = match RemoteStore::new() {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                log::error!("remote store client unavailable: {}", e);
                None
            }
        };
        let remote_ctx = SessionContext::new(&config.api_url);
        let (remote_sender, remote_receiver) = mpsc::channel();

        Self {
            config,
            projects: Vec::new(),
            active_project_index: 0,
            file_handler: FileHandler::new(),
            view: View::Login,
            store,
            remote_ctx,
            username: String::new(),
            login: LoginForm::default(),
            gallery: Vec::new(),
            remote_sender,
            remote_receiver,
            pending_remote_ops: 0,
            remote_status: String::new(),
            main_texture: None,
            preview_texture: None,
            canvas_pointer_down: false,
            banner: None,
            notice: None,
            show_history: true,
            pending_close_index: None,
            pending_delete: None,
        }
    }

    fn active_project(&self) -> Option<&Project> {
        self.projects.get(self.active_project_index)
    }

    fn active_project_mut(&mut self) -> Option<&mut Project> {
        self.projects.get_mut(self.active_project_index)
    }

    fn active_session_mut(&mut self) -> Option<&mut EditorSession> {
        self.active_project_mut().map(|p| &mut p.session)
    }

    fn push_project(&mut self, project: Project) {
        log::info!("opened {}", project.name);
        self.projects.push(project);
        self.active_project_index = self.projects.len() - 1;
        self.canvas_pointer_down = false;
        self.view = View::Editor;
    }

    fn open_local(&mut self) {
        if let Some((path, bytes)) = self.file_handler.pick_image() {
            self.open_file_bytes(path, bytes);
        }
    }

    fn open_file_by_path(&mut self, path: PathBuf) {
        match std::fs::read(&path) {
            Ok(bytes) => self.open_file_bytes(path, bytes),
            Err(e) => self.report(EditorError::from(e)),
        }
    }

    fn open_file_bytes(&mut self, path: PathBuf, bytes: Vec<u8>) {
        let project = Project::from_file(path, bytes, self.config.clone());
        self.push_project(project);
    }

    /// Close a project by index, with dirty check
    fn close_project(&mut self, index: usize) {
        let Some(project) = self.projects.get(index) else {
            return;
        };
        if project.is_dirty() {
            self.pending_close_index = Some(index);
            return;
        }
        self.force_close_project(index);
    }

    fn force_close_project(&mut self, index: usize) {
        if index >= self.projects.len() {
            return;
        }
        let mut project = self.projects.remove(index);
        project.close();
        log::info!("closed {}", project.name);
        if self.active_project_index >= self.projects.len() {
            self.active_project_index = self.projects.len().saturating_sub(1);
        } else if index < self.active_project_index {
            self.active_project_index -= 1;
        }
        self.canvas_pointer_down = false;
        if self.projects.is_empty() && self.view == View::Editor {
            self.view = if self.remote_ctx.is_authenticated() {
                View::Gallery
            } else {
                View::Login
            };
        }
    }

    fn switch_to_project(&mut self, index: usize) {
        if index < self.projects.len() && index != self.active_project_index {
            self.canvas_pointer_down = false;
            self.active_project_index = index;
        }
    }

    fn report(&mut self, err: EditorError) {
        log::warn!("{} failure: {}", err.kind(), err);
        self.banner = Some(err.message().to_string());
    }
}

// ============================================================================
// REMOTE STORE CALLS
// ============================================================================

impl PixPerfectApp {
    /// Run `job` against a copy of the session context on the rayon pool.
    fn spawn_remote<F>(&mut self, description: &str, job: F)
    where
        F: FnOnce(&RemoteStore, &mut SessionContext) -> EditorResult<RemoteResult> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            self.report(EditorError::NetworkFailure("Remote store client is unavailable.".into()));
            return;
        };
        let mut ctx = self.remote_ctx.clone();
        let sender = self.remote_sender.clone();
        self.pending_remote_ops += 1;
        self.remote_status = description.to_string();
        rayon::spawn(move || {
            let result = job(&store, &mut ctx).unwrap_or_else(RemoteResult::Failed);
            let _ = sender.send(result);
        });
    }

    fn submit_login(&mut self) {
        let username = self.login.username.trim().to_string();
        let password = self.login.password.clone();
        self.login.status = None;
        if self.login.signup {
            self.spawn_remote("Signing up...", move |store, ctx| {
                store.signup(ctx, &username, &password).map(RemoteResult::SignedUp)
            });
        } else {
            self.spawn_remote("Logging in...", move |store, ctx| {
                store.login(ctx, &username, &password)?;
                let token = ctx.token().unwrap_or_default().to_string();
                Ok(RemoteResult::LoggedIn { token, username })
            });
        }
    }

    fn logout(&mut self) {
        self.remote_ctx.clear_token();
        self.username.clear();
        self.gallery.clear();
        self.view = View::Login;
        log::info!("logged out");
    }

    fn refresh_gallery(&mut self) {
        self.spawn_remote("Loading images...", |store, ctx| {
            store.list_images(ctx).map(RemoteResult::Listed)
        });
    }

    fn open_record(&mut self, record: ImageRecord) {
        let existing = self
            .projects
            .iter()
            .position(|p| p.source == ProjectSource::Remote(record.id.clone()));
        if let Some(index) = existing {
            self.switch_to_project(index);
            self.view = View::Editor;
            return;
        }
        self.spawn_remote("Downloading image...", move |store, ctx| {
            let bytes = store.fetch_image_bytes(ctx, &record)?;
            Ok(RemoteResult::Fetched { record, bytes })
        });
    }

    fn delete_record(&mut self, id: RecordId) {
        self.spawn_remote("Deleting image...", move |store, ctx| {
            store.delete_image(ctx, &id)?;
            Ok(RemoteResult::Deleted(id))
        });
    }

    /// Upload the active composite with its overlay and text state.
    fn save_to_remote(&mut self) {
        let Some(project) = self.projects.get_mut(self.active_project_index) else {
            return;
        };
        let project_id = project.id;
        let payload = project.session.composite_png().and_then(|png| {
            let overlay = project.session.overlay_props_json()?;
            let text = project.session.text_overlay_json()?;
            Ok((png, overlay, text))
        });
        match payload {
            Ok((png, overlay, text)) => {
                self.spawn_remote("Saving image...", move |store, ctx| {
                    let message = store.upload(ctx, png, Some(overlay), Some(text))?;
                    Ok(RemoteResult::Uploaded { project: project_id, message })
                });
            }
            Err(e) => self.report(e),
        }
    }

    fn poll_remote(&mut self) {
        while let Ok(result) = self.remote_receiver.try_recv() {
            self.pending_remote_ops = self.pending_remote_ops.saturating_sub(1);
            if self.pending_remote_ops == 0 {
                self.remote_status.clear();
            }
            match result {
                RemoteResult::LoggedIn { token, username } => {
                    self.remote_ctx.set_token(token);
                    self.username = username;
                    self.login.password.clear();
                    self.login.status = None;
                    self.view = View::Gallery;
                    self.refresh_gallery();
                }
                RemoteResult::SignedUp(message) => {
                    self.remote_ctx.clear_token();
                    self.login.signup = false;
                    self.login.password.clear();
                    self.login.status = Some(message);
                }
                RemoteResult::Listed(records) => self.gallery = records,
                RemoteResult::Deleted(id) => {
                    self.gallery.retain(|r| r.id != id);
                    self.notice = Some(format!("Deleted image #{}.", id));
                }
                RemoteResult::Uploaded { project, message } => {
                    if let Some(p) = self.projects.iter_mut().find(|p| p.id == project) {
                        p.mark_clean();
                    }
                    self.notice = Some(message);
                    self.refresh_gallery();
                }
                RemoteResult::Fetched { record, bytes } => {
                    let project = Project::from_record(&record, bytes, self.config.clone());
                    self.push_project(project);
                }
                RemoteResult::Failed(err) => {
                    if err.is_auth() {
                        self.remote_ctx.clear_token();
                        self.view = View::Login;
                    }
                    if self.view == View::Login {
                        self.login.status = Some(err.message().to_string());
                        log::warn!("{} failure: {}", err.kind(), err);
                    } else {
                        self.report(err);
                    }
                }
            }
        }
    }
}

// ============================================================================
// TEXTURES
// ============================================================================

fn sync_texture(
    ctx: &egui::Context,
    slot: &mut Option<SurfaceTexture>,
    name: &str,
    project: Uuid,
    revision: u64,
    surface: Option<&Surface>,
) {
    let Some(surface) = surface.filter(|s| s.width() > 0 && s.height() > 0) else {
        *slot = None;
        return;
    };
    if slot
        .as_ref()
        .is_some_and(|t| t.project == project && t.revision == revision)
    {
        return;
    }
    let image = ColorImage::from_rgba_unmultiplied(
        [surface.width() as usize, surface.height() as usize],
        surface.image.as_raw(),
    );
    match slot {
        Some(tex) => {
            tex.handle.set(image, TextureOptions::LINEAR);
            tex.project = project;
            tex.revision = revision;
        }
        None => {
            *slot = Some(SurfaceTexture {
                project,
                revision,
                handle: ctx.load_texture(name, image, TextureOptions::LINEAR),
            });
        }
    }
}

fn full_uv() -> Rect {
    Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0))
}

fn hex_to_color32(hex: &str) -> Color32 {
    match parse_hex_color(hex) {
        Some(c) => Color32::from_rgba_unmultiplied(c[0], c[1], c[2], c[3]),
        None => Color32::WHITE,
    }
}

fn color32_to_hex(c: Color32) -> String {
    to_hex_color(image::Rgba([c.r(), c.g(), c.b(), 255]))
}

// ============================================================================
// SIDE PANEL SECTIONS
// ============================================================================

fn show_filter_section(ui: &mut egui::Ui, session: &mut EditorSession, now: f64) -> EditorResult<()> {
    let mut result = Ok(());
    for channel in FilterChannel::ALL {
        let (lo, hi) = channel.range();
        let mut value = channel.get(session.preview_filters());
        let slider = egui::Slider::new(&mut value, lo..=hi)
            .text(channel.label())
            .suffix(channel.unit());
        if ui.add(slider).changed() {
            session.set_preview_filter(channel, value, now);
        }
    }
    ui.horizontal(|ui| {
        let dirty = session.preview_filters() != session.committed_filters();
        if ui.add_enabled(dirty, egui::Button::new("Apply")).clicked() {
            result = session.apply_filters();
        }
        if ui.button("Reset").clicked() {
            session.reset_filters(now);
        }
    });
    ui.add_space(4.0);
    ui.label("Presets");
    ui.horizontal_wrapped(|ui| {
        for preset in FilterPreset::all() {
            if ui.button(preset.name()).clicked() {
                result = session.apply_preset(*preset);
            }
        }
    });
    result
}

fn show_blend_section(
    ui: &mut egui::Ui,
    session: &mut EditorSession,
    file_handler: &mut FileHandler,
    now: f64,
) -> EditorResult<()> {
    let mut result = Ok(());
    ui.horizontal(|ui| {
        if ui.button("Load Blend Image...").clicked()
            && let Some((_, bytes)) = file_handler.pick_image()
        {
            result = session.load_blend_bytes(bytes);
        }
        if ui
            .add_enabled(session.blend_image().is_some(), egui::Button::new("Clear"))
            .clicked()
        {
            session.clear_blend();
        }
    });
    let mut mode = session.blend_mode();
    egui::ComboBox::from_label("Mode")
        .selected_text(mode.name())
        .show_ui(ui, |ui| {
            for m in BlendMode::all() {
                ui.selectable_value(&mut mode, *m, m.name());
            }
        });
    if mode != session.blend_mode() {
        session.set_blend_mode(mode);
    }
    let mut opacity = session.blend_opacity();
    if ui
        .add(egui::Slider::new(&mut opacity, 0.0..=100.0).text("Opacity").suffix("%"))
        .changed()
    {
        session.set_blend_opacity(opacity, now);
    }
    result
}

fn show_text_section(ui: &mut egui::Ui, session: &mut EditorSession, now: f64) {
    let mut text = session.text().clone();
    let mut changed = ui
        .add(egui::TextEdit::singleline(&mut text.content).hint_text("Overlay text"))
        .changed();
    egui::ComboBox::from_label("Font")
        .selected_text(text.font.name())
        .show_ui(ui, |ui| {
            for f in FontFamily::all() {
                changed |= ui.selectable_value(&mut text.font, *f, f.name()).changed();
            }
        });
    changed |= ui
        .add(egui::Slider::new(&mut text.size, 8.0..=120.0).text("Size").suffix("px"))
        .changed();
    changed |= ui
        .add(egui::Slider::new(&mut text.opacity, 0.0..=1.0).text("Opacity"))
        .changed();
    ui.horizontal(|ui| {
        let mut color = hex_to_color32(&text.color);
        if ui.color_edit_button_srgba(&mut color).changed() {
            text.color = color32_to_hex(color);
            changed = true;
        }
        ui.label("Color");
    });
    if changed {
        session.set_text(text, now);
    }
}

fn show_brush_section(ui: &mut egui::Ui, session: &mut EditorSession) {
    let controller = session.controller_mut();
    ui.horizontal(|ui| {
        let mut color = hex_to_color32(&controller.brush_color);
        if ui.color_edit_button_srgba(&mut color).changed() {
            controller.brush_color = color32_to_hex(color);
        }
        ui.label("Color");
    });
    ui.add(egui::Slider::new(&mut controller.brush_size, 1.0..=50.0).text("Size").suffix("px"));
}

fn show_overlay_section(
    ui: &mut egui::Ui,
    session: &mut EditorSession,
    file_handler: &mut FileHandler,
    now: f64,
) -> EditorResult<()> {
    let mut result = Ok(());
    if ui.button("Load Overlay Image...").clicked()
        && let Some((_, bytes)) = file_handler.pick_image()
    {
        result = session.load_overlay_bytes(bytes);
    }
    let mut active = session.overlay_active();
    if ui.checkbox(&mut active, "Show overlay").changed() {
        session.set_overlay_active(active);
    }
    let has_overlay = session.overlay_image().is_some();
    let mut scale = session.overlay().scale;
    if ui
        .add_enabled(has_overlay, egui::Slider::new(&mut scale, 0.1..=3.0).text("Scale"))
        .changed()
    {
        session.set_overlay_scale(scale, now);
    }
    let mut opacity = session.overlay().opacity;
    if ui
        .add_enabled(has_overlay, egui::Slider::new(&mut opacity, 0.0..=1.0).text("Opacity"))
        .changed()
    {
        session.set_overlay_opacity(opacity, now);
    }
    result
}

fn show_crop_section(ui: &mut egui::Ui, session: &mut EditorSession) -> EditorResult<()> {
    let mut aspect = session.controller().crop_aspect;
    egui::ComboBox::from_label("Aspect")
        .selected_text(aspect.label())
        .show_ui(ui, |ui| {
            for a in CropAspect::all() {
                ui.selectable_value(&mut aspect, *a, a.label());
            }
        });
    if aspect != session.controller().crop_aspect {
        session.controller_mut().set_crop_aspect(aspect);
    }
    match session.controller().crop_region() {
        Some(r) => ui.label(format!("Selection: {:.0} × {:.0}", r.width, r.height)),
        None => ui.weak("Drag on the image to select."),
    };
    if ui.button("Apply Crop").clicked() {
        return session.apply_crop();
    }
    Ok(())
}

// ============================================================================
// VIEWS
// ============================================================================

impl PixPerfectApp {
    fn show_menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong("PixPerfect");
                ui.separator();
                if self.remote_ctx.is_authenticated() {
                    if ui.selectable_label(self.view == View::Gallery, "Gallery").clicked() {
                        self.view = View::Gallery;
                    }
                } else if ui.selectable_label(self.view == View::Login, "Log In").clicked() {
                    self.view = View::Login;
                }
                if ui
                    .add_enabled(
                        !self.projects.is_empty(),
                        egui::SelectableLabel::new(self.view == View::Editor, "Editor"),
                    )
                    .clicked()
                {
                    self.view = View::Editor;
                }
                if ui.button("Open...").clicked() {
                    self.open_local();
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if self.remote_ctx.is_authenticated() {
                        if ui.button("Log Out").clicked() {
                            self.logout();
                        }
                        ui.label(self.username.as_str());
                    }
                    if self.pending_remote_ops > 0 {
                        ui.label(self.remote_status.as_str());
                        ui.spinner();
                    }
                });
            });
        });
    }

    fn show_banner(&mut self, ctx: &egui::Context) {
        let session_error = self
            .active_project()
            .filter(|_| self.view == View::Editor)
            .and_then(|p| p.session.error())
            .map(str::to_string);
        if self.banner.is_none() && session_error.is_none() && self.notice.is_none() {
            return;
        }
        egui::TopBottomPanel::top("banner").show(ctx, |ui| {
            if let Some(msg) = self.banner.clone() {
                ui.horizontal(|ui| {
                    ui.colored_label(Color32::from_rgb(230, 80, 80), msg);
                    if ui.small_button("×").clicked() {
                        self.banner = None;
                    }
                });
            }
            if let Some(msg) = session_error {
                ui.horizontal(|ui| {
                    ui.colored_label(Color32::from_rgb(230, 80, 80), msg);
                    if ui.small_button("×").clicked()
                        && let Some(session) = self.active_session_mut()
                    {
                        session.clear_error();
                    }
                });
            }
            if let Some(msg) = self.notice.clone() {
                ui.horizontal(|ui| {
                    ui.colored_label(Color32::from_rgb(90, 190, 110), msg);
                    if ui.small_button("×").clicked() {
                        self.notice = None;
                    }
                });
            }
        });
    }

    fn show_login(&mut self, ctx: &egui::Context) {
        let mut submit = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() * 0.2);
                ui.heading(if self.login.signup { "Create Account" } else { "Log In" });
                ui.add_space(12.0);
                ui.add(egui::TextEdit::singleline(&mut self.login.username).hint_text("Username"));
                let pw = ui.add(
                    egui::TextEdit::singleline(&mut self.login.password)
                        .password(true)
                        .hint_text("Password"),
                );
                if pw.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    submit = true;
                }
                ui.add_space(8.0);
                let label = if self.login.signup { "Sign Up" } else { "Log In" };
                if ui
                    .add_enabled(self.pending_remote_ops == 0, egui::Button::new(label))
                    .clicked()
                {
                    submit = true;
                }
                let toggle = if self.login.signup {
                    "Already have an account? Log in"
                } else {
                    "No account? Sign up"
                };
                if ui.link(toggle).clicked() {
                    self.login.signup = !self.login.signup;
                    self.login.status = None;
                }
                if let Some(status) = &self.login.status {
                    ui.add_space(8.0);
                    ui.label(status.as_str());
                }
                ui.add_space(16.0);
                if ui.button("Edit a local file instead...").clicked() {
                    self.open_local();
                }
            });
        });
        if submit && self.pending_remote_ops == 0 {
            self.submit_login();
        }
    }

    fn show_gallery(&mut self, ctx: &egui::Context) {
        let mut open: Option<ImageRecord> = None;
        let mut refresh = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Your Images");
                if ui.button("Refresh").clicked() {
                    refresh = true;
                }
            });
            ui.separator();
            if self.gallery.is_empty() {
                ui.weak("No stored images yet. Open a file, edit it and save it to the cloud.");
                return;
            }
            egui::ScrollArea::vertical().show(ui, |ui| {
                egui::Grid::new("gallery_grid")
                    .striped(true)
                    .num_columns(3)
                    .show(ui, |ui| {
                        for record in &self.gallery {
                            ui.label(format!("Image #{}", record.id));
                            ui.weak(record.image_path.as_str());
                            ui.horizontal(|ui| {
                                if ui.button("Open").clicked() {
                                    open = Some(record.clone());
                                }
                                if ui.button("Delete").clicked() {
                                    self.pending_delete = Some(record.id.clone());
                                }
                            });
                            ui.end_row();
                        }
                    });
            });
        });
        if refresh {
            self.refresh_gallery();
        }
        if let Some(record) = open {
            self.open_record(record);
        }
    }

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        let authenticated = self.remote_ctx.is_authenticated();
        let mut action: Option<ToolbarAction> = None;
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                // Project tabs
                for (i, project) in self.projects.iter().enumerate() {
                    if ui
                        .selectable_label(i == self.active_project_index, project.display_title())
                        .clicked()
                    {
                        action = Some(ToolbarAction::Switch(i));
                    }
                    if ui.small_button("×").clicked() {
                        action = Some(ToolbarAction::Close(i));
                    }
                }
            });
            ui.separator();
            let Some(project) = self.projects.get(self.active_project_index) else {
                return;
            };
            let session = &project.session;
            let ready = session.has_image() && !session.transform_pending();
            ui.horizontal_wrapped(|ui| {
                let mode = session.controller().mode();
                for tool in [ToolMode::Draw, ToolMode::Text, ToolMode::Overlay, ToolMode::Crop] {
                    if ui
                        .add_enabled(ready, egui::SelectableLabel::new(mode == tool, tool.label()))
                        .clicked()
                    {
                        action = Some(ToolbarAction::Tool(tool));
                    }
                }
                ui.separator();
                if ui.add_enabled(ready, egui::Button::new("⟲ 90°")).clicked() {
                    action = Some(ToolbarAction::Rotate(-90.0));
                }
                if ui.add_enabled(ready, egui::Button::new("⟳ 90°")).clicked() {
                    action = Some(ToolbarAction::Rotate(90.0));
                }
                if ui.add_enabled(ready, egui::Button::new("Flip H")).clicked() {
                    action = Some(ToolbarAction::Flip(FlipAxis::Horizontal));
                }
                if ui.add_enabled(ready, egui::Button::new("Flip V")).clicked() {
                    action = Some(ToolbarAction::Flip(FlipAxis::Vertical));
                }
                ui.separator();
                let history = session.history();
                let undo = ui
                    .add_enabled(history.can_undo(), egui::Button::new("Undo"))
                    .on_hover_text(history.undo_description().unwrap_or(""));
                if undo.clicked() {
                    action = Some(ToolbarAction::Undo);
                }
                let redo = ui
                    .add_enabled(history.can_redo(), egui::Button::new("Redo"))
                    .on_hover_text(history.redo_description().unwrap_or(""));
                if redo.clicked() {
                    action = Some(ToolbarAction::Redo);
                }
                ui.separator();
                if ui.add_enabled(session.has_image(), egui::Button::new("Export PNG...")).clicked() {
                    action = Some(ToolbarAction::Export);
                }
                if ui
                    .add_enabled(
                        session.has_image() && authenticated && self.pending_remote_ops == 0,
                        egui::Button::new("Save to Cloud"),
                    )
                    .clicked()
                {
                    action = Some(ToolbarAction::SaveRemote);
                }
                ui.checkbox(&mut self.show_history, "History");
            });
        });
        if let Some(action) = action {
            self.run_toolbar_action(action);
        }
    }

    fn run_toolbar_action(&mut self, action: ToolbarAction) {
        match action {
            ToolbarAction::Switch(i) => self.switch_to_project(i),
            ToolbarAction::Close(i) => self.close_project(i),
            ToolbarAction::SaveRemote => self.save_to_remote(),
            ToolbarAction::Export => {
                let Some(path) = self.file_handler.pick_export_path() else {
                    return;
                };
                let Some(project) = self.active_project_mut() else {
                    return;
                };
                let result = project.session.export_png(&path);
                if result.is_ok() {
                    project.mark_clean();
                    self.notice = Some(format!("Exported {}", path.display()));
                }
            }
            other => {
                let Some(session) = self.active_session_mut() else {
                    return;
                };
                let result = match other {
                    ToolbarAction::Tool(tool) => {
                        session.set_tool(tool);
                        Ok(())
                    }
                    ToolbarAction::Rotate(deg) => session.rotate(deg),
                    ToolbarAction::Flip(axis) => session.flip(axis),
                    ToolbarAction::Undo => {
                        session.undo();
                        Ok(())
                    }
                    ToolbarAction::Redo => {
                        session.redo();
                        Ok(())
                    }
                    _ => Ok(()),
                };
                // Session failures already sit in the session's own error slot.
                if let Err(e) = result {
                    log::debug!("toolbar action failed: {}", e);
                }
            }
        }
    }

    fn show_adjustments_panel(&mut self, ctx: &egui::Context, now: f64) {
        let Some(project) = self.projects.get_mut(self.active_project_index) else {
            return;
        };
        let session = &mut project.session;
        let file_handler = &mut self.file_handler;
        egui::SidePanel::right("adjustments")
            .resizable(true)
            .default_width(280.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.add_enabled_ui(session.has_image(), |ui| {
                        let mut results = Vec::new();
                        egui::CollapsingHeader::new("Filters")
                            .default_open(true)
                            .show(ui, |ui| results.push(show_filter_section(ui, session, now)));
                        egui::CollapsingHeader::new("Blend")
                            .show(ui, |ui| results.push(show_blend_section(ui, session, file_handler, now)));
                        egui::CollapsingHeader::new("Text")
                            .show(ui, |ui| show_text_section(ui, session, now));
                        egui::CollapsingHeader::new("Brush")
                            .show(ui, |ui| show_brush_section(ui, session));
                        egui::CollapsingHeader::new("Overlay")
                            .show(ui, |ui| results.push(show_overlay_section(ui, session, file_handler, now)));
                        egui::CollapsingHeader::new("Crop")
                            .show(ui, |ui| results.push(show_crop_section(ui, session)));
                        for r in results {
                            if let Err(e) = r {
                                log::debug!("adjustment failed: {}", e);
                            }
                        }
                    });
                });
            });
    }

    /// Floating history list; clicking an entry jumps straight to it.
    fn show_history_window(&mut self, ctx: &egui::Context) {
        let mut show = self.show_history;
        let Some(project) = self.projects.get_mut(self.active_project_index) else {
            return;
        };
        let mut jump: Option<usize> = None;
        egui::Window::new("History")
            .open(&mut show)
            .resizable(false)
            .collapsible(true)
            .default_width(200.0)
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(12.0, -36.0))
            .show(ctx, |ui| {
                ui.style_mut().override_text_style = Some(egui::TextStyle::Small);
                let history = project.session.history();
                if history.is_empty() {
                    ui.weak("No history yet.");
                }
                let cursor = history.cursor();
                egui::ScrollArea::vertical().max_height(240.0).show(ui, |ui| {
                    for (i, label) in history.labels().into_iter().enumerate() {
                        let text = if i > cursor {
                            egui::RichText::new(label).weak()
                        } else {
                            egui::RichText::new(label)
                        };
                        if ui.selectable_label(i == cursor, text).clicked() {
                            jump = Some(i);
                        }
                    }
                });
                ui.separator();
                ui.weak(format!("{:.1} MB", history.memory_usage() as f64 / (1024.0 * 1024.0)));
            });
        if let Some(i) = jump {
            project.session.jump_to(i);
        }
        self.show_history = show;
    }

    fn show_status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let Some(project) = self.projects.get(self.active_project_index) else {
                    ui.weak("No image open");
                    return;
                };
                let session = &project.session;
                if session.is_loading() {
                    ui.spinner();
                    ui.label("Loading...");
                } else if session.transform_pending() {
                    ui.spinner();
                    ui.label("Transforming...");
                }
                if let Some(img) = session.image() {
                    ui.label(format!("{} × {}", img.width(), img.height()));
                }
                ui.separator();
                ui.label(session.controller().mode().label());
                ui.separator();
                ui.label(format!("{} history entries", session.history().len()));
            });
        });
    }

    fn show_canvas(&mut self, ctx: &egui::Context, now: f64) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let Some(project) = self.projects.get_mut(self.active_project_index) else {
                return;
            };
            let session = &mut project.session;
            sync_texture(
                ctx,
                &mut self.main_texture,
                "main_surface",
                project.id,
                session.main_revision(),
                session.main_surface(),
            );
            let preview = if session.preview_visible() { session.preview_surface() } else { None };
            sync_texture(
                ctx,
                &mut self.preview_texture,
                "preview_surface",
                project.id,
                session.preview_revision(),
                preview,
            );

            let Some((surface_w, surface_h)) = session.main_surface().map(|s| (s.width(), s.height())) else {
                return;
            };
            if !session.has_image() || surface_w == 0 || surface_h == 0 {
                ui.centered_and_justified(|ui| {
                    if session.is_loading() {
                        ui.spinner();
                    } else {
                        ui.weak("No image loaded.");
                    }
                });
                return;
            }

            let avail = ui.available_size();
            let (dw, dh) = session.display_size((avail.x, avail.y));
            let rect = Rect::from_center_size(ui.max_rect().center(), egui::vec2(dw, dh));
            let response = ui.allocate_rect(rect, egui::Sense::click_and_drag());
            let painter = ui.painter_at(ui.max_rect());
            painter.rect_filled(rect, 0.0, Color32::from_gray(40));
            if let Some(tex) = &self.main_texture {
                painter.image(tex.handle.id(), rect, full_uv(), Color32::WHITE);
            }
            if let Some(tex) = &self.preview_texture {
                painter.image(tex.handle.id(), rect, full_uv(), Color32::WHITE);
            }

            let mode = session.controller().mode();
            if mode == ToolMode::Overlay && session.overlay_active() && session.overlay_image().is_some() {
                let (left, top, w, h) = session.overlay().bounds();
                let min = surface_to_screen(left, top, rect, surface_w, surface_h);
                let max = surface_to_screen(left + w, top + h, rect, surface_w, surface_h);
                painter.rect_stroke(
                    Rect::from_min_max(min, max),
                    0.0,
                    egui::Stroke::new(1.0, Color32::from_rgb(80, 160, 255)),
                );
            }
            if let Some(region) = session.controller().crop_region() {
                let min = surface_to_screen(region.x, region.y, rect, surface_w, surface_h);
                let max = surface_to_screen(
                    region.x + region.width,
                    region.y + region.height,
                    rect,
                    surface_w,
                    surface_h,
                );
                let sel = Rect::from_min_max(min, max);
                let shade = Color32::from_black_alpha(110);
                painter.rect_filled(Rect::from_min_max(rect.min, egui::pos2(rect.max.x, sel.min.y)), 0.0, shade);
                painter.rect_filled(Rect::from_min_max(egui::pos2(rect.min.x, sel.max.y), rect.max), 0.0, shade);
                painter.rect_filled(
                    Rect::from_min_max(egui::pos2(rect.min.x, sel.min.y), egui::pos2(sel.min.x, sel.max.y)),
                    0.0,
                    shade,
                );
                painter.rect_filled(
                    Rect::from_min_max(egui::pos2(sel.max.x, sel.min.y), egui::pos2(rect.max.x, sel.max.y)),
                    0.0,
                    shade,
                );
                painter.rect_stroke(sel, 0.0, egui::Stroke::new(1.0, Color32::WHITE));
            }

            // Pointer: raw button edges so single clicks reach the controller too.
            let (pressed, released, down, moved, pos) = ui.input(|i| {
                (
                    i.pointer.primary_pressed(),
                    i.pointer.primary_released(),
                    i.pointer.primary_down(),
                    i.pointer.delta() != egui::Vec2::ZERO,
                    i.pointer.interact_pos(),
                )
            });
            if pressed
                && response.hovered()
                && let Some(pos) = pos
            {
                let (x, y) = screen_to_surface(pos, rect, surface_w, surface_h);
                self.canvas_pointer_down = true;
                session.pointer(PointerEvent::Down { x, y }, now);
            } else if self.canvas_pointer_down
                && down
                && moved
                && let Some(pos) = pos
            {
                let (x, y) = screen_to_surface(pos, rect, surface_w, surface_h);
                session.pointer(PointerEvent::Move { x, y }, now);
            }
            if self.canvas_pointer_down && released {
                self.canvas_pointer_down = false;
                session.pointer(PointerEvent::Up, now);
            }
            if mode != ToolMode::None {
                response.on_hover_cursor(egui::CursorIcon::Crosshair);
            }
        });
    }

    fn show_editor(&mut self, ctx: &egui::Context, now: f64) {
        if self.projects.is_empty() {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    if ui.button("Open an image...").clicked() {
                        self.open_local();
                    }
                });
            });
            return;
        }
        self.show_toolbar(ctx);
        self.show_status_bar(ctx);
        self.show_adjustments_panel(ctx, now);
        if self.show_history {
            self.show_history_window(ctx);
        }
        self.show_canvas(ctx, now);
    }

    fn show_confirm_dialogs(&mut self, ctx: &egui::Context) {
        if let Some(index) = self.pending_close_index {
            let name = self
                .projects
                .get(index)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let mut choice: Option<bool> = None;
            egui::Window::new("Unsaved Changes")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
                .show(ctx, |ui| {
                    ui.label(format!("\"{}\" has unsaved edits. Discard them?", name));
                    ui.horizontal(|ui| {
                        if ui.button("Discard").clicked() {
                            choice = Some(true);
                        }
                        if ui.button("Cancel").clicked() {
                            choice = Some(false);
                        }
                    });
                });
            if let Some(discard) = choice {
                self.pending_close_index = None;
                if discard {
                    self.force_close_project(index);
                }
            }
        }

        if let Some(id) = self.pending_delete.clone() {
            let mut choice: Option<bool> = None;
            egui::Window::new("Delete Image")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
                .show(ctx, |ui| {
                    ui.label(format!("Delete image #{} from the store?", id));
                    ui.horizontal(|ui| {
                        if ui.button("Delete").clicked() {
                            choice = Some(true);
                        }
                        if ui.button("Cancel").clicked() {
                            choice = Some(false);
                        }
                    });
                });
            if let Some(confirm) = choice {
                self.pending_delete = None;
                if confirm {
                    self.delete_record(id);
                }
            }
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if self.view != View::Editor || ctx.wants_keyboard_input() {
            return;
        }
        let (undo, redo, escape, enter) = ctx.input(|i| {
            let cmd = i.modifiers.command;
            (
                cmd && !i.modifiers.shift && i.key_pressed(egui::Key::Z),
                cmd && (i.key_pressed(egui::Key::Y) || (i.modifiers.shift && i.key_pressed(egui::Key::Z))),
                i.key_pressed(egui::Key::Escape),
                i.key_pressed(egui::Key::Enter),
            )
        });
        let Some(session) = self.active_session_mut() else {
            return;
        };
        if undo {
            session.undo();
        } else if redo {
            session.redo();
        }
        if escape {
            session.discard_preview();
            session.controller_mut().set_mode(ToolMode::None);
        }
        if enter && session.controller().mode() == ToolMode::Crop {
            let _ = session.apply_crop();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum ToolbarAction {
    Switch(usize),
    Close(usize),
    Tool(ToolMode),
    Rotate(f32),
    Flip(FlipAxis),
    Undo,
    Redo,
    Export,
    SaveRemote,
}

impl eframe::App for PixPerfectApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);

        // --- Dynamic window title: "PixPerfect - <project name>[*]" ---
        {
            let title = match self.active_project() {
                Some(project) if self.view == View::Editor => {
                    format!("PixPerfect - {}", project.display_title())
                }
                _ => "PixPerfect".to_string(),
            };
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));
        }

        self.poll_remote();

        // --- Deliver background loads, transforms and due renders ---
        let mut changed = false;
        for project in &mut self.projects {
            changed |= project.session.tick(now);
        }

        // --- Drag-and-Drop: open dropped image files as new projects ---
        {
            let dropped: Vec<egui::DroppedFile> = ctx.input(|i| i.raw.dropped_files.clone());
            for file in dropped {
                if let Some(path) = file.path
                    && has_image_extension(&path)
                {
                    self.open_file_by_path(path);
                }
            }
        }

        self.handle_shortcuts(ctx);
        self.show_menu_bar(ctx);
        self.show_banner(ctx);
        match self.view {
            View::Login => self.show_login(ctx),
            View::Gallery => self.show_gallery(ctx),
            View::Editor => self.show_editor(ctx, now),
        }
        self.show_confirm_dialogs(ctx);

        // Keep polling while anything runs in the background; otherwise wake
        // for the next debounce/throttle deadline.
        let busy = self.pending_remote_ops > 0
            || self.projects.iter().any(|p| p.session.has_pending_work());
        if busy || changed {
            ctx.request_repaint();
        } else if let Some(wait) = self
            .projects
            .iter()
            .filter_map(|p| p.session.next_wakeup(now))
            .reduce(f64::min)
        {
            ctx.request_repaint_after(Duration::from_secs_f64(wait.max(0.0)));
        }
    }
}
