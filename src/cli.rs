// ============================================================================
// PixPerfect CLI: headless batch editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   pixperfect --input photo.png --preset vintage --output result.png
//   pixperfect -i "shots/*.jpg" --rotate 90 --output-dir processed/
//   pixperfect -i photo.jpg --text "Hello" --text-pos 20,40 --font georgia -o out.png
//   pixperfect -i a.png --blend paper.png --blend-mode multiply --blend-opacity 70
//   pixperfect -i a.png --crop 10,10,200,150 --upload --username me --password secret
//
// No window is opened. Every file runs through a full `EditorSession`, so
// the output is exactly what the editor view would export.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::canvas::BlendMode;
use crate::config::EditorConfig;
use crate::edit_state::TextOverlayState;
use crate::error::{EditorError, EditorResult};
use crate::ops::crop::CropRegion;
use crate::ops::filters::{FilterPreset, FilterSet};
use crate::ops::text::FontFamily;
use crate::ops::transform::FlipAxis;
use crate::remote::{RemoteStore, SessionContext};
use crate::session::EditorSession;

const STEP_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PixPerfect headless image editor.
#[derive(Parser, Debug, Default)]
#[command(
    name = "pixperfect",
    about = "PixPerfect headless batch image editor",
    long_about = "Apply filters, presets, blend layers, text, overlays, crop, rotate and\n\
                  flip to image files without opening the editor window. Output is PNG.\n\n\
                  Example:\n  \
                  pixperfect --input photo.png --preset vintage --output result.png\n  \
                  pixperfect -i \"*.jpg\" --rotate 90 --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output PNG path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing (files keep their stem, .png).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Named preset: grayscale, sepia, vivid, vintage, cool, warm.
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Brightness percent (0–200, identity 100).
    #[arg(long)]
    pub brightness: Option<f32>,
    /// Contrast percent (0–200, identity 100).
    #[arg(long)]
    pub contrast: Option<f32>,
    /// Saturation percent (0–200, identity 100).
    #[arg(long)]
    pub saturation: Option<f32>,
    /// Sepia percent (0–200).
    #[arg(long)]
    pub sepia: Option<f32>,
    /// Grayscale percent (0–200).
    #[arg(long)]
    pub grayscale: Option<f32>,
    /// Blur radius in pixels (0–10).
    #[arg(long)]
    pub blur: Option<f32>,
    /// Hue rotation in degrees (0–360).
    #[arg(long)]
    pub hue_rotate: Option<f32>,
    /// Invert percent (0–200).
    #[arg(long)]
    pub invert: Option<f32>,

    /// Rotate clockwise by this many degrees (negative = counter-clockwise).
    #[arg(long, allow_hyphen_values = true, value_name = "DEG")]
    pub rotate: Option<f32>,

    /// Flip: horizontal (h) or vertical (v).
    #[arg(long, value_name = "AXIS")]
    pub flip: Option<String>,

    /// Crop rectangle in working-resolution pixels: x,y,w,h.
    #[arg(long, value_name = "X,Y,W,H")]
    pub crop: Option<String>,

    /// Image blended over the base.
    #[arg(long, value_name = "FILE")]
    pub blend: Option<PathBuf>,
    /// normal, multiply, screen, overlay, darken, lighten, difference, exclusion.
    #[arg(long, default_value = "normal", value_name = "MODE")]
    pub blend_mode: String,
    /// Blend opacity percent (0–100).
    #[arg(long, default_value_t = 50.0)]
    pub blend_opacity: f32,

    /// Text drawn on the image.
    #[arg(long)]
    pub text: Option<String>,
    /// Arial, Times New Roman, Georgia, Roboto, Helvetica, Courier New.
    #[arg(long, default_value = "Arial")]
    pub font: String,
    #[arg(long, default_value_t = 20.0)]
    pub text_size: f32,
    #[arg(long, default_value = "#ffffff")]
    pub text_color: String,
    /// Left end of the text baseline: x,y.
    #[arg(long, value_name = "X,Y")]
    pub text_pos: Option<String>,

    /// Overlay image, centred on the canvas unless --overlay-pos is given.
    #[arg(long, value_name = "FILE")]
    pub overlay: Option<PathBuf>,
    #[arg(long, value_name = "X,Y")]
    pub overlay_pos: Option<String>,
    #[arg(long, default_value_t = 1.0)]
    pub overlay_scale: f32,
    #[arg(long, default_value_t = 1.0)]
    pub overlay_opacity: f32,

    /// Longest side of the working buffer (default from settings, 400).
    #[arg(long, value_name = "PX")]
    pub max_dim: Option<u32>,

    /// Also upload each result to the remote store.
    #[arg(long)]
    pub upload: bool,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,

    /// Print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }

    fn has_filter_flags(&self) -> bool {
        [
            self.brightness,
            self.contrast,
            self.saturation,
            self.sepia,
            self.grayscale,
            self.blur,
            self.hue_rotate,
            self.invert,
        ]
        .iter()
        .any(Option::is_some)
    }

    /// Filter flags layered over `base`; unspecified channels keep their value.
    fn filters_over(&self, base: FilterSet) -> FilterSet {
        FilterSet {
            brightness: self.brightness.unwrap_or(base.brightness),
            contrast: self.contrast.unwrap_or(base.contrast),
            saturation: self.saturation.unwrap_or(base.saturation),
            sepia: self.sepia.unwrap_or(base.sepia),
            grayscale: self.grayscale.unwrap_or(base.grayscale),
            blur: self.blur.unwrap_or(base.blur),
            hue_rotate: self.hue_rotate.unwrap_or(base.hue_rotate),
            invert: self.invert.unwrap_or(base.invert),
        }
        .clamped()
    }
}

/// Everything parsed up front so a bad flag fails before any file is touched.
struct EditPlan {
    preset: Option<FilterPreset>,
    blend_mode: BlendMode,
    flip: Option<FlipAxis>,
    crop: Option<CropRegion>,
    font: FontFamily,
    text_pos: Option<(f32, f32)>,
    overlay_pos: Option<(f32, f32)>,
    blend_bytes: Option<Vec<u8>>,
    overlay_bytes: Option<Vec<u8>>,
}

impl EditPlan {
    fn from_args(args: &CliArgs) -> Result<Self, String> {
        let preset = match args.preset.as_deref() {
            Some(name) => Some(FilterPreset::parse(name).ok_or_else(|| format!("unknown preset '{}'", name))?),
            None => None,
        };
        let blend_mode = BlendMode::parse(&args.blend_mode)
            .ok_or_else(|| format!("unknown blend mode '{}'", args.blend_mode))?;
        let flip = match args.flip.as_deref() {
            Some(axis) => Some(FlipAxis::parse(axis).ok_or_else(|| format!("unknown flip axis '{}'", axis))?),
            None => None,
        };
        let crop = match args.crop.as_deref() {
            Some(s) => {
                let v = parse_numbers(s, 4).ok_or_else(|| format!("--crop expects x,y,w,h, got '{}'", s))?;
                Some(CropRegion::new(v[0], v[1], v[2], v[3]))
            }
            None => None,
        };
        let font = FontFamily::parse(&args.font).ok_or_else(|| format!("unknown font '{}'", args.font))?;
        let text_pos = parse_pair(args.text_pos.as_deref(), "--text-pos")?;
        let overlay_pos = parse_pair(args.overlay_pos.as_deref(), "--overlay-pos")?;
        let blend_bytes = read_optional(args.blend.as_deref(), "blend")?;
        let overlay_bytes = read_optional(args.overlay.as_deref(), "overlay")?;
        Ok(Self {
            preset,
            blend_mode,
            flip,
            crop,
            font,
            text_pos,
            overlay_pos,
            blend_bytes,
            overlay_bytes,
        })
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let plan = match EditPlan::from_args(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = EditorConfig::load();
    if let Some(max_dim) = args.max_dim.filter(|&d| d > 0) {
        config.max_working_dimension = max_dim;
    }

    let mut remote = if args.upload {
        match connect_remote(&args, &config) {
            Ok(r) => Some(r),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        let result = run_one(input_path, &output_path, &args, &plan, &config, remote.as_mut());
        match result {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn connect_remote(args: &CliArgs, config: &EditorConfig) -> EditorResult<(RemoteStore, SessionContext)> {
    let (Some(user), Some(pass)) = (args.username.as_deref(), args.password.as_deref()) else {
        return Err(EditorError::AuthFailure("--upload needs --username and --password".into()));
    };
    let store = RemoteStore::new()?;
    let mut ctx = SessionContext::new(&config.api_url);
    store.login(&mut ctx, user, pass)?;
    Ok((store, ctx))
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(
    input: &Path,
    output: &Path,
    args: &CliArgs,
    plan: &EditPlan,
    config: &EditorConfig,
    remote: Option<&mut (RemoteStore, SessionContext)>,
) -> EditorResult<()> {
    let bytes = std::fs::read(input)
        .map_err(|e| EditorError::LoadFailure(format!("could not read '{}': {}", input.display(), e)))?;

    let mut session = EditorSession::new(config.clone());
    session.load_image_bytes(bytes);
    session.finish_pending(STEP_TIMEOUT)?;

    // -- Geometry first, so text/overlay positions refer to the final canvas
    if let Some(region) = plan.crop {
        session.select_crop_region(region);
        session.apply_crop()?;
    }
    if let Some(deg) = args.rotate.filter(|d| *d % 360.0 != 0.0) {
        session.rotate(deg)?;
        session.finish_pending(STEP_TIMEOUT)?;
    }
    if let Some(axis) = plan.flip {
        session.flip(axis)?;
        session.finish_pending(STEP_TIMEOUT)?;
    }

    // -- Filters
    if let Some(preset) = plan.preset {
        session.apply_preset(preset)?;
    }
    if args.has_filter_flags() {
        let filters = args.filters_over(*session.committed_filters());
        session.set_preview_filters(filters, 0.0);
        session.apply_filters()?;
    }

    // -- Blend layer
    if let Some(bytes) = &plan.blend_bytes {
        session.set_blend_mode(plan.blend_mode);
        session.set_blend_opacity(args.blend_opacity, 0.0);
        session.load_blend_bytes(bytes.clone())?;
        session.finish_pending(STEP_TIMEOUT)?;
    }

    // -- Text
    if let Some(content) = args.text.as_deref().filter(|t| !t.is_empty()) {
        session.set_text(
            TextOverlayState {
                content: content.to_string(),
                font: plan.font,
                size: args.text_size,
                color: args.text_color.clone(),
                ..TextOverlayState::default()
            },
            0.0,
        );
        if let Some((x, y)) = plan.text_pos {
            session.set_text_position(x, y, 0.0);
        }
    }

    // -- Overlay
    if let Some(bytes) = &plan.overlay_bytes {
        session.load_overlay_bytes(bytes.clone())?;
        session.finish_pending(STEP_TIMEOUT)?;
        if let Some((x, y)) = plan.overlay_pos {
            session.set_overlay_position(x, y, 0.0);
        }
        session.set_overlay_scale(args.overlay_scale, 0.0);
        session.set_overlay_opacity(args.overlay_opacity, 0.0);
    }

    session.render_main()?;
    session.export_png(output)?;

    if let Some((store, ctx)) = remote {
        let png = session.composite_png()?;
        let overlay = session.overlay_props_json()?;
        let text = session.text_overlay_json()?;
        let message = store.upload(ctx, png, Some(overlay), Some(text))?;
        if args.verbose {
            println!("  uploaded: {}", message);
        }
    }

    session.close();
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !crate::io::has_image_extension(&entry) {
                        continue;
                    }
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no image files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: next to the input as `<stem>_edited.png`
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.png", stem)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_edited.png", stem)))
}

/// Comma-separated floats, exactly `n` of them.
fn parse_numbers(s: &str, n: usize) -> Option<Vec<f32>> {
    let v: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .ok()?;
    (v.len() == n && v.iter().all(|x| x.is_finite())).then_some(v)
}

fn parse_pair(arg: Option<&str>, flag: &str) -> Result<Option<(f32, f32)>, String> {
    match arg {
        Some(s) => {
            let v = parse_numbers(s, 2).ok_or_else(|| format!("{} expects x,y, got '{}'", flag, s))?;
            Ok(Some((v[0], v[1])))
        }
        None => Ok(None),
    }
}

fn read_optional(path: Option<&Path>, what: &str) -> Result<Option<Vec<u8>>, String> {
    match path {
        Some(p) => std::fs::read(p)
            .map(Some)
            .map_err(|e| format!("could not read {} image '{}': {}", what, p.display(), e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pixperfect-cli-{}-{}", tag, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 3) as u8, (y * 5) as u8, 120, 255]));
        std::fs::write(path, crate::io::encode_png(&img).unwrap()).unwrap();
    }

    #[test]
    fn parses_flags() {
        let args = CliArgs::parse_from([
            "pixperfect", "-i", "a.png", "--rotate", "-90", "--crop", "1,2,30,40", "--brightness", "150",
        ]);
        assert_eq!(args.rotate, Some(-90.0));
        assert!(args.has_filter_flags());
        let plan = EditPlan::from_args(&args).unwrap();
        assert_eq!(plan.crop, Some(CropRegion::new(1.0, 2.0, 30.0, 40.0)));
        assert_eq!(args.filters_over(FilterSet::IDENTITY).brightness, 150.0);
    }

    #[test]
    fn bad_flags_are_rejected_up_front() {
        let args = CliArgs::parse_from(["pixperfect", "-i", "a.png", "--preset", "noir"]);
        assert!(EditPlan::from_args(&args).is_err());
        let args = CliArgs::parse_from(["pixperfect", "-i", "a.png", "--crop", "1,2,3"]);
        assert!(EditPlan::from_args(&args).is_err());
        let args = CliArgs::parse_from(["pixperfect", "-i", "a.png", "--flip", "diagonal"]);
        assert!(EditPlan::from_args(&args).is_err());
    }

    #[test]
    fn output_path_priority() {
        let input = Path::new("/photos/cat.jpg");
        assert_eq!(
            build_output_path(input, Some(Path::new("/x/out.png")), None),
            Some(PathBuf::from("/x/out.png"))
        );
        assert_eq!(
            build_output_path(input, None, Some(Path::new("/out"))),
            Some(PathBuf::from("/out/cat.png"))
        );
        assert_eq!(build_output_path(input, None, None), Some(PathBuf::from("/photos/cat_edited.png")));
    }

    #[test]
    fn batch_run_rotates_and_exports() {
        let dir = temp_dir("rotate");
        let input = dir.join("wide.png");
        write_png(&input, 60, 30);
        let out = dir.join("out.png");
        let args = CliArgs {
            input: vec![input.to_string_lossy().into_owned()],
            output: Some(out.clone()),
            rotate: Some(90.0),
            preset: Some("grayscale".into()),
            blend_mode: "normal".into(),
            blend_opacity: 50.0,
            font: "Arial".into(),
            text_size: 20.0,
            text_color: "#ffffff".into(),
            overlay_scale: 1.0,
            overlay_opacity: 1.0,
            ..CliArgs::default()
        };
        assert_eq!(run(args), ExitCode::SUCCESS);
        let result = crate::io::decode_path(&out).unwrap();
        assert_eq!(result.dimensions(), (30, 60));
        let p = result.get_pixel(10, 10);
        assert!((p[0] as i32 - p[2] as i32).abs() <= 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_input_fails() {
        let args = CliArgs::parse_from(["pixperfect", "-i", "/definitely/not/here-*.png"]);
        assert_eq!(run(args), ExitCode::FAILURE);
    }
}
