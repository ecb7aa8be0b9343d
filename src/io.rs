use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};
use rfd::FileDialog;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{EditorError, EditorResult};

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";
pub const DEFAULT_EXPORT_NAME: &str = "edited-image.png";

/// Extensions offered by the open dialog and accepted by the batch CLI.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

// ============================================================================
// DECODING
// ============================================================================

/// Decode an in-memory image (any format the `image` crate was built with).
pub fn decode_bytes(bytes: &[u8]) -> EditorResult<RgbaImage> {
    if bytes.is_empty() {
        return Err(EditorError::LoadFailure("Image data is empty.".into()));
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn decode_path(path: &Path) -> EditorResult<RgbaImage> {
    let bytes = std::fs::read(path).map_err(|e| {
        EditorError::LoadFailure(format!("Failed to read {}: {}", path.display(), e))
    })?;
    decode_bytes(&bytes)
}

// ============================================================================
// ENCODING
// ============================================================================

pub fn encode_png(image: &RgbaImage) -> EditorResult<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(out)
}

pub fn to_data_url(image: &RgbaImage) -> EditorResult<String> {
    let png = encode_png(image)?;
    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, BASE64.encode(png)))
}

/// Accepts any `data:<mime>;base64,` URL; the payload format is sniffed
/// by the decoder.
pub fn from_data_url(url: &str) -> EditorResult<RgbaImage> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| EditorError::LoadFailure("Not a data URL.".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| EditorError::LoadFailure("Malformed data URL.".into()))?;
    if !meta.ends_with(";base64") {
        return Err(EditorError::LoadFailure(
            "Only base64 data URLs are supported.".into(),
        ));
    }
    let bytes = BASE64.decode(payload.trim())?;
    decode_bytes(&bytes)
}

/// Write the composite as PNG. A 0×0 surface is refused.
pub fn export_png(image: &RgbaImage, path: &Path) -> EditorResult<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EditorError::ConfigFailure(
            "Nothing to export: the canvas is empty.".into(),
        ));
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    log::info!("exported {}x{} PNG to {}", image.width(), image.height(), path.display());
    Ok(())
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

// ============================================================================
// FILE DIALOGS
// ============================================================================

pub struct FileHandler {
    /// Directory of the last opened file, used as the dialog start location.
    pub last_dir: Option<PathBuf>,
}

impl Default for FileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHandler {
    pub fn new() -> Self {
        Self { last_dir: None }
    }

    fn dialog(&self) -> FileDialog {
        let dialog = FileDialog::new();
        match &self.last_dir {
            Some(dir) => dialog.set_directory(dir),
            None => dialog,
        }
    }

    /// Pick an image to open. Returns the path and raw bytes; decoding is
    /// left to the async loader.
    pub fn pick_image(&mut self) -> Option<(PathBuf, Vec<u8>)> {
        let path = self
            .dialog()
            .add_filter("Images", IMAGE_EXTENSIONS)
            .add_filter("All Files", &["*"])
            .pick_file()?;
        self.last_dir = path.parent().map(Path::to_path_buf);
        match std::fs::read(&path) {
            Ok(bytes) => Some((path, bytes)),
            Err(e) => {
                log::warn!("failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn pick_export_path(&mut self) -> Option<PathBuf> {
        let path = self
            .dialog()
            .add_filter("PNG", &["png"])
            .set_file_name(DEFAULT_EXPORT_NAME)
            .save_file()?;
        self.last_dir = path.parent().map(Path::to_path_buf);
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 128])
            }
        })
    }

    #[test]
    fn data_url_preserves_pixels() {
        let img = checker(5, 3);
        let url = to_data_url(&img).unwrap();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert_eq!(from_data_url(&url).unwrap(), img);
    }

    #[test]
    fn garbage_is_a_load_failure() {
        assert!(matches!(
            decode_bytes(b"definitely not an image"),
            Err(EditorError::LoadFailure(_))
        ));
        assert!(matches!(
            from_data_url("http://example.com/a.png"),
            Err(EditorError::LoadFailure(_))
        ));
        assert!(matches!(
            from_data_url("data:image/png;base64,@@@"),
            Err(EditorError::LoadFailure(_))
        ));
    }

    #[test]
    fn empty_surface_is_not_exported() {
        let path = std::env::temp_dir().join("pixperfect-empty-export.png");
        let err = export_png(&RgbaImage::new(0, 0), &path).unwrap_err();
        assert!(matches!(err, EditorError::ConfigFailure(_)));
    }

    #[test]
    fn export_writes_decodable_png() {
        let path = std::env::temp_dir().join(format!("pixperfect-{}.png", uuid::Uuid::new_v4()));
        let img = checker(4, 4);
        export_png(&img, &path).unwrap();
        assert_eq!(decode_path(&path).unwrap(), img);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn extension_filter() {
        assert!(has_image_extension(Path::new("a/b/photo.JPG")));
        assert!(!has_image_extension(Path::new("notes.txt")));
    }
}
