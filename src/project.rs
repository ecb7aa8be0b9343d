use std::path::PathBuf;
use uuid::Uuid;

use crate::config::EditorConfig;
use crate::remote::{ImageRecord, RecordId};
use crate::session::EditorSession;

/// Where the open image came from.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectSource {
    Local(PathBuf),
    Remote(RecordId),
}

/// Single open document: one editor session plus its provenance.
pub struct Project {
    pub id: Uuid,
    pub session: EditorSession,
    pub source: ProjectSource,

    /// Display name (file name, or "Image #id" for remote records)
    pub name: String,

    /// History cursor at the last save/upload.
    clean_cursor: usize,
}

impl Project {
    pub fn from_file(path: PathBuf, bytes: Vec<u8>, config: EditorConfig) -> Self {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut session = EditorSession::new(config);
        session.load_image_bytes(bytes);

        Self {
            id: Uuid::new_v4(),
            session,
            source: ProjectSource::Local(path),
            name,
            clean_cursor: 0,
        }
    }

    pub fn from_record(record: &ImageRecord, bytes: Vec<u8>, config: EditorConfig) -> Self {
        let mut session = EditorSession::new(config);
        session.load_record(bytes, record.overlay_props.clone(), record.text_overlay.clone());

        Self {
            id: Uuid::new_v4(),
            session,
            source: ProjectSource::Remote(record.id.clone()),
            name: format!("Image #{}", record.id),
            clean_cursor: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        let history = self.session.history();
        !history.is_empty() && self.clean_cursor != history.cursor()
    }

    pub fn mark_clean(&mut self) {
        self.clean_cursor = self.session.history().cursor();
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::filters::FilterPreset;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    fn png() -> Vec<u8> {
        crate::io::encode_png(&RgbaImage::from_pixel(8, 8, Rgba([10, 200, 30, 255]))).unwrap()
    }

    #[test]
    fn edits_mark_project_dirty_until_saved() {
        let mut p = Project::from_file(PathBuf::from("/tmp/cat.png"), png(), EditorConfig::default());
        p.session.finish_pending(Duration::from_secs(10)).unwrap();
        assert_eq!(p.display_title(), "cat.png");
        p.session.apply_preset(FilterPreset::Sepia).unwrap();
        assert_eq!(p.display_title(), "cat.png*");
        p.mark_clean();
        assert!(!p.is_dirty());
        p.session.undo();
        assert!(p.is_dirty());
    }

    #[test]
    fn remote_projects_are_named_by_id() {
        let record = ImageRecord {
            id: RecordId::Number(42),
            image_path: "/uploads/42.png".into(),
            overlay_props: None,
            text_overlay: Some(r#"{"content":"Hello"}"#.into()),
        };
        let mut p = Project::from_record(&record, png(), EditorConfig::default());
        p.session.finish_pending(Duration::from_secs(10)).unwrap();
        assert_eq!(p.name, "Image #42");
        assert_eq!(p.session.text().content, "Hello");
        assert_eq!(p.source, ProjectSource::Remote(RecordId::Number(42)));
    }
}
