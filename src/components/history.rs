use image::RgbaImage;
use std::collections::HashSet;
use std::sync::Arc;

use crate::canvas::BlendMode;
use crate::edit_state::{DrawingLog, OverlayState, TextOverlayState};
use crate::ops::filters::FilterSet;

// ============================================================================
// SNAPSHOT: the complete edit state at one action boundary
// ============================================================================

/// Immutable copy of everything needed to re-render the session. Pixel
/// buffers are shared with the session and with neighbouring snapshots.
#[derive(Clone)]
pub struct HistorySnapshot {
    pub label: String,
    pub image: Arc<RgbaImage>,
    pub filters: FilterSet,
    pub blend_image: Option<Arc<RgbaImage>>,
    pub blend_mode: BlendMode,
    /// 0–100
    pub blend_opacity: f32,
    pub text: TextOverlayState,
    pub drawing: DrawingLog,
    pub overlay_image: Option<Arc<RgbaImage>>,
    pub overlay: OverlayState,
}

impl HistorySnapshot {
    fn buffers(&self) -> impl Iterator<Item = &Arc<RgbaImage>> {
        std::iter::once(&self.image)
            .chain(self.blend_image.iter())
            .chain(self.overlay_image.iter())
    }
}

// ============================================================================
// HISTORY LOG: linear undo/redo over snapshots
// ============================================================================

/// Ordered snapshots plus a cursor. Committing after an undo truncates the
/// redo tail; there is no branching.
#[derive(Default)]
pub struct HistoryLog {
    entries: Vec<HistorySnapshot>,
    cursor: usize,
    /// Drop oldest entries beyond this many. `None` keeps everything.
    limit: Option<usize>,
}

impl HistoryLog {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            limit: limit.map(|l| l.max(1)),
        }
    }

    pub fn commit(&mut self, snapshot: HistorySnapshot) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        log::debug!("history commit '{}' at {}", snapshot.label, self.entries.len());
        self.entries.push(snapshot);
        self.prune();
        self.cursor = self.entries.len() - 1;
    }

    /// Step back. Returns the snapshot to restore, or `None` at the start.
    pub fn undo(&mut self) -> Option<&HistorySnapshot> {
        if self.entries.is_empty() || self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    pub fn redo(&mut self) -> Option<&HistorySnapshot> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    /// Move the cursor straight to `index` (history panel click).
    pub fn jump_to(&mut self, index: usize) -> Option<&HistorySnapshot> {
        if index >= self.entries.len() || index == self.cursor {
            return None;
        }
        self.cursor = index;
        self.entries.get(index)
    }

    pub fn current(&self) -> Option<&HistorySnapshot> {
        self.entries.get(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Label of the action an undo would revert.
    pub fn undo_description(&self) -> Option<&str> {
        if self.can_undo() {
            self.entries.get(self.cursor).map(|s| s.label.as_str())
        } else {
            None
        }
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.cursor + 1).map(|s| s.label.as_str())
    }

    /// All labels, oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.label.as_str()).collect()
    }

    /// Pixel bytes across the whole log, counting shared buffers once.
    pub fn memory_usage(&self) -> usize {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|s| s.buffers())
            .filter(|b| seen.insert(Arc::as_ptr(b)))
            .map(|b| b.as_raw().len())
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    fn prune(&mut self) {
        if let Some(limit) = self.limit {
            let excess = self.entries.len().saturating_sub(limit);
            if excess > 0 {
                self.entries.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(label: &str) -> HistorySnapshot {
        HistorySnapshot {
            label: label.to_string(),
            image: Arc::new(RgbaImage::new(2, 2)),
            filters: FilterSet::IDENTITY,
            blend_image: None,
            blend_mode: BlendMode::Normal,
            blend_opacity: 50.0,
            text: TextOverlayState::default(),
            drawing: Vec::new(),
            overlay_image: None,
            overlay: OverlayState::default(),
        }
    }

    fn log_of(labels: &[&str]) -> HistoryLog {
        let mut h = HistoryLog::new(None);
        for l in labels {
            h.commit(snap(l));
        }
        h
    }

    #[test]
    fn commit_after_undo_truncates() {
        let mut h = log_of(&["A", "B", "C"]);
        assert_eq!(h.cursor(), 2);
        assert_eq!(h.undo().map(|s| s.label.clone()), Some("B".into()));
        assert_eq!(h.cursor(), 1);
        h.commit(snap("D"));
        assert_eq!(h.labels(), vec!["A", "B", "D"]);
        assert_eq!(h.cursor(), 2);
        assert!(!h.can_redo());
    }

    #[test]
    fn undo_then_redo_is_noop_for_interior_cursor() {
        let mut h = log_of(&["A", "B", "C", "D"]);
        h.undo();
        h.undo();
        let before = (h.cursor(), h.labels().join(","));
        h.undo();
        h.redo();
        assert_eq!((h.cursor(), h.labels().join(",")), before);
    }

    #[test]
    fn boundaries_are_noops() {
        let mut h = HistoryLog::new(None);
        assert!(h.undo().is_none());
        assert!(h.redo().is_none());
        h.commit(snap("A"));
        assert!(h.undo().is_none());
        assert_eq!(h.cursor(), 0);
        assert!(h.redo().is_none());
        assert_eq!(h.current().map(|s| s.label.as_str()), Some("A"));
    }

    #[test]
    fn descriptions_follow_cursor() {
        let mut h = log_of(&["Load Image", "Apply Filters"]);
        assert_eq!(h.undo_description(), Some("Apply Filters"));
        assert_eq!(h.redo_description(), None);
        h.undo();
        assert_eq!(h.undo_description(), None);
        assert_eq!(h.redo_description(), Some("Apply Filters"));
    }

    #[test]
    fn limit_drops_oldest() {
        let mut h = HistoryLog::new(Some(2));
        for l in ["A", "B", "C"] {
            h.commit(snap(l));
        }
        assert_eq!(h.labels(), vec!["B", "C"]);
        assert_eq!(h.cursor(), 1);
    }

    #[test]
    fn shared_buffers_counted_once() {
        let img = Arc::new(RgbaImage::new(10, 10));
        let mut a = snap("A");
        a.image = img.clone();
        let mut b = snap("B");
        b.image = img;
        let mut h = HistoryLog::new(None);
        h.commit(a);
        h.commit(b);
        assert_eq!(h.memory_usage(), 400);
    }

    #[test]
    fn jump_moves_cursor() {
        let mut h = log_of(&["A", "B", "C"]);
        assert_eq!(h.jump_to(0).map(|s| s.label.clone()), Some("A".into()));
        assert!(h.jump_to(7).is_none());
        assert_eq!(h.cursor(), 0);
    }
}
