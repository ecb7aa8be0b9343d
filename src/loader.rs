// ============================================================================
// ASYNC IMAGE LOADER: background decode with version-tagged results
// ============================================================================

use image::RgbaImage;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::{EditorError, EditorResult};
use crate::ops::resize::{Interpolation, normalize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadSlot {
    Base,
    Blend,
    Overlay,
}

impl LoadSlot {
    fn index(self) -> usize {
        match self {
            LoadSlot::Base => 0,
            LoadSlot::Blend => 1,
            LoadSlot::Overlay => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LoadSlot::Base => "image",
            LoadSlot::Blend => "blend image",
            LoadSlot::Overlay => "overlay image",
        }
    }
}

/// Result delivered from a background decode.
pub struct LoadResult {
    pub slot: LoadSlot,
    /// Version the request was issued with; only the newest per slot is kept.
    pub version: u64,
    /// Decoded and normalized to the working resolution.
    pub image: EditorResult<RgbaImage>,
}

pub struct ImageLoader {
    sender: mpsc::Sender<LoadResult>,
    receiver: mpsc::Receiver<LoadResult>,
    next_version: u64,
    /// Newest version issued per slot; 0 = nothing outstanding.
    latest: [u64; 3],
    max_dim: u32,
}

impl ImageLoader {
    pub fn new(max_dim: u32) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            next_version: 1,
            latest: [0; 3],
            max_dim,
        }
    }

    /// Decode `bytes` on the rayon pool. Any earlier request for the same
    /// slot becomes stale.
    pub fn spawn(&mut self, slot: LoadSlot, bytes: Vec<u8>) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        self.latest[slot.index()] = version;

        let sender = self.sender.clone();
        let max_dim = self.max_dim;
        rayon::spawn(move || {
            let image = crate::io::decode_bytes(&bytes)
                .map(|img| normalize(img, max_dim, Interpolation::Bilinear))
                .map_err(|e| {
                    EditorError::LoadFailure(format!("Failed to load {}: {}", slot.label(), e.message()))
                });
            let _ = sender.send(LoadResult { slot, version, image });
        });
        version
    }

    /// True if `result` is the newest outstanding request for its slot.
    pub fn accept(&self, result: &LoadResult) -> bool {
        self.latest[result.slot.index()] == result.version
    }

    /// Forget outstanding requests for a slot; their results will be dropped.
    pub fn cancel(&mut self, slot: LoadSlot) {
        self.latest[slot.index()] = 0;
    }

    pub fn cancel_all(&mut self) {
        self.latest = [0; 3];
    }

    pub fn is_pending(&self, slot: LoadSlot) -> bool {
        self.latest[slot.index()] != 0
    }

    pub fn any_pending(&self) -> bool {
        self.latest.iter().any(|&v| v != 0)
    }

    fn take_if_fresh(&mut self, result: LoadResult) -> Option<LoadResult> {
        if self.accept(&result) {
            self.latest[result.slot.index()] = 0;
            Some(result)
        } else {
            log::debug!(
                "discarding stale {} load (version {})",
                result.slot.label(),
                result.version
            );
            None
        }
    }

    /// Non-blocking: drain finished decodes, newest-per-slot only.
    pub fn poll(&mut self) -> Vec<LoadResult> {
        let mut fresh = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            if let Some(r) = self.take_if_fresh(result) {
                fresh.push(r);
            }
        }
        fresh
    }

    /// Block until a fresh result arrives or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.receiver.recv_timeout(remaining) {
                Ok(result) => {
                    if let Some(r) = self.take_if_fresh(result) {
                        return Some(r);
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        crate::io::encode_png(&RgbaImage::from_pixel(w, h, Rgba([9, 8, 7, 255]))).unwrap()
    }

    #[test]
    fn decodes_and_normalizes() {
        let mut loader = ImageLoader::new(400);
        loader.spawn(LoadSlot::Base, png_bytes(800, 400));
        let r = loader.wait(Duration::from_secs(10)).expect("decode result");
        assert_eq!(r.slot, LoadSlot::Base);
        assert_eq!(r.image.unwrap().dimensions(), (400, 200));
        assert!(!loader.is_pending(LoadSlot::Base));
    }

    #[test]
    fn stale_blend_load_is_discarded() {
        let mut loader = ImageLoader::new(400);
        let first = loader.spawn(LoadSlot::Blend, png_bytes(10, 10));
        let second = loader.spawn(LoadSlot::Blend, png_bytes(20, 20));
        assert!(second > first);
        let r = loader.wait(Duration::from_secs(10)).expect("fresh result");
        assert_eq!(r.version, second);
        assert_eq!(r.image.unwrap().dimensions(), (20, 20));
        assert!(loader.wait(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn cancelled_load_never_arrives() {
        let mut loader = ImageLoader::new(400);
        loader.spawn(LoadSlot::Overlay, png_bytes(4, 4));
        loader.cancel(LoadSlot::Overlay);
        assert!(loader.wait(Duration::from_millis(300)).is_none());
    }

    #[test]
    fn bad_bytes_report_load_failure() {
        let mut loader = ImageLoader::new(400);
        loader.spawn(LoadSlot::Base, b"nope".to_vec());
        let r = loader.wait(Duration::from_secs(10)).expect("result");
        assert!(matches!(r.image, Err(EditorError::LoadFailure(_))));
    }

    #[test]
    fn slots_are_independent() {
        let mut loader = ImageLoader::new(400);
        loader.spawn(LoadSlot::Base, png_bytes(3, 3));
        loader.spawn(LoadSlot::Blend, png_bytes(5, 5));
        let mut slots = Vec::new();
        while let Some(r) = loader.wait(Duration::from_secs(10)) {
            slots.push(r.slot);
            if slots.len() == 2 {
                break;
            }
        }
        slots.sort_by_key(|s| s.index());
        assert_eq!(slots, vec![LoadSlot::Base, LoadSlot::Blend]);
    }
}
