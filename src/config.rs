// ============================================================================
// EDITOR CONFIGURATION: settings.toml in the app data directory
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logger::{APP_DIR_NAME, data_dir};

pub const DEFAULT_API_URL: &str = "https://pixperfect-backend-3.onrender.com";
pub const API_URL_ENV: &str = "PIXPERFECT_API_URL";

/// Tunables for the editing pipeline and the remote store client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Longest side of the working buffer; larger inputs are scaled down.
    pub max_working_dimension: u32,
    /// Coalescing window for preview-surface renders while sliders move.
    pub preview_debounce_ms: u64,
    /// Minimum spacing between main-surface renders during drags.
    pub main_throttle_ms: u64,
    pub api_url: String,
    /// Oldest history entries are dropped beyond this many. `None` keeps all.
    pub history_limit: Option<usize>,
    pub brush_color: String,
    pub brush_size: f32,
    /// Viewport size assumed when the container reports zero width/height.
    pub container_fallback: (f32, f32),
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_working_dimension: 400,
            preview_debounce_ms: 50,
            main_throttle_ms: 16,
            api_url: DEFAULT_API_URL.to_string(),
            history_limit: None,
            brush_color: "#ff0000".to_string(),
            brush_size: 5.0,
            container_fallback: (800.0, 600.0),
        }
    }
}

impl EditorConfig {
    pub fn settings_path() -> PathBuf {
        data_dir().join(APP_DIR_NAME).join("settings.toml")
    }

    /// Load settings from disk (defaults if the file is missing or corrupt),
    /// then apply environment overrides.
    pub fn load() -> Self {
        let path = Self::settings_path();
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).unwrap_or_else(|e| {
                log::warn!("settings file {} is invalid ({}); using defaults", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        if let Ok(url) = std::env::var(API_URL_ENV)
            && !url.trim().is_empty()
        {
            cfg.api_url = url.trim().to_string();
        }
        cfg.sanitize();
        cfg
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut cfg: Self = toml::from_str(content)?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Best-effort save; failures are logged, never fatal.
    pub fn save(&self) {
        let path = Self::settings_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, self.to_toml()) {
            log::warn!("could not write settings to {}: {}", path.display(), e);
        }
    }

    fn sanitize(&mut self) {
        if self.max_working_dimension == 0 {
            self.max_working_dimension = 400;
        }
        if !(self.brush_size > 0.0) {
            self.brush_size = 5.0;
        }
        while self.api_url.ends_with('/') {
            self.api_url.pop();
        }
    }

    /// Debounce window in seconds (the session clock is `f64` seconds).
    pub fn preview_debounce_secs(&self) -> f64 {
        self.preview_debounce_ms as f64 / 1000.0
    }

    pub fn main_throttle_secs(&self) -> f64 {
        self.main_throttle_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let cfg = EditorConfig::from_toml("max_working_dimension = 512\napi_url = \"http://localhost:5001/\"\n")
            .expect("valid toml");
        assert_eq!(cfg.max_working_dimension, 512);
        assert_eq!(cfg.api_url, "http://localhost:5001");
        assert_eq!(cfg.preview_debounce_ms, 50);
        assert_eq!(cfg.main_throttle_ms, 16);
        assert_eq!(cfg.brush_color, "#ff0000");
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let cfg = EditorConfig::from_toml("max_working_dimension = 0").expect("valid toml");
        assert_eq!(cfg.max_working_dimension, 400);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut cfg = EditorConfig::default();
        cfg.history_limit = Some(30);
        let text = cfg.to_toml();
        assert_eq!(EditorConfig::from_toml(&text).expect("valid toml"), cfg);
    }

    #[test]
    fn timer_intervals_in_seconds() {
        let cfg = EditorConfig::default();
        assert!((cfg.preview_debounce_secs() - 0.05).abs() < 1e-9);
        assert!((cfg.main_throttle_secs() - 0.016).abs() < 1e-9);
    }
}
