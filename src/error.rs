// ============================================================================
// ERROR TAXONOMY: every failure the editor can surface to the user
// ============================================================================

use thiserror::Error;

/// Every failure path in the editor maps to exactly one of these kinds.
/// The payload is the user-facing message shown in the error banner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    /// An image (base, blend or overlay) could not be read or decoded.
    #[error("{0}")]
    LoadFailure(String),
    /// A render target or local resource is unavailable.
    #[error("{0}")]
    ConfigFailure(String),
    /// A tool was used without its preconditions (crop without region,
    /// transform already in flight, worker unavailable).
    #[error("{0}")]
    ToolFailure(String),
    /// Missing or expired bearer token, or rejected credentials.
    #[error("{0}")]
    AuthFailure(String),
    /// Remote store unreachable or answered with a non-2xx status.
    #[error("{0}")]
    NetworkFailure(String),
}

impl EditorError {
    pub fn kind(&self) -> &'static str {
        match self {
            EditorError::LoadFailure(_) => "load",
            EditorError::ConfigFailure(_) => "config",
            EditorError::ToolFailure(_) => "tool",
            EditorError::AuthFailure(_) => "auth",
            EditorError::NetworkFailure(_) => "network",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EditorError::LoadFailure(m)
            | EditorError::ConfigFailure(m)
            | EditorError::ToolFailure(m)
            | EditorError::AuthFailure(m)
            | EditorError::NetworkFailure(m) => m,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, EditorError::AuthFailure(_))
    }
}

impl From<image::ImageError> for EditorError {
    fn from(e: image::ImageError) -> Self {
        EditorError::LoadFailure(format!("Failed to decode image: {}", e))
    }
}

impl From<std::io::Error> for EditorError {
    fn from(e: std::io::Error) -> Self {
        EditorError::ConfigFailure(format!("I/O error: {}", e))
    }
}

impl From<base64::DecodeError> for EditorError {
    fn from(e: base64::DecodeError) -> Self {
        EditorError::LoadFailure(format!("Invalid data URL payload: {}", e))
    }
}

impl From<serde_json::Error> for EditorError {
    fn from(e: serde_json::Error) -> Self {
        EditorError::LoadFailure(format!("Invalid JSON: {}", e))
    }
}

impl From<reqwest::Error> for EditorError {
    fn from(e: reqwest::Error) -> Self {
        EditorError::NetworkFailure(format!("Remote store unreachable: {}", e))
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
