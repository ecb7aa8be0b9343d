// ============================================================================
// REMOTE STORE CLIENT: login, list, fetch, upload and delete images
// ============================================================================
//
// Blocking HTTP; the GUI calls this from a background thread. The bearer
// token lives in an explicit `SessionContext`, never in a global.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{EditorError, EditorResult};
use crate::io::DEFAULT_EXPORT_NAME;

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
const LOGIN_REQUIRED_MESSAGE: &str = "Please login first";

/// Base URL plus the bearer token of the signed-in user, if any.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    base_url: String,
    token: Option<String>,
}

impl SessionContext {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn clear_token(&mut self) {
        if self.token.take().is_some() {
            log::info!("bearer token cleared");
        }
    }

    /// Join a server path onto the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn require_token(&self) -> EditorResult<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| EditorError::AuthFailure(LOGIN_REQUIRED_MESSAGE.into()))
    }
}

/// Server ids come back as numbers or strings depending on the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// One stored image. The overlay/text fields are JSON strings that seed
/// the editor when the record is opened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: RecordId,
    pub image_path: String,
    #[serde(default)]
    pub overlay_props: Option<String>,
    #[serde(default)]
    pub text_overlay: Option<String>,
}

#[derive(Deserialize)]
struct TokenReply {
    token: String,
}

#[derive(Deserialize, Default)]
struct MessageReply {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Which call failed; picks the fallback message for a bare status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Signup,
    List,
    Delete,
    Upload,
    Fetch,
}

impl Endpoint {
    fn fallback(self, status: u16) -> &'static str {
        match (self, status) {
            (Endpoint::Login, 401) => "Invalid username or password",
            (_, 401) => SESSION_EXPIRED_MESSAGE,
            (Endpoint::Signup, 400) => "Username already exists",
            (Endpoint::Upload, 400) => "Invalid image file.",
            (Endpoint::Login, _) => "Login failed. Check backend status.",
            (Endpoint::Signup, _) => "Signup failed. Check backend status.",
            (Endpoint::List, _) => "Failed to fetch images. Check backend status.",
            (Endpoint::Delete, _) => "Failed to delete image.",
            (Endpoint::Upload, _) => "Failed to save image.",
            (Endpoint::Fetch, _) => "Failed to load image.",
        }
    }
}

/// Map a non-success reply to an error. A 401 clears the token.
pub fn classify_failure(ctx: &mut SessionContext, endpoint: Endpoint, status: u16, body: &str) -> EditorError {
    let message = serde_json::from_str::<ErrorReply>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| endpoint.fallback(status).to_string());
    if status == 401 {
        ctx.clear_token();
        EditorError::AuthFailure(message)
    } else {
        EditorError::NetworkFailure(message)
    }
}

/// Client-side checks made before any login or signup request.
pub fn validate_credentials(username: &str, password: &str) -> EditorResult<()> {
    if username.chars().count() < 3 {
        return Err(EditorError::AuthFailure(
            "Username must be at least 3 characters long".into(),
        ));
    }
    if password.chars().count() < 6 {
        return Err(EditorError::AuthFailure(
            "Password must be at least 6 characters long".into(),
        ));
    }
    Ok(())
}

pub struct RemoteStore {
    client: Client,
}

impl RemoteStore {
    pub fn new() -> EditorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("pixperfect/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn send(&self, ctx: &mut SessionContext, endpoint: Endpoint, req: RequestBuilder) -> EditorResult<reqwest::blocking::Response> {
        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        let err = classify_failure(ctx, endpoint, status.as_u16(), &body);
        log::warn!("{:?} request failed with {}: {}", endpoint, status, err);
        Err(err)
    }

    fn authed(&self, ctx: &SessionContext, req: RequestBuilder) -> EditorResult<RequestBuilder> {
        Ok(req.bearer_auth(ctx.require_token()?))
    }

    pub fn login(&self, ctx: &mut SessionContext, username: &str, password: &str) -> EditorResult<()> {
        validate_credentials(username, password)?;
        let req = self
            .client
            .post(ctx.url("/login"))
            .json(&Credentials { username, password });
        let reply: TokenReply = self.send(ctx, Endpoint::Login, req)?.json()?;
        ctx.set_token(reply.token);
        log::info!("logged in as {}", username);
        Ok(())
    }

    /// Create an account. Returns the server's message.
    pub fn signup(&self, ctx: &mut SessionContext, username: &str, password: &str) -> EditorResult<String> {
        validate_credentials(username, password)?;
        let req = self
            .client
            .post(ctx.url("/signup"))
            .json(&Credentials { username, password });
        let reply: MessageReply = self.send(ctx, Endpoint::Signup, req)?.json().unwrap_or_default();
        // A new account still has to log in.
        ctx.clear_token();
        Ok(reply
            .message
            .unwrap_or_else(|| "Signup successful! Please log in.".to_string()))
    }

    pub fn list_images(&self, ctx: &mut SessionContext) -> EditorResult<Vec<ImageRecord>> {
        let req = self.authed(ctx, self.client.get(ctx.url("/images")))?;
        let records: Vec<ImageRecord> = self.send(ctx, Endpoint::List, req)?.json()?;
        log::debug!("listed {} remote images", records.len());
        Ok(records)
    }

    pub fn delete_image(&self, ctx: &mut SessionContext, id: &RecordId) -> EditorResult<()> {
        let req = self.authed(ctx, self.client.delete(ctx.url(&format!("/image/{}", id))))?;
        self.send(ctx, Endpoint::Delete, req)?;
        log::info!("deleted remote image {}", id);
        Ok(())
    }

    /// Store a PNG with the overlay/text state that produced it.
    pub fn upload(
        &self,
        ctx: &mut SessionContext,
        png: Vec<u8>,
        overlay_props: Option<String>,
        text_overlay: Option<String>,
    ) -> EditorResult<String> {
        let part = multipart::Part::bytes(png)
            .file_name(DEFAULT_EXPORT_NAME)
            .mime_str("image/png")?;
        let mut form = multipart::Form::new().part("image", part);
        if let Some(json) = overlay_props {
            form = form.text("overlayProps", json);
        }
        if let Some(json) = text_overlay {
            form = form.text("textOverlay", json);
        }
        let req = self.authed(ctx, self.client.post(ctx.url("/upload")).multipart(form))?;
        let reply: MessageReply = self.send(ctx, Endpoint::Upload, req)?.json().unwrap_or_default();
        Ok(reply
            .message
            .unwrap_or_else(|| "Image uploaded successfully!".to_string()))
    }

    /// Download a record's image bytes.
    pub fn fetch_image_bytes(&self, ctx: &mut SessionContext, record: &ImageRecord) -> EditorResult<Vec<u8>> {
        let mut req = self.client.get(ctx.url(&record.image_path));
        if let Some(token) = ctx.token() {
            req = req.bearer_auth(token);
        }
        let resp = self.send(ctx, Endpoint::Fetch, req)?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Err(EditorError::LoadFailure("Stored image is empty.".into()));
        }
        Ok(resp.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_clears_token() {
        let mut ctx = SessionContext::new("http://localhost:5001/").with_token("abc");
        let err = classify_failure(&mut ctx, Endpoint::List, 401, "");
        assert_eq!(err, EditorError::AuthFailure(SESSION_EXPIRED_MESSAGE.into()));
        assert!(!ctx.is_authenticated());
    }

    #[test]
    fn error_body_message_wins() {
        let mut ctx = SessionContext::new("http://x").with_token("abc");
        let err = classify_failure(&mut ctx, Endpoint::Upload, 500, r#"{"error":"Disk full"}"#);
        assert_eq!(err, EditorError::NetworkFailure("Disk full".into()));
        assert!(ctx.is_authenticated());

        let err = classify_failure(&mut ctx, Endpoint::Signup, 400, "<html>");
        assert_eq!(err.message(), "Username already exists");
        let err = classify_failure(&mut ctx, Endpoint::Login, 401, "");
        assert_eq!(err.message(), "Invalid username or password");
        assert!(err.is_auth());
    }

    #[test]
    fn credentials_are_validated_locally() {
        assert!(validate_credentials("al", "secret1").unwrap_err().is_auth());
        assert_eq!(
            validate_credentials("alice", "12345").unwrap_err().message(),
            "Password must be at least 6 characters long"
        );
        assert!(validate_credentials("alice", "123456").is_ok());
    }

    #[test]
    fn urls_join_cleanly() {
        let ctx = SessionContext::new("https://api.example.com/");
        assert_eq!(ctx.url("/images"), "https://api.example.com/images");
        assert_eq!(ctx.url("uploads/a.png"), "https://api.example.com/uploads/a.png");
        assert_eq!(ctx.url("https://cdn.example.com/a.png"), "https://cdn.example.com/a.png");
    }

    #[test]
    fn records_accept_numeric_and_string_ids() {
        let json = r#"[
            {"id": 7, "imagePath": "/uploads/7.png", "overlayProps": "{\"x\":10}"},
            {"id": "b2", "imagePath": "/uploads/b2.png"}
        ]"#;
        let records: Vec<ImageRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].id.to_string(), "7");
        assert_eq!(records[0].overlay_props.as_deref(), Some("{\"x\":10}"));
        assert_eq!(records[1].id, RecordId::Text("b2".into()));
        assert!(records[1].text_overlay.is_none());
    }

    #[test]
    fn calls_without_token_fail_before_sending() {
        let store = RemoteStore::new().unwrap();
        let mut ctx = SessionContext::new("http://127.0.0.1:9");
        let err = store.list_images(&mut ctx).unwrap_err();
        assert_eq!(err, EditorError::AuthFailure(LOGIN_REQUIRED_MESSAGE.into()));
    }
}
