//! Image upload validation and encoding helpers.
//!
//! Uploads are checked before any backend call: at most
//! [`MAX_IMAGE_BYTES`] and one of [`ALLOWED_MIME_TYPES`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;

use crate::error::{NoteError, Result};

/// 10 MiB upload ceiling.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// An image waiting to be stored by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing the MIME type from its extension.
    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("image")
            .to_string();
        let content_type = detect_content_type(&file_name).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Reject unsupported types and oversized payloads.
    pub fn validate(&self) -> Result<()> {
        if !ALLOWED_MIME_TYPES.contains(&self.content_type.as_str()) {
            return Err(NoteError::validation(format!(
                "Invalid file type '{}'. Please upload JPG, PNG, GIF, or WebP images.",
                self.content_type
            )));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(NoteError::validation(format!(
                "File too large ({} bytes). Please upload images smaller than 10MB.",
                self.bytes.len()
            )));
        }
        Ok(())
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

/// Generate an image id of the form `img_<millis>_<9 base36 chars>`.
pub fn generate_image_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("img_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// Split a `data:<mime>;base64,<payload>` URL into its MIME type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| NoteError::validation("not a data URL"))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| NoteError::validation("data URL is not base64 encoded"))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| NoteError::validation(format!("invalid base64 payload: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

/// Map a file extension to an image MIME type.
pub fn detect_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
