use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Encoded image bytes plus their mime type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = mime_for_path(path).unwrap_or(DEFAULT_MIME_TYPE);
        Ok(Self::new(mime, bytes))
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    ///
    /// A bare base64 payload without header is read as PNG.
    pub fn from_data_url(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("empty image payload");
        }
        let (mime_type, payload) = match trimmed.strip_prefix("data:") {
            Some(rest) => {
                let Some((header, payload)) = rest.split_once(',') else {
                    bail!("data url missing ',' separator");
                };
                let Some(mime) = header.strip_suffix(";base64") else {
                    bail!("only base64 data urls are supported");
                };
                let mime = if mime.is_empty() {
                    DEFAULT_MIME_TYPE
                } else {
                    mime
                };
                (mime.to_string(), payload)
            }
            None => (DEFAULT_MIME_TYPE.to_string(), trimmed),
        };
        let bytes = BASE64
            .decode(payload.as_bytes())
            .context("image base64 decode failed")?;
        Ok(Self { mime_type, bytes })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        "png"
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
