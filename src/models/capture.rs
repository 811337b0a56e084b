use std::fmt;
use std::path::Path;

use base64::Engine;

use crate::pipeline::quality::format::{detect_format, ImageFormat};

/// A photographed or uploaded expense document, held in memory only.
///
/// Deliberately not `Serialize`: raw bytes never reach the draft store.
#[derive(Clone)]
pub struct RawCapture {
    bytes: Vec<u8>,
    media_type: String,
    preview: Option<String>,
}

impl RawCapture {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
            preview: None,
        }
    }

    /// Read a capture from disk.
    ///
    /// The media type is guessed from the extension first, then replaced by
    /// the magic-byte detection when the header is recognized (extensions lie).
    pub fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = std::fs::read(path)?;
        let guessed = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let media_type = match detect_format(&bytes) {
            ImageFormat::Unsupported => guessed,
            format => format.mime_type().to_string(),
        };

        tracing::debug!(
            path = %path.display(),
            size = bytes.len(),
            media_type = %media_type,
            "Capture loaded from disk"
        );

        Ok(Self::new(bytes, media_type))
    }

    /// Attach a base64 preview of the capture itself.
    pub fn with_preview(mut self) -> Self {
        self.preview = Some(base64::engine::general_purpose::STANDARD.encode(&self.bytes));
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    /// Preview as a `data:` URL, ready for an <img> tag.
    pub fn preview_data_url(&self) -> Option<String> {
        self.preview
            .as_ref()
            .map(|encoded| format!("data:{};base64,{}", self.media_type, encoded))
    }

    /// File extension for staging the capture in object storage.
    pub fn extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/heic" => "heic",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }
}

impl fmt::Debug for RawCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCapture")
            .field("len", &self.bytes.len())
            .field("media_type", &self.media_type)
            .field("has_preview", &self.preview.is_some())
            .finish()
    }
}
