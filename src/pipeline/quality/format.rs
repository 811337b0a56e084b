use serde::{Deserialize, Serialize};

use super::QualityError;

/// Container formats we recognize from magic bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Heic,
    Pdf,
    Unsupported,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Heic => "heic",
            Self::Pdf => "pdf",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Heic => "image/heic",
            Self::Pdf => "application/pdf",
            Self::Unsupported => "application/octet-stream",
        }
    }

    /// Formats the extraction service accepts as a photo.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Heic)
    }
}

/// Used when the header can't be parsed. Typical phone capture, landscape.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (1920, 1080);

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Detect format from magic bytes (NOT the declared media type).
pub fn detect_format(bytes: &[u8]) -> ImageFormat {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => ImageFormat::Jpeg,
        [0x89, 0x50, 0x4E, 0x47, ..] => ImageFormat::Png,
        [0x25, 0x50, 0x44, 0x46, ..] => ImageFormat::Pdf,
        // HEIC/HEIF: "ftyp" box at offset 4
        _ if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" => ImageFormat::Heic,
        _ => ImageFormat::Unsupported,
    }
}

/// Width and height from the container header, without decoding pixels.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), QualityError> {
    match detect_format(bytes) {
        ImageFormat::Jpeg => jpeg_dimensions(bytes),
        ImageFormat::Png => png_dimensions(bytes),
        other => Err(QualityError::Header(format!(
            "no dimension parser for {}",
            other.as_str()
        ))),
    }
}

/// Like [`read_dimensions`], but degrades to [`DEFAULT_DIMENSIONS`].
pub fn dimensions_or_default(bytes: &[u8]) -> (u32, u32) {
    match read_dimensions(bytes) {
        Ok(dims) => dims,
        Err(e) => {
            tracing::debug!(error = %e, "Falling back to default capture dimensions");
            DEFAULT_DIMENSIONS
        }
    }
}

/// Scan JPEG segments for a start-of-frame marker.
///
/// Segment layout after the marker byte: length (2), precision (1),
/// height (2), width (2).
fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32), QualityError> {
    let mut i = 2; // skip SOI
    while i < bytes.len() {
        if bytes[i] != 0xFF {
            return Err(QualityError::Header(format!(
                "expected marker at offset {i}"
            )));
        }
        // Fill bytes: any number of 0xFF before the marker code
        while i < bytes.len() && bytes[i] == 0xFF {
            i += 1;
        }
        let marker = *bytes
            .get(i)
            .ok_or_else(|| QualityError::Header("truncated marker".into()))?;

        match marker {
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD8 => {
                i += 1;
                continue;
            }
            0xD9 | 0xDA => {
                return Err(QualityError::Header(
                    "reached scan data before a frame header".into(),
                ))
            }
            // SOF0..SOF15, minus DHT (C4), JPG (C8) and DAC (CC)
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = read_u16_be(bytes, i + 4)?;
                let width = read_u16_be(bytes, i + 6)?;
                if width == 0 || height == 0 {
                    return Err(QualityError::Header("zero-sized frame".into()));
                }
                return Ok((u32::from(width), u32::from(height)));
            }
            _ => {
                let len = read_u16_be(bytes, i + 1)? as usize;
                if len < 2 {
                    return Err(QualityError::Header(format!(
                        "invalid segment length {len}"
                    )));
                }
                i += 1 + len;
            }
        }
    }
    Err(QualityError::Header("no frame header found".into()))
}

/// IHDR is always the first chunk: signature (8), length (4), type (4), width (4), height (4).
fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32), QualityError> {
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE {
        return Err(QualityError::Header("truncated PNG header".into()));
    }
    if &bytes[12..16] != b"IHDR" {
        return Err(QualityError::Header("first chunk is not IHDR".into()));
    }
    let width = read_u32_be(bytes, 16)?;
    let height = read_u32_be(bytes, 20)?;
    if width == 0 || height == 0 {
        return Err(QualityError::Header("zero-sized image".into()));
    }
    Ok((width, height))
}

fn read_u16_be(bytes: &[u8], at: usize) -> Result<u16, QualityError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| QualityError::Header(format!("truncated at offset {at}")))
}

fn read_u32_be(bytes: &[u8], at: usize) -> Result<u32, QualityError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| QualityError::Header(format!("truncated at offset {at}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal JPEG: SOI, an APP0 segment, then SOF0 with the given size.
    fn jpeg_header(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        // APP0, length 16
        bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        bytes.extend_from_slice(b"JFIF\0");
        bytes.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
        // SOF0, length 17, precision 8
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        bytes
    }

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
        bytes
    }

    #[test]
    fn detect_formats_from_magic_bytes() {
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(detect_format(&png_header(1, 1)), ImageFormat::Png);
        assert_eq!(detect_format(b"%PDF-1.7"), ImageFormat::Pdf);
        assert_eq!(
            detect_format(b"\x00\x00\x00\x18ftypheic"),
            ImageFormat::Heic
        );
        assert_eq!(detect_format(b"hello"), ImageFormat::Unsupported);
        assert_eq!(detect_format(&[]), ImageFormat::Unsupported);
    }

    #[test]
    fn jpeg_dimensions_from_sof0() {
        assert_eq!(read_dimensions(&jpeg_header(3024, 4032)).unwrap(), (3024, 4032));
    }

    #[test]
    fn jpeg_progressive_sof2_recognized() {
        let mut bytes = jpeg_header(640, 480);
        let sof = bytes.iter().position(|&b| b == 0xC0).unwrap();
        bytes[sof] = 0xC2;
        assert_eq!(read_dimensions(&bytes).unwrap(), (640, 480));
    }

    #[test]
    fn png_dimensions_from_ihdr() {
        assert_eq!(read_dimensions(&png_header(1200, 1600)).unwrap(), (1200, 1600));
    }

    #[test]
    fn truncated_jpeg_falls_back_to_default() {
        let bytes = jpeg_header(800, 600);
        let truncated = &bytes[..bytes.len() - 14];
        assert!(read_dimensions(truncated).is_err());
        assert_eq!(dimensions_or_default(truncated), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn jpeg_without_frame_header_errors() {
        // SOI then straight into SOS
        let bytes = [0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x08];
        assert!(matches!(read_dimensions(&bytes), Err(QualityError::Header(_))));
    }

    #[test]
    fn unrecognized_header_uses_default() {
        assert_eq!(dimensions_or_default(b"not an image"), DEFAULT_DIMENSIONS);
        assert_eq!(dimensions_or_default(b"%PDF-1.4 ..."), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn png_with_wrong_first_chunk_errors() {
        let mut bytes = png_header(10, 10);
        bytes[12..16].copy_from_slice(b"gAMA");
        assert!(read_dimensions(&bytes).is_err());
    }

    #[test]
    fn mime_types() {
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
        assert!(ImageFormat::Heic.is_image());
        assert!(!ImageFormat::Pdf.is_image());
    }
}
