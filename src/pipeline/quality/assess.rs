use std::io::Cursor;

use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use super::format::{detect_format, dimensions_or_default, read_dimensions, ImageFormat};
use super::QualityError;
use crate::config::CaptureConfig;
use crate::models::{QualityAssessment, RawCapture, Recommendation};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Payload size that earns the full size score.
const SIZE_REFERENCE_BYTES: f32 = 1024.0 * 1024.0;

/// Size boosts: phone cameras rarely produce a readable receipt below 500 KB.
const SIZE_BOOST_MEDIUM_BYTES: usize = 500 * 1024;
const SIZE_BOOST_LARGE_BYTES: usize = 1024 * 1024;
const SIZE_BOOST: f32 = 0.15;
const SIZE_BASE_WEIGHT: f32 = 0.6;

/// Without pixels we can't rule out blur or glare, so never fully trust size.
const HEADER_ONLY_CAP: f32 = 0.9;

/// Blend weights once pixel sampling succeeded.
const WEIGHT_SIZE: f32 = 0.4;
const WEIGHT_BRIGHTNESS: f32 = 0.3;
const WEIGHT_CONTRAST: f32 = 0.3;

/// Ideal mean brightness for a paper receipt on a neutral surface.
const BRIGHTNESS_TARGET: f32 = 0.55;
const BRIGHTNESS_TOLERANCE: f32 = 0.45;

/// Sample variance at which contrast saturates (std dev of 64 levels).
const CONTRAST_REFERENCE_VARIANCE: f32 = 64.0 * 64.0;

/// Upper bound on sampled pixels, regardless of image size.
const MAX_SAMPLED_PIXELS: usize = 4096;

/// Largest header-declared frame decoded at full resolution.
const MAX_DECODE_PIXELS: u64 = 40_000_000;

/// Largest output of a reduced-scale JPEG decode.
const MAX_SCALED_DECODE_PIXELS: u64 = 4_000_000;

/// Smallest scale the JPEG decoder offers (1/8 per side).
const JPEG_MAX_DOWNSCALE: u32 = 8;

const DARK_BELOW: f32 = 0.25;
const BRIGHT_ABOVE: f32 = 0.85;
const LOW_CONTRAST_BELOW: f32 = 0.25;
const LOW_RESOLUTION_SHORT_SIDE: u32 = 600;
const SMALL_FILE_BYTES: usize = 100 * 1024;

pub mod suggestions {
    pub const TOO_DARK: &str = "Image is too dark: add light or turn on the flash";
    pub const TOO_BRIGHT: &str = "Image is too bright: avoid glare and direct light";
    pub const LOW_CONTRAST: &str = "Low contrast: place the receipt on a plain, darker surface";
    pub const LOW_RESOLUTION: &str = "Resolution is low: move closer so the receipt fills the frame";
    pub const SMALL_FILE: &str = "File is small: capture at a higher quality setting";
    pub const UNSUPPORTED_FORMAT: &str = "Use a JPEG or PNG photo of the receipt";
    pub const TOO_LARGE: &str = "File is too large: retake at a lower resolution";
    pub const EMPTY: &str = "No image data received: capture the receipt again";
    pub const GENERIC_RETAKE: &str =
        "Retake the photo in good lighting with the whole receipt in frame";
}

// ═══════════════════════════════════════════════════════════
// Service trait
// ═══════════════════════════════════════════════════════════

/// Scores a capture for OCR-readiness. Pure function over bytes.
pub trait QualityAssessor: Send + Sync {
    fn assess(&self, bytes: &[u8]) -> QualityAssessment;

    fn assess_capture(&self, capture: &RawCapture) -> QualityAssessment {
        self.assess(capture.bytes())
    }
}

// ═══════════════════════════════════════════════════════════
// HeuristicQualityGate
// ═══════════════════════════════════════════════════════════

/// Size + brightness + contrast heuristic.
///
/// Scoring:
/// 1. Size score: payload normalized against 1 MB, boosted at 500 KB and 1 MB,
///    capped at 0.9
/// 2. If the image decodes, blend in brightness and contrast from a pixel sample
/// 3. Below the rejection threshold → `retake` with at least one suggestion
#[derive(Debug, Clone)]
pub struct HeuristicQualityGate {
    rejection_threshold: f32,
    max_capture_bytes: usize,
}

impl HeuristicQualityGate {
    pub fn new(rejection_threshold: f32) -> Self {
        Self {
            rejection_threshold: rejection_threshold.clamp(0.0, 1.0),
            max_capture_bytes: CaptureConfig::default().max_capture_bytes,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            rejection_threshold: config.rejection_threshold,
            max_capture_bytes: config.max_capture_bytes,
        }
    }

    pub fn rejection_threshold(&self) -> f32 {
        self.rejection_threshold
    }

    fn check_bounds(&self, bytes: &[u8]) -> Result<(), QualityError> {
        if bytes.is_empty() {
            return Err(QualityError::Empty);
        }
        if bytes.len() > self.max_capture_bytes {
            return Err(QualityError::TooLarge {
                size_mb: bytes.len() as f64 / (1024.0 * 1024.0),
                max_mb: self.max_capture_bytes as f64 / (1024.0 * 1024.0),
            });
        }
        Ok(())
    }
}

impl Default for HeuristicQualityGate {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl QualityAssessor for HeuristicQualityGate {
    fn assess(&self, bytes: &[u8]) -> QualityAssessment {
        let format = detect_format(bytes);

        if let Err(e) = self.check_bounds(bytes) {
            debug!(error = %e, "Capture rejected before scoring");
            let suggestion = match e {
                QualityError::Empty => suggestions::EMPTY,
                _ => suggestions::TOO_LARGE,
            };
            return build_assessment(
                0.0,
                self.rejection_threshold,
                vec![suggestion.to_string()],
                format,
                (0, 0),
                None,
            );
        }

        let (width, height) = dimensions_or_default(bytes);
        let size = size_score(bytes.len());

        let sample = match sample_pixels(bytes) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!(error = %e, "Pixel sampling unavailable, scoring from size only");
                None
            }
        };

        let score = match &sample {
            Some(s) => {
                WEIGHT_SIZE * size
                    + WEIGHT_BRIGHTNESS * brightness_score(s.brightness)
                    + WEIGHT_CONTRAST * s.contrast
            }
            None => size,
        };

        let mut hints = Vec::new();
        if format == ImageFormat::Unsupported {
            hints.push(suggestions::UNSUPPORTED_FORMAT.to_string());
        }
        if let Some(s) = &sample {
            if s.brightness < DARK_BELOW {
                hints.push(suggestions::TOO_DARK.to_string());
            } else if s.brightness > BRIGHT_ABOVE {
                hints.push(suggestions::TOO_BRIGHT.to_string());
            }
            if s.contrast < LOW_CONTRAST_BELOW {
                hints.push(suggestions::LOW_CONTRAST.to_string());
            }
        } else if bytes.len() < SMALL_FILE_BYTES {
            hints.push(suggestions::SMALL_FILE.to_string());
        }
        if width.min(height) < LOW_RESOLUTION_SHORT_SIDE {
            hints.push(suggestions::LOW_RESOLUTION.to_string());
        }

        let assessment = build_assessment(
            score,
            self.rejection_threshold,
            hints,
            format,
            (width, height),
            sample,
        );

        debug!(
            score = assessment.score,
            recommendation = %assessment.recommendation,
            width,
            height,
            pixel_analysis = assessment.pixel_analysis,
            "Capture quality assessed"
        );

        assessment
    }
}

// ═══════════════════════════════════════════════════════════
// Decision rule
// ═══════════════════════════════════════════════════════════

/// Apply the rejection threshold to a score.
///
/// A `retake` always carries at least one suggestion.
pub fn decide(
    score: f32,
    rejection_threshold: f32,
    mut suggestions: Vec<String>,
) -> (Recommendation, Vec<String>) {
    let score = if score.is_finite() { score } else { 0.0 };
    if score < rejection_threshold {
        if suggestions.is_empty() {
            suggestions.push(self::suggestions::GENERIC_RETAKE.to_string());
        }
        (Recommendation::Retake, suggestions)
    } else {
        (Recommendation::Accept, suggestions)
    }
}

fn build_assessment(
    score: f32,
    rejection_threshold: f32,
    hints: Vec<String>,
    format: ImageFormat,
    (width, height): (u32, u32),
    sample: Option<PixelSample>,
) -> QualityAssessment {
    let score = if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (recommendation, suggestions) = decide(score, rejection_threshold, hints);
    QualityAssessment {
        score,
        recommendation,
        suggestions,
        width,
        height,
        detected_format: format.as_str().to_string(),
        brightness: sample.as_ref().map(|s| s.brightness),
        contrast: sample.as_ref().map(|s| s.contrast),
        pixel_analysis: sample.is_some(),
    }
}

// ═══════════════════════════════════════════════════════════
// Scoring components
// ═══════════════════════════════════════════════════════════

/// Size-only score in [0, 0.9].
pub fn size_score(len: usize) -> f32 {
    let mut score = (len as f32 / SIZE_REFERENCE_BYTES).min(1.0) * SIZE_BASE_WEIGHT;
    if len >= SIZE_BOOST_MEDIUM_BYTES {
        score += SIZE_BOOST;
    }
    if len >= SIZE_BOOST_LARGE_BYTES {
        score += SIZE_BOOST;
    }
    score.min(HEADER_ONLY_CAP)
}

/// 1.0 at the target brightness, falling to 0.0 at pure black or white.
fn brightness_score(brightness: f32) -> f32 {
    (1.0 - (brightness - BRIGHTNESS_TARGET).abs() / BRIGHTNESS_TOLERANCE).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
struct PixelSample {
    brightness: f32,
    contrast: f32,
}

/// Decode and sample channel bytes on a fixed stride.
fn sample_pixels(bytes: &[u8]) -> Result<PixelSample, QualityError> {
    let img = decode_within(bytes, MAX_DECODE_PIXELS, MAX_SCALED_DECODE_PIXELS)?;
    let (w, h) = img.dimensions();
    let rgb = img.to_rgb8();
    let raw = rgb.as_raw();

    let pixel_count = (w as usize) * (h as usize);
    if pixel_count == 0 {
        return Err(QualityError::Decode("image has no pixels".into()));
    }
    let stride = (pixel_count / MAX_SAMPLED_PIXELS).max(1);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0usize;
    for px in raw.chunks_exact(3).step_by(stride) {
        for &channel in px {
            let v = f64::from(channel);
            sum += v;
            sum_sq += v * v;
            n += 1;
        }
    }

    let mean = sum / n as f64;
    let variance = if n > 1 {
        ((sum_sq - n as f64 * mean * mean) / (n as f64 - 1.0)).max(0.0)
    } else {
        0.0
    };

    Ok(PixelSample {
        brightness: (mean / 255.0) as f32,
        contrast: (variance as f32 / CONTRAST_REFERENCE_VARIANCE).min(1.0),
    })
}

/// Decode only what the header promises fits the pixel budget.
///
/// The header is parsed before the decoder sees the payload, so a forged
/// frame size can't drive the allocation. JPEGs over `full_cap` are decoded
/// at 1/8 scale when that output fits `scaled_cap`; anything else over
/// budget is left to the header-only score.
fn decode_within(bytes: &[u8], full_cap: u64, scaled_cap: u64) -> Result<DynamicImage, QualityError> {
    let (width, height) = read_dimensions(bytes)?;
    if u64::from(width) * u64::from(height) <= full_cap {
        return image::load_from_memory(bytes).map_err(decode_error);
    }

    let over_budget = QualityError::PixelBudget { width, height };
    if detect_format(bytes) != ImageFormat::Jpeg {
        return Err(over_budget);
    }
    let scaled_w = width.div_ceil(JPEG_MAX_DOWNSCALE);
    let scaled_h = height.div_ceil(JPEG_MAX_DOWNSCALE);
    if u64::from(scaled_w) * u64::from(scaled_h) > scaled_cap {
        return Err(over_budget);
    }
    let (Ok(req_w), Ok(req_h)) = (u16::try_from(scaled_w), u16::try_from(scaled_h)) else {
        return Err(over_budget);
    };

    let mut decoder = JpegDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
    decoder.scale(req_w, req_h).map_err(decode_error)?;
    debug!(width, height, req_w, req_h, "Decoding oversized JPEG at reduced scale");
    DynamicImage::from_decoder(decoder).map_err(decode_error)
}

fn decode_error(e: image::ImageError) -> QualityError {
    QualityError::Decode(e.to_string())
}

// ═══════════════════════════════════════════════════════════
// Fixed-score assessor (tests and host overrides)
// ═══════════════════════════════════════════════════════════

/// Returns a predetermined score through the same decision rule.
#[derive(Debug, Clone)]
pub struct FixedScoreAssessor {
    pub score: f32,
    pub rejection_threshold: f32,
}

impl QualityAssessor for FixedScoreAssessor {
    fn assess(&self, bytes: &[u8]) -> QualityAssessment {
        let (width, height) = dimensions_or_default(bytes);
        build_assessment(
            self.score,
            self.rejection_threshold,
            Vec::new(),
            detect_format(bytes),
            (width, height),
            None,
        )
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
