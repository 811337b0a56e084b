//! Quality gate: decides whether a capture is readable enough to send for
//! extraction, or whether the user should retake it.

pub mod assess;
pub mod format;

pub use assess::*;
pub use format::*;

use thiserror::Error;

/// Problems found while inspecting a capture.
///
/// Never fatal to the flow: the gate turns every variant into a `retake`
/// assessment or a degraded (header-only) score.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityError {
    #[error("Capture is empty")]
    Empty,

    #[error("Capture too large: {size_mb:.1}MB exceeds {max_mb:.1}MB limit")]
    TooLarge { size_mb: f64, max_mb: f64 },

    #[error("Unrecognized image header: {0}")]
    Header(String),

    #[error("Frame of {width}x{height} exceeds the pixel decode budget")]
    PixelBudget { width: u32, height: u32 },

    #[error("Image decoding failed: {0}")]
    Decode(String),
}
