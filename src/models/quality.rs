use serde::{Deserialize, Serialize};

use super::enums::Recommendation;

/// OCR-readiness verdict for one capture. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Heuristic score in [0, 1].
    pub score: f32,
    pub recommendation: Recommendation,
    /// Ordered, most important first. Never empty when `recommendation` is `Retake`.
    pub suggestions: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub detected_format: String,
    /// Mean sampled channel value in [0, 1]; `None` without pixel analysis.
    pub brightness: Option<f32>,
    /// Sample variance normalized against the reference spread; `None` without pixel analysis.
    pub contrast: Option<f32>,
    pub pixel_analysis: bool,
}

impl QualityAssessment {
    pub fn is_accepted(&self) -> bool {
        self.recommendation == Recommendation::Accept
    }

    /// First suggestion, used as the user-facing quality issue.
    pub fn primary_issue(&self) -> Option<&str> {
        self.suggestions.first().map(String::as_str)
    }
}
