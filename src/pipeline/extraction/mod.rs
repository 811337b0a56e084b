//! Extraction effect pipeline: stages a capture in object storage, calls the
//! extraction service, and reports discrete progress milestones on the way.

pub mod orchestrator;
pub mod types;

pub use orchestrator::*;
pub use types::*;

use thiserror::Error;

/// Every way an extraction call can fail. All variants are recoverable:
/// the flow offers retry or manual entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Capture is empty")]
    EmptyCapture,

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Extraction service error: {0}")]
    Remote(String),

    #[error("Extraction timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),
}

impl ExtractionError {
    /// Message shown to the user next to the retry / manual-entry choice.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyCapture => "The photo was empty. Please capture the receipt again.".into(),
            Self::Upload(_) => "We couldn't upload the receipt. Check your connection and retry.".into(),
            Self::Network(_) => "Network problem while reading the receipt. Please retry.".into(),
            Self::Remote(_) => "The receipt reader is having trouble. Retry or enter the details manually.".into(),
            Self::Timeout(_) => "Reading the receipt took too long. Retry or enter the details manually.".into(),
            Self::MalformedResponse(_) => "We couldn't make sense of this receipt. Enter the details manually.".into(),
        }
    }
}
