use serde::{Deserialize, Serialize};

use crate::models::{AllocationSet, ExtractionResult, FlowStage, ProcessingStage, RecoveryStage};
use crate::pipeline::duplicate::DuplicateCheck;

/// Extraction progress as last reported by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub active: bool,
    pub stage: Option<ProcessingStage>,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
}

impl ProcessingState {
    pub fn started() -> Self {
        Self {
            active: true,
            stage: Some(ProcessingStage::Upload),
            progress: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiFlags {
    pub show_success: bool,
    pub show_draft_saved: bool,
    pub camera_capture_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowErrors {
    pub quality_issue: Option<String>,
    /// All retake suggestions from the last rejected capture, most important first.
    #[serde(default)]
    pub quality_suggestions: Vec<String>,
    pub duplicate_check: Option<DuplicateCheck>,
    pub recovery_stage: Option<RecoveryStage>,
    #[serde(default)]
    pub submit_error: Option<String>,
}

/// The one mutable root of a capture session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub stage: FlowStage,
    pub processing: ProcessingState,
    pub ui: UiFlags,
    pub errors: FlowErrors,
    pub extraction: Option<ExtractionResult>,
    /// Present from `reviewing` until submission or reset.
    pub allocations: Option<AllocationSet>,
}

impl FlowState {
    pub fn at(stage: FlowStage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Total the allocations must reconcile to, once one is known.
    pub fn target_total(&self) -> Option<f64> {
        self.allocations
            .as_ref()
            .map(|a| a.target_total)
            .or_else(|| self.extraction.as_ref().map(|e| e.total))
    }

    pub fn recovery_stage(&self) -> Option<RecoveryStage> {
        match self.stage {
            FlowStage::ErrorRecovery => self.errors.recovery_stage,
            _ => None,
        }
    }
}
