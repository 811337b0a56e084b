use crate::models::{AllocationSet, ExtractionResult, FlowStage, ProcessingStage, QualityAssessment};
use crate::pipeline::duplicate::DuplicateCheck;
use crate::pipeline::extraction::ExtractionError;

use FlowStage::*;

/// Everything that can happen to a flow. Extraction events carry the
/// generation they were started under.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    StartCapture,
    /// A capture went through the quality gate; the recommendation picks the edge.
    CaptureAssessed { assessment: QualityAssessment },
    ExtractionProgress {
        generation: u64,
        stage: ProcessingStage,
        progress: u8,
    },
    ExtractionSucceeded {
        generation: u64,
        result: ExtractionResult,
    },
    ExtractionFailed {
        generation: u64,
        error: ExtractionError,
    },
    Retry,
    EnterManually { total: f64 },
    AllocationsChanged(AllocationSet),
    DuplicateChecked(DuplicateCheck),
    CameraToggled(bool),
    Submit,
    SubmitSucceeded,
    SubmitFailed { message: String },
    Reset,
    Cancel,
    DraftSaved,
    DismissSuccess,
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartCapture => "start_capture",
            Self::CaptureAssessed { .. } => "capture_assessed",
            Self::ExtractionProgress { .. } => "extraction_progress",
            Self::ExtractionSucceeded { .. } => "extraction_succeeded",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::Retry => "retry",
            Self::EnterManually { .. } => "enter_manually",
            Self::AllocationsChanged(_) => "allocations_changed",
            Self::DuplicateChecked(_) => "duplicate_checked",
            Self::CameraToggled(_) => "camera_toggled",
            Self::Submit => "submit",
            Self::SubmitSucceeded => "submit_succeeded",
            Self::SubmitFailed { .. } => "submit_failed",
            Self::Reset => "reset",
            Self::Cancel => "cancel",
            Self::DraftSaved => "draft_saved",
            Self::DismissSuccess => "dismiss_success",
        }
    }

    /// Generation tag for extraction events.
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::ExtractionProgress { generation, .. }
            | Self::ExtractionSucceeded { generation, .. }
            | Self::ExtractionFailed { generation, .. } => Some(*generation),
            _ => None,
        }
    }
}

/// Where an event takes a flow from a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    To(FlowStage),
    /// Legal, but only non-stage fields change.
    Stay,
    Illegal,
}

/// Every stage change the controller can make.
pub const EDGES: &[(FlowStage, FlowStage)] = &[
    (Idle, Capturing),
    (Capturing, Processing),
    (Capturing, ErrorRecovery),
    (Processing, Reviewing),
    (Processing, ErrorRecovery),
    (ErrorRecovery, Capturing),
    (ErrorRecovery, Reviewing),
    (Reviewing, Submitting),
    (Submitting, Complete),
    (Submitting, Reviewing),
    (Complete, Idle),
    (Capturing, Idle),
    (Processing, Idle),
    (ErrorRecovery, Idle),
    (Reviewing, Idle),
    (Submitting, Idle),
];

/// The transition table. Anything not listed here is illegal.
pub fn route(from: FlowStage, event: &FlowEvent) -> Route {
    match (from, event) {
        (Idle, FlowEvent::StartCapture) => Route::To(Capturing),

        (Capturing, FlowEvent::CaptureAssessed { assessment }) if assessment.is_accepted() => {
            Route::To(Processing)
        }
        (Capturing, FlowEvent::CaptureAssessed { .. }) => Route::To(ErrorRecovery),

        (Processing, FlowEvent::ExtractionProgress { .. }) => Route::Stay,
        (Processing, FlowEvent::ExtractionSucceeded { .. }) => Route::To(Reviewing),
        (Processing, FlowEvent::ExtractionFailed { .. }) => Route::To(ErrorRecovery),

        (ErrorRecovery, FlowEvent::Retry) => Route::To(Capturing),
        (ErrorRecovery, FlowEvent::EnterManually { .. }) => Route::To(Reviewing),

        (Reviewing, FlowEvent::AllocationsChanged(_)) => Route::Stay,
        (Reviewing, FlowEvent::Submit) => Route::To(Submitting),

        (Submitting, FlowEvent::SubmitSucceeded) => Route::To(Complete),
        (Submitting, FlowEvent::SubmitFailed { .. }) => Route::To(Reviewing),

        (Complete, FlowEvent::Reset) => Route::To(Idle),
        (Complete, FlowEvent::DismissSuccess) => Route::Stay,

        (stage, FlowEvent::Cancel) if stage.is_active() => Route::To(Idle),

        (Capturing | Processing, FlowEvent::DuplicateChecked(_)) => Route::Stay,
        (Capturing | ErrorRecovery, FlowEvent::CameraToggled(_)) => Route::Stay,
        (_, FlowEvent::DraftSaved) => Route::Stay,

        _ => Route::Illegal,
    }
}
