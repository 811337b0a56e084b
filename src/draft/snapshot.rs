use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::{FlowErrors, FlowState, ProcessingState, UiFlags};
use crate::models::{AllocationSet, ExtractionResult, FlowStage, ProcessingStage, RecoveryStage};

/// Bumped when the snapshot layout changes; older snapshots are discarded.
pub const SNAPSHOT_VERSION: u32 = 1;

/// How far in the future `saved_at` may sit before the wall clock is distrusted.
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

const INTERRUPTED_MESSAGE: &str =
    "Reading the receipt was interrupted. Retry or enter the details manually.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub stage: FlowStage,
    pub processing: ProcessingState,
    pub extraction: Option<ExtractionResult>,
    #[serde(default)]
    pub confidence: BTreeMap<String, f32>,
    pub errors: FlowErrors,
    pub ui: UiFlags,
    #[serde(default)]
    pub target_total: Option<f64>,
}

impl DraftSnapshot {
    pub fn capture(state: &FlowState, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            stage: state.stage,
            processing: state.processing.clone(),
            extraction: state.extraction.clone(),
            confidence: state
                .extraction
                .as_ref()
                .map(|e| e.confidence.clone())
                .unwrap_or_default(),
            errors: state.errors.clone(),
            ui: state.ui.clone(),
            target_total: state.target_total(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.saved_at
    }

    /// Same layout, saved within `window`. A snapshot dated well ahead of
    /// `now` means the clock moved back; it never counts as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age = self.age(now);
        self.version == SNAPSHOT_VERSION
            && age >= -Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS)
            && age <= window
    }

    /// The state a session resumes in.
    ///
    /// Anything that depended on the capture bytes (an upload in flight) comes
    /// back as an extraction failure so the user can retry or type the
    /// details in. An unfinished submission comes back to review.
    pub fn into_state(self) -> FlowState {
        let ui = UiFlags {
            camera_capture_open: false,
            show_success: false,
            ..self.ui
        };

        match self.stage {
            FlowStage::Idle | FlowStage::Complete => FlowState::default(),
            FlowStage::Capturing => FlowState {
                ui,
                ..FlowState::at(FlowStage::Capturing)
            },
            FlowStage::ErrorRecovery => FlowState {
                stage: FlowStage::ErrorRecovery,
                processing: ProcessingState {
                    active: false,
                    ..self.processing
                },
                ui,
                errors: self.errors,
                extraction: None,
                allocations: None,
            },
            FlowStage::Reviewing | FlowStage::Submitting => match self.target_total {
                Some(total) => FlowState {
                    stage: FlowStage::Reviewing,
                    processing: ProcessingState {
                        active: false,
                        ..self.processing
                    },
                    ui,
                    errors: self.errors,
                    extraction: self.extraction,
                    allocations: Some(AllocationSet::new(total)),
                },
                None => interrupted(ui, self.errors),
            },
            FlowStage::Processing => interrupted(ui, self.errors),
        }
    }
}

fn interrupted(ui: UiFlags, errors: FlowErrors) -> FlowState {
    FlowState {
        stage: FlowStage::ErrorRecovery,
        processing: ProcessingState {
            active: false,
            stage: Some(ProcessingStage::Error),
            progress: 0,
            error: Some(INTERRUPTED_MESSAGE.into()),
        },
        ui,
        errors: FlowErrors {
            recovery_stage: Some(RecoveryStage::Extraction),
            ..errors
        },
        extraction: None,
        allocations: None,
    }
}
