//! Async facade over one [`FlowController`].
//!
//! The controller sits behind a std `Mutex` that is only ever held between
//! awaits. Extraction progress and results are tagged with the generation
//! current when the capture was accepted; a cancel or reset bumps it, so late
//! results land as [`DispatchOutcome::Discarded`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::controller::{DispatchOutcome, FlowController};
use super::events::FlowEvent;
use super::state::FlowState;
use super::FlowError;
use crate::allocation::{AllocationEngine, AllocationError, AllocationSummary, SpeculativeLog, ValidationIssue};
use crate::config::CaptureConfig;
use crate::draft::DraftSnapshotStore;
use crate::models::{
    AllocationSet, ExtractionResult, FlowStage, NotificationKind, ProcessingStage,
    QualityAssessment, RawCapture,
};
use crate::notify::{NotificationSink, TracingNotifier};
use crate::pipeline::duplicate::DuplicateRegistry;
use crate::pipeline::extraction::{
    ExtractionError, ExtractionPipeline, ExtractionService, ObjectStorage,
};
use crate::pipeline::quality::{suggestions, HeuristicQualityGate, QualityAssessor};
use crate::storage::StorageError;

// ═══════════════════════════════════════════════════════════
// Submission collaborator
// ═══════════════════════════════════════════════════════════

/// What gets handed to the host once allocations reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub allocations: AllocationSet,
    pub extraction: Option<ExtractionResult>,
    pub content_hash: Option<String>,
}

/// Persists a reconciled receipt as a business record.
pub trait Submitter: Send + Sync {
    fn submit(
        &self,
        submission: &Submission,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Records submissions in memory; can be told to fail.
#[derive(Default)]
pub struct MockSubmitter {
    received: Mutex<Vec<Submission>>,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let submitter = Self::default();
        submitter.fail.store(true, Ordering::Relaxed);
        submitter
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn received(&self) -> Vec<Submission> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Submitter for MockSubmitter {
    async fn submit(&self, submission: &Submission) -> Result<(), StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("expense service offline".into()));
        }
        let mut received = self.received.lock().map_err(|_| StorageError::LockPoisoned)?;
        received.push(submission.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Quality gate said retake; the flow is in quality recovery.
    Rejected(QualityAssessment),
    Extracted(ExtractionResult),
    /// Extraction failed; the flow is in extraction recovery.
    Failed(ExtractionError),
    /// The session moved on while extraction was running.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Submission),
    Blocked(Vec<ValidationIssue>),
    Discarded,
}

/// Result of an allocation edit applied to the live set.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationEdit {
    /// Correlation id for [`CaptureSession::commit_allocations`] and
    /// [`CaptureSession::rollback_allocations`].
    pub update_id: String,
    pub summary: AllocationSummary,
}

// ═══════════════════════════════════════════════════════════
// CaptureSession
// ═══════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct CaptureSession {
    controller: Arc<Mutex<FlowController>>,
    config: CaptureConfig,
    assessor: Arc<dyn QualityAssessor>,
    notifier: Arc<dyn NotificationSink>,
    duplicates: Arc<DuplicateRegistry>,
    drafts: Option<Arc<DraftSnapshotStore>>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        let config = config.normalized();
        Self {
            controller: Arc::new(Mutex::new(FlowController::new(&config))),
            assessor: Arc::new(HeuristicQualityGate::from_config(&config)),
            notifier: Arc::new(TracingNotifier),
            duplicates: Arc::new(DuplicateRegistry::new()),
            drafts: None,
            config,
        }
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_duplicates(mut self, duplicates: Arc<DuplicateRegistry>) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Persist a snapshot on every flow change.
    pub fn with_drafts(mut self, drafts: Arc<DraftSnapshotStore>) -> Self {
        if let Ok(mut controller) = self.controller.lock() {
            controller.add_observer(drafts.clone());
        }
        self.drafts = Some(drafts);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, FlowController>, FlowError> {
        self.controller.lock().map_err(|_| FlowError::LockPoisoned)
    }

    fn dispatch(&self, event: FlowEvent) -> Result<DispatchOutcome, FlowError> {
        self.lock()?.dispatch(event)
    }

    pub fn state(&self) -> Result<FlowState, FlowError> {
        Ok(self.lock()?.state().clone())
    }

    pub fn stage(&self) -> Result<FlowStage, FlowError> {
        Ok(self.lock()?.stage())
    }

    pub fn generation(&self) -> Result<u64, FlowError> {
        Ok(self.lock()?.generation())
    }

    // ── Capture ─────────────────────────────────────────────────

    pub fn start_capture(&self) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::StartCapture)
    }

    pub fn toggle_camera(&self, open: bool) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::CameraToggled(open))
    }

    /// Gate the capture, then run extraction and feed its progress and
    /// outcome into the flow.
    pub async fn submit_capture<S, E>(
        &self,
        capture: RawCapture,
        pipeline: &ExtractionPipeline<S, E>,
    ) -> Result<CaptureOutcome, FlowError>
    where
        S: ObjectStorage,
        E: ExtractionService,
    {
        // Decoding is CPU-bound; keep it off the async workers
        let assessor = Arc::clone(&self.assessor);
        let (capture, assessment) = tokio::task::spawn_blocking(move || {
            let assessment = assessor.assess_capture(&capture);
            (capture, assessment)
        })
        .await
        .map_err(|e| FlowError::AssessmentAborted(e.to_string()))?;
        let (generation, duplicate) = {
            let mut controller = self.lock()?;
            controller.dispatch(FlowEvent::CaptureAssessed {
                assessment: assessment.clone(),
            })?;
            if !assessment.is_accepted() {
                (None, false)
            } else {
                let check = self.duplicates.check(capture.bytes());
                let duplicate = check.is_duplicate;
                controller.dispatch(FlowEvent::DuplicateChecked(check))?;
                (Some(controller.generation()), duplicate)
            }
        };

        let Some(generation) = generation else {
            tracing::info!(score = assessment.score, "Capture rejected by quality gate");
            let message = assessment
                .primary_issue()
                .unwrap_or(suggestions::GENERIC_RETAKE);
            self.notifier.notify(NotificationKind::Warning, message);
            return Ok(CaptureOutcome::Rejected(assessment));
        };
        if duplicate {
            self.notifier.notify(
                NotificationKind::Warning,
                "This receipt looks like one that was already submitted",
            );
        }

        let progress_target = Arc::clone(&self.controller);
        let progress = move |stage: ProcessingStage, progress: u8| {
            let Ok(mut controller) = progress_target.lock() else {
                return;
            };
            if let Err(e) = controller.dispatch(FlowEvent::ExtractionProgress {
                generation,
                stage,
                progress,
            }) {
                tracing::debug!(error = %e, "Progress update dropped");
            }
        };

        let outcome = pipeline.extract(&capture, progress).await;

        let event = match &outcome {
            Ok(result) => FlowEvent::ExtractionSucceeded {
                generation,
                result: result.clone(),
            },
            Err(error) => FlowEvent::ExtractionFailed {
                generation,
                error: error.clone(),
            },
        };
        if self.dispatch(event)? == DispatchOutcome::Discarded {
            return Ok(CaptureOutcome::Discarded);
        }

        match outcome {
            Ok(result) => {
                self.notifier.notify(
                    NotificationKind::Success,
                    &format!("Receipt from {} is ready for review", result.vendor),
                );
                Ok(CaptureOutcome::Extracted(result))
            }
            Err(error) => {
                self.notifier
                    .notify(NotificationKind::Error, &error.user_message());
                Ok(CaptureOutcome::Failed(error))
            }
        }
    }

    // ── Recovery ────────────────────────────────────────────────

    pub fn retry(&self) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::Retry)
    }

    /// Skip extraction and review against a typed-in total.
    pub fn enter_manually(&self, total: f64) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::EnterManually { total })
    }

    // ── Review ──────────────────────────────────────────────────

    pub fn update_allocations(&self, set: AllocationSet) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::AllocationsChanged(set))
    }

    /// Apply an engine operation to the live set and log it as a
    /// speculative update.
    pub fn edit_allocations<F>(&self, action: &str, edit: F) -> Result<AllocationEdit, FlowError>
    where
        F: FnOnce(&AllocationEngine, &AllocationSet) -> Result<AllocationSet, AllocationError>,
    {
        let mut controller = self.lock()?;
        let before = controller
            .state()
            .allocations
            .clone()
            .ok_or(FlowError::MissingAllocations)?;
        let after = edit(controller.engine(), &before)?;
        controller.dispatch(FlowEvent::AllocationsChanged(after.clone()))?;

        let update_id = SpeculativeLog::new_correlation_id();
        let total = after.target_total;
        let engine = controller.engine_mut();
        engine.begin_optimistic(update_id.clone(), before, after.clone(), action);
        let summary = engine.calculate_state(&after, total);
        Ok(AllocationEdit { update_id, summary })
    }

    pub fn commit_allocations(&self, update_id: &str) -> Result<(), FlowError> {
        self.lock()?.engine_mut().commit(update_id)?;
        Ok(())
    }

    /// Put the set back the way it was before `update_id`.
    pub fn rollback_allocations(&self, update_id: &str) -> Result<AllocationSet, FlowError> {
        let mut controller = self.lock()?;
        let before = controller.engine_mut().rollback(update_id)?;
        controller.dispatch(FlowEvent::AllocationsChanged(before.clone()))?;
        Ok(before)
    }

    pub fn allocation_summary(&self) -> Result<AllocationSummary, FlowError> {
        let mut controller = self.lock()?;
        let set = controller
            .state()
            .allocations
            .clone()
            .ok_or(FlowError::MissingAllocations)?;
        let total = set.target_total;
        Ok(controller.engine_mut().calculate_state(&set, total))
    }

    // ── Submission ──────────────────────────────────────────────

    /// Validate and submit the live set.
    ///
    /// A failed submission returns the flow to review and surfaces as
    /// [`FlowError::SubmissionFailed`].
    pub async fn submit<T: Submitter>(&self, submitter: &T) -> Result<SubmitOutcome, FlowError> {
        let (submission, generation) = {
            let mut controller = self.lock()?;
            if let DispatchOutcome::Blocked(issues) = controller.dispatch(FlowEvent::Submit)? {
                return Ok(SubmitOutcome::Blocked(issues));
            }
            let state = controller.state();
            let submission = Submission {
                allocations: state
                    .allocations
                    .clone()
                    .ok_or(FlowError::MissingAllocations)?,
                extraction: state.extraction.clone(),
                content_hash: state
                    .errors
                    .duplicate_check
                    .as_ref()
                    .map(|c| c.content_hash.clone()),
            };
            (submission, controller.generation())
        };

        let result = submitter.submit(&submission).await;

        let mut controller = self.lock()?;
        if controller.generation() != generation || controller.stage() != FlowStage::Submitting {
            tracing::info!("Submission finished after the flow was abandoned");
            return Ok(SubmitOutcome::Discarded);
        }

        match result {
            Ok(()) => {
                controller.dispatch(FlowEvent::SubmitSucceeded)?;
                drop(controller);

                if let Some(hash) = &submission.content_hash {
                    self.duplicates.record(hash);
                }
                if let Some(drafts) = &self.drafts {
                    drafts.clear_form();
                }
                self.notifier
                    .notify(NotificationKind::Success, "Receipt submitted");
                self.schedule_auto_reset(generation);
                Ok(SubmitOutcome::Submitted(submission))
            }
            Err(e) => {
                let message = e.to_string();
                controller.dispatch(FlowEvent::SubmitFailed {
                    message: message.clone(),
                })?;
                drop(controller);

                tracing::warn!(error = %message, "Receipt submission failed");
                self.notifier.notify(
                    NotificationKind::Error,
                    "Submission failed. Your allocations are kept, please try again.",
                );
                Err(FlowError::SubmissionFailed(message))
            }
        }
    }

    /// Return to idle after the success banner has been shown for a while,
    /// unless the user already moved on.
    fn schedule_auto_reset(&self, generation: u64) {
        let delay = self.config.auto_reset_delay();
        if delay.is_zero() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime for auto-reset, staying on complete");
            return;
        };

        let controller = Arc::clone(&self.controller);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Ok(mut controller) = controller.lock() else {
                return;
            };
            if controller.stage() == FlowStage::Complete && controller.generation() == generation
            {
                if let Err(e) = controller.dispatch(FlowEvent::Reset) {
                    tracing::warn!(error = %e, "Auto-reset failed");
                }
            }
        });
    }

    // ── Leaving ─────────────────────────────────────────────────

    pub fn dismiss_success(&self) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::DismissSuccess)
    }

    pub fn reset(&self) -> Result<DispatchOutcome, FlowError> {
        self.dispatch(FlowEvent::Reset)
    }

    /// Abandon the session from any active stage. In-flight extraction
    /// results are dropped when they arrive.
    pub fn cancel(&self) -> Result<DispatchOutcome, FlowError> {
        let outcome = self.dispatch(FlowEvent::Cancel)?;
        if let Some(drafts) = &self.drafts {
            drafts.clear_form();
        }
        Ok(outcome)
    }

    // ── Drafts ──────────────────────────────────────────────────

    /// Resume from a fresh snapshot, if there is one. Returns the stage the
    /// session resumed in.
    pub fn restore_draft(&self) -> Result<Option<FlowStage>, FlowError> {
        let Some(drafts) = &self.drafts else {
            return Ok(None);
        };
        let Some(state) = drafts.hydrate(Utc::now()) else {
            return Ok(None);
        };

        let stage = state.stage;
        self.lock()?.restore(state)?;
        self.notifier
            .notify(NotificationKind::Info, "Picked up your unfinished receipt");
        Ok(Some(stage))
    }

    /// Store free-form form data next to the snapshot. Returns whether it
    /// was written.
    pub fn save_form_draft(&self, value: &serde_json::Value) -> Result<bool, FlowError> {
        let Some(drafts) = &self.drafts else {
            return Ok(false);
        };
        if !drafts.save_form(value) {
            return Ok(false);
        }
        self.dispatch(FlowEvent::DraftSaved)?;
        Ok(true)
    }

    pub fn load_form_draft(&self) -> Option<serde_json::Value> {
        self.drafts.as_ref().and_then(|d| d.load_form())
    }
}
