use std::sync::Arc;

use super::events::{route, FlowEvent, Route};
use super::state::{FlowErrors, FlowState, ProcessingState};
use super::FlowError;
use crate::allocation::{AllocationEngine, ValidationIssue};
use crate::config::CaptureConfig;
use crate::models::{AllocationSet, FlowStage, ProcessingStage, RecoveryStage};

/// Sees every change the controller makes. Called synchronously under the
/// controller's lock, so implementations must be quick and must not dispatch.
pub trait FlowObserver: Send + Sync {
    fn on_transition(&self, from: FlowStage, to: FlowStage, state: &FlowState);

    /// Non-stage fields changed.
    fn on_update(&self, _state: &FlowState) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Transitioned { from: FlowStage, to: FlowStage },
    Updated,
    /// Extraction event from an older generation; nothing changed.
    Discarded,
    /// Submission refused; the set needs fixing first.
    Blocked(Vec<ValidationIssue>),
}

/// Single-writer state machine over one [`FlowState`].
pub struct FlowController {
    state: FlowState,
    generation: u64,
    engine: AllocationEngine,
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl FlowController {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            state: FlowState::default(),
            generation: 0,
            engine: AllocationEngine::new(config),
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn FlowObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn stage(&self) -> FlowStage {
        self.state.stage
    }

    /// Bumped whenever an extraction starts or the session is abandoned.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AllocationEngine {
        &mut self.engine
    }

    /// The one entry point for state changes.
    pub fn dispatch(&mut self, event: FlowEvent) -> Result<DispatchOutcome, FlowError> {
        let from = self.state.stage;

        if let Some(generation) = event.generation() {
            if generation != self.generation {
                tracing::debug!(
                    event = event.name(),
                    generation,
                    current = self.generation,
                    "Stale extraction event discarded"
                );
                return Ok(DispatchOutcome::Discarded);
            }
        }

        match route(from, &event) {
            Route::Illegal => {
                if matches!(event, FlowEvent::ExtractionProgress { .. }) {
                    return Err(FlowError::NoActiveExtraction);
                }
                tracing::warn!(stage = %from, event = event.name(), "Illegal flow event rejected");
                Err(FlowError::IllegalTransition {
                    from,
                    event: event.name(),
                })
            }
            Route::Stay => {
                self.update(event);
                for observer in &self.observers {
                    observer.on_update(&self.state);
                }
                Ok(DispatchOutcome::Updated)
            }
            Route::To(to) => {
                if matches!(event, FlowEvent::Submit) {
                    let issues = self.submission_issues()?;
                    if !issues.is_empty() {
                        tracing::info!(issues = issues.len(), "Submission blocked by validation");
                        return Ok(DispatchOutcome::Blocked(issues));
                    }
                }

                let event_name = event.name();
                self.apply(event, to);
                tracing::info!(
                    from = %from,
                    to = %to,
                    event = event_name,
                    generation = self.generation,
                    "Flow transition"
                );
                for observer in &self.observers {
                    observer.on_transition(from, to, &self.state);
                }
                Ok(DispatchOutcome::Transitioned { from, to })
            }
        }
    }

    /// Replace an idle session with a recovered state.
    ///
    /// Not a table transition: hydration happens before the user acts.
    pub fn restore(&mut self, state: FlowState) -> Result<(), FlowError> {
        let from = self.state.stage;
        if from != FlowStage::Idle {
            return Err(FlowError::IllegalTransition {
                from,
                event: "restore",
            });
        }
        self.generation += 1;
        self.state = state;
        let to = self.state.stage;
        tracing::info!(stage = %to, generation = self.generation, "Flow state restored");
        for observer in &self.observers {
            observer.on_transition(from, to, &self.state);
        }
        Ok(())
    }

    fn submission_issues(&self) -> Result<Vec<ValidationIssue>, FlowError> {
        let set = self
            .state
            .allocations
            .as_ref()
            .ok_or(FlowError::MissingAllocations)?;
        Ok(self.engine.validate(set, set.target_total))
    }

    fn apply(&mut self, event: FlowEvent, to: FlowStage) {
        let state = &mut self.state;
        match event {
            FlowEvent::StartCapture | FlowEvent::Retry => {
                *state = FlowState::default();
            }
            FlowEvent::CaptureAssessed { assessment } => {
                state.ui.camera_capture_open = false;
                if to == FlowStage::Processing {
                    self.generation += 1;
                    state.errors = FlowErrors {
                        duplicate_check: state.errors.duplicate_check.take(),
                        ..FlowErrors::default()
                    };
                    state.processing = ProcessingState::started();
                    state.extraction = None;
                } else {
                    state.errors.quality_issue = assessment.primary_issue().map(str::to_string);
                    state.errors.quality_suggestions = assessment.suggestions;
                    state.errors.recovery_stage = Some(RecoveryStage::Quality);
                }
            }
            FlowEvent::ExtractionSucceeded { result, .. } => {
                state.processing = ProcessingState {
                    active: false,
                    stage: Some(ProcessingStage::Complete),
                    progress: 100,
                    error: None,
                };
                state.allocations = Some(AllocationSet::new(result.total));
                state.extraction = Some(result);
            }
            FlowEvent::ExtractionFailed { error, .. } => {
                state.processing.active = false;
                state.processing.stage = Some(ProcessingStage::Error);
                state.processing.error = Some(error.user_message());
                state.errors.recovery_stage = Some(RecoveryStage::Extraction);
            }
            FlowEvent::EnterManually { total } => {
                state.processing = ProcessingState::default();
                state.extraction = None;
                state.errors = FlowErrors {
                    duplicate_check: state.errors.duplicate_check.take(),
                    ..FlowErrors::default()
                };
                state.allocations = Some(AllocationSet::new(total));
            }
            FlowEvent::Submit => {
                state.errors.submit_error = None;
            }
            FlowEvent::SubmitSucceeded => {
                state.ui.show_success = true;
                state.allocations = None;
                self.engine.reset();
            }
            FlowEvent::SubmitFailed { message } => {
                state.errors.submit_error = Some(message);
            }
            FlowEvent::Reset | FlowEvent::Cancel => {
                self.generation += 1;
                self.engine.reset();
                *state = FlowState::default();
            }
            // Non-stage events never route to a new stage
            _ => {}
        }
        self.state.stage = to;
    }

    fn update(&mut self, event: FlowEvent) {
        let state = &mut self.state;
        match event {
            FlowEvent::ExtractionProgress {
                stage, progress, ..
            } => {
                state.processing.stage = Some(stage);
                state.processing.progress = progress.min(100);
            }
            FlowEvent::AllocationsChanged(set) => state.allocations = Some(set),
            FlowEvent::DuplicateChecked(check) => state.errors.duplicate_check = Some(check),
            FlowEvent::CameraToggled(open) => state.ui.camera_capture_open = open,
            FlowEvent::DraftSaved => state.ui.show_draft_saved = true,
            FlowEvent::DismissSuccess => state.ui.show_success = false,
            _ => {}
        }
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}
