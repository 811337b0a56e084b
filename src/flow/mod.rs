//! Flow controller: the single source of truth for where the user is in the
//! capture → extraction → review → submission journey.
//!
//! ```text
//! idle ─start─▶ capturing ─accepted─▶ processing ─success─▶ reviewing ─submit─▶ submitting ─success─▶ complete
//!                   │                     │                     ▲    ▲               │                   │
//!                rejected               failed                  │    └─submit failed─┘                 reset
//!                   ▼                     ▼                     │                                      ▼
//!                   └──────▶ error_recovery ──manual entry──────┘                                     idle
//!                               │
//!                             retry ─▶ capturing
//! ```
//! Every active stage also accepts `cancel`, which returns to idle.

pub mod controller;
pub mod events;
pub mod session;
pub mod state;

pub use controller::{DispatchOutcome, FlowController, FlowObserver};
pub use events::{FlowEvent, Route};
pub use session::{
    AllocationEdit, CaptureOutcome, CaptureSession, Submission, SubmitOutcome, Submitter,
};
pub use state::{FlowErrors, FlowState, ProcessingState, UiFlags};

use thiserror::Error;

use crate::allocation::AllocationError;
use crate::models::FlowStage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Event '{event}' is not allowed in stage '{from}'")]
    IllegalTransition { from: FlowStage, event: &'static str },

    #[error("No extraction is in progress")]
    NoActiveExtraction,

    #[error("No allocation set to work on")]
    MissingAllocations,

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Quality assessment aborted: {0}")]
    AssessmentAborted(String),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Flow state lock poisoned")]
    LockPoisoned,
}
