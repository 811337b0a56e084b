//! Allocation reconciliation: keeps a set of per-work-item amounts exactly
//! equal to a receipt total under a fixed decimal precision.
//!
//! All arithmetic happens in integer minor units (`i64`) at the configured
//! precision; `f64` only appears at the API boundary.

pub mod cache;
pub mod engine;
pub mod optimistic;
pub mod rounding;
pub mod validation;

pub use cache::{AllocationSummary, ItemShare, SummaryCache};
pub use engine::AllocationEngine;
pub use optimistic::{OptimisticUpdate, SpeculativeLog};
pub use rounding::Rounder;
pub use validation::ValidationIssue;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("Work item not in allocation set: {0}")]
    UnknownItem(String),

    #[error("Got {ratios} ratios for {items} work items")]
    RatioLengthMismatch { items: usize, ratios: usize },

    #[error("Invalid ratios: {0}")]
    InvalidRatios(String),

    #[error("Percentage must be within 0..=100, got {0}")]
    InvalidPercentage(f64),

    #[error("Total must be a finite amount")]
    NonFiniteTotal,

    #[error("No pending speculative update with id {0}")]
    UnknownUpdate(String),
}
