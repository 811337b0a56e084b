pub mod allocation;
pub mod capture;
pub mod enums;
pub mod extraction;
pub mod quality;

pub use allocation::{Allocation, AllocationSet};
pub use capture::RawCapture;
pub use enums::*;
pub use extraction::{ExtractionResult, LineItem};
pub use quality::QualityAssessment;
