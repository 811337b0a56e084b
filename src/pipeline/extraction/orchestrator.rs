//! Drives one extraction call through staged progress.
//!
//! Milestones, in order:
//! ```text
//! upload 0 → 30 | process 40 → 60 | extract 70 → 90 | complete 100
//! ```
//! The staged object is deleted on success and on failure alike; a failed
//! delete is logged and swallowed.

use std::time::Instant;

use uuid::Uuid;

use super::types::{ExtractionService, ObjectStorage};
use super::ExtractionError;
use crate::models::{ExtractionResult, ProcessingStage, RawCapture};

pub mod milestones {
    pub const UPLOAD_START: u8 = 0;
    pub const UPLOAD_DONE: u8 = 30;
    pub const PROCESS_SUBMITTED: u8 = 40;
    pub const PROCESS_RETURNED: u8 = 60;
    pub const EXTRACT_START: u8 = 70;
    pub const EXTRACT_DONE: u8 = 90;
    pub const COMPLETE: u8 = 100;
}

/// Prefix for staged objects in the bucket.
const STAGING_PREFIX: &str = "receipt-staging";

/// Stages a capture, calls the extraction service, cleans up.
pub struct ExtractionPipeline<S, E> {
    storage: S,
    service: E,
}

impl<S: ObjectStorage, E: ExtractionService> ExtractionPipeline<S, E> {
    pub fn new(storage: S, service: E) -> Self {
        Self { storage, service }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn service(&self) -> &E {
        &self.service
    }

    /// Run the pipeline, calling `progress` at every milestone.
    ///
    /// Does not touch flow state: the caller decides what a failure means.
    pub async fn extract<F>(
        &self,
        capture: &RawCapture,
        progress: F,
    ) -> Result<ExtractionResult, ExtractionError>
    where
        F: Fn(ProcessingStage, u8) + Send + Sync,
    {
        if capture.is_empty() {
            return Err(ExtractionError::EmptyCapture);
        }

        let start = Instant::now();
        progress(ProcessingStage::Upload, milestones::UPLOAD_START);

        let path = format!("{STAGING_PREFIX}/{}.{}", Uuid::new_v4(), capture.extension());
        let staged = self
            .storage
            .put(&path, capture.bytes())
            .await
            .map_err(|e| ExtractionError::Upload(e.to_string()))?;

        tracing::debug!(path = %staged, size = capture.len(), "Capture staged for extraction");

        let outcome = self.extract_staged(&staged, &progress).await;
        self.cleanup(&staged).await;

        match outcome {
            Ok(result) => {
                progress(ProcessingStage::Complete, milestones::COMPLETE);
                tracing::info!(
                    vendor = %result.vendor,
                    line_items = result.line_items.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Receipt extraction complete"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Receipt extraction failed"
                );
                Err(e)
            }
        }
    }

    async fn extract_staged<F>(
        &self,
        staged: &str,
        progress: &F,
    ) -> Result<ExtractionResult, ExtractionError>
    where
        F: Fn(ProcessingStage, u8) + Send + Sync,
    {
        let url = self
            .storage
            .public_url(staged)
            .await
            .map_err(|e| ExtractionError::Upload(e.to_string()))?;
        progress(ProcessingStage::Upload, milestones::UPLOAD_DONE);

        progress(ProcessingStage::Process, milestones::PROCESS_SUBMITTED);
        let result = self.service.invoke(&url).await?;
        progress(ProcessingStage::Process, milestones::PROCESS_RETURNED);

        progress(ProcessingStage::Extract, milestones::EXTRACT_START);
        result
            .check_well_formed()
            .map_err(ExtractionError::MalformedResponse)?;
        progress(ProcessingStage::Extract, milestones::EXTRACT_DONE);

        Ok(result)
    }

    async fn cleanup(&self, staged: &str) {
        if let Err(e) = self.storage.delete(staged).await {
            tracing::warn!(path = %staged, error = %e, "Failed to delete staged capture");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::extraction::types::{MockExtractionService, MockObjectStorage};

    fn receipt() -> ExtractionResult {
        ExtractionResult {
            vendor: "Home Depot".into(),
            total: 45.67,
            subtotal: None,
            tax: None,
            date: None,
            line_items: vec![],
            confidence: BTreeMap::from([("total".to_string(), 0.92)]),
        }
    }

    fn capture() -> RawCapture {
        RawCapture::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg")
    }

    #[tokio::test]
    async fn success_reports_all_milestones_in_order() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::returning(receipt()),
        );
        let seen = Mutex::new(Vec::new());

        let result = pipeline
            .extract(&capture(), |stage, pct| seen.lock().unwrap().push((stage, pct)))
            .await
            .unwrap();

        assert_eq!(result, receipt());
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                (ProcessingStage::Upload, 0),
                (ProcessingStage::Upload, 30),
                (ProcessingStage::Process, 40),
                (ProcessingStage::Process, 60),
                (ProcessingStage::Extract, 70),
                (ProcessingStage::Extract, 90),
                (ProcessingStage::Complete, 100),
            ]
        );
    }

    #[tokio::test]
    async fn staged_object_deleted_after_success() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::returning(receipt()),
        );
        pipeline.extract(&capture(), |_, _| {}).await.unwrap();

        assert!(pipeline.storage().stored_paths().is_empty());
        let deleted = pipeline.storage().deleted_paths();
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].starts_with("receipt-staging/"));
        assert!(deleted[0].ends_with(".jpg"));

        let urls = pipeline.service().invoked_urls();
        assert_eq!(urls, vec![format!("https://storage.test/{}", deleted[0])]);
    }

    #[tokio::test]
    async fn staged_object_deleted_after_remote_failure() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::failing(ExtractionError::Remote("500".into())),
        );
        let seen = Mutex::new(Vec::new());
        let err = pipeline
            .extract(&capture(), |stage, pct| seen.lock().unwrap().push((stage, pct)))
            .await
            .unwrap_err();

        assert_eq!(err, ExtractionError::Remote("500".into()));
        assert_eq!(pipeline.storage().deleted_paths().len(), 1);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last(), Some(&(ProcessingStage::Process, 40)));
        assert!(!seen.iter().any(|(s, _)| *s == ProcessingStage::Complete));
    }

    #[tokio::test]
    async fn upload_failure_skips_service() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::failing_put(),
            MockExtractionService::returning(receipt()),
        );
        let err = pipeline.extract(&capture(), |_, _| {}).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Upload(_)));
        assert_eq!(pipeline.service().call_count(), 0);
        assert!(pipeline.storage().deleted_paths().is_empty());
    }

    #[tokio::test]
    async fn malformed_response_is_an_error() {
        let mut bad = receipt();
        bad.total = f64::NAN;
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::returning(bad),
        );
        let err = pipeline.extract(&capture(), |_, _| {}).await.unwrap_err();

        assert!(matches!(err, ExtractionError::MalformedResponse(_)));
        assert_eq!(pipeline.storage().deleted_paths().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_fail_extraction() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::failing_delete(),
            MockExtractionService::returning(receipt()),
        );
        let result = pipeline.extract(&capture(), |_, _| {}).await;

        assert!(result.is_ok());
        assert_eq!(pipeline.storage().stored_paths().len(), 1);
    }

    #[tokio::test]
    async fn empty_capture_rejected_without_io() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::returning(receipt()),
        );
        let err = pipeline
            .extract(&RawCapture::new(Vec::new(), "image/jpeg"), |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(err, ExtractionError::EmptyCapture);
        assert!(pipeline.storage().stored_paths().is_empty());
        assert_eq!(pipeline.service().call_count(), 0);
    }

    #[tokio::test]
    async fn timeout_from_service_reported_as_error() {
        let pipeline = ExtractionPipeline::new(
            MockObjectStorage::new(),
            MockExtractionService::failing(ExtractionError::Timeout(30)),
        );
        let err = pipeline.extract(&capture(), |_, _| {}).await.unwrap_err();
        assert_eq!(err, ExtractionError::Timeout(30));
    }
}
