use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::ExtractionError;
use crate::models::ExtractionResult;
use crate::storage::StorageError;

/// Object storage used to stage an image for the extraction service.
pub trait ObjectStorage: Send + Sync {
    /// Store bytes, returning the stored path.
    fn put(
        &self,
        path: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    fn public_url(&self, path: &str)
        -> impl Future<Output = Result<String, StorageError>> + Send;

    fn delete(&self, path: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Remote document-extraction call. Owns its own timeout.
pub trait ExtractionService: Send + Sync {
    fn invoke(
        &self,
        image_url: &str,
    ) -> impl Future<Output = Result<ExtractionResult, ExtractionError>> + Send;
}

// ═══════════════════════════════════════════════════════════
// Mocks
// ═══════════════════════════════════════════════════════════

/// In-memory object storage with switchable failures.
#[derive(Default)]
pub struct MockObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_put() -> Self {
        let storage = Self::default();
        storage.fail_put.store(true, Ordering::Relaxed);
        storage
    }

    pub fn failing_delete() -> Self {
        let storage = Self::default();
        storage.fail_delete.store(true, Ordering::Relaxed);
        storage
    }

    pub fn stored_paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl ObjectStorage for MockObjectStorage {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if self.fail_put.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("bucket offline".into()));
        }
        let mut objects = self.objects.lock().map_err(|_| StorageError::LockPoisoned)?;
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn public_url(&self, path: &str) -> Result<String, StorageError> {
        Ok(format!("https://storage.test/{path}"))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_delete.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("delete refused".into()));
        }
        let mut objects = self.objects.lock().map_err(|_| StorageError::LockPoisoned)?;
        objects.remove(path);
        drop(objects);
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(path.to_string());
        }
        Ok(())
    }
}

/// Extraction service returning a canned response, optionally after a delay.
pub struct MockExtractionService {
    response: Result<ExtractionResult, ExtractionError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockExtractionService {
    pub fn returning(result: ExtractionResult) -> Self {
        Self::with_response(Ok(result))
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self::with_response(Err(error))
    }

    fn with_response(response: Result<ExtractionResult, ExtractionError>) -> Self {
        Self {
            response,
            delay: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn invoked_urls(&self) -> Vec<String> {
        self.urls.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ExtractionService for MockExtractionService {
    async fn invoke(&self, image_url: &str) -> Result<ExtractionResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(image_url.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}
