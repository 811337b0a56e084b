use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::snapshot::DraftSnapshot;
use crate::config::{CaptureConfig, FLOW_SNAPSHOT_KEY, FORM_DRAFT_KEY};
use crate::flow::{FlowObserver, FlowState};
use crate::models::FlowStage;
use crate::storage::{KeyValueStore, StorageError};

// ═══════════════════════════════════════════════════════════
// Background writer
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum SnapshotWrite {
    Put(Vec<u8>),
    Remove,
}

impl SnapshotWrite {
    fn for_state(state: &FlowState, now: DateTime<Utc>) -> Result<Self, StorageError> {
        if matches!(state.stage, FlowStage::Idle | FlowStage::Complete) {
            return Ok(Self::Remove);
        }
        Ok(Self::Put(serde_json::to_vec(&DraftSnapshot::capture(state, now))?))
    }

    fn apply(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        match self {
            Self::Put(bytes) => store.set(FLOW_SNAPSHOT_KEY, bytes),
            Self::Remove => store.remove(FLOW_SNAPSHOT_KEY),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedWrite {
    seq: u64,
    write: SnapshotWrite,
}

/// One task per store draining a latest-only slot. Writes queued while a
/// slow backend is busy collapse into the newest snapshot.
struct SnapshotWriter {
    queue: watch::Sender<Option<QueuedWrite>>,
    written: watch::Receiver<u64>,
}

impl SnapshotWriter {
    fn spawn(handle: &Handle, store: Arc<dyn KeyValueStore>) -> Self {
        let (queue, mut pending) = watch::channel(None::<QueuedWrite>);
        let (done, written) = watch::channel(0u64);

        handle.spawn(async move {
            while pending.changed().await.is_ok() {
                let Some(next) = pending.borrow_and_update().clone() else {
                    continue;
                };
                let seq = next.seq;
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || next.write.apply(store.as_ref())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(seq, error = %e, "Draft snapshot not saved"),
                    Err(e) => tracing::warn!(seq, error = %e, "Draft snapshot write aborted"),
                }
                done.send_replace(seq);
            }
            tracing::debug!("Draft snapshot writer stopped");
        });

        Self { queue, written }
    }

    /// Replace whatever is waiting. Hands the write back once the task is gone.
    fn enqueue(&self, write: SnapshotWrite) -> Result<(), SnapshotWrite> {
        if self.queue.is_closed() {
            return Err(write);
        }
        self.queue.send_modify(|slot| {
            let seq = slot.as_ref().map_or(0, |q| q.seq) + 1;
            *slot = Some(QueuedWrite { seq, write });
        });
        Ok(())
    }

    fn last_queued(&self) -> u64 {
        self.queue.borrow().as_ref().map_or(0, |q| q.seq)
    }
}

// ═══════════════════════════════════════════════════════════
// DraftSnapshotStore
// ═══════════════════════════════════════════════════════════

/// Persists flow snapshots and free-form draft data.
///
/// Writes are best effort: a failure is logged and the flow carries on.
/// Flow snapshots are written off the caller's thread when a tokio runtime
/// is available, inline otherwise.
pub struct DraftSnapshotStore {
    store: Arc<dyn KeyValueStore>,
    freshness: Duration,
    writer: OnceLock<SnapshotWriter>,
}

impl DraftSnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CaptureConfig) -> Self {
        Self {
            store,
            freshness: config.draft_freshness(),
            writer: OnceLock::new(),
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Snapshot `state`, or drop the stored snapshot when there is nothing
    /// left to recover. Returns once the write is queued.
    pub fn save(&self, state: &FlowState) {
        match SnapshotWrite::for_state(state, Utc::now()) {
            Ok(write) => self.submit(write),
            Err(e) => tracing::warn!(stage = %state.stage, error = %e, "Draft snapshot not saved"),
        }
    }

    /// Synchronous write, bypassing the background writer.
    pub fn try_save(&self, state: &FlowState, now: DateTime<Utc>) -> Result<(), StorageError> {
        SnapshotWrite::for_state(state, now)?.apply(self.store.as_ref())
    }

    /// Wait until every queued snapshot write has reached the backend.
    pub async fn flush(&self) {
        let Some(writer) = self.writer.get() else {
            return;
        };
        let target = writer.last_queued();
        let mut written = writer.written.clone();
        if written.wait_for(|&seq| seq >= target).await.is_err() {
            tracing::debug!(target, "Draft snapshot writer gone before flush");
        }
    }

    fn writer(&self) -> Option<&SnapshotWriter> {
        if let Some(writer) = self.writer.get() {
            return Some(writer);
        }
        let handle = Handle::try_current().ok()?;
        Some(
            self.writer
                .get_or_init(|| SnapshotWriter::spawn(&handle, Arc::clone(&self.store))),
        )
    }

    fn submit(&self, write: SnapshotWrite) {
        let write = match self.writer() {
            Some(writer) => match writer.enqueue(write) {
                Ok(()) => return,
                Err(write) => {
                    tracing::debug!("Draft snapshot writer gone, writing inline");
                    write
                }
            },
            None => write,
        };
        if let Err(e) = write.apply(self.store.as_ref()) {
            tracing::warn!(error = %e, "Draft snapshot not saved");
        }
    }

    pub fn load(&self) -> Result<Option<DraftSnapshot>, StorageError> {
        match self.store.get(FLOW_SNAPSHOT_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// State to resume from, if a fresh snapshot exists.
    ///
    /// Stale, corrupt or outdated snapshots are removed.
    pub fn hydrate(&self, now: DateTime<Utc>) -> Option<FlowState> {
        let snapshot = match self.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable draft snapshot discarded");
                self.clear();
                return None;
            }
        };

        if !snapshot.is_fresh(now, self.freshness) {
            tracing::info!(
                age_hours = snapshot.age(now).num_hours(),
                version = snapshot.version,
                "Stale draft snapshot discarded"
            );
            self.clear();
            return None;
        }

        let state = snapshot.into_state();
        if state.stage == FlowStage::Idle {
            self.clear();
            return None;
        }
        Some(state)
    }

    /// Queued behind pending snapshot writes so a late write can't revive it.
    pub fn clear(&self) {
        self.submit(SnapshotWrite::Remove);
    }

    // ── Free-form draft data ────────────────────────────────────

    /// Returns whether the draft was written.
    pub fn save_form(&self, value: &serde_json::Value) -> bool {
        let result = serde_json::to_vec(value)
            .map_err(StorageError::from)
            .and_then(|bytes| self.store.set(FORM_DRAFT_KEY, &bytes));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Form draft not saved");
                false
            }
        }
    }

    pub fn load_form(&self) -> Option<serde_json::Value> {
        let bytes = match self.store.get(FORM_DRAFT_KEY) {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(error = %e, "Form draft unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt form draft discarded");
                self.clear_form();
                None
            }
        }
    }

    pub fn clear_form(&self) {
        if let Err(e) = self.store.remove(FORM_DRAFT_KEY) {
            tracing::warn!(error = %e, "Failed to clear form draft");
        }
    }
}

impl FlowObserver for DraftSnapshotStore {
    fn on_transition(&self, _from: FlowStage, _to: FlowStage, state: &FlowState) {
        self.save(state);
    }

    fn on_update(&self, state: &FlowState) {
        self.save(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowController, FlowEvent};
    use crate::models::{AllocationSet, RecoveryStage};
    use crate::storage::{FileStore, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration as StdDuration, Instant};

    /// Backend whose writes take a while, counting each one.
    struct SlowStore {
        inner: MemoryStore,
        delay: StdDuration,
        writes: AtomicUsize,
    }

    impl SlowStore {
        fn new(delay: StdDuration) -> Self {
            Self {
                inner: MemoryStore::new(),
                delay,
                writes: AtomicUsize::new(0),
            }
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl KeyValueStore for SlowStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            std::thread::sleep(self.delay);
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn store_over(backend: Arc<MemoryStore>) -> DraftSnapshotStore {
        DraftSnapshotStore::new(backend, &CaptureConfig::default())
    }

    fn reviewing() -> FlowState {
        FlowState {
            allocations: Some(AllocationSet::new(20.0)),
            ..FlowState::at(FlowStage::Reviewing)
        }
    }

    #[test]
    fn save_then_hydrate() {
        let backend = Arc::new(MemoryStore::new());
        let drafts = store_over(backend.clone());

        drafts.save(&reviewing());
        assert!(backend.contains(FLOW_SNAPSHOT_KEY));

        let restored = drafts.hydrate(Utc::now()).unwrap();
        assert_eq!(restored.stage, FlowStage::Reviewing);
        assert_eq!(restored.target_total(), Some(20.0));
    }

    #[test]
    fn stale_snapshot_rejected_and_removed() {
        let backend = Arc::new(MemoryStore::new());
        let drafts = store_over(backend.clone());
        let now = Utc::now();

        drafts
            .try_save(&reviewing(), now - Duration::hours(25))
            .unwrap();
        assert!(drafts.hydrate(now).is_none());
        assert!(!backend.contains(FLOW_SNAPSHOT_KEY));
    }

    #[test]
    fn corrupt_snapshot_removed() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(FLOW_SNAPSHOT_KEY, b"{not json").unwrap();
        let drafts = store_over(backend.clone());

        assert!(drafts.hydrate(Utc::now()).is_none());
        assert!(!backend.contains(FLOW_SNAPSHOT_KEY));
    }

    #[test]
    fn idle_state_removes_snapshot() {
        let backend = Arc::new(MemoryStore::new());
        let drafts = store_over(backend.clone());

        drafts.save(&reviewing());
        drafts.save(&FlowState::default());
        assert!(!backend.contains(FLOW_SNAPSHOT_KEY));
    }

    #[test]
    fn failing_backend_never_panics() {
        let drafts = store_over(Arc::new(MemoryStore::failing()));
        drafts.save(&reviewing());
        assert!(!drafts.save_form(&json!({"notes": "lumber"})));
        assert!(drafts.hydrate(Utc::now()).is_none());
    }

    #[test]
    fn processing_snapshot_hydrates_to_recovery() {
        let drafts = store_over(Arc::new(MemoryStore::new()));
        let mut state = FlowState::at(FlowStage::Processing);
        state.processing.active = true;
        drafts.save(&state);

        let restored = drafts.hydrate(Utc::now()).unwrap();
        assert_eq!(restored.recovery_stage(), Some(RecoveryStage::Extraction));
    }

    #[test]
    fn form_draft_round_trip() {
        let drafts = store_over(Arc::new(MemoryStore::new()));
        let value = json!({"vendor": "Home Depot", "notes": "deck screws"});

        assert!(drafts.save_form(&value));
        assert_eq!(drafts.load_form(), Some(value));

        drafts.clear_form();
        assert_eq!(drafts.load_form(), None);
    }

    #[test]
    fn file_backed_snapshot_survives_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::default();

        DraftSnapshotStore::new(Arc::new(FileStore::new(dir.path())), &config).save(&reviewing());

        let reopened = DraftSnapshotStore::new(Arc::new(FileStore::new(dir.path())), &config);
        let restored = reopened.hydrate(Utc::now()).unwrap();
        assert_eq!(restored.stage, FlowStage::Reviewing);
    }

    #[tokio::test]
    async fn slow_backend_does_not_hold_up_dispatch() {
        let backend = Arc::new(SlowStore::new(StdDuration::from_millis(200)));
        let drafts = Arc::new(DraftSnapshotStore::new(backend.clone(), &CaptureConfig::default()));
        let mut controller =
            FlowController::new(&CaptureConfig::default()).with_observer(drafts.clone());

        let started = Instant::now();
        controller.dispatch(FlowEvent::StartCapture).unwrap();
        for open in [true, false, true] {
            controller.dispatch(FlowEvent::CameraToggled(open)).unwrap();
        }
        let elapsed = started.elapsed();
        assert!(elapsed < StdDuration::from_millis(150), "dispatch took {elapsed:?}");

        drafts.flush().await;
        let saved = drafts.load().unwrap().unwrap();
        assert_eq!(saved.stage, FlowStage::Capturing);
        assert!(saved.ui.camera_capture_open);
        // Queued snapshots collapse into the latest one
        assert!(backend.writes() < 4, "{} writes", backend.writes());
    }

    #[tokio::test]
    async fn clear_lands_after_queued_snapshot() {
        let backend = Arc::new(MemoryStore::new());
        let drafts = store_over(backend.clone());

        drafts.save(&reviewing());
        drafts.clear();
        drafts.flush().await;
        assert!(!backend.contains(FLOW_SNAPSHOT_KEY));

        drafts.save(&reviewing());
        drafts.flush().await;
        assert!(backend.contains(FLOW_SNAPSHOT_KEY));
    }

    #[tokio::test]
    async fn background_write_failure_is_swallowed() {
        let drafts = store_over(Arc::new(MemoryStore::failing()));
        drafts.save(&reviewing());
        drafts.flush().await;
        assert!(drafts.load().unwrap().is_none());
    }
}
