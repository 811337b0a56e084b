use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AllocationError;
use crate::models::AllocationSet;

/// A tentative allocation change awaiting commit or rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub before: AllocationSet,
    pub after: AllocationSet,
    pub action: String,
}

/// Bounded log of speculative updates keyed by correlation id.
///
/// Single-threaded: callers sharing one log must serialize access.
#[derive(Debug, Clone)]
pub struct SpeculativeLog {
    entries: VecDeque<OptimisticUpdate>,
    capacity: usize,
}

impl SpeculativeLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn new_correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Record an update stamped with the current time.
    ///
    /// Returns the entry evicted to stay within capacity, if any.
    pub fn begin(
        &mut self,
        id: impl Into<String>,
        before: AllocationSet,
        after: AllocationSet,
        action: impl Into<String>,
    ) -> Option<OptimisticUpdate> {
        self.begin_at(id, before, after, action, Utc::now())
    }

    /// Like [`begin`](Self::begin) with an explicit timestamp.
    pub fn begin_at(
        &mut self,
        id: impl Into<String>,
        before: AllocationSet,
        after: AllocationSet,
        action: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Option<OptimisticUpdate> {
        let id = id.into();
        // Re-using an id replaces the pending entry
        self.entries.retain(|e| e.id != id);
        self.entries.push_back(OptimisticUpdate {
            id,
            timestamp,
            before,
            after,
            action: action.into(),
        });

        if self.entries.len() <= self.capacity {
            return None;
        }

        // Oldest by timestamp; insertion order breaks ties
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(idx, e)| (e.timestamp, *idx))
            .map(|(idx, _)| idx)?;
        let evicted = self.entries.remove(oldest);
        if let Some(e) = &evicted {
            tracing::debug!(id = %e.id, action = %e.action, "Speculative update evicted");
        }
        evicted
    }

    /// Keep the speculative state; forget the entry.
    pub fn commit(&mut self, id: &str) -> Result<OptimisticUpdate, AllocationError> {
        self.take(id)
    }

    /// Discard the speculative state, returning the set to restore.
    pub fn rollback(&mut self, id: &str) -> Result<AllocationSet, AllocationError> {
        let entry = self.take(id)?;
        tracing::debug!(id, action = %entry.action, "Speculative update rolled back");
        Ok(entry.before)
    }

    pub fn get(&self, id: &str) -> Option<&OptimisticUpdate> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn pending_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn take(&mut self, id: &str) -> Result<OptimisticUpdate, AllocationError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| AllocationError::UnknownUpdate(id.to_string()))?;
        self.entries
            .remove(idx)
            .ok_or_else(|| AllocationError::UnknownUpdate(id.to_string()))
    }
}

impl Default for SpeculativeLog {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Allocation;
    use chrono::Duration;

    fn set_with(amount: f64) -> AllocationSet {
        AllocationSet::with_allocations(100.0, vec![Allocation::new("A", amount)])
    }

    #[test]
    fn rollback_returns_before_state() {
        let mut log = SpeculativeLog::default();
        log.begin("u1", set_with(10.0), set_with(20.0), "update_by_amount");

        let restored = log.rollback("u1").unwrap();
        assert_eq!(restored, set_with(10.0));
        assert!(log.is_empty());
    }

    #[test]
    fn commit_removes_entry() {
        let mut log = SpeculativeLog::default();
        log.begin("u1", set_with(10.0), set_with(20.0), "split_evenly");

        let committed = log.commit("u1").unwrap();
        assert_eq!(committed.after, set_with(20.0));
        assert!(log.get("u1").is_none());
        assert_eq!(
            log.rollback("u1"),
            Err(AllocationError::UnknownUpdate("u1".into()))
        );
    }

    #[test]
    fn bounded_to_capacity_evicting_oldest() {
        let mut log = SpeculativeLog::new(10);
        let base = Utc::now();
        for i in 0..10 {
            let evicted = log.begin_at(
                format!("u{i}"),
                set_with(i as f64),
                set_with(i as f64 + 1.0),
                "edit",
                base + Duration::seconds(i),
            );
            assert!(evicted.is_none());
        }

        let evicted = log
            .begin_at("u10", set_with(0.0), set_with(1.0), "edit", base + Duration::seconds(10))
            .unwrap();
        assert_eq!(evicted.id, "u0");
        assert_eq!(log.len(), 10);
        assert!(log.get("u0").is_none());
        assert!(log.get("u10").is_some());
    }

    #[test]
    fn eviction_uses_timestamp_not_insertion_order() {
        let mut log = SpeculativeLog::new(2);
        let base = Utc::now();
        log.begin_at("late", set_with(1.0), set_with(2.0), "edit", base + Duration::seconds(5));
        log.begin_at("early", set_with(1.0), set_with(2.0), "edit", base);

        let evicted = log
            .begin_at("newest", set_with(1.0), set_with(2.0), "edit", base + Duration::seconds(9))
            .unwrap();
        assert_eq!(evicted.id, "early");
        assert_eq!(log.pending_ids(), vec!["late", "newest"]);
    }

    #[test]
    fn reusing_id_replaces_entry() {
        let mut log = SpeculativeLog::default();
        log.begin("u1", set_with(1.0), set_with(2.0), "first");
        log.begin("u1", set_with(2.0), set_with(3.0), "second");

        assert_eq!(log.len(), 1);
        assert_eq!(log.get("u1").unwrap().action, "second");
    }

    #[test]
    fn zero_capacity_coerced_to_one() {
        let mut log = SpeculativeLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.begin("a", set_with(1.0), set_with(2.0), "edit");
        assert!(log.begin("b", set_with(1.0), set_with(2.0), "edit").is_some());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(
            SpeculativeLog::new_correlation_id(),
            SpeculativeLog::new_correlation_id()
        );
    }
}
