use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 content hash of a capture, base64-encoded.
pub fn compute_content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Outcome of a duplicate lookup. Informational only: a duplicate never
/// blocks the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
}

/// Remembers content hashes of captures that made it to submission.
#[derive(Debug, Default)]
pub struct DuplicateRegistry {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DuplicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, bytes: &[u8]) -> DuplicateCheck {
        let content_hash = compute_content_hash(bytes);
        let first_seen = match self.seen.lock() {
            Ok(seen) => seen.get(&content_hash).copied(),
            Err(_) => {
                tracing::warn!("Duplicate registry lock poisoned, skipping check");
                None
            }
        };
        DuplicateCheck {
            is_duplicate: first_seen.is_some(),
            content_hash,
            first_seen,
        }
    }

    /// Remember a hash. Re-recording keeps the original timestamp.
    pub fn record(&self, content_hash: &str) {
        match self.seen.lock() {
            Ok(mut seen) => {
                seen.entry(content_hash.to_string()).or_insert_with(Utc::now);
            }
            Err(_) => tracing::warn!("Duplicate registry lock poisoned, hash not recorded"),
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
