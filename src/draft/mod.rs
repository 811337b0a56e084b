//! Draft snapshots: a redacted, metadata-only copy of the flow state kept in
//! durable storage so an interrupted session can pick up where it left off.
//!
//! Raw capture bytes and previews are never written. Allocations are reduced
//! to their target total.

pub mod snapshot;
pub mod store;

pub use snapshot::{DraftSnapshot, SNAPSHOT_VERSION};
pub use store::DraftSnapshotStore;
