use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::RoundingMode;

/// Application-level constants
pub const APP_NAME: &str = "receipt-capture";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key under which flow-state snapshots are stored.
pub const FLOW_SNAPSHOT_KEY: &str = "receipt_flow_snapshot";

/// Key under which free-form draft form data is stored.
pub const FORM_DRAFT_KEY: &str = "receipt_form_draft";

/// Highest decimal precision the allocation engine accepts.
pub const MAX_PRECISION: u32 = 6;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "receipt_capture_lib=info,warn"
}

/// Application data directory: `<data dir>/receipt-capture/`.
///
/// Falls back to the current directory on platforms without a data dir.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Directory used by the file-backed draft store.
pub fn drafts_dir() -> PathBuf {
    app_data_dir().join("drafts")
}

/// Tunables for the capture pipeline.
///
/// Missing fields in host-supplied JSON fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Quality score below which the user is asked to retake.
    pub rejection_threshold: f32,
    /// Decimal places for every allocation amount.
    pub precision: u32,
    pub rounding: RoundingMode,
    /// How long `complete` stays visible before the session resets.
    pub auto_reset_delay_ms: u64,
    /// Snapshots older than this are discarded on hydration.
    pub draft_freshness_hours: i64,
    pub speculative_log_capacity: usize,
    pub max_capture_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rejection_threshold: 0.2,
            precision: 2,
            rounding: RoundingMode::Round,
            auto_reset_delay_ms: 3000,
            draft_freshness_hours: 24,
            speculative_log_capacity: 10,
            max_capture_bytes: 25 * 1024 * 1024,
        }
    }
}

impl CaptureConfig {
    /// Parse host JSON, then clamp values into their valid ranges.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.rejection_threshold = if self.rejection_threshold.is_finite() {
            self.rejection_threshold.clamp(0.0, 1.0)
        } else {
            Self::default().rejection_threshold
        };
        self.precision = self.precision.min(MAX_PRECISION);
        self.speculative_log_capacity = self.speculative_log_capacity.max(1);
        self.draft_freshness_hours = self.draft_freshness_hours.max(0);
        self
    }

    pub fn auto_reset_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.auto_reset_delay_ms)
    }

    pub fn draft_freshness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.draft_freshness_hours)
    }
}
