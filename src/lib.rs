pub mod allocation; // Exact cost allocation against a receipt total
pub mod config;
pub mod draft; // Interrupted-session recovery
pub mod flow; // Capture → review → submit state machine
pub mod models;
pub mod notify;
pub mod pipeline; // Quality gate, extraction, duplicate detection
pub mod storage;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by `RUST_LOG` or the crate default.
///
/// Hosts that bring their own subscriber can skip this; calling it twice
/// is harmless.
pub fn init_tracing() {
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("{} v{} logging initialized", config::APP_NAME, config::APP_VERSION);
    }
}
