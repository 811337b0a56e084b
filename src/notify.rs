//! Notification sink: the host shows toasts, we only report milestones.

use std::sync::Mutex;

use crate::models::NotificationKind;

/// Fire-and-forget user notification. Implementations must not block and
/// the flow never branches on the outcome.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind, message: &str);
}

/// Logs notifications instead of displaying them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Error => tracing::error!(kind = %kind, "{message}"),
            NotificationKind::Warning => tracing::warn!(kind = %kind, "{message}"),
            _ => tracing::info!(kind = %kind, "{message}"),
        }
    }
}

/// Keeps every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<(NotificationKind, String)> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.received().into_iter().map(|(k, _)| k).collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        if let Ok(mut received) = self.received.lock() {
            received.push((kind, message.to_string()));
        }
    }
}
