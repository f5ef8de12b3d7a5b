//! Fire-and-forget sync telemetry.
//!
//! Events are emitted by the reconciliation service and the coordinator.
//! Sinks must not block and must not fail the caller.

use serde::Serialize;

/// A telemetry event emitted during synchronization.
///
/// Serializes as `{"event": "sync_attempt", "pending": 3}` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A pass was skipped because the device is offline.
    #[serde(rename = "sync_offline_skip")]
    OfflineSkip { pending: usize },

    /// A reconciliation pass is starting.
    #[serde(rename = "sync_attempt")]
    Attempt { pending: usize },

    /// A reconciliation pass finished.
    #[serde(rename = "sync_completed")]
    Completed { inserted: usize, duplicates: usize },

    /// A reconciliation pass failed as a whole.
    #[serde(rename = "sync_failed")]
    Failed { message: String },

    /// A retry of the whole pass has been scheduled.
    #[serde(rename = "sync_backoff_scheduled")]
    BackoffScheduled { delay_ms: u64 },

    /// One record was uploaded or recognized as a duplicate.
    #[serde(rename = "sync_scan_succeeded")]
    ScanSucceeded { local_id: String, duplicate: bool },

    /// One record exhausted its upload attempts.
    #[serde(rename = "sync_scan_failed")]
    ScanFailed { local_id: String, reason: String },
}

impl SyncEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::OfflineSkip { .. } => "sync_offline_skip",
            SyncEvent::Attempt { .. } => "sync_attempt",
            SyncEvent::Completed { .. } => "sync_completed",
            SyncEvent::Failed { .. } => "sync_failed",
            SyncEvent::BackoffScheduled { .. } => "sync_backoff_scheduled",
            SyncEvent::ScanSucceeded { .. } => "sync_scan_succeeded",
            SyncEvent::ScanFailed { .. } => "sync_scan_failed",
        }
    }
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: SyncEvent) {
        let name = event.name();
        match event {
            SyncEvent::OfflineSkip { pending } | SyncEvent::Attempt { pending } => {
                tracing::info!(event = name, pending, "sync telemetry");
            }
            SyncEvent::Completed { inserted, duplicates } => {
                tracing::info!(event = name, inserted, duplicates, "sync telemetry");
            }
            SyncEvent::Failed { message } => {
                tracing::warn!(event = name, %message, "sync telemetry");
            }
            SyncEvent::BackoffScheduled { delay_ms } => {
                tracing::info!(event = name, delay_ms, "sync telemetry");
            }
            SyncEvent::ScanSucceeded { local_id, duplicate } => {
                tracing::debug!(event = name, %local_id, duplicate, "sync telemetry");
            }
            SyncEvent::ScanFailed { local_id, reason } => {
                tracing::warn!(event = name, %local_id, %reason, "sync telemetry");
            }
        }
    }
}
