//! Duplicate suppression and idempotent upload of pending scans.
//!
//! One pass over a batch of pending queue records:
//!
//! 1. Collect the distinct correlation keys; with none, skip the lookup.
//! 2. Fetch remote records with those keys created within the batch's time
//!    span widened by the dedupe window.
//! 3. A remote record with the same key no further than the window from a
//!    local record makes that record a duplicate: it is marked synced
//!    without uploading.
//! 4. Everything else is upserted by local id, with bounded exponential
//!    retry. A record that exhausts its attempts stays pending and the pass
//!    moves on.
//!
//! Only the lookup in step 2 can fail the pass as a whole.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use corkscan_core::{AppConfig, LocalQueue, QueueRecord, SyncEvent, TelemetrySink};

use crate::error::SyncError;
use crate::remote::{RemoteError, RemoteRecord, RemoteStore, TimeWindow};

/// Tunables for a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Maximum distance between local and remote creation times for a
    /// same-key record to count as a duplicate.
    pub dedupe_window: Duration,
    /// Upload attempts per record.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self { dedupe_window: Duration::from_secs(300), max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl ReconcilePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dedupe_window: config.dedupe_window(),
            max_attempts: config.upload_max_attempts,
            base_delay: config.upload_base_delay(),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exponent)
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.dedupe_window).unwrap_or(chrono::Duration::MAX)
    }
}

/// One record confirmed on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub local_id: String,
    pub remote_id: String,
    /// The record already existed remotely and was not uploaded.
    pub duplicate: bool,
}

/// Aggregate result of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records confirmed (uploaded or duplicate).
    pub synced: usize,
    /// Records that exhausted their attempts.
    pub failed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub outcomes: Vec<SyncOutcome>,
}

/// Remote records grouped by correlation key.
#[derive(Debug, Default)]
struct RemoteIndex {
    by_key: HashMap<String, Vec<RemoteRecord>>,
}

impl RemoteIndex {
    fn new(records: Vec<RemoteRecord>) -> Self {
        let mut by_key: HashMap<String, Vec<RemoteRecord>> = HashMap::new();
        for record in records {
            by_key.entry(record.correlation_key.clone()).or_default().push(record);
        }
        Self { by_key }
    }

    /// The remote record closest in time to `local` within `window`.
    fn find_duplicate(&self, local: &QueueRecord, window: chrono::Duration) -> Option<&RemoteRecord> {
        let key = local.correlation_key.as_deref()?;
        self.by_key
            .get(key)?
            .iter()
            .map(|remote| ((remote.created_at - local.created_at).abs(), remote))
            .filter(|(distance, _)| *distance <= window)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, remote)| remote)
    }
}

/// Reconciles pending queue records against the remote store.
#[derive(Clone)]
pub struct ReconciliationService {
    remote: Arc<dyn RemoteStore>,
    queue: LocalQueue,
    telemetry: Arc<dyn TelemetrySink>,
    policy: ReconcilePolicy,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl ReconciliationService {
    pub fn new(
        remote: Arc<dyn RemoteStore>, queue: LocalQueue, telemetry: Arc<dyn TelemetrySink>, policy: ReconcilePolicy,
    ) -> Self {
        Self { remote, queue, telemetry, policy }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Reconcile `batch` on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteIndex` if the duplicate lookup fails.
    /// Individual upload failures are counted in the report instead.
    pub async fn reconcile(&self, batch: &[QueueRecord], owner: &str) -> Result<ReconcileReport, SyncError> {
        self.reconcile_until(batch, owner, &AtomicBool::new(false)).await
    }

    /// Like [`reconcile`](Self::reconcile), but stops before the next record
    /// once `cancelled` is set. Records not reached stay pending.
    pub async fn reconcile_until(
        &self, batch: &[QueueRecord], owner: &str, cancelled: &AtomicBool,
    ) -> Result<ReconcileReport, SyncError> {
        let index = self.build_index(batch, owner).await?;
        let window = self.policy.window();
        let mut report = ReconcileReport::default();

        for record in batch {
            if cancelled.load(Ordering::SeqCst) {
                tracing::debug!(remaining = batch.len() - report.synced - report.failed, "reconciliation cancelled");
                break;
            }

            if let Some(remote) = index.find_duplicate(record, window) {
                tracing::debug!(local_id = %record.id, remote_id = %remote.id, "skipping upload of duplicate scan");
                self.confirm(&mut report, record, remote.id.clone(), true).await;
                continue;
            }

            match self.upload_with_retry(owner, record).await {
                Ok(remote_id) => self.confirm(&mut report, record, remote_id, false).await,
                Err(e) => {
                    tracing::warn!(local_id = %record.id, error = %e, "upload failed; record stays pending");
                    report.failed += 1;
                    self.telemetry.emit(SyncEvent::ScanFailed { local_id: record.id.clone(), reason: e.to_string() });
                }
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            duplicates = report.duplicates,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn build_index(&self, batch: &[QueueRecord], owner: &str) -> Result<RemoteIndex, SyncError> {
        let keyed: Vec<&QueueRecord> = batch.iter().filter(|r| r.correlation_key.is_some()).collect();
        let keys: Vec<String> = keyed
            .iter()
            .filter_map(|r| r.correlation_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let Some(window) = TimeWindow::around(keyed.iter().map(|r| r.created_at), self.policy.window()) else {
            return Ok(RemoteIndex::default());
        };

        let records = self
            .remote
            .find_matching(owner, &keys, window)
            .await
            .map_err(SyncError::RemoteIndex)?;
        tracing::debug!(keys = keys.len(), matches = records.len(), "built remote duplicate index");
        Ok(RemoteIndex::new(records))
    }

    async fn upload_with_retry(&self, owner: &str, record: &QueueRecord) -> Result<String, RemoteError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.remote.upsert(owner, record).await {
                Ok(remote_id) => return Ok(remote_id),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.policy.retry_delay(attempt);
                    tracing::debug!(local_id = %record.id, attempt, ?delay, error = %e, "upload attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn confirm(&self, report: &mut ReconcileReport, record: &QueueRecord, remote_id: String, duplicate: bool) {
        if !self.queue.mark_synced(&record.id).await {
            tracing::warn!(local_id = %record.id, %remote_id, "remote confirmed scan but the local queue was not updated");
        }
        report.synced += 1;
        if duplicate {
            report.duplicates += 1;
        } else {
            report.inserted += 1;
        }
        self.telemetry.emit(SyncEvent::ScanSucceeded { local_id: record.id.clone(), duplicate });
        report.outcomes.push(SyncOutcome { local_id: record.id.clone(), remote_id, duplicate });
    }
}
