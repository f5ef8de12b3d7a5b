//! Decides when reconciliation runs.
//!
//! A coordinator owns one session's sync state. It runs at most one pass at
//! a time, skips passes while offline, and after a failed pass schedules a
//! retry with exponential backoff. Cache changes, connectivity transitions
//! and due retries all reach it through a single driver task
//! ([`SyncCoordinator::spawn_driver`]).

mod backoff;
mod scheduler;

pub use backoff::BackoffPolicy;
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use corkscan_core::{
    AnalysisCache, CacheChanged, LocalQueue, NewQueueRecord, QueueRecord, SyncEvent, TelemetrySink, TracingSink,
};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::probe::ConnectivityProbe;
use crate::reconcile::{ReconcilePolicy, ReconcileReport, ReconciliationService};
use crate::remote::RemoteStore;

/// What a single [`SyncCoordinator::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The coordinator was torn down, before or during the pass.
    Cancelled,
    /// Another pass was in flight; this one was dropped.
    AlreadyRunning,
    NothingPending,
    /// Offline; no retry is scheduled, the next connectivity change triggers one.
    Offline { pending: usize },
    Completed(ReconcileReport),
    /// The pass failed as a whole and a retry is scheduled.
    Failed { message: String, retry_in: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverSignal {
    RetryDue,
    Shutdown,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    retry_delay: Duration,
    in_flight: bool,
    pending_timer: Option<TimerHandle>,
}

/// Single-flight sync driver for one session.
pub struct SyncCoordinator {
    cache: AnalysisCache,
    queue: LocalQueue,
    reconciler: ReconciliationService,
    probe: Arc<dyn ConnectivityProbe>,
    owner: String,
    telemetry: Arc<dyn TelemetrySink>,
    scheduler: Arc<dyn Scheduler>,
    backoff: BackoffPolicy,
    state: Mutex<CoordinatorState>,
    cancelled: AtomicBool,
    signals: mpsc::UnboundedSender<DriverSignal>,
    signal_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<DriverSignal>>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("owner", &self.owner)
            .field("backoff", &self.backoff)
            .field("cancelled", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncCoordinator`].
pub struct SyncCoordinatorBuilder {
    cache: AnalysisCache,
    queue: LocalQueue,
    remote: Arc<dyn RemoteStore>,
    probe: Arc<dyn ConnectivityProbe>,
    owner: String,
    telemetry: Arc<dyn TelemetrySink>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconcilePolicy,
    backoff: BackoffPolicy,
}

impl SyncCoordinatorBuilder {
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Arc<SyncCoordinator> {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let reconciler = ReconciliationService::new(self.remote, self.queue.clone(), self.telemetry.clone(), self.policy);
        Arc::new(SyncCoordinator {
            cache: self.cache,
            queue: self.queue,
            reconciler,
            probe: self.probe,
            owner: self.owner,
            telemetry: self.telemetry,
            scheduler: self.scheduler,
            backoff: self.backoff,
            state: Mutex::new(CoordinatorState::default()),
            cancelled: AtomicBool::new(false),
            signals,
            signal_rx: std::sync::Mutex::new(Some(signal_rx)),
        })
    }
}

impl SyncCoordinator {
    /// Start building a coordinator syncing on behalf of `owner`.
    ///
    /// Telemetry defaults to [`TracingSink`], scheduling to [`TokioScheduler`].
    pub fn builder(
        cache: AnalysisCache, queue: LocalQueue, remote: Arc<dyn RemoteStore>, probe: Arc<dyn ConnectivityProbe>,
        owner: impl Into<String>,
    ) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder {
            cache,
            queue,
            remote,
            probe,
            owner: owner.into(),
            telemetry: Arc::new(TracingSink),
            scheduler: Arc::new(TokioScheduler),
            policy: ReconcilePolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Current backoff delay; zero unless the last pass failed.
    pub async fn retry_delay(&self) -> Duration {
        self.state.lock().await.retry_delay
    }

    /// React to a cache change: promote saved entries, then run a pass.
    pub async fn notify(&self) -> RunOutcome {
        if self.is_torn_down() {
            return RunOutcome::Cancelled;
        }
        self.cache.promote_ready_for_sync().await;
        self.run().await
    }

    /// Run one reconciliation pass unless one is already in flight.
    pub async fn run(&self) -> RunOutcome {
        if self.is_torn_down() {
            return RunOutcome::Cancelled;
        }
        {
            let mut state = self.state.lock().await;
            if state.in_flight {
                tracing::debug!("sync pass already in flight; dropping trigger");
                return RunOutcome::AlreadyRunning;
            }
            state.in_flight = true;
        }

        let outcome = self.run_pass().await;
        self.state.lock().await.in_flight = false;
        outcome
    }

    /// Driver reaction to a cache change.
    ///
    /// Only a change that promotes entries needs a pass. Every other change,
    /// including the coordinator's own promotion and sync marks, is absorbed
    /// here, so a pass never triggers another pass by itself.
    async fn on_cache_changed(&self) -> Option<RunOutcome> {
        if self.is_torn_down() {
            return None;
        }
        let promoted = self.cache.promote_ready_for_sync().await;
        if promoted == 0 {
            return None;
        }
        Some(self.run().await)
    }

    /// Stop the coordinator. Pending retries are cancelled and every later
    /// trigger is a no-op; results of an in-flight pass are discarded.
    pub async fn teardown(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(timer) = state.pending_timer.take() {
            timer.cancel();
        }
        state.retry_delay = Duration::ZERO;
        let _ = self.signals.send(DriverSignal::Shutdown);
        tracing::info!(owner = %self.owner, "sync coordinator torn down");
    }

    /// Start the driver task.
    ///
    /// The driver runs an initial [`notify`](Self::notify), then runs a pass
    /// whenever a cache change promotes saved entries, whenever `online`
    /// turns true, and when a scheduled retry is due. It exits on
    /// teardown or when its inputs close. Returns `None` if a driver was
    /// already started.
    pub fn spawn_driver(
        self: &Arc<Self>, mut cache_changes: broadcast::Receiver<CacheChanged>, mut online: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let mut signals = self.signal_rx.lock().ok()?.take()?;
        let coordinator = Arc::clone(self);

        Some(tokio::spawn(async move {
            coordinator.notify().await;
            while !coordinator.is_torn_down() {
                tokio::select! {
                    changed = cache_changes.recv() => match changed {
                        Ok(CacheChanged) => {
                            coordinator.on_cache_changed().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "cache change notifications lagged");
                            coordinator.on_cache_changed().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let is_online = *online.borrow_and_update();
                        tracing::debug!(online = is_online, "connectivity changed");
                        if is_online {
                            coordinator.run().await;
                        }
                    },
                    signal = signals.recv() => match signal {
                        Some(DriverSignal::RetryDue) => {
                            coordinator.run().await;
                        }
                        Some(DriverSignal::Shutdown) | None => break,
                    },
                }
            }
            tracing::debug!("sync driver stopped");
        }))
    }

    async fn run_pass(&self) -> RunOutcome {
        self.bridge_ready_entries().await;

        let pending = self.withdraw_unsaved(self.queue.get_pending().await).await;
        if pending.is_empty() {
            return RunOutcome::NothingPending;
        }

        if !self.probe.is_online().await {
            tracing::debug!(pending = pending.len(), "offline; skipping sync pass");
            self.telemetry.emit(SyncEvent::OfflineSkip { pending: pending.len() });
            return RunOutcome::Offline { pending: pending.len() };
        }

        self.telemetry.emit(SyncEvent::Attempt { pending: pending.len() });
        let result = self.reconciler.reconcile_until(&pending, &self.owner, &self.cancelled).await;
        if self.is_torn_down() {
            tracing::debug!("coordinator torn down during pass; discarding results");
            return RunOutcome::Cancelled;
        }

        match result {
            Ok(report) => {
                self.reset_backoff().await;
                let mirrored: HashMap<&str, &str> = pending
                    .iter()
                    .filter_map(|r| Some((r.id.as_str(), r.cache_key.as_deref()?)))
                    .collect();
                for outcome in &report.outcomes {
                    if let Some(key) = mirrored.get(outcome.local_id.as_str()) {
                        self.cache.mark_synced(key, &outcome.remote_id).await;
                    }
                }
                self.telemetry.emit(SyncEvent::Completed { inserted: report.inserted, duplicates: report.duplicates });
                RunOutcome::Completed(report)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, "sync pass failed");
                self.telemetry.emit(SyncEvent::Failed { message: message.clone() });
                let retry_in = self.schedule_retry().await;
                RunOutcome::Failed { message, retry_in }
            }
        }
    }

    /// Mirror every ready-for-sync cache entry into the queue as pending.
    async fn bridge_ready_entries(&self) {
        for entry in self.cache.ready_for_sync().await {
            let record = NewQueueRecord::new(entry.key.clone(), entry.result.clone())
                .with_correlation_key(entry.correlation_key())
                .created_at(entry.timestamp)
                .synced(false)
                .mirroring(entry.key.clone());
            if self.queue.put(record).await.is_none() {
                tracing::debug!(key = %entry.key, "could not queue ready cache entry");
            }
        }
    }

    /// Withdraw pending mirrors of cache entries that were unsaved or
    /// deleted since they were queued, returning the rest.
    async fn withdraw_unsaved(&self, pending: Vec<QueueRecord>) -> Vec<QueueRecord> {
        let mut batch = Vec::with_capacity(pending.len());
        for record in pending {
            let Some(key) = record.cache_key.as_deref() else {
                batch.push(record);
                continue;
            };
            if self.cache.get(key).await.is_some_and(|entry| entry.saved) {
                batch.push(record);
                continue;
            }
            if self.queue.withdraw(&record.id).await {
                tracing::debug!(local_id = %record.id, key, "withdrew queued scan whose cache entry is no longer saved");
            }
        }
        batch
    }

    async fn reset_backoff(&self) {
        let mut state = self.state.lock().await;
        state.retry_delay = Duration::ZERO;
        if let Some(timer) = state.pending_timer.take() {
            timer.cancel();
        }
    }

    async fn schedule_retry(&self) -> Duration {
        let mut state = self.state.lock().await;
        let delay = self.backoff.next_delay(state.retry_delay);
        state.retry_delay = delay;
        if let Some(timer) = state.pending_timer.take() {
            timer.cancel();
        }

        let signals = self.signals.clone();
        let timer = self.scheduler.schedule(
            delay,
            Box::new(move || {
                let _ = signals.send(DriverSignal::RetryDue);
            }),
        );
        state.pending_timer = Some(timer);

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(delay_ms, "sync retry scheduled");
        self.telemetry.emit(SyncEvent::BackoffScheduled { delay_ms });
        delay
    }
}
