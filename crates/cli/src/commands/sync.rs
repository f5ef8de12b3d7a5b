//! Sync subcommands.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use corkscan_sync::{
    BackoffPolicy, HttpProbe, HttpRemoteStore, ReconcilePolicy, RemoteConfig, RunOutcome, SyncCoordinator,
    SyncOutcome, WatchProbe, watch_connectivity,
};
use serde::Serialize;

use super::{Context, print_json};

/// JSON summary of one pass.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum PassSummary {
    Cancelled,
    AlreadyRunning,
    NothingPending,
    Offline { pending: usize },
    Completed { synced: usize, failed: usize, inserted: usize, duplicates: usize, outcomes: Vec<OutcomeSummary> },
    Failed { message: String, retry_in_ms: u64 },
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct OutcomeSummary {
    local_id: String,
    remote_id: String,
    duplicate: bool,
}

impl From<SyncOutcome> for OutcomeSummary {
    fn from(outcome: SyncOutcome) -> Self {
        Self { local_id: outcome.local_id, remote_id: outcome.remote_id, duplicate: outcome.duplicate }
    }
}

impl From<RunOutcome> for PassSummary {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Cancelled => Self::Cancelled,
            RunOutcome::AlreadyRunning => Self::AlreadyRunning,
            RunOutcome::NothingPending => Self::NothingPending,
            RunOutcome::Offline { pending } => Self::Offline { pending },
            RunOutcome::Completed(report) => Self::Completed {
                synced: report.synced,
                failed: report.failed,
                inserted: report.inserted,
                duplicates: report.duplicates,
                outcomes: report.outcomes.into_iter().map(OutcomeSummary::from).collect(),
            },
            RunOutcome::Failed { message, retry_in } => {
                Self::Failed { message, retry_in_ms: u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX) }
            }
        }
    }
}

fn remote_store(ctx: &Context) -> Result<Arc<HttpRemoteStore>> {
    ctx.config.require_remote_url()?;
    let config = RemoteConfig::from_app_config(&ctx.config)?;
    Ok(Arc::new(HttpRemoteStore::new(config)?))
}

/// Promote saved entries and run a single pass.
pub async fn sync_once(ctx: &Context) -> Result<()> {
    let owner = ctx.config.require_user_id()?.to_string();
    let remote = remote_store(ctx)?;
    let probe = Arc::new(HttpProbe::from_app_config(&ctx.config)?);

    let coordinator = SyncCoordinator::builder(ctx.cache.clone(), ctx.queue.clone(), remote, probe, owner)
        .reconcile_policy(ReconcilePolicy::from_config(&ctx.config))
        .backoff(BackoffPolicy::from_config(&ctx.config))
        .build();

    let summary = PassSummary::from(coordinator.notify().await);
    coordinator.teardown().await;
    print_json(&summary)
}

/// Run the sync driver until Ctrl-C.
pub async fn watch(ctx: &Context) -> Result<()> {
    if !ctx.store.is_available() {
        bail!("local storage is unavailable; nothing to sync");
    }
    let owner = ctx.config.require_user_id()?.to_string();
    let remote = remote_store(ctx)?;
    let http_probe = Arc::new(HttpProbe::from_app_config(&ctx.config)?);
    let (online, probe_task) = watch_connectivity(http_probe, ctx.config.probe_interval());

    let coordinator = SyncCoordinator::builder(
        ctx.cache.clone(),
        ctx.queue.clone(),
        remote,
        Arc::new(WatchProbe::new(online.clone())),
        owner,
    )
    .reconcile_policy(ReconcilePolicy::from_config(&ctx.config))
    .backoff(BackoffPolicy::from_config(&ctx.config))
    .build();

    let driver = coordinator
        .spawn_driver(ctx.cache.subscribe(), online)
        .context("sync driver already running")?;
    tracing::info!("sync driver running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down sync driver");
    coordinator.teardown().await;
    probe_task.abort();
    driver.await.context("sync driver panicked")?;
    Ok(())
}
