//! Offline synchronization for corkscan.
//!
//! This crate mirrors locally saved analyses to a remote store:
//! - [`remote`]: the remote store contract and its HTTP implementation
//! - [`probe`]: connectivity detection
//! - [`reconcile`]: duplicate suppression and idempotent, retried uploads
//! - [`coordinator`]: when to run a pass (single-flight, backoff, triggers)

pub mod coordinator;
pub mod error;
pub mod probe;
pub mod reconcile;
pub mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{BackoffPolicy, RunOutcome, Scheduler, SyncCoordinator, TimerHandle, TokioScheduler};
pub use error::SyncError;
pub use probe::{ConnectivityProbe, HttpProbe, WatchProbe, watch_connectivity};
pub use reconcile::{ReconcilePolicy, ReconcileReport, ReconciliationService, SyncOutcome};
pub use remote::{HttpRemoteStore, RemoteConfig, RemoteError, RemoteRecord, RemoteStore, TimeWindow};
