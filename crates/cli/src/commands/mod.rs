//! Subcommand implementations.

pub mod queue;
pub mod scan;
pub mod sync;

use anyhow::Result;
use corkscan_core::{AnalysisCache, AppConfig, LocalQueue, LocalStore};
use serde::Serialize;

/// Stores shared by every subcommand.
pub struct Context {
    pub config: AppConfig,
    pub store: LocalStore,
    pub cache: AnalysisCache,
    pub queue: LocalQueue,
}

impl Context {
    /// Open the configured database. An unusable database leaves the
    /// commands running against an unavailable store.
    pub async fn open(config: AppConfig) -> Self {
        let store = LocalStore::open_or_unavailable(&config.db_path).await;
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: LocalStore) -> Self {
        let cache = AnalysisCache::new(store.clone());
        let queue = LocalQueue::new(store.clone());
        Self { config, store, cache, queue }
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
