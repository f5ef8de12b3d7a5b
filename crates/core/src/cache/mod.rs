//! Content-addressed cache of label analyses.
//!
//! Entries are keyed by a hash of their normalized label text and stored in
//! a versioned JSON envelope (see [`envelope`]). Every public operation
//! degrades to a safe default when storage fails; nothing here returns an
//! error to the caller.
//!
//! Mutations publish a [`CacheChanged`] signal on a broadcast channel. The
//! signal carries no payload: subscribers re-read whatever state they need.

pub mod entry;
pub mod envelope;
pub mod hash;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_rusqlite::{params, rusqlite};

use crate::clock::{Clock, SystemClock, to_millis_precision};
use crate::store::{LocalStore, degrade};
use crate::Error;

pub use entry::CacheEntry;
pub use hash::{compute_cache_key, compute_label_hash, normalize_source_text};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Payload-free "cache content changed" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheChanged;

/// Outcome of a read-modify-write on one entry.
enum Update {
    Missing,
    Unchanged,
    Changed,
}

/// Handle to the analysis cache.
///
/// Cheap to clone; clones share the store and the change channel.
#[derive(Clone)]
pub struct AnalysisCache {
    store: LocalStore,
    clock: Arc<dyn Clock>,
    changes: broadcast::Sender<CacheChanged>,
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache").field("store", &self.store).finish_non_exhaustive()
    }
}

impl AnalysisCache {
    pub fn new(store: LocalStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { store, clock, changes }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChanged> {
        self.changes.subscribe()
    }

    /// Get an entry by key, upgrading older record shapes.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        degrade("cache.get", self.try_get(key).await, None)
    }

    /// Store an entry under `key`.
    ///
    /// The entry's own key is replaced by `key`. Returns false if nothing was
    /// written.
    pub async fn set(&self, key: &str, entry: CacheEntry) -> bool {
        let entry = CacheEntry { key: key.to_string(), ..entry }.normalized();
        let written = degrade("cache.set", self.try_set(entry).await, false);
        if written {
            self.notify_changed();
        }
        written
    }

    /// Delete an entry. Returns true if it existed.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = degrade("cache.remove", self.try_remove(key).await, false);
        if removed {
            self.notify_changed();
        }
        removed
    }

    /// Store a freshly completed analysis keyed by its label text.
    ///
    /// Re-analyzing the same label keeps the entry's saved and sync state.
    /// Returns `None` if the entry could not be written.
    pub async fn put_analysis(
        &self, source_text: &str, result: Value, image_thumbnail: Option<String>, label_hash: Option<String>,
    ) -> Option<CacheEntry> {
        let key = compute_cache_key(source_text);
        let now = self.now();
        let entry = match self.get(&key).await {
            Some(existing) => CacheEntry {
                timestamp: now,
                result,
                image_thumbnail: image_thumbnail.or(existing.image_thumbnail),
                label_hash: label_hash.or(existing.label_hash),
                source_text: Some(source_text.to_string()),
                ..existing
            },
            None => CacheEntry {
                image_thumbnail,
                label_hash,
                source_text: Some(source_text.to_string()),
                ..CacheEntry::new(key.clone(), now, result)
            },
        };
        self.set(&key, entry.clone()).await.then_some(entry)
    }

    /// Mark an entry as saved by the user and refresh its timestamp.
    ///
    /// Saved entries are picked up by the next sync promotion.
    pub async fn mark_saved(&self, key: &str) -> bool {
        let now = self.now();
        self.update("cache.mark_saved", key, move |entry| {
            entry.saved = true;
            entry.timestamp = now;
            true
        })
        .await
    }

    /// Clear the saved flag; an unsaved entry is never synced.
    pub async fn mark_unsaved(&self, key: &str) -> bool {
        self.update("cache.mark_unsaved", key, |entry| {
            let changed = entry.saved || entry.sync_ready;
            entry.saved = false;
            entry.sync_ready = false;
            changed
        })
        .await
    }

    /// Record the remote id for a synced entry.
    ///
    /// Idempotent: returns true whenever the entry exists, and only signals a
    /// change the first time.
    pub async fn mark_synced(&self, key: &str, remote_id: &str) -> bool {
        let remote_id = remote_id.to_string();
        self.update("cache.mark_synced", key, move |entry| {
            let changed = entry.sync_ready || entry.remote_id.as_deref() != Some(remote_id.as_str());
            entry.remote_id = Some(remote_id);
            entry.sync_ready = false;
            changed
        })
        .await
    }

    /// Flip every saved, unsynced entry to ready-for-sync.
    ///
    /// Returns the number of entries promoted. A single change signal is
    /// published for the whole batch, and none when nothing changed.
    pub async fn promote_ready_for_sync(&self) -> usize {
        let promoted = degrade("cache.promote_ready_for_sync", self.try_promote().await, 0);
        if promoted > 0 {
            tracing::debug!(promoted, "promoted saved entries for sync");
            self.notify_changed();
        }
        promoted
    }

    /// All entries, newest first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let mut entries = degrade("cache.entries", self.try_entries().await, Vec::new());
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Entries currently flagged ready-for-sync, oldest first.
    pub async fn ready_for_sync(&self) -> Vec<CacheEntry> {
        let mut ready: Vec<_> = self.entries().await.into_iter().filter(|e| e.sync_ready).collect();
        ready.reverse();
        ready
    }

    /// Drop the oldest unsaved entries until at most `max_entries` remain.
    ///
    /// Saved entries are never evicted. Returns the number deleted.
    pub async fn evict_unsaved(&self, max_entries: usize) -> usize {
        let evicted = degrade("cache.evict_unsaved", self.try_evict_unsaved(max_entries).await, 0);
        if evicted > 0 {
            tracing::debug!(evicted, max_entries, "evicted unsaved cache entries");
            self.notify_changed();
        }
        evicted
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        to_millis_precision(self.clock.now())
    }

    fn notify_changed(&self) {
        // No subscribers is fine.
        let _ = self.changes.send(CacheChanged);
    }

    async fn update<F>(&self, op: &'static str, key: &str, apply: F) -> bool
    where
        F: FnOnce(&mut CacheEntry) -> bool + Send + 'static,
    {
        match degrade(op, self.try_update(key, apply).await, Update::Missing) {
            Update::Missing => false,
            Update::Unchanged => true,
            Update::Changed => {
                self.notify_changed();
                true
            }
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        self.store
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let body = select_body(conn, &key)?;
                Ok(body.and_then(|body| decode_row(&key, &body)))
            })
            .await
    }

    async fn try_set(&self, entry: CacheEntry) -> Result<bool, Error> {
        let body = envelope::encode_entry(&entry)?;
        self.store
            .call(move |conn| -> Result<bool, Error> {
                write_body(conn, &entry, &body)?;
                Ok(true)
            })
            .await
    }

    async fn try_remove(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.store
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM analysis_cache WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
    }

    async fn try_update<F>(&self, key: &str, apply: F) -> Result<Update, Error>
    where
        F: FnOnce(&mut CacheEntry) -> bool + Send + 'static,
    {
        let key = key.to_string();
        self.store
            .call(move |conn| -> Result<Update, Error> {
                let tx = conn.transaction()?;
                let Some(mut entry) = select_body(&tx, &key)?.and_then(|body| decode_row(&key, &body)) else {
                    return Ok(Update::Missing);
                };
                if !apply(&mut entry) {
                    return Ok(Update::Unchanged);
                }
                let entry = entry.normalized();
                write_body(&tx, &entry, &envelope::encode_entry(&entry)?)?;
                tx.commit()?;
                Ok(Update::Changed)
            })
            .await
    }

    async fn try_promote(&self) -> Result<usize, Error> {
        self.store
            .call(|conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let mut promoted = 0;
                for mut entry in select_all(&tx)? {
                    if !entry.is_promotable() {
                        continue;
                    }
                    entry.sync_ready = true;
                    write_body(&tx, &entry, &envelope::encode_entry(&entry)?)?;
                    promoted += 1;
                }
                tx.commit()?;
                Ok(promoted)
            })
            .await
    }

    async fn try_entries(&self) -> Result<Vec<CacheEntry>, Error> {
        self.store.call(|conn| select_all(conn)).await
    }

    async fn try_evict_unsaved(&self, max_entries: usize) -> Result<usize, Error> {
        self.store
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let mut unsaved: Vec<_> = select_all(&tx)?.into_iter().filter(|e| !e.saved).collect();
                if unsaved.len() <= max_entries {
                    return Ok(0);
                }
                unsaved.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                let excess = unsaved.len() - max_entries;
                let mut evicted = 0;
                for entry in unsaved.iter().take(excess) {
                    evicted += tx.execute("DELETE FROM analysis_cache WHERE key = ?1", params![entry.key])?;
                }
                tx.commit()?;
                Ok(evicted)
            })
            .await
    }
}

fn select_body(conn: &rusqlite::Connection, key: &str) -> Result<Option<String>, Error> {
    let result = conn.query_row("SELECT body FROM analysis_cache WHERE key = ?1", params![key], |row| row.get(0));
    match result {
        Ok(body) => Ok(Some(body)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn select_all(conn: &rusqlite::Connection) -> Result<Vec<CacheEntry>, Error> {
    let mut stmt = conn.prepare("SELECT key, body FROM analysis_cache")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut entries = Vec::new();
    for row in rows {
        let (key, body) = row?;
        if let Some(entry) = decode_row(&key, &body) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn write_body(conn: &rusqlite::Connection, entry: &CacheEntry, body: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO analysis_cache (key, body, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             body = excluded.body,
             updated_at = excluded.updated_at",
        params![entry.key, body, entry.timestamp.timestamp_millis()],
    )?;
    Ok(())
}

/// Decode a row, logging and skipping bodies that cannot be read.
fn decode_row(key: &str, body: &str) -> Option<CacheEntry> {
    match envelope::decode_entry(key, body) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(key, error = %e, "skipping unreadable cache record");
            None
        }
    }
}
