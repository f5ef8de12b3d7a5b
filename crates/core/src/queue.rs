//! Durable local queue of scans awaiting upload.
//!
//! Records are keyed by a caller-supplied id, independent of the cache's
//! key scheme. They are never deleted here: a confirmed upload only flips
//! `synced`, which removes the record from [`LocalQueue::get_pending`].
//! A record mirrored from a cache entry carries that entry's key and can be
//! withdrawn before upload; withdrawn records are kept but never pending.
//! Every operation degrades to a no-op when storage is unavailable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use crate::clock::{Clock, SystemClock, to_millis_precision};
use crate::store::{LocalStore, degrade};
use crate::Error;

/// A stored queue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: String,
    pub correlation_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub synced: bool,
    /// Cache entry this record mirrors, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Pulled from upload before it was confirmed.
    #[serde(default)]
    pub withdrawn: bool,
}

/// Input to [`LocalQueue::put`].
///
/// `created_at` and `synced` default to now and false for new records; for
/// existing records an absent field keeps its stored value. Every put
/// clears a previous withdrawal.
#[derive(Debug, Clone, Default)]
pub struct NewQueueRecord {
    pub id: String,
    pub correlation_key: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub synced: Option<bool>,
    pub cache_key: Option<String>,
}

impl NewQueueRecord {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { id: id.into(), payload, ..Default::default() }
    }

    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }

    /// Mark the record as a mirror of the cache entry `key`.
    pub fn mirroring(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Handle to the local upload queue.
#[derive(Clone)]
pub struct LocalQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue").field("store", &self.store).finish_non_exhaustive()
    }
}

impl LocalQueue {
    pub fn new(store: LocalStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Insert or update a record by id.
    ///
    /// Returns the stored record, or `None` if storage is unavailable.
    pub async fn put(&self, record: NewQueueRecord) -> Option<QueueRecord> {
        degrade("queue.put", self.try_put(record).await, None)
    }

    /// Get a record by id.
    pub async fn get(&self, id: &str) -> Option<QueueRecord> {
        let id = id.to_string();
        let result = self
            .store
            .call(move |conn| select_one(conn, &id))
            .await;
        degrade("queue.get", result, None)
    }

    /// The `limit` most recent records, newest first.
    pub async fn get_recent(&self, limit: usize) -> Vec<QueueRecord> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let result = self
            .store
            .call(move |conn| {
                select_many(
                    conn,
                    "SELECT id, correlation_key, created_at, payload, synced, cache_key, withdrawn
                     FROM scan_queue ORDER BY created_at DESC LIMIT ?1",
                    params![limit],
                )
            })
            .await;
        degrade("queue.get_recent", result, Vec::new())
    }

    /// Records neither synced nor withdrawn, newest first.
    pub async fn get_pending(&self) -> Vec<QueueRecord> {
        let result = self
            .store
            .call(|conn| {
                select_many(
                    conn,
                    "SELECT id, correlation_key, created_at, payload, synced, cache_key, withdrawn
                     FROM scan_queue WHERE synced = 0 AND withdrawn = 0 ORDER BY created_at DESC",
                    [],
                )
            })
            .await;
        degrade("queue.get_pending", result, Vec::new())
    }

    /// Flag a record as synced.
    ///
    /// Returns false if the record does not exist, true otherwise (including
    /// when it was already synced).
    pub async fn mark_synced(&self, id: &str) -> bool {
        let id = id.to_string();
        let result = self
            .store
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("UPDATE scan_queue SET synced = 1 WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await;
        degrade("queue.mark_synced", result, false)
    }

    /// Pull a pending record from upload.
    ///
    /// Returns true if a pending record was withdrawn. Synced records are
    /// left alone. A later [`put`](Self::put) re-arms the record.
    pub async fn withdraw(&self, id: &str) -> bool {
        let id = id.to_string();
        let result = self
            .store
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "UPDATE scan_queue SET withdrawn = 1 WHERE id = ?1 AND synced = 0 AND withdrawn = 0",
                    params![id],
                )?;
                Ok(count > 0)
            })
            .await;
        degrade("queue.withdraw", result, false)
    }

    async fn try_put(&self, record: NewQueueRecord) -> Result<Option<QueueRecord>, Error> {
        if record.id.is_empty() {
            return Err(Error::InvalidInput("queue record id must not be empty".into()));
        }
        let payload = serde_json::to_string(&record.payload)?;
        let created_at = record.created_at.map(|at| at.timestamp_millis());
        let created_default = to_millis_precision(self.clock.now()).timestamp_millis();
        let synced = record.synced.map(i32::from);

        self.store
            .call(move |conn| -> Result<Option<QueueRecord>, Error> {
                conn.execute(
                    "INSERT INTO scan_queue (id, correlation_key, created_at, payload, synced, cache_key, withdrawn)
                     VALUES (?1, ?2, COALESCE(?3, ?4), ?5, COALESCE(?6, 0), ?7, 0)
                     ON CONFLICT(id) DO UPDATE SET
                         correlation_key = excluded.correlation_key,
                         created_at = COALESCE(?3, scan_queue.created_at),
                         payload = excluded.payload,
                         synced = COALESCE(?6, scan_queue.synced),
                         cache_key = COALESCE(?7, scan_queue.cache_key),
                         withdrawn = 0",
                    params![
                        record.id,
                        record.correlation_key,
                        created_at,
                        created_default,
                        payload,
                        synced,
                        record.cache_key
                    ],
                )?;
                select_one(conn, &record.id)
            })
            .await
    }
}

fn select_one(conn: &rusqlite::Connection, id: &str) -> Result<Option<QueueRecord>, Error> {
    let mut records = select_many(
        conn,
        "SELECT id, correlation_key, created_at, payload, synced, cache_key, withdrawn
         FROM scan_queue WHERE id = ?1",
        params![id],
    )?;
    Ok(records.pop())
}

fn select_many<P: rusqlite::Params>(conn: &rusqlite::Connection, sql: &str, params: P) -> Result<Vec<QueueRecord>, Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i32>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, i32>(6)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, correlation_key, created_at, payload, synced, cache_key, withdrawn) = row?;
        let Some(created_at) = DateTime::from_timestamp_millis(created_at) else {
            tracing::warn!(%id, created_at, "skipping queue record with invalid timestamp");
            continue;
        };
        let payload = serde_json::from_str(&payload).unwrap_or_else(|e| {
            tracing::warn!(%id, error = %e, "queue payload is not valid JSON; keeping it as a string");
            serde_json::Value::String(payload)
        });
        records.push(QueueRecord {
            id,
            correlation_key,
            created_at,
            payload,
            synced: synced == 1,
            cache_key,
            withdrawn: withdrawn == 1,
        });
    }
    Ok(records)
}
