//! Canonical in-memory shape of a cached analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached label analysis.
///
/// Lifecycle: created unsaved when an analysis completes, flipped to
/// `saved` by the user, promoted to `sync_ready` by the coordinator, and
/// finally stamped with a `remote_id` once the remote store confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_thumbnail: Option<String>,
    pub saved: bool,
    pub sync_ready: bool,
    pub remote_id: Option<String>,
    pub label_hash: Option<String>,
    pub source_text: Option<String>,
}

impl CacheEntry {
    /// A fresh, unsaved entry.
    pub fn new(key: impl Into<String>, timestamp: DateTime<Utc>, result: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            timestamp,
            result,
            image_thumbnail: None,
            saved: false,
            sync_ready: false,
            remote_id: None,
            label_hash: None,
            source_text: None,
        }
    }

    /// Clear `sync_ready` unless the entry is saved and not yet synced.
    pub fn normalized(mut self) -> Self {
        if self.sync_ready && (!self.saved || self.remote_id.is_some()) {
            self.sync_ready = false;
        }
        self
    }

    /// Saved, not yet promoted, and not yet synced.
    pub fn is_promotable(&self) -> bool {
        self.saved && !self.sync_ready && self.remote_id.is_none()
    }

    /// The remote store has confirmed this entry.
    pub fn is_synced(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Key used to match this entry against remote records.
    pub fn correlation_key(&self) -> &str {
        self.label_hash.as_deref().unwrap_or(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry::new("abc", DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(), serde_json::json!({}))
    }

    #[test]
    fn test_normalized_clears_unsaved_sync_ready() {
        let e = CacheEntry { sync_ready: true, ..entry() }.normalized();
        assert!(!e.sync_ready);
    }

    #[test]
    fn test_normalized_clears_synced_sync_ready() {
        let e = CacheEntry { saved: true, sync_ready: true, remote_id: Some("r1".into()), ..entry() }.normalized();
        assert!(!e.sync_ready);
    }

    #[test]
    fn test_normalized_keeps_valid_sync_ready() {
        let e = CacheEntry { saved: true, sync_ready: true, ..entry() }.normalized();
        assert!(e.sync_ready);
    }

    #[test]
    fn test_promotable() {
        assert!(!entry().is_promotable());
        assert!(CacheEntry { saved: true, ..entry() }.is_promotable());
        assert!(!CacheEntry { saved: true, remote_id: Some("r".into()), ..entry() }.is_promotable());
    }

    #[test]
    fn test_correlation_key_prefers_label_hash() {
        assert_eq!(entry().correlation_key(), "abc");
        let e = CacheEntry { label_hash: Some("deadbeef".into()), ..entry() };
        assert_eq!(e.correlation_key(), "deadbeef");
    }
}
