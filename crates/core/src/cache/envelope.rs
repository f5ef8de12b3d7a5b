//! Versioned record envelopes and their upgrade chain.
//!
//! Four record shapes have been persisted over time. Every stored body is
//! decoded into its historical shape and upgraded step by step into
//! [`CacheEntry`]. Each step is total and fills new fields with defaults;
//! nothing outside this module deals with legacy shapes.
//!
//! | version | adds |
//! |---|---|
//! | 1 (no tag) | `key`, `timestamp`, `result`, `imageThumbnail` |
//! | 2 | `saved` |
//! | 3 | `syncReady`, `remoteId` |
//! | 4 | `labelHash`, `sourceText` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entry::CacheEntry;
use crate::Error;

/// Version tag written on every stored record.
pub const CURRENT_VERSION: u64 = 4;

const VERSION_FIELD: &str = "version";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordV1 {
    #[serde(default)]
    pub key: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub image_thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordV2 {
    #[serde(default)]
    pub key: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub image_thumbnail: Option<String>,
    #[serde(default)]
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordV3 {
    #[serde(default)]
    pub key: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub image_thumbnail: Option<String>,
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub sync_ready: bool,
    #[serde(default)]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordV4 {
    #[serde(default)]
    pub key: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub image_thumbnail: Option<String>,
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub sync_ready: bool,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub label_hash: Option<String>,
    #[serde(default)]
    pub source_text: Option<String>,
}

impl From<RecordV1> for RecordV2 {
    fn from(r: RecordV1) -> Self {
        Self { key: r.key, timestamp: r.timestamp, result: r.result, image_thumbnail: r.image_thumbnail, saved: false }
    }
}

impl From<RecordV2> for RecordV3 {
    fn from(r: RecordV2) -> Self {
        Self {
            key: r.key,
            timestamp: r.timestamp,
            result: r.result,
            image_thumbnail: r.image_thumbnail,
            saved: r.saved,
            sync_ready: false,
            remote_id: None,
        }
    }
}

impl From<RecordV3> for RecordV4 {
    fn from(r: RecordV3) -> Self {
        Self {
            key: r.key,
            timestamp: r.timestamp,
            result: r.result,
            image_thumbnail: r.image_thumbnail,
            saved: r.saved,
            sync_ready: r.sync_ready,
            remote_id: r.remote_id,
            label_hash: None,
            source_text: None,
        }
    }
}

impl From<RecordV4> for CacheEntry {
    fn from(r: RecordV4) -> Self {
        CacheEntry {
            key: r.key,
            timestamp: r.timestamp,
            result: r.result,
            image_thumbnail: r.image_thumbnail,
            saved: r.saved,
            sync_ready: r.sync_ready,
            remote_id: r.remote_id,
            label_hash: r.label_hash,
            source_text: r.source_text,
        }
        .normalized()
    }
}

/// A stored record in the shape it was written with.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    V1(RecordV1),
    V2(RecordV2),
    V3(RecordV3),
    V4(RecordV4),
}

impl StoredRecord {
    /// Decode a JSON body by its version tag.
    ///
    /// Untagged bodies are version 1. Tags newer than [`CURRENT_VERSION`]
    /// decode as the current shape.
    pub fn decode(value: Value) -> Result<Self, Error> {
        let record = match version_of(&value) {
            None | Some(0) | Some(1) => StoredRecord::V1(serde_json::from_value(value)?),
            Some(2) => StoredRecord::V2(serde_json::from_value(value)?),
            Some(3) => StoredRecord::V3(serde_json::from_value(value)?),
            Some(_) => StoredRecord::V4(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    pub fn version(&self) -> u64 {
        match self {
            StoredRecord::V1(_) => 1,
            StoredRecord::V2(_) => 2,
            StoredRecord::V3(_) => 3,
            StoredRecord::V4(_) => 4,
        }
    }

    /// Upgrade through every intermediate shape to the canonical entry.
    pub fn upgrade(self) -> CacheEntry {
        let v4 = match self {
            StoredRecord::V1(r) => RecordV4::from(RecordV3::from(RecordV2::from(r))),
            StoredRecord::V2(r) => RecordV4::from(RecordV3::from(r)),
            StoredRecord::V3(r) => RecordV4::from(r),
            StoredRecord::V4(r) => r,
        };
        CacheEntry::from(v4)
    }
}

/// Read the version tag, accepting numbers and numeric strings.
fn version_of(value: &Value) -> Option<u64> {
    match value.get(VERSION_FIELD)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u64,
    #[serde(flatten)]
    entry: &'a CacheEntry,
}

/// Decode a stored body into a canonical entry.
///
/// The row key is authoritative: shapes that did not persist their key, or
/// persisted a different one, take the key of the row.
pub fn decode_entry(row_key: &str, body: &str) -> Result<CacheEntry, Error> {
    let value: Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(Error::Serialization(format!("cache record {row_key} is not an object")));
    }
    let mut entry = StoredRecord::decode(value)?.upgrade();
    entry.key = row_key.to_string();
    Ok(entry)
}

/// Encode an entry in the current envelope version.
pub fn encode_entry(entry: &CacheEntry) -> Result<String, Error> {
    Ok(serde_json::to_string(&Envelope { version: CURRENT_VERSION, entry })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TS: i64 = 1_700_000_000_000;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(TS).unwrap()
    }

    #[test]
    fn test_untagged_record_is_v1() {
        let body = json!({"key": "k1", "timestamp": TS, "result": {"wine": "Barolo"}, "imageThumbnail": "data:x"});
        let record = StoredRecord::decode(body).unwrap();
        assert_eq!(record.version(), 1);

        let entry = record.upgrade();
        assert_eq!(entry.key, "k1");
        assert_eq!(entry.timestamp, ts());
        assert_eq!(entry.result, json!({"wine": "Barolo"}));
        assert_eq!(entry.image_thumbnail.as_deref(), Some("data:x"));
        assert!(!entry.saved);
        assert!(!entry.sync_ready);
        assert!(entry.remote_id.is_none());
        assert!(entry.label_hash.is_none());
        assert!(entry.source_text.is_none());
    }

    #[test]
    fn test_v2_keeps_saved() {
        let body = json!({"version": 2, "key": "k", "timestamp": TS, "result": 1, "saved": true});
        let entry = StoredRecord::decode(body).unwrap().upgrade();
        assert!(entry.saved);
        assert!(!entry.sync_ready);
        assert!(entry.is_promotable());
    }

    #[test]
    fn test_v3_keeps_sync_fields() {
        let body = json!({
            "version": 3, "key": "k", "timestamp": TS, "result": null,
            "saved": true, "syncReady": false, "remoteId": "r-9"
        });
        let entry = StoredRecord::decode(body).unwrap().upgrade();
        assert_eq!(entry.remote_id.as_deref(), Some("r-9"));
        assert!(entry.is_synced());
    }

    #[test]
    fn test_v3_inconsistent_sync_ready_is_cleared() {
        let body = json!({"version": 3, "key": "k", "timestamp": TS, "saved": false, "syncReady": true});
        let entry = StoredRecord::decode(body).unwrap().upgrade();
        assert!(!entry.sync_ready);
    }

    #[test]
    fn test_string_version_tag() {
        let body = json!({"version": "2", "timestamp": TS, "saved": true});
        assert_eq!(StoredRecord::decode(body).unwrap().version(), 2);
    }

    #[test]
    fn test_future_version_decodes_as_current() {
        let body = json!({
            "version": 9, "key": "k", "timestamp": TS, "result": {}, "saved": true,
            "labelHash": "lh", "sourceText": "txt", "somethingNew": [1, 2]
        });
        let record = StoredRecord::decode(body).unwrap();
        assert_eq!(record.version(), 4);
        let entry = record.upgrade();
        assert_eq!(entry.label_hash.as_deref(), Some("lh"));
        assert_eq!(entry.source_text.as_deref(), Some("txt"));
    }

    #[test]
    fn test_round_trip_current_shape() {
        let entry = CacheEntry {
            saved: true,
            sync_ready: true,
            label_hash: Some("lh".into()),
            source_text: Some("Barolo".into()),
            ..CacheEntry::new("k", ts(), json!({"score": 92}))
        };
        let body = encode_entry(&entry).unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["version"], json!(CURRENT_VERSION));
        assert_eq!(decode_entry("k", &body).unwrap(), entry);
    }

    #[test]
    fn test_row_key_wins() {
        let body = json!({"timestamp": TS, "result": {}}).to_string();
        assert_eq!(decode_entry("row-key", &body).unwrap().key, "row-key");
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        assert!(matches!(decode_entry("k", "{not json"), Err(Error::Serialization(_))));
        assert!(matches!(decode_entry("k", "[1, 2]"), Err(Error::Serialization(_))));
    }
}
