//! Remote store contract.
//!
//! The remote store must support two operations: a bounded lookup of
//! records by correlation key and creation time, and an upsert keyed by the
//! local record id that is safe to repeat.

pub mod error;
pub mod http;

pub use error::RemoteError;
pub use http::{HttpRemoteStore, RemoteConfig};

use chrono::{DateTime, Duration, Utc};
use corkscan_core::QueueRecord;
use serde::{Deserialize, Serialize};

/// The part of a remote record needed for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    pub correlation_key: String,
    pub created_at: DateTime<Utc>,
}

/// Inclusive creation-time bounds for a remote lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// The span of `times`, widened by `margin` on both sides and clamped
    /// to the representable range.
    ///
    /// Returns `None` when `times` is empty.
    pub fn around(times: impl IntoIterator<Item = DateTime<Utc>>, margin: Duration) -> Option<Self> {
        let mut times = times.into_iter();
        let first = times.next()?;
        let (min, max) = times.fold((first, first), |(min, max), t| (min.min(t), max.max(t)));
        let margin = margin.abs();
        Some(Self {
            from: min.checked_sub_signed(margin).unwrap_or(DateTime::<Utc>::MIN_UTC),
            to: max.checked_add_signed(margin).unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Remote store used by reconciliation.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Records owned by `owner` whose correlation key is in `keys` and whose
    /// creation time falls inside `window`.
    async fn find_matching(
        &self, owner: &str, keys: &[String], window: TimeWindow,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;

    /// Insert or update the remote copy of `record`, keyed by its local id.
    ///
    /// Returns the remote id.
    async fn upsert(&self, owner: &str, record: &QueueRecord) -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_window_around() {
        let window = TimeWindow::around([at(10), at(0), at(3)], Duration::minutes(5)).unwrap();
        assert_eq!(window.from, at(-5));
        assert_eq!(window.to, at(15));
        assert!(window.contains(at(-5)));
        assert!(window.contains(at(15)));
        assert!(!window.contains(at(16)));
    }

    #[test]
    fn test_window_clamps_huge_margin() {
        let window = TimeWindow::around([at(0)], Duration::MAX).unwrap();
        assert_eq!(window.from, DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.to, DateTime::<Utc>::MAX_UTC);
        assert!(window.contains(at(-1_000_000)));
    }

    #[test]
    fn test_window_empty() {
        assert!(TimeWindow::around(Vec::new(), Duration::minutes(5)).is_none());
    }
}
