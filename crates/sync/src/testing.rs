//! Test doubles shared by the sync crate's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use corkscan_core::{LocalQueue, LocalStore, NewQueueRecord, QueueRecord, SyncEvent, TelemetrySink};
use serde_json::json;
use tokio::sync::Notify;

use crate::coordinator::{Scheduler, TimerHandle};
use crate::probe::ConnectivityProbe;
use crate::remote::{RemoteError, RemoteRecord, RemoteStore, TimeWindow};

/// Base time plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

/// An in-memory queue holding one pending record per `(id, key, minutes)`.
pub async fn queue_with(records: &[(&str, Option<&str>, i64)]) -> (LocalQueue, Vec<QueueRecord>) {
    let queue = LocalQueue::new(LocalStore::open_in_memory().await.unwrap());
    for (id, key, minutes) in records {
        let mut record = NewQueueRecord::new(*id, json!({ "id": id })).created_at(at(*minutes));
        if let Some(key) = key {
            record = record.with_correlation_key(*key);
        }
        queue.put(record).await.unwrap();
    }
    let pending = queue.get_pending().await;
    (queue, pending)
}

/// Remote store backed by a fixed index that records every call.
#[derive(Debug, Default)]
pub struct FakeRemote {
    index: Mutex<Vec<RemoteRecord>>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
    fail_index: AtomicBool,
    upserts: Mutex<Vec<String>>,
    lookups: Mutex<Vec<(String, Vec<String>, TimeWindow)>>,
    upsert_gate: Mutex<Option<UpsertGate>>,
}

/// Holds every upsert until released.
#[derive(Debug, Clone, Default)]
pub struct UpsertGate {
    /// Notified when an upsert reaches the gate.
    pub entered: Arc<Notify>,
    /// Notify once to let one waiting upsert through.
    pub release: Arc<Notify>,
}

impl FakeRemote {
    pub fn with_index(index: Vec<RemoteRecord>) -> Self {
        Self { index: Mutex::new(index), ..Default::default() }
    }

    pub fn seed(&self, record: RemoteRecord) {
        self.index.lock().unwrap().push(record);
    }

    /// Fail the next `times` upserts of `id` with a 503. `u32::MAX` fails forever.
    pub fn fail_upserts(&self, id: &str, times: u32) {
        self.failures.lock().unwrap().insert(id.to_string(), times);
    }

    /// Pause every later upsert at a gate the test controls.
    pub fn gate_upserts(&self) -> UpsertGate {
        let gate = UpsertGate::default();
        *self.upsert_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_index(&self, fail: bool) {
        self.fail_index.store(fail, Ordering::SeqCst);
    }

    /// Ids of successful upserts, in call order.
    pub fn upserts(&self) -> Vec<String> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn upsert_attempts(&self, id: &str) -> u32 {
        self.attempts.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn lookups(&self) -> Vec<(String, Vec<String>, TimeWindow)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn find_matching(
        &self, owner: &str, keys: &[String], window: TimeWindow,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.lookups.lock().unwrap().push((owner.to_string(), keys.to_vec(), window));
        if self.fail_index.load(Ordering::SeqCst) {
            return Err(RemoteError::HttpError { status: 500 });
        }
        Ok(self
            .index
            .lock()
            .unwrap()
            .iter()
            .filter(|r| keys.contains(&r.correlation_key) && window.contains(r.created_at))
            .cloned()
            .collect())
    }

    async fn upsert(&self, _owner: &str, record: &QueueRecord) -> Result<String, RemoteError> {
        let gate = self.upsert_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        *self.attempts.lock().unwrap().entry(record.id.clone()).or_default() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&record.id).filter(|remaining| **remaining > 0) {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(RemoteError::HttpError { status: 503 });
            }
        }
        self.upserts.lock().unwrap().push(record.id.clone());
        Ok(format!("remote-{}", record.id))
    }
}

/// Telemetry sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.name() == name).count()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

type Callback = Box<dyn FnOnce() + Send>;

/// Scheduler that records requested delays and fires only on demand.
#[derive(Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
    callbacks: Mutex<Vec<Callback>>,
}

impl RecordingScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    /// Run every callback scheduled so far.
    pub fn fire_all(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for callback in callbacks {
            callback();
        }
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration, callback: Callback) -> TimerHandle {
        self.delays.lock().unwrap().push(delay);
        self.callbacks.lock().unwrap().push(callback);
        TimerHandle::detached()
    }
}

/// Probe with a settable answer.
#[derive(Debug)]
pub struct FixedProbe(AtomicBool);

impl FixedProbe {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
