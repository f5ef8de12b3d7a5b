//! Core types and local storage for corkscan.
//!
//! This crate provides:
//! - Content-addressed analysis cache with versioned records
//! - Durable local queue of pending uploads
//! - SQLite connection management and schema migrations
//! - Telemetry events, clock abstraction, configuration and errors

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use cache::{AnalysisCache, CacheChanged, CacheEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::Error;
pub use queue::{LocalQueue, NewQueueRecord, QueueRecord};
pub use store::LocalStore;
pub use telemetry::{SyncEvent, TelemetrySink, TracingSink};
