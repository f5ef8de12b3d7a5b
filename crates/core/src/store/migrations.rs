//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each migration is a SQL batch that transforms the schema. Record-level
//! shape upgrades of cached analyses happen on read, see
//! [`crate::cache::envelope`].

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// One schema step.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// Applied strictly in version order; each version runs at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "analysis cache",
        sql: include_str!("../../migrations/001_analysis_cache.sql"),
    },
    Migration {
        version: 2,
        description: "scan upload queue",
        sql: include_str!("../../migrations/002_scan_queue.sql"),
    },
    Migration {
        version: 3,
        description: "queue records mirrored from cache entries",
        sql: include_str!("../../migrations/003_queue_cache_mirror.sql"),
    },
];

/// Run any pending migrations.
///
/// Creates the `_migrations` ledger if needed, then applies every migration
/// newer than the highest recorded version. Each step and its ledger row
/// commit together.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the step whose SQL failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )",
        )?;

        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            tracing::debug!(version = migration.version, description = migration.description, "applying storage migration");
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql).map_err(|e| {
                Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.description))
            })?;
            tx.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.description, chrono::Utc::now().timestamp_millis()],
            )?;
            tx.commit()?;
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
