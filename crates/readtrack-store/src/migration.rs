//! Database schema migrations for SQLite.
//!
//! Each migration is a SQL batch that moves the schema from version N to
//! N+1. Applied versions are recorded in `schema_migrations`.

use rusqlite::{Connection, OptionalExtension};

use readtrack_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = current_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {} but this build only knows {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        tracing::info!(from = current, to = CURRENT_VERSION, "applying schema migrations");
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Highest applied version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: receipts, summaries, audit log, channel members.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per (post, user); re-reads overwrite in place
        CREATE TABLE receipts (
            post_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            read_at INTEGER NOT NULL,         -- Unix ms
            created_at INTEGER NOT NULL,      -- Unix ms, drives retention
            device_id TEXT,
            device_type TEXT NOT NULL DEFAULT 'unknown',
            session_id TEXT,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE INDEX idx_receipts_post ON receipts(post_id);
        CREATE INDEX idx_receipts_user ON receipts(user_id);
        CREATE INDEX idx_receipts_channel ON receipts(channel_id);
        CREATE INDEX idx_receipts_read_at ON receipts(read_at);
        CREATE INDEX idx_receipts_created_at ON receipts(created_at);
        CREATE INDEX idx_receipts_user_post_read ON receipts(user_id, post_id, read_at DESC);

        -- Precomputed per-post rollups
        CREATE TABLE summaries (
            post_id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL,
            read_count INTEGER NOT NULL,
            total_recipients INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            first_read_at INTEGER,
            last_read_at INTEGER
        );

        CREATE INDEX idx_summaries_channel ON summaries(channel_id);
        CREATE INDEX idx_summaries_last_updated ON summaries(last_updated);
        CREATE INDEX idx_summaries_counts ON summaries(read_count, total_recipients);

        -- Append-only audit trail; metadata is versioned JSON
        CREATE TABLE audit_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            post_id TEXT NOT NULL,
            action TEXT NOT NULL,
            metadata_version INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_audit_user ON audit_log(user_id);
        CREATE INDEX idx_audit_post ON audit_log(post_id);
        CREATE INDEX idx_audit_created_at ON audit_log(created_at);
        CREATE INDEX idx_audit_action ON audit_log(action);

        -- Membership rows summaries are counted against
        CREATE TABLE channel_members (
            channel_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            last_viewed_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (channel_id, user_id)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "audit_log",
            "channel_members",
            "receipts",
            "schema_migrations",
            "summaries",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_database_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 0)",
            [CURRENT_VERSION + 1],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
