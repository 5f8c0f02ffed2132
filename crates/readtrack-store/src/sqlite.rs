//! SQLite implementation of the ReceiptStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use readtrack_core::{
    AuditAction, AuditId, AuditLogEntry, AuditMetadata, ChannelId, ChannelMember, DeviceType,
    PostId, Receipt, Summary, UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::ReceiptStore;

const RECEIPT_COLUMNS: &str =
    "post_id, user_id, channel_id, read_at, created_at, device_id, device_type, session_id";

const SUMMARY_COLUMNS: &str =
    "post_id, channel_id, read_count, total_recipients, last_updated, first_read_at, last_read_at";

const AUDIT_COLUMNS: &str =
    "id, user_id, post_id, action, metadata_version, metadata, created_at";

const UPSERT_RECEIPT: &str = "INSERT INTO receipts
        (post_id, user_id, channel_id, read_at, created_at, device_id, device_type, session_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(post_id, user_id) DO UPDATE SET
        read_at = excluded.read_at,
        created_at = excluded.created_at,
        device_id = excluded.device_id,
        device_type = excluded.device_type,
        session_id = excluded.session_id";

const INSERT_RECEIPT_IF_ABSENT: &str = "INSERT INTO receipts
        (post_id, user_id, channel_id, read_at, created_at, device_id, device_type, session_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(post_id, user_id) DO NOTHING";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn row_to_receipt(row: &Row<'_>) -> rusqlite::Result<Receipt> {
    let device_type: String = row.get(6)?;
    Ok(Receipt {
        post_id: PostId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        channel_id: ChannelId::new(row.get::<_, String>(2)?),
        read_at: row.get(3)?,
        created_at: row.get(4)?,
        device_id: row.get(5)?,
        device_type: DeviceType::from_str(&device_type).map_err(|e| conversion_error(6, e))?,
        session_id: row.get(7)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<Summary> {
    Ok(Summary {
        post_id: PostId::new(row.get::<_, String>(0)?),
        channel_id: ChannelId::new(row.get::<_, String>(1)?),
        read_count: row.get::<_, i64>(2)?.max(0) as u64,
        total_recipients: row.get::<_, i64>(3)?.max(0) as u64,
        last_updated: row.get(4)?,
        first_read_at: row.get(5)?,
        last_read_at: row.get(6)?,
    })
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let action: String = row.get(3)?;
    let metadata: String = row.get(5)?;
    Ok(AuditLogEntry {
        id: AuditId::from_string(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        post_id: PostId::new(row.get::<_, String>(2)?),
        action: AuditAction::from_str(&action).map_err(|e| conversion_error(3, e))?,
        metadata_version: row.get(4)?,
        metadata: serde_json::from_str::<AuditMetadata>(&metadata)
            .map_err(|e| conversion_error(5, e))?,
        created_at: row.get(6)?,
    })
}

fn row_to_member(row: &Row<'_>) -> rusqlite::Result<ChannelMember> {
    Ok(ChannelMember {
        channel_id: ChannelId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        last_viewed_at: row.get(2)?,
    })
}

fn execute_receipt_write(
    conn: &Connection,
    sql: &str,
    receipt: &Receipt,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.execute(params![
        receipt.post_id.as_str(),
        receipt.user_id.as_str(),
        receipt.channel_id.as_str(),
        receipt.read_at,
        receipt.created_at,
        receipt.device_id.as_deref(),
        receipt.device_type.as_str(),
        receipt.session_id.as_deref(),
    ])
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    async fn upsert_receipt(&self, receipt: &Receipt) -> Result<Receipt> {
        let receipt = receipt.clone();

        self.call(move |conn| {
            execute_receipt_write(conn, UPSERT_RECEIPT, &receipt)?;
            let stored = conn.query_row(
                &format!(
                    "SELECT {} FROM receipts WHERE post_id = ?1 AND user_id = ?2",
                    RECEIPT_COLUMNS
                ),
                params![receipt.post_id.as_str(), receipt.user_id.as_str()],
                row_to_receipt,
            )?;
            Ok(stored)
        })
        .await
    }

    async fn upsert_receipts_batch(&self, receipts: &[Receipt]) -> Result<()> {
        if receipts.is_empty() {
            return Ok(());
        }
        let receipts = receipts.to_vec();

        self.call(move |conn| {
            let tx = conn.transaction()?;
            for receipt in &receipts {
                execute_receipt_write(&tx, UPSERT_RECEIPT, receipt)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_receipt_if_absent(&self, receipt: &Receipt) -> Result<bool> {
        let receipt = receipt.clone();

        self.call(move |conn| {
            let n = execute_receipt_write(conn, INSERT_RECEIPT_IF_ABSENT, &receipt)?;
            Ok(n == 1)
        })
        .await
    }

    async fn get_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<Option<Receipt>> {
        let post_id = post_id.clone();
        let user_id = user_id.clone();

        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM receipts WHERE post_id = ?1 AND user_id = ?2",
                    RECEIPT_COLUMNS
                ),
                params![post_id.as_str(), user_id.as_str()],
                row_to_receipt,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_receipts_for_post(&self, post_id: &PostId) -> Result<Vec<Receipt>> {
        let post_id = post_id.clone();

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM receipts WHERE post_id = ?1
                 ORDER BY read_at DESC, user_id ASC",
                RECEIPT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![post_id.as_str()], row_to_receipt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_receipts_for_posts(
        &self,
        post_ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<Receipt>>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let post_ids = post_ids.to_vec();

        self.call(move |conn| {
            let placeholders = vec!["?"; post_ids.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM receipts WHERE post_id IN ({})
                 ORDER BY read_at DESC, user_id ASC",
                RECEIPT_COLUMNS, placeholders
            ))?;
            let rows = stmt.query_map(
                params_from_iter(post_ids.iter().map(|p| p.as_str())),
                row_to_receipt,
            )?;

            let mut grouped: HashMap<PostId, Vec<Receipt>> = HashMap::new();
            for row in rows {
                let receipt = row?;
                grouped
                    .entry(receipt.post_id.clone())
                    .or_default()
                    .push(receipt);
            }
            Ok(grouped)
        })
        .await
    }

    async fn list_receipts_for_user(
        &self,
        user_id: &UserId,
        channel_id: Option<&ChannelId>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Receipt>> {
        let user_id = user_id.clone();
        let channel_id = channel_id.cloned();
        let limit = sql_limit(limit);

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM receipts
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR channel_id = ?2)
                   AND (?3 <= 0 OR read_at >= ?3)
                 ORDER BY read_at DESC, post_id ASC
                 LIMIT ?4",
                RECEIPT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        user_id.as_str(),
                        channel_id.as_ref().map(|c| c.as_str()),
                        since,
                        limit
                    ],
                    row_to_receipt,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_receipts_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Receipt>> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM receipts
                 WHERE channel_id = ?1 AND (?2 <= 0 OR read_at >= ?2)
                 ORDER BY read_at DESC, post_id ASC, user_id ASC",
                RECEIPT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![channel_id.as_str(), since], row_to_receipt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM receipts WHERE channel_id = ?1",
                params![channel_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    async fn delete_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<()> {
        let post_id = post_id.clone();
        let user_id = user_id.clone();

        self.call(move |conn| {
            conn.execute(
                "DELETE FROM receipts WHERE post_id = ?1 AND user_id = ?2",
                params![post_id.as_str(), user_id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_receipts_for_post(&self, post_id: &PostId) -> Result<u64> {
        let post_id = post_id.clone();

        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM receipts WHERE post_id = ?1",
                params![post_id.as_str()],
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn delete_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM receipts WHERE channel_id = ?1",
                params![channel_id.as_str()],
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn delete_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        let user_id = user_id.clone();

        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM receipts WHERE user_id = ?1",
                params![user_id.as_str()],
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn delete_receipts_created_before(&self, cutoff: i64) -> Result<Vec<Receipt>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "DELETE FROM receipts WHERE created_at < ?1 RETURNING {}",
                RECEIPT_COLUMNS
            ))?;
            let mut removed = stmt
                .query_map(params![cutoff], row_to_receipt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            removed.sort_by(|a, b| {
                b.read_at
                    .cmp(&a.read_at)
                    .then_with(|| a.post_id.cmp(&b.post_id))
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
            Ok(removed)
        })
        .await
    }

    async fn anonymize_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        let user_id = user_id.clone();

        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE receipts
                 SET device_id = NULL, session_id = NULL, device_type = ?2
                 WHERE user_id = ?1",
                params![user_id.as_str(), DeviceType::Unknown.as_str()],
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn get_summary(&self, post_id: &PostId) -> Result<Option<Summary>> {
        let post_id = post_id.clone();

        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM summaries WHERE post_id = ?1", SUMMARY_COLUMNS),
                params![post_id.as_str()],
                row_to_summary,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        let summary = summary.clone();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO summaries
                    (post_id, channel_id, read_count, total_recipients,
                     last_updated, first_read_at, last_read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(post_id) DO UPDATE SET
                    channel_id = excluded.channel_id,
                    read_count = excluded.read_count,
                    total_recipients = excluded.total_recipients,
                    last_updated = excluded.last_updated,
                    first_read_at = excluded.first_read_at,
                    last_read_at = excluded.last_read_at",
                params![
                    summary.post_id.as_str(),
                    summary.channel_id.as_str(),
                    summary.read_count as i64,
                    summary.total_recipients as i64,
                    summary.last_updated,
                    summary.first_read_at,
                    summary.last_read_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_summaries_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Summary>> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM summaries
                 WHERE channel_id = ?1 AND (?2 <= 0 OR last_updated >= ?2)
                 ORDER BY last_updated DESC, post_id ASC",
                SUMMARY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![channel_id.as_str(), since], row_to_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_summary(&self, post_id: &PostId) -> Result<()> {
        let post_id = post_id.clone();

        self.call(move |conn| {
            conn.execute(
                "DELETE FROM summaries WHERE post_id = ?1",
                params![post_id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        let entry = entry.clone();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audit_log
                    (id, user_id, post_id, action, metadata_version, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id.as_str(),
                    entry.user_id.as_str(),
                    entry.post_id.as_str(),
                    entry.action.as_str(),
                    entry.metadata_version,
                    metadata,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_audit(
        &self,
        user_id: &UserId,
        since: i64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let user_id = user_id.clone();
        let limit = sql_limit(limit);

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM audit_log
                 WHERE user_id = ?1 AND (?2 <= 0 OR created_at >= ?2)
                 ORDER BY created_at DESC, id ASC
                 LIMIT ?3",
                AUDIT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id.as_str(), since, limit], row_to_audit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn upsert_channel_member(&self, member: &ChannelMember) -> Result<()> {
        let member = member.clone();

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO channel_members (channel_id, user_id, last_viewed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id, user_id) DO UPDATE SET
                    last_viewed_at = excluded.last_viewed_at",
                params![
                    member.channel_id.as_str(),
                    member.user_id.as_str(),
                    member.last_viewed_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_channel_member(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<()> {
        let channel_id = channel_id.clone();
        let user_id = user_id.clone();

        self.call(move |conn| {
            conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id.as_str(), user_id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_channel_members(&self, channel_id: &ChannelId) -> Result<Vec<ChannelMember>> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT channel_id, user_id, last_viewed_at FROM channel_members
                 WHERE channel_id = ?1 ORDER BY user_id ASC",
            )?;
            let rows = stmt
                .query_map(params![channel_id.as_str()], row_to_member)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_channel_members(&self, channel_id: &ChannelId) -> Result<u64> {
        let channel_id = channel_id.clone();

        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1",
                params![channel_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ReceiptStoreExt;
    use readtrack_core::{DeletionReason, ReceiptBuilder};

    fn receipt(post: &str, user: &str, channel: &str, read_at: i64) -> Receipt {
        ReceiptBuilder::new(PostId::new(post), UserId::new(user), ChannelId::new(channel))
            .read_at(read_at)
            .created_at(read_at)
            .device_type(DeviceType::Desktop)
            .build()
    }

    #[tokio::test]
    async fn test_upsert_and_get_receipt() {
        let store = SqliteStore::open_memory().unwrap();
        let mut r = receipt("p1", "u1", "c1", 1000);
        r.device_id = Some("desktop-1".into());
        r.session_id = Some("sess".into());

        let stored = store.upsert_receipt(&r).await.unwrap();
        assert_eq!(stored, r);

        let fetched = store
            .get_receipt(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, r);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_key() {
        let store = SqliteStore::open_memory().unwrap();

        store.upsert_receipt(&receipt("p1", "u1", "c1", 1000)).await.unwrap();
        let stored = store
            .upsert_receipt(&receipt("p1", "u1", "c9", 2000))
            .await
            .unwrap();

        assert_eq!(stored.read_at, 2000);
        assert_eq!(stored.channel_id, ChannelId::new("c1"));
        assert_eq!(
            store
                .list_receipts_for_post(&PostId::new("p1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_insert_if_absent_never_overwrites() {
        let store = SqliteStore::open_memory().unwrap();
        let mut live = receipt("p1", "u1", "c1", 900);
        live.device_type = DeviceType::Mobile;
        store.upsert_receipt(&live).await.unwrap();

        assert!(!store
            .insert_receipt_if_absent(&receipt("p1", "u1", "c1", 500))
            .await
            .unwrap());
        let stored = store
            .get_receipt(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.read_at, 900);
        assert_eq!(stored.device_type, DeviceType::Mobile);

        assert!(store
            .insert_receipt_if_absent(&receipt("p2", "u1", "c1", 500))
            .await
            .unwrap());
        assert_eq!(
            store.count_receipts_for_channel(&ChannelId::new("c1")).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = SqliteStore::open_memory().unwrap();

        // Force the second insert to fail.
        store
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON receipts
                     WHEN NEW.post_id = 'bad'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("bad", "u1", "c1", 100),
            ])
            .await;
        assert!(result.is_err());

        assert!(!store
            .is_read_by(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_for_posts_grouped() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p1", "u2", "c1", 200),
                receipt("p2", "u1", "c1", 300),
                receipt("p3", "u1", "c1", 400),
            ])
            .await
            .unwrap();

        let grouped = store
            .list_receipts_for_posts(&[PostId::new("p1"), PostId::new("p2"), PostId::new("p4")])
            .await
            .unwrap();

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&PostId::new("p1")].len(), 2);
        assert_eq!(grouped[&PostId::new("p1")][0].read_at, 200);
        assert!(!grouped.contains_key(&PostId::new("p4")));
    }

    #[tokio::test]
    async fn test_user_history_filters() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p2", "u1", "c1", 200),
                receipt("p3", "u1", "c2", 300),
            ])
            .await
            .unwrap();

        let user = UserId::new("u1");
        let c1 = ChannelId::new("c1");

        let all = store.list_receipts_for_user(&user, None, 0, 50).await.unwrap();
        let posts: Vec<&str> = all.iter().map(|r| r.post_id.as_str()).collect();
        assert_eq!(posts, vec!["p3", "p2", "p1"]);

        let scoped = store
            .list_receipts_for_user(&user, Some(&c1), 0, 50)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 2);

        let since = store.list_receipts_for_user(&user, None, 200, 50).await.unwrap();
        assert_eq!(since.len(), 2);

        let limited = store.list_receipts_for_user(&user, None, 0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert_eq!(store.last_read_at(&c1, &user).await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_retention_and_anonymize() {
        let store = SqliteStore::open_memory().unwrap();
        let mut r = receipt("p1", "u1", "c1", 100);
        r.device_id = Some("mobile-x".into());
        store.upsert_receipt(&r).await.unwrap();
        store.upsert_receipt(&receipt("p2", "u1", "c1", 500)).await.unwrap();

        assert_eq!(
            store
                .anonymize_receipts_for_user(&UserId::new("u1"))
                .await
                .unwrap(),
            2
        );
        let anon = store
            .get_receipt(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(anon.device_id, None);
        assert_eq!(anon.device_type, DeviceType::Unknown);

        let expired = store.delete_receipts_created_before(500).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].post_id, PostId::new("p1"));
        assert_eq!(
            store
                .list_receipts_for_channel(&ChannelId::new("c1"), 0)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_summary_round_trip() {
        let store = SqliteStore::open_memory().unwrap();
        let post = PostId::new("p1");
        let channel = ChannelId::new("c1");
        let receipts = vec![receipt("p1", "u1", "c1", 100), receipt("p1", "u2", "c1", 300)];

        let summary = Summary::compute(&post, &channel, &receipts, 5, 1000, None);
        store.upsert_summary(&summary).await.unwrap();
        assert_eq!(store.get_summary(&post).await.unwrap(), Some(summary.clone()));

        let updated = Summary::compute(&post, &channel, &receipts[..1], 4, 2000, Some(&summary));
        store.upsert_summary(&updated).await.unwrap();

        let listed = store.list_summaries_for_channel(&channel, 1500).await.unwrap();
        assert_eq!(listed, vec![updated]);

        store.delete_summary(&post).await.unwrap();
        assert_eq!(store.get_summary(&post).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_audit_metadata_persisted_as_json() {
        let store = SqliteStore::open_memory().unwrap();
        let user = UserId::new("u1");
        let entry = AuditLogEntry::new(
            user.clone(),
            PostId::new("p1"),
            AuditAction::PrivacyView,
            AuditMetadata::ReceiptDeleted {
                reason: DeletionReason::UserPrivacyRequest,
                existed: true,
                channel_id: Some(ChannelId::new("c1")),
            },
            1234,
        );
        store.save_audit(&entry).await.unwrap();

        let listed = store.list_audit(&user, 0, 10).await.unwrap();
        assert_eq!(listed, vec![entry.clone()]);

        // Ids are unique.
        assert!(store.save_audit(&entry).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_members() {
        let store = SqliteStore::open_memory().unwrap();
        let channel = ChannelId::new("c1");

        store
            .upsert_channel_member(&ChannelMember::new(channel.clone(), UserId::new("u2"), 0))
            .await
            .unwrap();
        store
            .upsert_channel_member(&ChannelMember::new(channel.clone(), UserId::new("u1"), 10))
            .await
            .unwrap();
        store
            .upsert_channel_member(&ChannelMember::new(channel.clone(), UserId::new("u1"), 20))
            .await
            .unwrap();

        assert_eq!(store.count_channel_members(&channel).await.unwrap(), 2);
        let members = store.list_channel_members(&channel).await.unwrap();
        assert_eq!(members[0].user_id, UserId::new("u1"));
        assert_eq!(members[0].last_viewed_at, 20);

        store
            .remove_channel_member(&channel, &UserId::new("u2"))
            .await
            .unwrap();
        store
            .remove_channel_member(&channel, &UserId::new("u2"))
            .await
            .unwrap();
        assert_eq!(store.count_channel_members(&channel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_receipt(&receipt("p1", "u1", "c1", 100)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store
            .is_read_by(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap());
    }
}
