//! Revision store implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
#![allow(clippy::cast_sign_loss)] // depth and counts are never negative

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{
    Payload, RecordId, Revision, RevisionId, SyncConflict, SyncableRecord, TableName,
};
use crate::revision::RevisionTree;

/// Local edit waiting to be pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsyncedEntry {
    /// Position in the log
    pub seq: i64,
    pub table: TableName,
    pub record_id: RecordId,
    pub rev: RevisionId,
    pub queued_at: i64,
}

/// Trait for revision storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RevisionStore {
    /// Load the full revision tree of a record
    async fn load_tree(&self, id: &RecordId) -> Result<Option<RevisionTree>>;

    /// Persist the tree's pending nodes and stubs plus its materialized winner,
    /// in one transaction. The pending changes are cleared once committed.
    async fn save_tree(&self, tree: &mut RevisionTree) -> Result<()>;

    /// Like [`RevisionStore::save_tree`], also appending `revs` to the unsynced
    /// log in the same transaction.
    async fn save_tree_with_unsynced(
        &self,
        tree: &mut RevisionTree,
        revs: &[RevisionId],
        queued_at: i64,
    ) -> Result<()>;

    /// Get the materialized view of a record
    async fn get_record(&self, id: &RecordId) -> Result<Option<SyncableRecord>>;

    /// List records, most recently edited first
    async fn list_records(
        &self,
        table: Option<&TableName>,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<SyncableRecord>>;

    /// List records with a non-empty conflict set
    async fn list_conflicted(&self, table: Option<&TableName>) -> Result<Vec<SyncableRecord>>;

    /// Identifiers of every record, optionally limited to one table
    async fn record_ids(&self, table: Option<&TableName>) -> Result<Vec<RecordId>>;

    /// Append a local revision to the unsynced log (no-op if already logged)
    async fn enqueue_unsynced(
        &self,
        table: &TableName,
        record_id: &RecordId,
        rev: &RevisionId,
        queued_at: i64,
    ) -> Result<()>;

    /// Unsynced entries of a table that were never acknowledged, oldest first
    async fn pending_unsynced(&self, table: &TableName) -> Result<Vec<UnsyncedEntry>>;

    /// Mark a logged revision as accepted by the authority
    async fn mark_pushed(&self, record_id: &RecordId, rev: &RevisionId, pushed_at: i64)
        -> Result<()>;

    /// Number of log entries still waiting for the authority
    async fn unsynced_count(&self) -> Result<usize>;

    /// Highest `server_rev_at` pulled for a table
    async fn checkpoint(&self, table: &TableName) -> Result<Option<i64>>;

    /// Store a pull checkpoint; never moves backwards
    async fn set_checkpoint(&self, table: &TableName, server_rev_at: i64, updated_at: i64)
        -> Result<()>;

    /// Log a discovered fork. Returns `false` if that losing leaf was already logged.
    ///
    /// `conflict.id` is ignored; the store assigns it.
    async fn record_conflict(&self, conflict: &SyncConflict) -> Result<bool>;

    /// Conflict history, newest first
    async fn list_conflicts(
        &self,
        record_id: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `RevisionStore`
pub struct LibSqlRevisionStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRevisionStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn commit_tree(
        &self,
        tree: &mut RevisionTree,
        unsynced: &[RevisionId],
        queued_at: i64,
    ) -> Result<()> {
        if !tree.has_pending_changes() && unsynced.is_empty() {
            return Ok(());
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(e) = self.write_tree(tree, unsynced, queued_at).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tree.mark_persisted();
        Ok(())
    }

    async fn write_tree(
        &self,
        tree: &RevisionTree,
        unsynced: &[RevisionId],
        queued_at: i64,
    ) -> Result<()> {
        let record_id = tree.record_id().to_string();
        let table = tree.table().to_string();

        for revision in tree.changed_revisions() {
            let document = serde_json::to_string(revision)?;
            self.conn
                .execute(
                    "INSERT INTO revisions (record_id, table_name, rev, depth, document, server_rev_at)
                     VALUES (?, ?, ?, ?, ?, ?)
                     ON CONFLICT(record_id, rev) DO UPDATE SET
                        document = excluded.document,
                        server_rev_at = excluded.server_rev_at",
                    params![
                        record_id.clone(),
                        table.clone(),
                        revision.rev.to_string(),
                        i64::from(revision.depth),
                        document,
                        revision.server_rev_at,
                    ],
                )
                .await?;
        }

        let purged_at = crate::util::unix_millis_now();
        for (rev, parent) in tree.changed_stubs() {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO purged_revisions (record_id, rev, parent_rev, purged_at)
                     VALUES (?, ?, ?, ?)",
                    params![
                        record_id.clone(),
                        rev.to_string(),
                        parent.map(ToString::to_string),
                        purged_at,
                    ],
                )
                .await?;
            self.conn
                .execute(
                    "DELETE FROM revisions WHERE record_id = ? AND rev = ?",
                    params![record_id.clone(), rev.to_string()],
                )
                .await?;
        }

        for rev in unsynced {
            self.insert_unsynced(tree.table(), &tree.record_id(), rev, queued_at)
                .await?;
        }

        if let Some(record) = tree.record() {
            self.upsert_record(&record).await?;
        }
        Ok(())
    }

    async fn insert_unsynced(
        &self,
        table: &TableName,
        record_id: &RecordId,
        rev: &RevisionId,
        queued_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO unsynced_revisions (table_name, record_id, rev, queued_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    table.to_string(),
                    record_id.to_string(),
                    rev.to_string(),
                    queued_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_record(&self, record: &SyncableRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO records (
                    id, table_name, rev, parent_rev, revisions, depth, payload, deleted,
                    client_rev_at, client_rev_by, server_rev_at, conflicts, deleted_conflicts,
                    conflict_count
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id.to_string(),
                    record.table.to_string(),
                    record.rev.to_string(),
                    record.parent_rev.as_ref().map(ToString::to_string),
                    serde_json::to_string(&record.revisions)?,
                    i64::from(record.depth),
                    serde_json::to_string(&record.payload)?,
                    i64::from(record.deleted),
                    record.client_rev_at,
                    record.client_rev_by.clone(),
                    record.server_rev_at,
                    serde_json::to_string(&record.conflicts)?,
                    serde_json::to_string(&record.deleted_conflicts)?,
                    record.conflicts.len() as i64,
                ],
            )
            .await?;
        Ok(())
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncableRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Parse a record from a database row
    fn parse_record(row: &Row) -> Result<SyncableRecord> {
        let parent_rev: Option<String> = row.get(3)?;
        let revisions: String = row.get(4)?;
        let payload: String = row.get(6)?;
        let conflicts: String = row.get(11)?;
        let deleted_conflicts: String = row.get(12)?;

        Ok(SyncableRecord {
            id: parse_record_id(&row.get::<String>(0)?)?,
            table: TableName::new(row.get::<String>(1)?)?,
            rev: row.get::<String>(2)?.parse()?,
            parent_rev: parent_rev.map(|rev| rev.parse()).transpose()?,
            revisions: serde_json::from_str(&revisions)?,
            depth: u32::try_from(row.get::<i64>(5)?)
                .map_err(|_| Error::Database("Stored depth out of range".to_string()))?,
            payload: serde_json::from_str::<Payload>(&payload)?,
            deleted: row.get::<i64>(7)? != 0,
            client_rev_at: row.get(8)?,
            client_rev_by: row.get(9)?,
            server_rev_at: row.get(10)?,
            conflicts: serde_json::from_str(&conflicts)?,
            deleted_conflicts: serde_json::from_str(&deleted_conflicts)?,
        })
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let source: String = row.get(6)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            table: TableName::new(row.get::<String>(1)?)?,
            record_id: parse_record_id(&row.get::<String>(2)?)?,
            winner_rev: row.get::<String>(3)?.parse()?,
            losing_rev: row.get::<String>(4)?.parse()?,
            detected_at: row.get(5)?,
            source: source.parse().map_err(Error::Database)?,
        })
    }
}

const RECORD_COLUMNS: &str = "id, table_name, rev, parent_rev, revisions, depth, payload, deleted, \
     client_rev_at, client_rev_by, server_rev_at, conflicts, deleted_conflicts";

impl RevisionStore for LibSqlRevisionStore<'_> {
    async fn load_tree(&self, id: &RecordId) -> Result<Option<RevisionTree>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, document FROM revisions WHERE record_id = ?",
                [id.to_string()],
            )
            .await?;

        let mut table = None;
        let mut revisions = Vec::new();
        while let Some(row) = rows.next().await? {
            if table.is_none() {
                table = Some(TableName::new(row.get::<String>(0)?)?);
            }
            let document: String = row.get(1)?;
            revisions.push(serde_json::from_str::<Revision>(&document)?);
        }

        let Some(table) = table else {
            return Ok(None);
        };

        let mut rows = self
            .conn
            .query(
                "SELECT rev, parent_rev FROM purged_revisions WHERE record_id = ?",
                [id.to_string()],
            )
            .await?;
        let mut purged = Vec::new();
        while let Some(row) = rows.next().await? {
            let rev: RevisionId = row.get::<String>(0)?.parse()?;
            let parent = row
                .get::<Option<String>>(1)?
                .map(|parent| parent.parse::<RevisionId>())
                .transpose()?;
            purged.push((rev, parent));
        }

        Ok(Some(RevisionTree::restore(*id, table, revisions, purged)?))
    }

    async fn save_tree(&self, tree: &mut RevisionTree) -> Result<()> {
        self.commit_tree(tree, &[], 0).await
    }

    async fn save_tree_with_unsynced(
        &self,
        tree: &mut RevisionTree,
        revs: &[RevisionId],
        queued_at: i64,
    ) -> Result<()> {
        self.commit_tree(tree, revs, queued_at).await
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<SyncableRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?");
        let mut records = self.query_records(&sql, [id.to_string()]).await?;
        Ok(records.pop())
    }

    async fn list_records(
        &self,
        table: Option<&TableName>,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<SyncableRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE (?1 IS NULL OR table_name = ?1) AND (?2 = 1 OR deleted = 0)
             ORDER BY client_rev_at DESC, id DESC
             LIMIT ?3"
        );
        self.query_records(
            &sql,
            params![
                table.map(ToString::to_string),
                i64::from(include_deleted),
                limit as i64,
            ],
        )
        .await
    }

    async fn list_conflicted(&self, table: Option<&TableName>) -> Result<Vec<SyncableRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE conflict_count > 0 AND (?1 IS NULL OR table_name = ?1)
             ORDER BY client_rev_at DESC, id DESC"
        );
        self.query_records(&sql, params![table.map(ToString::to_string)])
            .await
    }

    async fn record_ids(&self, table: Option<&TableName>) -> Result<Vec<RecordId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM records WHERE (?1 IS NULL OR table_name = ?1) ORDER BY id",
                params![table.map(ToString::to_string)],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(parse_record_id(&row.get::<String>(0)?)?);
        }
        Ok(ids)
    }

    async fn enqueue_unsynced(
        &self,
        table: &TableName,
        record_id: &RecordId,
        rev: &RevisionId,
        queued_at: i64,
    ) -> Result<()> {
        self.insert_unsynced(table, record_id, rev, queued_at).await
    }

    async fn pending_unsynced(&self, table: &TableName) -> Result<Vec<UnsyncedEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT seq, table_name, record_id, rev, queued_at FROM unsynced_revisions
                 WHERE table_name = ? AND pushed_at IS NULL
                 ORDER BY seq",
                [table.to_string()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(UnsyncedEntry {
                seq: row.get(0)?,
                table: TableName::new(row.get::<String>(1)?)?,
                record_id: parse_record_id(&row.get::<String>(2)?)?,
                rev: row.get::<String>(3)?.parse()?,
                queued_at: row.get(4)?,
            });
        }
        Ok(entries)
    }

    async fn mark_pushed(
        &self,
        record_id: &RecordId,
        rev: &RevisionId,
        pushed_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE unsynced_revisions SET pushed_at = ?
                 WHERE record_id = ? AND rev = ? AND pushed_at IS NULL",
                params![pushed_at, record_id.to_string(), rev.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn unsynced_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM unsynced_revisions WHERE pushed_at IS NULL",
                (),
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count as usize)
    }

    async fn checkpoint(&self, table: &TableName) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT server_rev_at FROM sync_checkpoints WHERE table_name = ?",
                [table.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(
        &self,
        table: &TableName,
        server_rev_at: i64,
        updated_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_checkpoints (table_name, server_rev_at, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(table_name) DO UPDATE SET
                    server_rev_at = MAX(server_rev_at, excluded.server_rev_at),
                    updated_at = excluded.updated_at",
                params![table.to_string(), server_rev_at, updated_at],
            )
            .await?;
        Ok(())
    }

    async fn record_conflict(&self, conflict: &SyncConflict) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sync_conflicts
                    (table_name, record_id, winner_rev, losing_rev, detected_at, source)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    conflict.table.to_string(),
                    conflict.record_id.to_string(),
                    conflict.winner_rev.to_string(),
                    conflict.losing_rev.to_string(),
                    conflict.detected_at,
                    conflict.source.as_str(),
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn list_conflicts(
        &self,
        record_id: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, record_id, winner_rev, losing_rev, detected_at, source
                 FROM sync_conflicts
                 WHERE (?1 IS NULL OR record_id = ?1)
                 ORDER BY detected_at DESC, id DESC
                 LIMIT ?2",
                params![record_id.map(ToString::to_string), limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}

fn parse_record_id(raw: &str) -> Result<RecordId> {
    raw.parse()
        .map_err(|_| Error::Database(format!("Invalid record id '{raw}'")))
}
