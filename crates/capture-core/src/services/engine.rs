//! Shared engine service used by the CLI and embedding apps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlRevisionStore, RevisionStore};
use crate::models::{
    Entity, Payload, RecordId, Revision, RevisionId, SyncConflict, SyncableRecord, TableName,
};
use crate::mutation::{LocalMutationLog, MutationContext};
use crate::revision::RevisionTree;
use crate::sync::{CancelHandle, RemoteAuthority, SyncReconciler, SyncReport};
use crate::tombstone::{PurgePlan, PurgePolicy};
use crate::{Error, Result};

/// Thread-safe service over one local replica.
#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncEngine {
    /// Open the replica stored at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh replica is
    /// created; its records come back with the next sync.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local replica at {} is unreadable: {}. Starting a fresh replica.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory replica (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Shared handle for a reconciler or scheduler
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("capture.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");
        if parent.as_os_str().is_empty() || !parent.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local replica file {}", path.display());
            }
        }

        Ok(())
    }

    /// Create a record in `table`.
    pub async fn create(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        payload: Payload,
    ) -> Result<SyncableRecord> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());
        LocalMutationLog::new(&store)
            .create(ctx, table, payload)
            .await
    }

    /// Create a record from a typed entity.
    pub async fn create_entity<E: Entity>(
        &self,
        ctx: &MutationContext,
        entity: &E,
    ) -> Result<SyncableRecord> {
        self.create(ctx, &E::table()?, entity.to_payload()?).await
    }

    /// Replace a record's payload, returning the new view.
    pub async fn update(
        &self,
        ctx: &MutationContext,
        id: &RecordId,
        payload: Payload,
    ) -> Result<SyncableRecord> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());
        LocalMutationLog::new(&store)
            .update(ctx, id, payload)
            .await?;
        store
            .get_record(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Tombstone a record.
    pub async fn delete(&self, ctx: &MutationContext, id: &RecordId) -> Result<Revision> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());
        LocalMutationLog::new(&store).delete(ctx, id).await
    }

    /// Settle a conflicted record on one of its competing leaves.
    pub async fn resolve(
        &self,
        ctx: &MutationContext,
        id: &RecordId,
        chosen: &RevisionId,
        payload: Option<Payload>,
    ) -> Result<SyncableRecord> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());
        LocalMutationLog::new(&store)
            .resolve(ctx, id, chosen, payload)
            .await
    }

    /// Fetch a record's materialized view.
    pub async fn get(&self, id: &RecordId) -> Result<Option<SyncableRecord>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .get_record(id)
            .await
    }

    /// Fetch a record as a typed entity; `None` when absent or deleted.
    pub async fn get_entity<E: Entity>(&self, id: &RecordId) -> Result<Option<E>> {
        self.get(id)
            .await?
            .as_ref()
            .and_then(SyncableRecord::visible_payload)
            .map(E::from_payload)
            .transpose()
    }

    /// Load the full revision tree of a record.
    pub async fn tree(&self, id: &RecordId) -> Result<Option<RevisionTree>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .load_tree(id)
            .await
    }

    /// List records newest-edit first.
    pub async fn list(
        &self,
        table: Option<&TableName>,
        include_deleted: bool,
        limit: usize,
    ) -> Result<Vec<SyncableRecord>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .list_records(table, include_deleted, limit)
            .await
    }

    /// Identifiers of every local record, including tombstoned ones.
    pub async fn record_ids(&self, table: Option<&TableName>) -> Result<Vec<RecordId>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .record_ids(table)
            .await
    }

    /// List records currently in conflict.
    pub async fn list_conflicted(&self, table: Option<&TableName>) -> Result<Vec<SyncableRecord>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .list_conflicted(table)
            .await
    }

    /// List discovered forks, newest first.
    pub async fn conflict_history(
        &self,
        record_id: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .list_conflicts(record_id, limit)
            .await
    }

    /// Local revisions the authority has not accepted yet.
    pub async fn unsynced_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .unsynced_count()
            .await
    }

    pub async fn checkpoint(&self, table: &TableName) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .checkpoint(table)
            .await
    }

    /// Compute purge candidates and, unless `dry_run`, drop their bodies.
    ///
    /// Only records with at least one candidate are returned.
    pub async fn purge(&self, table: Option<&TableName>, dry_run: bool) -> Result<Vec<PurgePlan>> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());
        let policy = PurgePolicy;

        let mut plans = Vec::new();
        for id in store.record_ids(table).await? {
            let Some(mut tree) = store.load_tree(&id).await? else {
                continue;
            };
            let plan = policy.plan(&tree);
            if plan.is_empty() {
                continue;
            }
            if !dry_run {
                tree.purge(&plan.revisions)?;
                store.save_tree(&mut tree).await?;
                tracing::info!(
                    table = %plan.table,
                    record_id = %plan.record_id,
                    purged = plan.revisions.len(),
                    "Purged revision bodies"
                );
            }
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Reconciler bound to this replica.
    pub fn reconciler<R: RemoteAuthority>(&self, remote: R) -> SyncReconciler<R> {
        SyncReconciler::new(self.db.clone(), remote)
    }

    /// Run one sync cycle over `tables`.
    pub async fn sync_once<R: RemoteAuthority>(
        &self,
        ctx: &MutationContext,
        remote: R,
        tables: &[TableName],
    ) -> Result<SyncReport> {
        self.reconciler(remote)
            .run_cycle(ctx, tables, &CancelHandle::new())
            .await
    }
}
