//! Sync reconciler: one pull/push/resolve cycle against a remote authority.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::{Database, LibSqlRevisionStore, RevisionStore, UnsyncedEntry};
use crate::error::{Error, Result};
use crate::models::{ConflictSource, RecordId, Revision, RevisionId, TableName};
use crate::mutation::{log_conflicts, MutationContext};
use crate::revision::RevisionTree;

use super::remote::{PushOutcome, RemoteAuthority, RemoteError};

/// Revisions requested per pull round trip
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Cooperative cancellation for a running cycle
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A record left with competing leaves after a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictedRecord {
    pub table: TableName,
    pub record_id: RecordId,
    pub winner: RevisionId,
    pub conflicts: Vec<RevisionId>,
}

/// Ancestors that neither the batch nor the authority could supply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncGap {
    pub table: TableName,
    pub record_id: RecordId,
    pub missing: RevisionId,
}

/// Outcome of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Remote revisions newly attached
    pub pulled: usize,
    /// Known revisions whose `server_rev_at` was adopted from a pull
    pub confirmed: usize,
    /// Local revisions accepted by the authority
    pub pushed: usize,
    /// Pushes answered with a divergent sibling
    pub push_conflicts: usize,
    /// Local revisions still waiting on an unconfirmed ancestor
    pub deferred: usize,
    /// Revisions refused by either side
    pub rejected: usize,
    pub conflicted: Vec<ConflictedRecord>,
    pub gaps: Vec<SyncGap>,
    /// Checkpoints committed at the end of the cycle
    pub checkpoints: BTreeMap<TableName, i64>,
}

impl SyncReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }
}

#[derive(Debug, Default)]
struct FoldStats {
    attached: usize,
    confirmed: usize,
    invalid: usize,
}

/// Exchanges deltas between the local database and a remote authority.
pub struct SyncReconciler<R> {
    db: Arc<Mutex<Database>>,
    remote: R,
    page_size: usize,
}

impl<R: RemoteAuthority> SyncReconciler<R> {
    pub fn new(db: Arc<Mutex<Database>>, remote: R) -> Self {
        Self {
            db,
            remote,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Run one cycle over `tables`: pull, push, then report conflicts.
    ///
    /// Checkpoints are committed only when the whole cycle completes. On a
    /// network failure or cancellation the cycle stops with checkpoints
    /// unchanged; revisions attached so far are kept.
    pub async fn run_cycle(
        &self,
        ctx: &MutationContext,
        tables: &[TableName],
        cancel: &CancelHandle,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut touched = BTreeSet::new();
        let mut staged = BTreeMap::new();

        for table in tables {
            cancel.check()?;
            if let Some(checkpoint) = self
                .pull_table(ctx, table, cancel, &mut report, &mut touched)
                .await?
            {
                staged.insert(table.clone(), checkpoint);
            }

            cancel.check()?;
            self.push_table(ctx, table, cancel, &mut report, &mut touched)
                .await?;
        }

        {
            let db = self.db.lock().await;
            let store = LibSqlRevisionStore::new(db.connection());
            for (table, checkpoint) in &staged {
                store.set_checkpoint(table, *checkpoint, ctx.now()).await?;
            }
            for (table, record_id) in &touched {
                let Some(record) = store.get_record(record_id).await? else {
                    continue;
                };
                if record.has_conflicts() {
                    report.conflicted.push(ConflictedRecord {
                        table: table.clone(),
                        record_id: *record_id,
                        winner: record.rev,
                        conflicts: record.conflicts,
                    });
                }
            }
        }
        report.checkpoints = staged;

        info!(
            pulled = report.pulled,
            pushed = report.pushed,
            push_conflicts = report.push_conflicts,
            conflicted = report.conflicted.len(),
            gaps = report.gaps.len(),
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Pull and attach everything newer than the table's checkpoint.
    ///
    /// Returns the checkpoint to commit, or `None` when it must not move.
    async fn pull_table(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        cancel: &CancelHandle,
        report: &mut SyncReport,
        touched: &mut BTreeSet<(TableName, RecordId)>,
    ) -> Result<Option<i64>> {
        let start = {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .checkpoint(table)
                .await?
        };

        let mut cursor = start;
        let mut has_gap = false;
        loop {
            cancel.check()?;
            let batch = self
                .remote
                .pull_since(table, cursor, self.page_size)
                .await
                .map_err(network_failure)?;
            let batch_len = batch.len();
            if batch_len == 0 {
                break;
            }
            debug!(table = %table, count = batch_len, "Pulled revisions");

            let mut by_record: BTreeMap<RecordId, Vec<Revision>> = BTreeMap::new();
            for remote in batch {
                if let Some(at) = remote.revision.server_rev_at {
                    cursor = Some(cursor.map_or(at, |current| current.max(at)));
                }
                by_record
                    .entry(remote.record_id)
                    .or_default()
                    .push(remote.revision);
            }

            for (record_id, revisions) in by_record {
                cancel.check()?;
                touched.insert((table.clone(), record_id));
                if !self
                    .fold_pulled(ctx, table, record_id, revisions, report)
                    .await?
                {
                    has_gap = true;
                }
            }

            if batch_len < self.page_size {
                break;
            }
        }

        if has_gap {
            warn!(table = %table, "Checkpoint held back by missing ancestors");
            return Ok(None);
        }
        Ok(cursor.filter(|at| Some(*at) != start))
    }

    /// Attach pulled revisions of one record. Returns `false` on an irrecoverable gap.
    async fn fold_pulled(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        record_id: RecordId,
        revisions: Vec<Revision>,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let orphans = self
            .with_tree(ctx, table, record_id, ConflictSource::Pull, |tree| {
                fold(tree, revisions)
            })
            .await
            .map(|(orphans, stats)| {
                report.pulled += stats.attached;
                report.confirmed += stats.confirmed;
                report.rejected += stats.invalid;
                orphans
            })?;

        if orphans.is_empty() {
            return Ok(true);
        }

        debug!(
            table = %table,
            record_id = %record_id,
            orphans = orphans.len(),
            "Fetching missing ancestors"
        );
        let mut fetched = self
            .remote
            .fetch_revisions(table, &record_id)
            .await
            .map_err(network_failure)?;
        fetched.extend(orphans);

        let (remaining, stats) = self
            .with_tree(ctx, table, record_id, ConflictSource::Pull, |tree| {
                fold(tree, fetched)
            })
            .await?;
        report.pulled += stats.attached;
        report.confirmed += stats.confirmed;
        report.rejected += stats.invalid;

        let Some(orphan) = remaining.into_iter().min_by_key(|revision| revision.depth) else {
            return Ok(true);
        };
        let missing = orphan.parent_rev.unwrap_or_else(|| orphan.rev.clone());
        let gap = Error::IrrecoverableGap {
            table: table.clone(),
            record_id,
            missing: missing.clone(),
        };
        error!(table = %table, record_id = %record_id, missing = %missing, "{gap}");
        report.gaps.push(SyncGap {
            table: table.clone(),
            record_id,
            missing,
        });
        Ok(false)
    }

    /// Push every unsynced revision of `table` whose ancestors are confirmed.
    async fn push_table(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        cancel: &CancelHandle,
        report: &mut SyncReport,
        touched: &mut BTreeSet<(TableName, RecordId)>,
    ) -> Result<()> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .pending_unsynced(table)
                .await?
        };

        let mut by_record: BTreeMap<RecordId, Vec<UnsyncedEntry>> = BTreeMap::new();
        for entry in pending {
            by_record.entry(entry.record_id).or_default().push(entry);
        }

        for (record_id, entries) in by_record {
            for entry in entries {
                cancel.check()?;
                touched.insert((table.clone(), record_id));
                self.push_entry(ctx, table, &entry, report).await?;
            }
        }
        Ok(())
    }

    async fn push_entry(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        entry: &UnsyncedEntry,
        report: &mut SyncReport,
    ) -> Result<()> {
        let record_id = entry.record_id;
        let rev = &entry.rev;

        // One retry after attaching a conflict returned by the authority.
        for attempt in 0..2 {
            let snapshot = {
                let db = self.db.lock().await;
                let store = LibSqlRevisionStore::new(db.connection());
                store.load_tree(&record_id).await?
            };
            let Some(tree) = snapshot else {
                warn!(record_id = %record_id, rev = %rev, "Dropping log entry of unknown record");
                self.mark_pushed(ctx, &record_id, rev).await?;
                return Ok(());
            };
            let Some(revision) = tree.get(rev).cloned() else {
                warn!(record_id = %record_id, rev = %rev, "Dropping log entry of unknown revision");
                self.mark_pushed(ctx, &record_id, rev).await?;
                return Ok(());
            };

            if revision.server_rev_at.is_some() {
                self.mark_pushed(ctx, &record_id, rev).await?;
                return Ok(());
            }
            if !ancestors_confirmed(&tree, &revision) {
                debug!(record_id = %record_id, rev = %rev, "Deferring push until parent is confirmed");
                report.deferred += 1;
                return Ok(());
            }

            let acknowledged = tree
                .siblings_of(&revision)
                .into_iter()
                .filter(|sibling| sibling.server_rev_at.is_some())
                .map(|sibling| sibling.rev.clone())
                .collect::<Vec<_>>();

            let outcome = match self
                .remote
                .push_revision(table, &record_id, &revision, &acknowledged)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) if error.is_transient() => return Err(network_failure(error)),
                Err(error) => {
                    warn!(record_id = %record_id, rev = %rev, %error, "Push rejected");
                    report.rejected += 1;
                    return Ok(());
                }
            };

            match outcome {
                PushOutcome::Accepted { server_rev_at } => {
                    self.with_tree(ctx, table, record_id, ConflictSource::Push, |tree| {
                        tree.confirm(rev, server_rev_at)
                    })
                    .await?;
                    self.mark_pushed(ctx, &record_id, rev).await?;
                    debug!(record_id = %record_id, rev = %rev, server_rev_at, "Push accepted");
                    report.pushed += 1;
                    return Ok(());
                }
                PushOutcome::Conflict(divergent) => {
                    warn!(
                        record_id = %record_id,
                        rev = %rev,
                        divergent = %divergent.rev,
                        attempt,
                        "Push conflicts with remote sibling"
                    );
                    report.push_conflicts += 1;
                    let (orphans, stats) = self
                        .with_tree(ctx, table, record_id, ConflictSource::Push, |tree| {
                            fold(tree, vec![divergent])
                        })
                        .await?;
                    report.pulled += stats.attached;
                    report.rejected += stats.invalid;
                    if !orphans.is_empty() {
                        // The divergent branch hangs off revisions we never saw.
                        self.fold_pulled(ctx, table, record_id, orphans, report)
                            .await?;
                    }
                }
            }
        }

        report.deferred += 1;
        Ok(())
    }

    async fn mark_pushed(
        &self,
        ctx: &MutationContext,
        record_id: &RecordId,
        rev: &RevisionId,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRevisionStore::new(db.connection())
            .mark_pushed(record_id, rev, ctx.now())
            .await
    }

    /// Load (or start) a record's tree, apply `apply`, persist it and log any
    /// newly discovered conflict, all under the database lock.
    async fn with_tree<T>(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        record_id: RecordId,
        source: ConflictSource,
        apply: impl FnOnce(&mut RevisionTree) -> T,
    ) -> Result<T> {
        let db = self.db.lock().await;
        let store = LibSqlRevisionStore::new(db.connection());

        let mut tree = store
            .load_tree(&record_id)
            .await?
            .unwrap_or_else(|| RevisionTree::new(record_id, table.clone()));
        let before = conflict_revs(&tree);

        let value = apply(&mut tree);

        if !tree.is_empty() {
            store.save_tree(&mut tree).await?;
        }
        let after = conflict_revs(&tree);
        if !after.is_subset(&before) {
            log_conflicts(&store, &tree, source, ctx.now()).await?;
        }
        Ok(value)
    }
}

/// Attach `revisions` ancestor-first, returning those whose parent is still missing.
fn fold(tree: &mut RevisionTree, mut revisions: Vec<Revision>) -> (Vec<Revision>, FoldStats) {
    let mut stats = FoldStats::default();
    revisions.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.rev.cmp(&b.rev)));

    let mut pending = revisions;
    loop {
        let before = pending.len();
        let mut orphans = Vec::new();

        for revision in pending {
            if tree.contains(&revision.rev) {
                if let Some(server_rev_at) = revision.server_rev_at {
                    if tree.confirm(&revision.rev, server_rev_at) {
                        stats.confirmed += 1;
                    }
                }
                continue;
            }
            if revision
                .parent_rev
                .as_ref()
                .is_some_and(|parent| !tree.contains(parent))
            {
                orphans.push(revision);
                continue;
            }

            let rev = revision.rev.clone();
            match tree.attach(revision) {
                Ok(outcome) => {
                    debug!(
                        record_id = %tree.record_id(),
                        rev = %rev,
                        is_new_winner = outcome.is_new_winner,
                        "Attached remote revision"
                    );
                    stats.attached += 1;
                }
                Err(error) => {
                    warn!(
                        record_id = %tree.record_id(),
                        rev = %rev,
                        %error,
                        "Skipping remote revision"
                    );
                    stats.invalid += 1;
                }
            }
        }

        if orphans.is_empty() || orphans.len() == before {
            return (orphans, stats);
        }
        pending = orphans;
    }
}

fn ancestors_confirmed(tree: &RevisionTree, revision: &Revision) -> bool {
    match &revision.parent_rev {
        None => true,
        Some(parent) => {
            tree.is_purged(parent)
                || tree
                    .get(parent)
                    .is_some_and(|node| node.server_rev_at.is_some())
        }
    }
}

fn conflict_revs(tree: &RevisionTree) -> BTreeSet<RevisionId> {
    tree.conflict_set()
        .into_iter()
        .map(|leaf| leaf.rev.clone())
        .collect()
}

fn network_failure(error: RemoteError) -> Error {
    warn!(%error, "Remote authority failed");
    Error::NetworkFailure(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, SyncableRecord};
    use crate::mutation::{LocalMutationLog, ManualClock};
    use crate::revision::{compare_revisions, RecordState};
    use crate::sync::memory::MemoryRemoteAuthority;
    use crate::sync::remote::{RemoteResult, RemoteRevision};
    use pretty_assertions::assert_eq;

    struct Replica {
        db: Arc<Mutex<Database>>,
        ctx: MutationContext,
    }

    impl Replica {
        async fn new(actor: &str) -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            Self {
                db: Arc::new(Mutex::new(Database::open_in_memory().await.unwrap())),
                ctx: MutationContext::with_clock(actor, clock).unwrap(),
            }
        }

        async fn create(&self, label: &str) -> SyncableRecord {
            let db = self.db.lock().await;
            let store = LibSqlRevisionStore::new(db.connection());
            LocalMutationLog::new(&store)
                .create(&self.ctx, &TableName::rows(), Payload::new().with("label", label))
                .await
                .unwrap()
        }

        async fn update(&self, id: &RecordId, label: &str) -> Revision {
            let db = self.db.lock().await;
            let store = LibSqlRevisionStore::new(db.connection());
            LocalMutationLog::new(&store)
                .update(&self.ctx, id, Payload::new().with("label", label))
                .await
                .unwrap()
        }

        async fn delete(&self, id: &RecordId) -> Revision {
            let db = self.db.lock().await;
            let store = LibSqlRevisionStore::new(db.connection());
            LocalMutationLog::new(&store)
                .delete(&self.ctx, id)
                .await
                .unwrap()
        }

        async fn resolve(&self, id: &RecordId, chosen: &RevisionId) -> SyncableRecord {
            let db = self.db.lock().await;
            let store = LibSqlRevisionStore::new(db.connection());
            LocalMutationLog::new(&store)
                .resolve(&self.ctx, id, chosen, None)
                .await
                .unwrap()
        }

        async fn record(&self, id: &RecordId) -> SyncableRecord {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .get_record(id)
                .await
                .unwrap()
                .unwrap()
        }

        async fn tree(&self, id: &RecordId) -> RevisionTree {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .load_tree(id)
                .await
                .unwrap()
                .unwrap()
        }

        async fn checkpoint(&self) -> Option<i64> {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .checkpoint(&TableName::rows())
                .await
                .unwrap()
        }

        async fn unsynced(&self) -> usize {
            let db = self.db.lock().await;
            LibSqlRevisionStore::new(db.connection())
                .unsynced_count()
                .await
                .unwrap()
        }

        async fn sync<R: RemoteAuthority>(&self, remote: R) -> Result<SyncReport> {
            SyncReconciler::new(self.db.clone(), remote)
                .with_page_size(2)
                .run_cycle(&self.ctx, &[TableName::rows()], &CancelHandle::new())
                .await
        }
    }

    /// Authority view that never returns pulled revisions
    struct PushOnly(Arc<MemoryRemoteAuthority>);

    impl RemoteAuthority for PushOnly {
        async fn pull_since(
            &self,
            _table: &TableName,
            _since: Option<i64>,
            _limit: usize,
        ) -> RemoteResult<Vec<RemoteRevision>> {
            Ok(Vec::new())
        }

        async fn push_revision(
            &self,
            table: &TableName,
            record_id: &RecordId,
            revision: &Revision,
            acknowledged: &[RevisionId],
        ) -> RemoteResult<PushOutcome> {
            self.0
                .push_revision(table, record_id, revision, acknowledged)
                .await
        }

        async fn fetch_revisions(
            &self,
            table: &TableName,
            record_id: &RecordId,
        ) -> RemoteResult<Vec<Revision>> {
            self.0.fetch_revisions(table, record_id).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_replicates_to_second_replica() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let record = alice.create("oak").await;
        let id = record.id;
        alice.update(&id, "oak tree").await;
        alice.update(&id, "old oak").await;

        let pushed = alice.sync(remote.clone()).await.unwrap();
        assert_eq!(pushed.pushed, 3);
        assert_eq!(alice.unsynced().await, 0);

        let pulled = bob.sync(remote.clone()).await.unwrap();
        assert_eq!(pulled.pulled, 3);
        assert_eq!(pulled.checkpoints.get(&TableName::rows()), Some(&3));
        assert_eq!(bob.checkpoint().await, Some(3));

        let theirs = bob.record(&id).await;
        let ours = alice.record(&id).await;
        assert_eq!(theirs, ours);
        assert_eq!(theirs.server_rev_at, Some(3));
        assert_eq!(theirs.payload.get_str("label"), Some("old oak"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_cycle_is_a_no_op() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        alice.create("oak").await;

        alice.sync(remote.clone()).await.unwrap();
        let report = alice.sync(remote.clone()).await.unwrap();

        assert_eq!(report.pulled, 0);
        assert_eq!(report.pushed, 0);
        assert!(!report.has_conflicts());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_edits_converge_to_same_conflict() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let id = alice.create("oak").await.id;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        let ours = alice.update(&id, "oak tree").await;
        let theirs = bob.update(&id, "old oak").await;

        alice.sync(remote.clone()).await.unwrap();
        let report = bob.sync(remote.clone()).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.push_conflicts, 0);
        assert_eq!(report.conflicted.len(), 1);
        alice.sync(remote.clone()).await.unwrap();

        let (winner, loser) = if compare_revisions(&ours.rev, &theirs.rev).is_lt() {
            (ours, theirs)
        } else {
            (theirs, ours)
        };
        for replica in [&alice, &bob] {
            let record = replica.record(&id).await;
            assert_eq!(record.rev, winner.rev);
            assert_eq!(record.conflicts, vec![loser.rev.clone()]);
        }

        let db = bob.db.lock().await;
        let history = LibSqlRevisionStore::new(db.connection())
            .list_conflicts(Some(&id), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, ConflictSource::Pull);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_against_superseded_parent_attaches_conflict() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let id = alice.create("oak").await.id;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        let ours = alice.update(&id, "oak tree").await;
        alice.sync(remote.clone()).await.unwrap();
        let theirs = bob.update(&id, "old oak").await;

        let report = bob.sync(PushOnly(remote.clone())).await.unwrap();
        assert_eq!(report.push_conflicts, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.conflicted.len(), 1);

        let tree = bob.tree(&id).await;
        assert_eq!(tree.state(), RecordState::Conflicted);
        assert!(tree.get(&ours.rev).is_some());
        assert!(tree.get(&theirs.rev).unwrap().server_rev_at.is_some());
        assert_eq!(bob.unsynced().await, 0);

        let db = bob.db.lock().await;
        let history = LibSqlRevisionStore::new(db.connection())
            .list_conflicts(Some(&id), 10)
            .await
            .unwrap();
        drop(db);
        assert_eq!(history[0].source, ConflictSource::Push);

        // The fork reaches the other replica on its next pull.
        alice.sync(remote.clone()).await.unwrap();
        assert_eq!(alice.record(&id).await, bob.record(&id).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_network_failure_keeps_checkpoint_and_log() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        alice.create("oak").await;
        alice.sync(remote.clone()).await.unwrap();
        bob.create("elm").await;

        remote.set_online(false);
        let error = bob.sync(remote.clone()).await.unwrap_err();
        assert!(matches!(error, Error::NetworkFailure(_)));
        assert_eq!(bob.checkpoint().await, None);
        assert_eq!(bob.unsynced().await, 1);

        remote.set_online(true);
        let report = bob.sync(remote.clone()).await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(bob.unsynced().await, 0);
        assert_eq!(bob.checkpoint().await, Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_cycle_changes_nothing() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        alice.create("oak").await;

        let cancel = CancelHandle::new();
        cancel.cancel();
        let result = SyncReconciler::new(alice.db.clone(), remote.clone())
            .run_cycle(&alice.ctx, &[TableName::rows()], &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(alice.unsynced().await, 1);
        assert!(remote
            .pull_since(&TableName::rows(), None, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_ancestor_is_reported_and_holds_checkpoint() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let root = alice.create("oak").await;
        let middle = alice.update(&root.id, "oak tree").await;
        alice.update(&root.id, "old oak").await;
        alice.sync(remote.clone()).await.unwrap();
        assert!(remote.discard(&root.id, &middle.rev).await);

        let report = bob.sync(remote.clone()).await.unwrap();

        assert_eq!(
            report.gaps,
            vec![SyncGap {
                table: TableName::rows(),
                record_id: root.id,
                missing: middle.rev,
            }]
        );
        assert!(report.checkpoints.is_empty());
        assert_eq!(bob.checkpoint().await, None);
        assert_eq!(bob.record(&root.id).await.rev, root.rev);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_delete_is_not_resurrected() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let id = alice.create("oak").await.id;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        alice.delete(&id).await;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        let record = bob.record(&id).await;
        assert!(record.deleted);
        assert_eq!(record.visible_payload(), None);
        assert!(record.is_synced());
    }

    /// Alice edits then deletes while Bob edits the same synced root.
    async fn delete_against_edit(
        remote: &Arc<MemoryRemoteAuthority>,
    ) -> (Replica, Replica, RecordId, Revision, Revision) {
        let alice = Replica::new("alice").await;
        let bob = Replica::new("bob").await;

        let id = alice.create("oak").await.id;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        alice.update(&id, "oak tree").await;
        let closed = alice.delete(&id).await;
        let edited = bob.update(&id, "old oak").await;
        (alice, bob, id, closed, edited)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_concurrent_with_edit_is_reported_on_both_replicas() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let (alice, bob, id, closed, edited) = delete_against_edit(&remote).await;

        alice.sync(remote.clone()).await.unwrap();
        let bob_report = bob.sync(remote.clone()).await.unwrap();
        let alice_report = alice.sync(remote.clone()).await.unwrap();

        for report in [&bob_report, &alice_report] {
            assert_eq!(report.conflicted.len(), 1);
            assert_eq!(report.conflicted[0].winner, closed.rev);
            assert_eq!(report.conflicted[0].conflicts, vec![edited.rev.clone()]);
        }
        for replica in [&alice, &bob] {
            let record = replica.record(&id).await;
            assert!(record.deleted);
            assert_eq!(record.rev, closed.rev);
            assert_eq!(record.conflicts, vec![edited.rev.clone()]);
            assert_eq!(replica.tree(&id).await.state(), RecordState::Conflicted);
        }

        let stored = remote.revisions_of(&id).await;
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|revision| revision.server_rev_at.is_some()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolution_replicates_and_settles_both_replicas() {
        let remote = Arc::new(MemoryRemoteAuthority::new());
        let (alice, bob, id, closed, edited) = delete_against_edit(&remote).await;
        alice.sync(remote.clone()).await.unwrap();
        bob.sync(remote.clone()).await.unwrap();

        let resolved = bob.resolve(&id, &edited.rev).await;
        assert!(!resolved.deleted);
        assert!(!resolved.has_conflicts());

        let pushed = bob.sync(remote.clone()).await.unwrap();
        assert_eq!(pushed.pushed, 1);
        let pulled = alice.sync(remote.clone()).await.unwrap();
        assert!(!pulled.has_conflicts());

        let ours = alice.record(&id).await;
        assert_eq!(ours, bob.record(&id).await);
        assert_eq!(ours.payload.get_str("label"), Some("old oak"));
        assert!(alice.tree(&id).await.is_superseded(&closed.rev));

        let settled = remote
            .revisions_of(&id)
            .await
            .pop()
            .unwrap();
        assert_eq!(settled.supersedes, vec![closed.rev]);
    }
}
