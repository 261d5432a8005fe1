//! Local mutation log.
//!
//! Every local create, update and delete becomes a new leaf revision, is
//! attached to the record's tree, then persisted and appended to the unsynced
//! log in a single transaction.
//! Local edits always succeed: an update is rebased onto whatever the local
//! winner is at the time, and divergence is left to the reconciler.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::db::RevisionStore;
use crate::error::{Error, Result};
use crate::models::{
    ConflictSource, Payload, RecordId, Revision, RevisionId, SyncConflict, SyncableRecord,
    TableName,
};
use crate::revision::{RecordState, RevisionTree};

/// Source of edit timestamps (Unix ms)
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        crate::util::unix_millis_now()
    }
}

/// Clock advanced by hand, for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub const fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    /// Move the clock forward and return the new time
    pub fn advance(&self, millis: i64) -> i64 {
        self.0.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Who is editing and what time it is.
///
/// Passed explicitly to every mutation and sync call.
#[derive(Clone)]
pub struct MutationContext {
    actor: String,
    clock: Arc<dyn Clock>,
}

impl MutationContext {
    /// Context stamping edits with the wall clock
    pub fn new(actor: impl Into<String>) -> Result<Self> {
        Self::with_clock(actor, Arc::new(SystemClock))
    }

    pub fn with_clock(actor: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self> {
        let actor = actor.into().trim().to_string();
        if actor.is_empty() {
            return Err(Error::InvalidInput("Actor cannot be empty".to_string()));
        }
        Ok(Self { actor, clock })
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

impl std::fmt::Debug for MutationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationContext")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

/// The only write path for application code.
pub struct LocalMutationLog<'a, S> {
    store: &'a S,
}

impl<'a, S: RevisionStore> LocalMutationLog<'a, S> {
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Create a record with a fresh id and a root revision
    pub async fn create(
        &self,
        ctx: &MutationContext,
        table: &TableName,
        payload: Payload,
    ) -> Result<SyncableRecord> {
        let mut tree = RevisionTree::new(RecordId::new(), table.clone());
        let root = tree.next_revision(None, payload, ctx.actor(), false, ctx.now())?;
        self.append(ctx, &mut tree, root).await?;

        info!(table = %table, record_id = %tree.record_id(), "Created record");
        Self::materialize(&tree)
    }

    /// Append an edit on top of the current winner
    pub async fn update(
        &self,
        ctx: &MutationContext,
        id: &RecordId,
        payload: Payload,
    ) -> Result<Revision> {
        let mut tree = self.load(id).await?;
        let base = tree.current_winner().map(|winner| winner.rev.clone());
        let revision = tree.next_revision(base.as_ref(), payload, ctx.actor(), false, ctx.now())?;
        self.append(ctx, &mut tree, revision.clone()).await?;
        Ok(revision)
    }

    /// Tombstone the winner's branch, keeping its payload.
    ///
    /// Deleting a record whose winner is already a tombstone returns that
    /// tombstone unchanged.
    pub async fn delete(&self, ctx: &MutationContext, id: &RecordId) -> Result<Revision> {
        let mut tree = self.load(id).await?;
        let winner = tree
            .current_winner()
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if winner.deleted {
            return Ok(winner);
        }

        let revision = tree.next_revision(
            Some(&winner.rev),
            winner.payload.clone(),
            ctx.actor(),
            true,
            ctx.now(),
        )?;
        self.append(ctx, &mut tree, revision.clone()).await?;
        Ok(revision)
    }

    /// Settle a conflict on `chosen`, the winner or any member of the conflict set.
    ///
    /// Appends one edit on the chosen leaf (with `payload`, or the leaf's own
    /// payload and tombstone flag) that supersedes every other competing leaf.
    /// The superseded leaves stay in the tree and in the conflict history.
    pub async fn resolve(
        &self,
        ctx: &MutationContext,
        id: &RecordId,
        chosen: &RevisionId,
        payload: Option<Payload>,
    ) -> Result<SyncableRecord> {
        let mut tree = self.load(id).await?;
        let resolution = tree.resolution_revision(chosen, payload, ctx.actor(), ctx.now())?;
        let superseded = resolution.supersedes.len();
        self.append(ctx, &mut tree, resolution).await?;

        info!(
            record_id = %id,
            chosen = %chosen,
            superseded,
            "Resolved conflict"
        );
        Self::materialize(&tree)
    }

    async fn load(&self, id: &RecordId) -> Result<RevisionTree> {
        self.store
            .load_tree(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn append(
        &self,
        ctx: &MutationContext,
        tree: &mut RevisionTree,
        revision: Revision,
    ) -> Result<()> {
        let rev = revision.rev.clone();
        let outcome = tree.attach(revision)?;
        self.store
            .save_tree_with_unsynced(tree, std::slice::from_ref(&rev), ctx.now())
            .await?;

        debug!(
            record_id = %tree.record_id(),
            rev = %rev,
            is_new_winner = outcome.is_new_winner,
            "Appended local revision"
        );

        if outcome.conflicts_changed && tree.state() == RecordState::Conflicted {
            log_conflicts(self.store, tree, ConflictSource::Local, ctx.now()).await?;
        }
        Ok(())
    }

    fn materialize(tree: &RevisionTree) -> Result<SyncableRecord> {
        tree.record()
            .ok_or_else(|| Error::NotFound(tree.record_id().to_string()))
    }
}

/// Record every losing leaf of `tree` in the conflict history.
pub(crate) async fn log_conflicts<S: RevisionStore>(
    store: &S,
    tree: &RevisionTree,
    source: ConflictSource,
    detected_at: i64,
) -> Result<usize> {
    let Some(winner) = tree.current_winner() else {
        return Ok(0);
    };

    let mut logged = 0;
    for loser in tree.conflict_set() {
        let conflict = SyncConflict {
            id: 0,
            table: tree.table().clone(),
            record_id: tree.record_id(),
            winner_rev: winner.rev.clone(),
            losing_rev: loser.rev.clone(),
            detected_at,
            source,
        };
        if store.record_conflict(&conflict).await? {
            tracing::warn!(
                table = %conflict.table,
                record_id = %conflict.record_id,
                winner = %conflict.winner_rev,
                loser = %conflict.losing_rev,
                source = %source,
                "Conflict detected"
            );
            logged += 1;
        }
    }
    Ok(logged)
}
