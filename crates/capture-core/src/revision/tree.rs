//! Per-record revision tree.
//!
//! The tree is append-only: nodes are inserted once and never removed, except
//! that the Tombstone Policy may drop the *body* of a fully superseded ancestor,
//! leaving a stub so descendants keep attaching.
//!
//! The tree also remembers which nodes and stubs changed since it was loaded,
//! so the store only writes those.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::error::{Error, Result};
use crate::models::{Payload, RecordId, Revision, RevisionId, SyncableRecord, TableName};

use super::codec;

/// Errors raised by the revision tree layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Revision already present; attaching again is a no-op
    #[error("Revision {0} is already attached")]
    DuplicateRevision(RevisionId),

    /// Parent not attached yet
    #[error("Revision {rev} references missing parent {parent}")]
    OrphanRevision { rev: RevisionId, parent: RevisionId },

    /// Revision breaks the ancestry or content-hash invariants
    #[error("Invalid revision {rev}: {reason}")]
    InvalidRevision { rev: RevisionId, reason: String },

    /// Purge refused for this node
    #[error("Revision {rev} cannot be purged: {reason}")]
    NotPurgeable {
        rev: RevisionId,
        reason: &'static str,
    },
}

/// Result of a successful [`RevisionTree::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    /// The attached revision is now the winner
    pub is_new_winner: bool,
    /// The set of leaves losing to the winner changed
    pub conflicts_changed: bool,
}

/// Conflict state of a record on this replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// No revision attached
    Absent,
    /// One winner, no competing leaves
    Single,
    /// Competing leaves exist, tombstones included
    Conflicted,
}

/// Full ancestry of one record's edits.
#[derive(Debug, Clone)]
pub struct RevisionTree {
    record_id: RecordId,
    table: TableName,
    nodes: BTreeMap<RevisionId, Revision>,
    stubs: BTreeMap<RevisionId, Option<RevisionId>>,
    children: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    leaves: BTreeSet<RevisionId>,
    superseded: BTreeSet<RevisionId>,
    winner: Option<RevisionId>,
    dirty: BTreeSet<RevisionId>,
    dirty_stubs: BTreeSet<RevisionId>,
}

impl RevisionTree {
    /// Create an empty tree for a record
    #[must_use]
    pub const fn new(record_id: RecordId, table: TableName) -> Self {
        Self {
            record_id,
            table,
            nodes: BTreeMap::new(),
            stubs: BTreeMap::new(),
            children: BTreeMap::new(),
            leaves: BTreeSet::new(),
            superseded: BTreeSet::new(),
            winner: None,
            dirty: BTreeSet::new(),
            dirty_stubs: BTreeSet::new(),
        }
    }

    /// Rebuild a tree from persisted revisions and purge stubs, in any order.
    ///
    /// Stubs are given as `(rev, parent_rev)` pairs. The restored tree has no
    /// pending changes.
    pub fn restore(
        record_id: RecordId,
        table: TableName,
        mut revisions: Vec<Revision>,
        purged: impl IntoIterator<Item = (RevisionId, Option<RevisionId>)>,
    ) -> std::result::Result<Self, TreeError> {
        let mut tree = Self::new(record_id, table);
        for (rev, parent) in purged {
            if let Some(parent) = &parent {
                tree.children
                    .entry(parent.clone())
                    .or_default()
                    .insert(rev.clone());
            }
            tree.stubs.insert(rev, parent);
        }

        revisions.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.rev.cmp(&b.rev)));
        for revision in revisions {
            match tree.attach(revision) {
                Ok(_) | Err(TreeError::DuplicateRevision(_)) => {}
                Err(error) => return Err(error),
            }
        }
        tree.mark_persisted();
        Ok(tree)
    }

    #[must_use]
    pub const fn record_id(&self) -> RecordId {
        self.record_id
    }

    #[must_use]
    pub const fn table(&self) -> &TableName {
        &self.table
    }

    /// Insert a revision node and recompute the winner.
    pub fn attach(&mut self, revision: Revision) -> std::result::Result<AttachOutcome, TreeError> {
        codec::verify(&revision).map_err(|reason| TreeError::InvalidRevision {
            rev: revision.rev.clone(),
            reason,
        })?;

        if self.contains(&revision.rev) {
            return Err(TreeError::DuplicateRevision(revision.rev));
        }

        if let Some(parent) = &revision.parent_rev {
            if let Some(parent_node) = self.nodes.get(parent) {
                let prefix = &revision.revisions[..revision.revisions.len() - 1];
                if parent_node.revisions != prefix {
                    return Err(TreeError::InvalidRevision {
                        rev: revision.rev.clone(),
                        reason: format!("ancestry disagrees with attached parent {parent}"),
                    });
                }
            } else if !self.stubs.contains_key(parent) {
                return Err(TreeError::OrphanRevision {
                    rev: revision.rev.clone(),
                    parent: parent.clone(),
                });
            }
        }

        let previous_conflicts = self.conflict_ids();
        let rev = revision.rev.clone();

        if let Some(parent) = &revision.parent_rev {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(rev.clone());
            self.leaves.remove(parent);
        }
        self.leaves.insert(rev.clone());

        let competes = revision.supersedes.is_empty() && !self.superseded.contains(&rev);
        let extends_winner = self.winner.as_ref() == revision.parent_rev.as_ref();
        self.superseded.extend(revision.supersedes.iter().cloned());
        self.nodes.insert(rev.clone(), revision);
        self.dirty.insert(rev.clone());

        self.winner = match &self.winner {
            Some(current) if competes && !extends_winner && !self.superseded.contains(current) => {
                if codec::compare_revisions(&rev, current).is_lt() {
                    Some(rev.clone())
                } else {
                    Some(current.clone())
                }
            }
            _ => self.best_leaf(),
        };

        Ok(AttachOutcome {
            is_new_winner: self.winner.as_ref() == Some(&rev),
            conflicts_changed: previous_conflicts != self.conflict_ids(),
        })
    }

    /// Build the next revision on top of `parent_rev` without attaching it.
    ///
    /// Fails with [`Error::InvalidParent`] when `parent_rev` is not held by this tree.
    pub fn next_revision(
        &self,
        parent_rev: Option<&RevisionId>,
        payload: Payload,
        actor: &str,
        deleted: bool,
        client_rev_at: i64,
    ) -> Result<Revision> {
        let parent = match parent_rev {
            Some(parent_rev) => Some(self.node(parent_rev)?),
            None => None,
        };
        codec::next_revision(parent, payload, actor, deleted, client_rev_at)
    }

    /// Build an edit on `chosen` that supersedes every other competing leaf.
    ///
    /// `chosen` must be the winner or a member of the conflict set. The edit
    /// keeps `chosen`'s payload and tombstone flag unless `payload` is given,
    /// in which case it is a live edit.
    pub fn resolution_revision(
        &self,
        chosen: &RevisionId,
        payload: Option<Payload>,
        actor: &str,
        client_rev_at: i64,
    ) -> Result<Revision> {
        let conflicts = self.conflict_ids();
        if conflicts.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Record {} has no conflict to resolve",
                self.record_id
            )));
        }
        if self.winner.as_ref() != Some(chosen) && !conflicts.contains(chosen) {
            return Err(Error::InvalidInput(format!(
                "{chosen} is not a competing leaf of record {}",
                self.record_id
            )));
        }

        let leaf = self.node(chosen)?;
        let others = self
            .leaves
            .iter()
            .filter(|rev| *rev != chosen && !self.superseded.contains(*rev))
            .cloned()
            .collect::<Vec<_>>();
        let (payload, deleted) = match payload {
            Some(payload) => (payload, false),
            None => (leaf.payload.clone(), leaf.deleted),
        };
        codec::resolving_revision(leaf, payload, actor, deleted, others, client_rev_at)
    }

    /// Whether a revision (body or purged stub) is known
    #[must_use]
    pub fn contains(&self, rev: &RevisionId) -> bool {
        self.nodes.contains_key(rev) || self.stubs.contains_key(rev)
    }

    #[must_use]
    pub fn get(&self, rev: &RevisionId) -> Option<&Revision> {
        self.nodes.get(rev)
    }

    #[must_use]
    pub fn is_purged(&self, rev: &RevisionId) -> bool {
        self.stubs.contains_key(rev)
    }

    #[must_use]
    pub fn is_leaf(&self, rev: &RevisionId) -> bool {
        self.leaves.contains(rev)
    }

    /// Whether a later resolving edit took `rev` out of the competition
    #[must_use]
    pub fn is_superseded(&self, rev: &RevisionId) -> bool {
        self.superseded.contains(rev)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of revisions holding a body
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// All revisions with a body, in identifier order
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.nodes.values()
    }

    /// Purged ancestors as `(rev, parent_rev)` pairs
    pub fn purged(&self) -> impl Iterator<Item = (&RevisionId, Option<&RevisionId>)> {
        self.stubs.iter().map(|(rev, parent)| (rev, parent.as_ref()))
    }

    /// Revisions attached or modified since the tree was loaded or last persisted
    pub fn changed_revisions(&self) -> impl Iterator<Item = &Revision> {
        self.dirty.iter().filter_map(|rev| self.nodes.get(rev))
    }

    /// Stubs created since the tree was loaded or last persisted
    pub fn changed_stubs(&self) -> impl Iterator<Item = (&RevisionId, Option<&RevisionId>)> {
        self.dirty_stubs
            .iter()
            .filter_map(|rev| self.stubs.get_key_value(rev))
            .map(|(rev, parent)| (rev, parent.as_ref()))
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.dirty_stubs.is_empty()
    }

    /// Forget pending changes once the store has written them
    pub fn mark_persisted(&mut self) {
        self.dirty.clear();
        self.dirty_stubs.clear();
    }

    /// Revision chosen by [`codec::compare_revisions`] among leaves not yet superseded
    #[must_use]
    pub fn current_winner(&self) -> Option<&Revision> {
        self.winner.as_ref().and_then(|rev| self.nodes.get(rev))
    }

    /// Every competing leaf other than the winner, tombstones included, best first
    #[must_use]
    pub fn conflict_set(&self) -> Vec<&Revision> {
        self.leaves()
            .into_iter()
            .filter(|leaf| {
                Some(&leaf.rev) != self.winner.as_ref() && !self.superseded.contains(&leaf.rev)
            })
            .collect()
    }

    /// Tombstoned members of the conflict set
    #[must_use]
    pub fn deleted_conflicts(&self) -> Vec<&Revision> {
        self.conflict_set()
            .into_iter()
            .filter(|leaf| leaf.deleted)
            .collect()
    }

    /// All leaves, superseded ones included, best first
    #[must_use]
    pub fn leaves(&self) -> Vec<&Revision> {
        let mut leaves = self
            .leaves
            .iter()
            .filter_map(|rev| self.nodes.get(rev))
            .collect::<Vec<_>>();
        leaves.sort_by(|a, b| codec::compare_revisions(&a.rev, &b.rev));
        leaves
    }

    /// Revisions without a parent
    #[must_use]
    pub fn roots(&self) -> Vec<&Revision> {
        self.nodes.values().filter(|node| node.is_root()).collect()
    }

    /// Revisions sharing `revision`'s parent, excluding `revision` itself
    #[must_use]
    pub fn siblings_of(&self, revision: &Revision) -> Vec<&Revision> {
        let candidates = match &revision.parent_rev {
            Some(parent) => self.children_of(parent),
            None => self.roots(),
        };
        candidates
            .into_iter()
            .filter(|sibling| sibling.rev != revision.rev)
            .collect()
    }

    /// Direct children of a revision
    #[must_use]
    pub fn children_of(&self, rev: &RevisionId) -> Vec<&Revision> {
        self.children
            .get(rev)
            .into_iter()
            .flatten()
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    #[must_use]
    pub fn state(&self) -> RecordState {
        if self.winner.is_none() {
            RecordState::Absent
        } else if self.conflict_set().is_empty() {
            RecordState::Single
        } else {
            RecordState::Conflicted
        }
    }

    /// Leaves reachable from `rev`, following purged stubs too
    #[must_use]
    pub fn descendant_leaves(&self, rev: &RevisionId) -> Vec<&Revision> {
        let mut found = Vec::new();
        let mut pending = vec![rev];
        while let Some(current) = pending.pop() {
            if self.leaves.contains(current) {
                found.extend(self.nodes.get(current));
            }
            pending.extend(self.children.get(current).into_iter().flatten());
        }
        found
    }

    /// Deepest revision shared by the ancestry paths of `a` and `b`
    #[must_use]
    pub fn common_ancestor(&self, a: &RevisionId, b: &RevisionId) -> Option<RevisionId> {
        let left = self.nodes.get(a)?;
        let right = self.nodes.get(b)?;
        left.revisions
            .iter()
            .rev()
            .find(|shared| right.descends_from(shared))
            .cloned()
    }

    /// Adopt the authority's acceptance timestamp for a revision.
    ///
    /// Returns `true` when the stored value changed.
    pub fn confirm(&mut self, rev: &RevisionId, server_rev_at: i64) -> bool {
        match self.nodes.get_mut(rev) {
            Some(node) if node.server_rev_at != Some(server_rev_at) => {
                node.server_rev_at = Some(server_rev_at);
                self.dirty.insert(rev.clone());
                true
            }
            _ => false,
        }
    }

    /// Drop the bodies of the given ancestors, keeping stubs.
    ///
    /// Leaves (and therefore the winner and every conflict) are never purged,
    /// nor are resolving edits, whose body records what they supersede.
    pub fn purge(&mut self, revs: &[RevisionId]) -> std::result::Result<(), TreeError> {
        for rev in revs {
            if self.leaves.contains(rev) {
                return Err(TreeError::NotPurgeable {
                    rev: rev.clone(),
                    reason: "leaf revisions are never purged",
                });
            }
            match self.nodes.get(rev) {
                None => {
                    return Err(TreeError::NotPurgeable {
                        rev: rev.clone(),
                        reason: "revision has no body in this tree",
                    })
                }
                Some(node) if !node.supersedes.is_empty() => {
                    return Err(TreeError::NotPurgeable {
                        rev: rev.clone(),
                        reason: "revision settles a conflict",
                    })
                }
                Some(_) => {}
            }
        }

        for rev in revs {
            if let Some(node) = self.nodes.remove(rev) {
                self.dirty.remove(&node.rev);
                self.dirty_stubs.insert(node.rev.clone());
                self.stubs.insert(node.rev, node.parent_rev);
            }
        }
        Ok(())
    }

    /// Materialized view of the record, `None` while the tree is empty
    #[must_use]
    pub fn record(&self) -> Option<SyncableRecord> {
        let winner = self.current_winner()?;
        let conflicts = self
            .conflict_set()
            .into_iter()
            .map(|leaf| leaf.rev.clone())
            .collect();
        let deleted_conflicts = self
            .deleted_conflicts()
            .into_iter()
            .map(|leaf| leaf.rev.clone())
            .collect();

        Some(SyncableRecord::from_winner(
            self.record_id,
            self.table.clone(),
            winner,
            conflicts,
            deleted_conflicts,
        ))
    }

    fn node(&self, rev: &RevisionId) -> Result<&Revision> {
        self.nodes.get(rev).ok_or_else(|| Error::InvalidParent {
            record_id: self.record_id,
            parent: rev.clone(),
        })
    }

    fn best_leaf(&self) -> Option<RevisionId> {
        let best = |competing: bool| {
            self.leaves
                .iter()
                .filter(|rev| !competing || !self.superseded.contains(*rev))
                .min_by(|a, b| codec::compare_revisions(a, b))
                .cloned()
        };
        best(true).or_else(|| best(false))
    }

    fn conflict_ids(&self) -> BTreeSet<RevisionId> {
        self.conflict_set()
            .into_iter()
            .map(|leaf| leaf.rev.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn tree() -> RevisionTree {
        RevisionTree::new(RecordId::new(), TableName::rows())
    }

    fn edit(tree: &RevisionTree, parent: Option<&Revision>, label: &str, actor: &str) -> Revision {
        tree.next_revision(
            parent.map(|parent| &parent.rev),
            Payload::new().with("label", label),
            actor,
            false,
            0,
        )
        .unwrap()
    }

    fn tombstone(tree: &RevisionTree, parent: &Revision, actor: &str) -> Revision {
        tree.next_revision(Some(&parent.rev), parent.payload.clone(), actor, true, 0)
            .unwrap()
    }

    fn forked() -> (RevisionTree, Revision, Revision, Revision) {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let left = edit(&tree, Some(&root), "oak tree", "alice");
        let right = edit(&tree, Some(&root), "old oak", "bob");
        tree.attach(left.clone()).unwrap();
        tree.attach(right.clone()).unwrap();
        (tree, root, left, right)
    }

    #[test]
    fn test_root_attach_makes_single_state() {
        let mut tree = tree();
        assert_eq!(tree.state(), RecordState::Absent);

        let root = edit(&tree, None, "oak", "alice");
        let outcome = tree.attach(root.clone()).unwrap();

        assert!(outcome.is_new_winner);
        assert!(!outcome.conflicts_changed);
        assert_eq!(tree.state(), RecordState::Single);
        assert_eq!(tree.current_winner(), Some(&root));
    }

    #[test]
    fn test_child_of_winner_extends_branch() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let child = edit(&tree, Some(&root), "oak tree", "alice");

        let outcome = tree.attach(child.clone()).unwrap();

        assert!(outcome.is_new_winner);
        assert!(!outcome.conflicts_changed);
        assert_eq!(tree.current_winner().unwrap().rev, child.rev);
        assert!(!tree.is_leaf(&root.rev));
        assert_eq!(tree.children_of(&root.rev), vec![&child]);
    }

    #[test]
    fn test_sibling_fork_creates_conflict_with_smaller_hash_winning() {
        let (tree, _, left, right) = forked();

        let (winner, loser) = if left.rev.hash() < right.rev.hash() {
            (&left, &right)
        } else {
            (&right, &left)
        };

        assert_eq!(tree.state(), RecordState::Conflicted);
        assert_eq!(tree.current_winner(), Some(winner));
        assert_eq!(tree.conflict_set(), vec![loser]);
    }

    #[test]
    fn test_fork_outcome_reports_conflict_change() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        tree.attach(edit(&tree, Some(&root), "a", "alice")).unwrap();

        let outcome = tree.attach(edit(&tree, Some(&root), "b", "bob")).unwrap();
        assert!(outcome.conflicts_changed);
    }

    #[test]
    fn test_deeper_branch_wins() {
        let (mut tree, _, left, right) = forked();
        let loser = if left.rev.hash() < right.rev.hash() {
            right
        } else {
            left
        };

        let extended = edit(&tree, Some(&loser), "extended", "carol");
        let outcome = tree.attach(extended.clone()).unwrap();

        assert!(outcome.is_new_winner);
        assert_eq!(tree.current_winner(), Some(&extended));
        assert_eq!(tree.state(), RecordState::Conflicted);
    }

    #[test]
    fn test_duplicate_attach_is_rejected_without_change() {
        let (mut tree, root, left, _) = forked();
        let winner_before = tree.current_winner().cloned();
        let conflicts_before = tree
            .conflict_set()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        assert_eq!(
            tree.attach(left.clone()),
            Err(TreeError::DuplicateRevision(left.rev.clone()))
        );
        assert!(matches!(
            tree.attach(root),
            Err(TreeError::DuplicateRevision(_))
        ));

        assert_eq!(tree.current_winner().cloned(), winner_before);
        assert_eq!(
            tree.conflict_set().into_iter().cloned().collect::<Vec<_>>(),
            conflicts_before
        );
    }

    #[test]
    fn test_orphan_is_rejected() {
        let mut source = tree();
        let root = edit(&source, None, "oak", "alice");
        source.attach(root.clone()).unwrap();
        let child = edit(&source, Some(&root), "oak tree", "alice");

        let mut target = RevisionTree::new(source.record_id(), TableName::rows());
        assert_eq!(
            target.attach(child.clone()),
            Err(TreeError::OrphanRevision {
                rev: child.rev.clone(),
                parent: root.rev.clone(),
            })
        );
        assert!(target.is_empty());
    }

    #[test]
    fn test_tampered_revision_is_invalid() {
        let mut tree = tree();
        let mut root = edit(&tree, None, "oak", "alice");
        root.payload.insert("label", "elm");
        assert!(matches!(
            tree.attach(root),
            Err(TreeError::InvalidRevision { .. })
        ));
    }

    #[test]
    fn test_next_revision_requires_known_parent() {
        let tree = tree();
        let unknown: RevisionId = "1-abc".parse().unwrap();
        let result = tree.next_revision(Some(&unknown), Payload::new(), "alice", false, 0);
        assert!(matches!(result, Err(Error::InvalidParent { .. })));
    }

    #[test]
    fn test_tombstone_winner_hides_payload() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let deleted = tombstone(&tree, &root, "alice");
        tree.attach(deleted.clone()).unwrap();

        let record = tree.record().unwrap();
        assert!(record.deleted);
        assert_eq!(record.rev, deleted.rev);
        assert_eq!(record.visible_payload(), None);
        assert_eq!(tree.state(), RecordState::Single);
    }

    #[test]
    fn test_deeper_tombstone_wins_over_concurrent_edit() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let renamed = edit(&tree, Some(&root), "oak tree", "alice");
        tree.attach(renamed.clone()).unwrap();
        let closed = tombstone(&tree, &renamed, "alice");
        tree.attach(closed.clone()).unwrap();

        let concurrent = edit(&tree, Some(&root), "old oak", "bob");
        let outcome = tree.attach(concurrent.clone()).unwrap();

        assert!(outcome.conflicts_changed);
        assert_eq!(tree.current_winner(), Some(&closed));
        assert_eq!(tree.conflict_set(), vec![&concurrent]);
        assert!(tree.deleted_conflicts().is_empty());
        assert_eq!(tree.state(), RecordState::Conflicted);

        let record = tree.record().unwrap();
        assert!(record.deleted);
        assert_eq!(record.conflicts, vec![concurrent.rev.clone()]);
    }

    #[test]
    fn test_losing_tombstone_stays_in_conflict_set() {
        let (mut tree, _, left, right) = forked();
        let (winner, loser) = if left.rev.hash() < right.rev.hash() {
            (left, right)
        } else {
            (right, left)
        };
        let extended = edit(&tree, Some(&winner), "extended", "alice");
        tree.attach(extended.clone()).unwrap();
        let closed_extended = tombstone(&tree, &extended, "alice");
        tree.attach(closed_extended).unwrap();
        let closed = tombstone(&tree, &loser, "bob");
        tree.attach(closed.clone()).unwrap();

        assert_eq!(tree.conflict_set(), vec![&closed]);
        assert_eq!(tree.deleted_conflicts(), vec![&closed]);
        assert_eq!(tree.state(), RecordState::Conflicted);
    }

    #[test]
    fn test_resolution_supersedes_other_leaves() {
        let (mut tree, _, left, right) = forked();
        let loser = tree.conflict_set()[0].clone();
        let winner = tree.current_winner().cloned().unwrap();

        let settled = tree
            .resolution_revision(&loser.rev, None, "carol", 5)
            .unwrap();
        assert_eq!(settled.parent_rev.as_ref(), Some(&loser.rev));
        assert_eq!(settled.supersedes, vec![winner.rev.clone()]);

        let outcome = tree.attach(settled.clone()).unwrap();
        assert!(outcome.is_new_winner);
        assert!(outcome.conflicts_changed);
        assert_eq!(tree.current_winner(), Some(&settled));
        assert!(tree.conflict_set().is_empty());
        assert_eq!(tree.state(), RecordState::Single);
        assert!(tree.is_leaf(&winner.rev));
        assert!(tree.is_superseded(&winner.rev));
        assert_eq!(tree.leaves().len(), 2);
        assert!(tree.contains(&left.rev) && tree.contains(&right.rev));
    }

    #[test]
    fn test_resolution_can_keep_a_deeper_tombstone_out() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let renamed = edit(&tree, Some(&root), "oak tree", "alice");
        tree.attach(renamed.clone()).unwrap();
        let closed = tombstone(&tree, &renamed, "alice");
        tree.attach(closed.clone()).unwrap();
        let concurrent = edit(&tree, Some(&root), "old oak", "bob");
        tree.attach(concurrent.clone()).unwrap();

        let settled = tree
            .resolution_revision(&concurrent.rev, None, "bob", 5)
            .unwrap();
        tree.attach(settled.clone()).unwrap();

        assert_eq!(settled.depth, closed.depth);
        assert_eq!(tree.current_winner(), Some(&settled));
        assert_eq!(tree.state(), RecordState::Single);
        assert!(!tree.record().unwrap().deleted);
    }

    #[test]
    fn test_extending_superseded_branch_reopens_conflict() {
        let (mut tree, _, _, _) = forked();
        let winner = tree.current_winner().cloned().unwrap();
        let loser = tree.conflict_set()[0].clone();
        let settled = tree
            .resolution_revision(&loser.rev, None, "carol", 5)
            .unwrap();
        tree.attach(settled.clone()).unwrap();

        let late = edit(&tree, Some(&winner), "late edit", "alice");
        tree.attach(late.clone()).unwrap();

        let competing = tree
            .conflict_set()
            .into_iter()
            .chain(tree.current_winner())
            .map(|leaf| leaf.rev.clone())
            .collect::<BTreeSet<_>>();
        assert_eq!(competing, BTreeSet::from([settled.rev, late.rev]));
        assert_eq!(tree.state(), RecordState::Conflicted);
    }

    #[test]
    fn test_resolution_requires_competing_leaf() {
        let (tree, root, _, _) = forked();
        assert!(matches!(
            tree.resolution_revision(&root.rev, None, "carol", 5),
            Err(Error::InvalidInput(_))
        ));

        let mut single = self::tree();
        let only = edit(&single, None, "oak", "alice");
        single.attach(only.clone()).unwrap();
        assert!(matches!(
            single.resolution_revision(&only.rev, None, "alice", 5),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_purge_keeps_resolving_edits() {
        let (mut tree, _, _, _) = forked();
        let loser = tree.conflict_set()[0].clone();
        let settled = tree
            .resolution_revision(&loser.rev, None, "carol", 5)
            .unwrap();
        tree.attach(settled.clone()).unwrap();
        tree.attach(edit(&tree, Some(&settled), "after", "carol"))
            .unwrap();

        assert!(matches!(
            tree.purge(std::slice::from_ref(&settled.rev)),
            Err(TreeError::NotPurgeable { .. })
        ));
    }

    #[test]
    fn test_changes_are_tracked_until_persisted() {
        let (mut tree, root, left, _) = forked();
        assert_eq!(tree.changed_revisions().count(), 3);
        tree.mark_persisted();
        assert!(!tree.has_pending_changes());

        let child = edit(&tree, Some(&left), "child", "alice");
        tree.attach(child.clone()).unwrap();
        assert_eq!(tree.changed_revisions().collect::<Vec<_>>(), vec![&child]);

        assert!(tree.confirm(&left.rev, 42));
        assert!(!tree.confirm(&left.rev, 42));
        assert_eq!(tree.changed_revisions().count(), 2);
        tree.mark_persisted();

        tree.purge(std::slice::from_ref(&root.rev)).unwrap();
        assert_eq!(tree.changed_revisions().count(), 0);
        assert_eq!(
            tree.changed_stubs().collect::<Vec<_>>(),
            vec![(&root.rev, None)]
        );
    }

    #[test]
    fn test_restored_tree_has_no_pending_changes() {
        let (tree, _, _, _) = forked();
        let restored = RevisionTree::restore(
            tree.record_id(),
            TableName::rows(),
            tree.revisions().cloned().collect(),
            Vec::new(),
        )
        .unwrap();
        assert!(!restored.has_pending_changes());
    }

    #[test]
    fn test_siblings_of_fork() {
        let (tree, root, left, right) = forked();
        assert_eq!(tree.siblings_of(&left), vec![&right]);
        assert!(tree.siblings_of(&root).is_empty());
        assert_eq!(tree.roots(), vec![&root]);
    }

    #[test]
    fn test_common_ancestor_of_fork() {
        let (tree, root, left, right) = forked();
        assert_eq!(tree.common_ancestor(&left.rev, &right.rev), Some(root.rev));
    }

    #[test]
    fn test_purge_keeps_stub_and_accepts_descendants() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let child = edit(&tree, Some(&root), "oak tree", "alice");
        tree.attach(child.clone()).unwrap();
        let late_sibling = edit(&tree, Some(&root), "late", "bob");

        tree.purge(std::slice::from_ref(&root.rev)).unwrap();
        assert!(tree.is_purged(&root.rev));
        assert!(tree.get(&root.rev).is_none());
        assert!(tree.contains(&root.rev));

        tree.attach(late_sibling).unwrap();
        assert_eq!(tree.leaves().len(), 2);
    }

    #[test]
    fn test_restore_with_stubs_keeps_descendants_reachable() {
        let mut tree = tree();
        let root = edit(&tree, None, "oak", "alice");
        tree.attach(root.clone()).unwrap();
        let middle = edit(&tree, Some(&root), "oak tree", "alice");
        tree.attach(middle.clone()).unwrap();
        let closed = tombstone(&tree, &middle, "alice");
        tree.attach(closed.clone()).unwrap();
        tree.purge(std::slice::from_ref(&middle.rev)).unwrap();

        let stubs = tree
            .purged()
            .map(|(rev, parent)| (rev.clone(), parent.cloned()))
            .collect::<Vec<_>>();
        let restored = RevisionTree::restore(
            tree.record_id(),
            TableName::rows(),
            tree.revisions().cloned().collect(),
            stubs,
        )
        .unwrap();

        assert!(restored.is_purged(&middle.rev));
        assert_eq!(restored.descendant_leaves(&root.rev), vec![&closed]);
        assert_eq!(restored.current_winner(), Some(&closed));
    }

    #[test]
    fn test_purge_refuses_leaves() {
        let (mut tree, _, left, _) = forked();
        assert!(matches!(
            tree.purge(&[left.rev]),
            Err(TreeError::NotPurgeable { .. })
        ));
    }

    #[test]
    fn test_restore_accepts_any_order() {
        let (tree, _, _, _) = forked();
        let mut revisions = tree.revisions().cloned().collect::<Vec<_>>();
        revisions.reverse();

        let restored =
            RevisionTree::restore(tree.record_id(), TableName::rows(), revisions, Vec::new())
                .unwrap();
        assert_eq!(restored.current_winner(), tree.current_winner());
        assert_eq!(restored.conflict_set(), tree.conflict_set());
    }

    #[test]
    fn test_ancestry_invariants_hold() {
        let (tree, _, _, _) = forked();
        for revision in tree.revisions() {
            assert_eq!(revision.depth as usize, revision.revisions.len());
            assert_eq!(revision.revisions.last(), Some(&revision.rev));
        }
    }

    /// Builds a random tree of edits, returned in a valid topological order.
    ///
    /// Steps flagged `settle` resolve the current conflict, when there is one,
    /// on its best losing leaf.
    fn random_history(shape: &[(usize, bool, bool)]) -> (RecordId, Vec<Revision>) {
        let mut builder = tree();
        let root = edit(&builder, None, "root", "seed");
        builder.attach(root.clone()).unwrap();
        let mut history = vec![root];

        for (index, (parent_pick, deleted, settle)) in shape.iter().enumerate() {
            let actor = format!("actor-{}", index % 3);
            let losing = builder.conflict_set().first().map(|leaf| leaf.rev.clone());
            let revision = match losing.filter(|_| *settle) {
                Some(losing) => builder
                    .resolution_revision(&losing, None, &actor, 0)
                    .unwrap(),
                None => {
                    let parent = history[parent_pick % history.len()].clone();
                    builder
                        .next_revision(
                            Some(&parent.rev),
                            Payload::new().with("step", index),
                            &actor,
                            *deleted,
                            0,
                        )
                        .unwrap()
                }
            };
            if builder.attach(revision.clone()).is_ok() {
                history.push(revision);
            }
        }
        (builder.record_id(), history)
    }

    proptest! {
        #[test]
        fn prop_winner_is_independent_of_topological_order(
            shape in proptest::collection::vec(
                (0usize..32, proptest::bool::weighted(0.2), proptest::bool::weighted(0.15)),
                1..24,
            ),
            seed in any::<u64>(),
        ) {
            let (record_id, history) = random_history(&shape);

            let mut reference = RevisionTree::new(record_id, TableName::rows());
            for revision in &history {
                reference.attach(revision.clone()).unwrap();
            }

            // Shuffle deterministically, then restore ancestor-first by depth.
            let mut shuffled = history.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let j = usize::try_from(state >> 33).unwrap_or(0) % (i + 1);
                shuffled.swap(i, j);
            }
            shuffled.sort_by_key(|revision| revision.depth);

            let mut replayed = RevisionTree::new(record_id, TableName::rows());
            for revision in shuffled {
                replayed.attach(revision).unwrap();
            }

            prop_assert_eq!(replayed.current_winner(), reference.current_winner());
            prop_assert_eq!(replayed.conflict_set(), reference.conflict_set());
            prop_assert_eq!(replayed.deleted_conflicts(), reference.deleted_conflicts());
        }

        #[test]
        fn prop_reattaching_is_idempotent(
            shape in proptest::collection::vec(
                (0usize..32, proptest::bool::weighted(0.2), proptest::bool::weighted(0.15)),
                1..16,
            ),
        ) {
            let (record_id, history) = random_history(&shape);
            let mut tree = RevisionTree::new(record_id, TableName::rows());
            for revision in &history {
                tree.attach(revision.clone()).unwrap();
            }
            let winner = tree.current_winner().cloned();
            let conflicts = tree.conflict_set().into_iter().cloned().collect::<Vec<_>>();

            for revision in &history {
                prop_assert!(matches!(
                    tree.attach(revision.clone()),
                    Err(TreeError::DuplicateRevision(_))
                ));
            }

            prop_assert_eq!(tree.current_winner().cloned(), winner);
            prop_assert_eq!(tree.conflict_set().into_iter().cloned().collect::<Vec<_>>(), conflicts);
        }
    }
}
