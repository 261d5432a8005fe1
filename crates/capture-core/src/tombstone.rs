//! Tombstone & garbage policy.
//!
//! Deletes never remove anything: they append a tombstone leaf. Once a
//! tombstone is confirmed by the authority, the revisions that only lead to
//! confirmed tombstones carry no information a replica still needs and their
//! bodies may be dropped. Purging is advisory and never runs implicitly.

use serde::Serialize;

use crate::models::{RecordId, Revision, RevisionId, TableName};
use crate::revision::RevisionTree;

/// Purge candidates of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgePlan {
    pub table: TableName,
    pub record_id: RecordId,
    pub revisions: Vec<RevisionId>,
}

impl PurgePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// Decides which revision bodies may be physically removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgePolicy;

impl PurgePolicy {
    /// Compute the purge-eligible revisions of `tree`.
    ///
    /// A revision qualifies when all of the following hold:
    /// - it is an ancestor (never a leaf, so never the winner or a conflict);
    /// - the authority has accepted it;
    /// - every leaf below it is a tombstone the authority has accepted;
    /// - it does not supersede other leaves;
    /// - it sits strictly above the fork point of the earliest conflict.
    #[must_use]
    pub fn plan(&self, tree: &RevisionTree) -> PurgePlan {
        let fork_depth = Self::earliest_fork_depth(tree);

        let revisions = tree
            .revisions()
            .filter(|node| !tree.is_leaf(&node.rev))
            .filter(|node| node.server_rev_at.is_some())
            .filter(|node| node.supersedes.is_empty())
            .filter(|node| !matches!(fork_depth, Some(fork) if node.depth >= fork))
            .filter(|node| {
                let leaves = tree.descendant_leaves(&node.rev);
                !leaves.is_empty() && leaves.iter().all(|leaf| is_confirmed_tombstone(leaf))
            })
            .map(|node| node.rev.clone())
            .collect();

        PurgePlan {
            table: tree.table().clone(),
            record_id: tree.record_id(),
            revisions,
        }
    }

    /// Depth of the shallowest common ancestor between the winner and any conflict.
    fn earliest_fork_depth(tree: &RevisionTree) -> Option<u32> {
        let winner = tree.current_winner()?;
        tree.conflict_set()
            .into_iter()
            .map(|leaf| {
                tree.common_ancestor(&winner.rev, &leaf.rev)
                    .map_or(0, |ancestor| ancestor.depth())
            })
            .min()
    }
}

fn is_confirmed_tombstone(leaf: &Revision) -> bool {
    leaf.deleted && leaf.server_rev_at.is_some()
}
