//! In-process remote authority.
//!
//! Holds every table in memory and enforces the same acceptance rules as the
//! HTTP service: content hashes must verify, parents must already be stored,
//! and a push is refused when the authority has a child of the same parent
//! that the client has not acknowledged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::models::{RecordId, Revision, RevisionId, TableName};
use crate::revision::{codec, compare_revisions};

use super::remote::{PushOutcome, RemoteAuthority, RemoteError, RemoteResult, RemoteRevision};

#[derive(Debug, Default)]
struct StoredRecord {
    table: Option<TableName>,
    revisions: BTreeMap<RevisionId, Revision>,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RecordId, StoredRecord>,
    last_server_rev_at: i64,
}

impl State {
    fn next_server_rev_at(&mut self) -> i64 {
        self.last_server_rev_at += 1;
        self.last_server_rev_at
    }
}

/// `RemoteAuthority` kept in memory, with switchable availability.
#[derive(Debug)]
pub struct MemoryRemoteAuthority {
    state: Mutex<State>,
    online: AtomicBool,
}

impl Default for MemoryRemoteAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteAuthority {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining connectivity
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Revisions stored for a record, ordered by `server_rev_at`
    pub async fn revisions_of(&self, record_id: &RecordId) -> Vec<Revision> {
        let state = self.state.lock().await;
        let mut revisions = state
            .records
            .get(record_id)
            .map(|record| record.revisions.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        revisions.sort_by_key(|revision| revision.server_rev_at);
        revisions
    }

    /// Drop a revision body, as the authority's own garbage collection would
    pub async fn discard(&self, record_id: &RecordId, rev: &RevisionId) -> bool {
        let mut state = self.state.lock().await;
        state
            .records
            .get_mut(record_id)
            .and_then(|record| record.revisions.remove(rev))
            .is_some()
    }

    fn ensure_online(&self) -> RemoteResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("authority is offline".to_string()))
        }
    }
}

impl RemoteAuthority for MemoryRemoteAuthority {
    async fn pull_since(
        &self,
        table: &TableName,
        since: Option<i64>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRevision>> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        let since = since.unwrap_or(i64::MIN);

        let mut revisions = state
            .records
            .iter()
            .filter(|(_, record)| record.table.as_ref() == Some(table))
            .flat_map(|(record_id, record)| {
                record
                    .revisions
                    .values()
                    .filter(|revision| revision.server_rev_at.is_some_and(|at| at > since))
                    .map(|revision| RemoteRevision {
                        record_id: *record_id,
                        revision: revision.clone(),
                    })
            })
            .collect::<Vec<_>>();

        revisions.sort_by_key(|remote| remote.revision.server_rev_at);
        revisions.truncate(limit);
        Ok(revisions)
    }

    async fn push_revision(
        &self,
        table: &TableName,
        record_id: &RecordId,
        revision: &Revision,
        acknowledged: &[RevisionId],
    ) -> RemoteResult<PushOutcome> {
        self.ensure_online()?;
        codec::verify(revision).map_err(RemoteError::InvalidPayload)?;

        let mut state = self.state.lock().await;
        let record = state.records.entry(*record_id).or_default();

        if let Some(existing_table) = &record.table {
            if existing_table != table {
                return Err(RemoteError::Api {
                    status: 422,
                    message: format!("record {record_id} belongs to table {existing_table}"),
                });
            }
        }

        if let Some(stored) = record.revisions.get(&revision.rev) {
            if let Some(server_rev_at) = stored.server_rev_at {
                return Ok(PushOutcome::Accepted { server_rev_at });
            }
        }

        if let Some(parent) = &revision.parent_rev {
            if !record.revisions.contains_key(parent) {
                return Err(RemoteError::Api {
                    status: 422,
                    message: format!("parent {parent} of {} is unknown", revision.rev),
                });
            }
        }

        let divergent = record
            .revisions
            .values()
            .filter(|stored| stored.parent_rev == revision.parent_rev)
            .filter(|stored| stored.rev != revision.rev && !acknowledged.contains(&stored.rev))
            .min_by(|a, b| compare_revisions(&a.rev, &b.rev))
            .cloned();
        if let Some(divergent) = divergent {
            return Ok(PushOutcome::Conflict(divergent));
        }

        record.table = Some(table.clone());
        let mut accepted = revision.clone();
        let server_rev_at = state.next_server_rev_at();
        accepted.server_rev_at = Some(server_rev_at);
        state
            .records
            .entry(*record_id)
            .or_default()
            .revisions
            .insert(accepted.rev.clone(), accepted);

        Ok(PushOutcome::Accepted { server_rev_at })
    }

    async fn fetch_revisions(
        &self,
        table: &TableName,
        record_id: &RecordId,
    ) -> RemoteResult<Vec<Revision>> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(record_id)
            .filter(|record| record.table.as_ref() == Some(table))
            .map(|record| record.revisions.values().cloned().collect())
            .unwrap_or_default())
    }
}
