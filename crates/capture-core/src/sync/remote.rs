//! Remote authority interface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{RecordId, Revision, RevisionId, TableName};

/// A revision as exchanged with the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRevision {
    pub record_id: RecordId,
    #[serde(flatten)]
    pub revision: Revision,
}

/// Authority's answer to a pushed revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored durably at `server_rev_at`
    Accepted { server_rev_at: i64 },
    /// The authority holds a divergent child of the same parent
    Conflict(Revision),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote authority unavailable: {0}")]
    Unavailable(String),
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether retrying later may succeed
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidConfiguration(_) | Self::InvalidPayload(_) => false,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Request/response access to the authoritative copy of every table.
#[allow(async_fn_in_trait)]
pub trait RemoteAuthority {
    /// Revisions of `table` with `server_rev_at` greater than `since`,
    /// ordered by `server_rev_at`, at most `limit` of them.
    async fn pull_since(
        &self,
        table: &TableName,
        since: Option<i64>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRevision>>;

    /// Offer a revision whose parent the authority already holds.
    ///
    /// `acknowledged` lists the siblings the client already has, so only a
    /// sibling missing from it is reported as a conflict.
    async fn push_revision(
        &self,
        table: &TableName,
        record_id: &RecordId,
        revision: &Revision,
        acknowledged: &[RevisionId],
    ) -> RemoteResult<PushOutcome>;

    /// Every revision the authority holds for one record
    async fn fetch_revisions(
        &self,
        table: &TableName,
        record_id: &RecordId,
    ) -> RemoteResult<Vec<Revision>>;
}

impl<R: RemoteAuthority> RemoteAuthority for Arc<R> {
    async fn pull_since(
        &self,
        table: &TableName,
        since: Option<i64>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRevision>> {
        self.as_ref().pull_since(table, since, limit).await
    }

    async fn push_revision(
        &self,
        table: &TableName,
        record_id: &RecordId,
        revision: &Revision,
        acknowledged: &[RevisionId],
    ) -> RemoteResult<PushOutcome> {
        self.as_ref()
            .push_revision(table, record_id, revision, acknowledged)
            .await
    }

    async fn fetch_revisions(
        &self,
        table: &TableName,
        record_id: &RecordId,
    ) -> RemoteResult<Vec<Revision>> {
        self.as_ref().fetch_revisions(table, record_id).await
    }
}
