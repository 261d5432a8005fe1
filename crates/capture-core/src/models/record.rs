//! Syncable record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::payload::Payload;
use super::revision::{Revision, RevisionId};

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Name of a synced collection (e.g. `rows`, `files`).
///
/// Lowercase ASCII letters, digits and underscores, starting with a letter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Collection holding form rows
    pub const ROWS: &'static str = "rows";
    /// Collection holding file metadata
    pub const FILES: &'static str = "files";

    /// Validate and wrap a collection name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        let mut chars = name.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_rest =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if valid_start && valid_rest {
            Ok(Self(name))
        } else {
            Err(Error::InvalidInput(format!(
                "Invalid table name '{name}': use lowercase letters, digits and underscores"
            )))
        }
    }

    /// The `rows` collection
    #[must_use]
    pub fn rows() -> Self {
        Self(Self::ROWS.to_string())
    }

    /// The `files` collection
    #[must_use]
    pub fn files() -> Self {
        Self(Self::FILES.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// Materialized view of a record: its winning revision plus sync metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableRecord {
    /// Stable identifier
    pub id: RecordId,
    /// Owning collection
    pub table: TableName,
    /// Winning revision
    pub rev: RevisionId,
    /// Revision the winner was based on
    pub parent_rev: Option<RevisionId>,
    /// Root-to-winner path
    pub revisions: Vec<RevisionId>,
    /// Length of `revisions`
    pub depth: u32,
    /// Winner payload (kept on tombstones)
    pub payload: Payload,
    /// Tombstone flag
    pub deleted: bool,
    /// Timestamp of the winning edit (Unix ms)
    pub client_rev_at: i64,
    /// Actor of the winning edit
    pub client_rev_by: String,
    /// Authority acceptance timestamp of the winner
    pub server_rev_at: Option<i64>,
    /// Every leaf losing to the winner, tombstones included
    pub conflicts: Vec<RevisionId>,
    /// The tombstoned subset of `conflicts`
    pub deleted_conflicts: Vec<RevisionId>,
}

impl SyncableRecord {
    /// Build the materialized view from a winner and its competing leaves
    pub fn from_winner(
        id: RecordId,
        table: TableName,
        winner: &Revision,
        conflicts: Vec<RevisionId>,
        deleted_conflicts: Vec<RevisionId>,
    ) -> Self {
        Self {
            id,
            table,
            rev: winner.rev.clone(),
            parent_rev: winner.parent_rev.clone(),
            revisions: winner.revisions.clone(),
            depth: winner.depth,
            payload: winner.payload.clone(),
            deleted: winner.deleted,
            client_rev_at: winner.client_rev_at,
            client_rev_by: winner.client_rev_by.clone(),
            server_rev_at: winner.server_rev_at,
            conflicts,
            deleted_conflicts,
        }
    }

    /// Payload as seen by readers; `None` once the winner is a tombstone
    #[must_use]
    pub const fn visible_payload(&self) -> Option<&Payload> {
        if self.deleted {
            None
        } else {
            Some(&self.payload)
        }
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.server_rev_at.is_some()
    }
}
