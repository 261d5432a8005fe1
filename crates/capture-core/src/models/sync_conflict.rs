//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{RecordId, TableName};
use super::revision::RevisionId;

/// How a fork was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSource {
    /// A pulled revision forked from a local one
    Pull,
    /// The authority rejected a push with a divergent sibling
    Push,
    /// Concurrent local edits on the same replica
    Local,
}

impl ConflictSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ConflictSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(Self::Pull),
            "push" => Ok(Self::Push),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown conflict source '{other}'")),
        }
    }
}

/// Recorded discovery of a fork in a record's revision tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Collection of the forked record
    pub table: TableName,
    /// Record involved in the conflict
    pub record_id: RecordId,
    /// Winner at detection time
    pub winner_rev: RevisionId,
    /// Leaf that lost to the winner
    pub losing_rev: RevisionId,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Where the fork surfaced
    pub source: ConflictSource,
}
