//! Revision model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::payload::Payload;

/// Revision identifier of the form `{depth}-{content_hash}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    depth: u32,
    hash: String,
}

impl RevisionId {
    /// Build an identifier from its parts.
    ///
    /// The hash must be non-empty lowercase hex.
    pub fn new(depth: u32, hash: impl Into<String>) -> Result<Self> {
        let hash = hash.into();
        if depth == 0 {
            return Err(Error::InvalidInput(
                "Revision depth must be at least 1".to_string(),
            ));
        }
        if hash.is_empty() || !hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(Error::InvalidInput(format!(
                "Revision hash must be lowercase hex, got '{hash}'"
            )));
        }
        Ok(Self { depth, hash })
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Short form for logs and terminal output
    #[must_use]
    pub fn short(&self) -> String {
        format!("{}-{}", self.depth, &self.hash[..self.hash.len().min(8)])
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.depth, self.hash)
    }
}

impl FromStr for RevisionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (depth, hash) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| Error::InvalidInput(format!("Malformed revision '{s}'")))?;
        let depth = depth
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("Malformed revision depth in '{s}'")))?;
        Self::new(depth, hash)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RevisionId> for String {
    fn from(value: RevisionId) -> Self {
        value.to_string()
    }
}

/// One edit of a record: a node of its revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Content-addressed identifier
    pub rev: RevisionId,
    /// Revision this edit was based on; `None` for the root
    pub parent_rev: Option<RevisionId>,
    /// Root-to-self ancestry path
    pub revisions: Vec<RevisionId>,
    /// Number of revisions from root to this node inclusive
    pub depth: u32,
    /// Record fields at this revision
    pub payload: Payload,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    /// Edit timestamp on the authoring client (Unix ms)
    pub client_rev_at: i64,
    /// Authoring actor
    pub client_rev_by: String,
    /// Authority acceptance timestamp, never set by clients
    #[serde(default)]
    pub server_rev_at: Option<i64>,
    /// Leaves of other branches this edit settles a conflict against
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<RevisionId>,
}

impl Revision {
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_rev.is_none()
    }

    /// Check the structural invariants linking `rev`, `depth`, `parent_rev` and `revisions`.
    pub fn check_shape(&self) -> std::result::Result<(), String> {
        let len = u32::try_from(self.revisions.len()).unwrap_or(u32::MAX);
        if self.depth != len {
            return Err(format!(
                "depth {} does not match ancestry length {}",
                self.depth, len
            ));
        }
        if self.rev.depth() != self.depth {
            return Err(format!(
                "rev {} does not carry depth {}",
                self.rev, self.depth
            ));
        }
        if self.revisions.last() != Some(&self.rev) {
            return Err(format!("ancestry of {} does not end with itself", self.rev));
        }

        let expected_parent = self
            .revisions
            .len()
            .checked_sub(2)
            .map(|index| &self.revisions[index]);
        if self.parent_rev.as_ref() != expected_parent {
            return Err(format!(
                "parent_rev of {} disagrees with its ancestry path",
                self.rev
            ));
        }

        if let Some(ancestor) = self.supersedes.iter().find(|rev| self.descends_from(rev)) {
            return Err(format!(
                "{} cannot supersede its own ancestor {ancestor}",
                self.rev
            ));
        }
        if self.supersedes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(format!("superseded leaves of {} are not sorted", self.rev));
        }
        Ok(())
    }

    /// Whether `other` appears on this revision's ancestry path (itself included).
    #[must_use]
    pub fn descends_from(&self, other: &RevisionId) -> bool {
        let index = other.depth() as usize;
        index >= 1 && self.revisions.get(index - 1) == Some(other)
    }
}
