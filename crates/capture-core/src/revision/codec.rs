//! Revision codec: content-addressed `rev` computation and ordering.
//!
//! A `rev` is `{depth}-{hash}` where `hash` is the first 16 bytes of a SHA-256
//! over the parent revision, the authoring actor, the tombstone flag and the
//! canonical payload bytes, plus the superseded leaves of a resolving edit.
//! Timestamps are not hashed, so replaying an edit yields the same identifier.

use std::cmp::Ordering;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{Payload, Revision, RevisionId};

/// Hex characters kept from the SHA-256 digest
pub const HASH_HEX_LEN: usize = 32;

const HASH_DOMAIN: &[u8] = b"capture-rev-v1";

/// Compute the content hash component of a revision.
///
/// `supersedes` only enters the hash when non-empty, so plain edits keep the
/// identifiers they always had.
pub fn content_hash(
    payload: &Payload,
    parent_rev: Option<&RevisionId>,
    actor: &str,
    deleted: bool,
    supersedes: &[RevisionId],
) -> Result<String> {
    let parent = parent_rev.map(ToString::to_string).unwrap_or_default();
    let payload_bytes = payload.canonical_bytes()?;
    let flag: &[u8] = if deleted { b"1" } else { b"0" };
    let superseded = supersedes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    let mut parts = vec![
        HASH_DOMAIN,
        parent.as_bytes(),
        actor.as_bytes(),
        flag,
        payload_bytes.as_slice(),
    ];
    if !supersedes.is_empty() {
        parts.push(superseded.as_bytes());
    }
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(HASH_HEX_LEN);
    for byte in &digest[..HASH_HEX_LEN / 2] {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Build the revision that follows `parent` (or a root revision when `parent` is `None`).
pub fn next_revision(
    parent: Option<&Revision>,
    payload: Payload,
    actor: &str,
    deleted: bool,
    client_rev_at: i64,
) -> Result<Revision> {
    build(parent, payload, actor, deleted, Vec::new(), client_rev_at)
}

/// Build an edit on `chosen` that settles the conflict against `supersedes`.
///
/// The superseded leaves stay in the tree but no longer compete for winner.
pub fn resolving_revision(
    chosen: &Revision,
    payload: Payload,
    actor: &str,
    deleted: bool,
    mut supersedes: Vec<RevisionId>,
    client_rev_at: i64,
) -> Result<Revision> {
    supersedes.sort();
    supersedes.dedup();
    build(Some(chosen), payload, actor, deleted, supersedes, client_rev_at)
}

fn build(
    parent: Option<&Revision>,
    payload: Payload,
    actor: &str,
    deleted: bool,
    supersedes: Vec<RevisionId>,
    client_rev_at: i64,
) -> Result<Revision> {
    let parent_rev = parent.map(|parent| parent.rev.clone());
    let depth = parent.map_or(1, |parent| parent.depth + 1);
    let hash = content_hash(&payload, parent_rev.as_ref(), actor, deleted, &supersedes)?;
    let rev = RevisionId::new(depth, hash)?;

    let mut revisions = parent.map_or_else(Vec::new, |parent| parent.revisions.clone());
    revisions.push(rev.clone());

    Ok(Revision {
        rev,
        parent_rev,
        revisions,
        depth,
        payload,
        deleted,
        client_rev_at,
        client_rev_by: actor.to_string(),
        server_rev_at: None,
        supersedes,
    })
}

/// Check a revision's shape and that its hash matches its content.
pub fn verify(revision: &Revision) -> std::result::Result<(), String> {
    revision.check_shape()?;

    let expected = content_hash(
        &revision.payload,
        revision.parent_rev.as_ref(),
        &revision.client_rev_by,
        revision.deleted,
        &revision.supersedes,
    )
    .map_err(|error| error.to_string())?;

    if expected == revision.rev.hash() {
        Ok(())
    } else {
        Err(format!(
            "content hash mismatch (expected {expected}, got {})",
            revision.rev.hash()
        ))
    }
}

/// Total order over revision identifiers: deeper first, then smaller hash first.
///
/// `Ordering::Less` means `a` outranks `b`.
pub fn compare_revisions(a: &RevisionId, b: &RevisionId) -> Ordering {
    b.depth()
        .cmp(&a.depth())
        .then_with(|| a.hash().cmp(b.hash()))
}
