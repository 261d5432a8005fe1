//! capture-core - Core library for Capture
//!
//! Offline-first replication of form-driven project data. Every record keeps a
//! tree of content-addressed revisions; replicas edit locally, exchange deltas
//! with a remote authority and converge on the same deterministic winner.
//!
//! This crate contains the models, revision tree, local mutation log, sync
//! reconciler, tombstone policy and libSQL storage used by every Capture
//! client.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod mutation;
pub mod revision;
pub mod services;
pub mod state;
pub mod sync;
pub mod tombstone;
pub mod util;

pub use error::{Error, Result};
pub use models::{Payload, RecordId, Revision, RevisionId, SyncableRecord, TableName};
pub use mutation::MutationContext;
pub use services::SyncEngine;
