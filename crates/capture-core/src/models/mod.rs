//! Data models for Capture

mod entity;
mod file;
mod payload;
mod record;
mod revision;
mod row;
mod sync_conflict;

pub use entity::Entity;
pub use file::File;
pub use payload::Payload;
pub use record::{RecordId, SyncableRecord, TableName};
pub use revision::{Revision, RevisionId};
pub use row::Row;
pub use sync_conflict::{ConflictSource, SyncConflict};
