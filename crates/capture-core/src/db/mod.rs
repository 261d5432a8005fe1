//! Database layer for Capture

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{LibSqlRevisionStore, RevisionStore, UnsyncedEntry};
