pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod create;
pub mod delete;
pub mod list;
pub mod purge;
pub mod resolve;
pub mod show;
pub mod sync;
pub mod update;
