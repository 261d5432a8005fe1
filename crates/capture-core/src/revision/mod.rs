//! Revision codec and per-record revision trees

pub mod codec;
mod tree;

pub use codec::compare_revisions;
pub use tree::{AttachOutcome, RecordState, RevisionTree, TreeError};
