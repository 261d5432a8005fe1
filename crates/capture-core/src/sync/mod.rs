//! Replication with a remote authority.
//!
//! [`SyncReconciler`] runs one pull/push cycle against any [`RemoteAuthority`];
//! [`SyncScheduler`] repeats cycles on an interval with retry backoff.

mod http;
mod memory;
mod reconciler;
mod remote;
mod scheduler;

pub use http::HttpRemoteAuthority;
pub use memory::MemoryRemoteAuthority;
pub use reconciler::{
    CancelHandle, ConflictedRecord, SyncGap, SyncReconciler, SyncReport, DEFAULT_PAGE_SIZE,
};
pub use remote::{PushOutcome, RemoteAuthority, RemoteError, RemoteResult, RemoteRevision};
pub use scheduler::SyncScheduler;
