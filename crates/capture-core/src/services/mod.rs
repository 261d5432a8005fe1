//! Services shared across clients.

mod engine;

pub use engine::SyncEngine;
