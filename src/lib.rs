//! Content-addressable, branching version-control engine for structured,
//! JSON-shaped values: a Merkle-tree object store, a path-based diff
//! algebra, and a Git-like branch/commit/merge model layered on top.

pub mod commit;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod store;
pub mod value;

pub use commit::Commit;
pub use config::EngineConfig;
pub use diff::{Conflict, Diff, PathValue};
pub use engine::{Engine, PendingMerge};
pub use error::{EngineError, Result, StorageError};
pub use hash::Hash;
pub use store::{Backend, FsBackend, MemBackend};
pub use value::Value;
