use thiserror::Error;

/// Errors raised by a [`crate::store::Backend`] implementation.
///
/// Kept distinct from [`EngineError`] so a backend can be implemented without
/// depending on the engine's error taxonomy; the engine wraps every backend
/// failure under a single `Storage` variant. Storage failures propagate; they
/// are never retried or swallowed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// The engine's error taxonomy.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Any engine operation attempted before `init`.
    #[error("engine not initialized")]
    NotInitialized,

    /// A branch or ref lookup missed.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// A branch create collided with an existing name.
    #[error("ref already exists: {0}")]
    RefExists(String),

    /// `HEAD` does not point under `branch/`.
    #[error("HEAD is detached")]
    DetachedHead,

    /// A commit lookup by hash missed.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// A Merkle node was referenced but is absent or malformed.
    #[error("corrupt object: {0}")]
    CorruptObject(String),

    /// Time travel requested before any commit existed on the branch.
    #[error("no commit on branch {branch:?} at or before {timestamp}")]
    NoAncestorBefore { branch: String, timestamp: i64 },

    /// Attempt to delete `main` or the currently checked-out branch.
    #[error("branch {0:?} is protected")]
    ProtectedBranch(String),

    /// A terminal operation was called on a [`crate::engine::PendingMerge`]
    /// that had already settled.
    #[error("merge result already applied")]
    MergeAlreadyApplied,

    /// `apply_merge` was called with outstanding conflicts, or
    /// `resolve_merge` was called without resolutions while conflicts exist.
    #[error("{0} unresolved conflict(s)")]
    UnresolvedConflicts(usize),

    /// The underlying persistence layer failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
