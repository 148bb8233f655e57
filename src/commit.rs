//! Commit records: an immutable snapshot referencing a Merkle root, its
//! parent, and the branch it was made on, plus a collision-aware hashing
//! policy so two different commits never share an identity by accident.

use crate::hash::{compute_hash, Hash};
use serde::{Deserialize, Serialize};

/// An immutable commit: a snapshot of the tree at `tree_root`, its parent
/// (`None` only for a branch's first commit), and the branch it was
/// attributed to at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: Hash,
    pub parent: Option<Hash>,
    pub branch: String,
    pub tree_root: Hash,
    pub timestamp: i64,
    pub message: String,
}

impl Commit {
    /// Build a new commit. `parent_tree_root` is the parent commit's tree
    /// root, used only to decide whether the collision-avoiding salted hash
    /// is needed; it is not stored.
    pub fn new(
        parent: Option<Hash>,
        parent_tree_root: Option<&Hash>,
        branch: String,
        tree_root: Hash,
        timestamp: i64,
        message: String,
    ) -> Self {
        let hash = compute_hash_for(parent.as_deref(), parent_tree_root, &tree_root, timestamp, &message);
        Self {
            hash,
            parent,
            branch,
            tree_root,
            timestamp,
            message,
        }
    }
}

/// A commit's hash is its tree root by default, so two commits of identical
/// content share an identity. That collapses when a branch re-commits the
/// *same* content it already had at its parent — the new commit would hash
/// identically to its own parent. In that case only, fall back to a salted
/// hash over the parent, timestamp and message so every commit remains
/// addressable by its own hash.
fn compute_hash_for(
    parent: Option<&str>,
    parent_tree_root: Option<&Hash>,
    tree_root: &Hash,
    timestamp: i64,
    message: &str,
) -> Hash {
    let collides_with_parent = parent_tree_root.is_some_and(|p| p == tree_root);
    if !collides_with_parent {
        return tree_root.clone();
    }
    let payload = format!(
        "parent:{}\ntree:{}\ntime:{}\nmsg:{}",
        parent.unwrap_or("none"),
        tree_root,
        timestamp,
        message,
    );
    compute_hash(payload.as_bytes())
}
