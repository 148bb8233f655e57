//! Content hashing and canonical number encoding.
//!
//! SHA-256 hex digest is the content address of everything the engine
//! persists (Merkle nodes, commit records).

use sha2::{Digest, Sha256};

/// SHA-256 hash rendered as lowercase hex, used as a content address
/// throughout the engine (object hashes, commit hashes).
pub type Hash = String;

/// Compute the SHA-256 hex digest of some bytes.
pub fn compute_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Render a JSON number canonically so that `1` and `1.0` — which
/// `serde_json` may parse into different `Number` representations — hash
/// identically. Structurally equal values must always hash identically.
///
/// The value model only knows IEEE-754 doubles, so every number is
/// normalized through `f64` before rendering.
pub fn canonical_number(n: &serde_json::Number) -> String {
    let f = n.as_f64().unwrap_or(0.0);
    format!("{f:?}")
}
