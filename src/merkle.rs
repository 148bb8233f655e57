//! The recursive hash tree that gives every commit its content address and
//! lets unchanged substructure be shared between snapshots.

use crate::hash::{compute_hash, canonical_number, Hash};
use crate::store::ObjectStore;
use crate::value::{self, Kind, Value};
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::BTreeMap;

/// A persisted Merkle node: either a leaf carrying a primitive value
/// directly, or an internal node mapping child keys to child hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf { value: Value },
    Internal { kind: NodeKind, children: BTreeMap<String, Hash> },
}

/// Distinguishes an internal node's original shape (object vs. array) so
/// [`to_object`] can reconstruct arrays rather than leaving them as objects
/// keyed by stringified indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Object,
    Array,
}

fn encode_for_hash(node: &Node) -> Vec<u8> {
    // Hashing goes through a small canonical encoding rather than `Node`'s
    // derived `Serialize` so that leaf numbers normalize independently of
    // how `serde_json` happened to parse them.
    match node {
        Node::Leaf { value } => {
            let mut buf = Vec::from(&b"leaf:"[..]);
            match value {
                Value::Number(n) => buf.extend(canonical_number(n).as_bytes()),
                other => buf.extend(other.to_string().as_bytes()),
            }
            buf
        }
        Node::Internal { kind, children } => {
            let mut buf = Vec::from(&b"internal:"[..]);
            buf.extend(match kind {
                NodeKind::Object => b"object:".as_slice(),
                NodeKind::Array => b"array:".as_slice(),
            });
            // `children` is a BTreeMap, so iteration order is already sorted
            // by key, which is what makes this encoding canonical.
            for (key, hash) in children {
                buf.extend(key.as_bytes());
                buf.push(0);
                buf.extend(hash.as_bytes());
                buf.push(0);
            }
            buf
        }
    }
}

/// An in-memory Merkle tree, not yet persisted: a root [`Node`] plus every
/// node reachable from it, keyed by hash. Building this in memory lets
/// [`store_tree`] dedup against the backend in one pass rather than one
/// round trip per node.
pub struct Built {
    pub root_hash: Hash,
    nodes: BTreeMap<Hash, Node>,
}

/// Recursively build a Merkle tree from a structured value. Object keys and
/// array indices are both treated as string keys of an internal node, since
/// arrays are expanded into keyed children indexed by position.
pub fn build(value: &Value) -> Built {
    let mut nodes = BTreeMap::new();
    let root_hash = build_node(value, &mut nodes);
    Built { root_hash, nodes }
}

fn build_node(value: &Value, nodes: &mut BTreeMap<Hash, Node>) -> Hash {
    let node = match value::kind(value) {
        Kind::Primitive => Node::Leaf { value: value.clone() },
        Kind::Object | Kind::Array => {
            let kind = if value::kind(value) == Kind::Array {
                NodeKind::Array
            } else {
                NodeKind::Object
            };
            let mut children = BTreeMap::new();
            for key in value::child_keys(value) {
                let child = value::get_child(value, &key).unwrap();
                let child_hash = build_node(child, nodes);
                children.insert(key, child_hash);
            }
            Node::Internal { kind, children }
        }
    };
    let hash = compute_hash(&encode_for_hash(&node));
    nodes.insert(hash.clone(), node);
    hash
}

/// Persist every node of a built tree into `store`, skipping any hash the
/// store already has: identical substructure is shared rather than
/// duplicated. Depth-first/post-order by construction: a `Built` tree's
/// `nodes` map was populated bottom-up in [`build`].
pub fn store_tree<S: ObjectStore>(store: &mut S, built: &Built) -> Result<()> {
    for (hash, node) in &built.nodes {
        if store.exists(hash)? {
            continue;
        }
        let bytes = serde_json::to_vec(node).map_err(crate::error::StorageError::from)?;
        store.put(hash, &bytes)?;
    }
    Ok(())
}

/// Convenience: build and store a value's tree in one step, returning its
/// root hash (what a commit record actually references).
pub fn store_value<S: ObjectStore>(store: &mut S, value: &Value) -> Result<Hash> {
    let built = build(value);
    store_tree(store, &built)?;
    Ok(built.root_hash)
}

fn load_node<S: ObjectStore>(store: &S, hash: &Hash) -> Result<Node> {
    let bytes = store
        .get(hash)?
        .ok_or_else(|| EngineError::CorruptObject(hash.clone()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::CorruptObject(format!("{hash}: {e}")))
}

/// Rebuild the structured value rooted at `hash`. Array nodes are
/// reconstructed in *numeric* key order, not the lexicographic order the
/// child map's `BTreeMap<String, _>` naturally gives: lexicographic order
/// places `"10"` before `"2"`, which would silently corrupt any array of
/// ten or more elements.
pub fn to_object<S: ObjectStore>(store: &S, hash: &Hash) -> Result<Value> {
    let node = load_node(store, hash)?;
    match node {
        Node::Leaf { value } => Ok(value),
        Node::Internal { kind, children } => match kind {
            NodeKind::Object => {
                let mut map = Map::new();
                for (key, child_hash) in &children {
                    map.insert(key.clone(), to_object(store, child_hash)?);
                }
                Ok(Value::Object(map))
            }
            NodeKind::Array => {
                let mut indexed: Vec<(usize, &Hash)> = children
                    .iter()
                    .filter_map(|(k, h)| k.parse::<usize>().ok().map(|i| (i, h)))
                    .collect();
                indexed.sort_by_key(|(i, _)| *i);
                let mut out = Vec::with_capacity(indexed.len());
                for (_, child_hash) in indexed {
                    out.push(to_object(store, child_hash)?);
                }
                Ok(Value::Array(out))
            }
        },
    }
}

/// Structural diff between two Merkle trees: paths where the reachable hash
/// differs. Distinct from [`crate::diff`]'s value-level diff — this one can
/// answer "did anything under this subtree change" in O(shared-subtree) time
/// by comparing hashes instead of values, and is what the engine consults
/// before recursing into [`crate::diff`] for a human-readable diff.
pub fn changed_paths<S: ObjectStore>(
    store: &S,
    a_hash: &Hash,
    b_hash: &Hash,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    changed_paths_at(store, a_hash, b_hash, ".", &mut out)?;
    Ok(out)
}

fn changed_paths_at<S: ObjectStore>(
    store: &S,
    a_hash: &Hash,
    b_hash: &Hash,
    path: &str,
    out: &mut Vec<String>,
) -> Result<()> {
    if a_hash == b_hash {
        return Ok(());
    }
    let a = load_node(store, a_hash)?;
    let b = load_node(store, b_hash)?;
    match (&a, &b) {
        (
            Node::Internal { kind: ka, children: ca },
            Node::Internal { kind: kb, children: cb },
        ) if ka == kb => {
            let mut keys: Vec<&String> = ca.keys().chain(cb.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                match (ca.get(key), cb.get(key)) {
                    (Some(ha), Some(hb)) => {
                        changed_paths_at(store, ha, hb, &value::join_path(path, key), out)?
                    }
                    _ => out.push(value::join_path(path, key)),
                }
            }
        }
        _ => out.push(path.to_string()),
    }
    Ok(())
}

/// The longest common dotted-path-segment prefix shared by every path in
/// `paths`, used to describe where a set of changes is rooted. Returns `"."`
/// for an empty list or when the paths share no common ancestor.
pub fn lowest_common_ancestor(paths: &[String]) -> String {
    let mut iter = paths.iter();
    let first = match iter.next() {
        Some(p) => p,
        None => return ".".to_string(),
    };
    let mut common: Vec<&str> = if first == "." {
        Vec::new()
    } else {
        first.split('.').collect()
    };
    for path in iter {
        let segs: Vec<&str> = if path == "." { Vec::new() } else { path.split('.').collect() };
        let n = common.len().min(segs.len());
        let shared = common[..n]
            .iter()
            .zip(segs[..n].iter())
            .take_while(|(a, b)| a == b)
            .count();
        common.truncate(shared);
        if common.is_empty() {
            break;
        }
    }
    if common.is_empty() {
        ".".to_string()
    } else {
        common.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBackend;
    use serde_json::json;

    #[test]
    fn equal_values_hash_identically() {
        let a = build(&json!({"a": 1, "b": [1, 2]}));
        let b = build(&json!({"b": [1, 2], "a": 1}));
        assert_eq!(a.root_hash, b.root_hash);
    }

    #[test]
    fn int_and_float_leaf_hash_identically() {
        let a = build(&json!(1));
        let b = build(&json!(1.0));
        assert_eq!(a.root_hash, b.root_hash);
    }

    #[test]
    fn different_values_hash_differently() {
        let a = build(&json!({"a": 1}));
        let b = build(&json!({"a": 2}));
        assert_ne!(a.root_hash, b.root_hash);
    }

    #[test]
    fn store_and_round_trip() {
        let mut backend = MemBackend::new();
        let value = json!({"name": "ada", "tags": ["x", "y", "z"]});
        let hash = store_value(&mut backend, &value).unwrap();
        let restored = to_object(&backend, &hash).unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn large_array_reconstructs_in_numeric_order() {
        let mut backend = MemBackend::new();
        let arr: Vec<Value> = (0..15).map(Value::from).collect();
        let value = Value::Array(arr.clone());
        let hash = store_value(&mut backend, &value).unwrap();
        let restored = to_object(&backend, &hash).unwrap();
        assert_eq!(restored, Value::Array(arr));
    }

    #[test]
    fn unchanged_subtree_is_shared() {
        let mut backend = MemBackend::new();
        let v1 = json!({"shared": {"x": 1}, "only_a": 1});
        let v2 = json!({"shared": {"x": 1}, "only_a": 2});
        let h1 = store_value(&mut backend, &v1).unwrap();
        let h2 = store_value(&mut backend, &v2).unwrap();
        let b1 = build(&v1);
        let shared_hash = match &b1.nodes[&b1.root_hash] {
            Node::Internal { children, .. } => children.get("shared").unwrap().clone(),
            _ => unreachable!(),
        };
        let b2 = build(&v2);
        let shared_hash_2 = match &b2.nodes[&b2.root_hash] {
            Node::Internal { children, .. } => children.get("shared").unwrap().clone(),
            _ => unreachable!(),
        };
        assert_eq!(shared_hash, shared_hash_2);
        assert_ne!(h1, h2);
    }

    #[test]
    fn changed_paths_finds_single_leaf_change() {
        let mut backend = MemBackend::new();
        let v1 = json!({"a": {"b": 1, "c": 2}});
        let v2 = json!({"a": {"b": 1, "c": 3}});
        let h1 = store_value(&mut backend, &v1).unwrap();
        let h2 = store_value(&mut backend, &v2).unwrap();
        let changed = changed_paths(&backend, &h1, &h2).unwrap();
        assert_eq!(changed, vec!["a.c".to_string()]);
    }

    #[test]
    fn lca_of_single_path_is_itself() {
        assert_eq!(lowest_common_ancestor(&["a.b.c".to_string()]), "a.b.c");
    }

    #[test]
    fn lca_finds_shared_prefix() {
        let paths = vec!["a.b.c".to_string(), "a.b.d".to_string(), "a.b".to_string()];
        assert_eq!(lowest_common_ancestor(&paths), "a.b");
    }

    #[test]
    fn lca_of_disjoint_paths_is_root() {
        let paths = vec!["a.b".to_string(), "x.y".to_string()];
        assert_eq!(lowest_common_ancestor(&paths), ".");
    }
}
