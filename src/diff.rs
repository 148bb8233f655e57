//! A path-based diff algebra: generate, apply, invert, and conflict
//! detection over structured values. Diffs are recursive and path-addressed,
//! so a change deep inside a nested object or array is recorded at its exact
//! location rather than replacing the whole top-level key.

use crate::value::{self, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A path/value pair, as found in `added` and `modified`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

/// A flat, path-indexed description of how one value differs from another.
/// Entries describe the minimal divergence point, not every ancestor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub added: Vec<PathValue>,
    pub modified: Vec<PathValue>,
    pub deleted: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// All paths this diff writes to (added or modified); the "written" set
    /// used by conflict detection.
    fn written_paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .map(|pv| pv.path.as_str())
            .chain(self.modified.iter().map(|pv| pv.path.as_str()))
    }
}

/// Generate the diff needed to turn `a` into `b`.
pub fn generate(a: &Value, b: &Value) -> Diff {
    let mut diff = Diff::default();
    generate_at(Some(a), Some(b), ".", &mut diff);
    diff
}

fn generate_at(a: Option<&Value>, b: Option<&Value>, path: &str, diff: &mut Diff) {
    match (a, b) {
        (None, None) => {}
        (None, Some(bv)) => diff.added.push(PathValue {
            path: path.to_string(),
            value: bv.clone(),
        }),
        (Some(_), None) => diff.deleted.push(path.to_string()),
        (Some(av), Some(bv)) => {
            if !value::same_composite_kind(av, bv) {
                // Either a type mismatch (primitive vs. composite, or
                // sequence vs. mapping) or both primitive: either way a
                // single modified entry at this path, no recursion.
                if av != bv {
                    diff.modified.push(PathValue {
                        path: path.to_string(),
                        value: bv.clone(),
                    });
                }
            } else {
                let keys_a = value::child_keys(av);
                let keys_b = value::child_keys(bv);
                for k in keys_a.difference(&keys_b) {
                    diff.deleted.push(value::join_path(path, k));
                }
                for k in keys_b.difference(&keys_a) {
                    diff.added.push(PathValue {
                        path: value::join_path(path, k),
                        value: value::get_child(bv, k).unwrap().clone(),
                    });
                }
                for k in keys_a.intersection(&keys_b) {
                    let child_path = value::join_path(path, k);
                    generate_at(
                        value::get_child(av, k),
                        value::get_child(bv, k),
                        &child_path,
                        diff,
                    );
                }
            }
        }
    }
}

/// Apply a diff to a value: unset every deleted path, then set every
/// modified path, then every added path. Unsetting does not prune an
/// emptied-out parent (matches Git-like semantics).
pub fn apply(base: &Value, diff: &Diff) -> Value {
    let mut result = base.clone();
    for path in ordered_for_deletion(&diff.deleted) {
        value::unset_path(&mut result, path);
    }
    for pv in &diff.modified {
        value::set_path(&mut result, &pv.path, pv.value.clone());
    }
    for pv in &diff.added {
        value::set_path(&mut result, &pv.path, pv.value.clone());
    }
    result
}

/// Order deleted paths so that siblings under the same array are removed
/// highest-index-first. Removing an array element shifts every later index
/// down by one, so deleting in ascending order (the order a `BTreeSet`
/// iterates its keys) can skip an element once an earlier removal has
/// shifted it into an already-visited position. Paths under the same parent
/// that aren't numeric array indices, or paths under different parents,
/// keep a stable but otherwise unspecified relative order.
fn ordered_for_deletion(deleted: &[String]) -> Vec<&String> {
    let mut ordered: Vec<&String> = deleted.iter().collect();
    ordered.sort_by_key(|path| deletion_sort_key(path));
    ordered
}

fn deletion_sort_key(path: &str) -> (String, std::cmp::Reverse<i64>) {
    let segs = path_segments(path);
    if let Some((last, rest)) = segs.split_last() {
        if let Ok(idx) = last.parse::<i64>() {
            let parent = if rest.is_empty() { ".".to_string() } else { rest.join(".") };
            return (parent, std::cmp::Reverse(idx));
        }
    }
    (path.to_string(), std::cmp::Reverse(0))
}

/// Invert a diff given its pre-image: `added` becomes `deleted`; `deleted`
/// and `modified` are re-emitted with values looked up in `pre` so that
/// `apply(apply(pre, d), invert(pre, d)) == pre`.
pub fn invert(pre: &Value, diff: &Diff) -> Diff {
    let mut inverted = Diff::default();
    for pv in &diff.added {
        inverted.deleted.push(pv.path.clone());
    }
    for path in &diff.deleted {
        if let Some(v) = value::get_path(pre, path) {
            inverted.added.push(PathValue {
                path: path.clone(),
                value: v.clone(),
            });
        }
    }
    for pv in &diff.modified {
        if let Some(v) = value::get_path(pre, &pv.path) {
            inverted.modified.push(PathValue {
                path: pv.path.clone(),
                value: v.clone(),
            });
        }
    }
    inverted
}

/// A single conflicting path, together with the value on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub ancestor: Option<Value>,
    pub source: Option<Value>,
    pub target: Option<Value>,
}

pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    if path == "." {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// True when `p` is an ancestor of `q` (every segment of `p` is a prefix of
/// `q`'s segments) or vice versa, including `p == q`.
pub(crate) fn overlaps(p: &str, q: &str) -> bool {
    let ps = path_segments(p);
    let qs = path_segments(q);
    let n = ps.len().min(qs.len());
    ps[..n] == qs[..n]
}

/// Detect conflicts between two diffs computed from the same base. A path
/// conflicts when: (i) both sides write it, (ii) one side deletes it while
/// the other writes it, or (iii) one side's written/deleted path is an
/// ancestor of the other's (a structural conflict — e.g. A replaces `user`
/// wholesale while B edits `user.name`). Both sides independently deleting
/// the exact same path is not a conflict — they agree, and there is nothing
/// to reconcile.
pub fn find_conflicts(a: &Diff, b: &Diff) -> Vec<String> {
    let deleted_a: BTreeSet<&str> = a.deleted.iter().map(String::as_str).collect();
    let deleted_b: BTreeSet<&str> = b.deleted.iter().map(String::as_str).collect();
    let mut touched_a: Vec<&str> = a.written_paths().collect();
    touched_a.extend(deleted_a.iter().copied());
    let mut touched_b: Vec<&str> = b.written_paths().collect();
    touched_b.extend(deleted_b.iter().copied());

    let mut conflicts = BTreeSet::new();
    for &p in &touched_a {
        for &q in &touched_b {
            if !overlaps(p, q) {
                continue;
            }
            if p == q && deleted_a.contains(p) && deleted_b.contains(q) {
                continue;
            }
            // Record the more specific (longer) of the two paths so the
            // conflict location is as precise as possible.
            let chosen = if path_segments(p).len() >= path_segments(q).len() {
                p
            } else {
                q
            };
            conflicts.insert(chosen.to_string());
        }
    }
    conflicts.into_iter().collect()
}

/// Merge two non-conflicting (or conflict-tolerant) diffs: union of both,
/// with the second argument winning on any overlapping path. An
/// administrative helper; the version-control engine's three-way merge does
/// not call this — it resolves conflicts explicitly.
pub fn merge_diffs(a: &Diff, b: &Diff) -> Diff {
    #[derive(Clone)]
    enum Entry {
        Added(Value),
        Modified(Value),
        Deleted,
    }
    let mut entries: std::collections::BTreeMap<String, Entry> = std::collections::BTreeMap::new();
    for pv in &a.added {
        entries.insert(pv.path.clone(), Entry::Added(pv.value.clone()));
    }
    for pv in &a.modified {
        entries.insert(pv.path.clone(), Entry::Modified(pv.value.clone()));
    }
    for path in &a.deleted {
        entries.insert(path.clone(), Entry::Deleted);
    }
    for pv in &b.added {
        entries.insert(pv.path.clone(), Entry::Added(pv.value.clone()));
    }
    for pv in &b.modified {
        entries.insert(pv.path.clone(), Entry::Modified(pv.value.clone()));
    }
    for path in &b.deleted {
        entries.insert(path.clone(), Entry::Deleted);
    }

    let mut merged = Diff::default();
    for (path, entry) in entries {
        match entry {
            Entry::Added(value) => merged.added.push(PathValue { path, value }),
            Entry::Modified(value) => merged.modified.push(PathValue { path, value }),
            Entry::Deleted => merged.deleted.push(path),
        }
    }
    merged
}
