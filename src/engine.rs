//! The version-control engine: branches, HEAD, commits, history, time
//! travel, and three-way merge, layered over a Merkle tree and a path-based
//! diff rather than a flat key/value store.

use crate::commit::Commit;
use crate::config::EngineConfig;
use crate::diff::{self, Conflict, Diff};
use crate::hash::Hash;
use crate::merkle;
use crate::store::Backend;
use crate::value::{self, Value};
use crate::{EngineError, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// A long-lived handle bound to one backend.
pub struct Engine<B: Backend> {
    backend: B,
    config: EngineConfig,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    /// Create the `main` branch with an empty snapshot if this is a fresh
    /// database; a no-op on an already-initialized one.
    pub fn init(&mut self) -> Result<()> {
        if self.backend.head()?.is_some() {
            debug!("engine already initialized, init is a no-op");
            return Ok(());
        }
        let default_branch = self.config.default_branch.clone();
        info!("initializing engine, creating branch {:?}", default_branch);
        let empty = Value::Object(Default::default());
        let tree_root = merkle::store_value(&mut self.backend, &empty)?;
        let commit = Commit::new(None, None, default_branch.clone(), tree_root, now_millis(), "Initial commit".to_string());
        self.backend.put_commit(&commit)?;
        self.backend.set_branch(&default_branch, &commit.hash)?;
        self.backend.set_head(&default_branch)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn require_initialized(&self) -> Result<()> {
        if self.backend.head()?.is_none() {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        self.require_initialized()?;
        self.backend.head()?.ok_or(EngineError::DetachedHead)
    }

    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.require_initialized()?;
        let mut names = self.backend.list_branches()?;
        names.sort();
        Ok(names)
    }

    fn branch_head(&self, name: &str) -> Result<Hash> {
        self.backend
            .get_branch(name)?
            .ok_or_else(|| EngineError::RefNotFound(name.to_string()))
    }

    fn load_commit(&self, hash: &Hash) -> Result<Commit> {
        self.backend
            .get_commit(hash)?
            .ok_or_else(|| EngineError::CommitNotFound(hash.clone()))
    }

    /// Create branch `new` from `src` (defaults to the current branch).
    pub fn branch(&mut self, new: &str, src: Option<&str>) -> Result<()> {
        self.require_initialized()?;
        let src = match src {
            Some(s) => s.to_string(),
            None => self.current_branch()?,
        };
        if self.backend.get_branch(new)?.is_some() {
            return Err(EngineError::RefExists(new.to_string()));
        }
        let head = self.branch_head(&src)?;
        self.backend.set_branch(new, &head)?;
        debug!(from = %src, to = %new, "branch created");
        Ok(())
    }

    pub fn checkout(&mut self, name: &str) -> Result<()> {
        self.require_initialized()?;
        if self.backend.get_branch(name)?.is_none() {
            return Err(EngineError::RefNotFound(name.to_string()));
        }
        self.backend.set_head(name)?;
        Ok(())
    }

    pub fn delete_branch(&mut self, name: &str) -> Result<()> {
        self.require_initialized()?;
        let current = self.current_branch()?;
        if name == self.config.default_branch || name == current {
            return Err(EngineError::ProtectedBranch(name.to_string()));
        }
        if self.backend.get_branch(name)?.is_none() {
            return Err(EngineError::RefNotFound(name.to_string()));
        }
        self.backend.delete_branch(name)?;
        Ok(())
    }

    /// Commit `data` onto `branch` (defaults to current). Does not move
    /// HEAD.
    pub fn commit(&mut self, branch: Option<&str>, data: &Value, message: Option<String>) -> Result<Commit> {
        self.require_initialized()?;
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.current_branch()?,
        };
        let parent_hash = self.branch_head(&branch)?;
        let parent_commit = self.load_commit(&parent_hash)?;
        let tree_root = merkle::store_value(&mut self.backend, data)?;
        let message = message.unwrap_or_else(|| "Update".to_string());
        let commit = Commit::new(
            Some(parent_hash),
            Some(&parent_commit.tree_root),
            branch.clone(),
            tree_root,
            now_millis(),
            message,
        );
        // The commit record must exist before the branch ref moves.
        self.backend.put_commit(&commit)?;
        self.backend.set_branch(&branch, &commit.hash)?;
        debug!(branch = %branch, commit = %commit.hash, "committed");
        Ok(commit)
    }

    /// Commits attributed to `branch`, newest first.
    pub fn history(&self, branch: Option<&str>) -> Result<Vec<Commit>> {
        self.require_initialized()?;
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.current_branch()?,
        };
        let mut commits = self.backend.commits_on_branch(&branch)?;
        commits.sort_by_key(|c| std::cmp::Reverse(c.timestamp));
        Ok(commits)
    }

    pub fn get_data(&self) -> Result<Value> {
        let branch = self.current_branch()?;
        self.get_branch_data(&branch)
    }

    pub fn get_branch_data(&self, name: &str) -> Result<Value> {
        self.require_initialized()?;
        let head = self.branch_head(name)?;
        self.get_data_at_commit(&head)
    }

    pub fn get_data_at_commit(&self, hash: &Hash) -> Result<Value> {
        let commit = self.load_commit(hash)?;
        merkle::to_object(&self.backend, &commit.tree_root)
    }

    /// The data at the most recent commit on `branch` with
    /// `timestamp <= at`, or `NoAncestorBefore` if none exists.
    pub fn get_data_at(&self, branch: &str, at: i64) -> Result<Value> {
        self.require_initialized()?;
        let commits = self.backend.commits_on_branch(branch)?;
        let chosen = commits
            .into_iter()
            .filter(|c| c.timestamp <= at)
            .max_by_key(|c| c.timestamp)
            .ok_or_else(|| EngineError::NoAncestorBefore {
                branch: branch.to_string(),
                timestamp: at,
            })?;
        merkle::to_object(&self.backend, &chosen.tree_root)
    }

    /// Pure helper: the diff between two values.
    pub fn diff(&self, old: &Value, new: &Value) -> Diff {
        diff::generate(old, new)
    }

    /// Pure helper: apply a diff to a value.
    pub fn apply_diff(&self, value: &Value, d: &Diff) -> Value {
        diff::apply(value, d)
    }

    /// Every ancestor of `head`, reached by walking parent pointers, mapped
    /// to its timestamp. Used by [`Self::find_ancestor`]; walking parent
    /// pointers finds commits a branch inherited through a fast-forward,
    /// which a scan over commits attributed directly to the branch would
    /// miss.
    fn ancestor_timestamps(&self, head: &Hash) -> Result<HashMap<Hash, i64>> {
        let mut out = HashMap::new();
        let mut current = Some(head.clone());
        while let Some(hash) = current {
            let commit = self.load_commit(&hash)?;
            out.insert(hash, commit.timestamp);
            current = commit.parent;
        }
        Ok(out)
    }

    /// The most recent commit reachable from both `a` and `b` by walking
    /// parent pointers. Falls back to the oldest (root) commit of whichever
    /// chain has the earlier root if the two chains never intersect.
    fn find_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash> {
        let ancestors_a = self.ancestor_timestamps(a)?;
        let ancestors_b = self.ancestor_timestamps(b)?;
        let shared = ancestors_a
            .iter()
            .filter_map(|(hash, ts)| ancestors_b.get(hash).map(|_| (hash.clone(), *ts)))
            .max_by_key(|(_, ts)| *ts);
        if let Some((hash, _)) = shared {
            return Ok(hash);
        }
        warn!("no shared ancestor between merge heads, falling back to oldest root commit");
        let root_of = |ancestors: &HashMap<Hash, i64>| -> Option<(Hash, i64)> {
            ancestors.iter().min_by_key(|(_, ts)| **ts).map(|(h, ts)| (h.clone(), *ts))
        };
        let root_a = root_of(&ancestors_a);
        let root_b = root_of(&ancestors_b);
        match (root_a, root_b) {
            (Some((ha, ta)), Some((hb, tb))) => Ok(if ta <= tb { ha } else { hb }),
            (Some((ha, _)), None) => Ok(ha),
            (None, Some((hb, _))) => Ok(hb),
            (None, None) => Err(EngineError::CorruptObject("no commits reachable from either merge head".into())),
        }
    }

    /// Three-way merge of `source` into `target` (defaults to current).
    /// Returns a [`PendingMerge`] describing the merged value and any
    /// conflicts; nothing is committed until the caller settles it.
    pub fn merge(&mut self, source: &str, target: Option<&str>) -> Result<PendingMerge> {
        self.require_initialized()?;
        let target = match target {
            Some(t) => t.to_string(),
            None => self.current_branch()?,
        };
        let source_head = self.branch_head(source)?;
        let target_head = self.branch_head(&target)?;

        let ancestor_hash = if source == target || source_head == target_head {
            target_head.clone()
        } else {
            self.find_ancestor(&source_head, &target_head)?
        };

        let ancestor_data = self.get_data_at_commit(&ancestor_hash)?;
        let source_data = self.get_data_at_commit(&source_head)?;
        let target_data = self.get_data_at_commit(&target_head)?;

        let d_source = diff::generate(&ancestor_data, &source_data);
        let d_target = diff::generate(&ancestor_data, &target_data);
        let conflict_paths = diff::find_conflicts(&d_source, &d_target);

        let cleaned = clean_diff(&d_source, &conflict_paths);
        let merged = diff::apply(&target_data, &cleaned);

        let conflicts = conflict_paths
            .into_iter()
            .map(|path| Conflict {
                ancestor: value::get_path(&ancestor_data, &path).cloned(),
                source: value::get_path(&source_data, &path).cloned(),
                target: value::get_path(&target_data, &path).cloned(),
                path,
            })
            .collect();

        Ok(PendingMerge {
            source: source.to_string(),
            target,
            source_hash: source_head,
            target_hash: target_head,
            merged,
            conflicts,
            applied: false,
        })
    }

    /// Commit `pending.merged` onto its target branch. Fails if conflicts
    /// remain unresolved or the merge already settled.
    pub fn apply_merge(&mut self, pending: &mut PendingMerge, message: Option<String>) -> Result<Commit> {
        if pending.applied {
            return Err(EngineError::MergeAlreadyApplied);
        }
        if !pending.conflicts.is_empty() {
            return Err(EngineError::UnresolvedConflicts(pending.conflicts.len()));
        }
        let message = message.unwrap_or_else(|| default_merge_message(&pending.source, &pending.target));
        let commit = self.commit(Some(&pending.target), &pending.merged, Some(message))?;
        pending.applied = true;
        Ok(commit)
    }

    /// Apply caller-chosen resolutions for outstanding conflicts, then
    /// commit. A resolution for a path that was not a conflict is accepted
    /// and overwrites `merged` there too.
    pub fn resolve_merge(
        &mut self,
        pending: &mut PendingMerge,
        resolutions: Option<BTreeMap<String, Value>>,
        message: Option<String>,
    ) -> Result<Commit> {
        if pending.applied {
            return Err(EngineError::MergeAlreadyApplied);
        }
        if !pending.conflicts.is_empty() && resolutions.is_none() {
            return Err(EngineError::UnresolvedConflicts(pending.conflicts.len()));
        }
        if let Some(resolutions) = resolutions {
            for (path, value) in resolutions {
                value::set_path(&mut pending.merged, &path, value);
            }
        }
        let message = message.unwrap_or_else(|| default_merge_message(&pending.source, &pending.target));
        let commit = self.commit(Some(&pending.target), &pending.merged, Some(message))?;
        pending.applied = true;
        Ok(commit)
    }

    /// Settle a pending merge without committing.
    pub fn abort_merge(&mut self, pending: &mut PendingMerge) -> Result<()> {
        if pending.applied {
            return Err(EngineError::MergeAlreadyApplied);
        }
        pending.applied = true;
        Ok(())
    }
}

fn default_merge_message(source: &str, target: &str) -> String {
    format!("Merge branch '{source}' into {target}")
}

/// Remove every entry of `d_source` whose path equals, is a descendant of,
/// or is an ancestor of any conflicting path: the surviving entries are
/// safe to auto-apply onto `target`.
fn clean_diff(d_source: &Diff, conflicts: &[String]) -> Diff {
    let keep = |path: &str| !conflicts.iter().any(|c| diff::overlaps(path, c));
    Diff {
        added: d_source.added.iter().filter(|pv| keep(&pv.path)).cloned().collect(),
        modified: d_source.modified.iter().filter(|pv| keep(&pv.path)).cloned().collect(),
        deleted: d_source.deleted.iter().filter(|p| keep(p)).cloned().collect(),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single-use handle on a computed three-way merge. Settled by exactly one
/// of [`Engine::apply_merge`], [`Engine::resolve_merge`], or
/// [`Engine::abort_merge`]; any further terminal call fails with
/// `MergeAlreadyApplied`. Kept as a plain value with an internal guard
/// rather than consumed by value so a caller can still inspect `conflicts`
/// after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMerge {
    pub source: String,
    pub target: String,
    source_hash: Hash,
    target_hash: Hash,
    pub merged: Value,
    pub conflicts: Vec<Conflict>,
    applied: bool,
}

impl PendingMerge {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn source_commit(&self) -> &Hash {
        &self.source_hash
    }

    pub fn target_commit(&self) -> &Hash {
        &self.target_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBackend;
    use serde_json::json;

    fn engine() -> Engine<MemBackend> {
        let mut e = Engine::new(MemBackend::new(), EngineConfig::default());
        e.init().unwrap();
        e
    }

    #[test]
    fn init_creates_main_with_empty_data() {
        let e = engine();
        assert_eq!(e.current_branch().unwrap(), "main");
        assert_eq!(e.get_data().unwrap(), json!({}));
    }

    #[test]
    fn init_is_idempotent() {
        let mut e = engine();
        e.commit(None, &json!({"a": 1}), None).unwrap();
        e.init().unwrap();
        assert_eq!(e.get_data().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn simple_commit_and_get() {
        let mut e = engine();
        e.commit(None, &json!({"key": "value", "number": 42}), Some("m".into())).unwrap();
        assert_eq!(e.get_data().unwrap(), json!({"key": "value", "number": 42}));
    }

    #[test]
    fn branch_isolation() {
        let mut e = engine();
        e.commit(None, &json!({"shared": "data"}), None).unwrap();
        e.branch("feature", None).unwrap();
        e.checkout("feature").unwrap();
        e.commit(None, &json!({"shared": "data", "feature": true}), None).unwrap();
        e.checkout("main").unwrap();
        assert_eq!(e.get_data().unwrap(), json!({"shared": "data"}));
        e.checkout("feature").unwrap();
        assert_eq!(e.get_data().unwrap(), json!({"shared": "data", "feature": true}));
    }

    #[test]
    fn deep_nested_commit_round_trips() {
        let mut e = engine();
        let value = json!({
            "level1": {
                "level2": {
                    "seq": [1, 2, {"nested": "array"}]
                }
            }
        });
        e.commit(None, &value, None).unwrap();
        assert_eq!(e.get_data().unwrap(), value);
    }

    #[test]
    fn large_array_commit_round_trips() {
        let mut e = engine();
        let arr: Vec<Value> = (0..20).map(Value::from).collect();
        let value = json!({"items": arr});
        e.commit(None, &value, None).unwrap();
        assert_eq!(e.get_data().unwrap(), value);
    }

    #[test]
    fn time_travel_before_any_commit_fails() {
        let e = engine();
        let err = e.get_data_at("main", 0).unwrap_err();
        assert!(matches!(err, EngineError::NoAncestorBefore { .. }));
    }

    #[test]
    fn time_travel_returns_latest_commit_at_or_before() {
        let mut e = engine();
        let c1 = e.commit(None, &json!({"v": 1}), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        e.commit(None, &json!({"v": 2}), None).unwrap();
        let data = e.get_data_at("main", c1.timestamp).unwrap();
        assert_eq!(data, json!({"v": 1}));
    }

    #[test]
    fn delete_branch_protects_main_and_current() {
        let mut e = engine();
        e.branch("feature", None).unwrap();
        assert!(matches!(e.delete_branch("main"), Err(EngineError::ProtectedBranch(_))));
        e.checkout("feature").unwrap();
        assert!(matches!(e.delete_branch("feature"), Err(EngineError::ProtectedBranch(_))));
    }

    #[test]
    fn merge_conflict_surfaces_and_resolves() {
        let mut e = engine();
        e.commit(None, &json!({"v": "o"}), None).unwrap();
        e.branch("feature", None).unwrap();
        e.checkout("feature").unwrap();
        e.commit(None, &json!({"v": "f"}), None).unwrap();
        e.checkout("main").unwrap();
        e.commit(None, &json!({"v": "m"}), None).unwrap();

        let mut pending = e.merge("feature", Some("main")).unwrap();
        assert_eq!(pending.conflicts.len(), 1);
        assert_eq!(pending.conflicts[0].path, "v");
        assert_eq!(pending.conflicts[0].ancestor, Some(json!("o")));
        assert_eq!(pending.conflicts[0].source, Some(json!("f")));
        assert_eq!(pending.conflicts[0].target, Some(json!("m")));

        assert!(matches!(
            e.apply_merge(&mut pending, None),
            Err(EngineError::UnresolvedConflicts(1))
        ));

        let mut resolutions = BTreeMap::new();
        resolutions.insert("v".to_string(), json!("r"));
        e.resolve_merge(&mut pending, Some(resolutions), None).unwrap();
        assert_eq!(e.get_data().unwrap(), json!({"v": "r"}));

        assert!(matches!(
            e.abort_merge(&mut pending),
            Err(EngineError::MergeAlreadyApplied)
        ));
    }

    #[test]
    fn merge_of_branch_with_itself_is_clean() {
        let mut e = engine();
        e.commit(None, &json!({"a": 1}), None).unwrap();
        let pending = e.merge("main", Some("main")).unwrap();
        assert!(!pending.has_conflicts());
        assert_eq!(pending.merged, json!({"a": 1}));
    }

    #[test]
    fn fast_forward_merge_has_no_conflicts() {
        let mut e = engine();
        e.commit(None, &json!({"a": 1}), None).unwrap();
        e.branch("feature", None).unwrap();
        e.checkout("feature").unwrap();
        e.commit(None, &json!({"a": 1, "b": 2}), None).unwrap();

        let pending = e.merge("feature", Some("main")).unwrap();
        assert!(!pending.has_conflicts());
        assert_eq!(pending.merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn non_conflicting_changes_auto_merge() {
        let mut e = engine();
        e.commit(None, &json!({"a": 1, "b": 1}), None).unwrap();
        e.branch("feature", None).unwrap();
        e.checkout("feature").unwrap();
        e.commit(None, &json!({"a": 2, "b": 1}), None).unwrap();
        e.checkout("main").unwrap();
        e.commit(None, &json!({"a": 1, "b": 2}), None).unwrap();

        let mut pending = e.merge("feature", Some("main")).unwrap();
        assert!(!pending.has_conflicts());
        let commit = e.apply_merge(&mut pending, None).unwrap();
        assert_eq!(commit.branch, "main");
        assert_eq!(e.get_data().unwrap(), json!({"a": 2, "b": 2}));
    }

    #[test]
    fn history_is_attribution_based_and_descending() {
        let mut e = engine();
        e.commit(None, &json!({"n": 1}), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        e.commit(None, &json!({"n": 2}), None).unwrap();
        let history = e.history(None).unwrap();
        assert_eq!(history.len(), 3); // init + 2 commits
        assert!(history[0].timestamp >= history[1].timestamp);
        assert!(history[1].timestamp >= history[2].timestamp);
    }
}
