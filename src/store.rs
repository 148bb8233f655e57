//! Persistence traits and the two backends the engine ships with.
//!
//! Refs and commits are split into their own trait from raw blob storage so
//! a backend can keep a richer commit index (needed for time-travel
//! queries) without entangling it with content-addressed object storage.

use crate::commit::Commit;
use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::hash::{compute_hash, Hash};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type SResult<T> = Result<T, StorageError>;

/// Content-addressed blob storage for Merkle nodes.
pub trait ObjectStore {
    fn get(&self, hash: &Hash) -> SResult<Option<Vec<u8>>>;
    fn put(&mut self, hash: &Hash, bytes: &[u8]) -> SResult<()>;
    fn exists(&self, hash: &Hash) -> SResult<bool> {
        Ok(self.get(hash)?.is_some())
    }
}

/// Branch name → commit hash, plus HEAD.
pub trait RefStore {
    fn head(&self) -> SResult<Option<String>>;
    fn set_head(&mut self, branch: &str) -> SResult<()>;
    fn get_branch(&self, name: &str) -> SResult<Option<Hash>>;
    fn set_branch(&mut self, name: &str, commit_hash: &Hash) -> SResult<()>;
    fn delete_branch(&mut self, name: &str) -> SResult<()>;
    fn list_branches(&self) -> SResult<Vec<String>>;
}

/// Commit records, plus the secondary index time-travel queries need: every
/// commit ever made on a branch, ordered by timestamp.
pub trait CommitStore {
    fn put_commit(&mut self, commit: &Commit) -> SResult<()>;
    fn get_commit(&self, hash: &Hash) -> SResult<Option<Commit>>;
    /// Commits attributed to `branch`, oldest first.
    fn commits_on_branch(&self, branch: &str) -> SResult<Vec<Commit>>;
}

/// The full persistence surface an [`crate::engine::Engine`] needs.
/// Implemented by [`MemBackend`] and [`FsBackend`].
pub trait Backend: ObjectStore + RefStore + CommitStore {}
impl<T: ObjectStore + RefStore + CommitStore> Backend for T {}

/// In-memory backend. Used in tests and for ephemeral engines.
#[derive(Default)]
pub struct MemBackend {
    objects: HashMap<Hash, Vec<u8>>,
    branches: BTreeMap<String, Hash>,
    head: Option<String>,
    commits: HashMap<Hash, Commit>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemBackend {
    fn get(&self, hash: &Hash) -> SResult<Option<Vec<u8>>> {
        Ok(self.objects.get(hash).cloned())
    }

    fn put(&mut self, hash: &Hash, bytes: &[u8]) -> SResult<()> {
        self.objects.entry(hash.clone()).or_insert_with(|| bytes.to_vec());
        Ok(())
    }
}

impl RefStore for MemBackend {
    fn head(&self) -> SResult<Option<String>> {
        Ok(self.head.clone())
    }

    fn set_head(&mut self, branch: &str) -> SResult<()> {
        self.head = Some(branch.to_string());
        Ok(())
    }

    fn get_branch(&self, name: &str) -> SResult<Option<Hash>> {
        Ok(self.branches.get(name).cloned())
    }

    fn set_branch(&mut self, name: &str, commit_hash: &Hash) -> SResult<()> {
        self.branches.insert(name.to_string(), commit_hash.clone());
        Ok(())
    }

    fn delete_branch(&mut self, name: &str) -> SResult<()> {
        self.branches.remove(name);
        Ok(())
    }

    fn list_branches(&self) -> SResult<Vec<String>> {
        Ok(self.branches.keys().cloned().collect())
    }
}

impl CommitStore for MemBackend {
    fn put_commit(&mut self, commit: &Commit) -> SResult<()> {
        self.commits.insert(commit.hash.clone(), commit.clone());
        Ok(())
    }

    fn get_commit(&self, hash: &Hash) -> SResult<Option<Commit>> {
        Ok(self.commits.get(hash).cloned())
    }

    fn commits_on_branch(&self, branch: &str) -> SResult<Vec<Commit>> {
        let mut on_branch: Vec<Commit> = self
            .commits
            .values()
            .filter(|c| c.branch == branch)
            .cloned()
            .collect();
        on_branch.sort_by_key(|c| c.timestamp);
        Ok(on_branch)
    }
}

/// Filesystem-backed store: a sharded object directory and a flat JSON ref
/// file. Refs are written via write-to-temp-then-rename so a crash mid-write
/// can never leave HEAD or a branch pointer partially written.
pub struct FsBackend {
    root: PathBuf,
    /// An in-memory secondary index rebuilt from disk at open time, guarded
    /// because `Engine` methods take `&self`.
    commit_index: Mutex<HashMap<Hash, Commit>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct RefsFile {
    branches: BTreeMap<String, Hash>,
    head: Option<String>,
}

impl FsBackend {
    /// Open (creating if absent) the on-disk store rooted at `config.root`.
    pub fn open(config: &EngineConfig) -> io::Result<Self> {
        let root = config.root.clone();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("commits"))?;
        let commit_index = Self::load_commit_index(&root)?;
        Ok(Self {
            root,
            commit_index: Mutex::new(commit_index),
        })
    }

    fn load_commit_index(root: &Path) -> io::Result<HashMap<Hash, Commit>> {
        let dir = root.join("commits");
        let mut index = HashMap::new();
        if !dir.exists() {
            return Ok(index);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let bytes = fs::read(entry.path())?;
            if let Ok(commit) = serde_json::from_slice::<Commit>(&bytes) {
                index.insert(commit.hash.clone(), commit);
            }
        }
        Ok(index)
    }

    fn object_path(&self, hash: &Hash) -> PathBuf {
        let prefix = &hash[..2.min(hash.len())];
        self.root.join("objects").join(prefix).join(hash)
    }

    fn refs_path(&self) -> PathBuf {
        self.root.join("refs.json")
    }

    fn load_refs(&self) -> SResult<RefsFile> {
        let path = self.refs_path();
        if !path.exists() {
            return Ok(RefsFile::default());
        }
        let bytes = fs::read(&path).map_err(StorageError::from)?;
        serde_json::from_slice(&bytes).map_err(StorageError::from)
    }

    /// Write-to-temp-then-rename so a concurrent reader or a crash never
    /// observes a half-written refs file.
    fn save_refs(&self, refs: &RefsFile) -> SResult<()> {
        let bytes = serde_json::to_vec_pretty(refs).map_err(StorageError::from)?;
        let tmp = self.root.join("refs.json.tmp");
        fs::write(&tmp, &bytes).map_err(StorageError::from)?;
        fs::rename(&tmp, self.refs_path()).map_err(StorageError::from)?;
        Ok(())
    }
}

impl ObjectStore for FsBackend {
    fn get(&self, hash: &Hash) -> SResult<Option<Vec<u8>>> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path).map_err(StorageError::from)?))
    }

    fn put(&mut self, hash: &Hash, bytes: &[u8]) -> SResult<()> {
        let path = self.object_path(hash);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(StorageError::from)?;
        fs::rename(&tmp, &path).map_err(StorageError::from)?;
        Ok(())
    }
}

impl RefStore for FsBackend {
    fn head(&self) -> SResult<Option<String>> {
        Ok(self.load_refs()?.head)
    }

    fn set_head(&mut self, branch: &str) -> SResult<()> {
        let mut refs = self.load_refs()?;
        refs.head = Some(branch.to_string());
        self.save_refs(&refs)
    }

    fn get_branch(&self, name: &str) -> SResult<Option<Hash>> {
        Ok(self.load_refs()?.branches.get(name).cloned())
    }

    fn set_branch(&mut self, name: &str, commit_hash: &Hash) -> SResult<()> {
        let mut refs = self.load_refs()?;
        refs.branches.insert(name.to_string(), commit_hash.clone());
        self.save_refs(&refs)
    }

    fn delete_branch(&mut self, name: &str) -> SResult<()> {
        let mut refs = self.load_refs()?;
        refs.branches.remove(name);
        self.save_refs(&refs)
    }

    fn list_branches(&self) -> SResult<Vec<String>> {
        let refs = self.load_refs()?;
        let mut names: Vec<String> = refs.branches.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl CommitStore for FsBackend {
    fn put_commit(&mut self, commit: &Commit) -> SResult<()> {
        let path = self.root.join("commits").join(&commit.hash);
        let bytes = serde_json::to_vec_pretty(commit).map_err(StorageError::from)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(StorageError::from)?;
        fs::rename(&tmp, &path).map_err(StorageError::from)?;
        self.commit_index
            .lock()
            .unwrap()
            .insert(commit.hash.clone(), commit.clone());
        Ok(())
    }

    fn get_commit(&self, hash: &Hash) -> SResult<Option<Commit>> {
        Ok(self.commit_index.lock().unwrap().get(hash).cloned())
    }

    fn commits_on_branch(&self, branch: &str) -> SResult<Vec<Commit>> {
        let index = self.commit_index.lock().unwrap();
        let mut on_branch: Vec<Commit> = index
            .values()
            .filter(|c| c.branch == branch)
            .cloned()
            .collect();
        on_branch.sort_by_key(|c| c.timestamp);
        Ok(on_branch)
    }
}

/// Compute the content address of an arbitrary blob, exposed for callers
/// (e.g. [`crate::merkle`]) that need to address bytes without going through
/// [`ObjectStore::put`]'s hashing.

pub fn address(bytes: &[u8]) -> Hash {
    compute_hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_object_store_dedups() {
        let mut store = MemBackend::new();
        let hash = address(b"hello");
        store.put(&hash, b"hello").unwrap();
        store.put(&hash, b"hello").unwrap();
        assert_eq!(store.get(&hash).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn mem_ref_store_roundtrip() {
        let mut store = MemBackend::new();
        store.set_head("main").unwrap();
        store.set_branch("main", &"abc123".to_string()).unwrap();
        assert_eq!(store.head().unwrap(), Some("main".to_string()));
        assert_eq!(store.get_branch("main").unwrap(), Some("abc123".to_string()));
        assert_eq!(store.list_branches().unwrap(), vec!["main".to_string()]);
    }

    fn config_at(root: &Path) -> EngineConfig {
        EngineConfig {
            root: root.to_path_buf(),
            default_branch: "main".to_string(),
        }
    }

    #[test]
    fn fs_backend_persists_objects_and_refs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_at(tmp.path());
        {
            let mut backend = FsBackend::open(&config).unwrap();
            let hash = address(b"payload");
            backend.put(&hash, b"payload").unwrap();
            backend.set_head("main").unwrap();
            backend.set_branch("main", &hash).unwrap();
        }
        let backend = FsBackend::open(&config).unwrap();
        let hash = address(b"payload");
        assert_eq!(backend.get(&hash).unwrap(), Some(b"payload".to_vec()));
        assert_eq!(backend.head().unwrap(), Some("main".to_string()));
        assert_eq!(backend.get_branch("main").unwrap(), Some(hash));
    }

    #[test]
    fn fs_backend_commit_index_survives_reopen() {
        use crate::commit::Commit;
        let tmp = tempfile::tempdir().unwrap();
        let config = config_at(tmp.path());
        let commit = Commit {
            hash: "c1".to_string(),
            parent: None,
            branch: "main".to_string(),
            tree_root: "t1".to_string(),
            timestamp: 100,
            message: "first".to_string(),
        };
        {
            let mut backend = FsBackend::open(&config).unwrap();
            backend.put_commit(&commit).unwrap();
        }
        let backend = FsBackend::open(&config).unwrap();
        assert_eq!(backend.get_commit(&"c1".to_string()).unwrap(), Some(commit.clone()));
        assert_eq!(backend.commits_on_branch("main").unwrap(), vec![commit]);
    }
}
