//! Runtime configuration for an [`crate::engine::Engine`] backed by
//! [`crate::store::FsBackend`].
//!
//! A plain config struct with a `Default` impl and an environment-overridable
//! loader, so a caller can wire it up without touching the engine's
//! constructor signature.

use std::env;
use std::path::PathBuf;

const ROOT_ENV: &str = "ICEBERG_VCS_DB_PATH";
const BRANCH_ENV: &str = "ICEBERG_VCS_DEFAULT_BRANCH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub default_branch: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("iceberg-vcs.db"),
            default_branch: "main".to_string(),
        }
    }
}

impl EngineConfig {
    /// Start from [`Default`], then apply `ICEBERG_VCS_DB_PATH` and
    /// `ICEBERG_VCS_DEFAULT_BRANCH` if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = env::var(ROOT_ENV) {
            config.root = PathBuf::from(root);
        }
        if let Ok(branch) = env::var(BRANCH_ENV) {
            config.default_branch = branch;
        }
        config
    }
}
