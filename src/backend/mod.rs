//! Purpose: Seams to the external services the installer depends on.
//! Exports: `PackageRegistry`, `GitClient`, `ContentStore`, `Replica`, `Snapshot`.
//! Role: Installer talks only to these traits; defaults live in the submodules.
//! Invariants: Backends materialize files into caller-owned directories and never touch the cache.
//! Notes: Tests substitute in-memory fakes through `Runtime` builder methods.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::Error;

pub mod git;
pub mod registry;
pub mod replica;

pub use git::GitCli;
pub use registry::DirectoryRegistry;
pub use replica::LocalReplicaStore;

#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Copy the newest release of `name` matching `constraint` (or the newest overall) into `dest`.
    async fn fetch(&self, name: &str, constraint: Option<&str>, dest: &Path) -> Result<(), Error>;
}

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), Error>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Open (or create) the replica kept under `storage`.
    async fn open(&self, storage: &Path) -> Result<Box<dyn Replica>, Error>;
}

#[async_trait]
pub trait Replica: Send + Sync {
    /// Resolve `version` (or the latest one) of the archive named by `public_key`.
    async fn checkout(&self, public_key: &str, version: Option<u64>) -> Result<Snapshot, Error>;

    /// Wait until every file of `snapshot` is present under `snapshot.root`.
    async fn download(&self, snapshot: &Snapshot) -> Result<(), Error>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub public_key: String,
    pub version: u64,
    pub root: PathBuf,
}
