//! Purpose: Materialize a classified specifier into the cache through the matching backend.
//! Exports: `Installer`, `InstallStats`, `StatsSnapshot`.
//! Role: One handler per `ModuleSpecifier` variant; all of them end in `install_from_path`.
//! Invariants: Concurrent installs of the same specifier share one in-flight result.
//! Invariants: Concurrent local installs that resolve to the same identity share one result too.
//! Invariants: Scratch copies live under the session root and are removed on every exit path.
//! Invariants: Local installs reuse any cached entry with the same identity (zero manifest writes).
//! Invariants: Remote installs reuse a cached entry only when identity and version both match.
//! Notes: Registry constraints fall back to the latest release, then verify it satisfies the range.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::{
    ContentStore, DirectoryRegistry, GitCli, GitClient, LocalReplicaStore, PackageRegistry,
};
use crate::config::{DEFAULT_GIT_BASE, REPLICA_DIR_NAME, default_registry_dir, default_seed_dir};
use crate::core::cache::{CacheEntry, CacheStore};
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::fsutil::copy_tree;
use crate::core::manifest::{LocalModule, read_module};
use crate::core::session::{ScratchDir, Session};
use crate::core::specifier::ModuleSpecifier;
use crate::core::version::satisfies;
use crate::loader::prepare_sources;

type Flight = Arc<OnceCell<Result<CacheEntry, Error>>>;
type Flights = Mutex<HashMap<String, Flight>>;

#[derive(Debug, Default)]
pub struct InstallStats {
    installs: AtomicU64,
    manifest_writes: AtomicU64,
    cache_hits: AtomicU64,
    fetches: AtomicU64,
    clones: AtomicU64,
    checkouts: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub installs: u64,
    pub manifest_writes: u64,
    pub cache_hits: u64,
    pub fetches: u64,
    pub clones: u64,
    pub checkouts: u64,
}

impl InstallStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            installs: self.installs.load(Ordering::Relaxed),
            manifest_writes: self.manifest_writes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            clones: self.clones.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
        }
    }
}

pub struct Installer {
    cache: CacheStore,
    session: Arc<Session>,
    registry: Arc<dyn PackageRegistry>,
    git: Arc<dyn GitClient>,
    content: Arc<dyn ContentStore>,
    git_base: String,
    replica_dir: PathBuf,
    temporary: bool,
    stats: InstallStats,
    flights: Flights,
    identity_flights: Flights,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("cache", &self.cache)
            .field("session", &self.session.id())
            .field("git_base", &self.git_base)
            .field("replica_dir", &self.replica_dir)
            .field("temporary", &self.temporary)
            .finish()
    }
}

impl Installer {
    /// Installer wired to the default backends and directories.
    pub fn new(cache: CacheStore, session: Arc<Session>) -> Self {
        let replica_dir = std::env::current_dir()
            .unwrap_or_default()
            .join(REPLICA_DIR_NAME);
        Self {
            cache,
            session,
            registry: Arc::new(DirectoryRegistry::new(default_registry_dir())),
            git: Arc::new(GitCli::default()),
            content: Arc::new(LocalReplicaStore::new(vec![default_seed_dir()])),
            git_base: DEFAULT_GIT_BASE.to_string(),
            replica_dir,
            temporary: false,
            stats: InstallStats::default(),
            flights: Mutex::new(HashMap::new()),
            identity_flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn PackageRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_git(mut self, git: Arc<dyn GitClient>) -> Self {
        self.git = git;
        self
    }

    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = content;
        self
    }

    pub fn with_git_base(mut self, base: impl Into<String>) -> Self {
        self.git_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_replica_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.replica_dir = dir.into();
        self
    }

    /// Mark every fresh install as temporary.
    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Install `specifier`, joining an in-flight install of the same key if there is one.
    pub async fn install(&self, specifier: &ModuleSpecifier) -> Result<CacheEntry, Error> {
        let key = specifier.flight_key();
        single_flight(&self.flights, &key, || self.install_uncached(specifier))
            .await
            .map_err(|err| err.or_specifier(key))
    }

    async fn install_uncached(&self, specifier: &ModuleSpecifier) -> Result<CacheEntry, Error> {
        let source = specifier.to_string();
        match specifier {
            ModuleSpecifier::LocalFile { path } | ModuleSpecifier::LocalDirectory { path } => {
                self.install_local(path, &source).await
            }
            ModuleSpecifier::RegistryPackage { name, constraint } => {
                self.install_registry(name, constraint.as_deref(), &source)
                    .await
            }
            ModuleSpecifier::GitHosted { owner, repo } => {
                self.install_git(owner, repo, &source).await
            }
            ModuleSpecifier::ContentAddressed {
                public_key,
                version,
            } => self.install_replica(public_key, *version, &source).await,
        }
    }

    async fn install_local(&self, path: &Path, source: &str) -> Result<CacheEntry, Error> {
        let module = read_module(path).await?;
        let identity = module.manifest.name.clone();
        single_flight(&self.identity_flights, &identity, || {
            self.install_local_module(&module, source)
        })
        .await
    }

    async fn install_local_module(
        &self,
        module: &LocalModule,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        let identity = &module.manifest.name;
        if let Some(entry) = self.cache.lookup(identity).await? {
            InstallStats::bump(&self.stats.cache_hits);
            debug!(identity = %identity, "local module already installed");
            return Ok(entry);
        }

        let scratch = self.session.scratch().await?;
        let result = self.install_local_copy(module, scratch.path(), source).await;
        scratch.remove().await;
        result
    }

    async fn install_local_copy(
        &self,
        module: &LocalModule,
        scratch: &Path,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        match &module.single_file {
            Some(file) => {
                let name = file.file_name().unwrap_or_default();
                let target = scratch.join(name);
                tokio::fs::copy(file, &target)
                    .await
                    .map_err(|err| io_error(err, "failed to copy module file", file))?;
                module.manifest.write(scratch).await?;
            }
            None => {
                copy_tree(&module.root, scratch).await?;
            }
        }
        self.install_from_path(scratch, source).await
    }

    async fn install_registry(
        &self,
        name: &str,
        constraint: Option<&str>,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        if let Some(entry) = self.cache.lookup(name).await? {
            let fits = match constraint {
                Some(range) => satisfies(&entry.version, range)?,
                None => true,
            };
            if fits {
                InstallStats::bump(&self.stats.cache_hits);
                debug!(package = name, version = %entry.version, "registry package already installed");
                return Ok(entry);
            }
        }

        let mut scratch = self.session.scratch().await?;
        InstallStats::bump(&self.stats.fetches);
        if let Some(range) = constraint {
            let pinned = self
                .registry
                .fetch(name, Some(range), &scratch.path().join("package"))
                .await;
            if let Err(err) = pinned {
                warn!(package = name, constraint = range, error = %err, "pinned fetch failed; trying latest");
                scratch.remove().await;
                scratch = self.session.scratch().await?;
                InstallStats::bump(&self.stats.fetches);
                let fallback = self
                    .registry
                    .fetch(name, None, &scratch.path().join("package"))
                    .await;
                if let Err(err) = fallback {
                    scratch.remove().await;
                    return Err(err);
                }
            }
        } else if let Err(err) = self
            .registry
            .fetch(name, None, &scratch.path().join("package"))
            .await
        {
            scratch.remove().await;
            return Err(err);
        }

        let result = self
            .install_registry_fetched(&scratch, constraint, source)
            .await;
        scratch.remove().await;
        result
    }

    async fn install_registry_fetched(
        &self,
        scratch: &ScratchDir,
        constraint: Option<&str>,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        let dir = scratch.path().join("package");
        let module = read_module(&dir).await?;
        if let Some(range) = constraint {
            let actual = &module.manifest.version;
            if !satisfies(actual, range)? {
                return Err(Error::new(ErrorKind::VersionConstraint)
                    .with_message(format!(
                        "Version `{actual}` does not meet requirement `{range}`."
                    ))
                    .with_identity(&module.manifest.name)
                    .with_versions(range, actual));
            }
        }
        self.install_remote(&dir, &module, source).await
    }

    async fn install_git(&self, owner: &str, repo: &str, source: &str) -> Result<CacheEntry, Error> {
        let url = format!("{}/{owner}/{repo}.git", self.git_base);
        let scratch = self.session.scratch().await?;
        let result = async {
            let dest = scratch.path().join(repo);
            InstallStats::bump(&self.stats.clones);
            self.git.clone_repo(&url, &dest).await?;
            let module = read_module(&dest).await?;
            self.install_remote(&dest, &module, source).await
        }
        .await;
        scratch.remove().await;
        result
    }

    async fn install_replica(
        &self,
        public_key: &str,
        version: Option<u64>,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        let storage = self.replica_dir.join(public_key);
        let replica = self.content.open(&storage).await?;
        InstallStats::bump(&self.stats.checkouts);
        let snapshot = replica.checkout(public_key, version).await?;
        replica.download(&snapshot).await?;
        debug!(key = public_key, version = snapshot.version, "archive checked out");

        let scratch = self.session.scratch().await?;
        let result = async {
            copy_tree(&snapshot.root, scratch.path()).await?;
            let module = read_module(scratch.path()).await?;
            self.install_remote(scratch.path(), &module, source).await
        }
        .await;
        scratch.remove().await;
        result
    }

    async fn install_remote(
        &self,
        dir: &Path,
        module: &LocalModule,
        source: &str,
    ) -> Result<CacheEntry, Error> {
        if let Some(entry) = self.cache.lookup(&module.manifest.name).await?
            && entry.version == module.manifest.version
        {
            InstallStats::bump(&self.stats.cache_hits);
            debug!(identity = %entry.identity, version = %entry.version, "remote module already installed");
            return Ok(entry);
        }
        self.install_from_path(dir, source).await
    }

    /// Install the module rooted at `dir` (a directory holding `zerda.json`).
    ///
    /// Sources are prepared in place, so `dir` should be a scratch copy.
    pub async fn install_from_path(&self, dir: &Path, source: &str) -> Result<CacheEntry, Error> {
        let module = read_module(dir).await?;
        let manifest = module.manifest;
        let identity = manifest.name.clone();
        prepare_sources(dir, &manifest).await?;

        let staged = self.cache.stage(&identity).await?;
        copy_tree(dir, staged.path()).await?;
        manifest.write(staged.path()).await?;
        InstallStats::bump(&self.stats.manifest_writes);

        let draft = CacheEntry::new(&identity, &manifest.version, source).with_temporary(self.temporary);
        let entry = self.cache.commit(draft, staged).await?;
        InstallStats::bump(&self.stats.installs);
        info!(identity = %entry.identity, version = %entry.version, source, "module installed");
        Ok(entry)
    }
}

// Later callers for `key` await the first caller's result; the slot is dropped once it settles.
async fn single_flight<F, Fut>(flights: &Flights, key: &str, init: F) -> Result<CacheEntry, Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CacheEntry, Error>>,
{
    let flight = {
        let mut map = flights.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string()).or_default().clone()
    };
    let result = flight.get_or_init(init).await.clone();
    let mut map = flights.lock().unwrap_or_else(PoisonError::into_inner);
    if map
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, &flight))
    {
        map.remove(key);
    }
    result
}
