//! Purpose: One-call facade over parsing, installing, loading and pipeline assembly.
//! Exports: `Runtime`.
//! Role: Owns the session, cache, installer, loader and temporary-entry guards for one process.
//! Invariants: Temporary entries are removed when the runtime is dropped.
//! Invariants: `pipeline` preserves the caller's specifier order.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::backend::{
    ContentStore, DirectoryRegistry, GitCli, GitClient, LocalReplicaStore, PackageRegistry,
};
use crate::config::RuntimeConfig;
use crate::core::cache::{CacheEntry, CacheStore, TempEntry};
use crate::core::error::Error;
use crate::core::session::Session;
use crate::core::specifier::{ModuleSpecifier, parse_in};
use crate::install::Installer;
use crate::loader::Loader;
use crate::pipeline::Pipeline;
use crate::plugin::Plugin;

#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    installer: Installer,
    loader: Loader,
    temporaries: Mutex<Vec<TempEntry>>,
}

impl Runtime {
    /// Create the cache root if needed, open a session, and wire the default backends.
    pub async fn open(config: RuntimeConfig) -> Result<Self, Error> {
        let cache = CacheStore::new(&config.cache_dir);
        cache.ensure().await?;
        let session = Arc::new(Session::open(&config.temp_dir)?);
        debug!(session = %session.id(), cache = %cache.root().display(), "runtime opened");

        let installer = Installer::new(cache.clone(), session)
            .with_registry(Arc::new(DirectoryRegistry::new(&config.registry_dir)))
            .with_git(Arc::new(GitCli::new(&config.git_program)))
            .with_content_store(Arc::new(LocalReplicaStore::new(config.seeds.clone())))
            .with_git_base(&config.git_base)
            .with_replica_dir(&config.replica_dir)
            .with_temporary(config.temporary);
        Ok(Self {
            loader: Loader::new(cache),
            installer,
            config,
            temporaries: Mutex::new(Vec::new()),
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn PackageRegistry>) -> Self {
        self.installer = self.installer.with_registry(registry);
        self
    }

    pub fn with_git(mut self, git: Arc<dyn GitClient>) -> Self {
        self.installer = self.installer.with_git(git);
        self
    }

    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.installer = self.installer.with_content_store(content);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        self.installer.cache()
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn session(&self) -> &Session {
        self.installer.session()
    }

    /// Classify `raw` against the runtime's base directory.
    pub fn parse(&self, raw: &str) -> Result<ModuleSpecifier, Error> {
        parse_in(raw, &self.config.base_dir)
    }

    /// Parse and install `raw`, returning its cache entry.
    pub async fn resolve(&self, raw: &str) -> Result<CacheEntry, Error> {
        let specifier = self.parse(raw)?;
        let entry = self.installer.install(&specifier).await?;
        if entry.temporary {
            self.track_temporary(&entry)?;
        }
        Ok(entry)
    }

    pub async fn require(&self, raw: &str) -> Result<Arc<dyn Plugin>, Error> {
        let entry = self.resolve(raw).await?;
        self.loader
            .load(&entry.identity)
            .await
            .map_err(|err| err.or_specifier(raw))
    }

    /// Require each specifier in order and assemble them into a pipeline.
    pub async fn pipeline<S: AsRef<str>>(&self, specifiers: &[S]) -> Result<Pipeline, Error> {
        let mut pipeline = Pipeline::new();
        for raw in specifiers {
            pipeline.push(self.require(raw.as_ref()).await?);
        }
        Ok(pipeline)
    }

    fn track_temporary(&self, entry: &CacheEntry) -> Result<(), Error> {
        let mut guards = self
            .temporaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tracked: HashSet<&str> = guards.iter().map(TempEntry::identity).collect();
        if !tracked.contains(entry.identity.as_str()) {
            guards.push(self.cache().mark_temporary(entry)?);
        }
        Ok(())
    }
}
