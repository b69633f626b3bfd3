//! Purpose: Map module identities to install directories under a fixed cache root.
//! Exports: `CacheStore`, `CacheEntry`, `TempEntry`, `ENTRY_FILE`, `PACKAGE_DIR`.
//! Role: Sole owner of on-disk install directories; installer and loader go through it.
//! Invariants: An identity is installed iff `<root>/modules/<identity>/entry.json` and
//! Invariants: `<root>/modules/<identity>/package/` both exist.
//! Invariants: Publishing and eviction run under an exclusive lock on `<root>/.lock`.
//! Notes: `clear` is not locked; callers serialize it against installs.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::paths::identity_dir;
use crate::core::session::{ScratchDir, random_hex};

pub const ENTRY_FILE: &str = "entry.json";
pub const PACKAGE_DIR: &str = "package";
const MODULES_DIR: &str = "modules";
const LOCK_FILE: &str = ".lock";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CacheEntry {
    pub identity: String,
    pub install_path: PathBuf,
    pub version: String,
    #[serde(default)]
    pub temporary: bool,
    /// Canonical specifier that produced the entry.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub installed_at: String,
}

impl CacheEntry {
    /// Draft entry for `commit`; the install path is filled in on publish.
    pub fn new(
        identity: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            install_path: PathBuf::new(),
            version: version.into(),
            temporary: false,
            source: source.into(),
            installed_at: now_rfc3339(),
        }
    }

    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_DIR)
    }

    /// Per-identity directory holding `entry.json` and `package/`.
    pub fn entry_dir(&self, identity: &str) -> Result<PathBuf, Error> {
        identity_dir(&self.modules_dir(), identity)
    }

    pub fn install_dir(&self, identity: &str) -> Result<PathBuf, Error> {
        Ok(self.entry_dir(identity)?.join(PACKAGE_DIR))
    }

    /// Create the cache root if it does not exist yet.
    pub async fn ensure(&self) -> Result<(), Error> {
        let modules = self.modules_dir();
        tokio::fs::create_dir_all(&modules)
            .await
            .map_err(|err| io_error(err, "failed to create cache root", &modules))
    }

    pub async fn lookup(&self, identity: &str) -> Result<Option<CacheEntry>, Error> {
        let dir = self.entry_dir(identity)?;
        let entry_path = dir.join(ENTRY_FILE);
        let text = match tokio::fs::read_to_string(&entry_path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(err, "failed to read cache entry", &entry_path)),
        };
        let mut entry: CacheEntry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(identity, error = %err, "ignoring unreadable cache entry");
                return Ok(None);
            }
        };
        let package = dir.join(PACKAGE_DIR);
        let has_package = tokio::fs::metadata(&package)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if entry.identity != identity || !has_package {
            return Ok(None);
        }
        entry.install_path = package;
        Ok(Some(entry))
    }

    /// Deterministic directory for `identity`, created if absent.
    pub async fn reserve(&self, identity: &str) -> Result<PathBuf, Error> {
        let dir = self.entry_dir(identity)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| io_error(err, "failed to reserve cache directory", &dir))?;
        Ok(dir)
    }

    /// Fresh staging directory next to the identity's package; removed on drop unless committed.
    pub async fn stage(&self, identity: &str) -> Result<ScratchDir, Error> {
        let dir = self.reserve(identity).await?;
        let staged = dir.join(format!("{PACKAGE_DIR}.partial-{}", random_hex(4)?));
        tokio::fs::create_dir_all(&staged)
            .await
            .map_err(|err| io_error(err, "failed to create staging directory", &staged))?;
        Ok(ScratchDir::adopt(staged))
    }

    /// Publish `staged` as the package for `entry.identity` and persist the entry.
    pub async fn commit(&self, mut entry: CacheEntry, staged: ScratchDir) -> Result<CacheEntry, Error> {
        let dir = self.reserve(&entry.identity).await?;
        entry.install_path = dir.join(PACKAGE_DIR);
        let root = self.root.clone();
        let staged_path = staged.path().to_path_buf();
        let published = entry.clone();
        let replaced = tokio::task::spawn_blocking(move || {
            publish(&root, &dir, &staged_path, &published)
        })
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("cache commit task failed")
                .with_source(err)
        })??;
        drop(staged);

        if let Some(previous) = replaced
            && previous.source != entry.source
        {
            warn!(
                identity = %entry.identity,
                previous = %previous.source,
                source = %entry.source,
                "replacing cached module installed from a different source"
            );
        }
        debug!(identity = %entry.identity, version = %entry.version, "cache entry committed");
        Ok(entry)
    }

    /// Guard that removes the entry's directory when dropped.
    pub fn mark_temporary(&self, entry: &CacheEntry) -> Result<TempEntry, Error> {
        Ok(TempEntry {
            identity: entry.identity.clone(),
            dir: Some(self.entry_dir(&entry.identity)?),
        })
    }

    /// Remove one entry; returns whether anything was removed.
    pub async fn evict(&self, identity: &str) -> Result<bool, Error> {
        let dir = self.entry_dir(identity)?;
        let root = self.root.clone();
        let removed = tokio::task::spawn_blocking(move || -> Result<bool, Error> {
            let _lock = CacheLock::acquire(&root)?;
            match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(io_error(err, "failed to evict cache entry", &dir)),
            }
        })
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("cache evict task failed")
                .with_source(err)
        })??;
        if removed {
            debug!(identity, "cache entry evicted");
        }
        Ok(removed)
    }

    /// Remove the whole cache root and recreate it empty.
    pub async fn clear(&self) -> Result<(), Error> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(err, "failed to clear cache", &self.root)),
        }
        debug!(root = %self.root.display(), "cache cleared");
        self.ensure().await
    }

    /// Installed entries sorted by identity.
    pub async fn list(&self) -> Result<Vec<CacheEntry>, Error> {
        let mut identities = Vec::new();
        let modules = self.modules_dir();
        for name in dir_names(&modules).await? {
            if name.starts_with('@') {
                for inner in dir_names(&modules.join(&name)).await? {
                    identities.push(format!("{name}/{inner}"));
                }
            } else {
                identities.push(name);
            }
        }
        identities.sort();

        let mut entries = Vec::with_capacity(identities.len());
        for identity in identities {
            if let Ok(Some(entry)) = self.lookup(&identity).await {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

async fn dir_names(dir: &Path) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(names),
        Err(err) => return Err(io_error(err, "failed to read cache directory", dir)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| io_error(err, "failed to read cache directory", dir))?
    {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

struct CacheLock {
    file: File,
}

impl CacheLock {
    fn acquire(root: &Path) -> Result<Self, Error> {
        fs::create_dir_all(root).map_err(|err| io_error(err, "failed to create cache root", root))?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| io_error(err, "failed to open cache lock", &path))?;
        file.lock_exclusive()
            .map_err(|err| io_error(err, "failed to lock cache", &path))?;
        Ok(Self { file })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// Blocking: swaps the package directory and rewrites entry.json under the cache lock.
fn publish(
    root: &Path,
    dir: &Path,
    staged: &Path,
    entry: &CacheEntry,
) -> Result<Option<CacheEntry>, Error> {
    let _lock = CacheLock::acquire(root)?;
    let entry_path = dir.join(ENTRY_FILE);
    let previous = fs::read_to_string(&entry_path)
        .ok()
        .and_then(|text| serde_json::from_str::<CacheEntry>(&text).ok());

    let package = dir.join(PACKAGE_DIR);
    let retired = dir.join(format!("{PACKAGE_DIR}.old-{}", random_hex(4)?));
    let had_package = match fs::rename(&package, &retired) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(io_error(err, "failed to retire previous package", &package)),
    };
    fs::rename(staged, &package).map_err(|err| io_error(err, "failed to publish package", staged))?;
    if had_package {
        let _ = fs::remove_dir_all(&retired);
    }

    let text = serde_json::to_string_pretty(entry).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode cache entry")
            .with_source(err)
    })?;
    let tmp = dir.join(format!("{ENTRY_FILE}.tmp"));
    fs::write(&tmp, format!("{text}\n")).map_err(|err| io_error(err, "failed to write cache entry", &tmp))?;
    fs::rename(&tmp, &entry_path)
        .map_err(|err| io_error(err, "failed to write cache entry", &entry_path))?;
    Ok(previous)
}

/// Removes a temporary entry's directory when dropped.
#[derive(Debug)]
pub struct TempEntry {
    identity: String,
    dir: Option<PathBuf>,
}

impl TempEntry {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for TempEntry {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = fs::remove_dir_all(&dir);
            debug!(identity = %self.identity, "temporary cache entry removed");
        }
    }
}
