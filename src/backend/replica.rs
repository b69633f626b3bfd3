//! Purpose: Content-addressed archive replicas fed from local seed directories.
//! Exports: `LocalReplicaStore`, `LocalReplica`, `INDEX_SUFFIX`.
//! Role: Default `ContentStore`; seeds are laid out as `<seed>/<public-key>/<version>/`.
//! Invariants: A snapshot is complete only when `<storage>/<version>.index.json` exists and
//! Invariants: every file it lists hashes (SHA-256) to the recorded digest.
//! Notes: Incomplete or tampered snapshots are downloaded again from the first seed that has them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::backend::{ContentStore, Replica, Snapshot};
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::fsutil::copy_tree;
use crate::core::session::random_hex;

pub const INDEX_SUFFIX: &str = ".index.json";

#[derive(Clone, Debug, Default)]
pub struct LocalReplicaStore {
    seeds: Vec<PathBuf>,
}

impl LocalReplicaStore {
    pub fn new(seeds: Vec<PathBuf>) -> Self {
        Self { seeds }
    }

    pub fn seeds(&self) -> &[PathBuf] {
        &self.seeds
    }
}

#[async_trait]
impl ContentStore for LocalReplicaStore {
    async fn open(&self, storage: &Path) -> Result<Box<dyn Replica>, Error> {
        tokio::fs::create_dir_all(storage)
            .await
            .map_err(|err| io_error(err, "failed to create replica storage", storage))?;
        Ok(Box::new(LocalReplica {
            storage: storage.to_path_buf(),
            seeds: self.seeds.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct LocalReplica {
    storage: PathBuf,
    seeds: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SnapshotIndex {
    public_key: String,
    version: u64,
    files: BTreeMap<String, String>,
}

impl LocalReplica {
    fn index_path(&self, version: u64) -> PathBuf {
        self.storage.join(format!("{version}{INDEX_SUFFIX}"))
    }

    /// First seed directory that carries `public_key/version`.
    fn seed_for(&self, public_key: &str, version: u64) -> Option<PathBuf> {
        self.seeds
            .iter()
            .map(|seed| seed.join(public_key).join(version.to_string()))
            .find(|dir| dir.is_dir())
    }

    fn published_versions(&self, public_key: &str) -> Vec<u64> {
        let mut versions = Vec::new();
        for seed in &self.seeds {
            let Ok(entries) = fs::read_dir(seed.join(public_key)) else {
                continue;
            };
            for entry in entries.flatten() {
                if let Ok(version) = entry.file_name().to_string_lossy().parse::<u64>() {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    /// Versions already present locally (complete or not).
    fn local_versions(&self) -> Vec<u64> {
        let Ok(entries) = fs::read_dir(&self.storage) else {
            return Vec::new();
        };
        let mut versions: Vec<u64> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(INDEX_SUFFIX)?.parse().ok()
            })
            .collect();
        versions.sort_unstable();
        versions
    }

    async fn is_complete(&self, snapshot: &Snapshot) -> bool {
        let index_path = self.index_path(snapshot.version);
        let Ok(text) = tokio::fs::read_to_string(&index_path).await else {
            return false;
        };
        let Ok(index) = serde_json::from_str::<SnapshotIndex>(&text) else {
            return false;
        };
        let root = snapshot.root.clone();
        let hashed = tokio::task::spawn_blocking(move || hash_tree(&root)).await;
        match hashed {
            Ok(Ok(files)) if files == index.files => true,
            _ => {
                warn!(
                    key = %snapshot.public_key,
                    version = snapshot.version,
                    "replica snapshot failed verification"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Replica for LocalReplica {
    async fn checkout(&self, public_key: &str, version: Option<u64>) -> Result<Snapshot, Error> {
        let version = match version {
            Some(version) => version,
            None => {
                let latest = self
                    .published_versions(public_key)
                    .into_iter()
                    .chain(self.local_versions())
                    .max();
                latest.ok_or_else(|| {
                    Error::new(ErrorKind::Install)
                        .with_message("archive has no published versions")
                        .with_specifier(format!("hyper://{public_key}"))
                })?
            }
        };
        Ok(Snapshot {
            public_key: public_key.to_string(),
            version,
            root: self.storage.join(version.to_string()),
        })
    }

    async fn download(&self, snapshot: &Snapshot) -> Result<(), Error> {
        if self.is_complete(snapshot).await {
            debug!(key = %snapshot.public_key, version = snapshot.version, "replica snapshot present");
            return Ok(());
        }
        let Some(seed) = self.seed_for(&snapshot.public_key, snapshot.version) else {
            return Err(Error::new(ErrorKind::Install)
                .with_message(format!(
                    "archive version {} is not available from any seed",
                    snapshot.version
                ))
                .with_specifier(format!(
                    "hyper://{}@{}",
                    snapshot.version, snapshot.public_key
                )));
        };

        let partial = self
            .storage
            .join(format!("{}.partial-{}", snapshot.version, random_hex(4)?));
        if let Err(err) = copy_tree(&seed, &partial).await {
            let _ = tokio::fs::remove_dir_all(&partial).await;
            return Err(Error::new(ErrorKind::Install)
                .with_message("failed to download archive snapshot")
                .with_path(&seed)
                .with_source(err));
        }
        let hashed_root = partial.clone();
        let files = tokio::task::spawn_blocking(move || hash_tree(&hashed_root))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("replica hashing task failed")
                    .with_source(err)
            })??;

        match tokio::fs::remove_dir_all(&snapshot.root).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(err, "failed to replace snapshot", &snapshot.root)),
        }
        tokio::fs::rename(&partial, &snapshot.root)
            .await
            .map_err(|err| io_error(err, "failed to publish snapshot", &snapshot.root))?;

        let index = SnapshotIndex {
            public_key: snapshot.public_key.clone(),
            version: snapshot.version,
            files,
        };
        let text = serde_json::to_string_pretty(&index).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode replica index")
                .with_source(err)
        })?;
        let index_path = self.index_path(snapshot.version);
        tokio::fs::write(&index_path, text)
            .await
            .map_err(|err| io_error(err, "failed to write replica index", &index_path))?;
        debug!(key = %snapshot.public_key, version = snapshot.version, "replica snapshot downloaded");
        Ok(())
    }
}

/// Relative path → hex SHA-256 digest for every file under `root`.
fn hash_tree(root: &Path) -> Result<BTreeMap<String, String>, Error> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| io_error(err, "failed to read snapshot", &dir))?;
        for entry in entries {
            let entry = entry.map_err(|err| io_error(err, "failed to read snapshot", &dir))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let bytes = fs::read(&path).map_err(|err| io_error(err, "failed to read snapshot file", &path))?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(relative, hex_digest(&bytes));
        }
    }
    Ok(files)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
