//! Purpose: Own the per-runtime session id and its scratch directories.
//! Exports: `Session`, `ScratchDir`, `random_hex`.
//! Role: Explicit replacement for a process-wide session id; passed to whoever needs scratch space.
//! Invariants: Every scratch path lives under `<temp_root>/<session-id>/`.
//! Invariants: Dropping a `ScratchDir` or the `Session` removes its directory tree.

use std::path::{Path, PathBuf};

use getrandom::fill as fill_random;
use tracing::debug;

use crate::core::error::{Error, ErrorKind, io_error};

#[derive(Debug)]
pub struct Session {
    id: String,
    root: PathBuf,
}

impl Session {
    /// Open a fresh session under `temp_root`.
    pub fn open(temp_root: &Path) -> Result<Self, Error> {
        let id = random_hex(4)?;
        let root = temp_root.join(&id);
        std::fs::create_dir_all(&root)
            .map_err(|err| io_error(err, "failed to create session directory", &root))?;
        debug!(session = %id, root = %root.display(), "session opened");
        Ok(Self { id, root })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, randomly named directory inside the session root.
    pub async fn scratch(&self) -> Result<ScratchDir, Error> {
        let path = self.root.join(random_hex(4)?);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|err| io_error(err, "failed to create scratch directory", &path))?;
        Ok(ScratchDir { path: Some(path) })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
        debug!(session = %self.id, "session closed");
    }
}

/// Scratch directory removed when dropped, or eagerly through `remove`.
#[derive(Debug)]
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    /// Take ownership of an existing directory.
    pub fn adopt(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            let _ = tokio::fs::remove_dir_all(&path).await;
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_dir_all(path);
        }
    }
}

pub fn random_hex(bytes: usize) -> Result<String, Error> {
    let mut buf = vec![0u8; bytes];
    fill_random(&mut buf).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to generate random id: {err}"))
    })?;
    let mut out = String::with_capacity(bytes * 2);
    for byte in buf {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{Session, random_hex};

    #[test]
    fn random_hex_has_expected_width() {
        let id = random_hex(4).unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn scratch_lives_under_session_and_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = Session::open(temp.path()).expect("session");
        assert!(session.root().starts_with(temp.path()));
        assert!(session.root().ends_with(session.id()));

        let scratch = session.scratch().await.expect("scratch");
        let path = scratch.path().to_path_buf();
        assert!(path.starts_with(session.root()));
        assert!(path.is_dir());
        drop(scratch);
        assert!(!path.exists());

        let scratch = session.scratch().await.expect("scratch");
        let path = scratch.path().to_path_buf();
        scratch.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_the_session_removes_its_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = Session::open(temp.path()).expect("session");
        let root = session.root().to_path_buf();
        let _scratch = session.scratch().await.expect("scratch");
        drop(session);
        assert!(!root.exists());
    }

    #[test]
    fn sessions_do_not_share_roots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = Session::open(temp.path()).expect("a");
        let b = Session::open(temp.path()).expect("b");
        assert_ne!(a.root(), b.root());
    }
}
