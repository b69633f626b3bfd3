//! Purpose: Shared path resolution helpers for specifiers, identities and runtime roots.
//! Exports: `absolutize`, `home_dir`, `identity_dir`, `validate_identity`.
//! Role: Keep specifier parsing and the cache store on one set of path rules.
//! Invariants: Relative paths resolve against an explicit base, never hidden globals.
//! Invariants: Identities map to at most two path components (`@scope/name`).

use std::path::{Component, Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub fn home_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home)
}

/// Resolve `path` against `base` and fold `.`/`..` lexically.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn validate_identity(identity: &str) -> Result<(), Error> {
    let invalid = |reason: &str| {
        Err(Error::new(ErrorKind::Manifest)
            .with_message(format!("invalid module identity `{identity}`: {reason}"))
            .with_identity(identity))
    };
    if identity.is_empty() {
        return invalid("identity is empty");
    }
    if identity.chars().any(|c| c.is_whitespace() || c == '\\' || c.is_control()) {
        return invalid("identity contains whitespace, control characters or backslashes");
    }
    let segments: Vec<&str> = identity.split('/').collect();
    let scoped = identity.starts_with('@');
    match (scoped, segments.len()) {
        (true, 2) => {}
        (true, _) => return invalid("scoped identities look like @scope/name"),
        (false, 1) => {}
        (false, _) => return invalid("only scoped identities may contain '/'"),
    }
    for segment in &segments {
        let bare = segment.trim_start_matches('@');
        if bare.is_empty() || bare == "." || bare == ".." || bare.starts_with('.') {
            return invalid("identity segments must not be empty or start with '.'");
        }
    }
    Ok(())
}

pub fn identity_dir(root: &Path, identity: &str) -> Result<PathBuf, Error> {
    validate_identity(identity)?;
    let mut dir = root.to_path_buf();
    for segment in identity.split('/') {
        dir.push(segment);
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::{absolutize, identity_dir, validate_identity};
    use std::path::Path;

    #[test]
    fn absolutize_folds_dot_segments() {
        let out = absolutize(Path::new("/work/project"), Path::new("../mods/./double"));
        assert_eq!(out, Path::new("/work/mods/double"));
        let out = absolutize(Path::new("/work"), Path::new("/abs/x"));
        assert_eq!(out, Path::new("/abs/x"));
    }

    #[test]
    fn identity_rules() {
        assert!(validate_identity("double").is_ok());
        assert!(validate_identity("@acme/to-upper").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("a/b").is_err());
        assert!(validate_identity("@acme").is_err());
        assert!(validate_identity("@acme/..").is_err());
        assert!(validate_identity("..").is_err());
        assert!(validate_identity("has space").is_err());
    }

    #[test]
    fn scoped_identity_nests_one_level() {
        let dir = identity_dir(Path::new("/cache/modules"), "@acme/to-upper").unwrap();
        assert_eq!(dir, Path::new("/cache/modules/@acme/to-upper"));
    }
}
