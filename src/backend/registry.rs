// Package registry backed by a local mirror laid out as `<root>/<name>/<version>/`.
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use semver::Version;
use tracing::debug;

use crate::backend::PackageRegistry;
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::fsutil::copy_tree;
use crate::core::paths::identity_dir;
use crate::core::version::parse_constraint;

#[derive(Clone, Debug)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published versions of `name`, newest first. Unparseable directory names are ignored.
    pub async fn versions(&self, name: &str) -> Result<Vec<Version>, Error> {
        let dir = identity_dir(&self.root, name).map_err(|err| err.with_specifier(name))?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(err, "failed to read registry", &dir)),
        };
        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_error(err, "failed to read registry", &dir))?
        {
            if let Ok(version) = Version::parse(&entry.file_name().to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }
}

#[async_trait]
impl PackageRegistry for DirectoryRegistry {
    async fn fetch(&self, name: &str, constraint: Option<&str>, dest: &Path) -> Result<(), Error> {
        let versions = self.versions(name).await?;
        if versions.is_empty() {
            return Err(Error::new(ErrorKind::Install)
                .with_message("package not found in registry")
                .with_specifier(name)
                .with_path(&self.root));
        }
        let chosen = match constraint {
            Some(raw) => {
                let req = parse_constraint(raw)?;
                versions.into_iter().find(|version| req.matches(version))
            }
            None => versions.into_iter().next(),
        };
        let Some(version) = chosen else {
            return Err(Error::new(ErrorKind::Install)
                .with_message(format!(
                    "no published version of `{name}` matches `{}`",
                    constraint.unwrap_or("*")
                ))
                .with_specifier(name));
        };

        let source = identity_dir(&self.root, name)?.join(version.to_string());
        debug!(package = name, version = %version, "fetching from registry");
        copy_tree(&source, dest).await.map_err(|err| {
            Error::new(ErrorKind::Install)
                .with_message("failed to copy package from registry")
                .with_specifier(name)
                .with_path(&source)
                .with_source(err)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DirectoryRegistry;
    use crate::backend::PackageRegistry;
    use crate::core::error::ErrorKind;

    fn publish(root: &std::path::Path, name: &str, version: &str) {
        let dir = root.join(name).join(version);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(
            dir.join("zerda.json"),
            format!(r#"{{"name":"{name}","version":"{version}","main":"main.jq"}}"#),
        )
        .expect("write");
        std::fs::write(dir.join("main.jq"), ".").expect("write");
    }

    #[tokio::test]
    async fn fetch_picks_newest_matching_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("registry");
        publish(&root, "double", "1.0.0");
        publish(&root, "double", "1.4.2");
        publish(&root, "double", "2.0.0");
        std::fs::create_dir_all(root.join("double/not-a-version")).expect("mkdir");
        let registry = DirectoryRegistry::new(&root);

        let versions = registry.versions("double").await.expect("versions");
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].to_string(), "2.0.0");

        let dest = temp.path().join("a");
        registry.fetch("double", Some("^1.0.0"), &dest).await.expect("fetch");
        let text = std::fs::read_to_string(dest.join("zerda.json")).expect("read");
        assert!(text.contains("1.4.2"));

        let dest = temp.path().join("b");
        registry.fetch("double", None, &dest).await.expect("fetch");
        let text = std::fs::read_to_string(dest.join("zerda.json")).expect("read");
        assert!(text.contains("2.0.0"));
    }

    #[tokio::test]
    async fn missing_packages_and_unmatched_ranges_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        publish(temp.path(), "double", "1.0.0");
        let registry = DirectoryRegistry::new(temp.path());

        let err = registry
            .fetch("nope", None, &temp.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Install);

        let err = registry
            .fetch("double", Some("^3"), &temp.path().join("y"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Install);
    }
}
