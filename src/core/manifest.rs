//! Purpose: Read and write module manifests (`zerda.json`).
//! Exports: `Manifest`, `Entry`, `FilePair`, `LocalModule`, `read_module`, `MANIFEST_FILE`.
//! Role: The only place that knows the manifest schema; installer and loader go through it.
//! Invariants: A module manifest names a valid identity and a semver version.
//! Invariants: `command` takes precedence over `main` when both are present.
//! Notes: Project files reuse the schema but may omit `name`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::paths::validate_identity;
use crate::core::version::parse_version;

pub const MANIFEST_FILE: &str = "zerda.json";
pub const DEFAULT_VERSION: &str = "0.0.0";

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FilePair {
    pub input: String,
    pub output: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FilePair>,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// What a module exports as its callable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    Jq { file: PathBuf },
    /// A non-jq `main`: an executable shipped inside the module.
    Script { file: PathBuf },
    /// `command[0]` may name a file in the module or a program on `PATH`.
    Command { program: String, args: Vec<String> },
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = Some(main.into());
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_identity(&self.name)?;
        parse_version(&self.version).map_err(|err| err.with_identity(&self.name))?;
        Ok(())
    }

    pub fn entry(&self) -> Option<Entry> {
        if let Some((program, args)) = self.command.split_first() {
            return Some(Entry::Command {
                program: program.clone(),
                args: args.to_vec(),
            });
        }
        let main = self.main.as_deref()?;
        if main.ends_with(".jq") {
            return Some(Entry::Jq {
                file: PathBuf::from(main),
            });
        }
        Some(Entry::Script {
            file: PathBuf::from(main),
        })
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Manifest)
                .with_message("invalid manifest json")
                .with_path(path)
                .with_source(err)
        })
    }

    /// Read `<dir>/zerda.json` without module validation.
    pub async fn read(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(MANIFEST_FILE);
        let text = tokio::fs::read_to_string(&path).await.map_err(|err| {
            Error::new(ErrorKind::Manifest)
                .with_message("failed to read manifest")
                .with_path(&path)
                .with_source(err)
        })?;
        Self::parse(&text, &path)
    }

    pub async fn write(&self, dir: &Path) -> Result<(), Error> {
        let path = dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode manifest")
                .with_source(err)
        })?;
        tokio::fs::write(&path, format!("{text}\n"))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Manifest)
                    .with_message("failed to write manifest")
                    .with_path(&path)
                    .with_source(err)
            })
    }
}

/// A module found on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalModule {
    pub root: PathBuf,
    pub manifest: Manifest,
    /// Set when the module is a lone source file with a synthesized manifest.
    pub single_file: Option<PathBuf>,
}

pub async fn read_module(path: &Path) -> Result<LocalModule, Error> {
    let metadata = tokio::fs::metadata(path).await.map_err(|err| {
        Error::new(ErrorKind::Manifest)
            .with_message("module path does not exist")
            .with_path(path)
            .with_source(err)
    })?;

    if metadata.is_dir() {
        let manifest = Manifest::read(path).await?;
        manifest.validate().map_err(|err| err.with_path(path))?;
        return Ok(LocalModule {
            root: path.to_path_buf(),
            manifest,
            single_file: None,
        });
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if file_name == MANIFEST_FILE {
        let manifest = Manifest::read(&parent).await?;
        manifest.validate().map_err(|err| err.with_path(path))?;
        return Ok(LocalModule {
            root: parent,
            manifest,
            single_file: None,
        });
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let manifest = Manifest::new(stem, DEFAULT_VERSION).with_main(file_name);
    manifest.validate().map_err(|err| err.with_path(path))?;
    Ok(LocalModule {
        root: parent,
        manifest,
        single_file: Some(path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::{Entry, MANIFEST_FILE, Manifest, read_module};
    use crate::core::error::ErrorKind;
    use std::path::PathBuf;

    #[test]
    fn command_wins_over_main() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"name":"x","main":"main.jq","command":["python3","run.py","--fast"]}"#,
        )
        .unwrap();
        assert_eq!(
            manifest.entry(),
            Some(Entry::Command {
                program: "python3".to_string(),
                args: vec!["run.py".to_string(), "--fast".to_string()],
            })
        );
        assert_eq!(manifest.version, "0.0.0");
    }

    #[test]
    fn jq_main_and_project_manifests() {
        let jq = Manifest::new("double", "1.0.0").with_main("main.jq");
        assert_eq!(
            jq.entry(),
            Some(Entry::Jq {
                file: PathBuf::from("main.jq")
            })
        );
        let script = Manifest::new("shout", "1.0.0").with_main("run.sh");
        assert_eq!(
            script.entry(),
            Some(Entry::Script {
                file: PathBuf::from("run.sh")
            })
        );
        let project: Manifest = serde_json::from_str(r#"{"plugins":["./a","gh:o/r"]}"#).unwrap();
        assert_eq!(project.entry(), None);
        assert_eq!(project.plugins.len(), 2);
    }

    #[tokio::test]
    async fn write_then_read_module_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::new("@acme/to-upper", "2.1.0").with_main("main.jq");
        manifest.write(temp.path()).await.expect("write");

        let module = read_module(temp.path()).await.expect("read");
        assert_eq!(module.manifest, manifest);
        assert_eq!(module.root, temp.path());
        assert!(module.single_file.is_none());

        let via_file = read_module(&temp.path().join(MANIFEST_FILE)).await.expect("read");
        assert_eq!(via_file.manifest.name, "@acme/to-upper");
    }

    #[tokio::test]
    async fn lone_file_gets_a_synthesized_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("double.jq");
        std::fs::write(&file, "[.[] * 2]").expect("write");

        let module = read_module(&file).await.expect("read");
        assert_eq!(module.manifest.name, "double");
        assert_eq!(module.manifest.main.as_deref(), Some("double.jq"));
        assert_eq!(module.single_file.as_deref(), Some(file.as_path()));
    }

    #[tokio::test]
    async fn missing_or_invalid_manifests_are_manifest_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_module(temp.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);

        std::fs::write(temp.path().join(MANIFEST_FILE), r#"{"name":"ok","version":"one"}"#)
            .expect("write");
        let err = read_module(temp.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);

        let err = read_module(&temp.path().join("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);
    }
}
