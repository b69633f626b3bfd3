//! Purpose: Turn installed modules into callables, and prepare sources before they are installed.
//! Exports: `Loader`, `prepare_sources`, `PREPARED_MARKER`.
//! Role: The only reader of installed entry files; the installer calls `prepare_sources` once per install.
//! Invariants: `load` never installs; a missing cache entry is a `Load` error.
//! Invariants: Prepared jq sources start with `PREPARED_MARKER` and contain no `include` directives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::core::cache::CacheStore;
use crate::core::error::{Error, ErrorKind};
use crate::core::manifest::{Entry, Manifest};
use crate::plugin::{CommandPlugin, JqPlugin, Plugin};

pub const PREPARED_MARKER: &str = "# zerda: prepared";

#[derive(Clone, Debug)]
pub struct Loader {
    cache: CacheStore,
}

impl Loader {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    pub async fn load(&self, identity: &str) -> Result<Arc<dyn Plugin>, Error> {
        let entry = self.cache.lookup(identity).await?.ok_or_else(|| {
            Error::new(ErrorKind::Load)
                .with_message("module is not installed")
                .with_identity(identity)
                .with_hint("Install it first with `zerda install <specifier>`.")
        })?;
        let root = entry.install_path;
        let manifest = Manifest::read(&root)
            .await
            .map_err(|err| load_error(identity, "installed manifest is unreadable").with_source(err))?;
        let Some(callable) = manifest.entry() else {
            return Err(load_error(identity, "module exports no callable")
                .with_hint("Set `main` or `command` in zerda.json.")
                .with_path(&root));
        };

        match callable {
            Entry::Jq { file } => {
                let path = root.join(file);
                let code = tokio::fs::read_to_string(&path).await.map_err(|err| {
                    load_error(identity, "entry file is missing")
                        .with_path(&path)
                        .with_source(err)
                })?;
                let plugin = JqPlugin::compile(identity, &code, &path)?;
                debug!(identity, path = %path.display(), "loaded jq module");
                Ok(Arc::new(plugin))
            }
            Entry::Script { file } => {
                let path = root.join(&file);
                if !path.is_file() {
                    return Err(load_error(identity, "entry file is missing").with_path(&path));
                }
                debug!(identity, program = %path.display(), "loaded script module");
                Ok(Arc::new(CommandPlugin::new(identity, path, Vec::new(), &root)))
            }
            Entry::Command { program, args } => {
                let resolved = resolve_program(&root, &program)
                    .ok_or_else(|| load_error(identity, format!("command `{program}` not found")))?;
                debug!(identity, program = %resolved.display(), "loaded command module");
                Ok(Arc::new(CommandPlugin::new(identity, resolved, args, &root)))
            }
        }
    }
}

fn load_error(identity: &str, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Load)
        .with_message(message)
        .with_identity(identity)
}

// Files inside the module win; other bare names go through PATH.
fn resolve_program(root: &Path, program: &str) -> Option<PathBuf> {
    let local = root.join(program);
    if local.is_file() {
        return Some(local);
    }
    if program.contains('/') || program.contains('\\') {
        return None;
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Rewrite the jq entry under `dir` into its single-file form. Returns whether anything changed.
pub async fn prepare_sources(dir: &Path, manifest: &Manifest) -> Result<bool, Error> {
    let Some(Entry::Jq { file }) = manifest.entry() else {
        return Ok(false);
    };
    let path = dir.join(file);
    let identity = manifest.name.clone();
    tokio::task::spawn_blocking(move || prepare_file(&identity, &path))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("source preparation task failed")
                .with_source(err)
        })?
}

fn prepare_file(identity: &str, path: &Path) -> Result<bool, Error> {
    let text = read_source(identity, path)?;
    if text.starts_with(PREPARED_MARKER) {
        debug!(identity, "sources already prepared");
        return Ok(false);
    }
    let mut chain = Vec::new();
    let body = inline_includes(identity, path, &text, &mut chain)?;
    fs::write(path, format!("{PREPARED_MARKER}\n{body}")).map_err(|err| {
        load_error(identity, "failed to write prepared source")
            .with_path(path)
            .with_source(err)
    })?;
    debug!(identity, path = %path.display(), "sources prepared");
    Ok(true)
}

fn read_source(identity: &str, path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|err| {
        load_error(identity, "entry file is missing")
            .with_path(path)
            .with_source(err)
    })
}

fn inline_includes(
    identity: &str,
    path: &Path,
    text: &str,
    chain: &mut Vec<PathBuf>,
) -> Result<String, Error> {
    let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if chain.contains(&key) {
        return Err(load_error(identity, "include cycle").with_path(path));
    }
    chain.push(key);

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.lines().enumerate() {
        if idx == 0 && line.starts_with("#!") {
            continue;
        }
        match include_target(line) {
            Some(target) => {
                let mut included = base.join(target);
                if included.extension().is_none() {
                    included.set_extension("jq");
                }
                let nested = read_source(identity, &included)?;
                out.push_str(&inline_includes(identity, &included, &nested, chain)?);
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    chain.pop();
    Ok(out)
}

/// `include "path";` (optionally with a metadata object) → `path`.
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("include")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('"')?;
    let (target, tail) = rest.split_once('"')?;
    tail.trim_end().ends_with(';').then_some(target)
}

#[cfg(test)]
mod tests {
    use super::{Loader, PREPARED_MARKER, include_target, prepare_sources};
    use crate::core::cache::{CacheEntry, CacheStore};
    use crate::core::error::ErrorKind;
    use crate::core::manifest::Manifest;
    use serde_json::json;

    #[test]
    fn include_directive_forms() {
        assert_eq!(include_target(r#"include "lib/util";"#), Some("lib/util"));
        assert_eq!(include_target(r#"  include "x" {search: "."};"#), Some("x"));
        assert_eq!(include_target(r#"includes "x";"#), None);
        assert_eq!(include_target(r#"include "x""#), None);
        assert_eq!(include_target(".[] | .include"), None);
    }

    #[tokio::test]
    async fn includes_are_inlined_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        std::fs::create_dir_all(dir.join("lib")).expect("mkdir");
        std::fs::write(dir.join("lib/twice.jq"), "def twice: . * 2;\n").expect("write");
        std::fs::write(
            dir.join("main.jq"),
            "#!/usr/bin/env jq\ninclude \"lib/twice\";\n[.[] | twice]\n",
        )
        .expect("write");
        let manifest = Manifest::new("twice", "1.0.0").with_main("main.jq");

        assert!(prepare_sources(dir, &manifest).await.expect("prepare"));
        let text = std::fs::read_to_string(dir.join("main.jq")).expect("read");
        assert!(text.starts_with(PREPARED_MARKER));
        assert!(text.contains("def twice: . * 2;"));
        assert!(!text.contains("include"));
        assert!(!text.contains("#!"));

        assert!(!prepare_sources(dir, &manifest).await.expect("prepare"));
        let again = std::fs::read_to_string(dir.join("main.jq")).expect("read");
        assert_eq!(again, text);
    }

    #[tokio::test]
    async fn include_cycles_are_load_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        std::fs::write(dir.join("a.jq"), "include \"b\";\n.\n").expect("write");
        std::fs::write(dir.join("b.jq"), "include \"a\";\n").expect("write");
        let manifest = Manifest::new("cyclic", "1.0.0").with_main("a.jq");
        let err = prepare_sources(dir, &manifest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[tokio::test]
    async fn load_requires_an_installed_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::new(temp.path());
        let loader = Loader::new(cache.clone());
        let err = loader.load("double").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);

        let staged = cache.stage("double").await.expect("stage");
        Manifest::new("double", "1.0.0")
            .with_main("main.jq")
            .write(staged.path())
            .await
            .expect("manifest");
        std::fs::write(staged.path().join("main.jq"), "[.[] * 2]").expect("write");
        cache
            .commit(CacheEntry::new("double", "1.0.0", "test"), staged)
            .await
            .expect("commit");

        let plugin = loader.load("double").await.expect("load");
        assert_eq!(plugin.identity(), "double");
        let out = plugin.call(vec![json!(3)]).await.expect("call");
        assert_eq!(out.into_sequence(), vec![json!(6)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_main_runs_from_the_module_root() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::new(temp.path());
        let staged = cache.stage("echo").await.expect("stage");
        Manifest::new("echo", "1.0.0")
            .with_main("run.sh")
            .write(staged.path())
            .await
            .expect("manifest");
        let script = staged.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\ncat\n").expect("write");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        cache
            .commit(CacheEntry::new("echo", "1.0.0", "test"), staged)
            .await
            .expect("commit");

        let plugin = Loader::new(cache).load("echo").await.expect("load");
        let out = plugin.call(vec![json!(1), json!(2)]).await.expect("call");
        assert_eq!(out.into_sequence(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn missing_script_main_is_a_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::new(temp.path());
        let staged = cache.stage("ghost").await.expect("stage");
        Manifest::new("ghost", "1.0.0")
            .with_main("run.sh")
            .write(staged.path())
            .await
            .expect("manifest");
        cache
            .commit(CacheEntry::new("ghost", "1.0.0", "test"), staged)
            .await
            .expect("commit");
        let err = Loader::new(cache).load("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.identity(), Some("ghost"));
    }

    #[tokio::test]
    async fn project_manifests_are_not_loadable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::new(temp.path());
        let staged = cache.stage("proj").await.expect("stage");
        Manifest::new("proj", "1.0.0")
            .write(staged.path())
            .await
            .expect("manifest");
        cache
            .commit(CacheEntry::new("proj", "1.0.0", "test"), staged)
            .await
            .expect("commit");
        let err = Loader::new(cache).load("proj").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }
}
