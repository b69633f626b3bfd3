// Git client that shells out to the `git` executable.
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::backend::GitClient;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), Error> {
        debug!(url, dest = %dest.display(), "git clone");
        let output = Command::new(&self.program)
            .args(["clone", "--depth", "1", "--quiet", url])
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Install)
                    .with_message(format!("failed to run `{}`", self.program))
                    .with_hint("Install git or point ZERDA_GIT at a git executable.")
                    .with_source(err)
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::new(ErrorKind::Install)
                .with_message(format!("git clone of {url} failed: {}", stderr.trim()))
                .with_path(dest));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::GitCli;
    use crate::backend::GitClient;
    use crate::core::error::ErrorKind;

    #[tokio::test]
    async fn missing_executable_is_an_install_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = GitCli::new("zerda-no-such-git-binary");
        let err = git
            .clone_repo("https://example.invalid/o/r.git", &temp.path().join("r"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Install);
        assert!(err.hint().is_some());
    }

    #[tokio::test]
    async fn clones_a_local_repository() {
        let Ok(status) = std::process::Command::new("git").arg("--version").output() else {
            return;
        };
        if !status.status.success() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).expect("mkdir");
        std::fs::write(origin.join("zerda.json"), r#"{"name":"cloned"}"#).expect("write");
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(&origin)
                .output()
                .expect("git")
        };
        run(&["init", "--quiet"]);
        run(&["add", "."]);
        let commit = run(&[
            "-c",
            "user.email=t@example.com",
            "-c",
            "user.name=t",
            "commit",
            "--quiet",
            "-m",
            "init",
        ]);
        if !commit.status.success() {
            return;
        }

        let dest = temp.path().join("clone");
        let url = format!("file://{}", origin.display());
        GitCli::default()
            .clone_repo(&url, &dest)
            .await
            .expect("clone");
        assert!(dest.join("zerda.json").is_file());
    }
}
