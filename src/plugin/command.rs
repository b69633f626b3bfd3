// Plugin whose callable is an external program speaking JSON over stdin/stdout.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::error::{Error, ErrorKind};
use crate::plugin::{Plugin, StageOutput};

/// Runs `program args...` in the module directory once per call.
///
/// The input sequence is written to stdin as one JSON array followed by a newline. Stdout
/// must hold a single JSON document, or one JSON document per line.
#[derive(Clone, Debug)]
pub struct CommandPlugin {
    identity: String,
    program: PathBuf,
    args: Vec<String>,
    dir: PathBuf,
}

impl CommandPlugin {
    pub fn new(identity: &str, program: PathBuf, args: Vec<String>, dir: &Path) -> Self {
        Self {
            identity: identity.to_string(),
            program,
            args,
            dir: dir.to_path_buf(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn stage_error(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Stage)
            .with_message(message)
            .with_identity(&self.identity)
            .with_path(&self.program)
    }
}

#[async_trait]
impl Plugin for CommandPlugin {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
        let payload = serde_json::to_vec(&Value::Array(input)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode stage input")
                .with_source(err)
        })?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.stage_error("failed to start module command").with_source(err))?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // The program may exit without draining stdin; its exit status decides.
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.shutdown().await;
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output
            .map_err(|err| self.stage_error("failed to wait for module command").with_source(err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut err = self.stage_error(format!("module command exited with {}", output.status));
            if !stderr.trim().is_empty() {
                err = err.with_hint(stderr.trim().to_string());
            }
            return Err(err);
        }
        parse_output(&output.stdout).map_err(|message| self.stage_error(message))
    }
}

fn parse_output(stdout: &[u8]) -> Result<StageOutput, String> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(StageOutput::Sequence(Vec::new()));
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(StageOutput::from_value(value));
    }
    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line)
            .map_err(|err| format!("module command wrote invalid JSON on line {}: {err}", idx + 1))?;
        values.push(value);
    }
    Ok(StageOutput::Sequence(values))
}
