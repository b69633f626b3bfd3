// Async directory copy used to stage module sources.
use std::path::{Path, PathBuf};

use crate::core::error::{Error, io_error};

/// Directory names never copied into a staged module.
pub const SKIPPED_DIRS: [&str; 2] = [".git", ".hyperdrives"];

/// Copy the tree under `src` into `dest`, returning the number of files copied.
pub async fn copy_tree(src: &Path, dest: &Path) -> Result<u64, Error> {
    let mut copied = 0u64;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|err| io_error(err, "failed to create directory", &to))?;
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|err| io_error(err, "failed to read directory", &from))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_error(err, "failed to read directory entry", &from))?
        {
            let name = entry.file_name();
            let source = entry.path();
            let target = to.join(&name);
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| io_error(err, "failed to stat entry", &source))?;
            if file_type.is_dir() {
                if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                    continue;
                }
                pending.push((source, target));
            } else {
                tokio::fs::copy(&source, &target)
                    .await
                    .map_err(|err| io_error(err, "failed to copy file", &source))?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::copy_tree;

    #[tokio::test]
    async fn copies_nested_files_and_skips_git() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("lib/deep")).expect("mkdir");
        std::fs::create_dir_all(src.join(".git/objects")).expect("mkdir");
        std::fs::write(src.join("zerda.json"), "{}").expect("write");
        std::fs::write(src.join("lib/deep/x.jq"), ".").expect("write");
        std::fs::write(src.join(".git/HEAD"), "ref").expect("write");

        let dest = temp.path().join("dest");
        let copied = copy_tree(&src, &dest).await.expect("copy");
        assert_eq!(copied, 2);
        assert!(dest.join("lib/deep/x.jq").is_file());
        assert!(!dest.join(".git").exists());
    }
}
