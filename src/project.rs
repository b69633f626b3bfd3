//! Purpose: Find the project file and expand its batch file pairs into concrete jobs.
//! Exports: `Project`, `BatchJob`, `discover`, `expand_pairs`.
//! Role: Binary-side source of plugin lists and file pairs when flags do not provide them.
//! Invariants: Relative plugin paths, inputs and outputs resolve against the project directory.
//! Invariants: Jobs are sorted by input path; a pattern that matches nothing yields no jobs.
//! Invariants: Outputs mirror each input below the pattern's literal directory; no two jobs share one.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zerda::api::{Error, ErrorKind, FilePair, MANIFEST_FILE, Manifest};

#[derive(Clone, Debug)]
pub struct Project {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub manifest: Manifest,
}

/// One input file and the file its records are written to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// `explicit` must exist; otherwise the nearest `zerda.json` at or above `cwd` is used.
pub async fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Option<Project>, Error> {
    if let Some(path) = explicit {
        let path = cwd.join(path);
        if !is_file(&path).await {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("project file not found")
                .with_path(&path)
                .with_hint("Pass an existing zerda.json to --project."));
        }
        return load(path).await.map(Some);
    }
    for dir in cwd.ancestors() {
        let candidate = dir.join(MANIFEST_FILE);
        if is_file(&candidate).await {
            return load(candidate).await.map(Some);
        }
    }
    Ok(None)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

async fn load(path: PathBuf) -> Result<Project, Error> {
    let text = tokio::fs::read_to_string(&path).await.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read project file")
            .with_path(&path)
            .with_source(err)
    })?;
    let manifest = Manifest::parse(&text, &path)?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    debug!(project = %path.display(), plugins = manifest.plugins.len(), "project file loaded");
    Ok(Project {
        path,
        dir,
        manifest,
    })
}

pub fn expand_pairs(pairs: &[FilePair], base: &Path) -> Result<Vec<BatchJob>, Error> {
    let mut jobs = Vec::new();
    for pair in pairs {
        let pattern = base.join(&pair.input);
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid input pattern `{}`", pair.input))
                .with_hint("Use glob syntax such as `data/*.jsonl`.")
                .with_source(err)
        })?;
        let output_dir = base.join(&pair.output);
        let root = literal_prefix(Path::new(pattern.as_ref()));
        let before = jobs.len();
        for entry in paths {
            let input = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read input match")
                    .with_path(err.path())
                    .with_source(err.into_error())
            })?;
            if !input.is_file() {
                continue;
            }
            let relative = match input.strip_prefix(&root) {
                Ok(relative) if relative.file_name().is_some() => relative.to_path_buf(),
                _ => match input.file_name() {
                    Some(name) => PathBuf::from(name),
                    None => continue,
                },
            };
            jobs.push(BatchJob {
                output: output_dir.join(relative),
                input,
            });
        }
        if jobs.len() == before {
            warn!(pattern = %pair.input, "input pattern matched no files");
        }
    }
    jobs.sort_by(|a, b| a.input.cmp(&b.input));
    jobs.dedup();

    {
        let mut writers: HashMap<&Path, &Path> = HashMap::new();
        for job in &jobs {
            if let Some(first) = writers.insert(&job.output, &job.input) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "`{}` and `{}` would both write `{}`",
                        first.display(),
                        job.input.display(),
                        job.output.display()
                    ))
                    .with_hint("Give each `files` pair its own output directory."));
            }
        }
    }
    Ok(jobs)
}

// Directory part of a pattern before the first glob component; outputs mirror paths below it.
fn literal_prefix(pattern: &Path) -> PathBuf {
    let mut prefix = PathBuf::new();
    let mut components = pattern.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[']) {
            break;
        }
        prefix.push(component);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{BatchJob, discover, expand_pairs};
    use std::path::Path;
    use zerda::api::{ErrorKind, FilePair};

    #[tokio::test]
    async fn nearest_project_file_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(
            temp.path().join("zerda.json"),
            r#"{"plugins":["./double"]}"#,
        )
        .expect("write");

        let project = discover(None, &nested)
            .await
            .expect("discover")
            .expect("project");
        assert_eq!(project.dir, temp.path());
        assert_eq!(project.manifest.plugins, vec!["./double".to_string()]);

        let err = discover(Some(Path::new("missing.json")), temp.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn pairs_expand_to_sorted_jobs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let data = temp.path().join("data");
        std::fs::create_dir_all(data.join("nested.jsonl")).expect("mkdir");
        std::fs::write(data.join("b.jsonl"), "1\n").expect("write");
        std::fs::write(data.join("a.jsonl"), "2\n").expect("write");
        std::fs::write(data.join("skip.txt"), "3\n").expect("write");

        let pairs = vec![
            FilePair {
                input: "data/*.jsonl".to_string(),
                output: "out".to_string(),
            },
            FilePair {
                input: "none/*.jsonl".to_string(),
                output: "out".to_string(),
            },
        ];
        let jobs = expand_pairs(&pairs, temp.path()).expect("expand");
        assert_eq!(
            jobs,
            vec![
                BatchJob {
                    input: data.join("a.jsonl"),
                    output: temp.path().join("out/a.jsonl"),
                },
                BatchJob {
                    input: data.join("b.jsonl"),
                    output: temp.path().join("out/b.jsonl"),
                },
            ]
        );
    }

    #[test]
    fn nested_matches_mirror_their_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        for dir in ["data/a", "data/b"] {
            std::fs::create_dir_all(temp.path().join(dir)).expect("mkdir");
            std::fs::write(temp.path().join(dir).join("x.jsonl"), "1\n").expect("write");
        }
        let pairs = vec![FilePair {
            input: "data/*/x.jsonl".to_string(),
            output: "out".to_string(),
        }];
        let jobs = expand_pairs(&pairs, temp.path()).expect("expand");
        let outputs: Vec<_> = jobs.iter().map(|job| job.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                temp.path().join("out/a/x.jsonl"),
                temp.path().join("out/b/x.jsonl"),
            ]
        );
    }

    #[test]
    fn shared_outputs_are_usage_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        for dir in ["left", "right"] {
            std::fs::create_dir_all(temp.path().join(dir)).expect("mkdir");
            std::fs::write(temp.path().join(dir).join("x.jsonl"), "1\n").expect("write");
        }
        let pairs = vec![
            FilePair {
                input: "left/*.jsonl".to_string(),
                output: "out".to_string(),
            },
            FilePair {
                input: "right/*.jsonl".to_string(),
                output: "out".to_string(),
            },
        ];
        let err = expand_pairs(&pairs, temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap_or_default().contains("x.jsonl"));
    }

    #[test]
    fn bad_patterns_are_usage_errors() {
        let pairs = vec![FilePair {
            input: "data/[".to_string(),
            output: "out".to_string(),
        }];
        let err = expand_pairs(&pairs, Path::new("/tmp")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
