//! Purpose: Hold top-level CLI command dispatch for `zerda`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Async commands run on a single current-thread runtime.
//! Invariants: The module runtime is dropped before the process exits, so temporary installs are removed.
//! Invariants: Helpers in `main.rs` remain the source of output envelopes.

use super::*;
use std::future::Future;

use crate::ingest::{IngestConfig, ingest, ingest_file};
use crate::project::{Project, discover, expand_pairs};
use tokio::task::JoinSet;
use tracing::{debug, info};
use zerda::api::{CacheEntry, CacheStore, FilePair, Runtime, parse_in};

pub(super) fn dispatch_command(command: Command, settings: Settings) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "zerda", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Resolve { specs } => {
            let mut values = Vec::with_capacity(specs.len());
            for raw in &specs {
                let specifier = parse_in(raw, &settings.config.base_dir)?;
                values.push(specifier_json(raw, &specifier));
            }
            emit_json(json!({ "specifiers": values }));
            Ok(RunOutcome::ok())
        }
        Command::Run { specs, errors } => block_on(run_stream(specs, errors.into(), settings)),
        Command::Batch {
            specs,
            input,
            output,
            errors,
        } => block_on(run_batch(specs, input, output, errors.into(), settings)),
        Command::Install { specs } => block_on(install(specs, settings)),
        Command::Cache { command } => block_on(cache_command(command, settings)),
    }
}

fn block_on<F>(future: F) -> Result<RunOutcome, Error>
where
    F: Future<Output = Result<RunOutcome, Error>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    let result = runtime.block_on(future);
    // A pending stdin read must not hold the process open after an interrupt.
    runtime.shutdown_background();
    result
}

async fn run_stream(
    specs: Vec<String>,
    policy: ErrorPolicy,
    settings: Settings,
) -> Result<RunOutcome, Error> {
    let project = load_project(&settings, specs.is_empty()).await?;
    let mut config = settings.config.clone();
    let specs = pipeline_specs(specs, project.as_ref(), &mut config)?;
    let runtime = Runtime::open(config).await?;
    let pipeline = runtime.pipeline(&specs).await?;
    debug!(stages = ?pipeline.identities(), "pipeline ready");

    let color_mode = settings.color_mode;
    let mut stdout = tokio::io::stdout();
    let stream = ingest(
        tokio::io::stdin(),
        &pipeline,
        IngestConfig::new(policy),
        &mut stdout,
        |failure| ingest_failure_notice(&failure, "run", "stdin", color_mode),
    );
    let outcome = tokio::select! {
        outcome = stream => outcome?,
        () = shutdown_signal() => {
            info!("interrupted; input closed");
            return Ok(RunOutcome::ok());
        }
    };
    Ok(finish("run", "stdin", &outcome, policy, color_mode))
}

async fn run_batch(
    specs: Vec<String>,
    input: Option<String>,
    output: Option<PathBuf>,
    policy: ErrorPolicy,
    settings: Settings,
) -> Result<RunOutcome, Error> {
    let project = load_project(&settings, specs.is_empty() || input.is_none()).await?;
    let mut config = settings.config.clone();
    let jobs = match (input, output) {
        (Some(input), Some(output)) => {
            let pair = FilePair {
                input,
                output: output.to_string_lossy().into_owned(),
            };
            expand_pairs(&[pair], &config.base_dir)?
        }
        _ => {
            let Some(project) = project.as_ref().filter(|p| !p.manifest.files.is_empty()) else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("no input files given")
                    .with_hint("Pass --input and --output, or list `files` pairs in zerda.json."));
            };
            expand_pairs(&project.manifest.files, &project.dir)?
        }
    };
    let specs = pipeline_specs(specs, project.as_ref(), &mut config)?;
    if jobs.is_empty() {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("no input files matched")
            .with_hint("Check the --input pattern (quote it so the shell does not expand it)."));
    }

    let runtime = Runtime::open(config).await?;
    let pipeline = runtime.pipeline(&specs).await?;
    let ingest_config = IngestConfig::new(policy);
    let color_mode = settings.color_mode;

    let mut tasks = JoinSet::new();
    for job in jobs {
        let pipeline = pipeline.clone();
        tasks.spawn(async move {
            let label = job.input.display().to_string();
            let outcome = ingest_file(
                &job.input,
                &job.output,
                &pipeline,
                ingest_config,
                |failure| ingest_failure_notice(&failure, "batch", &label, color_mode),
            )
            .await?;
            Ok::<_, Error>((job, outcome))
        });
    }

    let mut total = IngestOutcome::default();
    let mut files = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (job, outcome) = joined.map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("batch task failed")
                .with_source(err)
        })??;
        total.absorb(outcome);
        files.push((job, outcome));
    }
    files.sort_by(|a, b| a.0.input.cmp(&b.0.input));

    let values: Vec<Value> = files
        .iter()
        .map(|(job, outcome)| {
            json!({
                "input": job.input.display().to_string(),
                "output": job.output.display().to_string(),
                "records": outcome.records_total,
                "ok": outcome.ok,
                "failed": outcome.failed,
            })
        })
        .collect();
    emit_json(json!({
        "files": values,
        "total": {
            "records": total.records_total,
            "ok": total.ok,
            "failed": total.failed,
        },
    }));
    Ok(finish("batch", "files", &total, policy, color_mode))
}

async fn install(specs: Vec<String>, settings: Settings) -> Result<RunOutcome, Error> {
    let runtime = Runtime::open(settings.config).await?;
    let mut installed = Vec::with_capacity(specs.len());
    for raw in &specs {
        let entry = runtime.resolve(raw).await?;
        let mut value = entry_json(&entry);
        if let Value::Object(map) = &mut value {
            map.insert("specifier".to_string(), json!(raw));
        }
        installed.push(value);
    }
    emit_json(json!({
        "installed": installed,
        "stats": runtime.installer().stats(),
    }));
    Ok(RunOutcome::ok())
}

async fn cache_command(command: CacheCommand, settings: Settings) -> Result<RunOutcome, Error> {
    let cache = CacheStore::new(&settings.config.cache_dir);
    let root = cache.root().display().to_string();
    match command {
        CacheCommand::List => {
            let entries = cache.list().await?;
            let values: Vec<Value> = entries.iter().map(entry_json).collect();
            emit_json(json!({ "cache": root, "entries": values }));
            Ok(RunOutcome::ok())
        }
        CacheCommand::Clear => {
            cache.clear().await?;
            info!(cache = %root, "cache cleared");
            emit_json(json!({ "cleared": root }));
            Ok(RunOutcome::ok())
        }
        CacheCommand::Evict { identities } => {
            let mut evicted = Vec::new();
            let mut missing = Vec::new();
            for identity in identities {
                if cache.evict(&identity).await? {
                    evicted.push(identity);
                } else {
                    missing.push(identity);
                }
            }
            emit_json(json!({ "evicted": evicted, "missing": missing }));
            if missing.is_empty() {
                Ok(RunOutcome::ok())
            } else {
                Ok(RunOutcome::with_code(to_exit_code(ErrorKind::NotFound)))
            }
        }
    }
}

/// Only touch the filesystem for a project file when one was named or is needed.
async fn load_project(settings: &Settings, needed: bool) -> Result<Option<Project>, Error> {
    if settings.project.is_none() && !needed {
        return Ok(None);
    }
    let cwd = settings.config.base_dir.clone();
    discover(settings.project.as_deref(), &cwd).await
}

// Specifiers from the command line win; the project list resolves against the project directory.
fn pipeline_specs(
    specs: Vec<String>,
    project: Option<&Project>,
    config: &mut RuntimeConfig,
) -> Result<Vec<String>, Error> {
    if !specs.is_empty() {
        return Ok(specs);
    }
    let missing = || {
        Error::new(ErrorKind::Usage)
            .with_message("no modules given")
            .with_hint("Pass specifiers (e.g. `zerda run ./double`) or list them under `plugins` in zerda.json.")
    };
    let Some(project) = project else {
        return Err(missing());
    };
    if project.manifest.plugins.is_empty() {
        return Err(missing().with_path(&project.path));
    }
    config.base_dir = project.dir.clone();
    debug!(project = %project.path.display(), "using project plugins");
    Ok(project.manifest.plugins.clone())
}

fn finish(
    cmd: &str,
    input: &str,
    outcome: &IngestOutcome,
    policy: ErrorPolicy,
    color_mode: ColorMode,
) -> RunOutcome {
    if policy == ErrorPolicy::Skip && outcome.failed > 0 {
        ingest_summary_notice(outcome, cmd, input, color_mode);
        return RunOutcome::with_code(1);
    }
    RunOutcome::ok()
}

fn entry_json(entry: &CacheEntry) -> Value {
    json!({
        "identity": entry.identity,
        "version": entry.version,
        "path": entry.install_path.display().to_string(),
        "source": entry.source,
        "temporary": entry.temporary,
        "installed_at": entry.installed_at,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[cfg(test)]
mod tests {
    use super::pipeline_specs;
    use crate::project::Project;
    use std::path::{Path, PathBuf};
    use zerda::api::{ErrorKind, Manifest, RuntimeConfig};

    fn project(dir: &Path, plugins: &[&str]) -> Project {
        let mut manifest = Manifest::default();
        manifest.plugins = plugins.iter().map(|p| p.to_string()).collect();
        Project {
            path: dir.join("zerda.json"),
            dir: dir.to_path_buf(),
            manifest,
        }
    }

    #[test]
    fn command_line_specs_win_over_project() {
        let mut config = RuntimeConfig::new("/work");
        let project = project(Path::new("/proj"), &["./a"]);
        let specs = pipeline_specs(vec!["./b".to_string()], Some(&project), &mut config)
            .expect("specs");
        assert_eq!(specs, vec!["./b"]);
        assert_eq!(config.base_dir, PathBuf::from("/work"));
    }

    #[test]
    fn project_plugins_resolve_from_project_dir() {
        let mut config = RuntimeConfig::new("/work");
        let project = project(Path::new("/proj"), &["./a", "gh:acme/b"]);
        let specs = pipeline_specs(Vec::new(), Some(&project), &mut config).expect("specs");
        assert_eq!(specs, vec!["./a", "gh:acme/b"]);
        assert_eq!(config.base_dir, PathBuf::from("/proj"));

        let empty = self::project(Path::new("/proj"), &[]);
        let err = pipeline_specs(Vec::new(), Some(&empty), &mut config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = pipeline_specs(Vec::new(), None, &mut config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
