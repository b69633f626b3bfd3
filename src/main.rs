//! Purpose: `zerda` CLI entry point: resolve modules and stream JSON records through them.
//! Role: Binary crate root; parses args, builds the runtime config, dispatches commands.
//! Invariants: Command results go to stdout as JSON; record streams are one JSON line per record.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod ingest;
mod project;

use ingest::{ErrorPolicy, IngestFailure, IngestOutcome};
use zerda::api::{Error, ErrorKind, ModuleSpecifier, RuntimeConfig, to_exit_code};
use zerda::config::ENV_LOG;
use zerda::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let settings = Settings {
        config: cli.runtime_config(),
        project: cli.project,
        color_mode,
    };

    command_dispatch::dispatch_command(cli.command, settings)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

/// `--clear-cache` is kept as a top-level alias for `cache clear` when it is the first argument.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    for (index, arg) in args.into_iter().enumerate() {
        match arg.to_str() {
            Some("---help") => out.push(OsString::from("--help")),
            Some("---version") => out.push(OsString::from("--version")),
            Some("--clear-cache") if index == 1 => {
                out.push(OsString::from("cache"));
                out.push(OsString::from("clear"));
            }
            _ => out.push(arg),
        }
    }
    out
}

#[derive(Parser)]
#[command(
    name = "zerda",
    version,
    about = "Resolve modules by specifier and chain them into JSON pipelines",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"A specifier names a module: a local path, a registry package (`name@range`),
a git repository (`github:owner/repo`) or an archive (`hyper://<version>@<key>`).
Modules are installed once into a shared cache and reused by later runs.
"#,
    after_help = r#"EXAMPLES
  $ echo 3 | zerda run ./double ./increment     # prints [7]
  $ zerda batch ./clean --input 'data/*.jsonl' --output out
  $ zerda install gh:acme/to-upper
  $ zerda cache list

LEARN MORE
  $ zerda <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "ZERDA_CACHE_DIR",
        help = "Cache root (default: ~/.zerda/runtime)",
        value_hint = ValueHint::DirPath
    )]
    cache_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "ZERDA_TEMP_DIR",
        help = "Root for per-session scratch directories",
        value_hint = ValueHint::DirPath
    )]
    temp_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "ZERDA_REGISTRY",
        help = "Package registry mirror laid out as <name>/<version>/",
        value_hint = ValueHint::DirPath
    )]
    registry: Option<PathBuf>,
    #[arg(
        long = "seed",
        global = true,
        help = "Archive seed directory (repeatable; replaces ZERDA_SEEDS)",
        value_hint = ValueHint::DirPath
    )]
    seeds: Vec<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "ZERDA_GIT_BASE",
        help = "Base URL for github: specifiers"
    )]
    git_base: Option<String>,
    #[arg(
        long,
        global = true,
        env = "ZERDA_GIT",
        help = "git executable used for clones"
    )]
    git: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Project file (default: nearest zerda.json)",
        value_hint = ValueHint::FilePath
    )]
    project: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Remove modules installed by this run when it exits"
    )]
    temporary: bool,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Environment defaults first, then flags.
    fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::from_env();
        let base = config.base_dir.clone();
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = base.join(dir);
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = base.join(dir);
        }
        if let Some(dir) = &self.registry {
            config.registry_dir = base.join(dir);
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds.iter().map(|seed| base.join(seed)).collect();
        }
        if let Some(git_base) = &self.git_base {
            config.git_base = git_base.trim_end_matches('/').to_string();
        }
        if let Some(git) = &self.git {
            config.git_program = git.clone();
        }
        config.with_temporary(self.temporary)
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, ValueEnum)]
enum ErrorPolicyCli {
    Stop,
    Skip,
}

impl From<ErrorPolicyCli> for ErrorPolicy {
    fn from(policy: ErrorPolicyCli) -> Self {
        match policy {
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Stream stdin records through a pipeline of modules",
        long_about = r#"Resolve each specifier (installing it if needed), then apply the modules in order
to every stdin line. Each line is one record: JSON is parsed, anything else becomes a
string, and non-array values are wrapped in a one-element array. Output is one JSON line
per record, in input order.

Without specifiers, the `plugins` list of the project file is used."#,
        after_help = r#"EXAMPLES
  $ echo 3 | zerda run ./double ./increment
  $ zerda run gh:acme/clean --errors skip < records.jsonl

NOTES
  - `--errors stop` (default) exits on the first failing record
  - `--errors skip` reports each failure on stderr and keeps going"#
    )]
    Run {
        #[arg(help = "Module specifiers, applied left to right")]
        specs: Vec<String>,
        #[arg(
            long,
            short = 'e',
            value_enum,
            default_value = "stop",
            help = "What to do with a failing record: stop|skip"
        )]
        errors: ErrorPolicyCli,
    },
    #[command(
        about = "Process files matched by a glob through a pipeline",
        long_about = r#"Each matched input file is processed as a whole, records in order, and written
to <output>/<file name>. Files run concurrently.

Without --input/--output, the `files` pairs of the project file are used; without
specifiers, its `plugins` list."#,
        after_help = r#"EXAMPLES
  $ zerda batch ./clean --input 'data/*.jsonl' --output out
  $ zerda batch --project pipelines/zerda.json"#
    )]
    Batch {
        #[arg(help = "Module specifiers, applied left to right")]
        specs: Vec<String>,
        #[arg(long, help = "Glob of input files", requires = "output")]
        input: Option<String>,
        #[arg(
            long,
            help = "Directory for output files",
            requires = "input",
            value_hint = ValueHint::DirPath
        )]
        output: Option<PathBuf>,
        #[arg(
            long,
            short = 'e',
            value_enum,
            default_value = "stop",
            help = "What to do with a failing record: stop|skip"
        )]
        errors: ErrorPolicyCli,
    },
    #[command(
        arg_required_else_help = true,
        about = "Install modules into the cache",
        after_help = r#"EXAMPLES
  $ zerda install ./double
  $ zerda install left-pad@^1.3.0 gh:acme/to-upper"#
    )]
    Install {
        #[arg(required = true, help = "Module specifiers")]
        specs: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Classify specifiers without installing anything"
    )]
    Resolve {
        #[arg(required = true, help = "Module specifiers")]
        specs: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Inspect and maintain the module cache"
    )]
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ zerda completion bash > ~/.local/share/bash-completion/completions/zerda
  $ zerda completion zsh > ~/.zfunc/_zerda"#
    )]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "List installed modules")]
    List,
    #[command(about = "Remove every installed module (alias: --clear-cache)")]
    Clear,
    #[command(arg_required_else_help = true, about = "Remove installed modules by identity")]
    Evict {
        #[arg(required = true, help = "Module identities, e.g. `double` or `@acme/to-upper`")]
        identities: Vec<String>,
    },
}

/// Everything a command needs besides its own arguments.
struct Settings {
    config: RuntimeConfig,
    project: Option<PathBuf>,
    color_mode: ColorMode,
}

fn specifier_json(raw: &str, specifier: &ModuleSpecifier) -> Value {
    let mut inner = Map::new();
    inner.insert("raw".to_string(), json!(raw));
    inner.insert("scheme".to_string(), json!(specifier.scheme()));
    inner.insert("canonical".to_string(), json!(specifier.to_string()));
    match specifier {
        ModuleSpecifier::LocalFile { path } | ModuleSpecifier::LocalDirectory { path } => {
            inner.insert("path".to_string(), json!(path.display().to_string()));
        }
        ModuleSpecifier::RegistryPackage { name, constraint } => {
            inner.insert("name".to_string(), json!(name));
            inner.insert("constraint".to_string(), json!(constraint));
        }
        ModuleSpecifier::GitHosted { owner, repo } => {
            inner.insert("owner".to_string(), json!(owner));
            inner.insert("repo".to_string(), json!(repo));
        }
        ModuleSpecifier::ContentAddressed {
            public_key,
            version,
        } => {
            inner.insert("public_key".to_string(), json!(public_key));
            inner.insert("version".to_string(), json!(version));
        }
    }
    Value::Object(inner)
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => err.with_hint(
            "I/O error. Check the path, permissions, and disk space, or point --cache-dir elsewhere.",
        ),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with ZERDA_LOG=debug and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (input: {})", notice.message, notice.input);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn ingest_failure_notice(failure: &IngestFailure, cmd: &str, input: &str, color_mode: ColorMode) {
    let mut details = Map::new();
    details.insert("record".to_string(), json!(failure.index));
    details.insert("line".to_string(), json!(failure.line));
    details.insert("error_kind".to_string(), json!(failure.error_kind));
    if let Some(stage) = failure.stage {
        details.insert("stage".to_string(), json!(stage));
    }
    if let Some(identity) = &failure.identity {
        details.insert("identity".to_string(), json!(identity));
    }
    if let Some(snippet) = &failure.snippet {
        details.insert("snippet".to_string(), json!(snippet));
    }
    let notice = Notice {
        kind: "skip".to_string(),
        time: notice_time_now().unwrap_or_else(|| "unknown".to_string()),
        cmd: cmd.to_string(),
        input: input.to_string(),
        message: format!("Skipped record {}: {}.", failure.index, failure.message),
        details,
    };
    emit_notice(&notice, color_mode);
}

fn ingest_summary_notice(outcome: &IngestOutcome, cmd: &str, input: &str, color_mode: ColorMode) {
    let mut details = Map::new();
    details.insert("total".to_string(), json!(outcome.records_total));
    details.insert("ok".to_string(), json!(outcome.ok));
    details.insert("failed".to_string(), json!(outcome.failed));
    let notice = Notice {
        kind: "ingest_summary".to_string(),
        time: notice_time_now().unwrap_or_else(|| "unknown".to_string()),
        cmd: cmd.to_string(),
        input: input.to_string(),
        message: format!(
            "Finished with {} skipped record{}.",
            outcome.failed,
            if outcome.failed == 1 { "" } else { "s" }
        ),
        details,
    };
    emit_notice(&notice, color_mode);
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::SpecifierParse => "invalid specifier".to_string(),
        ErrorKind::VersionConstraint => "version constraint not met".to_string(),
        ErrorKind::Install => "install failed".to_string(),
        ErrorKind::Manifest => "invalid manifest".to_string(),
        ErrorKind::Load => "load failed".to_string(),
        ErrorKind::Stage => "pipeline stage failed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(specifier) = err.specifier() {
        inner.insert("specifier".to_string(), json!(specifier));
    }
    if let Some(identity) = err.identity() {
        inner.insert("identity".to_string(), json!(identity));
    }
    if let Some(stage) = err.stage() {
        inner.insert("stage".to_string(), json!(stage));
    }
    if let Some(required) = err.required() {
        inner.insert("required".to_string(), json!(required));
    }
    if let Some(actual) = err.actual() {
        inner.insert("actual".to_string(), json!(actual));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(specifier) = err.specifier() {
        lines.push(format!(
            "{} {specifier}",
            colorize_label("specifier:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(identity) = err.identity() {
        let label = colorize_label("module:", use_color, AnsiColor::Yellow);
        match err.stage() {
            Some(stage) => lines.push(format!("{label} {identity} (stage {stage})")),
            None => lines.push(format!("{label} {identity}")),
        }
    }
    if let (Some(required), Some(actual)) = (err.required(), err.actual()) {
        lines.push(format!(
            "{} required {required}, found {actual}",
            colorize_label("version:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `zerda --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "zerda") else {
        return "Try `zerda --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `zerda --help`.".to_string();
    }
    format!("Try `zerda {} --help`.", parts.join(" "))
}
