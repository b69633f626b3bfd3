//! Purpose: Runtime configuration: well-known directories, backend endpoints and env overrides.
//! Exports: `RuntimeConfig`, `default_cache_dir`, `default_registry_dir`, `DEFAULT_GIT_BASE`, env names.
//! Role: Single source of default paths for the library and the `zerda` binary.
//! Invariants: The default cache root is `~/.zerda/runtime`, shared by every invocation.
//! Invariants: Relative paths from the environment resolve against the config's base directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::core::paths::{absolutize, home_dir};

pub const ENV_CACHE_DIR: &str = "ZERDA_CACHE_DIR";
pub const ENV_TEMP_DIR: &str = "ZERDA_TEMP_DIR";
pub const ENV_REGISTRY: &str = "ZERDA_REGISTRY";
pub const ENV_SEEDS: &str = "ZERDA_SEEDS";
pub const ENV_GIT_BASE: &str = "ZERDA_GIT_BASE";
pub const ENV_GIT: &str = "ZERDA_GIT";
pub const ENV_LOG: &str = "ZERDA_LOG";

pub const DEFAULT_GIT_BASE: &str = "https://github.com";
pub const DEFAULT_GIT_PROGRAM: &str = "git";
pub const REPLICA_DIR_NAME: &str = ".hyperdrives";

pub fn default_cache_dir() -> PathBuf {
    home_dir().join(".zerda").join("runtime")
}

pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("zerda").join("runtime")
}

pub fn default_registry_dir() -> PathBuf {
    home_dir().join(".zerda").join("registry")
}

pub fn default_seed_dir() -> PathBuf {
    home_dir().join(".zerda").join("seeds")
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeConfig {
    /// Directory relative specifiers resolve against.
    pub base_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub registry_dir: PathBuf,
    /// Replica storage; archives land in `<replica_dir>/<public-key>`.
    pub replica_dir: PathBuf,
    pub seeds: Vec<PathBuf>,
    pub git_base: String,
    pub git_program: String,
    pub temporary: bool,
}

impl RuntimeConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            replica_dir: base_dir.join(REPLICA_DIR_NAME),
            base_dir,
            cache_dir: default_cache_dir(),
            temp_dir: default_temp_dir(),
            registry_dir: default_registry_dir(),
            seeds: vec![default_seed_dir()],
            git_base: DEFAULT_GIT_BASE.to_string(),
            git_program: DEFAULT_GIT_PROGRAM.to_string(),
            temporary: false,
        }
    }

    /// Defaults for the working directory, overridden by `ZERDA_*` variables.
    pub fn from_env() -> Self {
        let base = std::env::current_dir().unwrap_or_default();
        Self::new(base).with_overrides(|name| std::env::var_os(name))
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let path = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .map(|value| absolutize(&self.base_dir, Path::new(&value)))
        };
        if let Some(dir) = path(ENV_CACHE_DIR) {
            self.cache_dir = dir;
        }
        if let Some(dir) = path(ENV_TEMP_DIR) {
            self.temp_dir = dir;
        }
        if let Some(dir) = path(ENV_REGISTRY) {
            self.registry_dir = dir;
        }
        if let Some(seeds) = lookup(ENV_SEEDS).filter(|value| !value.is_empty()) {
            self.seeds = std::env::split_paths(&seeds)
                .filter(|seed| !seed.as_os_str().is_empty())
                .map(|seed| absolutize(&self.base_dir, &seed))
                .collect();
        }
        if let Some(base) = lookup(ENV_GIT_BASE).and_then(|value| value.into_string().ok())
            && !base.is_empty()
        {
            self.git_base = base.trim_end_matches('/').to_string();
        }
        if let Some(program) = lookup(ENV_GIT).and_then(|value| value.into_string().ok())
            && !program.is_empty()
        {
            self.git_program = program;
        }
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry_dir = dir.into();
        self
    }

    pub fn with_replica_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.replica_dir = dir.into();
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<PathBuf>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }
}
