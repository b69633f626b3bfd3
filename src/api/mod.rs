//! Purpose: Define the public Rust API boundary for zerda.
//! Exports: Runtime facade, specifiers, cache entries, plugins, backends and errors.
//! Role: Additive-only surface used by the CLI and embedders.
//! Invariants: Everything the binary needs is reachable from here.

pub use crate::backend::{
    ContentStore, DirectoryRegistry, GitCli, GitClient, LocalReplicaStore, PackageRegistry,
    Replica, Snapshot,
};
pub use crate::config::RuntimeConfig;
pub use crate::core::cache::{CacheEntry, CacheStore, TempEntry};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::manifest::{FilePair, MANIFEST_FILE, Manifest};
pub use crate::core::specifier::{ModuleSpecifier, parse, parse_in};
pub use crate::install::{Installer, StatsSnapshot};
pub use crate::loader::Loader;
pub use crate::pipeline::{Pipeline, frame_line};
pub use crate::plugin::{Plugin, StageOutput, function_name};
pub use crate::runtime::Runtime;
