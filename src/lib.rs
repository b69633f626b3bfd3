//! Purpose: Library crate behind the `zerda` CLI: resolve, install, load and chain modules.
//! Exports: `api` (stable surface), plus the component modules used by tests and the binary.
//! Role: Specifier parsing, the install cache, backends, plugins and the pipeline executor.
//! Invariants: No process-wide state; the session and cache are owned by a `Runtime`.
//! Invariants: Library code logs through `tracing` and never installs a subscriber.
pub mod api;
pub mod backend;
pub mod config;
pub mod core;
pub mod install;
pub mod loader;
pub mod notice;
pub mod pipeline;
pub mod plugin;
pub mod runtime;
