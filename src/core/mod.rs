// Core modules: specifier parsing, manifests, the install cache and error modeling.
pub mod cache;
pub mod error;
pub mod fsutil;
pub mod manifest;
pub mod paths;
pub mod session;
pub mod specifier;
pub mod version;
