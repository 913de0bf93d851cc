//! Packaging pipeline for MCP server extensions.
//!
//! Turns a server project described by `extension.toml` into a single
//! archive the assistant host can install:
//!
//! 1. [`resolve`] locks the declared dependencies against a local
//!    [`index::PackageIndex`] into `extension.lock`.
//! 2. [`environment`] installs the locked packages and the server's files
//!    into an isolated directory.
//! 3. [`bundle`] vendors the libraries next to the server.
//! 4. [`package`] writes `manifest.json` and zips the result.
//!
//! [`host`] renders the host-side launch configuration for a server
//! installed from such an archive.

pub mod bundle;
pub mod cmd;
pub mod environment;
pub mod error;
pub mod fsutil;
pub mod host;
pub mod index;
pub mod lockfile;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod resolve;

pub use error::Error;
pub use pipeline::{LockMode, Pipeline};
