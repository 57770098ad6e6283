//! Shellup - install and update engine for Noctalia shell components
//!
//! A component (the `shell` itself, helper binaries, plugins) is published
//! in a registry feed as a list of releases. The engine resolves which
//! release should be present, downloads and verifies it, and swaps it into
//! place atomically, recording the result in a local manifest.
//!
//! # Modules
//!
//! - [`manifest`] - persisted component state and the invocation lock
//! - [`registry`] - feed parsing and version resolution
//! - [`fetch`] - verified artifact downloads
//! - [`install`] - staging, promotion, rollback and recovery
//! - [`engine`] - `install`, `update`, `update --all` and `status`
//! - [`config`] - INI configuration
//! - [`logging`] - tracing subscriber setup for the binary
//!
//! # Example
//!
//! ```no_run
//! use shellup::config::EngineConfig;
//! use shellup::engine::UpdateEngine;
//!
//! let config = EngineConfig::load(None)?;
//! let engine = UpdateEngine::from_config(config)?;
//! let report = engine.install("shell", None)?;
//! println!("{}: {}", report.name, report.outcome);
//! # Ok::<(), shellup::EngineError>(())
//! ```

pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod install;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod retry;

pub use component::{ArtifactFormat, ComponentRecord, ReleaseDescriptor};
pub use engine::UpdateEngine;
pub use error::{EngineError, EngineResult, ErrorKind};
