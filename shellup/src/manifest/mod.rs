//! Locally persisted component state.
//!
//! - [`ManifestStore`] loads and atomically saves the [`ManifestRecord`]
//! - [`ManifestLock`] serialises invocations that share one manifest file

mod lock;
mod store;

pub use lock::{LockMode, ManifestLock};
pub use store::{ManifestRecord, ManifestStore, MANIFEST_FILENAME, MANIFEST_SCHEMA_VERSION};
