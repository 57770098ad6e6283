//! Staging, promotion and recovery of component installs.
//!
//! - [`Installer::apply`] unpacks a verified artifact next to the target and
//!   swaps it in with renames, returning an [`AppliedInstall`] receipt
//! - [`Installer::recover`] cleans up after interrupted runs
//! - [`tree_digest`] fingerprints an installed tree

mod archive;
mod digest;
mod fs;
mod installer;

pub use archive::stage_artifact;
pub use digest::tree_digest;
pub use fs::{Filesystem, StdFilesystem};
pub use installer::{AppliedInstall, Installer, Recovery};
