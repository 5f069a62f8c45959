//! Library interface for the tarpon release-artifact installer.
//!
//! The CLI in `main.rs` is a thin front end over these modules; integration
//! tests drive them directly.

pub mod catalog;
pub mod error;
pub mod fetcher;
pub mod installer;
pub mod manifest;
pub mod paths;
pub mod record;
pub mod resolver;
pub mod verifier;

pub use catalog::Catalog;
pub use error::{Result, TarponError};
pub use installer::{InstallOptions, InstallOutcome, Installer};
pub use manifest::Manifest;
pub use paths::InstallDirs;
pub use record::InstalledRecord;
pub use resolver::VersionConstraint;
