//! Installed-record persistence.
//!
//! One JSON record per package name lives under `<state>/records/`. Records
//! are only ever replaced whole, via write-to-temp-then-rename, so a reader
//! sees either the pre-install or the post-install record and never a
//! half-written one.

use crate::error::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted fact of what is currently installed for a package name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub name: String,
    pub version: String,
    /// Checksum verified at install time; None for legacy unverified installs.
    pub checksum: Option<String>,
    pub bin_path: PathBuf,
    pub completion_path: Option<PathBuf>,
    pub installed_at: DateTime<Utc>,
    /// Tool version that performed the install, e.g. `tarpon/0.1.0`.
    pub installer: String,
}

/// On-disk store of installed records, one file per package name.
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("records"),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// The current record for a name, or None when nothing is installed.
    pub fn read(&self, name: &str) -> Result<Option<InstalledRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read record: {}", path.display()))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Whole-record replace via temp file and rename.
    pub fn write(&self, record: &InstalledRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create record dir: {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create temporary record file")?;
        fs::write(tmp.path(), json)?;

        let path = self.record_path(&record.name);
        tmp.persist(&path)
            .with_context(|| format!("failed to publish record: {}", path.display()))?;
        debug!(name = %record.name, version = %record.version, "wrote installed record");
        Ok(())
    }

    /// Remove the record for a name. Returns false when none existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All installed records, sorted by name.
    pub fn list(&self) -> Result<Vec<InstalledRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let contents = fs::read_to_string(&path)?;
                records.push(serde_json::from_str(&contents)?);
            }
        }
        records.sort_by(|a: &InstalledRecord, b: &InstalledRecord| a.name.cmp(&b.name));
        Ok(records)
    }
}
