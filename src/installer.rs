//! The install state machine: stage, verify, unpack, publish.
//!
//! One install runs `Staging -> Verifying -> Publishing -> Done`, failing out
//! of any stage without touching already-published files. The staging area is
//! a fresh temp directory owned by the in-flight operation and destroyed on
//! success and failure alike. Publishing is write-to-temp-then-rename inside
//! each destination directory, so a crash mid-publish never leaves a
//! half-written binary observable at the final path.
//!
//! Writers are serialized per package name with an exclusive advisory file
//! lock. A second concurrent install of the same name fails fast with
//! `InstallInProgress` rather than queueing.

use crate::error::{Result, TarponError};
use crate::fetcher::Fetcher;
use crate::manifest::Manifest;
use crate::paths::InstallDirs;
use crate::record::{InstalledRecord, RecordStore};
use crate::verifier::{self, Verification};
use anyhow::Context;
use flate2::read::GzDecoder;
use fs4::FileExt;
use indicatif::MultiProgress;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Install-time options from the packaging front end.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Publish the manifest's completion script alongside the binary.
    pub with_completion: bool,
}

/// Result of a successful install.
#[derive(Debug)]
pub struct InstallOutcome {
    pub record: InstalledRecord,
    /// False for legacy manifests without a checksum; the caller surfaces a
    /// warning.
    pub verified: bool,
    /// True when an existing record satisfied the request and no fetch ran.
    pub already_installed: bool,
}

/// Holds the per-name advisory lock for the duration of one operation.
struct NameLock {
    _file: File,
}

pub struct Installer {
    fetcher: Fetcher,
    store: RecordStore,
    dirs: InstallDirs,
}

impl Installer {
    pub fn new(dirs: InstallDirs) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new()?,
            store: RecordStore::new(&dirs.state_dir),
            dirs,
        })
    }

    /// Fetch, verify and atomically publish one release.
    pub async fn install(
        &self,
        manifest: &Manifest,
        options: &InstallOptions,
        cancel: &CancellationToken,
        progress: Option<&MultiProgress>,
    ) -> Result<InstallOutcome> {
        manifest.validate()?;
        let checksum = manifest.parsed_checksum()?;

        let _lock = self.acquire_lock(&manifest.name)?;

        // Idempotent re-install: same (name, version) with a matching
        // checksum short-circuits without a fetch.
        if let Some(existing) = self.store.read(&manifest.name)?
            && existing.version == manifest.version
            && existing.checksum == manifest.checksum
            && existing.bin_path.exists()
            && (!options.with_completion || existing.completion_path.is_some())
        {
            debug!(name = %manifest.name, version = %manifest.version, "already installed");
            let verified = existing.checksum.is_some();
            return Ok(InstallOutcome {
                record: existing,
                verified,
                already_installed: true,
            });
        }

        // Staging: exclusively owned scratch space, discarded on drop.
        fs::create_dir_all(&self.dirs.state_dir).with_context(|| {
            format!("failed to create state dir: {}", self.dirs.state_dir.display())
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.dirs.state_dir)
            .context("failed to create staging area")?;
        debug!(name = %manifest.name, staging = %staging.path().display(), "staging");

        let archive_path = staging.path().join("archive.tgz");
        self.fetcher
            .fetch(&manifest.url, &archive_path, cancel, progress)
            .await?;

        ensure_active(cancel)?;

        let verification = verifier::verify(&archive_path, checksum.as_ref()).await?;
        if verification == Verification::Unverified {
            warn!(name = %manifest.name, version = %manifest.version,
                "manifest carries no checksum; installing unverified");
        }

        let unpacked = staging.path().join("unpacked");
        unpack(&archive_path, &unpacked)?;

        let binary = locate_entry(&unpacked, Path::new(&manifest.name)).ok_or_else(|| {
            TarponError::MalformedArchive(format!(
                "no executable entry named {} in archive",
                manifest.name
            ))
        })?;

        let completion = if options.with_completion {
            match &manifest.completion {
                Some(rel) => Some(locate_entry(&unpacked, Path::new(rel)).ok_or_else(|| {
                    TarponError::MalformedArchive(format!(
                        "declared completion asset {rel} missing from archive"
                    ))
                })?),
                None => {
                    warn!(name = %manifest.name, "no completion asset declared in manifest");
                    None
                }
            }
        } else {
            None
        };

        ensure_active(cancel)?;

        // Publishing: atomic replace of the binary, then the optional
        // completion script, then the record.
        let previous = self.store.read(&manifest.name)?;

        let bin_path = self.dirs.bin_dir.join(&manifest.name);
        publish_file(&binary, &bin_path, true)?;

        let completion_path = match completion {
            Some(staged) => {
                let dest = self.dirs.completion_dir.join(&manifest.name);
                publish_file(&staged, &dest, false)?;
                Some(dest)
            }
            None => None,
        };

        // An upgrade that drops the completion script must not leave the old
        // version's script behind.
        if let Some(prev) = &previous
            && let Some(stale) = &prev.completion_path
            && completion_path.as_deref() != Some(stale.as_path())
        {
            remove_if_exists(stale)?;
        }

        let record = InstalledRecord {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            checksum: manifest.checksum.clone(),
            bin_path,
            completion_path,
            installed_at: chrono::Utc::now(),
            installer: format!("tarpon/{}", env!("CARGO_PKG_VERSION")),
        };
        self.store.write(&record)?;

        debug!(name = %manifest.name, version = %manifest.version, "install done");
        Ok(InstallOutcome {
            verified: verification.is_verified(),
            already_installed: false,
            record,
        })
    }

    /// Remove the published files and record for a package.
    pub fn uninstall(&self, name: &str) -> Result<InstalledRecord> {
        let _lock = self.acquire_lock(name)?;

        let record = self
            .store
            .read(name)?
            .ok_or_else(|| TarponError::NotInstalled(name.to_string()))?;

        remove_if_exists(&record.bin_path)?;
        if let Some(completion) = &record.completion_path {
            remove_if_exists(completion)?;
        }
        self.store.remove(name)?;

        debug!(name, version = %record.version, "uninstalled");
        Ok(record)
    }

    /// The current installed record, if any.
    pub fn query(&self, name: &str) -> Result<Option<InstalledRecord>> {
        self.store.read(name)
    }

    /// All installed records.
    pub fn installed(&self) -> Result<Vec<InstalledRecord>> {
        self.store.list()
    }

    fn acquire_lock(&self, name: &str) -> Result<NameLock> {
        let lock_dir = self.dirs.state_dir.join("locks");
        fs::create_dir_all(&lock_dir)
            .with_context(|| format!("failed to create lock dir: {}", lock_dir.display()))?;

        let path = lock_dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(NameLock { _file: file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TarponError::InstallInProgress(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TarponError::Cancelled);
    }
    Ok(())
}

/// Decompress and unpack the gzip tarball into the staging area.
fn unpack(archive_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive: {}", archive_path.display()))?;
    let decompressor = GzDecoder::new(file);
    let mut archive = Archive::new(decompressor);
    archive
        .unpack(dest)
        .map_err(|e| TarponError::MalformedArchive(format!("unpack failed: {e}")))?;
    Ok(())
}

/// Locate an in-archive entry: either at the archive root or under a single
/// top-level directory (`pkg-1.0.0/...` style tarballs).
fn locate_entry(unpacked: &Path, rel: &Path) -> Option<PathBuf> {
    let direct = unpacked.join(rel);
    if direct.is_file() {
        return Some(direct);
    }
    let entries = fs::read_dir(unpacked).ok()?;
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            let nested = entry.path().join(rel);
            if nested.is_file() {
                return Some(nested);
            }
        }
    }
    None
}

/// Copy a staged file next to its destination, then rename into place.
fn publish_file(staged: &Path, dest: &Path, executable: bool) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("destination has no parent: {}", dest.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create target dir: {}", dir.display()))?;

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid destination: {}", dest.display()))?;
    let tmp = dir.join(format!(".{file_name}.tmp-{}", std::process::id()));

    fs::copy(staged, &tmp)
        .with_context(|| format!("failed to stage {} for publish", staged.display()))?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))?;
    }

    // Same-directory rename: atomic on the target filesystem
    fs::rename(&tmp, dest)
        .with_context(|| format!("failed to publish {}", dest.display()))?;
    debug!(dest = %dest.display(), "published");
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
