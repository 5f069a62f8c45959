//! Shared fixtures: build real release tarballs and catalogs in a sandbox.

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tarpon::manifest::Manifest;
use tarpon::paths::InstallDirs;

pub struct Sandbox {
    pub root: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("sandbox tempdir"),
        }
    }

    pub fn dirs(&self) -> InstallDirs {
        InstallDirs::from_prefix(&self.root.path().join("prefix"))
    }

    pub fn bin_path(&self, name: &str) -> PathBuf {
        self.dirs().bin_dir.join(name)
    }

    pub fn completion_path(&self, name: &str) -> PathBuf {
        self.dirs().completion_dir.join(name)
    }

    /// Build a gzip tarball laid out like a real release:
    /// `{name}-{version}/{name}` plus an optional bash-completion script.
    /// Returns the archive path and its sha256 hex digest.
    pub fn make_archive(
        &self,
        name: &str,
        version: &str,
        binary_contents: &[u8],
        with_completion: bool,
    ) -> (PathBuf, String) {
        let archives = self.root.path().join("archives");
        fs::create_dir_all(&archives).unwrap();
        let path = archives.join(format!("{name}-{version}.tgz"));

        let gz = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);

        append_entry(
            &mut builder,
            &format!("{name}-{version}/{name}"),
            binary_contents,
            0o755,
        );
        if with_completion {
            append_entry(
                &mut builder,
                &format!("{name}-{version}/contrib/etc/bash_completion.d/{name}"),
                b"complete -F _stub\n",
                0o644,
            );
        }

        builder.into_inner().unwrap().finish().unwrap();

        let digest = format!("{:x}", Sha256::digest(fs::read(&path).unwrap()));
        (path, digest)
    }

    pub fn manifest_for(
        &self,
        name: &str,
        version: &str,
        archive: &Path,
        sha256: Option<&str>,
        with_completion: bool,
    ) -> Manifest {
        Manifest {
            name: name.to_string(),
            version: version.to_string(),
            url: format!("file://{}", archive.display()),
            checksum: sha256.map(|s| format!("sha256:{s}")),
            completion: with_completion
                .then(|| format!("contrib/etc/bash_completion.d/{name}")),
        }
    }

    /// Build archive + manifest in one step.
    pub fn release(&self, name: &str, version: &str, binary_contents: &[u8]) -> Manifest {
        let (archive, sha) = self.make_archive(name, version, binary_contents, true);
        self.manifest_for(name, version, &archive, Some(&sha), true)
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    contents: &[u8],
    mode: u32,
) {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, path, contents).unwrap();
}
