//! Catalog loading: the append-only list of release manifests per package.
//!
//! The catalog is a JSON array of manifest records, loaded once per invocation
//! and immutable afterwards. Re-released versions are legal as long as the
//! checksum is unchanged (the later declaration wins); the same `(name,
//! version)` with a different checksum is a catalog-integrity error, never a
//! silent pick.

use crate::error::{Result, TarponError};
use crate::manifest::Manifest;
use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Non-fatal condition observed while loading a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogWarning {
    DuplicateVersion { name: String, version: String },
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogWarning::DuplicateVersion { name, version } => {
                write!(f, "{name} {version} declared more than once; using the later record")
            }
        }
    }
}

/// Loaded, validated manifests grouped per package name.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: HashMap<String, Vec<Manifest>>,
    warnings: Vec<CatalogWarning>,
}

impl Catalog {
    /// Read and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog: {}", path.display()))?;
        let manifests: Vec<Manifest> = serde_json::from_str(&contents)?;
        debug!(count = manifests.len(), path = %path.display(), "loaded catalog");
        Self::from_manifests(manifests)
    }

    /// Build a catalog from manifests in declaration order.
    pub fn from_manifests(manifests: Vec<Manifest>) -> Result<Self> {
        let mut packages: HashMap<String, Vec<Manifest>> = HashMap::new();
        let mut warnings = Vec::new();

        for manifest in manifests {
            manifest.validate()?;
            let releases = packages.entry(manifest.name.clone()).or_default();

            if let Some(existing) = releases.iter_mut().find(|m| m.version == manifest.version) {
                if existing.checksum != manifest.checksum {
                    return Err(TarponError::CatalogIntegrity {
                        name: manifest.name,
                        version: manifest.version,
                    });
                }
                warnings.push(CatalogWarning::DuplicateVersion {
                    name: manifest.name.clone(),
                    version: manifest.version.clone(),
                });
                // Later-declared record wins
                *existing = manifest;
            } else {
                releases.push(manifest);
            }
        }

        for releases in packages.values_mut() {
            releases.sort_by_key(|m| m.semver());
        }

        Ok(Self { packages, warnings })
    }

    /// All releases of a package, sorted oldest to newest.
    pub fn manifests_for(&self, name: &str) -> Option<&[Manifest]> {
        self.packages.get(name).map(|v| v.as_slice())
    }

    /// Package names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.packages.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn warnings(&self) -> &[CatalogWarning] {
        &self.warnings
    }
}
