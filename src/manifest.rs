//! Release manifests: one record per installable release.
//!
//! A manifest is the declarative description of a single release: where the
//! archive lives, what digest it must hash to, and which in-archive assets get
//! published. Manifests are pure data; all I/O lives in the fetcher and
//! installer.

use crate::error::{Result, TarponError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One resolvable release record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    /// Absolute URL of the release tarball.
    pub url: String,
    /// Algorithm-tagged digest, e.g. `sha256:<64 hex chars>`. Absent only on
    /// legacy records, which install unverified with a warning.
    #[serde(default)]
    pub checksum: Option<String>,
    /// In-archive relative path of an optional shell-completion script.
    #[serde(default)]
    pub completion: Option<String>,
}

impl Manifest {
    /// Validate the record shape. No side effects.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return self.invalid("name is empty");
        }
        // Names become record and lock file names
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._+-@".contains(c))
        {
            return self.invalid("name contains unsupported characters");
        }
        if self.version.trim().is_empty() {
            return self.invalid("version is empty");
        }
        match reqwest::Url::parse(&self.url) {
            Ok(url) if !url.cannot_be_a_base() => {}
            _ => return self.invalid(&format!("not an absolute URL: {}", self.url)),
        }
        if let Some(raw) = &self.checksum
            && let Err(e) = Checksum::parse(raw)
        {
            return self.invalid(&e.to_string());
        }
        Ok(())
    }

    /// Parsed checksum, or None for legacy records.
    pub fn parsed_checksum(&self) -> Result<Option<Checksum>> {
        match &self.checksum {
            Some(raw) => Ok(Some(Checksum::parse(raw)?)),
            None => Ok(None),
        }
    }

    pub fn semver(&self) -> Version {
        Version::parse(&self.version)
    }

    fn invalid(&self, reason: &str) -> Result<()> {
        Err(TarponError::InvalidManifest {
            name: self.name.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Digest algorithms the verifier knows how to compute.
///
/// Adding an algorithm means adding a variant here and an arm in the
/// verifier's digest dispatch; call sites carry `Checksum` and never name an
/// algorithm directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Expected hex-digest length for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
        }
    }
}

/// An algorithm-tagged expected digest, parsed from `algorithm:hexdigest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub hex: String,
}

impl Checksum {
    pub fn parse(raw: &str) -> Result<Self> {
        let (algo, hex) = raw.split_once(':').ok_or_else(|| {
            anyhow::anyhow!("checksum missing algorithm tag (want algorithm:hexdigest): {raw}")
        })?;

        let algorithm = match algo {
            "sha256" => ChecksumAlgorithm::Sha256,
            other => return Err(anyhow::anyhow!("unsupported checksum algorithm: {other}").into()),
        };

        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!(
                "malformed {} digest: expected {} hex chars",
                algorithm.as_str(),
                algorithm.hex_len()
            )
            .into());
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, computed_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(computed_hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

/// A version string with semantic ordering.
///
/// Dot components are compared numerically, missing components count as zero,
/// and equal numeric parts fall back to byte ordering of the raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    raw: String,
    parts: Vec<u32>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let parts = raw
            .split('.')
            .filter_map(|s| s.parse::<u32>().ok())
            .collect();
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in 0..self.parts.len().max(other.parts.len()) {
            let a = self.parts.get(i).unwrap_or(&0);
            let b = other.parts.get(i).unwrap_or(&0);
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
