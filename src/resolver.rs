//! Version resolution against a loaded catalog.

use crate::catalog::Catalog;
use crate::error::{Result, TarponError};
use crate::manifest::{Manifest, Version};
use std::fmt;
use tracing::debug;

/// What the caller asked for: `latest` or an exact version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Latest,
    Exact(Version),
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "latest" => VersionConstraint::Latest,
            exact => VersionConstraint::Exact(Version::parse(exact)),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Latest => f.write_str("latest"),
            VersionConstraint::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Select the manifest satisfying the constraint.
///
/// `Latest` picks the maximum semantic version; `Exact` requires a release
/// with that exact version string.
pub fn resolve<'a>(
    catalog: &'a Catalog,
    name: &str,
    constraint: &VersionConstraint,
) -> Result<&'a Manifest> {
    let releases = catalog
        .manifests_for(name)
        .ok_or_else(|| TarponError::NotFound(name.to_string()))?;

    let manifest = match constraint {
        // Releases are sorted oldest to newest
        VersionConstraint::Latest => releases.last(),
        VersionConstraint::Exact(version) => releases
            .iter()
            .find(|m| m.version == version.as_str()),
    };

    let manifest = manifest.ok_or_else(|| TarponError::NoMatchingVersion {
        name: name.to_string(),
        constraint: constraint.to_string(),
    })?;

    debug!(name, version = %manifest.version, %constraint, "resolved");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn manifest(name: &str, version: &str) -> Manifest {
        Manifest {
            name: name.to_string(),
            version: version.to_string(),
            url: format!("https://releases.example.com/{name}/{name}-{version}.tgz"),
            checksum: Some(
                "sha256:fe9b077aebeaa4d58e21adcb581543086f874f2d97752f20807673ab259d4357"
                    .to_string(),
            ),
            completion: None,
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_manifests(vec![
            manifest("nmesos-cli", "0.1.0"),
            manifest("nmesos-cli", "0.2.21"),
            manifest("nmesos-cli", "0.2.3"),
        ])
        .unwrap()
    }

    #[test]
    fn test_latest_is_maximum_semantic_version() {
        let c = catalog();
        let m = resolve(&c, "nmesos-cli", &VersionConstraint::Latest).unwrap();
        assert_eq!(m.version, "0.2.21");
    }

    #[test]
    fn test_exact_version_match() {
        let c = catalog();
        let m = resolve(&c, "nmesos-cli", &VersionConstraint::parse("0.2.3")).unwrap();
        assert_eq!(m.version, "0.2.3");
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let c = catalog();
        let err = resolve(&c, "ripgrep", &VersionConstraint::Latest).unwrap_err();
        assert!(matches!(err, TarponError::NotFound(_)));
    }

    #[test]
    fn test_unknown_version_is_no_matching_version() {
        let c = catalog();
        let err = resolve(&c, "nmesos-cli", &VersionConstraint::parse("9.9.9")).unwrap_err();
        assert!(matches!(err, TarponError::NoMatchingVersion { .. }));
    }
}
