//! Archive integrity checking.
//!
//! A checksum mismatch is a supply-chain signal: it is always fatal, never
//! retried and never downgraded to a warning. Manifests without a checksum
//! (legacy records) pass verification but are tagged `Unverified` so the
//! installer can surface a warning and record the fact.

use crate::error::{Result, TarponError};
use crate::manifest::{Checksum, ChecksumAlgorithm};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// How the staged archive passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Digest matched the manifest checksum.
    Verified(Checksum),
    /// Legacy manifest carried no checksum; nothing was checked.
    Unverified,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }
}

/// Compute the archive digest and compare it against the expected checksum.
pub async fn verify(path: &Path, expected: Option<&Checksum>) -> Result<Verification> {
    let Some(expected) = expected else {
        debug!(path = %path.display(), "no checksum in manifest, skipping verification");
        return Ok(Verification::Unverified);
    };

    let computed = digest(path, expected.algorithm).await?;
    if !expected.matches(&computed) {
        return Err(TarponError::ChecksumMismatch {
            expected: expected.to_string(),
            computed: format!("{}:{}", expected.algorithm.as_str(), computed),
        });
    }

    debug!(path = %path.display(), checksum = %expected, "archive verified");
    Ok(Verification::Verified(expected.clone()))
}

/// Streamed hex digest of a file under the given algorithm.
pub async fn digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut file = fs::File::open(path).await?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0; 8192];

            loop {
                let n = file.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }

            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_of(bytes: &[u8]) -> Checksum {
        let hex = format!("{:x}", Sha256::digest(bytes));
        Checksum::parse(&format!("sha256:{hex}")).unwrap()
    }

    #[tokio::test]
    async fn test_matching_digest_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.tgz");
        std::fs::write(&path, b"release contents").unwrap();

        let expected = checksum_of(b"release contents");
        let result = verify(&path, Some(&expected)).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_mismatch_carries_both_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.tgz");
        std::fs::write(&path, b"corrupted bytes").unwrap();

        let expected = checksum_of(b"release contents");
        let err = verify(&path, Some(&expected)).await.unwrap_err();
        match err {
            TarponError::ChecksumMismatch { expected, computed } => {
                assert!(expected.starts_with("sha256:"));
                assert!(computed.starts_with("sha256:"));
                assert_ne!(expected, computed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_uppercase_expected_hex_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.tgz");
        std::fs::write(&path, b"abc").unwrap();

        let hex = format!("{:X}", Sha256::digest(b"abc"));
        let expected = Checksum::parse(&format!("sha256:{hex}")).unwrap();
        assert!(verify(&path, Some(&expected)).await.unwrap().is_verified());
    }

    #[tokio::test]
    async fn test_absent_checksum_is_unverified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.tgz");
        std::fs::write(&path, b"legacy release").unwrap();

        let result = verify(&path, None).await.unwrap();
        assert_eq!(result, Verification::Unverified);
    }
}
