use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarponError {
    #[error("invalid manifest for {name}: {reason}")]
    InvalidManifest { name: String, reason: String },

    #[error("package not found in catalog: {0}")]
    NotFound(String),

    #[error("no version of {name} matches {constraint}")]
    NoMatchingVersion { name: String, constraint: String },

    #[error("catalog integrity error: {name} {version} declared twice with different checksums")]
    CatalogIntegrity { name: String, version: String },

    #[error("source unavailable ({status}): {url}")]
    SourceUnavailable { url: String, status: u16 },

    #[error("fetch failed after {attempts} attempts: {url}: {cause}")]
    FetchFailed {
        url: String,
        attempts: u32,
        cause: anyhow::Error,
    },

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("an install of {0} is already in progress")]
    InstallInProgress(String),

    #[error("not installed: {0}")]
    NotInstalled(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TarponError>;

impl TarponError {
    /// Process exit code reported back to the packaging front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            TarponError::NotFound(_) | TarponError::NoMatchingVersion { .. } => 2,
            TarponError::ChecksumMismatch { .. } => 3,
            TarponError::FetchFailed { .. } | TarponError::SourceUnavailable { .. } => 4,
            TarponError::MalformedArchive(_) => 5,
            TarponError::InstallInProgress(_) => 6,
            TarponError::NotInstalled(_) => 7,
            _ => 1,
        }
    }
}
