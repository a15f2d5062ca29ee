//! Error types for Tessera

use thiserror::Error;

/// Main error type for Tessera operations
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Key, record or other addressed entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested version does not exist for the key
    #[error("Version {version} not found for key '{key}'")]
    VersionNotFound { key: String, version: u64 },

    /// Attempted overwrite or delete of a write-once record
    #[error("Record '{0}' is immutable")]
    ImmutableConflict(String),

    /// Stored content no longer matches its signature
    #[error("Integrity violation for '{key}': expected signature {expected}, computed {actual}")]
    IntegrityViolation {
        key: String,
        expected: String,
        actual: String,
    },

    /// Self-loop or otherwise malformed relationship edge
    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    /// Named backup does not exist
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Backup exists but its manifest or data is missing or unreadable
    #[error("Backup corrupt: {0}")]
    BackupCorrupt(String),

    /// Missing, unknown or expired API key, or insufficient permission
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Client exceeded its request budget
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Client exceeded the authentication failure threshold
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Empty, oversized or non-printable record key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Malformed search request (bad regex, unknown mode)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Storage-related errors (tier backends, file layout)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TesseraError {
    /// Stable label for this error, used in HTTP bodies and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::ImmutableConflict(_) => "immutable_conflict",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::InvalidRelationship(_) => "invalid_relationship",
            Self::BackupNotFound(_) => "backup_not_found",
            Self::BackupCorrupt(_) => "backup_corrupt",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited(_) => "rate_limited",
            Self::Blocked(_) => "blocked",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, TesseraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(TesseraError::NotFound("k".into()).kind(), "not_found");
        assert_eq!(
            TesseraError::ImmutableConflict("k".into()).kind(),
            "immutable_conflict"
        );
        assert_eq!(TesseraError::RateLimited("c".into()).kind(), "rate_limited");
    }

    #[test]
    fn test_io_conversion() {
        let err: TesseraError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, TesseraError::Io(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
