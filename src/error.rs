//! Error types for Casket

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Casket
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Format / Length Errors
    // =========================================================================
    /// Digest bytes do not match the provider's declared length
    #[error("Digest length mismatch for {provider}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    /// Base64 text could not be decoded
    #[error("Base64 decode error: {0}")]
    Decode(String),

    /// Unknown digest provider tag
    #[error("Unknown digest provider tag: {0}")]
    UnknownProvider(u8),

    /// Source length recorded on an identifier disagrees with the expected one
    #[error("Source length mismatch: expected {expected}, identifier declares {actual}")]
    SourceLengthMismatch { expected: u64, actual: u64 },

    // =========================================================================
    // Container Errors
    // =========================================================================
    /// Declared lengths disagree with the bytes actually received
    #[error("Container framing error: {0}")]
    Framing(String),

    /// Recomputed digest disagrees with the embedded or expected one
    #[error("Integrity check failed: digest mismatch under {provider}")]
    Tamper { provider: String },

    // =========================================================================
    // Ring Errors
    // =========================================================================
    /// Node key already present on the ring
    #[error("Duplicate ring node: {0}")]
    DuplicateNode(String),

    /// Lookup against a ring with no active nodes
    #[error("Consistent hash ring has no active nodes")]
    EmptyRing,

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Write attempted while the cache is not accepting objects
    #[error("Cache '{cache}' is not accepting objects: {reason}")]
    NotAccepting { cache: String, reason: String },

    /// Operation attempted before initialize() or after dispose()
    #[error("Cache '{0}' is not initialized")]
    NotInitialized(String),

    /// No cache tier registered for a ring node
    #[error("No cache tier registered for node: {0}")]
    TierNotFound(String),

    /// Embedded store failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file does not exist
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Capacity conditions the operator resolves by raising limits or adding an overflow cache
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::NotAccepting { .. })
    }

    /// Transient backend failures that may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }

    /// Whole-frame rejection of a received container
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::Tamper { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Decode(e.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
