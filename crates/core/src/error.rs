//! Error model shared by the request generators.

use thiserror::Error;

/// Result type used across the sync layer.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync-layer error.
///
/// Rate-limited responses are not represented here: they are a response
/// classification handled inside completion handlers, never an error returned
/// to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The key provider could not produce key material. No request was built.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A request was asked for in a state that cannot produce it
    /// (e.g. rotating pre-keys for a client that was never registered).
    #[error("precondition unmet: {0}")]
    PreconditionUnmet(String),

    /// A persisted store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A configuration value was missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionUnmet(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
