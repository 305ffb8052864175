//! Error Types
//!
//! Every error in this crate is local to a single model or a single write
//! operation. Errors are reported at the offending call and never retried.

use thiserror::Error;

/// Errors produced by model configuration and writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// `set` targeted a computed attribute that has no setter.
    #[error("cannot write read-only computed attribute `{0}`")]
    ReadOnly(String),

    /// A setter chain re-entered an attribute that is already being written.
    #[error("circular setter reference while writing `{0}`")]
    CircularReference(String),

    /// Duplicate names across the stored, virtual, and computed namespaces.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ModelError {
    pub(crate) fn duplicate(name: &str, existing: &str) -> Self {
        Self::Configuration(format!("`{name}` is already defined as a {existing} attribute"))
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ModelError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ModelError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModelError>;
