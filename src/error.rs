//! Error types for the metal price sync engine

use thiserror::Error;

/// Errors a price source can fail a fetch with
///
/// Every variant is treated the same by `EntitySync`: the instance moves to
/// `Failed` carrying the error's display text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Entity key not recognized by the source
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Transient fetch failure; the message is surfaced verbatim
    #[error("{0}")]
    SourceUnavailable(String),

    /// The fetch succeeded but returned data failing sanity checks
    #[error("Malformed result: {0}")]
    MalformedResult(String),
}

impl FetchError {
    /// Creates an UnknownEntity error
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity(entity.into())
    }

    /// Creates a SourceUnavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    /// Creates a MalformedResult error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResult(msg.into())
    }
}

/// Errors raised while creating or addressing sync instances
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Poll interval must be strictly positive
    #[error("Poll interval must be greater than zero")]
    InvalidPollInterval,

    /// No tile is mounted for the entity
    #[error("No tile mounted for {entity}")]
    NotMounted { entity: String },

    /// The tile exists but has no fresh data to open a detail view from
    #[error("Tile for {entity} is not ready")]
    NotSelectable { entity: String },
}

impl SyncError {
    /// Creates a NotMounted error
    pub fn not_mounted(entity: impl ToString) -> Self {
        Self::NotMounted {
            entity: entity.to_string(),
        }
    }

    /// Creates a NotSelectable error
    pub fn not_selectable(entity: impl ToString) -> Self {
        Self::NotSelectable {
            entity: entity.to_string(),
        }
    }
}
