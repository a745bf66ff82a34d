//! Unified error types and result handling.
//!
//! One crate-wide [`Error`] enum covers the whole taxonomy: validation
//! failures rejected before any remote call, offline/unavailable
//! classifications that the sync coordinator absorbs, genuine remote write
//! failures that must surface to the caller, and local not-found conditions
//! that are logged and treated as no-ops.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic validation failure, rejected before any remote call.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// A command referenced an envelope that does not exist in the live
    /// registry. This is the "ghost allocation" defect class.
    #[error("Unknown envelope: {envelope_id}")]
    UnknownEnvelope {
        /// The id that failed to resolve
        envelope_id: String,
    },

    /// An amount could not be parsed or was out of range.
    #[error("Invalid amount: {value}")]
    InvalidAmount {
        /// The offending raw value
        value: String,
    },

    /// A month key was not a valid `YYYY-MM` string.
    #[error("Invalid month key: {value}")]
    InvalidMonth {
        /// The offending raw value
        value: String,
    },

    /// Update/delete target missing locally. Logged and treated as a no-op
    /// by callers, never fatal.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"transaction"`
        entity: &'static str,
        /// The missing id
        id: String,
    },

    /// The remote store is unreachable. Absorbed by the coordinator: the
    /// optimistic mutation is retained and marked pending.
    #[error("Remote store is unreachable")]
    Offline,

    /// The store reported a transport-level problem (connection refused,
    /// pool exhausted). Classified together with [`Error::Offline`].
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Transport error description
        message: String,
    },

    /// The remote store accepted the request and reported a genuine
    /// failure. The local mutation is rolled back and this is the only
    /// error class surfaced to the caller as a user-visible message.
    #[error("Remote write failed: {message}")]
    RemoteWrite {
        /// Failure description from the store
        message: String,
    },

    /// Configuration error (missing file, bad TOML, invalid field).
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong during configuration loading
        message: String,
    },

    /// Database error from the `SeaORM` store backend.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, from snapshot export/import.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error belongs to the offline classification: the write
    /// did not reach the store, so the optimistic state should be retained
    /// rather than rolled back.
    #[must_use]
    pub const fn is_offline_class(&self) -> bool {
        matches!(self, Self::Offline | Self::StoreUnavailable { .. })
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
