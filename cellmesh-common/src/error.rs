//! Error kinds for the cellmesh workspace.
//!
//! Kinds mirror the error-handling design: argument-validation failures must
//! be raised before any collective call, `RangeOutOfBounds` is the only
//! non-fatal kind, and everything else unwinds the collective on every rank.

use thiserror::Error;

/// Result alias used throughout cellmesh.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema missing: {0}")]
    SchemaMissing(String),

    #[error("malformed schema: {0}")]
    BadSchema(String),

    /// Non-fatal: caller should treat this as an empty result and keep
    /// participating in any collectives that follow.
    #[error("range out of bounds: {0}")]
    RangeOutOfBounds(String),

    #[error("truncated dataset: {0}")]
    Truncated(String),

    #[error("validation failed: edge (src={src_global}, dst={dst_global}) {reason}")]
    ValidationFailed {
        src_global: u32,
        dst_global: u32,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collective mismatch: {0}")]
    CollectiveMismatch(String),
}

impl Error {
    /// True for the one non-fatal error kind: the caller reports zero local
    /// results and keeps participating in collectives.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::RangeOutOfBounds(_))
    }
}
