//! Canonical error type for the archive engine.
//!
//! Every layer (backend, transaction views, public operations) reports
//! through this single enum. The retry engine conditionally absorbs exactly
//! one discriminant (`CannotSerialize`); everything else propagates verbatim
//! to the caller.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The public id (or internal id) does not name a stored resource,
    /// metadata entry, or attachment.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Optimistic-concurrency precondition failure: the caller presented a
    /// stale `(revision, checksum)` pair for a metadata or attachment write.
    #[error("revision mismatch: {0}")]
    Revision(String),

    /// A racing writer recreated a resource this transaction just deleted.
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    /// Backend-reported serialization failure under concurrent writers.
    /// This is the only error the retry engine absorbs.
    #[error("transaction could not be serialized due to concurrent activity")]
    CannotSerialize,

    /// Storage-size or patient-count ceiling reached, or no evictable
    /// patient left under the recycle policy.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// A mutation was attempted on an engine constructed in read-only mode.
    #[error("the engine is configured in read-only mode")]
    ReadOnly,

    /// Contract misuse: committing twice, installing the context factory
    /// twice, mutating through a read-only transaction handle.
    #[error("bad sequence of calls: {0}")]
    BadSequenceOfCalls(String),

    /// The backend violated its contract (wrong result cardinality, level
    /// mismatch in a find response, inconsistent pagination).
    #[error("backend misbehavior: {0}")]
    BackendPlugin(String),

    /// Invalid caller-supplied input (empty store id, malformed label,
    /// missing identifying tag).
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),

    /// The operation requires a backend capability that is not advertised.
    #[error("not supported by this backend: {0}")]
    NotImplemented(String),

    /// Invariant breakage inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True only for the serialization-conflict class; the retry engine
    /// keys its retry decision off this predicate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CannotSerialize)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::UnknownResource(_))
    }

    /// HTTP status hint for upstream translation. Resource exhaustion maps
    /// to 507 (Insufficient Storage).
    pub fn http_status(&self) -> u16 {
        match self {
            Error::UnknownResource(_) => 404,
            Error::Revision(_) => 409,
            Error::DuplicateResource(_) => 409,
            Error::CannotSerialize => 503,
            Error::StorageFull(_) => 507,
            Error::ReadOnly => 403,
            Error::ParameterOutOfRange(_) => 400,
            Error::NotImplemented(_) => 501,
            Error::BadSequenceOfCalls(_)
            | Error::BackendPlugin(_)
            | Error::Internal(_) => 500,
        }
    }
}
