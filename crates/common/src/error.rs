//! Error taxonomy for the document store
//!
//! Every layer surfaces this one taxonomy. Per-document failures inside a
//! bulk write carry one of these alongside the successful results; storage
//! engine failures are wrapped as 500-class errors.

use thiserror::Error;

/// Result type for document store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Document store errors
#[derive(Debug, Error)]
pub enum Error {
    /// The requested document (or revision, or attachment) does not exist,
    /// or exists only as a deletion.
    #[error("missing: {reason}")]
    MissingDoc { reason: String },

    /// An edit lost against the revision tree, or duplicated an id within
    /// one batch.
    #[error("Document update conflict")]
    RevConflict,

    /// The database handle is not open.
    #[error("Database is not open")]
    NotOpen,

    /// The caller supplied something malformed: an invalid id or rev, a
    /// reserved document member, a non-declarative filter.
    #[error("{reason}")]
    BadRequest { reason: String },

    /// Underlying key-value engine failure.
    #[error("Storage error: {0}")]
    Storage(#[from] fjall::Error),

    /// Value (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem failure (destroy, directory creation).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a 404 with a reason.
    pub fn missing(reason: impl Into<String>) -> Self {
        Error::MissingDoc {
            reason: reason.into(),
        }
    }

    /// Shorthand for a 400 with a reason.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Error::BadRequest {
            reason: reason.into(),
        }
    }

    /// Rebuild an error of the same kind with a more specific reason.
    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        match self {
            Error::MissingDoc { .. } => Error::MissingDoc {
                reason: reason.into(),
            },
            Error::BadRequest { .. } => Error::BadRequest {
                reason: reason.into(),
            },
            other => other,
        }
    }

    /// HTTP-ish status code for this error class.
    pub fn status(&self) -> u16 {
        match self {
            Error::MissingDoc { .. } => 404,
            Error::RevConflict => 409,
            Error::NotOpen => 412,
            Error::BadRequest { .. } => 400,
            Error::Storage(_) | Error::Serde(_) | Error::Io(_) => 500,
        }
    }

    /// Stable machine-readable name for this error class.
    pub fn name(&self) -> &'static str {
        match self {
            Error::MissingDoc { .. } => "not_found",
            Error::RevConflict => "conflict",
            Error::NotOpen => "precondition_failed",
            Error::BadRequest { .. } => "bad_request",
            Error::Storage(_) | Error::Serde(_) | Error::Io(_) => "internal_server_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Error::missing("deleted").status(), 404);
        assert_eq!(Error::RevConflict.status(), 409);
        assert_eq!(Error::NotOpen.status(), 412);
        assert_eq!(Error::bad_request("nope").status(), 400);
    }

    #[test]
    fn with_reason_keeps_kind() {
        let err = Error::missing("missing").with_reason("deleted");
        match err {
            Error::MissingDoc { reason } => assert_eq!(reason, "deleted"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
