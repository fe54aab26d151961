//! Error types for the NestDB engine.

use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The kind of tree entity an error refers to.
///
/// Not-found and conflict messages distinguish the entity kind by the
/// parity of the failing path segment, so clients can tell a missing
/// collection from a missing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A root-level collection.
    Database,
    /// A collection nested under a document.
    Collection,
    /// A document.
    Document,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Database => write!(f, "Database"),
            EntityKind::Collection => write!(f, "Collection"),
            EntityKind::Document => write!(f, "Document"),
        }
    }
}

/// Errors that can occur in NestDB engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request path was empty or structurally malformed.
    #[error("invalid path: {message}")]
    InvalidPath {
        /// Description of the problem.
        message: String,
    },

    /// A path segment contained a malformed percent escape.
    #[error("invalid percent-encoding in path segment: {segment}")]
    Decode {
        /// The offending raw segment.
        segment: String,
    },

    /// An intermediate or terminal entity was missing.
    #[error("{kind} does not exist")]
    NotFound {
        /// What kind of entity was missing.
        kind: EntityKind,
        /// Its name.
        name: String,
    },

    /// A create-only request hit an existing entity.
    #[error("{kind} already exists")]
    Conflict {
        /// What kind of entity already exists.
        kind: EntityKind,
        /// Its name.
        name: String,
    },

    /// PUT of a database root that already exists.
    #[error("unable to create database {name}: exists")]
    DatabaseExists {
        /// The database name.
        name: String,
    },

    /// The request body was missing or not the JSON the verb requires.
    #[error("invalid body: {message}")]
    InvalidBody {
        /// Description of the problem.
        message: String,
    },

    /// The payload was rejected by the configured document schema.
    #[error("document rejected by schema: {message}")]
    Schema {
        /// The validator's message.
        message: String,
    },

    /// The verb is not applicable at this path depth.
    #[error("method not allowed at this path")]
    MethodNotAllowed,

    /// Serialising a response body failed.
    #[error("marshal error: {message}")]
    Marshal {
        /// Description of the failure.
        message: String,
    },

    /// A scan was cancelled mid-flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates an invalid-path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }

    /// Creates a decode error for a raw path segment.
    pub fn decode(segment: impl Into<String>) -> Self {
        Self::Decode {
            segment: segment.into(),
        }
    }

    /// Creates a not-found error for the given entity kind.
    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a conflict error for the given entity kind.
    pub fn conflict(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Creates an invalid-body error.
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::InvalidBody {
            message: message.into(),
        }
    }

    /// Creates a schema-rejection error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a marshal error.
    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal {
            message: message.into(),
        }
    }

    /// Returns true if the request, not the engine, was at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            EngineError::Marshal { .. } | EngineError::Cancelled
        )
    }
}

impl From<nestdb_skiplist::QueryError> for EngineError {
    fn from(_: nestdb_skiplist::QueryError) -> Self {
        EngineError::Cancelled
    }
}
