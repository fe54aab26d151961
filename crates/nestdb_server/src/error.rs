//! Error types for the NestDB server.

use nestdb_core::EngineError;
use std::io;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving requests.
#[derive(Debug, Error)]
pub enum ServerError {
    /// An engine operation failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// The request could not be parsed as HTTP.
    #[error("malformed request: {0}")]
    Protocol(String),

    /// The verb is not supported by the addressed endpoint.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The request body was not declared as JSON.
    #[error("unsupported media type")]
    UnsupportedMedia,

    /// The bearer token was missing, unknown, expired, or revoked.
    #[error("unauthorized")]
    Unauthorized,

    /// The configured document schema failed to compile.
    #[error("schema compilation failed: {0}")]
    SchemaCompile(String),

    /// I/O error on a connection or configuration file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// The HTTP status code this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::Engine(err) => engine_status(err),
            ServerError::Protocol(_) => 400,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::UnsupportedMedia => 415,
            ServerError::Unauthorized => 401,
            ServerError::SchemaCompile(_) | ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

fn engine_status(err: &EngineError) -> u16 {
    match err {
        EngineError::InvalidPath { .. }
        | EngineError::Decode { .. }
        | EngineError::InvalidBody { .. }
        | EngineError::Schema { .. }
        | EngineError::DatabaseExists { .. } => 400,
        EngineError::NotFound { .. } => 404,
        EngineError::MethodNotAllowed => 405,
        EngineError::Conflict { .. } => 409,
        EngineError::Marshal { .. } | EngineError::Cancelled => 500,
    }
}
