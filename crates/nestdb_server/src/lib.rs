//! # NestDB Server
//!
//! The HTTP surface over the NestDB engine.
//!
//! This crate provides:
//! - A minimal HTTP/1.1 listener with a thread per connection
//! - Routing for `/auth` and the `/v1` document tree
//! - Bearer-token issuance and central TTL validation
//! - Optional JSON-schema validation of stored documents
//! - Server-sent-event change streams with keepalives

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod schema;
pub mod server;
pub mod sse;

pub use auth::{TokenStore, DEFAULT_TOKEN_TTL};
pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use handler::{RequestHandler, Routed};
pub use schema::SchemaValidator;
pub use server::Server;
