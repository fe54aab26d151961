//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3318;

/// Configuration for the NestDB server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Optional JSON-schema file validating stored documents.
    pub schema_file: Option<PathBuf>,
    /// Optional JSON file of pre-issued tokens (token to username).
    pub token_file: Option<PathBuf>,
    /// How long issued tokens stay valid.
    pub token_ttl: Duration,
    /// Silence interval after which subscribers get a keepalive comment.
    pub keepalive_interval: Duration,
}

impl ServerConfig {
    /// Creates a configuration bound to the given address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            schema_file: None,
            token_file: None,
            token_ttl: crate::auth::DEFAULT_TOKEN_TTL,
            keepalive_interval: Duration::from_secs(15),
        }
    }

    /// Sets the listen port, keeping the configured interface.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Sets the document schema file.
    pub fn with_schema_file(mut self, path: PathBuf) -> Self {
        self.schema_file = Some(path);
        self
    }

    /// Sets the pre-issued token file.
    pub fn with_token_file(mut self, path: PathBuf) -> Self {
        self.token_file = Some(path);
        self
    }

    /// Sets the token TTL.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Sets the subscriber keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))
    }
}
