//! The TCP listener and per-connection loop.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{RequestHandler, Routed};
use crate::http::{self, Response};
use crate::sse;
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A bound NestDB server.
///
/// Connections are served one request each on their own OS thread;
/// subscriber connections stay on their thread streaming events.
pub struct Server {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    keepalive: Duration,
}

impl Server {
    /// Binds the configured address.
    pub fn bind(config: &ServerConfig, handler: Arc<RequestHandler>) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)?;
        Ok(Self {
            listener,
            handler,
            keepalive: config.keepalive_interval,
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever.
    pub fn run(self) -> ServerResult<()> {
        info!(addr = %self.local_addr()?, "listening");
        for connection in self.listener.incoming() {
            match connection {
                Ok(stream) => {
                    let handler = Arc::clone(&self.handler);
                    let keepalive = self.keepalive;
                    thread::spawn(move || handle_connection(stream, handler, keepalive));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, handler: Arc<RequestHandler>, keepalive: Duration) {
    let read_half = match stream.try_clone() {
        Ok(half) => half,
        Err(err) => {
            warn!(error = %err, "connection clone failed");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut write_half = stream;

    let request = match http::read_request(&mut reader) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "unreadable request");
            let response = Response::json(
                err.status(),
                serde_json::to_vec(&err.to_string()).unwrap_or_default(),
            );
            let _ = response.write_to(&mut write_half);
            return;
        }
    };

    debug!(
        method = request.method.as_str(),
        path = %request.path,
        "request"
    );

    match handler.handle(&request) {
        Routed::Response(response) => {
            if let Err(err) = response.write_to(&mut write_half) {
                debug!(error = %err, "response write failed");
            }
        }
        Routed::Subscribe { rx } => sse::serve(write_half, rx, keepalive),
    }
}
