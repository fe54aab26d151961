//! NestDB server binary.
//!
//! Serves the JSON document tree over HTTP with bearer-token auth,
//! optional document-schema validation, and server-sent-event change
//! streams.

use clap::Parser;
use nestdb_core::Datastore;
use nestdb_server::{RequestHandler, SchemaValidator, Server, ServerConfig, TokenStore};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// In-memory JSON document tree server.
#[derive(Parser)]
#[command(name = "nestdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port on which the server will listen
    #[arg(short = 'p', long = "port", default_value_t = nestdb_server::DEFAULT_PORT)]
    port: u16,

    /// JSON schema file used to validate stored documents
    #[arg(short = 's', long = "schema")]
    schema: Option<PathBuf>,

    /// JSON file of pre-issued tokens (an object mapping token to username)
    #[arg(short = 't', long = "tokens")]
    tokens: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::default().with_port(cli.port);
    if let Some(path) = cli.schema {
        config = config.with_schema_file(path);
    }
    if let Some(path) = cli.tokens {
        config = config.with_token_file(path);
    }

    let schema = match &config.schema_file {
        Some(path) => SchemaValidator::from_file(path)?,
        None => SchemaValidator::accept_all(),
    };

    let tokens = TokenStore::with_ttl(config.token_ttl);
    if let Some(path) = &config.token_file {
        let data = fs::read(path)?;
        let seeded = tokens.seed_from_json(&data)?;
        tracing::info!(seeded, "token store seeded");
    }

    let handler = Arc::new(RequestHandler::new(
        Arc::new(Datastore::new()),
        Arc::new(tokens),
        Arc::new(schema),
    ));

    let server = Server::bind(&config, handler)?;

    ctrlc::set_handler(|| {
        tracing::info!("interrupt received, shutting down");
        std::process::exit(0);
    })?;

    tracing::info!(port = cli.port, "nestdb listening");
    server.run()?;
    Ok(())
}
