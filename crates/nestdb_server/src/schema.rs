//! Optional JSON-schema validation of document payloads.
//!
//! With no schema configured every payload is accepted; with one, any
//! PUT/POST payload and any PATCH merge result must conform.

use crate::error::{ServerError, ServerResult};
use jsonschema::JSONSchema;
use nestdb_core::EngineError;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;

/// Validates document payloads against an optional compiled schema.
pub struct SchemaValidator {
    schema: Option<JSONSchema>,
}

impl SchemaValidator {
    /// A validator that accepts every payload.
    pub fn accept_all() -> Self {
        Self { schema: None }
    }

    /// Compiles the schema in the given file. A file that does not parse or
    /// compile aborts startup rather than silently accepting documents.
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let bytes = fs::read(path)?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|err| ServerError::SchemaCompile(err.to_string()))?;
        let schema = JSONSchema::compile(&document)
            .map_err(|err| ServerError::SchemaCompile(err.to_string()))?;
        tracing::info!(path = %path.display(), "document schema compiled");
        Ok(Self {
            schema: Some(schema),
        })
    }

    /// Whether a schema is configured.
    pub fn is_configured(&self) -> bool {
        self.schema.is_some()
    }

    /// Parses a request body and validates the result.
    pub fn parse_and_validate(&self, body: &[u8]) -> Result<Value, EngineError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| EngineError::invalid_body(err.to_string()))?;
        self.check(&value)?;
        Ok(value)
    }

    /// Validates an already-parsed payload.
    pub fn check(&self, value: &Value) -> Result<(), EngineError> {
        if let Some(schema) = &self.schema {
            if let Err(errors) = schema.validate(value) {
                let message = errors
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(EngineError::schema(message));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("configured", &self.is_configured())
            .finish()
    }
}
