//! Bearer-token issuance and validation.
//!
//! Tokens are opaque random strings mapped to the username they were issued
//! for. Expiry is enforced in exactly one place: [`TokenStore::subject`]
//! rejects (and prunes) entries older than the configured TTL, and every
//! other check goes through it.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Characters a token is drawn from.
const TOKEN_CHARSET: &[u8] = b"AaBbCcDdEeFfGgHhIiJjKkLlMmNnOoPpQqRrSsTtUuVvWwXxYyZz0123456789";

/// Number of characters in an issued token.
const TOKEN_LEN: usize = 15;

/// How long a token stays valid after issuance.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

struct TokenEntry {
    username: String,
    issued_at: Instant,
}

/// In-memory bearer-token store.
pub struct TokenStore {
    ttl: Duration,
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl TokenStore {
    /// Creates a store with the default one-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    /// Creates a store with a specific TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a fresh token for `username`.
    pub fn issue(&self, username: &str) -> String {
        let token = random_token();
        self.tokens.write().insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                issued_at: Instant::now(),
            },
        );
        tracing::debug!(username, "token issued");
        token
    }

    /// Returns the username a currently valid token was issued for.
    ///
    /// This is the single place expiry is enforced; an expired entry is
    /// removed on sight.
    pub fn subject(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.write();
        match tokens.get(token) {
            Some(entry) if entry.issued_at.elapsed() < self.ttl => Some(entry.username.clone()),
            Some(_) => {
                tokens.remove(token);
                tracing::debug!("expired token pruned");
                None
            }
            None => None,
        }
    }

    /// Whether the token is currently valid.
    pub fn is_valid(&self, token: &str) -> bool {
        self.subject(token).is_some()
    }

    /// Revokes a token. Returns whether it was present.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.tokens.write().remove(token).is_some();
        if removed {
            tracing::debug!("token revoked");
        }
        removed
    }

    /// Pre-loads token-to-username pairs. Seeded entries live one TTL from
    /// now.
    pub fn seed(&self, entries: impl IntoIterator<Item = (String, String)>) {
        let mut tokens = self.tokens.write();
        for (token, username) in entries {
            tokens.insert(
                token,
                TokenEntry {
                    username,
                    issued_at: Instant::now(),
                },
            );
        }
    }

    /// Seeds the store from a JSON object mapping token to username.
    pub fn seed_from_json(&self, bytes: &[u8]) -> ServerResult<usize> {
        let entries: HashMap<String, String> = serde_json::from_slice(bytes)
            .map_err(|err| ServerError::Protocol(format!("bad token file: {err}")))?;
        let count = entries.len();
        self.seed(entries);
        Ok(count)
    }

    /// Number of stored tokens, expired ones included until pruned.
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Whether the store holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}
