//! Request routing and status mapping.
//!
//! Two roots: `/auth` (token issuance and revocation) and `/v1/…` (the
//! document tree). Every `/v1` verb other than OPTIONS demands a currently
//! valid bearer token. Every response carries the permissive CORS origin
//! header; 401s carry a bearer challenge.

use crate::auth::TokenStore;
use crate::error::{ServerError, ServerResult};
use crate::http::{Method, Request, Response};
use crate::schema::SchemaValidator;
use nestdb_core::{ChangeEvent, Datastore, Outcome};
use serde::Deserialize;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info};

/// Extra headers advertised to CORS preflight requests.
const ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// What the connection thread should do with a routed request.
pub enum Routed {
    /// Write this response and close.
    Response(Response),
    /// Upgrade to a server-sent-event stream fed by this receiver.
    Subscribe {
        /// Change events matching the subscribed path.
        rx: Receiver<ChangeEvent>,
    },
}

#[derive(Deserialize)]
struct AuthRequest {
    username: Option<String>,
}

/// Routes parsed requests into the engine and token store.
pub struct RequestHandler {
    datastore: Arc<Datastore>,
    tokens: Arc<TokenStore>,
    schema: Arc<SchemaValidator>,
}

impl RequestHandler {
    /// Creates a handler over shared server state.
    pub fn new(
        datastore: Arc<Datastore>,
        tokens: Arc<TokenStore>,
        schema: Arc<SchemaValidator>,
    ) -> Self {
        Self {
            datastore,
            tokens,
            schema,
        }
    }

    /// Handles one request, mapping any failure to its status code.
    pub fn handle(&self, request: &Request) -> Routed {
        match self.dispatch(request) {
            Ok(routed) => routed,
            Err(err) => {
                debug!(
                    method = request.method.as_str(),
                    path = %request.path,
                    status = err.status(),
                    error = %err,
                    "request failed"
                );
                Routed::Response(error_response(&err))
            }
        }
    }

    fn dispatch(&self, request: &Request) -> ServerResult<Routed> {
        if request.path == "/auth" {
            return self.handle_auth(request);
        }
        if request.path == "/v1" || request.path.starts_with("/v1/") {
            return self.handle_tree(request);
        }
        Ok(Routed::Response(with_cors(Response::empty(404))))
    }

    fn handle_auth(&self, request: &Request) -> ServerResult<Routed> {
        match request.method {
            Method::Options => Ok(Routed::Response(allowed_response("POST, DELETE"))),
            Method::Post => {
                require_json(request)?;
                let body: AuthRequest = serde_json::from_slice(&request.body)
                    .map_err(|err| ServerError::Protocol(format!("invalid user format: {err}")))?;
                let username = body
                    .username
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| ServerError::Protocol("username is required".to_string()))?;
                let token = self.tokens.issue(&username);
                info!(username = %username, "login");
                let payload = serde_json::to_vec(&serde_json::json!({ "token": token }))
                    .map_err(|err| ServerError::Protocol(err.to_string()))?;
                Ok(Routed::Response(with_cors(Response::json(200, payload))))
            }
            Method::Delete => {
                let token = request.bearer_token().ok_or(ServerError::Unauthorized)?;
                if !self.tokens.is_valid(token) {
                    return Err(ServerError::Unauthorized);
                }
                self.tokens.revoke(token);
                info!("logout");
                Ok(Routed::Response(with_cors(Response::empty(204))))
            }
            other => Err(ServerError::MethodNotAllowed(other.as_str().to_string())),
        }
    }

    fn handle_tree(&self, request: &Request) -> ServerResult<Routed> {
        if request.method == Method::Options {
            let outcome = self.datastore.options(&request.path)?;
            return Ok(Routed::Response(outcome_response(outcome)));
        }

        let token = request.bearer_token().ok_or(ServerError::Unauthorized)?;
        let principal = self
            .tokens
            .subject(token)
            .ok_or(ServerError::Unauthorized)?;

        match request.method {
            Method::Get => {
                let outcome = self.datastore.get(&request.path)?;
                if request.query_param("mode") == Some("subscribe") {
                    let rx = self.datastore.subscribe(&request.path)?;
                    info!(path = %request.path, "subscriber attached");
                    return Ok(Routed::Subscribe { rx });
                }
                Ok(Routed::Response(outcome_response(outcome)))
            }
            Method::Put | Method::Post => {
                let payload = if request.body.is_empty() {
                    None
                } else {
                    require_json(request)?;
                    Some(self.schema.parse_and_validate(&request.body)?)
                };
                let outcome = if request.method == Method::Put {
                    self.datastore.put(&request.path, payload, &principal)?
                } else {
                    self.datastore.post(&request.path, payload, &principal)?
                };
                Ok(Routed::Response(outcome_response(outcome)))
            }
            Method::Patch => {
                if request.body.is_empty() {
                    return Err(ServerError::Engine(
                        nestdb_core::EngineError::invalid_body("patch body required"),
                    ));
                }
                require_json(request)?;
                let patch: serde_json::Value = serde_json::from_slice(&request.body)
                    .map_err(|err| {
                        ServerError::Engine(nestdb_core::EngineError::invalid_body(
                            err.to_string(),
                        ))
                    })?;
                let outcome = self.datastore.patch(&request.path, patch, &principal, &|value| {
                    self.schema.check(value).map_err(|err| err.to_string())
                })?;
                Ok(Routed::Response(outcome_response(outcome)))
            }
            Method::Delete => {
                let outcome = self.datastore.delete(&request.path)?;
                Ok(Routed::Response(outcome_response(outcome)))
            }
            // Handled before the token check.
            Method::Options => Err(ServerError::MethodNotAllowed("OPTIONS".to_string())),
        }
    }
}

/// 415 unless the request declares a JSON body.
fn require_json(request: &Request) -> ServerResult<()> {
    match request.header("content-type") {
        Some(value) if value.starts_with("application/json") => Ok(()),
        _ => Err(ServerError::UnsupportedMedia),
    }
}

fn outcome_response(outcome: Outcome) -> Response {
    let response = match outcome {
        Outcome::Created(body) => Response::json(201, body),
        Outcome::Ok(body) => Response::json(200, body),
        Outcome::NoContent => Response::empty(204),
        Outcome::Allowed(methods) => return allowed_response(methods),
    };
    with_cors(response)
}

fn allowed_response(methods: &str) -> Response {
    with_cors(
        Response::empty(200)
            .with_header("Allow", methods)
            .with_header("Access-Control-Allow-Methods", methods)
            .with_header("Access-Control-Allow-Headers", ALLOW_HEADERS),
    )
}

fn error_response(err: &ServerError) -> Response {
    let status = err.status();
    // The body is the message as a JSON string.
    let body = serde_json::to_vec(&err.to_string()).unwrap_or_default();
    let mut response = Response::json(status, body);
    if status == 401 {
        response = response.with_header("WWW-Authenticate", "Bearer");
    }
    with_cors(response)
}

fn with_cors(response: Response) -> Response {
    response.with_header("Access-Control-Allow-Origin", "*")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> RequestHandler {
        RequestHandler::new(
            Arc::new(Datastore::new()),
            Arc::new(TokenStore::new()),
            Arc::new(SchemaValidator::accept_all()),
        )
    }

    fn request(method: Method, path: &str) -> Request {
        Request {
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn json_request(method: Method, path: &str, token: &str, body: &str) -> Request {
        let mut req = request(method, path);
        req.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        req.headers
            .push(("authorization".to_string(), format!("Bearer {token}")));
        req.body = body.as_bytes().to_vec();
        req
    }

    fn authed(method: Method, path: &str, token: &str) -> Request {
        let mut req = request(method, path);
        req.headers
            .push(("authorization".to_string(), format!("Bearer {token}")));
        req
    }

    fn response(handler: &RequestHandler, req: &Request) -> Response {
        match handler.handle(req) {
            Routed::Response(resp) => resp,
            Routed::Subscribe { .. } => panic!("expected a plain response"),
        }
    }

    fn header<'a>(resp: &'a Response, name: &str) -> Option<&'a str> {
        resp.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn login(handler: &RequestHandler) -> String {
        let mut req = request(Method::Post, "/auth");
        req.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        req.body = br#"{"username": "tester"}"#.to_vec();
        let resp = response(handler, &req);
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    #[test]
    fn auth_post_issues_a_token() {
        let handler = handler();
        let token = login(&handler);
        assert_eq!(token.len(), 15);
    }

    #[test]
    fn auth_post_requires_json_content_type() {
        let handler = handler();
        let mut req = request(Method::Post, "/auth");
        req.headers
            .push(("content-type".to_string(), "text/plain".to_string()));
        req.body = b"hi".to_vec();
        assert_eq!(response(&handler, &req).status, 415);
    }

    #[test]
    fn auth_post_requires_a_username() {
        let handler = handler();
        let mut req = request(Method::Post, "/auth");
        req.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        req.body = b"{}".to_vec();
        assert_eq!(response(&handler, &req).status, 400);
    }

    #[test]
    fn auth_delete_revokes_the_token() {
        let handler = handler();
        let token = login(&handler);

        let resp = response(&handler, &authed(Method::Delete, "/auth", &token));
        assert_eq!(resp.status, 204);

        // The token no longer works against the tree.
        let resp = response(&handler, &authed(Method::Get, "/v1/db1", &token));
        assert_eq!(resp.status, 401);
    }

    #[test]
    fn auth_options_advertises_verbs() {
        let handler = handler();
        let resp = response(&handler, &request(Method::Options, "/auth"));
        assert_eq!(resp.status, 200);
        assert_eq!(header(&resp, "Allow"), Some("POST, DELETE"));
    }

    #[test]
    fn tree_requests_without_token_are_unauthorized() {
        let handler = handler();
        let resp = response(&handler, &request(Method::Get, "/v1/db1"));
        assert_eq!(resp.status, 401);
        assert_eq!(header(&resp, "WWW-Authenticate"), Some("Bearer"));
        assert_eq!(header(&resp, "Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn tree_options_needs_no_token() {
        let handler = handler();
        let token = login(&handler);
        let resp = response(
            &handler,
            &json_request(Method::Put, "/v1/db1", &token, ""),
        );
        assert_eq!(resp.status, 201);

        let resp = response(&handler, &request(Method::Options, "/v1/db1"));
        assert_eq!(resp.status, 200);
        assert_eq!(header(&resp, "Allow"), Some("OPTIONS, PUT, DELETE"));
    }

    #[test]
    fn document_lifecycle_statuses() {
        let handler = handler();
        let token = login(&handler);

        let resp = response(&handler, &authed(Method::Put, "/v1/db1", &token));
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, br#"{"uri":"/v1/db1"}"#);

        let resp = response(
            &handler,
            &json_request(Method::Put, "/v1/db1/doc1", &token, r#"{"x":1}"#),
        );
        assert_eq!(resp.status, 201);

        let resp = response(
            &handler,
            &json_request(Method::Put, "/v1/db1/doc1", &token, r#"{"x":2}"#),
        );
        assert_eq!(resp.status, 200);

        let resp = response(&handler, &authed(Method::Get, "/v1/db1/doc1", &token));
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["doc"]["x"], 2);

        let resp = response(
            &handler,
            &json_request(Method::Post, "/v1/db1/doc1", &token, r#"{"x":9}"#),
        );
        assert_eq!(resp.status, 409);

        let resp = response(&handler, &authed(Method::Delete, "/v1/db1/doc1", &token));
        assert_eq!(resp.status, 204);

        let resp = response(&handler, &authed(Method::Get, "/v1/db1/doc1", &token));
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, br#""Document does not exist""#);
    }

    #[test]
    fn put_document_with_non_json_body_is_415() {
        let handler = handler();
        let token = login(&handler);
        response(&handler, &authed(Method::Put, "/v1/db1", &token));

        let mut req = authed(Method::Put, "/v1/db1/doc1", &token);
        req.headers
            .push(("content-type".to_string(), "text/plain".to_string()));
        req.body = b"not json".to_vec();
        assert_eq!(response(&handler, &req).status, 415);
    }

    #[test]
    fn malformed_json_body_is_400() {
        let handler = handler();
        let token = login(&handler);
        response(&handler, &authed(Method::Put, "/v1/db1", &token));

        let resp = response(
            &handler,
            &json_request(Method::Put, "/v1/db1/doc1", &token, "{broken"),
        );
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn post_to_database_root_is_405() {
        let handler = handler();
        let token = login(&handler);
        let resp = response(&handler, &authed(Method::Post, "/v1/db1", &token));
        assert_eq!(resp.status, 405);
    }

    #[test]
    fn unknown_root_is_404() {
        let handler = handler();
        let resp = response(&handler, &request(Method::Get, "/other"));
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn subscribe_upgrades_after_a_successful_read() {
        let handler = handler();
        let token = login(&handler);
        response(&handler, &authed(Method::Put, "/v1/db1", &token));

        let mut req = authed(Method::Get, "/v1/db1", &token);
        req.query
            .push(("mode".to_string(), "subscribe".to_string()));
        let rx = match handler.handle(&req) {
            Routed::Subscribe { rx } => rx,
            Routed::Response(resp) => panic!("expected subscribe, got {}", resp.status),
        };

        response(
            &handler,
            &json_request(Method::Put, "/v1/db1/doc1", &token, r#"{}"#),
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.path, "/v1/db1/doc1");
    }

    #[test]
    fn subscribe_to_missing_path_fails_with_404() {
        let handler = handler();
        let token = login(&handler);

        let mut req = authed(Method::Get, "/v1/ghost", &token);
        req.query
            .push(("mode".to_string(), "subscribe".to_string()));
        let resp = match handler.handle(&req) {
            Routed::Response(resp) => resp,
            Routed::Subscribe { .. } => panic!("must not subscribe to a missing path"),
        };
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn patch_merges_and_reports_200() {
        let handler = handler();
        let token = login(&handler);
        response(&handler, &authed(Method::Put, "/v1/db1", &token));
        response(
            &handler,
            &json_request(Method::Put, "/v1/db1/doc1", &token, r#"{"a":1,"b":2}"#),
        );

        let resp = response(
            &handler,
            &json_request(Method::Patch, "/v1/db1/doc1", &token, r#"{"b":null,"c":3}"#),
        );
        assert_eq!(resp.status, 200);

        let resp = response(&handler, &authed(Method::Get, "/v1/db1/doc1", &token));
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["doc"], serde_json::json!({"a": 1, "c": 3}));
    }
}
