//! HTTP remote store implementation.
//!
//! The actual HTTP client is abstracted via a trait so different libraries
//! (reqwest, ureq) or an in-process loopback can sit underneath. Bodies are
//! JSON on both sides.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use tillsync_model::{FieldMap, Mutation, Query, RecordId};
use tillsync_protocol::{
    BatchApplyRequest, BatchApplyResponse, ErrorResponse, MutateRequest, ProcedureRequest,
    ProcedureResponse, RecordResponse, RowsResponse, SelectRequest,
};

use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

/// A raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Builds a response with a JSON-encoded body.
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        Self {
            status,
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations send one POST and report the raw response. A returned
/// `Err` means the request never produced an HTTP response (DNS failure,
/// refused connection, timeout) and is treated as a transport failure.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body and optional bearer token.
    fn post(&self, url: &str, token: Option<&str>, body: &[u8]) -> Result<HttpResponse, String>;
}

/// Supplies bearer tokens for the remote store.
pub trait TokenProvider: Send + Sync {
    /// The current token, if any.
    fn token(&self) -> Option<String>;

    /// Obtains a fresh token after an authorization rejection.
    fn refresh(&self) -> Result<String, String>;
}

/// A fixed token that cannot be refreshed.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    /// A provider that always presents the given bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A provider for unauthenticated remotes.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn refresh(&self) -> Result<String, String> {
        Err("static token cannot be refreshed".into())
    }
}

/// A [`RemoteStore`] speaking JSON over HTTP.
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    store_id: String,
    client: C,
    tokens: Arc<dyn TokenProvider>,
    refresh_on_unauthorized: bool,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote for a store behind the given base URL.
    pub fn new(base_url: impl Into<String>, store_id: impl Into<String>, client: C) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            store_id: store_id.into(),
            client,
            tokens: Arc::new(StaticToken::anonymous()),
            refresh_on_unauthorized: true,
            connected: AtomicBool::new(true),
            last_error: Mutex::new(None),
        }
    }

    /// Sets the token provider.
    #[must_use]
    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Presents a fixed bearer token.
    #[must_use]
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_token_provider(Arc::new(StaticToken::bearer(token)))
    }

    /// Controls the refresh-and-retry-once behavior on 401/403 responses.
    #[must_use]
    pub fn with_refresh_on_unauthorized(mut self, refresh: bool) -> Self {
        self.refresh_on_unauthorized = refresh;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The last transport error observed, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Whether the last request reached the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn note_failure(&self, message: &str) {
        *self.last_error.lock() = Some(message.to_string());
        self.connected.store(false, Ordering::SeqCst);
    }

    fn note_success(&self) {
        *self.last_error.lock() = None;
        self.connected.store(true, Ordering::SeqCst);
    }

    fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> EngineResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)
            .map_err(|err| EngineError::RemoteProtocol(format!("encoding request: {err}")))?;
        let url = format!("{}{}", self.base_url, endpoint);

        let mut token = self.tokens.token();
        let mut refreshed = false;
        loop {
            let response = self
                .client
                .post(&url, token.as_deref(), &body)
                .map_err(|err| {
                    self.note_failure(&err);
                    EngineError::transport_retryable(err)
                })?;

            if response.is_success() {
                self.note_success();
                return serde_json::from_slice(&response.body).map_err(|err| {
                    EngineError::RemoteProtocol(format!("decoding {endpoint} response: {err}"))
                });
            }

            if matches!(response.status, 401 | 403) && self.refresh_on_unauthorized && !refreshed {
                refreshed = true;
                match self.tokens.refresh() {
                    Ok(fresh) => {
                        debug!(endpoint, "retrying with refreshed token");
                        token = Some(fresh);
                        continue;
                    }
                    Err(err) => return Err(EngineError::Unauthorized(err)),
                }
            }

            return Err(response_error(&response));
        }
    }
}

/// Maps a non-2xx response to a typed error.
///
/// The response body's `code` is consulted first, so well-formed remotes get
/// exact classifications; bare statuses fall back to the class the status
/// implies. Statuses that signal contention or server trouble (408, 423,
/// 425, 429, 5xx) come back retryable.
fn response_error(response: &HttpResponse) -> EngineError {
    let parsed: Option<ErrorResponse> = serde_json::from_slice(&response.body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| format!("http status {}", response.status));

    if let Some(body) = parsed.as_ref() {
        match body.code.as_str() {
            ErrorResponse::CONSTRAINT_VIOLATION => {
                return EngineError::ConstraintViolation(message)
            }
            ErrorResponse::NOT_FOUND => {
                return EngineError::NotFound {
                    table: String::new(),
                    record_id: String::new(),
                }
            }
            ErrorResponse::UNKNOWN_PROCEDURE => {
                return EngineError::UnknownProcedure { name: message }
            }
            _ => {}
        }
    }

    match response.status {
        401 | 403 => EngineError::Unauthorized(message),
        404 => EngineError::NotFound {
            table: String::new(),
            record_id: String::new(),
        },
        409 => EngineError::ConstraintViolation(message),
        408 | 423 | 425 | 429 => EngineError::transport_retryable(message),
        500..=599 => EngineError::transport_retryable(message),
        status => EngineError::transport_fatal(format!("http status {status}: {message}")),
    }
}

impl<C: HttpClient> RemoteStore for HttpRemote<C> {
    fn select(&self, table: &str, query: &Query) -> EngineResult<Vec<FieldMap>> {
        let request = SelectRequest {
            store_id: self.store_id.clone(),
            table: table.to_string(),
            query: query.clone(),
        };
        let response: RowsResponse = self.post_json("/v1/select", &request)?;
        Ok(response.rows)
    }

    fn select_one(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>> {
        let query = Query::all()
            .eq("id", Value::String(id.as_str().to_string()))
            .limit(1);
        Ok(self.select(table, &query)?.into_iter().next())
    }

    fn insert(&self, table: &str, payload: &FieldMap) -> EngineResult<FieldMap> {
        let mutation = match tillsync_model::row_record_id(payload) {
            Some(id) => Mutation::insert_with_id(table, id, payload.clone()),
            None => Mutation::insert(table, payload.clone()),
        };
        let request = MutateRequest {
            store_id: self.store_id.clone(),
            mutation,
        };
        let response: RecordResponse = self.post_json("/v1/mutate", &request)?;
        Ok(response.record)
    }

    fn update(&self, table: &str, id: &RecordId, patch: &FieldMap) -> EngineResult<FieldMap> {
        let request = MutateRequest {
            store_id: self.store_id.clone(),
            mutation: Mutation::update(table, id.clone(), patch.clone()),
        };
        let response: RecordResponse = self
            .post_json("/v1/mutate", &request)
            .map_err(|err| err.with_target(table, id.as_str()))?;
        Ok(response.record)
    }

    fn delete(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>> {
        let request = MutateRequest {
            store_id: self.store_id.clone(),
            mutation: Mutation::delete(table, id.clone()),
        };
        match self.post_json::<_, RecordResponse>("/v1/mutate", &request) {
            Ok(response) => Ok(Some(response.record)),
            Err(EngineError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn run_procedure(&self, request: &ProcedureRequest) -> EngineResult<ProcedureResponse> {
        self.post_json("/v1/procedures", request)
    }

    fn apply_batch(&self, request: &BatchApplyRequest) -> EngineResult<BatchApplyResponse> {
        self.post_json("/v1/sync/batch", request)
    }
}

/// A server that can answer loopback requests in-process.
///
/// Lets tests exercise the full [`HttpRemote`] encode/decode and status
/// classification path without a network.
pub trait LoopbackServer: Send + Sync {
    /// Handles one POST and produces the HTTP response.
    fn handle(&self, path: &str, token: Option<&str>, body: &[u8]) -> HttpResponse;
}

/// An [`HttpClient`] that routes requests straight to a [`LoopbackServer`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client over the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network path to the server.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, token: Option<&str>, body: &[u8]) -> Result<HttpResponse, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        let path = url.find("/v1/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle(path, token, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        tokens_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<HttpResponse, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                tokens_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for ScriptedClient {
        fn post(
            &self,
            _url: &str,
            token: Option<&str>,
            _body: &[u8],
        ) -> Result<HttpResponse, String> {
            self.tokens_seen.lock().push(token.map(str::to_string));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".into()))
        }
    }

    struct RefreshingTokens;

    impl TokenProvider for RefreshingTokens {
        fn token(&self) -> Option<String> {
            Some("stale".into())
        }

        fn refresh(&self) -> Result<String, String> {
            Ok("fresh".into())
        }
    }

    fn row(id: &str, status: &str) -> FieldMap {
        let mut row = FieldMap::new();
        row.insert("id".into(), json!(id));
        row.insert("status".into(), json!(status));
        row
    }

    #[test]
    fn select_decodes_rows() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::json(
            200,
            &RowsResponse {
                rows: vec![row("ord-1", "paid")],
            },
        ))]);
        let remote = HttpRemote::new("http://till.test/", "store-1", client);
        let rows = remote.select("orders", &Query::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("ord-1"));
        assert!(remote.last_error().is_none());
    }

    #[test]
    fn unauthorized_refreshes_token_once() {
        let error = ErrorResponse {
            code: "unauthorized".into(),
            message: "token expired".into(),
        };
        let client = ScriptedClient::new(vec![
            Ok(HttpResponse::json(401, &error)),
            Ok(HttpResponse::json(
                200,
                &RowsResponse {
                    rows: vec![row("ord-1", "paid")],
                },
            )),
        ]);
        let remote = HttpRemote::new("http://till.test", "store-1", client)
            .with_token_provider(Arc::new(RefreshingTokens));
        let rows = remote.select("orders", &Query::all()).unwrap();
        assert_eq!(rows.len(), 1);

        let seen = remote.client.tokens_seen.lock().clone();
        assert_eq!(
            seen,
            vec![Some("stale".to_string()), Some("fresh".to_string())]
        );
    }

    #[test]
    fn unauthorized_without_refresh_surfaces_auth_error() {
        let error = ErrorResponse {
            code: "unauthorized".into(),
            message: "token expired".into(),
        };
        let client = ScriptedClient::new(vec![Ok(HttpResponse::json(401, &error))]);
        let remote = HttpRemote::new("http://till.test", "store-1", client)
            .with_bearer_token("stale")
            .with_refresh_on_unauthorized(false);
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
    }

    #[test]
    fn second_unauthorized_after_refresh_is_final() {
        let error = ErrorResponse {
            code: "unauthorized".into(),
            message: "token expired".into(),
        };
        let client = ScriptedClient::new(vec![
            Ok(HttpResponse::json(401, &error)),
            Ok(HttpResponse::json(401, &error)),
        ]);
        let remote = HttpRemote::new("http://till.test", "store-1", client)
            .with_token_provider(Arc::new(RefreshingTokens));
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
        assert_eq!(remote.client.tokens_seen.lock().len(), 2);
    }

    #[test]
    fn connection_failures_are_retryable_transport_errors() {
        let client = ScriptedClient::new(vec![Err("connection refused".into())]);
        let remote = HttpRemote::new("http://till.test", "store-1", client);
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(err.is_transport());
        assert!(err.is_retryable());
        assert_eq!(remote.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn server_errors_are_retryable() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse {
            status: 503,
            body: Vec::new(),
        })]);
        let remote = HttpRemote::new("http://till.test", "store-1", client);
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn constraint_code_maps_to_constraint_violation() {
        let error = ErrorResponse {
            code: ErrorResponse::CONSTRAINT_VIOLATION.into(),
            message: "duplicate id ord-1".into(),
        };
        let client = ScriptedClient::new(vec![Ok(HttpResponse::json(409, &error))]);
        let remote = HttpRemote::new("http://till.test", "store-1", client);
        let err = remote
            .insert("orders", &row("ord-1", "paid"))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn not_found_on_update_carries_target_context() {
        let error = ErrorResponse {
            code: ErrorResponse::NOT_FOUND.into(),
            message: "no such row".into(),
        };
        let client = ScriptedClient::new(vec![Ok(HttpResponse::json(404, &error))]);
        let remote = HttpRemote::new("http://till.test", "store-1", client);
        let patch = row("ord-9", "void");
        let err = remote
            .update("orders", &RecordId::from_trusted("ord-9"), &patch)
            .unwrap_err();
        match err {
            EngineError::NotFound { table, record_id } => {
                assert_eq!(table, "orders");
                assert_eq!(record_id, "ord-9");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn delete_treats_not_found_as_absent() {
        let error = ErrorResponse {
            code: ErrorResponse::NOT_FOUND.into(),
            message: "no such row".into(),
        };
        let client = ScriptedClient::new(vec![Ok(HttpResponse::json(404, &error))]);
        let remote = HttpRemote::new("http://till.test", "store-1", client);
        let gone = remote
            .delete("orders", &RecordId::from_trusted("ord-9"))
            .unwrap();
        assert!(gone.is_none());
    }
}
