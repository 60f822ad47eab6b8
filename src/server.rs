//! Web server module for the heartbeat collector.
//!
//! Routes:
//! - `GET|HEAD /healthz`: liveness check backed by a store ping
//! - `POST /log/append` (alias `/log`): record a check-in
//! - `GET /log/last` (alias `/log/get`): recent check-ins for one host
//!
//! Every response is JSON in the [`ApiResponse`] envelope.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{MethodRouter, get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::storage::{
    AppendRequest, DEFAULT_LIMIT, LogQuery, LogRow, LogStore, MAX_LIMIT, StorageError,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LogStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.store.backend())
            .finish()
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

const STATUS_OK: &str = "ok";
const STATUS_NOT_OK: &str = "not ok";

/// JSON body returned by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<LogRow>>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            error: None,
            host: None,
            data: None,
        }
    }

    fn rows(host: String, rows: Vec<LogRow>) -> Self {
        Self {
            host: Some(host),
            data: Some(rows),
            ..Self::ok()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_NOT_OK.to_string(),
            error: Some(message.into()),
            host: None,
            data: None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Handler errors, each mapped to one HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("rows not found")]
    RowsNotFound,

    #[error("not found")]
    NoRoute,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("store unavailable")]
    Unavailable(#[source] StorageError),

    #[error("internal error")]
    Internal(#[source] StorageError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RowsNotFound | Self::NoRoute => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::RowsNotFound,
            StorageError::InvalidData(msg) => Self::BadRequest(msg),
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Database detail stays in the server log.
        if let Self::Unavailable(source) | Self::Internal(source) = &self {
            tracing::error!(error = %source, "Store request failed");
        }
        (self.status_code(), Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    let append = || with_json_405(post(append_handler));
    let read = || with_json_405(get(read_handler));

    Router::new()
        .route("/healthz", with_json_405(get(healthz_handler)))
        .route("/log/append", append())
        .route("/log", append())
        .route("/log/last", read())
        .route("/log/get", read())
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

fn with_json_405(router: MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>> {
    router.fallback(method_not_allowed_handler)
}

/// Log one request outcome.
fn log_request(
    method: &Method,
    uri: &Uri,
    host: Option<&str>,
    started: Instant,
    status: StatusCode,
) {
    tracing::info!(
        %method,
        path = uri.path(),
        host = host.unwrap_or("-"),
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = status.as_u16(),
        "Handled request"
    );
}

// =============================================================================
// Handlers
// =============================================================================

/// Liveness check. GET and HEAD only; HEAD responses carry no body.
async fn healthz_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let started = Instant::now();
    let response = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok())).into_response(),
        Err(err) => ApiError::Unavailable(err).into_response(),
    };
    log_request(&method, &uri, None, started, response.status());
    response
}

/// Record a check-in.
///
/// The body is read as raw bytes so that an empty or malformed payload maps
/// to 400 regardless of the `Content-Type` the node sent.
async fn append_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let (host, result) = match decode_append(&body) {
        Ok(req) => {
            let result = state.store.append(&req).await.map_err(ApiError::from);
            (Some(req.host), result)
        }
        Err(err) => (None, Err(err)),
    };

    let response = match result {
        Ok(()) => (StatusCode::CREATED, Json(ApiResponse::ok())).into_response(),
        Err(err) => err.into_response(),
    };
    log_request(&method, &uri, host.as_deref(), started, response.status());
    response
}

fn decode_append(body: &[u8]) -> Result<AppendRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("missing body".to_string()));
    }
    let req: AppendRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?;
    let req = req.normalized();
    req.validate()?;
    Ok(req)
}

/// Query parameters for the read routes. Kept as strings so that `since`
/// and `limit` can be clamped or rejected with our own messages.
#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    pub host: Option<String>,
    pub since: Option<String>,
    pub limit: Option<String>,
}

impl ReadParams {
    /// Build the store query.
    ///
    /// # Errors
    /// `ApiError::BadRequest` for a missing host or an invalid limit.
    pub fn to_query(&self) -> Result<LogQuery, ApiError> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing host".to_string()))?;

        Ok(LogQuery::new(host)
            .with_since(parse_since(self.since.as_deref()))
            .with_limit(parse_limit(self.limit.as_deref())?))
    }
}

/// Window in minutes. Absent or empty means no window; values that are not
/// a valid `u8` clamp to the widest window.
pub fn parse_since(raw: Option<&str>) -> u8 {
    match raw.map(str::trim) {
        None | Some("") => 0,
        Some(s) => s.parse().unwrap_or(u8::MAX),
    }
}

/// Row limit. Absent or empty means [`DEFAULT_LIMIT`]; large values clamp to
/// [`MAX_LIMIT`].
///
/// # Errors
/// `ApiError::BadRequest` for non-numeric or zero values.
pub fn parse_limit(raw: Option<&str>) -> Result<u32, ApiError> {
    let s = match raw.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_LIMIT),
        Some(s) => s,
    };
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest(format!("invalid limit: '{s}'")));
    }
    // Digits only, so the only parse failure left is overflow.
    let limit = s.parse::<u64>().unwrap_or(u64::MAX);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }
    Ok(limit.min(u64::from(MAX_LIMIT)) as u32)
}

/// Recent check-ins for one host, newest first.
async fn read_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    params: Result<Query<ReadParams>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected query string");
            ReadParams::default()
        }
    };

    let response = match params.to_query() {
        Ok(query) => match state.store.read(&query).await {
            Ok(rows) => {
                (StatusCode::OK, Json(ApiResponse::rows(query.host, rows))).into_response()
            }
            Err(err) => ApiError::from(err).into_response(),
        },
        Err(err) => err.into_response(),
    };
    log_request(&method, &uri, params.host.as_deref(), started, response.status());
    response
}

async fn method_not_allowed_handler(method: Method, uri: Uri) -> Response {
    let started = Instant::now();
    let response = ApiError::MethodNotAllowed.into_response();
    log_request(&method, &uri, None, started, response.status());
    response
}

async fn not_found_handler(method: Method, uri: Uri) -> Response {
    let started = Instant::now();
    let response = ApiError::NoRoute.into_response();
    log_request(&method, &uri, None, started, response.status());
    response
}
