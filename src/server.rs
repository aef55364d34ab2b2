//! Read-mostly HTTP query interface
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /get_proxies` | persisted result set |
//! | `GET /check_proxy?check_proxy=IP:PORT` | single-shot probe over every protocol |
//! | `GET /stats` | live engine counters |
//!
//! Every response is JSON and asks the client to close the connection.

use crate::proxy::{Candidate, ProtocolKind, ValidationEngine};
use crate::Result;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

/// Shared handler state; the engine may be absent while starting up
#[derive(Clone, Default)]
pub struct ApiState {
    engine: Option<ValidationEngine>,
}

impl ApiState {
    pub fn new(engine: ValidationEngine) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    pub fn without_engine() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("Missing check_proxy parameter")]
    MissingParameter,
    #[error("{0}")]
    BadQuery(String),
    #[error("Checker not initialized")]
    Unavailable,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingParameter | ApiError::BadQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CheckParams {
    check_proxy: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    checked: usize,
    valid: usize,
    total: usize,
    output_target: Option<String>,
    last_run: Option<DateTime<Utc>>,
}

/// Build the query router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/get_proxies", get(get_proxies))
        .route("/check_proxy", get(check_proxy))
        .route("/stats", get(stats))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::map_response(close_connection))
        .with_state(state)
}

/// Serve the query interface until the listener fails
pub async fn serve(listener: TcpListener, state: ApiState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Bind `0.0.0.0:port` and serve
pub async fn start(port: u16, state: ApiState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "query server listening");
    serve(listener, state).await
}

async fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    error!(%detail, "request handler panicked");
    ApiError::Internal("Internal server error".to_string()).into_response()
}

async fn get_proxies(State(state): State<ApiState>) -> std::result::Result<Response, ApiError> {
    let engine = state.engine.ok_or(ApiError::Unavailable)?;
    match engine.store().snapshot().await {
        Ok(set) => Ok(Json(set).into_response()),
        Err(e) => {
            error!(error = %e, "failed to read persisted proxies");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

async fn check_proxy(
    State(state): State<ApiState>,
    query: std::result::Result<Query<CheckParams>, QueryRejection>,
) -> std::result::Result<Response, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::BadQuery(e.body_text()))?;
    let candidate = params
        .check_proxy
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(Candidate::new)
        .ok_or(ApiError::MissingParameter)?;
    let engine = state.engine.ok_or(ApiError::Unavailable)?;

    info!(%candidate, "on-demand proxy check");
    let outcome = engine.check_single(&candidate, &ProtocolKind::ALL).await;
    Ok(Json(outcome).into_response())
}

async fn stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    let response = match state.engine {
        Some(engine) => {
            let counters = engine.stats();
            StatsResponse {
                checked: counters.checked,
                valid: counters.valid,
                total: counters.total,
                output_target: Some(engine.store().path().display().to_string()),
                last_run: counters.last_run,
            }
        }
        None => StatsResponse {
            checked: 0,
            valid: 0,
            total: 0,
            output_target: None,
            last_run: None,
        },
    };
    Json(response)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
