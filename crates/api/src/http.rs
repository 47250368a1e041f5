//! HTTP boundary: routes, request decoding and structured error responses.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crelay_core::{ErrorKind, RelayError, ResourceCoordinate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::inference::{ChatReply, InferenceError, InferenceProxy};
use crate::relay::{Relay, RelayOutcome, RelayRequest, TriggerRef};

pub const API_PREFIX: &str = "/apis/util.datatunerx.io/v1beta1";

/// Boundary options.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    pub concurrency_limit: Option<usize>,
}

#[derive(Clone)]
struct HttpState {
    relay: Arc<Relay>,
    inference: Arc<InferenceProxy>,
}

/// Build the relay router.
pub fn router(relay: Arc<Relay>, inference: Arc<InferenceProxy>, config: &HttpConfig) -> Router {
    let ns = format!("{}/namespaces/{{namespace}}", API_PREFIX);
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(
            &format!("{}/{{resourceKind}}/{{resourceName}}/{{group}}/{{version}}/{{kind}}/{{objName}}", ns),
            post(relay_explicit),
        )
        .route(&format!("{}/{{resourceKind}}/{{resourceName}}", ns), post(relay_same_resource))
        .route(&format!("{}/services", ns), get(list_services))
        .route(&format!("{}/services/{{serviceName}}/inference/chat", ns), post(inference_chat))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http());

    let router = match config.concurrency_limit {
        Some(limit) => router.layer(ConcurrencyLimitLayer::new(limit)),
        None => router,
    };

    router.with_state(HttpState { relay, inference })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplicitPath {
    namespace: String,
    resource_kind: String,
    resource_name: String,
    group: String,
    version: String,
    kind: String,
    obj_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetPath {
    namespace: String,
    resource_kind: String,
    resource_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePath {
    namespace: String,
    service_name: String,
}

#[derive(Debug, Deserialize)]
struct TriggerQuery {
    #[serde(rename = "objName")]
    obj_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    message: String,
    #[serde(flatten)]
    outcome: RelayOutcome,
}

/// Error body: `{"error": {"kind", "message"}, "mutationCommitted"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: ErrorDetail,
    pub mutation_committed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// Failures surfaced by the boundary.
#[derive(Debug)]
pub enum ApiError {
    /// Body was not JSON or a required parameter is missing.
    BadRequest(String),
    NotFound(String),
    Relay(RelayError),
    Inference(InferenceError),
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        ApiError::Inference(e)
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError::Relay(e)
    }
}

/// HTTP status for a relay failure.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownResourceKind | ErrorKind::UnsupportedPayloadShape | ErrorKind::TriggerIsTarget => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::TargetNotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConflictRetryExhausted | ErrorKind::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        // Partial success: 2xx so automated retriers do not replay the mutation.
        ErrorKind::CleanupFailed => StatusCode::MULTI_STATUS,
    }
}

fn inference_status(e: &InferenceError) -> StatusCode {
    match e {
        InferenceError::InvalidInput => StatusCode::BAD_REQUEST,
        InferenceError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
        InferenceError::NoServeService(_) | InferenceError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        InferenceError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message, committed) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "InvalidRequest", m, false),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NotFound", m, false),
            ApiError::Relay(e) => {
                let kind = e.kind();
                (status_for(kind), kind.as_str(), e.to_string(), e.mutation_committed())
            }
            ApiError::Inference(e) => (inference_status(&e), e.kind(), e.to_string(), false),
        };
        if status.is_server_error() {
            warn!(status = %status, kind, message = %message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail { kind: kind.to_string(), message },
            mutation_committed: committed,
        };
        (status, Json(body)).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found(uri: axum::http::Uri) -> ApiError {
    ApiError::NotFound(format!("not found: {}", uri.path()))
}

fn decode_payload(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

async fn run(state: &HttpState, req: RelayRequest) -> Result<Json<RelayResponse>, ApiError> {
    let outcome = state.relay.relay(req).await?;
    Ok(Json(RelayResponse { message: outcome.message(), outcome }))
}

async fn relay_explicit(
    State(state): State<HttpState>,
    Path(p): Path<ExplicitPath>,
    body: Bytes,
) -> Result<Json<RelayResponse>, ApiError> {
    let payload = decode_payload(&body)?;
    let trigger = ResourceCoordinate::new(p.group, p.version, p.kind, &p.namespace, p.obj_name);
    let req = RelayRequest {
        short_kind: p.resource_kind,
        namespace: p.namespace,
        target_name: p.resource_name,
        trigger: TriggerRef::Explicit(trigger),
        payload,
    };
    run(&state, req).await
}

async fn relay_same_resource(
    State(state): State<HttpState>,
    Path(p): Path<TargetPath>,
    Query(q): Query<TriggerQuery>,
    body: Bytes,
) -> Result<Json<RelayResponse>, ApiError> {
    let name = q
        .obj_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing objName query parameter".into()))?;
    let payload = decode_payload(&body)?;
    let req = RelayRequest {
        short_kind: p.resource_kind,
        namespace: p.namespace,
        target_name: p.resource_name,
        trigger: TriggerRef::SameResource { name },
        payload,
    };
    run(&state, req).await
}

async fn list_services(
    State(state): State<HttpState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let items = state.relay.list_services(&namespace).await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

async fn inference_chat(
    State(state): State<HttpState>,
    Path(p): Path<ServicePath>,
    body: Bytes,
) -> Result<Json<ChatReply>, ApiError> {
    let body = decode_payload(&body)?;
    let reply = state.inference.chat(&p.namespace, &p.service_name, &body).await?;
    Ok(Json(reply))
}
