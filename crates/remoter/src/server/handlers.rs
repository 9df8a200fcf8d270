//! Request handlers. Each one extracts ids from the path and defers to the
//! registry; lookup failures become JSON error strings with the registry's
//! status code.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::args::Args;
use crate::handles::EventId;
use crate::handles::FutureId;
use crate::handles::InstanceId;
use crate::handles::PeerId;
use crate::queue;
use crate::registry;
use crate::registry::InstanceRegistry;
use crate::transport::ASYNC_HEADER;

type Registry = Arc<InstanceRegistry>;

/// A failed request, rendered as `(status, "message")`.
enum ApiError {
    Registry(registry::Error),
    BadHeader(String),
}

impl From<registry::Error> for ApiError {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Registry(e) => (
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.to_string(),
            ),
            Self::BadHeader(value) => (
                StatusCode::BAD_REQUEST,
                format!("{} must be a peer id, got '{}'", ASYNC_HEADER, value),
            ),
        };
        debug!(status = %status, error = %message, "request failed");
        (status, Json(Value::String(message))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Create the Axum router for the session protocol.
///
/// A session method named `player` is shadowed by the peer-creation route.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/{type_name}", post(new_instance))
        .route("/{type_name}/{instance}/player", post(new_peer))
        .route("/{type_name}/{instance}/player/{peer}/e", get(list_events))
        .route("/{type_name}/{instance}/player/{peer}/e/{event}", post(ack_event))
        .route("/{type_name}/{instance}/player/{peer}/f", get(list_futures))
        .route("/{type_name}/{instance}/player/{peer}/f/{future}", delete(ack_future))
        .route("/{type_name}/{instance}/{method}", post(invoke))
        .with_state(registry)
}

async fn new_instance(
    State(registry): State<Registry>,
    Path(type_name): Path<String>,
) -> ApiResult<Json<InstanceId>> {
    Ok(Json(registry.new_instance(&type_name)?))
}

async fn new_peer(
    State(registry): State<Registry>,
    Path((type_name, instance)): Path<(String, InstanceId)>,
) -> ApiResult<Json<PeerId>> {
    Ok(Json(registry.new_peer(&type_name, instance)?))
}

async fn list_events(
    State(registry): State<Registry>,
    Path((type_name, instance, peer)): Path<(String, InstanceId, PeerId)>,
) -> ApiResult<Json<Value>> {
    let events = registry.events(&type_name, instance, peer)?;
    Ok(Json(queue::events_to_wire(&events)))
}

async fn ack_event(
    State(registry): State<Registry>,
    Path((type_name, instance, peer, event)): Path<(String, InstanceId, PeerId, EventId)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let result = serde_json::from_slice(&body).unwrap_or_else(|e| {
        if !body.is_empty() {
            warn!(event = %event, error = %e, "malformed ack body, acking with null");
        }
        Value::Null
    });
    registry.ack_event(&type_name, instance, peer, event, result)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_futures(
    State(registry): State<Registry>,
    Path((type_name, instance, peer)): Path<(String, InstanceId, PeerId)>,
) -> ApiResult<Json<Value>> {
    let futures = registry.futures(&type_name, instance, peer)?;
    Ok(Json(queue::futures_to_wire(futures)))
}

async fn ack_future(
    State(registry): State<Registry>,
    Path((type_name, instance, peer, future)): Path<(String, InstanceId, PeerId, FutureId)>,
) -> ApiResult<StatusCode> {
    registry.ack_future(&type_name, instance, peer, future)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invoke(
    State(registry): State<Registry>,
    Path((type_name, instance, method)): Path<(String, InstanceId, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let args = Args::from_slice(&body);

    let Some(raw) = headers.get(ASYNC_HEADER) else {
        return Ok(Json(registry.invoke(&type_name, instance, &method, args).await?));
    };

    let text = String::from_utf8_lossy(raw.as_bytes()).into_owned();
    let peer = text
        .trim()
        .parse::<u64>()
        .map(PeerId)
        .map_err(|_| ApiError::BadHeader(text.clone()))?;

    let future = registry.invoke_long_running(&type_name, instance, peer, &method, args)?;
    Ok(Json(Value::from(future.0)))
}
