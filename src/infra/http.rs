//! Gateway HTTP surface.
//!
//! Every request hitting the gateway is converted into a [`FetchRequest`]
//! and submitted to the controller event loop. The controller either hands
//! back a resolved snapshot or declines, in which case the gateway forwards
//! the request upstream untouched. Two routes sit next to the catch-all:
//! a health probe and the control-message endpoint that carries the
//! `REFRESH_CACHE` protocol.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::controller::{
    CacheMode, DispatchError, EventLoopHandle, EventOutcome, FetchOutcome, NetworkFetcher,
    WorkerEvent,
};
use crate::domain::{ControlMessage, FetchRequest, RequestMode, ResponseSnapshot};

/// Upper bound on buffered request bodies.
const MAX_BUFFERED_BODY: usize = 10 * 1024 * 1024;

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    pub events: EventLoopHandle,
    pub fetcher: Arc<dyn NetworkFetcher>,
    pub origin: Url,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/__scorta/message", post(control_message))
        .fallback(gateway_fetch)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Control-message endpoint. The body is the same tagged JSON the
/// controller broadcasts back to subscribed clients.
async fn control_message(
    State(state): State<GatewayState>,
    Json(message): Json<ControlMessage>,
) -> Response {
    match state.events.submit(WorkerEvent::Message(message)).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(DispatchError::Closed) => {
            warn!("control message rejected: event loop stopped");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(DispatchError::Controller(err)) => {
            warn!(error = %err, "control message failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Catch-all interception point, the gateway's analogue of a fetch event.
async fn gateway_fetch(State(state): State<GatewayState>, request: Request<Body>) -> Response {
    let fetch = match to_fetch_request(&state.origin, request).await {
        Ok(fetch) => fetch,
        Err(status) => return status.into_response(),
    };

    match state.events.submit(WorkerEvent::Fetch(fetch.clone())).await {
        Ok(EventOutcome::Fetched(FetchOutcome::Response(snapshot))) => {
            snapshot_response(snapshot)
        }
        Ok(EventOutcome::Fetched(FetchOutcome::Passthrough)) => {
            forward_upstream(state.fetcher.as_ref(), &fetch).await
        }
        Ok(outcome) => {
            warn!(?outcome, "unexpected outcome for fetch event");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(DispatchError::Closed) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(DispatchError::Controller(err)) => {
            warn!(error = %err, "fetch event failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Convert an incoming hyper request into the controller's request model,
/// buffering the body.
async fn to_fetch_request(
    origin: &Url,
    request: Request<Body>,
) -> Result<FetchRequest, StatusCode> {
    let mode = detect_mode(&request);
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = origin.join(path_and_query).map_err(|err| {
        debug!(error = %err, uri = %parts.uri, "unparseable request uri");
        StatusCode::BAD_REQUEST
    })?;

    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let body = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    Ok(FetchRequest {
        method: parts.method,
        url,
        mode,
        headers,
        body,
    })
}

/// A GET is a navigation when the browser says so (`Sec-Fetch-Mode`) or,
/// failing that, when it asks for an HTML document.
fn detect_mode(request: &Request<Body>) -> RequestMode {
    if request.method() != axum::http::Method::GET {
        return RequestMode::Subresource;
    }

    let sec_fetch_mode = request
        .headers()
        .get("sec-fetch-mode")
        .and_then(|value| value.to_str().ok());
    if sec_fetch_mode == Some("navigate") {
        return RequestMode::Navigate;
    }
    if sec_fetch_mode.is_some() {
        return RequestMode::Subresource;
    }

    let accepts_html = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/html"));
    if accepts_html && !has_file_extension(request.uri().path()) {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    }
}

/// A path whose final segment carries an extension is an asset fetch, not
/// a document load, whatever the Accept header claims.
fn has_file_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}

/// Build an axum response from a resolved snapshot.
fn snapshot_response(snapshot: ResponseSnapshot) -> Response {
    let mut builder = Response::builder().status(snapshot.status);
    for (name, value) in snapshot.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(snapshot.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Forward a declined request to the upstream without touching any
/// partition.
async fn forward_upstream(fetcher: &dyn NetworkFetcher, request: &FetchRequest) -> Response {
    match fetcher.fetch(request, CacheMode::Default).await {
        Ok(snapshot) => snapshot_response(snapshot),
        Err(err) => {
            warn!(url = %request.url, error = %err, "passthrough forward failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "message": "upstream unreachable" })),
            )
                .into_response()
        }
    }
}
