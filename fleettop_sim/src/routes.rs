//! HTTP surface: the REST endpoints plus the live event-stream feed.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::stream;
use std::convert::Infallible;

use fleettop::types::{AgentsEnvelope, BlockRequest, ControlRequest, PoliciesEnvelope};

use crate::state::SimState;

pub fn router(state: SimState) -> Router {
    Router::new()
        .route("/v1/agents", get(api_agents))
        .route("/v1/policies", get(api_policies))
        .route("/v1/stats/stream", get(api_stream))
        .route("/v1/stats/:hostname", get(api_host_stats))
        .route("/v1/agent/:id/control", post(api_control))
        .route("/v1/agent/:id/block", post(api_block))
        .route("/v1/agent/:id/policy/:policy_id/apply", post(api_apply_policy))
        .with_state(state)
}

async fn api_agents(State(state): State<SimState>) -> Json<AgentsEnvelope> {
    let fleet = state.fleet.read().await;
    Json(AgentsEnvelope {
        agents: fleet.agents(),
    })
}

async fn api_policies(State(state): State<SimState>) -> Json<PoliciesEnvelope> {
    let fleet = state.fleet.read().await;
    Json(PoliciesEnvelope {
        policies: fleet.policies(),
    })
}

async fn api_host_stats(
    State(state): State<SimState>,
    Path(hostname): Path<String>,
) -> Response {
    let fleet = state.fleet.read().await;
    match fleet.host_sample(&hostname) {
        Some(sample) => Json(sample).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Server-push feed: one sample per period, round-robin over eligible hosts.
/// Emits a comment frame as keep-alive when nothing is eligible.
async fn api_stream(State(state): State<SimState>) -> Response {
    let sse_stream = stream::unfold(
        (state, usize::MAX, true),
        |(state, cursor, first)| async move {
            if !first {
                tokio::time::sleep(state.feed_period).await;
            }
            let (frame, cursor) = {
                let fleet = state.fleet.read().await;
                match fleet.next_active(cursor) {
                    Some((sample, idx)) => {
                        let payload = serde_json::to_string(&sample).unwrap_or_default();
                        (format!("data: {}\n\n", payload), idx)
                    }
                    None => (": idle\n\n".to_string(), cursor),
                }
            };
            Some((Ok::<Bytes, Infallible>(Bytes::from(frame)), (state, cursor, false)))
        },
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(sse_stream))
        .unwrap()
}

async fn api_control(
    State(state): State<SimState>,
    Path(id): Path<String>,
    Json(req): Json<ControlRequest>,
) -> Response {
    let mut fleet = state.fleet.write().await;
    if fleet.control(&id, req.action) {
        Json(serde_json::json!({ "ok": true })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn api_block(
    State(state): State<SimState>,
    Path(id): Path<String>,
    Json(req): Json<BlockRequest>,
) -> Response {
    let mut fleet = state.fleet.write().await;
    if fleet.set_blocked(&id, req.blocked) {
        Json(serde_json::json!({ "ok": true })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn api_apply_policy(
    State(state): State<SimState>,
    Path((id, policy_id)): Path<(String, String)>,
) -> Response {
    let mut fleet = state.fleet.write().await;
    if fleet.apply_policy(&id, &policy_id) {
        Json(serde_json::json!({ "ok": true })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
