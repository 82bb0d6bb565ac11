//! Thin HTTP transport binding (out of scope per the core's own framing,
//! included so the crate is runnable end-to-end).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, head, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::cache::AgentListCache;
use crate::error::{ErrorBody, RegistryError};
use crate::event_stream::EventStream;
use crate::health::HealthMonitor;
use crate::lifecycle::{handle_fast_heartbeat, handle_full_heartbeat, handle_unregister, FastHeartbeatOutcome, HeartbeatPayload};
use crate::model::Agent;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub events: Arc<EventStream>,
    pub cache: AgentListCache,
    pub health_monitor: Arc<HealthMonitor>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/heartbeat", post(post_heartbeat))
        .route("/heartbeat/:id", head(head_heartbeat))
        .route("/agents/:id", delete(delete_agent))
        .route("/agents", get(list_agents))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(&self);
        (status, Json(body)).into_response()
    }
}

async fn post_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<HeartbeatPayload>,
) -> Result<Json<crate::lifecycle::HeartbeatResponse>, RegistryError> {
    let response = handle_full_heartbeat(state.store.as_ref(), state.events.as_ref(), payload).await?;
    state.cache.invalidate().await;
    Ok(Json(response))
}

async fn head_heartbeat(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    match handle_fast_heartbeat(state.store.as_ref(), &id).await {
        Ok(FastHeartbeatOutcome::NoChange) => StatusCode::OK,
        Ok(FastHeartbeatOutcome::TopologyChanged) => StatusCode::ACCEPTED,
        Ok(FastHeartbeatOutcome::ReregisterRequired) => StatusCode::GONE,
        Err(RegistryError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn delete_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, RegistryError> {
    handle_unregister(state.store.as_ref(), state.events.as_ref(), &id).await?;
    state.cache.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ListAgentsQuery {
    namespace: Option<String>,
    kind: Option<crate::model::AgentKind>,
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<Json<Vec<Agent>>, RegistryError> {
    let agents: Vec<Agent> = if let Some(cached) = state.cache.get().await {
        (*cached).clone()
    } else {
        let all = state.store.list_agents().await?;
        state.cache.set(all.clone()).await;
        all
    };

    let filtered = agents
        .into_iter()
        .filter(|a| query.namespace.as_ref().map(|ns| &a.namespace == ns).unwrap_or(true))
        .filter(|a| query.kind.map(|k| a.kind == k).unwrap_or(true))
        .collect();

    Ok(Json(filtered))
}

async fn health() -> StatusCode {
    StatusCode::OK
}
