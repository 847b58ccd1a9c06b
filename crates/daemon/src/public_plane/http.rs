// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The PublicPlane REST surface: session/machine/artifact CRUD under
//! `/v1` and `/v2`. Both HTTP and WebSocket surfaces fully implement
//! artifact CRUD against the Store (see DESIGN.md for the reasoning
//! behind that choice).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, ErrorResponse};
use crate::events::Filter;
use crate::store::WriteResult;
use crate::wire::{UpdateBody, UpdateEvent, VersionedValue};

use super::AppState;

pub fn v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/messages", get(list_messages))
        .route("/machines", post(upsert_machine).get(list_machines))
        .route("/machines/{id}", get(get_machine))
        .route("/artifacts", post(create_artifact))
        .route("/artifacts/{id}", get(get_artifact).delete(delete_artifact))
        .route("/artifacts/{id}/header", put(update_artifact_header))
        .route("/artifacts/{id}/body", put(update_artifact_body))
}

pub fn v2_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/active", get(list_active_sessions))
        .route("/sessions", get(list_sessions_paginated))
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn err(e: DaemonError, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    e.to_http_response(message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    tag: String,
    metadata: String,
    #[serde(default)]
    data_encryption_key: Option<String>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<crate::wire::Session> {
    let session = state.store.create_session(&body.tag, body.metadata, body.data_encryption_key).await;
    state.touch_snapshot();
    let seq = state.store.next_user_seq().await;
    let event = UpdateEvent {
        id: uuid::Uuid::new_v4().to_string(),
        seq,
        body: UpdateBody::NewSession { session: session.clone() },
        created_at: crate::store::now_ms(),
    };
    state.events.emit_update(event, &Filter::AllInterestedInSession(session.id.clone()), None).await;
    Ok(Json(session))
}

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Option<crate::wire::Session>> {
    Ok(Json(state.store.get_session(&id).await))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<crate::wire::Session>> {
    Json(state.store.list_sessions().await)
}

#[derive(Debug, Deserialize)]
struct ActiveQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_active_sessions(State(state): State<Arc<AppState>>, Query(q): Query<ActiveQuery>) -> Json<Vec<crate::wire::Session>> {
    Json(state.store.list_active_sessions(q.limit).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginatedQuery {
    cursor: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    changed_since: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaginatedSessions {
    sessions: Vec<crate::wire::Session>,
    next_cursor: Option<String>,
}

const CURSOR_PREFIX: &str = "cursor_v1_";

async fn list_sessions_paginated(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PaginatedQuery>,
) -> Json<PaginatedSessions> {
    let mut sessions = state.store.list_sessions().await;
    if let Some(since) = q.changed_since {
        sessions.retain(|s| s.updated_at >= since);
    }
    if let Some(cursor) = &q.cursor {
        if let Some(after_id) = cursor.strip_prefix(CURSOR_PREFIX) {
            if let Some(pos) = sessions.iter().position(|s| s.id == after_id) {
                sessions = sessions.split_off(pos + 1);
            }
        }
    }
    let next_cursor = if sessions.len() > q.limit {
        sessions.get(q.limit - 1).map(|s| format!("{CURSOR_PREFIX}{}", s.id))
    } else {
        None
    };
    sessions.truncate(q.limit);
    Json(PaginatedSessions { sessions, next_cursor })
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<bool> {
    let deleted = state.store.delete_session(&id).await;
    if deleted {
        state.touch_snapshot();
        let seq = state.store.next_user_seq().await;
        let event = UpdateEvent {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            body: UpdateBody::DeleteSession { session_id: id.clone() },
            created_at: crate::store::now_ms(),
        };
        state.events.emit_update(event, &Filter::AllInterestedInSession(id), None).await;
    }
    Json(deleted)
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<MessagesQuery>,
) -> Json<Vec<crate::wire::Message>> {
    Json(state.store.list_messages(&id, q.limit).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertMachineRequest {
    id: String,
    metadata: String,
    #[serde(default)]
    daemon_state: Option<String>,
    #[serde(default)]
    data_encryption_key: Option<String>,
}

async fn upsert_machine(State(state): State<Arc<AppState>>, Json(body): Json<UpsertMachineRequest>) -> Json<crate::wire::Machine> {
    let machine = state.store.upsert_machine(&body.id, body.metadata, body.daemon_state, body.data_encryption_key).await;
    state.touch_snapshot();
    let seq = state.store.next_user_seq().await;
    let event = UpdateEvent {
        id: uuid::Uuid::new_v4().to_string(),
        seq,
        body: UpdateBody::NewMachine { machine: machine.clone() },
        created_at: crate::store::now_ms(),
    };
    state.events.emit_update(event, &Filter::MachineScopedOnly(machine.id.clone()), None).await;
    Json(machine)
}

async fn get_machine(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Option<crate::wire::Machine>> {
    Json(state.store.get_machine(&id).await)
}

async fn list_machines(State(state): State<Arc<AppState>>) -> Json<Vec<crate::wire::Machine>> {
    Json(state.store.list_machines().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArtifactRequest {
    id: String,
    header: String,
    body: String,
    #[serde(default)]
    data_encryption_key: Option<String>,
}

async fn create_artifact(State(state): State<Arc<AppState>>, Json(body): Json<CreateArtifactRequest>) -> Json<crate::wire::Artifact> {
    let artifact = state.store.create_artifact(&body.id, body.header, body.body, body.data_encryption_key).await;
    state.touch_snapshot();
    let seq = state.store.next_user_seq().await;
    let event = UpdateEvent {
        id: uuid::Uuid::new_v4().to_string(),
        seq,
        body: UpdateBody::NewArtifact { artifact: artifact.clone() },
        created_at: crate::store::now_ms(),
    };
    state.events.emit_update(event, &Filter::AllAuthenticated, None).await;
    Json(artifact)
}

async fn get_artifact(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Option<crate::wire::Artifact>> {
    Ok(Json(state.store.get_artifact(&id).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedWriteRequest {
    value: String,
    expected_version: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
enum VersionedWriteResponse {
    Success { version: u64, value: String },
    VersionMismatch { version: u64, value: String },
}

impl From<WriteResult<String>> for VersionedWriteResponse {
    fn from(r: WriteResult<String>) -> Self {
        match r {
            WriteResult::Success { version, value } => Self::Success { version, value },
            WriteResult::VersionMismatch { version, value } => Self::VersionMismatch { version, value },
        }
    }
}

async fn update_artifact_header(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<VersionedWriteRequest>,
) -> ApiResult<VersionedWriteResponse> {
    let result = state
        .store
        .update_artifact_header(&id, body.value, body.expected_version)
        .await
        .ok_or_else(|| err(DaemonError::NotFound, "artifact not found"))?;
    if let WriteResult::Success { version, value } = &result {
        state.touch_snapshot();
        emit_artifact_update(&state, &id, Some(VersionedValue { version: *version, value: value.clone() }), None).await;
    }
    Ok(Json(result.into()))
}

async fn update_artifact_body(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<VersionedWriteRequest>,
) -> ApiResult<VersionedWriteResponse> {
    let result = state
        .store
        .update_artifact_body(&id, body.value, body.expected_version)
        .await
        .ok_or_else(|| err(DaemonError::NotFound, "artifact not found"))?;
    if let WriteResult::Success { version, value } = &result {
        state.touch_snapshot();
        emit_artifact_update(&state, &id, None, Some(VersionedValue { version: *version, value: value.clone() })).await;
    }
    Ok(Json(result.into()))
}

async fn emit_artifact_update(
    state: &AppState,
    artifact_id: &str,
    header: Option<VersionedValue>,
    body: Option<VersionedValue>,
) {
    let seq = state.store.next_user_seq().await;
    let event = UpdateEvent {
        id: uuid::Uuid::new_v4().to_string(),
        seq,
        body: UpdateBody::UpdateArtifact { artifact_id: artifact_id.to_owned(), header, body },
        created_at: crate::store::now_ms(),
    };
    state.events.emit_update(event, &Filter::AllAuthenticated, None).await;
}

async fn delete_artifact(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<bool> {
    let deleted = state.store.delete_artifact(&id).await;
    if deleted {
        state.touch_snapshot();
        let seq = state.store.next_user_seq().await;
        let event = UpdateEvent {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            body: UpdateBody::DeleteArtifact { artifact_id: id },
            created_at: crate::store::now_ms(),
        };
        state.events.emit_update(event, &Filter::AllAuthenticated, None).await;
    }
    Json(deleted)
}

pub async fn health() -> &'static str {
    "ok"
}
