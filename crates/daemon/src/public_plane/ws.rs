// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The PublicPlane WebSocket surface: a single endpoint under a fixed
//! path. Handshake carries `{token, clientType, sessionId?, machineId?}`;
//! rejected unless the token verifies and the scope-required id is
//! present.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::events::{ConnId, Filter, Scope, ServerEvent};
use crate::rpc::{RegisterError, RpcOutcome, RpcRequest, UnregisterError};
use crate::store::{now_ms, WriteResult};
use crate::wire::{EncryptedContent, EphemeralBody, UpdateBody, UpdateEvent, VersionedValue};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    #[serde(rename = "clientType")]
    pub client_type: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "machineId")]
    pub machine_id: Option<String>,
}

pub async fn ws_handler(State(state): State<Arc<AppState>>, Query(query): Query<WsQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let presented = query.token.clone().unwrap_or_default();
    if !auth::verify_token(&presented, &state.secret) {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    let scope = match query.client_type.as_deref() {
        Some("session") => match query.session_id.clone() {
            Some(sid) => Scope::Session(sid),
            None => {
                return axum::http::Response::builder()
                    .status(400)
                    .body(axum::body::Body::from("sessionId required for session scope"))
                    .unwrap_or_default()
                    .into_response();
            }
        },
        Some("machine") => match query.machine_id.clone() {
            Some(mid) => Scope::Machine(mid),
            None => {
                return axum::http::Response::builder()
                    .status(400)
                    .body(axum::body::Body::from("machineId required for machine scope"))
                    .unwrap_or_default()
                    .into_response();
            }
        },
        _ => Scope::User,
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, scope))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, scope: Scope) {
    let (conn_id, mut outbound_rx) = state.events.attach(scope).await;
    let (rpc_request_tx, mut rpc_request_rx) = tokio::sync::mpsc::unbounded_channel::<RpcRequest>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        if ws_tx.send(Message::Text(server_event_to_json(event).to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            request = rpc_request_rx.recv() => {
                match request {
                    Some(request) => {
                        let frame = json!({
                            "type": "rpc-request",
                            "callId": request.call_id,
                            "method": request.method,
                            "params": request.params,
                        });
                        if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = dispatch(&state, conn_id, &rpc_request_tx, &text).await {
                            if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.events.detach(conn_id).await;
    state.rpc.unregister_all(conn_id).await;
}

fn server_event_to_json(event: ServerEvent) -> Value {
    match event {
        ServerEvent::Update(update) => json!({ "type": "update", "id": update.id, "seq": update.seq, "body": update.body, "createdAt": update.created_at }),
        ServerEvent::Ephemeral(body) => {
            let mut value = serde_json::to_value(&body).unwrap_or(Value::Null);
            if let Value::Object(ref mut map) = value {
                map.insert("type".to_owned(), Value::String("ephemeral".to_owned()));
            }
            value
        }
    }
}

fn filter_for(scope: &Scope) -> Filter {
    match scope {
        Scope::User => Filter::UserScopedOnly,
        Scope::Session(sid) => Filter::AllInterestedInSession(sid.clone()),
        Scope::Machine(mid) => Filter::MachineScopedOnly(mid.clone()),
    }
}

async fn emit_update(state: &AppState, body: UpdateBody, filter: &Filter, skip: Option<ConnId>) {
    state.touch_snapshot();
    let seq = state.store.next_user_seq().await;
    let event = UpdateEvent { id: uuid::Uuid::new_v4().to_string(), seq, body, created_at: now_ms() };
    state.events.emit_update(event, filter, skip).await;
}

/// Parse and handle one inbound client frame, returning the direct
/// (non-broadcast) callback reply, if the event type has one.
async fn dispatch(
    state: &AppState,
    conn_id: ConnId,
    rpc_request_tx: &tokio::sync::mpsc::UnboundedSender<RpcRequest>,
    text: &str,
) -> Option<Value> {
    let msg: Value = serde_json::from_str(text).ok()?;
    let kind = msg.get("type").and_then(|v| v.as_str())?;

    match kind {
        "ping" => Some(json!({"type": "pong"})),

        "message" => {
            let sid = msg.get("sid")?.as_str()?.to_owned();
            let content = msg.get("message")?.as_str()?.to_owned();
            let local_id = msg.get("localId").and_then(|v| v.as_str()).map(str::to_owned);
            let message = state.store.append_message(&sid, EncryptedContent::wrap(content), local_id).await?;
            emit_update(state, UpdateBody::NewMessage { message }, &Filter::AllInterestedInSession(sid), Some(conn_id)).await;
            None
        }

        "session-alive" => {
            let sid = msg.get("sid")?.as_str()?.to_owned();
            let thinking = msg.get("thinking").and_then(|v| v.as_bool()).unwrap_or(false);
            state.store.set_session_active(&sid, true).await;
            state
                .events
                .emit_ephemeral(
                    EphemeralBody::Activity { session_id: sid.clone(), thinking, active_at: now_ms() },
                    &filter_for(&Scope::Session(sid)),
                    Some(conn_id),
                )
                .await;
            None
        }

        "session-end" => {
            let sid = msg.get("sid")?.as_str()?.to_owned();
            state.store.set_session_active(&sid, false).await;
            None
        }

        "update-metadata" => {
            let sid = msg.get("sid")?.as_str()?.to_owned();
            let value = msg.get("metadata")?.as_str()?.to_owned();
            let expected_version = msg.get("expectedVersion")?.as_u64()?;
            let result = state.store.update_session_metadata(&sid, value, expected_version).await?;
            if let WriteResult::Success { version, value } = &result {
                emit_update(
                    state,
                    UpdateBody::UpdateSession {
                        session_id: sid.clone(),
                        metadata: Some(VersionedValue { version: *version, value: value.clone() }),
                        agent_state: None,
                    },
                    &Filter::AllInterestedInSession(sid),
                    None,
                )
                .await;
            }
            Some(versioned_reply(&result, "metadata"))
        }

        "update-state" => {
            let sid = msg.get("sid")?.as_str()?.to_owned();
            let value = msg.get("agentState")?.as_str()?.to_owned();
            let expected_version = msg.get("expectedVersion")?.as_u64()?;
            let result = state.store.update_session_state(&sid, value, expected_version).await?;
            if let WriteResult::Success { version, value } = &result {
                emit_update(
                    state,
                    UpdateBody::UpdateSession {
                        session_id: sid.clone(),
                        metadata: None,
                        agent_state: Some(VersionedValue { version: *version, value: value.clone() }),
                    },
                    &Filter::AllInterestedInSession(sid),
                    None,
                )
                .await;
            }
            Some(versioned_reply(&result, "agentState"))
        }

        "machine-alive" => {
            let mid = msg.get("mid")?.as_str()?.to_owned();
            state.events.emit_ephemeral(EphemeralBody::MachineActivity { machine_id: mid }, &Filter::UserScopedOnly, Some(conn_id)).await;
            None
        }

        "machine-update-metadata" => {
            let mid = msg.get("mid")?.as_str()?.to_owned();
            let value = msg.get("metadata")?.as_str()?.to_owned();
            let expected_version = msg.get("expectedVersion")?.as_u64()?;
            let result = state.store.update_machine_metadata(&mid, value, expected_version).await?;
            if let WriteResult::Success { version, value } = &result {
                emit_update(
                    state,
                    UpdateBody::UpdateMachine {
                        machine_id: mid.clone(),
                        metadata: Some(VersionedValue { version: *version, value: value.clone() }),
                        daemon_state: None,
                    },
                    &Filter::MachineScopedOnly(mid),
                    None,
                )
                .await;
            }
            Some(versioned_reply(&result, "metadata"))
        }

        "machine-update-state" => {
            let mid = msg.get("mid")?.as_str()?.to_owned();
            let value = msg.get("daemonState")?.as_str()?.to_owned();
            let expected_version = msg.get("expectedVersion")?.as_u64()?;
            let result = state.store.update_machine_daemon_state(&mid, value, expected_version).await?;
            if let WriteResult::Success { version, value } = &result {
                emit_update(
                    state,
                    UpdateBody::UpdateMachine {
                        machine_id: mid.clone(),
                        metadata: None,
                        daemon_state: Some(VersionedValue { version: *version, value: value.clone() }),
                    },
                    &Filter::MachineScopedOnly(mid),
                    None,
                )
                .await;
            }
            Some(versioned_reply(&result, "daemonState"))
        }

        "artifact-create" => {
            let id = msg.get("id")?.as_str()?.to_owned();
            let header = msg.get("header")?.as_str()?.to_owned();
            let body = msg.get("body")?.as_str()?.to_owned();
            let dek = msg.get("dataEncryptionKey").and_then(|v| v.as_str()).map(str::to_owned);
            let artifact = state.store.create_artifact(&id, header, body, dek).await;
            emit_update(state, UpdateBody::NewArtifact { artifact: artifact.clone() }, &Filter::AllAuthenticated, Some(conn_id)).await;
            Some(json!({"type": "artifact-create", "artifact": artifact}))
        }

        "artifact-read" => {
            let id = msg.get("id")?.as_str()?.to_owned();
            let artifact = state.store.get_artifact(&id).await;
            Some(json!({"type": "artifact-read", "artifact": artifact}))
        }

        "artifact-update" => {
            let id = msg.get("id")?.as_str()?.to_owned();
            let mut header_result = None;
            let mut body_result = None;
            if let (Some(value), Some(expected)) = (msg.get("header").and_then(|v| v.as_str()), msg.get("headerExpectedVersion").and_then(|v| v.as_u64())) {
                header_result = state.store.update_artifact_header(&id, value.to_owned(), expected).await;
            }
            if let (Some(value), Some(expected)) = (msg.get("body").and_then(|v| v.as_str()), msg.get("bodyExpectedVersion").and_then(|v| v.as_u64())) {
                body_result = state.store.update_artifact_body(&id, value.to_owned(), expected).await;
            }
            let header_versioned = as_versioned(&header_result);
            let body_versioned = as_versioned(&body_result);
            if header_versioned.is_some() || body_versioned.is_some() {
                emit_update(
                    state,
                    UpdateBody::UpdateArtifact { artifact_id: id, header: header_versioned, body: body_versioned },
                    &Filter::AllAuthenticated,
                    None,
                )
                .await;
            }
            Some(json!({
                "type": "artifact-update",
                "header": header_result.map(|r| result_tag(&r)),
                "body": body_result.map(|r| result_tag(&r)),
            }))
        }

        "artifact-delete" => {
            let id = msg.get("id")?.as_str()?.to_owned();
            let deleted = state.store.delete_artifact(&id).await;
            if deleted {
                state.touch_snapshot();
                emit_update(state, UpdateBody::DeleteArtifact { artifact_id: id }, &Filter::AllAuthenticated, Some(conn_id)).await;
            }
            Some(json!({"type": "artifact-delete", "deleted": deleted}))
        }

        "usage-report" => {
            let tokens = msg.get("tokens").and_then(|v| v.as_u64()).unwrap_or(0);
            let cost = msg.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let session_id = msg.get("sessionId").and_then(|v| v.as_str()).map(str::to_owned);
            state
                .events
                .emit_ephemeral(EphemeralBody::Usage { session_id, tokens, cost }, &Filter::UserScopedOnly, Some(conn_id))
                .await;
            None
        }

        "rpc-register" => {
            let method = msg.get("method")?.as_str()?.to_owned();
            match state.rpc.register(&method, conn_id, rpc_request_tx.clone()).await {
                Ok(()) => Some(json!({"type": "rpc-registered", "method": method})),
                Err(RegisterError::AlreadyBound) => Some(json!({"type": "rpc-error", "method": method, "error": "already bound"})),
            }
        }

        "rpc-unregister" => {
            let method = msg.get("method")?.as_str()?.to_owned();
            match state.rpc.unregister(&method, conn_id).await {
                Ok(()) => Some(json!({"type": "rpc-unregistered", "method": method})),
                Err(UnregisterError::NotOwner) => Some(json!({"type": "rpc-error", "method": method, "error": "not owner"})),
                Err(UnregisterError::NotBound) => Some(json!({"type": "rpc-error", "method": method, "error": "not bound"})),
            }
        }

        "rpc-call" => {
            let method = msg.get("method")?.as_str()?.to_owned();
            let params = msg.get("params").cloned().unwrap_or(Value::Null).to_string();
            let outcome = state.rpc.call(&method, params).await;
            Some(match outcome {
                RpcOutcome::Ok(result) => json!({"type": "rpc-call", "ok": true, "result": result}),
                RpcOutcome::Err(error) => json!({"type": "rpc-call", "ok": false, "error": error}),
            })
        }

        "rpc-ack" => {
            let call_id = msg.get("callId")?.as_u64()?;
            let outcome = match msg.get("ok").and_then(|v| v.as_bool()) {
                Some(true) => RpcOutcome::Ok(msg.get("result").and_then(|v| v.as_str()).unwrap_or_default().to_owned()),
                _ => RpcOutcome::Err(msg.get("error").and_then(|v| v.as_str()).unwrap_or("rpc error").to_owned()),
            };
            state.rpc.resolve(call_id, outcome).await;
            None
        }

        _ => Some(json!({"type": "error", "message": format!("unrecognised event type {kind}")})),
    }
}

fn as_versioned(result: &Option<WriteResult<String>>) -> Option<VersionedValue> {
    match result {
        Some(WriteResult::Success { version, value }) => Some(VersionedValue { version: *version, value: value.clone() }),
        _ => None,
    }
}

fn result_tag(result: &WriteResult<String>) -> &'static str {
    match result {
        WriteResult::Success { .. } => "success",
        WriteResult::VersionMismatch { .. } => "version-mismatch",
    }
}

fn versioned_reply(result: &WriteResult<String>, field_name: &str) -> Value {
    let (result_tag, version, value) = match result {
        WriteResult::Success { version, value } => ("success", *version, value.clone()),
        WriteResult::VersionMismatch { version, value } => ("version-mismatch", *version, value.clone()),
    };
    let mut map = serde_json::Map::new();
    map.insert("result".to_owned(), Value::String(result_tag.to_owned()));
    map.insert("version".to_owned(), Value::from(version));
    map.insert(field_name.to_owned(), Value::String(value));
    Value::Object(map)
}
