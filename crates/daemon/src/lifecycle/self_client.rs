// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon registers itself as a machine-scoped client of its own
//! PublicPlane so that mobile/web clients can reach the Supervisor and the
//! daemon's own shutdown switch through the same `rpc-call` path they use
//! for every other machine.
//!
//! Unlike a real WebSocket connection this is entirely in-process: the
//! "connection" is an [`EventRouter`] attachment plus an `RpcRequest`
//! channel drained by a task that dispatches straight into the
//! [`Supervisor`] instead of round-tripping frames over a socket.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{ConnId, EventRouter, Scope};
use crate::rpc::{RpcOutcome, RpcRequest, RpcRegistry};
use crate::supervisor::{SpawnOptions, SpawnResult, Supervisor};

/// The handful of methods every daemon generation registers for itself.
const SELF_METHODS: &[&str] =
    &["spawn-remcli-session", "stop-session", "stop-daemon", "fs-read-file", "fs-write-file", "fs-list-dir", "exec"];

/// Attach the self-client connection, register its methods, and spawn the
/// task that services forwarded RPC calls. Returns the connection id so
/// shutdown can detach it.
pub async fn spawn(
    events: Arc<EventRouter>,
    rpc: Arc<RpcRegistry>,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
    machine_id: String,
) -> ConnId {
    let (conn_id, mut outbound_rx) = events.attach(Scope::Machine(machine_id)).await;
    let (tx, mut rpc_rx) = mpsc::unbounded_channel::<RpcRequest>();

    for method in SELF_METHODS.iter().copied() {
        if rpc.register(method, conn_id, tx.clone()).await.is_err() {
            tracing::warn!(method = %method, "self-client method already bound; another generation's stale binding?");
        }
    }

    tokio::spawn(async move {
        loop {
            tokio::select! {
                // The self-client is never a subscriber target for update/
                // ephemeral fan-out in practice, but the channel must still
                // be drained or it grows unboundedly.
                event = outbound_rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
                request = rpc_rx.recv() => {
                    match request {
                        Some(request) => {
                            let call_id = request.call_id;
                            let outcome = dispatch(&supervisor, &shutdown, &request).await;
                            rpc.resolve(call_id, outcome).await;
                        }
                        None => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });

    conn_id
}

async fn dispatch(supervisor: &Supervisor, shutdown: &CancellationToken, request: &RpcRequest) -> RpcOutcome {
    let params: Value = serde_json::from_str(&request.params).unwrap_or(Value::Null);
    match request.method.as_str() {
        "spawn-remcli-session" => spawn_remcli_session(supervisor, &params).await,
        "stop-session" => stop_session(supervisor, &params).await,
        "stop-daemon" => {
            shutdown.cancel();
            RpcOutcome::Ok(json!({}).to_string())
        }
        "fs-read-file" => fs_read_file(&params),
        "fs-write-file" => fs_write_file(&params),
        "fs-list-dir" => fs_list_dir(&params),
        "exec" => exec(&params).await,
        other => RpcOutcome::Err(format!("no self-client handler for method {other}")),
    }
}

async fn spawn_remcli_session(supervisor: &Supervisor, params: &Value) -> RpcOutcome {
    let Some(directory) = params.get("directory").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `directory`".to_owned());
    };
    let Some(agent) = params.get("agent").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `agent`".to_owned());
    };
    let auth_token = params.get("authToken").and_then(Value::as_str).map(str::to_owned);
    let env_overrides: HashMap<String, String> = params
        .get("envOverrides")
        .and_then(Value::as_object)
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned()))).collect())
        .unwrap_or_default();
    let approved = params.get("approvedNewDirectoryCreation").and_then(Value::as_bool).unwrap_or(false);

    let result = supervisor
        .spawn(SpawnOptions {
            working_dir: directory.into(),
            agent: agent.to_owned(),
            auth_token,
            env_overrides,
            approved_new_directory_creation: approved,
        })
        .await;

    let body = match result {
        SpawnResult::Success { session_id } => json!({"type": "success", "sessionId": session_id}),
        SpawnResult::NeedsDirectoryApproval { path } => {
            json!({"type": "needs-directory-approval", "path": path.display().to_string()})
        }
        SpawnResult::Error(error_message) => json!({"type": "error", "errorMessage": error_message}),
    };
    RpcOutcome::Ok(body.to_string())
}

async fn stop_session(supervisor: &Supervisor, params: &Value) -> RpcOutcome {
    let Some(session_id) = params.get("sessionId").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `sessionId`".to_owned());
    };
    match supervisor.stop(session_id).await {
        Ok(stopped) => RpcOutcome::Ok(json!({"stopped": stopped}).to_string()),
        Err(_) => RpcOutcome::Err("failed to stop session".to_owned()),
    }
}

fn fs_read_file(params: &Value) -> RpcOutcome {
    let Some(path) = params.get("path").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `path`".to_owned());
    };
    match std::fs::read_to_string(path) {
        Ok(content) => RpcOutcome::Ok(json!({"content": content}).to_string()),
        Err(err) => RpcOutcome::Err(err.to_string()),
    }
}

fn fs_write_file(params: &Value) -> RpcOutcome {
    let (Some(path), Some(content)) =
        (params.get("path").and_then(Value::as_str), params.get("content").and_then(Value::as_str))
    else {
        return RpcOutcome::Err("missing `path` or `content`".to_owned());
    };
    match std::fs::write(path, content) {
        Ok(()) => RpcOutcome::Ok(json!({"written": true}).to_string()),
        Err(err) => RpcOutcome::Err(err.to_string()),
    }
}

fn fs_list_dir(params: &Value) -> RpcOutcome {
    let Some(path) = params.get("path").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `path`".to_owned());
    };
    match std::fs::read_dir(path) {
        Ok(entries) => {
            let names: Vec<String> =
                entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect();
            RpcOutcome::Ok(json!({"entries": names}).to_string())
        }
        Err(err) => RpcOutcome::Err(err.to_string()),
    }
}

async fn exec(params: &Value) -> RpcOutcome {
    let Some(command) = params.get("command").and_then(Value::as_str) else {
        return RpcOutcome::Err("missing `command`".to_owned());
    };
    let args: Vec<String> = params
        .get("args")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();

    match tokio::process::Command::new(command).args(&args).output().await {
        Ok(output) => RpcOutcome::Ok(
            json!({
                "exitCode": output.status.code(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            })
            .to_string(),
        ),
        Err(err) => RpcOutcome::Err(err.to_string()),
    }
}
