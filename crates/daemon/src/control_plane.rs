// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A loopback-only HTTP surface used by the CLI front end and child
//! sessions. No authentication — loopback binding is the sole protection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::supervisor::{SpawnOptions, SpawnResult, StartedBy, Supervisor};

#[derive(Clone)]
pub struct ControlPlaneState {
    pub supervisor: Arc<Supervisor>,
    pub shutdown: tokio_util::sync::CancellationToken,
}

pub fn build_router(state: ControlPlaneState) -> Router {
    Router::new()
        .route("/session-started", post(session_started))
        .route("/list", get(list_children))
        .route("/spawn-session", post(spawn_session))
        .route("/stop-session", post(stop_session))
        .route("/stop", post(stop_daemon))
        .with_state(state)
}

/// Bind the ControlPlane to an OS-assigned loopback port and serve it in
/// the background, returning the port it bound to.
pub async fn serve(state: ControlPlaneState) -> anyhow::Result<(u16, tokio::task::JoinHandle<()>)> {
    // Literal loopback address; always parses.
    #[allow(clippy::expect_used)]
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid loopback address");
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
    });
    Ok((port, handle))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStartedRequest {
    session_id: String,
    metadata: SessionStartedMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStartedMetadata {
    host_pid: u32,
}

async fn session_started(State(state): State<ControlPlaneState>, Json(body): Json<SessionStartedRequest>) {
    state.supervisor.on_child_report(&body.session_id, body.metadata.host_pid).await;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackedChildView {
    pid: u32,
    session_id: Option<String>,
    started_by: &'static str,
}

async fn list_children(State(state): State<ControlPlaneState>) -> Json<Vec<TrackedChildView>> {
    let children = state.supervisor.list().await;
    Json(
        children
            .into_iter()
            .map(|(pid, session_id, started_by)| TrackedChildView {
                pid,
                session_id,
                started_by: match started_by {
                    StartedBy::Daemon => "daemon",
                    StartedBy::External => "external",
                },
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnSessionRequest {
    working_dir: PathBuf,
    agent: String,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    env_overrides: std::collections::HashMap<String, String>,
    #[serde(default)]
    approved_new_directory_creation: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum SpawnSessionResponse {
    Success { session_id: String },
    NeedsDirectoryApproval { path: PathBuf },
    Error { error_message: String },
}

async fn spawn_session(
    State(state): State<ControlPlaneState>,
    Json(body): Json<SpawnSessionRequest>,
) -> Json<SpawnSessionResponse> {
    let result = state
        .supervisor
        .spawn(SpawnOptions {
            working_dir: body.working_dir,
            agent: body.agent,
            auth_token: body.auth_token,
            env_overrides: body.env_overrides,
            approved_new_directory_creation: body.approved_new_directory_creation,
        })
        .await;
    Json(match result {
        SpawnResult::Success { session_id } => SpawnSessionResponse::Success { session_id },
        SpawnResult::NeedsDirectoryApproval { path } => SpawnSessionResponse::NeedsDirectoryApproval { path },
        SpawnResult::Error(error_message) => SpawnSessionResponse::Error { error_message },
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopSessionRequest {
    session_id: String,
}

async fn stop_session(State(state): State<ControlPlaneState>, Json(body): Json<StopSessionRequest>) -> Json<bool> {
    Json(state.supervisor.stop(&body.session_id).await.unwrap_or(false))
}

async fn stop_daemon(State(state): State<ControlPlaneState>) {
    state.shutdown.cancel();
}

#[cfg(test)]
#[path = "control_plane_tests.rs"]
mod tests;
