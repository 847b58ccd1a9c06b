// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::supervisor::mux::{MuxWindow, TerminalMux};

struct NullMux;

#[async_trait::async_trait]
impl TerminalMux for NullMux {
    async fn is_available(&self) -> bool {
        true
    }

    async fn spawn_window(
        &self,
        _command: &[String],
        _env: &std::collections::HashMap<String, String>,
        _working_dir: &std::path::Path,
    ) -> anyhow::Result<(MuxWindow, u32)> {
        Ok((MuxWindow { session_name: "null".to_owned() }, 1))
    }

    async fn kill_window(&self, _window: &MuxWindow) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_daemon_windows(&self) -> anyhow::Result<Vec<MuxWindow>> {
        Ok(Vec::new())
    }
}

fn test_state() -> ControlPlaneState {
    ControlPlaneState {
        supervisor: Arc::new(Supervisor::new(Arc::new(NullMux), vec!["p2pd".to_owned()])),
        shutdown: tokio_util::sync::CancellationToken::new(),
    }
}

#[tokio::test]
async fn session_started_resolves_tracked_child() {
    let state = test_state();
    state.supervisor.on_child_report("ignored", 555).await;
    let app = build_router(state.clone());

    let body = serde_json::json!({"sessionId": "s1", "metadata": {"hostPid": 555}});
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/session-started")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();

    use tower::ServiceExt;
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let children = state.supervisor.list().await;
    assert_eq!(children[0].1.as_deref(), Some("s1"));
}

#[tokio::test]
async fn stop_endpoint_cancels_shutdown_token() {
    let state = test_state();
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let request = axum::http::Request::builder().method("POST").uri("/stop").body(axum::body::Body::empty()).unwrap();
    use tower::ServiceExt;
    let _ = app.oneshot(request).await.unwrap();
    assert!(shutdown.is_cancelled());
}
