// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::auth::derive_token;
use axum_test::TestServer;

fn test_state() -> (Arc<AppState>, String) {
    let secret = Secret::generate().unwrap();
    let token = derive_token(&secret);
    let state = Arc::new(AppState {
        store: Arc::new(Store::new()),
        events: Arc::new(EventRouter::new()),
        rpc: Arc::new(RpcRegistry::new()),
        secret,
        snapshot: None,
    });
    (state, token)
}

#[tokio::test]
async fn health_is_public() {
    let (state, _token) = test_state();
    let server = TestServer::new(build_router(state, None)).unwrap();
    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn v1_routes_reject_missing_bearer_token() {
    let (state, _token) = test_state();
    let server = TestServer::new(build_router(state, None)).unwrap();
    let response = server.get("/v1/sessions").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn v1_routes_reject_wrong_bearer_token() {
    let (state, _token) = test_state();
    let server = TestServer::new(build_router(state, None)).unwrap();
    let response = server.get("/v1/sessions").add_header(axum::http::header::AUTHORIZATION, "Bearer wrong").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_list_session_round_trips() {
    let (state, token) = test_state();
    let server = TestServer::new(build_router(state, None)).unwrap();

    let response = server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&serde_json::json!({"tag": "T1", "metadata": "AAAA"}))
        .await;
    response.assert_status_ok();
    let session: crate::wire::Session = response.json();
    assert_eq!(session.seq, 1);
    assert_eq!(session.metadata_version, 1);

    let list = server.get("/v1/sessions").authorization_bearer(&token).await;
    list.assert_status_ok();
    let sessions: Vec<crate::wire::Session> = list.json();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, session.id);
}

#[tokio::test]
async fn artifact_header_update_on_missing_artifact_is_not_found() {
    let (state, token) = test_state();
    let server = TestServer::new(build_router(state, None)).unwrap();

    let response = server
        .put("/v1/artifacts/nonexistent/header")
        .authorization_bearer(&token)
        .json(&serde_json::json!({"value": "x", "expectedVersion": 1}))
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn artifact_header_version_conflict_returns_current_version_without_mutation() {
    let (state, token) = test_state();
    let artifact = state.store.create_artifact("a1", "h1".into(), "b1".into(), None).await;
    let server = TestServer::new(build_router(state, None)).unwrap();

    let response = server
        .put(&format!("/v1/artifacts/{}/header", artifact.id))
        .authorization_bearer(&token)
        .json(&serde_json::json!({"value": "h2", "expectedVersion": 99}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["result"], "version-mismatch");
    assert_eq!(body["version"], 1);
    assert_eq!(body["value"], "h1");
}
