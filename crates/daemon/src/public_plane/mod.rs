// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The external HTTP + WebSocket surface bound to a LAN interface. Glues
//! the shared-secret auth layer, Store, EventRouter and RpcRegistry; also
//! serves a static web-app bundle with single-page-app fallback.

pub mod http;
pub mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{self, Secret};
use crate::error::DaemonError;
use crate::events::EventRouter;
use crate::rpc::RpcRegistry;
use crate::store::{SnapshotHandle, Store};

pub struct AppState {
    pub store: Arc<Store>,
    pub events: Arc<EventRouter>,
    pub rpc: Arc<RpcRegistry>,
    pub secret: Secret,
    /// `None` when snapshotting is disabled (e.g. tests). Mutating routes
    /// call [`AppState::touch_snapshot`] to schedule a debounced write.
    pub snapshot: Option<Arc<SnapshotHandle>>,
}

impl AppState {
    pub fn touch_snapshot(&self) {
        if let Some(snapshot) = &self.snapshot {
            snapshot.mark_dirty();
        }
    }
}

/// Build the full PublicPlane router: `/health` (public), `/v1`/`/v2`
/// (bearer-gated REST), `/ws` (bearer-gated via query token), and a static
/// bundle fallback for everything else (SPA routing).
pub fn build_router(state: Arc<AppState>, web_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/health", get(http::health))
        .nest("/v1", http::v1_router())
        .nest("/v2", http::v2_router())
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    match web_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => api,
    }
}

pub async fn serve(state: Arc<AppState>, host: &str, web_dir: Option<PathBuf>, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let addr: SocketAddr = format!("{host}:0").parse()?;
    let listener = TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    let router = build_router(state, web_dir);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    Ok((bound, handle))
}

/// Bearer-token middleware. Exempt: `/health`, `/ws` (auth via query
/// token inside the handler), and the static-bundle fallback routes,
/// which are not under this router's `/health`/`/v1`/`/v2`/`/ws` prefixes
/// and therefore never reach this layer at all (it's scoped to `api`).
async fn auth_layer(State(state): State<Arc<AppState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/ws" {
        return next.run(req).await;
    }

    let header = req.headers().get("authorization").and_then(|v| v.to_str().ok());
    let presented = header.and_then(|h| h.strip_prefix("Bearer "));
    let ok = match presented {
        Some(token) => auth::verify_token(token, &state.secret),
        None => false,
    };
    if !ok {
        let (status, body) = DaemonError::Unauthorized.to_http_response("missing or invalid bearer token");
        return (status, body).into_response();
    }
    next.run(req).await
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
