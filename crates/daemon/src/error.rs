// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error taxonomy for the daemon.
///
/// Every per-request error is recovered locally and converted to either an
/// HTTP response or a `{result: "error", ...}` WebSocket callback body.
/// `Fatal` is the only variant that should ever reach `DaemonLifecycle`'s
/// shutdown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DaemonError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request")]
    BadRequest,
    #[error("not found")]
    NotFound,
    #[error("version conflict")]
    VersionConflict,
    #[error("unsupported")]
    Unsupported,
    #[error("supervisor error")]
    SupervisorError,
    #[error("timeout")]
    Timeout,
    #[error("internal error")]
    Internal,
    /// Uncaught exception, lock acquisition failure, missing terminal
    /// multiplexer, or loss of state-file ownership. Never produced by a
    /// request handler — `DaemonLifecycle` observes these as `anyhow::Error`
    /// and triggers graceful shutdown; this variant exists only to keep the
    /// taxonomy complete for anything that does need to tag it.
    #[error("fatal")]
    Fatal,
}

impl DaemonError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::VersionConflict => StatusCode::CONFLICT,
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,
            Self::SupervisorError => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::Unsupported => "UNSUPPORTED",
            Self::SupervisorError => "SUPERVISOR_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
            Self::Fatal => "FATAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        (self.http_status(), Json(ErrorResponse { error: self.to_error_body(message) }))
    }
}

/// Top-level error envelope shared across HTTP and WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
