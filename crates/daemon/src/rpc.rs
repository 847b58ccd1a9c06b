// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps a method name to exactly one subscriber connection and forwards
//! calls with a bounded-timeout ack protocol.
//!
//! The underlying transport (WebSocket text frames) is fire-and-forget, so
//! a correlation id is layered over it: the owning registrant's handler
//! calls [`RpcRegistry::resolve`] with the same `call_id` it received in
//! the forwarded request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::events::ConnId;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub call_id: u64,
    pub method: String,
    pub params: String,
}

#[derive(Debug, Clone)]
pub enum RpcOutcome {
    Ok(String),
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    AlreadyBound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterError {
    NotOwner,
    NotBound,
}

struct Binding {
    conn_id: ConnId,
    tx: mpsc::UnboundedSender<RpcRequest>,
}

pub struct RpcRegistry {
    bindings: RwLock<HashMap<String, Binding>>,
    pending: RwLock<HashMap<u64, oneshot::Sender<RpcOutcome>>>,
    next_call_id: AtomicU64,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        }
    }

    pub async fn register(
        &self,
        method: &str,
        conn_id: ConnId,
        tx: mpsc::UnboundedSender<RpcRequest>,
    ) -> Result<(), RegisterError> {
        let mut bindings = self.bindings.write().await;
        if bindings.contains_key(method) {
            return Err(RegisterError::AlreadyBound);
        }
        bindings.insert(method.to_owned(), Binding { conn_id, tx });
        Ok(())
    }

    pub async fn unregister(&self, method: &str, conn_id: ConnId) -> Result<(), UnregisterError> {
        let mut bindings = self.bindings.write().await;
        match bindings.get(method) {
            Some(binding) if binding.conn_id == conn_id => {
                bindings.remove(method);
                Ok(())
            }
            Some(_) => Err(UnregisterError::NotOwner),
            None => Err(UnregisterError::NotBound),
        }
    }

    /// Drop every binding owned by a disconnecting connection.
    pub async fn unregister_all(&self, conn_id: ConnId) {
        self.bindings.write().await.retain(|_, b| b.conn_id != conn_id);
    }

    /// Forward `method(params)` to its owning connection and await an ack
    /// with a 30-second deadline. Absent binding, transport failure, or
    /// timeout all surface as `RpcOutcome::Err`; none mutate any state.
    pub async fn call(&self, method: &str, params: String) -> RpcOutcome {
        let tx = {
            let bindings = self.bindings.read().await;
            match bindings.get(method) {
                Some(binding) => binding.tx.clone(),
                None => return RpcOutcome::Err(format!("no binding for method {method}")),
            }
        };

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (resolve_tx, resolve_rx) = oneshot::channel();
        self.pending.write().await.insert(call_id, resolve_tx);

        if tx.send(RpcRequest { call_id, method: method.to_owned(), params }).is_err() {
            self.pending.write().await.remove(&call_id);
            return RpcOutcome::Err("owning connection is gone".to_owned());
        }

        match tokio::time::timeout(CALL_TIMEOUT, resolve_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => RpcOutcome::Err("owning connection disconnected before acking".to_owned()),
            Err(_) => {
                self.pending.write().await.remove(&call_id);
                RpcOutcome::Err("rpc call timed out".to_owned())
            }
        }
    }

    /// Resolve a pending call by id. Called by the PublicPlane WS handler
    /// when the owning registrant's ack frame arrives. A stale or unknown
    /// `call_id` (already timed out, or never existed) is silently ignored.
    pub async fn resolve(&self, call_id: u64, outcome: RpcOutcome) {
        if let Some(tx) = self.pending.write().await.remove(&call_id) {
            let _ = tx.send(outcome);
        }
    }

    pub async fn is_bound(&self, method: &str) -> bool {
        self.bindings.read().await.contains_key(method)
    }
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
