// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live client connections tagged by scope, fanning out
//! persistent `update` and transient `ephemeral` events to matching
//! subscribers.
//!
//! Each connection gets its own `mpsc` channel so delivery can be filtered
//! per scope and a sender can be excluded from its own emission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::wire::{EphemeralBody, UpdateEvent};

pub type ConnId = u64;

/// A connection's subscription scope, encoded as a tagged variant rather
/// than a subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    User,
    Session(String),
    Machine(String),
}

/// Selects which connections a given emission is routed to.
#[derive(Debug, Clone)]
pub enum Filter {
    UserScopedOnly,
    AllInterestedInSession(String),
    MachineScopedOnly(String),
    AllAuthenticated,
}

impl Filter {
    /// Pure predicate; side-effect-free so concurrent emits never race.
    pub fn matches(&self, scope: &Scope) -> bool {
        match self {
            Filter::UserScopedOnly => matches!(scope, Scope::User),
            Filter::AllInterestedInSession(sid) => {
                matches!(scope, Scope::User) || matches!(scope, Scope::Session(s) if s == sid)
            }
            Filter::MachineScopedOnly(mid) => {
                matches!(scope, Scope::User) || matches!(scope, Scope::Machine(m) if m == mid)
            }
            Filter::AllAuthenticated => true,
        }
    }
}

/// An event delivered to a connection's outbound channel.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Update(UpdateEvent),
    Ephemeral(EphemeralBody),
}

struct Connection {
    scope: Scope,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry of live connections. Holds non-owning handles — a connection
/// disappearing between lookup and emit (closed channel) is tolerated by
/// silently dropping the send rather than erroring.
pub struct EventRouter {
    connections: RwLock<HashMap<ConnId, Connection>>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self { connections: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a new connection with the given scope, returning its id and
    /// the receiving half of its outbound event channel.
    pub async fn attach(&self, scope: Scope) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(id, Connection { scope, tx });
        (id, rx)
    }

    pub async fn detach(&self, id: ConnId) {
        self.connections.write().await.remove(&id);
    }

    pub async fn scope_of(&self, id: ConnId) -> Option<Scope> {
        self.connections.read().await.get(&id).map(|c| c.scope.clone())
    }

    /// Deliver a persistent, sequenced update to every connection matching
    /// `filter`, except `skip` (the originating connection, if any).
    pub async fn emit_update(&self, event: UpdateEvent, filter: &Filter, skip: Option<ConnId>) {
        let connections = self.connections.read().await;
        for (id, conn) in connections.iter() {
            if Some(*id) == skip {
                continue;
            }
            if filter.matches(&conn.scope) {
                let _ = conn.tx.send(ServerEvent::Update(event.clone()));
            }
        }
    }

    /// Deliver a transient event with no ordering or replay guarantee.
    pub async fn emit_ephemeral(&self, body: EphemeralBody, filter: &Filter, skip: Option<ConnId>) {
        let connections = self.connections.read().await;
        for (id, conn) in connections.iter() {
            if Some(*id) == skip {
                continue;
            }
            if filter.matches(&conn.scope) {
                let _ = conn.tx.send(ServerEvent::Ephemeral(body.clone()));
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
