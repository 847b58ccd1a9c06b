// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authoritative in-memory state for sessions, messages, machines and
//! artifacts.
//!
//! A single [`tokio::sync::RwLock<StoreInner>`] is the consistency
//! boundary: every mutating operation takes the write half and performs
//! its sequence allocation and field writes under that one guard, so the
//! user and session sequence counters and the values they stamp can never
//! be observed torn.

mod snapshot;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::wire::{Artifact, Machine, Message, Session};

pub use snapshot::{save as save_snapshot, SnapshotHandle, StoreSnapshot};

/// Outcome of an optimistic-concurrency write.
#[derive(Debug, Clone)]
pub enum WriteResult<T> {
    Success { version: u64, value: T },
    VersionMismatch { version: u64, value: T },
}

pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

const ACTIVE_WINDOW_MS: i64 = 15 * 60 * 1000;

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    tag_index: HashMap<String, String>,
    messages: HashMap<String, Vec<Message>>,
    machines: HashMap<String, Machine>,
    artifacts: HashMap<String, Artifact>,
    next_user_seq: u64,
    next_session_seq: HashMap<String, u64>,
}

impl StoreInner {
    fn alloc_user_seq(&mut self) -> u64 {
        self.next_user_seq += 1;
        self.next_user_seq
    }

    fn alloc_session_seq(&mut self, session_id: &str) -> u64 {
        let entry = self.next_session_seq.entry(session_id.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }
}

pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self { inner: RwLock::new(StoreInner::default()) }
    }

    pub async fn create_session(
        &self,
        tag: &str,
        metadata: String,
        data_encryption_key: Option<String>,
    ) -> Session {
        let mut inner = self.inner.write().await;
        let now = now_ms();
        if let Some(existing_id) = inner.tag_index.get(tag).cloned() {
            // tag_index and sessions are written together everywhere; an index hit
            // without a matching session entry would be a Store bug, not caller input.
            #[allow(clippy::expect_used)]
            let session = inner.sessions.get_mut(&existing_id).expect("tag index consistency");
            session.metadata = metadata;
            session.metadata_version += 1;
            session.data_encryption_key = data_encryption_key.or_else(|| session.data_encryption_key.clone());
            session.active = true;
            session.active_at = now;
            session.updated_at = now;
            return session.clone();
        }
        let seq = inner.alloc_user_seq();
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session {
            id: id.clone(),
            tag: tag.to_owned(),
            seq,
            metadata,
            metadata_version: 1,
            agent_state: None,
            agent_state_version: 1,
            data_encryption_key,
            active: true,
            active_at: now,
            created_at: now,
            updated_at: now,
        };
        inner.tag_index.insert(tag.to_owned(), id.clone());
        inner.sessions.insert(id, session.clone());
        session
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    pub async fn get_session_by_tag(&self, tag: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        let id = inner.tag_index.get(tag)?;
        inner.sessions.get(id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub async fn list_active_sessions(&self, limit: usize) -> Vec<Session> {
        let inner = self.inner.read().await;
        let now = now_ms();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.active && now - s.active_at <= ACTIVE_WINDOW_MS)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        sessions
    }

    pub async fn delete_session(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.remove(id) {
            Some(session) => {
                inner.tag_index.remove(&session.tag);
                inner.messages.remove(id);
                inner.next_session_seq.remove(id);
                true
            }
            None => false,
        }
    }

    pub async fn update_session_metadata(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(id)?;
        if session.metadata_version != expected_version {
            return Some(WriteResult::VersionMismatch {
                version: session.metadata_version,
                value: session.metadata.clone(),
            });
        }
        session.metadata = value.clone();
        session.metadata_version += 1;
        session.updated_at = now_ms();
        Some(WriteResult::Success { version: session.metadata_version, value })
    }

    pub async fn update_session_state(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(id)?;
        if session.agent_state_version != expected_version {
            return Some(WriteResult::VersionMismatch {
                version: session.agent_state_version,
                value: session.agent_state.clone().unwrap_or_default(),
            });
        }
        session.agent_state = Some(value.clone());
        session.agent_state_version += 1;
        session.updated_at = now_ms();
        Some(WriteResult::Success { version: session.agent_state_version, value })
    }

    pub async fn set_session_active(&self, id: &str, active: bool) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(id) else { return false };
        let now = now_ms();
        session.active = active;
        session.active_at = now;
        session.updated_at = now;
        true
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        content: crate::wire::EncryptedContent,
        local_id: Option<String>,
    ) -> Option<Message> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            return None;
        }
        let seq = inner.alloc_session_seq(session_id);
        let now = now_ms();
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            seq,
            content,
            local_id,
            created_at: now,
            updated_at: now,
        };
        inner.messages.entry(session_id.to_owned()).or_default().push(message.clone());
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.active = true;
            session.active_at = now;
            session.updated_at = now;
        }
        Some(message)
    }

    /// Last `limit` messages, newest-first.
    pub async fn list_messages(&self, session_id: &str, limit: usize) -> Vec<Message> {
        let inner = self.inner.read().await;
        let Some(messages) = inner.messages.get(session_id) else { return Vec::new() };
        messages.iter().rev().take(limit).cloned().collect()
    }

    pub async fn upsert_machine(
        &self,
        id: &str,
        metadata: String,
        daemon_state: Option<String>,
        data_encryption_key: Option<String>,
    ) -> Machine {
        let mut inner = self.inner.write().await;
        let now = now_ms();
        if let Some(machine) = inner.machines.get_mut(id) {
            machine.metadata = metadata;
            machine.metadata_version += 1;
            if daemon_state.is_some() {
                machine.daemon_state = daemon_state;
                machine.daemon_state_version += 1;
            }
            machine.data_encryption_key = data_encryption_key.or_else(|| machine.data_encryption_key.clone());
            machine.active = true;
            machine.active_at = now;
            machine.updated_at = now;
            return machine.clone();
        }
        let seq = inner.alloc_user_seq();
        let machine = Machine {
            id: id.to_owned(),
            seq,
            metadata,
            metadata_version: 1,
            daemon_state,
            daemon_state_version: 1,
            data_encryption_key,
            active: true,
            active_at: now,
            created_at: now,
            updated_at: now,
        };
        inner.machines.insert(id.to_owned(), machine.clone());
        machine
    }

    pub async fn get_machine(&self, id: &str) -> Option<Machine> {
        self.inner.read().await.machines.get(id).cloned()
    }

    pub async fn list_machines(&self) -> Vec<Machine> {
        let inner = self.inner.read().await;
        let mut machines: Vec<Machine> = inner.machines.values().cloned().collect();
        machines.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        machines
    }

    pub async fn update_machine_metadata(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let machine = inner.machines.get_mut(id)?;
        if machine.metadata_version != expected_version {
            return Some(WriteResult::VersionMismatch { version: machine.metadata_version, value: machine.metadata.clone() });
        }
        machine.metadata = value.clone();
        machine.metadata_version += 1;
        machine.updated_at = now_ms();
        Some(WriteResult::Success { version: machine.metadata_version, value })
    }

    pub async fn update_machine_daemon_state(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let machine = inner.machines.get_mut(id)?;
        if machine.daemon_state_version != expected_version {
            return Some(WriteResult::VersionMismatch {
                version: machine.daemon_state_version,
                value: machine.daemon_state.clone().unwrap_or_default(),
            });
        }
        machine.daemon_state = Some(value.clone());
        machine.daemon_state_version += 1;
        machine.updated_at = now_ms();
        Some(WriteResult::Success { version: machine.daemon_state_version, value })
    }

    pub async fn create_artifact(
        &self,
        id: &str,
        header: String,
        body: String,
        data_encryption_key: Option<String>,
    ) -> Artifact {
        let mut inner = self.inner.write().await;
        let seq = inner.alloc_user_seq();
        let now = now_ms();
        let artifact = Artifact {
            id: id.to_owned(),
            seq,
            header,
            header_version: 1,
            body,
            body_version: 1,
            data_encryption_key,
            created_at: now,
            updated_at: now,
        };
        inner.artifacts.insert(id.to_owned(), artifact.clone());
        artifact
    }

    pub async fn get_artifact(&self, id: &str) -> Option<Artifact> {
        self.inner.read().await.artifacts.get(id).cloned()
    }

    pub async fn update_artifact_header(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let artifact = inner.artifacts.get_mut(id)?;
        if artifact.header_version != expected_version {
            return Some(WriteResult::VersionMismatch { version: artifact.header_version, value: artifact.header.clone() });
        }
        artifact.header = value.clone();
        artifact.header_version += 1;
        artifact.updated_at = now_ms();
        Some(WriteResult::Success { version: artifact.header_version, value })
    }

    pub async fn update_artifact_body(
        &self,
        id: &str,
        value: String,
        expected_version: u64,
    ) -> Option<WriteResult<String>> {
        let mut inner = self.inner.write().await;
        let artifact = inner.artifacts.get_mut(id)?;
        if artifact.body_version != expected_version {
            return Some(WriteResult::VersionMismatch { version: artifact.body_version, value: artifact.body.clone() });
        }
        artifact.body = value.clone();
        artifact.body_version += 1;
        artifact.updated_at = now_ms();
        Some(WriteResult::Success { version: artifact.body_version, value })
    }

    pub async fn delete_artifact(&self, id: &str) -> bool {
        self.inner.write().await.artifacts.remove(id).is_some()
    }

    /// Allocate a fresh user-scoped sequence number, for callers building an
    /// update event off the back of a write that doesn't already produce
    /// one (e.g. metadata/state updates, deletes). The sole other source of
    /// user-seq values is the internal allocation inside `create_session`/
    /// `upsert_machine`/`create_artifact`; never fabricate a seq elsewhere.
    pub async fn next_user_seq(&self) -> u64 {
        self.inner.write().await.alloc_user_seq()
    }

    /// Allocate a fresh per-session sequence number.
    pub async fn next_session_seq(&self, session_id: &str) -> u64 {
        self.inner.write().await.alloc_session_seq(session_id)
    }

    /// Take a consistent point-in-time copy of the full state, for
    /// debounced snapshot persistence.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        StoreSnapshot {
            sessions: inner.sessions.values().cloned().collect(),
            messages: inner.messages.values().flatten().cloned().collect(),
            machines: inner.machines.values().cloned().collect(),
            artifacts: inner.artifacts.values().cloned().collect(),
            next_user_seq: inner.next_user_seq,
            next_session_seq: inner.next_session_seq.clone(),
        }
    }

    /// Replace the entire state with a previously captured snapshot.
    pub async fn restore(&self, snapshot: StoreSnapshot) {
        let mut inner = self.inner.write().await;
        inner.tag_index = snapshot.sessions.iter().map(|s| (s.tag.clone(), s.id.clone())).collect();
        inner.sessions = snapshot.sessions.into_iter().map(|s| (s.id.clone(), s)).collect();
        let mut by_session: HashMap<String, Vec<Message>> = HashMap::new();
        for message in snapshot.messages {
            by_session.entry(message.session_id.clone()).or_default().push(message);
        }
        inner.messages = by_session;
        inner.machines = snapshot.machines.into_iter().map(|m| (m.id.clone(), m)).collect();
        inner.artifacts = snapshot.artifacts.into_iter().map(|a| (a.id.clone(), a)).collect();
        inner.next_user_seq = snapshot.next_user_seq;
        inner.next_session_seq = snapshot.next_session_seq;
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
