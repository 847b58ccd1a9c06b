// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-schema types shared across the Store, EventRouter and PublicPlane.
//!
//! All value fields named `metadata`, `agent_state`, `daemon_state`,
//! `content`, `header`, `body`, `value`, `data_encryption_key`, and message
//! content `c` are opaque base64 strings — the daemon never parses their
//! interior.

use serde::{Deserialize, Serialize};

pub type Id = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Id,
    pub tag: String,
    pub seq: u64,
    pub metadata: String,
    pub metadata_version: u64,
    pub agent_state: Option<String>,
    pub agent_state_version: u64,
    pub data_encryption_key: Option<String>,
    pub active: bool,
    pub active_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Wrapped message content: `{t:"encrypted", c:<base64>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedContent {
    pub t: String,
    pub c: String,
}

impl EncryptedContent {
    pub fn wrap(base64_blob: impl Into<String>) -> Self {
        Self { t: "encrypted".to_owned(), c: base64_blob.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Id,
    pub session_id: Id,
    pub seq: u64,
    pub content: EncryptedContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: Id,
    pub seq: u64,
    pub metadata: String,
    pub metadata_version: u64,
    pub daemon_state: Option<String>,
    pub daemon_state_version: u64,
    pub data_encryption_key: Option<String>,
    pub active: bool,
    pub active_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Id,
    pub seq: u64,
    pub header: String,
    pub header_version: u64,
    pub body: String,
    pub body_version: u64,
    pub data_encryption_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of a version-guarded write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum WriteOutcome<T> {
    Success { version: u64, value: T },
    VersionMismatch { version: u64, value: T },
}

/// Discriminators for `update` event bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UpdateBody {
    NewSession { session: Session },
    UpdateSession { session_id: Id, metadata: Option<VersionedValue>, agent_state: Option<VersionedValue> },
    DeleteSession { session_id: Id },
    NewMessage { message: Message },
    NewMachine { machine: Machine },
    UpdateMachine { machine_id: Id, metadata: Option<VersionedValue>, daemon_state: Option<VersionedValue> },
    NewArtifact { artifact: Artifact },
    UpdateArtifact { artifact_id: Id, header: Option<VersionedValue>, body: Option<VersionedValue> },
    DeleteArtifact { artifact_id: Id },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedValue {
    pub version: u64,
    pub value: String,
}

/// A persistent, sequenced notification of a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub id: Id,
    pub seq: u64,
    pub body: UpdateBody,
    pub created_at: i64,
}

/// Transient notification with no ordering/replay guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EphemeralBody {
    Activity { session_id: Id, thinking: bool, active_at: i64 },
    MachineActivity { machine_id: Id },
    Usage { session_id: Option<Id>, tokens: u64, cost: f64 },
    MachineStatus { machine_id: Id, status: String },
}
