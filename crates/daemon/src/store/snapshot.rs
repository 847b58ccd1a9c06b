// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced snapshot persistence for the [`super::Store`].
//!
//! The writer coalesces bursts of mutations into at most one disk write per
//! second, and loading tolerates a missing file, an unrecognised schema
//! version, or a truncated write by falling back to a fresh store rather
//! than refusing to start.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::wire::{Artifact, Machine, Message, Session};

const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const DEBOUNCE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub sessions: Vec<Session>,
    pub messages: Vec<Message>,
    pub machines: Vec<Machine>,
    pub artifacts: Vec<Artifact>,
    pub next_user_seq: u64,
    pub next_session_seq: std::collections::HashMap<String, u64>,
}

#[derive(Serialize, Deserialize)]
struct OnDisk {
    schema_version: u32,
    #[serde(flatten)]
    snapshot: StoreSnapshot,
}

/// Load a snapshot from `path`, tolerating any form of unreadability by
/// returning `None` (callers start from a fresh [`super::Store`]).
pub fn load(path: &Path) -> Option<StoreSnapshot> {
    let bytes = std::fs::read(path).ok()?;
    let on_disk: OnDisk = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "snapshot parse failed, starting fresh");
            return None;
        }
    };
    if on_disk.schema_version != SNAPSHOT_SCHEMA_VERSION {
        tracing::warn!(
            found = on_disk.schema_version,
            expected = SNAPSHOT_SCHEMA_VERSION,
            "snapshot schema mismatch, starting fresh"
        );
        return None;
    }
    Some(on_disk.snapshot)
}

/// Atomically write `snapshot` to `path` via a temp file plus rename, so a
/// reader never observes a partially written file.
pub fn save(path: &Path, snapshot: &StoreSnapshot) -> std::io::Result<()> {
    let on_disk = OnDisk { schema_version: SNAPSHOT_SCHEMA_VERSION, snapshot: snapshot.clone() };
    let body = serde_json::to_vec(&on_disk)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Coalesces repeated [`SnapshotHandle::mark_dirty`] calls into a single
/// background write per [`DEBOUNCE_INTERVAL`].
pub struct SnapshotHandle {
    path: PathBuf,
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SnapshotHandle {
    pub fn spawn(
        path: PathBuf,
        store: Arc<super::Store>,
        shutdown: CancellationToken,
    ) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let handle = Self { path: path.clone(), dirty: Arc::clone(&dirty), notify: Arc::clone(&notify) };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = shutdown.cancelled() => {
                        flush(&path, &store, &dirty).await;
                        return;
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(DEBOUNCE_INTERVAL) => {}
                    _ = shutdown.cancelled() => {
                        flush(&path, &store, &dirty).await;
                        return;
                    }
                }
                flush(&path, &store, &dirty).await;
            }
        });
        handle
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn flush(path: &Path, store: &super::Store, dirty: &AtomicBool) {
    if !dirty.swap(false, Ordering::AcqRel) {
        return;
    }
    let snapshot = store.snapshot().await;
    let path = path.to_owned();
    let result = tokio::task::spawn_blocking(move || save(&path, &snapshot)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "snapshot write failed"),
        Err(err) => tracing::warn!(error = %err, "snapshot write task panicked"),
    }
}
