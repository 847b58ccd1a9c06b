// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon state file and the exclusive lock file that guards it. Both
//! are single-writer: only the daemon generation that holds `lock_file`
//! may touch `state_file`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// `{pid, httpPort, p2pPort, p2pHost, p2pSharedSecret, tunnelUrl?,
/// startTime, startedWithCliVersion, lastHeartbeat?, logPath}` — this is
/// the one wire struct in the daemon that uses camelCase field names on
/// the wire, because it's consumed directly by the out-of-scope CLI front
/// end rather than by the WS/HTTP client SDKs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    pub pid: u32,
    pub http_port: u16,
    pub p2p_port: u16,
    pub p2p_host: String,
    pub p2p_shared_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_url: Option<String>,
    pub start_time: i64,
    pub started_with_cli_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<i64>,
    pub log_path: String,
}

/// Read the state file, tolerating absence or corruption by returning
/// `None` — callers treat either as "no previous daemon generation".
pub fn load(path: &Path) -> Option<StateFile> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(state) => Some(state),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state file unreadable, ignoring");
            None
        }
    }
}

pub fn write(path: &Path, state: &StateFile) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)
}

pub fn delete(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Holds the exclusive lock file for the lifetime of one daemon
/// generation. Dropping releases it. Acquisition is atomic
/// create-if-absent (`O_EXCL`); a second daemon invocation against the
/// same lock path fails immediately.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path: path.to_owned() })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Path to the on-disk package version marker consulted by the heartbeat's
/// self-upgrade check. This daemon's packaging model keeps a
/// `version.json` file beside the binary, mutable independently of the
/// running process.
pub fn installed_version_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("version.json"))
}

#[derive(Debug, Deserialize)]
struct InstalledVersion {
    version: String,
}

/// Read the installed-on-disk version, if the marker file exists and
/// parses. Absence means "no independent package manager is in play";
/// the heartbeat simply skips the self-upgrade check for that tick.
pub fn read_installed_version() -> Option<String> {
    let path = installed_version_path()?;
    let bytes = std::fs::read(&path).ok()?;
    serde_json::from_slice::<InstalledVersion>(&bytes).ok().map(|v| v.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_guard_rejects_second_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let first = LockGuard::acquire(&path).unwrap();
        let second = LockGuard::acquire(&path);
        assert!(second.is_err());
        drop(first);
        assert!(LockGuard::acquire(&path).is_ok());
    }

    #[test]
    fn load_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).is_none());
    }

    #[test]
    fn load_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn round_trips_through_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        let state = StateFile {
            pid: 123,
            http_port: 4000,
            p2p_port: 5000,
            p2p_host: "0.0.0.0".to_owned(),
            p2p_shared_secret: "c2VjcmV0".to_owned(),
            tunnel_url: None,
            start_time: 1,
            started_with_cli_version: "0.11.25".to_owned(),
            last_heartbeat: None,
            log_path: "/tmp/daemon.log".to_owned(),
        };
        write(&path, &state).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.pid, 123);
        assert_eq!(loaded.started_with_cli_version, "0.11.25");
    }
}
