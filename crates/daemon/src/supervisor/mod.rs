// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawns, tracks, and reaps child agent processes; indexes them by OS
//! PID; correlates a later self-report webhook to resolve a pending
//! spawn request.

pub mod env;
pub mod mux;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use tokio::sync::{oneshot, RwLock};

use self::mux::{MuxWindow, TerminalMux};
use crate::error::DaemonError;

pub const WEBHOOK_DEADLINE: Duration = Duration::from_secs(15);

/// Agent kinds whose credentials are written to a disposable directory on
/// disk instead of being injected directly as an environment variable —
/// this is how the official Claude Code CLI expects to discover them.
const CREDENTIALS_DIRECTORY_AGENTS: &[&str] = &["claude"];

const CREDENTIALS_DIR_ENV_VAR: &str = "P2PD_CREDENTIALS_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartedBy {
    Daemon,
    External,
}

/// The Supervisor's record for a live or recently-live agent process.
pub struct TrackedChild {
    pub pid: u32,
    pub started_by: StartedBy,
    pub session_id: Option<String>,
    pub window: Option<MuxWindow>,
    pub directory_created: bool,
    /// Disposable credentials directory created for this child, if its
    /// agent kind uses that delivery mode. Removed when the child is
    /// reaped.
    pub credentials_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub working_dir: PathBuf,
    pub agent: String,
    pub auth_token: Option<String>,
    pub env_overrides: HashMap<String, String>,
    pub approved_new_directory_creation: bool,
}

pub enum SpawnResult {
    Success { session_id: String },
    NeedsDirectoryApproval { path: PathBuf },
    Error(String),
}

pub struct Supervisor {
    mux: Arc<dyn TerminalMux>,
    children: RwLock<HashMap<u32, TrackedChild>>,
    awaiters: RwLock<HashMap<u32, oneshot::Sender<String>>>,
    daemon_self_command: Vec<String>,
}

impl Supervisor {
    pub fn new(mux: Arc<dyn TerminalMux>, daemon_self_command: Vec<String>) -> Self {
        Self {
            mux,
            children: RwLock::new(HashMap::new()),
            awaiters: RwLock::new(HashMap::new()),
            daemon_self_command,
        }
    }

    /// Kill every multiplexer window recognisable as a stray from a
    /// previous daemon generation. Called once at startup, before this
    /// generation's `children` map tracks anything of its own, so any
    /// window the mux reports here by definition predates this process.
    pub async fn reap_orphans_of_previous_generation(&self) {
        let windows = match self.mux.list_daemon_windows().await {
            Ok(windows) => windows,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list multiplexer windows while reaping orphans");
                return;
            }
        };
        for window in windows {
            tracing::info!(session = %window.session_name, "reaping orphaned child from a previous daemon generation");
            if let Err(err) = self.mux.kill_window(&window).await {
                tracing::warn!(session = %window.session_name, error = %err, "failed to reap orphaned window");
            }
        }
    }

    pub async fn spawn(&self, options: SpawnOptions) -> SpawnResult {
        let directory_created = match std::fs::metadata(&options.working_dir) {
            Ok(meta) if meta.is_dir() => false,
            Ok(_) => return SpawnResult::Error(format!("{} exists and is not a directory", options.working_dir.display())),
            Err(_) => {
                if !options.approved_new_directory_creation {
                    return SpawnResult::NeedsDirectoryApproval { path: options.working_dir.clone() };
                }
                if let Err(err) = std::fs::create_dir_all(&options.working_dir) {
                    return SpawnResult::Error(format!("failed to create {}: {err}", options.working_dir.display()));
                }
                true
            }
        };

        let uses_credentials_dir = CREDENTIALS_DIRECTORY_AGENTS.contains(&options.agent.as_str());

        let mut auth_vars = HashMap::new();
        let mut credentials_dir = None;
        if let Some(token) = &options.auth_token {
            if uses_credentials_dir {
                match write_credentials_dir(token) {
                    Ok(dir) => {
                        auth_vars.insert(CREDENTIALS_DIR_ENV_VAR.to_owned(), dir.to_string_lossy().into_owned());
                        credentials_dir = Some(dir);
                    }
                    Err(err) => return SpawnResult::Error(format!("failed to write credentials directory: {err}")),
                }
            } else {
                auth_vars.insert("P2PD_AUTH_TOKEN".to_owned(), token.clone());
            }
        }
        let process_env: HashMap<String, String> = std::env::vars().collect();
        let child_env = match env::compose_child_env(&process_env, &options.env_overrides, &auth_vars) {
            Ok(env) => env,
            Err(err) => {
                cleanup_credentials_dir(credentials_dir.as_deref());
                return SpawnResult::Error(err.to_string());
            }
        };

        let mut command = self.daemon_self_command.clone();
        command.push("--started-by-daemon".to_owned());
        command.push("--remote-starting-mode".to_owned());
        command.push("--agent".to_owned());
        command.push(options.agent.clone());

        let (window, pid) = match self.mux.spawn_window(&command, &child_env, &options.working_dir).await {
            Ok(v) => v,
            Err(err) => {
                cleanup_credentials_dir(credentials_dir.as_deref());
                return SpawnResult::Error(err.to_string());
            }
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut children = self.children.write().await;
            children.insert(
                pid,
                TrackedChild {
                    pid,
                    started_by: StartedBy::Daemon,
                    session_id: None,
                    window: Some(window),
                    directory_created,
                    credentials_dir,
                },
            );
        }
        self.awaiters.write().await.insert(pid, tx);

        match tokio::time::timeout(WEBHOOK_DEADLINE, rx).await {
            Ok(Ok(session_id)) => SpawnResult::Success { session_id },
            Ok(Err(_)) | Err(_) => {
                self.awaiters.write().await.remove(&pid);
                if let Some(child) = self.children.write().await.remove(&pid) {
                    cleanup_credentials_dir(child.credentials_dir.as_deref());
                }
                SpawnResult::Error("timed out waiting for session-started webhook".to_owned())
            }
        }
    }

    /// Handle a child's self-report webhook (`POST /session-started`).
    pub async fn on_child_report(&self, session_id: &str, host_pid: u32) {
        let mut children = self.children.write().await;
        match children.get_mut(&host_pid) {
            Some(child) => {
                // Never overwrite an existing `startedBy=daemon` record.
                child.session_id = Some(session_id.to_owned());
            }
            None => {
                children.insert(
                    host_pid,
                    TrackedChild {
                        pid: host_pid,
                        started_by: StartedBy::External,
                        session_id: Some(session_id.to_owned()),
                        window: None,
                        directory_created: false,
                        credentials_dir: None,
                    },
                );
            }
        }
        drop(children);
        if let Some(resolver) = self.awaiters.write().await.remove(&host_pid) {
            let _ = resolver.send(session_id.to_owned());
        }
    }

    /// Resolve a `sessionId` or `PID-<n>` fallback reference and terminate
    /// the matching child.
    pub async fn stop(&self, session_ref: &str) -> Result<bool, DaemonError> {
        let pid = {
            let children = self.children.read().await;
            if let Some(n) = session_ref.strip_prefix("PID-") {
                n.parse::<u32>().ok()
            } else {
                children.values().find(|c| c.session_id.as_deref() == Some(session_ref)).map(|c| c.pid)
            }
        };
        let Some(pid) = pid else { return Ok(false) };

        let window = {
            let mut children = self.children.write().await;
            children.remove(&pid).and_then(|c| {
                cleanup_credentials_dir(c.credentials_dir.as_deref());
                c.window
            })
        };

        if let Some(window) = window {
            self.mux.kill_window(&window).await.map_err(|_| DaemonError::SupervisorError)?;
        } else {
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|_| DaemonError::SupervisorError)?;
        }
        Ok(true)
    }

    /// Probe each tracked PID with a zero signal and drop any entry whose
    /// process has disappeared. Called once per heartbeat tick.
    pub async fn prune_dead(&self) {
        let pids: Vec<u32> = self.children.read().await.keys().copied().collect();
        let mut dead = Vec::new();
        for pid in pids {
            let nix_pid = Pid::from_raw(pid as i32);
            if kill(nix_pid, None).is_err() {
                dead.push(pid);
            } else if let Ok(status) = waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
                if !matches!(status, nix::sys::wait::WaitStatus::StillAlive) {
                    dead.push(pid);
                }
            }
        }
        if !dead.is_empty() {
            let mut children = self.children.write().await;
            for pid in dead {
                if let Some(child) = children.remove(&pid) {
                    cleanup_credentials_dir(child.credentials_dir.as_deref());
                }
            }
        }
    }

    pub async fn list(&self) -> Vec<(u32, Option<String>, StartedBy)> {
        self.children.read().await.values().map(|c| (c.pid, c.session_id.clone(), c.started_by)).collect()
    }

    pub async fn terminate_all(&self) {
        let mut children = self.children.write().await;
        let windows: Vec<MuxWindow> = children.values().filter_map(|c| c.window.clone()).collect();
        for window in windows {
            let _ = self.mux.kill_window(&window).await;
        }
        for child in children.values() {
            cleanup_credentials_dir(child.credentials_dir.as_deref());
        }
        children.clear();
    }
}

/// Write `token` to a freshly created, narrowly-permissioned directory and
/// return its path. The directory name is unguessable; the file inside it
/// is readable only by the daemon's own user.
fn write_credentials_dir(token: &str) -> std::io::Result<PathBuf> {
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    let dir = std::env::temp_dir().join(format!("p2pd-creds-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir(&dir)?;
    #[cfg(unix)]
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;

    let credentials_path = dir.join("credentials");
    std::fs::write(&credentials_path, token)?;
    #[cfg(unix)]
    std::fs::set_permissions(&credentials_path, std::fs::Permissions::from_mode(0o600))?;

    Ok(dir)
}

fn cleanup_credentials_dir(dir: Option<&std::path::Path>) {
    if let Some(dir) = dir {
        if let Err(err) = std::fs::remove_dir_all(dir) {
            tracing::warn!(path = %dir.display(), error = %err, "failed to remove disposable credentials directory");
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
