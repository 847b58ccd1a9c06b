// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The terminal multiplexer is an out-of-scope collaborator; this is the
//! narrow spawn/attach interface the Supervisor needs from it, concretely
//! implemented by shelling out to the `tmux` binary.

use async_trait::async_trait;
use tokio::process::Command;

/// A window inside the multiplexer hosting one child's PTY.
#[derive(Debug, Clone)]
pub struct MuxWindow {
    pub session_name: String,
}

#[async_trait]
pub trait TerminalMux: Send + Sync {
    /// Check the multiplexer binary is reachable. DaemonLifecycle aborts
    /// startup if this fails.
    async fn is_available(&self) -> bool;

    /// Launch `command` (with `env`) inside a fresh window, returning a
    /// handle and the OS PID of the window's leader process.
    async fn spawn_window(
        &self,
        command: &[String],
        env: &std::collections::HashMap<String, String>,
        working_dir: &std::path::Path,
    ) -> anyhow::Result<(MuxWindow, u32)>;

    /// Tear down a window previously returned by `spawn_window`.
    async fn kill_window(&self, window: &MuxWindow) -> anyhow::Result<()>;

    /// List every live window recognisable as one this daemon could have
    /// spawned, regardless of which process (or generation) spawned it.
    async fn list_daemon_windows(&self) -> anyhow::Result<Vec<MuxWindow>>;
}

/// Prefix every session this daemon creates is named with, so a later
/// generation can recognise windows a previous generation left behind.
const SESSION_PREFIX: &str = "p2pd-";

pub struct TmuxMux {
    binary: String,
}

impl TmuxMux {
    pub fn new() -> Self {
        Self { binary: "tmux".to_owned() }
    }
}

impl Default for TmuxMux {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminalMux for TmuxMux {
    async fn is_available(&self) -> bool {
        Command::new(&self.binary).arg("-V").output().await.map(|o| o.status.success()).unwrap_or(false)
    }

    async fn spawn_window(
        &self,
        command: &[String],
        env: &std::collections::HashMap<String, String>,
        working_dir: &std::path::Path,
    ) -> anyhow::Result<(MuxWindow, u32)> {
        let session_name = format!("{SESSION_PREFIX}{}", uuid::Uuid::new_v4());
        let mut cmd = Command::new(&self.binary);
        cmd.arg("new-session")
            .arg("-d")
            .arg("-s")
            .arg(&session_name)
            .arg("-c")
            .arg(working_dir)
            .envs(env)
            .arg(shell_words_join(command));
        let status = cmd.status().await?;
        if !status.success() {
            anyhow::bail!("tmux new-session exited with {status}");
        }

        let output = Command::new(&self.binary)
            .arg("list-panes")
            .arg("-t")
            .arg(&session_name)
            .arg("-F")
            .arg("#{pane_pid}")
            .output()
            .await?;
        let pid_str = String::from_utf8_lossy(&output.stdout);
        let pid: u32 = pid_str
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("tmux returned no pane pid"))?
            .trim()
            .parse()?;

        Ok((MuxWindow { session_name }, pid))
    }

    async fn kill_window(&self, window: &MuxWindow) -> anyhow::Result<()> {
        let status = Command::new(&self.binary).arg("kill-session").arg("-t").arg(&window.session_name).status().await?;
        if !status.success() {
            anyhow::bail!("tmux kill-session exited with {status}");
        }
        Ok(())
    }

    async fn list_daemon_windows(&self) -> anyhow::Result<Vec<MuxWindow>> {
        let output = Command::new(&self.binary).arg("list-sessions").arg("-F").arg("#{session_name}").output().await?;
        if !output.status.success() {
            // No tmux server running yet means no sessions at all, not an error.
            return Ok(Vec::new());
        }
        let names = String::from_utf8_lossy(&output.stdout);
        Ok(names
            .lines()
            .filter(|name| name.starts_with(SESSION_PREFIX))
            .map(|name| MuxWindow { session_name: name.to_owned() })
            .collect())
    }
}

fn shell_words_join(command: &[String]) -> String {
    command
        .iter()
        .map(|part| {
            if part.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c)) {
                part.clone()
            } else {
                format!("'{}'", part.replace('\'', "'\\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
