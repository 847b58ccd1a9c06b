// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: CLI flags with environment-variable fallbacks,
//! and the filesystem paths the daemon coordinates itself through.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration, settable by flag or environment variable.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Override the daemon's home directory (state file, lock file, logs).
    #[arg(long, env = "P2PD_HOME")]
    pub home: Option<PathBuf>,

    /// Build/release variant label, surfaced in diagnostics only.
    #[arg(long, default_value = "stable", env = "P2PD_VARIANT")]
    pub variant: String,

    /// Enable experimental features.
    #[arg(long, default_value_t = false, env = "P2PD_EXPERIMENTAL")]
    pub experimental: bool,

    /// Inhibit system sleep while the daemon is running (best effort; a
    /// no-op unless the platform collaborator is wired in).
    #[arg(long, default_value_t = false, env = "P2PD_INHIBIT_SLEEP")]
    pub inhibit_sleep: bool,

    /// Directory containing the prebuilt web-app bundle. Defaults to a
    /// `web` directory beside the binary's data directory.
    #[arg(long, env = "P2PD_WEB_DIR")]
    pub web_dir: Option<PathBuf>,

    /// Start a public tunnel and publish its URL in the state file.
    #[arg(long, default_value_t = false, env = "P2PD_TUNNEL")]
    pub tunnel: bool,

    /// Heartbeat interval, in seconds.
    #[arg(long, default_value_t = 60, env = "P2PD_HEARTBEAT_SECS")]
    pub heartbeat_secs: u64,

    /// Host to bind the public plane on.
    #[arg(long, default_value = "0.0.0.0", env = "P2PD_HOST")]
    pub host: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_secs == 0 {
            return Err("heartbeat_secs must be nonzero".to_owned());
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Resolve the daemon's home directory, honouring the override.
    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| {
            dirs_home().join(".p2pd").join(&self.variant)
        })
    }

    pub fn paths(&self) -> Paths {
        let home = self.home_dir();
        Paths {
            state_file: home.join("daemon.json"),
            lock_file: home.join("daemon.lock"),
            snapshot_file: home.join("store.snapshot.json"),
            log_file: home.join("daemon.log"),
            home,
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

/// Filesystem paths the daemon coordinates itself through. All single-writer
/// (owned by whichever daemon generation holds `lock_file`).
#[derive(Debug, Clone)]
pub struct Paths {
    pub home: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub log_file: PathBuf,
}
