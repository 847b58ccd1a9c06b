// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Acquires the exclusive lock, writes the state file, orchestrates every
//! other component, runs the heartbeat/self-upgrade loop, and handles
//! shutdown.

pub mod self_client;
pub mod state_file;
pub mod tunnel;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::Secret;
use crate::config::{Config, Paths};
use crate::control_plane::{self, ControlPlaneState};
use crate::events::EventRouter;
use crate::public_plane::{self, AppState};
use crate::qr;
use crate::rpc::RpcRegistry;
use crate::store::{save_snapshot, SnapshotHandle, Store};
use crate::supervisor::mux::{TerminalMux, TmuxMux};
use crate::supervisor::Supervisor;

use self::state_file::{LockGuard, StateFile};
use self::tunnel::{DisabledTunnel, PublicTunnel};

/// The compiled-in daemon version, compared against both a previous
/// generation's state file (startup) and the on-disk package marker
/// (heartbeat self-upgrade check).
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One second: forces `exit(1)` if the shutdown sequence stalls.
const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(1);

/// Drive one full daemon generation to completion: startup, serve,
/// heartbeat, shutdown. Returns once shutdown has completed in full (the
/// watchdog, if it fires, exits the process directly instead of
/// returning).
pub async fn run(config: Config) -> anyhow::Result<()> {
    let paths = config.paths();
    std::fs::create_dir_all(&paths.home)?;

    stop_stale_generation_if_outdated(&paths).await;

    let lock = match LockGuard::acquire(&paths.lock_file) {
        Ok(lock) => lock,
        Err(err) => {
            tracing::info!(error = %err, path = %paths.lock_file.display(), "another daemon already holds the lock; exiting");
            return Ok(());
        }
    };

    let mux: Arc<dyn TerminalMux> = Arc::new(TmuxMux::new());

    let self_exe = std::env::current_exe().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|_| "p2pd".to_owned());
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&mux), vec![self_exe]));
    supervisor.reap_orphans_of_previous_generation().await;

    if !mux.is_available().await {
        anyhow::bail!("terminal multiplexer is not available; cannot host agent PTYs");
    }

    let secret = Secret::generate().map_err(|_| anyhow::anyhow!("system RNG unavailable; cannot generate a shared secret"))?;
    let store = Arc::new(Store::new());
    let events = Arc::new(EventRouter::new());
    let rpc = Arc::new(RpcRegistry::new());

    let shutdown = CancellationToken::new();

    // Each daemon generation picks a new shared secret, so a prior
    // snapshot is unreadable by any client that held the old one. We
    // discard it rather than serve permanently opaque blobs.
    let snapshot_handle = SnapshotHandle::spawn(paths.snapshot_file.clone(), Arc::clone(&store), shutdown.clone());

    let app_state = Arc::new(AppState {
        store: Arc::clone(&store),
        events: Arc::clone(&events),
        rpc: Arc::clone(&rpc),
        secret: secret.clone(),
        snapshot: Some(Arc::new(snapshot_handle)),
    });

    let (public_addr, public_handle) =
        public_plane::serve(Arc::clone(&app_state), &config.host, config.web_dir.clone(), shutdown.clone()).await?;

    let control_state = ControlPlaneState { supervisor: Arc::clone(&supervisor), shutdown: shutdown.clone() };
    let (control_port, control_handle) = control_plane::serve(control_state).await?;

    let machine_id = format!("daemon-self-{}", uuid::Uuid::new_v4());
    let self_conn_id =
        self_client::spawn(Arc::clone(&events), Arc::clone(&rpc), Arc::clone(&supervisor), shutdown.clone(), machine_id).await;

    let tunnel: Arc<dyn PublicTunnel> = Arc::new(DisabledTunnel);
    let tunnel_url = if config.tunnel {
        match tunnel.start(public_addr.port()).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(error = %err, "public tunnel unavailable, continuing LAN-only");
                None
            }
        }
    } else {
        None
    };

    let state = StateFile {
        pid: std::process::id(),
        http_port: control_port,
        p2p_port: if tunnel_url.is_some() { 0 } else { public_addr.port() },
        p2p_host: tunnel_url.clone().unwrap_or_else(|| public_addr.ip().to_string()),
        p2p_shared_secret: secret.to_base64(),
        tunnel_url: tunnel_url.clone(),
        start_time: crate::store::now_ms(),
        started_with_cli_version: DAEMON_VERSION.to_owned(),
        last_heartbeat: None,
        log_path: paths.log_file.to_string_lossy().into_owned(),
    };
    state_file::write(&paths.state_file, &state)?;
    tracing::info!(pid = state.pid, http_port = state.http_port, p2p_port = state.p2p_port, "daemon state written");

    let connect = qr::connect_url(&state.p2p_host, state.p2p_port, &secret);
    match qr::render_terminal_qr(&connect) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => tracing::warn!(error = %err, "failed to render QR code"),
    }
    println!("connect: {connect}");

    install_signal_handlers(shutdown.clone());

    run_heartbeat_loop(&config, &paths, Arc::clone(&supervisor), shutdown.clone()).await;

    shutdown_sequence(
        &paths,
        &store,
        &events,
        &supervisor,
        self_conn_id,
        tunnel.as_ref(),
        tunnel_url.is_some(),
        public_handle,
        control_handle,
    )
    .await;

    drop(lock);
    Ok(())
}

/// If a previous generation's state file names a different compiled
/// version, instruct it to stop (ControlPlane `/stop`, falling back to an
/// OS kill) before proceeding. If the version matches, a live daemon is
/// already serving this lock — exit successfully rather than contend for
/// the lock.
async fn stop_stale_generation_if_outdated(paths: &Paths) {
    let Some(previous) = state_file::load(&paths.state_file) else { return };

    if previous.started_with_cli_version == DAEMON_VERSION {
        return;
    }

    tracing::info!(
        previous_version = %previous.started_with_cli_version,
        current_version = DAEMON_VERSION,
        "stale daemon generation detected, requesting it stop"
    );

    let client = reqwest::Client::new();
    let stop_url = format!("http://127.0.0.1:{}/stop", previous.http_port);
    let acked = client.post(&stop_url).send().await.is_ok();

    if !acked {
        tracing::warn!(pid = previous.pid, "previous daemon did not respond to /stop, sending SIGKILL");
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(previous.pid as i32), nix::sys::signal::Signal::SIGKILL);
    }

    // Give the old generation a moment to release the lock file before we
    // attempt to acquire it ourselves.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
                _ = shutdown.cancelled() => return,
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = shutdown.cancelled() => return,
            }
        }
        shutdown.cancel();
    });
}

/// The non-overlapping heartbeat loop: prune dead children, check for an
/// independently-upgraded on-disk package, verify state-file ownership,
/// and refresh `lastHeartbeat`. Returns once `shutdown` fires (by signal,
/// ControlPlane `/stop`, or RPC `stop-daemon`).
async fn run_heartbeat_loop(config: &Config, paths: &Paths, supervisor: Arc<Supervisor>, shutdown: CancellationToken) {
    let interval = config.heartbeat_interval();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        supervisor.prune_dead().await;

        if let Some(installed) = state_file::read_installed_version() {
            if installed != DAEMON_VERSION {
                tracing::info!(
                    installed_version = %installed,
                    running_version = DAEMON_VERSION,
                    "on-disk package upgraded; spawning fresh daemon and hanging"
                );
                spawn_upgrade_successor();
                // Hang until externally killed: this generation has handed
                // off and must not keep serving or heartbeating.
                shutdown.cancelled().await;
                return;
            }
        }

        match state_file::load(&paths.state_file) {
            Some(current) if current.pid != std::process::id() => {
                tracing::warn!(
                    state_file_pid = current.pid,
                    own_pid = std::process::id(),
                    "state file PID no longer matches this process; another generation took over, self-terminating"
                );
                shutdown.cancel();
                return;
            }
            Some(mut current) => {
                current.last_heartbeat = Some(crate::store::now_ms());
                if let Err(err) = state_file::write(&paths.state_file, &current) {
                    tracing::warn!(error = %err, "failed to refresh state file during heartbeat");
                }
            }
            None => {
                tracing::warn!("state file missing during heartbeat; another process may have deleted it");
            }
        }
    }
}

fn spawn_upgrade_successor() {
    let Ok(self_exe) = std::env::current_exe() else {
        tracing::error!("cannot determine own executable path; skipping self-upgrade handoff");
        return;
    };
    match std::process::Command::new(self_exe).arg("daemon").arg("start").spawn() {
        Ok(_) => {}
        Err(err) => tracing::error!(error = %err, "failed to spawn upgrade successor"),
    }
}

/// Disconnect the self-client, terminate tracked children, tear down the
/// planes, stop the tunnel, persist a best-effort snapshot, delete the
/// state file, and release the lock (by the caller, once this returns).
/// Wrapped in a watchdog: if it stalls beyond [`SHUTDOWN_WATCHDOG`], force
/// `exit(1)` rather than hang forever.
#[allow(clippy::too_many_arguments)]
async fn shutdown_sequence(
    paths: &Paths,
    store: &Arc<Store>,
    events: &Arc<EventRouter>,
    supervisor: &Arc<Supervisor>,
    self_conn_id: crate::events::ConnId,
    tunnel: &dyn PublicTunnel,
    tunnel_active: bool,
    public_handle: tokio::task::JoinHandle<()>,
    control_handle: tokio::task::JoinHandle<()>,
) {
    let body = async {
        events.detach(self_conn_id).await;
        supervisor.terminate_all().await;
        public_handle.abort();
        control_handle.abort();
        if tunnel_active {
            let _ = tunnel.stop().await;
        }
        let snapshot = store.snapshot().await;
        if let Err(err) = save_snapshot(&paths.snapshot_file, &snapshot) {
            tracing::warn!(error = %err, "best-effort snapshot write failed during shutdown");
        }
        state_file::delete(&paths.state_file);
    };

    if tokio::time::timeout(SHUTDOWN_WATCHDOG, body).await.is_err() {
        tracing::error!("shutdown sequence stalled past watchdog deadline, forcing exit");
        std::process::exit(1);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
