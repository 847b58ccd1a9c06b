// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The public tunnel provider is an out-of-scope collaborator: abstracted
//! here as a service that, given a local port, returns a public URL. The
//! only implementation shipped is a disabled stub; a real provider is
//! wired in by supplying a different [`PublicTunnel`].

use async_trait::async_trait;

#[async_trait]
pub trait PublicTunnel: Send + Sync {
    /// Start forwarding `local_port` to a public URL and return it.
    async fn start(&self, local_port: u16) -> anyhow::Result<String>;

    /// Tear the tunnel down. Best-effort; called during shutdown.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// No tunnel provider is configured. `start` always fails so callers fall
/// back to LAN-only connect URLs; this is the default until a concrete
/// provider is plugged in.
pub struct DisabledTunnel;

#[async_trait]
impl PublicTunnel for DisabledTunnel {
    async fn start(&self, _local_port: u16) -> anyhow::Result<String> {
        anyhow::bail!("no public tunnel provider configured")
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_tunnel_never_starts() {
        let tunnel = DisabledTunnel;
        assert!(tunnel.start(8989).await.is_err());
        assert!(tunnel.stop().await.is_ok());
    }
}
