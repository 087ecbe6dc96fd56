//! The metadata service a booting guest bootstraps itself from.
//!
//! Each boot gets its own short-lived HTTP server on an ephemeral port. The guest finds it
//! through the `endpoint=` kernel parameter and fetches its ssh key, hostname and, when the
//! user gave a local file, its cloud-config. Only callers inside the guest subnet are
//! served, and the first one is taken to be the guest, which is how corectl learns the
//! address the host's DHCP service handed out.

mod handlers;
mod routes;
mod state;

use std::net::{Ipv4Addr, SocketAddr};

use tokio::{net::TcpListener, task::JoinHandle};

use crate::CorectlResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use routes::create_router;
pub use state::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A running metadata server. Dropping it stops the server.
#[derive(Debug)]
pub struct MetadataServer {
    endpoint: String,
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MetadataServer {
    /// Starts serving `state` on an ephemeral port of every interface.
    ///
    /// `host_ip` is the host's address as seen from the guest and only shapes the advertised
    /// endpoint.
    pub async fn start(state: MetadataState, host_ip: Ipv4Addr) -> CorectlResult<Self> {
        let name = state.name().to_string();
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let local_addr = listener.local_addr()?;

        let router = create_router(state);
        let handle = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                tracing::error!("metadata service failed: {e}");
            }
        });

        let endpoint = format!("http://{host_ip}:{}/{name}", local_addr.port());
        tracing::debug!("metadata service for `{name}` listening on {local_addr}");

        Ok(Self {
            endpoint,
            local_addr,
            handle,
        })
    }

    /// The URL the guest reaches the service at.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the server.
    pub fn shutdown(self) {
        drop(self);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for MetadataServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_metadata_server_serves_subnet_callers() -> anyhow::Result<()> {
        let (state, mut signals) = MetadataState::new(
            "web",
            "ssh-ed25519 AAAAkey corectl",
            Some("#cloud-config\n".to_string()),
            "127.0.0.0/8".parse()?,
        );
        let server = MetadataServer::start(state.clone(), Ipv4Addr::LOCALHOST).await?;
        assert!(server.endpoint().ends_with("/web"));

        let base = format!("http://127.0.0.1:{}/web", server.local_addr().port());
        let client = reqwest::Client::builder().no_proxy().build()?;

        let key = client.get(format!("{base}/sshKey")).send().await?;
        assert_eq!(key.status(), StatusCode::OK);
        assert_eq!(key.text().await?, "ssh-ed25519 AAAAkey corectl");

        let hostname = client.get(format!("{base}/hostname")).send().await?.text().await?;
        assert_eq!(hostname, "web");

        let cloud_config = client.get(format!("{base}/cloud-config")).send().await?;
        assert_eq!(cloud_config.text().await?, "#cloud-config\n");

        assert_eq!(signals.guest_ip.await?, Ipv4Addr::LOCALHOST);
        signals.ssh_key_sent.await?;
        if let Some(sent) = signals.cloud_config_sent.take() {
            sent.await?;
        }

        let other = client.get(format!("http://127.0.0.1:{}/db/sshKey", server.local_addr().port()));
        assert_eq!(other.send().await?.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_metadata_server_rejects_outsiders() -> anyhow::Result<()> {
        let (state, signals) =
            MetadataState::new("web", "key", None, "192.168.64.0/24".parse()?);
        let server = MetadataServer::start(state.clone(), Ipv4Addr::new(192, 168, 64, 1)).await?;
        assert_eq!(
            server.endpoint(),
            format!("http://192.168.64.1:{}/web", server.local_addr().port())
        );

        let base = format!("http://127.0.0.1:{}/web", server.local_addr().port());
        let client = reqwest::Client::builder().no_proxy().build()?;
        for path in ["sshKey", "hostname"] {
            let response = client.get(format!("{base}/{path}")).send().await?;
            assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        }

        // Without a local cloud-config there is no such endpoint.
        let response = client.get(format!("{base}/cloud-config")).send().await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(state.guest_ip(), None);
        drop(signals);
        server.shutdown();
        Ok(())
    }
}
