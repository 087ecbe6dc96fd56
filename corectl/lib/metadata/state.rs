//! Shared state of the metadata service.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, OnceLock},
};

use ipnetwork::Ipv4Network;
use tokio::sync::oneshot;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A one-shot signal that fires at most once and remembers the value it fired with.
#[derive(Debug)]
pub struct Latch<T> {
    value: OnceLock<T>,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

/// State shared by every metadata request handler of one instance.
#[derive(Debug, Clone)]
pub struct MetadataState {
    inner: Arc<MetadataInner>,
}

#[derive(Debug)]
struct MetadataInner {
    name: String,
    ssh_key: String,
    cloud_config: Option<String>,
    subnet: Ipv4Network,
    guest_ip: Latch<Ipv4Addr>,
    ssh_key_sent: Latch<()>,
    cloud_config_sent: Latch<()>,
}

/// The receiving ends of the signals a [`MetadataState`] raises.
#[derive(Debug)]
pub struct MetadataSignals {
    /// Fires with the first in-subnet address a request came from.
    pub guest_ip: oneshot::Receiver<Ipv4Addr>,

    /// Fires once the guest fetched its ssh key.
    pub ssh_key_sent: oneshot::Receiver<()>,

    /// Fires once the guest fetched its cloud-config. Absent if there is none to serve.
    pub cloud_config_sent: Option<oneshot::Receiver<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<T: Clone> Latch<T> {
    /// Creates a latch and the receiver it fires into.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        let latch = Self {
            value: OnceLock::new(),
            sender: Mutex::new(Some(sender)),
        };
        (latch, receiver)
    }

    /// Fires the latch with `value`. Returns `false` if it had already fired.
    pub fn fire(&self, value: T) -> bool {
        if self.value.set(value.clone()).is_err() {
            return false;
        }

        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            // The receiver may be gone already, the value stays readable through `get`.
            let _ = sender.send(value);
        }
        true
    }

    /// The value the latch fired with.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }
}

impl MetadataState {
    /// Creates the state for instance `name`, serving `ssh_key` and, if given, the contents of
    /// a local cloud-config. Only callers inside `subnet` are served.
    pub fn new(
        name: impl Into<String>,
        ssh_key: impl Into<String>,
        cloud_config: Option<String>,
        subnet: Ipv4Network,
    ) -> (Self, MetadataSignals) {
        let (guest_ip, guest_ip_rx) = Latch::new();
        let (ssh_key_sent, ssh_key_sent_rx) = Latch::new();
        let (cloud_config_sent, cloud_config_sent_rx) = Latch::new();

        let signals = MetadataSignals {
            guest_ip: guest_ip_rx,
            ssh_key_sent: ssh_key_sent_rx,
            cloud_config_sent: cloud_config.is_some().then_some(cloud_config_sent_rx),
        };

        let state = Self {
            inner: Arc::new(MetadataInner {
                name: name.into(),
                ssh_key: ssh_key.into(),
                cloud_config,
                subnet,
                guest_ip,
                ssh_key_sent,
                cloud_config_sent,
            }),
        };

        (state, signals)
    }

    /// Admits a caller if it's inside the guest subnet.
    ///
    /// The first admitted address is latched as the guest's address. Later callers, from that
    /// address or any other, don't change it.
    pub fn admit(&self, peer: SocketAddr) -> Option<Ipv4Addr> {
        let ip = match peer.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => ip.to_ipv4_mapped()?,
        };

        if !self.inner.subnet.contains(ip) {
            tracing::warn!("rejecting metadata request from {ip}, outside {}", self.inner.subnet);
            return None;
        }

        if self.inner.guest_ip.fire(ip) {
            tracing::info!("`{}` reached the metadata service from {ip}", self.inner.name);
        }
        Some(ip)
    }

    /// The instance name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The public key the guest should authorize.
    pub fn ssh_key(&self) -> &str {
        &self.inner.ssh_key
    }

    /// The cloud-config to serve, if a local one was given.
    pub fn cloud_config(&self) -> Option<&str> {
        self.inner.cloud_config.as_deref()
    }

    /// The latched guest address.
    pub fn guest_ip(&self) -> Option<Ipv4Addr> {
        self.inner.guest_ip.get().copied()
    }

    pub(super) fn ssh_key_sent(&self) {
        self.inner.ssh_key_sent.fire(());
    }

    pub(super) fn cloud_config_sent(&self) {
        self.inner.cloud_config_sent.fire(());
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 40000)
    }

    #[test]
    fn test_admit_latches_first_guest_address_once() -> anyhow::Result<()> {
        let (state, mut signals) =
            MetadataState::new("web", "ssh-ed25519 AAAA", None, "192.168.64.0/24".parse()?);

        assert_eq!(state.admit(peer("192.168.64.7")), Some("192.168.64.7".parse()?));
        for _ in 0..10 {
            assert!(state.admit(peer("192.168.64.7")).is_some());
        }
        assert_eq!(state.admit(peer("10.0.0.5")), None);
        assert!(state.admit(peer("192.168.64.9")).is_some());

        assert_eq!(signals.guest_ip.try_recv()?, "192.168.64.7".parse::<Ipv4Addr>()?);
        assert_eq!(state.guest_ip(), Some("192.168.64.7".parse()?));
        assert!(signals.cloud_config_sent.is_none());
        Ok(())
    }

    #[test]
    fn test_admit_rejects_outsiders_without_latching() -> anyhow::Result<()> {
        let (state, mut signals) =
            MetadataState::new("web", "key", None, "192.168.64.0/24".parse()?);

        assert_eq!(state.admit(peer("10.0.0.5")), None);
        assert_eq!(state.admit(peer("::1")), None);
        assert_eq!(state.guest_ip(), None);
        assert!(signals.guest_ip.try_recv().is_err());

        assert_eq!(
            state.admit(peer("::ffff:192.168.64.3")),
            Some("192.168.64.3".parse()?)
        );
        Ok(())
    }

    #[test]
    fn test_latch_fires_once() {
        let (latch, mut receiver) = Latch::new();
        assert!(latch.fire(1));
        assert!(!latch.fire(2));
        assert_eq!(latch.get(), Some(&1));
        assert_eq!(receiver.try_recv().ok(), Some(1));
    }
}
