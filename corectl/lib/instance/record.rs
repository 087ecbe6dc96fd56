use std::{
    fmt::{self, Display},
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use semver::Version;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::image::Channel;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a guest network interface is backed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// A NAT'ed interface provided by the host's virtual network service.
    Raw,

    /// A host tap device.
    Tap,
}

/// A guest network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// How the interface is backed.
    pub kind: InterfaceKind,

    /// The host device, for tap interfaces.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<PathBuf>,
}

/// The kind of a storage device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// A read-only ISO image.
    Cdrom,

    /// A raw disk image.
    Hdd,
}

/// A storage device attached to a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDevice {
    /// The kind of device.
    pub kind: StorageKind,

    /// The slot of the device on its bus.
    pub slot: u8,

    /// The absolute path of the backing file on the host.
    pub path: PathBuf,
}

/// Every storage device attached to a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    /// CD-ROM devices.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cdroms: Vec<StorageDevice>,

    /// Hard drives, in slot order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hard_drives: Vec<StorageDevice>,
}

/// Where a guest gets its cloud-config from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", content = "source", rename_all = "lowercase")]
pub enum CloudConfig {
    /// A file on the host, served by the metadata service.
    Local(PathBuf),

    /// A URL the guest fetches by itself.
    Remote(String),
}

/// The ssh key pair generated for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyPair {
    /// The private key on the host.
    pub private_key: PathBuf,

    /// The public key in OpenSSH format.
    pub public_key: String,
}

/// An identity or resource only one live instance may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Claim {
    /// The instance name.
    Name(String),

    /// The instance UUID.
    Uuid(Uuid),

    /// A host tap device.
    Tap(PathBuf),

    /// A host disk or ISO image.
    Storage(PathBuf),
}

/// Everything corectl knows about one instance.
///
/// The record is persisted as JSON inside the instance's state directory before the
/// hypervisor starts, and rewritten once its PID and address are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters, Setters)]
#[getset(get = "pub with_prefix")]
pub struct InstanceRecord {
    /// The instance name.
    #[builder(setter(into))]
    name: String,

    /// The instance UUID.
    uuid: Uuid,

    /// The guest MAC address, derived from the UUID.
    #[builder(setter(into))]
    mac: String,

    /// The image channel.
    channel: Channel,

    /// The image version.
    version: Version,

    /// The number of vCPUs.
    #[builder(default = 1)]
    cpus: u8,

    /// The RAM in MiB.
    #[builder(default = 1024)]
    memory: u32,

    /// The network interfaces, in bus order.
    #[serde(default)]
    #[builder(default)]
    interfaces: Vec<NetworkInterface>,

    /// The attached storage.
    #[serde(default)]
    #[builder(default)]
    storage: Storage,

    /// The slot of the hard drive holding the root filesystem.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    root: Option<u8>,

    /// Where the guest's cloud-config comes from.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    cloud_config: Option<CloudConfig>,

    /// A public key supplied by the user to be authorized in the guest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    ssh_key: Option<String>,

    /// The key pair corectl itself logs into the guest with.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    internal_key: Option<SshKeyPair>,

    /// Extra arguments appended verbatim to the hypervisor invocation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    extra: Option<String>,

    /// The PID of the instance's supervisor.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    pid: Option<u32>,

    /// The guest address latched by the metadata service.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    #[getset(set = "pub with_prefix")]
    public_ip: Option<Ipv4Addr>,

    /// When the record was created.
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,

    /// Whether the instance runs in the background.
    #[serde(default)]
    #[builder(default)]
    detached: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetworkInterface {
    /// A NAT'ed interface.
    pub fn raw() -> Self {
        Self {
            kind: InterfaceKind::Raw,
            path: None,
        }
    }

    /// An interface backed by the tap device at `path`.
    pub fn tap(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: InterfaceKind::Tap,
            path: Some(path.into()),
        }
    }

    /// The argument naming the backing device on the hypervisor command line.
    pub fn device_arg(&self) -> String {
        match (self.kind, &self.path) {
            (InterfaceKind::Tap, Some(path)) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

impl Storage {
    /// All devices, CD-ROMs first.
    pub fn devices(&self) -> impl Iterator<Item = &StorageDevice> {
        self.cdroms.iter().chain(self.hard_drives.iter())
    }
}

impl StorageDevice {
    /// The name of the device inside the guest.
    pub fn guest_device(&self) -> String {
        guest_device(self.slot)
    }
}

impl InstanceRecord {
    /// The tap devices the instance uses.
    pub fn tap_devices(&self) -> impl Iterator<Item = &Path> {
        self.interfaces
            .iter()
            .filter(|interface| interface.kind == InterfaceKind::Tap)
            .filter_map(|interface| interface.path.as_deref())
    }

    /// The guest device holding the root filesystem, if any.
    pub fn root_device(&self) -> Option<String> {
        self.root.map(guest_device)
    }

    /// Everything this instance claims exclusively.
    pub fn claims(&self) -> Vec<Claim> {
        let mut claims = vec![Claim::Name(self.name.clone()), Claim::Uuid(self.uuid)];
        claims.extend(self.tap_devices().map(|path| Claim::Tap(path.to_path_buf())));
        claims.extend(
            self.storage
                .devices()
                .map(|device| Claim::Storage(device.path.clone())),
        );
        claims
    }

    /// Returns the first claim this record shares with `other`.
    pub fn conflict_with(&self, other: &InstanceRecord) -> Option<Claim> {
        let theirs = other.claims();
        self.claims().into_iter().find(|claim| theirs.contains(claim))
    }

    /// How long ago the record was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Claim::Name(name) => write!(f, "name `{name}`"),
            Claim::Uuid(uuid) => write!(f, "UUID `{uuid}`"),
            Claim::Tap(path) => write!(f, "tap device `{}`", path.display()),
            Claim::Storage(path) => write!(f, "volume `{}`", path.display()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn guest_device(slot: u8) -> String {
    format!("/dev/vd{}", char::from(b'a'.saturating_add(slot)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> InstanceRecord {
        InstanceRecord::builder()
            .name(name)
            .uuid(Uuid::new_v4())
            .mac("02:00:00:00:00:01")
            .channel(Channel::Alpha)
            .version(Version::new(1068, 0, 0))
            .build()
    }

    #[test]
    fn test_record_conflicts() {
        let mut a = record("a");
        a.interfaces = vec![NetworkInterface::raw(), NetworkInterface::tap("/dev/tap0")];
        a.storage.hard_drives.push(StorageDevice {
            kind: StorageKind::Hdd,
            slot: 0,
            path: PathBuf::from("/vm/root.img"),
        });

        let mut b = record("b");
        b.interfaces = vec![NetworkInterface::raw(), NetworkInterface::tap("/dev/tap1")];
        assert_eq!(a.conflict_with(&b), None);

        b.storage.cdroms.push(StorageDevice {
            kind: StorageKind::Cdrom,
            slot: 0,
            path: PathBuf::from("/vm/root.img"),
        });
        assert_eq!(
            a.conflict_with(&b),
            Some(Claim::Storage(PathBuf::from("/vm/root.img")))
        );

        let c = record("a");
        assert_eq!(a.conflict_with(&c), Some(Claim::Name("a".to_string())));
    }

    #[test]
    fn test_record_devices() {
        let mut rec = record("devices");
        rec.interfaces = vec![NetworkInterface::raw(), NetworkInterface::tap("/dev/tap3")];
        rec.root = Some(1);

        assert_eq!(rec.interfaces[1].device_arg(), "tap3");
        assert_eq!(rec.interfaces[0].device_arg(), "");
        assert_eq!(rec.root_device().as_deref(), Some("/dev/vdb"));
        assert_eq!(
            rec.tap_devices().collect::<Vec<_>>(),
            vec![Path::new("/dev/tap3")]
        );
    }

    #[test]
    fn test_record_json_layout() -> anyhow::Result<()> {
        let mut rec = record("json");
        rec.cloud_config = Some(CloudConfig::Remote("https://example.com/cc.yml".to_string()));
        rec.set_pid(Some(4242));

        let value = serde_json::to_value(&rec)?;
        assert_eq!(value["channel"], "alpha");
        assert_eq!(value["version"], "1068.0.0");
        assert_eq!(value["cloud_config"]["location"], "remote");
        assert_eq!(value["pid"], 4242);
        assert!(value.get("public_ip").is_none());

        let back: InstanceRecord = serde_json::from_value(value)?;
        assert_eq!(back, rec);
        Ok(())
    }
}
