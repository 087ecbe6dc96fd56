use std::{net::Ipv4Addr, time::Duration};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of the user's home where corectl keeps images and instance state.
pub const DEFAULT_HOME_SUBDIR: &str = ".coreos";

/// The sub directory of the corectl home holding one directory per channel.
pub const IMAGES_SUBDIR: &str = "images";

/// The sub directory of the corectl home holding one directory per running instance.
pub const RUNNING_SUBDIR: &str = "running";

/// The version placeholder that resolves to the newest available release.
pub const LATEST_VERSION: &str = "latest";

/// Upstream release root. `{channel}` is replaced with the channel name.
pub const DEFAULT_RELEASE_URL: &str = "http://{channel}.release.core-os.net/amd64-usr";

/// The default number of vCPUs given to an instance.
pub const DEFAULT_NUM_VCPUS: u8 = 1;

/// The default amount of RAM in MiB given to an instance.
pub const DEFAULT_MEMORY_MIB: u32 = 1024;

/// The smallest amount of RAM in MiB an instance may get.
pub const MIN_MEMORY_MIB: u32 = 1024;

/// The largest amount of RAM in MiB the hypervisor supports.
pub const MAX_MEMORY_MIB: u32 = 3072;

/// The host side network the hypervisor's NAT service hands guest addresses out of.
pub const DEFAULT_GUEST_SUBNET: &str = "192.168.64.0/24";

/// The host's address on the guest network.
pub const DEFAULT_HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 64, 1);

/// The directory tap devices live in.
pub const DEFAULT_DEVICE_DIR: &str = "/dev";

/// The host directory shared with guests over NFS.
pub const DEFAULT_SHARED_DIR: &str = "/Users";

/// The NFS server's exports table.
pub const DEFAULT_EXPORTS_FILE: &str = "/etc/exports";

/// The NFS server control tool looked up on `PATH` when not overridden.
pub const DEFAULT_NFSD_EXE: &str = "nfsd";

/// The hypervisor executable looked up on `PATH` when not overridden.
pub const DEFAULT_HYPERVISOR_EXE: &str = "xhyve";

/// The ssh client looked up on `PATH` when not overridden.
pub const DEFAULT_SSH_EXE: &str = "ssh";

/// The key generator looked up on `PATH` when not overridden.
pub const DEFAULT_SSH_KEYGEN_EXE: &str = "ssh-keygen";

/// The OpenPGP implementation looked up on `PATH` when not overridden.
pub const DEFAULT_GPG_EXE: &str = "gpg";

/// The user every CoreOS guest accepts logins for.
pub const REMOTE_USER: &str = "core";

/// The command a guest is asked to run to shut itself down.
pub const HALT_COMMAND: &str = "sudo sync;sudo halt";

/// How long a boot may take to report the hypervisor PID and the guest address.
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(45);

/// How long a record persisted without a PID still counts as an instance being launched.
pub const PENDING_GRACE: Duration = Duration::from_secs(2 * IDENTITY_TIMEOUT.as_secs());

/// How often a halt checks whether the instance's process is gone.
pub const HALT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a halt waits for the instance's process to go away.
pub const HALT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often an ssh connection is re-attempted while the guest is still coming up.
pub const SSH_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// How long to keep re-attempting an ssh connection.
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable overriding the corectl home directory.
pub const HOME_ENV_VAR: &str = "CORECTL_HOME";

/// Environment variable overriding the hypervisor executable.
pub const HYPERVISOR_EXE_ENV_VAR: &str = "CORECTL_HYPERVISOR_EXE";

/// Environment variable overriding the ssh executable.
pub const SSH_EXE_ENV_VAR: &str = "CORECTL_SSH_EXE";

/// Environment variable overriding the ssh-keygen executable.
pub const SSH_KEYGEN_EXE_ENV_VAR: &str = "CORECTL_SSH_KEYGEN_EXE";

/// Environment variable overriding the NFS server control tool.
pub const NFSD_EXE_ENV_VAR: &str = "CORECTL_NFSD_EXE";

/// Environment variable overriding the gpg executable.
pub const GPG_EXE_ENV_VAR: &str = "CORECTL_GPG_EXE";

/// Environment variable overriding the upstream release root.
pub const RELEASE_URL_ENV_VAR: &str = "CORECTL_RELEASE_URL";
