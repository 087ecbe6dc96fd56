use std::{
    env,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use getset::{CopyGetters, Getters};
use ipnetwork::Ipv4Network;
use nix::unistd::{Gid, Uid, User};
use typed_builder::TypedBuilder;

use crate::{image::Channel, CorectlError, CorectlResult};

use super::{
    DEFAULT_DEVICE_DIR, DEFAULT_EXPORTS_FILE, DEFAULT_GPG_EXE, DEFAULT_GUEST_SUBNET,
    DEFAULT_HOME_SUBDIR, DEFAULT_HOST_IP, DEFAULT_HYPERVISOR_EXE, DEFAULT_NFSD_EXE,
    DEFAULT_RELEASE_URL, DEFAULT_SHARED_DIR, DEFAULT_SSH_EXE, DEFAULT_SSH_KEYGEN_EXE,
    GPG_EXE_ENV_VAR, HOME_ENV_VAR, HYPERVISOR_EXE_ENV_VAR, IMAGES_SUBDIR, NFSD_EXE_ENV_VAR,
    RELEASE_URL_ENV_VAR, RUNNING_SUBDIR, SSH_EXE_ENV_VAR, SSH_KEYGEN_EXE_ENV_VAR,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything a corectl operation needs to know about its environment.
///
/// A context is built once at startup and handed to every component by reference. Nothing
/// below the binary reads environment variables or the process' identity on its own.
#[derive(Debug, Clone, TypedBuilder, Getters, CopyGetters)]
pub struct Context {
    /// The corectl home directory holding images and instance state.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    home_dir: PathBuf,

    /// The directory relative paths given by the user are resolved against.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    pwd: PathBuf,

    /// The executable name live instance supervisors run under.
    #[builder(setter(into), default = "corectl".to_string())]
    #[getset(get = "pub with_prefix")]
    tool_name: String,

    /// The executable re-invoked to supervise a hypervisor.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    supervisor_exe: PathBuf,

    /// The hypervisor executable.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_HYPERVISOR_EXE))]
    #[getset(get = "pub with_prefix")]
    hypervisor_exe: PathBuf,

    /// The ssh client executable.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_SSH_EXE))]
    #[getset(get = "pub with_prefix")]
    ssh_exe: PathBuf,

    /// The ssh-keygen executable.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_SSH_KEYGEN_EXE))]
    #[getset(get = "pub with_prefix")]
    ssh_keygen_exe: PathBuf,

    /// The gpg executable used to check release signatures.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_GPG_EXE))]
    #[getset(get = "pub with_prefix")]
    gpg_exe: PathBuf,

    /// The NFS server control tool.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_NFSD_EXE))]
    #[getset(get = "pub with_prefix")]
    nfsd_exe: PathBuf,

    /// The NFS exports table the shared directory is added to.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_EXPORTS_FILE))]
    #[getset(get = "pub with_prefix")]
    exports_file: PathBuf,

    /// The host directory shared with guests.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_SHARED_DIR))]
    #[getset(get = "pub with_prefix")]
    shared_dir: PathBuf,

    /// The user id guest accesses to the shared directory are mapped to.
    #[builder(default = Uid::current().as_raw())]
    #[getset(get_copy = "pub with_prefix")]
    uid: u32,

    /// The group id guest accesses to the shared directory are mapped to.
    #[builder(default = Gid::current().as_raw())]
    #[getset(get_copy = "pub with_prefix")]
    gid: u32,

    /// Release root template, `{channel}` is substituted per channel.
    #[builder(setter(into), default = DEFAULT_RELEASE_URL.to_string())]
    #[getset(get = "pub with_prefix")]
    release_url: String,

    /// The network guests get their addresses from.
    #[builder(default = default_guest_subnet())]
    #[getset(get_copy = "pub with_prefix")]
    guest_subnet: Ipv4Network,

    /// The host's address on the guest network.
    #[builder(default = DEFAULT_HOST_IP)]
    #[getset(get_copy = "pub with_prefix")]
    host_ip: Ipv4Addr,

    /// The directory tap devices are looked up in.
    #[builder(setter(into), default = PathBuf::from(DEFAULT_DEVICE_DIR))]
    #[getset(get = "pub with_prefix")]
    device_dir: PathBuf,

    /// Whether the process runs with an effective uid of 0.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    privileged: bool,

    /// Whether debug output was requested.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    debug: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Context {
    /// Builds the context of the current process.
    ///
    /// When running through `sudo`, the home directory is the invoking user's, not root's.
    pub fn from_env(debug: bool) -> CorectlResult<Self> {
        let privileged = Uid::effective().is_root();
        let home_dir = match env::var_os(HOME_ENV_VAR) {
            Some(home) => PathBuf::from(home),
            None => user_home(privileged)?.join(DEFAULT_HOME_SUBDIR),
        };

        let supervisor_exe = env::current_exe()?;
        let tool_name = supervisor_exe
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "corectl".to_string());

        let release_url =
            env::var(RELEASE_URL_ENV_VAR).unwrap_or_else(|_| DEFAULT_RELEASE_URL.to_string());
        let (uid, gid) = caller_ids(privileged);

        let context = Context::builder()
            .home_dir(home_dir)
            .pwd(env::current_dir()?)
            .tool_name(tool_name)
            .supervisor_exe(supervisor_exe)
            .hypervisor_exe(locate(HYPERVISOR_EXE_ENV_VAR, DEFAULT_HYPERVISOR_EXE)?)
            .ssh_exe(locate(SSH_EXE_ENV_VAR, DEFAULT_SSH_EXE)?)
            .ssh_keygen_exe(locate(SSH_KEYGEN_EXE_ENV_VAR, DEFAULT_SSH_KEYGEN_EXE)?)
            .gpg_exe(locate(GPG_EXE_ENV_VAR, DEFAULT_GPG_EXE)?)
            .nfsd_exe(locate(NFSD_EXE_ENV_VAR, DEFAULT_NFSD_EXE)?)
            .release_url(release_url)
            .uid(uid)
            .gid(gid)
            .privileged(privileged)
            .debug(debug)
            .build();

        tracing::debug!(?context, "context initialized");
        Ok(context)
    }

    /// Returns the directory holding one sub directory per channel.
    pub fn images_dir(&self) -> PathBuf {
        self.home_dir.join(IMAGES_SUBDIR)
    }

    /// Returns the directory holding one sub directory per instance.
    pub fn running_dir(&self) -> PathBuf {
        self.home_dir.join(RUNNING_SUBDIR)
    }

    /// Returns the release root of a channel.
    pub fn release_url_for(&self, channel: Channel) -> String {
        self.release_url.replace("{channel}", channel.as_str())
    }

    /// Resolves a user supplied path against the working directory.
    pub fn absolute(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.pwd.join(path)
        }
    }

    /// Creates the image directory of every channel and the run directory.
    pub async fn ensure_dirs(&self) -> CorectlResult<()> {
        for channel in Channel::ALL {
            tokio::fs::create_dir_all(self.images_dir().join(channel.as_str())).await?;
        }
        tokio::fs::create_dir_all(self.running_dir()).await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn default_guest_subnet() -> Ipv4Network {
    DEFAULT_GUEST_SUBNET
        .parse()
        .unwrap_or_else(|_| Ipv4Network::from(DEFAULT_HOST_IP))
}

/// Finds the home directory of the user that invoked corectl.
fn user_home(privileged: bool) -> CorectlResult<PathBuf> {
    if privileged {
        if let Ok(sudo_user) = env::var("SUDO_USER") {
            let user = User::from_name(&sudo_user)
                .map_err(|e| CorectlError::custom(anyhow::anyhow!("looking up {sudo_user}: {e}")))?;
            if let Some(user) = user {
                return Ok(user.dir);
            }
        }
    }

    dirs::home_dir().ok_or_else(|| {
        CorectlError::custom(anyhow::anyhow!("unable to determine the home directory"))
    })
}

/// The user and group ids of whoever invoked corectl, seen through `sudo`.
fn caller_ids(privileged: bool) -> (u32, u32) {
    let from_sudo = |var: &str| {
        privileged
            .then(|| env::var(var).ok()?.parse::<u32>().ok())
            .flatten()
    };

    (
        from_sudo("SUDO_UID").unwrap_or_else(|| Uid::current().as_raw()),
        from_sudo("SUDO_GID").unwrap_or_else(|| Gid::current().as_raw()),
    )
}

/// Locates an external tool.
///
/// A set but dangling override is an error. A tool that can't be found is kept by name so
/// that operations not needing it still work and the ones that do fail when spawning it.
fn locate(env_var: &str, default: &str) -> CorectlResult<PathBuf> {
    match ctlutils::resolve_env_path(env_var, default) {
        Ok(path) => Ok(path),
        Err(e) if env::var_os(env_var).is_some() => Err(e.into()),
        Err(_) => {
            tracing::debug!("{default} not found on PATH");
            Ok(PathBuf::from(default))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_paths() {
        let ctx = Context::builder()
            .home_dir("/tmp/corectl-home")
            .pwd("/work")
            .supervisor_exe("/usr/local/bin/corectl")
            .build();

        assert_eq!(ctx.images_dir(), PathBuf::from("/tmp/corectl-home/images"));
        assert_eq!(ctx.running_dir(), PathBuf::from("/tmp/corectl-home/running"));
        assert_eq!(ctx.absolute("disk.img"), PathBuf::from("/work/disk.img"));
        assert_eq!(ctx.absolute("/abs/disk.img"), PathBuf::from("/abs/disk.img"));
        assert_eq!(
            ctx.release_url_for(Channel::Beta),
            "http://beta.release.core-os.net/amd64-usr"
        );
        assert_eq!(ctx.get_guest_subnet().prefix(), 24);
        assert!(ctx.get_guest_subnet().contains(Ipv4Addr::new(192, 168, 64, 7)));
    }

    #[tokio::test]
    async fn test_context_ensure_dirs() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = Context::builder()
            .home_dir(home.path())
            .pwd(home.path())
            .supervisor_exe("/bin/true")
            .build();

        ctx.ensure_dirs().await?;
        for channel in Channel::ALL {
            assert!(ctx.images_dir().join(channel.as_str()).is_dir());
        }
        assert!(ctx.running_dir().is_dir());
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn test_context_from_env_overrides() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        env::set_var(HOME_ENV_VAR, home.path());
        env::set_var(RELEASE_URL_ENV_VAR, "http://mirror.local/{channel}");
        env::set_var(GPG_EXE_ENV_VAR, home.path().join("missing-gpg"));

        let dangling = Context::from_env(false);
        env::remove_var(GPG_EXE_ENV_VAR);
        let ctx = Context::from_env(true);

        env::remove_var(HOME_ENV_VAR);
        env::remove_var(RELEASE_URL_ENV_VAR);

        assert!(dangling.is_err());
        let ctx = ctx?;
        assert_eq!(ctx.get_home_dir(), home.path());
        assert_eq!(ctx.release_url_for(Channel::Alpha), "http://mirror.local/alpha");
        assert!(ctx.get_debug());
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn test_caller_ids_seen_through_sudo() {
        env::set_var("SUDO_UID", "501");
        env::set_var("SUDO_GID", "not-a-number");
        let unprivileged = caller_ids(false);
        let privileged = caller_ids(true);
        env::remove_var("SUDO_UID");
        env::remove_var("SUDO_GID");

        let current = (Uid::current().as_raw(), Gid::current().as_raw());
        assert_eq!(unprivileged, current);
        assert_eq!(privileged, (501, current.1));
    }
}
