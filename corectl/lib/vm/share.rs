use std::{
    fs::Permissions,
    io::ErrorKind,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{config::Context, utils, CorectlError, CorectlResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The host's NFS server.
#[async_trait]
pub trait NfsServer: Send + Sync {
    /// Makes the server pick up changes to its exports table.
    async fn reload(&self) -> CorectlResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The system NFS server, driven through its control tool.
#[derive(Debug, Clone)]
pub struct Nfsd {
    exe: PathBuf,
}

/// The export of the host's shared directory to the guest network.
///
/// Guests mount the shared directory over NFS, with every access mapped to the invoking
/// user. The export is a single line in the exports table, added before an instance boots
/// and removed once the last instance is gone.
#[derive(Debug, Clone)]
pub struct SharedDir<S = Nfsd> {
    exports_file: PathBuf,
    shared_dir: PathBuf,
    line: String,
    server: S,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Nfsd {
    /// Creates a server driven by the control tool at `exe`.
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }
}

impl SharedDir<Nfsd> {
    /// The shared directory of `ctx`, exported by the system NFS server.
    pub fn from_context(ctx: &Context) -> Self {
        Self::with_server(ctx, Nfsd::new(ctx.get_nfsd_exe()))
    }
}

impl<S: NfsServer> SharedDir<S> {
    /// The shared directory of `ctx`, exported by `server`.
    pub fn with_server(ctx: &Context, server: S) -> Self {
        let subnet = ctx.get_guest_subnet();
        let line = format!(
            "{} -network {} -mask {} -alldirs -mapall={}:{}",
            ctx.get_shared_dir().display(),
            subnet.network(),
            subnet.mask(),
            ctx.get_uid(),
            ctx.get_gid()
        );

        Self {
            exports_file: ctx.get_exports_file().clone(),
            shared_dir: ctx.get_shared_dir().clone(),
            line,
            server,
        }
    }

    /// The exports table line of the share.
    pub fn export_line(&self) -> &str {
        &self.line
    }

    /// Checks whether the exports table carries the share.
    pub async fn is_shared(&self) -> CorectlResult<bool> {
        Ok(self.exports().await?.lines().any(|line| line == self.line))
    }

    /// Adds the share to the exports table and reloads the server.
    ///
    /// Returns `false` without touching anything when the share is already in place, or when
    /// the host has no such directory to share.
    pub async fn share(&self) -> CorectlResult<bool> {
        if !self.shared_dir.is_dir() {
            tracing::debug!("{} does not exist, not sharing it", self.shared_dir.display());
            return Ok(false);
        }

        let mut exports = self.exports().await?;
        if exports.lines().any(|line| line == self.line) {
            return Ok(false);
        }

        if !exports.is_empty() && !exports.ends_with('\n') {
            exports.push('\n');
        }
        exports.push_str(&self.line);
        exports.push('\n');
        self.update(&exports).await?;

        tracing::info!("shared {} with the guest network", self.shared_dir.display());
        Ok(true)
    }

    /// Removes the share from the exports table and reloads the server.
    ///
    /// Returns `false` without touching anything when the share isn't there.
    pub async fn unshare(&self) -> CorectlResult<bool> {
        let exports = self.exports().await?;
        if !exports.lines().any(|line| line == self.line) {
            return Ok(false);
        }

        let kept = exports
            .lines()
            .filter(|line| *line != self.line)
            .map(|line| format!("{line}\n"))
            .collect::<String>();
        self.update(&kept).await?;

        tracing::info!("stopped sharing {}", self.shared_dir.display());
        Ok(true)
    }

    async fn exports(&self) -> CorectlResult<String> {
        match tokio::fs::read_to_string(&self.exports_file).await {
            Ok(exports) => Ok(exports),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, exports: &str) -> CorectlResult<()> {
        utils::write_atomic(&self.exports_file, exports.as_bytes()).await?;
        tokio::fs::set_permissions(&self.exports_file, Permissions::from_mode(0o644)).await?;
        self.server.reload().await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl NfsServer for Nfsd {
    async fn reload(&self) -> CorectlResult<()> {
        let status = Command::new(&self.exe)
            .arg("restart")
            .status()
            .await
            .map_err(|e| spawn_error(&self.exe, e))?;

        if !status.success() {
            return Err(CorectlError::Process(format!(
                "unable to restart the NFS server, {} exited with {status}",
                self.exe.display()
            )));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn spawn_error(exe: &Path, error: std::io::Error) -> CorectlError {
    CorectlError::Process(format!("failed to spawn {}: {error}", exe.display()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct CountingServer {
        reloads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NfsServer for CountingServer {
        async fn reload(&self) -> CorectlResult<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context(root: &Path, shared_dir: &Path) -> Context {
        Context::builder()
            .home_dir(root.join(".coreos"))
            .pwd(root)
            .supervisor_exe("/usr/local/bin/corectl")
            .exports_file(root.join("exports"))
            .shared_dir(shared_dir)
            .uid(501)
            .gid(20)
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn test_shared_dir_share_and_unshare() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let users = root.path().join("Users");
        std::fs::create_dir(&users)?;
        let exports = root.path().join("exports");
        std::fs::write(&exports, "/opt -ro")?;

        let server = CountingServer::default();
        let share = SharedDir::with_server(&context(root.path(), &users), server.clone());
        assert_eq!(
            share.export_line(),
            format!(
                "{} -network 192.168.64.0 -mask 255.255.255.0 -alldirs -mapall=501:20",
                users.display()
            )
        );

        assert!(share.share().await?);
        assert!(!share.share().await?);
        assert!(share.is_shared().await?);
        assert_eq!(
            std::fs::read_to_string(&exports)?,
            format!("/opt -ro\n{}\n", share.export_line())
        );
        assert_eq!(server.reloads.load(Ordering::SeqCst), 1);

        assert!(share.unshare().await?);
        assert!(!share.unshare().await?);
        assert_eq!(std::fs::read_to_string(&exports)?, "/opt -ro\n");
        assert_eq!(server.reloads.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_shared_dir_skips_missing_directories() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let server = CountingServer::default();
        let share = SharedDir::with_server(
            &context(root.path(), &root.path().join("Users")),
            server.clone(),
        );

        assert!(!share.share().await?);
        assert!(!root.path().join("exports").exists());
        assert_eq!(server.reloads.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_nfsd_reports_failed_restarts() {
        let result = Nfsd::new("/nonexistent/nfsd").reload().await;
        assert!(matches!(result, Err(CorectlError::Process(_))));

        let result = Nfsd::new("false").reload().await;
        assert!(matches!(result, Err(CorectlError::Process(_))));
    }
}
