use std::{
    fmt::{self, Display},
    net::Ipv4Addr,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use ctlutils::{signal_process, Signal};
use reqwest::{Client, StatusCode};
use tokio::{
    process::{Child, Command},
    signal::unix::{signal, SignalKind},
    time::Instant,
};

use crate::{
    config::{Context, IDENTITY_TIMEOUT},
    image::{lookup_image, Channel, GpgVerifier, ImageRef, LocalImage, SignatureVerifier, VersionSpec},
    instance::{mac_from_uuid, CloudConfig, InstanceRecord, Registry, Storage, StorageKind},
    metadata::{MetadataServer, MetadataSignals, MetadataState},
    session::{generate_key_pair, ProcessCommandRunner},
    CorectlError, CorectlResult,
};

use super::{
    clamp_memory, hard_drives, hypervisor_args, interfaces, kernel_cmdline, resolve_name,
    resolve_uuid, storage_device, LaunchRequest,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file a detached instance's console is written to, inside its state directory.
pub const CONSOLE_LOG_FILENAME: &str = "console.log";

/// The hidden subcommand the supervisor is started with.
pub const SUPERVISE_SUBCOMMAND: &str = "supervise";

/// What a process exits with after being stopped by SIGTERM.
const TERMINATED_EXIT_CODE: i32 = 128 + libc::SIGTERM;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The stages a boot goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    /// Checking and normalizing the request.
    Validating,

    /// Claiming identity and resources.
    Reserving,

    /// Preparing the state directory and starting the hypervisor.
    Spawning,

    /// Waiting for the guest to report its address.
    AwaitingIdentity,

    /// The record holds the PID and the address.
    Committed,

    /// The boot was aborted.
    Failed,

    /// The guest did not report its address in time.
    TimedOut,
}

/// Boots instances.
///
/// A boot validates the request, claims the instance's identity and resources in the
/// registry, starts a metadata service and the supervised hypervisor, and then waits for the
/// guest to call home. Detached instances are left running once they did. Attached ones are
/// followed until the hypervisor exits, after which their state is removed.
pub struct Orchestrator<V = GpgVerifier> {
    ctx: Context,
    registry: Registry,
    client: Client,
    verifier: V,
    identity_timeout: Duration,
}

/// What a boot is waiting on once the hypervisor runs.
struct Booting {
    child: Child,
    server: MetadataServer,
    signals: MetadataSignals,
}

/// How the wait for the guest's address ended.
enum Identity {
    Address(Ipv4Addr),
    Exited(ExitStatus),
    TimedOut,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator<GpgVerifier> {
    /// Creates an orchestrator checking release signatures with gpg.
    pub fn new(ctx: &Context) -> CorectlResult<Self> {
        let client = Client::builder().build()?;
        let verifier = GpgVerifier::new(ctx.get_gpg_exe());
        Ok(Self::with_verifier(ctx, client, verifier))
    }
}

impl<V: SignatureVerifier> Orchestrator<V> {
    /// Creates an orchestrator with a custom HTTP client and signature verifier.
    pub fn with_verifier(ctx: &Context, client: Client, verifier: V) -> Self {
        Self {
            ctx: ctx.clone(),
            registry: Registry::from_context(ctx),
            client,
            verifier,
            identity_timeout: IDENTITY_TIMEOUT,
        }
    }

    /// Sets how long a guest may take to report its address.
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// The registry instances are claimed in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Checks a request and turns it into an instance record, pulling the image if needed.
    pub async fn validate(
        &self,
        request: &LaunchRequest,
    ) -> CorectlResult<(InstanceRecord, LocalImage)> {
        let image = ImageRef::new(
            Channel::normalize(&request.channel),
            VersionSpec::normalize(&request.version),
        );
        let image = lookup_image(
            &self.ctx,
            &self.client,
            &self.verifier,
            &image,
            false,
            request.prefer_local,
        )
        .await?;

        let uuid = resolve_uuid(request.uuid.as_deref());
        let name = resolve_name(request.name.as_deref(), &uuid)?;

        if request.cpus == 0 {
            return Err(CorectlError::UserInput(
                "an instance needs at least one vCPU".to_string(),
            ));
        }
        let memory = clamp_memory(request.memory);

        let cdroms = request
            .cdrom
            .as_deref()
            .map(|cdrom| storage_device(&self.ctx, cdrom, StorageKind::Cdrom, 0))
            .transpose()?
            .into_iter()
            .collect();
        let storage = Storage {
            cdroms,
            hard_drives: hard_drives(&self.ctx, request.root.as_deref(), &request.volumes)?,
        };

        let interfaces = interfaces(&self.ctx, &request.taps)?;

        let mut record = InstanceRecord::builder()
            .name(name)
            .uuid(uuid)
            .mac(mac_from_uuid(&uuid))
            .channel(image.channel)
            .version(image.version.clone())
            .cpus(request.cpus)
            .memory(memory)
            .interfaces(interfaces)
            .storage(storage)
            .detached(request.detached)
            .build();

        if request.root.is_some() {
            record.set_root(Some(0));
        }
        record.set_ssh_key(
            request
                .ssh_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
        );
        record.set_extra(request.extra.clone());
        if let Some(value) = request.cloud_config.as_deref() {
            record.set_cloud_config(Some(self.locate_cloud_config(value).await?));
        }

        Ok((record, image))
    }

    /// Boots an instance.
    ///
    /// Returns the committed record of a detached instance once the guest reported its
    /// address, or the final record of an attached one once it stopped.
    pub async fn launch(&self, request: &LaunchRequest) -> CorectlResult<InstanceRecord> {
        let result = self.boot(request).await;
        match &result {
            Err(CorectlError::Timeout(_)) => enter(request_label(request), BootState::TimedOut),
            Err(e) => {
                enter(request_label(request), BootState::Failed);
                tracing::debug!("boot failed: {e}");
            }
            Ok(_) => {}
        }
        result
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: Helpers
//--------------------------------------------------------------------------------------------------

impl<V: SignatureVerifier> Orchestrator<V> {
    async fn boot(&self, request: &LaunchRequest) -> CorectlResult<InstanceRecord> {
        let label = request_label(request);
        enter(label, BootState::Validating);
        let (mut record, image) = self.validate(request).await?;

        enter(record.get_name(), BootState::Reserving);
        let dir = self.registry.claim(&record).await?;

        enter(record.get_name(), BootState::Spawning);
        let booting = match self.spawn(&mut record, &image, &dir).await {
            Ok(booting) => booting,
            Err(e) => {
                self.registry.remove(record.get_uuid()).await?;
                return Err(e);
            }
        };

        self.await_identity(record, booting).await
    }

    /// Prepares the state directory and starts the supervised hypervisor.
    async fn spawn(
        &self,
        record: &mut InstanceRecord,
        image: &LocalImage,
        dir: &Path,
    ) -> CorectlResult<Booting> {
        let comment = format!("{}@{}", self.ctx.get_tool_name(), record.get_name());
        let key = generate_key_pair(
            &ProcessCommandRunner,
            self.ctx.get_ssh_keygen_exe(),
            dir,
            &comment,
        )
        .await?;

        let cloud_config = match record.get_cloud_config() {
            Some(CloudConfig::Local(path)) => Some(tokio::fs::read_to_string(path).await?),
            _ => None,
        };
        let (state, signals) = MetadataState::new(
            record.get_name().clone(),
            key.public_key.clone(),
            cloud_config,
            self.ctx.get_guest_subnet(),
        );
        record.set_internal_key(Some(key));

        let server = MetadataServer::start(state, self.ctx.get_host_ip()).await?;
        let cmdline = kernel_cmdline(record, server.endpoint());
        let args = hypervisor_args(record, &image.kernel, &image.initrd, &cmdline);
        tracing::debug!(instance = %record.get_name(), ?args, "hypervisor arguments");

        self.registry.commit(record).await?;
        let child = self.spawn_supervisor(record, dir, &args)?;

        Ok(Booting {
            child,
            server,
            signals,
        })
    }

    fn spawn_supervisor(
        &self,
        record: &InstanceRecord,
        dir: &Path,
        hypervisor_args: &[String],
    ) -> CorectlResult<Child> {
        let mut command = Command::new(self.ctx.get_supervisor_exe());
        command.arg(SUPERVISE_SUBCOMMAND);

        if *record.get_detached() {
            command.arg("--console-log").arg(dir.join(CONSOLE_LOG_FILENAME));

            unsafe {
                command.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }

            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
            command.stdin(Stdio::null());
        }

        command
            .arg(self.ctx.get_hypervisor_exe())
            .arg("--")
            .args(hypervisor_args);

        // Only pass RUST_LOG if it's set in the environment
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            command.env("RUST_LOG", rust_log);
        }

        let child = command.spawn().map_err(|e| {
            CorectlError::Process(format!(
                "failed to start {}: {e}",
                self.ctx.get_supervisor_exe().display()
            ))
        })?;

        tracing::info!(instance = %record.get_name(), pid = ?child.id(), "started hypervisor supervisor");
        Ok(child)
    }

    async fn await_identity(
        &self,
        mut record: InstanceRecord,
        mut booting: Booting,
    ) -> CorectlResult<InstanceRecord> {
        let name = record.get_name().clone();
        let pid = booting.child.id().ok_or_else(|| {
            CorectlError::Process(format!("the supervisor of `{name}` exited right away"))
        });
        let pid = match pid {
            Ok(pid) => pid,
            Err(e) => {
                self.registry.remove(record.get_uuid()).await?;
                return Err(e);
            }
        };
        record.set_pid(Some(pid));

        enter(&name, BootState::AwaitingIdentity);
        let deadline = Instant::now() + self.identity_timeout;
        let identity = tokio::select! {
            Ok(ip) = &mut booting.signals.guest_ip => Identity::Address(ip),
            status = booting.child.wait() => Identity::Exited(status?),
            _ = tokio::time::sleep_until(deadline) => Identity::TimedOut,
        };

        match identity {
            Identity::Address(ip) => {
                record.set_public_ip(Some(ip));
                self.registry.commit(&record).await?;
                enter(&name, BootState::Committed);
                tracing::info!(instance = %name, pid, %ip, "instance is up");
            }
            Identity::Exited(status) => {
                self.registry.remove(record.get_uuid()).await?;
                if *record.get_detached() || !is_benign_exit(&status) {
                    return Err(CorectlError::Process(format!(
                        "hypervisor of `{name}` exited during boot with {status}"
                    )));
                }
                return Ok(record);
            }
            Identity::TimedOut => {
                // The guest may still be booting, so the hypervisor is left alone.
                self.registry.commit(&record).await?;
                let message = format!(
                    "`{name}` did not report its address within {}s",
                    self.identity_timeout.as_secs()
                );
                if *record.get_detached() {
                    return Err(CorectlError::Timeout(message));
                }
                tracing::warn!("{message}, still waiting for it to exit");
            }
        }

        if *record.get_detached() {
            wait_for_deliveries(&name, &mut booting.signals, deadline).await;
            booting.server.shutdown();
            return Ok(record);
        }

        let status = wait_attached(&name, &mut booting.child).await?;
        booting.server.shutdown();
        self.registry.remove(record.get_uuid()).await?;

        if !is_benign_exit(&status) {
            return Err(CorectlError::Process(format!(
                "hypervisor of `{name}` exited with {status}"
            )));
        }

        tracing::info!(instance = %name, "instance stopped");
        Ok(record)
    }

    /// Decides whether a cloud-config is a URL the guest can fetch or a local file to serve.
    async fn locate_cloud_config(&self, value: &str) -> CorectlResult<CloudConfig> {
        if let Ok(response) = self.client.get(value).send().await {
            if matches!(response.status(), StatusCode::OK | StatusCode::NO_CONTENT) {
                return Ok(CloudConfig::Remote(value.to_string()));
            }
        }

        let path = self.ctx.absolute(value);
        if !path.is_file() {
            return Err(CorectlError::UserInput(format!(
                "cloud-config `{value}` is neither a reachable URL nor a local file"
            )));
        }

        Ok(CloudConfig::Local(path))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            BootState::Validating => "validating",
            BootState::Reserving => "reserving",
            BootState::Spawning => "spawning",
            BootState::AwaitingIdentity => "awaiting identity",
            BootState::Committed => "committed",
            BootState::Failed => "failed",
            BootState::TimedOut => "timed out",
        };
        write!(f, "{state}")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Whether a hypervisor exit is the expected outcome of stopping the instance.
pub fn is_benign_exit(status: &ExitStatus) -> bool {
    status.success()
        || matches!(status.signal(), Some(libc::SIGTERM) | Some(libc::SIGINT))
        || status.code() == Some(TERMINATED_EXIT_CODE)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn enter(instance: &str, state: BootState) {
    tracing::debug!(%instance, %state, "boot state changed");
}

fn request_label(request: &LaunchRequest) -> &str {
    request.name.as_deref().unwrap_or("<unnamed>")
}

/// Keeps the metadata service up until the guest fetched everything it needs, or the
/// deadline passed.
async fn wait_for_deliveries(name: &str, signals: &mut MetadataSignals, deadline: Instant) {
    let deliveries = async {
        let _ = (&mut signals.ssh_key_sent).await;
        if let Some(cloud_config_sent) = signals.cloud_config_sent.as_mut() {
            let _ = cloud_config_sent.await;
        }
    };

    if tokio::time::timeout_at(deadline, deliveries).await.is_err() {
        tracing::warn!("`{name}` has not fetched all of its metadata in time");
    }
}

/// Follows an attached instance until its supervisor exits.
///
/// An interrupt from the terminal reaches the supervisor too, which stops the hypervisor, so
/// it only has to be outlived here. A termination request is passed on.
async fn wait_attached(name: &str, child: &mut Child) -> CorectlResult<ExitStatus> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            status = child.wait() => return Ok(status?),
            _ = sigint.recv() => tracing::info!("interrupted, waiting for `{name}` to stop"),
            _ = sigterm.recv() => {
                if let Some(pid) = child.id() {
                    signal_process(pid, Signal::SIGTERM)?;
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::process::Command as StdCommand;

    use super::*;

    fn exit_of(script: &str) -> anyhow::Result<ExitStatus> {
        Ok(StdCommand::new("/bin/sh").args(["-c", script]).status()?)
    }

    #[test]
    fn test_is_benign_exit() -> anyhow::Result<()> {
        assert!(is_benign_exit(&exit_of("exit 0")?));
        assert!(is_benign_exit(&exit_of("exit 143")?));
        assert!(is_benign_exit(&exit_of("kill -TERM $$")?));
        assert!(is_benign_exit(&exit_of("kill -INT $$")?));
        assert!(!is_benign_exit(&exit_of("exit 1")?));
        assert!(!is_benign_exit(&exit_of("kill -KILL $$")?));
        Ok(())
    }

    #[test]
    fn test_boot_state_display() {
        assert_eq!(BootState::AwaitingIdentity.to_string(), "awaiting identity");
        assert_eq!(BootState::TimedOut.to_string(), "timed out");
    }
}
