use std::time::Duration;

use ctlutils::{signal_process, ProcessTable, Signal, SystemProcessTable};
use tokio::time::Instant;

use crate::{
    config::{
        Context, HALT_COMMAND, HALT_POLL_INTERVAL, HALT_TIMEOUT, SSH_CONNECT_TIMEOUT,
        SSH_RETRY_INTERVAL,
    },
    instance::{InstanceRecord, Liveness, Registry},
    session::{CommandRunner, ProcessCommandRunner, SshSession, SshTarget},
    CorectlError, CorectlResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Stops running instances.
///
/// The guest is first asked to shut itself down over ssh. If that's not possible the
/// instance's supervisor is sent SIGTERM instead, which needs root. Either way the halt only
/// completes once the supervisor is gone, and then removes the instance's state.
pub struct Halter<'a, P = SystemProcessTable, R = ProcessCommandRunner> {
    ctx: &'a Context,
    registry: &'a Registry<P>,
    runner: R,
    poll_interval: Duration,
    timeout: Duration,
    ssh_retry_interval: Duration,
    ssh_connect_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a, P: ProcessTable> Halter<'a, P, ProcessCommandRunner> {
    /// Creates a halter over `registry`.
    pub fn new(ctx: &'a Context, registry: &'a Registry<P>) -> Self {
        Self::with_runner(ctx, registry, ProcessCommandRunner)
    }
}

impl<'a, P: ProcessTable, R: CommandRunner + Clone> Halter<'a, P, R> {
    /// Creates a halter running ssh through `runner`.
    pub fn with_runner(ctx: &'a Context, registry: &'a Registry<P>, runner: R) -> Self {
        Self {
            ctx,
            registry,
            runner,
            poll_interval: HALT_POLL_INTERVAL,
            timeout: HALT_TIMEOUT,
            ssh_retry_interval: SSH_RETRY_INTERVAL,
            ssh_connect_timeout: SSH_CONNECT_TIMEOUT,
        }
    }

    /// Sets how often and for how long to wait for an instance to go away.
    pub fn with_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    /// Sets how often and for how long to retry logging into the guest.
    pub fn with_ssh_retry(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ssh_retry_interval = interval;
        self.ssh_connect_timeout = timeout;
        self
    }

    /// Halts an instance and removes its state.
    ///
    /// Halting an instance whose process is already gone only removes its state.
    pub async fn halt(&self, record: &InstanceRecord) -> CorectlResult<()> {
        let name = record.get_name();
        let liveness = self.registry.liveness(record);
        let Some(pid) = *record.get_pid() else {
            if liveness == Liveness::Pending {
                return Err(CorectlError::Process(format!(
                    "`{name}` is still booting, retry once it is up"
                )));
            }
            return self.finish(record, "never started").await;
        };

        if liveness == Liveness::Dead {
            return self.finish(record, "was already gone").await;
        }

        if let Err(e) = self.shutdown_guest(record).await {
            tracing::warn!("unable to shut `{name}` down gracefully ({e}), signalling it");
            if !self.ctx.get_privileged() {
                return Err(CorectlError::NotPrivileged(format!("signal `{name}`")));
            }
            signal_process(pid, Signal::SIGTERM)?;
        }

        let deadline = Instant::now() + self.timeout;
        while self.registry.liveness(record) != Liveness::Dead {
            if Instant::now() >= deadline {
                return Err(CorectlError::Timeout(format!(
                    "`{name}` (pid {pid}) still running after {}s",
                    self.timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.finish(record, "halted").await
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: Helpers
//--------------------------------------------------------------------------------------------------

impl<P: ProcessTable, R: CommandRunner + Clone> Halter<'_, P, R> {
    async fn shutdown_guest(&self, record: &InstanceRecord) -> CorectlResult<()> {
        let target = SshTarget::for_instance(record)?;
        let session = SshSession::new(self.ctx.get_ssh_exe(), target, self.runner.clone())
            .with_retry(self.ssh_retry_interval, self.ssh_connect_timeout);
        session.connect().await?;
        session.exec(HALT_COMMAND).await?;
        Ok(())
    }

    async fn finish(&self, record: &InstanceRecord, outcome: &str) -> CorectlResult<()> {
        self.registry.remove(record.get_uuid()).await?;
        tracing::info!(instance = %record.get_name(), "{outcome}");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        ffi::OsString,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use async_trait::async_trait;
    use semver::Version;
    use uuid::Uuid;

    use crate::{
        image::Channel,
        instance::SshKeyPair,
        session::{CommandOutput, InteractiveChild},
    };

    use super::*;

    /// Reports the tool alive for a number of lookups, then gone.
    #[derive(Debug, Clone)]
    struct DyingProcessTable {
        lookups_left: Arc<AtomicUsize>,
    }

    impl ProcessTable for DyingProcessTable {
        fn find(&self, _pid: u32) -> Option<String> {
            let left = self.lookups_left.load(Ordering::SeqCst);
            if left == 0 {
                return None;
            }
            self.lookups_left.store(left - 1, Ordering::SeqCst);
            Some("corectl".to_string())
        }
    }

    /// An ssh that refuses a number of logins, then answers every command with `code`.
    #[derive(Debug, Clone)]
    struct FakeSsh {
        code: i32,
        refusals_left: Arc<AtomicUsize>,
        commands: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for FakeSsh {
        async fn run(
            &self,
            _program: &Path,
            args: &[OsString],
            _stdin: Option<&Path>,
        ) -> CorectlResult<CommandOutput> {
            if let Some(command) = args.last() {
                self.commands
                    .lock()
                    .unwrap()
                    .push(command.to_string_lossy().into_owned());
            }
            let refused = self
                .refusals_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if refused {
                return Ok(CommandOutput {
                    code: Some(255),
                    stdout: String::new(),
                    stderr: "Connection refused".to_string(),
                });
            }
            Ok(CommandOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        fn spawn_interactive(
            &self,
            _program: &Path,
            _args: &[OsString],
        ) -> CorectlResult<Box<dyn InteractiveChild>> {
            Err(CorectlError::Process("no terminal in tests".to_string()))
        }
    }

    fn context(home: &Path) -> Context {
        Context::builder()
            .home_dir(home)
            .pwd(home)
            .supervisor_exe("/usr/local/bin/corectl")
            .build()
    }

    fn fake_ssh(code: i32) -> FakeSsh {
        FakeSsh {
            code,
            refusals_left: Arc::default(),
            commands: Arc::default(),
        }
    }

    async fn running(
        registry: &Registry<DyingProcessTable>,
        with_address: bool,
    ) -> anyhow::Result<InstanceRecord> {
        let mut record = InstanceRecord::builder()
            .name("web")
            .uuid(Uuid::new_v4())
            .mac("02:00:00:00:00:01")
            .channel(Channel::Alpha)
            .version(Version::new(1068, 0, 0))
            .pid(4321)
            .build();
        if with_address {
            record.set_public_ip(Some("192.168.64.9".parse()?));
            record.set_internal_key(Some(SshKeyPair {
                private_key: "/tmp/id_ed25519".into(),
                public_key: "ssh-ed25519 AAAA".to_string(),
            }));
        }
        tokio::fs::create_dir_all(registry.state_dir(record.get_uuid())).await?;
        registry.commit(&record).await?;
        Ok(record)
    }

    fn registry(home: &Path, lookups: usize) -> Registry<DyingProcessTable> {
        Registry::new(
            home.join("running"),
            "corectl",
            DyingProcessTable {
                lookups_left: Arc::new(AtomicUsize::new(lookups)),
            },
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_halt_gracefully_waits_for_exit() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = context(home.path());
        let registry = registry(home.path(), 3);
        let record = running(&registry, true).await?;

        let ssh = fake_ssh(0);
        Halter::with_runner(&ctx, &registry, ssh.clone())
            .with_timing(Duration::from_millis(5), Duration::from_secs(5))
            .halt(&record)
            .await?;

        assert_eq!(*ssh.commands.lock().unwrap(), ["true", HALT_COMMAND]);
        assert!(!registry.state_dir(record.get_uuid()).exists());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_halt_waits_for_a_busy_guest_to_accept_logins() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = context(home.path());
        let registry = registry(home.path(), 3);
        let record = running(&registry, true).await?;

        // Unprivileged, so falling back to a signal would fail the halt
        let ssh = fake_ssh(0);
        ssh.refusals_left.store(2, Ordering::SeqCst);
        Halter::with_runner(&ctx, &registry, ssh.clone())
            .with_timing(Duration::from_millis(5), Duration::from_secs(5))
            .with_ssh_retry(Duration::from_millis(5), Duration::from_secs(5))
            .halt(&record)
            .await?;

        assert_eq!(
            *ssh.commands.lock().unwrap(),
            ["true", "true", "true", HALT_COMMAND]
        );
        assert!(!registry.state_dir(record.get_uuid()).exists());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_halt_of_dead_instance_removes_state() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = context(home.path());
        let registry = registry(home.path(), 0);
        let record = running(&registry, true).await?;

        let ssh = fake_ssh(0);
        Halter::with_runner(&ctx, &registry, ssh.clone())
            .halt(&record)
            .await?;

        assert!(ssh.commands.lock().unwrap().is_empty());
        assert!(!registry.state_dir(record.get_uuid()).exists());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_halt_without_ssh_needs_privileges() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = context(home.path());
        let registry = registry(home.path(), usize::MAX);
        let record = running(&registry, false).await?;

        let result = Halter::with_runner(&ctx, &registry, fake_ssh(0))
            .halt(&record)
            .await;

        assert!(matches!(result, Err(CorectlError::NotPrivileged(_))));
        assert!(registry.state_dir(record.get_uuid()).exists());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_halt_times_out_when_instance_lingers() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let ctx = context(home.path());
        let registry = registry(home.path(), usize::MAX);
        let record = running(&registry, true).await?;

        let result = Halter::with_runner(&ctx, &registry, fake_ssh(0))
            .with_timing(Duration::from_millis(5), Duration::from_millis(30))
            .halt(&record)
            .await;

        assert!(matches!(result, Err(CorectlError::Timeout(_))));
        assert!(registry.state_dir(record.get_uuid()).exists());
        Ok(())
    }
}
