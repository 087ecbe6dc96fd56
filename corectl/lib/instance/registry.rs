use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use ctlutils::{ProcessTable, SystemProcessTable};
use tokio::fs;
use uuid::Uuid;

use crate::{
    config::{Context, PENDING_GRACE},
    utils, CorectlError, CorectlResult,
};

use super::{Claim, InstanceRecord};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file an instance record is persisted to inside its state directory.
pub const RECORD_FILENAME: &str = "config.json";

/// Longest process name some platforms report before truncating it.
const MAX_COMM_LEN: usize = 15;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a persisted instance is still around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Its supervisor is running.
    Alive,

    /// It's being launched and has no PID yet.
    Pending,

    /// It's gone, or its PID now belongs to some other program.
    Dead,
}

/// What a pass over the run directory found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    /// Live and pending instances, oldest first.
    pub live: Vec<InstanceRecord>,

    /// Instances found dead, whose state was removed.
    pub dead: Vec<InstanceRecord>,
}

/// The set of instances persisted under the run directory.
///
/// Every instance owns `<run_dir>/<uuid>/`. The directory is created exclusively when the
/// instance is claimed, which is what keeps two launches of the same UUID apart. Records
/// found dead while scanning are removed along with their directory.
#[derive(Debug, Clone)]
pub struct Registry<P = SystemProcessTable> {
    run_dir: PathBuf,
    tool_name: String,
    processes: P,
    pending_grace: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Registry<SystemProcessTable> {
    /// Creates a registry over the run directory of `ctx`, checking the host's process table.
    pub fn from_context(ctx: &Context) -> Self {
        Registry::new(ctx.running_dir(), ctx.get_tool_name(), SystemProcessTable)
    }
}

impl<P: ProcessTable> Registry<P> {
    /// Creates a registry over `run_dir` for instances supervised by `tool_name`.
    pub fn new(run_dir: impl Into<PathBuf>, tool_name: impl Into<String>, processes: P) -> Self {
        Self {
            run_dir: run_dir.into(),
            tool_name: tool_name.into(),
            processes,
            pending_grace: PENDING_GRACE,
        }
    }

    /// Sets how long a record without a PID counts as an instance being launched.
    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    /// The state directory of an instance.
    pub fn state_dir(&self, uuid: &Uuid) -> PathBuf {
        self.run_dir.join(uuid.to_string())
    }

    /// The record file of an instance.
    pub fn record_path(&self, uuid: &Uuid) -> PathBuf {
        self.state_dir(uuid).join(RECORD_FILENAME)
    }

    /// Checks whether a record describes a live instance.
    ///
    /// A PID only counts if the process behind it carries the tool's name, which guards
    /// against the PID having been recycled by some unrelated program.
    pub fn liveness(&self, record: &InstanceRecord) -> Liveness {
        match record.get_pid() {
            Some(pid) => match self.processes.find(*pid) {
                Some(name) if names_match(&name, &self.tool_name) => Liveness::Alive,
                Some(name) => {
                    tracing::debug!(pid, %name, "pid of `{}` was recycled", record.get_name());
                    Liveness::Dead
                }
                None => Liveness::Dead,
            },
            None if record.age().to_std().unwrap_or_default() < self.pending_grace => {
                Liveness::Pending
            }
            None => Liveness::Dead,
        }
    }

    /// Returns every live (or pending) instance, oldest first.
    ///
    /// Dead instances and abandoned state directories are garbage collected on the way.
    pub async fn enumerate(&self) -> CorectlResult<Vec<InstanceRecord>> {
        Ok(self.scan().await?.live)
    }

    /// Sorts the persisted instances into live and dead ones, removing the state of the dead.
    pub async fn scan(&self) -> CorectlResult<Scan> {
        let mut entries = match fs::read_dir(&self.run_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Scan::default()),
            Err(e) => return Err(e.into()),
        };

        let mut scan = Scan::default();
        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            match self.load(&dir).await {
                Ok(record) => match self.liveness(&record) {
                    Liveness::Dead => {
                        tracing::warn!(
                            pid = ?record.get_pid(),
                            "`{}` is dead, removing its state",
                            record.get_name()
                        );
                        remove_dir(&dir).await?;
                        scan.dead.push(record);
                    }
                    _ => scan.live.push(record),
                },
                Err(e) => {
                    if self.is_abandoned(&dir).await? {
                        tracing::debug!("removing abandoned {} ({e})", dir.display());
                        remove_dir(&dir).await?;
                    }
                }
            }
        }

        scan.live.sort_by_key(|record| *record.get_created_at());
        Ok(scan)
    }

    /// Finds a live instance by name or UUID.
    pub async fn find(&self, id: &str) -> CorectlResult<InstanceRecord> {
        self.enumerate()
            .await?
            .into_iter()
            .find(|record| record.get_name() == id || record.get_uuid().to_string() == id)
            .ok_or_else(|| CorectlError::InstanceNotFound(id.to_string()))
    }

    /// Fails with [`CorectlError::Conflict`] if a live instance holds anything `record` claims.
    pub async fn reserve(&self, record: &InstanceRecord) -> CorectlResult<()> {
        self.check_conflicts(record, false).await
    }

    /// Reserves the identity and resources of `record` and persists it.
    ///
    /// On success the instance's state directory exists and holds the record, which makes the
    /// reservation visible to every other invocation. Two claims racing on the same UUID are
    /// settled by the exclusive creation of the state directory. Once written, the record is
    /// checked against the live set again, and withdrawn if another launch claimed an
    /// overlapping resource in the meantime.
    pub async fn claim(&self, record: &InstanceRecord) -> CorectlResult<PathBuf> {
        self.reserve(record).await?;

        fs::create_dir_all(&self.run_dir).await?;
        let dir = self.state_dir(record.get_uuid());
        self.create_state_dir(record, &dir).await?;

        if let Err(e) = self.commit(record).await {
            remove_dir(&dir).await?;
            return Err(e);
        }

        if let Err(e) = self.check_conflicts(record, true).await {
            remove_dir(&dir).await?;
            return Err(e);
        }

        tracing::debug!("claimed {}", dir.display());
        Ok(dir)
    }

    /// Persists `record`, replacing any previous version of it.
    pub async fn commit(&self, record: &InstanceRecord) -> CorectlResult<()> {
        let contents = serde_json::to_vec_pretty(record)?;
        utils::write_atomic(&self.record_path(record.get_uuid()), &contents).await
    }

    /// Removes the state directory of an instance, if there is one.
    pub async fn remove(&self, uuid: &Uuid) -> CorectlResult<()> {
        remove_dir(&self.state_dir(uuid)).await
    }

    /// Loads the record persisted in `dir`.
    pub async fn load(&self, dir: &Path) -> CorectlResult<InstanceRecord> {
        let contents = fs::read(dir.join(RECORD_FILENAME)).await?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: Helpers
//--------------------------------------------------------------------------------------------------

impl<P: ProcessTable> Registry<P> {
    async fn check_conflicts(&self, record: &InstanceRecord, committed: bool) -> CorectlResult<()> {
        for live in self.enumerate().await? {
            if committed && live.get_uuid() == record.get_uuid() {
                continue;
            }

            if let Some(claim) = record.conflict_with(&live) {
                return Err(conflict(claim, &live));
            }
        }
        Ok(())
    }

    /// Creates the state directory exclusively, taking it over from a dead occupant once.
    async fn create_state_dir(&self, record: &InstanceRecord, dir: &Path) -> CorectlResult<()> {
        for _ in 0..2 {
            match fs::create_dir(dir).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let occupant = self.load(dir).await.ok();
            let stale = match &occupant {
                Some(occupant) => self.liveness(occupant) == Liveness::Dead,
                None => self.is_abandoned(dir).await?,
            };

            if !stale {
                let holder = occupant
                    .map(|occupant| occupant.get_name().clone())
                    .unwrap_or_else(|| record.get_uuid().to_string());
                return Err(CorectlError::Conflict {
                    resource: Claim::Uuid(*record.get_uuid()).to_string(),
                    instance: holder,
                });
            }

            remove_dir(dir).await?;
        }

        Err(CorectlError::Conflict {
            resource: Claim::Uuid(*record.get_uuid()).to_string(),
            instance: record.get_uuid().to_string(),
        })
    }

    /// Whether a directory without a readable record is older than the pending grace window.
    async fn is_abandoned(&self, dir: &Path) -> CorectlResult<bool> {
        let modified = match fs::metadata(dir).await {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age >= self.pending_grace)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn conflict(claim: Claim, holder: &InstanceRecord) -> CorectlError {
    CorectlError::Conflict {
        resource: claim.to_string(),
        instance: holder.get_name().clone(),
    }
}

/// Compares a process name against the tool name, allowing for truncated process names.
fn names_match(process: &str, tool: &str) -> bool {
    process == tool || (process.len() == MAX_COMM_LEN && tool.starts_with(process))
}

async fn remove_dir(dir: &Path) -> CorectlResult<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
