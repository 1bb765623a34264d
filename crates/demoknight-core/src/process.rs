//! Process identity and OS status sampling.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};

/// Scheduler status of a live process, reduced to what the watchdog needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    /// On a CPU or runnable.
    Running,
    /// Interruptible sleep.
    Sleeping,
    /// Uninterruptible sleep, usually blocked on disk I/O.
    DiskSleep,
    /// Stopped or traced.
    Stopped,
    /// Exited but not yet reaped.
    Zombie,
    /// Anything else the OS reports.
    Other,
}

impl ProcessStatus {
    /// Whether the status suggests the process is loading rather than rendering.
    #[must_use]
    pub fn is_io_wait(self) -> bool {
        matches!(self, Self::Sleeping | Self::DiskSleep)
    }

    /// Zombies are dead for every purpose here.
    #[must_use]
    pub fn is_alive(self) -> bool {
        self != Self::Zombie
    }
}

impl From<sysinfo::ProcessStatus> for ProcessStatus {
    fn from(status: sysinfo::ProcessStatus) -> Self {
        match status {
            sysinfo::ProcessStatus::Run => Self::Running,
            sysinfo::ProcessStatus::Sleep | sysinfo::ProcessStatus::Idle => Self::Sleeping,
            sysinfo::ProcessStatus::UninterruptibleDiskSleep => Self::DiskSleep,
            sysinfo::ProcessStatus::Stop | sysinfo::ProcessStatus::Tracing => Self::Stopped,
            sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead => Self::Zombie,
            _ => Self::Other,
        }
    }
}

/// Source of process liveness and status.
pub trait ProcessProbe: Send + Sync + std::fmt::Debug {
    /// Current status of `pid`, or `None` if no such process exists.
    fn sample(&self, pid: u32) -> Option<ProcessStatus>;

    /// Forcefully terminate `pid`. Returns whether a signal was delivered.
    fn kill(&self, pid: u32) -> bool;
}

/// [`ProcessProbe`] backed by `sysinfo`.
#[derive(Debug)]
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    /// Create a probe with an empty process table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Find a running process whose command line starts with `program`.
    ///
    /// Used when a launcher starts the real process on our behalf.
    #[must_use]
    pub fn find_by_command_prefix(&self, program: &Path) -> Option<u32> {
        let prefix = program.as_os_str().to_string_lossy();
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        system
            .processes()
            .iter()
            .find(|(_, process)| {
                process
                    .cmd()
                    .first()
                    .is_some_and(|arg0| arg0.to_string_lossy().starts_with(&*prefix))
            })
            .map(|(pid, _)| pid.as_u32())
    }
}

impl ProcessProbe for SysinfoProbe {
    fn sample(&self, pid: u32) -> Option<ProcessStatus> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| process.status().into())
    }

    fn kill(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some_and(sysinfo::Process::kill)
    }
}

/// What to start: program, arguments, environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, already split.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory, if not inherited.
    pub current_dir: Option<PathBuf>,
}

/// A launched target process.
///
/// `pid` may differ from the spawned child when a launcher hands off to
/// the real process; see [`ProcessHandle::adopt`].
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    spec: LaunchSpec,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Spawn the process described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the program cannot be started.
    pub fn spawn(spec: LaunchSpec) -> ControlResult<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| ControlError::invalid_configuration("process exited before its pid was read"))?;
        info!(pid, program = %spec.program.display(), "Launched process");

        Ok(Self {
            pid,
            spec,
            child: Some(child),
        })
    }

    /// Track a process that was started elsewhere.
    #[must_use]
    pub fn attach(pid: u32, spec: LaunchSpec) -> Self {
        Self {
            pid,
            spec,
            child: None,
        }
    }

    /// Switch to a different pid, keeping the spawned child for reaping.
    pub fn adopt(&mut self, pid: u32) {
        debug!(from = self.pid, to = pid, "Adopting process");
        self.pid = pid;
    }

    /// OS process id of the target.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// How the process was started.
    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Kill the target and reap the spawned child if it is the target.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the child cannot be killed.
    pub async fn kill(&mut self, probe: &dyn ProcessProbe) -> ControlResult<()> {
        if let Some(child) = self.child.as_mut()
            && child.id() == Some(self.pid)
        {
            child.kill().await?;
            return Ok(());
        }
        if !probe.kill(self.pid) {
            warn!(pid = self.pid, "Kill signal was not delivered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_wait_statuses() {
        assert!(ProcessStatus::Sleeping.is_io_wait());
        assert!(ProcessStatus::DiskSleep.is_io_wait());
        assert!(!ProcessStatus::Running.is_io_wait());
        assert!(!ProcessStatus::Zombie.is_alive());
    }

    #[test]
    fn sysinfo_status_mapping() {
        assert_eq!(ProcessStatus::from(sysinfo::ProcessStatus::Run), ProcessStatus::Running);
        assert_eq!(
            ProcessStatus::from(sysinfo::ProcessStatus::UninterruptibleDiskSleep),
            ProcessStatus::DiskSleep
        );
        assert_eq!(ProcessStatus::from(sysinfo::ProcessStatus::Zombie), ProcessStatus::Zombie);
    }

    #[test]
    fn current_process_is_visible() {
        let probe = SysinfoProbe::new();
        let status = probe.sample(std::process::id());
        assert!(status.is_some_and(ProcessStatus::is_alive));
    }
}
