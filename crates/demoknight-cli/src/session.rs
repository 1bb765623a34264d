//! One running game instance and everything attached to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use demoknight_core::capture::CaptureTool;
use demoknight_core::process::{ProcessHandle, ProcessProbe, SysinfoProbe};
use demoknight_core::rcon::{RconConfig, RconEndpoint, RconTransport};
use demoknight_core::tailer::TailerConfig;
use demoknight_core::watchdog::WatchdogConfig;
use demoknight_core::{ControlError, FatalSignal, LogTailer, PassContext, ProcessWatchdog, RconSession};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CliError;
use crate::launch::{self, LaunchPlan};
use crate::responsiveness::{self, ProbeConfig};

/// Timings for bringing a game up and down.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub watchdog: WatchdogConfig,
    pub rcon: RconConfig,
    pub tailer: TailerConfig,
    pub probe: ProbeConfig,
    /// How long the game process may take to appear.
    pub pid_timeout: Duration,
    pub pid_interval: Duration,
    /// How long the console log may take to appear once the game runs.
    pub log_timeout: Duration,
    /// Upper bound on the `quit` command itself.
    pub quit_command_timeout: Duration,
    /// How long the game may take to exit after `quit`.
    pub exit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            rcon: RconConfig::default(),
            tailer: TailerConfig::default(),
            probe: ProbeConfig::default(),
            pid_timeout: Duration::from_secs(60),
            pid_interval: Duration::from_secs(1),
            log_timeout: Duration::from_secs(60),
            quit_command_timeout: Duration::from_secs(10),
            exit_timeout: Duration::from_secs(30),
        }
    }
}

pub struct GameSession {
    handle: ProcessHandle,
    probe: Arc<SysinfoProbe>,
    watchdog: ProcessWatchdog,
    rcon: RconSession,
    tailer: LogTailer,
    game_path: PathBuf,
    config: SessionConfig,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("pid", &self.handle.pid())
            .field("game_path", &self.game_path)
            .field("state", &self.watchdog.state())
            .finish_non_exhaustive()
    }
}

impl GameSession {
    /// Start the game and wait until it is loaded and answering commands.
    pub async fn launch(plan: &LaunchPlan, config: &SessionConfig, transport: Arc<dyn RconTransport>) -> Result<Self> {
        let probe = Arc::new(SysinfoProbe::new());
        if let Some(pid) = probe.find_by_command_prefix(&plan.game_path) {
            return Err(CliError::GameAlreadyRunning(format!(
                "{} (pid {pid}), close it and try again",
                plan.game_path.display()
            ))
            .into());
        }
        launch::clear_stale_log(&plan.game_path)?;

        let endpoint = RconEndpoint::generate()?;
        let mut handle = ProcessHandle::spawn(plan.spec(&endpoint))
            .with_context(|| format!("starting {}", plan.game_path.display()))?;
        let pid = launch::discover_pid(
            || probe.find_by_command_prefix(&plan.game_path),
            config.pid_timeout,
            config.pid_interval,
        )
        .await?;
        if pid != handle.pid() {
            handle.adopt(pid);
        }

        let fatal = FatalSignal::new();
        let process_probe: Arc<dyn ProcessProbe> = probe.clone();
        let watchdog = ProcessWatchdog::spawn(pid, process_probe, config.watchdog, fatal.clone())?;
        let rcon = RconSession::new(endpoint, transport, config.rcon, fatal);

        let mut session = Self {
            handle,
            probe,
            watchdog,
            rcon,
            tailer: LogTailer::new(config.tailer),
            game_path: plan.game_path.clone(),
            config: config.clone(),
        };
        if let Err(err) = session.start_up().await {
            session.abort().await;
            return Err(err);
        }
        Ok(session)
    }

    async fn start_up(&mut self) -> Result<()> {
        info!(pid = self.handle.pid(), "Waiting for the game to load");
        self.watchdog.wait_for_running().await?;

        let log = self.await_log().await?;
        info!(path = %log.display(), "Following console log");
        self.tailer.retarget(log);

        responsiveness::wait_until_responsive(&self.rcon, self.config.probe).await?;
        Ok(())
    }

    async fn await_log(&self) -> Result<PathBuf> {
        let started = Instant::now();
        loop {
            self.rcon.fatal().check()?;
            if let Some(log) = launch::find_logs(&self.game_path)?.into_iter().next() {
                return Ok(log);
            }
            if started.elapsed() >= self.config.log_timeout {
                return Err(ControlError::log_unavailable(format!(
                    "no {} appeared under {} within {:?}",
                    launch::LOG_FILE_NAME,
                    self.game_path.parent().unwrap_or(&self.game_path).display(),
                    self.config.log_timeout
                ))
                .into());
            }
            tokio::time::sleep(self.config.pid_interval).await;
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// Collaborators for one pass against this game.
    pub fn pass_context<'a>(&'a mut self, capture: &'a dyn CaptureTool, output_dir: &'a Path) -> PassContext<'a> {
        PassContext {
            rcon: &self.rcon,
            tailer: &mut self.tailer,
            watchdog: &self.watchdog,
            capture,
            output_dir,
        }
    }

    /// Ask the game to exit and wait for it to go.
    ///
    /// The exit is announced to the watchdog first so it is not treated as
    /// a crash. A game that does not leave in time is killed.
    pub async fn quit(mut self) -> Result<()> {
        self.watchdog.request_shutdown();
        match tokio::time::timeout(self.config.quit_command_timeout, self.rcon.execute("quit")).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, "quit command failed"),
            Err(_) => debug!("quit command got no answer"),
        }

        if tokio::time::timeout(self.config.exit_timeout, self.watchdog.join())
            .await
            .is_err()
        {
            warn!(pid = self.handle.pid(), "Game did not exit after quit, killing it");
            self.handle.kill(self.probe.as_ref()).await?;
        }
        self.remove_log();
        Ok(())
    }

    /// Tear down after a failure: kill the game and stop watching it.
    pub async fn abort(mut self) {
        self.watchdog.request_shutdown();
        if let Err(err) = self.handle.kill(self.probe.as_ref()).await {
            warn!(pid = self.handle.pid(), error = %err, "Failed to kill the game");
        }
        self.remove_log();
        self.watchdog.stop().await;
    }

    fn remove_log(&self) {
        let Some(log) = self.tailer.path() else {
            return;
        };
        match std::fs::remove_file(log) {
            Ok(()) => debug!(path = %log.display(), "Removed console log"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %log.display(), error = %err, "Failed to remove console log"),
        }
    }
}
