//! One measurement pass: restart playback, seek, capture, collect.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::capture::{ArtifactLocator, CaptureContext, CaptureTool};
use crate::error::{ControlError, ControlResult, ErrorClass};
use crate::plan::{BenchTest, Changes, Pass};
use crate::rcon::RconSession;
use crate::seeker::{SeekConfig, SeekReport, SeekTarget, TickSeeker};
use crate::signal::FatalSignal;
use crate::tailer::LogTailer;
use crate::watchdog::ProcessWatchdog;

/// Console commands a pass issues. `{sequence}` is substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassCommands {
    /// Restart the replay from its first tick, slowed down while it loads.
    pub play: String,
    /// Back to normal speed.
    pub resume: String,
    /// Leave the replay.
    pub disconnect: String,
}

impl Default for PassCommands {
    fn default() -> Self {
        Self {
            play: "playdemo {sequence}; demo_debug 1; demo_timescale 0.05".to_owned(),
            resume: "demo_timescale 1".to_owned(),
            disconnect: "disconnect".to_owned(),
        }
    }
}

/// Per-pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Replay to play, as the game's play command expects it.
    pub sequence: String,
    /// First tick of the measured section.
    pub start_tick: u32,
    /// Replay seconds per tick.
    pub tick_interval: f64,
    /// Length of the measured section.
    #[serde(with = "crate::serde_duration")]
    pub duration: Duration,
    /// Lead-in before `start_tick` that lets the scene settle after seeking.
    #[serde(with = "crate::serde_duration")]
    pub start_buffer: Duration,
    /// Smallest tick a seek may target.
    pub min_seek_tick: u32,
    /// Seek attempts per pass before the test is abandoned.
    pub max_seek_attempts: u32,
    /// Console output meaning the replay file was not found.
    pub missing_sequence_pattern: String,
    /// Pause after capture and after disconnecting.
    #[serde(with = "crate::serde_duration")]
    pub settle_delay: Duration,
    /// Pause after the play command before checking the load state.
    #[serde(with = "crate::serde_duration")]
    pub load_grace: Duration,
    /// Extension of capture artifacts.
    pub artifact_extension: String,
    /// Command templates.
    pub commands: PassCommands,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            sequence: String::new(),
            start_tick: 66 * 2 + 20,
            tick_interval: 1.0 / 66.6,
            duration: Duration::from_secs(20),
            start_buffer: Duration::from_secs(2),
            min_seek_tick: 15,
            max_seek_attempts: 5,
            missing_sequence_pattern: r"(?i)couldn't open|failed to open|not found".to_owned(),
            settle_delay: Duration::from_millis(500),
            load_grace: Duration::from_secs(1),
            artifact_extension: "csv".to_owned(),
            commands: PassCommands::default(),
        }
    }
}

impl PassConfig {
    /// Tick the seek aims for: `start_tick` minus the buffer in ticks.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidConfiguration`] if the result falls
    /// below `min_seek_tick`.
    pub fn seek_tick(&self) -> ControlResult<u32> {
        let buffer_ticks = self.start_buffer.as_secs_f64() / self.tick_interval;
        let seek = (f64::from(self.start_tick) - buffer_ticks).round();
        if !seek.is_finite() || seek < f64::from(self.min_seek_tick) {
            let minimum = (f64::from(self.min_seek_tick) + buffer_ticks).ceil();
            return Err(ControlError::invalid_configuration(format!(
                "start tick {} leaves no room for a {:?} buffer; minimum start tick is {minimum}",
                self.start_tick, self.start_buffer
            )));
        }
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "seek is finite, rounded and no larger than start_tick"
        )]
        let tick = seek as u32;
        Ok(tick)
    }

    /// How long the capture tool records.
    #[must_use]
    pub fn capture_window(&self) -> Duration {
        self.duration.saturating_add(self.start_buffer)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty sequence, a non-positive tick interval,
    /// a zero duration, no seek attempts, or an unreachable seek tick.
    pub fn validate(&self) -> ControlResult<()> {
        if self.sequence.trim().is_empty() {
            return Err(ControlError::invalid_configuration("sequence must be set"));
        }
        if !(self.tick_interval.is_finite() && self.tick_interval > 0.0) {
            return Err(ControlError::invalid_configuration(
                "tick_interval must be a positive number",
            ));
        }
        if self.duration.is_zero() {
            return Err(ControlError::invalid_configuration("duration must be non-zero"));
        }
        if self.max_seek_attempts == 0 {
            return Err(ControlError::invalid_configuration(
                "max_seek_attempts must be at least 1",
            ));
        }
        self.seek_tick().map(|_| ())
    }
}

/// Collaborators one pass works with.
#[derive(Debug)]
pub struct PassContext<'a> {
    /// Console channel.
    pub rcon: &'a RconSession,
    /// Tailer on the game's console log.
    pub tailer: &'a mut LogTailer,
    /// Watchdog for the running game.
    pub watchdog: &'a ProcessWatchdog,
    /// Frame-time recorder.
    pub capture: &'a dyn CaptureTool,
    /// Where this test's artifacts land.
    pub output_dir: &'a Path,
}

/// Runs passes.
#[derive(Debug, Clone)]
pub struct PassController {
    config: PassConfig,
    seeker: TickSeeker,
    locator: ArtifactLocator,
    missing_sequence: Regex,
}

impl PassController {
    /// Build a controller.
    ///
    /// # Errors
    ///
    /// Returns an error if either configuration is invalid.
    pub fn new(config: PassConfig, seek: SeekConfig) -> ControlResult<Self> {
        config.validate()?;
        let seeker = TickSeeker::new(seek)?;
        let missing_sequence = Regex::new(&config.missing_sequence_pattern).map_err(|err| {
            ControlError::invalid_configuration(format!("missing sequence pattern: {err}"))
        })?;
        let locator = ArtifactLocator::new(config.artifact_extension.clone());
        Ok(Self {
            config,
            seeker,
            locator,
            missing_sequence,
        })
    }

    /// Pass settings.
    #[must_use]
    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Run every console delta of a test.
    ///
    /// # Errors
    ///
    /// Propagates [`RconSession::execute`] errors.
    pub async fn apply_changes(&self, rcon: &RconSession, changes: &Changes) -> ControlResult<()> {
        for cvar in &changes.cvars {
            rcon.execute(cvar).await?;
        }
        Ok(())
    }

    /// Run the next pass of `test` and return it. The caller records it.
    ///
    /// Console deltas are applied first when `test` has no passes yet.
    ///
    /// # Errors
    ///
    /// - [`ControlError::SequenceNotFound`] if the replay is missing.
    /// - [`ControlError::SeekRetriesExhausted`] if seeking keeps failing.
    /// - [`ControlError::CaptureArtifactMissing`] or
    ///   [`ControlError::CaptureArtifactDuplicate`] if no new artifact appeared.
    /// - [`ControlError::ProcessLost`] whenever the fatal signal is raised.
    pub async fn run_pass(&self, ctx: &mut PassContext<'_>, test: &BenchTest) -> ControlResult<Pass> {
        let index = test.next_index();
        info!(test = test.name(), pass = index, "Starting pass");

        if test.is_fresh() {
            self.apply_changes(ctx.rcon, test.changes()).await?;
        }

        self.restart_playback(ctx).await?;
        let report = self.seek_with_restarts(ctx).await?;
        ctx.rcon.execute(&self.config.commands.resume).await?;

        self.capture(ctx).await?;

        sleep_or_fatal(ctx.rcon.fatal(), self.config.settle_delay).await?;
        ctx.rcon.execute(&self.config.commands.disconnect).await?;
        sleep_or_fatal(ctx.rcon.fatal(), self.config.settle_delay).await?;

        let artifact = self.locator.locate(ctx.output_dir, &test.collected())?;
        info!(test = test.name(), pass = index, "Finished pass");
        Ok(Pass {
            index,
            artifact,
            observed_tick: report.observed_tick,
        })
    }

    /// Start the replay from the top and wait for it to load.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::SequenceNotFound`] if the console says so.
    pub async fn restart_playback(&self, ctx: &mut PassContext<'_>) -> ControlResult<()> {
        ctx.tailer.skip_to_end()?;

        let command = self
            .config
            .commands
            .play
            .replace("{sequence}", &self.config.sequence);
        let response = ctx.rcon.execute(&command).await?;
        if self.missing_sequence.is_match(&response) {
            error!(sequence = %self.config.sequence, %response, "Replay not found");
            return Err(ControlError::SequenceNotFound {
                name: self.config.sequence.clone(),
                response,
            });
        }

        sleep_or_fatal(ctx.rcon.fatal(), self.config.load_grace).await?;
        ctx.watchdog.wait_for_running().await?;
        ctx.rcon.execute(&self.config.commands.resume).await?;
        Ok(())
    }

    async fn seek_with_restarts(&self, ctx: &mut PassContext<'_>) -> ControlResult<SeekReport> {
        let target = SeekTarget {
            tick: self.config.seek_tick()?,
            tick_interval: self.config.tick_interval,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match self.seeker.seek(ctx.rcon, ctx.tailer, target).await {
                Ok(report) => return Ok(report),
                Err(err) if err.class() == ErrorClass::SeekRecoverable => err,
                Err(err) => return Err(err),
            };

            if attempt >= self.config.max_seek_attempts {
                error!(attempts = attempt, error = %err, "Seek keeps failing");
                return Err(ControlError::SeekRetriesExhausted { attempts: attempt });
            }
            warn!(attempt, error = %err, "Seek failed, restarting playback");
            ctx.rcon.execute(&self.config.commands.disconnect).await?;
            self.restart_playback(ctx).await?;
        }
    }

    async fn capture(&self, ctx: &PassContext<'_>) -> ControlResult<()> {
        let window = self.config.capture_window();
        let capture_ctx = CaptureContext {
            pid: ctx.watchdog.pid(),
            duration: window,
            output_dir: ctx.output_dir.to_path_buf(),
            timestamp: chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
        };

        let _mute = ctx.watchdog.mute();
        ctx.capture.arm(&capture_ctx).await?;
        sleep_or_fatal(ctx.rcon.fatal(), window).await?;
        ctx.capture.disarm().await
    }
}

async fn sleep_or_fatal(fatal: &FatalSignal, duration: Duration) -> ControlResult<()> {
    tokio::select! {
        biased;
        cause = fatal.raised() => Err(cause.into()),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
