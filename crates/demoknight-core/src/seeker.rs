//! Converge replay playback onto a target tick.
//!
//! `demo_gototick` is fast but overshoots by an amount that grows with the
//! distance; a plain timescale is exact but slow. The seeker halves the
//! remaining distance each round: far away it jumps to the midpoint, close
//! in it slows playback so that the next midpoint arrives after about two
//! seconds of wall time. The last few ticks are crawled at a tiny timescale.
//!
//! Progress is read from the console log (`demo_debug 1` echoes every tick),
//! never from the console responses.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::rcon::RconSession;
use crate::tailer::LogTailer;

/// Default pattern for tick echo lines. The first capture group is the tick.
pub const DEFAULT_TICK_PATTERN: &str = r"Demo message, tick (\d+)";
/// Default pattern announcing that playback reached the end of the replay.
pub const DEFAULT_END_PATTERN: &str = r"(?i)demo playback (?:finished|stopped|ended)";

/// Console commands the seeker issues. `{factor}` and `{tick}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekCommands {
    /// Set the playback speed.
    pub timescale: String,
    /// Jump to a tick.
    pub goto_tick: String,
    /// Enable per-tick echo in the log.
    pub enable_tick_echo: String,
}

impl Default for SeekCommands {
    fn default() -> Self {
        Self {
            timescale: "demo_timescale {factor}".to_owned(),
            goto_tick: "demo_gototick {tick} 0 0".to_owned(),
            enable_tick_echo: "demo_debug 1".to_owned(),
        }
    }
}

impl SeekCommands {
    fn timescale(&self, factor: f64) -> String {
        self.timescale.replace("{factor}", &format_factor(factor))
    }

    fn goto_tick(&self, tick: u32) -> String {
        self.goto_tick.replace("{tick}", &tick.to_string())
    }
}

/// Seek tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekConfig {
    /// Timescale used while approaching the first checkpoint.
    ///
    /// Default: 24.
    pub initial_factor: f64,
    /// Candidate factors above this jump instead of speeding up.
    ///
    /// Default: 12.
    pub jump_threshold: f64,
    /// Timescale for the final crawl.
    ///
    /// Default: 0.05.
    pub fine_factor: f64,
    /// Remaining distance, in ticks, at which halving stops.
    ///
    /// Default: 10.
    pub final_window: u32,
    /// How far past the target the final tick may land.
    ///
    /// Default: 2.
    pub overshoot_tolerance: u32,
    /// Log silence that counts as a stalled seek.
    ///
    /// Default: 5s.
    #[serde(with = "crate::serde_duration")]
    pub stall_timeout: Duration,
    /// Tick echo pattern; capture group 1 is the tick number.
    pub tick_pattern: String,
    /// End-of-replay pattern.
    pub end_pattern: String,
    /// Command templates.
    pub commands: SeekCommands,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            initial_factor: 24.0,
            jump_threshold: 12.0,
            fine_factor: 0.05,
            final_window: 10,
            overshoot_tolerance: 2,
            stall_timeout: Duration::from_secs(5),
            tick_pattern: DEFAULT_TICK_PATTERN.to_owned(),
            end_pattern: DEFAULT_END_PATTERN.to_owned(),
            commands: SeekCommands::default(),
        }
    }
}

impl SeekConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for non-positive factors or a zero stall timeout.
    pub fn validate(&self) -> ControlResult<()> {
        for (name, value) in [
            ("initial_factor", self.initial_factor),
            ("jump_threshold", self.jump_threshold),
            ("fine_factor", self.fine_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ControlError::invalid_configuration(format!(
                    "{name} must be a positive number"
                )));
            }
        }
        if self.stall_timeout.is_zero() {
            return Err(ControlError::invalid_configuration(
                "stall_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Where to seek to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekTarget {
    /// Tick to land on.
    pub tick: u32,
    /// Replay seconds per tick.
    pub tick_interval: f64,
}

/// Outcome of a successful seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekReport {
    /// Tick read from the log when the seek finished.
    pub observed_tick: u32,
    /// Halving rounds taken before the final crawl.
    pub rounds: u32,
}

/// Something interesting on one log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Playback echoed this tick.
    Tick(u32),
    /// Playback reached the end of the replay.
    SequenceEnded,
}

/// Compiled log patterns.
#[derive(Debug, Clone)]
pub struct TickPatterns {
    tick: Regex,
    end: Regex,
}

impl TickPatterns {
    /// Compile the patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidConfiguration`] if a pattern does not
    /// compile or the tick pattern has no capture group.
    pub fn new(tick: &str, end: &str) -> ControlResult<Self> {
        let tick = Regex::new(tick)
            .map_err(|err| ControlError::invalid_configuration(format!("tick pattern: {err}")))?;
        if tick.captures_len() < 2 {
            return Err(ControlError::invalid_configuration(
                "tick pattern needs a capture group for the tick number",
            ));
        }
        let end = Regex::new(end)
            .map_err(|err| ControlError::invalid_configuration(format!("end pattern: {err}")))?;
        Ok(Self { tick, end })
    }

    /// Classify one log line.
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<LogEvent> {
        if let Some(tick) = self
            .tick
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return Some(LogEvent::Tick(tick));
        }
        self.end.is_match(line).then_some(LogEvent::SequenceEnded)
    }
}

/// Next midpoint between `end` and `target`.
#[must_use]
pub fn checkpoint(end: u32, target: u32) -> u32 {
    end.saturating_add(target.saturating_sub(end) / 2)
}

/// Timescale at which the remaining distance past `checkpoint` plays in about two seconds.
#[must_use]
pub fn candidate_factor(tick_interval: f64, checkpoint: u32, target: u32) -> f64 {
    tick_interval * f64::from(target.saturating_sub(checkpoint)) / 2.0
}

/// Drives playback to a target tick.
#[derive(Debug, Clone)]
pub struct TickSeeker {
    config: SeekConfig,
    patterns: TickPatterns,
}

impl TickSeeker {
    /// Build a seeker.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SeekConfig) -> ControlResult<Self> {
        config.validate()?;
        let patterns = TickPatterns::new(&config.tick_pattern, &config.end_pattern)?;
        Ok(Self { config, patterns })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SeekConfig {
        &self.config
    }

    /// Compiled patterns.
    #[must_use]
    pub fn patterns(&self) -> &TickPatterns {
        &self.patterns
    }

    /// Bring playback to `target.tick`.
    ///
    /// Playback must already be running. Leaves the timescale at the fine
    /// factor; the caller restores normal speed.
    ///
    /// # Errors
    ///
    /// - [`ControlError::SeekOvershoot`] if a halving round passes the target
    ///   or the final tick lands beyond the tolerance.
    /// - [`ControlError::SeekStalled`] if the log stays quiet too long.
    /// - [`ControlError::SeekSequenceEnded`] if the replay ends first.
    /// - Anything [`RconSession::execute`] returns.
    pub async fn seek(
        &self,
        rcon: &RconSession,
        tailer: &mut LogTailer,
        target: SeekTarget,
    ) -> ControlResult<SeekReport> {
        if !(target.tick_interval.is_finite() && target.tick_interval > 0.0) {
            return Err(ControlError::invalid_configuration(
                "tick interval must be a positive number",
            ));
        }
        let goal = target.tick;
        let commands = &self.config.commands;
        info!(target = goal, "Seeking");

        rcon.execute(&commands.enable_tick_echo).await?;
        rcon.execute(&commands.timescale(self.config.initial_factor))
            .await?;

        let mut watch = TickWatch::new();
        let mut end: u32 = 0;
        let mut rounds: u32 = 0;

        while goal.saturating_sub(end) > self.config.final_window {
            rounds = rounds.saturating_add(1);
            let next = checkpoint(end, goal);
            let factor = candidate_factor(target.tick_interval, next, goal);

            if factor > self.config.jump_threshold {
                debug!(round = rounds, checkpoint = next, "Jumping");
                rcon.execute(&commands.goto_tick(next)).await?;
            } else {
                let factor = factor.max(self.config.fine_factor);
                debug!(round = rounds, checkpoint = next, factor, "Slowing down");
                rcon.execute(&commands.timescale(factor)).await?;
            }

            end = self
                .wait_for_tick(rcon, tailer, &mut watch, next, goal)
                .await?;
        }

        rcon.execute(&commands.timescale(self.config.fine_factor))
            .await?;
        let ceiling = goal.saturating_add(self.config.overshoot_tolerance);
        let observed = self
            .wait_for_tick(rcon, tailer, &mut watch, goal, ceiling)
            .await?;

        info!(target = goal, observed, rounds, "Seek complete");
        Ok(SeekReport {
            observed_tick: observed,
            rounds,
        })
    }

    /// Read the log until a tick at or past `goal` shows up.
    ///
    /// Returns the newest tick seen in the batch that reached the goal.
    async fn wait_for_tick(
        &self,
        rcon: &RconSession,
        tailer: &mut LogTailer,
        watch: &mut TickWatch,
        goal: u32,
        ceiling: u32,
    ) -> ControlResult<u32> {
        loop {
            rcon.fatal().check()?;
            let lines = tailer.next_lines().await?;

            let mut reached = false;
            for line in &lines {
                match self.patterns.parse(line) {
                    Some(LogEvent::Tick(tick)) => {
                        watch.saw(tick);
                        if tick > ceiling {
                            warn!(target = ceiling, observed = tick, "Seek overshoot");
                            return Err(ControlError::SeekOvershoot {
                                target: ceiling,
                                observed: tick,
                            });
                        }
                        reached |= tick >= goal;
                    }
                    Some(LogEvent::SequenceEnded) => {
                        return Err(ControlError::SeekSequenceEnded {
                            last_tick: watch.last_tick,
                        });
                    }
                    None => {}
                }
            }

            if reached && let Some(tick) = watch.last_tick {
                return Ok(tick);
            }

            let silence = watch.silence();
            if silence >= self.config.stall_timeout {
                warn!(last_tick = ?watch.last_tick, ?silence, "Seek stalled");
                return Err(ControlError::SeekStalled {
                    last_tick: watch.last_tick,
                    silence,
                });
            }
        }
    }
}

/// Tracks the last echoed tick and when the log last said anything useful.
#[derive(Debug)]
struct TickWatch {
    last_tick: Option<u32>,
    last_progress: Instant,
}

impl TickWatch {
    fn new() -> Self {
        Self {
            last_tick: None,
            last_progress: Instant::now(),
        }
    }

    fn saw(&mut self, tick: u32) {
        self.last_tick = Some(tick);
        self.last_progress = Instant::now();
    }

    fn silence(&self) -> Duration {
        self.last_progress.elapsed()
    }
}

fn format_factor(factor: f64) -> String {
    let text = format!("{factor:.4}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}
