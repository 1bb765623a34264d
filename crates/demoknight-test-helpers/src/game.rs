//! A simulated game.
//!
//! [`FakeGame`] plays a replay on a background task, advancing the tick by
//! `timescale * step / tick_interval` every `step` and echoing each new
//! tick to a console log file the way `demo_debug 1` does. [`FakeTransport`]
//! feeds console commands into it in place of a real RCON connection.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use demoknight_core::rcon::{RconEndpoint, RconTransport};
use demoknight_rcon::{RconError, RconResult};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Line written when playback reaches the end of the replay.
pub const END_LINE: &str = "Demo playback finished (1234 ticks)";

/// Tick echo line as the game prints it.
#[must_use]
pub fn tick_line(tick: u32) -> String {
    format!("Demo message, tick {tick}")
}

/// Behaviour knobs for [`FakeGame`].
#[derive(Debug, Clone)]
pub struct FakeGameConfig {
    /// Replay seconds per tick.
    pub tick_interval: f64,
    /// Simulation step.
    pub step: Duration,
    /// Last tick of the replay; reaching it prints [`END_LINE`].
    pub length: Option<u32>,
    /// Extra ticks added to every `demo_gototick` target.
    pub goto_overshoot: u32,
    /// Stop advancing and echoing entirely.
    pub frozen: bool,
    /// How many `playdemo` commands load a replay that never advances.
    pub stalled_plays: u32,
    /// Replays that exist. Empty means every name exists.
    pub sequences: Vec<String>,
}

impl Default for FakeGameConfig {
    fn default() -> Self {
        Self {
            tick_interval: 0.015,
            step: Duration::from_millis(5),
            length: None,
            goto_overshoot: 0,
            frozen: false,
            stalled_plays: 0,
            sequences: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct GameState {
    config: FakeGameConfig,
    log_path: PathBuf,
    playing: bool,
    stalled: bool,
    tick: f64,
    factor: f64,
    last_echo: Option<u32>,
    commands: Vec<String>,
    failures: VecDeque<RconError>,
}

impl GameState {
    fn echo(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{line}")
    }

    fn echo_tick(&mut self) -> std::io::Result<()> {
        let tick = whole_tick(self.tick);
        if self.last_echo != Some(tick) {
            self.echo(&tick_line(tick))?;
            self.last_echo = Some(tick);
        }
        if let Some(length) = self.config.length
            && tick >= length
        {
            self.playing = false;
            self.echo(END_LINE)?;
        }
        Ok(())
    }

    fn advance(&mut self, step: Duration) -> std::io::Result<()> {
        if !self.playing || self.stalled || self.config.frozen {
            return Ok(());
        }
        self.tick += self.factor * step.as_secs_f64() / self.config.tick_interval;
        self.echo_tick()
    }

    fn handle(&mut self, command: &str) -> String {
        let mut words = command.split_whitespace();
        let Some(name) = words.next() else {
            return String::new();
        };
        let args: Vec<&str> = words.collect();

        match (name, args.first()) {
            ("playdemo", Some(sequence)) => {
                if !self.config.sequences.is_empty()
                    && !self.config.sequences.iter().any(|known| known == sequence)
                {
                    return format!("CDemoFile::Open: couldn't open file {sequence}.dem\n");
                }
                self.playing = true;
                self.stalled = self.config.stalled_plays > 0;
                self.config.stalled_plays = self.config.stalled_plays.saturating_sub(1);
                self.tick = 0.0;
                self.last_echo = None;
                format!("Playing demo from {sequence}.dem\n")
            }
            ("demo_timescale", Some(factor)) => {
                if let Ok(factor) = factor.parse() {
                    self.factor = factor;
                }
                String::new()
            }
            ("demo_gototick", Some(tick)) => {
                if let Ok(tick) = tick.parse::<u32>()
                    && self.playing
                    && !self.stalled
                    && !self.config.frozen
                {
                    self.tick = f64::from(tick.saturating_add(self.config.goto_overshoot));
                    if let Err(err) = self.echo_tick() {
                        warn!(error = %err, "Fake game could not write its console log");
                    }
                }
                String::new()
            }
            ("disconnect", _) => {
                self.playing = false;
                String::new()
            }
            ("echo", _) => format!("{}\n", args.join(" ")),
            _ => String::new(),
        }
    }
}

/// A running simulated game. Dropping it stops the simulation.
#[derive(Debug)]
pub struct FakeGame {
    state: Arc<Mutex<GameState>>,
    task: JoinHandle<()>,
}

impl FakeGame {
    /// Start a game writing its console log to `log_path`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(log_path: impl Into<PathBuf>, config: FakeGameConfig) -> std::io::Result<Self> {
        let log_path = log_path.into();
        OpenOptions::new().create(true).append(true).open(&log_path)?;

        let step = config.step;
        let state = Arc::new(Mutex::new(GameState {
            config,
            log_path,
            playing: false,
            stalled: false,
            tick: 0.0,
            factor: 1.0,
            last_echo: None,
            commands: Vec::new(),
            failures: VecDeque::new(),
        }));

        let task = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(step);
                loop {
                    ticker.tick().await;
                    if let Err(err) = state.lock().advance(step) {
                        warn!(error = %err, "Fake game could not write its console log");
                    }
                }
            })
        };
        Ok(Self { state, task })
    }

    /// Start a game that is already playing the `bench` replay from tick 0.
    pub fn playing(log_path: impl Into<PathBuf>, config: FakeGameConfig) -> std::io::Result<Self> {
        let game = Self::start(log_path, config)?;
        game.state.lock().handle("playdemo bench");
        Ok(game)
    }

    /// Transport that delivers commands to this game.
    #[must_use]
    pub fn transport(&self) -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            state: Arc::clone(&self.state),
        })
    }

    /// Console log path.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.state.lock().log_path.clone()
    }

    /// Every command received so far, split on `;`.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Count received commands starting with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    /// Current playback tick.
    #[must_use]
    pub fn tick(&self) -> u32 {
        whole_tick(self.state.lock().tick)
    }

    /// Fail the next transport calls with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RconError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Change behaviour mid-run, e.g. to stop overshooting after a restart.
    pub fn reconfigure(&self, update: impl FnOnce(&mut FakeGameConfig)) {
        update(&mut self.state.lock().config);
    }

    /// Write a raw line to the console log.
    pub fn echo(&self, line: &str) -> std::io::Result<()> {
        self.state.lock().echo(line)
    }
}

impl Drop for FakeGame {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`RconTransport`] wired straight into a [`FakeGame`].
#[derive(Debug)]
pub struct FakeTransport {
    state: Arc<Mutex<GameState>>,
}

#[async_trait]
impl RconTransport for FakeTransport {
    async fn run(&self, _endpoint: &RconEndpoint, command: &str, _timeout: Duration) -> RconResult<String> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let mut response = String::new();
        for part in command.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            state.commands.push(part.to_owned());
            response.push_str(&state.handle(part));
        }
        Ok(response)
    }
}

/// Whole tick reached by a fractional playback position, saturating at the `u32` range.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "clamped to 0..=u32::MAX and floored first"
)]
fn whole_tick(tick: f64) -> u32 {
    if tick.is_nan() || tick <= 0.0 {
        0
    } else {
        tick.floor().min(f64::from(u32::MAX)) as u32
    }
}

/// Read a console log produced by a [`FakeGame`].
pub fn read_log(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn endpoint() -> RconEndpoint {
        RconEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 27015, "pw")
    }

    #[tokio::test(start_paused = true)]
    async fn playback_echoes_ticks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
        let transport = game.transport();

        transport.run(&endpoint(), "playdemo bench; demo_timescale 1", Duration::from_secs(1)).await?;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(game.tick() >= 9);
        let log = read_log(&game.log_path())?;
        assert!(log.contains(&tick_line(5)));
        assert_eq!(game.commands(), vec!["playdemo bench", "demo_timescale 1"]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_sequence_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = FakeGameConfig {
            sequences: vec!["bench".to_owned()],
            ..FakeGameConfig::default()
        };
        let game = FakeGame::start(dir.path().join("console.log"), config)?;
        let response = game
            .transport()
            .run(&endpoint(), "playdemo nope", Duration::from_secs(1))
            .await?;
        assert!(response.contains("couldn't open"));
        Ok(())
    }

    #[test]
    fn whole_tick_saturates() {
        assert_eq!(whole_tick(41.9), 41);
        assert_eq!(whole_tick(-3.5), 0);
        assert_eq!(whole_tick(f64::NAN), 0);
        assert_eq!(whole_tick(1e12), u32::MAX);
    }

    #[tokio::test]
    async fn log_write_failures_are_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs)?;
        let game = FakeGame::start(logs.join("console.log"), FakeGameConfig::default())?;

        game.echo("hello")?;
        assert_eq!(read_log(&game.log_path())?, vec!["hello"]);

        std::fs::remove_dir_all(&logs)?;
        assert!(matches!(game.echo("lost"), Err(_)));
        Ok(())
    }

    #[tokio::test]
    async fn injected_failures_come_first() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
        game.fail_next([RconError::ConnectionRefused]);
        let transport = game.transport();

        let first = transport.run(&endpoint(), "echo hi", Duration::from_secs(1)).await;
        assert!(matches!(first, Err(RconError::ConnectionRefused)));
        assert_eq!(transport.run(&endpoint(), "echo hi", Duration::from_secs(1)).await?, "hi\n");
        Ok(())
    }
}
