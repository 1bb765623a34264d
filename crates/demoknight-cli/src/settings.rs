//! Resolved run settings: command line over job file over defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use demoknight_core::{PassConfig, SeekConfig};
use tracing::debug;

use crate::Cli;
use crate::error::CliError;
use crate::job::JobFile;
use crate::launch::LaunchTarget;
use crate::manifest::OutputFormat;
use crate::session::SessionConfig;
use crate::suite::{self, PlannedTest};

const DEFAULT_PASSES: u32 = 5;
const DEFAULT_START_TICK: u32 = 66 * 2 + 20;
const DEFAULT_DURATION_SECS: f64 = 20.0;
const DEFAULT_TICKRATE: f64 = 66.6;
const DEFAULT_TEST_ATTEMPTS: u32 = 3;
const COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Settings {
    pub target: LaunchTarget,
    pub game_path: PathBuf,
    pub launch_options: Vec<String>,
    /// Captures land in `<raw_root>/<test name>`.
    pub raw_root: PathBuf,
    /// Manifest path without extension.
    pub output_file: PathBuf,
    pub format: OutputFormat,
    pub passes: u32,
    pub keep_first_pass: bool,
    pub presentmon_path: Option<PathBuf>,
    pub mangohud_config: PathBuf,
    pub max_test_attempts: u32,
    /// Pause after each test so the game fully releases its files.
    pub cooldown: Duration,
    pub pass: PassConfig,
    pub seek: SeekConfig,
    pub session: SessionConfig,
}

impl Settings {
    /// Merge the command line with a job file and build the test list.
    pub fn resolve(cli: &Cli, job: JobFile) -> Result<(Self, Vec<PlannedTest>), CliError> {
        let game_path = cli
            .game_path
            .clone()
            .or(job.game_path)
            .ok_or_else(|| CliError::ValidationError("--game-path is required".to_owned()))?;
        // The game runs from its own directory, so a relative path would not resolve there.
        let game_path = std::path::absolute(&game_path)?;
        let steam_path = cli.steam_path.clone().or(job.steam_path);
        let target = LaunchTarget::resolve(cli.gameid.or(job.gameid), steam_path.as_deref())?;

        let launch_options = if cli.launch_options.is_empty() {
            job.launch_options
        } else {
            cli.launch_options.clone()
        };

        let passes = cli.passes.or(job.passes).unwrap_or(DEFAULT_PASSES);
        if passes == 0 {
            return Err(CliError::ValidationError("--passes must be at least 1".to_owned()));
        }
        let max_test_attempts = cli
            .max_test_attempts
            .or(job.max_test_attempts)
            .unwrap_or(DEFAULT_TEST_ATTEMPTS);
        if max_test_attempts == 0 {
            return Err(CliError::ValidationError(
                "--max-test-attempts must be at least 1".to_owned(),
            ));
        }

        let tickrate = cli.tickrate.or(job.tickrate).unwrap_or(DEFAULT_TICKRATE);
        if !(tickrate.is_finite() && tickrate > 0.0) {
            return Err(CliError::ValidationError(format!(
                "--tickrate must be a positive number, got {tickrate}"
            )));
        }
        let duration = seconds(
            "--duration",
            cli.duration.or(job.duration).unwrap_or(DEFAULT_DURATION_SECS),
        )?;
        let sequence = cli
            .demo_path
            .clone()
            .or(job.demo_path)
            .ok_or_else(|| CliError::ValidationError("--demo-path is required".to_owned()))?;

        let pass = PassConfig {
            sequence,
            start_tick: cli.start_tick.or(job.start_tick).unwrap_or(DEFAULT_START_TICK),
            tick_interval: 1.0 / tickrate,
            duration,
            ..PassConfig::default()
        };
        pass.validate()?;
        let seek = job.seek.unwrap_or_default();
        seek.validate()?;

        let mut rcon = job.rcon.unwrap_or_default();
        if let Some(budget) = cli.rcon_retry_budget.or(job.rcon_retry_budget) {
            rcon.max_retry_duration = if budget <= 0.0 {
                None
            } else {
                Some(seconds("--rcon-retry-budget", budget)?)
            };
        }
        rcon.validate()?;
        let watchdog = job.watchdog.unwrap_or_default();
        watchdog.validate()?;
        let session = SessionConfig {
            watchdog,
            rcon,
            tailer: job.tailer.unwrap_or_default(),
            ..SessionConfig::default()
        };

        let output_file = cli
            .output_file
            .clone()
            .or(job.output_file)
            .unwrap_or_else(default_output_file);
        let raw_path = cli
            .raw_path
            .clone()
            .or(job.raw_path)
            .unwrap_or_else(|| std::env::temp_dir().join("demoknight"));
        let raw_root = raw_path.join(run_name(&output_file));

        let tests = if cli.tests.is_empty() {
            job.tests
        } else {
            suite::parse_inline(&cli.tests)?
        };
        let baseline = !(cli.no_baseline || job.no_baseline.unwrap_or(false));
        let planned = suite::build(tests, baseline, &game_path)?;

        let settings = Self {
            target,
            game_path,
            launch_options,
            raw_root,
            output_file,
            format: cli.format.or(job.format).unwrap_or_default(),
            passes,
            keep_first_pass: cli.keep_first_pass || job.keep_first_pass.unwrap_or(false),
            presentmon_path: cli.presentmon_path.clone().or(job.presentmon_path),
            mangohud_config: std::env::temp_dir().join("demoknight").join("MangoHud.conf"),
            max_test_attempts,
            cooldown: COOLDOWN,
            pass,
            seek,
            session,
        };
        debug!(?settings, "Resolved settings");
        Ok((settings, planned))
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration, CliError> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|duration| !duration.is_zero())
        .ok_or_else(|| CliError::ValidationError(format!("{flag} must be a positive number of seconds, got {value}")))
}

fn default_output_file() -> PathBuf {
    PathBuf::from(format!("summary_{}", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")))
}

/// Directory name for this run's captures, taken from the output file name.
fn run_name(output_file: &Path) -> PathBuf {
    output_file
        .file_name()
        .map_or_else(|| PathBuf::from("summary"), PathBuf::from)
}
