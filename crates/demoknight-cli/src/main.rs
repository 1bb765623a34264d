//! demoknight - comparative frame-time benchmarks
//!
//! Replays a recorded demo in a live game several times per configuration,
//! captures frame times for a fixed window each pass, and writes a manifest
//! of the captures for later analysis.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod error;
mod job;
mod launch;
mod manifest;
mod orchestrator;
mod output;
mod responsiveness;
mod session;
mod settings;
mod suite;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use demoknight_core::rcon::SourceRconTransport;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::job::JobFile;
use crate::manifest::{Manifest, OutputFormat};
use crate::orchestrator::Orchestrator;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "demoknight")]
#[command(about = "Automated comparative frame-time benchmarks driven by demo playback")]
#[command(version)]
#[command(long_about = "
demoknight launches a Source engine game, plays a recorded demo from a chosen
tick and captures frame times with MangoHud (Linux) or PresentMon (Windows).
Each test is a set of console variables, launch options or swapped files and
is measured over several passes against a baseline.

Inline tests are groups of arguments: '+cvar value' sets a console variable,
'_opt' adds the launch option '-opt'. Example:

    demoknight -G ~/tf2/hl2_linux -D demos/bench +mat_picmip 2 _dxlevel 95
")]
pub(crate) struct Cli {
    /// Job file (JSON or YAML) providing defaults for every flag
    #[arg(short = 'j', long)]
    job_file: Option<PathBuf>,

    /// Steam game id; launches through Steam when set and non-zero
    #[arg(short = 'g', long)]
    gameid: Option<u32>,

    /// Path to the game binary
    #[arg(short = 'G', long)]
    game_path: Option<PathBuf>,

    /// Launch options passed to the game, may be repeated
    #[arg(short = 'l', long, action = clap::ArgAction::Append, allow_hyphen_values = true)]
    launch_options: Vec<String>,

    /// Directory raw captures are written under
    #[arg(long)]
    raw_path: Option<PathBuf>,

    /// Steam installation directory (Windows)
    #[arg(short = 'S', long)]
    steam_path: Option<PathBuf>,

    /// Passes per test
    #[arg(short = 'n', long)]
    passes: Option<u32>,

    /// Keep the first pass of every test, which is otherwise a warm-up
    #[arg(short = 'k', long)]
    keep_first_pass: bool,

    /// Demo tick capture starts at
    #[arg(short = 's', long)]
    start_tick: Option<u32>,

    /// Capture length in seconds
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// Demo tickrate
    #[arg(short = 't', long)]
    tickrate: Option<f64>,

    /// Demo to play, relative to the game directory
    #[arg(short = 'D', long)]
    demo_path: Option<String>,

    /// Skip the baseline test
    #[arg(short = 'b', long)]
    no_baseline: bool,

    /// Manifest path without extension
    #[arg(short = 'o', long)]
    output_file: Option<PathBuf>,

    /// Manifest format
    #[arg(short = 'f', long, value_enum)]
    format: Option<OutputFormat>,

    /// PresentMon executable (Windows)
    #[arg(long)]
    presentmon_path: Option<PathBuf>,

    /// Attempts per test before giving up on it
    #[arg(long)]
    max_test_attempts: Option<u32>,

    /// Seconds an RCON command may keep failing before the test restarts; 0 retries forever
    #[arg(long)]
    rcon_retry_budget: Option<f64>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "DEMOKNIGHT_LOG_FORMAT")]
    log_format: LogFormat,

    /// Inline tests, e.g. `+mat_picmip 2 _dxlevel 95`
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    tests: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let (text, json) = match cli.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer().with_target(false)), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("demoknight={log_level},demoknight_core={log_level},demoknight_rcon={log_level}").into()
        }))
        .with(text)
        .with(json)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error_human(&e);
            ExitCode::from(error::exit_code(&e))
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let job = match &cli.job_file {
        Some(path) => JobFile::load(path).with_context(|| format!("loading job file {}", path.display()))?,
        None => JobFile::default(),
    };
    let (settings, mut suite) = Settings::resolve(cli, job)?;

    let names: Vec<String> = suite.iter().map(|planned| planned.test.name().to_owned()).collect();
    let eta = suite::estimate(&settings.pass, settings.passes, suite.len());
    output::print_plan(&names, settings.passes, eta);
    if eta > suite::LONG_RUN {
        output::print_eta_warning(eta);
    }

    std::fs::create_dir_all(&settings.raw_root)
        .with_context(|| format!("creating {}", settings.raw_root.display()))?;

    let orchestrator = Orchestrator::new(settings, Arc::new(SourceRconTransport))?;
    orchestrator.recover_stale_state(&suite)?;

    let outcome = tokio::select! {
        result = orchestrator.run(&mut suite) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            warn!("Interrupted, writing what was collected so far");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    let settings = orchestrator.settings();
    let manifest = Manifest::from_tests(suite.iter().map(|planned| &planned.test), settings.keep_first_pass);
    let written = manifest.write(&settings.output_file, settings.format)?;
    info!(path = %written.display(), "Wrote manifest");
    output::print_manifest_written(&written);

    outcome?;
    output::print_done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["demoknight"])?;
        assert!(cli.job_file.is_none());
        assert!(cli.tests.is_empty());
        assert!(!cli.no_baseline);
        assert!(!cli.keep_first_pass);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.log_format, LogFormat::Text);
        Ok(())
    }

    #[test]
    fn parse_inline_tests_after_flags() -> TestResult {
        let cli = Cli::try_parse_from([
            "demoknight",
            "-G",
            "/games/tf2/hl2_linux",
            "-n",
            "3",
            "+mat_picmip",
            "2",
            "_dxlevel",
            "95",
        ])?;
        assert_eq!(cli.passes, Some(3));
        assert_eq!(cli.tests, vec!["+mat_picmip", "2", "_dxlevel", "95"]);
        Ok(())
    }

    #[test]
    fn parse_repeated_launch_options() -> TestResult {
        let cli = Cli::try_parse_from(["demoknight", "-l", "-novid", "-l", "-game tf", "-vv"])?;
        assert_eq!(cli.launch_options, vec!["-novid", "-game tf"]);
        assert_eq!(cli.verbose, 2);
        Ok(())
    }

    #[test]
    fn parse_format_and_budget() -> TestResult {
        let cli = Cli::try_parse_from(["demoknight", "-f", "json", "--rcon-retry-budget", "45.5"])?;
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(cli.rcon_retry_budget.is_some_and(|budget| (budget - 45.5).abs() < f64::EPSILON));
        Ok(())
    }

    #[test]
    fn unknown_format_is_rejected() {
        let result = Cli::try_parse_from(["demoknight", "-f", "xml"]);
        assert!(matches!(result, Err(_)));
    }
}
