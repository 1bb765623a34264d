//! Launch-option assembly and game process discovery.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use demoknight_core::process::LaunchSpec;
use demoknight_core::rcon::RconEndpoint;
use tracing::{debug, info};

use crate::error::CliError;

/// Console log the game is told to write.
pub const LOG_FILE_NAME: &str = "demoknight.log";

/// Options every launch needs: console logging, and an RCON listener bound to
/// `endpoint` whose settings the game cannot change afterwards.
pub fn required_launch_options(endpoint: &RconEndpoint) -> Vec<String> {
    let port = endpoint.port.to_string();
    [
        "+con_logfile",
        LOG_FILE_NAME,
        "-usercon",
        "-condebug",
        "-conclearlog",
        "+ip",
        "0.0.0.0",
        "+alias",
        "ip",
        "+sv_rcon_whitelist_address",
        "127.0.0.1",
        "+rcon_password",
        endpoint.password.as_str(),
        "+alias",
        "rcon_password",
        "+hostport",
        port.as_str(),
        "+alias",
        "hostport",
        "+net_start",
    ]
    .iter()
    .map(|option| (*option).to_owned())
    .collect()
}

/// How the game gets started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Run the game binary.
    Direct,
    /// `steam -applaunch <gameid>`; the game appears as a separate process.
    Steam { gameid: u32, steam: PathBuf },
}

impl LaunchTarget {
    /// Steam when a game id is given, otherwise the binary itself.
    pub fn resolve(gameid: Option<u32>, steam_path: Option<&Path>) -> Result<Self, CliError> {
        match gameid {
            None | Some(0) => Ok(Self::Direct),
            Some(gameid) => Ok(Self::Steam {
                gameid,
                steam: steam_binary(steam_path)?,
            }),
        }
    }
}

#[cfg(windows)]
fn steam_binary(steam_path: Option<&Path>) -> Result<PathBuf, CliError> {
    steam_path
        .map(|dir| dir.join("steam.exe"))
        .ok_or_else(|| CliError::ValidationError("--steam-path is required to launch through Steam on Windows".to_owned()))
}

/// Outside Windows the `steam` launcher on `PATH` is used.
#[cfg(not(windows))]
fn steam_binary(_steam_path: Option<&Path>) -> Result<PathBuf, CliError> {
    Ok(PathBuf::from("steam"))
}

/// Everything needed to start one test's game process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub target: LaunchTarget,
    pub game_path: PathBuf,
    /// Global options followed by the test's own.
    pub launch_options: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchPlan {
    /// Process spec with the required options appended last.
    pub fn spec(&self, endpoint: &RconEndpoint) -> LaunchSpec {
        let mut args = Vec::new();
        let program = match &self.target {
            LaunchTarget::Direct => self.game_path.clone(),
            LaunchTarget::Steam { gameid, steam } => {
                args.push("-applaunch".to_owned());
                args.push(gameid.to_string());
                steam.clone()
            }
        };
        args.extend(split_options(&self.launch_options));
        args.extend(required_launch_options(endpoint));

        LaunchSpec {
            program,
            args,
            env: self.env.clone(),
            current_dir: self.game_path.parent().map(Path::to_path_buf),
        }
    }
}

/// Launch options may be given as one string each or already split.
pub fn split_options(options: &[String]) -> Vec<String> {
    options
        .iter()
        .flat_map(|option| option.split_whitespace())
        .map(str::to_owned)
        .collect()
}

/// Console logs the game may have left behind: `<game dir>/*/demoknight.log`.
pub fn find_logs(game_path: &Path) -> Result<Vec<PathBuf>, CliError> {
    let Some(game_dir) = game_path.parent() else {
        return Ok(Vec::new());
    };
    let entries = match std::fs::read_dir(game_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(CliError::GameNotFound(game_dir.display().to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    let mut logs = Vec::new();
    for entry in entries {
        let candidate = entry?.path().join(LOG_FILE_NAME);
        if candidate.is_file() {
            logs.push(candidate);
        }
    }
    logs.sort();
    Ok(logs)
}

/// Remove the log a previous run left, so the new one starts empty.
///
/// More than one candidate is an error: there is no telling which one the
/// game will write to.
pub fn clear_stale_log(game_path: &Path) -> Result<Option<PathBuf>, CliError> {
    let mut logs = find_logs(game_path)?;
    if logs.len() > 1 {
        return Err(CliError::InvalidConfiguration(format!(
            "more than one {LOG_FILE_NAME} found under {}",
            game_path.parent().unwrap_or(game_path).display()
        )));
    }
    let Some(log) = logs.pop() else {
        return Ok(None);
    };
    info!(path = %log.display(), "Removing stale console log");
    match std::fs::remove_file(&log) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(Some(log)),
    }
}

/// Poll `find` until it yields a pid.
pub async fn discover_pid<F>(mut find: F, timeout: Duration, interval: Duration) -> Result<u32, CliError>
where
    F: FnMut() -> Option<u32>,
{
    let started = tokio::time::Instant::now();
    loop {
        if let Some(pid) = find() {
            debug!(pid, "Found game process");
            return Ok(pid);
        }
        if started.elapsed() >= timeout {
            return Err(CliError::GameNotFound(format!(
                "no game process appeared within {timeout:?}"
            )));
        }
        debug!("Waiting for game process to launch");
        tokio::time::sleep(interval).await;
    }
}
