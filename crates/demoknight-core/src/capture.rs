//! Frame-time capture tools and artifact collection.
//!
//! The control loop only needs two verbs from a recorder, arm and disarm.
//! What it leaves behind is found afterwards by [`ArtifactLocator`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::guard::FileGuard;

/// Everything a recorder may need to know about the pass it is recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureContext {
    /// Target process.
    pub pid: u32,
    /// How long to record.
    pub duration: Duration,
    /// Directory the artifact should land in.
    pub output_dir: PathBuf,
    /// Wall-clock stamp usable in file names.
    pub timestamp: String,
}

/// An external frame-time recorder.
#[async_trait]
pub trait CaptureTool: Send + Sync + fmt::Debug {
    /// Start recording.
    async fn arm(&self, ctx: &CaptureContext) -> ControlResult<()>;

    /// Stop recording, or confirm the recorder stopped on its own.
    async fn disarm(&self) -> ControlResult<()>;
}

/// Runs an external command per pass.
///
/// Arguments may contain `{duration}`, `{pid}`, `{output}` and `{timestamp}`.
#[derive(Debug)]
pub struct CommandCapture {
    program: PathBuf,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandCapture {
    /// Create a capture command.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    /// `PresentMon` recording a single process for a fixed time.
    #[must_use]
    pub fn presentmon(program: impl Into<PathBuf>) -> Self {
        let args = [
            "-timed",
            "{duration}",
            "-process_id",
            "{pid}",
            "-output_file",
            "{output}/PresentMon-{timestamp}.csv",
            "-terminate_after_timed",
            "-stop_existing_session",
        ];
        Self::new(program, args.iter().map(|arg| (*arg).to_owned()).collect())
    }

    /// Substitute placeholders for one pass.
    #[must_use]
    pub fn expand(&self, ctx: &CaptureContext) -> Vec<String> {
        let duration = ctx.duration.as_secs_f64().to_string();
        let pid = ctx.pid.to_string();
        let output = ctx.output_dir.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{duration}", &duration)
                    .replace("{pid}", &pid)
                    .replace("{output}", &output)
                    .replace("{timestamp}", &ctx.timestamp)
            })
            .collect()
    }
}

#[async_trait]
impl CaptureTool for CommandCapture {
    async fn arm(&self, ctx: &CaptureContext) -> ControlResult<()> {
        tokio::fs::create_dir_all(&ctx.output_dir).await?;
        let args = self.expand(ctx);
        debug!(program = %self.program.display(), ?args, "Starting capture");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                ControlError::capture_tool(format!("{}: {err}", self.program.display()))
            })?;
        *self.child.lock() = Some(child);
        Ok(())
    }

    async fn disarm(&self) -> ControlResult<()> {
        let Some(mut child) = self.child.lock().take() else {
            return Ok(());
        };
        match child.try_wait()? {
            Some(status) if !status.success() => {
                return Err(ControlError::capture_tool(format!(
                    "{} exited with {status}",
                    self.program.display()
                )));
            }
            Some(_) => {}
            None => debug!("Capture command still finishing up"),
        }
        Ok(())
    }
}

/// `MangoHud` settings rendered into a config file the game picks up at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangoHudConfig {
    /// How long one logging session lasts.
    pub log_duration: Duration,
    /// Where `MangoHud` writes its CSV files.
    pub output_folder: PathBuf,
    /// Name of the control socket.
    pub control_socket: String,
}

impl MangoHudConfig {
    /// Keys every run needs: hide the overlay and log every frame.
    pub const REQUIRED: [&'static str; 2] = ["no_display=1", "log_interval=0"];

    /// Render the config file contents.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = Self::REQUIRED.iter().map(|line| (*line).to_owned()).collect();
        lines.push(format!("control={}", self.control_socket));
        lines.push(format!("log_duration={}", self.log_duration.as_secs_f64()));
        lines.push(format!("output_folder={}", self.output_folder.display()));
        lines.join("\n")
    }

    /// Write the config to `path` for as long as the returned guard lives.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn install(&self, path: &Path) -> ControlResult<FileGuard> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        FileGuard::replace(path, self.render().as_bytes())
    }

    /// Environment that makes the game load `MangoHud` with the file at `path`.
    #[must_use]
    pub fn environment(path: &Path) -> Vec<(String, String)> {
        vec![
            ("GAME_DEBUGGER".to_owned(), "mangohud".to_owned()),
            ("MANGOHUD_CONFIGFILE".to_owned(), path.display().to_string()),
        ]
    }
}

/// Starts `MangoHud` logging through its abstract control socket.
///
/// Logging stops on its own after the configured `log_duration`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct MangoHudControl {
    socket: String,
}

#[cfg(target_os = "linux")]
impl MangoHudControl {
    /// Control the instance listening on `socket`.
    #[must_use]
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    fn send(&self, message: &str) -> std::io::Result<()> {
        use std::io::Write;
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixStream};

        let addr = SocketAddr::from_abstract_name(self.socket.as_bytes())?;
        let mut stream = UnixStream::connect_addr(&addr)?;
        stream.write_all(message.as_bytes())
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl CaptureTool for MangoHudControl {
    async fn arm(&self, ctx: &CaptureContext) -> ControlResult<()> {
        debug!(socket = %self.socket, pid = ctx.pid, "Starting MangoHud logging");
        self.send(":logging=1;")
            .map_err(|err| ControlError::capture_tool(format!("MangoHud control socket: {err}")))
    }

    async fn disarm(&self) -> ControlResult<()> {
        Ok(())
    }
}

/// Finds the artifact a pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    extension: String,
}

impl Default for ArtifactLocator {
    fn default() -> Self {
        Self::new("csv")
    }
}

impl ArtifactLocator {
    /// Look for files with `extension` (without the dot).
    #[must_use]
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// Whether `path` looks like a capture artifact: `*<digit>.<extension>`.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let extension_ok = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
        let ends_in_digit = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.chars().last())
            .is_some_and(|c| c.is_ascii_digit());
        extension_ok && ends_in_digit
    }

    /// Pick the newest artifact in `dir`.
    ///
    /// # Errors
    ///
    /// - [`ControlError::CaptureArtifactMissing`] if nothing matches.
    /// - [`ControlError::CaptureArtifactDuplicate`] if the newest file was
    ///   already collected, or shares its modification time with another
    ///   candidate so that "newest" is ambiguous.
    pub fn locate(&self, dir: &Path, collected: &[PathBuf]) -> ControlResult<PathBuf> {
        let mut candidates = self.candidates(dir)?;
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut ranked = candidates.into_iter();
        let Some((newest, newest_mtime)) = ranked.next() else {
            warn!(dir = %dir.display(), "No capture artifact found");
            return Err(ControlError::CaptureArtifactMissing {
                dir: dir.to_path_buf(),
            });
        };

        let tied = ranked.next().is_some_and(|(_, mtime)| mtime == newest_mtime);
        if tied || collected.contains(&newest) {
            warn!(path = %newest.display(), tied, "Capture artifact is not new");
            return Err(ControlError::CaptureArtifactDuplicate { path: newest });
        }

        info!(path = %newest.display(), "Collected capture artifact");
        Ok(newest)
    }

    fn candidates(&self, dir: &Path) -> ControlResult<Vec<(PathBuf, SystemTime)>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                found.push((path, meta.modified()?));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn touch(dir: &Path, name: &str, age_secs: u64) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        let file = File::create(&path)?;
        let stamp = SystemTime::now()
            .checked_sub(Duration::from_secs(age_secs))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        file.set_modified(stamp)?;
        Ok(path)
    }

    #[test]
    fn newest_matching_file_wins() -> TestResult {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "game_2024-01-01_10-00-01.csv", 30)?;
        let newest = touch(dir.path(), "game_2024-01-01_10-01-07.csv", 10)?;
        touch(dir.path(), "game_summary.csv", 0)?;
        touch(dir.path(), "notes9.txt", 0)?;

        let found = ArtifactLocator::default().locate(dir.path(), &[])?;
        assert_eq!(found, newest);
        Ok(())
    }

    #[test]
    fn empty_directory_is_missing() -> TestResult {
        let dir = tempfile::tempdir()?;
        let result = ArtifactLocator::default().locate(dir.path(), &[]);
        assert!(matches!(result, Err(ControlError::CaptureArtifactMissing { .. })));

        let absent = ArtifactLocator::default().locate(&dir.path().join("nope"), &[]);
        assert!(matches!(absent, Err(ControlError::CaptureArtifactMissing { .. })));
        Ok(())
    }

    #[test]
    fn already_collected_file_is_duplicate() -> TestResult {
        let dir = tempfile::tempdir()?;
        let only = touch(dir.path(), "capture1.csv", 5)?;

        let result = ArtifactLocator::default().locate(dir.path(), std::slice::from_ref(&only));
        assert!(matches!(
            result,
            Err(ControlError::CaptureArtifactDuplicate { path }) if path == only
        ));
        Ok(())
    }

    #[test]
    fn tied_modification_time_is_duplicate() -> TestResult {
        let dir = tempfile::tempdir()?;
        let stamp = SystemTime::now()
            .checked_sub(Duration::from_secs(3))
            .ok_or("clock before epoch")?;
        for name in ["a1.csv", "b2.csv"] {
            File::create(dir.path().join(name))?.set_modified(stamp)?;
        }

        let result = ArtifactLocator::default().locate(dir.path(), &[]);
        assert!(matches!(result, Err(ControlError::CaptureArtifactDuplicate { .. })));
        Ok(())
    }

    #[test]
    fn presentmon_arguments_are_expanded() {
        let capture = CommandCapture::presentmon("presentmon");
        let ctx = CaptureContext {
            pid: 4321,
            duration: Duration::from_secs(22),
            output_dir: PathBuf::from("/tmp/raw/test"),
            timestamp: "2024-01-01_10-00-00".to_owned(),
        };
        let args = capture.expand(&ctx);
        assert_eq!(
            args,
            vec![
                "-timed",
                "22",
                "-process_id",
                "4321",
                "-output_file",
                "/tmp/raw/test/PresentMon-2024-01-01_10-00-00.csv",
                "-terminate_after_timed",
                "-stop_existing_session",
            ]
        );
    }

    #[test]
    fn mangohud_config_renders_required_keys() {
        let config = MangoHudConfig {
            log_duration: Duration::from_secs(22),
            output_folder: PathBuf::from("/tmp/raw/baseline"),
            control_socket: "mangohud".to_owned(),
        };
        let rendered = config.render();
        assert_eq!(
            rendered,
            "no_display=1\nlog_interval=0\ncontrol=mangohud\nlog_duration=22\noutput_folder=/tmp/raw/baseline"
        );
    }

    #[test]
    fn installed_config_is_removed_with_its_guard() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("conf").join("MangoHud.conf");
        let config = MangoHudConfig {
            log_duration: Duration::from_secs(22),
            output_folder: dir.path().join("raw"),
            control_socket: "mangohud".to_owned(),
        };

        let guard = config.install(&path)?;
        assert_eq!(std::fs::read_to_string(&path)?, config.render());
        drop(guard);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_capture_command_is_reported() -> TestResult {
        let dir = tempfile::tempdir()?;
        let capture = CommandCapture::new(dir.path().join("no-such-recorder"), Vec::new());
        let ctx = CaptureContext {
            pid: 1,
            duration: Duration::from_secs(1),
            output_dir: dir.path().join("out"),
            timestamp: String::new(),
        };
        let result = capture.arm(&ctx).await;
        assert!(matches!(result, Err(ControlError::CaptureTool(_))));
        capture.disarm().await?;
        Ok(())
    }
}
