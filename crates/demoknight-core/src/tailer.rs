//! Incremental reader for the target's console log.
//!
//! The log is append-only from our point of view, but the game may truncate
//! it (`-conclearlog`) or replace it between runs. The cursor remembers the
//! file identity next to the byte offset and rewinds when either changes.

use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{ControlError, ControlResult};

/// Tailer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// Upper bound on how long [`LogTailer::next_lines`] waits for a change.
    ///
    /// Default: 50ms.
    #[serde(with = "crate::serde_duration")]
    pub poll_interval: Duration,
    /// Skip filesystem notifications and rely on polling alone.
    pub force_polling: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            force_polling: false,
        }
    }
}

/// Identifies one physical file across renames and truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    device: u64,
    inode: u64,
    created: Option<SystemTime>,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            device: meta.dev(),
            inode: meta.ino(),
            created: None,
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            device: 0,
            inode: 0,
            created: meta.created().ok(),
        }
    }
}

/// Read position inside the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    offset: u64,
    identity: Option<FileIdentity>,
}

impl LogCursor {
    /// Byte offset of the first unread byte.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Identity of the file the offset refers to.
    #[must_use]
    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }
}

struct WatchState {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

/// Yields complete new lines appended to a log file.
pub struct LogTailer {
    path: Option<PathBuf>,
    cursor: LogCursor,
    partial: Vec<u8>,
    config: TailerConfig,
    watch: Option<WatchState>,
}

impl std::fmt::Debug for LogTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTailer")
            .field("path", &self.path)
            .field("cursor", &self.cursor)
            .field("pending_bytes", &self.partial.len())
            .field("watching", &self.watch.is_some())
            .finish_non_exhaustive()
    }
}

impl LogTailer {
    /// Create a tailer with no target yet.
    #[must_use]
    pub fn new(config: TailerConfig) -> Self {
        Self {
            path: None,
            cursor: LogCursor::default(),
            partial: Vec::new(),
            config,
            watch: None,
        }
    }

    /// Create a tailer for `path`, reading from the start.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>, config: TailerConfig) -> Self {
        let mut tailer = Self::new(config);
        tailer.path = Some(path.into());
        tailer
    }

    /// Current target, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current read position.
    #[must_use]
    pub fn cursor(&self) -> LogCursor {
        self.cursor
    }

    /// Point at a different file and start from its beginning.
    pub fn retarget(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "Retargeting log tailer");
        self.path = Some(path);
        self.watch = None;
        self.rewind();
    }

    /// Mark everything currently in the file as read.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::LogUnavailable`] if the file exists but its
    /// metadata cannot be read.
    pub fn skip_to_end(&mut self) -> ControlResult<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.partial.clear();
        match std::fs::metadata(&path) {
            Ok(meta) => {
                self.cursor = LogCursor {
                    offset: meta.len(),
                    identity: Some(FileIdentity::of(&meta)),
                };
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.cursor = LogCursor::default();
                Ok(())
            }
            Err(err) => Err(unavailable(&path, &err)),
        }
    }

    /// Return the complete lines appended since the last call, without waiting.
    ///
    /// A missing file yields nothing. A trailing line without its newline is
    /// held back until the newline arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::LogUnavailable`] on any read error other than
    /// the file not existing.
    pub fn read_available(&mut self) -> ControlResult<Vec<String>> {
        let Some(path) = self.path.clone() else {
            return Ok(Vec::new());
        };

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if self.cursor.identity.is_some() {
                    debug!(path = %path.display(), "Log disappeared, rewinding");
                    self.rewind();
                }
                return Ok(Vec::new());
            }
            Err(err) => return Err(unavailable(&path, &err)),
        };

        let meta = file.metadata().map_err(|err| unavailable(&path, &err))?;
        let identity = FileIdentity::of(&meta);
        let replaced = self.cursor.identity.is_some_and(|known| known != identity);
        if replaced || meta.len() < self.cursor.offset {
            debug!(path = %path.display(), replaced, "Log rotated or truncated, rewinding");
            self.rewind();
        }
        self.cursor.identity = Some(identity);

        if meta.len() == self.cursor.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.cursor.offset))
            .map_err(|err| unavailable(&path, &err))?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk)
            .map_err(|err| unavailable(&path, &err))?;
        let read = u64::try_from(chunk.len()).unwrap_or(u64::MAX);
        self.cursor.offset = self.cursor.offset.saturating_add(read);
        self.partial.extend_from_slice(&chunk);

        Ok(self.take_complete_lines())
    }

    /// Return new lines, waiting up to one poll interval if there are none yet.
    ///
    /// May return an empty batch; callers loop and apply their own deadlines.
    ///
    /// # Errors
    ///
    /// See [`read_available`](Self::read_available).
    pub async fn next_lines(&mut self) -> ControlResult<Vec<String>> {
        let lines = self.read_available()?;
        if !lines.is_empty() {
            return Ok(lines);
        }

        self.ensure_watch();
        match self.watch.as_mut() {
            Some(watch) => {
                if let Ok(Some(Err(err))) =
                    tokio::time::timeout(self.config.poll_interval, watch.events.recv()).await
                {
                    debug!(error = %err, "Log watcher error");
                }
                while watch.events.try_recv().is_ok() {}
            }
            None => tokio::time::sleep(self.config.poll_interval).await,
        }

        self.read_available()
    }

    fn rewind(&mut self) {
        self.cursor = LogCursor::default();
        self.partial.clear();
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        complete
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                String::from_utf8_lossy(line)
                    .trim_end_matches('\r')
                    .to_owned()
            })
            .collect()
    }

    fn ensure_watch(&mut self) {
        if self.config.force_polling || self.watch.is_some() {
            return;
        }
        let Some(dir) = self.path.as_deref().and_then(Path::parent) else {
            return;
        };
        if !dir.is_dir() {
            return;
        }

        let (sender, events) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |result| {
            if sender.send(result).is_err() {
                trace!("Log watcher receiver dropped");
            }
        })
        .and_then(|mut watcher| {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                self.watch = Some(WatchState {
                    _watcher: watcher,
                    events,
                });
            }
            Err(err) => {
                debug!(error = %err, "Falling back to polling the log");
                self.config.force_polling = true;
            }
        }
    }
}

fn unavailable(path: &Path, err: &std::io::Error) -> ControlError {
    ControlError::log_unavailable(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn polling() -> TailerConfig {
        TailerConfig {
            poll_interval: Duration::from_millis(5),
            force_polling: true,
        }
    }

    fn append(path: &Path, text: &str) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(text.as_bytes())
    }

    #[test]
    fn missing_file_yields_nothing() -> TestResult {
        let dir = tempfile::tempdir()?;
        let mut tailer = LogTailer::with_path(dir.path().join("console.log"), polling());
        assert!(tailer.read_available()?.is_empty());
        assert_eq!(tailer.cursor().offset(), 0);
        Ok(())
    }

    #[test]
    fn partial_line_is_held_until_newline() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.log");
        let mut tailer = LogTailer::with_path(&path, polling());

        append(&path, "first\nsec")?;
        assert_eq!(tailer.read_available()?, vec!["first"]);

        append(&path, "ond\r\n")?;
        assert_eq!(tailer.read_available()?, vec!["second"]);
        assert!(tailer.read_available()?.is_empty());
        Ok(())
    }

    #[test]
    fn truncation_rewinds_to_start() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.log");
        let mut tailer = LogTailer::with_path(&path, polling());

        append(&path, "one\ntwo\nthree\n")?;
        assert_eq!(tailer.read_available()?.len(), 3);

        std::fs::write(&path, "fresh\n")?;
        assert_eq!(tailer.read_available()?, vec!["fresh"]);
        Ok(())
    }

    #[test]
    fn replaced_file_rewinds_to_start() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.log");
        let mut tailer = LogTailer::with_path(&path, polling());

        append(&path, "old line that is fairly long\n")?;
        assert_eq!(tailer.read_available()?.len(), 1);

        // Same length or longer, but a different file.
        let replacement = dir.path().join("next.log");
        std::fs::write(&replacement, "new line that is even longer than before\n")?;
        std::fs::rename(&replacement, &path)?;

        assert_eq!(
            tailer.read_available()?,
            vec!["new line that is even longer than before"]
        );
        Ok(())
    }

    #[test]
    fn skip_to_end_ignores_existing_lines() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.log");
        append(&path, "stale\n")?;

        let mut tailer = LogTailer::with_path(&path, polling());
        tailer.skip_to_end()?;
        append(&path, "fresh\n")?;
        assert_eq!(tailer.read_available()?, vec!["fresh"]);
        Ok(())
    }

    #[test]
    fn retarget_reads_new_file_from_start() -> TestResult {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("a.log");
        let second = dir.path().join("b.log");
        append(&first, "a1\n")?;
        append(&second, "b1\nb2\n")?;

        let mut tailer = LogTailer::with_path(&first, polling());
        assert_eq!(tailer.read_available()?, vec!["a1"]);

        tailer.retarget(&second);
        assert_eq!(tailer.read_available()?, vec!["b1", "b2"]);
        Ok(())
    }

    #[tokio::test]
    async fn next_lines_waits_for_appends() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.log");
        let mut tailer = LogTailer::with_path(&path, TailerConfig::default());

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                append(&path, "hello\n")
            })
        };

        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while seen.is_empty() && tokio::time::Instant::now() < deadline {
            seen = tailer.next_lines().await?;
        }
        writer.await??;
        assert_eq!(seen, vec!["hello"]);
        Ok(())
    }
}
