//! Capture tools that write artifacts without any real recorder.

use std::fs::{File, FileTimes};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use demoknight_core::capture::{CaptureContext, CaptureTool};
use demoknight_core::error::{ControlError, ControlResult};
use parking_lot::Mutex;

/// Writes `frames-<n>.csv` into the output directory on every arm.
///
/// Each artifact gets a modification time one second after the previous
/// one so "newest" is never ambiguous.
#[derive(Debug, Default)]
pub struct FakeCapture {
    armed: AtomicUsize,
    disarmed: AtomicUsize,
    stop_writing_after: Option<usize>,
    fail_arm: bool,
    contexts: Mutex<Vec<CaptureContext>>,
}

impl FakeCapture {
    /// A capture that always writes an artifact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A capture that writes `count` artifacts and then silently stops.
    #[must_use]
    pub fn writing_only(count: usize) -> Self {
        Self {
            stop_writing_after: Some(count),
            ..Self::default()
        }
    }

    /// A capture whose arm always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_arm: true,
            ..Self::default()
        }
    }

    /// Times `arm` was called.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    /// Times `disarm` was called.
    #[must_use]
    pub fn disarmed(&self) -> usize {
        self.disarmed.load(Ordering::SeqCst)
    }

    /// Contexts passed to `arm`.
    #[must_use]
    pub fn contexts(&self) -> Vec<CaptureContext> {
        self.contexts.lock().clone()
    }

    fn write_artifact(dir: &std::path::Path, n: usize) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("frames-{n:03}.csv"));
        let file = File::create(&path)?;
        let offset = Duration::from_secs(u64::try_from(n).unwrap_or(u64::MAX));
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000) + offset;
        file.set_times(FileTimes::new().set_modified(modified))?;
        Ok(path)
    }
}

#[async_trait]
impl CaptureTool for FakeCapture {
    async fn arm(&self, ctx: &CaptureContext) -> ControlResult<()> {
        if self.fail_arm {
            return Err(ControlError::capture_tool("fake recorder refused to start"));
        }
        let n = self.armed.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(ctx.clone());

        if self.stop_writing_after.is_none_or(|limit| n < limit) {
            std::fs::create_dir_all(&ctx.output_dir)?;
            Self::write_artifact(&ctx.output_dir, n.saturating_add(1))?;
        }
        Ok(())
    }

    async fn disarm(&self) -> ControlResult<()> {
        self.disarmed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
