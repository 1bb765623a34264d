//! Error types for the benchmark control loop.
//!
//! Every failure carries an [`ErrorClass`] so callers can decide whether to
//! retry in place, restart playback, or abandon the current test.

use std::path::PathBuf;
use std::time::Duration;

use demoknight_rcon::RconError;
use thiserror::Error;

/// How far up the stack an error has to travel before someone can act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Absorbed by a retry loop; never escapes the component that saw it.
    Transient,
    /// The seek failed but the process is fine. Reset playback and seek again.
    SeekRecoverable,
    /// The current test cannot continue on this process instance.
    TestFatal,
    /// Bad input. Retrying will not help.
    Configuration,
}

/// Errors raised by the control loop.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The watched process exited without being asked to.
    #[error("Process {pid} exited unexpectedly")]
    ProcessLost {
        /// OS process id of the lost process.
        pid: u32,
    },

    /// The opt-in RCON retry budget ran out.
    #[error("RCON command '{command}' still failing after {attempts} attempts over {elapsed:?}")]
    RetryBudgetExhausted {
        /// Command that never succeeded.
        command: String,
        /// Attempts made.
        attempts: u32,
        /// Time spent retrying.
        elapsed: Duration,
    },

    /// A command no retry can fix, such as one that exceeds the packet size.
    #[error("RCON command rejected: {0}")]
    CommandRejected(#[source] RconError),

    /// Playback went past the seek target.
    #[error("Seek overshot: wanted tick {target}, saw {observed}")]
    SeekOvershoot {
        /// Tick the seek was aiming for (plus tolerance when checked at the end).
        target: u32,
        /// Tick read from the log.
        observed: u32,
    },

    /// No tick progress showed up in the log for too long.
    #[error("Seek stalled at tick {last_tick:?}: no progress for {silence:?}")]
    SeekStalled {
        /// Most recent tick seen, if any.
        last_tick: Option<u32>,
        /// How long the log stayed quiet.
        silence: Duration,
    },

    /// The log announced the end of the sequence before the target was reached.
    #[error("Sequence ended during seek (last tick {last_tick:?})")]
    SeekSequenceEnded {
        /// Most recent tick seen, if any.
        last_tick: Option<u32>,
    },

    /// Seeking kept failing after playback restarts.
    #[error("Seek failed {attempts} times in a row")]
    SeekRetriesExhausted {
        /// Number of seek attempts.
        attempts: u32,
    },

    /// The game could not open the replay.
    #[error("Sequence '{name}' not found: {response}")]
    SequenceNotFound {
        /// Name passed to the play command.
        name: String,
        /// Console output that revealed the problem.
        response: String,
    },

    /// No capture artifact turned up after a pass.
    #[error("No capture artifact found in {dir}")]
    CaptureArtifactMissing {
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// The newest artifact was already collected, so this pass wrote nothing.
    #[error("Capture artifact {path} is not new")]
    CaptureArtifactDuplicate {
        /// The stale artifact.
        path: PathBuf,
    },

    /// The external capture tool failed.
    #[error("Capture tool failed: {0}")]
    CaptureTool(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The console log could not be read.
    #[error("Console log unavailable: {0}")]
    LogUnavailable(String),

    /// Filesystem or process-spawn failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create a capture tool error.
    #[must_use]
    pub fn capture_tool(reason: impl Into<String>) -> Self {
        Self::CaptureTool(reason.into())
    }

    /// Create a log unavailable error.
    #[must_use]
    pub fn log_unavailable(reason: impl Into<String>) -> Self {
        Self::LogUnavailable(reason.into())
    }

    /// Classify the error for the retry ladder.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::SeekOvershoot { .. } | Self::SeekStalled { .. } | Self::SeekSequenceEnded { .. } => {
                ErrorClass::SeekRecoverable
            }
            Self::InvalidConfiguration(_) | Self::CommandRejected(_) => ErrorClass::Configuration,
            Self::ProcessLost { .. }
            | Self::RetryBudgetExhausted { .. }
            | Self::SeekRetriesExhausted { .. }
            | Self::SequenceNotFound { .. }
            | Self::CaptureArtifactMissing { .. }
            | Self::CaptureArtifactDuplicate { .. }
            | Self::CaptureTool(_)
            | Self::LogUnavailable(_)
            | Self::Io(_) => ErrorClass::TestFatal,
        }
    }

    /// Whether the current test should be restarted on a fresh process.
    #[must_use]
    pub fn is_test_fatal(&self) -> bool {
        self.class() == ErrorClass::TestFatal
    }
}

/// A specialized `Result` type for control-loop operations.
pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_failures_are_recoverable() {
        let errors = [
            ControlError::SeekOvershoot {
                target: 10,
                observed: 20,
            },
            ControlError::SeekStalled {
                last_tick: None,
                silence: Duration::from_secs(5),
            },
            ControlError::SeekSequenceEnded { last_tick: Some(3) },
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::SeekRecoverable, "{err}");
        }
    }

    #[test]
    fn exhausted_seek_retries_abort_the_test() {
        let err = ControlError::SeekRetriesExhausted { attempts: 5 };
        assert!(err.is_test_fatal());
    }

    #[test]
    fn process_loss_aborts_the_test() {
        let err = ControlError::ProcessLost { pid: 42 };
        assert!(err.is_test_fatal());
        assert_eq!(err.to_string(), "Process 42 exited unexpectedly");
    }

    #[test]
    fn configuration_errors_are_not_test_fatal() {
        let err = ControlError::invalid_configuration("start tick too early");
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_test_fatal());
    }
}
