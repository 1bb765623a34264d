//! The process-wide fatal signal.
//!
//! Raised once by the watchdog when the target process dies on its own, and
//! observed by every blocking wait in the control loop. Raising is idempotent
//! and the signal stays raised for the lifetime of the process generation it
//! was created for; a relaunch gets a fresh signal.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{ControlError, ControlResult};

/// Why the control loop has to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCause {
    /// The watched process exited without an intentional shutdown.
    ProcessLost {
        /// OS process id.
        pid: u32,
    },
}

impl From<FatalCause> for ControlError {
    fn from(cause: FatalCause) -> Self {
        match cause {
            FatalCause::ProcessLost { pid } => Self::ProcessLost { pid },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    cause: OnceLock<FatalCause>,
    token: CancellationToken,
}

/// Shared one-shot fatal flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct FatalSignal {
    inner: Arc<Inner>,
}

impl FatalSignal {
    /// Create an unraised signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` only for the call that actually raised it.
    pub fn raise(&self, cause: FatalCause) -> bool {
        let first = self.inner.cause.set(cause).is_ok();
        if first {
            error!(?cause, "Fatal signal raised");
            self.inner.token.cancel();
        }
        first
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.cause.get().is_some()
    }

    /// The cause, once raised.
    #[must_use]
    pub fn cause(&self) -> Option<FatalCause> {
        self.inner.cause.get().copied()
    }

    /// Fail fast if the signal is up.
    ///
    /// # Errors
    ///
    /// Returns the error matching the raised [`FatalCause`].
    pub fn check(&self) -> ControlResult<()> {
        match self.cause() {
            Some(cause) => Err(cause.into()),
            None => Ok(()),
        }
    }

    /// Resolve once the signal is raised. Use inside `tokio::select!`.
    pub async fn raised(&self) -> FatalCause {
        self.inner.token.cancelled().await;
        // The cause is set before the token is cancelled.
        self.cause().unwrap_or(FatalCause::ProcessLost { pid: 0 })
    }
}
