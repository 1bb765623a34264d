//! Prelude for demoknight-core.
//!
//! ```rust
//! use demoknight_core::prelude::*;
//!
//! let fatal = FatalSignal::new();
//! assert!(!fatal.is_raised());
//! ```

pub use crate::capture::{
    ArtifactLocator, CaptureContext, CaptureTool, CommandCapture, MangoHudConfig,
};
#[cfg(target_os = "linux")]
pub use crate::capture::MangoHudControl;
pub use crate::error::{ControlError, ControlResult, ErrorClass};
pub use crate::guard::FileGuard;
pub use crate::lifecycle::{LifecycleClassifier, LifecycleState, Observation};
pub use crate::pass::{PassCommands, PassConfig, PassContext, PassController};
pub use crate::plan::{BASELINE_NAME, BenchTest, Changes, FileSwap, Pass};
pub use crate::process::{
    LaunchSpec, ProcessHandle, ProcessProbe, ProcessStatus, SysinfoProbe,
};
pub use crate::rcon::{RconConfig, RconEndpoint, RconSession, RconTransport, SourceRconTransport};
pub use crate::seeker::{
    LogEvent, SeekCommands, SeekConfig, SeekReport, SeekTarget, TickPatterns, TickSeeker,
};
pub use crate::signal::{FatalCause, FatalSignal};
pub use crate::tailer::{LogCursor, LogTailer, TailerConfig};
pub use crate::watchdog::{MuteGuard, ProcessWatchdog, WatchdogConfig, WatchdogConfigBuilder};
