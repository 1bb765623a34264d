//! # demoknight-core
//!
//! Control loop for scripted-replay benchmarking of a game.
//!
//! A benchmark run drives a live game process through a recorded replay,
//! jumps to a chosen tick, records frame times for a fixed window and
//! repeats. Everything here exists to keep that loop honest when the game
//! is slow, crashes, or ignores commands.
//!
//! ## Architecture
//!
//! - [`signal`] - The one-shot fatal signal shared by every blocking wait
//! - [`rcon`] - Remote console session with a bounded retry policy
//! - [`tailer`] - Incremental console log reader that survives truncation
//! - [`lifecycle`] and [`watchdog`] - Process state derived from OS samples
//! - [`seeker`] - Closed-loop tick seeking on top of RCON and the log
//! - [`pass`] - One measurement pass from restart to collected artifact
//! - [`capture`] - Frame-time recorders and artifact location
//! - [`guard`] - Crash-safe temporary file replacement
//! - [`plan`] - Tests, passes and their configuration deltas
//! - [`process`] - Process probing, launch and kill
//! - [`error`] - Error types and their recovery class
//!
//! ## Example
//!
//! ```rust
//! use demoknight_core::prelude::*;
//!
//! let config = PassConfig {
//!     sequence: "demos/bench".to_owned(),
//!     start_tick: 1000,
//!     tick_interval: 0.015,
//!     ..PassConfig::default()
//! };
//! assert_eq!(config.seek_tick().ok(), Some(867));
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod capture;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod pass;
pub mod plan;
pub mod process;
pub mod rcon;
pub mod seeker;
pub mod serde_duration;
pub mod signal;
pub mod tailer;
pub mod watchdog;

pub mod prelude;

pub use error::{ControlError, ControlResult, ErrorClass};
pub use lifecycle::LifecycleState;
pub use pass::{PassConfig, PassContext, PassController};
pub use rcon::{RconEndpoint, RconSession};
pub use seeker::{SeekConfig, TickSeeker};
pub use signal::{FatalCause, FatalSignal};
pub use tailer::LogTailer;
pub use watchdog::ProcessWatchdog;
