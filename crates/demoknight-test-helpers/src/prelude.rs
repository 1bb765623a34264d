//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use demoknight_test_helpers::prelude::*;
//! ```

pub use crate::capture::FakeCapture;
pub use crate::game::{FakeGame, FakeGameConfig, FakeTransport, END_LINE, read_log, tick_line};
pub use crate::probe::ScriptedProbe;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
