//! Shared test utilities for demoknight.
//!
//! # Modules
//!
//! - [`game`] - A simulated game: console log, replay playback, RCON transport
//! - [`probe`] - Process probes that follow a script
//! - [`capture`] - Capture tools that write artifacts without any real recorder
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! demoknight-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use demoknight_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod capture;
pub mod game;
pub mod prelude;
pub mod probe;
