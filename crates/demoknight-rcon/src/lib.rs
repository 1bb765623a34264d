//! # demoknight-rcon
//!
//! Source engine remote console (RCON) support for demoknight.
//!
//! - [`packet`] is the I/O-free wire codec.
//! - [`client`] is a minimal tokio client: connect, authenticate, run one
//!   command at a time.
//!
//! Retry, backoff and fatal-signal handling are deliberately absent here; the
//! control loop in `demoknight-core` owns that policy and sees this crate only
//! through its transport trait.
//!
//! ```rust,no_run
//! use demoknight_rcon::RconClient;
//! use std::time::Duration;
//!
//! # async fn demo() -> demoknight_rcon::RconResult<()> {
//! let addr = "127.0.0.1:27015".parse().map_err(|e| demoknight_rcon::RconError::protocol(format!("{e}")))?;
//! let mut client = RconClient::connect(addr, "secret", Duration::from_secs(30)).await?;
//! let status = client.run("status").await?;
//! println!("{status}");
//! # Ok(())
//! # }
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

pub mod client;
pub mod error;
pub mod packet;

pub use client::RconClient;
pub use error::{RconError, RconResult};
pub use packet::{MAX_BODY_LEN, PacketKind, RconPacket, decode_packet, encode_packet};
