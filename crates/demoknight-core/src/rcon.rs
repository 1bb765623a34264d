//! Retrying RCON session.
//!
//! The game's console server refuses connections while loading, stalls
//! under heavy timescale, and drops connections on level changes. The
//! session hides all of that: every transport failure is retried on a
//! fresh connection after a short delay until the command goes through or
//! the fatal signal is raised.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use demoknight_rcon::{RconClient, RconError, RconResult};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::signal::FatalSignal;

/// Lowest port considered for the console server.
pub const PORT_RANGE_START: u16 = 10240;
/// Highest port considered for the console server.
pub const PORT_RANGE_END: u16 = 65534;
const PORT_ATTEMPTS: usize = 10;
const PASSWORD_LEN_MIN: usize = 20;
const PASSWORD_LEN_MAX: usize = 30;

/// Where the console server listens and how to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct RconEndpoint {
    /// Host address.
    pub host: IpAddr,
    /// TCP port.
    pub port: u16,
    /// Shared secret.
    pub password: String,
}

impl fmt::Debug for RconEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RconEndpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: IpAddr, port: u16, password: impl Into<String>) -> Self {
        Self {
            host,
            port,
            password: password.into(),
        }
    }

    /// Pick a free loopback port and a random password.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidConfiguration`] if no free port was
    /// found after several random picks.
    pub fn generate() -> ControlResult<Self> {
        let mut rng = rand::rng();
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let port = (0..PORT_ATTEMPTS)
            .map(|_| rng.random_range(PORT_RANGE_START..=PORT_RANGE_END))
            .find(|port| TcpListener::bind((host, *port)).is_ok())
            .ok_or_else(|| {
                ControlError::invalid_configuration(format!(
                    "no free RCON port after {PORT_ATTEMPTS} attempts"
                ))
            })?;

        let len = rng.random_range(PASSWORD_LEN_MIN..=PASSWORD_LEN_MAX);
        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();

        debug!(port, "Generated RCON endpoint");
        Ok(Self::new(host, port, password))
    }

    /// Socket address of the server.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Runs one command over one connection.
#[async_trait]
pub trait RconTransport: Send + Sync + fmt::Debug {
    /// Connect, authenticate, run `command`, and return the response text.
    async fn run(&self, endpoint: &RconEndpoint, command: &str, timeout: Duration) -> RconResult<String>;
}

/// [`RconTransport`] speaking the Source RCON protocol over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRconTransport;

#[async_trait]
impl RconTransport for SourceRconTransport {
    async fn run(&self, endpoint: &RconEndpoint, command: &str, timeout: Duration) -> RconResult<String> {
        let mut client = RconClient::connect(endpoint.socket_addr(), &endpoint.password, timeout).await?;
        let response = client.run(command).await?;
        if let Err(err) = client.close().await {
            debug!(error = %err, "RCON close failed");
        }
        Ok(response)
    }
}

/// Retry policy for [`RconSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    /// Pause between attempts.
    ///
    /// Default: 1s.
    #[serde(with = "crate::serde_duration")]
    pub retry_delay: Duration,
    /// Per-attempt response timeout. Generous because high timescales slow
    /// the console down.
    ///
    /// Default: 30s.
    #[serde(with = "crate::serde_duration")]
    pub response_timeout: Duration,
    /// Give up after this long. `None` retries until the fatal signal.
    ///
    /// Default: 300s.
    #[serde(with = "crate::serde_duration::option")]
    pub max_retry_duration: Option<Duration>,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            response_timeout: Duration::from_secs(30),
            max_retry_duration: Some(Duration::from_secs(300)),
        }
    }
}

impl RconConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the response timeout is zero.
    pub fn validate(&self) -> ControlResult<()> {
        if self.response_timeout.is_zero() {
            return Err(ControlError::invalid_configuration(
                "response_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Command channel to the target with retry semantics.
#[derive(Debug, Clone)]
pub struct RconSession {
    endpoint: RconEndpoint,
    transport: Arc<dyn RconTransport>,
    config: RconConfig,
    fatal: FatalSignal,
}

impl RconSession {
    /// Create a session.
    #[must_use]
    pub fn new(
        endpoint: RconEndpoint,
        transport: Arc<dyn RconTransport>,
        config: RconConfig,
        fatal: FatalSignal,
    ) -> Self {
        Self {
            endpoint,
            transport,
            config,
            fatal,
        }
    }

    /// Endpoint commands are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &RconEndpoint {
        &self.endpoint
    }

    /// Fatal signal observed by every attempt.
    #[must_use]
    pub fn fatal(&self) -> &FatalSignal {
        &self.fatal
    }

    /// Run `command`, retrying transport failures.
    ///
    /// An empty response counts as success: many commands print nothing.
    ///
    /// # Errors
    ///
    /// - [`ControlError::ProcessLost`] once the fatal signal is raised,
    ///   checked before every attempt and while waiting.
    /// - [`ControlError::RetryBudgetExhausted`] when `max_retry_duration` is
    ///   set and has elapsed.
    /// - [`ControlError::CommandRejected`] for commands no retry can fix.
    pub async fn execute(&self, command: &str) -> ControlResult<String> {
        info!(command, "Issued rcon command");
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            self.fatal.check()?;
            attempts = attempts.saturating_add(1);

            let outcome = tokio::select! {
                biased;
                cause = self.fatal.raised() => return Err(cause.into()),
                outcome = self.transport.run(&self.endpoint, command, self.config.response_timeout) => outcome,
            };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) if !err.is_transient() => return Err(ControlError::CommandRejected(err)),
                Err(err) => err,
            };

            let elapsed = started.elapsed();
            if self
                .config
                .max_retry_duration
                .is_some_and(|budget| elapsed >= budget)
            {
                warn!(command, attempts, ?elapsed, "Giving up on rcon command");
                return Err(ControlError::RetryBudgetExhausted {
                    command: command.to_owned(),
                    attempts,
                    elapsed,
                });
            }

            log_retry(&err, self.config.retry_delay);
            tokio::select! {
                biased;
                cause = self.fatal.raised() => return Err(cause.into()),
                () = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }
}

fn log_retry(err: &RconError, delay: Duration) {
    let reason = match err {
        RconError::Timeout(_) => "Rcon command timed out",
        RconError::ConnectionRefused => "Rcon connection refused",
        RconError::ConnectionReset => "Rcon connection reset",
        RconError::EmptyResponse => "Game sent empty response",
        _ => "Rcon command failed",
    };
    info!(kind = err.kind(), error = %err, ?delay, "{reason}, retrying");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_endpoint_is_in_range() -> Result<(), Box<dyn std::error::Error>> {
        let endpoint = RconEndpoint::generate()?;
        assert!((PORT_RANGE_START..=PORT_RANGE_END).contains(&endpoint.port));
        assert!((PASSWORD_LEN_MIN..=PASSWORD_LEN_MAX).contains(&endpoint.password.len()));
        assert!(endpoint.password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(endpoint.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        Ok(())
    }

    #[test]
    fn debug_output_hides_password() {
        let endpoint = RconEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 27015, "sekrit");
        let rendered = format!("{endpoint:?}");
        assert!(!rendered.contains("sekrit"));
        assert!(rendered.contains("27015"));
    }

    #[test]
    fn default_policy() {
        let config = RconConfig::default();
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retry_duration, Some(Duration::from_secs(300)));
    }
}
