//! Waiting for a freshly started game to finish its start-up work.
//!
//! A game can report RUNNING while shader caches, overlays and mods are
//! still churning. Console round-trip latency settles once that is over.

use std::collections::VecDeque;
use std::time::Duration;

use demoknight_core::{ControlResult, RconSession};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Probe tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeConfig {
    /// Pause between echoes.
    pub interval: Duration,
    /// Give up waiting after this many echoes.
    pub max_samples: usize,
    /// Samples the latest latency is compared against.
    pub window: usize,
    /// Allowed relative distance between the latest latency and the window mean.
    pub tolerance: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_samples: 200,
            window: 50,
            tolerance: 0.01,
        }
    }
}

/// Rolling latency window.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    config: ProbeConfig,
    recent: VecDeque<Duration>,
    taken: usize,
}

impl LatencyWindow {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            recent: VecDeque::with_capacity(config.window),
            taken: 0,
        }
    }

    /// Add a sample and report whether latency has settled.
    ///
    /// Settled means more than `window` samples were taken and the latest is
    /// within `tolerance` of the mean of the last `window`.
    pub fn record(&mut self, latency: Duration) -> bool {
        self.taken = self.taken.saturating_add(1);
        if self.recent.len() == self.config.window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);

        if self.taken <= self.config.window {
            return false;
        }
        let Some(mean) = self.mean() else {
            return false;
        };
        let latest = latency.as_secs_f64();
        (mean - latest).abs() <= latest * self.config.tolerance
    }

    /// Samples recorded so far.
    pub fn taken(&self) -> usize {
        self.taken
    }

    fn mean(&self) -> Option<f64> {
        let count = u32::try_from(self.recent.len()).ok().filter(|n| *n > 0)?;
        let total: f64 = self.recent.iter().map(Duration::as_secs_f64).sum();
        Some(total / f64::from(count))
    }
}

/// Echo through `rcon` until latency settles or the sample budget runs out.
///
/// Running out of samples is not an error; the game is used as is.
pub async fn wait_until_responsive(rcon: &RconSession, config: ProbeConfig) -> ControlResult<()> {
    let mut window = LatencyWindow::new(config);
    for _ in 0..config.max_samples {
        let started = Instant::now();
        rcon.execute("echo Waiting for responsiveness").await?;
        let latency = started.elapsed();
        debug!(?latency, "Rcon response delay");

        if window.record(latency) {
            info!(samples = window.taken(), "Game is responsive");
            return Ok(());
        }
        tokio::time::sleep(config.interval).await;
    }
    warn!(samples = window.taken(), "Console latency never settled, continuing anyway");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use demoknight_core::FatalSignal;
    use demoknight_core::rcon::{RconConfig, RconEndpoint};
    use demoknight_test_helpers::prelude::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn never_settles_before_the_window_fills() {
        let mut window = LatencyWindow::new(ProbeConfig::default());
        for _ in 0..50 {
            assert!(!window.record(ms(4)));
        }
        assert!(window.record(ms(4)));
        assert_eq!(window.taken(), 51);
    }

    #[test]
    fn spikes_keep_it_unsettled() {
        let mut window = LatencyWindow::new(ProbeConfig::default());
        for _ in 0..60 {
            window.record(ms(4));
        }
        assert!(!window.record(ms(40)), "latest far above the mean");
        assert!(!window.record(ms(4)), "spike still inside the window");
    }

    #[test]
    fn settles_once_the_spike_leaves_the_window() {
        let config = ProbeConfig {
            window: 5,
            ..ProbeConfig::default()
        };
        let mut window = LatencyWindow::new(config);
        let mut settled_at = None;
        for (i, latency) in [300, 200, 100, 4, 4, 4, 4, 4, 4, 4].into_iter().enumerate() {
            if window.record(ms(latency)) {
                settled_at = Some(i);
                break;
            }
        }
        assert_eq!(settled_at, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_game_settles_right_after_the_window() -> TestResult {
        let dir = tempfile::tempdir()?;
        let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
        let endpoint = RconEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 27015, "pw");
        let rcon = RconSession::new(endpoint, game.transport(), RconConfig::default(), FatalSignal::new());

        wait_until_responsive(&rcon, ProbeConfig::default()).await?;
        assert_eq!(game.count("echo Waiting for responsiveness"), 51);
        Ok(())
    }
}
