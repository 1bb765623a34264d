//! Background process watchdog.
//!
//! Samples the target at a fixed cadence, publishes its [`LifecycleState`],
//! and raises the [`FatalSignal`] once if the process dies on its own.
//! Sampling can be muted around latency-sensitive windows.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::lifecycle::{LifecycleClassifier, LifecycleState, SharedLifecycle};
use crate::process::ProcessProbe;
use crate::signal::{FatalCause, FatalSignal};

/// Watchdog timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Time between samples.
    ///
    /// Default: 500ms.
    #[serde(with = "crate::serde_duration")]
    pub sample_interval: Duration,
    /// How long after the last I/O wait the process still counts as loading.
    ///
    /// Default: 5s.
    #[serde(with = "crate::serde_duration")]
    pub loading_decay: Duration,
    /// How long the process must stay dead before it is declared gone.
    ///
    /// Default: 5s.
    #[serde(with = "crate::serde_duration")]
    pub exit_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            loading_decay: Duration::from_secs(5),
            exit_grace: Duration::from_secs(5),
        }
    }
}

impl WatchdogConfig {
    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample interval is zero or longer than the
    /// grace window.
    pub fn validate(&self) -> ControlResult<()> {
        if self.sample_interval.is_zero() {
            return Err(ControlError::invalid_configuration(
                "sample_interval must be non-zero",
            ));
        }
        if self.sample_interval > self.exit_grace {
            return Err(ControlError::invalid_configuration(
                "sample_interval must not exceed exit_grace",
            ));
        }
        Ok(())
    }
}

/// Builder for [`WatchdogConfig`].
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Set the sample interval.
    #[must_use]
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set the loading decay window.
    #[must_use]
    pub fn loading_decay(mut self, decay: Duration) -> Self {
        self.config.loading_decay = decay;
        self
    }

    /// Set the exit grace window.
    #[must_use]
    pub fn exit_grace(mut self, grace: Duration) -> Self {
        self.config.exit_grace = grace;
        self
    }

    /// Build and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> ControlResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug)]
struct Shared {
    pid: u32,
    state: SharedLifecycle,
    muted: AtomicBool,
    shutdown_requested: AtomicBool,
    fatal: FatalSignal,
}

/// Handle to a running watchdog task. Dropping it stops sampling.
#[derive(Debug)]
pub struct ProcessWatchdog {
    shared: Arc<Shared>,
    config: WatchdogConfig,
    task: Option<JoinHandle<()>>,
}

impl ProcessWatchdog {
    /// Start watching `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn spawn(
        pid: u32,
        probe: Arc<dyn ProcessProbe>,
        config: WatchdogConfig,
        fatal: FatalSignal,
    ) -> ControlResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            pid,
            state: SharedLifecycle::new(),
            muted: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            fatal,
        });
        let task = tokio::spawn(run(Arc::clone(&shared), probe, config));
        info!(pid, "Watchdog started");
        Ok(Self {
            shared,
            config,
            task: Some(task),
        })
    }

    /// Pid being watched.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Most recently published state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.state.load()
    }

    /// The fatal signal this watchdog raises.
    #[must_use]
    pub fn fatal(&self) -> &FatalSignal {
        &self.shared.fatal
    }

    /// Block until the process is `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ProcessLost`] if the fatal signal is raised,
    /// or if the process is already gone after an intentional shutdown.
    pub async fn wait_for_running(&self) -> ControlResult<()> {
        loop {
            self.shared.fatal.check()?;
            match self.state() {
                LifecycleState::Running => return Ok(()),
                LifecycleState::NotRunning => {
                    return Err(ControlError::ProcessLost {
                        pid: self.shared.pid,
                    });
                }
                LifecycleState::Unknown | LifecycleState::Loading => {}
            }
            tokio::select! {
                cause = self.shared.fatal.raised() => return Err(cause.into()),
                () = tokio::time::sleep(self.config.sample_interval) => {}
            }
        }
    }

    /// Suspend sampling until the returned guard is dropped.
    #[must_use = "sampling resumes as soon as the guard is dropped"]
    pub fn mute(&self) -> MuteGuard<'_> {
        self.shared.muted.store(true, Ordering::Release);
        debug!("Watchdog muted");
        MuteGuard { shared: &self.shared }
    }

    /// Whether sampling is currently muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    /// Mark the coming exit as intentional so it does not raise the fatal signal.
    pub fn request_shutdown(&self) {
        self.shared.shutdown_requested.store(true, Ordering::Release);
    }

    /// Wait for the task to end on its own, which happens once the process is
    /// gone. Cancelling this future leaves the watchdog running.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(err) = task.await
                && !err.is_cancelled()
            {
                warn!(error = %err, "Watchdog task ended abnormally");
            }
            self.task = None;
        }
    }

    /// Stop sampling and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(err) = task.await
                && !err.is_cancelled()
            {
                warn!(error = %err, "Watchdog task ended abnormally");
            }
        }
    }
}

impl Drop for ProcessWatchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Restores sampling on drop.
#[derive(Debug)]
pub struct MuteGuard<'a> {
    shared: &'a Shared,
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        self.shared.muted.store(false, Ordering::Release);
        debug!("Watchdog unmuted");
    }
}

async fn run(shared: Arc<Shared>, probe: Arc<dyn ProcessProbe>, config: WatchdogConfig) {
    let mut classifier =
        LifecycleClassifier::new(config.loading_decay, config.exit_grace, Instant::now().into_std());
    let mut ticker = tokio::time::interval(config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.muted.load(Ordering::Acquire) {
            continue;
        }

        let sample = probe.sample(shared.pid);
        let observation = classifier.observe(sample, Instant::now().into_std());
        shared.state.store(observation.state);
        debug!(pid = shared.pid, ?sample, state = %observation.state, "Watchdog sample");
        if observation.changed() {
            info!(
                pid = shared.pid,
                from = %observation.previous,
                to = %observation.state,
                "Lifecycle transition"
            );
        }

        if observation.died() {
            if shared.shutdown_requested.load(Ordering::Acquire) {
                info!(pid = shared.pid, "Process exited after shutdown request");
            } else {
                warn!(pid = shared.pid, "Process exited unexpectedly");
                shared.fatal.raise(FatalCause::ProcessLost { pid: shared.pid });
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessStatus;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct GoneProbe;

    impl ProcessProbe for GoneProbe {
        fn sample(&self, _pid: u32) -> Option<ProcessStatus> {
            None
        }

        fn kill(&self, _pid: u32) -> bool {
            false
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_sample_is_logged_at_debug() -> Result<(), Box<dyn std::error::Error>> {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let shared = Arc::new(Shared {
            pid: 7,
            state: SharedLifecycle::new(),
            muted: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(true),
            fatal: FatalSignal::new(),
        });
        run(Arc::clone(&shared), Arc::new(GoneProbe), WatchdogConfig::default()).await;

        let text = String::from_utf8(logs.0.lock().clone())?;
        let samples: Vec<&str> = text.lines().filter(|line| line.contains("Watchdog sample")).collect();
        assert!(samples.len() > 1, "{text}");
        assert!(samples.iter().all(|line| line.contains("DEBUG") && line.contains("pid=7")), "{text}");
        assert!(samples.iter().any(|line| line.contains("sample=None")), "{text}");
        assert!(!shared.fatal.is_raised());
        Ok(())
    }

    #[test]
    fn default_timings() -> Result<(), ControlError> {
        let config = WatchdogConfig::default();
        assert_eq!(config.sample_interval, Duration::from_millis(500));
        assert_eq!(config.loading_decay, Duration::from_secs(5));
        assert_eq!(config.exit_grace, Duration::from_secs(5));
        config.validate()
    }

    #[test]
    fn builder_rejects_zero_interval() {
        let result = WatchdogConfig::builder()
            .sample_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ControlError::InvalidConfiguration(_))));
    }
}
