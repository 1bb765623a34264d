//! Lifecycle state of the target process and the classifier that derives it.
//!
//! The classifier is pure: it takes one status sample plus a timestamp and
//! returns the new state, so the timing rules can be tested without a clock.
//!
//! ```text
//! UNKNOWN ──sample──► LOADING ◄──io-wait──► RUNNING
//!    │                   │                     │
//!    └──────── dead for >= grace ──────────────┴──► NOT_RUNNING (terminal)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::process::ProcessStatus;

/// Published lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Nothing sampled yet.
    #[default]
    Unknown = 0,
    /// The process is gone. Terminal.
    NotRunning = 1,
    /// The process is alive but recently blocked on I/O.
    Loading = 2,
    /// The process has been busy for a full decay window.
    Running = 3,
}

impl LifecycleState {
    /// Convert from the raw atomic value.
    #[must_use]
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::NotRunning),
            2 => Some(Self::Loading),
            3 => Some(Self::Running),
            _ => None,
        }
    }

    /// Convert to the raw atomic value.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Whether no further transitions can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::NotRunning
    }

    /// Name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::NotRunning => "NOT_RUNNING",
            Self::Loading => "LOADING",
            Self::Running => "RUNNING",
        }
    }
}

impl core::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding the current [`LifecycleState`].
///
/// One writer (the watchdog task), any number of readers.
#[derive(Debug, Default)]
pub struct SharedLifecycle {
    raw: AtomicU8,
}

impl SharedLifecycle {
    /// Create a cell in [`LifecycleState::Unknown`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current state.
    #[must_use]
    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_raw(self.raw.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Publish a new state.
    pub fn store(&self, state: LifecycleState) {
        self.raw.store(state.to_raw(), Ordering::Release);
    }
}

/// Result of feeding one sample to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// State after the sample.
    pub state: LifecycleState,
    /// State before the sample.
    pub previous: LifecycleState,
}

impl Observation {
    /// Whether this sample changed the state.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.state != self.previous
    }

    /// Whether this sample moved the process into `NOT_RUNNING`.
    #[must_use]
    pub fn died(&self) -> bool {
        self.changed() && self.state.is_terminal()
    }
}

/// Turns raw status samples into lifecycle transitions.
#[derive(Debug, Clone)]
pub struct LifecycleClassifier {
    loading_decay: Duration,
    exit_grace: Duration,
    state: LifecycleState,
    last_io_wait: Option<Instant>,
    dead_since: Option<Instant>,
}

impl LifecycleClassifier {
    /// Create a classifier that treats `started` as the last I/O wait.
    ///
    /// A freshly launched process is assumed to be loading until it has
    /// been busy for a full decay window.
    #[must_use]
    pub fn new(loading_decay: Duration, exit_grace: Duration, started: Instant) -> Self {
        Self {
            loading_decay,
            exit_grace,
            state: LifecycleState::Unknown,
            last_io_wait: Some(started),
            dead_since: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Feed one sample. `None` means the process was not found.
    pub fn observe(&mut self, sample: Option<ProcessStatus>, now: Instant) -> Observation {
        let previous = self.state;
        if previous.is_terminal() {
            return Observation {
                state: previous,
                previous,
            };
        }

        self.state = match sample.filter(|status| status.is_alive()) {
            None => {
                let dead_since = *self.dead_since.get_or_insert(now);
                if now.saturating_duration_since(dead_since) >= self.exit_grace {
                    LifecycleState::NotRunning
                } else {
                    // Inside the grace window: keep whatever we had.
                    previous
                }
            }
            Some(status) => {
                self.dead_since = None;
                if status.is_io_wait() {
                    self.last_io_wait = Some(now);
                    LifecycleState::Loading
                } else if self
                    .last_io_wait
                    .is_some_and(|seen| now.saturating_duration_since(seen) < self.loading_decay)
                {
                    LifecycleState::Loading
                } else {
                    LifecycleState::Running
                }
            }
        };

        Observation {
            state: self.state,
            previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(500);
    const FIVE: Duration = Duration::from_secs(5);

    fn feed(
        classifier: &mut LifecycleClassifier,
        start: Instant,
        samples: &[Option<ProcessStatus>],
    ) -> Vec<LifecycleState> {
        let mut now = start;
        samples
            .iter()
            .map(|sample| {
                now += STEP;
                classifier.observe(*sample, now).state
            })
            .collect()
    }

    #[test]
    fn raw_round_trip_covers_every_state() {
        for state in [
            LifecycleState::Unknown,
            LifecycleState::NotRunning,
            LifecycleState::Loading,
            LifecycleState::Running,
        ] {
            assert_eq!(LifecycleState::from_raw(state.to_raw()), Some(state));
        }
        assert_eq!(LifecycleState::from_raw(9), None);
    }

    #[test]
    fn loading_decays_after_five_seconds() {
        let start = Instant::now();
        // Sample well after launch so only the explicit I/O wait counts.
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let mut now = start + Duration::from_secs(60);

        assert_eq!(
            classifier.observe(Some(ProcessStatus::DiskSleep), now).state,
            LifecycleState::Loading
        );
        let mut states = Vec::new();
        for _ in 0..11 {
            now += STEP;
            states.push(classifier.observe(Some(ProcessStatus::Running), now).state);
        }

        // 0.5s .. 4.5s after the I/O wait are still inside the window.
        assert!(states.iter().take(9).all(|s| *s == LifecycleState::Loading));
        assert_eq!(states.get(9), Some(&LifecycleState::Running));
        assert_eq!(states.get(10), Some(&LifecycleState::Running));
    }

    #[test]
    fn fresh_process_counts_as_loading() {
        let start = Instant::now();
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let states = feed(&mut classifier, start, &[Some(ProcessStatus::Running); 10]);
        assert_eq!(states.first(), Some(&LifecycleState::Loading));
        assert_eq!(states.last(), Some(&LifecycleState::Running));
    }

    #[test]
    fn ten_dead_samples_are_tolerated() {
        let start = Instant::now();
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let start = start + Duration::from_secs(60);
        classifier.observe(Some(ProcessStatus::Running), start);

        let states = feed(&mut classifier, start, &[None; 10]);
        assert!(states.iter().all(|s| *s == LifecycleState::Running));
    }

    #[test]
    fn eleventh_dead_sample_is_terminal() {
        let start = Instant::now();
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let start = start + Duration::from_secs(60);
        classifier.observe(Some(ProcessStatus::Running), start);

        let mut now = start;
        let mut deaths = 0;
        for _ in 0..11 {
            now += STEP;
            if classifier.observe(None, now).died() {
                deaths += 1;
            }
        }
        assert_eq!(classifier.state(), LifecycleState::NotRunning);
        assert_eq!(deaths, 1);

        // Terminal: a live sample afterwards does not resurrect it.
        now += STEP;
        let obs = classifier.observe(Some(ProcessStatus::Running), now);
        assert_eq!(obs.state, LifecycleState::NotRunning);
        assert!(!obs.changed());
    }

    #[test]
    fn a_live_sample_resets_the_grace_window() {
        let start = Instant::now();
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let start = start + Duration::from_secs(60);
        classifier.observe(Some(ProcessStatus::Running), start);

        let mut samples = vec![None; 9];
        samples.push(Some(ProcessStatus::Running));
        samples.extend([None; 9]);
        let states = feed(&mut classifier, start, &samples);
        assert!(states.iter().all(|s| !s.is_terminal()));
    }

    #[test]
    fn zombie_is_dead() {
        let start = Instant::now();
        let mut classifier = LifecycleClassifier::new(FIVE, FIVE, start);
        let states = feed(&mut classifier, start, &[Some(ProcessStatus::Zombie); 11]);
        assert_eq!(states.last(), Some(&LifecycleState::NotRunning));
    }

    #[test]
    fn shared_cell_publishes_latest_state() {
        let cell = SharedLifecycle::new();
        assert_eq!(cell.load(), LifecycleState::Unknown);
        cell.store(LifecycleState::Running);
        assert_eq!(cell.load(), LifecycleState::Running);
    }
}
