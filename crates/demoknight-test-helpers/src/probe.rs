//! Process probes that follow a script.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use demoknight_core::process::{ProcessProbe, ProcessStatus};
use parking_lot::Mutex;

/// Returns queued samples in order, then a fixed fallback forever.
///
/// `None` entries mean "no such process".
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Option<ProcessStatus>>>,
    then: Mutex<Option<ProcessStatus>>,
    samples: AtomicUsize,
    kills: AtomicUsize,
}

impl ScriptedProbe {
    /// Play `script`, then keep answering `then`.
    #[must_use]
    pub fn new(
        script: impl IntoIterator<Item = Option<ProcessStatus>>,
        then: Option<ProcessStatus>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            then: Mutex::new(then),
            samples: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }

    /// A process that is always running.
    #[must_use]
    pub fn running() -> Self {
        Self::new([], Some(ProcessStatus::Running))
    }

    /// `alive` running samples followed by death.
    #[must_use]
    pub fn dies_after(alive: usize) -> Self {
        Self::new(std::iter::repeat_n(Some(ProcessStatus::Running), alive), None)
    }

    /// Queue more samples after whatever is left.
    pub fn push(&self, samples: impl IntoIterator<Item = Option<ProcessStatus>>) {
        self.script.lock().extend(samples);
    }

    /// Replace the fallback.
    pub fn set_fallback(&self, then: Option<ProcessStatus>) {
        *self.then.lock() = then;
    }

    /// Samples taken so far.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    /// Kill requests received so far.
    #[must_use]
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for ScriptedProbe {
    fn sample(&self, _pid: u32) -> Option<ProcessStatus> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(sample) => sample,
            None => *self.then.lock(),
        }
    }

    fn kill(&self, _pid: u32) -> bool {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.script.lock().clear();
        *self.then.lock() = None;
        true
    }
}
