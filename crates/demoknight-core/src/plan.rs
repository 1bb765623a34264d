//! Tests, passes and the configuration deltas that tell tests apart.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name used for the test that applies no changes.
pub const BASELINE_NAME: &str = "baseline";

/// A game file swapped in for the duration of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSwap {
    /// File inside the game installation.
    pub target: PathBuf,
    /// Replacement contents.
    pub source: PathBuf,
}

/// What a test changes relative to the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Changes {
    /// Console commands run once on the live process, e.g. `mat_picmip 2`.
    pub cvars: Vec<String>,
    /// Extra launch arguments.
    pub launch_options: Vec<String>,
    /// Files replaced while the test runs.
    pub file_swaps: Vec<FileSwap>,
}

impl Changes {
    /// Whether this is a baseline (no changes at all).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cvars.is_empty() && self.launch_options.is_empty() && self.file_swaps.is_empty()
    }

    /// A readable name derived from the changes, for tests that have none.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return BASELINE_NAME.to_owned();
        }
        let mut parts: Vec<String> = self.cvars.iter().map(|cvar| cvar.replace(' ', "=")).collect();
        parts.extend(self.launch_options.iter().cloned());
        parts.extend(self.file_swaps.iter().map(|swap| {
            swap.source
                .file_name()
                .map_or_else(|| swap.source.display().to_string(), |name| name.to_string_lossy().into_owned())
        }));
        parts.join(" ")
    }
}

/// One measurement repetition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    /// Zero-based position within the test.
    pub index: u32,
    /// Capture artifact the pass produced.
    pub artifact: PathBuf,
    /// Tick the seek landed on.
    pub observed_tick: u32,
}

/// One named configuration measured over several passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchTest {
    name: String,
    changes: Changes,
    passes: Vec<Pass>,
}

impl BenchTest {
    /// Create a test with no passes yet.
    #[must_use]
    pub fn new(name: impl Into<String>, changes: Changes) -> Self {
        Self {
            name: name.into(),
            changes,
            passes: Vec::new(),
        }
    }

    /// The baseline test.
    #[must_use]
    pub fn baseline() -> Self {
        Self::new(BASELINE_NAME, Changes::default())
    }

    /// Test name, also used as its artifact directory.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deltas applied by this test.
    #[must_use]
    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    /// Passes collected so far.
    #[must_use]
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Whether no pass has been recorded, so changes still need applying.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.passes.is_empty()
    }

    /// Index the next pass will get.
    #[must_use]
    pub fn next_index(&self) -> u32 {
        u32::try_from(self.passes.len()).unwrap_or(u32::MAX)
    }

    /// Artifacts already claimed by earlier passes.
    #[must_use]
    pub fn collected(&self) -> Vec<PathBuf> {
        self.passes.iter().map(|pass| pass.artifact.clone()).collect()
    }

    /// Record a pass, replacing any earlier pass with the same index.
    pub fn record(&mut self, pass: Pass) {
        self.passes.retain(|existing| existing.index != pass.index);
        self.passes.push(pass);
        self.passes.sort_by_key(|p| p.index);
    }

    /// Drop every collected pass, for a restart on a fresh process.
    pub fn clear_passes(&mut self) {
        self.passes.clear();
    }

    /// Directory artifacts for this test are written to under `raw_root`.
    #[must_use]
    pub fn output_dir(&self, raw_root: &Path) -> PathBuf {
        raw_root.join(sanitize(&self.name))
    }
}

/// Make a test name safe to use as a single path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '=' | '+') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        cleaned
    }
}
