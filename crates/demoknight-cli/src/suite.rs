//! The list of tests a run goes through.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use demoknight_core::PassConfig;
use demoknight_core::plan::{BenchTest, Changes};

use crate::error::CliError;
use crate::job::JobTest;

/// Fixed per-pass overhead: game start plus replay load.
const LOAD_OVERHEAD: Duration = Duration::from_secs(15);
/// Average fast-forward speed while seeking.
const SEEK_SPEEDUP: f64 = 20.0;
/// Slack for restarts and cool-downs.
const ETA_MARGIN: f64 = 1.2;
/// Runs estimated to take longer than this get a warning.
pub const LONG_RUN: Duration = Duration::from_secs(3600);

/// A test and the game binary it runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTest {
    pub test: BenchTest,
    pub game_path: PathBuf,
}

/// Parse inline tests given on the command line.
///
/// An item starting with `+` opens a console-variable change and an item
/// starting with `_` opens a launch-option change. Other items extend the
/// change before them:
///
/// `+mat_picmip 2 _dxlevel 90` gives `mat_picmip 2` and `-dxlevel 90`.
pub fn parse_inline(items: &[String]) -> Result<Vec<JobTest>, CliError> {
    let mut groups: Vec<Vec<&str>> = Vec::new();
    for item in items {
        let opens = item.starts_with(['+', '_']);
        if !opens && let Some(group) = groups.last_mut() {
            group.push(item.as_str());
        } else {
            groups.push(vec![item.as_str()]);
        }
    }

    groups
        .into_iter()
        .map(|group| {
            let joined = group.join(" ");
            let mut changes = Changes::default();
            if let Some(cvar) = joined.strip_prefix('+') {
                changes.cvars.push(cvar.to_owned());
            } else if let Some(option) = joined.strip_prefix('_') {
                changes.launch_options.push(format!("-{option}"));
            } else {
                return Err(CliError::ValidationError(format!(
                    "inline test '{joined}' must start with '+' (console variable) or '_' (launch option)"
                )));
            }
            Ok(JobTest {
                name: None,
                changes,
                game_path: None,
            })
        })
        .collect()
}

/// Build the ordered test list, baseline first when requested.
///
/// Test names become directory names, so they must be unique. Per-test game
/// paths are made absolute; `default_game` is used as given.
pub fn build(tests: Vec<JobTest>, baseline: bool, default_game: &Path) -> Result<Vec<PlannedTest>, CliError> {
    let mut planned = Vec::with_capacity(tests.len().saturating_add(1));
    if baseline {
        planned.push(PlannedTest {
            test: BenchTest::baseline(),
            game_path: default_game.to_path_buf(),
        });
    }
    for entry in tests {
        let name = entry.name.unwrap_or_else(|| entry.changes.describe());
        let game_path = match entry.game_path {
            Some(path) => std::path::absolute(path)?,
            None => default_game.to_path_buf(),
        };
        planned.push(PlannedTest {
            test: BenchTest::new(name, entry.changes),
            game_path,
        });
    }

    if planned.is_empty() {
        return Err(CliError::ValidationError(
            "nothing to run: no tests given and the baseline is disabled".to_owned(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in &planned {
        if !seen.insert(entry.test.name()) {
            return Err(CliError::ValidationError(format!(
                "test name '{}' is used more than once",
                entry.test.name()
            )));
        }
    }
    Ok(planned)
}

/// Rough wall-clock estimate for the whole run.
pub fn estimate(pass: &PassConfig, passes: u32, tests: usize) -> Duration {
    let fast_forward = f64::from(pass.start_tick) * pass.tick_interval / SEEK_SPEEDUP;
    let per_pass = LOAD_OVERHEAD.as_secs_f64()
        + pass.start_buffer.as_secs_f64()
        + pass.duration.as_secs_f64()
        + fast_forward;
    let tests = f64::from(u32::try_from(tests).unwrap_or(u32::MAX));
    Duration::try_from_secs_f64(per_pass * f64::from(passes) * ETA_MARGIN * tests).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn items(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|item| (*item).to_owned()).collect()
    }

    #[test]
    fn inline_items_group_by_prefix() -> TestResult {
        let tests = parse_inline(&items(&["+mat_picmip", "2", "_dxlevel", "90", "+fps_max", "0"]))?;
        let changes: Vec<&Changes> = tests.iter().map(|test| &test.changes).collect();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.first().map(|c| c.cvars.clone()), Some(vec!["mat_picmip 2".to_owned()]));
        assert_eq!(
            changes.get(1).map(|c| c.launch_options.clone()),
            Some(vec!["-dxlevel 90".to_owned()])
        );
        assert_eq!(changes.get(2).map(|c| c.cvars.clone()), Some(vec!["fps_max 0".to_owned()]));
        Ok(())
    }

    #[test]
    fn inline_item_without_prefix_is_rejected() {
        let result = parse_inline(&items(&["mat_picmip", "2"]));
        assert!(matches!(result, Err(CliError::ValidationError(_))));
    }

    #[test]
    fn no_items_means_no_tests() -> TestResult {
        assert!(parse_inline(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn baseline_runs_first_with_derived_names() -> TestResult {
        let tests = parse_inline(&items(&["+mat_picmip 2"]))?;
        let planned = build(tests, true, Path::new("/games/hl2_linux"))?;
        let names: Vec<&str> = planned.iter().map(|p| p.test.name()).collect();
        assert_eq!(names, vec!["baseline", "mat_picmip=2"]);
        assert!(planned.iter().all(|p| p.game_path == Path::new("/games/hl2_linux")));
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> TestResult {
        let tests = parse_inline(&items(&["+fps_max 0", "+fps_max 0"]))?;
        let result = build(tests, false, Path::new("/games/hl2_linux"));
        assert!(matches!(result, Err(CliError::ValidationError(_))));
        Ok(())
    }

    #[test]
    fn empty_suite_is_rejected() {
        let result = build(Vec::new(), false, Path::new("/games/hl2_linux"));
        assert!(matches!(result, Err(CliError::ValidationError(_))));
    }

    #[test]
    fn estimate_with_defaults() {
        // (15 + 2 + 20 + 152 / 66.6 / 20) * 5 * 1.2 = 222.68s per test
        let eta = estimate(&PassConfig::default(), 5, 1);
        assert!((eta.as_secs_f64() - 222.685).abs() < 0.01, "{eta:?}");

        let long = estimate(&PassConfig::default(), 5, 17);
        assert!(long > LONG_RUN);
    }
}
