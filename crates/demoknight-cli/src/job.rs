//! Job files: a list of tests plus any command-line option, in JSON or YAML.
//!
//! JSON job files may carry `//` and `/* */` comments.

use std::path::{Path, PathBuf};

use demoknight_core::plan::Changes;
use demoknight_core::rcon::RconConfig;
use demoknight_core::seeker::SeekConfig;
use demoknight_core::tailer::TailerConfig;
use demoknight_core::watchdog::WatchdogConfig;
use regex::Regex;
use serde::Deserialize;

use crate::error::CliError;
use crate::manifest::OutputFormat;

/// One test entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct JobTest {
    /// Defaults to a name derived from the changes.
    pub name: Option<String>,
    pub changes: Changes,
    /// Game binary for this test only.
    pub game_path: Option<PathBuf>,
}

/// Contents of a job file. Every field but `tests` mirrors a CLI flag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct JobFile {
    pub gameid: Option<u32>,
    pub game_path: Option<PathBuf>,
    pub launch_options: Vec<String>,
    pub raw_path: Option<PathBuf>,
    pub steam_path: Option<PathBuf>,
    pub passes: Option<u32>,
    pub keep_first_pass: Option<bool>,
    pub start_tick: Option<u32>,
    pub duration: Option<f64>,
    pub tickrate: Option<f64>,
    pub demo_path: Option<String>,
    pub no_baseline: Option<bool>,
    pub output_file: Option<PathBuf>,
    pub presentmon_path: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub max_test_attempts: Option<u32>,
    pub rcon_retry_budget: Option<f64>,
    pub tests: Vec<JobTest>,

    // Tuning with no CLI counterpart.
    pub watchdog: Option<WatchdogConfig>,
    pub rcon: Option<RconConfig>,
    pub seek: Option<SeekConfig>,
    pub tailer: Option<TailerConfig>,
}

impl JobFile {
    /// Load a job file, picking the parser by extension.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml(&text)
        } else {
            Self::from_json(&text)
        }
    }

    pub fn from_json(text: &str) -> Result<Self, CliError> {
        Ok(serde_json::from_str(&strip_comments(text)?)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self, CliError> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Remove `//` line comments and `/* */` block comments.
///
/// String literals are matched first and kept, so `"C://Steam"` survives.
pub fn strip_comments(text: &str) -> Result<String, CliError> {
    let comments = Regex::new(r#"(?s)("(?:\\.|[^"\\])*")|//[^\n]*|/\*.*?\*/"#)
        .map_err(|err| CliError::InvalidConfiguration(format!("comment pattern: {err}")))?;
    let stripped = comments.replace_all(text, |caps: &regex::Captures<'_>| {
        caps.get(1).map_or_else(String::new, |literal| literal.as_str().to_owned())
    });
    Ok(stripped.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const COMMENTED: &str = r#"{
        // Source 2013 multiplayer
        "game-path": "/games/tf2/hl2_linux",
        "demo-path": "demos/bench", /* relative to the mod dir */
        "passes": 3,
        "tests": [
            {"name": "low-textures", "changes": {"cvars": ["mat_picmip 2"]}},
            {"changes": {"launch-options": ["-dxlevel 90"]}, "game-path": "/games/tf2-beta/hl2_linux"}
        ]
    }"#;

    #[test]
    fn commented_json_parses() -> TestResult {
        let job = JobFile::from_json(COMMENTED)?;
        assert_eq!(job.game_path, Some(PathBuf::from("/games/tf2/hl2_linux")));
        assert_eq!(job.demo_path.as_deref(), Some("demos/bench"));
        assert_eq!(job.passes, Some(3));
        assert_eq!(job.tests.len(), 2);

        let first = job.tests.first().ok_or("missing test")?;
        assert_eq!(first.name.as_deref(), Some("low-textures"));
        assert_eq!(first.changes.cvars, vec!["mat_picmip 2"]);

        let second = job.tests.get(1).ok_or("missing test")?;
        assert_eq!(second.name, None);
        assert_eq!(second.game_path, Some(PathBuf::from("/games/tf2-beta/hl2_linux")));
        Ok(())
    }

    #[test]
    fn trailing_line_comment_without_newline() -> TestResult {
        let stripped = strip_comments("{\"passes\": 2} // done")?;
        assert_eq!(stripped.trim(), "{\"passes\": 2}");
        Ok(())
    }

    #[test]
    fn slashes_inside_strings_are_kept() -> TestResult {
        let job = JobFile::from_json(
            r#"{"steam-path": "C://Steam", // install
                "demo-path": "https://demos/bench /* not a comment */", /* gone */
                "launch-options": ["-x \"//\""]}"#,
        )?;
        assert_eq!(job.steam_path, Some(PathBuf::from("C://Steam")));
        assert_eq!(job.demo_path.as_deref(), Some("https://demos/bench /* not a comment */"));
        assert_eq!(job.launch_options, vec![r#"-x "//""#]);
        Ok(())
    }

    #[test]
    fn yaml_with_tuning_sections() -> TestResult {
        let job = JobFile::from_yaml(
            "demo-path: demos/bench\n\
             format: json\n\
             keep-first-pass: true\n\
             watchdog:\n  loading_decay: 8\n\
             rcon:\n  max_retry_duration: null\n\
             tests:\n  - name: fps-uncapped\n    changes:\n      cvars: [fps_max 0]\n",
        )?;
        assert_eq!(job.format, Some(OutputFormat::Json));
        assert_eq!(job.keep_first_pass, Some(true));
        let watchdog = job.watchdog.ok_or("missing watchdog section")?;
        assert_eq!(watchdog.loading_decay, Duration::from_secs(8));
        assert_eq!(watchdog.sample_interval, Duration::from_millis(500));
        assert_eq!(job.rcon.ok_or("missing rcon section")?.max_retry_duration, None);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = JobFile::from_json(r#"{"passes": 2, "pases": 3}"#);
        assert!(matches!(parsed, Err(CliError::JsonError(_))));
    }

    #[test]
    fn load_picks_parser_by_extension() -> TestResult {
        let dir = tempfile::tempdir()?;
        let yaml = dir.path().join("job.yml");
        std::fs::write(&yaml, "passes: 7\n")?;
        assert_eq!(JobFile::load(&yaml)?.passes, Some(7));

        let json = dir.path().join("job.json");
        std::fs::write(&json, "{\"passes\": 4} // four")?;
        assert_eq!(JobFile::load(&json)?.passes, Some(4));
        Ok(())
    }
}
