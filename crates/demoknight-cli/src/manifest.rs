//! Results manifest: which artifact each pass produced.
//!
//! No statistics are computed here. The manifest only lists the raw
//! captures in order and flags the warm-up pass.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use demoknight_core::plan::BenchTest;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Manifest file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestPass {
    pub index: u32,
    pub warmup: bool,
    pub observed_tick: u32,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestTest {
    pub name: String,
    pub passes: Vec<ManifestPass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub tests: Vec<ManifestTest>,
}

impl Manifest {
    /// Build the manifest. Pass 0 is flagged as warm-up unless `keep_first_pass`.
    pub fn from_tests<'a>(tests: impl IntoIterator<Item = &'a BenchTest>, keep_first_pass: bool) -> Self {
        let tests = tests
            .into_iter()
            .map(|test| ManifestTest {
                name: test.name().to_owned(),
                passes: test
                    .passes()
                    .iter()
                    .map(|pass| ManifestPass {
                        index: pass.index,
                        warmup: pass.index == 0 && !keep_first_pass,
                        observed_tick: pass.observed_tick,
                        artifact: pass.artifact.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self { tests }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, CliError> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Csv => Ok(self.render_csv()),
        }
    }

    fn render_csv(&self) -> String {
        let mut out = String::from("test,pass,warmup,observed_tick,artifact\n");
        for test in &self.tests {
            for pass in &test.passes {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    csv_field(&test.name),
                    pass.index,
                    pass.warmup,
                    pass.observed_tick,
                    csv_field(&pass.artifact.display().to_string())
                ));
            }
        }
        out
    }

    /// Write to `<output_file>.<ext>` and return the path written.
    pub fn write(&self, output_file: &Path, format: OutputFormat) -> Result<PathBuf, CliError> {
        let path = with_extension_appended(output_file, format.extension());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.render(format)?)?;
        Ok(path)
    }
}

/// `summary.v2` + `csv` is `summary.v2.csv`, not `summary.csv`.
fn with_extension_appended(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}
