//! Runs every test: swap files in, launch, collect passes, tear down.
//!
//! A test that loses its process or its captures is restarted from scratch
//! on a fresh process, up to a configured number of attempts.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use demoknight_core::capture::CaptureTool;
use demoknight_core::guard::FileGuard;
use demoknight_core::plan::{BenchTest, Changes};
use demoknight_core::rcon::RconTransport;
use demoknight_core::{ControlError, PassController};
use tracing::{error, info, warn};

use crate::error::CliError;
use crate::launch::LaunchPlan;
use crate::output;
use crate::session::GameSession;
use crate::settings::Settings;
use crate::suite::PlannedTest;

/// Control socket name the generated `MangoHud` config asks for.
#[cfg(target_os = "linux")]
const MANGOHUD_SOCKET: &str = "mangohud";

/// The recorder for one test plus whatever must stay in place while it runs.
struct CaptureBackend {
    tool: Box<dyn CaptureTool>,
    env: Vec<(String, String)>,
    _config: Option<FileGuard>,
}

pub struct Orchestrator {
    settings: Settings,
    controller: PassController,
    transport: Arc<dyn RconTransport>,
}

impl Orchestrator {
    pub fn new(settings: Settings, transport: Arc<dyn RconTransport>) -> Result<Self, CliError> {
        let controller = PassController::new(settings.pass.clone(), settings.seek.clone())?;
        Ok(Self {
            settings,
            controller,
            transport,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Put back any file a crashed earlier run left swapped.
    pub fn recover_stale_state(&self, suite: &[PlannedTest]) -> Result<(), CliError> {
        let targets = suite
            .iter()
            .flat_map(|planned| planned.test.changes().file_swaps.iter().map(|swap| swap.target.as_path()))
            .chain(std::iter::once(self.settings.mangohud_config.as_path()));
        for target in targets {
            if FileGuard::recover_stale(target)? {
                info!(target = %target.display(), "Recovered stale swap");
            }
        }
        Ok(())
    }

    /// Run every test in order. Stops at the first test that cannot finish.
    pub async fn run(&self, suite: &mut [PlannedTest]) -> Result<()> {
        for planned in suite.iter_mut() {
            self.run_test(planned).await?;
        }
        Ok(())
    }

    async fn run_test(&self, planned: &mut PlannedTest) -> Result<()> {
        let name = planned.test.name().to_owned();
        let mut attempt: u32 = 1;
        loop {
            output::print_test_starting(&name, attempt);
            let err = match self.attempt(planned).await {
                Ok(()) => {
                    info!(test = %name, "Finished test");
                    tokio::time::sleep(self.settings.cooldown).await;
                    output::print_test_finished(&name);
                    return Ok(());
                }
                Err(err) => err,
            };

            if !is_test_fatal(&err) {
                error!(test = %name, error = %err, "Test failed");
                return Err(err.context(format!("test '{name}'")));
            }
            if attempt >= self.settings.max_test_attempts {
                error!(test = %name, attempts = attempt, error = %err, "Giving up on test");
                return Err(err.context(CliError::TestAbandoned {
                    name,
                    attempts: attempt,
                }));
            }

            warn!(test = %name, attempt, error = %err, "test restarting");
            output::print_test_restarting(&name, &err);
            planned.test.clear_passes();
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(self.settings.cooldown).await;
        }
    }

    async fn attempt(&self, planned: &mut PlannedTest) -> Result<()> {
        let output_dir = planned.test.output_dir(&self.settings.raw_root);
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;

        let _swaps = swap_files(planned.test.changes())?;
        let capture = self.capture_backend(&output_dir)?;

        let mut launch_options = self.settings.launch_options.clone();
        launch_options.extend(planned.test.changes().launch_options.iter().cloned());
        let plan = LaunchPlan {
            target: self.settings.target.clone(),
            game_path: planned.game_path.clone(),
            launch_options,
            env: capture.env.clone(),
        };

        let mut session = GameSession::launch(&plan, &self.settings.session, Arc::clone(&self.transport)).await?;
        info!(test = planned.test.name(), pid = session.pid(), "Game is ready");

        match self
            .run_passes(&mut session, &mut planned.test, capture.tool.as_ref(), &output_dir)
            .await
        {
            Ok(()) => session.quit().await,
            Err(err) => {
                session.abort().await;
                Err(err)
            }
        }
    }

    async fn run_passes(
        &self,
        session: &mut GameSession,
        test: &mut BenchTest,
        capture: &dyn CaptureTool,
        output_dir: &Path,
    ) -> Result<()> {
        while test.next_index() < self.settings.passes {
            let mut ctx = session.pass_context(capture, output_dir);
            let pass = self.controller.run_pass(&mut ctx, test).await?;
            output::print_pass_finished(pass.index);
            test.record(pass);
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn capture_backend(&self, output_dir: &Path) -> Result<CaptureBackend> {
        use demoknight_core::capture::{MangoHudConfig, MangoHudControl};

        let path = &self.settings.mangohud_config;
        let config = MangoHudConfig {
            log_duration: self.settings.pass.capture_window(),
            output_folder: output_dir.to_path_buf(),
            control_socket: MANGOHUD_SOCKET.to_owned(),
        };
        let guard = config
            .install(path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(CaptureBackend {
            tool: Box::new(MangoHudControl::new(MANGOHUD_SOCKET)),
            env: MangoHudConfig::environment(path),
            _config: Some(guard),
        })
    }

    #[cfg(windows)]
    fn capture_backend(&self, _output_dir: &Path) -> Result<CaptureBackend> {
        use demoknight_core::capture::CommandCapture;

        let program = self
            .settings
            .presentmon_path
            .clone()
            .unwrap_or_else(|| "presentmon".into());
        Ok(CaptureBackend {
            tool: Box::new(CommandCapture::presentmon(program)),
            env: Vec::new(),
            _config: None,
        })
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn capture_backend(&self, _output_dir: &Path) -> Result<CaptureBackend> {
        Err(CliError::Unsupported(
            "frame-time capture is only available on Linux (MangoHud) and Windows (PresentMon)".to_owned(),
        )
        .into())
    }
}

/// Swap in every file the test replaces. Originals return when the guards drop.
fn swap_files(changes: &Changes) -> Result<Vec<FileGuard>> {
    changes
        .file_swaps
        .iter()
        .map(|swap| {
            FileGuard::replace_with_file(swap.target.clone(), &swap.source).with_context(|| {
                format!("swapping {} into {}", swap.source.display(), swap.target.display())
            })
        })
        .collect()
}

/// Whether `err` means "this process is unusable, start the test over".
pub fn is_test_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| {
            cause.downcast_ref::<ControlError>().or_else(|| match cause.downcast_ref::<CliError>() {
                Some(CliError::Control(inner)) => Some(inner),
                _ => None,
            })
        })
        .is_some_and(ControlError::is_test_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use demoknight_core::plan::FileSwap;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn process_loss_restarts_the_test() {
        let err = anyhow::Error::new(ControlError::ProcessLost { pid: 12 }).context("pass 3");
        assert!(is_test_fatal(&err));

        let wrapped = anyhow::Error::new(CliError::Control(ControlError::SeekRetriesExhausted { attempts: 5 }));
        assert!(is_test_fatal(&wrapped));
    }

    #[test]
    fn configuration_problems_do_not_restart() {
        let missing = anyhow::Error::new(ControlError::invalid_configuration("bad pattern"));
        assert!(!is_test_fatal(&missing));

        let running = anyhow::Error::new(CliError::GameAlreadyRunning("hl2_linux".to_owned()));
        assert!(!is_test_fatal(&running));
    }

    #[test]
    fn swapped_files_come_back_when_guards_drop() -> TestResult {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("autoexec.cfg");
        let source = dir.path().join("low.cfg");
        std::fs::write(&target, "mat_picmip 0\n")?;
        std::fs::write(&source, "mat_picmip 2\n")?;
        let changes = Changes {
            file_swaps: vec![FileSwap {
                target: target.clone(),
                source,
            }],
            ..Changes::default()
        };

        let guards = swap_files(&changes)?;
        assert_eq!(std::fs::read_to_string(&target)?, "mat_picmip 2\n");
        drop(guards);
        assert_eq!(std::fs::read_to_string(&target)?, "mat_picmip 0\n");
        Ok(())
    }

    #[test]
    fn missing_swap_source_fails_before_launch() -> TestResult {
        let dir = tempfile::tempdir()?;
        let changes = Changes {
            file_swaps: vec![FileSwap {
                target: dir.path().join("autoexec.cfg"),
                source: dir.path().join("missing.cfg"),
            }],
            ..Changes::default()
        };
        let result = swap_files(&changes);
        assert!(matches!(result, Err(_)));
        assert!(!dir.path().join("autoexec.cfg").exists());
        Ok(())
    }
}
