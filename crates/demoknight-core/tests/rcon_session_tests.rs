//! Retry and fatal-signal behaviour of the RCON session against a simulated game.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use demoknight_core::prelude::*;
use demoknight_rcon::RconError;
use demoknight_test_helpers::prelude::*;
use tokio::time::Instant;

fn session(game: &FakeGame, config: RconConfig, fatal: &FatalSignal) -> RconSession {
    let endpoint = RconEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 27015, "pw");
    RconSession::new(endpoint, game.transport(), config, fatal.clone())
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() -> TestResult {
    let dir = tempfile::tempdir()?;
    let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
    game.fail_next([
        RconError::ConnectionRefused,
        RconError::Timeout(Duration::from_secs(30)),
        RconError::EmptyResponse,
        RconError::AuthRejected,
    ]);
    let fatal = FatalSignal::new();
    let rcon = session(&game, RconConfig::default(), &fatal);

    let started = Instant::now();
    let response = rcon.execute("echo Waiting for responsiveness").await?;

    assert_eq!(response, "Waiting for responsiveness\n");
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(game.count("echo"), 1);
    Ok(())
}

#[tokio::test]
async fn oversized_command_is_not_retried() -> TestResult {
    let dir = tempfile::tempdir()?;
    let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
    game.fail_next([RconError::CommandTooLong { len: 5000, max: 4086 }]);
    let fatal = FatalSignal::new();
    let rcon = session(&game, RconConfig::default(), &fatal);

    let result = rcon.execute("echo hi").await;
    assert!(matches!(
        result,
        Err(ControlError::CommandRejected(RconError::CommandTooLong { .. }))
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_budget_surfaces_a_terminal_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
    game.fail_next(std::iter::repeat_with(|| RconError::ConnectionRefused).take(100));
    let fatal = FatalSignal::new();
    let config = RconConfig {
        max_retry_duration: Some(Duration::from_secs(5)),
        ..RconConfig::default()
    };
    let rcon = session(&game, config, &fatal);

    match rcon.execute("status").await {
        Err(ControlError::RetryBudgetExhausted { command, attempts, elapsed }) => {
            assert_eq!(command, "status");
            assert_eq!(attempts, 6);
            assert!(elapsed >= Duration::from_secs(5));
        }
        other => return Err(format!("expected budget exhaustion, got {other:?}").into()),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fatal_signal_interrupts_retrying() -> TestResult {
    let dir = tempfile::tempdir()?;
    let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
    game.fail_next(std::iter::repeat_with(|| RconError::ConnectionReset).take(1000));
    let fatal = FatalSignal::new();
    let rcon = session(&game, RconConfig::default(), &fatal);

    let (result, ()) = tokio::join!(rcon.execute("status"), async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        fatal.raise(FatalCause::ProcessLost { pid: 42 });
    });

    assert!(matches!(result, Err(ControlError::ProcessLost { pid: 42 })));
    Ok(())
}

#[tokio::test]
async fn raised_signal_blocks_new_commands() -> TestResult {
    let dir = tempfile::tempdir()?;
    let game = FakeGame::start(dir.path().join("console.log"), FakeGameConfig::default())?;
    let fatal = FatalSignal::new();
    fatal.raise(FatalCause::ProcessLost { pid: 7 });
    let rcon = session(&game, RconConfig::default(), &fatal);

    let result = rcon.execute("echo hi").await;
    assert!(matches!(result, Err(ControlError::ProcessLost { pid: 7 })));
    assert!(game.commands().is_empty());
    Ok(())
}
