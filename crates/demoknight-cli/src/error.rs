//! Error types for the demoknight CLI

use demoknight_core::{ControlError, ErrorClass};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Game is already running: {0}")]
    GameAlreadyRunning(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    #[error("Test '{name}' failed {attempts} times")]
    TestAbandoned { name: String, attempts: u32 },

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::GameAlreadyRunning(_) => 2,
            Self::GameNotFound(_) => 3,
            Self::ValidationError(_)
            | Self::InvalidConfiguration(_)
            | Self::JsonError(_)
            | Self::YamlError(_) => 4,
            Self::Control(err) if err.class() == ErrorClass::Configuration => 4,
            Self::Unsupported(_) => 5,
            Self::TestAbandoned { .. } => 6,
            Self::Control(_) | Self::IoError(_) => 1,
        }
    }
}

/// Exit code for any error reaching `main`.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(err) = error.downcast_ref::<CliError>() {
        return err.exit_code();
    }
    match error.downcast_ref::<ControlError>() {
        Some(err) if err.class() == ErrorClass::Configuration => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_failures_share_an_exit_code() {
        let control = CliError::Control(ControlError::invalid_configuration("bad"));
        assert_eq!(control.exit_code(), 4);
        assert_eq!(CliError::ValidationError("x".to_owned()).exit_code(), 4);
    }

    #[test]
    fn downcast_through_anyhow_context() {
        let err = anyhow::Error::new(CliError::GameAlreadyRunning("hl2_linux".to_owned()))
            .context("launching test 'baseline'");
        assert_eq!(exit_code(&err), 2);

        let lost = anyhow::Error::new(ControlError::ProcessLost { pid: 7 });
        assert_eq!(exit_code(&lost), 1);
    }
}
