use crate::DriverCommand;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = DriverError> = core::result::Result<T, E>;

/// Failure of a single driver invocation. Every variant is transient from the
/// caller's point of view: the console may answer on the next attempt.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("driver exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },
    #[error("driver did not answer within {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("driver output is not valid UTF-8")]
    InvalidOutput,
    #[error("no sample payload for {0}")]
    MissingSample(DriverCommand),
    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),
}
