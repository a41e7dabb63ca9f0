use crate::{DriverCommand, DriverError, Result, StationDriver};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Replays pre-recorded driver output so parsing and unit handling can run
/// without a console attached.
pub struct SampleDriver {
    source: SampleSource,
}

enum SampleSource {
    Bundled,
    Dir(PathBuf),
}

impl SampleDriver {
    /// Payloads compiled into this crate.
    pub fn bundled() -> Self {
        Self {
            source: SampleSource::Bundled,
        }
    }

    /// Payloads read from `dir` on every call (`getRealtime.txt`, `getHighLow.txt`,
    /// `getTime.txt`, `model.txt`).
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: SampleSource::Dir(dir.into()),
        }
    }
}

fn bundled_payload(command: DriverCommand) -> Option<&'static str> {
    match command {
        DriverCommand::Realtime => Some(include_str!("../samples/getRealtime.txt")),
        DriverCommand::HighsLows => Some(include_str!("../samples/getHighLow.txt")),
        DriverCommand::GetTime => Some(include_str!("../samples/getTime.txt")),
        DriverCommand::Model => Some(include_str!("../samples/model.txt")),
        _ => None,
    }
}

#[async_trait]
impl StationDriver for SampleDriver {
    fn name(&self) -> &str {
        "sample"
    }

    async fn execute(&self, command: DriverCommand) -> Result<String> {
        if !command.is_query() {
            // No console to change; the caller reports no result
            debug!(%command, "sample driver cannot change console state");
            return Err(DriverError::Unsupported("state change in sample mode"));
        }
        match &self.source {
            SampleSource::Bundled => bundled_payload(command)
                .map(str::to_owned)
                .ok_or(DriverError::MissingSample(command)),
            SampleSource::Dir(dir) => {
                let file = command
                    .sample_file()
                    .ok_or(DriverError::MissingSample(command))?;
                let path = dir.join(file);
                debug!(path = %path.display(), "reading sample payload");
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| DriverError::Io(format!("{}: {e}", path.display())))
            }
        }
    }
}
