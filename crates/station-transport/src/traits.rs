use crate::{DriverCommand, Result};
use async_trait::async_trait;

/// Something that can run one driver sub-command against a console and hand
/// back its raw text output.
#[async_trait]
pub trait StationDriver: Send + Sync {
    /// Short name used in logs ("vproweather", "sample", ...).
    fn name(&self) -> &str;

    /// Run one command. Query commands return the telemetry text; commands
    /// that only change console state return whatever the driver printed.
    async fn execute(&self, command: DriverCommand) -> Result<String>;
}
