use crate::{DriverCommand, DriverError, Result, StationDriver};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default response delay handed to the driver, in tenths of a second.
pub const DEFAULT_DELAY: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs the `vproweather` executable once per command and captures stdout.
#[derive(Clone, Debug)]
pub struct VproweatherDriver {
    program: String,
    device: String,
    delay: u32,
    timeout: Duration,
}

impl VproweatherDriver {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            program: "vproweather".to_string(),
            device: device.into(),
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for one invocation, device path last.
    pub fn args(&self, command: DriverCommand) -> Vec<String> {
        let mut args = Vec::with_capacity(3);
        if command.uses_delay() {
            args.push(format!("--delay={}", self.delay));
        }
        args.push(command.flag().to_string());
        args.push(self.device.clone());
        args
    }
}

#[async_trait]
impl StationDriver for VproweatherDriver {
    fn name(&self) -> &str {
        "vproweather"
    }

    async fn execute(&self, command: DriverCommand) -> Result<String> {
        let args = self.args(command);
        debug!(program = %self.program, ?args, "spawning driver");
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| DriverError::Io(e.to_string()))?,
            Err(_) => return Err(DriverError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(DriverError::ExitStatus {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| DriverError::InvalidOutput)
    }
}
