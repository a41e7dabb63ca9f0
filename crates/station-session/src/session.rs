use crate::config::SessionConfig;
use crate::metrics::MetricsHub;
use crate::retry::{Outcome, ResilientInvoker, RetryPolicy, Retryable};
use station_transport::{DriverCommand, DriverError, SampleDriver, StationDriver, VproweatherDriver};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use weather_record::{
    map_record, parse_telemetry, RecordKind, TelemetryRecord, UnitAwareTree, UnitError,
    UnitTarget,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Units(#[from] UnitError),
    #[error("configuration: {0}")]
    Config(String),
}

impl Retryable for DriverError {
    fn is_transient(&self) -> bool {
        !matches!(self, DriverError::Unsupported(_))
    }
}

impl Retryable for SessionError {
    fn is_transient(&self) -> bool {
        match self {
            SessionError::Driver(e) => e.is_transient(),
            SessionError::Units(_) | SessionError::Config(_) => false,
        }
    }
}

fn query_command(kind: RecordKind) -> DriverCommand {
    match kind {
        RecordKind::Realtime => DriverCommand::Realtime,
        RecordKind::HighLow => DriverCommand::HighsLows,
        RecordKind::Time => DriverCommand::GetTime,
        RecordKind::Model => DriverCommand::Model,
    }
}

/// One console, reached through one driver. Callers run one operation at a
/// time; every driver call goes through the retry loop.
pub struct DeviceSession {
    driver: Arc<dyn StationDriver>,
    invoker: ResilientInvoker,
    units: Option<UnitTarget>,
}

impl DeviceSession {
    pub fn new(driver: Arc<dyn StationDriver>, policy: RetryPolicy) -> Self {
        Self {
            driver,
            invoker: ResilientInvoker::new(policy),
            units: None,
        }
    }

    /// Pick the driver and units described by `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::Config(format!("{e:#}")))?;
        let driver: Arc<dyn StationDriver> = if config.use_samples {
            match &config.sample_dir {
                Some(dir) => Arc::new(SampleDriver::from_dir(dir)),
                None => Arc::new(SampleDriver::bundled()),
            }
        } else {
            Arc::new(
                VproweatherDriver::new(config.device.clone())
                    .with_program(config.driver_program.clone())
                    .with_delay(config.delay)
                    .with_timeout(config.timeout()),
            )
        };
        let units = config
            .unit_target()
            .map_err(|e| SessionError::Config(format!("{e:#}")))?;
        debug!(driver = driver.name(), preset = ?config.preset, "session configured");
        let mut session = Self::new(driver, config.retry_policy());
        session.units = units;
        Ok(session)
    }

    /// Units applied to every returned tree; `None` keeps the console's own.
    pub fn with_units(mut self, target: Option<UnitTarget>) -> Self {
        self.units = target;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.invoker = self.invoker.with_metrics(metrics);
        self
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.invoker.policy()
    }

    async fn run(&self, command: DriverCommand) -> Result<Outcome<String>, SessionError> {
        let driver = &self.driver;
        let outcome = self
            .invoker
            .invoke(&command.to_string(), move |_| driver.execute(command))
            .await?;
        Ok(outcome)
    }

    /// The flat record as parsed from the driver, before mapping.
    pub async fn read_raw(&self, kind: RecordKind) -> Result<Outcome<TelemetryRecord>, SessionError> {
        let outcome = self.run(query_command(kind)).await?;
        Ok(outcome.map(|raw| parse_telemetry(&raw, kind.delimiter())))
    }

    /// Read, parse and map one record, then apply the session units.
    pub async fn read(&self, kind: RecordKind) -> Result<Outcome<UnitAwareTree>, SessionError> {
        let outcome = self.read_raw(kind).await?;
        let outcome = outcome.try_map(|record| {
            let tree = map_record(kind, &record);
            match &self.units {
                Some(target) => tree.apply_units(target),
                None => Ok(tree),
            }
        })?;
        info!(%kind, attempts = outcome.attempts(), ok = outcome.is_success(), "read finished");
        Ok(outcome)
    }

    pub async fn realtime(&self) -> Result<Outcome<UnitAwareTree>, SessionError> {
        self.read(RecordKind::Realtime).await
    }

    pub async fn highs_and_lows(&self) -> Result<Outcome<UnitAwareTree>, SessionError> {
        self.read(RecordKind::HighLow).await
    }

    pub async fn console_time(&self) -> Result<Outcome<UnitAwareTree>, SessionError> {
        self.read(RecordKind::Time).await
    }

    pub async fn model(&self) -> Result<Outcome<UnitAwareTree>, SessionError> {
        self.read(RecordKind::Model).await
    }

    /// Set the console clock to the host clock. `false` when every attempt
    /// failed or the driver cannot change console state.
    pub async fn sync_console_time(&self) -> Result<bool, SessionError> {
        self.apply(DriverCommand::SetTime).await
    }

    pub async fn set_backlight(&self, on: bool) -> Result<bool, SessionError> {
        let command = if on {
            DriverCommand::BacklightOn
        } else {
            DriverCommand::BacklightOff
        };
        self.apply(command).await
    }

    async fn apply(&self, command: DriverCommand) -> Result<bool, SessionError> {
        let outcome = match self.run(command).await {
            Ok(outcome) => outcome,
            Err(SessionError::Driver(DriverError::Unsupported(reason))) => {
                info!(%command, reason, "command not applied");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        info!(%command, attempts = outcome.attempts(), ok = outcome.is_success(), "command finished");
        Ok(outcome.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use weather_record::{Node, Unit};

    /// Replays a fixed list of replies and records the commands it saw.
    struct ScriptedDriver {
        replies: Mutex<VecDeque<station_transport::Result<String>>>,
        seen: Mutex<Vec<DriverCommand>>,
    }

    impl ScriptedDriver {
        fn new(replies: Vec<station_transport::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<DriverCommand> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StationDriver for ScriptedDriver {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, command: DriverCommand) -> station_transport::Result<String> {
            self.seen.lock().unwrap().push(command);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(DriverError::Io("script exhausted".into())))
        }
    }

    fn flaky() -> station_transport::Result<String> {
        Err(DriverError::ExitStatus {
            status: "exit status: 1".into(),
            stderr: "no answer from console".into(),
        })
    }

    #[tokio::test]
    async fn retries_until_the_console_answers() {
        let driver = ScriptedDriver::new(vec![
            flaky(),
            Ok("rtBaroCurr = 29.952\nrtIsRaining = no\n".into()),
        ]);
        let session = DeviceSession::new(driver.clone(), RetryPolicy::new(3, false));
        let out = session.realtime().await.unwrap();
        assert_eq!(out.attempts(), 2);
        let tree = out.into_value().unwrap();
        let plain = tree.to_plain_values(false);
        assert_eq!(plain["pressure"]["current"], json!(29.952));
        assert_eq!(plain["rain"]["isRaining"], json!(false));
        assert_eq!(driver.seen(), [DriverCommand::Realtime, DriverCommand::Realtime]);
    }

    #[tokio::test]
    async fn exhausted_read_is_not_an_error() {
        let driver = ScriptedDriver::new(vec![flaky(), flaky(), flaky(), Ok(String::new())]);
        let session = DeviceSession::new(driver.clone(), RetryPolicy::new(3, true));
        let out = session.model().await.unwrap();
        assert_eq!(out, Outcome::Exhausted { attempts: 3 });
        assert_eq!(driver.seen().len(), 3);
    }

    #[tokio::test]
    async fn unsupported_command_reports_false_after_one_attempt() {
        let driver = ScriptedDriver::new(vec![
            Err(DriverError::Unsupported("set-time")),
            Ok(String::new()),
        ]);
        let session = DeviceSession::new(driver.clone(), RetryPolicy::default());
        assert!(!session.sync_console_time().await.unwrap());
        assert_eq!(driver.seen(), [DriverCommand::SetTime]);
    }

    #[tokio::test]
    async fn unsupported_read_is_still_an_error() {
        let driver = ScriptedDriver::new(vec![Err(DriverError::Unsupported("model"))]);
        let session = DeviceSession::new(driver.clone(), RetryPolicy::default());
        let err = session.model().await.unwrap_err();
        assert!(matches!(err, SessionError::Driver(DriverError::Unsupported(_))));
        assert_eq!(driver.seen().len(), 1);
    }

    #[tokio::test]
    async fn state_changes_report_success() {
        let driver = ScriptedDriver::new(vec![Ok(String::new()), flaky()]);
        let session = DeviceSession::new(driver.clone(), RetryPolicy::new(1, false));
        assert!(session.set_backlight(true).await.unwrap());
        assert!(!session.set_backlight(false).await.unwrap());
        assert_eq!(
            driver.seen(),
            [DriverCommand::BacklightOn, DriverCommand::BacklightOff]
        );
    }

    #[tokio::test]
    async fn applies_session_units() {
        let driver = ScriptedDriver::new(vec![Ok("rtOutsideTemp = 68\n".into())]);
        let session = DeviceSession::new(driver, RetryPolicy::default())
            .with_units(Some(UnitTarget::named_preset("eu")));
        let tree = session.realtime().await.unwrap().into_value().unwrap();
        let t = tree
            .get("temperature.outside")
            .and_then(Node::as_tagged)
            .unwrap();
        assert_eq!(t.unit(), Unit::Celsius);
        assert!((t.value().unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(tree.preset_name(), Some("eu"));
    }

    #[tokio::test]
    async fn bundled_samples_end_to_end() {
        let config = SessionConfig {
            use_samples: true,
            preset: Some("eu".into()),
            ..SessionConfig::default()
        };
        let session = DeviceSession::from_config(&config).unwrap();
        assert_eq!(session.driver_name(), "sample");
        assert_eq!(session.policy(), config.retry_policy());

        let realtime = session.realtime().await.unwrap().into_value().unwrap();
        let plain = realtime.to_plain_values(true);
        assert_eq!(plain["units"]["preset"], json!("eu"));
        assert_eq!(plain["units"]["pressure"], json!("hPa"));
        assert_eq!(plain["nextArchiveRecord"], json!("0742"));

        let time = session.console_time().await.unwrap().into_value().unwrap();
        assert_eq!(time.to_plain_values(false), json!({"time": "2020-09-16T10:40:02"}));

        let model = session.model().await.unwrap().into_value().unwrap();
        assert_eq!(model.to_plain_values(false), json!({"model": "Vantage Pro 2"}));

        let highs = session.highs_and_lows().await.unwrap().into_value().unwrap();
        assert!(highs.get("temperature.outside.year.high").is_some());

        // No console behind the samples, so nothing changes state
        assert!(!session.sync_console_time().await.unwrap());
        assert!(!session.set_backlight(true).await.unwrap());
        assert!(!session.set_backlight(false).await.unwrap());
    }

    #[tokio::test]
    async fn raw_read_keeps_driver_keys() {
        let driver = ScriptedDriver::new(vec![Ok("Model: Vantage Vue\n".into())]);
        let session = DeviceSession::new(driver, RetryPolicy::default());
        let raw = session.read_raw(RecordKind::Model).await.unwrap().into_value().unwrap();
        assert_eq!(
            raw.get("Model"),
            Some(&weather_record::Scalar::Text("Vantage Vue".into()))
        );
    }

    #[test]
    fn driver_errors_are_transient_except_unsupported() {
        assert!(DriverError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!DriverError::Unsupported("x").is_transient());
        assert!(!SessionError::Config("bad".into()).is_transient());
    }
}
