use crate::retry::{RetryPolicy, DEFAULT_MAX_TRIES};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use weather_record::{UnitOverrides, UnitPreset, UnitRegistry, UnitTarget};

/// Everything a [`crate::DeviceSession`] needs to reach the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Serial device the console is attached to.
    pub device: String,
    pub driver_program: String,
    /// Driver response delay, in tenths of a second.
    pub delay: u32,
    pub timeout_ms: u64,
    pub max_tries: u32,
    pub log_errors: bool,
    /// Replay recorded payloads instead of talking to a console.
    pub use_samples: bool,
    /// Directory of recorded payloads; the built-in set is used when unset.
    pub sample_dir: Option<PathBuf>,
    /// Unit preset applied to every record; built-in or from `presets`.
    pub preset: Option<String>,
    pub presets: BTreeMap<String, UnitOverrides>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            driver_program: "vproweather".into(),
            delay: station_transport::DEFAULT_DELAY,
            timeout_ms: station_transport::DEFAULT_TIMEOUT.as_millis() as u64,
            max_tries: DEFAULT_MAX_TRIES,
            log_errors: false,
            use_samples: false,
            sample_dir: None,
            preset: None,
            presets: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_tries, self.log_errors)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check what serde cannot: attempt budget and custom preset totality.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tries == 0 {
            bail!("max_tries must be at least 1");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be positive");
        }
        for (name, units) in &self.presets {
            UnitPreset::from_assignment(units).with_context(|| format!("preset `{name}`"))?;
        }
        Ok(())
    }

    /// Resolve a preset name against the custom presets first, then the
    /// built-in ones. Unknown names resolve to the default preset.
    pub fn resolve_preset(&self, name: &str) -> anyhow::Result<UnitTarget> {
        match self.presets.get(name) {
            Some(units) => Ok(UnitTarget::Preset {
                name: name.to_string(),
                units: UnitPreset::from_assignment(units)
                    .with_context(|| format!("preset `{name}`"))?,
            }),
            None => Ok(UnitTarget::named_preset(name)),
        }
    }

    /// The configured target units, if a preset is set.
    pub fn unit_target(&self) -> anyhow::Result<Option<UnitTarget>> {
        self.preset
            .as_deref()
            .map(|name| self.resolve_preset(name))
            .transpose()
    }

    /// Names of every preset this configuration can resolve.
    pub fn preset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = UnitRegistry::global()
            .presets()
            .iter()
            .map(|(n, _)| n.to_string())
            .collect();
        for name in self.presets.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<SessionConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let val: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    // An empty file is a valid, all-default configuration
    let config: SessionConfig = if val.is_null() {
        SessionConfig::default()
    } else {
        serde_yaml::from_value(val)
            .with_context(|| format!("decoding config: {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("validating config: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_record::{QuantityType, Unit};

    fn parse(yaml: &str) -> anyhow::Result<SessionConfig> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_match_driver() {
        let config = SessionConfig::default();
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.delay, 10);
        assert_eq!(config.max_tries, 20);
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert!(config.unit_target().unwrap().is_none());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = parse("device: /dev/ttyS1\nuse_samples: true\npreset: eu\n").unwrap();
        assert_eq!(config.device, "/dev/ttyS1");
        assert!(config.use_samples);
        assert_eq!(config.max_tries, 20);
        match config.unit_target().unwrap() {
            Some(UnitTarget::Preset { name, units }) => {
                assert_eq!(name, "eu");
                assert_eq!(units.unit_for(QuantityType::Rain), Unit::Millimeters);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn custom_preset_must_be_total() {
        let yaml = "presets:\n  uk:\n    temperature: °C\n";
        let err = parse(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("preset `uk`"));
    }

    #[test]
    fn custom_preset_resolves_before_builtins() {
        let yaml = r#"
preset: metric-inches
presets:
  metric-inches:
    wind: km/h
    temperature: °C
    pressure: hPa
    rain: in
    solarRadiation: W/m²
    soilMoisture: cb
"#;
        let config = parse(yaml).unwrap();
        match config.unit_target().unwrap() {
            Some(UnitTarget::Preset { name, units }) => {
                assert_eq!(name, "metric-inches");
                assert_eq!(units.unit_for(QuantityType::Rain), Unit::Inches);
            }
            other => panic!("unexpected target {other:?}"),
        }
        assert!(config.preset_names().contains(&"metric-inches".to_string()));
    }

    #[test]
    fn rejects_wrong_quantity_and_unknown_fields() {
        assert!(parse("presets:\n  bad:\n    wind: °C\n").is_err());
        assert!(parse("devcie: /dev/ttyS0\n").is_err());
        assert!(parse("max_tries: 0\n").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config_file("/nonexistent/vp.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/vp.yaml"));
    }
}
