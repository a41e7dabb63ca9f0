//! Static field templates turning a flat driver record into the nested,
//! unit-tagged shape handed to consumers.

use crate::parse::{Delimiter, Scalar, TelemetryRecord};
use crate::tree::{Node, TaggedValue, UnitAwareTree};
use crate::units::{QuantityType as Q, UnitPreset, UnitRegistry, DEFAULT_PRESET};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Realtime,
    HighLow,
    Time,
    Model,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Realtime,
        RecordKind::HighLow,
        RecordKind::Time,
        RecordKind::Model,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Realtime => "realtime",
            RecordKind::HighLow => "highlow",
            RecordKind::Time => "time",
            RecordKind::Model => "model",
        }
    }

    /// Delimiter the driver uses for this record's lines.
    pub fn delimiter(self) -> Delimiter {
        match self {
            RecordKind::Model => Delimiter::Colon,
            _ => Delimiter::Equals,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" | "rt" => Ok(RecordKind::Realtime),
            "highlow" | "highlows" | "highs-lows" | "hl" => Ok(RecordKind::HighLow),
            "time" => Ok(RecordKind::Time),
            "model" => Ok(RecordKind::Model),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

enum Template {
    /// Copy the source value as is.
    Field(&'static str),
    /// Numeric source value tagged with the native unit of a quantity.
    Tagged(&'static str, Q),
    Group(&'static [(&'static str, Template)]),
}

use Template::{Field, Group, Tagged};

type Table = &'static [(&'static str, Template)];

const REALTIME: Table = &[
    ("nextArchiveRecord", Field("rtNextArchiveRecord")),
    (
        "pressure",
        Group(&[
            ("current", Tagged("rtBaroCurr", Q::Pressure)),
            ("trend", Field("rtBaroTrend")),
            ("image", Field("rtBaroTrendImg")),
        ]),
    ),
    (
        "wind",
        Group(&[
            (
                "speed",
                Group(&[
                    ("current", Tagged("rtWindSpeed", Q::Wind)),
                    (
                        "avg",
                        Group(&[
                            ("short", Tagged("rtWindAvgSpeed", Q::Wind)),
                            ("long", Tagged("rtWind2mAvgSpeed", Q::Wind)),
                        ]),
                    ),
                ]),
            ),
            (
                "direction",
                Group(&[
                    ("degrees", Field("rtWindDir")),
                    ("rose", Field("rtWindDirRose")),
                ]),
            ),
            (
                "gust",
                Group(&[
                    ("speed", Tagged(GUST_KEY, Q::Wind)),
                    (
                        "direction",
                        Group(&[
                            ("degrees", Field("rtWind10mGustMaxDir")),
                            ("rose", Field("rtWind10mGustMaxDirRose")),
                        ]),
                    ),
                ]),
            ),
            ("chill", Tagged(WIND_CHILL_KEY, Q::Temperature)),
        ]),
    ),
    (
        "humidity",
        Group(&[
            ("outside", Field("rtOutsideHum")),
            ("inside", Field("rtInsideHum")),
        ]),
    ),
    (
        "temperature",
        Group(&[
            ("outside", Tagged(OUTSIDE_TEMP_KEY, Q::Temperature)),
            ("inside", Tagged("rtInsideTemp", Q::Temperature)),
        ]),
    ),
    (
        "rain",
        Group(&[
            ("rate", Tagged("rtRainRate", Q::Rain)),
            ("isRaining", Field("rtIsRaining")),
            ("quarter", Tagged("rt15mRain", Q::Rain)),
            ("hour", Tagged("rtHourRain", Q::Rain)),
            ("day", Tagged("rtDayRain", Q::Rain)),
            ("month", Tagged("rtMonthRain", Q::Rain)),
            ("year", Tagged("rtYearRain", Q::Rain)),
        ]),
    ),
    (
        "storm",
        Group(&[
            ("rain", Tagged("rtRainStorm", Q::Rain)),
            ("startDate", Field("rtStormStartDate")),
        ]),
    ),
    (
        "sun",
        Group(&[
            ("rise", Field("rtSunrise")),
            ("set", Field("rtSunset")),
            ("uvLevel", Field("rtUVLevel")),
            ("solarRadiation", Tagged(SOLAR_KEY, Q::SolarRadiation)),
            (
                "et",
                Group(&[("day", Field("rtDayET")), ("month", Field("rtMonthET"))]),
            ),
        ]),
    ),
    (
        "forecast",
        Group(&[
            ("text", Field("rtForecast")),
            ("icon", Field("rtForeIcon")),
            ("rule", Field("rtForeRule")),
        ]),
    ),
    (
        "batteries",
        Group(&[
            ("consoleVoltageLevel", Field("rtBattVoltage")),
            ("transmitterVoltageLevel", Field("rtXmitBattt")),
        ]),
    ),
    ("thswIndex", Tagged(THSW_KEY, Q::Temperature)),
];

// Shared shapes of the highs/lows record.
macro_rules! at {
    ($value:expr, $time:literal) => {
        Group(&[("value", $value), ("time", Field($time))])
    };
}

const HIGHLOW: Table = &[
    (
        "pressure",
        Group(&[
            (
                "day",
                Group(&[
                    ("low", at!(Tagged("hlBaroLoDay", Q::Pressure), "hlBaroLoTime")),
                    ("high", at!(Tagged("hlBaroHiDay", Q::Pressure), "hlBaroHiTime")),
                ]),
            ),
            (
                "month",
                Group(&[
                    ("low", Tagged("hlBaroLoMonth", Q::Pressure)),
                    ("high", Tagged("hlBaroHiMonth", Q::Pressure)),
                ]),
            ),
            (
                "year",
                Group(&[
                    ("low", Tagged("hlBaroLoYear", Q::Pressure)),
                    ("high", Tagged("hlBaroHiYear", Q::Pressure)),
                ]),
            ),
        ]),
    ),
    (
        "wind",
        Group(&[
            ("day", at!(Tagged("hlWindHiDay", Q::Wind), "hlWindHiTime")),
            ("month", Tagged("hlWindHiMonth", Q::Wind)),
            ("year", Tagged("hlWindHiYear", Q::Wind)),
        ]),
    ),
    (
        "windChill",
        Group(&[
            (
                "day",
                at!(Tagged("hlChillLoDay", Q::Temperature), "hlChillLoTime"),
            ),
            ("month", Tagged("hlChillLoMonth", Q::Temperature)),
            ("year", Tagged("hlChillLoYear", Q::Temperature)),
        ]),
    ),
    (
        "dewpoint",
        Group(&[
            (
                "day",
                Group(&[
                    ("low", at!(Tagged("hlDewLoDay", Q::Temperature), "hlDewLoTime")),
                    ("high", at!(Tagged("hlDewHiDay", Q::Temperature), "hlDewHiTime")),
                ]),
            ),
            (
                "month",
                Group(&[
                    ("low", Tagged("hlDewLoMonth", Q::Temperature)),
                    ("high", Tagged("hlDewHiMonth", Q::Temperature)),
                ]),
            ),
            (
                "year",
                Group(&[
                    ("low", Tagged("hlDewLoYear", Q::Temperature)),
                    ("high", Tagged("hlDewHiYear", Q::Temperature)),
                ]),
            ),
        ]),
    ),
    (
        "heatIndex",
        Group(&[
            (
                "day",
                at!(Tagged("hlHeatHiDay", Q::Temperature), "hlHeatHiTime"),
            ),
            ("month", Tagged("hlHeatHiMonth", Q::Temperature)),
            ("year", Tagged("hlHeatHiYear", Q::Temperature)),
        ]),
    ),
    (
        "solarRadiation",
        Group(&[
            (
                "day",
                at!(Tagged("hlSolarHiDay", Q::SolarRadiation), "hlSolarHiTime"),
            ),
            ("month", Tagged("hlSolarHiMonth", Q::SolarRadiation)),
            ("year", Tagged("hlSolarHiYear", Q::SolarRadiation)),
        ]),
    ),
    (
        "uvLevel",
        Group(&[
            ("day", at!(Field("hlUVHiDay"), "hlUVHiTime")),
            ("month", Field("hlUVHiMonth")),
            ("year", Field("hlUVHiYear")),
        ]),
    ),
    (
        "rainRate",
        Group(&[
            (
                "day",
                at!(Tagged("hlRainRateHiDay", Q::Rain), "hlRainRateHiTime"),
            ),
            ("month", Tagged("hlRainRateHiMonth", Q::Rain)),
            ("year", Tagged("hlRainRateHiYear", Q::Rain)),
        ]),
    ),
    (
        "temperature",
        Group(&[
            (
                "inside",
                Group(&[
                    (
                        "day",
                        Group(&[
                            (
                                "low",
                                at!(Tagged("hlInTempLoDay", Q::Temperature), "hlInTempLoTime"),
                            ),
                            (
                                "high",
                                at!(Tagged("hlInTempHiDay", Q::Temperature), "hlInTempHiTime"),
                            ),
                        ]),
                    ),
                    (
                        "month",
                        Group(&[
                            ("low", Tagged("hlInTempLoMonth", Q::Temperature)),
                            ("high", Tagged("hlInTempHiMonth", Q::Temperature)),
                        ]),
                    ),
                    (
                        "year",
                        Group(&[
                            ("low", Tagged("hlInTempLoYear", Q::Temperature)),
                            ("high", Tagged("hlInTempHiYear", Q::Temperature)),
                        ]),
                    ),
                ]),
            ),
            (
                "outside",
                Group(&[
                    (
                        "day",
                        Group(&[
                            (
                                "low",
                                at!(Tagged("hlOutTempLoDay", Q::Temperature), "hlOutTempLoTime"),
                            ),
                            (
                                "high",
                                at!(Tagged("hlOutTempHiDay", Q::Temperature), "hlOutTempHiTime"),
                            ),
                        ]),
                    ),
                    (
                        "month",
                        Group(&[
                            ("low", Tagged("hlOutTempLoMonth", Q::Temperature)),
                            ("high", Tagged("hlOutTempHiMonth", Q::Temperature)),
                        ]),
                    ),
                    (
                        "year",
                        Group(&[
                            ("low", Tagged("hlOutTempLoYear", Q::Temperature)),
                            ("high", Tagged("hlOutTempHiYear", Q::Temperature)),
                        ]),
                    ),
                ]),
            ),
        ]),
    ),
    (
        "humidity",
        Group(&[(
            "inside",
            Group(&[
                (
                    "day",
                    Group(&[
                        ("low", at!(Field("hlInHumLoDay"), "hlInHumLoTime")),
                        ("high", at!(Field("hlInHumHiDay"), "hlInHumHiTime")),
                    ]),
                ),
                (
                    "month",
                    Group(&[
                        ("low", Field("hlInHumLoMonth")),
                        ("high", Field("hlInHumHiMonth")),
                    ]),
                ),
                (
                    "year",
                    Group(&[
                        ("low", Field("hlInHumLoYear")),
                        ("high", Field("hlInHumHiYear")),
                    ]),
                ),
            ]),
        )]),
    ),
];

const TIME: Table = &[("time", Field(crate::parse::TIMESTAMP_KEY))];
const MODEL: Table = &[("model", Field("Model"))];

const WIND_CHILL_KEY: &str = "rtWindChill";
const OUTSIDE_TEMP_KEY: &str = "rtOutsideTemp";
const GUST_KEY: &str = "rtWind10mGustMaxSpeed";
const SOLAR_KEY: &str = "rtSolarRad";
const THSW_KEY: &str = "rtThswIndex";

/// NWS wind chill in °F from air temperature (°F) and wind speed (mph),
/// never above the air temperature.
pub fn wind_chill(temp_f: f64, wind_mph: f64) -> f64 {
    let chill = 35.74 + 0.6215 * temp_f + (0.4275 * temp_f - 35.75) * wind_mph.powf(0.16);
    chill.min(temp_f)
}

/// The console reports a negative sentinel when it has no chill reading.
fn correct_wind_chill(record: &mut TelemetryRecord) {
    let Some(reported) = record.number(WIND_CHILL_KEY) else {
        return;
    };
    if reported >= 0.0 {
        return;
    }
    let corrected = match (record.number(OUTSIDE_TEMP_KEY), record.number(GUST_KEY)) {
        (Some(t), Some(g)) => Scalar::Number(wind_chill(t, g)),
        _ => Scalar::Null,
    };
    debug!(reported, ?corrected, "recomputing wind chill");
    record.insert(WIND_CHILL_KEY, corrected);
}

fn prepare_realtime(record: &TelemetryRecord) -> TelemetryRecord {
    let mut record = record.clone();
    correct_wind_chill(&mut record);
    // THSW needs the solar sensor
    if record.number(SOLAR_KEY).is_none() {
        record.insert(THSW_KEY, Scalar::Null);
    }
    record
}

/// Map a parsed record onto the consumer shape for `kind`.
///
/// Every template field is present in the result. Tagged leaves carry the
/// console's native units, i.e. the default preset.
pub fn map_record(kind: RecordKind, record: &TelemetryRecord) -> UnitAwareTree {
    let native = UnitRegistry::global().preset(None);
    let (table, source) = match kind {
        RecordKind::Realtime => (REALTIME, Cow::Owned(prepare_realtime(record))),
        RecordKind::HighLow => (HIGHLOW, Cow::Borrowed(record)),
        RecordKind::Time => (TIME, Cow::Borrowed(record)),
        RecordKind::Model => (MODEL, Cow::Borrowed(record)),
    };
    let root = build(table, &source, &native);
    UnitAwareTree::new(root, Some(DEFAULT_PRESET.to_string()))
}

fn build(table: Table, record: &TelemetryRecord, native: &UnitPreset) -> Node {
    Node::Branch(
        table
            .iter()
            .map(|(name, t)| (name.to_string(), build_node(t, record, native)))
            .collect(),
    )
}

fn build_node(template: &Template, record: &TelemetryRecord, native: &UnitPreset) -> Node {
    match template {
        Field(key) => Node::Plain(record.get(key).cloned().unwrap_or(Scalar::Null)),
        Tagged(key, quantity) => Node::Tagged(TaggedValue::new(
            native.unit_for(*quantity),
            tagged_number(key, record),
        )),
        Group(children) => build(children, record, native),
    }
}

fn tagged_number(key: &str, record: &TelemetryRecord) -> Option<f64> {
    match record.get(key) {
        Some(Scalar::Number(n)) => Some(*n),
        None | Some(Scalar::Null) => None,
        Some(other) => {
            warn!(key, value = ?other, "non-numeric value in a unit-tagged field");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_telemetry;
    use crate::tree::UnitTarget;
    use crate::units::{Unit, UnitOverrides};
    use serde_json::json;

    const REALTIME_SAMPLE: &str = include_str!("../testdata/getRealtime.txt");
    const HIGHLOW_SAMPLE: &str = include_str!("../testdata/getHighLow.txt");

    fn map(kind: RecordKind, raw: &str) -> UnitAwareTree {
        map_record(kind, &parse_telemetry(raw, kind.delimiter()))
    }

    #[test]
    fn maps_pressure_and_rain_flag() {
        let tree = map(RecordKind::Realtime, "rtBaroCurr = 29.952\nrtIsRaining = no");
        let plain = tree.to_plain_values(false);
        assert_eq!(plain["pressure"]["current"], json!(29.952));
        assert_eq!(plain["rain"]["isRaining"], json!(false));
        assert_eq!(plain["wind"]["speed"]["current"], json!(null));
        let current = tree.get("pressure.current").and_then(Node::as_tagged).unwrap();
        assert_eq!(current.unit(), Unit::InHg);
    }

    #[test]
    fn empty_record_yields_full_shape() {
        let a = map(RecordKind::Realtime, "");
        let b = map(RecordKind::Realtime, REALTIME_SAMPLE);
        assert!(a.same_shape(&b));
        assert_eq!(a.tagged_leaves().len(), b.tagged_leaves().len());
        assert!(a.tagged_leaves().iter().all(|(_, t)| t.value().is_none()));
    }

    #[test]
    fn eu_preset_converts_temperature() {
        let tree = map(RecordKind::Realtime, "rtOutsideTemp = 68");
        let eu = tree.apply_units(&UnitTarget::named_preset("eu")).unwrap();
        let t = eu.get("temperature.outside").and_then(Node::as_tagged).unwrap();
        assert_eq!(t.unit(), Unit::Celsius);
        assert!((t.value().unwrap() - 20.0).abs() < 1e-9);
    }

    /// Walk both trees in step and count the leaves that were compared.
    fn assert_only_temperature_changed(before: &Node, after: &Node, path: &str) -> (usize, usize) {
        match (before, after) {
            (Node::Plain(a), Node::Plain(b)) => {
                assert_eq!(a, b, "{path}");
                (1, 0)
            }
            (Node::Tagged(a), Node::Tagged(b)) if a.quantity() == Q::Temperature => {
                assert_eq!(b.unit(), Unit::Celsius, "{path}");
                (0, 0)
            }
            (Node::Tagged(a), Node::Tagged(b)) => {
                assert_eq!(a, b, "{path}");
                (0, 1)
            }
            (Node::Branch(xs), Node::Branch(ys)) => {
                assert_eq!(xs.len(), ys.len(), "{path}");
                xs.iter().zip(ys).fold((0, 0), |acc, ((ka, a), (kb, b))| {
                    assert_eq!(ka, kb, "{path}");
                    let n = assert_only_temperature_changed(a, b, &format!("{path}.{ka}"));
                    (acc.0 + n.0, acc.1 + n.1)
                })
            }
            (Node::List(xs), Node::List(ys)) => {
                assert_eq!(xs.len(), ys.len(), "{path}");
                xs.iter().zip(ys).enumerate().fold((0, 0), |acc, (i, (a, b))| {
                    let n = assert_only_temperature_changed(a, b, &format!("{path}.{i}"));
                    (acc.0 + n.0, acc.1 + n.1)
                })
            }
            (a, b) => panic!("{path}: {a:?} became {b:?}"),
        }
    }

    #[test]
    fn celsius_override_leaves_other_realtime_fields_alone() {
        let tree = map(RecordKind::Realtime, REALTIME_SAMPLE);
        let celsius = tree
            .apply_units(&UnitOverrides::new().with(Unit::Celsius).into())
            .unwrap();
        let (plain, tagged) =
            assert_only_temperature_changed(tree.get("").unwrap(), celsius.get("").unwrap(), "");
        assert!(plain > 0 && tagged > 0);

        let outside = celsius.get("temperature.outside").and_then(Node::as_tagged).unwrap();
        assert!((outside.value().unwrap() - (58.6 - 32.0) * 5.0 / 9.0).abs() < 1e-9);
        assert_eq!(celsius.preset_name(), None);
    }

    #[test]
    fn plain_output_follows_template_order() {
        let plain = map(RecordKind::Realtime, REALTIME_SAMPLE).to_plain_values(false);
        let keys: Vec<&str> = plain.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "nextArchiveRecord",
                "pressure",
                "wind",
                "humidity",
                "temperature",
                "rain",
                "storm",
                "sun",
                "forecast",
                "batteries",
                "thswIndex",
            ]
        );
        let pressure: Vec<&String> = plain["pressure"].as_object().unwrap().keys().collect();
        assert_eq!(pressure, ["current", "trend", "image"]);
    }

    #[test]
    fn negative_wind_chill_is_recomputed() {
        let tree = map(RecordKind::Realtime, REALTIME_SAMPLE);
        let chill = tree.get("wind.chill").and_then(Node::as_tagged).unwrap();
        let expected = wind_chill(58.6, 9.0);
        assert_eq!(chill.value(), Some(expected));
        assert!(expected <= 58.6);

        let tree = map(RecordKind::Realtime, "rtWindChill = -1\nrtOutsideTemp = 20");
        let chill = tree.get("wind.chill").and_then(Node::as_tagged).unwrap();
        assert_eq!(chill.value(), None);

        let tree = map(RecordKind::Realtime, "rtWindChill = 12");
        let chill = tree.get("wind.chill").and_then(Node::as_tagged).unwrap();
        assert_eq!(chill.value(), Some(12.0));
    }

    #[test]
    fn wind_chill_formula() {
        // 0 °F at 15 mph is -19 °F on the NWS chart
        assert!((wind_chill(0.0, 15.0) - -19.4).abs() < 0.1);
        assert_eq!(wind_chill(70.0, 0.0), 70.0);
    }

    #[test]
    fn thsw_requires_solar_sensor() {
        let tree = map(RecordKind::Realtime, "rtThswIndex = 61\nrtSolarRad = 312");
        assert_eq!(tree.to_plain_values(false)["thswIndex"], json!(61.0));
        let tree = map(RecordKind::Realtime, "rtThswIndex = 61\nrtSolarRad = n/a");
        assert_eq!(tree.to_plain_values(false)["thswIndex"], json!(null));
    }

    #[test]
    fn text_in_tagged_slot_becomes_none() {
        let tree = map(RecordKind::Realtime, "rtBaroCurr = ---");
        let p = tree.get("pressure.current").and_then(Node::as_tagged).unwrap();
        assert_eq!(p.value(), None);
        assert_eq!(p.unit(), Unit::InHg);
    }

    #[test]
    fn highlow_sample() {
        let tree = map(RecordKind::HighLow, HIGHLOW_SAMPLE);
        let plain = tree.to_plain_values(false);
        assert_eq!(plain["pressure"]["day"]["low"]["value"], json!(29.901));
        assert_eq!(plain["pressure"]["day"]["low"]["time"], json!("04:12"));
        assert_eq!(plain["humidity"]["inside"]["year"]["low"], json!(22.0));
        assert_eq!(plain["uvLevel"]["day"]["value"], json!(4.2));
        let heat = tree.get("heatIndex.day.value").and_then(Node::as_tagged).unwrap();
        assert_eq!(heat.unit(), Unit::Fahrenheit);
        assert!(tree.get("humidity.inside.day.low.value").and_then(Node::as_tagged).is_none());
    }

    #[test]
    fn time_and_model_shapes() {
        let tree = map(RecordKind::Time, "DavisTime = 2020-09-16 10:40:02");
        assert_eq!(tree.to_plain_values(false), json!({"time": "2020-09-16T10:40:02"}));
        let tree = map(RecordKind::Model, "Model: Vantage Pro 2");
        assert_eq!(tree.to_plain_values(false), json!({"model": "Vantage Pro 2"}));
    }

    #[test]
    fn record_kind_names() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.name().parse::<RecordKind>().unwrap(), kind);
        }
        assert_eq!(serde_json::to_string(&RecordKind::HighLow).unwrap(), "\"highlow\"");
        assert_eq!(RecordKind::Model.delimiter(), Delimiter::Colon);
    }
}
