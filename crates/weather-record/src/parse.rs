use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::{debug, trace};

/// Keys whose values must stay text even when they look numeric. The archive
/// pointer is a zero-padded hex-ish identifier, not a quantity.
const NEVER_NUMERIC_KEYS: &[&str] = &["rtNextArchiveRecord"];

/// Key carrying the console clock.
pub const TIMESTAMP_KEY: &str = "DavisTime";

const NULL_SENTINEL: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `key = value`, used by every query except the model query.
    Equals,
    /// `Key: value`
    Colon,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Equals => '=',
            Delimiter::Colon => ':',
        }
    }
}

/// A single parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(PrimitiveDateTime),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => number_to_json(Some(*n)),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Timestamp(ts) => Value::String(format_timestamp(ts)),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) => serializer.serialize_f64(*n),
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
        }
    }
}

pub(crate) fn number_to_json(n: Option<f64>) -> serde_json::Value {
    n.and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn format_timestamp(ts: &PrimitiveDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}

fn parse_timestamp(s: &str) -> Option<PrimitiveDateTime> {
    let formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]/[month]/[day] [hour]:[minute]:[second]"),
        format_description!("[month]/[day]/[year] [hour]:[minute]:[second]"),
    ];
    formats
        .iter()
        .find_map(|f| PrimitiveDateTime::parse(s, f).ok())
}

/// Flat key → value mapping produced by one driver read. Insertion order is
/// kept so the raw view mirrors the driver output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    fields: Vec<(String, Scalar)>,
}

impl TelemetryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Scalar::as_f64)
    }

    /// Insert or replace; a replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Scalar) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Parse driver output into a flat record.
///
/// Every line is split at the first `delimiter`; lines without one, and lines
/// whose key is empty, are skipped. Values are coerced in this order: finite
/// number (unless the key is never numeric), `n/a` as null, `yes`/`no` as
/// booleans, the console clock as a timestamp, and trimmed text otherwise.
pub fn parse_telemetry(raw: &str, delimiter: Delimiter) -> TelemetryRecord {
    let mut record = TelemetryRecord::new();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(delimiter.as_char()) else {
            if !line.trim().is_empty() {
                trace!(line, "skipping line without delimiter");
            }
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            trace!(line, "skipping line with empty key");
            continue;
        }
        record.insert(key, coerce(key, value.trim()));
    }
    record
}

fn coerce(key: &str, value: &str) -> Scalar {
    if !NEVER_NUMERIC_KEYS.contains(&key) {
        if let Some(n) = value.parse::<f64>().ok().filter(|n| n.is_finite()) {
            return Scalar::Number(n);
        }
    }
    match value {
        NULL_SENTINEL => Scalar::Null,
        "yes" => Scalar::Bool(true),
        "no" => Scalar::Bool(false),
        _ if key == TIMESTAMP_KEY => match parse_timestamp(value) {
            Some(ts) => Scalar::Timestamp(ts),
            None => {
                debug!(value, "unrecognised console time format");
                Scalar::Text(value.to_string())
            }
        },
        _ => Scalar::Text(value.to_string()),
    }
}
