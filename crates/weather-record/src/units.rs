//! Unit catalog and conversion arithmetic.
//!
//! The set of quantities and units is closed: every [`Unit`] belongs to exactly
//! one [`QuantityType`], and conversions are only defined between units of the
//! same quantity. The catalog lives in a `static` and is read-only for the
//! lifetime of the process.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("cannot convert from {from} to {to}")]
    UnsupportedConversion { from: Unit, to: Unit },
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
    #[error("unknown quantity type: {0}")]
    UnknownQuantity(String),
    #[error("{unit} is not a unit of {quantity}")]
    QuantityMismatch { quantity: QuantityType, unit: Unit },
    #[error("unit assignment has no unit for {0}")]
    IncompletePreset(QuantityType),
}

/// Physical dimension grouping mutually convertible units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuantityType {
    Wind,
    Temperature,
    Pressure,
    Rain,
    SolarRadiation,
    SoilMoisture,
}

impl QuantityType {
    pub const ALL: [QuantityType; 6] = [
        QuantityType::Wind,
        QuantityType::Temperature,
        QuantityType::Pressure,
        QuantityType::Rain,
        QuantityType::SolarRadiation,
        QuantityType::SoilMoisture,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QuantityType::Wind => "wind",
            QuantityType::Temperature => "temperature",
            QuantityType::Pressure => "pressure",
            QuantityType::Rain => "rain",
            QuantityType::SolarRadiation => "solarRadiation",
            QuantityType::SoilMoisture => "soilMoisture",
        }
    }
}

impl fmt::Display for QuantityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuantityType {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wind" => Ok(QuantityType::Wind),
            "temperature" | "temp" => Ok(QuantityType::Temperature),
            "pressure" | "pres" => Ok(QuantityType::Pressure),
            "rain" => Ok(QuantityType::Rain),
            "solarradiation" | "solar-radiation" | "solar_radiation" | "slra" => {
                Ok(QuantityType::SolarRadiation)
            }
            "soilmoisture" | "soil-moisture" | "soil_moisture" | "soil" => {
                Ok(QuantityType::SoilMoisture)
            }
            _ => Err(UnitError::UnknownQuantity(s.to_string())),
        }
    }
}

/// A unit symbol. Serialized as its display symbol (`"°C"`, `"km/h"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Mph,
    Kmh,
    MetersPerSecond,
    Knots,
    Fahrenheit,
    Celsius,
    InHg,
    HectoPascal,
    Bar,
    Cups,
    Millimeters,
    Inches,
    WattsPerSquareMeter,
    Centibar,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Mph => "mp/h",
            Unit::Kmh => "km/h",
            Unit::MetersPerSecond => "m/s",
            Unit::Knots => "kt",
            Unit::Fahrenheit => "°F",
            Unit::Celsius => "°C",
            Unit::InHg => "inHg",
            Unit::HectoPascal => "hPa",
            Unit::Bar => "bar",
            Unit::Cups => "cups",
            Unit::Millimeters => "mm",
            Unit::Inches => "in",
            Unit::WattsPerSquareMeter => "W/m²",
            Unit::Centibar => "cb",
        }
    }

    /// ASCII spellings accepted on input besides the symbol.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Unit::Mph => &["mph"],
            Unit::Kmh => &["kmh", "kph"],
            Unit::MetersPerSecond => &["ms", "mps"],
            Unit::Knots => &["kn", "knots"],
            Unit::Fahrenheit => &["F", "degF", "fahrenheit"],
            Unit::Celsius => &["C", "degC", "celsius"],
            Unit::InHg => &["inhg"],
            Unit::HectoPascal => &["hpa", "mbar"],
            Unit::Bar => &[],
            Unit::Cups => &["cup"],
            Unit::Millimeters => &[],
            Unit::Inches => &["inch", "inches"],
            Unit::WattsPerSquareMeter => &["W/m2", "wm2"],
            Unit::Centibar => &["cbar"],
        }
    }

    pub fn quantity(self) -> QuantityType {
        match self {
            Unit::Mph | Unit::Kmh | Unit::MetersPerSecond | Unit::Knots => QuantityType::Wind,
            Unit::Fahrenheit | Unit::Celsius => QuantityType::Temperature,
            Unit::InHg | Unit::HectoPascal | Unit::Bar => QuantityType::Pressure,
            Unit::Cups | Unit::Millimeters | Unit::Inches => QuantityType::Rain,
            Unit::WattsPerSquareMeter => QuantityType::SolarRadiation,
            Unit::Centibar => QuantityType::SoilMoisture,
        }
    }

    fn matches(self, s: &str) -> bool {
        self.symbol() == s || self.aliases().contains(&s)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitRegistry::global().classify(s)
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One unit per quantity. The fields are private so a preset can only be
/// built with each unit under its own quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPreset {
    wind: Unit,
    temperature: Unit,
    pressure: Unit,
    rain: Unit,
    solar_radiation: Unit,
    soil_moisture: Unit,
}

impl UnitPreset {
    /// Builds a preset from a complete assignment.
    pub fn from_assignment(units: &UnitOverrides) -> Result<Self, UnitError> {
        let pick = |q: QuantityType| units.get(q).ok_or(UnitError::IncompletePreset(q));
        Ok(Self {
            wind: pick(QuantityType::Wind)?,
            temperature: pick(QuantityType::Temperature)?,
            pressure: pick(QuantityType::Pressure)?,
            rain: pick(QuantityType::Rain)?,
            solar_radiation: pick(QuantityType::SolarRadiation)?,
            soil_moisture: pick(QuantityType::SoilMoisture)?,
        })
    }

    pub fn unit_for(&self, quantity: QuantityType) -> Unit {
        match quantity {
            QuantityType::Wind => self.wind,
            QuantityType::Temperature => self.temperature,
            QuantityType::Pressure => self.pressure,
            QuantityType::Rain => self.rain,
            QuantityType::SolarRadiation => self.solar_radiation,
            QuantityType::SoilMoisture => self.soil_moisture,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (QuantityType, Unit)> + '_ {
        QuantityType::ALL.into_iter().map(|q| (q, self.unit_for(q)))
    }
}

impl Serialize for UnitPreset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter().map(|(q, u)| (q.name(), u.symbol())))
    }
}

/// A partial quantity → unit assignment. Every entry is keyed by its unit's
/// own quantity, so a mismatched pair cannot be stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitOverrides {
    units: BTreeMap<QuantityType, Unit>,
}

impl UnitOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, unit: Unit) -> Self {
        self.units.insert(unit.quantity(), unit);
        self
    }

    /// Assign `unit` to `quantity`, rejecting a unit of another quantity.
    pub fn set(&mut self, quantity: QuantityType, unit: Unit) -> Result<(), UnitError> {
        if unit.quantity() != quantity {
            return Err(UnitError::QuantityMismatch { quantity, unit });
        }
        self.units.insert(quantity, unit);
        Ok(())
    }

    /// Parse and apply one `quantity=symbol` assignment.
    pub fn set_from_str(&mut self, assignment: &str) -> Result<(), UnitError> {
        let (quantity, unit) = match assignment.split_once('=') {
            Some((q, u)) => (q.parse::<QuantityType>()?, u.trim().parse::<Unit>()?),
            None => {
                let unit = assignment.trim().parse::<Unit>()?;
                (unit.quantity(), unit)
            }
        };
        self.set(quantity, unit)
    }

    pub fn get(&self, quantity: QuantityType) -> Option<Unit> {
        self.units.get(&quantity).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QuantityType, Unit)> + '_ {
        self.units.iter().map(|(q, u)| (*q, *u))
    }
}

impl<'de> Deserialize<'de> for UnitOverrides {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<QuantityType, Unit>::deserialize(deserializer)?;
        let mut out = UnitOverrides::new();
        for (quantity, unit) in raw {
            out.set(quantity, unit).map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}

/// Name of the preset used when none (or an unknown one) is requested. It is
/// also the unit system the console reports in.
pub const DEFAULT_PRESET: &str = "default";

const US: UnitPreset = UnitPreset {
    wind: Unit::Mph,
    temperature: Unit::Fahrenheit,
    pressure: Unit::InHg,
    rain: Unit::Cups,
    solar_radiation: Unit::WattsPerSquareMeter,
    soil_moisture: Unit::Centibar,
};

const EU: UnitPreset = UnitPreset {
    wind: Unit::Kmh,
    temperature: Unit::Celsius,
    pressure: Unit::HectoPascal,
    rain: Unit::Millimeters,
    solar_radiation: Unit::WattsPerSquareMeter,
    soil_moisture: Unit::Centibar,
};

const CATALOG: &[(QuantityType, &[Unit])] = &[
    (
        QuantityType::Wind,
        &[Unit::Mph, Unit::Kmh, Unit::MetersPerSecond, Unit::Knots],
    ),
    (QuantityType::Temperature, &[Unit::Fahrenheit, Unit::Celsius]),
    (
        QuantityType::Pressure,
        &[Unit::InHg, Unit::HectoPascal, Unit::Bar],
    ),
    (
        QuantityType::Rain,
        &[Unit::Cups, Unit::Millimeters, Unit::Inches],
    ),
    (QuantityType::SolarRadiation, &[Unit::WattsPerSquareMeter]),
    (QuantityType::SoilMoisture, &[Unit::Centibar]),
];

const PRESETS: &[(&str, UnitPreset)] = &[(DEFAULT_PRESET, US), ("us", US), ("eu", EU)];

// Conversion constants. Each reverse direction divides by the same factor.
const HPA_PER_INHG: f64 = 33.86389;
const BAR_PER_INHG: f64 = 0.03386389;
const HPA_PER_BAR: f64 = 1000.0;
const KMH_PER_MPH: f64 = 1.609344;
const MPS_PER_MPH: f64 = 0.44704;
const KT_PER_KMH: f64 = 0.53996;
const MPH_PER_KT: f64 = 1.15078;
const MPS_PER_KT: f64 = 0.514444444444;
const KMH_PER_MPS: f64 = 3.6;
// Tipping-bucket calibration of the station: one cup is 0.2 mm of rain
const MM_PER_CUP: f64 = 0.2;
const CUPS_PER_INCH: f64 = 127.0;
const MM_PER_INCH: f64 = 25.4;

static REGISTRY: UnitRegistry = UnitRegistry {
    catalog: CATALOG,
    presets: PRESETS,
};

/// Read-only catalog of quantities, units and named presets.
pub struct UnitRegistry {
    catalog: &'static [(QuantityType, &'static [Unit])],
    presets: &'static [(&'static str, UnitPreset)],
}

impl UnitRegistry {
    pub fn global() -> &'static UnitRegistry {
        &REGISTRY
    }

    pub fn units_of(&self, quantity: QuantityType) -> &'static [Unit] {
        self.catalog
            .iter()
            .find(|(q, _)| *q == quantity)
            .map(|(_, units)| *units)
            .unwrap_or(&[])
    }

    /// Resolve a preset by name, falling back to [`DEFAULT_PRESET`] for an
    /// unknown or missing name.
    pub fn preset(&self, name: Option<&str>) -> UnitPreset {
        if let Some(name) = name {
            if let Some(p) = self.lookup_preset(name) {
                return p;
            }
            debug!(preset = name, "unknown unit preset, using default");
        }
        self.lookup_preset(DEFAULT_PRESET).unwrap_or(US)
    }

    pub fn lookup_preset(&self, name: &str) -> Option<UnitPreset> {
        self.presets
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(_, p)| *p)
    }

    pub fn presets(&self) -> &'static [(&'static str, UnitPreset)] {
        self.presets
    }

    /// Find the unit a symbol (or alias) stands for.
    pub fn classify(&self, symbol: &str) -> Result<Unit, UnitError> {
        let s = symbol.trim();
        self.catalog
            .iter()
            .flat_map(|(_, units)| units.iter().copied())
            .find(|u| u.matches(s))
            .ok_or_else(|| UnitError::UnknownUnit(s.to_string()))
    }

    pub fn convert(&self, value: f64, from: Unit, to: Unit) -> Result<f64, UnitError> {
        use Unit::*;
        if from == to {
            return Ok(value);
        }
        let out = match (from, to) {
            (InHg, HectoPascal) => value * HPA_PER_INHG,
            (InHg, Bar) => value * BAR_PER_INHG,
            (HectoPascal, InHg) => value / HPA_PER_INHG,
            (HectoPascal, Bar) => value / HPA_PER_BAR,
            (Bar, HectoPascal) => value * HPA_PER_BAR,
            (Bar, InHg) => value / BAR_PER_INHG,

            (Fahrenheit, Celsius) => (value - 32.0) * (5.0 / 9.0),
            (Celsius, Fahrenheit) => value * 1.8 + 32.0,

            (Mph, Kmh) => value * KMH_PER_MPH,
            (Mph, MetersPerSecond) => value * MPS_PER_MPH,
            (Mph, Knots) => value / MPH_PER_KT,
            (Kmh, Mph) => value / KMH_PER_MPH,
            (Kmh, MetersPerSecond) => value / KMH_PER_MPS,
            (Kmh, Knots) => value * KT_PER_KMH,
            (MetersPerSecond, Mph) => value / MPS_PER_MPH,
            (MetersPerSecond, Kmh) => value * KMH_PER_MPS,
            (MetersPerSecond, Knots) => value / MPS_PER_KT,
            (Knots, Mph) => value * MPH_PER_KT,
            (Knots, Kmh) => value / KT_PER_KMH,
            (Knots, MetersPerSecond) => value * MPS_PER_KT,

            (Cups, Millimeters) => value * MM_PER_CUP,
            (Cups, Inches) => value / CUPS_PER_INCH,
            (Millimeters, Cups) => value / MM_PER_CUP,
            (Millimeters, Inches) => value / MM_PER_INCH,
            (Inches, Cups) => value * CUPS_PER_INCH,
            (Inches, Millimeters) => value * MM_PER_INCH,

            _ => return Err(UnitError::UnsupportedConversion { from, to }),
        };
        Ok(out)
    }
}
