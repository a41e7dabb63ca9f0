//! weather-record: typed telemetry records with unit-aware conversion

mod units;
pub use units::{
    QuantityType, Unit, UnitError, UnitOverrides, UnitPreset, UnitRegistry, DEFAULT_PRESET,
};

mod parse;
pub use parse::{parse_telemetry, Delimiter, Scalar, TelemetryRecord, TIMESTAMP_KEY};

mod tree;
pub use tree::{Node, TaggedValue, UnitAwareTree, UnitTarget};

mod schema;
pub use schema::{map_record, wind_chill, RecordKind};
