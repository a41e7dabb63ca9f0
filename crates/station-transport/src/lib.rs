//! station-transport: access to a Davis Vantage console through the external
//! `vproweather` driver.
//!
//! The console is only reachable through that driver, which owns the serial
//! line. This crate wraps one driver invocation behind [`StationDriver`] and
//! ships two implementations: the real process driver and a sample driver that
//! replays recorded output. The default build enables both.

mod types;
pub use types::{DriverCommand, PortInfo};

mod error;
pub use error::{DriverError, Result};

mod traits;
pub use traits::StationDriver;

#[cfg(feature = "sample")]
mod sample;

#[cfg(feature = "sample")]
pub use sample::SampleDriver;

#[cfg(feature = "vproweather")]
mod vproweather;

#[cfg(feature = "vproweather")]
pub use vproweather::{VproweatherDriver, DEFAULT_DELAY, DEFAULT_TIMEOUT};

#[cfg(feature = "serial")]
mod ports;

#[cfg(feature = "serial")]
pub use ports::list_ports;
