//! station-session: resilient access to a Vantage console
//!
//! A [`DeviceSession`] sends each query through [`ResilientInvoker`], parses
//! and maps the reply, and hands back a [`weather_record::UnitAwareTree`]
//! expressed in the configured units.

mod retry;
pub use retry::{Outcome, ResilientInvoker, RetryPolicy, Retryable, DEFAULT_MAX_TRIES};

mod config;
pub use config::{load_config_file, SessionConfig};

mod metrics;
pub use metrics::{InvokeMetrics, MetricsHub};

mod session;
pub use session::{DeviceSession, SessionError};
