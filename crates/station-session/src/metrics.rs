use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Per-operation counters of the retry loop, labelled by `op`.
#[derive(Clone)]
pub struct InvokeMetrics {
    pub attempts: IntCounterVec,
    pub failed_attempts: IntCounterVec,
    pub successes: IntCounterVec,
    pub exhausted: IntCounterVec,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub invoke: InvokeMetrics,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), &["op"])
}

impl MetricsHub {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let invoke = InvokeMetrics {
            attempts: counter("vp_driver_attempts_total", "Driver invocations attempted")?,
            failed_attempts: counter(
                "vp_driver_failed_attempts_total",
                "Driver invocations that failed transiently",
            )?,
            successes: counter("vp_operations_succeeded_total", "Operations that produced a result")?,
            exhausted: counter(
                "vp_operations_exhausted_total",
                "Operations that ran out of attempts",
            )?,
        };
        registry.register(Box::new(invoke.attempts.clone()))?;
        registry.register(Box::new(invoke.failed_attempts.clone()))?;
        registry.register(Box::new(invoke.successes.clone()))?;
        registry.register(Box::new(invoke.exhausted.clone()))?;
        Ok(Self { registry, invoke })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
