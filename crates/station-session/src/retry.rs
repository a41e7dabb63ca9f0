//! Bounded, strictly sequential retries around a flaky call.

use crate::metrics::MetricsHub;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_MAX_TRIES: u32 = 20;

/// Splits failures into those worth another attempt and those that are not.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub log_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            log_errors: false,
        }
    }
}

impl RetryPolicy {
    /// `max_tries` below one is raised to one.
    pub fn new(max_tries: u32, log_errors: bool) -> Self {
        Self {
            max_tries: max_tries.max(1),
            log_errors,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_tries.max(1)
    }
}

/// Result of a retried call that did not hit a permanent error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { attempts: u32 },
}

impl<T> Outcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. } | Outcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Success { value, .. } => Some(value),
            Outcome::Exhausted { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success { value, attempts } => Outcome::Success {
                value: f(value),
                attempts,
            },
            Outcome::Exhausted { attempts } => Outcome::Exhausted { attempts },
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Outcome<U>, E> {
        Ok(match self {
            Outcome::Success { value, attempts } => Outcome::Success {
                value: f(value)?,
                attempts,
            },
            Outcome::Exhausted { attempts } => Outcome::Exhausted { attempts },
        })
    }
}

#[derive(Clone, Default)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
    metrics: Option<MetricsHub>,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `attempt` until it succeeds, fails permanently, or the policy's
    /// attempt budget is spent. Attempts are numbered from 1 and run back to
    /// back without delay.
    pub async fn invoke<T, E, F, Fut>(&self, op: &str, mut attempt: F) -> Result<Outcome<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let call_id = Uuid::new_v4();
        let max = self.policy.attempts();
        let span = info_span!("invoke", op, %call_id);
        async {
            for n in 1..=max {
                self.count(op, |m| &m.attempts);
                match attempt(n).await {
                    Ok(value) => {
                        debug!(attempt = n, "call succeeded");
                        self.count(op, |m| &m.successes);
                        return Ok(Outcome::Success { value, attempts: n });
                    }
                    Err(e) if e.is_transient() => {
                        self.count(op, |m| &m.failed_attempts);
                        if self.policy.log_errors {
                            warn!(attempt = n, max, error = %e, "attempt failed");
                        } else {
                            debug!(attempt = n, max, error = %e, "attempt failed");
                        }
                    }
                    Err(e) => {
                        warn!(attempt = n, error = %e, "permanent failure, not retrying");
                        return Err(e);
                    }
                }
            }
            info!(attempts = max, "no result after max tries");
            self.count(op, |m| &m.exhausted);
            Ok(Outcome::Exhausted { attempts: max })
        }
        .instrument(span)
        .await
    }

    fn count(
        &self,
        op: &str,
        pick: impl FnOnce(&crate::metrics::InvokeMetrics) -> &prometheus::IntCounterVec,
    ) {
        if let Some(hub) = &self.metrics {
            pick(&hub.invoke).with_label_values(&[op]).inc();
        }
    }
}
