//! Readiness polling
//!
//! Drives a probe at a fixed interval until it reports ready, fails, or the
//! total timeout elapses. Uses a constant-interval backoff policy so the
//! same primitive can serve other retry loops with a multiplier.

use crate::error::{Error, Result};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    /// Still transitioning; carries the observed state for diagnostics
    Pending(String),
}

/// Interval and bound of one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.interval)
            .with_max_interval(self.interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }
}

enum PollError {
    Pending(String),
    Failed(Error),
}

/// Poll `probe` until it is ready.
///
/// A probe error ends the loop immediately. When the timeout elapses the
/// last pending state is handed to `on_timeout` to build the error. A
/// cancelled `token` aborts the loop between or during probes.
pub async fn poll_until<T, F, Fut, E>(
    policy: PollPolicy,
    token: &CancellationToken,
    what: &str,
    mut probe: F,
    on_timeout: E,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
    E: FnOnce(String) -> Error,
{
    let operation = || {
        let attempt = probe();
        async move {
            match attempt.await {
                Ok(PollStatus::Ready(value)) => Ok(value),
                Ok(PollStatus::Pending(state)) => {
                    debug!("{} pending: {}", what, state);
                    Err(backoff::Error::transient(PollError::Pending(state)))
                }
                Err(e) => Err(backoff::Error::permanent(PollError::Failed(e))),
            }
        }
    };

    tokio::select! {
        result = backoff::future::retry(policy.backoff(), operation) => match result {
            Ok(value) => Ok(value),
            Err(PollError::Pending(state)) => Err(on_timeout(state)),
            Err(PollError::Failed(e)) => Err(e),
        },
        _ = token.cancelled() => Err(Error::Cancelled(format!("{} was cancelled", what))),
    }
}
