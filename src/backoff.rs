//! Exponential backoff polling
//!
//! Remote pin confirmation is polled with geometrically growing delays and
//! no retry limit while the service answers "not yet". The loop ends on
//! success, on the first probe error, or when its cancellation token fires.

use crate::error::{PinsetError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay schedule: `initial`, `initial * multiplier`, ... optionally capped
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(5000),
            multiplier: 1.5,
            max: None,
        }
    }
}

impl Backoff {
    pub fn delays(&self) -> Delays {
        Delays {
            next: self.initial,
            multiplier: self.multiplier,
            max: self.max,
        }
    }
}

/// Infinite iterator over backoff delays
#[derive(Debug, Clone)]
pub struct Delays {
    next: Duration,
    multiplier: f64,
    max: Option<Duration>,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = match self.max {
            Some(max) => self.next.min(max),
            None => self.next,
        };
        self.next = self.next.mul_f64(self.multiplier);
        Some(current)
    }
}

/// Run `probe` until it reports `Ok(true)`.
///
/// The first attempt runs immediately; each following attempt waits for the
/// next backoff delay. Only `Ok(false)` backs off: a probe error is returned
/// to the caller as is.
pub async fn poll_until<F, Fut, E>(
    backoff: &Backoff,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, E>>,
    E: Into<PinsetError>,
{
    let mut delays = backoff.delays();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PinsetError::Cancelled),
            outcome = probe() => outcome,
        };
        match outcome {
            Ok(true) => return Ok(attempt),
            Ok(false) => debug!(attempt, "Probe not yet satisfied"),
            Err(e) => {
                let err = e.into();
                warn!(attempt, error = %err, "Probe failed");
                return Err(err);
            }
        }

        let delay = delays.next().unwrap_or(backoff.initial);
        tokio::select! {
            _ = cancel.cancelled() => return Err(PinsetError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
