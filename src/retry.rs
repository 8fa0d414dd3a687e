//! Exponential backoff for bus, store and RPC calls
//!
//! The delay for attempt `n` is `initial * 2^n`, capped. After the last
//! attempt the error is returned to the caller: fatal at startup, a
//! redelivery at steady state.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub attempts: u32,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            attempts: 5,
            cap: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before retrying after the given zero-based attempt failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.cap)
    }
}

/// Run `op` until it succeeds or the attempt budget is exhausted.
pub async fn retry<F, Fut, T, E>(backoff: Backoff, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= backoff.attempts {
                    error!("{what} failed after {attempt} attempts: {err}");
                    return Err(err);
                }
                let delay = backoff.delay(attempt - 1);
                warn!(
                    "{what} failed (attempt {attempt}/{}): {err}; retrying in {:?}",
                    backoff.attempts, delay
                );
                sleep(delay).await;
            }
        }
    }
}
