use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{trace, warn};

use super::error::{CloudError, ErrorCode};
use crate::config::RetryConfig;

/// Exponential backoff with jitter and a hard attempt ceiling.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f64,
    /// Fraction of the computed delay added at random (0.2 = up to +20%)
    pub jitter: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(20),
            max_attempts: 5,
        }
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(cfg.initial_ms),
            factor: cfg.factor,
            jitter: cfg.jitter,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts.max(1),
        }
    }
}

impl Backoff {
    /// Delay slept after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let base = self.initial.as_secs_f64() * self.factor.powi(exp);
        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(0.0..=self.jitter)
        } else {
            0.0
        };
        let secs = (base * (1.0 + jitter)).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Run `op` until it succeeds, fails with a code outside `retryable`, or the
/// attempt ceiling is reached. The last error is returned in the latter cases.
pub async fn with_retry<T, F, Fut>(
    backoff: &Backoff,
    retryable: &[ErrorCode],
    mut op: F,
) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if !retryable.contains(&e.code) {
                    trace!(error = %e, "cloud call non-retryable");
                    return Err(e);
                }
                if attempt >= backoff.max_attempts {
                    warn!(error = %e, attempt, "cloud call retries exhausted");
                    return Err(e);
                }
                let delay = backoff.delay(attempt);
                trace!(attempt, backoff_ms = delay.as_millis() as u64, code = %e.code, "cloud call retry");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
