//! Retry and backoff calculation shared by strategies and the transcription poller.

use std::time::Duration;

use tracing::debug;

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};

/// Delay schedule between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^attempt`, capped at `max`, with optional +/- 50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt as i32);
                let capped_seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(capped_seconds);
                if !jitter {
                    return delay;
                }

                let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                let offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = delay.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
                Duration::from_millis(total_ms.max(0) as u64)
            }
        }
    }
}

/// Retry policy for idempotent HTTP calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::default(),
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Executes `request`, retrying retryable transport errors and configured statuses.
///
/// When retries run out on a retryable status the last response is returned
/// so callers can still inspect it.
pub async fn execute_with_retry(
    client: &dyn HttpClient,
    request: HttpRequest,
    config: &RetryConfig,
) -> Result<HttpResponse, HttpError> {
    let attempts = if config.enabled {
        config.max_retries + 1
    } else {
        1
    };
    let mut attempt = 0;
    loop {
        let last = attempt + 1 >= attempts;
        match client.execute(request.clone()).await {
            Ok(response) if !last && config.should_retry_status(response.status) => {
                debug!(status = response.status, attempt, url = %request.url, "retrying after status");
            }
            Ok(response) => return Ok(response),
            Err(error) if !last && error.retryable() => {
                debug!(error = %error, attempt, url = %request.url, "retrying after transport error");
            }
            Err(error) => return Err(error),
        }
        tokio::time::sleep(config.delay_for_attempt(attempt)).await;
        attempt += 1;
    }
}

/// Poll interval that grows on rate limiting and drifts upward every cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveInterval {
    current: Duration,
    max: Duration,
    rate_limit_factor: f64,
    drift_factor: f64,
}

impl AdaptiveInterval {
    pub const DEFAULT_RATE_LIMIT_FACTOR: f64 = 1.5;
    pub const DEFAULT_DRIFT_FACTOR: f64 = 1.05;

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
            rate_limit_factor: Self::DEFAULT_RATE_LIMIT_FACTOR,
            drift_factor: Self::DEFAULT_DRIFT_FACTOR,
        }
    }

    pub fn with_factors(mut self, rate_limit_factor: f64, drift_factor: f64) -> Self {
        self.rate_limit_factor = rate_limit_factor.max(1.0);
        self.drift_factor = drift_factor.max(1.0);
        self
    }

    pub const fn current(&self) -> Duration {
        self.current
    }

    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Applies the rate-limit growth and returns the new interval.
    pub fn on_rate_limited(&mut self) -> Duration {
        self.current = scale(self.current, self.rate_limit_factor, self.max);
        self.current
    }

    /// Applies the per-cycle drift and returns the new interval.
    pub fn drift(&mut self) -> Duration {
        self.current = scale(self.current, self.drift_factor, self.max);
        self.current
    }
}

fn scale(current: Duration, factor: f64, max: Duration) -> Duration {
    let seconds = (current.as_secs_f64() * factor).min(max.as_secs_f64());
    // Millisecond precision keeps emitted intervals stable across platforms.
    Duration::from_millis((seconds * 1000.0).round() as u64).min(max)
}
