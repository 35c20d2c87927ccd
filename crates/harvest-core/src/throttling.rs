use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tracing::debug;

/// Request budget and retry schedule for one upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl ThrottlePolicy {
    /// Twitter v2 recent search app-auth budget (450 requests / 15 minutes).
    pub fn twitter_default() -> Self {
        Self {
            quota_window: Duration::from_secs(15 * 60),
            quota_limit: 450,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 5,
        }
    }

    /// Reddit OAuth budget (60 requests / minute).
    pub fn reddit_default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
        }
    }

    /// Conservative budget for unauthenticated page retrieval.
    pub fn scrape_default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    retry_count: u32,
}

/// In-memory rate budget that buffers callers and computes their retry delays.
#[derive(Clone)]
pub struct ThrottlingQueue {
    limiter: Arc<DirectRateLimiter>,
    pending: Arc<Mutex<VecDeque<PendingRequest>>>,
    policy: ThrottlePolicy,
}

impl ThrottlingQueue {
    pub fn new(policy: ThrottlePolicy) -> Self {
        let quota = quota_from_window(policy.quota_window, policy.quota_limit);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            policy,
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Tries to take one unit of budget. When none is left the caller is buffered
    /// and the recommended delay is returned.
    pub fn acquire(&self) -> Result<(), Duration> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }

        self.lock_pending()
            .push_back(PendingRequest { retry_count: 0 });
        Err(self.retry_delay(0).unwrap_or(self.policy.max_delay))
    }

    /// Waits until budget is available and returns the total time spent waiting.
    pub async fn wait_for_budget(&self) -> Duration {
        let mut waited = Duration::ZERO;
        let mut delay = match self.acquire() {
            Ok(()) => return waited,
            Err(delay) => delay,
        };
        loop {
            debug!(delay_ms = delay.as_millis() as u64, "rate budget exhausted, waiting");
            tokio::time::sleep(delay).await;
            waited += delay;
            if self.limiter.check().is_ok() {
                self.complete_one();
                return waited;
            }
            delay = self.register_retry().unwrap_or(self.policy.max_delay);
        }
    }

    /// Increments the retry count of the oldest buffered request and returns its next delay.
    pub fn register_retry(&self) -> Option<Duration> {
        let mut pending = self.lock_pending();
        let request = pending.front_mut()?;
        request.retry_count = request.retry_count.saturating_add(1);
        self.retry_delay(request.retry_count)
    }

    pub fn complete_one(&self) {
        let _ = self.lock_pending().pop_front();
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn retry_delay(&self, retry_count: u32) -> Option<Duration> {
        if retry_count > self.policy.max_retries {
            return None;
        }

        let scale = self.policy.multiplier.powf(f64::from(retry_count));
        let seconds = self.policy.initial_delay.as_secs_f64() * scale;
        Some(Duration::from_secs_f64(
            seconds.min(self.policy.max_delay.as_secs_f64()),
        ))
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(limit: u32) -> ThrottlePolicy {
        ThrottlePolicy {
            quota_window: Duration::from_secs(60),
            quota_limit: limit,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_retries: 3,
        }
    }

    #[test]
    fn buffers_when_budget_is_exhausted() {
        let queue = ThrottlingQueue::new(policy(2));

        assert!(queue.acquire().is_ok());
        assert!(queue.acquire().is_ok());

        let delay = queue.acquire().expect_err("third request should be buffered");
        assert_eq!(delay, Duration::from_secs(1));
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let queue = ThrottlingQueue::new(policy(1));

        assert_eq!(queue.retry_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(queue.retry_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(queue.retry_delay(3), Some(Duration::from_secs(8)));
        assert_eq!(queue.retry_delay(4), None);
    }

    #[test]
    fn platform_policies_match_published_limits() {
        assert_eq!(ThrottlePolicy::twitter_default().quota_limit, 450);
        assert_eq!(
            ThrottlePolicy::reddit_default().quota_window,
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn budget_is_immediate_while_quota_remains() {
        let queue = ThrottlingQueue::new(policy(5));

        assert_eq!(queue.wait_for_budget().await, Duration::ZERO);
        assert_eq!(queue.pending_len(), 0);
    }
}
