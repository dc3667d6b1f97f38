//! Sliding-window admission control for inbound mutation paths.
//!
//! Keyed by caller identity (e.g. source address); per-key windows are
//! independent. This is the only component allowed to reject a request
//! before the ledger or the order lifecycle sees it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::common::{CoreError, CoreResult};

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `identity`.
    ///
    /// Timestamps older than the window are purged first; if the remaining
    /// count is at the limit the call is rejected without recording anything,
    /// so a throttled client cannot extend its own penalty.
    pub async fn check(&self, identity: &str) -> CoreResult<()> {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        let window = hits.entry(identity.to_string()).or_default();

        while window
            .front()
            .is_some_and(|&hit| now.duration_since(hit) >= self.window)
        {
            window.pop_front();
        }

        if window.len() >= self.max_requests {
            let retry_after = window
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(self.window);
            return Err(CoreError::RateLimited { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop identities whose windows have fully drained (housekeeping).
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        hits.retain(|_, window| {
            window
                .back()
                .is_some_and(|&hit| now.duration_since(hit) < self.window)
        });
    }

    pub async fn tracked_identities(&self) -> usize {
        self.hits.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_rejects_excess_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            limiter.check("10.0.0.1").await.unwrap();
        }
        let err = limiter.check("10.0.0.1").await.unwrap_err();
        assert!(matches!(err, CoreError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        limiter.check("10.0.0.1").await.unwrap();
        limiter.check("10.0.0.2").await.unwrap();
        assert!(limiter.check("10.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn test_window_elapse_readmits() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));

        limiter.check("client").await.unwrap();
        limiter.check("client").await.unwrap();
        assert!(limiter.check("client").await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.check("client").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_records_nothing() {
        let limiter = RateLimiter::new(1, Duration::from_millis(60));

        limiter.check("client").await.unwrap();
        // Hammering while limited must not extend the window.
        for _ in 0..5 {
            assert!(limiter.check("client").await.is_err());
        }
        tokio::time::sleep(Duration::from_millis(90)).await;
        limiter.check("client").await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_drops_drained_windows() {
        let limiter = RateLimiter::new(5, Duration::from_millis(20));
        limiter.check("a").await.unwrap();
        limiter.check("b").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_identities().await, 0);
    }
}
