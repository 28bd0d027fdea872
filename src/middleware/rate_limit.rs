use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::pipeline::{Flow, Stage, StageKind};

/// Accepts or rejects a request from a client before any route handler runs.
#[async_trait]
pub trait Throttle: Send + Sync {
    async fn check(&self, ip: IpAddr) -> AppResult<()>;
}

/// A thread-safe rate limiter based on the sliding window algorithm.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - The maximum number of requests allowed within the time window.
    /// * `window_seconds` - The duration of the time window in seconds.
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Checks if a request from a given IP address is allowed.
    ///
    /// If the request is allowed, it is recorded and `Ok(())` is returned.
    /// Otherwise the time until the oldest recorded request leaves the window
    /// is returned.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let timestamps = requests.entry(ip).or_default();

        // Remove old timestamps outside the window. On time skew keep the
        // timestamp, so a clock jump never lets extra requests through.
        timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));

        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = match now.checked_duration_since(oldest) {
                Some(elapsed) => self.window.saturating_sub(elapsed),
                None => Duration::from_secs(1),
            };
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Removes clients with no requests left inside the window.
    pub async fn cleanup_old_entries(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));
            !timestamps.is_empty()
        });
    }

    pub async fn tracked_clients(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    async fn check(&self, ip: IpAddr) -> AppResult<()> {
        self.check_rate_limit(ip).await.map_err(|retry_after| AppError::RateLimited {
            // Round up so clients never retry too early
            retry_after_seconds: retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0),
        })
    }
}

/// Gate in front of the route tables under the API prefix.
pub struct RateLimitStage {
    prefix: String,
    throttle: Arc<dyn Throttle>,
}

impl RateLimitStage {
    pub fn new(prefix: impl Into<String>, throttle: Arc<dyn Throttle>) -> Self {
        Self { prefix: prefix.into(), throttle }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn kind(&self) -> StageKind {
        StageKind::RateLimit
    }

    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        if ctx.path_is_under(&self.prefix) {
            if let Err(err) = self.throttle.check(ctx.client_ip).await {
                tracing::warn!(client = %ctx.client_ip, path = %ctx.path(), "rate limit exceeded");
                return Err(err);
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(3, 1);
        let ip = IpAddr::from([127, 0, 0, 1]);

        // First 3 requests should succeed
        assert!(limiter.check_rate_limit(ip).await.is_ok());
        assert!(limiter.check_rate_limit(ip).await.is_ok());
        assert!(limiter.check_rate_limit(ip).await.is_ok());

        // 4th request should fail
        assert!(limiter.check_rate_limit(ip).await.is_err());

        // Wait for window to expire
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Should succeed again
        assert!(limiter.check_rate_limit(ip).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_ips() {
        let limiter = RateLimiter::new(1, 1);
        let ip1 = IpAddr::from([127, 0, 0, 1]);
        let ip2 = IpAddr::from([127, 0, 0, 2]);

        // Both IPs should get their own limit
        assert!(limiter.check_rate_limit(ip1).await.is_ok());
        assert!(limiter.check_rate_limit(ip2).await.is_ok());

        // Both should be rate limited on second request
        assert!(limiter.check_rate_limit(ip1).await.is_err());
        assert!(limiter.check_rate_limit(ip2).await.is_err());
    }

    #[tokio::test]
    async fn test_throttle_maps_to_rate_limited_failure() {
        let limiter = RateLimiter::new(1, 60);
        let ip = IpAddr::from([10, 0, 0, 1]);
        assert!(limiter.check(ip).await.is_ok());
        match limiter.check(ip).await {
            Err(AppError::RateLimited { retry_after_seconds }) => {
                assert!(retry_after_seconds > 0 && retry_after_seconds <= 60)
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_clients() {
        let limiter = RateLimiter::new(5, 1);
        limiter.check_rate_limit(IpAddr::from([127, 0, 0, 1])).await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 1);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        limiter.cleanup_old_entries().await;
        assert_eq!(limiter.tracked_clients().await, 0);
    }
}
