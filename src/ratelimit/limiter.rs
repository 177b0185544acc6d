use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Bucket for requests whose peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "_unknown";

/// Tracked clients above which expired windows are dropped before counting.
const PRUNE_THRESHOLD: usize = 10_000;

/// Request budget for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTier {
    pub max_requests: u64,
    pub window: Duration,
    /// Error message returned once the budget is spent.
    pub message: &'static str,
}

impl RateLimitTier {
    pub const UPLOADS: Self = Self {
        max_requests: 15,
        window: Duration::from_secs(15 * 60),
        message: "Too many uploads. Try again later.",
    };

    pub const DOWNLOADS: Self = Self {
        max_requests: 100,
        window: Duration::from_secs(5 * 60),
        message: "Too many downloads. Slow down.",
    };

    pub const METADATA: Self = Self {
        max_requests: 300,
        window: Duration::from_secs(5 * 60),
        message: "Too many requests, please try again later.",
    };
}

/// An allowed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the current window resets.
    pub reset_after: u64,
}

/// A rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub limit: u64,
    /// Seconds until the client can retry.
    pub retry_after: u64,
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// In-process fixed-window counter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    tier: RateLimitTier,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(tier: RateLimitTier) -> Self {
        Self {
            tier,
            windows: DashMap::new(),
        }
    }

    pub fn tier(&self) -> &RateLimitTier {
        &self.tier
    }

    /// Record a request from `client` now.
    pub fn check(&self, client: &str) -> Result<RateLimitResult, RateLimitExceeded> {
        self.check_at(client, Instant::now())
    }

    /// Record a request from `client` at `now`.
    pub fn check_at(
        &self,
        client: &str,
        now: Instant,
    ) -> Result<RateLimitResult, RateLimitExceeded> {
        if self.windows.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }

        let tier = self.tier;
        let mut window = self.windows.entry(client.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(window.started) >= tier.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        let left = tier
            .window
            .saturating_sub(now.saturating_duration_since(window.started));
        let reset_after = ceil_secs(left);

        if window.count >= tier.max_requests {
            return Err(RateLimitExceeded {
                limit: tier.max_requests,
                retry_after: reset_after,
                message: tier.message,
            });
        }

        window.count += 1;
        Ok(RateLimitResult {
            limit: tier.max_requests,
            remaining: tier.max_requests - window.count,
            reset_after,
        })
    }

    /// Number of clients with a tracked window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows that have fully elapsed at `now`.
    pub fn prune(&self, now: Instant) {
        let span = self.tier.window;
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < span);
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(max_requests: u64) -> RateLimitTier {
        RateLimitTier {
            max_requests,
            window: Duration::from_secs(60),
            message: "slow down",
        }
    }

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(tier(3));
        let now = Instant::now();

        let remaining: Vec<u64> = (0..3)
            .map(|_| limiter.check_at("10.0.0.1", now).unwrap().remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let err = limiter.check_at("10.0.0.1", now).unwrap_err();
        assert_eq!(err.limit, 3);
        assert_eq!(err.retry_after, 60);
        assert_eq!(err.message, "slow down");
    }

    #[test]
    fn clients_are_counted_independently() {
        let limiter = RateLimiter::new(tier(1));
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", now).is_ok());
        assert!(limiter.check_at("10.0.0.1", now).is_err());
        assert!(limiter.check_at("10.0.0.2", now).is_ok());
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new(tier(1));
        let start = Instant::now();
        assert!(limiter.check_at("10.0.0.1", start).is_ok());

        let err = limiter
            .check_at("10.0.0.1", start + Duration::from_millis(59_500))
            .unwrap_err();
        assert_eq!(err.retry_after, 1);

        let fresh = limiter
            .check_at("10.0.0.1", start + Duration::from_secs(60))
            .unwrap();
        assert_eq!(fresh.remaining, 0);
        assert_eq!(fresh.reset_after, 60);
    }

    #[test]
    fn prune_drops_only_elapsed_windows() {
        let limiter = RateLimiter::new(tier(5));
        let start = Instant::now();
        limiter.check_at("old", start).unwrap();
        limiter.check_at("new", start + Duration::from_secs(30)).unwrap();

        limiter.prune(start + Duration::from_secs(61));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn published_tiers() {
        assert_eq!(RateLimitTier::UPLOADS.max_requests, 15);
        assert_eq!(RateLimitTier::UPLOADS.window, Duration::from_secs(900));
        assert_eq!(RateLimitTier::DOWNLOADS.max_requests, 100);
        assert_eq!(RateLimitTier::METADATA.max_requests, 300);
    }
}
