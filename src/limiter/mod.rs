//! Per-client fixed-window rate limiting.
//!
//! Each client address owns one window per quota. A window opens on the
//! first hit and resets once its duration has elapsed. A request is admitted
//! only if it fits every quota, and a rejected request consumes nothing.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

mod policy;

pub use policy::{PolicyError, Quota, RateLimitPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        /// Limit of the most constraining quota.
        limit: u32,
        remaining: u32,
        reset_in: Duration,
    },
    Limited {
        quota: Quota,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn remaining_time(&self, quota: &Quota, now: Instant) -> Duration {
        quota
            .window
            .saturating_sub(now.saturating_duration_since(self.started))
    }

    fn expired(&self, quota: &Quota, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= quota.window
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    clients: DashMap<IpAddr, Vec<Window>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            clients: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn check(&self, client: IpAddr) -> RateLimitDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateLimitDecision {
        let quotas = self.policy.quotas();

        // The entry guard holds the shard lock, so check-and-increment is
        // atomic per client.
        let mut windows = self.clients.entry(client).or_insert_with(|| {
            quotas
                .iter()
                .map(|_| Window { started: now, count: 0 })
                .collect()
        });

        for (window, quota) in windows.iter_mut().zip(quotas) {
            if window.expired(quota, now) {
                *window = Window { started: now, count: 0 };
            }
        }

        let exhausted = windows
            .iter()
            .zip(quotas)
            .filter(|(window, quota)| window.count >= quota.limit)
            .map(|(window, quota)| (*quota, window.remaining_time(quota, now)))
            .max_by_key(|(_, retry_after)| *retry_after);

        if let Some((quota, retry_after)) = exhausted {
            debug!(%client, %quota, ?retry_after, "rate limit exceeded");
            return RateLimitDecision::Limited { quota, retry_after };
        }

        for window in windows.iter_mut() {
            window.count += 1;
        }

        windows
            .iter()
            .zip(quotas)
            .map(|(window, quota)| RateLimitDecision::Allowed {
                limit: quota.limit,
                remaining: quota.limit - window.count,
                reset_in: window.remaining_time(quota, now),
            })
            .min_by_key(|decision| match decision {
                RateLimitDecision::Allowed { remaining, .. } => *remaining,
                RateLimitDecision::Limited { .. } => 0,
            })
            .unwrap_or(RateLimitDecision::Allowed {
                limit: 0,
                remaining: 0,
                reset_in: Duration::ZERO,
            })
    }

    /// Drops clients whose windows have all run out. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let quotas = self.policy.quotas();
        let before = self.clients.len();
        self.clients.retain(|_, windows| {
            !windows
                .iter()
                .zip(quotas)
                .all(|(window, quota)| window.expired(quota, now))
        });
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter(policy: &str) -> RateLimiter {
        RateLimiter::new(policy.parse().unwrap())
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = limiter("3 per minute");
        let now = Instant::now();

        for expected_remaining in [2, 1, 0] {
            match limiter.check_at(ip(1), now) {
                RateLimitDecision::Allowed { limit, remaining, .. } => {
                    assert_eq!(limit, 3);
                    assert_eq!(remaining, expected_remaining);
                }
                other => panic!("expected allowed, got {other:?}"),
            }
        }

        match limiter.check_at(ip(1), now + Duration::from_secs(20)) {
            RateLimitDecision::Limited { quota, retry_after } => {
                assert_eq!(quota, Quota::per_minute(3));
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = limiter("1 per minute");
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_allowed());
        assert!(!limiter.check_at(ip(1), now + Duration::from_secs(59)).is_allowed());
        assert!(limiter.check_at(ip(1), now + Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn clients_are_independent() {
        let limiter = limiter("1 per minute");
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_allowed());
        assert!(!limiter.check_at(ip(1), now).is_allowed());
        assert!(limiter.check_at(ip(2), now).is_allowed());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn daily_quota_outlives_minute_windows() {
        let limiter = limiter("2 per minute;3 per day");
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_allowed());
        assert!(limiter.check_at(ip(1), now).is_allowed());
        assert!(!limiter.check_at(ip(1), now).is_allowed());

        let later = now + Duration::from_secs(61);
        match limiter.check_at(ip(1), later) {
            RateLimitDecision::Allowed { limit, remaining, .. } => {
                // The daily quota is now the tighter one.
                assert_eq!(limit, 3);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected allowed, got {other:?}"),
        }

        match limiter.check_at(ip(1), later + Duration::from_secs(61)) {
            RateLimitDecision::Limited { quota, retry_after } => {
                assert_eq!(quota, Quota::per_day(3));
                assert_eq!(retry_after, Duration::from_secs(86_400 - 122));
            }
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn limited_requests_do_not_consume_quota() {
        let limiter = limiter("1 per minute;2 per day");
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).is_allowed());
        for _ in 0..10 {
            assert!(!limiter.check_at(ip(1), now).is_allowed());
        }
        // Only one request counted against the day, so one more fits.
        assert!(limiter.check_at(ip(1), now + Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn purge_drops_only_fully_expired_clients() {
        let limiter = limiter("1 per minute;5 per hour");
        let now = Instant::now();

        limiter.check_at(ip(1), now);
        limiter.check_at(ip(2), now + Duration::from_secs(3000));

        let removed = limiter.purge_expired_at(now + Duration::from_secs(3700));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn concurrent_checks_admit_exactly_the_limit() {
        let limiter = limiter("10 per minute");
        let allowed = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        if limiter.check(ip(9)).is_allowed() {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst), 10);
        assert!(!limiter.check(ip(9)).is_allowed());
        assert!(limiter.check(ip(10)).is_allowed());
    }
}
