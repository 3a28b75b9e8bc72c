use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const KEY_LIMIT_PER_HOUR: u32 = 1_000;
pub const PROJECT_LIMIT_PER_HOUR: u32 = 5_000;
pub const AUTH_LIMIT: u32 = 10;
pub const AUTH_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const RESET_LIMIT: u32 = 3;
pub const RESET_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Shared sliding-window counters keyed by caller-chosen strings
/// (`key:{id}`, `proj:{id}`, `ip:{addr}:auth`, ...). Injected through
/// `AppState`, so a shared store can replace it without touching callers.
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// Records a hit if the window has room. At exactly `limit` requests
    /// the last one succeeds with zero remaining; the next is rejected.
    pub async fn check(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let hits = windows.entry(key.to_string()).or_default();
        prune(hits, now, window);

        let reset_secs = reset_in(hits, now, window);
        if (hits.len() as u32) < limit {
            hits.push_back(now);
            RateDecision {
                allowed: true,
                limit,
                remaining: limit - hits.len() as u32,
                reset_secs,
            }
        } else {
            RateDecision { allowed: false, limit, remaining: 0, reset_secs }
        }
    }

    /// Joint check over several buckets: the hit is recorded in every
    /// bucket or in none. A request rejected by one window must not
    /// consume budget in the others, so the windows stay independent.
    pub async fn check_all(
        &self,
        probes: &[(String, u32, Duration)],
    ) -> (bool, Vec<RateDecision>) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let mut decisions = Vec::with_capacity(probes.len());
        let mut admitted = true;
        for (key, limit, window) in probes {
            let hits = windows.entry(key.clone()).or_default();
            prune(hits, now, *window);
            let has_room = (hits.len() as u32) < *limit;
            decisions.push(RateDecision {
                allowed: has_room,
                limit: *limit,
                remaining: if has_room { *limit - hits.len() as u32 } else { 0 },
                reset_secs: reset_in(hits, now, *window),
            });
            admitted &= has_room;
        }

        if admitted {
            for ((key, _, _), decision) in probes.iter().zip(decisions.iter_mut()) {
                if let Some(hits) = windows.get_mut(key) {
                    hits.push_back(now);
                }
                decision.remaining = decision.remaining.saturating_sub(1);
            }
        }
        (admitted, decisions)
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = hits.front() {
        if now.duration_since(*front) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

fn reset_in(hits: &VecDeque<Instant>, now: Instant, window: Duration) -> u64 {
    hits.front()
        .map(|oldest| window.saturating_sub(now.duration_since(*oldest)).as_secs())
        .unwrap_or(0)
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limit_boundary_is_exact() {
        let limiter = SlidingWindowLimiter::new();
        for i in 0..5 {
            let decision = limiter.check("k", 5, Duration::from_secs(60)).await;
            assert!(decision.allowed, "request {} should pass", i);
        }
        let last = limiter.check("k", 5, Duration::from_secs(60)).await;
        assert!(!last.allowed);
        assert_eq!(last.remaining, 0);
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let limiter = SlidingWindowLimiter::new();
        assert_eq!(limiter.check("k", 3, Duration::from_secs(60)).await.remaining, 2);
        assert_eq!(limiter.check("k", 3, Duration::from_secs(60)).await.remaining, 1);
        assert_eq!(limiter.check("k", 3, Duration::from_secs(60)).await.remaining, 0);
    }

    #[tokio::test]
    async fn windows_are_isolated_per_key() {
        let limiter = SlidingWindowLimiter::new();
        assert!(limiter.check("a", 1, Duration::from_secs(60)).await.allowed);
        assert!(!limiter.check("a", 1, Duration::from_secs(60)).await.allowed);
        assert!(limiter.check("b", 1, Duration::from_secs(60)).await.allowed);
    }

    #[tokio::test]
    async fn joint_check_is_all_or_nothing() {
        let limiter = SlidingWindowLimiter::new();
        let probes = vec![
            ("key:a".to_string(), 1, Duration::from_secs(60)),
            ("proj:p".to_string(), 10, Duration::from_secs(60)),
        ];

        let (admitted, decisions) = limiter.check_all(&probes).await;
        assert!(admitted);
        assert_eq!(decisions[0].remaining, 0);
        assert_eq!(decisions[1].remaining, 9);

        // the key bucket is exhausted; the project bucket must not be
        // charged for the rejected attempts
        for _ in 0..5 {
            let (admitted, decisions) = limiter.check_all(&probes).await;
            assert!(!admitted);
            assert!(!decisions[0].allowed);
            assert!(decisions[1].allowed);
        }
        let (_, decisions) = limiter.check_all(&probes).await;
        assert_eq!(decisions[1].remaining, 9);

        // a different key in the same project still has its full budget
        let other = vec![
            ("key:b".to_string(), 1, Duration::from_secs(60)),
            ("proj:p".to_string(), 10, Duration::from_secs(60)),
        ];
        let (admitted, decisions) = limiter.check_all(&other).await;
        assert!(admitted);
        assert_eq!(decisions[1].remaining, 8);
    }

    #[tokio::test]
    async fn hits_expire_out_of_the_window() {
        let limiter = SlidingWindowLimiter::new();
        assert!(limiter.check("k", 1, Duration::from_millis(20)).await.allowed);
        assert!(!limiter.check("k", 1, Duration::from_millis(20)).await.allowed);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(limiter.check("k", 1, Duration::from_millis(20)).await.allowed);
    }
}
