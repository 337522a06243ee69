use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits, read from `RL_*` variables.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub publish_limit: usize,
    pub publish_window: Duration,
    pub upvote_limit: usize,
    pub upvote_window: Duration,
    pub purchase_limit: usize,
    pub purchase_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            publish_limit: 5,
            publish_window: Duration::from_secs(3600),
            upvote_limit: 30,
            upvote_window: Duration::from_secs(60),
            purchase_limit: 10,
            purchase_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            publish_limit: usize_env("RL_PUBLISH_LIMIT", d.publish_limit),
            publish_window: dur_env("RL_PUBLISH_WINDOW", d.publish_window),
            upvote_limit: usize_env("RL_UPVOTE_LIMIT", d.upvote_limit),
            upvote_window: dur_env("RL_UPVOTE_WINDOW", d.upvote_window),
            purchase_limit: usize_env("RL_PURCHASE_LIMIT", d.purchase_limit),
            purchase_window: dur_env("RL_PURCHASE_WINDOW", d.purchase_window),
        }
    }
}

/// High level guard used by handlers, keyed by user id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_publish(&self, user: &str) -> bool { self.limiter.check(&format!("publish:{user}"), self.cfg.publish_limit, self.cfg.publish_window) }
    pub fn allow_upvote(&self, user: &str) -> bool { self.limiter.check(&format!("upvote:{user}"), self.cfg.upvote_limit, self.cfg.upvote_window) }
    pub fn allow_purchase(&self, user: &str) -> bool { self.limiter.check(&format!("purchase:{user}"), self.cfg.purchase_limit, self.cfg.purchase_window) }
}
