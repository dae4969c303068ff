//! Per-key sliding-window rate limiting
//!
//! Each key owns an independent bucket holding the admission timestamps
//! still inside the window. Buckets are created on first use and live
//! in a sharded map, so admission under one key never blocks another.
//! Denial does not suspend the caller; it reports how long to wait.

use anyhow::{bail, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Rate limiting configuration
///
/// The token-bucket fields are recognized but reserved; admission is
/// always the sliding-window contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_requests_per_minute: u32,
    pub window_size_seconds: u64,
    pub use_token_bucket: bool,
    pub token_bucket_capacity: u32,
    pub token_refill_rate_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_requests_per_minute: 60,
            window_size_seconds: 60,
            use_token_bucket: false,
            token_bucket_capacity: 0,
            token_refill_rate_per_second: 0.0,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_requests_per_minute == 0 {
            bail!("default_requests_per_minute must be at least 1");
        }
        if self.window_size_seconds == 0 {
            bail!("window_size_seconds must be at least 1");
        }
        Ok(())
    }
}

/// Admission decision
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed {
        remaining: u32,
    },
    Denied {
        retry_after: Duration,
        reason: String,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Default)]
struct Bucket {
    timestamps: VecDeque<Instant>,
}

/// Sliding-window rate limiter with per-key buckets.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buckets: DashMap::new(),
            config,
        })
    }

    /// Admit or deny one request under `key` at the configured limit.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_with_limit(key, None)
    }

    /// Admit or deny with a per-call limit override.
    pub fn check_with_limit(&self, key: &str, limit: Option<u32>) -> RateLimitDecision {
        self.check_at(key, limit, Instant::now())
    }

    /// Remove the bucket for `key`; its next check starts fresh.
    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    fn check_at(&self, key: &str, limit: Option<u32>, now: Instant) -> RateLimitDecision {
        let max_requests = limit.unwrap_or(self.config.default_requests_per_minute);
        if !self.config.enabled {
            return RateLimitDecision::Allowed {
                remaining: max_requests,
            };
        }

        let window = Duration::from_secs(self.config.window_size_seconds);
        // A zero limit admits nothing; deny without touching the bucket.
        if max_requests == 0 {
            return RateLimitDecision::Denied {
                retry_after: window.max(Duration::from_secs(1)),
                reason: format!("limit of 0 requests for '{}'", key),
            };
        }
        let mut bucket = self.buckets.entry(key.to_string()).or_default();

        // Age out timestamps that fell off the window.
        while let Some(oldest) = bucket.timestamps.front() {
            if now.duration_since(*oldest) > window {
                bucket.timestamps.pop_front();
            } else {
                break;
            }
        }

        if bucket.timestamps.len() >= max_requests as usize {
            let oldest = *bucket.timestamps.front().expect("non-empty at capacity");
            let retry_after = (oldest + window)
                .checked_duration_since(now)
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_secs(1));
            debug!(key = key, retry_after_secs = retry_after.as_secs(), "rate limited");
            return RateLimitDecision::Denied {
                retry_after,
                reason: format!(
                    "limit of {} requests per {}s window reached for '{}'",
                    max_requests, self.config.window_size_seconds, key
                ),
            };
        }

        bucket.timestamps.push_back(now);
        RateLimitDecision::Allowed {
            remaining: max_requests - bucket.timestamps.len() as u32,
        }
    }
}
