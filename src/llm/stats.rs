//! Per-provider statistics and health tracking
//!
//! One entry per provider, keyed by the provider's stable name and
//! mutated under its own critical section, so fan-out over many
//! providers never contends on a global lock. Health is a two-state
//! machine driven by consecutive-outcome streaks:
//!
//! ```text
//!         on N consecutive failures
//! Healthy ------------------------> Unhealthy
//!     ^                                 |
//!     +--- on M consecutive successes --+
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Monotonic per-provider counters. `total_requests` always equals
/// `successful_requests + failed_requests`; `average_latency_ms` is a
/// streaming mean over successful requests only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for ProviderStatistics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
            average_latency_ms: 0.0,
            last_updated: Utc::now(),
        }
    }
}

/// Provider health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            last_error_time: None,
        }
    }
}

/// Outcome of one provider invocation, as reported by the router.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        latency_ms: f64,
        input_tokens: u32,
        output_tokens: u32,
        cost: f64,
    },
    Failure {
        latency_ms: f64,
        error: String,
    },
}

#[derive(Debug, Default)]
struct ProviderEntry {
    stats: ProviderStatistics,
    health: ProviderHealth,
}

/// Statistics and health tracker for all registered providers.
#[derive(Debug)]
pub struct ProviderTracker {
    entries: DashMap<String, ProviderEntry>,
    unhealthy_threshold: u32,
    recovery_threshold: u32,
}

impl ProviderTracker {
    pub fn new(unhealthy_threshold: u32, recovery_threshold: u32) -> Self {
        Self {
            entries: DashMap::new(),
            unhealthy_threshold,
            recovery_threshold,
        }
    }

    /// Ensure an entry exists for `provider`. Providers start healthy.
    pub fn register(&self, provider: &str) {
        self.entries
            .entry(provider.to_string())
            .or_insert_with(ProviderEntry::default);
    }

    /// Record one invocation outcome. Statistics and health for the
    /// provider are updated atomically under the entry's critical
    /// section; the `report -> snapshot` sequence is linearizable per
    /// provider.
    pub fn report(&self, provider: &str, outcome: Outcome) {
        let mut entry = self
            .entries
            .entry(provider.to_string())
            .or_insert_with(ProviderEntry::default);
        let entry = entry.value_mut();

        match outcome {
            Outcome::Success {
                latency_ms,
                input_tokens,
                output_tokens,
                cost,
            } => {
                let stats = &mut entry.stats;
                stats.total_requests += 1;
                stats.successful_requests += 1;
                stats.total_input_tokens += input_tokens as u64;
                stats.total_output_tokens += output_tokens as u64;
                stats.total_cost += cost;
                // Streaming mean over successful requests only.
                stats.average_latency_ms +=
                    (latency_ms - stats.average_latency_ms) / stats.successful_requests as f64;
                stats.last_updated = Utc::now();

                let health = &mut entry.health;
                health.consecutive_failures = 0;
                health.consecutive_successes += 1;
                if !health.is_healthy && health.consecutive_successes >= self.recovery_threshold {
                    health.is_healthy = true;
                    info!(
                        provider = provider,
                        successes = health.consecutive_successes,
                        "provider recovered"
                    );
                }
            }
            Outcome::Failure { latency_ms: _, error } => {
                let stats = &mut entry.stats;
                stats.total_requests += 1;
                stats.failed_requests += 1;
                stats.last_updated = Utc::now();

                let health = &mut entry.health;
                health.consecutive_successes = 0;
                health.consecutive_failures += 1;
                health.last_error = Some(error.clone());
                health.last_error_time = Some(Utc::now());
                if health.is_healthy && health.consecutive_failures >= self.unhealthy_threshold {
                    health.is_healthy = false;
                    warn!(
                        provider = provider,
                        failures = health.consecutive_failures,
                        error = %error,
                        "provider marked unhealthy"
                    );
                }
            }
        }
    }

    /// Per-provider statistics snapshot.
    pub fn statistics(&self, provider: &str) -> Option<ProviderStatistics> {
        self.entries.get(provider).map(|e| e.stats.clone())
    }

    /// Snapshot of every registered provider's statistics. Consistency
    /// is per-entry only; there is no cross-provider guarantee.
    pub fn all_statistics(&self) -> HashMap<String, ProviderStatistics> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().stats.clone()))
            .collect()
    }

    /// Per-provider health snapshot.
    pub fn health(&self, provider: &str) -> Option<ProviderHealth> {
        self.entries.get(provider).map(|e| e.health.clone())
    }

    /// Whether a provider is currently healthy. Unknown providers are
    /// healthy by definition (initial state).
    pub fn is_healthy(&self, provider: &str) -> bool {
        self.entries
            .get(provider)
            .map(|e| e.health.is_healthy)
            .unwrap_or(true)
    }

    /// Names of healthy providers, minus the exclusion set.
    pub fn healthy_providers(&self, excluded: &HashSet<String>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.value().health.is_healthy && !excluded.contains(e.key()))
            .map(|e| e.key().clone())
            .collect()
    }
}
