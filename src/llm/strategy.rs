//! Provider selection strategies
//!
//! All strategies share one selection protocol: build the candidate list
//! (healthy providers minus the context's exclusion set), honor a
//! preferred-model hint, then apply the strategy-specific ordering.
//! Tie-breaking is always registration order, which is why candidates
//! arrive as an ordered slice rather than a map.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::pricing::PricingTable;
use super::stats::ProviderTracker;
use super::traits::ChatProvider;
use super::{LlmError, LlmResult, RoutingContext};

/// Routing strategy for LLM requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoutingStrategy {
    CostOptimized,
    LatencyOptimized,
    RoundRobin,
    WeightedRoundRobin,
    Random,
    /// Alias for [`RoutingStrategy::CostOptimized`]; no distinct
    /// ordering is defined for priority routing.
    Priority,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoutingStrategy::CostOptimized => "cost_optimized",
            RoutingStrategy::LatencyOptimized => "latency_optimized",
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::WeightedRoundRobin => "weighted_round_robin",
            RoutingStrategy::Random => "random",
            RoutingStrategy::Priority => "priority",
        };
        write!(f, "{}", name)
    }
}

/// Latency prior in milliseconds for providers with no observed
/// successful requests. Local deployments answer fastest, frontier
/// models slowest.
fn latency_prior(name: &str) -> f64 {
    let name = name.to_lowercase();
    if ["ollama", "local", "llama"].iter().any(|p| name.contains(p)) {
        50.0
    } else if name.contains("groq") {
        250.0
    } else if ["mini", "haiku", "flash", "mistral", "gemma"]
        .iter()
        .any(|p| name.contains(p))
    {
        400.0
    } else if ["gpt-4", "opus", "o1"].iter().any(|p| name.contains(p)) {
        1500.0
    } else {
        800.0
    }
}

/// Weight for weighted round-robin: local > small-cloud > large-cloud.
fn provider_weight(name: &str) -> u32 {
    let name = name.to_lowercase();
    if ["ollama", "local", "llama"].iter().any(|p| name.contains(p)) {
        6
    } else if ["groq", "mini", "haiku", "flash", "mistral", "gemma"]
        .iter()
        .any(|p| name.contains(p))
    {
        3
    } else {
        1
    }
}

/// Strategy-driven provider selector.
pub struct ProviderRouter {
    strategy: RoutingStrategy,
    pricing: Arc<PricingTable>,
    tracker: Arc<ProviderTracker>,
    round_robin: AtomicUsize,
}

impl ProviderRouter {
    pub fn new(
        strategy: RoutingStrategy,
        pricing: Arc<PricingTable>,
        tracker: Arc<ProviderTracker>,
    ) -> Self {
        Self {
            strategy,
            pricing,
            tracker,
            round_robin: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Select one provider from `providers` (registration order) under
    /// the routing context, or fail with [`LlmError::NoHealthyProvider`].
    pub fn select(
        &self,
        providers: &[Arc<dyn ChatProvider>],
        ctx: &RoutingContext,
    ) -> LlmResult<Arc<dyn ChatProvider>> {
        let candidates: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .filter(|p| {
                !ctx.excluded_providers.contains(p.name()) && self.tracker.is_healthy(p.name())
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(LlmError::NoHealthyProvider);
        }

        if let Some(model) = &ctx.preferred_model {
            let needle = model.to_lowercase();
            if let Some(preferred) = candidates
                .iter()
                .find(|p| p.name().to_lowercase().contains(&needle))
            {
                debug!(provider = preferred.name(), "preferred model matched");
                return Ok(preferred.clone());
            }
        }

        let selected = match self.strategy {
            RoutingStrategy::CostOptimized | RoutingStrategy::Priority => {
                self.select_cheapest(candidates, ctx)
            }
            RoutingStrategy::LatencyOptimized => self.select_fastest(candidates, ctx),
            RoutingStrategy::RoundRobin => {
                let i = self.round_robin.fetch_add(1, Ordering::Relaxed);
                candidates[i % candidates.len()].clone()
            }
            RoutingStrategy::WeightedRoundRobin => Self::select_weighted(candidates),
            RoutingStrategy::Random => {
                let i = rand::thread_rng().gen_range(0..candidates.len());
                candidates[i].clone()
            }
        };
        debug!(
            provider = selected.name(),
            strategy = %self.strategy,
            "provider selected"
        );
        Ok(selected)
    }

    /// Ascending estimated cost; `max_cost > 0` filters the ordering but
    /// falls back to the unfiltered head so a healthy provider is always
    /// selected.
    fn select_cheapest(
        &self,
        candidates: Vec<Arc<dyn ChatProvider>>,
        ctx: &RoutingContext,
    ) -> Arc<dyn ChatProvider> {
        let mut ordered: Vec<(f64, Arc<dyn ChatProvider>)> = candidates
            .into_iter()
            .map(|p| {
                let cost = self.pricing.cost_for(
                    p.name(),
                    ctx.estimated_input_tokens,
                    ctx.estimated_output_tokens,
                );
                (cost, p)
            })
            .collect();
        // Stable sort keeps registration order on ties.
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        if ctx.max_cost > 0.0 {
            if let Some((_, p)) = ordered.iter().find(|(cost, _)| *cost <= ctx.max_cost) {
                return p.clone();
            }
        }
        ordered[0].1.clone()
    }

    /// Ascending effective latency: observed streaming mean when the
    /// provider has successful requests, otherwise the prior table.
    fn select_fastest(
        &self,
        candidates: Vec<Arc<dyn ChatProvider>>,
        ctx: &RoutingContext,
    ) -> Arc<dyn ChatProvider> {
        let mut ordered: Vec<(f64, Arc<dyn ChatProvider>)> = candidates
            .into_iter()
            .map(|p| {
                let latency = match self.tracker.statistics(p.name()) {
                    Some(stats) if stats.successful_requests > 0 => stats.average_latency_ms,
                    _ => latency_prior(p.name()),
                };
                (latency, p)
            })
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        if ctx.max_latency_ms > 0 {
            let limit = ctx.max_latency_ms as f64;
            if let Some((_, p)) = ordered.iter().find(|(latency, _)| *latency <= limit) {
                return p.clone();
            }
        }
        ordered[0].1.clone()
    }

    /// Weighted random pick: draw `r` uniformly from `[0, total_weight)`
    /// and return the first provider whose cumulative weight exceeds it.
    fn select_weighted(candidates: Vec<Arc<dyn ChatProvider>>) -> Arc<dyn ChatProvider> {
        let total: u32 = candidates.iter().map(|p| provider_weight(p.name())).sum();
        let r = rand::thread_rng().gen_range(0..total);
        let mut cumulative = 0;
        for p in &candidates {
            cumulative += provider_weight(p.name());
            if cumulative > r {
                return p.clone();
            }
        }
        // Unreachable: cumulative reaches total which is > any r.
        candidates[candidates.len() - 1].clone()
    }
}
