//! Routing provider with transparent failover
//!
//! Wraps a set of registered providers behind the same chat capability
//! they expose. Each request consults the selection strategy, invokes
//! the chosen provider, reports the outcome into the statistics and
//! health tracker, and on retryable failure excludes the provider and
//! re-selects, up to the configured retry budget.
//!
//! For streaming requests failover applies until the first chunk is
//! produced; after that, mid-stream errors surface as-is (but are still
//! reported to the health tracker). Cancellation is never retried and
//! never updates health.

use pin_project_lite::pin_project;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use futures::Stream;

use super::pricing::PricingTable;
use super::stats::{Outcome, ProviderStatistics, ProviderTracker};
use super::strategy::ProviderRouter;
use super::traits::{ChatProvider, ChatStream, StreamChunk, StreamUsage};
use super::{ChatRequest, ChatResponse, LlmError, LlmResult, RouterConfig, RoutingContext};
use crate::limits::{RateLimitDecision, RateLimiter};
use crate::telemetry::{SpanKind, SpanStatus, Telemetry};
use crate::usage::TokenUsageTracker;

/// Rate-limit key guarding the provider-agnostic chat entry.
const CHAT_RATE_KEY: &str = "llm.chat";

/// Provider-agnostic chat entry with strategy routing and failover.
pub struct RoutingProvider {
    providers: Vec<Arc<dyn ChatProvider>>,
    router: ProviderRouter,
    tracker: Arc<ProviderTracker>,
    pricing: Arc<PricingTable>,
    usage: Arc<TokenUsageTracker>,
    telemetry: Arc<Telemetry>,
    limiter: Option<Arc<RateLimiter>>,
    config: RouterConfig,
}

impl RoutingProvider {
    /// Build a routing provider over `providers`, which must be
    /// non-empty with unique, stable names. Registration order is
    /// significant: it is the tie-break order for every strategy.
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>, config: RouterConfig) -> LlmResult<Self> {
        config.validate()?;
        if providers.is_empty() {
            return Err(LlmError::Configuration(
                "at least one provider is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name().to_string()) {
                return Err(LlmError::Configuration(format!(
                    "duplicate provider name: {}",
                    provider.name()
                )));
            }
        }

        let tracker = Arc::new(ProviderTracker::new(
            config.unhealthy_threshold,
            config.recovery_threshold,
        ));
        for provider in &providers {
            tracker.register(provider.name());
            info!(provider = provider.name(), "provider registered");
        }

        let mut pricing = PricingTable::with_default_models();
        pricing.overlay(&config.custom_pricing);
        let pricing = Arc::new(pricing);

        let router = ProviderRouter::new(config.strategy, pricing.clone(), tracker.clone());

        Ok(Self {
            providers,
            router,
            tracker,
            pricing,
            usage: Arc::new(TokenUsageTracker::new()),
            telemetry: Arc::new(Telemetry::disabled()),
            limiter: None,
            config,
        })
    }

    /// Record successful calls into a shared token usage tracker.
    pub fn with_usage_tracker(mut self, usage: Arc<TokenUsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    /// Instrument calls through a shared telemetry registry.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Gate the chat entry through a rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Registered provider names in registration order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Statistics and health tracker shared with the strategies.
    pub fn tracker(&self) -> &Arc<ProviderTracker> {
        &self.tracker
    }

    /// Per-provider statistics snapshot.
    pub fn statistics(&self, provider: &str) -> Option<ProviderStatistics> {
        self.tracker.statistics(provider)
    }

    /// Usage tracker fed by successful calls.
    pub fn usage(&self) -> &Arc<TokenUsageTracker> {
        &self.usage
    }

    /// Single-shot chat with a routing context derived from the request.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse> {
        self.chat_with_context(request, RoutingContext::for_request(request), cancel)
            .await
    }

    /// Single-shot chat under a caller-supplied routing context.
    pub async fn chat_with_context(
        &self,
        request: &ChatRequest,
        mut ctx: RoutingContext,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse> {
        request.validate()?;
        self.check_rate_limit()?;

        let max_retries = self.retry_budget();
        let mut attempt: u32 = 0;
        let mut exclusions_reset = false;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let provider = match self.router.select(&self.providers, &ctx) {
                Ok(provider) => provider,
                Err(err) => {
                    // Every provider may have been excluded by earlier
                    // attempts; one reset of the exclusion set is
                    // allowed while retries remain.
                    if attempt < max_retries
                        && !exclusions_reset
                        && !ctx.excluded_providers.is_empty()
                    {
                        debug!("all providers excluded, resetting exclusion set");
                        ctx.excluded_providers.clear();
                        exclusions_reset = true;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            let mut span = self.telemetry.start_span("llm.call", SpanKind::Client);
            span.set_attribute("provider.name", provider.name());
            let started = Instant::now();

            match provider.chat(request, cancel).await {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.record_success(provider.name(), &ctx, &response, latency_ms);
                    span.set_attribute("success", "true");
                    span.set_status(SpanStatus::Ok);
                    span.end();
                    return Ok(response);
                }
                Err(LlmError::Cancelled) => {
                    // Cancellation propagates immediately and never
                    // touches health.
                    span.set_status(SpanStatus::Error);
                    span.end();
                    return Err(LlmError::Cancelled);
                }
                Err(err) => {
                    span.set_attribute("success", "false");
                    span.set_attribute("error_type", error_type(&err));
                    span.set_status(SpanStatus::Error);
                    span.end();

                    if err.is_retryable() {
                        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                        self.record_failure(provider.name(), &err, latency_ms);
                    }
                    if err.is_retryable() && attempt < max_retries {
                        warn!(
                            provider = provider.name(),
                            attempt = attempt,
                            error = %err,
                            "provider failed, failing over"
                        );
                        ctx.excluded_providers.insert(provider.name().to_string());
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Streaming chat with a routing context derived from the request.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        let mut ctx = RoutingContext::for_request(request);
        ctx.requires_streaming = true;
        self.chat_stream_with_context(request, ctx, cancel).await
    }

    /// Streaming chat under a caller-supplied routing context. Failover
    /// ends once a provider hands back a stream; chunk-level errors are
    /// surfaced as-is and reported to health on first occurrence.
    pub async fn chat_stream_with_context(
        &self,
        request: &ChatRequest,
        mut ctx: RoutingContext,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        request.validate()?;
        self.check_rate_limit()?;

        let max_retries = self.retry_budget();
        let mut attempt: u32 = 0;
        let mut exclusions_reset = false;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let provider = match self.router.select(&self.providers, &ctx) {
                Ok(provider) => provider,
                Err(err) => {
                    if attempt < max_retries
                        && !exclusions_reset
                        && !ctx.excluded_providers.is_empty()
                    {
                        ctx.excluded_providers.clear();
                        exclusions_reset = true;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            let started = Instant::now();
            match provider.chat_stream(request, cancel).await {
                Ok(inner) => {
                    let observer = StreamObserver {
                        provider: provider.name().to_string(),
                        model_hint: self.model_hint(&ctx, provider.name()),
                        prompt_estimate: ctx.estimated_input_tokens,
                        started,
                        content_tokens: 0,
                        reported_usage: None,
                        finished: false,
                        tracker: self.tracker.clone(),
                        pricing: self.pricing.clone(),
                        usage: self.usage.clone(),
                        telemetry: self.telemetry.clone(),
                    };
                    return Ok(Box::pin(ObservedStream {
                        inner,
                        observer,
                        cancel: cancel.clone(),
                    }));
                }
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(err) => {
                    if err.is_retryable() {
                        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                        self.record_failure(provider.name(), &err, latency_ms);
                    }
                    if err.is_retryable() && attempt < max_retries {
                        ctx.excluded_providers.insert(provider.name().to_string());
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn retry_budget(&self) -> u32 {
        if self.config.enable_failover {
            self.config.max_failover_retries
        } else {
            0
        }
    }

    fn check_rate_limit(&self) -> LlmResult<()> {
        if let Some(limiter) = &self.limiter {
            if let RateLimitDecision::Denied { retry_after, reason } = limiter.check(CHAT_RATE_KEY)
            {
                warn!(reason = %reason, "chat entry rate limited");
                return Err(LlmError::RateLimited { retry_after });
            }
        }
        Ok(())
    }

    /// Pricing lookups prefer the requested model over the provider
    /// name, so custom model pricing applies across providers.
    fn model_hint(&self, ctx: &RoutingContext, provider: &str) -> String {
        ctx.preferred_model
            .clone()
            .unwrap_or_else(|| provider.to_string())
    }

    fn record_success(
        &self,
        provider: &str,
        ctx: &RoutingContext,
        response: &ChatResponse,
        latency_ms: f64,
    ) {
        let model_hint = self.model_hint(ctx, provider);
        let cost = self.pricing.cost_for(
            &model_hint,
            response.prompt_tokens,
            response.completion_tokens,
        );
        self.tracker.report(
            provider,
            Outcome::Success {
                latency_ms,
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
                cost,
            },
        );
        self.usage.record(
            provider,
            Some(&model_hint),
            None,
            response.prompt_tokens as u64,
            response.completion_tokens as u64,
        );
        self.telemetry.counter_add(
            "llm.requests",
            &[("provider.name", provider), ("success", "true")],
            1,
        );
        self.telemetry
            .histogram_record("llm.latency_ms", &[("provider.name", provider)], latency_ms);
    }

    fn record_failure(&self, provider: &str, err: &LlmError, latency_ms: f64) {
        self.tracker.report(
            provider,
            Outcome::Failure {
                latency_ms,
                error: err.to_string(),
            },
        );
        self.telemetry.counter_add(
            "llm.requests",
            &[
                ("provider.name", provider),
                ("success", "false"),
                ("error_type", error_type(err)),
            ],
            1,
        );
    }
}

#[async_trait::async_trait]
impl ChatProvider for RoutingProvider {
    fn name(&self) -> &str {
        "routing"
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse> {
        RoutingProvider::chat(self, request, cancel).await
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        RoutingProvider::chat_stream(self, request, cancel).await
    }
}

fn error_type(err: &LlmError) -> &'static str {
    match err {
        LlmError::Transport(_) => "transport",
        LlmError::Provider(_) => "provider",
        LlmError::NoHealthyProvider => "no_healthy_provider",
        LlmError::RateLimited { .. } => "rate_limited",
        LlmError::Timeout(_) => "timeout",
        LlmError::Cancelled => "cancelled",
        LlmError::Configuration(_) => "configuration",
    }
}

/// Accumulates chunk observations and reports the stream's outcome
/// exactly once, on completion or first error.
struct StreamObserver {
    provider: String,
    model_hint: String,
    prompt_estimate: u32,
    started: Instant,
    content_tokens: u32,
    reported_usage: Option<StreamUsage>,
    finished: bool,
    tracker: Arc<ProviderTracker>,
    pricing: Arc<PricingTable>,
    usage: Arc<TokenUsageTracker>,
    telemetry: Arc<Telemetry>,
}

impl StreamObserver {
    fn observe(&mut self, chunk: &StreamChunk) {
        // Whitespace-token counting; an estimate unless the provider
        // reports usage on its final chunk.
        self.content_tokens += chunk.content.split_whitespace().count() as u32;
        if let Some(usage) = chunk.usage {
            self.reported_usage = Some(usage);
        }
        if chunk.finish_reason.is_some() {
            self.finish();
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let (prompt_tokens, completion_tokens) = match self.reported_usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (self.prompt_estimate, self.content_tokens),
        };
        let cost = self
            .pricing
            .cost_for(&self.model_hint, prompt_tokens, completion_tokens);
        self.tracker.report(
            &self.provider,
            Outcome::Success {
                latency_ms,
                input_tokens: prompt_tokens,
                output_tokens: completion_tokens,
                cost,
            },
        );
        self.usage.record(
            &self.provider,
            Some(&self.model_hint),
            None,
            prompt_tokens as u64,
            completion_tokens as u64,
        );
        self.telemetry.counter_add(
            "llm.requests",
            &[("provider.name", &self.provider), ("success", "true")],
            1,
        );
        self.telemetry.histogram_record(
            "llm.latency_ms",
            &[("provider.name", &self.provider)],
            latency_ms,
        );
    }

    fn fail(&mut self, err: &LlmError) {
        if self.finished {
            return;
        }
        self.finished = true;
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.tracker.report(
            &self.provider,
            Outcome::Failure {
                latency_ms,
                error: err.to_string(),
            },
        );
        self.telemetry.counter_add(
            "llm.requests",
            &[
                ("provider.name", &self.provider),
                ("success", "false"),
                ("error_type", error_type(err)),
            ],
            1,
        );
    }

    /// Cancellation neither succeeds nor fails the provider.
    fn cancelled(&mut self) {
        self.finished = true;
    }
}

pin_project! {
    struct ObservedStream {
        #[pin]
        inner: ChatStream,
        observer: StreamObserver,
        cancel: CancellationToken,
    }
}

impl Stream for ObservedStream {
    type Item = LlmResult<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.observer.finished {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            this.observer.cancelled();
            return Poll::Ready(Some(Err(LlmError::Cancelled)));
        }
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.observer.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.observer.fail(&err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.observer.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
