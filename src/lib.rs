// Switchboard - Agent Runtime Core
// Mediates between agent workloads and a pool of heterogeneous LLM providers

//! # Switchboard Library
//!
//! This is the main library crate for Switchboard, the core of an agent
//! runtime: a provider router with health-driven failover, agent
//! orchestrators, and a human-in-loop arbitration layer, instrumented
//! through a shared observability and rate-limiting substrate.
//!
//! ## Core Components
//!
//! ### Provider Routing
//! - [`ChatProvider`]: the abstract chat capability every back-end
//!   implements (single-shot and streaming)
//! - [`RoutingProvider`]: the provider-agnostic entry point. Selects
//!   one provider per request, invokes it, records the outcome, and
//!   transparently fails over to the next candidate on retryable errors
//! - [`ProviderTracker`]: per-provider statistics and the two-state
//!   health machine driven by consecutive-outcome streaks
//! - [`PricingTable`]: substring-matched per-model cost rates feeding
//!   the cost-optimized strategy and cost accounting
//! - [`RoutingStrategy`]: cost, latency, round-robin, weighted, and
//!   random orderings over the healthy candidate list
//!
//! ### Orchestration
//! - [`SequentialOrchestrator`]: chains agents, feeding each the
//!   previous output
//! - [`ParallelOrchestrator`]: fans one input out under bounded
//!   concurrency and reduces the results with a
//!   [`ResultAggregationStrategy`]
//!
//! ### Human-in-loop
//! - [`CallbackHandler`]: pending-request tables whose promises are
//!   completed out-of-band by a UI or API completer
//! - [`ApprovalManager`]: risk assessment, confirmation dispatch, and
//!   the approval/rejection/timeout mapping
//! - [`HumanLoopAgent`]: wraps any [`Agent`] with approval gates,
//!   retry-with-guidance, and escalation resolution
//!
//! ### Substrate
//! - [`RateLimiter`]: per-key sliding-window admission
//! - [`TokenUsageTracker`]: in-memory usage aggregation by source,
//!   session, and model
//! - [`Telemetry`]: counters, histograms, gauges, and spans with
//!   three-field trace propagation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::{ChatMessage, ChatRequest, RouterConfig, RoutingProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn route(providers: Vec<Arc<dyn switchboard::ChatProvider>>) {
//!     let routing = RoutingProvider::new(providers, RouterConfig::default()).unwrap();
//!     let request = ChatRequest::new(vec![ChatMessage::user("hello")]);
//!     let response = routing.chat(&request, &CancellationToken::new()).await.unwrap();
//!     println!("{}", response.content);
//! }
//! ```

pub mod agent;
pub mod human;
pub mod limits;
pub mod llm;
pub mod orchestration;
pub mod telemetry;
pub mod usage;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the boundary surface at the crate root.
pub use agent::{Agent, AgentError, AgentInput, AgentResponse, AgentResult, AgentStep};
pub use human::approval::ApprovalManager;
pub use human::callback::{CallbackHandler, HumanInteraction};
pub use human::wrapper::HumanLoopAgent;
pub use human::{
    ApprovalResult, ConfirmationOption, ConfirmationRequest, ConfirmationResponse,
    ConfirmationType, EscalationAction, EscalationRequest, EscalationResult,
    HumanInteractionHandler, HumanLoopConfig, HumanLoopError, InputRequest, RiskLevel,
    TimeoutAction,
};
pub use limits::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use llm::pricing::{ModelPricing, PricingTable};
pub use llm::router::RoutingProvider;
pub use llm::stats::{Outcome, ProviderHealth, ProviderStatistics, ProviderTracker};
pub use llm::traits::{ChatProvider, ChatStream, StreamChunk, StreamUsage};
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmError, LlmResult, MessageRole, Priority,
    RouterConfig, RoutingContext, RoutingStrategy,
};
pub use orchestration::parallel::ParallelOrchestrator;
pub use orchestration::sequential::{InputTransformer, SequentialOrchestrator};
pub use orchestration::{
    AgentExecutionRecord, OrchestrationContext, OrchestrationResult, OrchestratorConfig,
    ResultAggregationStrategy,
};
pub use telemetry::{HistogramSnapshot, Span, SpanContext, SpanKind, SpanStatus, Telemetry};
pub use usage::{TokenUsageTracker, UsageFilter, UsageRecord, UsageReport, UsageScope, UsageTotals};
