//! LLM Provider Routing and Management
//!
//! This module provides the core infrastructure for LLM provider routing:
//! the chat data model, the per-provider statistics and health tracker,
//! the pricing table, the selection strategies, and the failover-capable
//! routing provider that ties them together.

pub mod pricing;
pub mod router;
pub mod stats;
pub mod strategy;
pub mod traits;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::llm::pricing::ModelPricing;
pub use crate::llm::strategy::RoutingStrategy;

/// Message roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message structure
///
/// Messages form an ordered sequence; identity is positional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 1000,
            system_prompt: None,
            stream: false,
        }
    }

    /// Validate parameter ranges. Temperature must be within [0, 2] and
    /// max_tokens strictly positive.
    pub fn validate(&self) -> LlmResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::Configuration(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(LlmError::Configuration(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Rough input-size estimate: ~4 characters per token across all
    /// message content plus the system prompt.
    pub fn estimate_input_tokens(&self) -> u32 {
        let total_chars: usize = self
            .messages
            .iter()
            .map(|msg| msg.content.len())
            .chain(self.system_prompt.iter().map(|p| p.len()))
            .sum();
        (total_chars / 4) as u32
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub finish_reason: String,
}

impl ChatResponse {
    /// Derived field: prompt + completion tokens.
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Request priority for routing decisions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Routing context carried alongside a request to influence provider
/// selection.
///
/// `max_latency_ms` and `max_cost` of zero mean unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingContext {
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    pub priority: Priority,
    pub max_latency_ms: u64,
    pub max_cost: f64,
    pub preferred_model: Option<String>,
    pub requires_streaming: bool,
    pub excluded_providers: HashSet<String>,
}

impl RoutingContext {
    /// Build a routing context from a chat request, estimating input
    /// tokens from message content and taking `max_tokens` as the output
    /// estimate.
    pub fn for_request(request: &ChatRequest) -> Self {
        Self {
            estimated_input_tokens: request.estimate_input_tokens(),
            estimated_output_tokens: if request.max_tokens > 0 {
                request.max_tokens
            } else {
                1000
            },
            requires_streaming: request.stream,
            ..Default::default()
        }
    }
}

/// Error types for LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("no healthy provider available")]
    NoHealthyProvider,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Whether the failover loop may retry this error on another
    /// provider. Cancellation and selection failures never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::Provider(_) | LlmError::Timeout(_)
        )
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    pub enable_failover: bool,
    pub max_failover_retries: u32,
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
    pub custom_pricing: HashMap<String, ModelPricing>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::CostOptimized,
            enable_failover: true,
            max_failover_retries: 2,
            unhealthy_threshold: 3,
            recovery_threshold: 2,
            custom_pricing: HashMap::new(),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> LlmResult<()> {
        if self.unhealthy_threshold == 0 {
            return Err(LlmError::Configuration(
                "unhealthy_threshold must be at least 1".to_string(),
            ));
        }
        if self.recovery_threshold == 0 {
            return Err(LlmError::Configuration(
                "recovery_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
