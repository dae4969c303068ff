//! Common traits and types for LLM providers
//!
//! This module defines the core interface that all chat providers must
//! implement. Providers are consumed as an opaque capability: one
//! single-shot call and one streaming call, both cooperatively
//! cancellable.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use super::{ChatRequest, ChatResponse, LlmResult};

/// A lazy, finite, non-restartable sequence of response chunks.
///
/// Cancellation is observed at chunk boundaries; once a chunk has been
/// produced, failover is over and mid-stream errors surface as-is.
pub type ChatStream = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

/// One streamed fragment of a chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
    /// Token usage, reported by providers that emit a usage trailer on
    /// the final chunk. When absent, the router estimates completion
    /// tokens by whitespace-splitting the accumulated content; streaming
    /// counts are estimates, never exact.
    pub usage: Option<StreamUsage>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn done(finish_reason: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            finish_reason: Some(finish_reason.into()),
            usage: None,
        }
    }
}

/// Usage trailer attached to a final streaming chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Core trait that all chat providers must implement.
///
/// `name` is stable and unique for the provider's lifetime; the router
/// keys statistics, health, and exclusion sets by it.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name.
    fn name(&self) -> &str;

    /// Send a single-shot chat completion request.
    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse>;

    /// Send a streaming chat completion request. The returned stream
    /// yields chunks until a chunk carries a `finish_reason` or the
    /// stream ends.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream>;
}
