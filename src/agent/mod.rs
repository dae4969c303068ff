//! Agent capability
//!
//! An agent accepts text input and produces a textual response,
//! possibly after inner LLM calls and tool invocations. The escalation
//! failure is a distinguished variant so the human-in-loop wrapper can
//! catch it specifically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::human::EscalationRequest;
use crate::llm::LlmError;

/// Input handed to an agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub text: String,
    pub session_id: String,
    pub max_steps: Option<u32>,
}

impl AgentInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: Uuid::new_v4().to_string(),
            max_steps: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Observational record of one step the agent took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub description: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    pub fn new(description: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            output: output.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The textual outcome of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub final_answer: String,
    pub steps: Vec<AgentStep>,
    pub duration: Duration,
}

impl AgentResponse {
    pub fn successful(final_answer: impl Into<String>) -> Self {
        Self {
            success: true,
            final_answer: final_answer.into(),
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            final_answer: reason.into(),
            steps: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Agent-layer errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("agent failed: {0}")]
    Failed(String),

    #[error("agent timed out: {0}")]
    Timeout(String),

    #[error("agent cancelled")]
    Cancelled,

    #[error("escalation required: {}", .0.reason)]
    Escalation(EscalationRequest),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AgentError {
    /// Cancellation at either layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AgentError::Cancelled | AgentError::Llm(LlmError::Cancelled)
        )
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Core agent capability.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent name, used in records and telemetry tags.
    fn name(&self) -> &str;

    /// Run the agent on `input` until it produces a response or fails.
    async fn run(
        &self,
        input: &AgentInput,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentResponse>;
}
