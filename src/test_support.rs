//! Shared test doubles: scriptable providers and agents.
//!
//! Kept out of the public API; only compiled for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentError, AgentInput, AgentResponse, AgentResult};
use crate::llm::traits::{ChatProvider, ChatStream, StreamChunk};
use crate::llm::{ChatRequest, ChatResponse, LlmError, LlmResult};

/// Provider that always answers with a fixed body.
pub struct StaticProvider {
    name: String,
    content: String,
    pub calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            calls: AtomicUsize::new(0),
        }
    }

    fn response(&self) -> ChatResponse {
        ChatResponse {
            content: self.content.clone(),
            prompt_tokens: 10,
            completion_tokens: 20,
            finish_reason: "stop".to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        _request: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response())
    }

    async fn chat_stream(
        &self,
        _request: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<LlmResult<StreamChunk>> = self
            .content
            .split_whitespace()
            .map(|w| Ok(StreamChunk::content(format!("{} ", w))))
            .chain(std::iter::once(Ok(StreamChunk::done("stop"))))
            .collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
}

/// Provider that replays a script of outcomes, then keeps succeeding.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<LlmResult<ChatResponse>>>,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then_fail(self, error: LlmError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn then_answer(self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.script.lock().unwrap().push_back(Ok(ChatResponse {
            content,
            prompt_tokens: 10,
            completion_tokens: 20,
            finish_reason: "stop".to_string(),
        }));
        self
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        _request: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> LlmResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(ChatResponse {
                content: format!("{} default", self.name),
                prompt_tokens: 10,
                completion_tokens: 20,
                finish_reason: "stop".to_string(),
            }),
        }
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        // Streams replay the same script: an Err entry fails stream
        // creation (pre-first-chunk), an Ok entry streams its content.
        let response = self.chat(request, cancel).await?;
        self.calls.fetch_sub(1, Ordering::SeqCst);
        let chunks: Vec<LlmResult<StreamChunk>> = response
            .content
            .split_whitespace()
            .map(|w| Ok(StreamChunk::content(format!("{} ", w))))
            .chain(std::iter::once(Ok(StreamChunk::done("stop"))))
            .collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
}

/// Agent that echoes its input unchanged.
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        Ok(AgentResponse::successful(input.text.clone()))
    }
}

/// Agent that always answers with a fixed string.
pub struct StaticAgent {
    name: String,
    answer: String,
    delay: Option<Duration>,
}

impl StaticAgent {
    pub fn new(name: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            answer: answer.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Agent for StaticAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _input: &AgentInput, cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            }
        }
        Ok(AgentResponse::successful(self.answer.clone()))
    }
}

/// Agent that fails a scripted number of times before succeeding. Each
/// run records the input it saw, so guidance-retry tests can inspect
/// what was appended.
pub struct FlakyAgent {
    name: String,
    failures_remaining: AtomicUsize,
    pub seen_inputs: Mutex<Vec<String>>,
}

impl FlakyAgent {
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures_remaining: AtomicUsize::new(failures),
            seen_inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        self.seen_inputs.lock().unwrap().push(input.text.clone());
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::Failed("tool crashed".to_string()));
        }
        Ok(AgentResponse::successful("recovered"))
    }
}

/// Agent that always raises an escalation.
pub struct EscalatingAgent {
    name: String,
}

impl EscalatingAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EscalatingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        Err(AgentError::Escalation(
            crate::human::EscalationRequest::new(
                "needs human judgment",
                "the task is ambiguous",
            ),
        ))
    }
}
