//! Human-in-loop agent wrapper
//!
//! Decorates an inner agent with the same agent interface, interposing
//! human decisions at three points: an optional approval gate before
//! execution, a retry-with-guidance loop around failures, and an
//! optional review gate over successful output. Escalations raised by
//! the inner agent (or by exhausting retries) are handed to a human
//! for resolution.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::approval::ApprovalManager;
use super::{
    ApprovalResult, ConfirmationRequest, EscalationAction, EscalationRequest,
    HumanInteractionHandler, HumanLoopConfig, HumanLoopError,
};
use crate::agent::{Agent, AgentError, AgentInput, AgentResponse, AgentResult};
use crate::telemetry::{SpanKind, SpanStatus, Telemetry};

/// Agent decorator that suspends on human decisions.
pub struct HumanLoopAgent {
    inner: Arc<dyn Agent>,
    handler: Arc<dyn HumanInteractionHandler>,
    approvals: ApprovalManager,
    config: HumanLoopConfig,
    telemetry: Arc<Telemetry>,
}

impl HumanLoopAgent {
    pub fn new(
        inner: Arc<dyn Agent>,
        handler: Arc<dyn HumanInteractionHandler>,
        config: HumanLoopConfig,
    ) -> Result<Self, HumanLoopError> {
        let approvals = ApprovalManager::new(config.clone(), handler.clone())?;
        Ok(Self {
            inner,
            handler,
            approvals,
            config,
            telemetry: Arc::new(Telemetry::disabled()),
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Retry the inner agent, asking a human for guidance after each
    /// failure. The literal input `abort` (case-insensitive) cancels;
    /// exhausting retries raises an escalation carrying the guidance
    /// that was attempted.
    async fn run_with_guidance(
        &self,
        input: &AgentInput,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentResponse> {
        let base_text = input.text.clone();
        let mut input = input.clone();
        let mut guidance_given: Vec<String> = Vec::new();
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            match self.inner.run(&input, cancel).await {
                Ok(response) if response.success => return Ok(response),
                Ok(response) => last_error = response.final_answer,
                Err(err @ AgentError::Escalation(_)) => return Err(err),
                Err(err) if err.is_cancelled() => return Err(AgentError::Cancelled),
                Err(err) => last_error = err.to_string(),
            }
            if attempt == self.config.max_retries {
                break;
            }

            warn!(
                agent = self.inner.name(),
                attempt = attempt,
                error = %last_error,
                "agent failed, requesting guidance"
            );
            let prompt = format!(
                "agent encountered error: {}. Provide guidance, or type 'abort' to stop.",
                last_error
            );
            let guidance = match self.handler.request_input(&prompt, cancel).await {
                Ok(guidance) => guidance,
                Err(HumanLoopError::Cancelled) => return Err(AgentError::Cancelled),
                // Nobody answered; fall through to escalation.
                Err(HumanLoopError::Timeout) => break,
                Err(err) => return Err(AgentError::Failed(err.to_string())),
            };
            if guidance.trim().eq_ignore_ascii_case("abort") {
                return Err(AgentError::Cancelled);
            }

            guidance_given.push(guidance);
            // Session id and max steps carry over; only the text grows.
            input.text = format!(
                "{}\n\nadditional guidance: {}",
                base_text,
                guidance_given.join("\n")
            );
        }

        Err(AgentError::Escalation(
            EscalationRequest::new(
                "retries exhausted",
                format!(
                    "agent '{}' failed after {} attempts; last error: {}",
                    self.inner.name(),
                    self.config.max_retries + 1,
                    last_error
                ),
            )
            .with_attempts(guidance_given),
        ))
    }

    async fn resolve_escalation(
        &self,
        escalation: EscalationRequest,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentResponse> {
        info!(agent = self.inner.name(), reason = %escalation.reason, "escalating to human");
        match self.handler.escalate(escalation, cancel).await {
            Ok(result) => match result.action {
                EscalationAction::Resolved => Ok(AgentResponse::successful(
                    result.resolution.unwrap_or_else(|| "resolved".to_string()),
                )),
                EscalationAction::Skipped => Ok(AgentResponse::successful("skipped")),
                EscalationAction::Aborted => Ok(AgentResponse::failed("aborted")),
            },
            Err(HumanLoopError::Cancelled) => Err(AgentError::Cancelled),
            Err(HumanLoopError::Timeout) => Ok(AgentResponse::failed("escalation timed out")),
            Err(err) => Err(AgentError::Failed(err.to_string())),
        }
    }

    async fn review(
        &self,
        mut response: AgentResponse,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentResponse> {
        let request = ConfirmationRequest::review(
            "review agent output",
            format!(
                "agent '{}' produced: {}",
                self.inner.name(),
                response.final_answer
            ),
        )
        .with_timeout(self.config.default_timeout);

        match self.handler.request_confirmation(request, cancel).await {
            Ok(decision) => match decision.selected_option.as_str() {
                "edit" => {
                    if let Some(content) = decision.modified_content {
                        response.final_answer = content;
                    }
                    Ok(response)
                }
                "reject" => Ok(AgentResponse::failed(
                    decision
                        .reason
                        .unwrap_or_else(|| "rejected in review".to_string()),
                )),
                // approve, or the synthetic timeout, keeps the result
                _ => Ok(response),
            },
            Err(HumanLoopError::Cancelled) => Err(AgentError::Cancelled),
            Err(err) => Err(AgentError::Failed(err.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Agent for HumanLoopAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(
        &self,
        input: &AgentInput,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentResponse> {
        let mut span = self.telemetry.start_span("agent.request", SpanKind::Internal);
        span.set_attribute("agent.name", self.inner.name());

        if self.config.confirm_before_execution {
            let mut context = HashMap::new();
            context.insert(
                "agent".to_string(),
                serde_json::Value::from(self.inner.name()),
            );
            let approval = self
                .approvals
                .request_approval(
                    "execute agent task",
                    &format!("agent '{}' will handle: {}", self.inner.name(), input.text),
                    &context,
                    cancel,
                )
                .await
                .map_err(loop_error_to_agent)?;
            if !approval.is_approved() {
                let reason = match approval {
                    ApprovalResult::Rejected { reason, .. } => {
                        reason.unwrap_or_else(|| "execution rejected".to_string())
                    }
                    ApprovalResult::TimedOut { .. } => "approval timed out".to_string(),
                    _ => "execution not approved".to_string(),
                };
                span.set_status(SpanStatus::Error);
                span.end();
                return Ok(AgentResponse::failed(reason));
            }
        }

        let outcome = self.run_with_guidance(input, cancel).await;
        let response = match outcome {
            Ok(response) => Ok(response),
            Err(AgentError::Escalation(escalation)) => {
                self.resolve_escalation(escalation, cancel).await
            }
            Err(err) => Err(err),
        };

        let response = match response {
            Ok(response) if self.config.review_before_return && response.success => {
                self.review(response, cancel).await
            }
            other => other,
        };

        match &response {
            Ok(r) => {
                span.set_attribute("success", if r.success { "true" } else { "false" });
                span.set_status(if r.success {
                    SpanStatus::Ok
                } else {
                    SpanStatus::Error
                });
            }
            Err(_) => span.set_status(SpanStatus::Error),
        }
        span.end();
        response
    }
}

fn loop_error_to_agent(err: HumanLoopError) -> AgentError {
    match err {
        HumanLoopError::Cancelled => AgentError::Cancelled,
        other => AgentError::Failed(other.to_string()),
    }
}
