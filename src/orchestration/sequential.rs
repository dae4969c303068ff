//! Sequential orchestrator
//!
//! Chains agents in order, feeding each one the previous agent's output
//! (or a caller-supplied transformation of its record). Strict
//! happens-before holds between consecutive agents.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    base_metadata, AgentExecutionRecord, OrchestrationContext, OrchestrationResult,
    OrchestratorConfig,
};
use crate::agent::{Agent, AgentInput, AgentResponse};
use crate::telemetry::{SpanKind, SpanStatus, Telemetry};

/// Maps a finished record to the next agent's input; defaults to the
/// record's final answer.
pub type InputTransformer = Arc<dyn Fn(&AgentExecutionRecord) -> String + Send + Sync>;

/// Runs agents one after another.
pub struct SequentialOrchestrator {
    agents: Vec<Arc<dyn Agent>>,
    config: OrchestratorConfig,
    transformer: Option<InputTransformer>,
    telemetry: Arc<Telemetry>,
}

impl SequentialOrchestrator {
    pub fn new(agents: Vec<Arc<dyn Agent>>, config: OrchestratorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        if agents.is_empty() {
            anyhow::bail!("at least one agent is required");
        }
        Ok(Self {
            agents,
            config,
            transformer: None,
            telemetry: Arc::new(Telemetry::disabled()),
        })
    }

    /// Replace the default output-to-input wiring.
    pub fn with_transformer(mut self, transformer: InputTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run the chain on a fresh context.
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> OrchestrationResult {
        let mut ctx = OrchestrationContext::new(input);
        self.run_with_context(&mut ctx, cancel).await
    }

    /// Run the chain on an existing context, honoring its `should_stop`
    /// flag between agents.
    pub async fn run_with_context(
        &self,
        ctx: &mut OrchestrationContext,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.timeout_seconds);
        let total = self.agents.len();
        let mut span = self.telemetry.start_span("agent.request", SpanKind::Internal);
        span.set_attribute("agent.name", "sequential");

        for (index, agent) in self.agents.iter().enumerate() {
            if ctx.should_stop {
                debug!(reason = ?ctx.stop_reason, "stopping before next agent");
                break;
            }
            if cancel.is_cancelled() {
                span.set_status(SpanStatus::Error);
                span.end();
                return self.finish(ctx, started, total, false, Some("orchestration cancelled"));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                span.set_status(SpanStatus::Error);
                span.end();
                return self.finish(ctx, started, total, false, Some("orchestration timed out"));
            }
            let agent_budget =
                remaining.min(Duration::from_secs(self.config.agent_timeout_seconds));

            let input = AgentInput::new(ctx.current_input.clone()).with_session(&ctx.session_id);
            let started_at = Utc::now();
            let outcome = tokio::time::timeout(agent_budget, agent.run(&input, cancel)).await;
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    if err.is_cancelled() {
                        span.set_status(SpanStatus::Error);
                        span.end();
                        return self.finish(
                            ctx,
                            started,
                            total,
                            false,
                            Some("orchestration cancelled"),
                        );
                    }
                    AgentResponse::failed(err.to_string())
                }
                Err(_) => AgentResponse::failed(format!(
                    "agent '{}' timed out after {:?}",
                    agent.name(),
                    agent_budget
                )),
            };

            let record = AgentExecutionRecord {
                agent_name: agent.name().to_string(),
                input: ctx.current_input.clone(),
                response,
                execution_order: index,
                started_at,
                completed_at: Utc::now(),
            };
            let failed = !record.response.success;
            let next_input = match &self.transformer {
                Some(transformer) => transformer(&record),
                None => record.response.final_answer.clone(),
            };
            let failure = failed.then(|| {
                format!(
                    "agent '{}' failed: {}",
                    agent.name(),
                    record.response.final_answer
                )
            });
            ctx.execution_history.push(record);

            if let Some(error) = failure {
                warn!(agent = agent.name(), "agent failed in chain");
                if !self.config.continue_on_error {
                    span.set_status(SpanStatus::Error);
                    span.end();
                    return self.finish(ctx, started, total, false, Some(&error));
                }
            }

            ctx.current_input = next_input;
        }

        span.set_status(SpanStatus::Ok);
        span.end();
        self.finish(ctx, started, total, true, None)
    }

    fn finish(
        &self,
        ctx: &OrchestrationContext,
        started: Instant,
        total: usize,
        success: bool,
        error: Option<&str>,
    ) -> OrchestrationResult {
        OrchestrationResult {
            success,
            final_output: success.then(|| ctx.current_input.clone()),
            error: error.map(str::to_string),
            agent_results: ctx.execution_history.clone(),
            duration: started.elapsed(),
            metadata: base_metadata(total, &ctx.execution_history, None),
        }
    }
}
