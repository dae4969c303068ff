//! Parallel orchestrator
//!
//! Fans the same input out to every agent under a bounded concurrency
//! gate, bounds the whole run with a deadline, and reduces the finished
//! records with the configured aggregation strategy. Invocations are
//! unordered; `execution_order` reflects dispatch index, not
//! completion.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    base_metadata, AgentExecutionRecord, OrchestrationContext, OrchestrationResult,
    OrchestratorConfig, ResultAggregationStrategy,
};
use crate::agent::{Agent, AgentInput, AgentResponse};
use crate::telemetry::{SpanKind, SpanStatus, Telemetry};

/// Runs agents concurrently over one shared input.
pub struct ParallelOrchestrator {
    agents: Vec<Arc<dyn Agent>>,
    config: OrchestratorConfig,
    telemetry: Arc<Telemetry>,
}

impl ParallelOrchestrator {
    pub fn new(agents: Vec<Arc<dyn Agent>>, config: OrchestratorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        if agents.is_empty() {
            anyhow::bail!("at least one agent is required");
        }
        Ok(Self {
            agents,
            config,
            telemetry: Arc::new(Telemetry::disabled()),
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Fan out, wait for completion or the overall deadline, aggregate.
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> OrchestrationResult {
        self.run_inner(input, &Uuid::new_v4().to_string(), cancel)
            .await
    }

    /// Fan out from an existing context. The context's current input is
    /// the shared fan-out input; finished records are appended to its
    /// history and the aggregated output becomes its current input.
    pub async fn run_with_context(
        &self,
        ctx: &mut OrchestrationContext,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        if ctx.should_stop {
            return OrchestrationResult {
                success: true,
                final_output: Some(ctx.current_input.clone()),
                error: None,
                agent_results: Vec::new(),
                duration: Duration::ZERO,
                metadata: base_metadata(self.agents.len(), &[], Some(&self.config.aggregation)),
            };
        }
        let input = ctx.current_input.clone();
        let result = self.run_inner(&input, &ctx.session_id, cancel).await;
        ctx.execution_history.extend(result.agent_results.iter().cloned());
        if let Some(output) = &result.final_output {
            ctx.current_input = output.clone();
        }
        result
    }

    async fn run_inner(
        &self,
        input: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let started = Instant::now();
        let total = self.agents.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let child_cancel = cancel.child_token();
        let agent_timeout = Duration::from_secs(self.config.agent_timeout_seconds);
        let mut span = self.telemetry.start_span("agent.request", SpanKind::Internal);
        span.set_attribute("agent.name", "parallel");

        let mut join_set = JoinSet::new();
        for (index, agent) in self.agents.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let cancel = child_cancel.clone();
            let input = AgentInput::new(input).with_session(session_id);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return failed_record(&agent, &input, index, "concurrency gate closed")
                    }
                };
                let started_at = Utc::now();
                let response = tokio::select! {
                    _ = cancel.cancelled() => AgentResponse::failed("cancelled"),
                    outcome = tokio::time::timeout(agent_timeout, agent.run(&input, &cancel)) => {
                        match outcome {
                            Ok(Ok(response)) => response,
                            Ok(Err(err)) => AgentResponse::failed(err.to_string()),
                            Err(_) => AgentResponse::failed(format!(
                                "agent '{}' timed out after {:?}",
                                agent.name(),
                                agent_timeout
                            )),
                        }
                    }
                };
                AgentExecutionRecord {
                    agent_name: agent.name().to_string(),
                    input: input.text.clone(),
                    response,
                    execution_order: index,
                    started_at,
                    completed_at: Utc::now(),
                }
            });
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.timeout_seconds);
        let mut records: Vec<AgentExecutionRecord> = Vec::new();
        let mut timed_out = false;
        while records.len() < total {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok(record))) => records.push(record),
                Ok(Some(Err(join_err))) => {
                    warn!(error = %join_err, "parallel agent task failed to join")
                }
                Ok(None) => break,
                Err(_) => {
                    // Deadline hit: cancel everything still running and
                    // keep whatever completed.
                    warn!(
                        finished = records.len(),
                        total = total,
                        "orchestration deadline reached, cancelling outstanding agents"
                    );
                    timed_out = true;
                    child_cancel.cancel();
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok(record) = joined {
                            records.push(record);
                        }
                    }
                    break;
                }
            }
        }
        records.sort_by_key(|r| r.execution_order);

        let final_output = self.aggregate(&records);
        let success = final_output.is_some() && !timed_out;
        let error = if timed_out {
            Some("orchestration timed out".to_string())
        } else if final_output.is_none() {
            Some(format!("all {} agents failed", total))
        } else {
            None
        };
        debug!(success = success, records = records.len(), "parallel run finished");

        let mut metadata = base_metadata(total, &records, Some(&self.config.aggregation));
        metadata.insert("timed_out".to_string(), serde_json::json!(timed_out));

        span.set_status(if success { SpanStatus::Ok } else { SpanStatus::Error });
        span.end();
        OrchestrationResult {
            success,
            final_output,
            error,
            agent_results: records,
            duration: started.elapsed(),
            metadata,
        }
    }

    /// Reduce the record list per the configured strategy. `None`
    /// means no output could be produced (for the built-in strategies,
    /// no agent succeeded).
    fn aggregate(&self, records: &[AgentExecutionRecord]) -> Option<String> {
        let successful: Vec<&AgentExecutionRecord> =
            records.iter().filter(|r| r.response.success).collect();
        match &self.config.aggregation {
            ResultAggregationStrategy::LastResult => successful
                .iter()
                .max_by_key(|r| r.completed_at)
                .map(|r| r.response.final_answer.clone()),
            ResultAggregationStrategy::FirstSuccess => successful
                .iter()
                .min_by_key(|r| r.completed_at)
                .map(|r| r.response.final_answer.clone()),
            ResultAggregationStrategy::Merge => {
                if successful.is_empty() {
                    None
                } else {
                    Some(
                        successful
                            .iter()
                            .map(|r| format!("[{}] {}", r.agent_name, r.response.final_answer))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    )
                }
            }
            ResultAggregationStrategy::Vote => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for record in &successful {
                    *counts.entry(record.response.final_answer.as_str()).or_default() += 1;
                }
                // Walk in execution order so ties keep the earliest
                // answer.
                let mut winner: Option<(&str, usize)> = None;
                for record in &successful {
                    let answer = record.response.final_answer.as_str();
                    let votes = counts[answer];
                    if winner.map_or(true, |(_, best)| votes > best) {
                        winner = Some((answer, votes));
                    }
                }
                winner.map(|(answer, _)| answer.to_string())
            }
            ResultAggregationStrategy::Custom(aggregator) => aggregator(records),
        }
    }
}

fn failed_record(
    agent: &Arc<dyn Agent>,
    input: &AgentInput,
    index: usize,
    reason: &str,
) -> AgentExecutionRecord {
    let now = Utc::now();
    AgentExecutionRecord {
        agent_name: agent.name().to_string(),
        input: input.text.clone(),
        response: AgentResponse::failed(reason),
        execution_order: index,
        started_at: now,
        completed_at: now,
    }
}
