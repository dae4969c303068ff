//! Agent orchestration
//!
//! Composes multiple agents into pipelines: [`sequential`] chains
//! agents, feeding each one the previous output; [`parallel`] fans the
//! same input out under bounded concurrency and reduces the results
//! with an aggregation strategy.

pub mod parallel;
pub mod sequential;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::AgentResponse;

/// Record of one agent invocation inside an orchestration.
///
/// `execution_order` is the dispatch index, not the completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionRecord {
    pub agent_name: String,
    pub input: String,
    pub response: AgentResponse,
    pub execution_order: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Mutable state threaded through one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub session_id: String,
    pub user_input: String,
    pub current_input: String,
    pub execution_history: Vec<AgentExecutionRecord>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub should_stop: bool,
    pub stop_reason: Option<String>,
}

impl OrchestrationContext {
    pub fn new(input: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_input: input.clone(),
            current_input: input,
            execution_history: Vec::new(),
            metadata: HashMap::new(),
            should_stop: false,
            stop_reason: None,
        }
    }

    /// Ask the orchestrator to stop gracefully before the next agent.
    pub fn request_stop(&mut self, reason: impl Into<String>) {
        self.should_stop = true;
        self.stop_reason = Some(reason.into());
    }
}

/// Final outcome of an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub final_output: Option<String>,
    pub error: Option<String>,
    pub agent_results: Vec<AgentExecutionRecord>,
    pub duration: Duration,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Pure reduction over the full record list for custom aggregation.
pub type CustomAggregator =
    Arc<dyn Fn(&[AgentExecutionRecord]) -> Option<String> + Send + Sync>;

/// How parallel results reduce to a single final output.
#[derive(Clone, Default)]
pub enum ResultAggregationStrategy {
    /// Output of the last-completed successful record.
    #[default]
    LastResult,
    /// Output of the earliest-completed successful record.
    FirstSuccess,
    /// `"[name] output"` lines over successful records in execution
    /// order.
    Merge,
    /// Modal final answer over successful records; ties break by
    /// execution order.
    Vote,
    /// Caller-supplied pure function over the record list.
    Custom(CustomAggregator),
}

impl fmt::Debug for ResultAggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ResultAggregationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResultAggregationStrategy::LastResult => "last_result",
            ResultAggregationStrategy::FirstSuccess => "first_success",
            ResultAggregationStrategy::Merge => "merge",
            ResultAggregationStrategy::Vote => "vote",
            ResultAggregationStrategy::Custom(_) => "custom",
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub timeout_seconds: u64,
    pub agent_timeout_seconds: u64,
    pub continue_on_error: bool,
    pub aggregation: ResultAggregationStrategy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_seconds: 300,
            agent_timeout_seconds: 120,
            continue_on_error: false,
            aggregation: ResultAggregationStrategy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.timeout_seconds == 0 {
            anyhow::bail!("timeout_seconds must be at least 1");
        }
        if self.agent_timeout_seconds == 0 {
            anyhow::bail!("agent_timeout_seconds must be at least 1");
        }
        Ok(())
    }
}

pub(crate) fn base_metadata(
    total: usize,
    records: &[AgentExecutionRecord],
    aggregation: Option<&ResultAggregationStrategy>,
) -> HashMap<String, serde_json::Value> {
    let succeeded = records.iter().filter(|r| r.response.success).count();
    let mut metadata = HashMap::new();
    metadata.insert("agents_total".to_string(), serde_json::json!(total));
    metadata.insert("agents_succeeded".to_string(), serde_json::json!(succeeded));
    metadata.insert(
        "agents_failed".to_string(),
        serde_json::json!(records.len() - succeeded),
    );
    if let Some(aggregation) = aggregation {
        metadata.insert(
            "aggregation_strategy".to_string(),
            serde_json::json!(aggregation.name()),
        );
    }
    metadata
}

#[cfg(test)]
mod orchestrator_tests;
