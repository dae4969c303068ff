use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::parallel::ParallelOrchestrator;
use super::sequential::SequentialOrchestrator;
use super::{OrchestrationContext, OrchestratorConfig, ResultAggregationStrategy};
use crate::agent::{Agent, AgentInput, AgentResponse, AgentResult};
use crate::test_support::{EchoAgent, StaticAgent};

/// Appends a suffix to whatever it receives, to make chaining visible.
struct AppendAgent {
    name: String,
    suffix: String,
}

impl AppendAgent {
    fn new(name: &str, suffix: &str) -> Arc<dyn Agent> {
        Arc::new(Self {
            name: name.to_string(),
            suffix: suffix.to_string(),
        })
    }
}

#[async_trait]
impl Agent for AppendAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        Ok(AgentResponse::successful(format!(
            "{} {}",
            input.text, self.suffix
        )))
    }
}

/// Soft-fails every invocation.
struct FailAgent {
    name: String,
}

impl FailAgent {
    fn new(name: &str) -> Arc<dyn Agent> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Agent for FailAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        Ok(AgentResponse::failed("boom"))
    }
}

/// Tracks how many invocations overlap, for the concurrency gate test.
struct CountingAgent {
    name: String,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for CountingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _input: &AgentInput, _cancel: &CancellationToken) -> AgentResult<AgentResponse> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentResponse::successful("done"))
    }
}

fn static_agent(name: &str, answer: &str) -> Arc<dyn Agent> {
    Arc::new(StaticAgent::new(name, answer))
}

fn slow_agent(name: &str, answer: &str, delay: Duration) -> Arc<dyn Agent> {
    Arc::new(StaticAgent::new(name, answer).with_delay(delay))
}

fn parallel(
    agents: Vec<Arc<dyn Agent>>,
    aggregation: ResultAggregationStrategy,
) -> ParallelOrchestrator {
    ParallelOrchestrator::new(
        agents,
        OrchestratorConfig {
            max_concurrency: 3,
            aggregation,
            ..Default::default()
        },
    )
    .unwrap()
}

// --- sequential ---

#[tokio::test]
async fn test_identity_chain_preserves_input() {
    // three echo agents leave the input untouched and record one entry
    // each
    let orchestrator = SequentialOrchestrator::new(
        vec![
            Arc::new(EchoAgent::new("f")) as Arc<dyn Agent>,
            Arc::new(EchoAgent::new("g")),
            Arc::new(EchoAgent::new("h")),
        ],
        OrchestratorConfig::default(),
    )
    .unwrap();

    let result = orchestrator.run("payload", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.final_output.as_deref(), Some("payload"));
    assert_eq!(result.agent_results.len(), 3);
    for (i, record) in result.agent_results.iter().enumerate() {
        assert_eq!(record.execution_order, i);
        assert!(record.completed_at >= record.started_at);
    }
}

#[tokio::test]
async fn test_chain_feeds_output_forward() {
    let orchestrator = SequentialOrchestrator::new(
        vec![AppendAgent::new("a", "one"), AppendAgent::new("b", "two")],
        OrchestratorConfig::default(),
    )
    .unwrap();

    let result = orchestrator.run("start", &CancellationToken::new()).await;
    assert_eq!(result.final_output.as_deref(), Some("start one two"));
    assert_eq!(result.agent_results[1].input, "start one");
}

#[tokio::test]
async fn test_chain_stops_on_failure() {
    let orchestrator = SequentialOrchestrator::new(
        vec![
            AppendAgent::new("a", "one"),
            FailAgent::new("b"),
            AppendAgent::new("c", "three"),
        ],
        OrchestratorConfig::default(),
    )
    .unwrap();

    let result = orchestrator.run("start", &CancellationToken::new()).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("agent 'b' failed"));
    assert_eq!(result.agent_results.len(), 2);
}

#[tokio::test]
async fn test_chain_continue_on_error() {
    let orchestrator = SequentialOrchestrator::new(
        vec![
            AppendAgent::new("a", "one"),
            FailAgent::new("b"),
            AppendAgent::new("c", "three"),
        ],
        OrchestratorConfig {
            continue_on_error: true,
            ..Default::default()
        },
    )
    .unwrap();

    let result = orchestrator.run("start", &CancellationToken::new()).await;
    assert!(result.success);
    // the failed agent's answer flows into the next input
    assert_eq!(result.final_output.as_deref(), Some("boom three"));
    assert_eq!(result.agent_results.len(), 3);
    assert_eq!(result.metadata["agents_failed"], serde_json::json!(1));
}

#[tokio::test]
async fn test_custom_transformer() {
    let orchestrator = SequentialOrchestrator::new(
        vec![AppendAgent::new("a", "one"), Arc::new(EchoAgent::new("b"))],
        OrchestratorConfig::default(),
    )
    .unwrap()
    .with_transformer(Arc::new(|record| {
        format!("{}!", record.response.final_answer)
    }));

    let result = orchestrator.run("start", &CancellationToken::new()).await;
    assert_eq!(result.final_output.as_deref(), Some("start one!!"));
}

#[tokio::test]
async fn test_should_stop_ends_chain_gracefully() {
    let orchestrator = SequentialOrchestrator::new(
        vec![AppendAgent::new("a", "one"), AppendAgent::new("b", "two")],
        OrchestratorConfig::default(),
    )
    .unwrap();

    let mut ctx = OrchestrationContext::new("start");
    ctx.request_stop("operator asked");
    let result = orchestrator
        .run_with_context(&mut ctx, &CancellationToken::new())
        .await;
    assert!(result.success);
    assert!(result.agent_results.is_empty());
    assert_eq!(result.final_output.as_deref(), Some("start"));
}

#[tokio::test]
async fn test_cancelled_chain_preserves_records() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let orchestrator = SequentialOrchestrator::new(
        vec![AppendAgent::new("a", "one")],
        OrchestratorConfig::default(),
    )
    .unwrap();

    let result = orchestrator.run("start", &cancel).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("orchestration cancelled"));
    assert!(result.agent_results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sequential_agent_timeout() {
    let orchestrator = SequentialOrchestrator::new(
        vec![slow_agent("slow", "never", Duration::from_secs(600))],
        OrchestratorConfig {
            agent_timeout_seconds: 1,
            ..Default::default()
        },
    )
    .unwrap();

    let result = orchestrator.run("start", &CancellationToken::new()).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(result.agent_results.len(), 1);
}

// --- parallel ---

#[tokio::test]
async fn test_merge_aggregation() {
    let orchestrator = parallel(
        vec![
            static_agent("A1", "one"),
            static_agent("A2", "two"),
            static_agent("A3", "three"),
        ],
        ResultAggregationStrategy::Merge,
    );

    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(
        result.final_output.as_deref(),
        Some("[A1] one\n[A2] two\n[A3] three")
    );
    assert_eq!(result.agent_results.len(), 3);
}

#[tokio::test]
async fn test_merge_skips_failures() {
    let orchestrator = parallel(
        vec![
            static_agent("A1", "one"),
            FailAgent::new("A2"),
            static_agent("A3", "three"),
        ],
        ResultAggregationStrategy::Merge,
    );

    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.final_output.as_deref(), Some("[A1] one\n[A3] three"));
}

#[tokio::test(start_paused = true)]
async fn test_first_success_and_last_result_by_completion() {
    for (strategy, expected) in [
        (ResultAggregationStrategy::FirstSuccess, "fast"),
        (ResultAggregationStrategy::LastResult, "slow"),
    ] {
        let orchestrator = parallel(
            vec![
                slow_agent("slow", "slow", Duration::from_secs(2)),
                slow_agent("fast", "fast", Duration::from_secs(1)),
            ],
            strategy,
        );
        let result = orchestrator.run("go", &CancellationToken::new()).await;
        assert_eq!(result.final_output.as_deref(), Some(expected));
    }
}

#[tokio::test]
async fn test_vote_majority_and_tie() {
    let orchestrator = parallel(
        vec![
            static_agent("A1", "y"),
            static_agent("A2", "x"),
            static_agent("A3", "y"),
        ],
        ResultAggregationStrategy::Vote,
    );
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert_eq!(result.final_output.as_deref(), Some("y"));

    // tie: earliest execution order wins
    let orchestrator = parallel(
        vec![static_agent("A1", "x"), static_agent("A2", "y")],
        ResultAggregationStrategy::Vote,
    );
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert_eq!(result.final_output.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_custom_aggregator() {
    let orchestrator = parallel(
        vec![static_agent("A1", "one"), static_agent("A2", "two")],
        ResultAggregationStrategy::Custom(Arc::new(|records| {
            Some(format!("{} records", records.len()))
        })),
    );
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert_eq!(result.final_output.as_deref(), Some("2 records"));
}

#[tokio::test]
async fn test_all_failed_reports_failure() {
    let orchestrator = parallel(
        vec![FailAgent::new("A1"), FailAgent::new("A2")],
        ResultAggregationStrategy::Merge,
    );
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("all 2 agents failed"));
    assert_eq!(result.agent_results.len(), 2);
}

#[tokio::test]
async fn test_concurrency_gate_bounds_overlap() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let agents: Vec<Arc<dyn Agent>> = (0..6)
        .map(|i| {
            Arc::new(CountingAgent {
                name: format!("agent-{}", i),
                current: current.clone(),
                peak: peak.clone(),
            }) as Arc<dyn Agent>
        })
        .collect();

    let orchestrator = ParallelOrchestrator::new(
        agents,
        OrchestratorConfig {
            max_concurrency: 2,
            ..Default::default()
        },
    )
    .unwrap();
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.agent_results.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_keeps_partial_records() {
    let orchestrator = ParallelOrchestrator::new(
        vec![
            static_agent("fast", "one"),
            slow_agent("stuck", "never", Duration::from_secs(600)),
        ],
        OrchestratorConfig {
            timeout_seconds: 1,
            aggregation: ResultAggregationStrategy::Merge,
            ..Default::default()
        },
    )
    .unwrap();

    let result = orchestrator.run("go", &CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("orchestration timed out"));
    assert_eq!(result.metadata["timed_out"], serde_json::json!(true));
    // the fast agent's record survived
    assert!(result
        .agent_results
        .iter()
        .any(|r| r.agent_name == "fast" && r.response.success));
}

#[tokio::test]
async fn test_same_input_fans_out() {
    let orchestrator = parallel(
        vec![AppendAgent::new("A1", "one"), AppendAgent::new("A2", "two")],
        ResultAggregationStrategy::Merge,
    );
    let result = orchestrator.run("go", &CancellationToken::new()).await;
    // fan-out without pipelining: both agents saw the original input
    for record in &result.agent_results {
        assert_eq!(record.input, "go");
    }
}

#[tokio::test]
async fn test_parallel_run_with_context() {
    let orchestrator = parallel(
        vec![static_agent("A1", "one"), static_agent("A2", "two")],
        ResultAggregationStrategy::Merge,
    );
    let mut ctx = OrchestrationContext::new("go");
    let result = orchestrator
        .run_with_context(&mut ctx, &CancellationToken::new())
        .await;
    assert!(result.success);
    assert_eq!(ctx.execution_history.len(), 2);
    assert_eq!(ctx.current_input, "[A1] one\n[A2] two");

    // a stopped context runs nothing
    ctx.request_stop("done");
    let result = orchestrator
        .run_with_context(&mut ctx, &CancellationToken::new())
        .await;
    assert!(result.success);
    assert!(result.agent_results.is_empty());
    assert_eq!(ctx.execution_history.len(), 2);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    assert!(SequentialOrchestrator::new(
        vec![static_agent("a", "x")],
        OrchestratorConfig {
            max_concurrency: 0,
            ..Default::default()
        },
    )
    .is_err());
    assert!(ParallelOrchestrator::new(vec![], OrchestratorConfig::default()).is_err());
}
