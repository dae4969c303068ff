//! Human-in-loop arbitration
//!
//! Agents suspend on three kinds of human decisions: confirmations
//! (approve / reject / modify and review flows), freeform inputs
//! (guidance after failures), and escalations (structured "a human must
//! intervene" failures). This module defines the shared data model, the
//! handler capability, and the configuration; [`callback`] holds the
//! pending-request tables, [`approval`] the risk-driven workflow, and
//! [`wrapper`] the agent decorator that ties them together.

pub mod approval;
pub mod callback;
pub mod wrapper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Risk level attached to an action awaiting approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Confirmation request types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfirmationType {
    Binary,
    MultiChoice,
    FreeformInput,
    Review,
}

/// One selectable option on a confirmation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationOption {
    pub id: String,
    pub label: String,
    pub is_default: bool,
    pub is_dangerous: bool,
    pub description: Option<String>,
}

impl ConfirmationOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_default: false,
            is_dangerous: false,
            description: None,
        }
    }

    pub fn default_option(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.is_dangerous = true;
        self
    }
}

/// A request for a human decision, parked until completed, timed out,
/// or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub id: String,
    pub confirmation_type: ConfirmationType,
    pub action: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub context: HashMap<String, serde_json::Value>,
    pub options: Vec<ConfirmationOption>,
    pub timeout: Option<Duration>,
    pub default_on_timeout: Option<String>,
}

impl ConfirmationRequest {
    /// MultiChoice request with the approval option set:
    /// approve (default), reject (dangerous), modify.
    pub fn approval(
        action: impl Into<String>,
        description: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            confirmation_type: ConfirmationType::MultiChoice,
            action: action.into(),
            description: description.into(),
            risk_level,
            context: HashMap::new(),
            options: vec![
                ConfirmationOption::new("approve", "Approve").default_option(),
                ConfirmationOption::new("reject", "Reject").dangerous(),
                ConfirmationOption::new("modify", "Modify"),
            ],
            timeout: None,
            default_on_timeout: None,
        }
    }

    /// Review request over a produced output: approve (default), edit,
    /// reject.
    pub fn review(
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            confirmation_type: ConfirmationType::Review,
            action: action.into(),
            description: description.into(),
            risk_level: RiskLevel::Low,
            context: HashMap::new(),
            options: vec![
                ConfirmationOption::new("approve", "Approve").default_option(),
                ConfirmationOption::new("edit", "Edit"),
                ConfirmationOption::new("reject", "Reject").dangerous(),
            ],
            timeout: None,
            default_on_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// A completer's answer to a pending confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub request_id: String,
    pub selected_option: String,
    pub freeform_input: Option<String>,
    pub modified_content: Option<String>,
    pub reason: Option<String>,
    pub responded_by: Option<String>,
}

impl ConfirmationResponse {
    pub fn selected(request_id: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            selected_option: option.into(),
            freeform_input: None,
            modified_content: None,
            reason: None,
            responded_by: None,
        }
    }
}

/// Outcome of an approval workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ApprovalResult {
    Approved {
        action: String,
        approver: Option<String>,
    },
    Rejected {
        action: String,
        reason: Option<String>,
    },
    Modified {
        action: String,
        modified_content: String,
    },
    TimedOut {
        action: String,
    },
    AutoApproved {
        action: String,
    },
}

impl ApprovalResult {
    /// Whether the action may proceed. Modified counts as approved with
    /// changes.
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            ApprovalResult::Approved { .. }
                | ApprovalResult::AutoApproved { .. }
                | ApprovalResult::Modified { .. }
        )
    }
}

/// Freeform input request delivered to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub id: String,
    pub prompt: String,
}

/// A structured failure signaling that human intervention is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: String,
    pub reason: String,
    pub description: String,
    pub attempted_solutions: Vec<String>,
    pub context: HashMap<String, serde_json::Value>,
}

impl EscalationRequest {
    pub fn new(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reason: reason.into(),
            description: description.into(),
            attempted_solutions: Vec::new(),
            context: HashMap::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<String>) -> Self {
        self.attempted_solutions = attempts;
        self
    }
}

/// How a human resolved an escalation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EscalationAction {
    Resolved,
    Skipped,
    Aborted,
}

/// A completer's answer to a pending escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResult {
    pub request_id: String,
    pub action: EscalationAction,
    pub resolution: Option<String>,
    pub responded_by: Option<String>,
}

/// Errors surfaced by human-in-loop operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HumanLoopError {
    #[error("human response timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Default action when an approval request times out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    Approve,
    Reject,
}

/// Human-in-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanLoopConfig {
    pub default_timeout: Duration,
    pub require_approval_for_low: bool,
    pub require_approval_for_medium: bool,
    pub confirm_before_execution: bool,
    pub review_before_return: bool,
    pub max_retries: u32,
    pub critical_risk_keywords: Vec<String>,
    pub high_risk_keywords: Vec<String>,
    pub default_on_timeout: TimeoutAction,
}

impl Default for HumanLoopConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            require_approval_for_low: false,
            require_approval_for_medium: true,
            confirm_before_execution: false,
            review_before_return: false,
            max_retries: 2,
            critical_risk_keywords: [
                "delete", "drop", "truncate", "destroy", "shutdown", "deploy", "payment",
                "transfer",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            high_risk_keywords: ["modify", "update", "write", "execute", "purchase", "send"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_on_timeout: TimeoutAction::Reject,
        }
    }
}

impl HumanLoopConfig {
    pub fn validate(&self) -> Result<(), HumanLoopError> {
        if self.default_timeout.is_zero() {
            return Err(HumanLoopError::Configuration(
                "default_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capability for dispatching human decisions. Implemented by the
/// async callback handler; UIs and tests can provide their own.
#[async_trait]
pub trait HumanInteractionHandler: Send + Sync {
    /// Dispatch a confirmation and await the decision. Timeouts resolve
    /// to a synthetic response selecting `default_on_timeout`, or the
    /// literal option `"timeout"` when no default is set.
    async fn request_confirmation(
        &self,
        request: ConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConfirmationResponse, HumanLoopError>;

    /// Ask a human for freeform input.
    async fn request_input(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, HumanLoopError>;

    /// Hand an escalation to a human and await the resolution.
    async fn escalate(
        &self,
        request: EscalationRequest,
        cancel: &CancellationToken,
    ) -> Result<EscalationResult, HumanLoopError>;
}
