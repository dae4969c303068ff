//! Approval workflow
//!
//! Derives a risk level from the action text and its context, consults
//! the policy to decide whether a human must confirm, and maps the
//! confirmation outcome into an [`ApprovalResult`]. Multi-approval runs
//! the single workflow n times and requires unanimity.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    ApprovalResult, ConfirmationRequest, HumanInteractionHandler, HumanLoopConfig, HumanLoopError,
    RiskLevel, TimeoutAction,
};

/// Risk-driven approval manager.
pub struct ApprovalManager {
    config: HumanLoopConfig,
    handler: Arc<dyn HumanInteractionHandler>,
}

impl ApprovalManager {
    pub fn new(
        config: HumanLoopConfig,
        handler: Arc<dyn HumanInteractionHandler>,
    ) -> Result<Self, HumanLoopError> {
        config.validate()?;
        Ok(Self { config, handler })
    }

    /// Derive the risk level for `action` under `context`.
    ///
    /// An explicit `risk_level` context entry overrides everything.
    /// Otherwise keyword matching sets the base level and context
    /// elevates it: production environments are Critical, amounts above
    /// 10,000 are at least High. Default is Medium.
    pub fn assess_risk(&self, action: &str, context: &HashMap<String, Value>) -> RiskLevel {
        if let Some(Value::String(level)) = context.get("risk_level") {
            if let Some(level) = parse_risk(level) {
                return level;
            }
        }

        let action_lower = action.to_lowercase();
        let mut level = if self
            .config
            .critical_risk_keywords
            .iter()
            .any(|k| action_lower.contains(&k.to_lowercase()))
        {
            RiskLevel::Critical
        } else if self
            .config
            .high_risk_keywords
            .iter()
            .any(|k| action_lower.contains(&k.to_lowercase()))
        {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        if context.get("environment").and_then(Value::as_str) == Some("production") {
            level = level.max(RiskLevel::Critical);
        }
        if let Some(amount) = context.get("amount").and_then(Value::as_f64) {
            if amount > 10_000.0 {
                level = level.max(RiskLevel::High);
            }
        }
        level
    }

    /// Whether the policy requires a human for this risk level. High
    /// and Critical always do.
    pub fn requires_approval(&self, level: RiskLevel) -> bool {
        match level {
            RiskLevel::Low => self.config.require_approval_for_low,
            RiskLevel::Medium => self.config.require_approval_for_medium,
            RiskLevel::High | RiskLevel::Critical => true,
        }
    }

    /// Run the approval workflow for one action.
    pub async fn request_approval(
        &self,
        action: &str,
        description: &str,
        context: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ApprovalResult, HumanLoopError> {
        let risk = self.assess_risk(action, context);
        if !self.requires_approval(risk) {
            debug!(action = action, risk = ?risk, "auto-approved by policy");
            return Ok(ApprovalResult::AutoApproved {
                action: action.to_string(),
            });
        }

        let request = ConfirmationRequest::approval(action, description, risk)
            .with_context(context.clone())
            .with_timeout(self.config.default_timeout);
        let response = self.handler.request_confirmation(request, cancel).await?;

        let result = match response.selected_option.as_str() {
            "approve" => ApprovalResult::Approved {
                action: action.to_string(),
                approver: response.responded_by,
            },
            "modify" => ApprovalResult::Modified {
                action: action.to_string(),
                modified_content: response.modified_content.unwrap_or_default(),
            },
            "timeout" => match self.config.default_on_timeout {
                TimeoutAction::Approve => ApprovalResult::AutoApproved {
                    action: action.to_string(),
                },
                TimeoutAction::Reject => ApprovalResult::TimedOut {
                    action: action.to_string(),
                },
            },
            // reject, or anything unrecognized
            other => ApprovalResult::Rejected {
                action: action.to_string(),
                reason: response.reason.or_else(|| {
                    (other != "reject").then(|| format!("unrecognized option '{}'", other))
                }),
            },
        };
        info!(action = action, result = ?result, "approval resolved");
        Ok(result)
    }

    /// Run `request_approval` n times; the action proceeds only on
    /// unanimous approval. Rejection carries a summary of who approved
    /// and who rejected.
    pub async fn request_multi_approval(
        &self,
        action: &str,
        description: &str,
        approvals_needed: u32,
        context: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ApprovalResult, HumanLoopError> {
        let mut approvers: Vec<String> = Vec::new();
        let mut rejectors: Vec<String> = Vec::new();

        for round in 1..=approvals_needed {
            let round_description =
                format!("{} (approval {} of {})", description, round, approvals_needed);
            let result = self
                .request_approval(action, &round_description, context, cancel)
                .await?;
            match result {
                ApprovalResult::Approved { approver, .. } => {
                    approvers.push(approver.unwrap_or_else(|| format!("approver-{}", round)));
                }
                ApprovalResult::AutoApproved { .. } | ApprovalResult::Modified { .. } => {
                    approvers.push(format!("approver-{}", round));
                }
                ApprovalResult::Rejected { reason, .. } => {
                    rejectors.push(reason.unwrap_or_else(|| format!("rejector-{}", round)));
                }
                ApprovalResult::TimedOut { .. } => {
                    rejectors.push(format!("timeout-{}", round));
                }
            }
        }

        if rejectors.is_empty() {
            Ok(ApprovalResult::Approved {
                action: action.to_string(),
                approver: Some(approvers.join(", ")),
            })
        } else {
            Ok(ApprovalResult::Rejected {
                action: action.to_string(),
                reason: Some(format!(
                    "{} of {} approvals granted; approved by [{}], rejected by [{}]",
                    approvers.len(),
                    approvals_needed,
                    approvers.join(", "),
                    rejectors.join(", ")
                )),
            })
        }
    }
}

fn parse_risk(level: &str) -> Option<RiskLevel> {
    match level.to_lowercase().as_str() {
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        "critical" => Some(RiskLevel::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::human::callback::CallbackHandler;
    use crate::human::ConfirmationResponse;
    use std::time::Duration;

    fn manager_with(config: HumanLoopConfig) -> (ApprovalManager, Arc<CallbackHandler>) {
        let handler = Arc::new(CallbackHandler::new(config.default_timeout));
        (
            ApprovalManager::new(config, handler.clone()).unwrap(),
            handler,
        )
    }

    fn manager() -> (ApprovalManager, Arc<CallbackHandler>) {
        manager_with(HumanLoopConfig::default())
    }

    #[test]
    fn test_risk_from_keywords() {
        let (manager, _) = manager();
        let ctx = HashMap::new();
        assert_eq!(
            manager.assess_risk("delete all customer data", &ctx),
            RiskLevel::Critical
        );
        assert_eq!(
            manager.assess_risk("update the user profile", &ctx),
            RiskLevel::High
        );
        assert_eq!(manager.assess_risk("summarize a report", &ctx), RiskLevel::Medium);
    }

    #[test]
    fn test_risk_elevated_by_context() {
        let (manager, _) = manager();
        let mut ctx = HashMap::new();
        ctx.insert("environment".to_string(), Value::from("production"));
        assert_eq!(
            manager.assess_risk("summarize a report", &ctx),
            RiskLevel::Critical
        );

        let mut ctx = HashMap::new();
        ctx.insert("amount".to_string(), Value::from(25_000.0));
        assert_eq!(manager.assess_risk("book a flight", &ctx), RiskLevel::High);

        let mut ctx = HashMap::new();
        ctx.insert("amount".to_string(), Value::from(500.0));
        assert_eq!(manager.assess_risk("book a flight", &ctx), RiskLevel::Medium);
    }

    #[test]
    fn test_explicit_risk_override_wins() {
        let (manager, _) = manager();
        let mut ctx = HashMap::new();
        ctx.insert("risk_level".to_string(), Value::from("low"));
        ctx.insert("environment".to_string(), Value::from("production"));
        assert_eq!(
            manager.assess_risk("delete everything", &ctx),
            RiskLevel::Low
        );
    }

    #[tokio::test]
    async fn test_low_risk_auto_approves() {
        let (manager, _) = manager();
        let mut ctx = HashMap::new();
        ctx.insert("risk_level".to_string(), Value::from("low"));
        let cancel = CancellationToken::new();
        let result = manager
            .request_approval("read a file", "read-only lookup", &ctx, &cancel)
            .await
            .unwrap();
        assert_eq!(
            result,
            ApprovalResult::AutoApproved {
                action: "read a file".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_approval_round_trip() {
        let (manager, handler) = manager();
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let mut outbound = handler.subscribe();

        let workflow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval(
                        "deploy the service",
                        "deploy v2 to staging",
                        &HashMap::new(),
                        &cancel,
                    )
                    .await
            })
        };

        let request = match outbound.recv().await.unwrap() {
            crate::human::callback::HumanInteraction::Confirmation(request) => request,
            other => panic!("unexpected interaction: {:?}", other),
        };
        assert_eq!(request.risk_level, RiskLevel::Critical);
        let mut response = ConfirmationResponse::selected(&request.id, "approve");
        response.responded_by = Some("carol".to_string());
        handler.complete_confirmation(response);

        let result = workflow.await.unwrap().unwrap();
        assert_eq!(
            result,
            ApprovalResult::Approved {
                action: "deploy the service".to_string(),
                approver: Some("carol".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_rejection_carries_reason() {
        let (manager, handler) = manager();
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let mut outbound = handler.subscribe();

        let workflow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval("drop the table", "cleanup", &HashMap::new(), &cancel)
                    .await
            })
        };

        let request = match outbound.recv().await.unwrap() {
            crate::human::callback::HumanInteraction::Confirmation(request) => request,
            other => panic!("unexpected interaction: {:?}", other),
        };
        let mut response = ConfirmationResponse::selected(&request.id, "reject");
        response.reason = Some("wrong table".to_string());
        handler.complete_confirmation(response);

        let result = workflow.await.unwrap().unwrap();
        assert_eq!(
            result,
            ApprovalResult::Rejected {
                action: "drop the table".to_string(),
                reason: Some("wrong table".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_modify_carries_content() {
        let (manager, handler) = manager();
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let mut outbound = handler.subscribe();

        let workflow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_approval("send the email", "weekly digest", &HashMap::new(), &cancel)
                    .await
            })
        };

        let request = match outbound.recv().await.unwrap() {
            crate::human::callback::HumanInteraction::Confirmation(request) => request,
            other => panic!("unexpected interaction: {:?}", other),
        };
        let mut response = ConfirmationResponse::selected(&request.id, "modify");
        response.modified_content = Some("send it tomorrow instead".to_string());
        handler.complete_confirmation(response);

        let result = workflow.await.unwrap().unwrap();
        assert!(result.is_approved());
        assert_eq!(
            result,
            ApprovalResult::Modified {
                action: "send the email".to_string(),
                modified_content: "send it tomorrow instead".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_default_approve() {
        // No completer responds; after the timeout the policy's
        // default-approve turns the synthetic timeout into AutoApproved.
        let config = HumanLoopConfig {
            default_timeout: Duration::from_secs(1),
            default_on_timeout: TimeoutAction::Approve,
            ..Default::default()
        };
        let (manager, _) = manager_with(config);
        let cancel = CancellationToken::new();
        let result = manager
            .request_approval("send the email", "digest", &HashMap::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            result,
            ApprovalResult::AutoApproved {
                action: "send the email".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_default_reject() {
        let config = HumanLoopConfig {
            default_timeout: Duration::from_secs(1),
            default_on_timeout: TimeoutAction::Reject,
            ..Default::default()
        };
        let (manager, _) = manager_with(config);
        let cancel = CancellationToken::new();
        let result = manager
            .request_approval("send the email", "digest", &HashMap::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            result,
            ApprovalResult::TimedOut {
                action: "send the email".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_multi_approval_unanimous() {
        let (manager, handler) = manager();
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let mut outbound = handler.subscribe();

        let workflow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_multi_approval(
                        "transfer funds",
                        "vendor payment",
                        2,
                        &HashMap::new(),
                        &cancel,
                    )
                    .await
            })
        };

        for approver in ["dana", "erin"] {
            let request = match outbound.recv().await.unwrap() {
                crate::human::callback::HumanInteraction::Confirmation(request) => request,
                other => panic!("unexpected interaction: {:?}", other),
            };
            let mut response = ConfirmationResponse::selected(&request.id, "approve");
            response.responded_by = Some(approver.to_string());
            handler.complete_confirmation(response);
        }

        let result = workflow.await.unwrap().unwrap();
        assert_eq!(
            result,
            ApprovalResult::Approved {
                action: "transfer funds".to_string(),
                approver: Some("dana, erin".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_multi_approval_single_rejection_blocks() {
        let (manager, handler) = manager();
        let manager = Arc::new(manager);
        let cancel = CancellationToken::new();
        let mut outbound = handler.subscribe();

        let workflow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .request_multi_approval(
                        "transfer funds",
                        "vendor payment",
                        2,
                        &HashMap::new(),
                        &cancel,
                    )
                    .await
            })
        };

        for (option, actor) in [("approve", "dana"), ("reject", "frank")] {
            let request = match outbound.recv().await.unwrap() {
                crate::human::callback::HumanInteraction::Confirmation(request) => request,
                other => panic!("unexpected interaction: {:?}", other),
            };
            let mut response = ConfirmationResponse::selected(&request.id, option);
            response.responded_by = Some(actor.to_string());
            if option == "reject" {
                response.reason = Some(actor.to_string());
            }
            handler.complete_confirmation(response);
        }

        let result = workflow.await.unwrap().unwrap();
        match result {
            ApprovalResult::Rejected { reason, .. } => {
                let reason = reason.unwrap();
                assert!(reason.contains("1 of 2"));
                assert!(reason.contains("dana"));
                assert!(reason.contains("frank"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
