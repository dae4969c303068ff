//! Async callback handler
//!
//! Parks suspended requests in pending tables keyed by request id; each
//! value is a single-assignment promise completed out-of-band by an
//! external completer (a UI, an API endpoint, an operator console).
//! Outbound requests are published on an observable channel so any
//! number of front-ends can watch for work.
//!
//! Invariant: a request id is present exactly while a caller awaits it.
//! Completing an unknown or already-completed id is a no-op returning
//! false.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{
    ConfirmationRequest, ConfirmationResponse, EscalationRequest, EscalationResult,
    HumanInteractionHandler, HumanLoopError, InputRequest,
};

/// Outbound request delivered to observers.
#[derive(Debug, Clone)]
pub enum HumanInteraction {
    Confirmation(ConfirmationRequest),
    Input(InputRequest),
    Escalation(EscalationRequest),
}

/// Pending-request tables with promise-based completion.
pub struct CallbackHandler {
    confirmations: DashMap<String, oneshot::Sender<ConfirmationResponse>>,
    inputs: DashMap<String, oneshot::Sender<String>>,
    escalations: DashMap<String, oneshot::Sender<EscalationResult>>,
    outbound: broadcast::Sender<HumanInteraction>,
    default_timeout: Duration,
}

impl CallbackHandler {
    pub fn new(default_timeout: Duration) -> Self {
        let (outbound, _) = broadcast::channel(64);
        Self {
            confirmations: DashMap::new(),
            inputs: DashMap::new(),
            escalations: DashMap::new(),
            outbound,
            default_timeout,
        }
    }

    /// Watch outbound requests. Every subscriber sees every request
    /// emitted after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<HumanInteraction> {
        self.outbound.subscribe()
    }

    /// Outbound requests as a stream, for front-ends that forward
    /// observer traffic through stream combinators (a websocket writer,
    /// an SSE response). Lagging subscribers see a lag error item and
    /// then resume.
    pub fn subscribe_stream(&self) -> BroadcastStream<HumanInteraction> {
        BroadcastStream::new(self.outbound.subscribe())
    }

    /// Complete a pending confirmation. Returns whether a promise was
    /// still pending under the response's request id.
    pub fn complete_confirmation(&self, response: ConfirmationResponse) -> bool {
        match self.confirmations.remove(&response.request_id) {
            Some((id, tx)) => {
                debug!(request_id = %id, "confirmation completed");
                tx.send(response).is_ok()
            }
            None => false,
        }
    }

    /// Fail a pending confirmation with cancellation.
    pub fn cancel_confirmation(&self, request_id: &str) -> bool {
        self.confirmations.remove(request_id).is_some()
    }

    /// Complete a pending input request.
    pub fn complete_input(&self, request_id: &str, input: impl Into<String>) -> bool {
        match self.inputs.remove(request_id) {
            Some((_, tx)) => tx.send(input.into()).is_ok(),
            None => false,
        }
    }

    pub fn cancel_input(&self, request_id: &str) -> bool {
        self.inputs.remove(request_id).is_some()
    }

    /// Complete a pending escalation.
    pub fn complete_escalation(&self, result: EscalationResult) -> bool {
        match self.escalations.remove(&result.request_id) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn cancel_escalation(&self, request_id: &str) -> bool {
        self.escalations.remove(request_id).is_some()
    }

    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.len()
    }

    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn pending_escalations(&self) -> usize {
        self.escalations.len()
    }
}

#[async_trait]
impl HumanInteractionHandler for CallbackHandler {
    async fn request_confirmation(
        &self,
        request: ConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConfirmationResponse, HumanLoopError> {
        let id = request.id.clone();
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let default_option = request.default_on_timeout.clone();

        let (tx, rx) = oneshot::channel();
        self.confirmations.insert(id.clone(), tx);
        let _ = self.outbound.send(HumanInteraction::Confirmation(request));

        tokio::select! {
            _ = cancel.cancelled() => {
                self.confirmations.remove(&id);
                Err(HumanLoopError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.confirmations.remove(&id);
                debug!(request_id = %id, "confirmation timed out");
                Ok(ConfirmationResponse::selected(
                    id,
                    default_option.unwrap_or_else(|| "timeout".to_string()),
                ))
            }
            result = rx => match result {
                Ok(response) => Ok(response),
                // Sender dropped: the request was cancelled out-of-band.
                Err(_) => {
                    self.confirmations.remove(&id);
                    Err(HumanLoopError::Cancelled)
                }
            }
        }
    }

    async fn request_input(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, HumanLoopError> {
        let request = InputRequest {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
        };
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.inputs.insert(id.clone(), tx);
        let _ = self.outbound.send(HumanInteraction::Input(request));

        tokio::select! {
            _ = cancel.cancelled() => {
                self.inputs.remove(&id);
                Err(HumanLoopError::Cancelled)
            }
            _ = tokio::time::sleep(self.default_timeout) => {
                self.inputs.remove(&id);
                Err(HumanLoopError::Timeout)
            }
            result = rx => match result {
                Ok(input) => Ok(input),
                Err(_) => {
                    self.inputs.remove(&id);
                    Err(HumanLoopError::Cancelled)
                }
            }
        }
    }

    async fn escalate(
        &self,
        request: EscalationRequest,
        cancel: &CancellationToken,
    ) -> Result<EscalationResult, HumanLoopError> {
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.escalations.insert(id.clone(), tx);
        let _ = self.outbound.send(HumanInteraction::Escalation(request));

        tokio::select! {
            _ = cancel.cancelled() => {
                self.escalations.remove(&id);
                Err(HumanLoopError::Cancelled)
            }
            _ = tokio::time::sleep(self.default_timeout) => {
                self.escalations.remove(&id);
                Err(HumanLoopError::Timeout)
            }
            result = rx => match result {
                Ok(resolution) => Ok(resolution),
                Err(_) => {
                    self.escalations.remove(&id);
                    Err(HumanLoopError::Cancelled)
                }
            }
        }
    }
}
