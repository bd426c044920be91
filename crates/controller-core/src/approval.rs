//! Interactive session approval
//!
//! When a request needs policies the session does not grant, the user is
//! asked to extend the session through an [`ApprovalUi`]. The core never
//! renders anything; it sends an [`ApprovalRequest`] and awaits a structured
//! [`ApprovalResponse`].
//!
//! [`ApprovalGate`] bounds every wait: the UI future races a timeout and a
//! cancel signal, and both surface as `UserCancelled`. Dropping the losing
//! branches releases the timer, so nothing outlives the wait. A prompt left
//! unanswered is closed through [`ApprovalUi::approval_closed`] with
//! `Expired` or `Cancelled`.

use crate::felt::{self, felt_hex, Felt};
use crate::policy::PolicySet;
use crate::types::ChainId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Default bound on an approval wait
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

/// How an approval wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// User granted the request
    Approved,
    /// User refused the request
    Rejected,
    /// No answer before the timeout
    Expired,
    /// Wait cancelled
    Cancelled,
}

/// Approval request sent to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique approval ID
    pub id: Uuid,
    /// Requesting origin
    pub origin: String,
    /// Chain the session applies to
    pub chain_id: ChainId,
    /// Policies the request needs and the session lacks
    pub policies: PolicySet,
    /// Fee ceiling the request asks for
    #[serde(with = "felt_hex::option", default)]
    pub fee_ceiling: Option<Felt>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Create a request expiring after `timeout`
    pub fn new(
        origin: impl Into<String>,
        chain_id: ChainId,
        policies: PolicySet,
        fee_ceiling: Option<Felt>,
        timeout: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            id: Uuid::new_v4(),
            origin: origin.into(),
            chain_id,
            policies,
            fee_ceiling,
            created_at,
            expires_at,
        }
    }
}

/// User's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the user granted anything
    pub approved: bool,
    /// Policies granted (may be a subset of the request)
    pub policies: PolicySet,
    /// Fee ceiling granted
    #[serde(with = "felt_hex::option", default)]
    pub fee_ceiling: Option<Felt>,
}

impl ApprovalResponse {
    /// Grant policies
    pub fn approve(policies: PolicySet, fee_ceiling: Option<Felt>) -> Self {
        Self {
            approved: true,
            policies,
            fee_ceiling,
        }
    }

    /// Grant exactly what was asked
    pub fn approve_all(request: &ApprovalRequest) -> Self {
        Self::approve(request.policies.clone(), request.fee_ceiling)
    }

    /// Refuse the request
    pub fn deny() -> Self {
        Self {
            approved: false,
            policies: PolicySet::new(),
            fee_ceiling: None,
        }
    }

    /// Status the response represents
    pub fn status(&self) -> ApprovalStatus {
        if self.approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        }
    }
}

/// User-facing approval surface
#[async_trait]
pub trait ApprovalUi: Send + Sync {
    /// Ask the user to grant the request
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<ApprovalResponse>;

    /// The wait for `request` ended without an answer
    ///
    /// `status` is `Expired` or `Cancelled`; the surface should dismiss the
    /// prompt. The default does nothing.
    async fn approval_closed(&self, _request: &ApprovalRequest, _status: ApprovalStatus) {}
}

/// Bounded, cancellable approval wait
pub struct ApprovalGate {
    ui: Arc<dyn ApprovalUi>,
    timeout: Duration,
    cancel: watch::Sender<u64>,
    pending: AtomicUsize,
}

impl ApprovalGate {
    /// Create a gate with the default timeout
    pub fn new(ui: Arc<dyn ApprovalUi>) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            ui,
            timeout: DEFAULT_APPROVAL_TIMEOUT,
            cancel,
            pending: AtomicUsize::new(0),
        }
    }

    /// Set the approval timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Approval timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of waits in progress
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cancel every wait in progress
    pub fn cancel_pending(&self) {
        self.cancel.send_modify(|generation| *generation += 1);
        info!(pending = self.pending(), "Pending approvals cancelled");
    }

    /// Ask the user and wait for an answer
    ///
    /// Timeout and cancellation fail with `UserCancelled`; a refusal is an
    /// `Ok` response with `approved == false`.
    #[instrument(skip(self, policies), fields(uncovered = policies.len()))]
    pub async fn request(
        &self,
        origin: &str,
        chain_id: ChainId,
        policies: PolicySet,
        fee_ceiling: Option<Felt>,
    ) -> Result<ApprovalResponse> {
        let request = ApprovalRequest::new(origin, chain_id, policies, fee_ceiling, self.timeout);
        let mut cancelled = self.cancel.subscribe();

        self.pending.fetch_add(1, Ordering::SeqCst);
        debug!(id = %request.id, "Awaiting approval");

        let answer = tokio::select! {
            response = self.ui.request_approval(&request) => Ok(response),
            _ = tokio::time::sleep(self.timeout) => Err(ApprovalStatus::Expired),
            _ = cancelled.changed() => Err(ApprovalStatus::Cancelled),
        };

        self.pending.fetch_sub(1, Ordering::SeqCst);

        match answer {
            Ok(Ok(response)) => {
                info!(
                    id = %request.id,
                    status = ?response.status(),
                    granted = response.policies.len(),
                    fee_ceiling = ?response.fee_ceiling.as_ref().map(felt::to_hex),
                    "Approval answered"
                );
                Ok(response)
            }
            Ok(Err(e)) => Err(e),
            Err(status) => {
                let reason = match status {
                    ApprovalStatus::Expired => {
                        format!("timed out after {}s", self.timeout.as_secs())
                    }
                    _ => "cancelled".to_string(),
                };
                info!(id = %request.id, status = ?status, "Approval closed without an answer");
                self.ui.approval_closed(&request, status).await;
                Err(Error::UserCancelled(format!("Approval {} {}", request.id, reason)))
            }
        }
    }
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Non-interactive approval surface
///
/// Answers every request the same way and records what it was asked.
#[derive(Debug, Default)]
pub struct AutoApprove {
    deny: bool,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl AutoApprove {
    /// Grant every request in full
    pub fn approving() -> Self {
        Self::default()
    }

    /// Refuse every request
    pub fn denying() -> Self {
        Self {
            deny: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ApprovalUi for AutoApprove {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<ApprovalResponse> {
        self.requests.lock().push(request.clone());
        if self.deny {
            Ok(ApprovalResponse::deny())
        } else {
            Ok(ApprovalResponse::approve_all(request))
        }
    }
}
