//! Execution coordinator
//!
//! Drives a transaction request through session checks, at most one round
//! of interactive approval, signing and submission:
//!
//! ```text
//! Idle -> PolicyCheck -> DirectExecute ------------------> Submitted -> Confirmed
//!              |                                   ^                \-> Failed
//!              \-> AwaitingApproval -> PolicyCheck /
//!                        |                  \-> Failed (MissingPolicies)
//!                        \-> Failed (UserCancelled)
//! ```
//!
//! ## Nonce serialization
//!
//! "read nonce -> sign -> submit" runs under a per-account async mutex, and
//! an accepted submission advances the cached nonce before the mutex is
//! released. A second request for the same account therefore never reads
//! the nonce the first one consumed. Policy checks and approval waits run
//! outside the mutex.
//!
//! ## Escalation
//!
//! Approved policies are merged into the session (union), then coverage is
//! checked exactly once more. Anything still uncovered is terminal
//! `MissingPolicies`; a cancelled or expired wait is `UserCancelled` and
//! leaves the session untouched.

use crate::approval::ApprovalGate;
use crate::chain::{self, ChainQuery, InvokeReceipt, SignedInvoke};
use crate::felt::{self, Felt};
use crate::policy::{PolicySet, PolicyStore};
use crate::sign::{SignContext, Signer, SignerKind};
use crate::state::AccountStateCache;
use crate::types::{ChainId, TransactionRequest};
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Default maximum fee when a request sets none (10^15)
pub const DEFAULT_MAX_FEE: u64 = 1_000_000_000_000_000;

/// States of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Not started
    Idle,
    /// Computing and checking required policies
    PolicyCheck,
    /// Reading the nonce and signing
    DirectExecute,
    /// Waiting for the user to extend the session
    AwaitingApproval,
    /// Handed to the chain
    Submitted,
    /// Accepted by the chain
    Confirmed,
    /// Terminal failure
    Failed,
}

impl ExecutionState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Confirmed | ExecutionState::Failed)
    }
}

/// Result of an accepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Hash of the accepted transaction
    #[serde(with = "felt::felt_hex")]
    pub transaction_hash: Felt,
    /// Nonce the transaction consumed
    #[serde(with = "felt::felt_hex")]
    pub nonce: Felt,
    /// Fee limit the transaction was signed with
    #[serde(with = "felt::felt_hex")]
    pub max_fee: Felt,
    /// States visited, in order
    pub trace: Vec<ExecutionState>,
    /// Approval rounds run (0 or 1)
    pub approvals_requested: usize,
}

/// Coverage of a request by the current session
#[derive(Debug, Clone, PartialEq, Eq)]
struct Coverage {
    uncovered: PolicySet,
    fee_allowed: bool,
}

impl Coverage {
    fn is_covered(&self) -> bool {
        self.uncovered.is_empty() && self.fee_allowed
    }
}

/// Orchestrates requests for one chain
pub struct ExecutionCoordinator {
    chain: Arc<dyn ChainQuery>,
    signer: Arc<dyn Signer>,
    policies: Arc<PolicyStore>,
    state: Arc<AccountStateCache>,
    approvals: Arc<ApprovalGate>,
    default_max_fee: Felt,
    enforce_keypair_sessions: bool,
    nonce_locks: DashMap<Felt, Arc<tokio::sync::Mutex<()>>>,
}

impl ExecutionCoordinator {
    /// Create a coordinator
    pub fn new(
        chain: Arc<dyn ChainQuery>,
        signer: Arc<dyn Signer>,
        policies: Arc<PolicyStore>,
        state: Arc<AccountStateCache>,
        approvals: Arc<ApprovalGate>,
    ) -> Self {
        Self {
            chain,
            signer,
            policies,
            state,
            approvals,
            default_max_fee: Felt::from(DEFAULT_MAX_FEE),
            enforce_keypair_sessions: false,
            nonce_locks: DashMap::new(),
        }
    }

    /// Fee limit for requests that set none
    pub fn with_default_max_fee(mut self, max_fee: Felt) -> Self {
        self.default_max_fee = max_fee;
        self
    }

    /// Require sessions for keypair signers too
    pub fn with_keypair_sessions(mut self, enforce: bool) -> Self {
        self.enforce_keypair_sessions = enforce;
        self
    }

    /// Chain this coordinator submits to
    pub fn chain_id(&self) -> ChainId {
        self.chain.chain_id()
    }

    /// Check whether requests must be covered by a session
    pub fn sessions_enforced(&self) -> bool {
        match self.signer.kind() {
            SignerKind::Credential => true,
            SignerKind::Keypair => self.enforce_keypair_sessions,
        }
    }

    /// Execute a request on behalf of `origin` from account `address`
    #[instrument(
        skip(self, address, request),
        fields(chain = %self.chain_id(), address = %felt::to_hex(&address), calls = request.calls.len())
    )]
    pub async fn execute(
        &self,
        origin: &str,
        address: Felt,
        request: &TransactionRequest,
    ) -> Result<ExecutionOutcome> {
        let mut trace = vec![ExecutionState::Idle];
        let mut approvals_requested = 0;

        let result = self
            .run(origin, address, request, &mut trace, &mut approvals_requested)
            .await;

        match result {
            Ok((receipt, nonce, max_fee)) => {
                transition(&mut trace, ExecutionState::Confirmed);
                info!(
                    origin = %origin,
                    tx_hash = %felt::to_hex(&receipt.transaction_hash),
                    nonce = %felt::to_hex(&nonce),
                    "Transaction accepted"
                );
                Ok(ExecutionOutcome {
                    transaction_hash: receipt.transaction_hash,
                    nonce,
                    max_fee,
                    trace,
                    approvals_requested,
                })
            }
            Err(e) => {
                transition(&mut trace, ExecutionState::Failed);
                if e.is_encoding_defect() {
                    error!(
                        origin = %origin,
                        calls = request.calls.len(),
                        trace = ?trace,
                        error = %e,
                        "Request failed with an encoding defect"
                    );
                } else {
                    warn!(origin = %origin, trace = ?trace, error = %e, "Request failed");
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        origin: &str,
        address: Felt,
        request: &TransactionRequest,
        trace: &mut Vec<ExecutionState>,
        approvals_requested: &mut usize,
    ) -> Result<(InvokeReceipt, Felt, Felt)> {
        transition(trace, ExecutionState::PolicyCheck);

        if self.sessions_enforced() {
            let requested = request.policies();
            let coverage = self.coverage(origin, &requested, request.max_fee()).await;

            if !coverage.is_covered() {
                transition(trace, ExecutionState::AwaitingApproval);
                *approvals_requested += 1;

                let fee_ceiling = if coverage.fee_allowed {
                    None
                } else {
                    request.max_fee()
                };
                let response = self
                    .approvals
                    .request(origin, self.chain_id(), coverage.uncovered, fee_ceiling)
                    .await?;

                if response.approved {
                    self.policies
                        .merge(origin, self.chain_id(), response.policies, response.fee_ceiling)
                        .await?;
                }

                transition(trace, ExecutionState::PolicyCheck);
                let recheck = self.coverage(origin, &requested, request.max_fee()).await;
                if !recheck.is_covered() {
                    return Err(Error::MissingPolicies(recheck.uncovered.into_iter().collect()));
                }
            }
        }

        transition(trace, ExecutionState::DirectExecute);
        let max_fee = request.max_fee().unwrap_or(self.default_max_fee);
        let calldata = chain::encode_execute_calldata(&request.calls);

        let lock = self.nonce_lock(address);
        let _guard = lock.lock().await;

        let nonce = self.state.next_nonce(address).await?;
        let transaction_hash =
            chain::compute_invoke_hash(address, &calldata, max_fee, self.chain_id(), nonce);

        let context = SignContext {
            address,
            chain_id: self.chain_id(),
            nonce,
        };
        let signature = self
            .signer
            .sign_transaction_hash(transaction_hash, &context)
            .await?;

        let tx = SignedInvoke {
            sender_address: address,
            calldata,
            max_fee,
            nonce,
            signature,
            transaction_hash,
        };

        transition(trace, ExecutionState::Submitted);
        match self.chain.submit_invoke(&tx).await {
            Ok(receipt) => {
                self.state.record_submitted(address, nonce + Felt::ONE).await;
                Ok((receipt, nonce, max_fee))
            }
            Err(e) => {
                if e.requires_fresh_nonce() {
                    self.state.mark_nonce_stale(address).await;
                }
                Err(e)
            }
        }
    }

    async fn coverage(&self, origin: &str, requested: &PolicySet, max_fee: Option<Felt>) -> Coverage {
        let chain_id = self.chain_id();
        Coverage {
            uncovered: self.policies.uncovered(origin, chain_id, requested).await,
            fee_allowed: self.policies.covers_fee(origin, chain_id, max_fee).await,
        }
    }

    fn nonce_lock(&self, address: Felt) -> Arc<tokio::sync::Mutex<()>> {
        self.nonce_locks
            .entry(address)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn transition(trace: &mut Vec<ExecutionState>, state: ExecutionState) {
    debug!(from = ?trace.last(), to = ?state, "Execution transition");
    trace.push(state);
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("chain_id", &self.chain_id())
            .field("signer", &self.signer.kind())
            .field("enforce_keypair_sessions", &self.enforce_keypair_sessions)
            .finish_non_exhaustive()
    }
}
