//! Session coverage and approval escalation through the controller
//!
//! Every controller here signs with a software passkey, so sessions are
//! enforced on each request.

use async_trait::async_trait;
use controller_core::approval::{ApprovalRequest, ApprovalResponse, ApprovalUi, AutoApprove};
use controller_core::chain::MemoryChain;
use controller_core::policy::{Policy, PolicySet};
use controller_core::sign::SoftwareAuthenticator;
use controller_core::{
    Call, ChainId, Controller, ControllerConfig, Error, ExecutionState, Felt, Result,
    TransactionRequest,
};
use parking_lot::Mutex;
use std::sync::Arc;

const ORIGIN: &str = "https://game.example";
const ACCOUNT: u64 = 0xacc0_0001;
const TOKEN_A: u64 = 0xa;
const TOKEN_B: u64 = 0xb;

// ============================================================================
// Helpers
// ============================================================================

/// Grants everything except the listed policies
struct Partial {
    withheld: PolicySet,
    requests: Mutex<Vec<ApprovalRequest>>,
}

#[async_trait]
impl ApprovalUi for Partial {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<ApprovalResponse> {
        self.requests.lock().push(request.clone());
        let granted = request.policies.difference(&self.withheld).cloned().collect();
        Ok(ApprovalResponse::approve(granted, request.fee_ceiling))
    }
}

/// Never answers
struct Unanswered;

#[async_trait]
impl ApprovalUi for Unanswered {
    async fn request_approval(&self, _: &ApprovalRequest) -> Result<ApprovalResponse> {
        std::future::pending().await
    }
}

async fn controller(ui: Arc<dyn ApprovalUi>, config: ControllerConfig) -> (MemoryChain, Controller) {
    let authenticator = Arc::new(SoftwareAuthenticator::new("game.example"));
    let chain = MemoryChain::new(ChainId::sepolia());
    chain.deploy_account(
        Felt::from(ACCOUNT),
        Felt::from(0xc1a55u64),
        authenticator.public_key_felt(),
    );

    let controller = Controller::builder()
        .address(Felt::from(ACCOUNT))
        .credential(
            authenticator.clone(),
            authenticator.credential_id().to_vec(),
            authenticator.public_key_felt(),
        )
        .chain(Arc::new(chain.clone()))
        .approval_ui(ui)
        .config(config)
        .build()
        .await
        .unwrap();
    (chain, controller)
}

fn transfer_policy() -> Policy {
    Policy::new(Felt::from(TOKEN_A), Some("transfer"))
}

fn approve_policy() -> Policy {
    Policy::new(Felt::from(TOKEN_B), Some("approve"))
}

fn transfer() -> Call {
    Call::new(Felt::from(TOKEN_A), "transfer", vec![Felt::from(0xbeefu64), Felt::from(10u64)])
}

fn approve() -> Call {
    Call::new(Felt::from(TOKEN_B), "approve", vec![Felt::from(0xcafeu64), Felt::from(5u64)])
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_covered_request_executes_directly() {
    let ui = Arc::new(AutoApprove::approving());
    let (chain, controller) = controller(ui.clone(), ControllerConfig::default()).await;
    controller
        .approve_session(ORIGIN, ChainId::sepolia(), [transfer_policy()].into(), None)
        .await
        .unwrap();

    let outcome = controller
        .execute(ORIGIN, ChainId::sepolia(), &TransactionRequest::new(vec![transfer()]))
        .await
        .unwrap();

    assert!(ui.requests().is_empty());
    assert_eq!(outcome.approvals_requested, 0);
    assert_eq!(
        outcome.trace,
        vec![
            ExecutionState::Idle,
            ExecutionState::PolicyCheck,
            ExecutionState::DirectExecute,
            ExecutionState::Submitted,
            ExecutionState::Confirmed,
        ]
    );
    assert_eq!(chain.submitted().len(), 1);
    assert_eq!(chain.submitted()[0].transaction_hash, outcome.transaction_hash);
}

#[tokio::test]
async fn test_uncovered_policy_escalates_once_and_unions() {
    let ui = Arc::new(AutoApprove::approving());
    let (_chain, controller) = controller(ui.clone(), ControllerConfig::default()).await;
    controller
        .approve_session(ORIGIN, ChainId::sepolia(), [transfer_policy()].into(), None)
        .await
        .unwrap();

    let request = TransactionRequest::new(vec![transfer(), approve()]);
    let outcome = controller
        .execute(ORIGIN, ChainId::sepolia(), &request)
        .await
        .unwrap();

    let requests = ui.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].policies, PolicySet::from([approve_policy()]));
    assert_eq!(requests[0].origin, ORIGIN);
    assert_eq!(outcome.approvals_requested, 1);
    assert!(outcome.trace.contains(&ExecutionState::AwaitingApproval));

    let session = controller
        .session(ORIGIN, ChainId::sepolia())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.policies, PolicySet::from([transfer_policy(), approve_policy()]));

    // now covered: no second prompt
    controller
        .execute(ORIGIN, ChainId::sepolia(), &request)
        .await
        .unwrap();
    assert_eq!(ui.requests().len(), 1);
}

#[tokio::test]
async fn test_denial_is_terminal_missing_policies() {
    let ui = Arc::new(AutoApprove::denying());
    let (chain, controller) = controller(ui.clone(), ControllerConfig::default()).await;

    let result = controller
        .execute(ORIGIN, ChainId::sepolia(), &TransactionRequest::new(vec![approve()]))
        .await;

    match result {
        Err(Error::MissingPolicies(missing)) => assert_eq!(missing, vec![approve_policy()]),
        other => panic!("expected MissingPolicies, got {:?}", other),
    }
    assert_eq!(ui.requests().len(), 1);
    assert_eq!(chain.submissions(), 0);
    assert!(controller.session(ORIGIN, ChainId::sepolia()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_partial_grant_reports_remaining() {
    let ui = Arc::new(Partial {
        withheld: [approve_policy()].into(),
        requests: Mutex::new(Vec::new()),
    });
    let (_chain, controller) = controller(ui.clone(), ControllerConfig::default()).await;

    let result = controller
        .execute(
            ORIGIN,
            ChainId::sepolia(),
            &TransactionRequest::new(vec![transfer(), approve()]),
        )
        .await;

    assert!(matches!(&result, Err(Error::MissingPolicies(m)) if m == &vec![approve_policy()]));
    assert_eq!(ui.requests.lock().len(), 1);

    // the granted part is kept
    assert!(controller
        .is_covered(ORIGIN, ChainId::sepolia(), &[transfer_policy()].into())
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_approval_times_out_as_cancel() {
    let (chain, controller) = controller(
        Arc::new(Unanswered),
        ControllerConfig::default().with_approval_timeout(120),
    )
    .await;
    controller
        .approve_session(ORIGIN, ChainId::sepolia(), [transfer_policy()].into(), None)
        .await
        .unwrap();

    let result = controller
        .execute(
            ORIGIN,
            ChainId::sepolia(),
            &TransactionRequest::new(vec![transfer(), approve()]),
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::UserCancelled(_)));
    assert!(err.is_user_facing());
    assert_eq!(chain.submissions(), 0);

    // session untouched
    let session = controller
        .session(ORIGIN, ChainId::sepolia())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.policies, PolicySet::from([transfer_policy()]));
}

#[tokio::test]
async fn test_cancel_pending_approvals() {
    let (_chain, controller) = controller(Arc::new(Unanswered), ControllerConfig::default()).await;
    let controller = Arc::new(controller);

    let waiter = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .execute(ORIGIN, ChainId::sepolia(), &TransactionRequest::new(vec![approve()]))
                .await
        })
    };

    // keep cancelling until the wait has started and observed it
    let result = loop {
        controller.cancel_pending_approvals();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        if waiter.is_finished() {
            break waiter.await.unwrap();
        }
    };
    assert!(matches!(result, Err(Error::UserCancelled(_))));
}

#[tokio::test]
async fn test_fee_above_ceiling_escalates() {
    let ui = Arc::new(AutoApprove::approving());
    let (_chain, controller) = controller(ui.clone(), ControllerConfig::default()).await;
    controller
        .approve_session(
            ORIGIN,
            ChainId::sepolia(),
            [transfer_policy()].into(),
            Some(Felt::from(1_000u64)),
        )
        .await
        .unwrap();

    let cheap = TransactionRequest::new(vec![transfer()]).with_max_fee(Felt::from(500u64));
    controller.execute(ORIGIN, ChainId::sepolia(), &cheap).await.unwrap();
    assert!(ui.requests().is_empty());

    let expensive = TransactionRequest::new(vec![transfer()]).with_max_fee(Felt::from(5_000u64));
    let outcome = controller
        .execute(ORIGIN, ChainId::sepolia(), &expensive)
        .await
        .unwrap();

    let requests = ui.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].policies.is_empty());
    assert_eq!(requests[0].fee_ceiling, Some(Felt::from(5_000u64)));
    assert_eq!(outcome.max_fee, Felt::from(5_000u64));
}

#[tokio::test]
async fn test_fresh_account_state_before_sync() {
    let (chain, controller) = controller(
        Arc::new(AutoApprove::approving()),
        ControllerConfig::default(),
    )
    .await;

    let state = controller.account_state(ChainId::sepolia()).unwrap();
    assert!(!state.deployed);
    assert!(!state.registered);
    assert_eq!(state.nonce, Felt::ZERO);
    assert_eq!(chain.total_queries(), 0);

    let synced = controller.sync(ChainId::sepolia()).await.unwrap();
    assert!(synced.deployed);
    assert!(synced.registered);
}
